//! Capture sink for tests and diagnostics.

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{Handle, NodeInfo, Processor};

/// What a [`CollectSink`] has received so far.
#[derive(Debug, Default)]
pub struct Collected<E> {
    pub events: Vec<E>,
    pub flush_count: usize,
}

impl<E> Collected<E> {
    pub fn flushed(&self) -> bool {
        self.flush_count > 0
    }
}

/// A sink that records every event it receives and counts flushes.
///
/// The captured output is shared through an `Arc<Mutex<_>>` so it stays
/// accessible after the sink has been moved into a pipeline (including
/// across the thread boundary of a buffer).
pub struct CollectSink<E = Event> {
    out: Arc<Mutex<Collected<E>>>,
}

impl<E> CollectSink<E> {
    pub fn new() -> (Self, Arc<Mutex<Collected<E>>>) {
        let out = Arc::new(Mutex::new(Collected {
            events: Vec::new(),
            flush_count: 0,
        }));
        (Self { out: out.clone() }, out)
    }
}

impl<E> Handle<E> for CollectSink<E> {
    fn handle(&mut self, event: E) -> Result {
        self.out.lock().unwrap().events.push(event);
        Ok(())
    }
}

impl<E> Processor for CollectSink<E> {
    fn flush(&mut self) -> Result {
        self.out.lock().unwrap().flush_count += 1;
        Ok(())
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "collect_sink")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = ProcessorGraph::new();
        g.push_entry_point(self);
        g
    }
}

/// A sink that fails every operation, for exercising error propagation.
pub struct FailSink {
    pub message: &'static str,
}

impl<E> Handle<E> for FailSink {
    fn handle(&mut self, _event: E) -> Result {
        Err(crate::error::ProcessingError::Stopped(self.message.into()))
    }
}

impl Processor for FailSink {
    fn flush(&mut self) -> Result {
        Err(crate::error::ProcessingError::Stopped(self.message.into()))
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "fail_sink")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = ProcessorGraph::new();
        g.push_entry_point(self);
        g
    }
}
