//! Bounded-window reordering of timed events.

use crate::arith::pairing_cutoff;
use crate::error::{ProcessingError, Result};
use crate::events::{Abstime, Event, EventKindSet};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Sorts events by abstime, provided they are out of order only within a
/// bounded time window.
///
/// A sliding-window insertion sort: for each input with abstime `t`, all
/// buffered events older than `t - time_window` are emitted, then the new
/// event is inserted at its sorted position. An arriving event older than
/// the most recently emitted one means the window was exceeded, which is
/// an error. The buffer drains in order on flush.
///
/// Only events in `sorted` are accepted; use an upstream
/// [`crate::filters::Select`] to split other traffic around this node.
pub struct RecoverOrder<D> {
    sorted: EventKindSet,
    window_size: Abstime,
    // Ascending abstime order. Linear searches: the window is expected to
    // hold few events in the intended use cases.
    buf: Vec<Event>,
    last_emitted: Option<Abstime>,
    downstream: D,
}

impl<D: EventProcessor> RecoverOrder<D> {
    /// Panics if `time_window` is negative or `sorted` is empty.
    pub fn new(sorted: EventKindSet, time_window: Abstime, downstream: D) -> Self {
        assert!(time_window >= 0, "time window must not be negative");
        assert!(!sorted.is_empty(), "sorted event set must not be empty");
        Self {
            sorted,
            window_size: time_window,
            buf: Vec::new(),
            last_emitted: None,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for RecoverOrder<D> {
    fn handle(&mut self, event: Event) -> Result {
        debug_assert!(self.sorted.contains(event.kind()));
        let abstime = event
            .abstime()
            .ok_or_else(|| ProcessingError::Format("recover_order requires timed events".into()))?;
        if let Some(last) = self.last_emitted {
            if abstime < last {
                return Err(ProcessingError::OutOfOrder(format!(
                    "event at {abstime} arrived outside of time window (already emitted {last})"
                )));
            }
        }

        let cutoff = pairing_cutoff(abstime, self.window_size);
        let keep_from = self
            .buf
            .iter()
            .position(|e| e.abstime().unwrap_or(Abstime::MIN) >= cutoff)
            .unwrap_or(self.buf.len());
        for e in self.buf.drain(..keep_from) {
            self.last_emitted = e.abstime();
            self.downstream.handle(e)?;
        }

        let insert_at = self
            .buf
            .iter()
            .rposition(|e| e.abstime().unwrap_or(Abstime::MIN) < abstime)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.buf.insert(insert_at, event);
        Ok(())
    }
}

impl<D: EventProcessor> Processor for RecoverOrder<D> {
    fn flush(&mut self) -> Result {
        for e in std::mem::take(&mut self.buf) {
            self.downstream.handle(e)?;
        }
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "recover_order")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
