//! Terminating the pipeline on selected events.

use crate::error::{ProcessingError, Result};
use crate::events::{Event, EventKindSet};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Ends processing when any event from a configured set arrives.
///
/// The downstream is flushed before the failure is raised, so results
/// accumulated so far are delivered. Constructed with [`Stop::new`] the
/// termination is the non-error end-of-processing signal; with
/// [`Stop::with_error`] it is a genuine failure carrying the given
/// message.
pub struct Stop<D> {
    kinds: EventKindSet,
    message: String,
    is_error: bool,
    stopped: bool,
    downstream: D,
}

impl<D: EventProcessor> Stop<D> {
    /// Stop with successful (end-of-processing) termination.
    pub fn new(kinds: EventKindSet, message: impl Into<String>, downstream: D) -> Self {
        Self {
            kinds,
            message: message.into(),
            is_error: false,
            stopped: false,
            downstream,
        }
    }

    /// Stop with an error.
    pub fn with_error(kinds: EventKindSet, message: impl Into<String>, downstream: D) -> Self {
        Self {
            is_error: true,
            ..Self::new(kinds, message, downstream)
        }
    }
}

impl<D: EventProcessor> Handle<Event> for Stop<D> {
    fn handle(&mut self, event: Event) -> Result {
        if self.kinds.contains(event.kind()) {
            let message = format!("{}: {}", self.message, event);
            self.stopped = true;
            self.downstream.flush()?;
            return Err(if self.is_error {
                ProcessingError::Stopped(message)
            } else {
                ProcessingError::EndOfProcessing(message)
            });
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for Stop<D> {
    fn flush(&mut self) -> Result {
        if self.stopped {
            // Downstream was already flushed when stopping.
            return Ok(());
        }
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "stop")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::testutil::CollectSink;

    #[test]
    fn passes_events_outside_the_stop_set() {
        let (sink, out) = CollectSink::new();
        let mut stop = Stop::with_error(
            EventKindSet::of(&[EventKind::Warning]),
            "error in data",
            sink,
        );
        stop.handle(Event::TimeReached { abstime: 1 }).unwrap();
        stop.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 1);
        assert!(out.flushed());
    }

    #[test]
    fn stops_with_error_and_flushes_downstream_first() {
        let (sink, out) = CollectSink::new();
        let mut stop = Stop::with_error(
            EventKindSet::of(&[EventKind::Warning]),
            "error in data",
            sink,
        );
        let err = stop
            .handle(Event::Warning {
                message: "bad flag".into(),
            })
            .unwrap_err();
        match err {
            ProcessingError::Stopped(message) => {
                assert!(message.contains("error in data"));
                assert!(message.contains("bad flag"));
            }
            other => panic!("expected stopped error, got {other}"),
        }
        assert_eq!(out.lock().unwrap().flush_count, 1);
    }

    #[test]
    fn non_error_stop_is_end_of_processing() {
        let (sink, _out) = CollectSink::new();
        let mut stop = Stop::new(EventKindSet::of(&[EventKind::DataLost]), "gap seen", sink);
        let err = stop.handle(Event::DataLost { abstime: 3 }).unwrap_err();
        assert!(err.is_end_of_processing());
    }
}
