//! Stream sanity checks and constant time shifts.

use crate::error::Result;
use crate::events::{Abstime, Event, EventKind};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Emits a warning just before any timed event whose abstime violates
/// (strict or non-strict) monotonicity; all events pass through unchanged.
///
/// Checking monotonicity is a cheap way to detect gross input problems,
/// such as decoding a file with the wrong record format.
pub struct CheckMonotonic<D> {
    strict: bool,
    last_seen: Option<Abstime>,
    downstream: D,
}

impl<D: EventProcessor> CheckMonotonic<D> {
    pub fn new(strict: bool, downstream: D) -> Self {
        Self {
            strict,
            last_seen: None,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for CheckMonotonic<D> {
    fn handle(&mut self, event: Event) -> Result {
        if let Some(abstime) = event.abstime() {
            if let Some(last) = self.last_seen {
                let monotonic = if self.strict {
                    abstime > last
                } else {
                    abstime >= last
                };
                if !monotonic {
                    self.downstream.handle(Event::Warning {
                        message: format!("non-monotonic abstime: {last} followed by {abstime}"),
                    })?;
                }
            }
            self.last_seen = Some(abstime);
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for CheckMonotonic<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "check_monotonic")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Emits a warning when a start/stop event sequence deviates from strict
/// alternation; all events pass through.
pub struct CheckAlternating<D> {
    start: EventKind,
    stop: EventKind,
    expect_start: bool,
    downstream: D,
}

impl<D: EventProcessor> CheckAlternating<D> {
    pub fn new(start: EventKind, stop: EventKind, downstream: D) -> Self {
        assert!(start != stop, "start and stop kinds must differ");
        Self {
            start,
            stop,
            expect_start: true,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for CheckAlternating<D> {
    fn handle(&mut self, event: Event) -> Result {
        let kind = event.kind();
        if kind == self.start {
            if !self.expect_start {
                self.downstream.handle(Event::Warning {
                    message: "start event received while expecting stop".into(),
                })?;
            }
            self.expect_start = false;
        } else if kind == self.stop {
            if self.expect_start {
                self.downstream.handle(Event::Warning {
                    message: "stop event received while expecting start".into(),
                })?;
            }
            self.expect_start = true;
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for CheckAlternating<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "check_alternating")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Adds a constant offset to the abstime of every timed event.
pub struct Delay<D> {
    delta: Abstime,
    downstream: D,
}

impl<D: EventProcessor> Delay<D> {
    pub fn new(delta: Abstime, downstream: D) -> Self {
        Self { delta, downstream }
    }
}

impl<D: EventProcessor> Handle<Event> for Delay<D> {
    fn handle(&mut self, mut event: Event) -> Result {
        event.shift_abstime(self.delta);
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for Delay<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "delay")
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
    use crate::testutil::CollectSink;

    fn det(abstime: i64) -> Event {
        Event::Detection {
            abstime,
            channel: 0,
        }
    }

    #[test]
    fn monotonic_stream_passes_clean() {
        let (sink, out) = CollectSink::new();
        let mut check = CheckMonotonic::new(false, sink);
        for t in [1, 2, 2, 5] {
            check.handle(det(t)).unwrap();
        }
        check.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 4);
        assert!(out.flushed());
    }

    #[test]
    fn warning_precedes_offending_event() {
        let (sink, out) = CollectSink::new();
        let mut check = CheckMonotonic::new(false, sink);
        check.handle(det(5)).unwrap();
        check.handle(det(3)).unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 3);
        assert_eq!(out.events[1].kind(), EventKind::Warning);
        assert_eq!(out.events[2], det(3));
    }

    #[test]
    fn strict_mode_flags_equal_times() {
        let (sink, out) = CollectSink::new();
        let mut check = CheckMonotonic::new(true, sink);
        check.handle(det(5)).unwrap();
        check.handle(det(5)).unwrap();
        assert_eq!(out.lock().unwrap().events[1].kind(), EventKind::Warning);
    }

    #[test]
    fn alternation_violations_warn() {
        let (sink, out) = CollectSink::new();
        let start = |t| Event::Marker {
            abstime: t,
            channel: 0,
        };
        let stop = |t| Event::TimeReached { abstime: t };
        let mut check = CheckAlternating::new(EventKind::Marker, EventKind::TimeReached, sink);
        check.handle(start(1)).unwrap();
        check.handle(stop(2)).unwrap();
        check.handle(stop(3)).unwrap(); // deviation
        let out = out.lock().unwrap();
        let warnings: Vec<_> = out
            .events
            .iter()
            .filter(|e| e.kind() == EventKind::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn delay_shifts_timed_events_only() {
        let (sink, out) = CollectSink::new();
        let mut delay = Delay::new(100, sink);
        delay.handle(det(5)).unwrap();
        delay
            .handle(Event::Warning {
                message: "w".into(),
            })
            .unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events[0], det(105));
        assert_eq!(out.events[1].kind(), EventKind::Warning);
    }
}
