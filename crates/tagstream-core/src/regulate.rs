//! Regulating the frequency of time-reached events.

use crate::arith::add_sat;
use crate::error::Result;
use crate::events::{Abstime, Event};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Ensures the stream carries `TimeReached` events no less often than an
/// abstime interval or an emitted-event count requires, and absorbs excess
/// upstream `TimeReached` events by the same criteria.
///
/// This regulation is what keeps merge buffering bounded: a merge cannot
/// release buffered events until it knows all earlier events on the other
/// input have been seen, so every input must carry time information at
/// some minimal frequency. On flush, one final `TimeReached` conveys the
/// last observed abstime, provided any event was received since the last
/// emission.
pub struct RegulateTimeReached<D> {
    interval_threshold: Abstime,
    count_threshold: usize,
    exact_reached: Option<Abstime>,
    next_time_threshold: Abstime,
    emitted_since_prev: usize,
    seen_since_prev: usize,
    downstream: D,
}

impl<D: EventProcessor> RegulateTimeReached<D> {
    pub fn new(interval_threshold: Abstime, count_threshold: usize, downstream: D) -> Self {
        Self {
            interval_threshold,
            count_threshold,
            exact_reached: None,
            next_time_threshold: Abstime::MIN,
            emitted_since_prev: 0,
            seen_since_prev: 0,
            downstream,
        }
    }

    // Called with the abstime of every upstream event seen.
    fn note_time_reached(&mut self, abstime: Abstime) -> Result {
        self.seen_since_prev += 1;
        if abstime >= self.next_time_threshold || self.emitted_since_prev >= self.count_threshold {
            self.downstream.handle(Event::TimeReached { abstime })?;
            self.next_time_threshold = add_sat(abstime, self.interval_threshold);
            self.emitted_since_prev = 0;
            self.seen_since_prev = 0;
        }
        self.exact_reached = Some(abstime);
        Ok(())
    }
}

impl<D: EventProcessor> Handle<Event> for RegulateTimeReached<D> {
    fn handle(&mut self, event: Event) -> Result {
        match event {
            Event::TimeReached { abstime } => self.note_time_reached(abstime),
            event => {
                let abstime = event.abstime();
                self.downstream.handle(event)?;
                self.emitted_since_prev += 1;
                match abstime {
                    Some(t) => self.note_time_reached(t),
                    None => Ok(()),
                }
            }
        }
    }
}

impl<D: EventProcessor> Processor for RegulateTimeReached<D> {
    fn flush(&mut self) -> Result {
        // Convey the best known stream end time, unless the last emission
        // already was a time-reached at that abstime.
        if let Some(abstime) = self.exact_reached {
            if self.seen_since_prev > 0 {
                self.downstream.handle(Event::TimeReached { abstime })?;
            }
        }
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "regulate_time_reached")
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

    fn det(abstime: i64) -> Event {
        Event::Detection {
            abstime,
            channel: 0,
        }
    }

    fn tr(abstime: i64) -> Event {
        Event::TimeReached { abstime }
    }

    #[test]
    fn absorbs_excess_time_reached() {
        let (sink, out) = CollectSink::new();
        let mut reg = RegulateTimeReached::new(100, usize::MAX, sink);
        reg.handle(tr(0)).unwrap(); // first always satisfies threshold
        reg.handle(tr(10)).unwrap(); // absorbed
        reg.handle(tr(50)).unwrap(); // absorbed
        reg.handle(tr(100)).unwrap(); // interval reached
        assert_eq!(out.lock().unwrap().events, vec![tr(0), tr(100)]);
    }

    #[test]
    fn count_threshold_inserts_time_reached() {
        let (sink, out) = CollectSink::new();
        let mut reg = RegulateTimeReached::new(Abstime::MAX, 2, sink);
        reg.handle(det(1)).unwrap(); // first event: threshold starts at MIN, emits
        reg.handle(det(2)).unwrap();
        reg.handle(det(3)).unwrap(); // count threshold reached
        let events = out.lock().unwrap().events.clone();
        assert_eq!(
            events,
            vec![det(1), tr(1), det(2), det(3), tr(3)]
        );
    }

    #[test]
    fn flush_emits_final_time_reached() {
        let (sink, out) = CollectSink::new();
        let mut reg = RegulateTimeReached::new(Abstime::MAX, usize::MAX, sink);
        reg.handle(det(1)).unwrap(); // emits tr(1)
        reg.handle(det(7)).unwrap();
        reg.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events, vec![det(1), tr(1), det(7), tr(7)]);
        assert!(out.flushed());
    }

    #[test]
    fn flush_without_events_emits_nothing() {
        let (sink, out) = CollectSink::new();
        let mut reg = RegulateTimeReached::new(100, 100, sink);
        reg.flush().unwrap();
        let out = out.lock().unwrap();
        assert!(out.events.is_empty());
        assert!(out.flushed());
    }

    #[test]
    fn output_is_monotonic_for_monotonic_input() {
        let (sink, out) = CollectSink::new();
        let mut reg = RegulateTimeReached::new(5, 3, sink);
        for t in [0, 1, 4, 9, 9, 12, 30] {
            reg.handle(det(t)).unwrap();
        }
        reg.flush().unwrap();
        let out = out.lock().unwrap();
        let times: Vec<i64> = out.events.iter().filter_map(|e| e.abstime()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!(out
            .events
            .iter()
            .any(|e| e.kind() == EventKind::TimeReached));
    }
}
