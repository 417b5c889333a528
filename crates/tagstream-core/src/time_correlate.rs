//! Collapsing detection pairs into time-correlated detections.

use crate::error::Result;
use crate::events::{Difftime, Event};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Where on the start–stop interval the collapsed event is anchored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// Abstime of the first (start) detection.
    Start,
    /// Abstime of the second (stop) detection.
    Stop,
    /// Integer midpoint of the pair's abstimes.
    Midpoint,
    /// `start + round(difftime * fraction)` for a fraction in [0, 1].
    Fraction(f64),
}

/// Collapses each [`Event::DetectionPair`] into a
/// [`Event::TimeCorrelatedDetection`].
///
/// Difftime is `second.abstime - first.abstime` and must be representable
/// by the difftime type. The emitted channel is the start channel or the
/// stop channel, as configured. No reordering takes place: with stop times
/// in order and starts within a known window, the output is time-bound
/// out-of-order by at most that window (zero for [`Anchor::Stop`]).
pub struct TimeCorrelate<D> {
    anchor: Anchor,
    use_start_channel: bool,
    downstream: D,
}

impl<D: EventProcessor> TimeCorrelate<D> {
    pub fn new(anchor: Anchor, use_start_channel: bool, downstream: D) -> Self {
        if let Anchor::Fraction(f) = anchor {
            assert!((0.0..=1.0).contains(&f), "fraction must be in [0, 1]");
        }
        Self {
            anchor,
            use_start_channel,
            downstream,
        }
    }

    pub fn at_start(downstream: D) -> Self {
        Self::new(Anchor::Start, true, downstream)
    }

    pub fn at_stop(downstream: D) -> Self {
        Self::new(Anchor::Stop, false, downstream)
    }

    pub fn at_midpoint(use_start_channel: bool, downstream: D) -> Self {
        Self::new(Anchor::Midpoint, use_start_channel, downstream)
    }

    pub fn at_fraction(fraction: f64, use_start_channel: bool, downstream: D) -> Self {
        Self::new(Anchor::Fraction(fraction), use_start_channel, downstream)
    }
}

impl<D: EventProcessor> Handle<Event> for TimeCorrelate<D> {
    fn handle(&mut self, event: Event) -> Result {
        let Event::DetectionPair { first, second } = event else {
            return self.downstream.handle(event);
        };
        let difftime = second.abstime - first.abstime;
        let abstime = match self.anchor {
            Anchor::Start => first.abstime,
            Anchor::Stop => second.abstime,
            Anchor::Midpoint => first.abstime + difftime / 2,
            Anchor::Fraction(f) => first.abstime + (difftime as f64 * f).round() as i64,
        };
        let channel = if self.use_start_channel {
            first.channel
        } else {
            second.channel
        };
        self.downstream.handle(Event::TimeCorrelatedDetection {
            abstime,
            channel,
            difftime: difftime as Difftime,
        })
    }
}

impl<D: EventProcessor> Processor for TimeCorrelate<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "time_correlate")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Flips the sign of difftime; requires the difftime type to be signed,
/// which it is.
pub struct NegateDifftime<D> {
    downstream: D,
}

impl<D: EventProcessor> NegateDifftime<D> {
    pub fn new(downstream: D) -> Self {
        Self { downstream }
    }
}

impl<D: EventProcessor> Handle<Event> for NegateDifftime<D> {
    fn handle(&mut self, event: Event) -> Result {
        match event {
            Event::TimeCorrelatedDetection {
                abstime,
                channel,
                difftime,
            } => self.downstream.handle(Event::TimeCorrelatedDetection {
                abstime,
                channel,
                difftime: -difftime,
            }),
            event => self.downstream.handle(event),
        }
    }
}

impl<D: EventProcessor> Processor for NegateDifftime<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "negate_difftime")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Projects time-correlated detections onto plain detections.
pub struct RemoveTimeCorrelation<D> {
    downstream: D,
}

impl<D: EventProcessor> RemoveTimeCorrelation<D> {
    pub fn new(downstream: D) -> Self {
        Self { downstream }
    }
}

impl<D: EventProcessor> Handle<Event> for RemoveTimeCorrelation<D> {
    fn handle(&mut self, event: Event) -> Result {
        match event {
            Event::TimeCorrelatedDetection {
                abstime, channel, ..
            } => self.downstream.handle(Event::Detection { abstime, channel }),
            event => self.downstream.handle(event),
        }
    }
}

impl<D: EventProcessor> Processor for RemoveTimeCorrelation<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "remove_time_correlation")
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
    use crate::events::Detection;
    use crate::testutil::CollectSink;

    fn pair(start: (i64, i32), stop: (i64, i32)) -> Event {
        Event::DetectionPair {
            first: Detection {
                abstime: start.0,
                channel: start.1,
            },
            second: Detection {
                abstime: stop.0,
                channel: stop.1,
            },
        }
    }

    fn tcd(abstime: i64, channel: i32, difftime: i32) -> Event {
        Event::TimeCorrelatedDetection {
            abstime,
            channel,
            difftime,
        }
    }

    #[test]
    fn at_start_uses_start_time_and_channel() {
        let (sink, out) = CollectSink::new();
        let mut p = TimeCorrelate::at_start(sink);
        p.handle(pair((100, 0), (130, 1))).unwrap();
        assert_eq!(out.lock().unwrap().events, vec![tcd(100, 0, 30)]);
    }

    #[test]
    fn at_stop_uses_stop_time_and_channel() {
        let (sink, out) = CollectSink::new();
        let mut p = TimeCorrelate::at_stop(sink);
        p.handle(pair((100, 0), (130, 1))).unwrap();
        assert_eq!(out.lock().unwrap().events, vec![tcd(130, 1, 30)]);
    }

    #[test]
    fn at_midpoint_integer_division() {
        let (sink, out) = CollectSink::new();
        let mut p = TimeCorrelate::at_midpoint(true, sink);
        p.handle(pair((100, 0), (131, 1))).unwrap();
        assert_eq!(out.lock().unwrap().events, vec![tcd(115, 0, 31)]);
    }

    #[test]
    fn at_fraction_rounds() {
        let (sink, out) = CollectSink::new();
        let mut p = TimeCorrelate::at_fraction(0.25, false, sink);
        p.handle(pair((100, 0), (110, 1))).unwrap();
        // 100 + round(10 * 0.25) = 103 (round half away from zero)
        assert_eq!(out.lock().unwrap().events, vec![tcd(103, 1, 10)]);
    }

    #[test]
    fn negative_difftime_allowed() {
        let (sink, out) = CollectSink::new();
        let mut p = TimeCorrelate::at_stop(sink);
        p.handle(pair((130, 0), (100, 1))).unwrap();
        assert_eq!(out.lock().unwrap().events, vec![tcd(100, 1, -30)]);
    }

    #[test]
    fn negate_difftime_flips_sign() {
        let (sink, out) = CollectSink::new();
        let mut p = NegateDifftime::new(sink);
        p.handle(tcd(100, 0, 30)).unwrap();
        assert_eq!(out.lock().unwrap().events, vec![tcd(100, 0, -30)]);
    }

    #[test]
    fn remove_time_correlation_projects() {
        let (sink, out) = CollectSink::new();
        let mut p = RemoveTimeCorrelation::new(sink);
        p.handle(tcd(100, 3, 30)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::Detection {
                abstime: 100,
                channel: 3,
            }]
        );
    }
}
