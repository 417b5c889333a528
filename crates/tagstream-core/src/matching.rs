//! Deriving new events from matched events.

use crate::error::Result;
use crate::events::{Abstime, Channel, Event, EventKind};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Predicate over events of the matched kind.
pub trait Matcher {
    fn matches(&self, event: &Event) -> bool;
}

/// Matches every event.
pub struct AlwaysMatcher;

impl Matcher for AlwaysMatcher {
    fn matches(&self, _event: &Event) -> bool {
        true
    }
}

/// Matches no event.
pub struct NeverMatcher;

impl Matcher for NeverMatcher {
    fn matches(&self, _event: &Event) -> bool {
        false
    }
}

/// Matches events on a specific channel.
pub struct ChannelMatcher {
    pub channel: Channel,
}

impl Matcher for ChannelMatcher {
    fn matches(&self, event: &Event) -> bool {
        event.channel() == Some(self.channel)
    }
}

/// Emits a derived event alongside (or instead of) each matched event.
///
/// For each timed event of kind `kind` accepted by the matcher, the
/// constructor `make` is invoked with the event's abstime. With `replace`
/// the derived event substitutes the original (the classic marker
/// translation); otherwise it is emitted in addition, after the original.
pub struct MatchEvent<M, F, D> {
    kind: EventKind,
    matcher: M,
    make: F,
    replace: bool,
    downstream: D,
}

impl<M, F, D> MatchEvent<M, F, D>
where
    M: Matcher,
    F: Fn(Abstime) -> Event,
    D: EventProcessor,
{
    /// Emit the derived event in addition to the original.
    pub fn new(kind: EventKind, matcher: M, make: F, downstream: D) -> Self {
        Self {
            kind,
            matcher,
            make,
            replace: false,
            downstream,
        }
    }

    /// Emit the derived event instead of the original.
    pub fn replace(kind: EventKind, matcher: M, make: F, downstream: D) -> Self {
        Self {
            kind,
            matcher,
            make,
            replace: true,
            downstream,
        }
    }
}

impl<M, F, D> Handle<Event> for MatchEvent<M, F, D>
where
    M: Matcher,
    F: Fn(Abstime) -> Event,
    D: EventProcessor,
{
    fn handle(&mut self, event: Event) -> Result {
        if event.kind() == self.kind && self.matcher.matches(&event) {
            if let Some(abstime) = event.abstime() {
                let derived = (self.make)(abstime);
                if self.replace {
                    return self.downstream.handle(derived);
                }
                self.downstream.handle(event)?;
                return self.downstream.handle(derived);
            }
        }
        self.downstream.handle(event)
    }
}

impl<M, F, D> Processor for MatchEvent<M, F, D>
where
    M: Matcher,
    F: Fn(Abstime) -> Event,
    D: EventProcessor,
{
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "match")
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

    fn marker(abstime: i64, channel: i32) -> Event {
        Event::Marker { abstime, channel }
    }

    #[test]
    fn translate_marker_channel_to_time_reached() {
        let (sink, out) = CollectSink::new();
        let mut m = MatchEvent::replace(
            EventKind::Marker,
            ChannelMatcher { channel: 2 },
            |abstime| Event::TimeReached { abstime },
            sink,
        );
        m.handle(marker(10, 2)).unwrap();
        m.handle(marker(20, 3)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::TimeReached { abstime: 10 }, marker(20, 3)]
        );
    }

    #[test]
    fn match_emits_in_addition() {
        let (sink, out) = CollectSink::new();
        let mut m = MatchEvent::new(
            EventKind::Marker,
            AlwaysMatcher,
            |abstime| Event::TimeReached { abstime },
            sink,
        );
        m.handle(marker(10, 0)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![marker(10, 0), Event::TimeReached { abstime: 10 }]
        );
    }

    #[test]
    fn never_matcher_passes_through() {
        let (sink, out) = CollectSink::new();
        let mut m = MatchEvent::replace(
            EventKind::Marker,
            NeverMatcher,
            |abstime| Event::TimeReached { abstime },
            sink,
        );
        m.handle(marker(10, 0)).unwrap();
        m.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events, vec![marker(10, 0)]);
        assert!(out.flushed());
    }
}
