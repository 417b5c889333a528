//! Pairing detections on a start channel with detections on stop channels.
//!
//! All pairing processors buffer start detections (or only the most recent
//! one) within a time window, emit a [`Event::DetectionPair`] for each
//! stop detection that pairs, and pass every event through. Expired starts
//! are expelled lazily as stops arrive. The cutoff `stop_time - window` is
//! computed with saturation so underflow yields the minimum abstime.

use std::collections::VecDeque;

use crate::arith::pairing_cutoff;
use crate::error::Result;
use crate::events::{Abstime, Channel, Detection, Event};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Maximum number of stop channels for the `pair_one` variants, which
/// track a per-start stop mask.
const MAX_STOP_CHANNELS: usize = 64;

fn check_window(window: Abstime) {
    assert!(window >= 0, "time window must not be negative");
}

#[derive(Clone, Copy)]
struct StartState {
    time: Abstime,
    stopped: u64,
}

fn all_stopped(mask: u64, n_stop: usize) -> bool {
    mask.count_ones() as usize == n_stop
}

/// Emits a pair for every buffered start when a stop arrives.
pub struct PairAll<D> {
    start_channel: Channel,
    stop_channels: Vec<Channel>,
    window_size: Abstime,
    starts: VecDeque<Abstime>,
    downstream: D,
}

impl<D: EventProcessor> PairAll<D> {
    /// Panics if `time_window` is negative.
    pub fn new(
        start_channel: Channel,
        stop_channels: Vec<Channel>,
        time_window: Abstime,
        downstream: D,
    ) -> Self {
        check_window(time_window);
        Self {
            start_channel,
            stop_channels,
            window_size: time_window,
            starts: VecDeque::new(),
            downstream,
        }
    }

    fn expel_old_starts(&mut self, earliest_stop: Abstime) {
        let cutoff = pairing_cutoff(earliest_stop, self.window_size);
        while self.starts.front().is_some_and(|&t| t < cutoff) {
            self.starts.pop_front();
        }
    }
}

impl<D: EventProcessor> Handle<Event> for PairAll<D> {
    fn handle(&mut self, event: Event) -> Result {
        if let Event::Detection { abstime, channel } = event {
            self.expel_old_starts(abstime);
            if self.stop_channels.contains(&channel) {
                for &start_time in &self.starts {
                    self.downstream.handle(Event::DetectionPair {
                        first: Detection {
                            abstime: start_time,
                            channel: self.start_channel,
                        },
                        second: Detection { abstime, channel },
                    })?;
                }
            }
            if channel == self.start_channel {
                self.starts.push_back(abstime);
            }
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for PairAll<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "pair_all")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Like [`PairAll`], but each buffered start pairs with each stop channel
/// at most once.
pub struct PairOne<D> {
    start_channel: Channel,
    stop_channels: Vec<Channel>,
    window_size: Abstime,
    starts: VecDeque<StartState>,
    downstream: D,
}

impl<D: EventProcessor> PairOne<D> {
    /// Panics if `time_window` is negative or there are more than 64 stop
    /// channels.
    pub fn new(
        start_channel: Channel,
        stop_channels: Vec<Channel>,
        time_window: Abstime,
        downstream: D,
    ) -> Self {
        check_window(time_window);
        assert!(
            stop_channels.len() <= MAX_STOP_CHANNELS,
            "at most {MAX_STOP_CHANNELS} stop channels supported"
        );
        Self {
            start_channel,
            stop_channels,
            window_size: time_window,
            starts: VecDeque::new(),
            downstream,
        }
    }

    fn expel_old_starts(&mut self, earliest_stop: Abstime) {
        let cutoff = pairing_cutoff(earliest_stop, self.window_size);
        let n_stop = self.stop_channels.len();
        while self
            .starts
            .front()
            .is_some_and(|s| s.time < cutoff || all_stopped(s.stopped, n_stop))
        {
            self.starts.pop_front();
        }
    }
}

impl<D: EventProcessor> Handle<Event> for PairOne<D> {
    fn handle(&mut self, event: Event) -> Result {
        if let Event::Detection { abstime, channel } = event {
            self.expel_old_starts(abstime);
            if let Some(chan_index) = self.stop_channels.iter().position(|&c| c == channel) {
                let start_channel = self.start_channel;
                for start in self.starts.iter_mut() {
                    if start.stopped & (1 << chan_index) == 0 {
                        start.stopped |= 1 << chan_index;
                        let pair = Event::DetectionPair {
                            first: Detection {
                                abstime: start.time,
                                channel: start_channel,
                            },
                            second: Detection { abstime, channel },
                        };
                        self.downstream.handle(pair)?;
                    }
                }
            }
            if channel == self.start_channel {
                self.starts.push_back(StartState {
                    time: abstime,
                    stopped: 0,
                });
            }
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for PairOne<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "pair_one")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Buffers only the most recent start; every stop within the window pairs
/// with it.
pub struct PairAllBetween<D> {
    start_channel: Channel,
    stop_channels: Vec<Channel>,
    window_size: Abstime,
    start: Option<Abstime>,
    downstream: D,
}

impl<D: EventProcessor> PairAllBetween<D> {
    /// Panics if `time_window` is negative.
    pub fn new(
        start_channel: Channel,
        stop_channels: Vec<Channel>,
        time_window: Abstime,
        downstream: D,
    ) -> Self {
        check_window(time_window);
        Self {
            start_channel,
            stop_channels,
            window_size: time_window,
            start: None,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for PairAllBetween<D> {
    fn handle(&mut self, event: Event) -> Result {
        if let Event::Detection { abstime, channel } = event {
            let cutoff = pairing_cutoff(abstime, self.window_size);
            if self.start.is_some_and(|t| t < cutoff) {
                self.start = None;
            }
            if let Some(start_time) = self.start {
                if self.stop_channels.contains(&channel) {
                    self.downstream.handle(Event::DetectionPair {
                        first: Detection {
                            abstime: start_time,
                            channel: self.start_channel,
                        },
                        second: Detection { abstime, channel },
                    })?;
                }
            }
            if channel == self.start_channel {
                self.start = Some(abstime);
            }
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for PairAllBetween<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "pair_all_between")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Buffers only the most recent start, consumed once paired per stop
/// channel.
pub struct PairOneBetween<D> {
    start_channel: Channel,
    stop_channels: Vec<Channel>,
    window_size: Abstime,
    start: Option<StartState>,
    downstream: D,
}

impl<D: EventProcessor> PairOneBetween<D> {
    /// Panics if `time_window` is negative or there are more than 64 stop
    /// channels.
    pub fn new(
        start_channel: Channel,
        stop_channels: Vec<Channel>,
        time_window: Abstime,
        downstream: D,
    ) -> Self {
        check_window(time_window);
        assert!(
            stop_channels.len() <= MAX_STOP_CHANNELS,
            "at most {MAX_STOP_CHANNELS} stop channels supported"
        );
        Self {
            start_channel,
            stop_channels,
            window_size: time_window,
            start: None,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for PairOneBetween<D> {
    fn handle(&mut self, event: Event) -> Result {
        if let Event::Detection { abstime, channel } = event {
            let cutoff = pairing_cutoff(abstime, self.window_size);
            let n_stop = self.stop_channels.len();
            if self
                .start
                .is_some_and(|s| s.time < cutoff || all_stopped(s.stopped, n_stop))
            {
                self.start = None;
            }
            if let Some(start) = self.start.as_mut() {
                if let Some(chan_index) = self.stop_channels.iter().position(|&c| c == channel) {
                    if start.stopped & (1 << chan_index) == 0 {
                        start.stopped |= 1 << chan_index;
                        let pair = Event::DetectionPair {
                            first: Detection {
                                abstime: start.time,
                                channel: self.start_channel,
                            },
                            second: Detection { abstime, channel },
                        };
                        self.downstream.handle(pair)?;
                    }
                }
            }
            if channel == self.start_channel {
                self.start = Some(StartState {
                    time: abstime,
                    stopped: 0,
                });
            }
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for PairOneBetween<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "pair_one_between")
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

    fn det(abstime: i64, channel: i32) -> Event {
        Event::Detection { abstime, channel }
    }

    fn pairs(events: &[Event]) -> Vec<(i64, i64)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::DetectionPair { first, second } => Some((first.abstime, second.abstime)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pair_all_pairs_every_buffered_start() {
        let (sink, out) = CollectSink::new();
        let mut p = PairAll::new(0, vec![1], 100, sink);
        p.handle(det(10, 0)).unwrap();
        p.handle(det(20, 0)).unwrap();
        p.handle(det(30, 1)).unwrap();
        let out = out.lock().unwrap();
        assert_eq!(pairs(&out.events), vec![(10, 30), (20, 30)]);
        // Originals pass through too.
        assert_eq!(
            out.events
                .iter()
                .filter(|e| e.kind() == EventKind::Detection)
                .count(),
            3
        );
    }

    #[test]
    fn pair_all_expires_old_starts() {
        let (sink, out) = CollectSink::new();
        let mut p = PairAll::new(0, vec![1], 10, sink);
        p.handle(det(10, 0)).unwrap();
        p.handle(det(50, 1)).unwrap(); // start expired
        assert!(pairs(&out.lock().unwrap().events).is_empty());
    }

    #[test]
    fn pair_one_pairs_each_start_once_per_stop_channel() {
        let (sink, out) = CollectSink::new();
        let mut p = PairOne::new(0, vec![1], 100, sink);
        p.handle(det(10, 0)).unwrap();
        p.handle(det(20, 1)).unwrap();
        p.handle(det(30, 1)).unwrap(); // start already stopped on channel 1
        assert_eq!(pairs(&out.lock().unwrap().events), vec![(10, 20)]);
    }

    #[test]
    fn pair_one_allows_distinct_stop_channels() {
        let (sink, out) = CollectSink::new();
        let mut p = PairOne::new(0, vec![1, 2], 100, sink);
        p.handle(det(10, 0)).unwrap();
        p.handle(det(20, 1)).unwrap();
        p.handle(det(30, 2)).unwrap();
        assert_eq!(pairs(&out.lock().unwrap().events), vec![(10, 20), (10, 30)]);
    }

    #[test]
    fn pair_all_between_keeps_only_most_recent_start() {
        let (sink, out) = CollectSink::new();
        let mut p = PairAllBetween::new(0, vec![1], 100, sink);
        p.handle(det(10, 0)).unwrap();
        p.handle(det(20, 0)).unwrap();
        p.handle(det(30, 1)).unwrap();
        p.handle(det(40, 1)).unwrap(); // pairs again with same start
        assert_eq!(pairs(&out.lock().unwrap().events), vec![(20, 30), (20, 40)]);
    }

    #[test]
    fn pair_one_between_consumes_start_per_stop_channel() {
        let (sink, out) = CollectSink::new();
        let mut p = PairOneBetween::new(0, vec![1], 100, sink);
        p.handle(det(10, 0)).unwrap();
        p.handle(det(30, 1)).unwrap();
        p.handle(det(40, 1)).unwrap(); // consumed
        assert_eq!(pairs(&out.lock().unwrap().events), vec![(10, 30)]);
    }

    #[test]
    fn window_underflow_saturates() {
        let (sink, out) = CollectSink::new();
        let mut p = PairAll::new(0, vec![1], Abstime::MAX, sink);
        p.handle(det(Abstime::MIN + 1, 0)).unwrap();
        p.handle(det(Abstime::MIN + 2, 1)).unwrap();
        assert_eq!(pairs(&out.lock().unwrap().events).len(), 1);
    }

    #[test]
    #[should_panic(expected = "time window")]
    fn negative_window_panics() {
        let (sink, _out) = CollectSink::new();
        let _ = PairAll::new(0, vec![1], -1, sink);
    }
}
