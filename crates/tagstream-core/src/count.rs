//! Event counting and threshold-triggered event emission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::events::{Abstime, Event, EventKind};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Counts tick events and emits a fire event when the count reaches a
/// threshold.
///
/// The counter starts at `initial` and increments on each tick passed
/// through. Depending on `fire_after_tick`, the threshold comparison runs
/// just before or just after the tick is forwarded; the fire event carries
/// the tick's abstime. When the count reaches `limit` it resets to
/// `initial`. A reset event resets the counter without firing.
///
/// Typical uses: converting a fast raster clock (pixel clock) to a slower
/// one (line clock), or detecting that a number of detections accumulated.
pub struct CountUpTo<F, D> {
    count: u64,
    initial: u64,
    threshold: u64,
    limit: u64,
    fire_after_tick: bool,
    tick: EventKind,
    reset: EventKind,
    fire: F,
    downstream: D,
}

impl<F, D> CountUpTo<F, D>
where
    F: Fn(Abstime) -> Event,
    D: EventProcessor,
{
    /// Panics if `limit <= initial`.
    pub fn new(
        threshold: u64,
        limit: u64,
        initial: u64,
        fire_after_tick: bool,
        tick: EventKind,
        reset: EventKind,
        fire: F,
        downstream: D,
    ) -> Self {
        assert!(limit > initial, "limit must be greater than initial count");
        Self {
            count: initial,
            initial,
            threshold,
            limit,
            fire_after_tick,
            tick,
            reset,
            fire,
            downstream,
        }
    }

    /// The count-down mirror: decrement semantics expressed through the
    /// up-counter by swapping `initial` and `limit` and mirroring
    /// `threshold` about their midpoint. Panics if `limit >= initial`.
    pub fn down(
        threshold: u64,
        limit: u64,
        initial: u64,
        fire_after_tick: bool,
        tick: EventKind,
        reset: EventKind,
        fire: F,
        downstream: D,
    ) -> Self {
        assert!(limit < initial, "limit must be less than initial count");
        let threshold = if threshold > initial || threshold < limit {
            // Counter can never fire; no mirroring needed.
            threshold
        } else {
            limit + (initial - threshold)
        };
        Self::new(
            threshold,
            initial,
            limit,
            fire_after_tick,
            tick,
            reset,
            fire,
            downstream,
        )
    }

    fn fire_if_at_threshold(&mut self, abstime: Abstime) -> Result {
        if self.count == self.threshold {
            self.downstream.handle((self.fire)(abstime))?;
        }
        Ok(())
    }
}

impl<F, D> Handle<Event> for CountUpTo<F, D>
where
    F: Fn(Abstime) -> Event,
    D: EventProcessor,
{
    fn handle(&mut self, event: Event) -> Result {
        let kind = event.kind();
        if kind == self.tick {
            let abstime = event.abstime().unwrap_or_default();
            if !self.fire_after_tick {
                self.fire_if_at_threshold(abstime)?;
            }
            self.downstream.handle(event)?;
            self.count += 1;
            if self.fire_after_tick {
                self.fire_if_at_threshold(abstime)?;
            }
            if self.count == self.limit {
                self.count = self.initial;
            }
            return Ok(());
        }
        if kind == self.reset {
            self.count = self.initial;
        }
        self.downstream.handle(event)
    }
}

impl<F, D> Processor for CountUpTo<F, D>
where
    F: Fn(Abstime) -> Event,
    D: EventProcessor,
{
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "count_up_to")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Counts events of one kind, exposing the tally through a shared counter.
///
/// The count is incremented before forwarding, so an event is counted even
/// if it subsequently errors downstream.
pub struct Count<D> {
    kind: EventKind,
    counter: Arc<AtomicU64>,
    downstream: D,
}

impl<D: EventProcessor> Count<D> {
    pub fn new(kind: EventKind, counter: Arc<AtomicU64>, downstream: D) -> Self {
        Self {
            kind,
            counter,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for Count<D> {
    fn handle(&mut self, event: Event) -> Result {
        if event.kind() == self.kind {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for Count<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "count")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
