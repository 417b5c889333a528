//! Trigger-driven timing event generation.

use crate::error::Result;
use crate::events::{Abstime, Event, EventKind};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// A pattern of timing events started by a trigger.
///
/// `trigger` resets the pattern relative to the trigger event; `peek`
/// reports the abstime of the next pending event, if any; `pop` produces
/// it and advances.
pub trait TimingGenerator {
    fn trigger(&mut self, event: &Event);
    fn peek(&self) -> Option<Abstime>;
    fn pop(&mut self) -> Event;
}

/// Emits generated timing events interleaved into the stream.
///
/// On each trigger event, the generator is reset with the trigger's
/// abstime. While forwarding any other timed event with abstime `t`,
/// pending generated events with abstime `<= t` are emitted first; for a
/// trigger the cutoff is strictly `< t`, so timings from the previous
/// trigger that share the new trigger's abstime are suppressed unless some
/// other event at that abstime was already passed through. The generator
/// is not drained on flush: timings beyond the last data event are
/// discarded, which allows infinite generators.
pub struct Generate<G, D> {
    trigger: EventKind,
    generator: G,
    downstream: D,
}

impl<G: TimingGenerator, D: EventProcessor> Generate<G, D> {
    pub fn new(trigger: EventKind, generator: G, downstream: D) -> Self {
        Self {
            trigger,
            generator,
            downstream,
        }
    }

    fn emit_pending(&mut self, cutoff: Abstime, inclusive: bool) -> Result {
        while let Some(t) = self.generator.peek() {
            let due = if inclusive { t <= cutoff } else { t < cutoff };
            if !due {
                break;
            }
            let event = self.generator.pop();
            self.downstream.handle(event)?;
        }
        Ok(())
    }
}

impl<G: TimingGenerator, D: EventProcessor> Handle<Event> for Generate<G, D> {
    fn handle(&mut self, event: Event) -> Result {
        let Some(abstime) = event.abstime() else {
            return self.downstream.handle(event);
        };
        if event.kind() == self.trigger {
            self.emit_pending(abstime, false)?;
            self.generator.trigger(&event);
        } else {
            self.emit_pending(abstime, true)?;
        }
        self.downstream.handle(event)
    }
}

impl<G: TimingGenerator, D: EventProcessor> Processor for Generate<G, D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "generate")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Generates nothing.
pub struct NullTimingGenerator;

impl TimingGenerator for NullTimingGenerator {
    fn trigger(&mut self, _event: &Event) {}

    fn peek(&self) -> Option<Abstime> {
        None
    }

    fn pop(&mut self) -> Event {
        unreachable!("null timing generator never has a pending event")
    }
}

/// Generates a single event delayed from the trigger.
pub struct OneShotTimingGenerator<F> {
    pending: bool,
    next: Abstime,
    delay: Abstime,
    make: F,
}

impl<F: Fn(Abstime) -> Event> OneShotTimingGenerator<F> {
    /// Panics if `delay` is negative.
    pub fn new(delay: Abstime, make: F) -> Self {
        assert!(delay >= 0, "delay must not be negative");
        Self {
            pending: false,
            next: 0,
            delay,
            make,
        }
    }
}

impl<F: Fn(Abstime) -> Event> TimingGenerator for OneShotTimingGenerator<F> {
    fn trigger(&mut self, event: &Event) {
        self.next = event.abstime().expect("trigger must be timed") + self.delay;
        self.pending = true;
    }

    fn peek(&self) -> Option<Abstime> {
        self.pending.then_some(self.next)
    }

    fn pop(&mut self) -> Event {
        self.pending = false;
        (self.make)(self.next)
    }
}

/// Generates a single delayed event with the delay read from the trigger.
pub struct DynamicOneShotTimingGenerator<C, F> {
    pending: bool,
    next: Abstime,
    config: C,
    make: F,
}

impl<C, F> DynamicOneShotTimingGenerator<C, F>
where
    C: Fn(&Event) -> Abstime,
    F: Fn(Abstime) -> Event,
{
    /// `config` extracts the delay from each trigger event.
    pub fn new(config: C, make: F) -> Self {
        Self {
            pending: false,
            next: 0,
            config,
            make,
        }
    }
}

impl<C, F> TimingGenerator for DynamicOneShotTimingGenerator<C, F>
where
    C: Fn(&Event) -> Abstime,
    F: Fn(Abstime) -> Event,
{
    fn trigger(&mut self, event: &Event) {
        let delay = (self.config)(event);
        self.next = event.abstime().expect("trigger must be timed") + delay;
        self.pending = true;
    }

    fn peek(&self) -> Option<Abstime> {
        self.pending.then_some(self.next)
    }

    fn pop(&mut self) -> Event {
        self.pending = false;
        (self.make)(self.next)
    }
}

/// Generates an equally spaced series of events.
pub struct LinearTimingGenerator<F> {
    next: Abstime,
    remaining: u64,
    delay: Abstime,
    interval: Abstime,
    count: u64,
    make: F,
}

impl<F: Fn(Abstime) -> Event> LinearTimingGenerator<F> {
    /// Panics if `delay` is negative or `interval` is not positive.
    pub fn new(delay: Abstime, interval: Abstime, count: u64, make: F) -> Self {
        assert!(delay >= 0, "delay must not be negative");
        assert!(interval > 0, "interval must be positive");
        Self {
            next: 0,
            remaining: 0,
            delay,
            interval,
            count,
            make,
        }
    }
}

impl<F: Fn(Abstime) -> Event> TimingGenerator for LinearTimingGenerator<F> {
    fn trigger(&mut self, event: &Event) {
        self.next = event.abstime().expect("trigger must be timed") + self.delay;
        self.remaining = self.count;
    }

    fn peek(&self) -> Option<Abstime> {
        (self.remaining > 0).then_some(self.next)
    }

    fn pop(&mut self) -> Event {
        let event = (self.make)(self.next);
        self.next += self.interval;
        self.remaining -= 1;
        event
    }
}

/// Generates an equally spaced series with delay, interval, and count read
/// from the trigger.
pub struct DynamicLinearTimingGenerator<C, F> {
    next: Abstime,
    remaining: u64,
    interval: Abstime,
    config: C,
    make: F,
}

impl<C, F> DynamicLinearTimingGenerator<C, F>
where
    C: Fn(&Event) -> (Abstime, Abstime, u64),
    F: Fn(Abstime) -> Event,
{
    /// `config` extracts `(delay, interval, count)` from each trigger.
    pub fn new(config: C, make: F) -> Self {
        Self {
            next: 0,
            remaining: 0,
            interval: 0,
            config,
            make,
        }
    }
}

impl<C, F> TimingGenerator for DynamicLinearTimingGenerator<C, F>
where
    C: Fn(&Event) -> (Abstime, Abstime, u64),
    F: Fn(Abstime) -> Event,
{
    fn trigger(&mut self, event: &Event) {
        let (delay, interval, count) = (self.config)(event);
        self.next = event.abstime().expect("trigger must be timed") + delay;
        self.interval = interval;
        self.remaining = count;
    }

    fn peek(&self) -> Option<Abstime> {
        (self.remaining > 0).then_some(self.next)
    }

    fn pop(&mut self) -> Event {
        let event = (self.make)(self.next);
        self.next += self.interval;
        self.remaining -= 1;
        event
    }
}
