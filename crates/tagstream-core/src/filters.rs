//! Stateless event selection and state-gated filtering.

use crate::error::Result;
use crate::events::{Event, EventKind, EventKindSet};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Passes events whose kind is in a configured set; drops the rest.
///
/// Flush always passes through, so even a `select_none` can be used to
/// detect end of stream.
pub struct Select<D> {
    kinds: EventKindSet,
    downstream: D,
}

impl<D: EventProcessor> Select<D> {
    /// Pass only events in `kinds`.
    pub fn new(kinds: EventKindSet, downstream: D) -> Self {
        Self { kinds, downstream }
    }

    /// Pass everything except events in `kinds`.
    pub fn not(kinds: EventKindSet, downstream: D) -> Self {
        Self {
            kinds: kinds.complement(),
            downstream,
        }
    }

    /// Pass no events (flush still passes).
    pub fn none(downstream: D) -> Self {
        Self::new(EventKindSet::EMPTY, downstream)
    }

    /// Pass all events.
    pub fn all(downstream: D) -> Self {
        Self::new(EventKindSet::ALL, downstream)
    }
}

impl<D: EventProcessor> Handle<Event> for Select<D> {
    fn handle(&mut self, event: Event) -> Result {
        if self.kinds.contains(event.kind()) {
            self.downstream.handle(event)
        } else {
            Ok(())
        }
    }
}

impl<D: EventProcessor> Processor for Select<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "select")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Gates a set of event kinds behind an open/close state.
///
/// The gate opens on `open_on` and closes on `close_on`; events in `gated`
/// pass only while open. All other events, including the open and close
/// events themselves, always pass.
pub struct Gate<D> {
    gated: EventKindSet,
    open_on: EventKind,
    close_on: EventKind,
    open: bool,
    downstream: D,
}

impl<D: EventProcessor> Gate<D> {
    pub fn new(
        gated: EventKindSet,
        open_on: EventKind,
        close_on: EventKind,
        initially_open: bool,
        downstream: D,
    ) -> Self {
        Self {
            gated,
            open_on,
            close_on,
            open: initially_open,
            downstream,
        }
    }
}

impl<D: EventProcessor> Handle<Event> for Gate<D> {
    fn handle(&mut self, event: Event) -> Result {
        let kind = event.kind();
        if kind == self.open_on {
            self.open = true;
        } else if kind == self.close_on {
            self.open = false;
        } else if self.gated.contains(kind) && !self.open {
            return Ok(());
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for Gate<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "gate")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
