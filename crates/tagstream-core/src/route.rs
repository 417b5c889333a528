//! Dispatching events to one of several downstream branches.

use std::collections::HashMap;

use crate::error::Result;
use crate::events::{Channel, Event, EventKindSet};
use crate::introspect::{merge_processor_graphs, ProcessorGraph};
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Above this many mappings, [`ChannelRouter`] switches from a linear scan
/// to a hash lookup.
const LINEAR_SCAN_MAX: usize = 16;

/// Chooses a downstream index for an event, or `None` to drop it.
pub trait Router {
    fn route(&self, event: &Event) -> Option<usize>;
}

/// Routes by the event's channel through a channel → index table.
pub struct ChannelRouter {
    table: Vec<(Channel, usize)>,
    hashed: Option<HashMap<Channel, usize>>,
}

impl ChannelRouter {
    pub fn new(mappings: &[(Channel, usize)]) -> Self {
        let table = mappings.to_vec();
        let hashed = if table.len() > LINEAR_SCAN_MAX {
            Some(table.iter().copied().collect())
        } else {
            None
        };
        Self { table, hashed }
    }
}

impl Router for ChannelRouter {
    fn route(&self, event: &Event) -> Option<usize> {
        let channel = event.channel()?;
        match &self.hashed {
            Some(map) => map.get(&channel).copied(),
            None => self
                .table
                .iter()
                .find(|(c, _)| *c == channel)
                .map(|(_, i)| *i),
        }
    }
}

/// Dispatches events in a routed set to one of several downstreams; all
/// other events are broadcast to every downstream. Flush is broadcast.
///
/// All downstreams share one type; heterogeneous graphs box their branches
/// as `Box<dyn EventProcessor>`.
pub struct Route<R, D> {
    routed: EventKindSet,
    router: R,
    downstreams: Vec<D>,
}

impl<R: Router, D: EventProcessor> Route<R, D> {
    pub fn new(routed: EventKindSet, router: R, downstreams: Vec<D>) -> Self {
        assert!(
            !downstreams.is_empty(),
            "route requires at least one downstream"
        );
        Self {
            routed,
            router,
            downstreams,
        }
    }
}

impl<R: Router, D: EventProcessor> Handle<Event> for Route<R, D> {
    fn handle(&mut self, event: Event) -> Result {
        if self.routed.contains(event.kind()) {
            match self.router.route(&event) {
                Some(index) if index < self.downstreams.len() => {
                    self.downstreams[index].handle(event)
                }
                _ => Ok(()),
            }
        } else {
            for downstream in &mut self.downstreams {
                downstream.handle(event.clone())?;
            }
            Ok(())
        }
    }
}

impl<R: Router, D: EventProcessor> Processor for Route<R, D> {
    fn flush(&mut self) -> Result {
        for downstream in &mut self.downstreams {
            downstream.flush()?;
        }
        Ok(())
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "route")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = ProcessorGraph::new();
        for downstream in &self.downstreams {
            g = merge_processor_graphs(&g, &downstream.introspect_graph());
        }
        g.push_entry_point(self);
        g
    }
}
