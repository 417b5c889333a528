//! The binning path: events → datapoints → bin increments → batches.

use crate::autocopy::AutocopySpan;
use crate::error::Result;
use crate::events::{Abstime, BinIndex, Datapoint, Event, EventKind};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// Extracts a datapoint from events it recognizes; pure.
pub trait DataMapper {
    /// `Some((abstime, value))` to map the event, `None` to pass it
    /// through unchanged.
    fn map(&self, event: &Event) -> Option<(Abstime, Datapoint)>;
}

/// Maps the difference time of time-correlated detections.
pub struct DifftimeDataMapper;

impl DataMapper for DifftimeDataMapper {
    fn map(&self, event: &Event) -> Option<(Abstime, Datapoint)> {
        match *event {
            Event::TimeCorrelatedDetection {
                abstime, difftime, ..
            } => Some((abstime, difftime)),
            _ => None,
        }
    }
}

/// Maps the count of counting events.
pub struct CountDataMapper;

impl DataMapper for CountDataMapper {
    fn map(&self, event: &Event) -> Option<(Abstime, Datapoint)> {
        match *event {
            Event::LostCounts { abstime, count, .. }
            | Event::UntaggedCounts { abstime, count, .. } => {
                Some((abstime, count as Datapoint))
            }
            _ => None,
        }
    }
}

/// Maps the channel of timed, channeled events.
pub struct ChannelDataMapper;

impl DataMapper for ChannelDataMapper {
    fn map(&self, event: &Event) -> Option<(Abstime, Datapoint)> {
        match (event.abstime(), event.channel()) {
            (Some(abstime), Some(channel)) => Some((abstime, channel)),
            _ => None,
        }
    }
}

/// Transforms recognized events into datapoint events; all other events
/// pass through.
pub struct MapToDatapoints<M, D> {
    mapper: M,
    downstream: D,
}

impl<M: DataMapper, D: EventProcessor> MapToDatapoints<M, D> {
    pub fn new(mapper: M, downstream: D) -> Self {
        Self { mapper, downstream }
    }
}

impl<M: DataMapper, D: EventProcessor> Handle<Event> for MapToDatapoints<M, D> {
    fn handle(&mut self, event: Event) -> Result {
        match self.mapper.map(&event) {
            Some((abstime, value)) => self.downstream.handle(Event::Datapoint { abstime, value }),
            None => self.downstream.handle(event),
        }
    }
}

impl<M: DataMapper, D: EventProcessor> Processor for MapToDatapoints<M, D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "map_to_datapoints")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Maps a datapoint to a bin index, or discards it.
pub trait BinMapper {
    fn n_bins(&self) -> usize;

    fn map(&self, datapoint: Datapoint) -> Option<BinIndex>;
}

/// Divisionless binning that keeps the most significant bits of the
/// datapoint.
///
/// With `DATA_BITS = 12` and `HISTO_BITS = 8`, datapoints in [0, 4095] map
/// to bins [0, 255] of width 16. Datapoints outside the mapped range are
/// discarded. `flip` substitutes `max_bin - bin`.
pub struct PowerOf2BinMapper<const DATA_BITS: u32, const HISTO_BITS: u32> {
    flip: bool,
}

impl<const DATA_BITS: u32, const HISTO_BITS: u32> PowerOf2BinMapper<DATA_BITS, HISTO_BITS> {
    pub fn new(flip: bool) -> Self {
        assert!(DATA_BITS >= HISTO_BITS, "data bits must cover histo bits");
        assert!(HISTO_BITS < 16, "bin index type limits histo bits");
        Self { flip }
    }
}

impl<const DATA_BITS: u32, const HISTO_BITS: u32> BinMapper
    for PowerOf2BinMapper<DATA_BITS, HISTO_BITS>
{
    fn n_bins(&self) -> usize {
        1 << HISTO_BITS
    }

    fn map(&self, datapoint: Datapoint) -> Option<BinIndex> {
        if datapoint < 0 {
            return None;
        }
        let max_bin = (1u32 << HISTO_BITS) - 1;
        let bin = (datapoint as u32) >> (DATA_BITS - HISTO_BITS);
        if bin > max_bin {
            return None;
        }
        let bin = if self.flip { max_bin - bin } else { bin };
        Some(bin as BinIndex)
    }
}

/// Linear binning of arbitrary offset and width.
///
/// `bin = (datapoint - offset) / bin_width`. A negative `bin_width` (with
/// a positive offset) reverses the axis. With `clamp`, out-of-range values
/// land in the nearest edge bin instead of being discarded.
pub struct LinearBinMapper {
    offset: Datapoint,
    bin_width: Datapoint,
    max_bin_index: BinIndex,
    clamp: bool,
}

impl LinearBinMapper {
    /// Panics if `bin_width` is zero.
    pub fn new(offset: Datapoint, bin_width: Datapoint, max_bin_index: BinIndex, clamp: bool) -> Self {
        assert!(bin_width != 0, "bin width must not be zero");
        Self {
            offset,
            bin_width,
            max_bin_index,
            clamp,
        }
    }
}

impl BinMapper for LinearBinMapper {
    fn n_bins(&self) -> usize {
        self.max_bin_index as usize + 1
    }

    fn map(&self, datapoint: Datapoint) -> Option<BinIndex> {
        let d = datapoint - self.offset;
        // Check sign before dividing to avoid rounding toward zero.
        if (d < 0 && self.bin_width > 0) || (d > 0 && self.bin_width < 0) {
            return self.clamp.then_some(0);
        }
        let bin = (d / self.bin_width) as i64;
        if bin > i64::from(self.max_bin_index) {
            return self.clamp.then_some(self.max_bin_index);
        }
        Some(bin as BinIndex)
    }
}

/// Applies a bin mapper to datapoint events, emitting bin increments;
/// out-of-range datapoints are dropped. All other events pass through.
pub struct MapToBins<B, D> {
    bin_mapper: B,
    downstream: D,
}

impl<B: BinMapper, D: EventProcessor> MapToBins<B, D> {
    pub fn new(bin_mapper: B, downstream: D) -> Self {
        Self {
            bin_mapper,
            downstream,
        }
    }
}

impl<B: BinMapper, D: EventProcessor> Handle<Event> for MapToBins<B, D> {
    fn handle(&mut self, event: Event) -> Result {
        match event {
            Event::Datapoint { abstime, value } => match self.bin_mapper.map(value) {
                Some(bin_index) => self
                    .downstream
                    .handle(Event::BinIncrement { abstime, bin_index }),
                None => Ok(()),
            },
            event => self.downstream.handle(event),
        }
    }
}

impl<B: BinMapper, D: EventProcessor> Processor for MapToBins<B, D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "map_to_bins")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Collects bin increments between start and stop events into batch (or
/// cluster) events emitted at the stop.
///
/// A start discards any unfinished collection; a stop outside a
/// collection is ignored; increments outside a collection are dropped.
/// Start and stop events themselves are consumed.
pub struct BatchBinIncrements<D> {
    start: EventKind,
    stop: EventKind,
    as_cluster: bool,
    in_batch: bool,
    indices: Vec<BinIndex>,
    downstream: D,
}

impl<D: EventProcessor> BatchBinIncrements<D> {
    /// Emit `BinIncrementBatch` events (may be partially applied under
    /// saturation downstream).
    pub fn new(start: EventKind, stop: EventKind, downstream: D) -> Self {
        Self {
            start,
            stop,
            as_cluster: false,
            in_batch: false,
            indices: Vec::new(),
            downstream,
        }
    }

    /// Emit `BinIncrementCluster` events (applied atomically downstream).
    pub fn clusters(start: EventKind, stop: EventKind, downstream: D) -> Self {
        Self {
            as_cluster: true,
            ..Self::new(start, stop, downstream)
        }
    }
}

impl<D: EventProcessor> Handle<Event> for BatchBinIncrements<D> {
    fn handle(&mut self, event: Event) -> Result {
        let kind = event.kind();
        if kind == self.start {
            self.indices.clear();
            self.in_batch = true;
            return Ok(());
        }
        if kind == self.stop {
            if self.in_batch {
                self.in_batch = false;
                let bin_indices = AutocopySpan::new(std::mem::take(&mut self.indices));
                let batch = if self.as_cluster {
                    Event::BinIncrementCluster { bin_indices }
                } else {
                    Event::BinIncrementBatch { bin_indices }
                };
                return self.downstream.handle(batch);
            }
            return Ok(());
        }
        if let Event::BinIncrement { bin_index, .. } = event {
            if self.in_batch {
                self.indices.push(bin_index);
            }
            return Ok(());
        }
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for BatchBinIncrements<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "batch_bin_increments")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
