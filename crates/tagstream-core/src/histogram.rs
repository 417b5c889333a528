//! Single-histogram collection with overflow policies.

use crate::autocopy::AutocopySpan;
use crate::error::{ProcessingError, Result};
use crate::events::{BinIndex, BinValue, Event, EventKind};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

/// What to do when a bin increment would exceed the per-bin maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Cap the bin and keep going; lost counts are not recoverable.
    Saturate,
    /// Emit the concluding state, clear, and re-apply.
    Reset,
    /// Emit the concluding state, flush downstream, and end processing.
    Stop,
    /// Fail with a histogram overflow error.
    Error,
}

// Increment behavior shared by the single and elementwise processors.
// Applies increments to `hist` up to `max_per_bin`; in saturate mode,
// over-full bins are skipped; otherwise application stops at the first
// overflowing increment. Returns the number applied.
pub(crate) fn apply_increments(
    hist: &mut [BinValue],
    max_per_bin: BinValue,
    increments: &[BinIndex],
    saturate: bool,
) -> usize {
    let mut n_applied = 0;
    for &index in increments {
        let bin = &mut hist[index as usize];
        if *bin < max_per_bin {
            *bin += 1;
            n_applied += 1;
        } else if !saturate {
            return n_applied;
        }
    }
    n_applied
}

// Undo increments applied in an immediately prior call. Not valid in
// saturate mode.
pub(crate) fn undo_increments(hist: &mut [BinValue], increments: &[BinIndex]) {
    for &index in increments {
        hist[index as usize] -= 1;
    }
}

/// Collects a dense histogram of bin increments.
///
/// On each `BinIncrement` the target bin is incremented and the updated
/// histogram is emitted as a `Histogram` snapshot. On the reset event (or
/// a reset-on-overflow), a `ConcludingHistogram` carrying a deep copy of
/// the state is emitted and the histogram clears. Flush also emits a
/// concluding event. Event abstime is not used, so input order does not
/// matter.
///
/// A bin index at or beyond `num_bins` is a contract violation upstream
/// and panics.
pub struct Histogram<D> {
    bins: Vec<BinValue>,
    max_per_bin: BinValue,
    strategy: OverflowStrategy,
    reset_on: EventKind,
    saturated: bool,
    downstream: D,
}

impl<D: EventProcessor> Histogram<D> {
    pub fn new(
        num_bins: usize,
        max_per_bin: BinValue,
        strategy: OverflowStrategy,
        reset_on: EventKind,
        downstream: D,
    ) -> Self {
        assert!(num_bins > 0, "histogram needs at least one bin");
        Self {
            bins: vec![0; num_bins],
            max_per_bin,
            strategy,
            reset_on,
            saturated: false,
            downstream,
        }
    }

    fn emit_concluding(&mut self) -> Result {
        self.downstream.handle(Event::ConcludingHistogram {
            bins: AutocopySpan::copy_of(&self.bins),
        })
    }

    fn reset(&mut self) {
        self.bins.fill(0);
        self.saturated = false;
    }

    fn handle_increment(&mut self, bin_index: BinIndex) -> Result {
        let saturate = self.strategy == OverflowStrategy::Saturate;
        let applied = apply_increments(&mut self.bins, self.max_per_bin, &[bin_index], saturate);
        if applied == 0 {
            match self.strategy {
                OverflowStrategy::Saturate => {
                    if !self.saturated {
                        self.saturated = true;
                        self.downstream.handle(Event::Warning {
                            message: "histogram saturated".into(),
                        })?;
                    }
                }
                OverflowStrategy::Reset => {
                    if self.max_per_bin == 0 {
                        return Err(ProcessingError::HistogramOverflow(
                            "histogram bin overflowed with max_per_bin of zero".into(),
                        ));
                    }
                    self.emit_concluding()?;
                    self.reset();
                    return self.handle_increment(bin_index); // Recurses at most once.
                }
                OverflowStrategy::Stop => {
                    self.emit_concluding()?;
                    self.downstream.flush()?;
                    return Err(ProcessingError::EndOfProcessing(
                        "histogram bin overflowed".into(),
                    ));
                }
                OverflowStrategy::Error => {
                    return Err(ProcessingError::HistogramOverflow(
                        "histogram bin overflowed".into(),
                    ));
                }
            }
        }
        self.downstream.handle(Event::Histogram {
            bins: AutocopySpan::copy_of(&self.bins),
        })
    }
}

impl<D: EventProcessor> Handle<Event> for Histogram<D> {
    fn handle(&mut self, event: Event) -> Result {
        if event.kind() == self.reset_on {
            self.emit_concluding()?;
            self.reset();
            return Ok(());
        }
        match event {
            Event::BinIncrement { bin_index, .. } => self.handle_increment(bin_index),
            event => self.downstream.handle(event),
        }
    }
}

impl<D: EventProcessor> Processor for Histogram<D> {
    fn flush(&mut self) -> Result {
        self.emit_concluding()?;
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "histogram")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
