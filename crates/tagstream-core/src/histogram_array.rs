//! Per-element histogram arrays: scanning and accumulation over cycles.
//!
//! A histogram array holds `num_elements` histograms of `num_bins` each.
//! Incoming bin-increment batches fill successive elements; one full pass
//! through the elements is a cycle (a frame or scan repeat). The
//! accumulating variant sums many cycles into the same array, journaling
//! the current cycle's batches so an overflow can roll the cycle back.

use crate::autocopy::AutocopySpan;
use crate::error::{ProcessingError, Result};
use crate::events::{BinIndex, BinValue, Event, EventKind};
use crate::histogram::{apply_increments, undo_increments, OverflowStrategy};
use crate::introspect::ProcessorGraph;
use crate::journal::BinIncrementJournal;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

// One cycle of an array of histograms.
struct MultiHistogram {
    bins: Vec<BinValue>, // num_elements * num_bins
    element_index: usize,
    max_per_bin: BinValue,
    num_bins: usize,
    num_elements: usize,
    need_clear: bool,
}

impl MultiHistogram {
    fn new(max_per_bin: BinValue, num_bins: usize, num_elements: usize) -> Self {
        Self {
            bins: vec![0; num_bins * num_elements],
            element_index: 0,
            max_per_bin,
            num_bins,
            num_elements,
            need_clear: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.element_index >= self.num_elements
    }

    fn next_element_index(&self) -> usize {
        self.element_index
    }

    fn element_span(&self, index: usize) -> &[BinValue] {
        &self.bins[self.num_bins * index..self.num_bins * (index + 1)]
    }

    // Apply a batch to the next element. Returns true if the whole batch
    // applied; on false in non-saturating mode the increments were undone
    // and the rest of the cycle skipped.
    fn apply_increment_batch(
        &mut self,
        batch: &[BinIndex],
        journal: Option<&mut BinIncrementJournal>,
        saturate: bool,
    ) -> bool {
        debug_assert!(!self.is_complete());
        let span =
            &mut self.bins[self.num_bins * self.element_index..][..self.num_bins];
        if self.need_clear {
            span.fill(0);
        }
        let n_applied = apply_increments(span, self.max_per_bin, batch, saturate);

        if saturate {
            if let Some(journal) = journal {
                journal.append_batch(batch);
            }
            self.element_index += 1;
            n_applied == batch.len()
        } else if n_applied == batch.len() {
            if let Some(journal) = journal {
                journal.append_batch(batch);
            }
            self.element_index += 1;
            true
        } else {
            // Batches apply atomically; undo the partial application.
            undo_increments(span, &batch[..n_applied]);
            self.skip_remaining();
            false
        }
    }

    // Cancel the cycle, clearing untouched elements if requested earlier.
    fn skip_remaining(&mut self) {
        if self.need_clear {
            self.bins[self.num_bins * self.element_index..].fill(0);
            self.need_clear = false;
        }
        self.element_index = self.num_elements;
    }

    // Undo journaled increments, restoring the array to its state at the
    // start of the current cycle. Not valid in saturate mode.
    fn roll_back(&mut self, journal: &BinIncrementJournal) {
        for (index, batch) in journal.iter() {
            let span = &mut self.bins[self.num_bins * index..][..self.num_bins];
            undo_increments(span, batch);
        }
        self.skip_remaining();
        self.element_index = 0;
    }

    // Re-apply a journal onto a cleared array.
    fn replay(&mut self, journal: &BinIncrementJournal) {
        debug_assert_eq!(self.element_index, 0);
        for (index, batch) in journal.iter() {
            let span = &mut self.bins[self.num_bins * index..][..self.num_bins];
            if self.need_clear {
                span.fill(0);
            }
            let n_applied = apply_increments(span, self.max_per_bin, batch, false);
            debug_assert_eq!(n_applied, batch.len());
        }
        self.element_index = journal.num_batches();
    }

    fn reset(&mut self, clear: bool) {
        self.element_index = 0;
        if clear {
            self.bins.fill(0);
        }
        self.need_clear = false;
    }
}

/// Collects an array of histograms, one batch per element, restarting
/// after every cycle.
///
/// Each incoming batch fills the next element and an `ElementHistogram`
/// referencing that element's data is emitted; after `num_elements`
/// batches a `HistogramArray` with the whole array is emitted and the
/// scan restarts. Only the saturate and error overflow strategies apply:
/// nothing is accumulated across cycles, so there is nothing to reset or
/// stop atomically.
pub struct HistogramElementwise<D> {
    mhist: MultiHistogram,
    saturate: bool,
    saturated: bool,
    downstream: D,
}

impl<D: EventProcessor> HistogramElementwise<D> {
    /// Panics unless `strategy` is `Saturate` or `Error`.
    pub fn new(
        num_elements: usize,
        num_bins: usize,
        max_per_bin: BinValue,
        strategy: OverflowStrategy,
        downstream: D,
    ) -> Self {
        let saturate = match strategy {
            OverflowStrategy::Saturate => true,
            OverflowStrategy::Error => false,
            _ => panic!("histogram_elementwise supports only saturate and error strategies"),
        };
        let mut mhist = MultiHistogram::new(max_per_bin, num_bins, num_elements);
        mhist.need_clear = true;
        Self {
            mhist,
            saturate,
            saturated: false,
            downstream,
        }
    }

    fn handle_batch(&mut self, batch: &[BinIndex]) -> Result {
        let element_index = self.mhist.next_element_index();
        if !self.mhist.apply_increment_batch(batch, None, self.saturate) {
            if self.saturate {
                if !self.saturated {
                    self.saturated = true;
                    self.downstream.handle(Event::Warning {
                        message: "histogram array saturated".into(),
                    })?;
                }
            } else {
                return Err(ProcessingError::HistogramOverflow(
                    "histogram array bin overflowed".into(),
                ));
            }
        }

        self.downstream.handle(Event::ElementHistogram {
            bins: AutocopySpan::copy_of(self.mhist.element_span(element_index)),
        })?;

        if self.mhist.is_complete() {
            self.downstream.handle(Event::HistogramArray {
                bins: AutocopySpan::copy_of(&self.mhist.bins),
            })?;
            self.mhist.reset(false);
            self.mhist.need_clear = true;
            self.saturated = false;
        }
        Ok(())
    }
}

impl<D: EventProcessor> Handle<Event> for HistogramElementwise<D> {
    fn handle(&mut self, event: Event) -> Result {
        match event {
            Event::BinIncrementBatch { bin_indices }
            | Event::BinIncrementCluster { bin_indices } => self.handle_batch(&bin_indices),
            event => self.downstream.handle(event),
        }
    }
}

impl<D: EventProcessor> Processor for HistogramElementwise<D> {
    fn flush(&mut self) -> Result {
        // An incomplete final cycle emits no array event; progressive
        // consumers rely on the per-element events.
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "histogram_elementwise")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Accumulates an array of histograms over many cycles.
///
/// Tracks complete cycles through the elements; the current cycle's
/// batches are journaled so that on overflow the cycle can be rolled back
/// (reset strategy, which then replays the cycle onto a cleared array) or
/// cut off atomically (stop strategy). With `emit_concluding`, a
/// `ConcludingHistogramArray` carrying only complete cycles is emitted on
/// reset, stop, and flush.
///
/// Strategy constraints: `emit_concluding` is incompatible with saturate
/// (lost counts cannot be rolled back) and required for reset and stop
/// (cycle-atomic concluding output is their purpose).
pub struct HistogramElementwiseAccumulate<D> {
    mhist: MultiHistogram,
    cycle_index: usize,
    strategy: OverflowStrategy,
    emit_concluding: bool,
    reset_on: EventKind,
    saturated: bool,
    journal: Option<BinIncrementJournal>,
    downstream: D,
}

impl<D: EventProcessor> HistogramElementwiseAccumulate<D> {
    pub fn new(
        num_elements: usize,
        num_bins: usize,
        max_per_bin: BinValue,
        strategy: OverflowStrategy,
        emit_concluding: bool,
        reset_on: EventKind,
        downstream: D,
    ) -> Self {
        assert!(
            !(emit_concluding && strategy == OverflowStrategy::Saturate),
            "emit_concluding is incompatible with the saturate strategy"
        );
        assert!(
            emit_concluding
                || !matches!(strategy, OverflowStrategy::Reset | OverflowStrategy::Stop),
            "the reset and stop strategies require emit_concluding"
        );
        let need_journal = emit_concluding || strategy == OverflowStrategy::Reset;
        let mut mhist = MultiHistogram::new(max_per_bin, num_bins, num_elements);
        mhist.need_clear = false;
        Self {
            mhist,
            cycle_index: 0,
            strategy,
            emit_concluding,
            reset_on,
            saturated: false,
            journal: need_journal.then(BinIncrementJournal::new),
            downstream,
        }
    }

    fn emit_concluding_array(&mut self) -> Result {
        self.downstream.handle(Event::ConcludingHistogramArray {
            bins: AutocopySpan::copy_of(&self.mhist.bins),
        })
    }

    fn roll_back_current_cycle(&mut self) {
        if let Some(journal) = &self.journal {
            self.mhist.roll_back(journal);
        }
    }

    fn handle_overflow(&mut self, batch: &[BinIndex]) -> Result {
        match self.strategy {
            OverflowStrategy::Saturate => {
                if !self.saturated {
                    self.saturated = true;
                    self.downstream.handle(Event::Warning {
                        message: "histogram array saturated".into(),
                    })?;
                }
                Ok(())
            }
            OverflowStrategy::Reset => {
                if self.cycle_index == 0 {
                    return Err(ProcessingError::HistogramOverflow(
                        "histogram array bin overflowed within a single cycle".into(),
                    ));
                }
                self.roll_back_current_cycle();
                if self.emit_concluding {
                    self.emit_concluding_array()?;
                }
                self.cycle_index = 0;
                self.mhist.reset(true);
                if let Some(journal) = &self.journal {
                    self.mhist.replay(journal);
                }
                self.handle_batch(batch) // Recurses at most once.
            }
            OverflowStrategy::Stop => {
                self.roll_back_current_cycle();
                if self.emit_concluding {
                    self.emit_concluding_array()?;
                }
                self.downstream.flush()?;
                Err(ProcessingError::EndOfProcessing(
                    "histogram array bin overflowed".into(),
                ))
            }
            OverflowStrategy::Error => Err(ProcessingError::HistogramOverflow(
                "histogram array bin overflowed".into(),
            )),
        }
    }

    fn handle_batch(&mut self, batch: &[BinIndex]) -> Result {
        let element_index = self.mhist.next_element_index();
        let saturate = self.strategy == OverflowStrategy::Saturate;
        let applied = self
            .mhist
            .apply_increment_batch(batch, self.journal.as_mut(), saturate);
        if !applied {
            if !saturate {
                return self.handle_overflow(batch);
            }
            self.handle_overflow(batch)?;
        }

        self.downstream.handle(Event::ElementHistogram {
            bins: AutocopySpan::copy_of(self.mhist.element_span(element_index)),
        })?;

        if self.mhist.is_complete() {
            self.cycle_index += 1;
            self.mhist.reset(false);
            if let Some(journal) = &mut self.journal {
                journal.clear();
            }
            self.downstream.handle(Event::HistogramArray {
                bins: AutocopySpan::copy_of(&self.mhist.bins),
            })?;
        }
        Ok(())
    }
}

impl<D: EventProcessor> Handle<Event> for HistogramElementwiseAccumulate<D> {
    fn handle(&mut self, event: Event) -> Result {
        if event.kind() == self.reset_on {
            if self.emit_concluding {
                self.roll_back_current_cycle();
                self.emit_concluding_array()?;
            }
            self.cycle_index = 0;
            self.mhist.reset(true);
            self.saturated = false;
            if let Some(journal) = &mut self.journal {
                journal.clear();
            }
            return Ok(());
        }
        match event {
            Event::BinIncrementBatch { bin_indices }
            | Event::BinIncrementCluster { bin_indices } => self.handle_batch(&bin_indices),
            event => self.downstream.handle(event),
        }
    }
}

impl<D: EventProcessor> Processor for HistogramElementwiseAccumulate<D> {
    fn flush(&mut self) -> Result {
        if self.emit_concluding {
            self.roll_back_current_cycle();
            self.emit_concluding_array()?;
        }
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "histogram_elementwise_accumulate")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
