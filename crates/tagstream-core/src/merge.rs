//! The pairwise merge fabric for multi-input dataflow.
//!
//! A 2-way merge pairs two input processors feeding one downstream and
//! preserves abstime order across the two streams, provided each input is
//! individually non-decreasing. Equal-abstime events from input 0 precede
//! those from input 1.
//!
//! Because events that can be emitted are never buffered, only events from
//! one input (whichever is ahead) are pending at any given time. Without
//! periodic `TimeReached` events on each input a merge may buffer without
//! bound; see [`crate::regulate::RegulateTimeReached`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::debug;

use crate::error::{ProcessingError, Result};
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

struct MergeImpl<D> {
    // Pending on input 0 when false.
    pending_on_1: bool,
    input_flushed: [bool; 2],
    poisoned: bool,
    pending: VecDeque<Event>,
    max_buffered: usize,
    downstream: D,
}

impl<D: EventProcessor> MergeImpl<D> {
    fn is_pending_on_other(&self, channel: usize) -> bool {
        self.pending_on_1 == (channel == 0)
    }

    // Emit pending events while their abstime is below the cutoff
    // (at or below, when inclusive).
    fn emit_pending_up_to(&mut self, cutoff: i64, inclusive: bool) -> Result {
        while let Some(front) = self.pending.front() {
            let abstime = front.abstime().expect("merge buffers only timed events");
            let due = if inclusive {
                abstime <= cutoff
            } else {
                abstime < cutoff
            };
            if !due {
                break;
            }
            let event = self.pending.pop_front().unwrap();
            self.downstream.handle(event)?;
        }
        Ok(())
    }

    fn emit_all_pending(&mut self) -> Result {
        while let Some(event) = self.pending.pop_front() {
            self.downstream.handle(event)?;
        }
        Ok(())
    }

    fn handle(&mut self, channel: usize, event: Event) -> Result {
        if self.poisoned {
            return Err(ProcessingError::EndOfProcessing(
                "merge ended after downstream failure".into(),
            ));
        }
        let result = self.handle_inner(channel, event);
        if result.is_err() {
            debug!("merge poisoned after downstream failure");
            self.poisoned = true;
        }
        result
    }

    fn handle_inner(&mut self, channel: usize, event: Event) -> Result {
        let Some(abstime) = event.abstime() else {
            // Events without abstime (warnings) cannot be ordered; pass
            // them through in arrival order.
            return self.downstream.handle(event);
        };

        if self.is_pending_on_other(channel) {
            // Emit any older events pending on the other input. Events
            // from input 0 precede events from input 1 at equal abstime,
            // so an arrival on input 0 drains only strictly older events.
            self.emit_pending_up_to(abstime, channel != 0)?;

            // Events still pending on the other input are newer (or not
            // older), so the current event can be emitted first.
            if !self.pending.is_empty() {
                return self.downstream.handle(event);
            }
            self.pending_on_1 = channel == 1;
        }
        // No events from the other input are pending. If the other input
        // is also flushed, there is no need to buffer.
        if self.input_flushed[1 - channel] {
            debug_assert!(self.pending.is_empty());
            return self.downstream.handle(event);
        }
        if self.pending.len() == self.max_buffered {
            return Err(ProcessingError::BufferOverflow(
                "merge buffer capacity exceeded".into(),
            ));
        }
        self.pending.push_back(event);
        Ok(())
    }

    fn flush(&mut self, channel: usize) -> Result {
        self.input_flushed[channel] = true;
        if self.poisoned {
            return Ok(());
        }
        let result = self.flush_inner(channel);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn flush_inner(&mut self, channel: usize) -> Result {
        if self.input_flushed[1 - channel] {
            // The other input already flushed, so events on this input were
            // not buffered, but events may still be pending on the other.
            self.emit_all_pending()?;
            self.downstream.flush()
        } else if self.is_pending_on_other(channel) {
            // This input has no more events, so the other need not buffer.
            self.emit_all_pending()
        } else {
            Ok(())
        }
    }
}

/// One input of a 2-way merge; obtained from [`merge`].
pub struct MergeInput<D> {
    shared: Rc<RefCell<MergeImpl<D>>>,
    channel: usize,
}

impl<D: EventProcessor> Handle<Event> for MergeInput<D> {
    fn handle(&mut self, event: Event) -> Result {
        self.shared.borrow_mut().handle(self.channel, event)
    }
}

impl<D: EventProcessor> Processor for MergeInput<D> {
    fn flush(&mut self) -> Result {
        self.shared.borrow_mut().flush(self.channel)
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "merge_input")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let shared = self.shared.borrow();
        let mut g = shared.downstream.introspect_graph();
        g.push_entry_point(&*shared);
        g.push_entry_point(self);
        g
    }
}

impl<D: EventProcessor> Processor for MergeImpl<D> {
    fn flush(&mut self) -> Result {
        unreachable!("merge impl is flushed through its inputs")
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "merge_impl")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Create a pair of input processors that merge two event streams in
/// non-decreasing abstime order.
///
/// `max_buffered` bounds the pending queue; exceeding it is an error.
/// A single downstream flush is forwarded once both inputs have flushed.
pub fn merge<D: EventProcessor>(max_buffered: usize, downstream: D) -> (MergeInput<D>, MergeInput<D>) {
    let shared = Rc::new(RefCell::new(MergeImpl {
        pending_on_1: false,
        input_flushed: [false, false],
        poisoned: false,
        pending: VecDeque::new(),
        max_buffered,
        downstream,
    }));
    (
        MergeInput {
            shared: shared.clone(),
            channel: 0,
        },
        MergeInput { shared, channel: 1 },
    )
}

/// Create `n` input processors that merge `n` streams through a balanced
/// tree of 2-way merges.
///
/// Each pairwise merge gets the same `max_buffered` cap. Identical
/// abstimes may be re-ordered arbitrarily among inputs. Asymmetric streams
/// can instead be combined into a custom tree with [`merge`] directly.
pub fn merge_n(
    n: usize,
    max_buffered: usize,
    downstream: Box<dyn EventProcessor>,
) -> Vec<Box<dyn EventProcessor>> {
    match n {
        0 => Vec::new(),
        1 => vec![downstream],
        _ => {
            let (input0, input1) = merge(max_buffered, downstream);
            let left = n / 2;
            let right = n - left;
            let mut inputs = merge_n(left, max_buffered, Box::new(input0));
            inputs.extend(merge_n(right, max_buffered, Box::new(input1)));
            inputs
        }
    }
}

struct MergeUnsortedImpl<D> {
    input_flushed: Vec<bool>,
    poisoned: bool,
    downstream: D,
}

/// One input of an unsorted merge; obtained from [`merge_n_unsorted`].
pub struct MergeUnsortedInput<D> {
    shared: Rc<RefCell<MergeUnsortedImpl<D>>>,
    channel: usize,
}

impl<D: EventProcessor> Handle<Event> for MergeUnsortedInput<D> {
    fn handle(&mut self, event: Event) -> Result {
        let mut shared = self.shared.borrow_mut();
        if shared.poisoned {
            return Err(ProcessingError::EndOfProcessing(
                "merge ended after downstream failure".into(),
            ));
        }
        let result = shared.downstream.handle(event);
        if result.is_err() {
            shared.poisoned = true;
        }
        result
    }
}

impl<D: EventProcessor> Processor for MergeUnsortedInput<D> {
    fn flush(&mut self) -> Result {
        let mut shared = self.shared.borrow_mut();
        shared.input_flushed[self.channel] = true;
        if shared.poisoned {
            return Ok(());
        }
        if shared.input_flushed.iter().all(|&f| f) {
            let result = shared.downstream.flush();
            if result.is_err() {
                shared.poisoned = true;
            }
            return result;
        }
        Ok(())
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "merge_unsorted_input")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let shared = self.shared.borrow();
        let mut g = shared.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Create `n` input processors that forward events in arrival order,
/// emitting a single downstream flush once every input has flushed.
pub fn merge_n_unsorted<D: EventProcessor>(n: usize, downstream: D) -> Vec<MergeUnsortedInput<D>> {
    let shared = Rc::new(RefCell::new(MergeUnsortedImpl {
        input_flushed: vec![false; n],
        poisoned: false,
        downstream,
    }));
    (0..n)
        .map(|channel| MergeUnsortedInput {
            shared: shared.clone(),
            channel,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CollectSink, FailSink};

    fn det(abstime: i64, channel: i32) -> Event {
        Event::Detection { abstime, channel }
    }

    #[test]
    fn tie_break_input0_before_input1() {
        // Input-0: A@5. Input-1: B@5. Flush both. Output: A@5, B@5, flush.
        let (sink, out) = CollectSink::new();
        let (mut in0, mut in1) = merge(1024, sink);
        in0.handle(det(5, 0)).unwrap();
        in1.handle(det(5, 1)).unwrap();
        in0.flush().unwrap();
        in1.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events, vec![det(5, 0), det(5, 1)]);
        assert_eq!(out.flush_count, 1);
    }

    #[test]
    fn sorts_interleaved_streams() {
        let (sink, out) = CollectSink::new();
        let (mut in0, mut in1) = merge(1024, sink);
        in0.handle(det(1, 0)).unwrap();
        in1.handle(det(2, 1)).unwrap();
        in0.handle(det(3, 0)).unwrap();
        in1.handle(det(4, 1)).unwrap();
        in0.flush().unwrap();
        in1.flush().unwrap();
        let out = out.lock().unwrap();
        let times: Vec<i64> = out.events.iter().filter_map(|e| e.abstime()).collect();
        assert_eq!(times, vec![1, 2, 3, 4]);
        assert_eq!(out.flush_count, 1);
    }

    #[test]
    fn emits_all_events_exactly_once() {
        let (sink, out) = CollectSink::new();
        let (mut in0, mut in1) = merge(1 << 16, sink);
        let mut expected = 0usize;
        for t in 0..100i64 {
            in0.handle(det(3 * t, 0)).unwrap();
            in1.handle(det(2 * t, 1)).unwrap();
            expected += 2;
        }
        in0.flush().unwrap();
        in1.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), expected);
        let times: Vec<i64> = out.events.iter().filter_map(|e| e.abstime()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn capacity_exceeded_is_an_error() {
        let (sink, _out) = CollectSink::new();
        let (mut in0, _in1) = merge(2, sink);
        in0.handle(det(1, 0)).unwrap();
        in0.handle(det(2, 0)).unwrap();
        let err = in0.handle(det(3, 0)).unwrap_err();
        assert!(matches!(err, ProcessingError::BufferOverflow(_)));
        // Subsequent calls fast-fail with end-of-processing.
        let err = in0.handle(det(4, 0)).unwrap_err();
        assert!(err.is_end_of_processing());
    }

    #[test]
    fn one_flushed_input_stops_buffering() {
        let (sink, out) = CollectSink::new();
        let (mut in0, mut in1) = merge(1, sink);
        in0.flush().unwrap();
        // Input 1 can now stream any number of events through a cap of 1.
        for t in 0..10 {
            in1.handle(det(t, 1)).unwrap();
        }
        in1.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 10);
        assert_eq!(out.flush_count, 1);
    }

    #[test]
    fn flush_drains_other_inputs_pending() {
        let (sink, out) = CollectSink::new();
        let (mut in0, mut in1) = merge(1024, sink);
        in0.handle(det(1, 0)).unwrap();
        in0.handle(det(2, 0)).unwrap();
        in1.flush().unwrap(); // drains input 0's pending, no downstream flush yet
        {
            let out = out.lock().unwrap();
            assert_eq!(out.events.len(), 2);
            assert_eq!(out.flush_count, 0);
        }
        in0.flush().unwrap();
        assert_eq!(out.lock().unwrap().flush_count, 1);
    }

    #[test]
    fn downstream_failure_poisons_merge() {
        let (mut in0, mut in1) = merge(1024, FailSink { message: "down" });
        in0.handle(det(1, 0)).unwrap(); // buffered, no downstream call
        let err = in1.handle(det(5, 1)).unwrap_err(); // drains pending -> fails
        assert!(matches!(err, ProcessingError::Stopped(_)));
        let err = in0.handle(det(2, 0)).unwrap_err();
        assert!(err.is_end_of_processing());
    }

    #[test]
    fn merge_n_sorts_many_inputs() {
        let (sink, out) = CollectSink::new();
        let mut inputs = merge_n(4, 1024, Box::new(sink));
        assert_eq!(inputs.len(), 4);
        for (i, input) in inputs.iter_mut().enumerate() {
            for t in 0..5i64 {
                input.handle(det(10 * t + i as i64, i as i32)).unwrap();
            }
        }
        for input in inputs.iter_mut() {
            input.flush().unwrap();
        }
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 20);
        let times: Vec<i64> = out.events.iter().filter_map(|e| e.abstime()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(out.flush_count, 1);
    }

    #[test]
    fn merge_n_unsorted_flushes_once_after_all_inputs() {
        let (sink, out) = CollectSink::new();
        let mut inputs = merge_n_unsorted(3, sink);
        inputs[2].handle(det(9, 2)).unwrap();
        inputs[0].handle(det(1, 0)).unwrap();
        inputs[0].flush().unwrap();
        inputs[1].flush().unwrap();
        assert_eq!(out.lock().unwrap().flush_count, 0);
        inputs[2].flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events, vec![det(9, 2), det(1, 0)]);
        assert_eq!(out.flush_count, 1);
    }
}
