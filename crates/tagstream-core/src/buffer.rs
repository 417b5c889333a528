//! Buffered pump across a producer/consumer thread boundary.
//!
//! The buffer is the only sanctioned thread boundary in a pipeline:
//! everything upstream runs on the producer thread (calling `handle`,
//! `flush`, or `halt`), everything downstream runs on the consumer thread
//! (calling `pump`). It is the canonical way to separate CPU-bound
//! decoding from CPU-bound histogramming.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{ProcessingError, Result};
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

// Keep the emit queue off the cache lines of the shared state to prevent
// false sharing. 128 bytes on Apple arm64, 64 otherwise; we avoid relying
// on a platform constant with ABI-compatibility baggage.
#[cfg_attr(
    all(target_os = "macos", target_arch = "aarch64"),
    repr(align(128))
)]
#[cfg_attr(
    not(all(target_os = "macos", target_arch = "aarch64")),
    repr(align(64))
)]
struct CacheAligned<T>(T);

struct BufferState {
    queue: VecDeque<Event>,
    oldest_enqueued: Instant,
    upstream_flushed: bool,
    upstream_halted: bool,
    downstream_failed: bool,
}

struct BufferShared {
    state: Mutex<BufferState>,
    has_data: Condvar,
}

/// Producer side of a buffer; owned by the upstream pipeline.
pub struct BufferInput {
    shared: Arc<BufferShared>,
    threshold: usize,
    latency_limited: bool,
}

impl BufferInput {
    /// Mark the upstream as terminated without a flush, so the consumer's
    /// `pump` unblocks and fails with `SourceHalted`.
    ///
    /// This call is required whenever the producer terminates by an
    /// exceptional path, because the exception may have been thrown
    /// upstream of the buffer without its knowledge; without it, `pump`
    /// may block indefinitely.
    pub fn halt(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.upstream_halted = true;
        }
        self.shared.has_data.notify_one();
    }
}

impl Handle<Event> for BufferInput {
    fn handle(&mut self, event: Event) -> Result {
        let mut should_notify;
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.downstream_failed {
                return Err(ProcessingError::EndOfProcessing(
                    "ending upstream of buffer upon end of downstream processing".into(),
                ));
            }
            state.queue.push_back(event);
            should_notify = state.queue.len() == self.threshold;
            if self.latency_limited && state.queue.len() == 1 {
                state.oldest_enqueued = Instant::now();
                should_notify = true; // Wake once to set the deadline.
            }
        }
        if should_notify {
            self.shared.has_data.notify_one();
        }
        Ok(())
    }
}

impl Processor for BufferInput {
    fn flush(&mut self) -> Result {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.downstream_failed {
                return Err(ProcessingError::EndOfProcessing(
                    "ending upstream of buffer upon end of downstream processing".into(),
                ));
            }
            state.upstream_flushed = true;
        }
        self.shared.has_data.notify_one();
        Ok(())
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "buffer")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        // The downstream lives on the consumer side; the producer-facing
        // node stands alone in the producer's graph.
        let mut g = ProcessorGraph::new();
        g.push_entry_point(self);
        g
    }
}

/// Consumer side of a buffer; the only object that invokes the
/// downstream.
pub struct BufferPump<D> {
    shared: Arc<BufferShared>,
    threshold: usize,
    max_latency: Option<Duration>,
    emit_queue: CacheAligned<VecDeque<Event>>,
    downstream: D,
}

impl<D: EventProcessor> BufferPump<D> {
    /// Block until the producer's events arrive and forward them
    /// downstream, looping until the upstream flushes or halts.
    ///
    /// Consumes the pump: it may only be called once. On upstream halt
    /// without flush, fails with `SourceHalted`. A downstream failure is
    /// recorded so subsequent producer-side calls fast-fail, then
    /// propagated.
    pub fn pump(mut self) -> Result {
        debug!("buffer pump started");
        let result = self.run();
        if let Err(ref error) = result {
            if !matches!(error, ProcessingError::SourceHalted) {
                self.shared.state.lock().unwrap().downstream_failed = true;
            }
        }
        debug!("buffer pump finished");
        result
    }

    fn run(&mut self) -> Result {
        loop {
            let mut state = self.shared.state.lock().unwrap();
            if let Some(max_latency) = self.max_latency {
                state = self
                    .shared
                    .has_data
                    .wait_while(state, |s| {
                        s.queue.is_empty() && !s.upstream_flushed && !s.upstream_halted
                    })
                    .unwrap();
                let deadline = state.oldest_enqueued + max_latency;
                loop {
                    let ready = state.queue.len() >= self.threshold
                        || state.upstream_flushed
                        || state.upstream_halted;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if ready || remaining.is_zero() {
                        break;
                    }
                    let (next, _timeout) = self
                        .shared
                        .has_data
                        .wait_timeout(state, remaining)
                        .unwrap();
                    state = next;
                }
            } else {
                state = self
                    .shared
                    .has_data
                    .wait_while(state, |s| {
                        s.queue.len() < self.threshold && !s.upstream_flushed && !s.upstream_halted
                    })
                    .unwrap();
            }

            if state.queue.is_empty() {
                if state.upstream_flushed {
                    drop(state);
                    return self.downstream.flush();
                }
                if state.upstream_halted {
                    // Terminated without flushing.
                    return Err(ProcessingError::SourceHalted);
                }
            }

            std::mem::swap(&mut self.emit_queue.0, &mut state.queue);
            drop(state);

            while let Some(event) = self.emit_queue.0.pop_front() {
                self.downstream.handle(event)?;
            }
        }
    }
}

impl<D: EventProcessor> Processor for BufferPump<D> {
    fn flush(&mut self) -> Result {
        unreachable!("buffer pump is driven by pump(), not flush()")
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "buffer_pump")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_source(self);
        g
    }
}

fn make_buffer<D: EventProcessor>(
    threshold: usize,
    max_latency: Option<Duration>,
    downstream: D,
) -> (BufferInput, BufferPump<D>) {
    let shared = Arc::new(BufferShared {
        state: Mutex::new(BufferState {
            queue: VecDeque::new(),
            oldest_enqueued: Instant::now(),
            upstream_flushed: false,
            upstream_halted: false,
            downstream_failed: false,
        }),
        has_data: Condvar::new(),
    });
    (
        BufferInput {
            shared: shared.clone(),
            threshold,
            latency_limited: max_latency.is_some(),
        },
        BufferPump {
            shared,
            threshold,
            max_latency,
            emit_queue: CacheAligned(VecDeque::new()),
            downstream,
        },
    )
}

/// Create a buffer that releases events downstream once `threshold`
/// events have accumulated (or the upstream flushes).
pub fn buffer<D: EventProcessor>(threshold: usize, downstream: D) -> (BufferInput, BufferPump<D>) {
    make_buffer(threshold, None, downstream)
}

/// Create a buffer that additionally releases events once the oldest
/// enqueued event has waited `max_latency`, for live processing.
pub fn real_time_buffer<D: EventProcessor>(
    threshold: usize,
    max_latency: Duration,
    downstream: D,
) -> (BufferInput, BufferPump<D>) {
    make_buffer(threshold, Some(max_latency), downstream)
}

/// Accumulates events and drains them in bulk at a threshold or on flush.
///
/// No parallelism; useful to shape working-set sizes by separating the
/// processing loop, and easier to slot into a chain than the two-thread
/// buffer. Events are held without regard to timing, so this is usually
/// inappropriate for live processing.
pub struct SingleThreadedBuffer<D> {
    threshold: usize,
    buf: Vec<Event>,
    downstream: D,
}

impl<D: EventProcessor> SingleThreadedBuffer<D> {
    pub fn new(threshold: usize, downstream: D) -> Self {
        Self {
            threshold,
            buf: Vec::new(),
            downstream,
        }
    }

    fn drain(&mut self) -> Result {
        for event in self.buf.drain(..) {
            self.downstream.handle(event)?;
        }
        Ok(())
    }
}

impl<D: EventProcessor> Handle<Event> for SingleThreadedBuffer<D> {
    fn handle(&mut self, event: Event) -> Result {
        self.buf.push(event);
        if self.buf.len() >= self.threshold {
            self.drain()?;
        }
        Ok(())
    }
}

impl<D: EventProcessor> Processor for SingleThreadedBuffer<D> {
    fn flush(&mut self) -> Result {
        self.drain()?;
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "single_threaded_buffer")
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
    use crate::testutil::{CollectSink, FailSink};

    fn det(abstime: i64) -> Event {
        Event::Detection {
            abstime,
            channel: 0,
        }
    }

    #[test]
    fn pump_forwards_all_events_then_flushes() {
        let (sink, out) = CollectSink::new();
        let (mut input, pump) = buffer(4, sink);
        let consumer = std::thread::spawn(move || pump.pump());
        for t in 0..10 {
            input.handle(det(t)).unwrap();
        }
        input.flush().unwrap();
        consumer.join().unwrap().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 10);
        assert_eq!(out.flush_count, 1);
    }

    #[test]
    fn halt_without_flush_fails_pump_with_source_halted() {
        let (sink, _out) = CollectSink::new();
        let (mut input, pump) = buffer(1024, sink);
        let consumer = std::thread::spawn(move || pump.pump());
        input.handle(det(1)).unwrap();
        input.halt();
        let err = consumer.join().unwrap().unwrap_err();
        assert!(matches!(err, ProcessingError::SourceHalted));
    }

    #[test]
    fn downstream_failure_reaches_producer() {
        let (mut input, pump) = buffer(1, FailSink { message: "down" });
        let consumer = std::thread::spawn(move || pump.pump());
        input.handle(det(1)).unwrap();
        let err = consumer.join().unwrap().unwrap_err();
        assert!(matches!(err, ProcessingError::Stopped(_)));
        // The failure was recorded before pump returned, so producer-side
        // calls now fast-fail.
        let err = input.handle(det(2)).unwrap_err();
        assert!(err.is_end_of_processing());
        let err = input.flush().unwrap_err();
        assert!(err.is_end_of_processing());
    }

    #[test]
    fn latency_limited_buffer_releases_before_threshold() {
        let (sink, out) = CollectSink::new();
        let (mut input, pump) = real_time_buffer(1_000_000, Duration::from_millis(10), sink);
        let consumer = std::thread::spawn(move || pump.pump());
        input.handle(det(1)).unwrap();
        // Wait well past the latency limit; the event must come through
        // even though the threshold is far away.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if !out.lock().unwrap().events.is_empty() {
                break;
            }
            assert!(Instant::now() < deadline, "latency release did not happen");
            std::thread::sleep(Duration::from_millis(1));
        }
        input.flush().unwrap();
        consumer.join().unwrap().unwrap();
    }

    #[test]
    fn single_threaded_buffer_drains_at_threshold_and_flush() {
        let (sink, out) = CollectSink::new();
        let mut buf = SingleThreadedBuffer::new(3, sink);
        buf.handle(det(1)).unwrap();
        buf.handle(det(2)).unwrap();
        assert!(out.lock().unwrap().events.is_empty());
        buf.handle(det(3)).unwrap();
        assert_eq!(out.lock().unwrap().events.len(), 3);
        buf.handle(det(4)).unwrap();
        buf.flush().unwrap();
        let out = out.lock().unwrap();
        assert_eq!(out.events.len(), 4);
        assert_eq!(out.flush_count, 1);
    }
}
