//! Streaming reader emitting buckets of raw records.

use std::sync::Arc;

use log::debug;

use crate::bucket::{Bucket, BucketSource, RecyclingBucketSource};
use crate::decode::RawRecord;
use crate::error::{ProcessingError, Result};
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{Handle, NodeInfo, Processor};
use crate::streams::InputStream;

/// A source that reads batches of records from a binary stream.
///
/// Records are read in granularity-sized chunks, accumulated across reads
/// when a record straddles a chunk boundary, and emitted as variable-size
/// buckets holding only complete records. The second and subsequent reads
/// are aligned to a multiple of the read granularity when the stream
/// position is known (this can help when the granularity matches the page
/// or block size, and never hurts). The granularity is a tuning knob: too
/// small incurs per-read overhead, too large pollutes CPU caches.
pub struct ReadBinaryStream<R: RawRecord, S, D> {
    stream: S,
    max_length: u64,
    bucket_source: Arc<RecyclingBucketSource<R>>,
    read_granularity: usize,
    downstream: D,
}

impl<R, S, D> ReadBinaryStream<R, S, D>
where
    R: RawRecord + Default + Clone + Send + Sync,
    S: InputStream,
    D: Handle<Bucket<R>> + Handle<Event> + Processor,
{
    /// Panics if `read_granularity_bytes` is zero.
    ///
    /// `max_length` limits the total bytes read; pass `u64::MAX` to read
    /// to the end of the stream.
    pub fn new(
        stream: S,
        max_length: u64,
        bucket_source: Arc<RecyclingBucketSource<R>>,
        read_granularity_bytes: usize,
        downstream: D,
    ) -> Self {
        assert!(
            read_granularity_bytes > 0,
            "read granularity must be positive"
        );
        Self {
            stream,
            max_length,
            bucket_source,
            read_granularity: read_granularity_bytes,
            downstream,
        }
    }

    /// Read the whole stream, emitting record buckets downstream, then
    /// flush.
    ///
    /// Fails on a stream error. Leftover bytes smaller than one record at
    /// EOF produce a warning before the flush.
    pub fn pump(&mut self) -> Result {
        let mut first_read_size = self.read_granularity;
        if self.stream.is_good() {
            if let Some(pos) = self.stream.tell() {
                first_read_size -= (pos % self.read_granularity as u64) as usize;
            }
        }

        let mut total_bytes_read: u64 = 0;
        // Partial record carried between iterations; always < R::SIZE.
        let mut remainder: Vec<u8> = Vec::with_capacity(R::SIZE);
        let mut scratch: Vec<u8> = Vec::new();
        let records_are_large = R::SIZE > self.read_granularity;

        while total_bytes_read < self.max_length && self.stream.is_good() {
            let mut read_size = if total_bytes_read == 0 {
                first_read_size
            } else if records_are_large {
                // Smallest multiple of the granularity yielding a
                // non-empty batch.
                ((R::SIZE - remainder.len() - 1) / self.read_granularity + 1)
                    * self.read_granularity
            } else {
                self.read_granularity
            };
            read_size = read_size.min((self.max_length - total_bytes_read) as usize);

            scratch.resize(read_size, 0);
            let bytes_read = self.stream.read(&mut scratch) as usize;
            total_bytes_read += bytes_read as u64;

            let mut data = std::mem::take(&mut remainder);
            data.extend_from_slice(&scratch[..bytes_read]);
            let batch_size = data.len() / R::SIZE;
            let remainder_len = data.len() % R::SIZE;

            if batch_size > 0 {
                let mut bucket = self.bucket_source.bucket_of_size(batch_size);
                for (slot, chunk) in bucket.iter_mut().zip(data.chunks_exact(R::SIZE)) {
                    *slot = R::from_bytes(chunk);
                }
                self.downstream.handle(bucket)?;
            }
            remainder = data[data.len() - remainder_len..].to_vec();
        }
        debug!("read {total_bytes_read} bytes from binary stream");

        if self.stream.is_error() {
            return Err(ProcessingError::Format("failed to read input".into()));
        }
        if !remainder.is_empty() {
            self.downstream.handle(Event::Warning {
                message: "bytes fewer than record size remain at end of input".into(),
            })?;
        }
        self.downstream.flush()
    }
}

impl<R, S, D> Processor for ReadBinaryStream<R, S, D>
where
    R: RawRecord + Default + Clone + Send + Sync,
    S: InputStream,
    D: Handle<Bucket<R>> + Handle<Event> + Processor,
{
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "read_binary_stream")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_source(self);
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::BhSpcRecord;
    use crate::streams::{MemoryInputStream, NullInputStream};
    use crate::testutil::CollectSink;

    struct BucketCollect {
        records: std::sync::Arc<std::sync::Mutex<Vec<BhSpcRecord>>>,
        inner: CollectSink,
    }

    impl Handle<Bucket<BhSpcRecord>> for BucketCollect {
        fn handle(&mut self, bucket: Bucket<BhSpcRecord>) -> Result {
            self.records.lock().unwrap().extend_from_slice(&bucket);
            Ok(())
        }
    }

    impl Handle<Event> for BucketCollect {
        fn handle(&mut self, event: Event) -> Result {
            self.inner.handle(event)
        }
    }

    impl Processor for BucketCollect {
        fn flush(&mut self) -> Result {
            self.inner.flush()
        }

        fn introspect_node(&self) -> NodeInfo {
            NodeInfo::new(self, "bucket_collect")
        }

        fn introspect_graph(&self) -> ProcessorGraph {
            let mut g = ProcessorGraph::new();
            g.push_entry_point(self);
            g
        }
    }

    fn record_bytes(n: usize) -> (Vec<u8>, Vec<BhSpcRecord>) {
        let records: Vec<BhSpcRecord> = (0..n)
            .map(|i| BhSpcRecord::make_photon(i as u16, 1, 0, false))
            .collect();
        let bytes: Vec<u8> = records.iter().flat_map(|r| r.bytes).collect();
        (bytes, records)
    }

    fn run(
        data: Vec<u8>,
        max_length: u64,
        granularity: usize,
    ) -> (Vec<BhSpcRecord>, Vec<Event>, usize) {
        let records = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let (inner, out) = CollectSink::new();
        let sink = BucketCollect {
            records: records.clone(),
            inner,
        };
        let mut reader = ReadBinaryStream::new(
            MemoryInputStream::new(data),
            max_length,
            RecyclingBucketSource::new(),
            granularity,
            sink,
        );
        reader.pump().unwrap();
        let out = out.lock().unwrap();
        let recs = records.lock().unwrap().clone();
        (recs, out.events.clone(), out.flush_count)
    }

    #[test]
    fn reads_all_records_and_flushes() {
        let (bytes, expected) = record_bytes(100);
        let (records, events, flush_count) = run(bytes, u64::MAX, 64);
        assert_eq!(records, expected);
        assert!(events.is_empty());
        assert_eq!(flush_count, 1);
    }

    #[test]
    fn granularity_smaller_than_record_still_batches() {
        let (bytes, expected) = record_bytes(5);
        let (records, _events, _flushes) = run(bytes, u64::MAX, 3);
        assert_eq!(records, expected);
    }

    #[test]
    fn trailing_partial_record_warns() {
        let (mut bytes, expected) = record_bytes(3);
        bytes.extend_from_slice(&[0xAB, 0xCD]); // 2 stray bytes
        let (records, events, flush_count) = run(bytes, u64::MAX, 64);
        assert_eq!(records, expected);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Warning { .. }));
        assert_eq!(flush_count, 1);
    }

    #[test]
    fn max_length_limits_bytes_read() {
        let (bytes, expected) = record_bytes(10);
        let (records, _events, _flushes) = run(bytes, 8, 64);
        assert_eq!(records, expected[..2]);
    }

    #[test]
    fn empty_stream_just_flushes() {
        let records = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let (inner, out) = CollectSink::new();
        let sink = BucketCollect {
            records: records.clone(),
            inner,
        };
        let mut reader =
            ReadBinaryStream::new(NullInputStream, u64::MAX, RecyclingBucketSource::new(), 64, sink);
        reader.pump().unwrap();
        assert!(records.lock().unwrap().is_empty());
        assert_eq!(out.lock().unwrap().flush_count, 1);
    }
}
