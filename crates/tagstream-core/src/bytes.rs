//! Adapters between byte streams and record streams.

use std::sync::Arc;

use crate::bucket::{Bucket, BucketSource, RecyclingBucketSource};
use crate::decode::RawRecord;
use crate::error::{ProcessingError, Result};
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{Handle, NodeInfo, Processor};

/// Explodes record buckets into individual records.
pub struct Unbatch<R, D> {
    downstream: D,
    _record: std::marker::PhantomData<R>,
}

impl<R, D> Unbatch<R, D>
where
    R: Copy,
    D: Handle<R> + Handle<Event> + Processor,
{
    pub fn new(downstream: D) -> Self {
        Self {
            downstream,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R, D> Handle<Bucket<R>> for Unbatch<R, D>
where
    R: Copy,
    D: Handle<R> + Handle<Event> + Processor,
{
    fn handle(&mut self, bucket: Bucket<R>) -> Result {
        for &record in bucket.iter() {
            self.downstream.handle(record)?;
        }
        Ok(())
    }
}

impl<R, D> Handle<Event> for Unbatch<R, D>
where
    R: Copy,
    D: Handle<R> + Handle<Event> + Processor,
{
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<R, D> Processor for Unbatch<R, D>
where
    R: Copy,
    D: Handle<R> + Handle<Event> + Processor,
{
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "unbatch")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Packs byte spans into variable-size record buckets.
///
/// Input bytes that do not make up a whole record are buffered and
/// combined with subsequent input; a partial record left at flush is an
/// error. Each output bucket holds as many records as the buffered and
/// incoming bytes allow.
pub struct BatchFromBytes<R: RawRecord, D> {
    bucket_source: Arc<RecyclingBucketSource<R>>,
    // Partial record bytes; always < R::SIZE.
    remainder: Vec<u8>,
    downstream: D,
}

impl<R, D> BatchFromBytes<R, D>
where
    R: RawRecord + Default + Clone + Send + Sync,
    D: Handle<Bucket<R>> + Handle<Event> + Processor,
{
    pub fn new(bucket_source: Arc<RecyclingBucketSource<R>>, downstream: D) -> Self {
        Self {
            bucket_source,
            remainder: Vec::with_capacity(R::SIZE),
            downstream,
        }
    }
}

impl<R, D> Handle<Bucket<u8>> for BatchFromBytes<R, D>
where
    R: RawRecord + Default + Clone + Send + Sync,
    D: Handle<Bucket<R>> + Handle<Event> + Processor,
{
    fn handle(&mut self, bytes: Bucket<u8>) -> Result {
        let input: &[u8] = &bytes;
        let available = self.remainder.len() + input.len();
        if available < R::SIZE {
            self.remainder.extend_from_slice(input);
            return Ok(());
        }

        let batch_size = available / R::SIZE;
        let mut bucket = self.bucket_source.bucket_of_size(batch_size);
        let mut slots = bucket.iter_mut();
        let mut offset = 0usize;
        if !self.remainder.is_empty() {
            let need = R::SIZE - self.remainder.len();
            self.remainder.extend_from_slice(&input[..need]);
            *slots.next().unwrap() = R::from_bytes(&self.remainder);
            self.remainder.clear();
            offset = need;
        }
        for chunk in input[offset..].chunks_exact(R::SIZE) {
            *slots.next().unwrap() = R::from_bytes(chunk);
            offset += R::SIZE;
        }
        self.remainder.extend_from_slice(&input[offset..]);

        self.downstream.handle(bucket)
    }
}

impl<R, D> Handle<Event> for BatchFromBytes<R, D>
where
    R: RawRecord + Default + Clone + Send + Sync,
    D: Handle<Bucket<R>> + Handle<Event> + Processor,
{
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<R, D> Processor for BatchFromBytes<R, D>
where
    R: RawRecord + Default + Clone + Send + Sync,
    D: Handle<Bucket<R>> + Handle<Event> + Processor,
{
    fn flush(&mut self) -> Result {
        if !self.remainder.is_empty() {
            return Err(ProcessingError::Format(
                "excess bytes at end of stream".into(),
            ));
        }
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "batch_from_bytes")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}

/// Emits single records from byte spans.
///
/// Each record is reconstructed through a stack copy, so input alignment
/// never matters. A partial record left at flush is an error.
pub struct UnbatchFromBytes<R, D> {
    remainder: Vec<u8>,
    downstream: D,
    _record: std::marker::PhantomData<R>,
}

impl<R, D> UnbatchFromBytes<R, D>
where
    R: RawRecord,
    D: Handle<R> + Handle<Event> + Processor,
{
    pub fn new(downstream: D) -> Self {
        Self {
            remainder: Vec::with_capacity(R::SIZE),
            downstream,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R, D> Handle<Bucket<u8>> for UnbatchFromBytes<R, D>
where
    R: RawRecord,
    D: Handle<R> + Handle<Event> + Processor,
{
    fn handle(&mut self, bytes: Bucket<u8>) -> Result {
        let mut input: &[u8] = &bytes;
        if !self.remainder.is_empty() {
            let available = self.remainder.len() + input.len();
            if available < R::SIZE {
                self.remainder.extend_from_slice(input);
                return Ok(());
            }
            let need = R::SIZE - self.remainder.len();
            self.remainder.extend_from_slice(&input[..need]);
            let record = R::from_bytes(&self.remainder);
            self.remainder.clear();
            self.downstream.handle(record)?;
            input = &input[need..];
        }

        let mut chunks = input.chunks_exact(R::SIZE);
        for chunk in &mut chunks {
            self.downstream.handle(R::from_bytes(chunk))?;
        }
        self.remainder.extend_from_slice(chunks.remainder());
        Ok(())
    }
}

impl<R, D> Handle<Event> for UnbatchFromBytes<R, D>
where
    R: RawRecord,
    D: Handle<R> + Handle<Event> + Processor,
{
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<R, D> Processor for UnbatchFromBytes<R, D>
where
    R: RawRecord,
    D: Handle<R> + Handle<Event> + Processor,
{
    fn flush(&mut self) -> Result {
        if !self.remainder.is_empty() {
            return Err(ProcessingError::Format(
                "excess bytes at end of stream".into(),
            ));
        }
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "unbatch_from_bytes")
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
    use crate::decode::SwabianTagRecord;
    use std::sync::{Arc, Mutex};

    struct RecordCollect {
        records: Arc<Mutex<Vec<SwabianTagRecord>>>,
    }

    impl Handle<SwabianTagRecord> for RecordCollect {
        fn handle(&mut self, record: SwabianTagRecord) -> Result {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    impl Handle<Bucket<SwabianTagRecord>> for RecordCollect {
        fn handle(&mut self, bucket: Bucket<SwabianTagRecord>) -> Result {
            self.records.lock().unwrap().extend_from_slice(&bucket);
            Ok(())
        }
    }

    impl Handle<Event> for RecordCollect {
        fn handle(&mut self, _event: Event) -> Result {
            Ok(())
        }
    }

    impl Processor for RecordCollect {
        fn flush(&mut self) -> Result {
            Ok(())
        }

        fn introspect_node(&self) -> NodeInfo {
            NodeInfo::new(self, "record_collect")
        }

        fn introspect_graph(&self) -> ProcessorGraph {
            let mut g = ProcessorGraph::new();
            g.push_entry_point(self);
            g
        }
    }

    fn tags(n: usize) -> (Vec<SwabianTagRecord>, Vec<u8>) {
        let records: Vec<SwabianTagRecord> = (0..n)
            .map(|i| SwabianTagRecord::make_time_tag(i as i64 * 1000, i as i32))
            .collect();
        let bytes = records.iter().flat_map(|r| r.bytes).collect();
        (records, bytes)
    }

    #[test]
    fn unbatch_from_bytes_reassembles_split_records() {
        let (expected, bytes) = tags(4);
        let records = Arc::new(Mutex::new(Vec::new()));
        let mut proc = UnbatchFromBytes::<SwabianTagRecord, _>::new(RecordCollect {
            records: records.clone(),
        });
        // Split at awkward boundaries.
        proc.handle(Bucket::detached(bytes[..7].to_vec())).unwrap();
        proc.handle(Bucket::detached(bytes[7..33].to_vec())).unwrap();
        proc.handle(Bucket::detached(bytes[33..].to_vec())).unwrap();
        proc.flush().unwrap();
        assert_eq!(*records.lock().unwrap(), expected);
    }

    #[test]
    fn unbatch_from_bytes_trailing_bytes_error_at_flush() {
        let (_expected, bytes) = tags(1);
        let records = Arc::new(Mutex::new(Vec::new()));
        let mut proc = UnbatchFromBytes::<SwabianTagRecord, _>::new(RecordCollect {
            records: records.clone(),
        });
        proc.handle(Bucket::detached(bytes[..10].to_vec())).unwrap();
        let err = proc.flush().unwrap_err();
        assert!(matches!(err, ProcessingError::Format(_)));
    }

    #[test]
    fn batch_from_bytes_emits_buckets_of_complete_records() {
        let (expected, bytes) = tags(3);
        let records = Arc::new(Mutex::new(Vec::new()));
        let mut proc = BatchFromBytes::<SwabianTagRecord, _>::new(
            RecyclingBucketSource::new(),
            RecordCollect {
                records: records.clone(),
            },
        );
        proc.handle(Bucket::detached(bytes[..20].to_vec())).unwrap();
        proc.handle(Bucket::detached(bytes[20..].to_vec())).unwrap();
        proc.flush().unwrap();
        assert_eq!(*records.lock().unwrap(), expected);
    }

    #[test]
    fn batch_from_bytes_buffers_tiny_fragments() {
        let (expected, bytes) = tags(1);
        let records = Arc::new(Mutex::new(Vec::new()));
        let mut proc = BatchFromBytes::<SwabianTagRecord, _>::new(
            RecyclingBucketSource::new(),
            RecordCollect {
                records: records.clone(),
            },
        );
        for chunk in bytes.chunks(3) {
            proc.handle(Bucket::detached(chunk.to_vec())).unwrap();
        }
        proc.flush().unwrap();
        assert_eq!(*records.lock().unwrap(), expected);
    }

    #[test]
    fn round_trip_batch_then_unbatch() {
        // batch_from_bytes ∘ unbatch_from_bytes preserves content for any
        // byte sequence whose length is a multiple of the record size.
        let (expected, bytes) = tags(5);
        let records = Arc::new(Mutex::new(Vec::new()));
        let unbatch = UnbatchFromBytes::<SwabianTagRecord, _>::new(RecordCollect {
            records: records.clone(),
        });
        // Feed the original bytes through batch_from_bytes, then re-serialize
        // each bucket and hand it to unbatch_from_bytes.
        struct Reserialize<D> {
            downstream: D,
        }
        impl<D: Handle<Bucket<u8>> + Processor> Handle<Bucket<SwabianTagRecord>> for Reserialize<D> {
            fn handle(&mut self, bucket: Bucket<SwabianTagRecord>) -> Result {
                let bytes: Vec<u8> = bucket.iter().flat_map(|r| r.bytes).collect();
                self.downstream.handle(Bucket::detached(bytes))
            }
        }
        impl<D: Handle<Bucket<u8>> + Processor> Handle<Event> for Reserialize<D> {
            fn handle(&mut self, _event: Event) -> Result {
                Ok(())
            }
        }
        impl<D: Handle<Bucket<u8>> + Processor> Processor for Reserialize<D> {
            fn flush(&mut self) -> Result {
                self.downstream.flush()
            }

            fn introspect_node(&self) -> NodeInfo {
                NodeInfo::new(self, "reserialize")
            }

            fn introspect_graph(&self) -> ProcessorGraph {
                let mut g = ProcessorGraph::new();
                g.push_entry_point(self);
                g
            }
        }

        let mut proc = BatchFromBytes::<SwabianTagRecord, _>::new(
            RecyclingBucketSource::new(),
            Reserialize { downstream: unbatch },
        );
        for chunk in bytes.chunks(11) {
            proc.handle(Bucket::detached(chunk.to_vec())).unwrap();
        }
        proc.flush().unwrap();
        assert_eq!(*records.lock().unwrap(), expected);
    }

    #[test]
    fn unbatch_explodes_record_buckets() {
        let (expected, _bytes) = tags(3);
        let records = Arc::new(Mutex::new(Vec::new()));
        let mut proc = Unbatch::new(RecordCollect {
            records: records.clone(),
        });
        proc.handle(Bucket::detached(expected.clone())).unwrap();
        proc.flush().unwrap();
        assert_eq!(*records.lock().unwrap(), expected);
    }
}
