//! Streaming writer packing records into an output stream.

use crate::bucket::Bucket;
use crate::decode::RawRecord;
use crate::error::{ProcessingError, Result};
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{Handle, NodeInfo, Processor};
use crate::streams::OutputStream;

/// Default write granularity (64 KiB).
pub const DEFAULT_WRITE_GRANULARITY: usize = 65536;

/// A sink that writes records as packed bytes, with no framing and no
/// checksums.
///
/// Bytes accumulate until a full granularity-sized chunk can be written;
/// flush writes out the rest. The inverse of
/// [`crate::read_stream::ReadBinaryStream`].
pub struct WriteBinaryStream<R, S> {
    stream: S,
    granularity: usize,
    buf: Vec<u8>,
    _record: std::marker::PhantomData<R>,
}

impl<R: RawRecord, S: OutputStream> WriteBinaryStream<R, S> {
    /// Panics if `granularity_bytes` is zero.
    pub fn new(stream: S, granularity_bytes: usize) -> Self {
        assert!(granularity_bytes > 0, "write granularity must be positive");
        Self {
            stream,
            granularity: granularity_bytes,
            buf: Vec::with_capacity(granularity_bytes),
            _record: std::marker::PhantomData,
        }
    }

    pub fn with_default_granularity(stream: S) -> Self {
        Self::new(stream, DEFAULT_WRITE_GRANULARITY)
    }

    fn write_full_chunks(&mut self) -> Result {
        while self.buf.len() >= self.granularity {
            let rest = self.buf.split_off(self.granularity);
            let chunk = std::mem::replace(&mut self.buf, rest);
            if !self.stream.write(&chunk) {
                return Err(ProcessingError::Format("failed to write output".into()));
            }
        }
        Ok(())
    }
}

impl<R: RawRecord, S: OutputStream> Handle<R> for WriteBinaryStream<R, S> {
    fn handle(&mut self, record: R) -> Result {
        self.buf.extend_from_slice(record.as_bytes());
        self.write_full_chunks()
    }
}

impl<R: RawRecord, S: OutputStream> Handle<Bucket<R>> for WriteBinaryStream<R, S> {
    fn handle(&mut self, bucket: Bucket<R>) -> Result {
        for record in bucket.iter() {
            self.buf.extend_from_slice(record.as_bytes());
        }
        self.write_full_chunks()
    }
}

impl<R: RawRecord, S: OutputStream> Handle<Event> for WriteBinaryStream<R, S> {
    fn handle(&mut self, _event: Event) -> Result {
        // Library events have no wire representation here; only records
        // are persisted.
        Ok(())
    }
}

impl<R: RawRecord, S: OutputStream> Processor for WriteBinaryStream<R, S> {
    fn flush(&mut self) -> Result {
        if !self.buf.is_empty() {
            let chunk = std::mem::take(&mut self.buf);
            if !self.stream.write(&chunk) {
                return Err(ProcessingError::Format("failed to write output".into()));
            }
        }
        Ok(())
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "write_binary_stream")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = ProcessorGraph::new();
        g.push_entry_point(self);
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::BhSpcRecord;
    use crate::streams::MemoryOutputStream;

    #[test]
    fn writes_packed_records_on_flush() {
        let out = MemoryOutputStream::new();
        let mut writer = WriteBinaryStream::<BhSpcRecord, _>::new(out.clone(), 1024);
        let records: Vec<BhSpcRecord> = (0..3)
            .map(|i| BhSpcRecord::make_photon(i, 0, 0, false))
            .collect();
        for &record in &records {
            Handle::<BhSpcRecord>::handle(&mut writer, record).unwrap();
        }
        assert!(out.contents().is_empty()); // below granularity
        writer.flush().unwrap();
        let expected: Vec<u8> = records.iter().flat_map(|r| r.bytes).collect();
        assert_eq!(out.contents(), expected);
    }

    #[test]
    fn writes_in_granularity_chunks() {
        let out = MemoryOutputStream::new();
        let mut writer = WriteBinaryStream::<BhSpcRecord, _>::new(out.clone(), 8);
        for i in 0..3u16 {
            Handle::<BhSpcRecord>::handle(&mut writer, BhSpcRecord::make_photon(i, 0, 0, false))
                .unwrap();
        }
        // 12 bytes buffered, 8 written.
        assert_eq!(out.contents().len(), 8);
        writer.flush().unwrap();
        assert_eq!(out.contents().len(), 12);
    }

    #[test]
    fn bucket_input_is_accepted() {
        let out = MemoryOutputStream::new();
        let mut writer = WriteBinaryStream::<BhSpcRecord, _>::with_default_granularity(out.clone());
        let records: Vec<BhSpcRecord> =
            (0..5).map(|i| BhSpcRecord::make_photon(i, 1, 2, false)).collect();
        writer
            .handle(crate::bucket::Bucket::detached(records.clone()))
            .unwrap();
        writer.flush().unwrap();
        assert_eq!(out.contents().len(), records.len() * 4);
    }
}
