//! Subcommand implementations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::info;

use tagstream_core::binning::{DifftimeDataMapper, MapToBins, MapToDatapoints, PowerOf2BinMapper};
use tagstream_core::bucket::RecyclingBucketSource;
use tagstream_core::bytes::Unbatch;
use tagstream_core::count::Count;
use tagstream_core::decode::{
    BhSpc600Record256Ch, BhSpc600Record4096Ch, BhSpcRecord, DecodeBhSpc, DecodePqT2, DecodePqT3,
    DecodeSwabianTags, GenericT2Record, GenericT3Record, HydraV1T2Record, HydraV1T3Record,
    PicoHarpT2Record, PicoHarpT3Record, RawRecord, SwabianTagRecord,
};
use tagstream_core::events::{Abstime, Channel, Event, EventKind, EventKindSet};
use tagstream_core::histogram::{Histogram, OverflowStrategy};
use tagstream_core::introspect::{graphviz_from_processor_graph, ProcessorGraph};
use tagstream_core::processor::{Handle, NodeInfo, Processor};
use tagstream_core::read_stream::ReadBinaryStream;
use tagstream_core::stop::Stop;
use tagstream_core::streams::FileInputStream;
use tagstream_core::testutil::CollectSink;
use tagstream_core::timing::CheckMonotonic;
use tagstream_core::{ProcessingError, Result};

use crate::Format;

#[derive(Debug, Default)]
struct Summary {
    photons: BTreeMap<Channel, u64>,
    markers: BTreeMap<Channel, u64>,
    warnings: u64,
    last_abstime: Option<Abstime>,
}

/// Terminal sink accumulating per-channel statistics.
struct SummarizeSink {
    summary: Arc<Mutex<Summary>>,
}

impl Handle<Event> for SummarizeSink {
    fn handle(&mut self, event: Event) -> Result {
        let mut summary = self.summary.lock().unwrap();
        if let Some(abstime) = event.abstime() {
            summary.last_abstime = Some(abstime);
        }
        match event {
            Event::Detection { channel, .. } | Event::TimeCorrelatedDetection { channel, .. } => {
                *summary.photons.entry(channel).or_default() += 1;
            }
            Event::Marker { channel, .. } => {
                *summary.markers.entry(channel).or_default() += 1;
            }
            Event::Warning { message } => {
                summary.warnings += 1;
                eprintln!("warning: {message}");
            }
            _ => {}
        }
        Ok(())
    }
}

impl Processor for SummarizeSink {
    fn flush(&mut self) -> Result {
        Ok(())
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "summarize_sink")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = ProcessorGraph::new();
        g.push_entry_point(self);
        g
    }
}

type SummarizeChain = Count<Count<Stop<SummarizeSink>>>;

fn summarize_chain(
    strict: bool,
    counter: Arc<AtomicU64>,
    summary: Arc<Mutex<Summary>>,
) -> SummarizeChain {
    let stop_kinds = if strict {
        EventKindSet::of(&[EventKind::Warning])
    } else {
        EventKindSet::EMPTY
    };
    Count::new(
        EventKind::TimeCorrelatedDetection,
        counter.clone(),
        Count::new(
            EventKind::Detection,
            counter,
            Stop::with_error(stop_kinds, "error in data", SummarizeSink { summary }),
        ),
    )
}

fn run<R, P, F>(path: &str, start_offset: u64, strict: bool, make_decoder: F) -> Result
where
    R: RawRecord + Default + Clone + Send + Sync,
    P: Handle<R> + Handle<Event> + Processor,
    F: FnOnce(SummarizeChain) -> P,
{
    let counter = Arc::new(AtomicU64::new(0));
    let summary = Arc::new(Mutex::new(Summary::default()));

    let decoder = make_decoder(summarize_chain(strict, counter.clone(), summary.clone()));
    let mut source = ReadBinaryStream::<R, _, _>::new(
        FileInputStream::open(path, start_offset)?,
        u64::MAX,
        RecyclingBucketSource::new(),
        65536,
        Unbatch::new(decoder),
    );

    match source.pump() {
        Ok(()) => {}
        Err(error) if error.is_end_of_processing() => {
            eprintln!("{error}");
            eprintln!("the results below are up to the stopping point");
        }
        Err(error) => return Err(error),
    }

    let summary = summary.lock().unwrap();
    if let Some(last) = summary.last_abstime {
        println!("last abstime:\t{last}");
    }
    for (channel, count) in &summary.photons {
        println!("channel {channel}:\t{count}");
    }
    for (channel, count) in &summary.markers {
        println!("marker {channel}:\t{count}");
    }
    if summary.warnings > 0 {
        println!("warnings:\t{}", summary.warnings);
    }
    info!("summarized {path}");
    eprintln!("{} detections counted", counter.load(Ordering::Relaxed));
    Ok(())
}

pub fn summarize(path: &str, format: Format, start_offset: u64, strict: bool) -> Result {
    match format {
        Format::BhSpc => run::<BhSpcRecord, _, _>(
            path,
            start_offset,
            strict,
            DecodeBhSpc::<BhSpcRecord, _>::new,
        ),
        Format::BhSpcIntensity => run::<BhSpcRecord, _, _>(
            path,
            start_offset,
            strict,
            DecodeBhSpc::with_fast_intensity_counter,
        ),
        Format::BhSpc600_4096 => run::<BhSpc600Record4096Ch, _, _>(
            path,
            start_offset,
            strict,
            DecodeBhSpc::<BhSpc600Record4096Ch, _>::new,
        ),
        Format::BhSpc600_256 => run::<BhSpc600Record256Ch, _, _>(
            path,
            start_offset,
            strict,
            DecodeBhSpc::<BhSpc600Record256Ch, _>::new,
        ),
        Format::PqT2Picoharp => run::<PicoHarpT2Record, _, _>(
            path,
            start_offset,
            strict,
            DecodePqT2::<PicoHarpT2Record, _>::new,
        ),
        Format::PqT2Hydrav1 => run::<HydraV1T2Record, _, _>(
            path,
            start_offset,
            strict,
            DecodePqT2::<HydraV1T2Record, _>::new,
        ),
        Format::PqT2Generic => run::<GenericT2Record, _, _>(
            path,
            start_offset,
            strict,
            DecodePqT2::<GenericT2Record, _>::new,
        ),
        Format::PqT3Picoharp => run::<PicoHarpT3Record, _, _>(
            path,
            start_offset,
            strict,
            DecodePqT3::<PicoHarpT3Record, _>::new,
        ),
        Format::PqT3Hydrav1 => run::<HydraV1T3Record, _, _>(
            path,
            start_offset,
            strict,
            DecodePqT3::<HydraV1T3Record, _>::new,
        ),
        Format::PqT3Generic => run::<GenericT3Record, _, _>(
            path,
            start_offset,
            strict,
            DecodePqT3::<GenericT3Record, _>::new,
        ),
        Format::Swabian => {
            run::<SwabianTagRecord, _, _>(path, start_offset, strict, DecodeSwabianTags::new)
        }
    }
}

pub fn graph(json: bool) -> Result {
    // A representative FLIM-style chain: decode, sanity-check, bin
    // difference times, histogram.
    let (sink, _out) = CollectSink::new();
    let pipeline = DecodeBhSpc::<BhSpcRecord, _>::new(CheckMonotonic::new(
        false,
        MapToDatapoints::new(
            DifftimeDataMapper,
            MapToBins::new(
                PowerOf2BinMapper::<12, 8>::new(false),
                Histogram::new(
                    256,
                    u16::MAX,
                    OverflowStrategy::Error,
                    EventKind::Marker,
                    sink,
                ),
            ),
        ),
    ));
    let graph = pipeline.introspect_graph();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&graph)
                .map_err(|e| ProcessingError::Format(e.to_string()))?
        );
    } else {
        print!("{}", graphviz_from_processor_graph(&graph));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn summarize_bh_spc_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        for i in 0..10u16 {
            let record = BhSpcRecord::make_photon(i, 100, 3, false);
            tmp.write_all(&record.bytes).unwrap();
        }
        tmp.flush().unwrap();
        summarize(tmp.path().to_str().unwrap(), Format::BhSpc, 0, false).unwrap();
    }

    #[test]
    fn summarize_swabian_file_strict() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        for i in 0..5 {
            let record = SwabianTagRecord::make_time_tag(i * 10, 1);
            tmp.write_all(&record.bytes).unwrap();
        }
        tmp.flush().unwrap();
        summarize(tmp.path().to_str().unwrap(), Format::Swabian, 0, true).unwrap();
    }

    #[test]
    fn summarize_missing_file_fails() {
        assert!(summarize("/nonexistent/input.spc", Format::BhSpc, 0, false).is_err());
    }

    #[test]
    fn graph_renders() {
        graph(false).unwrap();
        graph(true).unwrap();
    }
}
