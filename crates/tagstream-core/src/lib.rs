//! # tagstream-core
//!
//! A statically composed single-pass pipeline framework for
//! time-correlated single photon counting (TCSPC) event processing.
//!
//! Small processor nodes exchange strongly-typed time-tagged events
//! through a directed dataflow graph. Graphs are built bottom-up: a sink
//! is constructed first, then successively wrapped by upstream stages,
//! yielding a source or entry point at the top.
//!
//! ## Quick start
//!
//! ```no_run
//! use tagstream_core::bucket::RecyclingBucketSource;
//! use tagstream_core::bytes::Unbatch;
//! use tagstream_core::decode::{BhSpcRecord, DecodeBhSpc};
//! use tagstream_core::read_stream::ReadBinaryStream;
//! use tagstream_core::streams::FileInputStream;
//! use tagstream_core::testutil::CollectSink;
//! use tagstream_core::timing::CheckMonotonic;
//!
//! let (sink, output) = CollectSink::new();
//! let mut source = ReadBinaryStream::<BhSpcRecord, _, _>::new(
//!     FileInputStream::open("run.spc", 4)?,
//!     u64::MAX,
//!     RecyclingBucketSource::new(),
//!     65536,
//!     Unbatch::new(DecodeBhSpc::new(CheckMonotonic::new(false, sink))),
//! );
//! source.pump()?;
//! println!("{} events decoded", output.lock().unwrap().events.len());
//! # Ok::<(), tagstream_core::error::ProcessingError>(())
//! ```
//!
//! ## Architecture
//!
//! Reader → decoder → timing/filtering stages → binning → histogramming
//!
//! - Events are a single variant type ([`events::Event`]); decoders
//!   additionally consume raw device records ([`decode`]).
//! - Processors own their downstream; composition is static and dispatch
//!   is direct (no virtual calls on hot paths unless branches are boxed).
//! - The only thread boundary is the [`buffer`] pump; everything else is
//!   single-threaded and cooperative.
//! - Multi-input graphs are built from the pairwise [`merge`] fabric,
//!   kept bounded by [`regulate`].

pub mod arith;
pub mod autocopy;
pub mod binning;
pub mod bucket;
pub mod buffer;
pub mod bytes;
pub mod count;
pub mod decode;
pub mod error;
pub mod events;
pub mod filters;
pub mod generate;
pub mod histogram;
pub mod histogram_array;
pub mod introspect;
pub mod journal;
pub mod matching;
pub mod merge;
pub mod pair;
pub mod processor;
pub mod read_stream;
pub mod recover_order;
pub mod regulate;
pub mod route;
pub mod stop;
pub mod streams;
pub mod testutil;
pub mod time_correlate;
pub mod timing;
pub mod write_stream;

pub use autocopy::AutocopySpan;
pub use error::{ProcessingError, Result};
pub use events::{
    Abstime, BinIndex, BinValue, Channel, Datapoint, Detection, Difftime, Event, EventKind,
    EventKindSet,
};
pub use introspect::{graphviz_from_processor_graph, ProcessorGraph};
pub use processor::{EventProcessor, Handle, NodeId, NodeInfo, Processor};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
