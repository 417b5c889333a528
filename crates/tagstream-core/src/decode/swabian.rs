//! Swabian Time Tagger 16-byte tag decoding.
//!
//! The raw tag stream format is documented in Swabian's Time Tagger C++
//! API manual (the 16-byte 'Tag' struct). Timestamps are absolute
//! picoseconds; there is no overflow arithmetic.

use crate::error::Result;
use crate::events::Event;
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

use super::records::{impl_raw_record, read_i32le, read_i64le, read_u16le};

/// Tag kind stored in the first byte of a [`SwabianTagRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SwabianTagKind {
    TimeTag = 0,
    Error = 1,
    OverflowBegin = 2,
    OverflowEnd = 3,
    MissedEvents = 4,
}

/// 16-byte record with the same layout as the 'Tag' struct in the Swabian
/// Time Tagger C++ API.
///
/// No alignment requirement: tags can be read from unaligned sources such
/// as memory-mapped files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwabianTagRecord {
    pub bytes: [u8; 16],
}

impl_raw_record!(SwabianTagRecord, 16);

impl SwabianTagRecord {
    /// The raw tag kind byte; may not correspond to a known kind.
    pub fn kind_raw(&self) -> u8 {
        self.bytes[0]
    }

    // bytes[1] is reserved and written zero.

    /// Missed event count, for missed-events tags.
    pub fn missed_event_count(&self) -> u16 {
        read_u16le(&self.bytes[2..4])
    }

    /// Channel, for time tag and missed-events tags.
    pub fn channel(&self) -> i32 {
        read_i32le(&self.bytes[4..8])
    }

    /// Time in picoseconds.
    pub fn time(&self) -> i64 {
        read_i64le(&self.bytes[8..16])
    }

    fn make_from_fields(kind: u8, missed: u16, channel: i32, time: i64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = kind;
        bytes[2..4].copy_from_slice(&missed.to_le_bytes());
        bytes[4..8].copy_from_slice(&channel.to_le_bytes());
        bytes[8..16].copy_from_slice(&time.to_le_bytes());
        Self { bytes }
    }

    pub fn make_time_tag(time: i64, channel: i32) -> Self {
        Self::make_from_fields(SwabianTagKind::TimeTag as u8, 0, channel, time)
    }

    pub fn make_error(time: i64) -> Self {
        Self::make_from_fields(SwabianTagKind::Error as u8, 0, 0, time)
    }

    pub fn make_overflow_begin(time: i64) -> Self {
        Self::make_from_fields(SwabianTagKind::OverflowBegin as u8, 0, 0, time)
    }

    pub fn make_overflow_end(time: i64) -> Self {
        Self::make_from_fields(SwabianTagKind::OverflowEnd as u8, 0, 0, time)
    }

    pub fn make_missed_events(time: i64, channel: i32, count: u16) -> Self {
        Self::make_from_fields(SwabianTagKind::MissedEvents as u8, count, channel, time)
    }
}

/// Decoder for Swabian tags.
///
/// Recognizes the five tag kinds and emits the corresponding library
/// events; unknown tag kinds produce a warning.
pub struct DecodeSwabianTags<D> {
    downstream: D,
}

impl<D: EventProcessor> DecodeSwabianTags<D> {
    pub fn new(downstream: D) -> Self {
        Self { downstream }
    }

    fn handle_coldpath_tag(&mut self, record: &SwabianTagRecord) -> Result {
        match record.kind_raw() {
            k if k == SwabianTagKind::Error as u8 => self.downstream.handle(Event::Warning {
                message: "error tag encountered".into(),
            }),
            k if k == SwabianTagKind::OverflowBegin as u8 => {
                self.downstream.handle(Event::BeginLostInterval {
                    abstime: record.time(),
                })
            }
            k if k == SwabianTagKind::OverflowEnd as u8 => {
                self.downstream.handle(Event::EndLostInterval {
                    abstime: record.time(),
                })
            }
            k if k == SwabianTagKind::MissedEvents as u8 => {
                self.downstream.handle(Event::UntaggedCounts {
                    abstime: record.time(),
                    channel: record.channel(),
                    count: u32::from(record.missed_event_count()),
                })
            }
            unknown => self.downstream.handle(Event::Warning {
                message: format!("unknown tag kind ({unknown})"),
            }),
        }
    }
}

impl<D: EventProcessor> Handle<SwabianTagRecord> for DecodeSwabianTags<D> {
    fn handle(&mut self, record: SwabianTagRecord) -> Result {
        if record.kind_raw() == SwabianTagKind::TimeTag as u8 {
            self.downstream.handle(Event::Detection {
                abstime: record.time(),
                channel: record.channel(),
            })
        } else {
            self.handle_coldpath_tag(&record)
        }
    }
}

impl<D: EventProcessor> Handle<Event> for DecodeSwabianTags<D> {
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<D: EventProcessor> Processor for DecodeSwabianTags<D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "decode_swabian_tags")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
