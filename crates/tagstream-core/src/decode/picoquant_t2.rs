//! PicoQuant T2 ("TTTR") record decoding.
//!
//! Raw time tag formats are documented in PicoQuant's time-tagged file
//! format demos. The 32-bit records are viewed as little-endian integers
//! when interpreting the documented bit locations.
//!
//! When editing this file, maintain the partial symmetry with
//! `picoquant_t3.rs`.

use crate::error::Result;
use crate::events::{Abstime, Channel, Event};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

use super::records::{for_each_set_bit, impl_raw_record, read_u32le, RawRecord};

/// Field access shared by the T2 record layouts, allowing one decoder
/// implementation to serve all of them.
pub trait PqT2RecordFields: RawRecord {
    /// Time tag overflow period. Note this does not necessarily equal one
    /// plus the maximum representable time tag.
    const OVERFLOW_PERIOD: i64;

    /// Channel, for non-special records.
    fn channel(&self) -> u8;

    /// Time tag, for non-special (non-marker) records.
    fn timetag(&self) -> u32;

    /// Time tag, for external marker records.
    fn external_marker_timetag(&self) -> u32;

    fn is_special(&self) -> bool;

    fn is_timetag_overflow(&self) -> bool;

    fn timetag_overflow_count(&self) -> u32;

    /// Whether this record is a sync event (edge on the sync channel).
    fn is_sync_event(&self) -> bool;

    fn is_external_marker(&self) -> bool;

    fn external_marker_bits(&self) -> u8;
}

/// PicoHarp 300 T2 record (RecType 0x00010203).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PicoHarpT2Record {
    pub bytes: [u8; 4],
}

impl_raw_record!(PicoHarpT2Record, 4);

impl PicoHarpT2Record {
    fn make_from_fields(channel: u8, timetag: u32) -> Self {
        Self {
            bytes: [
                timetag as u8,
                (timetag >> 8) as u8,
                (timetag >> 16) as u8,
                (channel << 4) | ((timetag >> 24) as u8 & 0x0f),
            ],
        }
    }

    /// A non-special (photon) record. Panics if `channel` exceeds 14.
    pub fn make_nonspecial(timetag: u32, channel: u8) -> Self {
        assert!(channel <= 14, "channel must be in the range 0-14");
        Self::make_from_fields(channel, timetag)
    }

    /// A time tag overflow record.
    pub fn make_timetag_overflow() -> Self {
        Self::make_from_fields(15, 0)
    }

    /// An external marker record; the lower 4 time tag bits are replaced
    /// by the marker bits. Panics if `marker_bits` is zero.
    pub fn make_external_marker(timetag: u32, marker_bits: u8) -> Self {
        assert!(marker_bits != 0, "marker bits must not be zero");
        Self::make_from_fields(15, (timetag & !0x0f) | u32::from(marker_bits & 0x0f))
    }
}

impl PqT2RecordFields for PicoHarpT2Record {
    const OVERFLOW_PERIOD: i64 = 210_698_240;

    fn channel(&self) -> u8 {
        self.bytes[3] >> 4
    }

    fn timetag(&self) -> u32 {
        read_u32le(&self.bytes) & 0x0fff_ffff
    }

    fn external_marker_timetag(&self) -> u32 {
        // For markers the low 4 bits of the time tag store the marker
        // bits, giving markers 1/16 the time resolution. Zero them rather
        // than leaving the marker bits in the timestamp.
        self.timetag() & !0x0f
    }

    fn is_special(&self) -> bool {
        self.channel() == 15
    }

    fn is_timetag_overflow(&self) -> bool {
        self.is_special() && self.timetag() & 0x0f == 0
    }

    fn timetag_overflow_count(&self) -> u32 {
        1
    }

    fn is_sync_event(&self) -> bool {
        false
    }

    fn is_external_marker(&self) -> bool {
        self.is_special() && self.timetag() & 0x0f != 0
    }

    fn external_marker_bits(&self) -> u8 {
        self.bytes[0] & 0x0f
    }
}

/// HydraHarp, MultiHarp, TimeHarp 260, and PicoHarp 330 T2 record layout.
///
/// `OVERFLOW_PERIOD` and `SINGLE_OVERFLOW` distinguish the HydraHarp V1
/// format (always a single overflow per record) from the generic format
/// (overflow count carried in the time tag field); use the
/// [`HydraV1T2Record`] and [`GenericT2Record`] aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicPqT2Record<const OVERFLOW_PERIOD: i64, const SINGLE_OVERFLOW: bool> {
    pub bytes: [u8; 4],
}

/// HydraHarp V1 T2 record (RecType 0x00010204).
pub type HydraV1T2Record = BasicPqT2Record<33_552_000, true>;

/// HydraHarp V2, MultiHarp, TimeHarp 260, and PicoHarp 330 "Generic" T2
/// record (RecType 0x01010204, 0x00010205, 0x00010206, 0x00010207).
pub type GenericT2Record = BasicPqT2Record<33_554_432, false>;

impl<const P: i64, const S: bool> RawRecord for BasicPqT2Record<P, S> {
    const SIZE: usize = 4;

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; 4];
        data.copy_from_slice(&bytes[..4]);
        Self { bytes: data }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const P: i64, const S: bool> BasicPqT2Record<P, S> {
    fn make_from_fields(special: bool, channel: u8, timetag: u32) -> Self {
        Self {
            bytes: [
                timetag as u8,
                (timetag >> 8) as u8,
                (timetag >> 16) as u8,
                (u8::from(special) << 7) | ((channel & 0x3f) << 1) | ((timetag >> 24) as u8 & 0x01),
            ],
        }
    }

    /// A non-special (photon) record.
    pub fn make_nonspecial(timetag: u32, channel: u8) -> Self {
        Self::make_from_fields(false, channel, timetag)
    }

    /// A single time tag overflow record.
    pub fn make_timetag_overflow_single() -> Self {
        Self::make_from_fields(true, 63, 1)
    }

    /// A sync record.
    pub fn make_sync(timetag: u32) -> Self {
        Self::make_from_fields(true, 0, timetag)
    }

    /// An external marker record. Panics unless `marker_bits` is in 1-15.
    pub fn make_external_marker(timetag: u32, marker_bits: u8) -> Self {
        assert!(
            marker_bits != 0 && marker_bits <= 0x0f,
            "marker bits must be in range 1-15"
        );
        Self::make_from_fields(true, marker_bits & 0x3f, timetag)
    }
}

impl GenericT2Record {
    /// A multi-overflow record; not available in the HydraHarp V1 format.
    pub fn make_timetag_overflow(count: u32) -> Self {
        Self::make_from_fields(true, 63, count)
    }
}

impl<const P: i64, const S: bool> PqT2RecordFields for BasicPqT2Record<P, S> {
    const OVERFLOW_PERIOD: i64 = P;

    fn channel(&self) -> u8 {
        (self.bytes[3] & 0x7f) >> 1
    }

    fn timetag(&self) -> u32 {
        read_u32le(&self.bytes) & 0x01ff_ffff
    }

    fn external_marker_timetag(&self) -> u32 {
        self.timetag()
    }

    fn is_special(&self) -> bool {
        self.bytes[3] & (1 << 7) != 0
    }

    fn is_timetag_overflow(&self) -> bool {
        self.is_special() && self.channel() == 63
    }

    fn timetag_overflow_count(&self) -> u32 {
        if S {
            1
        } else {
            self.timetag()
        }
    }

    fn is_sync_event(&self) -> bool {
        self.is_special() && self.channel() == 0
    }

    fn is_external_marker(&self) -> bool {
        self.is_special() && self.channel() > 0 && self.channel() <= 15
    }

    fn external_marker_bits(&self) -> u8 {
        self.channel()
    }
}

/// Decoder for PicoQuant T2 records, shared across the three layouts.
///
/// Sync events are reported as detections on channel -1. In the formats
/// whose overflow period is smaller than one plus the maximum time tag
/// (PicoHarp 300, HydraHarp V1), invalid time tags surface downstream when
/// checking monotonicity; they are not checked here.
pub struct DecodePqT2<R, D> {
    timetag_base: Abstime,
    downstream: D,
    _record: std::marker::PhantomData<R>,
}

impl<R: PqT2RecordFields, D: EventProcessor> DecodePqT2<R, D> {
    pub fn new(downstream: D) -> Self {
        Self {
            timetag_base: 0,
            downstream,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R: PqT2RecordFields, D: EventProcessor> Handle<R> for DecodePqT2<R, D> {
    fn handle(&mut self, record: R) -> Result {
        if record.is_timetag_overflow() {
            self.timetag_base +=
                R::OVERFLOW_PERIOD * Abstime::from(record.timetag_overflow_count());
            return self.downstream.handle(Event::TimeReached {
                abstime: self.timetag_base,
            });
        }

        if !record.is_special() || record.is_sync_event() {
            let abstime = self.timetag_base + Abstime::from(record.timetag());
            self.downstream.handle(Event::Detection {
                abstime,
                channel: if record.is_special() {
                    -1
                } else {
                    Channel::from(record.channel())
                },
            })
        } else if record.is_external_marker() {
            let abstime = self.timetag_base + Abstime::from(record.external_marker_timetag());
            let mut result = Ok(());
            for_each_set_bit(u32::from(record.external_marker_bits()), |b| {
                if result.is_ok() {
                    result = self.downstream.handle(Event::Marker {
                        abstime,
                        channel: b as Channel,
                    });
                }
            });
            result
        } else {
            self.downstream.handle(Event::Warning {
                message: "invalid special record encountered".into(),
            })
        }
    }
}

impl<R: PqT2RecordFields, D: EventProcessor> Handle<Event> for DecodePqT2<R, D> {
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<R: PqT2RecordFields, D: EventProcessor> Processor for DecodePqT2<R, D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "decode_pq_t2")
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
    use crate::testutil::CollectSink;

    #[test]
    fn picoharp_photon_fields() {
        let r = PicoHarpT2Record::make_nonspecial(0x0123_4567, 9);
        assert_eq!(r.timetag(), 0x0123_4567);
        assert_eq!(r.channel(), 9);
        assert!(!r.is_special());
    }

    #[test]
    fn picoharp_overflow_is_single() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<PicoHarpT2Record, _>::new(sink);
        dec.handle(PicoHarpT2Record::make_timetag_overflow()).unwrap();
        dec.handle(PicoHarpT2Record::make_nonspecial(100, 2)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![
                Event::TimeReached {
                    abstime: 210_698_240,
                },
                Event::Detection {
                    abstime: 210_698_340,
                    channel: 2,
                },
            ]
        );
    }

    #[test]
    fn picoharp_marker_timetag_drops_low_bits() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<PicoHarpT2Record, _>::new(sink);
        dec.handle(PicoHarpT2Record::make_external_marker(0x1237, 0b0010))
            .unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::Marker {
                abstime: 0x1230,
                channel: 1,
            }]
        );
    }

    #[test]
    fn hydrav1_sync_event_at_stream_start() {
        // A sync-special record with timetag 42 emits detection(42, -1).
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<HydraV1T2Record, _>::new(sink);
        dec.handle(HydraV1T2Record::make_sync(42)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::Detection {
                abstime: 42,
                channel: -1,
            }]
        );
    }

    #[test]
    fn hydrav1_overflow_always_single() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<HydraV1T2Record, _>::new(sink);
        dec.handle(HydraV1T2Record::make_timetag_overflow_single())
            .unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::TimeReached {
                abstime: 33_552_000,
            }]
        );
    }

    #[test]
    fn generic_multi_overflow_uses_timetag_count() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<GenericT2Record, _>::new(sink);
        dec.handle(GenericT2Record::make_timetag_overflow(3)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::TimeReached {
                abstime: 3 * (1i64 << 25),
            }]
        );
    }

    #[test]
    fn generic_photon_after_overflows() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<GenericT2Record, _>::new(sink);
        dec.handle(GenericT2Record::make_timetag_overflow(2)).unwrap();
        dec.handle(GenericT2Record::make_nonspecial(7, 5)).unwrap();
        assert_eq!(
            out.lock().unwrap().events[1],
            Event::Detection {
                abstime: 2 * (1i64 << 25) + 7,
                channel: 5,
            }
        );
    }

    #[test]
    fn generic_marker_bits_from_channel_field() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<GenericT2Record, _>::new(sink);
        dec.handle(GenericT2Record::make_external_marker(50, 0b0101))
            .unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![
                Event::Marker {
                    abstime: 50,
                    channel: 0,
                },
                Event::Marker {
                    abstime: 50,
                    channel: 2,
                },
            ]
        );
    }

    #[test]
    fn invalid_special_record_warns() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT2::<GenericT2Record, _>::new(sink);
        // Special with channel 20: neither overflow, sync, nor marker.
        dec.handle(BasicPqT2Record::make_from_fields(true, 20, 0))
            .unwrap();
        assert!(matches!(
            out.lock().unwrap().events[0],
            Event::Warning { .. }
        ));
    }

    #[test]
    fn wire_format_is_little_endian() {
        let r = GenericT2Record::make_nonspecial(1, 0);
        assert_eq!(r.as_bytes(), &[0x01, 0x00, 0x00, 0x00]);
        let r2 = GenericT2Record::from_bytes(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(r, r2);
    }
}
