//! PicoQuant T3 ("TTTR") record decoding.
//!
//! When editing this file, maintain the partial symmetry with
//! `picoquant_t2.rs`.

use crate::error::Result;
use crate::events::{Abstime, Channel, Difftime, Event};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

use super::records::{for_each_set_bit, impl_raw_record, read_u16le, RawRecord};

/// Field access shared by the T3 record layouts.
pub trait PqT3RecordFields: RawRecord {
    /// nsync overflow period.
    const NSYNC_OVERFLOW_PERIOD: i64;

    /// Channel, for non-special records.
    fn channel(&self) -> u8;

    /// Difference time, for non-special records.
    fn dtime(&self) -> u16;

    /// nsync counter value, for non-special and external marker records.
    fn nsync(&self) -> u16;

    fn is_special(&self) -> bool;

    fn is_nsync_overflow(&self) -> bool;

    fn nsync_overflow_count(&self) -> u16;

    fn is_external_marker(&self) -> bool;

    fn external_marker_bits(&self) -> u16;
}

/// PicoHarp 300 T3 record (RecType 0x00010303).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PicoHarpT3Record {
    pub bytes: [u8; 4],
}

impl_raw_record!(PicoHarpT3Record, 4);

impl PicoHarpT3Record {
    fn make_from_fields(channel: u8, dtime: u16, nsync: u16) -> Self {
        Self {
            bytes: [
                nsync as u8,
                (nsync >> 8) as u8,
                dtime as u8,
                (channel << 4) | ((dtime >> 8) as u8 & 0x0f),
            ],
        }
    }

    /// A non-special (photon) record. Panics if `channel` exceeds 14.
    pub fn make_nonspecial(nsync: u16, channel: u8, dtime: u16) -> Self {
        assert!(channel <= 14, "channel must be in the range 0-14");
        Self::make_from_fields(channel, dtime, nsync)
    }

    /// An nsync overflow record.
    pub fn make_nsync_overflow() -> Self {
        Self::make_from_fields(15, 0, 0)
    }

    /// An external marker record. Panics if `marker_bits` is zero.
    pub fn make_external_marker(nsync: u16, marker_bits: u8) -> Self {
        assert!(marker_bits != 0, "marker bits must not be zero");
        Self::make_from_fields(15, u16::from(marker_bits & 0x0f), nsync)
    }
}

impl PqT3RecordFields for PicoHarpT3Record {
    const NSYNC_OVERFLOW_PERIOD: i64 = 65536;

    fn channel(&self) -> u8 {
        self.bytes[3] >> 4
    }

    fn dtime(&self) -> u16 {
        read_u16le(&self.bytes[2..4]) & 0x0fff
    }

    fn nsync(&self) -> u16 {
        read_u16le(&self.bytes[0..2])
    }

    fn is_special(&self) -> bool {
        self.channel() == 15
    }

    fn is_nsync_overflow(&self) -> bool {
        self.is_special() && self.dtime() == 0
    }

    fn nsync_overflow_count(&self) -> u16 {
        1
    }

    fn is_external_marker(&self) -> bool {
        // Markers are a 4-bit field in T2 and explicitly range 1-15 in the
        // HydraHarp/generic formats; behave consistently here.
        self.is_special() && self.dtime() > 0 && self.dtime() <= 15
    }

    fn external_marker_bits(&self) -> u16 {
        self.dtime()
    }
}

/// HydraHarp, MultiHarp, TimeHarp 260, and PicoHarp 330 T3 record layout.
///
/// Use the [`HydraV1T3Record`] and [`GenericT3Record`] aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicPqT3Record<const SINGLE_OVERFLOW: bool> {
    pub bytes: [u8; 4],
}

/// HydraHarp V1 T3 record (RecType 0x00010304).
pub type HydraV1T3Record = BasicPqT3Record<true>;

/// HydraHarp V2, MultiHarp, TimeHarp 260, and PicoHarp 330 "Generic" T3
/// record (RecType 0x01010304, 0x00010305, 0x00010306, 0x00010307).
pub type GenericT3Record = BasicPqT3Record<false>;

impl<const S: bool> RawRecord for BasicPqT3Record<S> {
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

impl<const S: bool> BasicPqT3Record<S> {
    fn make_from_fields(special: bool, channel: u8, dtime: u16, nsync: u16) -> Self {
        Self {
            bytes: [
                nsync as u8,
                ((dtime << 2) as u8) | ((nsync >> 8) as u8 & 0x03),
                (dtime >> 6) as u8,
                (u8::from(special) << 7) | ((channel & 0x3f) << 1) | ((dtime >> 14) as u8 & 0x01),
            ],
        }
    }

    /// A non-special (photon) record.
    pub fn make_nonspecial(nsync: u16, channel: u8, dtime: u16) -> Self {
        Self::make_from_fields(false, channel, dtime, nsync)
    }

    /// A single nsync overflow record.
    pub fn make_nsync_overflow_single() -> Self {
        Self::make_from_fields(true, 63, 0, 1)
    }

    /// An external marker record.
    pub fn make_external_marker(nsync: u16, marker_bits: u8) -> Self {
        Self::make_from_fields(true, marker_bits, 0, nsync)
    }
}

impl GenericT3Record {
    /// A multi-overflow record; not available in the HydraHarp V1 format.
    pub fn make_nsync_overflow(count: u16) -> Self {
        Self::make_from_fields(true, 63, 0, count)
    }
}

impl<const S: bool> PqT3RecordFields for BasicPqT3Record<S> {
    const NSYNC_OVERFLOW_PERIOD: i64 = 1024;

    fn channel(&self) -> u8 {
        (self.bytes[3] & 0x7f) >> 1
    }

    fn dtime(&self) -> u16 {
        let lo6 = u16::from(self.bytes[1]) >> 2;
        let mid8 = u16::from(self.bytes[2]);
        let hi1 = u16::from(self.bytes[3]) & 1;
        lo6 | (mid8 << 6) | (hi1 << 14)
    }

    fn nsync(&self) -> u16 {
        read_u16le(&self.bytes[0..2]) & 0x03ff
    }

    fn is_special(&self) -> bool {
        self.bytes[3] & (1 << 7) != 0
    }

    fn is_nsync_overflow(&self) -> bool {
        self.is_special() && self.channel() == 63
    }

    fn nsync_overflow_count(&self) -> u16 {
        if S {
            1
        } else {
            self.nsync()
        }
    }

    fn is_external_marker(&self) -> bool {
        self.is_special() && self.channel() > 0 && self.channel() <= 15
    }

    fn external_marker_bits(&self) -> u16 {
        u16::from(self.channel())
    }
}

/// Decoder for PicoQuant T3 records, shared across the three layouts.
pub struct DecodePqT3<R, D> {
    nsync_base: Abstime,
    downstream: D,
    _record: std::marker::PhantomData<R>,
}

impl<R: PqT3RecordFields, D: EventProcessor> DecodePqT3<R, D> {
    pub fn new(downstream: D) -> Self {
        Self {
            nsync_base: 0,
            downstream,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R: PqT3RecordFields, D: EventProcessor> Handle<R> for DecodePqT3<R, D> {
    fn handle(&mut self, record: R) -> Result {
        if record.is_nsync_overflow() {
            self.nsync_base +=
                R::NSYNC_OVERFLOW_PERIOD * Abstime::from(record.nsync_overflow_count());
            return self.downstream.handle(Event::TimeReached {
                abstime: self.nsync_base,
            });
        }

        let nsync = self.nsync_base + Abstime::from(record.nsync());

        if !record.is_special() {
            self.downstream.handle(Event::TimeCorrelatedDetection {
                abstime: nsync,
                channel: Channel::from(record.channel()),
                difftime: Difftime::from(record.dtime()),
            })
        } else if record.is_external_marker() {
            let mut result = Ok(());
            for_each_set_bit(u32::from(record.external_marker_bits()), |b| {
                if result.is_ok() {
                    result = self.downstream.handle(Event::Marker {
                        abstime: nsync,
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

impl<R: PqT3RecordFields, D: EventProcessor> Handle<Event> for DecodePqT3<R, D> {
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<R: PqT3RecordFields, D: EventProcessor> Processor for DecodePqT3<R, D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "decode_pq_t3")
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
        let r = PicoHarpT3Record::make_nonspecial(1234, 9, 4000);
        assert_eq!(r.nsync(), 1234);
        assert_eq!(r.channel(), 9);
        assert_eq!(r.dtime(), 4000);
        assert!(!r.is_special());
    }

    #[test]
    fn picoharp_photon_decodes_to_time_correlated_detection() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT3::<PicoHarpT3Record, _>::new(sink);
        dec.handle(PicoHarpT3Record::make_nsync_overflow()).unwrap();
        dec.handle(PicoHarpT3Record::make_nonspecial(100, 3, 17))
            .unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![
                Event::TimeReached { abstime: 65536 },
                Event::TimeCorrelatedDetection {
                    abstime: 65636,
                    channel: 3,
                    difftime: 17,
                },
            ]
        );
    }

    #[test]
    fn picoharp_marker_bits_in_dtime_field() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT3::<PicoHarpT3Record, _>::new(sink);
        dec.handle(PicoHarpT3Record::make_external_marker(40, 0b1001))
            .unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![
                Event::Marker {
                    abstime: 40,
                    channel: 0,
                },
                Event::Marker {
                    abstime: 40,
                    channel: 3,
                },
            ]
        );
    }

    #[test]
    fn basic_record_field_packing_round_trips() {
        let r = GenericT3Record::make_nonspecial(1000, 60, 32767);
        assert_eq!(r.nsync(), 1000);
        assert_eq!(r.channel(), 60);
        assert_eq!(r.dtime(), 32767);
        assert!(!r.is_special());
        let r2 = GenericT3Record::from_bytes(r.as_bytes());
        assert_eq!(r, r2);
    }

    #[test]
    fn hydrav1_overflow_always_single() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT3::<HydraV1T3Record, _>::new(sink);
        dec.handle(HydraV1T3Record::make_nsync_overflow_single())
            .unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![Event::TimeReached { abstime: 1024 }]
        );
    }

    #[test]
    fn generic_overflow_count_in_nsync_field() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT3::<GenericT3Record, _>::new(sink);
        dec.handle(GenericT3Record::make_nsync_overflow(5)).unwrap();
        dec.handle(GenericT3Record::make_nonspecial(3, 1, 2)).unwrap();
        assert_eq!(
            out.lock().unwrap().events,
            vec![
                Event::TimeReached { abstime: 5120 },
                Event::TimeCorrelatedDetection {
                    abstime: 5123,
                    channel: 1,
                    difftime: 2,
                },
            ]
        );
    }

    #[test]
    fn invalid_special_record_warns() {
        let (sink, out) = CollectSink::new();
        let mut dec = DecodePqT3::<GenericT3Record, _>::new(sink);
        dec.handle(BasicPqT3Record::make_from_fields(true, 30, 0, 0))
            .unwrap();
        assert!(matches!(
            out.lock().unwrap().events[0],
            Event::Warning { .. }
        ));
    }
}
