//! Becker & Hickl SPC FIFO record decoding.
//!
//! Raw photon record formats are documented in The bh TCSPC Handbook (see
//! the section on FIFO files in the chapter on data file structure).

use crate::error::Result;
use crate::events::{Abstime, Channel, Difftime, Event};
use crate::introspect::ProcessorGraph;
use crate::processor::{EventProcessor, Handle, NodeInfo, Processor};

use super::records::{for_each_set_bit, impl_raw_record, read_u16le, read_u32le};

/// Field access shared by the three BH SPC record layouts, allowing one
/// decoder implementation to serve all of them.
pub trait BhSpcRecordFields: super::records::RawRecord {
    /// Macrotime overflow period.
    const OVERFLOW_PERIOD: u32;

    /// ADC value (the difference time), for photon records.
    fn adc_value(&self) -> u16;

    /// Routing signals (usually the detector channel), for photon records.
    fn routing_signals(&self) -> u8;

    /// Macrotime counter value, without rollover correction.
    fn macrotime(&self) -> u32;

    /// The 'marker' flag.
    fn marker_flag(&self) -> bool;

    /// Marker bitmask, for marker records.
    fn marker_bits(&self) -> u8;

    /// The 'gap' (data lost) flag.
    fn gap_flag(&self) -> bool;

    /// The 'macrotime overflow' flag.
    fn macrotime_overflow_flag(&self) -> bool;

    /// The 'invalid' flag.
    fn invalid_flag(&self) -> bool;

    /// Whether this record represents multiple macrotime overflows.
    fn is_multiple_macrotime_overflow(&self) -> bool;

    /// Overflow count for multiple-macrotime-overflow records.
    fn multiple_macrotime_overflow_count(&self) -> u32;
}

/// 32-bit FIFO record used by most BH SPC models (SPC-130/140/150/160/180
/// families and others, but not SPC-600/630).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BhSpcRecord {
    pub bytes: [u8; 4],
}

impl_raw_record!(BhSpcRecord, 4);

impl BhSpcRecord {
    fn flags(&self) -> u8 {
        self.bytes[3]
    }

    fn make_from_fields(invalid: bool, mtov: bool, gap: bool, mark: bool, adc: u16, rout: u8, mt: u16) -> Self {
        let flags = (u8::from(invalid) << 7)
            | (u8::from(mtov) << 6)
            | (u8::from(gap) << 5)
            | (u8::from(mark) << 4);
        Self {
            bytes: [
                mt as u8,
                (rout << 4) | ((mt >> 8) as u8 & 0x0f),
                adc as u8,
                flags | ((adc >> 8) as u8 & 0x0f),
            ],
        }
    }

    /// A valid photon record. The gap flag is cleared.
    pub fn make_photon(macrotime: u16, adc_value: u16, route: u8, macrotime_overflow: bool) -> Self {
        Self::make_from_fields(false, macrotime_overflow, false, false, adc_value, route, macrotime)
    }

    /// An invalid photon record (no macrotime overflow possible).
    pub fn make_invalid_photon(macrotime: u16, adc_value: u16) -> Self {
        Self::make_from_fields(true, false, false, false, adc_value, 0, macrotime)
    }

    /// A marker record with the given marker bitmask (1 to 15).
    pub fn make_marker(macrotime: u16, marker_bits: u8, macrotime_overflow: bool) -> Self {
        Self::make_from_fields(true, macrotime_overflow, false, true, 0, marker_bits, macrotime)
    }

    /// A marker-0 record carrying an SPC-180 intensity counter value.
    ///
    /// Panics unless bit 0 is set in `marker_bits`.
    pub fn make_marker0_with_intensity_count(
        macrotime: u16,
        marker_bits: u8,
        count: u16,
        macrotime_overflow: bool,
    ) -> Self {
        assert!(
            marker_bits & 0x01 != 0,
            "bit for marker 0 must be set in intensity counter record"
        );
        Self::make_from_fields(true, macrotime_overflow, false, true, count, marker_bits, macrotime)
    }

    /// A multiple-macrotime-overflow record with the given count (1 to
    /// 268,435,455).
    pub fn make_multiple_macrotime_overflow(count: u32) -> Self {
        Self {
            bytes: [
                count as u8,
                (count >> 8) as u8,
                (count >> 16) as u8,
                0b1100_0000 | ((count >> 24) as u8 & 0x0f),
            ],
        }
    }

    /// Set or clear the gap flag, leaving other bits unchanged.
    pub fn with_gap_flag(mut self, gap: bool) -> Self {
        const GAP_BIT: u8 = 0b0010_0000;
        self.bytes[3] = (self.bytes[3] & !GAP_BIT) | if gap { GAP_BIT } else { 0 };
        self
    }
}

impl BhSpcRecordFields for BhSpcRecord {
    const OVERFLOW_PERIOD: u32 = 1 << 12;

    fn adc_value(&self) -> u16 {
        read_u16le(&self.bytes[2..4]) & 0x0fff
    }

    fn routing_signals(&self) -> u8 {
        // The handbook says these bits are "inverted", meaning the TTL
        // inputs are active low; the FIFO data itself is not inverted.
        self.bytes[1] >> 4
    }

    fn macrotime(&self) -> u32 {
        u32::from(read_u16le(&self.bytes[0..2]) & 0x0fff)
    }

    fn marker_flag(&self) -> bool {
        self.flags() & (1 << 4) != 0
    }

    fn marker_bits(&self) -> u8 {
        self.routing_signals()
    }

    fn gap_flag(&self) -> bool {
        self.flags() & (1 << 5) != 0
    }

    fn macrotime_overflow_flag(&self) -> bool {
        self.flags() & (1 << 6) != 0
    }

    fn invalid_flag(&self) -> bool {
        self.flags() & (1 << 7) != 0
    }

    fn is_multiple_macrotime_overflow(&self) -> bool {
        // A marker can share a record with a single macrotime overflow,
        // just as a photon can.
        self.macrotime_overflow_flag() && self.invalid_flag() && !self.marker_flag()
    }

    fn multiple_macrotime_overflow_count(&self) -> u32 {
        read_u32le(&self.bytes) & 0x0fff_ffff
    }
}

/// 48-bit record from SPC-600/630 in 4096-channel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BhSpc600Record4096Ch {
    pub bytes: [u8; 6],
}

impl_raw_record!(BhSpc600Record4096Ch, 6);

impl BhSpc600Record4096Ch {
    fn make_from_fields(mt: u32, route: u8, gap: bool, mtov: bool, invalid: bool, adc: u16) -> Self {
        let flags = (u8::from(gap) << 6) | (u8::from(mtov) << 5) | (u8::from(invalid) << 4);
        Self {
            bytes: [
                adc as u8,
                flags | ((adc >> 8) as u8 & 0x0f),
                (mt >> 16) as u8,
                route,
                mt as u8,
                (mt >> 8) as u8,
            ],
        }
    }

    pub fn make_photon(macrotime: u32, adc_value: u16, route: u8, macrotime_overflow: bool) -> Self {
        Self::make_from_fields(macrotime, route, false, macrotime_overflow, false, adc_value)
    }

    pub fn make_invalid_photon(macrotime: u32, adc_value: u16, macrotime_overflow: bool) -> Self {
        Self::make_from_fields(macrotime, 0, false, macrotime_overflow, true, adc_value)
    }
}

impl BhSpcRecordFields for BhSpc600Record4096Ch {
    const OVERFLOW_PERIOD: u32 = 1 << 24;

    fn adc_value(&self) -> u16 {
        read_u16le(&self.bytes[0..2]) & 0x0fff
    }

    fn routing_signals(&self) -> u8 {
        self.bytes[3]
    }

    fn macrotime(&self) -> u32 {
        u32::from(self.bytes[4]) | (u32::from(self.bytes[5]) << 8) | (u32::from(self.bytes[2]) << 16)
    }

    fn marker_flag(&self) -> bool {
        false
    }

    fn marker_bits(&self) -> u8 {
        0
    }

    fn gap_flag(&self) -> bool {
        self.bytes[1] & (1 << 6) != 0
    }

    fn macrotime_overflow_flag(&self) -> bool {
        self.bytes[1] & (1 << 5) != 0
    }

    fn invalid_flag(&self) -> bool {
        self.bytes[1] & (1 << 4) != 0
    }

    fn is_multiple_macrotime_overflow(&self) -> bool {
        false
    }

    fn multiple_macrotime_overflow_count(&self) -> u32 {
        0
    }
}

/// 32-bit record from SPC-600/630 in 256-channel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BhSpc600Record256Ch {
    pub bytes: [u8; 4],
}

impl_raw_record!(BhSpc600Record256Ch, 4);

impl BhSpc600Record256Ch {
    fn make_from_fields(invalid: bool, mtov: bool, gap: bool, route: u8, mt: u32, adc: u8) -> Self {
        let flags = (u8::from(invalid) << 7) | (u8::from(mtov) << 6) | (u8::from(gap) << 5);
        Self {
            bytes: [
                adc,
                mt as u8,
                (mt >> 8) as u8,
                flags | ((route << 1) & 0b1110) | ((mt >> 16) as u8 & 0x01),
            ],
        }
    }

    pub fn make_photon(macrotime: u32, adc_value: u8, route: u8, macrotime_overflow: bool) -> Self {
        Self::make_from_fields(false, macrotime_overflow, false, route, macrotime, adc_value)
    }

    pub fn make_invalid_photon(macrotime: u32, adc_value: u8) -> Self {
        Self::make_from_fields(true, false, false, 0, macrotime, adc_value)
    }

    pub fn make_multiple_macrotime_overflow(count: u32) -> Self {
        Self {
            bytes: [
                count as u8,
                (count >> 8) as u8,
                (count >> 16) as u8,
                0b1100_0000 | ((count >> 24) as u8 & 0x0f),
            ],
        }
    }
}

impl BhSpcRecordFields for BhSpc600Record256Ch {
    const OVERFLOW_PERIOD: u32 = 1 << 17;

    fn adc_value(&self) -> u16 {
        u16::from(self.bytes[0])
    }

    fn routing_signals(&self) -> u8 {
        (self.bytes[3] & 0x0f) >> 1
    }

    fn macrotime(&self) -> u32 {
        u32::from(self.bytes[1]) | (u32::from(self.bytes[2]) << 8) | (u32::from(self.bytes[3] & 0x01) << 16)
    }

    fn marker_flag(&self) -> bool {
        false
    }

    fn marker_bits(&self) -> u8 {
        0
    }

    fn gap_flag(&self) -> bool {
        self.bytes[3] & (1 << 5) != 0
    }

    fn macrotime_overflow_flag(&self) -> bool {
        self.bytes[3] & (1 << 6) != 0
    }

    fn invalid_flag(&self) -> bool {
        self.bytes[3] & (1 << 7) != 0
    }

    fn is_multiple_macrotime_overflow(&self) -> bool {
        self.macrotime_overflow_flag() && self.invalid_flag()
    }

    fn multiple_macrotime_overflow_count(&self) -> u32 {
        read_u32le(&self.bytes) & 0x0fff_ffff
    }
}

/// Decoder for BH SPC FIFO records, shared across the three layouts.
///
/// Maintains a macrotime overflow accumulator and emits library events;
/// non-record events pass through unchanged, and records are never
/// reordered.
pub struct DecodeBhSpc<R, D> {
    abstime_base: Abstime, // Time of last overflow.
    has_intensity_counter: bool,
    downstream: D,
    _record: std::marker::PhantomData<R>,
}

impl<R: BhSpcRecordFields, D: EventProcessor> DecodeBhSpc<R, D> {
    pub fn new(downstream: D) -> Self {
        Self {
            abstime_base: 0,
            has_intensity_counter: false,
            downstream,
            _record: std::marker::PhantomData,
        }
    }
}

impl<D: EventProcessor> DecodeBhSpc<BhSpcRecord, D> {
    /// Decoder for SPC-160 and SPC-180N that additionally reads the fast
    /// intensity counter carried on marker-0 records, emitting an
    /// `UntaggedCounts` event on channel -1. Other decoders ignore the ADC
    /// field of marker records.
    pub fn with_fast_intensity_counter(downstream: D) -> Self {
        Self {
            abstime_base: 0,
            has_intensity_counter: true,
            downstream,
            _record: std::marker::PhantomData,
        }
    }
}

impl<R: BhSpcRecordFields, D: EventProcessor> Handle<R> for DecodeBhSpc<R, D> {
    fn handle(&mut self, record: R) -> Result {
        if record.is_multiple_macrotime_overflow() {
            self.abstime_base += Abstime::from(R::OVERFLOW_PERIOD)
                * Abstime::from(record.multiple_macrotime_overflow_count());
            if record.gap_flag() {
                self.downstream.handle(Event::DataLost {
                    abstime: self.abstime_base,
                })?;
            }
            return self.downstream.handle(Event::TimeReached {
                abstime: self.abstime_base,
            });
        }

        if record.macrotime_overflow_flag() {
            self.abstime_base += Abstime::from(R::OVERFLOW_PERIOD);
        }
        let abstime = self.abstime_base + Abstime::from(record.macrotime());

        if record.gap_flag() {
            self.downstream.handle(Event::DataLost { abstime })?;
        }

        if !record.marker_flag() {
            if !record.invalid_flag() {
                // Valid photon.
                self.downstream.handle(Event::TimeCorrelatedDetection {
                    abstime,
                    channel: Channel::from(record.routing_signals()),
                    difftime: Difftime::from(record.adc_value()),
                })
            } else {
                // Invalid photon.
                self.downstream.handle(Event::TimeReached { abstime })
            }
        } else if record.invalid_flag() {
            // Marker.
            let bits = u32::from(record.marker_bits());
            if self.has_intensity_counter && bits & 0x01 != 0 {
                self.downstream.handle(Event::UntaggedCounts {
                    abstime,
                    channel: -1,
                    count: u32::from(record.adc_value()),
                })?;
            }
            let mut result = Ok(());
            for_each_set_bit(bits, |b| {
                if result.is_ok() {
                    result = self.downstream.handle(Event::Marker {
                        abstime,
                        channel: b as Channel,
                    });
                }
            });
            result
        } else {
            // INVALID=0 with MARK=1 is not a used combination.
            self.downstream.handle(Event::Warning {
                message: "unexpected BH SPC record flags: marker bit set but invalid bit cleared"
                    .into(),
            })
        }
    }
}

impl<R: BhSpcRecordFields, D: EventProcessor> Handle<Event> for DecodeBhSpc<R, D> {
    fn handle(&mut self, event: Event) -> Result {
        self.downstream.handle(event)
    }
}

impl<R: BhSpcRecordFields, D: EventProcessor> Processor for DecodeBhSpc<R, D> {
    fn flush(&mut self) -> Result {
        self.downstream.flush()
    }

    fn introspect_node(&self) -> NodeInfo {
        NodeInfo::new(self, "decode_bh_spc")
    }

    fn introspect_graph(&self) -> ProcessorGraph {
        let mut g = self.downstream.introspect_graph();
        g.push_entry_point(self);
        g
    }
}
