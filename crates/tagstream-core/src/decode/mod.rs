//! Device record formats and their decoders.
//!
//! A decoder consumes raw 32-bit, 48-bit, or 128-bit records and emits
//! library events. Every decoder maintains an abstime accumulator for
//! overflow correction and delegates bit-field interpretation to the
//! record types. Decoders pass non-record events through unchanged and
//! never reorder records.

pub mod bh_spc;
pub mod picoquant_t2;
pub mod picoquant_t3;
pub mod records;
pub mod swabian;

pub use bh_spc::{
    BhSpc600Record256Ch, BhSpc600Record4096Ch, BhSpcRecord, BhSpcRecordFields, DecodeBhSpc,
};
pub use picoquant_t2::{
    BasicPqT2Record, DecodePqT2, GenericT2Record, HydraV1T2Record, PicoHarpT2Record,
    PqT2RecordFields,
};
pub use picoquant_t3::{
    BasicPqT3Record, DecodePqT3, GenericT3Record, HydraV1T3Record, PicoHarpT3Record,
    PqT3RecordFields,
};
pub use records::RawRecord;
pub use swabian::{DecodeSwabianTags, SwabianTagKind, SwabianTagRecord};
