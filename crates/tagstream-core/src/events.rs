//! Event types exchanged between pipeline processors.
//!
//! The pipeline is a single-pass dataflow of small, strongly-typed records.
//! All library processors exchange the [`Event`] enum; device decoders
//! additionally consume raw record types (see [`crate::decode`]).
//!
//! Within one input edge events flow in order, and `abstime` is
//! non-decreasing unless a processor explicitly tolerates or corrects
//! disorder (see [`crate::recover_order`]).

use std::fmt;

use crate::autocopy::AutocopySpan;

/// Absolute time (a.k.a. macrotime) in hardware-native units.
///
/// Picoseconds for Swabian time taggers; device-specific macrotime clock
/// steps for Becker & Hickl and PicoQuant hardware.
pub type Abstime = i64;

/// Detection or marker channel number.
///
/// Negative values are used for software-assigned channels (for example,
/// sync events decoded from PicoQuant T2 streams appear on channel -1).
pub type Channel = i32;

/// Difference time (a.k.a. microtime, nanotime) relative to a reference
/// event, typically a laser sync pulse.
pub type Difftime = i32;

/// Value mapped from an event for histogramming.
pub type Datapoint = i32;

/// Histogram bin index.
pub type BinIndex = u16;

/// Histogram bin value (count).
pub type BinValue = u16;

/// A single detection, used standalone and as the halves of a
/// [`Event::DetectionPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub abstime: Abstime,
    pub channel: Channel,
}

/// A pipeline event.
///
/// This is the variant form used wherever a buffered queue must hold any
/// event (merge, buffer) and is the common currency of all non-decoder
/// processors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Liveness marker: the stream has reached this abstime, with no other
    /// data. Sources emit this so downstream branches are never devoid of
    /// events for long stretches of abstime; see
    /// [`crate::regulate::RegulateTimeReached`].
    TimeReached { abstime: Abstime },
    /// A single detected count.
    Detection { abstime: Abstime, channel: Channel },
    /// A detection carrying a difference time to a reference.
    TimeCorrelatedDetection {
        abstime: Abstime,
        channel: Channel,
        difftime: Difftime,
    },
    /// An external timing marker (frame, line, pixel clock, ...).
    Marker { abstime: Abstime, channel: Channel },
    /// Data was lost due to device buffer overflow. The abstime may have
    /// skipped elapsed time.
    DataLost { abstime: Abstime },
    /// Beginning of an interval in which counts were lost. Unlike
    /// `DataLost`, abstime stays consistent across the interval.
    BeginLostInterval { abstime: Abstime },
    /// End of a lost interval; preceded by a matching `BeginLostInterval`.
    EndLostInterval { abstime: Abstime },
    /// Counts detected but not time-tagged during a lost interval.
    LostCounts {
        abstime: Abstime,
        channel: Channel,
        count: u32,
    },
    /// Aggregated counts from a device or mode that does not time-tag
    /// individual detections.
    UntaggedCounts {
        abstime: Abstime,
        channel: Channel,
        count: u32,
    },
    /// Two detections paired by a pairing processor. Carries no abstime of
    /// its own; the pair's temporal ordering is defined by its producer.
    DetectionPair { first: Detection, second: Detection },
    /// Non-fatal condition surfaced in-band so downstream policy can decide.
    Warning { message: String },
    /// A datapoint extracted for histogramming.
    Datapoint { abstime: Abstime, value: Datapoint },
    /// A datapoint mapped to a histogram bin.
    BinIncrement { abstime: Abstime, bin_index: BinIndex },
    /// Bin increments collected between a start and a stop event. A batch
    /// may be partially applied under saturation.
    BinIncrementBatch { bin_indices: AutocopySpan<BinIndex> },
    /// Bin increments collected between a start and a stop event, applied
    /// atomically.
    BinIncrementCluster { bin_indices: AutocopySpan<BinIndex> },
    /// Snapshot of a histogram after an update.
    Histogram { bins: AutocopySpan<BinValue> },
    /// Final state of a histogram, emitted before a reset or at end of
    /// stream.
    ConcludingHistogram { bins: AutocopySpan<BinValue> },
    /// One element's histogram within a histogram-array scan.
    ElementHistogram { bins: AutocopySpan<BinValue> },
    /// A whole histogram array at the end of a scan cycle.
    HistogramArray { bins: AutocopySpan<BinValue> },
    /// Final state of a histogram array, emitted before a reset or at end
    /// of stream.
    ConcludingHistogramArray { bins: AutocopySpan<BinValue> },
}

/// Field-less mirror of [`Event`], used to configure processors that act on
/// sets of event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventKind {
    TimeReached,
    Detection,
    TimeCorrelatedDetection,
    Marker,
    DataLost,
    BeginLostInterval,
    EndLostInterval,
    LostCounts,
    UntaggedCounts,
    DetectionPair,
    Warning,
    Datapoint,
    BinIncrement,
    BinIncrementBatch,
    BinIncrementCluster,
    Histogram,
    ConcludingHistogram,
    ElementHistogram,
    HistogramArray,
    ConcludingHistogramArray,
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TimeReached { .. } => EventKind::TimeReached,
            Event::Detection { .. } => EventKind::Detection,
            Event::TimeCorrelatedDetection { .. } => EventKind::TimeCorrelatedDetection,
            Event::Marker { .. } => EventKind::Marker,
            Event::DataLost { .. } => EventKind::DataLost,
            Event::BeginLostInterval { .. } => EventKind::BeginLostInterval,
            Event::EndLostInterval { .. } => EventKind::EndLostInterval,
            Event::LostCounts { .. } => EventKind::LostCounts,
            Event::UntaggedCounts { .. } => EventKind::UntaggedCounts,
            Event::DetectionPair { .. } => EventKind::DetectionPair,
            Event::Warning { .. } => EventKind::Warning,
            Event::Datapoint { .. } => EventKind::Datapoint,
            Event::BinIncrement { .. } => EventKind::BinIncrement,
            Event::BinIncrementBatch { .. } => EventKind::BinIncrementBatch,
            Event::BinIncrementCluster { .. } => EventKind::BinIncrementCluster,
            Event::Histogram { .. } => EventKind::Histogram,
            Event::ConcludingHistogram { .. } => EventKind::ConcludingHistogram,
            Event::ElementHistogram { .. } => EventKind::ElementHistogram,
            Event::HistogramArray { .. } => EventKind::HistogramArray,
            Event::ConcludingHistogramArray { .. } => EventKind::ConcludingHistogramArray,
        }
    }

    /// The abstime of this event, if it carries one.
    ///
    /// Detection pairs, warnings, and the batch/cluster/histogram family
    /// carry no abstime of their own.
    pub fn abstime(&self) -> Option<Abstime> {
        match *self {
            Event::TimeReached { abstime }
            | Event::Detection { abstime, .. }
            | Event::TimeCorrelatedDetection { abstime, .. }
            | Event::Marker { abstime, .. }
            | Event::DataLost { abstime }
            | Event::BeginLostInterval { abstime }
            | Event::EndLostInterval { abstime }
            | Event::LostCounts { abstime, .. }
            | Event::UntaggedCounts { abstime, .. }
            | Event::Datapoint { abstime, .. }
            | Event::BinIncrement { abstime, .. } => Some(abstime),
            _ => None,
        }
    }

    /// The channel of this event, if it carries one.
    pub fn channel(&self) -> Option<Channel> {
        match *self {
            Event::Detection { channel, .. }
            | Event::TimeCorrelatedDetection { channel, .. }
            | Event::Marker { channel, .. }
            | Event::LostCounts { channel, .. }
            | Event::UntaggedCounts { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Shift the abstime of this event by `delta`, if it carries one.
    pub fn shift_abstime(&mut self, delta: Abstime) {
        match self {
            Event::TimeReached { abstime }
            | Event::Detection { abstime, .. }
            | Event::TimeCorrelatedDetection { abstime, .. }
            | Event::Marker { abstime, .. }
            | Event::DataLost { abstime }
            | Event::BeginLostInterval { abstime }
            | Event::EndLostInterval { abstime }
            | Event::LostCounts { abstime, .. }
            | Event::UntaggedCounts { abstime, .. }
            | Event::Datapoint { abstime, .. }
            | Event::BinIncrement { abstime, .. } => *abstime += delta,
            _ => {}
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::TimeReached { abstime } => write!(f, "time_reached({abstime})"),
            Event::Detection { abstime, channel } => write!(f, "detection({abstime}, {channel})"),
            Event::TimeCorrelatedDetection {
                abstime,
                channel,
                difftime,
            } => write!(
                f,
                "time_correlated_detection({abstime}, {channel}, {difftime})"
            ),
            Event::Marker { abstime, channel } => write!(f, "marker({abstime}, {channel})"),
            Event::DataLost { abstime } => write!(f, "data_lost({abstime})"),
            Event::BeginLostInterval { abstime } => write!(f, "begin_lost_interval({abstime})"),
            Event::EndLostInterval { abstime } => write!(f, "end_lost_interval({abstime})"),
            Event::LostCounts {
                abstime,
                channel,
                count,
            } => write!(f, "lost_counts({abstime}, {channel}, {count})"),
            Event::UntaggedCounts {
                abstime,
                channel,
                count,
            } => write!(f, "untagged_counts({abstime}, {channel}, {count})"),
            Event::DetectionPair { first, second } => write!(
                f,
                "detection_pair(detection({}, {}), detection({}, {}))",
                first.abstime, first.channel, second.abstime, second.channel
            ),
            Event::Warning { message } => write!(f, "warning({message})"),
            Event::Datapoint { abstime, value } => write!(f, "datapoint({abstime}, {value})"),
            Event::BinIncrement { abstime, bin_index } => {
                write!(f, "bin_increment({abstime}, {bin_index})")
            }
            Event::BinIncrementBatch { bin_indices } => {
                write!(f, "bin_increment_batch(len={})", bin_indices.len())
            }
            Event::BinIncrementCluster { bin_indices } => {
                write!(f, "bin_increment_cluster(len={})", bin_indices.len())
            }
            Event::Histogram { bins } => write!(f, "histogram(len={})", bins.len()),
            Event::ConcludingHistogram { bins } => {
                write!(f, "concluding_histogram(len={})", bins.len())
            }
            Event::ElementHistogram { bins } => write!(f, "element_histogram(len={})", bins.len()),
            Event::HistogramArray { bins } => write!(f, "histogram_array(len={})", bins.len()),
            Event::ConcludingHistogramArray { bins } => {
                write!(f, "concluding_histogram_array(len={})", bins.len())
            }
        }
    }
}

/// A set of [`EventKind`]s, used where a processor is configured over a set
/// of event types (selection, gating, routing, stop sets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventKindSet(u32);

impl EventKindSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// The set of all event kinds.
    pub const ALL: Self = Self((1 << 20) - 1);

    /// Build a set from a list of kinds.
    pub const fn of(kinds: &[EventKind]) -> Self {
        let mut bits = 0u32;
        let mut i = 0;
        while i < kinds.len() {
            bits |= 1 << (kinds[i] as u32);
            i += 1;
        }
        Self(bits)
    }

    /// Whether `kind` is a member of this set.
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & (1 << (kind as u32)) != 0
    }

    /// This set with `kind` added.
    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | (1 << (kind as u32)))
    }

    /// Union of two sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Complement of this set.
    pub const fn complement(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let e = Event::Detection {
            abstime: 42,
            channel: 3,
        };
        assert_eq!(e.kind(), EventKind::Detection);
        assert_eq!(e.abstime(), Some(42));
        assert_eq!(e.channel(), Some(3));
    }

    #[test]
    fn pair_has_no_abstime() {
        let e = Event::DetectionPair {
            first: Detection {
                abstime: 1,
                channel: 0,
            },
            second: Detection {
                abstime: 2,
                channel: 1,
            },
        };
        assert_eq!(e.abstime(), None);
    }

    #[test]
    fn kind_set_membership() {
        let set = EventKindSet::of(&[EventKind::Detection, EventKind::Marker]);
        assert!(set.contains(EventKind::Detection));
        assert!(set.contains(EventKind::Marker));
        assert!(!set.contains(EventKind::TimeReached));
        assert!(set.complement().contains(EventKind::TimeReached));
        assert!(!set.complement().contains(EventKind::Marker));
    }

    #[test]
    fn kind_set_all_contains_everything() {
        assert!(EventKindSet::ALL.contains(EventKind::ConcludingHistogramArray));
        assert!(EventKindSet::ALL.contains(EventKind::TimeReached));
        assert!(EventKindSet::EMPTY.is_empty());
    }

    #[test]
    fn shift_abstime_skips_untimed_events() {
        let mut e = Event::Warning {
            message: "w".into(),
        };
        e.shift_abstime(100);
        assert_eq!(e.abstime(), None);

        let mut e = Event::Marker {
            abstime: 5,
            channel: 0,
        };
        e.shift_abstime(100);
        assert_eq!(e.abstime(), Some(105));
    }

    #[test]
    fn display_formats() {
        let e = Event::TimeReached { abstime: 7 };
        assert_eq!(e.to_string(), "time_reached(7)");
        let e = Event::TimeCorrelatedDetection {
            abstime: 1,
            channel: 2,
            difftime: 3,
        };
        assert_eq!(e.to_string(), "time_correlated_detection(1, 2, 3)");
    }
}
