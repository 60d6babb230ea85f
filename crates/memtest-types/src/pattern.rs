//! Pattern kinds and the fixed per-region battery.

use serde::Serialize;

/// How the expected byte at each offset of a pass is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PatternKind {
    /// The same byte at every offset.
    Constant(u8),
    /// `global_offset mod 256`, continuous across region boundaries.
    Incrementing,
    /// Bytes drawn from a pseudo-random source at write time and recorded
    /// into a trace for verification.
    Random,
}

/// One pass of the battery: a pattern kind plus its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub name: &'static str,
}

impl PatternSpec {
    #[must_use]
    pub const fn constant(value: u8, name: &'static str) -> Self {
        Self {
            kind: PatternKind::Constant(value),
            name,
        }
    }

    #[must_use]
    pub const fn incrementing() -> Self {
        Self {
            kind: PatternKind::Incrementing,
            name: "Incrementing",
        }
    }

    #[must_use]
    pub const fn random() -> Self {
        Self {
            kind: PatternKind::Random,
            name: "Random",
        }
    }

    /// Whether the expected value can be recomputed from the offset alone.
    #[must_use]
    pub const fn is_formulaic(&self) -> bool {
        !matches!(self.kind, PatternKind::Random)
    }
}

/// The fixed, ordered battery run over every region on every iteration.
///
/// The four constants cover alternating bits in both phases plus all-ones and
/// all-zeros; `Incrementing` catches address-dependent faults; `Random`
/// breaks up any regularity the others share.
pub const BATTERY: [PatternSpec; 6] = [
    PatternSpec::constant(0xAA, "0xAA"),
    PatternSpec::constant(0x55, "0x55"),
    PatternSpec::constant(0xFF, "0xFF"),
    PatternSpec::constant(0x00, "0x00"),
    PatternSpec::incrementing(),
    PatternSpec::random(),
];
