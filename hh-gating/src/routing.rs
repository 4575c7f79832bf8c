//! Input routing for concentration-dependent channels.
//!
//! A channel receives up to three external scalars per tick: the membrane
//! voltage and two pool concentrations. Which of them feed a gate's rate
//! function, and in which argument position, is a per-slot channel property
//! named by one of six recognised index strings. The mapping is fixed:
//!
//! | Name            | first input | second input |
//! |-----------------|-------------|--------------|
//! | `VOLT_INDEX`    | voltage     | none         |
//! | `C1_INDEX`      | conc 1      | none         |
//! | `C2_INDEX`      | conc 2      | none         |
//! | `VOLT_C1_INDEX` | voltage     | conc 1       |
//! | `VOLT_C2_INDEX` | voltage     | conc 2       |
//! | `C1_C2_INDEX`   | conc 1      | conc 2       |
//!
//! A single-input index on a one-dimensional slot selects which external
//! scalar drives that gate, so a calcium-gated one-dimensional gate is just
//! a slot routed with `C1_INDEX`.

use crate::error::GatingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the external scalars a channel receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    /// Membrane voltage.
    Volt,
    /// First concentration input.
    C1,
    /// Second concentration input.
    C2,
}

/// Recognised input-index names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputIndex {
    #[default]
    Volt,
    C1,
    C2,
    VoltC1,
    VoltC2,
    C1C2,
}

impl InputIndex {
    /// The `(first, second)` input pair this index routes to a gate.
    pub const fn dims(self) -> (InputSource, Option<InputSource>) {
        match self {
            InputIndex::Volt => (InputSource::Volt, None),
            InputIndex::C1 => (InputSource::C1, None),
            InputIndex::C2 => (InputSource::C2, None),
            InputIndex::VoltC1 => (InputSource::Volt, Some(InputSource::C1)),
            InputIndex::VoltC2 => (InputSource::Volt, Some(InputSource::C2)),
            InputIndex::C1C2 => (InputSource::C1, Some(InputSource::C2)),
        }
    }

    /// The canonical name.
    pub const fn name(self) -> &'static str {
        match self {
            InputIndex::Volt => "VOLT_INDEX",
            InputIndex::C1 => "C1_INDEX",
            InputIndex::C2 => "C2_INDEX",
            InputIndex::VoltC1 => "VOLT_C1_INDEX",
            InputIndex::VoltC2 => "VOLT_C2_INDEX",
            InputIndex::C1C2 => "C1_C2_INDEX",
        }
    }
}

impl fmt::Display for InputIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InputIndex {
    type Err = GatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VOLT_INDEX" => Ok(InputIndex::Volt),
            "C1_INDEX" => Ok(InputIndex::C1),
            "C2_INDEX" => Ok(InputIndex::C2),
            "VOLT_C1_INDEX" => Ok(InputIndex::VoltC1),
            "VOLT_C2_INDEX" => Ok(InputIndex::VoltC2),
            "C1_C2_INDEX" => Ok(InputIndex::C1C2),
            other => Err(GatingError::UnknownInputIndex(other.to_string())),
        }
    }
}
