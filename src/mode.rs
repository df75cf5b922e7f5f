//! This module contains the types naming instrument operating modes.
//!
//! A load is always in exactly one [`OverallMode`]. Some overall modes additionally
//! regulate a [`ConstMode`] quantity, and the Dynamic mode further splits into a
//! [`SubMode`] waveform.

use core::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// The top-level operating mode of the instrument.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize, Deserialize,
)]
pub enum OverallMode {
    /// Static constant voltage/current/power/resistance load.
    Basic,
    /// Transient mode switching between an A and a B level.
    Dynamic,
    /// LED emulation. The instrument reports this as a Basic mode.
    #[strum(to_string = "LED")]
    Led,
    /// Battery discharge test.
    Battery,
    /// Stepped list sequence.
    List,
    /// Stepped pass/fail program.
    Program,
    /// Over-current protection test.
    #[strum(to_string = "OCP test")]
    Ocpt,
    /// Over-power protection test.
    #[strum(to_string = "OPP test")]
    Oppt,
}

/// The regulated quantity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ConstMode {
    #[strum(to_string = "VOLTAGE", serialize = "VOLT")]
    Voltage,
    #[strum(to_string = "CURRENT", serialize = "CURR")]
    Current,
    #[strum(to_string = "POWER", serialize = "POW")]
    Power,
    #[strum(to_string = "RESISTANCE", serialize = "RES")]
    Resistance,
}

impl ConstMode {
    /// The SCPI keyword for this mode, also used as the command prefix of its registers.
    pub fn scpi_name(self) -> &'static str {
        self.into()
    }

    /// Parse a device reply such as `CURRent` or `VOLT`.
    pub fn from_reply(reply: &str) -> Option<Self> {
        reply.trim().parse().ok()
    }
}

/// Waveform of the Dynamic (transient) mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SubMode {
    #[strum(to_string = "CONTINUOUS", serialize = "CONT")]
    Continuous,
    #[strum(to_string = "PULSE", serialize = "PULS")]
    Pulse,
    #[strum(to_string = "TOGGLE", serialize = "TOGG")]
    Toggle,
}

impl SubMode {
    pub fn scpi_name(self) -> &'static str {
        self.into()
    }

    pub fn from_reply(reply: &str) -> Option<Self> {
        reply.trim().parse().ok()
    }
}

/// Identifies one combination of overall, constant and sub mode.
///
/// Used both as the key of a [`ModeDescriptor`](crate::table::ModeDescriptor) and as the
/// derived [`ActiveMode`] of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModeKey {
    pub overall: OverallMode,
    pub constant: Option<ConstMode>,
    pub sub: Option<SubMode>,
}

impl ModeKey {
    pub const fn new(overall: OverallMode, constant: Option<ConstMode>, sub: Option<SubMode>) -> Self {
        Self {
            overall,
            constant,
            sub,
        }
    }

    /// A mode without constant or sub mode, e.g. LED.
    pub const fn bare(overall: OverallMode) -> Self {
        Self::new(overall, None, None)
    }

    /// A mode with a constant mode but no sub mode, e.g. Basic CV.
    pub const fn constant(overall: OverallMode, constant: ConstMode) -> Self {
        Self::new(overall, Some(constant), None)
    }

    /// A Dynamic mode.
    pub const fn dynamic(constant: ConstMode, sub: SubMode) -> Self {
        Self::new(OverallMode::Dynamic, Some(constant), Some(sub))
    }
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.overall)?;
        if let Some(constant) = self.constant {
            write!(f, ", {:?}", constant)?;
        }
        if let Some(sub) = self.sub {
            write!(f, ", {:?}", sub)?;
        }
        write!(f, ")")
    }
}

/// The mode the instrument is currently in, as derived from its status registers.
pub type ActiveMode = ModeKey;

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn const_mode_parses_long_and_short_forms() {
        assert_eq!(ConstMode::from_reply("CURRENT"), Some(ConstMode::Current));
        assert_eq!(ConstMode::from_reply("volt\n"), Some(ConstMode::Voltage));
        assert_eq!(ConstMode::from_reply("LED"), None);
    }

    #[test]
    fn scpi_names_round_trip() {
        for mode in ConstMode::iter() {
            assert_eq!(ConstMode::from_reply(mode.scpi_name()), Some(mode));
        }
        for mode in SubMode::iter() {
            assert_eq!(SubMode::from_reply(mode.scpi_name()), Some(mode));
        }
    }

    #[test]
    fn mode_key_display() {
        let key = ModeKey::dynamic(ConstMode::Current, SubMode::Pulse);
        assert_eq!(key.to_string(), "(Dynamic, Current, Pulse)");
        assert_eq!(ModeKey::bare(OverallMode::Ocpt).to_string(), "(OCP test)");
    }
}
