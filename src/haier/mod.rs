pub mod checksum;
pub mod frame;
pub mod layout;

#[cfg(test)]
pub(crate) mod test_data;

pub use frame::{decode, decode_strict, encode, FrameError, PayloadUpdate, StatusFrame};
pub use layout::{CommandTemplate, FieldOffsets, FrameLayout, Framing, Revision, StatusOffsets};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

// Temperatures the unit accepts as a set point
pub const MIN_SET_TEMPERATURE: i16 = 16;
pub const MAX_SET_TEMPERATURE: i16 = 30;

// Indoor readings outside these bounds are discarded
pub const MIN_VALID_INTERNAL_TEMP: i16 = 10;
pub const MAX_VALID_INTERNAL_TEMP: i16 = 50;

// Raw temperature bytes are offset by this many degrees
pub const TEMPERATURE_BIAS: i16 = 16;

/// Operating mode as reported by the unit, independent of the power flag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    EnumIter,
    AsRefStr,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Cool,
    Heat,
    Dry,
    FanOnly,
}

/// Mode as surfaced to a thermostat UI: `Off` overrides everything when the unit is powered down.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    AsRefStr,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ClimateMode {
    Off,
    Auto,
    Cool,
    Heat,
    Dry,
    FanOnly,
}

impl ClimateMode {
    /// The underlying unit mode, or None for `Off`.
    pub fn mode(self) -> Option<Mode> {
        match self {
            ClimateMode::Off => None,
            ClimateMode::Auto => Some(Mode::Auto),
            ClimateMode::Cool => Some(Mode::Cool),
            ClimateMode::Heat => Some(Mode::Heat),
            ClimateMode::Dry => Some(Mode::Dry),
            ClimateMode::FanOnly => Some(Mode::FanOnly),
        }
    }
}

impl From<Mode> for ClimateMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => ClimateMode::Auto,
            Mode::Cool => ClimateMode::Cool,
            Mode::Heat => ClimateMode::Heat,
            Mode::Dry => ClimateMode::Dry,
            Mode::FanOnly => ClimateMode::FanOnly,
        }
    }
}

// The last known state of the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThermostatState {
    pub power_on: bool,

    pub mode: Mode,

    // Indoor temperature in Celsius, 0 until the first status frame arrives
    pub current_temperature_c: i16,

    // Set point in Celsius, 0 until the first status frame arrives
    pub target_temperature_c: i16,
}

impl ThermostatState {
    pub fn climate_mode(&self) -> ClimateMode {
        if self.power_on {
            self.mode.into()
        } else {
            ClimateMode::Off
        }
    }
}

impl From<&StatusFrame> for ThermostatState {
    fn from(frame: &StatusFrame) -> Self {
        ThermostatState {
            power_on: frame.power_on,
            mode: frame.mode,
            current_temperature_c: frame.current_temperature_c,
            target_temperature_c: frame.target_temperature_c,
        }
    }
}

pub fn is_valid_set_point(value_c: i16) -> bool {
    (MIN_SET_TEMPERATURE..=MAX_SET_TEMPERATURE).contains(&value_c)
}
