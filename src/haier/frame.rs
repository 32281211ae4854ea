use bytes::{Bytes, BytesMut};
use hexplay::HexViewBuilder;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::checksum;
use super::layout::{
    CommandTemplate, FrameLayout, Framing, CTR_POWER_OFF, CTR_POWER_ON, LENGTH_OFFSET, POWER_OFF,
    SYNC,
};
use super::{
    is_valid_set_point, Mode, MAX_SET_TEMPERATURE, MAX_VALID_INTERNAL_TEMP, MIN_SET_TEMPERATURE,
    MIN_VALID_INTERNAL_TEMP, TEMPERATURE_BIAS,
};

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid sync bytes: {found:02x?}")]
    Framing { found: [u8; 2] },

    #[error("truncated frame: got {len} bytes, need {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("{field} out of range: {value}C")]
    OutOfRange { field: &'static str, value: i16 },

    #[error("checksum mismatch: frame carries {expected:#04x}, computed {computed:#04x}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("mode {0} has no code in this protocol revision")]
    UnsupportedMode(Mode),

    #[error("the {template} command has no {field} field")]
    MissingField {
        template: &'static str,
        field: &'static str,
    },
}

/// A status frame decoded from the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusFrame {
    pub power_on: bool,
    pub mode: Mode,
    pub current_temperature_c: i16,
    pub target_temperature_c: i16,

    // False when the additive checksum or the CRC didn't match
    pub checksum_valid: bool,
}

/// Payload changes applied to a command template before it is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadUpdate {
    pub power: Option<bool>,
    pub target_temperature_c: Option<i16>,
    pub mode: Option<Mode>,
}

/// Outcome of checking the checksum fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub offset: usize,
    pub expected: u8,
    pub computed: u8,
    pub crc_valid: bool,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        self.expected == self.computed && self.crc_valid
    }
}

/// Checks the additive checksum, and the CRC-16 when the layout has one.
pub fn verify(layout: &FrameLayout, buf: &[u8]) -> Result<Verification, FrameError> {
    let offset = layout.checksum_offset(buf).ok_or(FrameError::Truncated {
        len: buf.len(),
        needed: LENGTH_OFFSET + 1 + layout.trailer_len(),
    })?;

    let scope = &buf[LENGTH_OFFSET..offset];
    let crc_valid = !layout.crc16
        || checksum::crc16(scope) == u16::from_be_bytes([buf[offset + 1], buf[offset + 2]]);

    Ok(Verification {
        offset,
        expected: buf[offset],
        computed: checksum::additive(scope),
        crc_valid,
    })
}

/// Recomputes the checksum fields of `buf` in place.
pub fn seal(layout: &FrameLayout, buf: &mut [u8]) -> Result<(), FrameError> {
    let offset = layout.checksum_offset(buf).ok_or(FrameError::Truncated {
        len: buf.len(),
        needed: LENGTH_OFFSET + 1 + layout.trailer_len(),
    })?;

    buf[offset] = checksum::additive(&buf[LENGTH_OFFSET..offset]);
    if layout.crc16 {
        let crc = checksum::crc16(&buf[LENGTH_OFFSET..offset]);
        buf[offset + 1..offset + 3].copy_from_slice(&crc.to_be_bytes());
    }
    Ok(())
}

fn temperature(raw: u8) -> i16 {
    // Raw values are signed, anything below 16C wraps
    raw as i8 as i16 + TEMPERATURE_BIAS
}

/// Temperature carried by an encoded command, if the template has a temperature field.
pub fn command_temperature(template: &CommandTemplate, frame: &[u8]) -> Option<i16> {
    let at = template.fields.temperature?;
    frame.get(at).map(|&raw| temperature(raw))
}

fn check_range(field: &'static str, value: i16, min: i16, max: i16) -> Result<i16, FrameError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(FrameError::OutOfRange { field, value })
    }
}

/// Decodes one synchronized status frame.
///
/// A checksum mismatch is not an error here: the frame is returned with
/// `checksum_valid = false` and the caller applies its own policy.
pub fn decode(layout: &FrameLayout, raw: &[u8]) -> Result<StatusFrame, FrameError> {
    decode_with(layout, raw, false)
}

/// Like [`decode`], but a checksum mismatch rejects the frame.
pub fn decode_strict(layout: &FrameLayout, raw: &[u8]) -> Result<StatusFrame, FrameError> {
    decode_with(layout, raw, true)
}

fn decode_with(layout: &FrameLayout, raw: &[u8], strict: bool) -> Result<StatusFrame, FrameError> {
    if raw.len() < SYNC.len() {
        return Err(FrameError::Truncated {
            len: raw.len(),
            needed: SYNC.len(),
        });
    }
    if raw[..2] != SYNC {
        return Err(FrameError::Framing {
            found: [raw[0], raw[1]],
        });
    }

    let buf = match layout.framing {
        Framing::Fixed { len } => raw.get(..len).ok_or(FrameError::Truncated {
            len: raw.len(),
            needed: len,
        })?,
        Framing::LengthPrefixed => raw,
    };

    let needed = layout.status.end();
    if buf.len() < needed {
        return Err(FrameError::Truncated {
            len: buf.len(),
            needed,
        });
    }

    trace!("status frame:\n{}", HexViewBuilder::new(buf).finish());

    let verification = verify(layout, buf)?;

    // Every field must sit before the checksum the frame declares
    if verification.offset < needed {
        return Err(FrameError::Truncated {
            len: verification.offset + layout.trailer_len(),
            needed: needed + layout.trailer_len(),
        });
    }

    if !verification.is_valid() {
        warn!(
            expected = verification.expected,
            computed = verification.computed,
            crc_valid = verification.crc_valid,
            frame = %hex::encode(buf),
            "invalid checksum"
        );
        if strict {
            return Err(FrameError::ChecksumMismatch {
                expected: verification.expected,
                computed: verification.computed,
            });
        }
    }

    let offsets = &layout.status;
    let current_temperature_c = check_range(
        "current temperature",
        temperature(buf[offsets.current_temperature]),
        MIN_VALID_INTERNAL_TEMP,
        MAX_VALID_INTERNAL_TEMP,
    )?;
    let target_temperature_c = check_range(
        "target temperature",
        temperature(buf[offsets.target_temperature]),
        MIN_SET_TEMPERATURE,
        MAX_SET_TEMPERATURE,
    )?;

    Ok(StatusFrame {
        power_on: buf[offsets.power] != POWER_OFF,
        mode: layout.mode_from_code(buf[offsets.mode]),
        current_temperature_c,
        target_temperature_c,
        checksum_valid: verification.is_valid(),
    })
}

/// Builds a command from a working copy of `template`. The template itself is never modified.
pub fn encode(
    layout: &FrameLayout,
    template: &CommandTemplate,
    update: &PayloadUpdate,
) -> Result<Bytes, FrameError> {
    let missing = |field| FrameError::MissingField {
        template: template.name,
        field,
    };

    let mut buf = BytesMut::from(template.bytes);

    if let Some(power) = update.power {
        let at = template.fields.power.ok_or_else(|| missing("power"))?;
        buf[at] = if power { CTR_POWER_ON } else { CTR_POWER_OFF };
    }

    if let Some(target) = update.target_temperature_c {
        let at = template
            .fields
            .temperature
            .ok_or_else(|| missing("temperature"))?;
        if !is_valid_set_point(target) {
            return Err(FrameError::OutOfRange {
                field: "target temperature",
                value: target,
            });
        }
        buf[at] = (target - TEMPERATURE_BIAS) as u8;
    }

    if let Some(mode) = update.mode {
        let at = template.fields.mode.ok_or_else(|| missing("mode"))?;
        buf[at] = layout
            .mode_code(mode)
            .ok_or(FrameError::UnsupportedMode(mode))?;
    }

    seal(layout, &mut buf)?;
    debug!(command = template.name, frame = %hex::encode(&buf), "encoded command");

    Ok(buf.freeze())
}
