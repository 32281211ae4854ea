//! Per-revision description of the Haier serial frames.
//!
//! Two generations of the protocol are in the field. Revision A units send a fixed
//! 47-byte status frame whose last byte is an additive checksum. Revision B frames are
//! self-describing: byte 2 holds the length, the checksum sits at `2 + length` and is
//! followed by a big-endian CRC-16. Everything that differs between the two lives in a
//! [`FrameLayout`], so the codec itself has a single code path.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use super::Mode;

pub const SYNC: [u8; 2] = [0xFF, 0xFF];

// Offset of the length byte in every frame
pub const LENGTH_OFFSET: usize = 2;

// Power flag values in status frames
pub const POWER_ON: u8 = 3;
pub const POWER_OFF: u8 = 2;

// Power flag values in the power command
pub const CTR_POWER_ON: u8 = 0x01;
pub const CTR_POWER_OFF: u8 = 0x00;

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
pub enum Revision {
    /// Fixed-size frames, additive checksum only
    A,
    /// Length-prefixed frames, additive checksum plus CRC-16
    B,
}

impl Revision {
    pub fn layout(self) -> &'static FrameLayout {
        match self {
            Revision::A => &REVISION_A,
            Revision::B => &REVISION_B,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Every status frame is exactly `len` bytes and the checksum is the last byte
    Fixed { len: usize },
    /// Byte 2 declares the checksum position as `2 + length`
    LengthPrefixed,
}

/// Where the thermostat fields sit in a status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOffsets {
    pub power: usize,
    pub mode: usize,
    pub current_temperature: usize,
    pub target_temperature: usize,
}

impl StatusOffsets {
    /// Minimum number of bytes a frame needs to hold every field.
    pub fn end(&self) -> usize {
        [
            self.power,
            self.mode,
            self.current_temperature,
            self.target_temperature,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// Payload positions in a command template. `None` means the command doesn't carry the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldOffsets {
    pub power: Option<usize>,
    pub temperature: Option<usize>,
    pub mode: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub name: &'static str,
    pub bytes: &'static [u8],
    pub fields: FieldOffsets,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub revision: Revision,
    pub framing: Framing,
    pub crc16: bool,

    // Frames with a bad checksum are never applied
    pub strict_checksum: bool,

    // Firmware drops commands sent right after power-on
    pub settle_after_power_on: bool,

    pub status: StatusOffsets,

    // Code <-> mode table, first match wins when encoding
    pub mode_codes: &'static [(u8, Mode)],

    // Sent verbatim, checksum is precomputed
    pub poll: &'static [u8],
    pub power: CommandTemplate,
    pub set_point: CommandTemplate,
}

impl FrameLayout {
    /// Number of bytes following the additive checksum.
    pub fn crc_len(&self) -> usize {
        if self.crc16 {
            2
        } else {
            0
        }
    }

    /// Bytes taken by the checksum and the optional CRC.
    pub fn trailer_len(&self) -> usize {
        1 + self.crc_len()
    }

    /// Total size of a frame given its length byte.
    pub fn frame_len(&self, length_field: u8) -> usize {
        match self.framing {
            Framing::Fixed { len } => len,
            Framing::LengthPrefixed => LENGTH_OFFSET + length_field as usize + self.trailer_len(),
        }
    }

    /// Position of the additive checksum in `buf`. The checksum scope is `[2, offset)`.
    ///
    /// For length-prefixed frames the declared position is used when it fits in the
    /// buffer, otherwise the checksum is assumed to be the last byte before the CRC.
    pub fn checksum_offset(&self, buf: &[u8]) -> Option<usize> {
        let trailing = buf
            .len()
            .checked_sub(self.trailer_len())
            .filter(|&o| o > LENGTH_OFFSET)?;

        match self.framing {
            Framing::Fixed { .. } => Some(trailing),
            Framing::LengthPrefixed => {
                let declared = LENGTH_OFFSET + buf[LENGTH_OFFSET] as usize;
                if declared > LENGTH_OFFSET && declared <= trailing {
                    Some(declared)
                } else {
                    Some(trailing)
                }
            }
        }
    }

    pub fn mode_code(&self, mode: Mode) -> Option<u8> {
        self.mode_codes
            .iter()
            .find(|(_, m)| *m == mode)
            .map(|(code, _)| *code)
    }

    /// Maps a raw mode byte, falling back to `Auto` for anything unknown.
    pub fn mode_from_code(&self, code: u8) -> Mode {
        self.mode_codes
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, mode)| *mode)
            .unwrap_or(Mode::Auto)
    }
}

const POLL: [u8; 15] = [
    0xFF, 0xFF, 0x0A, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x4D, 0x01, 0x99, 0xB3, 0xB4,
];

const POWER_FIELDS: FieldOffsets = FieldOffsets {
    power: Some(13),
    temperature: None,
    mode: None,
};

const SET_POINT_FIELDS: FieldOffsets = FieldOffsets {
    power: None,
    temperature: Some(12),
    mode: Some(13),
};

// Revision A overwrites the last byte of the power command with the checksum
const POWER_A: [u8; 17] = [
    0xFF, 0xFF, 0x0C, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x5D, 0x01, 0x00, 0x01, 0xAC,
    0xBD, 0x15,
];

// Same bytes as revision B, the checksum lands in the last byte instead of the CRC
const SET_POINT_A: [u8; 25] = [
    0xFF, 0xFF, 0x14, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x60, 0x01, 0x09, 0x08, 0x25,
    0x00, 0x02, 0x03, 0x00, 0x06, 0x00, 0x0C, 0x03, 0x0B, 0x11,
];

const POWER_B: [u8; 17] = [
    0xFF, 0xFF, 0x0C, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x5D, 0x01, 0x00, 0x01, 0xAC,
    0xBD, 0xFB,
];

const SET_POINT_B: [u8; 25] = [
    0xFF, 0xFF, 0x14, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x60, 0x01, 0x09, 0x08, 0x25,
    0x00, 0x02, 0x03, 0x00, 0x06, 0x00, 0x0C, 0x03, 0x0B, 0x70,
];

pub static REVISION_A: FrameLayout = FrameLayout {
    revision: Revision::A,
    framing: Framing::Fixed { len: 47 },
    crc16: false,
    strict_checksum: true,
    settle_after_power_on: false,
    status: StatusOffsets {
        power: 17,
        mode: 23,
        current_temperature: 21,
        target_temperature: 12,
    },
    mode_codes: &[
        (0, Mode::Auto),
        (1, Mode::Cool),
        (2, Mode::Heat),
        (3, Mode::FanOnly),
        (4, Mode::Dry),
    ],
    poll: &POLL,
    power: CommandTemplate {
        name: "power",
        bytes: &POWER_A,
        fields: POWER_FIELDS,
    },
    set_point: CommandTemplate {
        name: "set_point",
        bytes: &SET_POINT_A,
        fields: SET_POINT_FIELDS,
    },
};

pub static REVISION_B: FrameLayout = FrameLayout {
    revision: Revision::B,
    framing: Framing::LengthPrefixed,
    crc16: true,
    strict_checksum: false,
    settle_after_power_on: true,
    status: StatusOffsets {
        power: 17,
        mode: 13,
        current_temperature: 21,
        target_temperature: 12,
    },
    // 0 means "off" on these units, it falls through to Auto like any unknown code
    mode_codes: &[
        (2, Mode::Auto),
        (4, Mode::Dry),
        (8, Mode::Cool),
        (10, Mode::Heat),
    ],
    poll: &POLL,
    power: CommandTemplate {
        name: "power",
        bytes: &POWER_B,
        fields: POWER_FIELDS,
    },
    set_point: CommandTemplate {
        name: "set_point",
        bytes: &SET_POINT_B,
        fields: SET_POINT_FIELDS,
    },
};
