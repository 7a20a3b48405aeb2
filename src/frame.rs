//! Decoder for the hex frames exchanged with the stove.
//!
//! A frame is an ASCII hex string whose first byte selects its kind. Each known
//! kind has one fixed layout; a frame whose length does not match that layout
//! still decodes, but carries no payload (short and extended variants exist in
//! the field and are valid).

use std::fmt;

pub const TYPE_TH_ALL: u8 = 0x01;
pub const TYPE_TH_TEMP: u8 = 0x02;
pub const TYPE_TH_STATE: u8 = 0x03;
pub const TYPE_PW_ALL: u8 = 0x06;
pub const TYPE_CRONO_ENB: u8 = 0x08;
pub const TYPE_STAT_SYST: u8 = 0x0B;
pub const TYPE_STATE_INFO: u8 = 0x0C;
pub const TYPE_PAR_VALUE: u8 = 0x0E;
pub const TYPE_MAIN_VALUES: u8 = 0x10;
pub const TYPE_TEST_OUT: u8 = 0x12;
pub const TYPE_TH_ALL_2: u8 = 0x22;

const STATE_INFO_81: u8 = 0x81;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    ThAll,
    ThTemp,
    ThState,
    PwAll,
    CronoEnb,
    StatSyst,
    StateInfo,
    StateInfo81,
    ParValue,
    MainValues,
    TestOut,
    ThAll2,
    Unknown(u8),
}

impl FrameKind {
    /// Expected frame length in hex characters, `None` for variable-length kinds.
    fn layout_len(self) -> Option<usize> {
        match self {
            FrameKind::ThAll => Some(18),
            FrameKind::ThTemp => Some(10),
            FrameKind::ThState => Some(8),
            FrameKind::PwAll => Some(14),
            FrameKind::CronoEnb => Some(6),
            FrameKind::StatSyst => Some(10),
            FrameKind::StateInfo81 => Some(36),
            FrameKind::ParValue => Some(10),
            FrameKind::MainValues => Some(40),
            FrameKind::TestOut => Some(18),
            FrameKind::ThAll2 => Some(22),
            FrameKind::StateInfo | FrameKind::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThAll {
    pub id: u16,
    pub min: u8,
    pub max: u8,
    pub set_point: u8,
    pub room: i32,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThTemp {
    pub id: u16,
    pub temperature: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThState {
    pub id: u16,
    pub state: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwAll {
    pub id: u16,
    pub min: u8,
    pub max: u8,
    pub power: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronoEnb {
    pub program: u8,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSyst {
    pub status: u8,
    pub phase: u8,
    pub power: u8,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    pub subtype: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo81 {
    pub room_temperature: i32,
    pub water_temperature: i32,
    pub smoke_temperature: i32,
    pub power_level: u16,
    pub fan_speed: u16,
    pub thermostat: i32,
    /// Trailing bytes echoed back when building a set-temperature command.
    pub command_tail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParValue {
    pub id: u16,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainValues {
    pub hours: u32,
    pub status: u8,
    pub cod_error: u8,
    pub phase: u8,
    pub power: u16,
    pub temp_princ: i32,
    pub temp_sec: i32,
    pub temp_smoke: i32,
    pub fan: u16,
    pub decimal_point: u8,
    pub unit: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOut {
    pub id: u16,
    pub value: i32,
    pub extra: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThAll2 {
    pub id: u16,
    pub min: u8,
    pub max: u8,
    pub set_point: i32,
    pub room: i32,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    ThAll(ThAll),
    ThTemp(ThTemp),
    ThState(ThState),
    PwAll(PwAll),
    CronoEnb(CronoEnb),
    StatSyst(StatSyst),
    StateInfo(StateInfo),
    StateInfo81(StateInfo81),
    ParValue(ParValue),
    MainValues(MainValues),
    TestOut(TestOut),
    ThAll2(ThAll2),
}

/// A decoded frame. `payload` is `None` when the frame length does not match
/// the layout for its kind, or the kind is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub type_code: u8,
    pub kind: FrameKind,
    pub raw: String,
    pub payload: Option<Payload>,
}

impl CommandFrame {
    /// Target temperature carried by a frame usable as the main thermostat.
    pub fn thermostat_value(&self) -> Option<i32> {
        match self.payload.as_ref()? {
            Payload::ThAll(p) => Some(i32::from(p.set_point)),
            Payload::ThTemp(p) => Some(p.temperature),
            Payload::PwAll(p) => Some(i32::from(p.power)),
            Payload::StateInfo81(p) => Some(p.thermostat),
            Payload::ParValue(p) => Some(p.value),
            Payload::TestOut(p) => Some(p.value),
            Payload::ThAll2(p) => Some(p.set_point),
            _ => None,
        }
    }

    pub fn main_values(&self) -> Option<&MainValues> {
        match self.payload.as_ref()? {
            Payload::MainValues(mv) => Some(mv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooShort(String),
    InvalidHex { frame: String, offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort(frame) => write!(f, "frame too short: {frame:?}"),
            DecodeError::InvalidHex { frame, offset } => {
                write!(f, "invalid hex at offset {offset} in frame {frame:?}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Two's complement over 16 bits.
pub fn to_signed16(value: u16) -> i32 {
    let value = i32::from(value);
    if value > 32767 { value - 65536 } else { value }
}

struct Fields<'a> {
    frame: &'a str,
}

impl Fields<'_> {
    fn hex(&self, start: usize, end: usize) -> Result<u32, DecodeError> {
        self.frame
            .get(start..end)
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            .ok_or_else(|| DecodeError::InvalidHex {
                frame: self.frame.to_string(),
                offset: start,
            })
    }

    fn u8(&self, start: usize) -> Result<u8, DecodeError> {
        self.hex(start, start + 2).map(|v| v as u8)
    }

    fn u16(&self, start: usize) -> Result<u16, DecodeError> {
        self.hex(start, start + 4).map(|v| v as u16)
    }

    fn i16(&self, start: usize) -> Result<i32, DecodeError> {
        self.u16(start).map(to_signed16)
    }

    fn u32(&self, start: usize) -> Result<u32, DecodeError> {
        self.hex(start, start + 8)
    }

    /// Each byte pair from `start` onward is one Latin-1 character.
    fn text(&self, start: usize) -> Result<String, DecodeError> {
        let mut out = String::new();
        let mut pos = start;
        while pos + 2 <= self.frame.len() {
            out.push(char::from(self.u8(pos)?));
            pos += 2;
        }
        Ok(out)
    }
}

/// Decode one hex frame. Unknown type codes and unexpected lengths are not
/// errors; only a missing or non-hex type byte, or non-hex digits inside a
/// recognised layout, fail.
pub fn decode(frame: &str) -> Result<CommandFrame, DecodeError> {
    let frame = frame.trim();
    if frame.len() < 2 {
        return Err(DecodeError::TooShort(frame.to_string()));
    }
    let f = Fields { frame };
    let type_code = f.u8(0)?;

    let kind = match type_code {
        TYPE_TH_ALL => FrameKind::ThAll,
        TYPE_TH_TEMP => FrameKind::ThTemp,
        TYPE_TH_STATE => FrameKind::ThState,
        TYPE_PW_ALL => FrameKind::PwAll,
        TYPE_CRONO_ENB => FrameKind::CronoEnb,
        TYPE_STAT_SYST => FrameKind::StatSyst,
        TYPE_STATE_INFO => {
            if frame.len() >= 4 && f.u8(2)? == STATE_INFO_81 {
                FrameKind::StateInfo81
            } else {
                FrameKind::StateInfo
            }
        }
        TYPE_PAR_VALUE => FrameKind::ParValue,
        TYPE_MAIN_VALUES => FrameKind::MainValues,
        TYPE_TEST_OUT => FrameKind::TestOut,
        TYPE_TH_ALL_2 => FrameKind::ThAll2,
        other => FrameKind::Unknown(other),
    };

    let payload = match kind.layout_len() {
        Some(len) if len == frame.len() => decode_fixed(kind, &f)?,
        Some(_) => None,
        None => decode_variable(kind, &f)?,
    };

    Ok(CommandFrame {
        type_code,
        kind,
        raw: frame.to_string(),
        payload,
    })
}

fn decode_fixed(kind: FrameKind, f: &Fields<'_>) -> Result<Option<Payload>, DecodeError> {
    Ok(Some(match kind {
        FrameKind::ThAll => Payload::ThAll(ThAll {
            id: f.u16(2)?,
            min: f.u8(6)?,
            max: f.u8(8)?,
            set_point: f.u8(10)?,
            room: f.i16(12)?,
            status: f.u8(16)?,
        }),
        FrameKind::ThTemp => Payload::ThTemp(ThTemp {
            id: f.u16(2)?,
            temperature: f.i16(6)?,
        }),
        FrameKind::ThState => Payload::ThState(ThState {
            id: f.u16(2)?,
            state: f.u8(6)?,
        }),
        FrameKind::PwAll => Payload::PwAll(PwAll {
            id: f.u16(2)?,
            min: f.u8(6)?,
            max: f.u8(8)?,
            power: f.u8(10)?,
        }),
        FrameKind::CronoEnb => Payload::CronoEnb(CronoEnb {
            program: f.u8(2)?,
            enabled: f.u8(4)? != 0,
        }),
        FrameKind::StatSyst => Payload::StatSyst(StatSyst {
            status: f.u8(2)?,
            phase: f.u8(4)?,
            power: f.u8(6)?,
            flags: f.u8(8)?,
        }),
        FrameKind::StateInfo81 => {
            f.hex(28, 36)?;
            Payload::StateInfo81(StateInfo81 {
                room_temperature: f.i16(4)?,
                water_temperature: f.i16(8)?,
                smoke_temperature: f.i16(12)?,
                power_level: f.u16(16)?,
                fan_speed: f.u16(20)?,
                thermostat: f.i16(24)?,
                command_tail: f.frame[28..36].to_string(),
            })
        }
        FrameKind::ParValue => Payload::ParValue(ParValue {
            id: f.u16(2)?,
            value: f.i16(6)?,
        }),
        FrameKind::MainValues => Payload::MainValues(MainValues {
            hours: f.u32(2)?,
            status: f.u8(10)?,
            cod_error: f.u8(12)?,
            phase: f.u8(14)?,
            power: f.u16(16)?,
            temp_princ: f.i16(20)?,
            temp_sec: f.i16(24)?,
            temp_smoke: f.i16(28)?,
            fan: f.u16(32)?,
            decimal_point: f.u8(36)?,
            unit: f.u8(38)?,
        }),
        FrameKind::TestOut => Payload::TestOut(TestOut {
            id: f.u16(2)?,
            value: f.i16(6)?,
            extra: f.u32(10)?,
        }),
        FrameKind::ThAll2 => Payload::ThAll2(ThAll2 {
            id: f.u16(2)?,
            min: f.u8(6)?,
            max: f.u8(8)?,
            set_point: f.i16(10)?,
            room: f.i16(14)?,
            status: f.u16(18)?,
        }),
        FrameKind::StateInfo | FrameKind::Unknown(_) => return Ok(None),
    }))
}

fn decode_variable(kind: FrameKind, f: &Fields<'_>) -> Result<Option<Payload>, DecodeError> {
    if kind != FrameKind::StateInfo || f.frame.len() < 4 {
        return Ok(None);
    }
    let subtype = f.u8(2)?;
    match subtype {
        0x00 | 0x01 | 0x80 => Ok(Some(Payload::StateInfo(StateInfo {
            subtype,
            text: f.text(4)?,
        }))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed16_covers_whole_range() {
        for x in 0..=u16::MAX {
            let expected = if x <= 32767 { i32::from(x) } else { i32::from(x) - 65536 };
            assert_eq!(to_signed16(x), expected);
        }
    }

    #[test]
    fn decode_main_values() {
        let frame = decode("100000000F12010000320015001600C800000100").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(frame.kind, FrameKind::MainValues);
        let mv = frame.main_values().expect("payload");
        assert_eq!(mv.hours, 0x0F);
        assert_eq!(mv.status, 0x12);
        assert_eq!(mv.cod_error, 0x01);
        assert_eq!(mv.power, 0x0032);
        assert_eq!(mv.temp_princ, 0x15);
        assert_eq!(mv.temp_sec, 0x16);
        assert_eq!(mv.temp_smoke, 0xC8);
        assert_eq!(mv.decimal_point, 1);
    }

    #[test]
    fn decode_negative_room_temperature() {
        let frame = decode("0E002AFFFE").unwrap();
        match frame.payload {
            Some(Payload::ParValue(p)) => {
                assert_eq!(p.id, 0x2A);
                assert_eq!(p.value, -2);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn decode_state_info_text() {
        // "0C" "00" then "Hi!"
        let frame = decode("0C00486921").unwrap();
        assert_eq!(frame.kind, FrameKind::StateInfo);
        assert_eq!(
            frame.payload,
            Some(Payload::StateInfo(StateInfo {
                subtype: 0,
                text: "Hi!".to_string()
            }))
        );
    }

    #[test]
    fn decode_state_info_latin1() {
        let frame = decode("0C80E9").unwrap();
        match frame.payload {
            Some(Payload::StateInfo(info)) => assert_eq!(info.text, "\u{e9}"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn decode_state_info_81() {
        let frame = decode("0C8100150028009600030002001600AB12CD").unwrap();
        assert_eq!(frame.kind, FrameKind::StateInfo81);
        assert_eq!(frame.thermostat_value(), Some(22));
        match frame.payload {
            Some(Payload::StateInfo81(p)) => {
                assert_eq!(p.room_temperature, 21);
                assert_eq!(p.command_tail, "00AB12CD");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn wrong_length_keeps_type_tag_only() {
        let frame = decode("10FFFF").unwrap();
        assert_eq!(frame.kind, FrameKind::MainValues);
        assert_eq!(frame.type_code, 0x10);
        assert!(frame.payload.is_none());
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let frame = decode("7Fdeadbeef").unwrap();
        assert_eq!(frame.kind, FrameKind::Unknown(0x7F));
        assert!(frame.payload.is_none());
    }

    #[test]
    fn other_state_info_subtypes_have_no_payload() {
        let frame = decode("0C05AABB").unwrap();
        assert_eq!(frame.kind, FrameKind::StateInfo);
        assert!(frame.payload.is_none());
    }

    #[test]
    fn malformed_frames_fail() {
        assert!(matches!(decode("1"), Err(DecodeError::TooShort(_))));
        assert!(matches!(decode("zz00"), Err(DecodeError::InvalidHex { offset: 0, .. })));
        assert!(matches!(
            decode("0E002AFFZE"),
            Err(DecodeError::InvalidHex { offset: 6, .. })
        ));
    }

    #[test]
    fn decode_th_all() {
        let frame = decode("0100010F2D1400D201").unwrap();
        match frame.payload {
            Some(Payload::ThAll(ref p)) => {
                assert_eq!(p.id, 1);
                assert_eq!(p.min, 0x0F);
                assert_eq!(p.max, 0x2D);
                assert_eq!(p.set_point, 0x14);
                assert_eq!(p.room, 0xD2);
                assert_eq!(p.status, 1);
            }
            ref other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(frame.thermostat_value(), Some(20));
    }
}
