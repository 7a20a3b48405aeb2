//! Set-temperature command encoders.
//!
//! Firmware revisions disagree on where the temperature lives in the write
//! frame and how wide it is. Two encoders exist; the client tries them in
//! `fallback_chain` order and keeps the first one the device accepts.

use crate::{Error, Result};

/// Write prefix put in front of every encoded frame.
const WRITE_PREFIX: &str = "05";

pub trait CommandEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the write frame for `temperature` from a thermostat frame
    /// previously captured from the device.
    fn encode(&self, template: &str, temperature: i32) -> Result<String>;
}

/// Offsets used by early firmware: 2 digits for `ThAll`, 4 digits
/// for `ParValue`, `TestOut` and `ThAll2`. Negative values wrap by adding 65535.
///
/// Both encoders leave every template byte outside the field as it was.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderA;

/// Offsets used by later firmware, which also accepts `PwAll`. Negative values
/// wrap by two's complement.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderB;

pub fn fallback_chain() -> [&'static dyn CommandEncoder; 2] {
    [&EncoderA, &EncoderB]
}

impl CommandEncoder for EncoderA {
    fn name(&self) -> &'static str {
        "A"
    }

    fn encode(&self, template: &str, temperature: i32) -> Result<String> {
        let code = type_code(template)?;
        let body = match code {
            0x01 => {
                let value = format_field(temperature, 2)?;
                format!("{}{}{}", slice(template, 0, 10)?, value, tail(template, 12)?)
            }
            0x0E => {
                let value = format_field(wrap_a(temperature), 4)?;
                format!("{}{}{}", slice(template, 0, 6)?, value, tail(template, 10)?)
            }
            0x12 => {
                let value = format_field(wrap_a(temperature), 4)?;
                format!("{}{}{}", slice(template, 0, 6)?, value, tail(template, 10)?)
            }
            0x22 => {
                let value = format_field(wrap_a(temperature), 4)?;
                format!("{}{}{}", slice(template, 0, 10)?, value, tail(template, 14)?)
            }
            other => {
                return Err(Error::CommandEncoding(format!(
                    "encoder A does not handle frame type {other:#04x}"
                )));
            }
        };
        Ok(format!("{WRITE_PREFIX}{body}"))
    }
}

impl CommandEncoder for EncoderB {
    fn name(&self) -> &'static str {
        "B"
    }

    fn encode(&self, template: &str, temperature: i32) -> Result<String> {
        let code = type_code(template)?;
        let (start, width) = match code {
            0x06 | 0x01 => (10, 2),
            0x0e | 0x12 => (6, 4),
            0x22 => (10, 4),
            other => {
                return Err(Error::CommandEncoding(format!(
                    "encoder B does not handle frame type {other:#04x}"
                )));
            }
        };
        let value = if width == 4 && (-32768..0).contains(&temperature) {
            format_field(temperature + 65536, width)?
        } else {
            format_field(temperature, width)?
        };
        Ok(format!(
            "{WRITE_PREFIX}{}{}{}",
            slice(template, 0, start)?,
            value,
            tail(template, start + width)?
        ))
    }
}

fn wrap_a(value: i32) -> i32 {
    if value < 0 { value + 65535 } else { value }
}

/// Zero-padded lowercase hex, rejected when it does not fit `width` digits.
fn format_field(value: i32, width: usize) -> Result<String> {
    if value < 0 {
        return Err(Error::CommandEncoding(format!(
            "temperature {value} cannot be represented in {width} hex digits"
        )));
    }
    let hex = format!("{value:0width$x}");
    if hex.len() > width {
        return Err(Error::CommandEncoding(format!(
            "temperature {value} ({hex}) exceeds {width} hex digits"
        )));
    }
    Ok(hex)
}

fn type_code(template: &str) -> Result<u8> {
    template
        .get(0..2)
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::CommandEncoding(format!("invalid command template {template:?}")))
}

fn slice(template: &str, start: usize, end: usize) -> Result<&str> {
    template.get(start..end).ok_or_else(|| {
        Error::CommandEncoding(format!(
            "command template {template:?} too short for field {start}..{end}"
        ))
    })
}

fn tail(template: &str, start: usize) -> Result<&str> {
    template.get(start..).ok_or_else(|| {
        Error::CommandEncoding(format!("command template {template:?} too short"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Payload, decode};

    const TH_ALL: &str = "0100010F2D1400D201";
    const PAR_VALUE: &str = "0E002A0014";
    const TEST_OUT: &str = "12005A001600AB12CD";
    const TH_ALL_2: &str = "2200010F2D0014001501AB";

    #[test]
    fn th_all_round_trips_at_fixed_offset() {
        for temp in [0, 7, 16, 21, 45, 255] {
            let cmd = EncoderA.encode(TH_ALL, temp).unwrap();
            assert!(cmd.starts_with("05"));
            let frame = &cmd[2..];
            assert_eq!(frame.len(), TH_ALL.len());
            assert_eq!(&frame[..10], &TH_ALL[..10]);
            assert_eq!(&frame[12..], &TH_ALL[12..]);
            match decode(frame).unwrap().payload {
                Some(Payload::ThAll(p)) => assert_eq!(i32::from(p.set_point), temp),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[test]
    fn par_value_wraps_negative_to_fffe() {
        let cmd = EncoderA.encode(PAR_VALUE, -1).unwrap();
        assert_eq!(cmd, "050E002Afffe");
    }

    #[test]
    fn par_value_pads_to_four_digits() {
        assert_eq!(EncoderA.encode(PAR_VALUE, 5).unwrap(), "050E002A0005");
        assert_eq!(EncoderA.encode(PAR_VALUE, 300).unwrap(), "050E002A012c");
    }

    #[test]
    fn test_out_matches_wire_prefix() {
        let cmd = EncoderA.encode(TEST_OUT, 22).unwrap();
        assert_eq!(cmd, "0512005A001600AB12CD");
    }

    #[test]
    fn hex_digits_are_lowercase() {
        let template = "12005a000000AB12CD";
        assert_eq!(EncoderA.encode(template, 26).unwrap(), "0512005a001a00AB12CD");
        assert_eq!(EncoderB.encode(template, 26).unwrap(), "0512005a001a00AB12CD");
        assert_eq!(EncoderA.encode(TH_ALL, 0xAB).unwrap(), "050100010F2Dab00D201");
    }

    #[test]
    fn th_all_2_keeps_tail() {
        let cmd = EncoderA.encode(TH_ALL_2, 23).unwrap();
        assert_eq!(cmd, "052200010F2D0017001501AB");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            EncoderA.encode(TH_ALL, 256),
            Err(Error::CommandEncoding(_))
        ));
        assert!(matches!(
            EncoderA.encode(TH_ALL, -1),
            Err(Error::CommandEncoding(_))
        ));
        assert!(matches!(
            EncoderA.encode(PAR_VALUE, 70_000),
            Err(Error::CommandEncoding(_))
        ));
        assert!(matches!(
            EncoderB.encode(PAR_VALUE, 65_536),
            Err(Error::CommandEncoding(_))
        ));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        assert!(EncoderA.encode("0600010F2D1400", 20).is_err());
        assert!(EncoderA.encode("", 20).is_err());
        assert!(EncoderB.encode("0C81", 20).is_err());
    }

    #[test]
    fn encoder_b_handles_pw_all() {
        let cmd = EncoderB.encode("0600010F2D0300", 4).unwrap();
        assert_eq!(cmd, "050600010F2D0400");
    }

    #[test]
    fn encoder_b_uses_twos_complement() {
        assert_eq!(EncoderB.encode(PAR_VALUE, -1).unwrap(), "050E002Affff");
    }

    #[test]
    fn both_encoders_keep_bytes_after_field() {
        let extended = format!("{PAR_VALUE}99");
        assert_eq!(EncoderB.encode(&extended, 22).unwrap(), "050E002A001699");
        assert_eq!(EncoderA.encode(&extended, 22).unwrap(), "050E002A001699");

        let test_out = "12005a000000AB12CDEE";
        assert_eq!(EncoderA.encode(test_out, 22).unwrap(), "0512005a001600AB12CDEE");
        assert_eq!(EncoderB.encode(test_out, 22).unwrap(), "0512005a001600AB12CDEE");
    }

    #[test]
    fn fallback_order() {
        let names: Vec<_> = fallback_chain().iter().map(|e| e.name()).collect();
        assert_eq!(names, ["A", "B"]);
    }
}
