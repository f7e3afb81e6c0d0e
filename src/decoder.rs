//! Payload decoding for health-sensor characteristics.
//!
//! Three encodings are understood: a single-byte percentage (battery level),
//! the IEEE-11073 32-bit FLOAT (24-bit mantissa, 8-bit exponent) and the
//! 16-bit SFLOAT (12-bit mantissa, 4-bit exponent). The two float encodings
//! are preceded by a flags byte which is read so the offsets line up but is
//! otherwise ignored.

use std::fmt;

use crate::error::MalformedPayload;

const FLOAT_NAN: u32 = 0x7F_FFFF;
const FLOAT_NRES: u32 = 0x80_0000;
const FLOAT_POSITIVE_INFINITY: u32 = 0x80_0001;
const FLOAT_NEGATIVE_INFINITY: u32 = 0x80_0002;

const SFLOAT_NAN: u16 = 0x07FF;
const SFLOAT_NRES: u16 = 0x0800;
const SFLOAT_POSITIVE_INFINITY: u16 = 0x07FE;
const SFLOAT_NEGATIVE_INFINITY: u16 = 0x0802;
const SFLOAT_RESERVED: u16 = 0x0801;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decoder {
    /// `byte[0]` as a whole percentage in `0..=100`.
    Percentage,
    /// Flags byte followed by an IEEE-11073 FLOAT.
    HealthFloat,
    /// Flags byte followed by an IEEE-11073 SFLOAT.
    ShortFloat,
}

/// Reserved mantissa values of the IEEE-11073 encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentinelValue {
    NaN,
    NotAtThisResolution,
    PositiveInfinity,
    NegativeInfinity,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Percentage(u8),
    Quantity(f64),
    Sentinel(SentinelValue),
}

impl Decoder {
    pub fn min_len(self) -> usize {
        match self {
            Decoder::Percentage => 1,
            Decoder::HealthFloat => 5,
            Decoder::ShortFloat => 3,
        }
    }

    pub fn decode(self, payload: &[u8]) -> Result<Measurement, MalformedPayload> {
        let expected = self.min_len();
        if payload.len() < expected {
            return Err(MalformedPayload::TooShort { expected, actual: payload.len() });
        }

        match self {
            Decoder::Percentage => decode_percentage(payload[0]),
            Decoder::HealthFloat => {
                let _flags = payload[0];
                Ok(decode_float([payload[1], payload[2], payload[3]], payload[4] as i8))
            }
            Decoder::ShortFloat => {
                let _flags = payload[0];
                Ok(decode_sfloat(u16::from_le_bytes([payload[1], payload[2]])))
            }
        }
    }
}

impl fmt::Display for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Decoder::Percentage => "percentage",
            Decoder::HealthFloat => "float",
            Decoder::ShortFloat => "sfloat",
        };
        f.write_str(name)
    }
}

fn decode_percentage(level: u8) -> Result<Measurement, MalformedPayload> {
    if level > 100 {
        return Err(MalformedPayload::PercentOutOfRange(level));
    }
    Ok(Measurement::Percentage(level))
}

fn decode_float(mantissa_bytes: [u8; 3], exponent: i8) -> Measurement {
    let raw = u32::from(mantissa_bytes[0])
        | u32::from(mantissa_bytes[1]) << 8
        | u32::from(mantissa_bytes[2]) << 16;

    let sentinel = match raw {
        FLOAT_NAN => Some(SentinelValue::NaN),
        FLOAT_NRES => Some(SentinelValue::NotAtThisResolution),
        FLOAT_POSITIVE_INFINITY => Some(SentinelValue::PositiveInfinity),
        FLOAT_NEGATIVE_INFINITY => Some(SentinelValue::NegativeInfinity),
        _ => None,
    };
    if let Some(sentinel) = sentinel {
        return Measurement::Sentinel(sentinel);
    }

    // sign-extend the 24-bit mantissa
    let mantissa = ((raw << 8) as i32) >> 8;
    Measurement::Quantity(scale(mantissa, i32::from(exponent)))
}

fn decode_sfloat(raw: u16) -> Measurement {
    let sentinel = match raw {
        SFLOAT_NAN => Some(SentinelValue::NaN),
        SFLOAT_NRES => Some(SentinelValue::NotAtThisResolution),
        SFLOAT_POSITIVE_INFINITY => Some(SentinelValue::PositiveInfinity),
        SFLOAT_NEGATIVE_INFINITY => Some(SentinelValue::NegativeInfinity),
        SFLOAT_RESERVED => Some(SentinelValue::Reserved),
        _ => None,
    };
    if let Some(sentinel) = sentinel {
        return Measurement::Sentinel(sentinel);
    }

    let mantissa = ((raw << 4) as i16) >> 4;
    let exponent = (raw as i16) >> 12;
    Measurement::Quantity(scale(i32::from(mantissa), i32::from(exponent)))
}

// Dividing for negative exponents keeps values like 16e-1 exact to the last digit.
fn scale(mantissa: i32, exponent: i32) -> f64 {
    let mantissa = f64::from(mantissa);
    if exponent < 0 {
        mantissa / 10f64.powi(-exponent)
    } else {
        mantissa * 10f64.powi(exponent)
    }
}

impl Measurement {
    /// Human readable form: `"<n>%"` for percentages, two decimals plus the
    /// unit for quantities.
    pub fn render(&self, unit: &str) -> String {
        match self {
            Measurement::Percentage(level) => format!("{level}%"),
            Measurement::Quantity(value) if unit.is_empty() => format!("{value:.2}"),
            Measurement::Quantity(value) => format!("{value:.2} {unit}"),
            Measurement::Sentinel(sentinel) => sentinel.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Measurement::Percentage(level) => Some(f64::from(*level)),
            Measurement::Quantity(value) => Some(*value),
            Measurement::Sentinel(_) => None,
        }
    }
}

impl fmt::Display for SentinelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SentinelValue::NaN => "NaN",
            SentinelValue::NotAtThisResolution => "NRes",
            SentinelValue::PositiveInfinity => "+INF",
            SentinelValue::NegativeInfinity => "-INF",
            SentinelValue::Reserved => "RFU",
        };
        f.write_str(text)
    }
}

/// Space separated, zero padded hex of a payload, for log output only.
pub fn raw_hex(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<String>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use super::*;

    fn float_payload(mantissa: u32, exponent: i8) -> [u8; 5] {
        let bytes = mantissa.to_le_bytes();
        [0x00, bytes[0], bytes[1], bytes[2], exponent as u8]
    }

    #[test]
    fn float_mantissa_with_negative_exponent() {
        let measurement = Decoder::HealthFloat.decode(&[0x00, 0x10, 0x00, 0x00, 0xFF]).unwrap();
        assert_eq!(measurement, Measurement::Quantity(1.6));
        assert_eq!(measurement.render(""), "1.60");
    }

    #[test]
    fn float_renders_unit_suffix() {
        // 365 * 10^-1
        let measurement = Decoder::HealthFloat.decode(&[0x00, 0x6D, 0x01, 0x00, 0xFF]).unwrap();
        assert_eq!(measurement.render("°C"), "36.50 °C");
    }

    #[test]
    fn float_negative_mantissa_is_sign_extended() {
        // -16 as 24-bit two's complement
        let measurement = Decoder::HealthFloat.decode(&float_payload(0xFF_FFF0, 0)).unwrap();
        assert_eq!(measurement, Measurement::Quantity(-16.0));

        let measurement = Decoder::HealthFloat.decode(&float_payload(0xFF_FF9C, -2)).unwrap();
        assert_eq!(measurement.render(""), "-1.00");
    }

    #[test]
    fn float_positive_exponent() {
        let measurement = Decoder::HealthFloat.decode(&float_payload(42, 2)).unwrap();
        assert_eq!(measurement, Measurement::Quantity(4200.0));
    }

    #[test]
    fn float_matches_mantissa_times_power_of_ten() {
        for (mantissa, exponent) in [(1, -3), (999, -2), (0x7F_FFFD, -1), (0x80_0003, 0), (12345, 1)] {
            let signed = ((mantissa << 8) as i32) >> 8;
            let expected = f64::from(signed) * 10f64.powi(i32::from(exponent));
            let rendered = Decoder::HealthFloat
                .decode(&float_payload(mantissa, exponent))
                .unwrap()
                .render("");
            assert_eq!(rendered, format!("{expected:.2}"), "mantissa {mantissa:#x} exponent {exponent}");
        }
    }

    #[test]
    fn float_sentinels_ignore_exponent() {
        let sentinels = [
            (0x7F_FFFF, SentinelValue::NaN),
            (0x80_0000, SentinelValue::NotAtThisResolution),
            (0x80_0001, SentinelValue::PositiveInfinity),
            (0x80_0002, SentinelValue::NegativeInfinity),
        ];
        for (mantissa, sentinel) in sentinels {
            for exponent in [i8::MIN, -1, 0, 1, i8::MAX] {
                let measurement = Decoder::HealthFloat.decode(&float_payload(mantissa, exponent)).unwrap();
                assert_eq!(measurement, Measurement::Sentinel(sentinel));
                assert_eq!(measurement.as_f64(), None);
            }
        }
    }

    #[test]
    fn float_rejects_short_buffers() {
        for len in 0..5 {
            let payload = vec![0u8; len];
            assert_eq!(
                Decoder::HealthFloat.decode(&payload),
                Err(MalformedPayload::TooShort { expected: 5, actual: len })
            );
        }
    }

    #[test]
    fn float_ignores_trailing_bytes() {
        let measurement = Decoder::HealthFloat
            .decode(&[0x06, 0x10, 0x00, 0x00, 0xFF, 0xE5, 0x07, 0x01])
            .unwrap();
        assert_eq!(measurement, Measurement::Quantity(1.6));
    }

    #[test]
    fn percentage_bounds() {
        assert_eq!(Decoder::Percentage.decode(&[0x00]).unwrap().render(""), "0%");
        assert_eq!(Decoder::Percentage.decode(&[0x64]).unwrap().render(""), "100%");
        assert_eq!(Decoder::Percentage.decode(&[0x65]), Err(MalformedPayload::PercentOutOfRange(101)));
        assert_eq!(
            Decoder::Percentage.decode(&[]),
            Err(MalformedPayload::TooShort { expected: 1, actual: 0 })
        );
    }

    #[test]
    fn sfloat_decodes_mantissa_and_exponent() {
        // exponent -1 (0xF), mantissa 975
        let raw: u16 = 0xF000 | 975;
        let bytes = raw.to_le_bytes();
        let measurement = Decoder::ShortFloat.decode(&[0x00, bytes[0], bytes[1]]).unwrap();
        assert_eq!(measurement.render("%"), "97.50 %");

        // exponent 0, mantissa -5
        let raw: u16 = 0x0FFB;
        let bytes = raw.to_le_bytes();
        let measurement = Decoder::ShortFloat.decode(&[0x00, bytes[0], bytes[1]]).unwrap();
        assert_eq!(measurement, Measurement::Quantity(-5.0));
    }

    #[test]
    fn sfloat_sentinels() {
        for (raw, sentinel) in [
            (0x07FFu16, SentinelValue::NaN),
            (0x0800, SentinelValue::NotAtThisResolution),
            (0x07FE, SentinelValue::PositiveInfinity),
            (0x0802, SentinelValue::NegativeInfinity),
            (0x0801, SentinelValue::Reserved),
        ] {
            let bytes = raw.to_le_bytes();
            assert_eq!(
                Decoder::ShortFloat.decode(&[0x00, bytes[0], bytes[1]]).unwrap(),
                Measurement::Sentinel(sentinel)
            );
        }
        assert!(Decoder::ShortFloat.decode(&[0x00, 0xFF]).is_err());
    }

    #[test]
    fn sentinel_rendering() {
        assert_eq!(Measurement::Sentinel(SentinelValue::NaN).render("°C"), "NaN");
        assert_eq!(Measurement::Sentinel(SentinelValue::NegativeInfinity).render(""), "-INF");
    }

    #[test]
    fn raw_hex_is_zero_padded() {
        assert_eq!(raw_hex(&[0x00, 0x0A, 0xFF]), "00 0a ff");
        assert_eq!(raw_hex(&[]), "");
    }
}
