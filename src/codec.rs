//! Text record codec for archive files.
//!
//! Each reading is one tab-separated line:
//!
//! ```text
//! <hex timestamp>\t<type-tag>\t<literal>[\tA]
//! ```
//!
//! The trailing `A` marks a reading that was in alarm when produced.
//! Timestamps encode as `0x…` hex; the decoder also accepts bare hex and
//! plain decimal. A line that does not decode is reported as an error and
//! skipped by callers; one corrupt line never aborts a whole-file read.

use crate::error::{ArchiveError, Result};
use crate::point::{Reading, Timestamp, Value};

/// Encodes a reading as one archive line, without a trailing newline.
pub fn encode_line(reading: &Reading) -> String {
    let mut line = format!("0x{:x}\t", reading.timestamp);
    match &reading.value {
        Value::Float64(v) => push_field(&mut line, "dbl", v),
        Value::Float32(v) => push_field(&mut line, "flt", v),
        Value::Int32(v) => push_field(&mut line, "int", v),
        Value::Int16(v) => push_field(&mut line, "short", v),
        Value::Int64(v) => push_field(&mut line, "long", v),
        Value::Bool(v) => push_field(&mut line, "bool", v),
        Value::Text(v) => {
            // Tab is the field separator, so it cannot survive inside a string.
            line.push_str("str\t");
            line.push_str(&v.replace('\t', " "));
        }
        Value::Angle(v) => push_field(&mut line, "ang", v),
        Value::HourAngle(v) => push_field(&mut line, "hr", v),
        Value::Instant(v) => {
            line.push_str(&format!("abst\t0x{:x}", v));
        }
        Value::Interval(v) => push_field(&mut line, "relt", v),
        Value::BigInt(v) => push_field(&mut line, "big", v),
        Value::Null => line.push_str("null\tnull"),
    }
    if reading.alarm {
        line.push_str("\tA");
    }
    line
}

fn push_field<T: std::fmt::Display>(line: &mut String, tag: &str, value: T) {
    line.push_str(tag);
    line.push('\t');
    line.push_str(&value.to_string());
}

/// Decodes one archive line back into a reading.
///
/// Fails with [`ArchiveError::BadRecord`] when the line has fewer than three
/// tab-delimited fields or a literal does not parse, and with
/// [`ArchiveError::UnknownTag`] on an unrecognized type tag.
pub fn decode_line(line: &str) -> Result<Reading> {
    let mut fields: Vec<&str> = line.split('\t').collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    if fields.len() < 3 {
        return Err(bad(line));
    }

    let timestamp = parse_timestamp(fields[0]).ok_or_else(|| bad(line))?;
    let value = decode_value(fields[1], fields[2], line)?;
    let alarm = fields.get(3) == Some(&"A");

    Ok(Reading {
        timestamp,
        value,
        alarm,
    })
}

/// Parses a timestamp literal: `0x…` hex, plain decimal, or bare hex.
fn parse_timestamp(field: &str) -> Option<Timestamp> {
    if let Some(hex) = field.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok();
    }
    field
        .parse::<i64>()
        .ok()
        .or_else(|| i64::from_str_radix(field, 16).ok())
}

fn decode_value(tag: &str, literal: &str, line: &str) -> Result<Value> {
    let value = match tag {
        "dbl" => Value::Float64(literal.parse().map_err(|_| bad(line))?),
        "flt" => Value::Float32(literal.parse().map_err(|_| bad(line))?),
        "int" => Value::Int32(literal.parse().map_err(|_| bad(line))?),
        "short" => Value::Int16(literal.parse().map_err(|_| bad(line))?),
        "long" => Value::Int64(literal.parse().map_err(|_| bad(line))?),
        "bool" => Value::Bool(literal.parse().map_err(|_| bad(line))?),
        "str" => Value::Text(literal.to_string()),
        "ang" => Value::Angle(literal.parse().map_err(|_| bad(line))?),
        "hr" => Value::HourAngle(literal.parse().map_err(|_| bad(line))?),
        "abst" => Value::Instant(parse_timestamp(literal).ok_or_else(|| bad(line))?),
        "relt" => Value::Interval(literal.parse().map_err(|_| bad(line))?),
        "big" => Value::BigInt(literal.parse().map_err(|_| bad(line))?),
        "null" => Value::Null,
        _ => {
            return Err(ArchiveError::UnknownTag {
                tag: tag.to_string(),
            })
        }
    };
    Ok(value)
}

fn bad(line: &str) -> ArchiveError {
    ArchiveError::BadRecord {
        line: line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let reading = Reading::new(1_700_000_000_000_000, value);
        let line = encode_line(&reading);
        let decoded = decode_line(&line).unwrap();
        assert_eq!(decoded, reading, "line was {:?}", line);
    }

    #[test]
    fn test_roundtrip_all_types() {
        roundtrip(Value::Float64(-273.15));
        roundtrip(Value::Float32(0.25));
        roundtrip(Value::Int32(-42));
        roundtrip(Value::Int16(7));
        roundtrip(Value::Int64(i64::MAX));
        roundtrip(Value::Bool(true));
        roundtrip(Value::Text("antenna stowed".to_string()));
        roundtrip(Value::Angle(std::f64::consts::PI));
        roundtrip(Value::HourAngle(-0.5));
        roundtrip(Value::Instant(1_600_000_000_000_000));
        roundtrip(Value::Interval(-240_000_000));
        roundtrip(Value::BigInt(170_141_183_460_469_231_731_687_303_715i128));
        roundtrip(Value::Null);
    }

    #[test]
    fn test_alarm_flag_roundtrip() {
        let reading = Reading::alarming(12345, Value::Float64(99.9));
        let line = encode_line(&reading);
        assert!(line.ends_with("\tA"));
        assert!(decode_line(&line).unwrap().alarm);

        let quiet = Reading::new(12345, Value::Float64(99.9));
        assert!(!decode_line(&encode_line(&quiet)).unwrap().alarm);
    }

    #[test]
    fn test_timestamp_is_hex() {
        let line = encode_line(&Reading::new(255, Value::Null));
        assert!(line.starts_with("0xff\t"));
    }

    #[test]
    fn test_decode_decimal_and_bare_hex_timestamps() {
        let decoded = decode_line("99\tint\t5").unwrap();
        assert_eq!(decoded.timestamp, 99);
        let decoded = decode_line("9f\tint\t5").unwrap();
        assert_eq!(decoded.timestamp, 0x9f);
    }

    #[test]
    fn test_tab_in_string_sanitized() {
        let reading = Reading::new(1, Value::Text("a\tb".to_string()));
        let decoded = decode_line(&encode_line(&reading)).unwrap();
        assert_eq!(decoded.value, Value::Text("a b".to_string()));
    }

    #[test]
    fn test_too_few_fields_is_error() {
        assert!(matches!(
            decode_line("0x1\tdbl"),
            Err(ArchiveError::BadRecord { .. })
        ));
        assert!(matches!(
            decode_line(""),
            Err(ArchiveError::BadRecord { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_is_error() {
        assert!(matches!(
            decode_line("0x1\tcomplex\t3+4i"),
            Err(ArchiveError::UnknownTag { .. })
        ));
    }

    #[test]
    fn test_bad_literal_is_error() {
        assert!(matches!(
            decode_line("0x1\tdbl\tnot-a-number"),
            Err(ArchiveError::BadRecord { .. })
        ));
    }

    #[test]
    fn test_trailing_tab_tolerated() {
        // Older writers left a trailing field separator on every line.
        let decoded = decode_line("0x10\tint\t3\t").unwrap();
        assert_eq!(decoded.value, Value::Int32(3));
        assert!(!decoded.alarm);
    }
}
