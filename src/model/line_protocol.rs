//! InfluxDB line protocol decoding and encoding
//!
//! `measurement[,tag=value...] field=value[,field=value...] [timestamp]`

use super::{FieldValue, Precision, Sample, Tags};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Earliest timestamp a shard accepts, in nanoseconds
pub const MIN_NANO_TIME: i64 = i64::MIN + 2;
/// Latest timestamp a shard accepts, in nanoseconds
pub const MAX_NANO_TIME: i64 = i64::MAX - 1;

/// Parse a line protocol body.
///
/// Every line that parses is returned; the first failing line is reported as the error
/// so callers can decide whether a partially good body is acceptable.
pub fn parse(body: &str, precision: Precision, default_time: i64) -> (Vec<Sample>, Option<Error>) {
    let mut samples = Vec::new();
    let mut first_error = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line, precision, default_time) {
            Ok(sample) => samples.push(sample),
            Err(message) => {
                if first_error.is_none() {
                    first_error = Some(Error::LineProtocol {
                        line: line.to_string(),
                        message,
                    });
                }
            }
        }
    }

    (samples, first_error)
}

fn parse_line(line: &str, precision: Precision, default_time: i64) -> std::result::Result<Sample, String> {
    let key_end = find_unescaped(line, ' ', false).ok_or("missing fields")?;
    let key = &line[..key_end];
    let rest = line[key_end + 1..].trim_start();

    let (fields_part, ts_part) = match find_unescaped(rest, ' ', true) {
        Some(idx) => (&rest[..idx], Some(rest[idx + 1..].trim())),
        None => (rest, None),
    };

    let mut key_parts = split_unescaped(key, ',', false).into_iter();
    let measurement = unescape(key_parts.next().unwrap_or_default());
    if measurement.is_empty() {
        return Err("missing measurement".to_string());
    }

    let mut tags = Tags::new();
    for pair in key_parts {
        let idx = find_unescaped(pair, '=', false).ok_or("missing tag value")?;
        let (k, v) = (&pair[..idx], &pair[idx + 1..]);
        if k.is_empty() || v.is_empty() {
            return Err(format!("invalid tag '{}'", pair));
        }
        tags.insert(unescape(k), unescape(v));
    }

    let mut fields = BTreeMap::new();
    for pair in split_unescaped(fields_part, ',', true) {
        let idx = find_unescaped(pair, '=', true).ok_or("missing field value")?;
        let (k, v) = (&pair[..idx], &pair[idx + 1..]);
        if k.is_empty() {
            return Err(format!("invalid field '{}'", pair));
        }
        fields.insert(unescape(k), parse_field_value(v)?);
    }
    if fields.is_empty() {
        return Err("missing fields".to_string());
    }

    let timestamp = match ts_part {
        Some(raw) if !raw.is_empty() => {
            let value: i64 = raw
                .parse()
                .map_err(|_| format!("invalid timestamp '{}'", raw))?;
            precision
                .checked_to_nanos(value)
                .filter(|ns| (MIN_NANO_TIME..=MAX_NANO_TIME).contains(ns))
                .ok_or_else(|| format!("time outside range {} - {}", MIN_NANO_TIME, MAX_NANO_TIME))?
        }
        _ => default_time,
    };

    Ok(Sample::new(measurement, tags, fields, timestamp))
}

fn parse_field_value(raw: &str) -> std::result::Result<FieldValue, String> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Ok(FieldValue::String(unescape_string(&raw[1..raw.len() - 1])));
    }
    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| format!("invalid integer '{}'", raw));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(FieldValue::Float(v)),
        _ => Err(format!("invalid field value '{}'", raw)),
    }
}

/// Render one sample as a line, with the timestamp expressed in `precision`.
pub fn encode(sample: &Sample, precision: Precision) -> Result<String> {
    if sample.measurement().is_empty() {
        return Err(Error::Serialization("sample has an empty measurement".to_string()));
    }
    if sample.fields().is_empty() {
        return Err(Error::Serialization(format!(
            "sample for '{}' has no fields",
            sample.measurement()
        )));
    }

    let mut line = sample.series_key();
    let mut sep = ' ';
    for (key, value) in sample.fields() {
        line.push(sep);
        sep = ',';
        line.push_str(&escape_key(key));
        line.push('=');
        match value {
            FieldValue::Float(v) => {
                if !v.is_finite() {
                    return Err(Error::Serialization(format!(
                        "field '{}' is not a finite float",
                        key
                    )));
                }
                let _ = write!(line, "{}", v);
            }
            FieldValue::Integer(v) => {
                let _ = write!(line, "{}i", v);
            }
            FieldValue::String(v) => {
                line.push('"');
                line.push_str(&v.replace('\\', "\\\\").replace('"', "\\\""));
                line.push('"');
            }
            FieldValue::Boolean(v) => line.push_str(if *v { "true" } else { "false" }),
        }
    }
    let _ = write!(line, " {}", precision.from_nanos(sample.timestamp()));
    Ok(line)
}

pub(crate) fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

pub(crate) fn escape_key(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ (',' | '=' | ' ')) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn find_unescaped(s: &str, sep: char, quoted: bool) -> Option<usize> {
    let mut escaped = false;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quoted => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_unescaped(s: &str, sep: char, quoted: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(idx) = find_unescaped(rest, sep, quoted) {
        parts.push(&rest[..idx]);
        rest = &rest[idx + sep.len_utf8()..];
    }
    parts.push(rest);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_fields_and_timestamp() {
        let body = "cpu,host=a,region=west value=0.5,count=3i,ok=t,msg=\"hi there\" 1500";
        let (samples, err) = parse(body, Precision::Second, 0);
        assert!(err.is_none());
        assert_eq!(samples.len(), 1);

        let s = &samples[0];
        assert_eq!(s.measurement(), "cpu");
        assert_eq!(s.tags().get("host").map(String::as_str), Some("a"));
        assert_eq!(s.fields().get("value"), Some(&FieldValue::Float(0.5)));
        assert_eq!(s.fields().get("count"), Some(&FieldValue::Integer(3)));
        assert_eq!(s.fields().get("ok"), Some(&FieldValue::Boolean(true)));
        assert_eq!(
            s.fields().get("msg"),
            Some(&FieldValue::String("hi there".to_string()))
        );
        assert_eq!(s.timestamp(), 1_500_000_000_000);
    }

    #[test]
    fn missing_timestamp_uses_default() {
        let (samples, err) = parse("mem free=10i", Precision::Nanosecond, 42);
        assert!(err.is_none());
        assert_eq!(samples[0].timestamp(), 42);
    }

    #[test]
    fn escaped_separators_survive() {
        let (samples, err) = parse(r"disk\ io,path=/var\,log bytes=1 1", Precision::Nanosecond, 0);
        assert!(err.is_none());
        assert_eq!(samples[0].measurement(), "disk io");
        assert_eq!(samples[0].tags().get("path").map(String::as_str), Some("/var,log"));
    }

    #[test]
    fn bad_lines_are_reported_but_good_lines_kept() {
        let body = "cpu value=1 1\n# comment\n\ncpu value=oops 2\ncpu value=3 3";
        let (samples, err) = parse(body, Precision::Nanosecond, 0);
        assert_eq!(samples.len(), 2);
        assert!(err.unwrap().to_string().contains("value=oops"));
    }

    #[test]
    fn out_of_range_timestamps_are_rejected() {
        let body = "cpu value=1 99999999999999999\ncpu value=2 2";
        let (samples, err) = parse(body, Precision::Second, 0);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp(), 2_000_000_000);

        let err = err.unwrap();
        assert!(matches!(err, Error::LineProtocol { .. }));
        let msg = err.to_string();
        assert!(msg.contains("time outside range"), "{}", msg);
        assert!(!msg.contains("query"), "{}", msg);

        let (samples, err) = parse("cpu value=1 9223372036854775807", Precision::Nanosecond, 0);
        assert!(samples.is_empty());
        assert!(err.is_some());
    }

    #[test]
    fn encode_matches_parse() {
        let sample = Sample::builder("cpu")
            .tag("host", "a b")
            .field("value", 1.5)
            .field("n", 2i64)
            .field("s", "q\"uote")
            .timestamp(3_000_000_000)
            .build();

        let line = encode(&sample, Precision::Second).unwrap();
        assert_eq!(line, "cpu,host=a\\ b n=2i,s=\"q\\\"uote\",value=1.5 3");

        let (parsed, err) = parse(&line, Precision::Second, 0);
        assert!(err.is_none());
        assert_eq!(parsed[0], sample);
    }

    #[test]
    fn encode_rejects_empty_fields_and_nan() {
        let empty = Sample::builder("cpu").timestamp(1).build();
        assert!(encode(&empty, Precision::Nanosecond).is_err());

        let nan = Sample::builder("cpu").field("v", f64::NAN).build();
        assert!(encode(&nan, Precision::Nanosecond).is_err());
    }
}
