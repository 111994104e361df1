//! Sample log record parsing.
//!
//! Two record kinds, one per line, case-sensitive:
//!
//! ```text
//! HIT|P: 12.345,-6.7,8.9|N: 0.0,1.0,0.0
//! MISS|S: 0.0,0.0,0.0|E: 10.0,0.0,0.0
//! ```
//!
//! Numbers are plain decimal floats with `.` as the separator regardless of
//! locale, no exponents. Whitespace after a `:` is optional. Anything else,
//! including fragment-marked partial lines, is silently skipped; a sample
//! log is append-only and shared, so malformed content is expected.

use crate::tailer::FRAGMENT_PREFIX;
use glam::DVec3;
use relief_data::{Ray, Vertex};

/// A recognized log record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    /// A sampled surface point. The normal is kept exactly as written.
    Hit(Vertex),
    /// A segment of empty space.
    Miss(Ray),
}

/// Parse one log line. Returns `None` for anything that is not a
/// well-formed record.
pub fn parse_line(line: &str) -> Option<Record> {
    if line.is_empty() || line.starts_with(FRAGMENT_PREFIX) {
        return None;
    }
    if let Some(rest) = line.strip_prefix("HIT|P:") {
        let (position, rest) = parse_vec3(rest)?;
        let rest = rest.strip_prefix("|N:")?;
        let (normal, rest) = parse_vec3(rest)?;
        if !rest.trim().is_empty() {
            return None;
        }
        return Some(Record::Hit(Vertex::new(position, normal)));
    }
    if let Some(rest) = line.strip_prefix("MISS|S:") {
        let (start, rest) = parse_vec3(rest)?;
        let rest = rest.strip_prefix("|E:")?;
        let (end, rest) = parse_vec3(rest)?;
        if !rest.trim().is_empty() {
            return None;
        }
        return Some(Record::Miss(Ray::new(start, end)));
    }
    None
}

fn parse_vec3(input: &str) -> Option<(DVec3, &str)> {
    let input = input.trim_start_matches([' ', '\t']);
    let (x, input) = parse_float(input)?;
    let input = input.strip_prefix(',')?;
    let (y, input) = parse_float(input)?;
    let input = input.strip_prefix(',')?;
    let (z, input) = parse_float(input)?;
    Some((DVec3::new(x, y, z), input))
}

/// Scan a decimal float: optional sign, integer and/or fractional digits,
/// no exponent. Returns the value and the unconsumed remainder.
fn parse_float(input: &str) -> Option<(f64, &str)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }
    let (token, rest) = input.split_at(i);
    token.parse::<f64>().ok().map(|value| (value, rest))
}
