//! Text codecs for the time fields of a `TaskMessage`.
//!
//! - timeout: duration text such as `"10s"`, `"1m30s"`, `"250ms"`, `"0s"`
//! - deadline: RFC 3339; the zero time `0001-01-01T00:00:00Z` means "unset"

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Seconds between `0001-01-01T00:00:00Z` and the Unix epoch.
const ZERO_TIME_UNIX_SECS: i64 = -62_135_596_800;

pub const ZERO_TIME_TEXT: &str = "0001-01-01T00:00:00Z";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} overflows")]
    Overflow(String),
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}

/// Parse duration text. Each component is a decimal number (fraction allowed)
/// followed by a unit; components are summed. A bare `"0"` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = || DurationParseError::Invalid(input.to_string());

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        if unit.is_empty() {
            return Err(invalid());
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationParseError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut nanos = whole
            .checked_mul(scale)
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;

        if !frac_part.is_empty() {
            // 桁数が多すぎる場合は ns 未満を切り捨てる
            let digits = frac_part.len().min(18);
            let frac: u128 = frac_part[..digits].parse().map_err(|_| invalid())?;
            nanos += frac * scale / 10u128.pow(digits as u32);
        }

        total = total
            .checked_add(nanos)
            .ok_or_else(|| DurationParseError::Overflow(input.to_string()))?;
    }

    let secs = u64::try_from(total / 1_000_000_000)
        .map_err(|_| DurationParseError::Overflow(input.to_string()))?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}

/// Format a duration as text that `parse_duration` reads back exactly.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let total_secs = d.as_secs();
    let nanos = d.subsec_nanos();

    if total_secs == 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let secs = total_secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&secs.to_string());
    if nanos > 0 {
        let frac = format!("{nanos:09}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out.push('s');
    out
}

/// Parse an RFC 3339 deadline. The zero time and the empty string mean "unset".
pub fn parse_deadline(input: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc);
    if parsed.timestamp() == ZERO_TIME_UNIX_SECS && parsed.timestamp_subsec_nanos() == 0 {
        return Ok(None);
    }
    Ok(Some(parsed))
}

pub fn format_deadline(deadline: Option<DateTime<Utc>>) -> String {
    match deadline {
        Some(at) => at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
        None => ZERO_TIME_TEXT.to_string(),
    }
}

/// serde adapter: `Duration` <-> duration text.
pub mod timeout_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// serde adapter: `Option<DateTime<Utc>>` <-> RFC 3339 with zero-time as `None`.
pub mod deadline_text {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_deadline(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_deadline(&text).map_err(serde::de::Error::custom)
    }
}
