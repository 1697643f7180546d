//! Timestamp grammar for the command line.
//!
//! Accepted forms: integer seconds since the epoch; the literals `now`, `N`
//! and `NOW`; signed duration offsets relative to now (`-10m`, `+2h`); and a
//! fixed list of ISO-like date patterns.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Parses a CLI timestamp into epoch seconds.
pub fn parse_timestamp(input: &str) -> Result<i64, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty timestamp".to_string());
    }

    if matches!(input, "now" | "N" | "NOW") {
        return Ok(Local::now().timestamp());
    }

    if let Ok(secs) = input.parse::<i64>() {
        return Ok(secs);
    }

    if let Some(offset) = parse_offset(input) {
        return Ok(Local::now().timestamp() + offset);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Ok(dt.timestamp());
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, pattern) {
            return Ok(local_timestamp(naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(local_timestamp(naive));
        }
    }

    Err(format!("unparseable timestamp '{input}'"))
}

/// Parses a signed duration like `-10m` or `+2h` into seconds.
fn parse_offset(input: &str) -> Option<i64> {
    let (sign, rest) = match input.as_bytes().first()? {
        b'-' => (-1i64, &input[1..]),
        b'+' => (1i64, &input[1..]),
        _ => return None,
    };
    let unit = match rest.as_bytes().last()? {
        b's' => 1i64,
        b'm' => 60,
        b'h' => 3600,
        b'd' => 86400,
        _ => return None,
    };
    let amount: i64 = rest[..rest.len() - 1].parse().ok()?;
    Some(sign * amount * unit)
}

fn local_timestamp(naive: NaiveDateTime) -> i64 {
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => dt.timestamp(),
        chrono::LocalResult::None => naive.and_utc().timestamp(),
    }
}

/// Formats an epoch-seconds timestamp with the given strftime pattern.
pub fn format_timestamp(ts: i64, pattern: &str) -> String {
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format(pattern).to_string()
        }
        chrono::LocalResult::None => ts.to_string(),
    }
}
