//! Civil-time core: conversions between epoch nanoseconds and calendar
//! components, plus the textual datetime contract.
//!
//! Recognized input forms: `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`,
//! `YYYY-MM-DDTHH:MM:SS` with an optional trailing `Z`. Canonical output
//! forms match SQLite's DATE/TIME/DATETIME.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const SECS_PER_DAY: i64 = 86_400;

/// Unix epoch as a Julian day number.
pub const JULIAN_EPOCH: f64 = 2_440_587.5;

pub fn to_civil(nanos: i64) -> PrimitiveDateTime {
    let odt = OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    PrimitiveDateTime::new(odt.date(), odt.time())
}

pub fn from_civil(dt: PrimitiveDateTime) -> i64 {
    dt.assume_utc().unix_timestamp_nanos() as i64
}

pub fn from_date(date: Date) -> i64 {
    from_civil(PrimitiveDateTime::new(date, Time::MIDNIGHT))
}

fn parse_date_part(s: &str) -> Option<Date> {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u8 = s[5..7].parse().ok()?;
    let day: u8 = s[8..10].parse().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

fn parse_time_part(s: &str) -> Option<Time> {
    let bytes = s.as_bytes();
    if bytes.len() != 8 || bytes[2] != b':' || bytes[5] != b':' {
        return None;
    }
    let hour: u8 = s[0..2].parse().ok()?;
    let minute: u8 = s[3..5].parse().ok()?;
    let second: u8 = s[6..8].parse().ok()?;
    Time::from_hms(hour, minute, second).ok()
}

/// Parse one of the recognized textual forms into epoch nanoseconds.
pub fn parse_datetime_text(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.len() == 10 {
        return parse_date_part(s).map(from_date);
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    if s.len() != 19 {
        return None;
    }
    let sep = s.as_bytes()[10];
    if sep != b' ' && sep != b'T' {
        return None;
    }
    let date = parse_date_part(&s[0..10])?;
    let tod = parse_time_part(&s[11..19])?;
    Some(from_civil(PrimitiveDateTime::new(date, tod)))
}

pub fn format_date(nanos: i64) -> String {
    let dt = to_civil(nanos);
    format!(
        "{:04}-{:02}-{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day()
    )
}

pub fn format_time(nanos: i64) -> String {
    let dt = to_civil(nanos);
    format!("{:02}:{:02}:{:02}", dt.hour(), dt.minute(), dt.second())
}

pub fn format_datetime(nanos: i64) -> String {
    format!("{} {}", format_date(nanos), format_time(nanos))
}

/// Whole seconds since the epoch, floored.
pub fn unix_seconds(nanos: i64) -> i64 {
    nanos.div_euclid(NANOS_PER_SEC)
}

pub fn julian_day(nanos: i64) -> f64 {
    nanos as f64 / (NANOS_PER_SEC as f64 * SECS_PER_DAY as f64) + JULIAN_EPOCH
}
