//! SQL date/time functions: DATE, TIME, DATETIME, STRFTIME, JULIANDAY,
//! UNIXEPOCH, with the SQLite modifier strings
//! (`±N day|month|year|hour|minute|second`, `start of …`, `weekday N`).

use crate::engine::types::datetime::{
    self, format_date, format_datetime, format_time, from_civil, julian_day, to_civil,
    unix_seconds, NANOS_PER_SEC,
};
use crate::engine::types::Value;
use smol_str::SmolStr;
use time::{Date, Month, PrimitiveDateTime, Time};

/// Interpret a value as a point in time. Ints and floats are Unix
/// seconds; text uses the recognized datetime forms.
pub fn time_value(v: &Value) -> Option<i64> {
    match v {
        Value::DateTime(t) => Some(*t),
        Value::Str(s) => datetime::parse_datetime_text(s),
        Value::Int(i) => i.checked_mul(NANOS_PER_SEC),
        Value::Float(f) => Some((f * NANOS_PER_SEC as f64) as i64),
        _ => None,
    }
}

fn days_in_month(year: i32, month: Month) -> u8 {
    time::util::days_in_year_month(year, month)
}

fn add_months(dt: PrimitiveDateTime, months: i64) -> Option<PrimitiveDateTime> {
    let month0 = u8::from(dt.month()) as i64 - 1 + months;
    let mut year = dt.year() as i64 + month0.div_euclid(12);
    let mut month = Month::try_from((month0.rem_euclid(12) + 1) as u8).ok()?;
    let mut day = dt.day();
    // Overflowing days roll into the following month, as SQLite does
    // (2001-01-31 +1 month = 2001-03-03).
    let dim = days_in_month(year as i32, month);
    if day > dim {
        day -= dim;
        if month == Month::December {
            year += 1;
        }
        month = month.next();
    }
    let date = Date::from_calendar_date(i32::try_from(year).ok()?, month, day).ok()?;
    Some(PrimitiveDateTime::new(date, dt.time()))
}

fn apply_modifier(nanos: i64, modifier: &str) -> Option<i64> {
    let m = modifier.trim().to_ascii_lowercase();
    if let Some(rest) = m.strip_prefix("start of ") {
        let dt = to_civil(nanos);
        let date = match rest.trim() {
            "day" => dt.date(),
            "month" => Date::from_calendar_date(dt.year(), dt.month(), 1).ok()?,
            "year" => Date::from_calendar_date(dt.year(), Month::January, 1).ok()?,
            _ => return None,
        };
        return Some(from_civil(PrimitiveDateTime::new(date, Time::MIDNIGHT)));
    }
    if let Some(rest) = m.strip_prefix("weekday ") {
        let target: i64 = rest.trim().parse().ok()?;
        if !(0..=6).contains(&target) {
            return None;
        }
        let dt = to_civil(nanos);
        let current = dt.date().weekday().number_days_from_sunday() as i64;
        let advance = (target - current).rem_euclid(7);
        return nanos.checked_add(advance * 86_400 * NANOS_PER_SEC);
    }
    // "±N unit" with an optional sign; plural unit names accepted.
    let (amount_str, unit) = m.split_once(' ')?;
    let amount: i64 = amount_str.trim().parse().ok()?;
    let unit = unit.trim().trim_end_matches('s');
    match unit {
        "second" => nanos.checked_add(amount.checked_mul(NANOS_PER_SEC)?),
        "minute" => nanos.checked_add(amount.checked_mul(60 * NANOS_PER_SEC)?),
        "hour" => nanos.checked_add(amount.checked_mul(3_600 * NANOS_PER_SEC)?),
        "day" => nanos.checked_add(amount.checked_mul(86_400 * NANOS_PER_SEC)?),
        "month" => add_months(to_civil(nanos), amount).map(from_civil),
        "year" => add_months(to_civil(nanos), amount.checked_mul(12)?).map(from_civil),
        _ => None,
    }
}

/// Resolve `args[base]` as a time value and fold every following
/// argument as a modifier.
fn resolve(args: &[Value], base: usize) -> Option<i64> {
    let mut nanos = time_value(args.get(base)?)?;
    for modifier in &args[base + 1..] {
        let text = modifier.as_str()?;
        nanos = apply_modifier(nanos, text)?;
    }
    Some(nanos)
}

pub fn date_fn(args: &[Value]) -> Value {
    match resolve(args, 0) {
        Some(t) => Value::Str(SmolStr::new(format_date(t))),
        None => Value::Null,
    }
}

pub fn time_fn(args: &[Value]) -> Value {
    match resolve(args, 0) {
        Some(t) => Value::Str(SmolStr::new(format_time(t))),
        None => Value::Null,
    }
}

pub fn datetime_fn(args: &[Value]) -> Value {
    match resolve(args, 0) {
        Some(t) => Value::Str(SmolStr::new(format_datetime(t))),
        None => Value::Null,
    }
}

pub fn julianday_fn(args: &[Value]) -> Value {
    match resolve(args, 0) {
        Some(t) => Value::Float(julian_day(t)),
        None => Value::Null,
    }
}

pub fn unixepoch_fn(args: &[Value]) -> Value {
    match resolve(args, 0) {
        Some(t) => Value::Int(unix_seconds(t)),
        None => Value::Null,
    }
}

/// STRFTIME(format, timevalue, modifiers...). Supported specifiers:
/// `%Y %m %d %H %M %S %w %s %%`; anything else yields NULL.
pub fn strftime_fn(args: &[Value]) -> Value {
    let fmt = match args.first().and_then(|v| v.as_str()) {
        Some(f) => f.to_string(),
        None => return Value::Null,
    };
    let nanos = match resolve(args, 1) {
        Some(t) => t,
        None => return Value::Null,
    };
    let dt = to_civil(nanos);
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str(&format!("{:04}", dt.year())),
            Some('m') => out.push_str(&format!("{:02}", u8::from(dt.month()))),
            Some('d') => out.push_str(&format!("{:02}", dt.day())),
            Some('H') => out.push_str(&format!("{:02}", dt.hour())),
            Some('M') => out.push_str(&format!("{:02}", dt.minute())),
            Some('S') => out.push_str(&format!("{:02}", dt.second())),
            Some('w') => out.push_str(&dt.date().weekday().number_days_from_sunday().to_string()),
            Some('s') => out.push_str(&unix_seconds(nanos).to_string()),
            Some('%') => out.push('%'),
            _ => return Value::Null,
        }
    }
    Value::Str(SmolStr::new(out))
}

#[cfg(test)]
mod datetime_fn_tests {
    use super::*;

    fn txt(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn canonical_outputs() {
        assert_eq!(date_fn(&[txt("2024-03-05 10:20:30")]), txt("2024-03-05"));
        assert_eq!(time_fn(&[txt("2024-03-05 10:20:30")]), txt("10:20:30"));
        assert_eq!(
            datetime_fn(&[txt("2024-03-05T10:20:30Z")]),
            txt("2024-03-05 10:20:30")
        );
    }

    #[test]
    fn numeric_inputs_are_unix_seconds() {
        assert_eq!(datetime_fn(&[Value::Int(0)]), txt("1970-01-01 00:00:00"));
        assert_eq!(unixepoch_fn(&[txt("1970-01-02")]), Value::Int(86_400));
    }

    #[test]
    fn additive_modifiers() {
        assert_eq!(
            date_fn(&[txt("2024-03-05"), txt("+2 days")]),
            txt("2024-03-07")
        );
        assert_eq!(
            date_fn(&[txt("2024-03-05"), txt("-1 month")]),
            txt("2024-02-05")
        );
        assert_eq!(
            date_fn(&[txt("2024-02-29"), txt("+1 year")]),
            txt("2025-03-01")
        );
        assert_eq!(
            datetime_fn(&[txt("2024-03-05 23:30:00"), txt("+2 hours")]),
            txt("2024-03-06 01:30:00")
        );
    }

    #[test]
    fn month_overflow_normalizes() {
        assert_eq!(
            date_fn(&[txt("2001-01-31"), txt("+1 month")]),
            txt("2001-03-03")
        );
    }

    #[test]
    fn start_of_and_weekday() {
        assert_eq!(
            date_fn(&[txt("2024-03-05 10:00:00"), txt("start of month")]),
            txt("2024-03-01")
        );
        assert_eq!(
            date_fn(&[txt("2024-03-05"), txt("start of year")]),
            txt("2024-01-01")
        );
        assert_eq!(
            datetime_fn(&[txt("2024-03-05 10:00:00"), txt("start of day")]),
            txt("2024-03-05 00:00:00")
        );
        // 2024-03-05 is a Tuesday; next Sunday is the 10th, and asking
        // for Tuesday stays put.
        assert_eq!(
            date_fn(&[txt("2024-03-05"), txt("weekday 0")]),
            txt("2024-03-10")
        );
        assert_eq!(
            date_fn(&[txt("2024-03-05"), txt("weekday 2")]),
            txt("2024-03-05")
        );
    }

    #[test]
    fn strftime_specifiers() {
        let t = txt("2024-03-05 04:05:06");
        assert_eq!(
            strftime_fn(&[txt("%Y-%m-%d %H:%M:%S"), t.clone()]),
            txt("2024-03-05 04:05:06")
        );
        assert_eq!(strftime_fn(&[txt("%w"), t.clone()]), txt("2"));
        assert_eq!(
            strftime_fn(&[txt("%s"), txt("1970-01-01 00:01:00")]),
            txt("60")
        );
        assert_eq!(strftime_fn(&[txt("100%%"), t.clone()]), txt("100%"));
        assert_eq!(strftime_fn(&[txt("%q"), t]), Value::Null);
    }

    #[test]
    fn invalid_inputs_yield_null() {
        assert_eq!(date_fn(&[txt("garbage")]), Value::Null);
        assert_eq!(date_fn(&[txt("2024-01-01"), txt("+1 fortnight")]), Value::Null);
        assert_eq!(date_fn(&[Value::Bool(true)]), Value::Null);
    }
}
