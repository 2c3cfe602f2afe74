//! Human-readable timestamp formatting and parsing.
//!
//! Everything here operates on signed microseconds since the Unix epoch and
//! is UTC-only: there is no dependency on a host time zone database.

use heapless::String;

/// `YYYY-MM-DD HH:MM:SS.mmmmmm`, always 6-digit microseconds.
pub type TimestampString = String<32>;

/// Formats `epoch_us` (signed microseconds since the Unix epoch) as
/// `YYYY-MM-DD HH:MM:SS.mmmmmm`.
pub fn format_datetime(epoch_us: i64) -> TimestampString {
    let mut s = String::new();

    let micros = epoch_us.rem_euclid(1_000_000);
    let total_secs = epoch_us.div_euclid(1_000_000);
    let days = total_secs.div_euclid(86_400);
    let secs_of_day = total_secs.rem_euclid(86_400);

    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;

    // `heapless::String` has no `write!` support without `core::fmt::Write`;
    // use it explicitly.
    use core::fmt::Write as _;
    let _ = write!(
        s,
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
        year, month, day, hour, minute, second, micros
    );
    s
}

/// Formats a (possibly very large) duration in microseconds as
/// `HH:MM:SS.mmmmmm`, with an hour field unbounded by 24 (e.g. `"120:00:00.000000"`
/// for five days).
pub fn format_duration(duration_us: i64) -> TimestampString {
    let mut s = String::new();

    let sign = if duration_us < 0 { "-" } else { "" };
    let duration_us = duration_us.unsigned_abs();

    let micros = duration_us % 1_000_000;
    let total_secs = duration_us / 1_000_000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    use core::fmt::Write as _;
    let _ = write!(
        s,
        "{}{:02}:{:02}:{:02}.{:06}",
        sign, hours, minutes, seconds, micros
    );
    s
}

/// Parses `YYYY-MM-DD HH:MM:SS[.sss|.ssssss]` into signed microseconds since
/// the Unix epoch. The subsecond field may have 3 digits (milliseconds) or 6
/// digits (microseconds); any other width is rejected.
pub fn parse_datetime(s: &str) -> Option<i64> {
    let (date, time) = s.split_once(' ')?;
    let (year, rest) = date.split_once('-')?;
    let (month, day) = rest.split_once('-')?;
    let year: i64 = year.parse().ok()?;
    let month: i64 = month.parse().ok()?;
    let day: i64 = day.parse().ok()?;

    let (hms, frac_str) = match time.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (time, None),
    };

    let (hour, minute, second) = parse_hms(hms)?;

    let micros: i64 = match frac_str {
        None => 0,
        Some(f) => match f.len() {
            3 => f.parse::<i64>().ok()? * 1_000,
            6 => f.parse::<i64>().ok()?,
            _ => return None,
        },
    };

    let days = days_from_civil(year, month, day);
    let secs_of_day = hour * 3600 + minute * 60 + second;
    let total_us = (days * 86_400 + secs_of_day) * 1_000_000 + micros;
    Some(total_us)
}

fn parse_hms(hms: &str) -> Option<(i64, i64, i64)> {
    let mut parts = hms.split(':');
    let hour: i64 = parts.next()?.parse().ok()?;
    let minute: i64 = parts.next()?.parse().ok()?;
    let second: i64 = parts.next()?.parse().ok()?;
    Some((hour, minute, second))
}

/// Howard Hinnant's `civil_from_days`: converts a day count since the Unix
/// epoch (1970-01-01) into a proleptic Gregorian (year, month, day).
fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365; // [0, 399]
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = doy - (153 * mp + 2) / 5 + 1; // [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 }; // [1, 12]
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// The inverse of [`civil_from_days`].
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400; // [0, 399]
    let mp = if m > 2 { m - 3 } else { m + 9 }; // [0, 11]
    let doy = (153 * mp + 2) / 5 + d - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * 146_097 + doe - 719_468
}
