//! Conversion of pact date/time patterns to chrono format strings.
//!
//! Pact files describe dates with Java `SimpleDateFormat` style patterns
//! (`yyyy-MM-dd'T'HH:mm:ss`). Matching and generation both go through
//! chrono, so patterns are translated once here.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Default pattern for `date` rules and generators.
pub const DEFAULT_DATE: &str = "yyyy-MM-dd";
/// Default pattern for `time` rules and generators.
pub const DEFAULT_TIME: &str = "HH:mm:ss";
/// Default pattern for `timestamp`/`datetime` rules and generators.
pub const DEFAULT_DATETIME: &str = "yyyy-MM-dd'T'HH:mm:ss";

/// Which part of a timestamp a pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    /// Calendar date only
    Date,
    /// Time of day only
    Time,
    /// Date and time
    DateTime,
}

/// Translate a `SimpleDateFormat` pattern into a chrono `strftime` string.
#[must_use]
pub fn to_chrono(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // '' is an escaped quote, anything else is a quoted literal
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) != Some(&'\'') {
                        break;
                    }
                    i += 1;
                }
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', 1..=3) => "%3f",
            ('S', 4..=6) => "%6f",
            ('S', _) => "%9f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('D', _) => "%j",
            ('Z', _) => "%z",
            ('X', 1 | 2) => "%z",
            ('X', _) | ('x', _) => "%:z",
            _ => {
                for _ in 0..run {
                    push_literal(&mut out, c);
                }
                i += run;
                continue;
            }
        };
        out.push_str(spec);
        i += run;
    }

    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// Check that `value` parses under `pattern`.
///
/// A date-time pattern may carry only date or only time fields, so those
/// shapes are accepted for [`TemporalKind::DateTime`] as well.
#[must_use]
pub fn parses(value: &str, pattern: &str, kind: TemporalKind) -> bool {
    let format = to_chrono(pattern);
    match kind {
        TemporalKind::Date => NaiveDate::parse_from_str(value, &format).is_ok(),
        TemporalKind::Time => NaiveTime::parse_from_str(value, &format).is_ok(),
        TemporalKind::DateTime => {
            NaiveDateTime::parse_from_str(value, &format).is_ok()
                || DateTime::parse_from_str(value, &format).is_ok()
                || NaiveDate::parse_from_str(value, &format).is_ok()
                || NaiveTime::parse_from_str(value, &format).is_ok()
        }
    }
}

/// Format the current local time with `pattern`.
#[must_use]
pub fn format_now(pattern: &str) -> String {
    chrono::Local::now().format(&to_chrono(pattern)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translates_common_patterns() {
        assert_eq!(to_chrono("yyyy-MM-dd"), "%Y-%m-%d");
        assert_eq!(to_chrono("HH:mm:ss"), "%H:%M:%S");
        assert_eq!(to_chrono("yyyy-MM-dd'T'HH:mm:ss"), "%Y-%m-%dT%H:%M:%S");
        assert_eq!(to_chrono("yyyy-MM-dd'T'HH:mm:ss.SSSXXX"), "%Y-%m-%dT%H:%M:%S.%3f%:z");
        assert_eq!(to_chrono("h 'o''clock' a"), "%-I o'clock %p");
    }

    #[test]
    fn test_parses_by_kind() {
        assert!(parses("2020-01-01", DEFAULT_DATE, TemporalKind::Date));
        assert!(!parses("01/01/2020", DEFAULT_DATE, TemporalKind::Date));
        assert!(parses("08:00:45", DEFAULT_TIME, TemporalKind::Time));
        assert!(parses("2020-01-01T08:00:45", DEFAULT_DATETIME, TemporalKind::DateTime));
        assert!(!parses("2020-01-01", DEFAULT_DATETIME, TemporalKind::DateTime));
        assert!(parses(
            "2020-01-01T08:00:45+02:00",
            "yyyy-MM-dd'T'HH:mm:ssXXX",
            TemporalKind::DateTime
        ));
    }

    #[test]
    fn test_datetime_pattern_with_only_date_fields() {
        assert!(parses("2020-01-01", "yyyy-MM-dd", TemporalKind::DateTime));
        assert!(parses("08:00:45", "HH:mm:ss", TemporalKind::DateTime));
        assert!(!parses("2020-13-01", "yyyy-MM-dd", TemporalKind::DateTime));
        assert!(!parses("01/01/2020", "yyyy-MM-dd", TemporalKind::DateTime));
    }

    #[test]
    fn test_format_now_round_trips() {
        let now = format_now(DEFAULT_DATETIME);
        assert!(parses(&now, DEFAULT_DATETIME, TemporalKind::DateTime));
    }
}
