//! Lenient date parsing for human-edited sheet cells

use chrono::{Datelike, NaiveDate};

/// Accepted textual formats, day-first before year-first.
const DATE_FORMATS: &[&str] = &[
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d-%b-%y",
    "%d/%m/%y",
    "%d-%m-%y",
];

/// Four-digit formats also accept short years (`24` as year 24), so results
/// outside this window fall through to the two-digit formats.
const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2100;

/// Parse a date cell, ignoring any trailing time component.
///
/// Empty or unparseable input yields `None`; a bad date never fails a row.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let without_time = trimmed.split_whitespace().next().unwrap_or(trimmed);
    let without_iso_time = trimmed.split('T').next().unwrap_or(trimmed);

    [trimmed, without_time, without_iso_time]
        .into_iter()
        .find_map(parse_exact)
}

fn parse_exact(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .filter(|date| PLAUSIBLE_YEARS.contains(&date.year()))
    })
}
