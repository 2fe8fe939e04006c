//! Temporal value parsing shared by schema inference and execution

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::borrow::Cow;
use tally_ir::{ColumnDescriptor, Value};

/// Ordered default date formats; the first one that fits a column wins.
///
/// `%m/%d/%Y` precedes `%d/%m/%Y`, so ambiguous slash dates read as US order.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%d %b %Y",
    "%Y%m%d",
];

pub fn format_has_time(format: &str) -> bool {
    ["%H", "%T", "%R", "%I"].iter().any(|spec| format.contains(spec))
}

/// Formats made only of digit fields, which would also match plain integers
pub fn is_compact_format(format: &str) -> bool {
    let stripped = format.replace("%Y", "").replace("%m", "").replace("%d", "");
    stripped.is_empty()
}

/// Parse text with one chrono format, as a date or a date-time
pub fn parse_text(text: &str, format: &str) -> Option<NaiveDateTime> {
    if format_has_time(format) {
        NaiveDateTime::parse_from_str(text, format).ok()
    } else {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN))
    }
}

/// Text form of a value for format matching
pub fn temporal_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.trim())),
        Value::Int(i) => Some(Cow::Owned(i.to_string())),
        _ => None,
    }
}

/// Resolve a cell of a temporal column to a date-time
pub fn parse_temporal(value: &Value, format: Option<&str>) -> Option<NaiveDateTime> {
    match value {
        Value::Date(d) => Some(d.and_time(NaiveTime::MIN)),
        Value::DateTime(dt) => Some(*dt),
        _ => {
            let format = format?;
            let text = temporal_text(value)?;
            parse_text(&text, format)
        }
    }
}

/// Calendar date of a cell, using the descriptor's detected format
pub fn resolve_date(value: &Value, column: &ColumnDescriptor) -> Option<NaiveDate> {
    parse_temporal(value, column.date_format.as_deref()).map(|dt| dt.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_and_datetime_formats() {
        let dt = parse_text("2024-01-15", "%Y-%m-%d").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());

        let dt = parse_text("2024-01-15 13:45:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "13:45");

        assert!(parse_text("15/01/2024", "%m/%d/%Y").is_none());
        assert!(parse_text("15/01/2024", "%d/%m/%Y").is_some());
    }

    #[test]
    fn test_compact_format() {
        assert!(is_compact_format("%Y%m%d"));
        assert!(!is_compact_format("%Y-%m-%d"));
        let dt = parse_temporal(&Value::Int(20240115), Some("%Y%m%d")).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_native_values_need_no_format() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_temporal(&Value::Date(d), None).map(|dt| dt.date()), Some(d));
        assert_eq!(parse_temporal(&Value::from("2024-03-01"), None), None);
    }
}
