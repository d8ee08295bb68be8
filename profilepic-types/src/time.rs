use chrono::{NaiveDateTime, Utc};

/// Naive UTC ISO-8601 timestamp with microseconds, e.g. `2024-05-01T12:34:56.123456`.
pub fn timestamp() -> String {
    format_timestamp(Utc::now().naive_utc())
}

/// Always six fractional digits, so a whole second prints as `.000000`.
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn has_no_offset_and_microseconds() {
        let stamp = timestamp();
        assert!(NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%dT%H:%M:%S%.6f").is_ok());
        assert!(!stamp.ends_with('Z') && !stamp.contains('+'));
        assert_eq!(stamp.split('.').nth(1).map(str::len), Some(6));
    }

    #[rstest]
    #[case(0, "2024-05-01T12:34:56.000000")]
    #[case(7, "2024-05-01T12:34:56.000007")]
    #[case(123_456, "2024-05-01T12:34:56.123456")]
    fn keeps_six_fraction_digits(#[case] micros: u32, #[case] expected: &str) {
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|date| date.and_hms_micro_opt(12, 34, 56, micros))
            .expect("valid date");
        assert_eq!(format_timestamp(at), expected);
    }
}
