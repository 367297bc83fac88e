//! Windows FILETIME <-> UTC conversion.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};

// Define the Windows epoch as a const.
// NaiveDate/Time construction can panic if given invalid values, but 1601-01-01 00:00:00 is valid.
const WINDOWS_EPOCH_NAIVE: NaiveDateTime = match NaiveDate::from_ymd_opt(1601, 1, 1) {
    Some(date) => match date.and_hms_opt(0, 0, 0) {
        Some(datetime) => datetime,
        // These panics should ideally not be hit for hardcoded valid dates/times.
        None => panic!("Invalid time component for Windows epoch constant"),
    },
    None => panic!("Invalid date component for Windows epoch constant"),
};
const WINDOWS_EPOCH_UTC: DateTime<Utc> =
    DateTime::<Utc>::from_naive_utc_and_offset(WINDOWS_EPOCH_NAIVE, Utc);

/// Converts a Windows FILETIME (100-nanosecond intervals since 1601-01-01 UTC) to a
/// `chrono::DateTime<Utc>`.
pub(crate) fn filetime_to_utc(filetime: i64) -> DateTime<Utc> {
    // FILETIME is technically unsigned, representing 100-nanosecond intervals.
    let filetime_u64 = filetime as u64;

    let secs_since_windows_epoch = filetime_u64 / 10_000_000;
    let nanos_remainder = (filetime_u64 % 10_000_000) * 100;

    let duration_since_windows_epoch = ChronoDuration::seconds(secs_since_windows_epoch as i64)
        + ChronoDuration::nanoseconds(nanos_remainder as i64);

    WINDOWS_EPOCH_UTC + duration_since_windows_epoch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_filetime_converts_to_unix_epoch() {
        let unix_epoch_filetime: i64 = 116_444_736_000_000_000;
        let converted = filetime_to_utc(unix_epoch_filetime);
        assert_eq!(converted, DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    }

    #[test]
    fn zero_filetime_converts_to_windows_epoch() {
        let converted = filetime_to_utc(0);
        assert_eq!(converted, WINDOWS_EPOCH_UTC);
    }

    #[test]
    fn converts_a_specific_2023_date() {
        // 2023-07-15 12:30:45 UTC in 100ns ticks since 1601-01-01.
        let expected = DateTime::<Utc>::from_naive_utc_and_offset(
            NaiveDate::from_ymd_opt(2023, 7, 15)
                .unwrap()
                .and_hms_opt(12, 30, 45)
                .unwrap(),
            Utc,
        );
        let filetime = (expected - WINDOWS_EPOCH_UTC).num_nanoseconds().unwrap() / 100;
        assert_eq!(filetime_to_utc(filetime), expected);
    }
}
