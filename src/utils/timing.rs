use chrono::{DateTime, TimeZone};

/// Format a time as `YYYYmmdd-HHMMSS`, for artifact file names.
pub fn filename_timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
    where Tz::Offset: std::fmt::Display {
    time.format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod test_timing {
    use chrono::{NaiveDate, Utc};
    use super::filename_timestamp;

    #[test]
    fn test_filename_timestamp() {
        let time = NaiveDate::from_ymd_opt(2006, 7, 8)
            .and_then(|date| date.and_hms_opt(9, 10, 11))
            .unwrap()
            .and_utc();
        assert_eq!(filename_timestamp(&time), "20060708-091011");
        assert_eq!(filename_timestamp(&Utc::now()).len(), 15);
    }
}
