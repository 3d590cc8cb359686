//! Convert between [chrono::DateTime] and the f64 seconds-since-epoch
//! representation used on the frame slot and in the tracker.

use chrono::{DateTime, TimeZone, Utc};

pub fn datetime_to_f64<TZ>(dt: &DateTime<TZ>) -> f64
where
    TZ: TimeZone,
{
    let secs = dt.timestamp();
    let nsecs = dt.timestamp_subsec_nanos();
    (secs as f64) + (nsecs as f64 * 1e-9)
}

pub fn f64_to_datetime(timestamp_f64: f64) -> DateTime<Utc> {
    let secs = timestamp_f64.floor() as i64;
    let nsecs = ((timestamp_f64 - secs as f64) * 1e9).round() as u32;
    DateTime::from_timestamp(secs, nsecs).unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
}

/// Current wall clock as f64 seconds since the Unix epoch.
pub fn now_f64() -> f64 {
    datetime_to_f64(&Utc::now())
}

/// Current wall clock in integer milliseconds, as carried by the control
/// RPCs.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 45).unwrap();
        let ts = datetime_to_f64(&dt);
        assert_eq!(f64_to_datetime(ts), dt);
    }

    #[test]
    fn fractional_seconds_preserved() {
        let ts = 1_715_950_245.25;
        let dt = f64_to_datetime(ts);
        assert!((datetime_to_f64(&dt) - ts).abs() < 1e-6);
    }
}
