use chrono::{DateTime, Local, Utc};

pub const MICROS_IN_1_MS: u64 = 1_000;
pub const MICROS_IN_1_SEC: u64 = 1_000_000;

// doesnt panic, out of range values map to the epoch
pub fn time_from_micros(micros: u64) -> DateTime<Utc> {
    let secs = i64::try_from(micros / MICROS_IN_1_SEC)
        .expect("u64 should always fit i64 after division by micros_in_1_sec");
    let nanos = u32::try_from((micros % MICROS_IN_1_SEC) * 1_000)
        .expect("sub-second nanos to fit u32");
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Start time as shown in the trace list, e.g. `11-02-2018T05:56:09.297+0000`.
pub fn format_start_ts(micros: u64, utc: bool) -> String {
    const FORMAT: &str = "%m-%d-%YT%H:%M:%S%.3f%z";
    let time = time_from_micros(micros);
    if utc {
        time.format(FORMAT).to_string()
    } else {
        time.with_timezone(&Local).format(FORMAT).to_string()
    }
}

/// Human readable duration: microseconds below 1ms, milliseconds below 1s, seconds above.
/// Zero renders as an empty string.
pub fn duration_str(micros: u64) -> String {
    if micros == 0 {
        String::new()
    } else if micros < MICROS_IN_1_MS {
        format!("{micros}μs")
    } else if micros < MICROS_IN_1_SEC {
        // some instrumentation only reports millisecond resolution
        if micros % MICROS_IN_1_MS == 0 {
            format!("{}ms", micros / MICROS_IN_1_MS)
        } else {
            format!("{:.3}ms", micros as f64 / MICROS_IN_1_MS as f64)
        }
    } else {
        format!("{:.3}s", micros as f64 / MICROS_IN_1_SEC as f64)
    }
}

pub fn micros_to_millis_f64(micros: u64) -> f64 {
    micros as f64 / MICROS_IN_1_MS as f64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn time_from_micros_doesnt_panic() {
        println!("{}", time_from_micros(u64::MAX));
        println!("{}", time_from_micros(0));
    }

    #[test]
    fn formats_utc_start_ts() {
        assert_eq!(
            format_start_ts(1_541_138_169_297_572, true),
            "11-02-2018T05:56:09.297+0000"
        );
    }

    #[test]
    fn duration_strings() {
        assert_eq!(duration_str(0), "");
        assert_eq!(duration_str(999), "999μs");
        assert_eq!(duration_str(5_000), "5ms");
        assert_eq!(duration_str(168_731), "168.731ms");
        assert_eq!(duration_str(1_000_000), "1.000s");
        assert_eq!(duration_str(2_500_123), "2.500s");
    }
}
