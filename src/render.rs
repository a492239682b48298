//! Human readable rendering of values in check result texts.

const LONG_UNITS: [(&str, f64); 5] = [
    ("years", 31_536_000.0),
    ("days", 86_400.0),
    ("hours", 3_600.0),
    ("minutes", 60.0),
    ("seconds", 1.0),
];

const SHORT_UNITS: [(&str, f64); 4] = [
    ("seconds", 1.0),
    ("milliseconds", 1e-3),
    ("microseconds", 1e-6),
    ("nanoseconds", 1e-9),
];

fn with_unit(value: f64, unit: &str) -> String {
    if value == 1.0 {
        format!("1 {}", unit.trim_end_matches('s'))
    } else {
        format!("{} {}", value, unit)
    }
}

/// A duration in seconds. From a minute on, the two most significant units are shown, below a
/// single rounded unit.
pub fn timespan(seconds: f64) -> String {
    let seconds = seconds.abs();

    if seconds < 60.0 {
        let (unit, scale) = SHORT_UNITS
            .iter()
            .find(|(_, scale)| seconds >= *scale)
            .copied()
            .unwrap_or(SHORT_UNITS[0]);
        return with_unit((seconds / scale).round(), unit);
    }

    let start = LONG_UNITS
        .iter()
        .position(|(_, scale)| seconds >= *scale)
        .unwrap_or(LONG_UNITS.len() - 1);

    let mut rest = seconds;
    let mut chunks = Vec::with_capacity(2);
    for (unit, scale) in LONG_UNITS.iter().skip(start).take(2) {
        let value = (rest / scale).floor();
        rest -= value * scale;
        chunks.push(with_unit(value, unit));
    }
    chunks.join(" ")
}

/// Like [timespan], but points in the past are shown as `... ago`.
pub fn relative_timespan(seconds: f64) -> String {
    if seconds < 0.0 {
        format!("{} ago", timespan(seconds))
    } else {
        timespan(seconds)
    }
}

pub fn percent(value: f64) -> String {
    if value == 0.0 {
        "0%".to_owned()
    } else {
        format!("{:.2}%", value)
    }
}

fn si(value: f64, unit: &str) -> String {
    const PREFIXES: [&str; 6] = ["", "k", "M", "G", "T", "P"];

    let mut scaled = value;
    let mut prefix = 0;
    while scaled.abs() >= 1000.0 && prefix < PREFIXES.len() - 1 {
        scaled /= 1000.0;
        prefix += 1;
    }

    if prefix == 0 {
        return format!("{} {}", scaled.round(), unit);
    }

    let digits = if scaled.abs() >= 100.0 {
        0
    } else if scaled.abs() >= 10.0 {
        1
    } else {
        2
    };
    format!("{:.*} {}{}", digits, scaled, PREFIXES[prefix], unit)
}

/// Bytes with SI prefixes and three significant digits.
pub fn disksize(bytes: f64) -> String {
    si(bytes, "B")
}

/// Bits per second with SI prefixes.
pub fn bandwidth(bits_per_second: f64) -> String {
    si(bits_per_second, "bit/s")
}

pub fn rate(per_second: f64) -> String {
    format!("{:.1}/s", per_second)
}

pub fn count(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

pub fn days(value: f64) -> String {
    with_unit(value.trunc(), "days")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespan() {
        assert_eq!(timespan(0.0), "0 seconds");
        assert_eq!(timespan(0.0009), "900 microseconds");
        assert_eq!(timespan(0.007), "7 milliseconds");
        assert_eq!(timespan(1.0), "1 second");
        assert_eq!(timespan(42.0), "42 seconds");
        assert_eq!(timespan(90.0), "1 minute 30 seconds");
        assert_eq!(timespan(181_020.0), "2 days 2 hours");
        assert_eq!(timespan(86_400.0), "1 day 0 hours");
        assert_eq!(timespan(31_536_000.0 + 86_400.0 * 3.0), "1 year 3 days");
    }

    #[test]
    fn test_relative_timespan() {
        assert_eq!(relative_timespan(3_600.0), "1 hour 0 minutes");
        assert_eq!(relative_timespan(-120.0), "2 minutes 0 seconds ago");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.0), "0%");
        assert_eq!(percent(100.0), "100.00%");
        assert_eq!(percent(12.5), "12.50%");
    }

    #[test]
    fn test_disksize() {
        assert_eq!(disksize(512.0), "512 B");
        assert_eq!(disksize(929_038_336.0), "929 MB");
        assert_eq!(disksize(536_870_912.0), "537 MB");
        assert_eq!(disksize(1_073_741_824.0), "1.07 GB");
        assert_eq!(disksize(12_345.0), "12.3 kB");
    }

    #[test]
    fn test_other_renderers() {
        assert_eq!(bandwidth(1_000_000_000.0), "1.00 Gbit/s");
        assert_eq!(rate(2.26), "2.3/s");
        assert_eq!(rate(10.0), "10.0/s");
        assert_eq!(count(3.0), "3");
        assert_eq!(count(0.5), "0.50");
        assert_eq!(days(278.0), "278 days");
        assert_eq!(days(1.0), "1 day");
    }
}
