//! Human-readable rendering of measured resource usage.

use std::time::Duration;

/// Unit ladder for unique set sizes.
const USS_UNITS: &[&str] = &[" bytes", "kB", "MB", "GB", "TB", "PB"];
const USS_OVERFLOW_UNIT: &str = "EB";

/// Unit ladder for traced heap allocations.
const ALLOCATED_UNITS: &[&str] = &[" bytes", "kB", "MB", "GB", "TB", "PB", "EB", "ZB"];
const ALLOCATED_OVERFLOW_UNIT: &str = "YB";

const SIGNIFICANT_DIGITS: usize = 3;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// Renders the running time of a unit of work.
///
/// Durations below one minute are shown with millisecond precision, longer durations are
/// rounded to whole seconds and shown as `H:MM:SS`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use resource_usage::format_duration;
///
/// assert_eq!(
///     format_duration(Duration::from_millis(45_123)),
///     "running time: 45.123 seconds"
/// );
/// assert_eq!(
///     format_duration(Duration::from_secs(75)),
///     "running time: 0:01:15"
/// );
/// ```
#[must_use]
pub fn format_duration(elapsed: Duration) -> String {
    let duration_string = if elapsed.as_secs() < SECONDS_PER_MINUTE {
        format!("{:.3} seconds", elapsed.as_secs_f64())
    } else {
        format_clock(round_to_seconds(elapsed))
    };

    format!("running time: {duration_string}")
}

/// Renders the peak unique set size of a process tree.
///
/// # Examples
///
/// ```
/// use resource_usage::format_peak_uss;
///
/// assert_eq!(format_peak_uss(999), "peak unique set size: 999 bytes");
/// assert_eq!(format_peak_uss(1500), "peak unique set size: 1.5kB");
/// ```
#[must_use]
pub fn format_peak_uss(bytes: u64) -> String {
    format!(
        "peak unique set size: {}",
        format_size(bytes_as_f64(bytes), USS_UNITS, USS_OVERFLOW_UNIT)
    )
}

/// Renders the peak size of traced heap allocations.
///
/// # Examples
///
/// ```
/// use resource_usage::format_peak_allocated;
///
/// assert_eq!(format_peak_allocated(2_000_000), "peak allocated memory: 2MB");
/// ```
#[must_use]
pub fn format_peak_allocated(bytes: u64) -> String {
    format!(
        "peak allocated memory: {}",
        format_size(
            bytes_as_f64(bytes),
            ALLOCATED_UNITS,
            ALLOCATED_OVERFLOW_UNIT
        )
    )
}

#[expect(
    clippy::cast_precision_loss,
    reason = "three significant digits are displayed, far below the precision of f64"
)]
fn bytes_as_f64(bytes: u64) -> f64 {
    bytes as f64
}

/// Scales `size` down by 1000 per unit until it is below 1000. If the ladder runs out, the
/// size has been divided once for every ladder entry and the overflow unit applies.
fn format_size(size: f64, units: &[&str], overflow_unit: &str) -> String {
    let mut size = size;

    for unit in units {
        if size < 1000.0 {
            return format!("{}{unit}", format_significant(size, SIGNIFICANT_DIGITS));
        }

        size /= 1000.0;
    }

    format!(
        "{}{overflow_unit}",
        format_significant(size, SIGNIFICANT_DIGITS)
    )
}

/// Formats a number with the given count of significant digits, in the style of the C
/// `%g` conversion: trailing zeros are removed and scientific notation is used when the
/// decimal exponent is below -4 or not below the digit count.
fn format_significant(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }

    if value.is_infinite() {
        let sign = if value.is_sign_negative() { "-" } else { "" };
        return format!("{sign}inf");
    }

    if value == 0.0 {
        return "0".to_string();
    }

    let precision = digits.saturating_sub(1);

    // The exponent must come from the rounded representation: 999.6 rounds to 1.00e3.
    let scientific = format!("{value:.precision$e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .expect("LowerExp output always contains an exponent");
    let exponent: i32 = exponent
        .parse()
        .expect("LowerExp output always has an integer exponent");

    let digits = i32::try_from(digits).expect("digit counts are tiny");

    if exponent < -4 || exponent >= digits {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!(
            "{}e{sign}{:02}",
            strip_trailing_zeros(mantissa),
            exponent.unsigned_abs()
        );
    }

    let decimals = usize::try_from(digits.saturating_sub(1).saturating_sub(exponent))
        .expect("exponent is below the digit count so decimals are non-negative");

    strip_trailing_zeros(&format!("{value:.decimals$}")).to_string()
}

fn strip_trailing_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

/// Rounds to whole seconds, with ties going to the even second.
fn round_to_seconds(elapsed: Duration) -> u64 {
    const HALF_SECOND_NANOS: u32 = 500_000_000;

    let seconds = elapsed.as_secs();
    let nanos = elapsed.subsec_nanos();

    let round_up = nanos > HALF_SECOND_NANOS || (nanos == HALF_SECOND_NANOS && seconds % 2 == 1);

    if round_up {
        seconds.saturating_add(1)
    } else {
        seconds
    }
}

#[expect(
    clippy::integer_division,
    reason = "we split whole seconds into whole clock units"
)]
fn format_clock(total_seconds: u64) -> String {
    let days = total_seconds / SECONDS_PER_DAY;
    let hours = (total_seconds % SECONDS_PER_DAY) / SECONDS_PER_HOUR;
    let minutes = (total_seconds % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
    let seconds = total_seconds % SECONDS_PER_MINUTE;

    let clock = format!("{hours}:{minutes:02}:{seconds:02}");

    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        _ => format!("{days} days, {clock}"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn short_duration_has_millisecond_precision() {
        assert_eq!(
            format_duration(Duration::from_secs_f64(45.1234)),
            "running time: 45.123 seconds"
        );
        assert_eq!(
            format_duration(Duration::ZERO),
            "running time: 0.000 seconds"
        );
        assert_eq!(
            format_duration(Duration::from_millis(59_999)),
            "running time: 59.999 seconds"
        );
    }

    #[test]
    fn long_duration_is_clock_time() {
        assert_eq!(
            format_duration(Duration::from_secs(75)),
            "running time: 0:01:15"
        );
        assert_eq!(
            format_duration(Duration::from_secs(60)),
            "running time: 0:01:00"
        );
        assert_eq!(
            format_duration(Duration::from_secs(3 * 3600 + 25 * 60 + 7)),
            "running time: 3:25:07"
        );
    }

    #[test]
    fn long_duration_rounds_to_nearest_second() {
        assert_eq!(
            format_duration(Duration::from_millis(75_400)),
            "running time: 0:01:15"
        );
        assert_eq!(
            format_duration(Duration::from_millis(75_600)),
            "running time: 0:01:16"
        );
        // Ties go to the even second.
        assert_eq!(
            format_duration(Duration::from_millis(74_500)),
            "running time: 0:01:14"
        );
        assert_eq!(
            format_duration(Duration::from_millis(75_500)),
            "running time: 0:01:16"
        );
    }

    #[test]
    fn multi_day_duration_has_day_prefix() {
        assert_eq!(
            format_duration(Duration::from_secs(SECONDS_PER_DAY + 5)),
            "running time: 1 day, 0:00:05"
        );
        assert_eq!(
            format_duration(Duration::from_secs(2 * SECONDS_PER_DAY + 3 * 3600)),
            "running time: 2 days, 3:00:00"
        );
    }

    #[test]
    fn uss_scales_through_units() {
        assert_eq!(format_peak_uss(0), "peak unique set size: 0 bytes");
        assert_eq!(format_peak_uss(999), "peak unique set size: 999 bytes");
        assert_eq!(format_peak_uss(1000), "peak unique set size: 1kB");
        assert_eq!(format_peak_uss(1500), "peak unique set size: 1.5kB");
        assert_eq!(format_peak_uss(2_000_000), "peak unique set size: 2MB");
        assert_eq!(format_peak_uss(123_456_789), "peak unique set size: 123MB");
        assert_eq!(
            format_peak_uss(4_560_000_000_000),
            "peak unique set size: 4.56TB"
        );
    }

    #[test]
    fn uss_overflows_into_exabytes() {
        assert_eq!(
            format_peak_uss(1_000_000_000_000_000_000),
            "peak unique set size: 1EB"
        );
        assert_eq!(format_peak_uss(u64::MAX), "peak unique set size: 18.4EB");
    }

    #[test]
    fn allocated_scales_through_units() {
        assert_eq!(
            format_peak_allocated(999),
            "peak allocated memory: 999 bytes"
        );
        assert_eq!(format_peak_allocated(1500), "peak allocated memory: 1.5kB");
        assert_eq!(
            format_peak_allocated(2_000_000),
            "peak allocated memory: 2MB"
        );
        assert_eq!(
            format_peak_allocated(u64::MAX),
            "peak allocated memory: 18.4EB"
        );
    }

    #[test]
    fn allocated_overflows_into_yottabytes() {
        assert_eq!(
            format_size(2e24, ALLOCATED_UNITS, ALLOCATED_OVERFLOW_UNIT),
            "2YB"
        );
        assert_eq!(format_size(2e24, USS_UNITS, USS_OVERFLOW_UNIT), "2e+06EB");
    }

    #[test]
    fn rounding_can_reach_scientific_notation() {
        assert_eq!(
            format_size(999.6, USS_UNITS, USS_OVERFLOW_UNIT),
            "1e+03 bytes"
        );
        assert_eq!(format_peak_uss(999_999), "peak unique set size: 1e+03kB");
    }

    #[test]
    fn negative_sizes_are_not_scaled() {
        assert_eq!(
            format_size(-1500.0, USS_UNITS, USS_OVERFLOW_UNIT),
            "-1.5e+03 bytes"
        );
        assert_eq!(
            format_size(-12.0, USS_UNITS, USS_OVERFLOW_UNIT),
            "-12 bytes"
        );
    }

    #[test]
    fn significant_digits_match_percent_g() {
        assert_eq!(format_significant(1.5, 3), "1.5");
        assert_eq!(format_significant(2.0, 3), "2");
        assert_eq!(format_significant(12.345, 3), "12.3");
        assert_eq!(format_significant(0.000_123_4, 3), "0.000123");
        assert_eq!(format_significant(0.000_012_34, 3), "1.23e-05");
        assert_eq!(format_significant(f64::NAN, 3), "nan");
        assert_eq!(format_significant(f64::INFINITY, 3), "inf");
        assert_eq!(format_significant(f64::NEG_INFINITY, 3), "-inf");
    }

    #[test]
    fn larger_sizes_never_format_smaller() {
        let sizes: Vec<u64> = (0..60)
            .map(|shift| (1_u64 << shift).saturating_sub(1))
            .chain([999, 1000, 1001, 999_499, 999_500, 1_000_000])
            .collect();

        let magnitude = |bytes: u64| -> f64 {
            let rendered = format_peak_uss(bytes);
            let value = rendered.trim_start_matches("peak unique set size: ");
            let split = value
                .find(|c: char| c.is_ascii_alphabetic() && c != 'e' || c == ' ')
                .expect("every rendered size has a unit");
            let (number, unit) = value.split_at(split);
            let number: f64 = number.parse().expect("rendered number parses");
            let exponent = USS_UNITS
                .iter()
                .position(|u| *u == unit)
                .expect("unit from the ladder");
            number * 1000_f64.powi(i32::try_from(exponent).expect("small index"))
        };

        for pair in sizes.windows(2) {
            let [a, b] = pair else { unreachable!() };
            if a <= b {
                assert!(
                    magnitude(*a) <= magnitude(*b),
                    "{a} formats larger than {b}"
                );
            }
        }
    }
}
