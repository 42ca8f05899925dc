//! Markers that request resource usage reporting for a test.

use std::collections::BTreeMap;
use std::fmt;
use std::result;
use std::time::Duration;

use crate::{Error, Result};

/// Marker that requests the running time of a test.
pub const REPORT_DURATION: &str = "report_duration";

/// Marker that requests the peak unique set size of the process tree running a test.
pub const REPORT_USS: &str = "report_uss";

/// Marker that requests the peak size of traced heap allocations of a test.
pub const REPORT_TRACEMALLOC: &str = "report_tracemalloc";

/// Keyword argument of [`REPORT_USS`] holding the sampling interval in seconds.
pub const INTERVAL_ARGUMENT: &str = "interval";

/// Default time between two unique set size samples, used when no marker sets an interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Registration lines for all markers, in the host's `name(arguments): description` format.
const MARKER_LINES: [&str; 3] = [
    "report_duration: report duration of tests.",
    "report_uss(*, interval): report highest unshared memory of tests, \
     observed every `interval` seconds.",
    "report_tracemalloc: report peak traced heap allocations of tests.",
];

/// The part of a test host that knows which markers exist.
///
/// Hosts typically reject or warn about markers that were never registered.
pub trait MarkerRegistry {
    /// Registers a marker with a line of the form `name(arguments): description`.
    fn add_marker_line(&mut self, line: &str);
}

/// Collects the registration lines, for hosts that process them later.
impl MarkerRegistry for Vec<String> {
    fn add_marker_line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Registers every marker this package understands.
pub(crate) fn register_markers(registry: &mut (impl MarkerRegistry + ?Sized)) {
    for line in MARKER_LINES {
        registry.add_marker_line(line);
    }
}

/// A named configuration tag attached to a test, with optional keyword arguments.
///
/// Argument values are kept as the strings the host provided and are only interpreted by the
/// measurement that uses them.
///
/// # Examples
///
/// ```
/// use resource_usage::Marker;
///
/// let marker = Marker::report_uss().kwarg("interval", "0.05");
///
/// assert_eq!(marker.name(), "report_uss");
/// assert_eq!(marker.get("interval"), Some("0.05"));
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Marker {
    name: String,
    kwargs: BTreeMap<String, String>,
}

impl Marker {
    /// Creates a marker without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kwargs: BTreeMap::new(),
        }
    }

    /// The [`REPORT_DURATION`] marker.
    #[must_use]
    pub fn report_duration() -> Self {
        Self::new(REPORT_DURATION)
    }

    /// The [`REPORT_USS`] marker, sampling at the default interval unless an `interval`
    /// argument is added.
    #[must_use]
    pub fn report_uss() -> Self {
        Self::new(REPORT_USS)
    }

    /// The [`REPORT_TRACEMALLOC`] marker.
    #[must_use]
    pub fn report_tracemalloc() -> Self {
        Self::new(REPORT_TRACEMALLOC)
    }

    /// Adds a keyword argument, replacing any earlier value for the same key.
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// The name of the marker.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value of a keyword argument, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).map(String::as_str)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;

        if self.kwargs.is_empty() {
            return Ok(());
        }

        write!(f, "(")?;

        for (index, (key, value)) in self.kwargs.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }

            write!(f, "{key}={value}")?;
        }

        write!(f, ")")
    }
}

/// Determines the USS sampling interval from the `report_uss` markers of a test.
///
/// The first marker that carries an `interval` argument wins, so with markers ordered
/// closest-first a marker on the test overrides one on its module.
pub(crate) fn uss_interval<'a>(
    markers: impl IntoIterator<Item = &'a Marker>,
    default: Duration,
) -> Result<Duration> {
    let Some((marker, value)) = markers
        .into_iter()
        .find_map(|marker| marker.get(INTERVAL_ARGUMENT).map(|value| (marker, value)))
    else {
        return Ok(default);
    };

    parse_interval(value).map_err(|problem| Error::InvalidInterval {
        marker: marker.name().to_string(),
        value: value.to_string(),
        problem,
    })
}

/// Parses a positive number of seconds.
fn parse_interval(value: &str) -> result::Result<Duration, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("not a number of seconds: {e}"))?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err("must be a finite number of seconds greater than zero".to_string());
    }

    let Ok(interval) = Duration::try_from_secs_f64(seconds) else {
        return Err("too long".to_string());
    };

    // Values below one nanosecond pass the check above but convert to zero.
    if interval.is_zero() {
        return Err("must be at least one nanosecond".to_string());
    }

    Ok(interval)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn all_markers_are_registered() {
        let mut lines = Vec::new();

        register_markers(&mut lines);

        let prefixes = [
            "report_duration: ",
            "report_uss(*, interval): ",
            "report_tracemalloc: ",
        ];

        assert_eq!(lines.len(), prefixes.len());

        for prefix in prefixes {
            assert!(lines.iter().any(|l| l.starts_with(prefix)), "{prefix}");
        }
    }

    #[test]
    fn uss_description_mentions_interval_unit() {
        let mut lines = Vec::new();
        register_markers(&mut lines);

        let uss = lines.iter().find(|l| l.starts_with(REPORT_USS)).unwrap();

        assert!(uss.contains("every `interval` seconds"));
    }

    #[test]
    fn kwarg_replaces_earlier_value() {
        let marker = Marker::report_uss()
            .kwarg("interval", "1")
            .kwarg("interval", "2");

        assert_eq!(marker.get("interval"), Some("2"));
        assert_eq!(marker.get("other"), None);
    }

    #[test]
    fn display_lists_arguments() {
        assert_eq!(Marker::report_duration().to_string(), "report_duration");

        let marker = Marker::new("custom").kwarg("b", "2").kwarg("a", "1");
        assert_eq!(marker.to_string(), "custom(a=1, b=2)");
    }

    #[test]
    fn interval_defaults_without_argument() {
        let markers = [Marker::report_uss(), Marker::report_uss()];

        assert_eq!(
            uss_interval(&markers, DEFAULT_INTERVAL).unwrap(),
            DEFAULT_INTERVAL
        );
        assert_eq!(
            uss_interval(&Vec::<Marker>::new(), Duration::from_secs(3)).unwrap(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn interval_comes_from_first_marker_with_argument() {
        let markers = [
            Marker::report_uss(),
            Marker::report_uss().kwarg("interval", "0.25"),
            Marker::report_uss().kwarg("interval", "5"),
        ];

        assert_eq!(
            uss_interval(&markers, DEFAULT_INTERVAL).unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn interval_accepts_whole_seconds_and_whitespace() {
        let markers = [Marker::report_uss().kwarg("interval", " 2 ")];

        assert_eq!(
            uss_interval(&markers, DEFAULT_INTERVAL).unwrap(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn garbled_interval_is_rejected() {
        let markers = [Marker::report_uss().kwarg("interval", "fast")];

        let error = uss_interval(&markers, DEFAULT_INTERVAL).unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidInterval { ref marker, ref value, .. }
                if marker == "report_uss" && value == "fast"
        ));
    }

    #[test]
    fn interval_shorter_than_a_nanosecond_is_rejected() {
        let markers = [Marker::report_uss().kwarg("interval", "1e-10")];

        let error = uss_interval(&markers, DEFAULT_INTERVAL).unwrap_err();

        assert!(matches!(
            error,
            Error::InvalidInterval { ref value, ref problem, .. }
                if value == "1e-10" && problem.contains("nanosecond")
        ));
    }

    #[test]
    fn one_nanosecond_interval_is_accepted() {
        let markers = [Marker::report_uss().kwarg("interval", "1e-9")];

        assert_eq!(
            uss_interval(&markers, DEFAULT_INTERVAL).unwrap(),
            Duration::from_nanos(1)
        );
    }

    #[test]
    fn non_positive_and_infinite_intervals_are_rejected() {
        for value in ["0", "-0.5", "inf", "NaN", "1e300"] {
            let markers = [Marker::report_uss().kwarg("interval", value)];

            let result = uss_interval(&markers, DEFAULT_INTERVAL);

            assert!(
                matches!(result, Err(Error::InvalidInterval { .. })),
                "interval {value} was accepted"
            );
        }
    }
}
