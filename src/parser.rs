//! Latency extraction from job logs.

/// Return the first line of `log` that is entirely a finite number.
///
/// The measurement workload prints exactly one numeric line on success, but the
/// log may also carry warnings or stack traces around it. Lines are trimmed
/// before parsing; everything that does not parse is skipped.
pub fn parse_response_time(log: &str) -> Option<f64> {
    log.lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|value| value.is_finite())
}
