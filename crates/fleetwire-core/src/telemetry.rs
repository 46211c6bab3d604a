//! Metric names recorded across crates.
//!
//! Values are recorded with the `metrics` facade; the relay decides whether
//! a Prometheus recorder is installed.

/// Envelopes parsed from the wire (counter).
pub const ENVELOPES_RECEIVED_TOTAL: &str = "envelopes_received_total";
/// Frames dropped as malformed (counter, labels: kind).
pub const ENVELOPES_MALFORMED_TOTAL: &str = "envelopes_malformed_total";
/// Handler invocations that failed or panicked (counter, labels: topic, fault).
pub const HANDLER_FAILURES_TOTAL: &str = "handler_failures_total";
/// Envelopes forwarded by the relay (counter, labels: route).
pub const ENVELOPES_FORWARDED_TOTAL: &str = "envelopes_forwarded_total";
/// Forwards that could not be enqueued, or direct sends with no target (counter, labels: reason).
pub const ENVELOPES_DROPPED_TOTAL: &str = "envelopes_dropped_total";
/// Links opened (counter, labels: role).
pub const LINKS_OPENED_TOTAL: &str = "links_opened_total";
/// Links closed (counter, labels: role).
pub const LINKS_CLOSED_TOTAL: &str = "links_closed_total";
/// Currently attached links at the relay (gauge).
pub const LINKS_ACTIVE: &str = "links_active";
/// Link lifetime (histogram, seconds).
pub const LINK_DURATION_SECONDS: &str = "link_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            ENVELOPES_RECEIVED_TOTAL,
            ENVELOPES_MALFORMED_TOTAL,
            HANDLER_FAILURES_TOTAL,
            ENVELOPES_FORWARDED_TOTAL,
            ENVELOPES_DROPPED_TOTAL,
            LINKS_OPENED_TOTAL,
            LINKS_CLOSED_TOTAL,
            LINKS_ACTIVE,
            LINK_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
