use metrics::{counter, describe_counter};

/// Register metric descriptions (can be called multiple times safely)
pub fn init_metric_descriptions() {
    describe_counter!(
        "nvm_events_stored_total",
        "Total number of events written to the store"
    );
    describe_counter!(
        "nvm_events_trimmed_total",
        "Total number of events removed by trim passes"
    );
    describe_counter!(
        "nvm_log_lines_flushed_total",
        "Total number of side file log lines drained into the store"
    );
    describe_counter!(
        "nvm_context_invalidations_total",
        "Total number of context cache invalidations"
    );
}

/// Record a stored event
pub fn record_event_stored(event_type: &str, severity: &str) {
    counter!(
        "nvm_events_stored_total",
        "type" => event_type.to_string(),
        "severity" => severity.to_string(),
    )
    .increment(1);
}

pub fn record_events_trimmed(count: u64) {
    counter!("nvm_events_trimmed_total").increment(count);
}

pub fn record_log_lines_flushed(count: u64) {
    counter!("nvm_log_lines_flushed_total").increment(count);
}

/// Record a cache invalidation for one inventory domain
pub fn record_context_invalidation(domain: &'static str) {
    counter!("nvm_context_invalidations_total", "domain" => domain).increment(1);
}
