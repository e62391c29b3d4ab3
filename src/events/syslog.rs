//! System log sink
//!
//! Critical events and error-level log lines can be mirrored to the host's
//! system log. The sink is a trait so embedders can route to a real syslog
//! daemon; the default writes through `tracing` under a dedicated target.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogLevel {
    Info,
    Warning,
    Error,
}

pub trait SyslogSink: Send + Sync {
    fn write(&self, level: SyslogLevel, source: &str, message: &str);
}

/// Target used by [`TracingSyslog`]; the log buffer bridge ignores it.
pub const SYSLOG_TARGET: &str = "nvm_core::syslog";

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSyslog;

impl SyslogSink for TracingSyslog {
    fn write(&self, level: SyslogLevel, source: &str, message: &str) {
        match level {
            SyslogLevel::Info => tracing::info!(target: SYSLOG_TARGET, source, "{}", message),
            SyslogLevel::Warning => tracing::warn!(target: SYSLOG_TARGET, source, "{}", message),
            SyslogLevel::Error => tracing::error!(target: SYSLOG_TARGET, source, "{}", message),
        }
    }
}

pub fn default_sink() -> Arc<dyn SyslogSink> {
    Arc::new(TracingSyslog)
}
