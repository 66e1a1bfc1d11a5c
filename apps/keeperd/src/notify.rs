use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Lifecycle event sink. When a direct recipient is given the message is
/// addressed to them; otherwise it goes to the operational log.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str, recipient: Option<&str>);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, severity: Severity, message: &str, recipient: Option<&str>) {
        let line = match recipient {
            Some(who) => format!("[{who}] {message}"),
            None => message.to_string(),
        };
        match severity {
            Severity::Debug => debug!("{line}"),
            Severity::Info => info!("{line}"),
            Severity::Warn => warn!("{line}"),
            Severity::Error => error!("{line}"),
        }
    }
}
