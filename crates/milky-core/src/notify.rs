use async_trait::async_trait;
use parking_lot::Mutex;

/// One-way sink for operator alerts.
///
/// Used for inference exhaustion and persistence failures. Implementations
/// swallow their own errors; callers never depend on delivery.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, subject: &str, detail: &str);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl OperatorNotifier for LogNotifier {
    async fn notify(&self, subject: &str, detail: &str) {
        tracing::error!(subject, detail, "operator notification");
    }
}

/// Captures notifications in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl OperatorNotifier for RecordingNotifier {
    async fn notify(&self, subject: &str, detail: &str) {
        self.sent.lock().push((subject.to_string(), detail.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_notifier_captures() {
        let notifier = RecordingNotifier::new();
        notifier.notify("inference exhausted", "timeout").await;
        notifier.notify("save failed", "503").await;
        assert_eq!(notifier.count(), 2);
        assert_eq!(notifier.sent()[0].0, "inference exhausted");
        assert_eq!(notifier.sent()[1].1, "503");
    }

    #[tokio::test]
    async fn log_notifier_is_infallible() {
        LogNotifier.notify("subject", "detail").await;
    }
}
