//! Notifier Boundary
//!
//! Expectation failures fan out to named receivers. Actual delivery (email,
//! Slack, ...) is an external collaborator behind the [`Notifier`] trait;
//! the engine only decides *when* and *to whom*. The default sink emits a
//! structured log line per notification so failures are observable without
//! any delivery configuration.

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one failure notification. Implementations must not panic;
    /// delivery problems are theirs to log.
    async fn notify(&self, receiver: &str, title: &str, body: &str);
}

/// Log-only sink used when no delivery channel is wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, receiver: &str, title: &str, body: &str) {
        tracing::warn!(receiver, title, "notification: {}", body);
    }
}
