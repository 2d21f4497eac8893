//! Notification Sink
//!
//! Fire-and-forget delivery after a committed credit or debit. A failed
//! delivery is logged and dropped; it never touches the ledger.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A message for one user or for everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "audience", rename_all = "snake_case")]
pub enum Notification {
    Broadcast {
        title: String,
        message: String,
    },
    Personal {
        user_id: String,
        title: String,
        message: String,
    },
}

impl Notification {
    pub fn personal(user_id: &str, title: impl Into<String>, message: impl Into<String>) -> Self {
        Notification::Personal {
            user_id: user_id.to_string(),
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Notification::Broadcast { title, .. } | Notification::Personal { title, .. } => title,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Notification::Broadcast { message, .. } | Notification::Personal { message, .. } => {
                message
            }
        }
    }

    pub fn is_visible_to(&self, user_id: &str) -> bool {
        match self {
            Notification::Broadcast { .. } => true,
            Notification::Personal { user_id: target, .. } => target == user_id,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification) -> Result<()>;
}

/// Logs every notification at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn deliver(&self, notification: Notification) -> Result<()> {
        match &notification {
            Notification::Broadcast { title, message } => {
                info!(title = %title, "📣 {}", message);
            }
            Notification::Personal {
                user_id,
                title,
                message,
            } => {
                info!(user_id = %user_id, title = %title, "🔔 {}", message);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn deliver(&self, _notification: Notification) -> Result<()> {
        Ok(())
    }
}

/// Deliver and swallow the outcome. Called only after the ledger commit.
pub(crate) fn notify(sink: &dyn NotificationSink, notification: Notification) {
    let title = notification.title().to_string();
    if let Err(e) = sink.deliver(notification) {
        warn!(title = %title, error = %e, "Notification delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn deliver(&self, _notification: Notification) -> Result<()> {
            anyhow::bail!("transport down")
        }
    }

    #[test]
    fn test_visibility() {
        let personal = Notification::personal("u1", "Deposit approved", "1000.00 credited");
        assert!(personal.is_visible_to("u1"));
        assert!(!personal.is_visible_to("u2"));

        let broadcast = Notification::Broadcast {
            title: "Maintenance".into(),
            message: "Tonight".into(),
        };
        assert!(broadcast.is_visible_to("anyone"));
        assert_eq!(broadcast.title(), "Maintenance");
    }

    #[test]
    fn test_failed_delivery_is_swallowed() {
        notify(&FailingSink, Notification::personal("u1", "t", "m"));
    }

    #[test]
    fn test_serialized_tag() {
        let json = serde_json::to_string(&Notification::personal("u1", "t", "m")).unwrap();
        assert!(json.contains(r#""audience":"personal""#));
    }
}
