//! Email and SMS delivery.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::ServiceError;

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Sms => write!(f, "sms"),
        }
    }
}

/// Content of a notification. SMS ignores the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// Sends notifications to users. Delivery is best-effort.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        message: &NotificationMessage,
    ) -> Result<(), ServiceError>;
}

/// A notification accepted by [`InMemoryNotificationTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub channel: Channel,
    pub recipient: String,
    pub message: NotificationMessage,
}

#[derive(Debug, Default)]
struct InMemoryTransportState {
    sent: Vec<SentNotification>,
    fail_on_send: bool,
    attempts: usize,
}

/// In-memory transport recording every sent notification.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationTransport {
    state: Arc<RwLock<InMemoryTransportState>>,
}

impl InMemoryNotificationTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the transport to reject every send.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.write().fail_on_send = fail;
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.read().sent.clone()
    }

    /// Deliveries on one channel.
    pub fn sent_on(&self, channel: Channel) -> Vec<SentNotification> {
        self.read()
            .sent
            .iter()
            .filter(|n| n.channel == channel)
            .cloned()
            .collect()
    }

    /// Send calls received, failed ones included.
    pub fn attempt_count(&self) -> usize {
        self.read().attempts
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryTransportState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryTransportState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NotificationTransport for InMemoryNotificationTransport {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        message: &NotificationMessage,
    ) -> Result<(), ServiceError> {
        let mut state = self.write();
        state.attempts += 1;

        if state.fail_on_send {
            return Err(ServiceError::Unavailable(format!("{channel} gateway down")));
        }

        state.sent.push(SentNotification {
            channel,
            recipient: recipient.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

/// Transport that writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationTransport;

#[async_trait]
impl NotificationTransport for LogNotificationTransport {
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        message: &NotificationMessage,
    ) -> Result<(), ServiceError> {
        tracing::info!(
            %channel,
            recipient,
            subject = message.subject.as_deref().unwrap_or(""),
            body = %message.body,
            "Notification sent"
        );
        Ok(())
    }
}
