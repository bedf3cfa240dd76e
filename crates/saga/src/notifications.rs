//! Enrollment notifications sent once a transaction completes.

use domain::SagaTransaction;

use crate::services::{Channel, NotificationMessage, NotificationTransport, UserDirectory};

/// Counts of a single dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends the enrollment email and SMS for completed transactions.
///
/// Failures are logged and counted but never propagated: notification
/// delivery does not affect workflow state.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher<U, N> {
    directory: U,
    transport: N,
}

impl<U, N> NotificationDispatcher<U, N>
where
    U: UserDirectory,
    N: NotificationTransport,
{
    pub fn new(directory: U, transport: N) -> Self {
        Self {
            directory,
            transport,
        }
    }

    /// Notifies the user of `tx` on every channel their profile has.
    pub async fn dispatch(&self, tx: &SagaTransaction) -> DispatchReport {
        let mut report = DispatchReport::default();

        let profile = match self.directory.get_user(&tx.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(
                    transaction_id = %tx.transaction_id,
                    user_id = %tx.user_id,
                    error = %e,
                    "Skipping notifications, user profile unavailable"
                );
                metrics::counter!("notifications_failed_total", "channel" => "all").increment(1);
                report.failed += 1;
                return report;
            }
        };

        let mut deliveries = Vec::with_capacity(2);
        if let Some(email) = profile.email.as_deref() {
            deliveries.push((Channel::Email, email, enrollment_email(tx, &profile.name)));
        }
        if let Some(phone) = profile.phone.as_deref() {
            deliveries.push((Channel::Sms, phone, payment_sms(tx)));
        }

        for (channel, recipient, message) in deliveries {
            let label = channel.to_string();
            match self.transport.send(channel, recipient, &message).await {
                Ok(()) => {
                    metrics::counter!("notifications_sent_total", "channel" => label).increment(1);
                    report.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %tx.transaction_id,
                        %channel,
                        error = %e,
                        "Notification delivery failed"
                    );
                    metrics::counter!("notifications_failed_total", "channel" => label)
                        .increment(1);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn enrollment_email(tx: &SagaTransaction, name: &str) -> NotificationMessage {
    NotificationMessage {
        subject: Some("Enrollment Added".to_string()),
        body: format!(
            "Hi {name}, you are now enrolled in {}. Your payment of {} has been received.",
            tx.course_code, tx.amount
        ),
    }
}

fn payment_sms(tx: &SagaTransaction) -> NotificationMessage {
    NotificationMessage {
        subject: None,
        body: format!(
            "Payment of {} received. You are enrolled in {}.",
            tx.amount, tx.course_code
        ),
    }
}
