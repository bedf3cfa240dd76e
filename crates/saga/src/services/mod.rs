//! External collaborators of the enrollment saga and in-memory implementations.

pub mod directory;
pub mod notification;
pub mod payment;

pub use directory::{InMemoryUserDirectory, UserDirectory, UserProfile};
pub use notification::{
    Channel, InMemoryNotificationTransport, LogNotificationTransport, NotificationMessage,
    NotificationTransport, SentNotification,
};
pub use payment::{InMemoryPaymentVerifier, PaymentVerifier, VerifiedCapture};
