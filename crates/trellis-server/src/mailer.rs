//! Mail capability.
//!
//! SMTP delivery itself is an external collaborator; the platform only
//! depends on this interface. `LogMailer` is the development implementation
//! and keeps signup flows working without an SMTP relay.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use trellis_core::error::CoreError;

/// Deadline any real transport must apply to a send
pub const MAIL_TIMEOUT: Duration = Duration::from_secs(15);

/// One outbound mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Narrow capability interface for mail delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), CoreError>;
}

/// Logs mail instead of delivering it
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<(), CoreError> {
        info!(to = %mail.to, subject = %mail.subject, "mail (log transport): {}", mail.body);
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Captures sent mail for assertions
    #[derive(Default)]
    pub struct CapturingMailer {
        pub sent: Mutex<Vec<Mail>>,
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send(&self, mail: &Mail) -> Result<(), CoreError> {
            self.sent.lock().await.push(mail.clone());
            Ok(())
        }
    }
}
