use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use super::retry::{always, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification service returned {0}")]
    Rejected(u16),
}

/// Best-effort delivery of a message to a user. Callers log failures and
/// carry on; a notification never fails the operation that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: Uuid, message: &str) -> Result<(), NotifyError>;
}

pub fn approval_message(language: &str, title: &str, location: &str) -> String {
    match language {
        "am" => format!("ዝርዝርዎ '{title}' ({location}) ጸድቋል።"),
        "om" => format!("Galmeen keessan '{title}' ({location}) mirkanaa'eera."),
        _ => format!("Your listing '{title}' in {location} has been approved."),
    }
}

pub fn stale_rejection_message(title: &str, location: &str) -> String {
    format!(
        "Your listing '{title}' in {location} has been rejected due to payment timeout. \
         Please resubmit if you wish to list it again."
    )
}

#[derive(Serialize)]
struct SendBody<'a> {
    user_id: Uuid,
    message: &'a str,
}

pub struct HttpNotifier {
    client: Client,
    send_url: String,
    retry: RetryPolicy,
}

impl HttpNotifier {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            send_url: format!("{}/send", base_url.trim_end_matches('/')),
            retry,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, user_id: Uuid, message: &str) -> Result<(), NotifyError> {
        let body = &SendBody { user_id, message };
        let client = &self.client;
        let url = self.send_url.as_str();
        self.retry
            .run(
                "notification",
                move |_| async move {
                    let status = client.post(url).json(body).send().await?.status();
                    if !status.is_success() {
                        return Err(NotifyError::Rejected(status.as_u16()));
                    }
                    Ok::<_, NotifyError>(())
                },
                always,
            )
            .await
    }
}
