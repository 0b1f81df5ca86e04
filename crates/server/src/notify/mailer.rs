use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use agenda_core::config::{MailConfig, MailTransport};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport is misconfigured: {0}")]
    Configuration(String),
    #[error("mail request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail webhook answered with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    fn transport(&self) -> MailTransport;
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn transport(&self) -> MailTransport {
        MailTransport::Log
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        info!(
            event_name = "mail.logged",
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.text,
            "mail written to log"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    fn transport(&self) -> MailTransport {
        MailTransport::Disabled
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        debug!(event_name = "mail.discarded", to = %mail.to, "mail delivery disabled");
        Ok(())
    }
}

/// POSTs `{from, to, subject, text, html}` as JSON to a relay endpoint.
#[derive(Clone, Debug)]
pub struct WebhookMailer {
    client: Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: impl Into<String>) -> Result<Self, MailError> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    fn transport(&self) -> MailTransport {
        MailTransport::Webhook
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let response = self.client.post(&self.url).json(mail).send().await?;
        if !response.status().is_success() {
            return Err(MailError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Keeps every message in memory. Used by tests across the workspace.
#[derive(Clone, Debug, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    fail_with: Option<u16>,
}

impl RecordingMailer {
    /// A mailer that records the attempt and then reports a rejection.
    pub fn failing(status: u16) -> Self {
        Self { sent: Arc::default(), fail_with: Some(status) }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    fn transport(&self) -> MailTransport {
        MailTransport::Log
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(mail.clone()),
            Err(poisoned) => poisoned.into_inner().push(mail.clone()),
        }
        match self.fail_with {
            Some(status) => Err(MailError::Rejected(status)),
            None => Ok(()),
        }
    }
}

pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match config.transport {
        MailTransport::Log => Ok(Arc::new(LogMailer)),
        MailTransport::Disabled => Ok(Arc::new(DisabledMailer)),
        MailTransport::Webhook => {
            let url = config.webhook_url.as_deref().ok_or_else(|| {
                MailError::Configuration(
                    "mail.webhook_url is required for webhook transport".to_string(),
                )
            })?;
            Ok(Arc::new(WebhookMailer::new(url)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use tokio::net::TcpListener;

    use agenda_core::config::{MailConfig, MailTransport};

    use super::{
        mailer_from_config, MailError, Mailer, OutgoingMail, RecordingMailer, WebhookMailer,
    };

    /// Local relay answering every POST to `/mail` with `status`.
    async fn relay(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/mail",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().expect("relay lock").push(body);
                    status
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        let addr = listener.local_addr().expect("relay addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/mail"), received)
    }

    fn config(transport: MailTransport, webhook_url: Option<&str>) -> MailConfig {
        MailConfig {
            transport,
            from_address: "agenda@localhost".to_string(),
            webhook_url: webhook_url.map(str::to_string),
            queue_capacity: 8,
        }
    }

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from: "agenda@localhost".to_string(),
            to: "ben@example.com".to_string(),
            subject: "New Appointment Request".to_string(),
            text: "hello".to_string(),
            html: "<p>hello</p>".to_string(),
        }
    }

    #[test]
    fn config_selects_matching_transport() {
        for transport in [MailTransport::Log, MailTransport::Disabled, MailTransport::Webhook] {
            let mailer = mailer_from_config(&config(transport, Some("http://127.0.0.1:9/mail")))
                .expect("mailer");
            assert_eq!(mailer.transport(), transport);
        }
    }

    #[test]
    fn webhook_without_url_is_a_configuration_error() {
        let error = match mailer_from_config(&config(MailTransport::Webhook, None)) {
            Ok(_) => panic!("webhook transport needs a url"),
            Err(error) => error,
        };
        assert!(matches!(error, MailError::Configuration(_)));
    }

    #[test]
    fn outgoing_mail_serializes_as_flat_json() {
        let value = serde_json::to_value(mail()).expect("serialize");
        assert_eq!(value["to"], "ben@example.com");
        assert_eq!(value["html"], "<p>hello</p>");
    }

    #[tokio::test]
    async fn recording_mailer_keeps_attempts_even_when_failing() {
        let mailer = RecordingMailer::failing(502);
        let result = mailer.send(&mail()).await;

        assert!(matches!(result, Err(MailError::Rejected(502))));
        assert_eq!(mailer.sent(), vec![mail()]);
    }

    #[tokio::test]
    async fn webhook_posts_json_payload_and_accepts_2xx() {
        let (url, received) = relay(StatusCode::NO_CONTENT).await;
        let mailer = WebhookMailer::new(url).expect("client");

        mailer.send(&mail()).await.expect("relay accepted");

        let received = received.lock().expect("relay lock").clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["from"], "agenda@localhost");
        assert_eq!(received[0]["to"], "ben@example.com");
        assert_eq!(received[0]["subject"], "New Appointment Request");
        assert_eq!(received[0]["text"], "hello");
        assert_eq!(received[0]["html"], "<p>hello</p>");
    }

    #[tokio::test]
    async fn webhook_non_success_status_is_rejected() {
        let (url, received) = relay(StatusCode::SERVICE_UNAVAILABLE).await;
        let mailer = WebhookMailer::new(url).expect("client");

        let result = mailer.send(&mail()).await;

        assert!(matches!(result, Err(MailError::Rejected(503))));
        assert_eq!(received.lock().expect("relay lock").len(), 1);
    }

    #[tokio::test]
    async fn webhook_unreachable_relay_is_a_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let mailer = WebhookMailer::new(format!("http://{addr}/mail")).expect("client");
        let result = mailer.send(&mail()).await;

        assert!(matches!(result, Err(MailError::Request(_))));
    }
}
