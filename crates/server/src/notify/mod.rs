//! Outbound email for appointment events.
//!
//! Services publish into a bounded queue and return immediately. A single
//! background task drains the queue, resolves the recipient, renders the
//! message and hands it to the configured [`Mailer`]. Delivery failures are
//! logged and dropped; they never reach the HTTP caller.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use agenda_core::events::{AppointmentEvent, EventPublisher};
use agenda_db::repositories::{RepositoryError, UserRepository};

pub mod mailer;
pub mod templates;

pub use mailer::{
    mailer_from_config, DisabledMailer, LogMailer, MailError, Mailer, OutgoingMail,
    RecordingMailer, WebhookMailer,
};
pub use templates::{MailRenderer, RenderedMail};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("recipient lookup failed: {0}")]
    Lookup(#[from] RepositoryError),
    #[error("mail rendering failed: {0}")]
    Render(#[from] tera::Error),
    #[error(transparent)]
    Delivery(#[from] MailError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// The recipient account no longer exists.
    Skipped,
}

/// [`EventPublisher`] backed by a bounded channel. Never blocks: when the
/// queue is full or the dispatcher is gone the event is dropped with a warning.
#[derive(Clone, Debug)]
pub struct QueuedPublisher {
    sender: mpsc::Sender<AppointmentEvent>,
}

impl QueuedPublisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AppointmentEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl EventPublisher for QueuedPublisher {
    fn publish(&self, event: AppointmentEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(
                event_name = "notify.queue_full",
                appointment_id = %event.appointment_id(),
                kind = event.event_name(),
                "notification queue full; dropping event"
            ),
            Err(TrySendError::Closed(event)) => warn!(
                event_name = "notify.queue_closed",
                appointment_id = %event.appointment_id(),
                kind = event.event_name(),
                "notification dispatcher stopped; dropping event"
            ),
        }
    }
}

pub struct NotificationDispatcher {
    users: Arc<dyn UserRepository>,
    renderer: MailRenderer,
    mailer: Arc<dyn Mailer>,
    from_address: String,
}

impl NotificationDispatcher {
    pub fn new(
        users: Arc<dyn UserRepository>,
        renderer: MailRenderer,
        mailer: Arc<dyn Mailer>,
        from_address: impl Into<String>,
    ) -> Self {
        Self { users, renderer, mailer, from_address: from_address.into() }
    }

    pub async fn dispatch(&self, event: &AppointmentEvent) -> Result<DispatchOutcome, NotifyError> {
        let Some(recipient) = self.users.find_by_id(event.recipient()).await? else {
            return Ok(DispatchOutcome::Skipped);
        };

        let requester = match event {
            AppointmentEvent::Created { requester_id, .. } => self
                .users
                .find_by_id(requester_id)
                .await?
                .map(|user| user.name)
                .unwrap_or_else(|| requester_id.0.clone()),
            AppointmentEvent::Transitioned { .. } => String::new(),
        };

        let rendered = self.renderer.render(event, &requester)?;
        let mail = OutgoingMail {
            from: self.from_address.clone(),
            to: recipient.email,
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        };
        self.mailer.send(&mail).await?;
        Ok(DispatchOutcome::Sent)
    }

    /// Drains `receiver` until every publisher has been dropped.
    pub async fn run(self, mut receiver: mpsc::Receiver<AppointmentEvent>) {
        info!(
            event_name = "notify.dispatcher.started",
            transport = self.mailer.transport().as_str(),
            "notification dispatcher started"
        );

        while let Some(event) = receiver.recv().await {
            match self.dispatch(&event).await {
                Ok(DispatchOutcome::Sent) => info!(
                    event_name = "notify.sent",
                    appointment_id = %event.appointment_id(),
                    kind = event.event_name(),
                    recipient_id = %event.recipient(),
                    "notification sent"
                ),
                Ok(DispatchOutcome::Skipped) => info!(
                    event_name = "notify.skipped",
                    appointment_id = %event.appointment_id(),
                    recipient_id = %event.recipient(),
                    "notification recipient not found"
                ),
                Err(error) => warn!(
                    event_name = "notify.failed",
                    appointment_id = %event.appointment_id(),
                    kind = event.event_name(),
                    error = %error,
                    "notification delivery failed"
                ),
            }
        }

        info!(event_name = "notify.dispatcher.stopped", "notification dispatcher stopped");
    }
}

/// Starts the dispatcher on the current runtime and returns its publisher.
pub fn spawn(
    dispatcher: NotificationDispatcher,
    capacity: usize,
) -> (QueuedPublisher, JoinHandle<()>) {
    let (publisher, receiver) = QueuedPublisher::channel(capacity);
    let handle = tokio::spawn(dispatcher.run(receiver));
    (publisher, handle)
}
