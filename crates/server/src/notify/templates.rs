use chrono::{DateTime, Utc};
use tera::{Context, Tera};

use agenda_core::domain::appointment::AppointmentStatus;
use agenda_core::events::AppointmentEvent;

const CREATED_SUBJECT: &str = "New Appointment Request";
const TRANSITIONED_SUBJECT: &str = "Appointment Update";

/// `1/5/2025, 3:04:05 PM`
const MAIL_TIME_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Renders notification bodies from the templates compiled into the binary.
/// `.html` templates are autoescaped by tera; `.txt` ones are not.
#[derive(Clone, Debug)]
pub struct MailRenderer {
    tera: Tera,
}

impl MailRenderer {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("created.txt", include_str!("../../../../templates/mail/created.txt")),
            ("created.html", include_str!("../../../../templates/mail/created.html")),
            ("transitioned.txt", include_str!("../../../../templates/mail/transitioned.txt")),
            ("transitioned.html", include_str!("../../../../templates/mail/transitioned.html")),
        ])?;
        Ok(Self { tera })
    }

    /// `requester` is the display name used in creation notices.
    pub fn render(
        &self,
        event: &AppointmentEvent,
        requester: &str,
    ) -> Result<RenderedMail, tera::Error> {
        let mut context = Context::new();
        let (template, subject) = match event {
            AppointmentEvent::Created { appointment_type, start_time, note, .. } => {
                context.insert("requester", requester);
                context.insert("appointment_type", appointment_type.as_str());
                context.insert("start_time", &format_mail_time(*start_time));
                context.insert("note", note.as_deref().unwrap_or_default());
                ("created", CREATED_SUBJECT)
            }
            AppointmentEvent::Transitioned { status, delay_reason, new_time, .. } => {
                context.insert("status", status.as_str());
                context.insert("delayed", &(*status == AppointmentStatus::Delayed));
                context.insert("delay_reason", delay_reason.as_deref().unwrap_or_default());
                context.insert("new_time", &new_time.map(format_mail_time).unwrap_or_default());
                ("transitioned", TRANSITIONED_SUBJECT)
            }
        };

        Ok(RenderedMail {
            subject: subject.to_string(),
            text: self.tera.render(&format!("{template}.txt"), &context)?.trim().to_string(),
            html: self.tera.render(&format!("{template}.html"), &context)?.trim().to_string(),
        })
    }
}

pub fn format_mail_time(value: DateTime<Utc>) -> String {
    value.format(MAIL_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use agenda_core::domain::appointment::{AppointmentId, AppointmentStatus, AppointmentType};
    use agenda_core::domain::user::UserId;
    use agenda_core::events::AppointmentEvent;

    use super::{format_mail_time, MailRenderer};

    fn created(note: Option<&str>) -> AppointmentEvent {
        AppointmentEvent::Created {
            appointment_id: AppointmentId("A-1".to_string()),
            requester_id: UserId("u-ava".to_string()),
            approver_id: UserId("u-ben".to_string()),
            appointment_type: AppointmentType::Meeting,
            start_time: Utc.with_ymd_and_hms(2025, 1, 5, 15, 4, 5).unwrap(),
            note: note.map(str::to_string),
        }
    }

    #[test]
    fn mail_time_uses_short_us_locale_shape() {
        let morning = Utc.with_ymd_and_hms(2025, 11, 20, 9, 30, 0).unwrap();
        assert_eq!(format_mail_time(morning), "11/20/2025, 9:30:00 AM");

        let midnight = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 7).unwrap();
        assert_eq!(format_mail_time(midnight), "1/5/2025, 12:00:07 AM");
    }

    #[test]
    fn created_notice_names_requester_type_and_time() {
        let renderer = MailRenderer::new().expect("templates compile");
        let mail = renderer.render(&created(Some("bring the draft")), "Ava").expect("render");

        assert_eq!(mail.subject, "New Appointment Request");
        assert!(mail.text.starts_with("You have a new appointment request from Ava."));
        assert!(mail.text.contains("Note: bring the draft"));
        assert!(mail.html.contains("Type: <b>meeting</b>"));
        assert!(mail.html.contains("Time: 1/5/2025, 3:04:05 PM"));
    }

    #[test]
    fn created_notice_without_note_leaves_it_out_of_the_text() {
        let renderer = MailRenderer::new().expect("templates compile");
        let mail = renderer.render(&created(None), "Ava").expect("render");

        assert!(!mail.text.contains("Note:"));
        assert!(mail.html.ends_with("Note: </p>"));
    }

    #[test]
    fn html_bodies_escape_user_supplied_text() {
        let renderer = MailRenderer::new().expect("templates compile");
        let mail = renderer.render(&created(Some("<script>")), "Ava & co").expect("render");

        assert!(mail.html.contains("&lt;script&gt;"));
        assert!(mail.html.contains("Ava &amp; co"));
        assert!(mail.text.contains("<script>"));
    }

    #[test]
    fn delayed_update_carries_reason_and_new_time() {
        let renderer = MailRenderer::new().expect("templates compile");
        let event = AppointmentEvent::Transitioned {
            appointment_id: AppointmentId("A-1".to_string()),
            requester_id: UserId("u-ava".to_string()),
            status: AppointmentStatus::Delayed,
            delay_reason: Some("travelling".to_string()),
            new_time: Some(Utc.with_ymd_and_hms(2025, 2, 1, 13, 0, 0).unwrap()),
        };

        let mail = renderer.render(&event, "").expect("render");
        assert_eq!(mail.subject, "Appointment Update");
        assert!(mail.text.starts_with("Your appointment has been delayed."));
        assert!(mail.html.contains("<b>delayed</b>"));
        assert!(mail.html.contains("Reason: travelling<br>New Time: 2/1/2025, 1:00:00 PM"));
    }

    #[test]
    fn approved_update_has_no_delay_section() {
        let renderer = MailRenderer::new().expect("templates compile");
        let event = AppointmentEvent::Transitioned {
            appointment_id: AppointmentId("A-1".to_string()),
            requester_id: UserId("u-ava".to_string()),
            status: AppointmentStatus::Approved,
            delay_reason: None,
            new_time: None,
        };

        let mail = renderer.render(&event, "").expect("render");
        assert_eq!(mail.text, "Your appointment has been approved.");
        assert_eq!(mail.html, "<p>Your appointment has been <b>approved</b>.</p>");
    }
}
