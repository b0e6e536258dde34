//! Report delivery over SMTP.

use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{Artifact, ReportError};
use crate::config::SmtpSettings;

pub const ATTACHMENT_NAME: &str = "wordcloud.png";

const BODY: &str = "Hello,\n\nAttached is today's Telegram chat word cloud.\n\nRegards";

/// Delivers a rendered report somewhere
#[async_trait]
pub trait ReportDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        label: &str,
        date: NaiveDate,
        artifact: &Artifact,
    ) -> Result<(), ReportError>;
}

pub fn subject(label: &str, date: NaiveDate) -> String {
    format!(
        "Telegram daily word cloud - {} - {}",
        label,
        date.format("%Y-%m-%d")
    )
}

/// Build the mail: plain-text body plus the PNG attachment
pub fn build_message(
    from: Mailbox,
    to: Mailbox,
    label: &str,
    date: NaiveDate,
    png: &[u8],
) -> Result<Message, ReportError> {
    let image_type = ContentType::parse("image/png")?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject(label, date))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(BODY.to_string()))
                .singlepart(Attachment::new(ATTACHMENT_NAME.to_string()).body(png.to_vec(), image_type)),
        )?;

    Ok(message)
}

/// Sends reports with an authenticated SMTP relay
pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpDispatcher {
    pub fn new(settings: &SmtpSettings, recipient: &str) -> Result<Self, ReportError> {
        let to: Mailbox = recipient.parse()?;
        let from: Mailbox = settings.username.parse()?;
        let credentials = Credentials::new(settings.username.clone(), settings.password.clone());

        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        let transport = builder
            .port(settings.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from,
            to,
        })
    }
}

#[async_trait]
impl ReportDispatcher for SmtpDispatcher {
    async fn dispatch(
        &self,
        label: &str,
        date: NaiveDate,
        artifact: &Artifact,
    ) -> Result<(), ReportError> {
        let message = build_message(
            self.from.clone(),
            self.to.clone(),
            label,
            date,
            &artifact.png,
        )?;
        self.transport.send(message).await?;
        info!("Report for {} sent to {}", label, self.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn test_subject_format() {
        assert_eq!(
            subject("All chats", date()),
            "Telegram daily word cloud - All chats - 2024-05-01"
        );
    }

    #[test]
    fn test_message_carries_attachment() {
        let message = build_message(
            "bot@example.com".parse().unwrap(),
            "me@example.com".parse().unwrap(),
            "Chat 1",
            date(),
            b"\x89PNG\r\n\x1a\n",
        )
        .unwrap();

        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("Subject: Telegram daily word cloud - Chat 1 - 2024-05-01"));
        assert!(raw.contains("To: me@example.com"));
        assert!(raw.contains("image/png"));
        assert!(raw.contains(ATTACHMENT_NAME));
        assert!(raw.contains("Attached is today's Telegram chat word cloud."));
    }

    #[test]
    fn test_bad_addresses_are_rejected() {
        let settings = SmtpSettings {
            username: "not an address".to_string(),
            ..SmtpSettings::default()
        };
        assert!(matches!(
            SmtpDispatcher::new(&settings, "me@example.com"),
            Err(ReportError::Address(_))
        ));

        let settings = SmtpSettings {
            username: "bot@example.com".to_string(),
            use_tls: false,
            ..SmtpSettings::default()
        };
        assert!(matches!(
            SmtpDispatcher::new(&settings, "nobody"),
            Err(ReportError::Address(_))
        ));
        assert!(SmtpDispatcher::new(&settings, "me@example.com").is_ok());
    }
}
