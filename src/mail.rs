//! Outbound mail. The auth service only needs "send this text to that address";
//! the transport is chosen once at startup from configuration.

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::config::{SmtpConfig, SmtpSecurity};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()>;
}

/// SMTP delivery through lettre's tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = match cfg.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .context("build SMTP relay")?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                    .context("build SMTP STARTTLS relay")?
            }
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host),
        };
        if let Some(port) = cfg.port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        builder = builder.timeout(Some(std::time::Duration::from_secs(10)));

        // Fail at startup rather than on the first signup.
        cfg.from
            .parse::<lettre::message::Mailbox>()
            .with_context(|| format!("invalid SMTP_FROM address: {}", cfg.from))?;

        Ok(Self {
            transport: builder.build(),
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.parse().context("invalid from address")?)
            .to(to.parse().context("invalid recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(text.to_string())
            .context("build email")?;

        let response = self
            .transport
            .send(message)
            .await
            .context("smtp send")?;
        debug!(code = %response.code(), "smtp accepted message");
        Ok(())
    }
}

/// Dev sender that only logs. Message bodies carry live tokens, so they are not logged.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _text: &str) -> anyhow::Result<()> {
        info!(to = %to, subject = %subject, "mail not sent: SMTP is not configured");
        Ok(())
    }
}
