use super::{ChannelConfig, ChannelError, MonitorAlert, NotificationChannel};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

/// Delivers alerts as plain-text mail through an SMTP relay.
pub struct EmailChannel {
    name: String,
    to: Mailbox,
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    pub fn from_config(config: &ChannelConfig) -> Option<Self> {
        let to = parse_mailbox(config.to.as_deref()?, "to", &config.name)?;
        let from = parse_mailbox(
            config.from.as_deref().unwrap_or("noreply@localhost"),
            "from",
            &config.name,
        )?;

        let smtp_host = config.smtp_host.as_deref()?.trim();
        if smtp_host.is_empty() {
            return None;
        }

        let mut builder = match AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host) {
            Ok(builder) => builder,
            Err(err) => {
                warn!(channel = %config.name, %err, "invalid SMTP relay host");
                return None;
            }
        };
        if let Some(port) = config.smtp_port {
            builder = builder.port(port);
        }

        Some(Self {
            name: config.name.clone(),
            to,
            from,
            transport: builder.build(),
        })
    }
}

fn parse_mailbox(address: &str, field: &str, channel: &str) -> Option<Mailbox> {
    match address.trim().parse() {
        Ok(mailbox) => Some(mailbox),
        Err(err) => {
            warn!(channel, field, address, %err, "invalid mail address");
            None
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, alert: &MonitorAlert) -> Result<(), ChannelError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(alert.title())
            .body(format!("{}\n\n{}", alert.summary(), alert.message))
            .map_err(|err| ChannelError::InvalidAddress(err.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|err| ChannelError::Smtp(err.to_string()))?;

        debug!(monitor = %alert.monitor_name, channel = %self.name, "sent email notification");
        Ok(())
    }
}
