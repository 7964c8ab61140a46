use async_trait::async_trait;
use herald_common::{outgoing, tracing};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use serde::Deserialize;

use super::{DeliveryGateway, OutgoingEmail};
use crate::error::GatewayError;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TlsMode {
    /// Plain text, for local relays only
    None,
    /// Upgrade with STARTTLS, refusing servers that do not offer it
    #[default]
    StartTls,
    /// TLS from the first byte (SMTPS)
    Tls,
}

const fn default_port() -> u16 {
    587
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_verify_certificates() -> bool {
    true
}

/// SMTP relay settings
///
/// ```ron
/// smtp: (
///     host: "smtp.example.org",
///     port: 587,
///     tls: StartTls,
///     username: Some("herald"),
///     password: Some("secret"),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsMode,

    /// Accept self-signed certificates. Testing only.
    #[serde(default = "default_verify_certificates")]
    pub verify_certificates: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Timeout for individual SMTP commands
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: default_port(),
            tls: TlsMode::default(),
            verify_certificates: default_verify_certificates(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Gateway backed by an SMTP relay.
#[derive(Debug)]
pub struct SmtpGateway {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl SmtpGateway {
    /// Build the transport. No connection is made until the first send.
    ///
    /// # Errors
    ///
    /// `Configuration` if the TLS parameters cannot be built or only one of
    /// username and password is set.
    pub fn new(config: &SmtpConfig) -> Result<Self, GatewayError> {
        let host = config.host.as_str();

        let tls_parameters = || {
            TlsParameters::builder(host.to_string())
                .dangerous_accept_invalid_certs(!config.verify_certificates)
                .build()
                .map_err(|e| GatewayError::Configuration(format!("TLS configuration error: {e}")))
        };

        let builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .tls(Tls::Required(tls_parameters()?)),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .tls(Tls::Wrapper(tls_parameters()?)),
        }
        .port(config.port)
        .timeout(Some(std::time::Duration::from_secs(config.timeout_secs)));

        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            (None, None) => builder,
            _ => {
                return Err(GatewayError::Configuration(String::from(
                    "smtp username and password must be set together",
                )));
            }
        };

        Ok(Self {
            transport: builder.build(),
            server: format!("{}:{}", config.host, config.port),
        })
    }

    fn build_message(email: &OutgoingEmail) -> Result<Message, GatewayError> {
        let mailbox = |address: &str| {
            address
                .parse::<Mailbox>()
                .map_err(|e| GatewayError::InvalidMessage(format!("invalid address {address}: {e}")))
        };

        let builder = Message::builder()
            .from(mailbox(&email.from)?)
            .reply_to(mailbox(&email.from)?)
            .to(mailbox(&email.to)?)
            .subject(email.subject.as_str());

        let message = match &email.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                email.html.clone(),
            )),
            None => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(email.html.clone()),
            ),
        };

        message.map_err(|e| GatewayError::InvalidMessage(format!("failed to build email: {e}")))
    }
}

impl From<lettre::transport::smtp::Error> for GatewayError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        if error.is_permanent() {
            Self::Permanent(error.to_string())
        } else if error.is_transient() || error.is_timeout() {
            Self::Temporary(error.to_string())
        } else {
            Self::classify(error.to_string())
        }
    }
}

#[async_trait]
impl DeliveryGateway for SmtpGateway {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), GatewayError> {
        let message = Self::build_message(email)?;

        outgoing!(
            level = DEBUG,
            "Sending message to {} via {}",
            email.to,
            self.server
        );

        self.transport.send(message).await?;
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), GatewayError> {
        if self.transport.test_connection().await? {
            tracing::info!(server = %self.server, "SMTP connection test succeeded");
            Ok(())
        } else {
            Err(GatewayError::Temporary(format!(
                "{} did not accept the connection",
                self.server
            )))
        }
    }
}
