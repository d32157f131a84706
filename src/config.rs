//! Transport configuration: where the SMTP server is, how the connection is
//! secured, who to authenticate as, and how long to wait.
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `SMTP_HOST` | SMTP server host (required) |
//! | `SMTP_PORT` | SMTP server port (default: 587) |
//! | `SMTP_SECURITY` | `none`, `tls_from_start` or `upgrade_to_tls` (default) |
//! | `SMTP_USERNAME` | SMTP username |
//! | `SMTP_PASSWORD` | SMTP password |
//! | `SMTP_TIMEOUT_MS` | Connect/read/write timeout in milliseconds (default: 3000) |
//! | `EMAIL_FROM` | Default sender email |
//! | `EMAIL_FROM_NAME` | Default sender name |

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::address::Address;
use crate::error::ConfigError;

/// Default submission port.
pub const SUBMISSION_PORT: u16 = 587;

/// Timeout used when `SMTP_TIMEOUT_MS` is not set.
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;

/// How the connection to the SMTP server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSecurity {
    /// Plain-text connection. Only meant for tests against local servers.
    None,
    /// TLS from the first byte, on the server's dedicated TLS port (usually
    /// 465). There is no fallback to plain text.
    #[serde(alias = "tls", alias = "ssl_tls")]
    TlsFromStart,
    /// Plain-text connection upgraded with STARTTLS before credentials or
    /// content are sent. Aborts if the server does not offer the upgrade.
    #[serde(alias = "starttls")]
    UpgradeToTls,
}

impl TransportSecurity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TlsFromStart => "tls_from_start",
            Self::UpgradeToTls => "upgrade_to_tls",
        }
    }
}

impl fmt::Display for TransportSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportSecurity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "tls_from_start" | "tls" | "ssl_tls" => Ok(Self::TlsFromStart),
            "upgrade_to_tls" | "starttls" => Ok(Self::UpgradeToTls),
            _ => Err(ConfigError::UnknownSecurity(s.to_string())),
        }
    }
}

/// Connect, read and write timeouts for one transmission attempt.
///
/// Normally one value for all three phases, see [`Timeouts::uniform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Timeouts {
    /// The same timeout for connect, read and write.
    pub fn uniform(timeout: Duration) -> Result<Self, ConfigError> {
        Self::new(timeout, timeout, timeout)
    }

    /// One timeout in milliseconds for all three phases.
    pub fn from_millis(millis: u64) -> Result<Self, ConfigError> {
        Self::uniform(Duration::from_millis(millis))
    }

    /// Separate timeouts per phase. None of them may be zero.
    pub fn new(connect: Duration, read: Duration, write: Duration) -> Result<Self, ConfigError> {
        for timeout in [connect, read, write] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!("{:?}", timeout)));
            }
        }
        Ok(Self {
            connect,
            read,
            write,
        })
    }

    /// Read `SMTP_TIMEOUT_MS`, defaulting to [`DEFAULT_TIMEOUT_MS`].
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var("SMTP_TIMEOUT_MS") {
            Ok(raw) => {
                let millis: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
                Self::from_millis(millis)
            }
            Err(_) => Self::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Upper bound for one whole attempt: the longest single phase.
    ///
    /// With a uniform timeout a stalled server is given up on after that one
    /// timeout, wherever in the exchange it stalls.
    pub fn attempt_deadline(&self) -> Duration {
        self.connect.max(self.read).max(self.write)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        Self {
            connect: timeout,
            read: timeout,
            write: timeout,
        }
    }
}

/// How to reach and authenticate with an SMTP server.
///
/// ```
/// use courier::{TransportConfig, TransportSecurity};
///
/// let config = TransportConfig::builder("smtp.example.com", 465)
///     .security(TransportSecurity::TlsFromStart)
///     .credentials("user", "secret")
///     .build()
///     .unwrap();
/// assert_eq!(config.port(), 465);
/// ```
#[derive(Clone, Deserialize)]
pub struct TransportConfig {
    host: String,
    port: u16,
    security: TransportSecurity,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_verify")]
    verify_server_identity: bool,
}

fn default_verify() -> bool {
    true
}

impl TransportConfig {
    /// Create a validated configuration.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        security: TransportSecurity,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::builder(host, port)
            .security(security)
            .credentials(username, password)
            .build()
    }

    /// Start a builder. Security defaults to [`TransportSecurity::UpgradeToTls`].
    pub fn builder(host: impl Into<String>, port: u16) -> TransportConfigBuilder {
        TransportConfigBuilder {
            config: TransportConfig {
                host: host.into(),
                port,
                security: TransportSecurity::UpgradeToTls,
                username: String::new(),
                password: String::new(),
                verify_server_identity: true,
            },
        }
    }

    /// Gmail's submission endpoint: `smtp.gmail.com:587` with a required
    /// STARTTLS upgrade. `username` is the full Gmail address.
    pub fn gmail(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: SUBMISSION_PORT,
            security: TransportSecurity::UpgradeToTls,
            username: username.into(),
            password: password.into(),
            verify_server_identity: true,
        }
    }

    /// Read `SMTP_HOST`, `SMTP_PORT`, `SMTP_SECURITY`, `SMTP_USERNAME` and
    /// `SMTP_PASSWORD`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SMTP_HOST").map_err(|_| ConfigError::Missing("SMTP_HOST"))?;
        let port = match env::var("SMTP_PORT") {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => SUBMISSION_PORT,
        };
        let security = match env::var("SMTP_SECURITY") {
            Ok(raw) => raw.parse()?,
            Err(_) => TransportSecurity::UpgradeToTls,
        };
        let username = env::var("SMTP_USERNAME").unwrap_or_default();
        let password = env::var("SMTP_PASSWORD").unwrap_or_default();

        Self::new(host, port, security, username, password)
    }

    /// Check host and port. Called by the builder; call it yourself after
    /// deserializing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn security(&self) -> TransportSecurity {
        self.security
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn verify_server_identity(&self) -> bool {
        self.verify_server_identity
    }

    /// Map this configuration plus timeouts onto protocol-client settings.
    pub fn transport_settings(&self, timeouts: &Timeouts) -> Result<TransportSettings, ConfigError> {
        self.validate()?;

        let verify_server_identity = self.verify_server_identity;
        let tls = match self.security {
            TransportSecurity::None => TlsPolicy::None,
            TransportSecurity::TlsFromStart => TlsPolicy::Wrapper {
                verify_server_identity,
            },
            TransportSecurity::UpgradeToTls => TlsPolicy::Required {
                verify_server_identity,
            },
        };

        let credentials = if self.username.is_empty() {
            None
        } else {
            Some((self.username.clone(), self.password.clone()))
        };

        Ok(TransportSettings {
            host: self.host.clone(),
            port: self.port,
            tls,
            credentials,
            timeouts: *timeouts,
        })
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_server_identity", &self.verify_server_identity)
            .finish()
    }
}

/// Builder for [`TransportConfig`].
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the transport security mode.
    pub fn security(mut self, security: TransportSecurity) -> Self {
        self.config.security = security;
        self
    }

    /// Set SMTP credentials. An empty username disables authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Accept certificates that fail verification (self-signed test servers).
    ///
    /// Never enable this against a production server.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.config.verify_server_identity = false;
        self
    }

    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// TLS behaviour handed to the protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// No encryption.
    None,
    /// Implicit TLS from connect.
    Wrapper { verify_server_identity: bool },
    /// STARTTLS, refusing to continue without it.
    Required { verify_server_identity: bool },
}

/// Protocol-client settings derived from a [`TransportConfig`] and
/// [`Timeouts`].
#[derive(Clone)]
pub struct TransportSettings {
    pub host: String,
    pub port: u16,
    pub tls: TlsPolicy,
    /// `(username, password)`, absent when no username is configured.
    pub credentials: Option<(String, String)>,
    pub timeouts: Timeouts,
}

impl TransportSettings {
    /// Build the lettre transport.
    ///
    /// The transport opens a fresh connection for every message.
    pub fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ConfigError> {
        let tls = match self.tls {
            TlsPolicy::None => Tls::None,
            TlsPolicy::Wrapper {
                verify_server_identity,
            } => Tls::Wrapper(self.tls_parameters(verify_server_identity)?),
            TlsPolicy::Required {
                verify_server_identity,
            } => Tls::Required(self.tls_parameters(verify_server_identity)?),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
            .port(self.port)
            .tls(tls)
            .timeout(Some(self.timeouts.connect));

        if let Some((username, password)) = &self.credentials {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn tls_parameters(&self, verify_server_identity: bool) -> Result<TlsParameters, ConfigError> {
        TlsParameters::builder(self.host.clone())
            .dangerous_accept_invalid_certs(!verify_server_identity)
            .build_rustls()
            .map_err(ConfigError::Tls)
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field(
                "username",
                &self.credentials.as_ref().map(|(username, _)| username),
            )
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Get the default from address from environment.
pub fn default_from() -> Option<Address> {
    let email = env::var("EMAIL_FROM").ok()?;
    match env::var("EMAIL_FROM_NAME").ok() {
        Some(name) => Some(Address::with_name(name, email)),
        None => Some(Address::new(email)),
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(raw.to_string())),
    }
}
