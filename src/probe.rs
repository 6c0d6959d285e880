use crate::cache::TtlCache;
use crate::config::ProbeConfig;
use crate::email::EmailAddress;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Outcome of a network check, kept tagged until the scoring boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Valid,
    Invalid { detail: String },
    Unknown { detail: String },
}

impl ProbeOutcome {
    pub fn invalid(detail: impl Into<String>) -> Self {
        ProbeOutcome::Invalid {
            detail: detail.into(),
        }
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        ProbeOutcome::Unknown {
            detail: detail.into(),
        }
    }

    /// Fail-closed projection: only a positive answer counts.
    pub fn is_valid(&self) -> bool {
        matches!(self, ProbeOutcome::Valid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxHost {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MxLookupError {
    #[error("no MX records for {0}")]
    NoRecords(String),
    #[error("MX lookup for {domain} failed: {reason}")]
    Failed { domain: String, reason: String },
}

#[async_trait]
pub trait MxResolver: Send + Sync {
    /// MX hosts for `domain`, most preferred first.
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxHost>, MxLookupError>;
}

pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsMxResolver {
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = match hickory_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                log::warn!("Failed to read system DNS configuration ({e}), using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            timeout,
        }
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxHost>, MxLookupError> {
        log::debug!("Checking MX records for {domain}");

        let lookup = match timeout(self.timeout, self.resolver.mx_lookup(domain)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                return Err(match e.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => {
                        MxLookupError::NoRecords(domain.to_string())
                    }
                    _ => MxLookupError::Failed {
                        domain: domain.to_string(),
                        reason: e.to_string(),
                    },
                })
            }
            Err(_) => {
                return Err(MxLookupError::Failed {
                    domain: domain.to_string(),
                    reason: format!("timed out after {:?}", self.timeout),
                })
            }
        };

        let mut hosts: Vec<MxHost> = lookup
            .iter()
            .map(|mx| MxHost {
                preference: mx.preference(),
                exchange: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
            })
            // A null MX ("." exchange) means the domain accepts no mail.
            .filter(|host| !host.exchange.is_empty())
            .collect();
        hosts.sort_by_key(|host| host.preference);

        if hosts.is_empty() {
            return Err(MxLookupError::NoRecords(domain.to_string()));
        }
        Ok(hosts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SmtpReply {
    code: u16,
    message: String,
}

struct SmtpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl SmtpSession {
    fn new(stream: TcpStream, timeout: Duration) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            timeout,
        }
    }

    /// Reads a full reply, following `NNN-` continuation lines to the last one.
    async fn read_reply(&mut self) -> Result<SmtpReply> {
        let mut message = Vec::new();
        loop {
            let mut line = String::new();
            let read = timeout(self.timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| anyhow!("timed out waiting for SMTP reply"))??;
            if read == 0 {
                return Err(anyhow!("connection closed by SMTP server"));
            }

            let line = line.trim_end();
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| anyhow!("malformed SMTP reply: {line:?}"))?;
            message.push(line.get(4..).unwrap_or("").to_string());

            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(SmtpReply {
                    code,
                    message: message.join(" "),
                });
            }
        }
    }

    async fn command(&mut self, command: &str) -> Result<SmtpReply> {
        log::debug!("SMTP > {command}");
        timeout(
            self.timeout,
            self.writer.write_all(format!("{command}\r\n").as_bytes()),
        )
        .await
        .map_err(|_| anyhow!("timed out sending {command}"))??;

        let reply = self.read_reply().await?;
        log::debug!("SMTP < {} {}", reply.code, reply.message);
        Ok(reply)
    }
}

/// Walks the SMTP handshake up to `RCPT TO` without ever sending a message.
#[derive(Debug, Clone)]
pub struct SmtpProber {
    pub port: u16,
    pub timeout: Duration,
    pub helo_name: String,
    pub mail_from: String,
}

impl SmtpProber {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            port: config.smtp_port,
            timeout: Duration::from_secs(config.smtp_timeout_seconds),
            helo_name: config.helo_name.clone(),
            mail_from: config.mail_from.clone(),
        }
    }

    pub async fn probe(&self, host: &str, email: &str) -> ProbeOutcome {
        // The address is interpolated into RCPT TO and must stay one command line.
        if email.contains(['\r', '\n']) {
            return ProbeOutcome::unknown("address contains a line break, not sent to SMTP");
        }

        log::debug!("Connecting to {host}:{} to probe {email}", self.port);

        let stream = match timeout(self.timeout, TcpStream::connect((host, self.port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return ProbeOutcome::unknown(format!("connect to {host} failed: {e}")),
            Err(_) => return ProbeOutcome::unknown(format!("connect to {host} timed out")),
        };

        let mut session = SmtpSession::new(stream, self.timeout);
        match self.converse(&mut session, email).await {
            Ok(outcome) => {
                if let Err(e) = session.command("QUIT").await {
                    log::debug!("QUIT to {host} failed: {e}");
                }
                outcome
            }
            Err(e) => ProbeOutcome::unknown(format!("SMTP session with {host} failed: {e}")),
        }
    }

    async fn converse(&self, session: &mut SmtpSession, email: &str) -> Result<ProbeOutcome> {
        let greeting = session.read_reply().await?;
        if greeting.code != 220 {
            return Ok(ProbeOutcome::unknown(format!(
                "unexpected greeting {} {}",
                greeting.code, greeting.message
            )));
        }

        let helo = session.command(&format!("HELO {}", self.helo_name)).await?;
        if helo.code != 250 {
            return Ok(ProbeOutcome::unknown(format!("HELO refused with {}", helo.code)));
        }

        let mail = session
            .command(&format!("MAIL FROM:<{}>", self.mail_from))
            .await?;
        if mail.code != 250 {
            return Ok(ProbeOutcome::unknown(format!(
                "MAIL FROM refused with {}",
                mail.code
            )));
        }

        let rcpt = session.command(&format!("RCPT TO:<{email}>")).await?;
        if rcpt.code == 250 {
            Ok(ProbeOutcome::Valid)
        } else {
            Ok(ProbeOutcome::invalid(format!(
                "RCPT TO rejected with {} {}",
                rcpt.code, rcpt.message
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub mx: ProbeOutcome,
    pub smtp: ProbeOutcome,
    pub mx_hosts: Vec<String>,
}

impl ProbeReport {
    /// Both checks unknown, used when the probe itself could not run.
    pub fn unknown(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            mx: ProbeOutcome::unknown(detail.clone()),
            smtp: ProbeOutcome::unknown(detail),
            mx_hosts: Vec::new(),
        }
    }

    pub fn mx_exists(&self) -> bool {
        self.mx.is_valid()
    }

    pub fn smtp_valid(&self) -> bool {
        self.smtp.is_valid()
    }
}

/// MX resolution followed by an SMTP acceptance probe against the first host.
///
/// Every failure collapses into an `Invalid` or `Unknown` outcome; nothing is
/// returned as an error.
pub struct NetworkProbe {
    resolver: Arc<dyn MxResolver>,
    smtp: SmtpProber,
    mx_cache: TtlCache<Vec<MxHost>>,
}

impl NetworkProbe {
    pub fn new(resolver: Arc<dyn MxResolver>, smtp: SmtpProber, mx_cache: TtlCache<Vec<MxHost>>) -> Self {
        Self {
            resolver,
            smtp,
            mx_cache,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let resolver = DnsMxResolver::new(Duration::from_secs(config.dns_timeout_seconds));
        Self::new(
            Arc::new(resolver),
            SmtpProber::from_config(config),
            TtlCache::new(
                config.cache_capacity,
                Duration::from_secs(config.mx_cache_ttl_seconds),
            ),
        )
    }

    /// Cached MX hosts for `domain`. Empty and failed lookups are never cached.
    pub async fn resolve_mx(&self, domain: &str) -> (ProbeOutcome, Vec<MxHost>) {
        if let Some(hosts) = self.mx_cache.get(domain).await {
            log::debug!("Using cached MX hosts for {domain}");
            return (ProbeOutcome::Valid, hosts);
        }

        match self.resolver.lookup_mx(domain).await {
            Ok(hosts) if !hosts.is_empty() => {
                log::debug!("Found {} MX record(s) for {domain}", hosts.len());
                self.mx_cache.insert(domain, hosts.clone()).await;
                (ProbeOutcome::Valid, hosts)
            }
            Ok(_) => (ProbeOutcome::invalid(format!("no MX records for {domain}")), Vec::new()),
            Err(MxLookupError::NoRecords(_)) => {
                log::info!("No MX records for {domain}");
                (ProbeOutcome::invalid(format!("no MX records for {domain}")), Vec::new())
            }
            Err(e) => {
                log::warn!("{e}");
                (ProbeOutcome::unknown(e.to_string()), Vec::new())
            }
        }
    }

    pub async fn probe(&self, email: &EmailAddress) -> ProbeReport {
        let (mx, hosts) = self.resolve_mx(&email.domain).await;

        let smtp = match hosts.first() {
            Some(host) => {
                let outcome = self.smtp.probe(&host.exchange, &email.to_string()).await;
                match &outcome {
                    ProbeOutcome::Valid => log::info!("SMTP check passed for {email}"),
                    ProbeOutcome::Invalid { detail } | ProbeOutcome::Unknown { detail } => {
                        log::info!("SMTP check failed for {email}: {detail}")
                    }
                }
                outcome
            }
            None => ProbeOutcome::unknown("no MX host to probe"),
        };

        ProbeReport {
            mx,
            smtp,
            mx_hosts: hosts.into_iter().map(|h| h.exchange).collect(),
        }
    }
}
