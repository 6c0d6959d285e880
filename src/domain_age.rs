use crate::cache::TtlCache;
use crate::config::DomainAgeConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WHOIS_PORT: u16 = 43;
const IANA_WHOIS_SERVER: &str = "whois.iana.org";
const FALLBACK_WHOIS_SERVERS: [&str; 2] = [IANA_WHOIS_SERVER, "whois.internic.net"];

const TWO_PART_TLDS: [&str; 17] = [
    "co.uk", "com.au", "co.jp", "co.kr", "com.br", "co.za", "com.mx", "co.in", "com.sg", "co.nz",
    "com.ar", "co.il", "org.uk", "net.au", "gov.uk", "ac.uk", "edu.au",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DomainAge {
    Established { age_days: i64 },
    New { age_days: i64 },
    Unknown { detail: String },
}

impl DomainAge {
    /// An unknown age is treated as new.
    pub fn is_new(&self) -> bool {
        !matches!(self, DomainAge::Established { .. })
    }
}

/// Source of raw registration records.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Raw creation-date values for `domain`, in record order.
    async fn creation_dates(&self, domain: &str) -> Result<Vec<String>>;
}

/// Reduces a host name to the name a registry knows about.
/// e.g., "email.nationalgeographic.com" -> "nationalgeographic.com"
pub fn registrable_domain(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() < 2 {
        return domain;
    }

    let n = parts.len();
    let suffix = format!("{}.{}", parts[n - 2], parts[n - 1]);
    if n >= 3 && TWO_PART_TLDS.contains(&suffix.as_str()) {
        return format!("{}.{}", parts[n - 3], suffix);
    }
    suffix
}

/// Plain-text WHOIS over TCP port 43.
#[derive(Debug, Clone)]
pub struct WhoisClient {
    timeout: Duration,
    creation_pattern: Regex,
    referral_pattern: Regex,
}

impl WhoisClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let creation_pattern = Regex::new(
            r"(?im)^\s*(?:creation\s*date|domain\s*created|created\s*on|created_date|created|registered\s*on|registration\s*date|registration_time|domain_date_created|create_date)[ \t]*[:.]+[ \t]*(\S[^\r\n]*?)\s*$",
        )
        .context("Failed to compile WHOIS creation date pattern")?;
        let referral_pattern = Regex::new(r"(?im)^\s*(?:refer|whois|registrar\s*whois\s*server)[ \t]*:[ \t]*(\S+)\s*$")
            .context("Failed to compile WHOIS referral pattern")?;

        Ok(Self {
            timeout,
            creation_pattern,
            referral_pattern,
        })
    }

    fn whois_server(domain: &str) -> &'static str {
        let tld = domain.rsplit('.').next().unwrap_or(domain);
        match tld {
            "com" | "net" => "whois.verisign-grs.com",
            "org" => "whois.pir.org",
            "info" => "whois.afilias.net",
            "biz" => "whois.neulevel.biz",
            "us" => "whois.nic.us",
            "uk" => "whois.nic.uk",
            "de" => "whois.denic.de",
            "fr" => "whois.afnic.fr",
            "it" => "whois.nic.it",
            "nl" => "whois.domain-registry.nl",
            "au" => "whois.auda.org.au",
            "ca" => "whois.cira.ca",
            "jp" => "whois.jprs.jp",
            "cn" => "whois.cnnic.cn",
            "ru" => "whois.tcinet.ru",
            "br" => "whois.registro.br",
            "mx" => "whois.mx",
            "io" => "whois.nic.io",
            _ => IANA_WHOIS_SERVER,
        }
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String> {
        log::debug!("Connecting to WHOIS server: {server}:{WHOIS_PORT}");

        let mut stream = timeout(self.timeout, TcpStream::connect((server, WHOIS_PORT)))
            .await
            .map_err(|_| anyhow!("connection to {server} timed out"))??;
        stream.write_all(format!("{domain}\r\n").as_bytes()).await?;

        let mut buf = Vec::new();
        timeout(self.timeout, stream.read_to_end(&mut buf))
            .await
            .map_err(|_| anyhow!("reading from {server} timed out"))??;

        if buf.is_empty() {
            return Err(anyhow!("Empty WHOIS response from {server}"));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Every creation-date value in `text`, in the order they appear.
    pub fn extract_creation_dates(&self, text: &str) -> Vec<String> {
        self.creation_pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn referral(&self, text: &str, current: &str) -> Option<String> {
        self.referral_pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
            .find(|server| server != current && server.contains('.'))
    }

    async fn query_with_referral(&self, server: &str, domain: &str) -> Result<Vec<String>> {
        let text = self.query(server, domain).await?;

        // IANA answers with the TLD's own record; its dates are not the domain's.
        if server == IANA_WHOIS_SERVER {
            return match self.referral(&text, server) {
                Some(referral) => {
                    log::debug!("IANA refers {domain} to {referral}");
                    let text = self.query(&referral, domain).await?;
                    Ok(self.extract_creation_dates(&text))
                }
                None => Ok(Vec::new()),
            };
        }

        let dates = self.extract_creation_dates(&text);
        if !dates.is_empty() {
            return Ok(dates);
        }

        // Registries without creation data usually name the authoritative server.
        if let Some(referral) = self.referral(&text, server) {
            log::debug!("Following WHOIS referral from {server} to {referral}");
            let text = self.query(&referral, domain).await?;
            return Ok(self.extract_creation_dates(&text));
        }
        Ok(dates)
    }
}

#[async_trait]
impl RegistryClient for WhoisClient {
    async fn creation_dates(&self, domain: &str) -> Result<Vec<String>> {
        let primary = Self::whois_server(domain);
        log::debug!("Using WHOIS server: {primary} for domain: {domain}");

        let mut last_error = None;
        let servers = std::iter::once(primary)
            .chain(FALLBACK_WHOIS_SERVERS.into_iter().filter(|s| *s != primary));
        for server in servers {
            match self.query_with_referral(server, domain).await {
                Ok(dates) if !dates.is_empty() => return Ok(dates),
                Ok(_) => log::debug!("No creation date from {server} for {domain}"),
                Err(e) => {
                    log::debug!("WHOIS query to {server} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.context(format!("All WHOIS servers failed for {domain}"))),
            None => Ok(Vec::new()),
        }
    }
}

/// Normalises a registry date value to a calendar date.
pub fn parse_creation_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }

    let datetime_formats = [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    for format in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }

    let date_formats = ["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%d.%m.%Y", "%Y/%m/%d"];
    // Registries often append a time or zone, e.g. "2019-03-04 (UTC)" or "04-Mar-2019 12:00 UTC".
    let first_token = raw.split_whitespace().next().unwrap_or(raw);
    for candidate in [raw, first_token] {
        for format in date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                return Some(date);
            }
        }
    }

    None
}

/// Decides whether a domain is newly registered, from registry creation dates.
pub struct DomainAgeAssessor {
    client: Arc<dyn RegistryClient>,
    threshold_days: i64,
    lookup_timeout: Duration,
    cache: TtlCache<DomainAge>,
}

impl DomainAgeAssessor {
    pub fn new(
        client: Arc<dyn RegistryClient>,
        threshold_days: u32,
        lookup_timeout: Duration,
        cache: TtlCache<DomainAge>,
    ) -> Self {
        Self {
            client,
            threshold_days: i64::from(threshold_days),
            lookup_timeout,
            cache,
        }
    }

    pub fn from_config(config: &DomainAgeConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(WhoisClient::new(config.query_timeout())?),
            config.threshold_days,
            config.lookup_timeout(),
            TtlCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_seconds),
            ),
        ))
    }

    pub async fn assess(&self, domain: &str) -> DomainAge {
        let root = registrable_domain(domain);
        log::debug!("Checking domain age for {domain} (root: {root})");

        if !root.contains('.') {
            return DomainAge::Unknown {
                detail: format!("{root} is not a registrable domain"),
            };
        }

        if let Some(cached) = self.cache.get(&root).await {
            log::debug!("Using cached domain age for: {root}");
            return cached;
        }

        let age = match timeout(self.lookup_timeout, self.client.creation_dates(&root)).await {
            Err(_) => DomainAge::Unknown {
                detail: format!("registry lookup timed out after {:?}", self.lookup_timeout),
            },
            Ok(Err(e)) => DomainAge::Unknown {
                detail: format!("registry lookup failed: {e}"),
            },
            Ok(Ok(dates)) => match dates.first() {
                None => DomainAge::Unknown {
                    detail: "no creation date in registry record".to_string(),
                },
                Some(raw) => self.classify(raw, Utc::now().date_naive()),
            },
        };

        match &age {
            DomainAge::Unknown { detail } => {
                log::warn!("Could not determine age for domain {root}: {detail}");
            }
            DomainAge::New { age_days } | DomainAge::Established { age_days } => {
                log::debug!(
                    "Domain {root} is {age_days} days old (threshold: {})",
                    self.threshold_days
                );
                self.cache.insert(&root, age.clone()).await;
            }
        }
        age
    }

    pub async fn is_new_domain(&self, domain: &str) -> bool {
        self.assess(domain).await.is_new()
    }

    fn classify(&self, raw: &str, today: NaiveDate) -> DomainAge {
        match parse_creation_date(raw) {
            None => DomainAge::Unknown {
                detail: format!("unparseable creation date {raw:?}"),
            },
            Some(created) => {
                let age_days = (today - created).num_days();
                if age_days < self.threshold_days {
                    DomainAge::New { age_days }
                } else {
                    DomainAge::Established { age_days }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry answering from a fixed table of raw creation dates.
    #[derive(Default)]
    pub(crate) struct StaticRegistry {
        pub(crate) dates: HashMap<String, Vec<String>>,
        pub(crate) failing: bool,
        pub(crate) delay: Option<Duration>,
        pub(crate) lookups: AtomicUsize,
    }

    impl StaticRegistry {
        pub(crate) fn with_age(domain: &str, age_days: i64) -> Self {
            let created = Utc::now().date_naive() - chrono::Duration::days(age_days);
            let mut registry = Self::default();
            registry.dates.insert(
                domain.to_string(),
                vec![created.format("%Y-%m-%dT00:00:00Z").to_string()],
            );
            registry
        }

        pub(crate) fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistryClient for StaticRegistry {
        async fn creation_dates(&self, domain: &str) -> Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing {
                return Err(anyhow!("registry unreachable"));
            }
            Ok(self.dates.get(domain).cloned().unwrap_or_default())
        }
    }

    pub(crate) fn assessor(registry: Arc<StaticRegistry>) -> DomainAgeAssessor {
        DomainAgeAssessor::new(
            registry,
            30,
            Duration::from_secs(2),
            TtlCache::new(100, Duration::from_secs(3600)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(
            registrable_domain("email.nationalgeographic.com"),
            "nationalgeographic.com"
        );
        assert_eq!(registrable_domain("sub.domain.example.org"), "example.org");
        assert_eq!(registrable_domain("mail.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("test.company.com.au"), "company.com.au");
        assert_eq!(registrable_domain("Mail.Google.COM."), "google.com");
        assert_eq!(registrable_domain("single"), "single");
    }

    #[test]
    fn test_parse_creation_date_formats() {
        let expected = date(2019, 3, 4);
        for raw in [
            "2019-03-04",
            "2019-03-04T10:20:30Z",
            "2019-03-04T10:20:30.0Z",
            "2019-03-04T10:20:30+02:00",
            "2019-03-04 10:20:30",
            "04-Mar-2019",
            "2019.03.04",
            "04.03.2019",
            "2019/03/04",
            "2019-03-04 (UTC)",
        ] {
            assert_eq!(parse_creation_date(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_creation_date("before the internet"), None);
        assert_eq!(parse_creation_date(""), None);
    }

    #[test]
    fn test_extract_creation_dates() {
        let client = WhoisClient::new(Duration::from_secs(1)).unwrap();
        let text = "Domain Name: EXAMPLE.COM\r\n\
                    Registrar: Example Registrar\r\n\
                    Creation Date: 1995-08-14T04:00:00Z\r\n\
                    Updated Date: 2023-08-14T07:01:38Z\r\n\
                    created: 1995-08-14\n";
        assert_eq!(
            client.extract_creation_dates(text),
            vec!["1995-08-14T04:00:00Z", "1995-08-14"]
        );
        assert!(client
            .extract_creation_dates("Updated Date: 2023-01-01")
            .is_empty());
    }

    #[test]
    fn test_referral_extraction() {
        let client = WhoisClient::new(Duration::from_secs(1)).unwrap();
        let text = "% IANA WHOIS server\nrefer:        whois.nic.xyz\n\ndomain: XYZ\n";
        assert_eq!(
            client.referral(text, "whois.iana.org"),
            Some("whois.nic.xyz".to_string())
        );
        assert_eq!(client.referral("no referral here", "whois.iana.org"), None);
    }

    #[test]
    fn test_classify_threshold() {
        let assessor = assessor(Arc::new(StaticRegistry::default()));
        let today = date(2024, 6, 30);

        assert_eq!(
            assessor.classify("2024-06-01", today),
            DomainAge::New { age_days: 29 }
        );
        assert_eq!(
            assessor.classify("2024-05-31", today),
            DomainAge::Established { age_days: 30 }
        );
        assert!(matches!(
            assessor.classify("garbage", today),
            DomainAge::Unknown { .. }
        ));
    }

    #[tokio::test]
    async fn test_old_domain_is_established() {
        let registry = Arc::new(StaticRegistry::with_age("example.com", 8000));
        let assessor = assessor(registry);

        let age = assessor.assess("mail.example.com").await;
        assert_eq!(age, DomainAge::Established { age_days: 8000 });
        assert!(!assessor.is_new_domain("example.com").await);
    }

    #[tokio::test]
    async fn test_young_domain_is_new() {
        let registry = Arc::new(StaticRegistry::with_age("fresh.info", 3));
        let assessor = assessor(registry);
        assert_eq!(
            assessor.assess("fresh.info").await,
            DomainAge::New { age_days: 3 }
        );
    }

    #[tokio::test]
    async fn test_first_date_wins() {
        let mut registry = StaticRegistry::default();
        let today = Utc::now().date_naive();
        registry.dates.insert(
            "multi.com".to_string(),
            vec![
                (today - chrono::Duration::days(2)).format("%Y-%m-%d").to_string(),
                "1999-01-01".to_string(),
            ],
        );
        let assessor = assessor(Arc::new(registry));
        assert_eq!(
            assessor.assess("multi.com").await,
            DomainAge::New { age_days: 2 }
        );
    }

    #[tokio::test]
    async fn test_failures_count_as_new() {
        let failing = Arc::new(StaticRegistry {
            failing: true,
            ..Default::default()
        });
        assert!(assessor(failing).is_new_domain("down.com").await);

        let empty = Arc::new(StaticRegistry::default());
        assert!(assessor(empty).is_new_domain("nodates.com").await);

        let mut garbled = StaticRegistry::default();
        garbled
            .dates
            .insert("garbled.com".to_string(), vec!["sometime".to_string()]);
        assert!(assessor(Arc::new(garbled)).is_new_domain("garbled.com").await);
    }

    #[tokio::test]
    async fn test_lookup_timeout_is_unknown() {
        let mut registry = StaticRegistry::with_age("slow.com", 4000);
        registry.delay = Some(Duration::from_secs(5));
        let assessor = DomainAgeAssessor::new(
            Arc::new(registry),
            30,
            Duration::from_millis(50),
            TtlCache::new(10, Duration::from_secs(60)),
        );

        assert!(matches!(
            assessor.assess("slow.com").await,
            DomainAge::Unknown { .. }
        ));
    }

    #[tokio::test]
    async fn test_known_ages_are_cached_unknown_are_not() {
        let registry = Arc::new(StaticRegistry::with_age("cached.com", 500));
        let assessor = assessor(registry.clone());

        assessor.assess("cached.com").await;
        assessor.assess("www.cached.com").await;
        assert_eq!(registry.lookups(), 1);

        assessor.assess("missing.com").await;
        assessor.assess("missing.com").await;
        assert_eq!(registry.lookups(), 3);
    }
}
