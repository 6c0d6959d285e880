use crate::config::Config;
use crate::domain_age::{DomainAge, DomainAgeAssessor};
use crate::email::{EmailAddress, EmailError};
use crate::keywords::SpamKeywords;
use crate::lists::{DomainLists, ListError};
use crate::probe::{NetworkProbe, ProbeOutcome, ProbeReport};
use crate::reputation::{ReputationError, ReputationStore};
use crate::scoring::{self, ScoreWeights, Signals, Verdict};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Lists(#[from] ListError),
    #[error(transparent)]
    Reputation(#[from] ReputationError),
}

/// Tagged outcomes behind the boolean network signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDetails {
    pub mx: ProbeOutcome,
    pub smtp: ProbeOutcome,
    pub domain_age: DomainAge,
    pub mx_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub email: String,
    pub domain: String,
    pub disposable: bool,
    pub blacklisted: bool,
    pub whitelisted: bool,
    pub mx_exists: bool,
    pub smtp_valid: bool,
    pub new_domain: bool,
    pub spam_keywords: bool,
    pub reputation_penalty: i32,
    pub score: u8,
    pub verdict: Verdict,
    pub checks: CheckDetails,
}

/// Runs every check for one address and turns the signals into a verdict.
pub struct Verifier {
    lists: Arc<DomainLists>,
    keywords: Arc<SpamKeywords>,
    reputation: ReputationStore,
    probe: Arc<NetworkProbe>,
    domain_age: Arc<DomainAgeAssessor>,
    weights: ScoreWeights,
}

impl Verifier {
    pub fn new(
        lists: Arc<DomainLists>,
        keywords: Arc<SpamKeywords>,
        reputation: ReputationStore,
        probe: Arc<NetworkProbe>,
        domain_age: Arc<DomainAgeAssessor>,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            lists,
            keywords,
            reputation,
            probe,
            domain_age,
            weights,
        }
    }

    /// Wires every collaborator from the configuration file.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let keywords = SpamKeywords::from_file(&config.spam_keywords_path())?;
        let reputation = ReputationStore::open(&config.reputation.database_path)
            .context("Failed to open reputation database")?;
        let weights = ScoreWeights::load(&config.scoring.overrides_path)
            .context("Failed to load score weights")?;

        Ok(Self::new(
            Arc::new(DomainLists::new(&config.lists.directory)),
            Arc::new(keywords),
            reputation,
            Arc::new(NetworkProbe::from_config(&config.probe)),
            Arc::new(DomainAgeAssessor::from_config(&config.domain_age)?),
            weights,
        ))
    }

    pub fn lists(&self) -> &Arc<DomainLists> {
        &self.lists
    }

    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub async fn verify(&self, raw_email: &str) -> Result<VerificationResult, VerifyError> {
        let email = EmailAddress::parse(raw_email)?;
        log::debug!("Verifying {email}");

        let probe_task = {
            let probe = Arc::clone(&self.probe);
            let email = email.clone();
            tokio::spawn(async move { probe.probe(&email).await })
        };
        let age_task = {
            let assessor = Arc::clone(&self.domain_age);
            let domain = email.domain.clone();
            tokio::spawn(async move { assessor.assess(&domain).await })
        };

        let inline = self.inline_checks(&email);

        // Join both branches before acting on the inline result so no task is left running.
        let report = probe_task.await.unwrap_or_else(|e| {
            log::error!("Network probe for {email} did not complete: {e}");
            ProbeReport::unknown(format!("probe task failed: {e}"))
        });
        let age = age_task.await.unwrap_or_else(|e| {
            log::error!("Domain age check for {} did not complete: {e}", email.domain);
            DomainAge::Unknown {
                detail: format!("domain age task failed: {e}"),
            }
        });
        let (disposable, blacklisted, whitelisted, spam_keywords) = inline?;

        let signals = Signals {
            mx_exists: report.mx_exists(),
            smtp_valid: report.smtp_valid(),
            whitelisted,
            new_domain: age.is_new(),
            disposable,
            blacklisted,
            spam_keywords,
        };

        self.reputation.record_check(&email.domain)?;
        let penalty = self.reputation.penalty(&email.domain)?;
        let (score, verdict) = scoring::score(&signals, penalty, &self.weights);

        log::info!(
            "Verified {email}: score={score} verdict={verdict:?} penalty={penalty} signals={signals:?}"
        );

        Ok(VerificationResult {
            email: email.to_string(),
            domain: email.domain.clone(),
            disposable,
            blacklisted,
            whitelisted,
            mx_exists: signals.mx_exists,
            smtp_valid: signals.smtp_valid,
            new_domain: signals.new_domain,
            spam_keywords,
            reputation_penalty: penalty,
            score,
            verdict,
            checks: CheckDetails {
                mx: report.mx,
                smtp: report.smtp,
                domain_age: age,
                mx_hosts: report.mx_hosts,
            },
        })
    }

    fn inline_checks(&self, email: &EmailAddress) -> Result<(bool, bool, bool, bool), ListError> {
        let domain = &email.domain;
        Ok((
            self.lists.is_disposable(domain)?,
            self.lists.is_blacklisted(domain)?,
            self.lists.is_whitelisted(domain)?,
            self.keywords.matches(email),
        ))
    }

    /// Records a user spam report against the address's domain and returns the domain.
    pub fn report_spam(&self, raw_email: &str) -> Result<String, VerifyError> {
        let email = EmailAddress::parse(raw_email)?;
        self.reputation.record_spam_report(&email.domain)?;
        Ok(email.domain)
    }
}
