use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Largest penalty a domain can accumulate, reached at a 100% spam ratio.
pub const MAX_PENALTY: i32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("Reputation database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Failed to create reputation directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub domain: String,
    pub total_checks: u64,
    pub user_marked_spam: u64,
}

impl ReputationRecord {
    pub fn penalty(&self) -> i32 {
        penalty_for(self.total_checks, self.user_marked_spam)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPenalty {
    pub domain: String,
    pub penalty: i32,
}

/// `floor(-50 * spam / total)`, clamped to `[-50, 0]`; zero when nothing was checked.
pub fn penalty_for(total_checks: u64, user_marked_spam: u64) -> i32 {
    if total_checks == 0 {
        return 0;
    }
    let scaled = (MAX_PENALTY as u64).saturating_mul(user_marked_spam);
    let magnitude = scaled.div_ceil(total_checks).min(MAX_PENALTY as u64);
    -(magnitude as i32)
}

/// Per-domain check and spam-report counters in SQLite.
///
/// Both counters only ever grow and rows are never deleted. Each bump is a
/// single upsert statement so concurrent requests for the same domain
/// cannot lose updates.
#[derive(Debug, Clone)]
pub struct ReputationStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReputationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReputationError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        log::info!("Opened reputation database at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ReputationError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ReputationError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS domain_reputation (
                domain TEXT PRIMARY KEY,
                total_checks INTEGER NOT NULL DEFAULT 0,
                user_marked_spam INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn record_check(&self, domain: &str) -> Result<(), ReputationError> {
        self.lock().execute(
            "INSERT INTO domain_reputation (domain, total_checks, user_marked_spam)
             VALUES (?1, 1, 0)
             ON CONFLICT(domain) DO UPDATE SET total_checks = total_checks + 1",
            params![domain],
        )?;
        log::debug!("Recorded check for {domain}");
        Ok(())
    }

    /// Creates the row when the domain was never checked.
    pub fn record_spam_report(&self, domain: &str) -> Result<(), ReputationError> {
        self.lock().execute(
            "INSERT INTO domain_reputation (domain, total_checks, user_marked_spam)
             VALUES (?1, 0, 1)
             ON CONFLICT(domain) DO UPDATE SET user_marked_spam = user_marked_spam + 1",
            params![domain],
        )?;
        log::info!("Recorded spam report for {domain}");
        Ok(())
    }

    pub fn record(&self, domain: &str) -> Result<Option<ReputationRecord>, ReputationError> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT domain, total_checks, user_marked_spam
                 FROM domain_reputation WHERE domain = ?1",
                params![domain],
                |row| {
                    Ok(ReputationRecord {
                        domain: row.get(0)?,
                        total_checks: row.get(1)?,
                        user_marked_spam: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn penalty(&self, domain: &str) -> Result<i32, ReputationError> {
        Ok(self.record(domain)?.map_or(0, |r| r.penalty()))
    }

    pub fn records(&self) -> Result<Vec<ReputationRecord>, ReputationError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT domain, total_checks, user_marked_spam
             FROM domain_reputation ORDER BY domain",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(ReputationRecord {
                    domain: row.get(0)?,
                    total_checks: row.get(1)?,
                    user_marked_spam: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn penalties(&self) -> Result<Vec<DomainPenalty>, ReputationError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|r| DomainPenalty {
                penalty: r.penalty(),
                domain: r.domain,
            })
            .collect())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
