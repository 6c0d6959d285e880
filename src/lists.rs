use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

/// File holding the spam keywords, next to the domain lists.
pub const SPAM_KEYWORDS_FILE: &str = "spam_keywords.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Whitelist,
    Blacklist,
    Disposable,
}

impl ListKind {
    pub const ALL: [ListKind; 3] = [ListKind::Whitelist, ListKind::Blacklist, ListKind::Disposable];

    pub fn name(self) -> &'static str {
        match self {
            ListKind::Whitelist => "whitelist",
            ListKind::Blacklist => "blacklist",
            ListKind::Disposable => "disposable",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ListKind::Whitelist => "whitelisted_domains.txt",
            ListKind::Blacklist => "blacklisted_domains.txt",
            ListKind::Disposable => "disposable_domains.txt",
        }
    }

    /// The list a domain may not share membership with.
    pub fn opposite(self) -> Option<ListKind> {
        match self {
            ListKind::Whitelist => Some(ListKind::Blacklist),
            ListKind::Blacklist => Some(ListKind::Whitelist),
            ListKind::Disposable => None,
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ListKind {
    type Err = ListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whitelist" => Ok(ListKind::Whitelist),
            "blacklist" => Ok(ListKind::Blacklist),
            "disposable" => Ok(ListKind::Disposable),
            other => Err(ListError::UnknownList(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("List '{0}' not found")]
    UnknownList(String),
    #[error("Invalid domain: '{0}'")]
    InvalidDomain(String),
    #[error("Domain {domain} is already in the {list}")]
    AlreadyPresent { domain: String, list: ListKind },
    #[error("Domain {domain} is in the {list}; remove it from there first")]
    Conflict { domain: String, list: ListKind },
    #[error("Domain {domain} is not in the {list}")]
    NotFound { domain: String, list: ListKind },
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What to do when a domain being added sits in the opposite list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Reject,
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub domain: String,
    pub list: ListKind,
    pub moved_from: Option<ListKind>,
}

/// Reads a newline-delimited list. A missing file is an empty list.
pub fn read_list_file(path: &Path) -> io::Result<HashSet<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(|line| line.trim().to_lowercase())
            .filter(|line| !line.is_empty())
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("List file {} not found, starting empty", path.display());
            Ok(HashSet::new())
        }
        Err(e) => Err(e),
    }
}

/// Writes a list sorted, one entry per line, replacing the file atomically.
pub fn write_list_file(path: &Path, items: &HashSet<String>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut sorted: Vec<&String> = items.iter().collect();
    sorted.sort();

    let mut content = String::new();
    for item in sorted {
        content.push_str(item);
        content.push('\n');
    }

    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

fn normalize_domain(domain: &str) -> Result<String, ListError> {
    let normalized = domain.trim().to_lowercase();
    if normalized.is_empty() || normalized.contains(char::is_whitespace) || normalized.contains('@')
    {
        return Err(ListError::InvalidDomain(domain.to_string()));
    }
    Ok(normalized)
}

type Sets = HashMap<ListKind, HashSet<String>>;

/// Whitelist, blacklist and disposable domain sets backed by text files.
///
/// Each list is read lazily on first access and kept for the process
/// lifetime. All mutations go through the write lock, which is held across
/// the file write, so a domain is never visible in both whitelist and
/// blacklist and concurrent edits cannot interleave with persistence.
#[derive(Debug)]
pub struct DomainLists {
    directory: PathBuf,
    sets: RwLock<Sets>,
}

impl DomainLists {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            sets: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, kind: ListKind) -> PathBuf {
        self.directory.join(kind.file_name())
    }

    pub fn is_disposable(&self, domain: &str) -> Result<bool, ListError> {
        self.contains(ListKind::Disposable, domain)
    }

    pub fn is_blacklisted(&self, domain: &str) -> Result<bool, ListError> {
        self.contains(ListKind::Blacklist, domain)
    }

    pub fn is_whitelisted(&self, domain: &str) -> Result<bool, ListError> {
        self.contains(ListKind::Whitelist, domain)
    }

    pub fn contains(&self, kind: ListKind, domain: &str) -> Result<bool, ListError> {
        self.with_list(kind, |set| set.contains(domain))
    }

    /// Sorted contents of one list.
    pub fn list(&self, kind: ListKind) -> Result<Vec<String>, ListError> {
        self.with_list(kind, |set| {
            let mut domains: Vec<String> = set.iter().cloned().collect();
            domains.sort();
            domains
        })
    }

    /// Every list keyed by name, each sorted.
    pub fn all(&self) -> Result<BTreeMap<String, Vec<String>>, ListError> {
        let mut lists = BTreeMap::new();
        for kind in ListKind::ALL {
            lists.insert(kind.name().to_string(), self.list(kind)?);
        }
        Ok(lists)
    }

    pub fn add(
        &self,
        kind: ListKind,
        domain: &str,
        on_conflict: ConflictPolicy,
    ) -> Result<AddOutcome, ListError> {
        let domain = normalize_domain(domain)?;
        let mut sets = self.write();
        self.ensure_loaded(&mut sets, kind)?;
        if let Some(opposite) = kind.opposite() {
            self.ensure_loaded(&mut sets, opposite)?;
        }

        if sets.get(&kind).is_some_and(|set| set.contains(&domain)) {
            return Err(ListError::AlreadyPresent { domain, list: kind });
        }

        let mut moved_from = None;
        if let Some(opposite) = kind.opposite() {
            let in_opposite = sets.get(&opposite).is_some_and(|set| set.contains(&domain));
            if in_opposite {
                if on_conflict == ConflictPolicy::Reject {
                    return Err(ListError::Conflict {
                        domain,
                        list: opposite,
                    });
                }

                let opposite_set = sets.entry(opposite).or_default();
                opposite_set.remove(&domain);
                if let Err(e) = self.persist(opposite, opposite_set) {
                    opposite_set.insert(domain);
                    return Err(e);
                }
                moved_from = Some(opposite);
            }
        }

        let target = sets.entry(kind).or_default();
        target.insert(domain.clone());
        if let Err(e) = self.persist(kind, target) {
            target.remove(&domain);
            if let Some(opposite) = moved_from {
                let opposite_set = sets.entry(opposite).or_default();
                opposite_set.insert(domain.clone());
                if let Err(restore) = self.persist(opposite, opposite_set) {
                    log::warn!("Failed to restore {domain} to the {opposite} file: {restore}");
                }
            }
            return Err(e);
        }

        match moved_from {
            Some(opposite) => log::info!("Moved {domain} from {opposite} to {kind}"),
            None => log::info!("Added {domain} to {kind}"),
        }
        Ok(AddOutcome {
            domain,
            list: kind,
            moved_from,
        })
    }

    pub fn remove(&self, kind: ListKind, domain: &str) -> Result<String, ListError> {
        let domain = normalize_domain(domain)?;
        let mut sets = self.write();
        self.ensure_loaded(&mut sets, kind)?;

        let set = sets.entry(kind).or_default();
        if !set.remove(&domain) {
            return Err(ListError::NotFound { domain, list: kind });
        }
        if let Err(e) = self.persist(kind, set) {
            set.insert(domain);
            return Err(e);
        }

        log::info!("Removed {domain} from {kind}");
        Ok(domain)
    }

    /// Empties a list and persists the empty file. Returns how many entries were dropped.
    pub fn clear(&self, kind: ListKind) -> Result<usize, ListError> {
        let mut sets = self.write();
        self.ensure_loaded(&mut sets, kind)?;

        let set = sets.entry(kind).or_default();
        let previous = std::mem::take(set);
        if let Err(e) = self.persist(kind, set) {
            *set = previous;
            return Err(e);
        }

        log::info!("Cleared {kind} ({} entries)", previous.len());
        Ok(previous.len())
    }

    fn with_list<R>(
        &self,
        kind: ListKind,
        f: impl FnOnce(&HashSet<String>) -> R,
    ) -> Result<R, ListError> {
        {
            let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(set) = sets.get(&kind) {
                return Ok(f(set));
            }
        }

        let mut sets = self.write();
        self.ensure_loaded(&mut sets, kind)?;
        Ok(f(sets.entry(kind).or_default()))
    }

    fn ensure_loaded(&self, sets: &mut Sets, kind: ListKind) -> Result<(), ListError> {
        if sets.contains_key(&kind) {
            return Ok(());
        }

        let path = self.path_for(kind);
        let set = read_list_file(&path).map_err(|source| ListError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("Loaded {} entries into {kind} from {}", set.len(), path.display());
        sets.insert(kind, set);
        Ok(())
    }

    fn persist(&self, kind: ListKind, set: &HashSet<String>) -> Result<(), ListError> {
        let path = self.path_for(kind);
        write_list_file(&path, set).map_err(|source| ListError::Io { path, source })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Sets> {
        self.sets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lists_with(dir: &TempDir, kind: ListKind, domains: &[&str]) -> DomainLists {
        let set: HashSet<String> = domains.iter().map(|d| d.to_string()).collect();
        write_list_file(&dir.path().join(kind.file_name()), &set).unwrap();
        DomainLists::new(dir.path())
    }

    #[test]
    fn test_membership_is_lazy_and_missing_files_are_empty() {
        let dir = TempDir::new().unwrap();
        let lists = lists_with(&dir, ListKind::Disposable, &["mailinator.com"]);

        assert!(lists.is_disposable("mailinator.com").unwrap());
        assert!(!lists.is_disposable("gmail.com").unwrap());
        assert!(!lists.is_blacklisted("mailinator.com").unwrap());
        assert!(!lists.is_whitelisted("mailinator.com").unwrap());
    }

    #[test]
    fn test_add_normalizes_and_persists() {
        let dir = TempDir::new().unwrap();
        let lists = DomainLists::new(dir.path());

        let outcome = lists
            .add(ListKind::Blacklist, "  Spam.Example ", ConflictPolicy::Reject)
            .unwrap();
        assert_eq!(outcome.domain, "spam.example");
        assert_eq!(outcome.moved_from, None);

        let on_disk = fs::read_to_string(dir.path().join("blacklisted_domains.txt")).unwrap();
        assert_eq!(on_disk, "spam.example\n");
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let dir = TempDir::new().unwrap();
        let lists = DomainLists::new(dir.path());
        lists
            .add(ListKind::Whitelist, "good.com", ConflictPolicy::Reject)
            .unwrap();

        let err = lists
            .add(ListKind::Whitelist, "GOOD.com", ConflictPolicy::Move)
            .unwrap_err();
        assert!(matches!(err, ListError::AlreadyPresent { .. }));
    }

    #[test]
    fn test_cross_list_conflict_requires_move() {
        let dir = TempDir::new().unwrap();
        let lists = lists_with(&dir, ListKind::Blacklist, &["flip.com"]);

        let err = lists
            .add(ListKind::Whitelist, "flip.com", ConflictPolicy::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            ListError::Conflict {
                list: ListKind::Blacklist,
                ..
            }
        ));
        assert!(lists.is_blacklisted("flip.com").unwrap());
        assert!(!lists.is_whitelisted("flip.com").unwrap());

        let outcome = lists
            .add(ListKind::Whitelist, "flip.com", ConflictPolicy::Move)
            .unwrap();
        assert_eq!(outcome.moved_from, Some(ListKind::Blacklist));
        assert!(lists.is_whitelisted("flip.com").unwrap());
        assert!(!lists.is_blacklisted("flip.com").unwrap());

        // Both files reflect the move.
        let reloaded = DomainLists::new(dir.path());
        assert!(reloaded.is_whitelisted("flip.com").unwrap());
        assert!(!reloaded.is_blacklisted("flip.com").unwrap());
    }

    #[test]
    fn test_never_in_both_lists() {
        let dir = TempDir::new().unwrap();
        let lists = DomainLists::new(dir.path());
        let domains = ["a.com", "b.com", "c.com"];

        for (i, domain) in domains.iter().cycle().take(12).enumerate() {
            let kind = if i % 2 == 0 {
                ListKind::Whitelist
            } else {
                ListKind::Blacklist
            };
            let _ = lists.add(kind, domain, ConflictPolicy::Move);
            if i % 5 == 0 {
                let _ = lists.remove(kind, domain);
            }

            for d in domains {
                assert!(
                    !(lists.is_whitelisted(d).unwrap() && lists.is_blacklisted(d).unwrap()),
                    "{d} is in both lists"
                );
            }
        }
    }

    #[test]
    fn test_failed_move_keeps_domain_in_source_list() {
        let dir = TempDir::new().unwrap();
        let lists = lists_with(&dir, ListKind::Blacklist, &["flip.com"]);
        // A directory where the temp file goes makes the whitelist write fail.
        fs::create_dir(dir.path().join("whitelisted_domains.txt.tmp")).unwrap();

        let result = lists.add(ListKind::Whitelist, "flip.com", ConflictPolicy::Move);
        assert!(matches!(result, Err(ListError::Io { .. })));
        assert!(lists.is_blacklisted("flip.com").unwrap());
        assert!(!lists.is_whitelisted("flip.com").unwrap());

        let on_disk = read_list_file(&dir.path().join("blacklisted_domains.txt")).unwrap();
        assert!(on_disk.contains("flip.com"));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let lists = lists_with(&dir, ListKind::Whitelist, &["keep.com"]);

        let err = lists.remove(ListKind::Whitelist, "gone.com").unwrap_err();
        assert!(matches!(err, ListError::NotFound { .. }));

        assert_eq!(lists.remove(ListKind::Whitelist, "KEEP.com").unwrap(), "keep.com");
        assert!(lists.list(ListKind::Whitelist).unwrap().is_empty());
    }

    #[test]
    fn test_clear_persists_empty_list() {
        let dir = TempDir::new().unwrap();
        let lists = lists_with(&dir, ListKind::Disposable, &["a.com", "b.com"]);

        assert_eq!(lists.clear(ListKind::Disposable).unwrap(), 2);
        assert!(!lists.is_disposable("a.com").unwrap());

        let reloaded = DomainLists::new(dir.path());
        assert!(reloaded.list(ListKind::Disposable).unwrap().is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("round_trip.txt");
        let original: HashSet<String> = ["zeta.org", "alpha.com", "mid.net"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        write_list_file(&path, &original).unwrap();
        assert_eq!(read_list_file(&path).unwrap(), original);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "alpha.com\nmid.net\nzeta.org\n"
        );
    }

    #[test]
    fn test_all_lists_are_sorted_and_keyed_by_name() {
        let dir = TempDir::new().unwrap();
        let lists = lists_with(&dir, ListKind::Blacklist, &["z.com", "a.com"]);

        let all = lists.all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all["blacklist"], vec!["a.com", "z.com"]);
        assert!(all["whitelist"].is_empty());
    }

    #[test]
    fn test_list_kind_parsing() {
        assert_eq!("Whitelist".parse::<ListKind>().unwrap(), ListKind::Whitelist);
        assert!(matches!(
            "greylist".parse::<ListKind>(),
            Err(ListError::UnknownList(_))
        ));
    }
}
