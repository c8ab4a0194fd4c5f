//! In-memory collection of standards sets, loaded from a directory of JSON files.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csr_core::{RuleSet, StandardsSetInfo};
use tracing::{error, info, warn};

use crate::StoreError;

/// Read-only collection of standards sets keyed by set id.
///
/// Each file in the standards directory holds one [`RuleSet`]:
///
/// ```json
/// {
///   "standards_set": "nav_v1",
///   "name": "Navigation Training",
///   "version": "1.0",
///   "rules": [
///     {"standard_ref": "NAV-TR-3.1.1", "title": "...", "body": "...",
///      "tags": ["objectives"], "severity_default": "violation"}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    sets: BTreeMap<String, Arc<RuleSet>>,
}

impl RuleStore {
    /// Load every `*.json` file in `dir`, in filename order.
    ///
    /// A missing directory yields an empty store. Files that fail to read,
    /// parse or validate are logged and skipped; they never affect other files.
    pub fn load_dir(dir: &Path) -> Self {
        let mut store = Self::default();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "standards directory not readable");
                return store;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in files {
            match load_file(&path).and_then(|set| store.insert(set)) {
                Ok(()) => {}
                Err(e) => error!(file = %path.display(), error = %e, "skipping standards file"),
            }
        }

        info!(sets = store.len(), dir = %dir.display(), "standards loaded");
        store
    }

    /// Build a store from sets already in memory.
    pub fn from_sets<I>(sets: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = RuleSet>,
    {
        let mut store = Self::default();
        for set in sets {
            validate(&set, Path::new("<memory>"))?;
            store.insert(set)?;
        }
        Ok(store)
    }

    fn insert(&mut self, set: RuleSet) -> Result<(), StoreError> {
        if self.sets.contains_key(&set.id) {
            return Err(StoreError::DuplicateSet(set.id));
        }
        if set.rules.is_empty() {
            warn!(set = %set.id, "standards set has no rules");
        }
        info!(set = %set.id, rules = set.rules.len(), version = %set.version, "loaded standards set");
        self.sets.insert(set.id.clone(), Arc::new(set));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<RuleSet>> {
        self.sets.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sets.contains_key(id)
    }

    /// Set ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn sets(&self) -> impl Iterator<Item = &Arc<RuleSet>> {
        self.sets.values()
    }

    pub fn infos(&self) -> Vec<StandardsSetInfo> {
        self.sets.values().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

fn load_file(path: &Path) -> Result<RuleSet, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let set: RuleSet = serde_json::from_str(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    validate(&set, path)?;
    Ok(set)
}

fn validate(set: &RuleSet, path: &Path) -> Result<(), StoreError> {
    if set.id.trim().is_empty() {
        return Err(StoreError::MissingId(path.to_path_buf()));
    }
    let mut seen = HashSet::with_capacity(set.rules.len());
    for rule in &set.rules {
        if rule.standard_ref.trim().is_empty() {
            return Err(StoreError::EmptyRef {
                set: set.id.clone(),
            });
        }
        if !seen.insert(rule.standard_ref.as_str()) {
            return Err(StoreError::DuplicateRef {
                set: set.id.clone(),
                standard_ref: rule.standard_ref.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NAV: &str = r#"{
        "standards_set": "nav_v1",
        "name": "Navigation Training",
        "version": "2.1",
        "rules": [
            {"standard_ref": "NAV-TR-3.1.1", "title": "Measurable verbs",
             "body": "Objectives must use measurable verbs.", "tags": ["objectives"],
             "severity_default": "violation"},
            {"standard_ref": "NAV-TR-3.1.2", "title": "Define acronyms",
             "body": "Acronyms must be defined on first use."}
        ]
    }"#;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn load_valid_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "nav.json", NAV);

        let store = RuleStore::load_dir(dir.path());
        assert_eq!(store.len(), 1);
        let set = store.get("nav_v1").unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.version, "2.1");
        assert_eq!(
            store.infos()[0],
            StandardsSetInfo {
                id: "nav_v1".into(),
                name: "Navigation Training".into(),
                version: "2.1".into()
            }
        );
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::load_dir(&dir.path().join("nope"));
        assert!(store.is_empty());
    }

    #[test]
    fn invalid_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_broken.json", "{ not json");
        write(dir.path(), "b_nav.json", NAV);
        write(dir.path(), "c_no_rules_field.json", r#"{"standards_set": "x"}"#);
        write(dir.path(), "notes.txt", "ignored");

        let store = RuleStore::load_dir(dir.path());
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["nav_v1"]);
    }

    #[test]
    fn duplicate_refs_reject_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "dup.json",
            r#"{"standards_set": "dup", "rules": [
                {"standard_ref": "R-1", "title": "a", "body": "a"},
                {"standard_ref": "R-1", "title": "b", "body": "b"}
            ]}"#,
        );
        assert!(RuleStore::load_dir(dir.path()).is_empty());
    }

    #[test]
    fn duplicate_set_id_keeps_first_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1.json", NAV);
        write(
            dir.path(),
            "2.json",
            r#"{"standards_set": "nav_v1", "version": "9", "rules": []}"#,
        );
        let store = RuleStore::load_dir(dir.path());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("nav_v1").unwrap().version, "2.1");
    }

    #[test]
    fn shipped_standards_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../standards");
        let store = RuleStore::load_dir(&dir);
        let nav = store.get("nav_v1").unwrap();
        assert!(nav.contains("NAV-TR-3.1.1"));
        assert_eq!(nav.display_name(), "Navigation Training");
    }

    #[test]
    fn from_sets_validates() {
        let set: RuleSet = serde_json::from_str(NAV).unwrap();
        let store = RuleStore::from_sets([set.clone()]).unwrap();
        assert!(store.contains("nav_v1"));

        let err = RuleStore::from_sets([set.clone(), set]).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSet(_)));

        let blank: RuleSet =
            serde_json::from_str(r#"{"standards_set": " ", "rules": []}"#).unwrap();
        assert!(matches!(
            RuleStore::from_sets([blank]).unwrap_err(),
            StoreError::MissingId(_)
        ));
    }
}
