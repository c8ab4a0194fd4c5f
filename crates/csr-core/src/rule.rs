//! Standards rules and the sets they are loaded in.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::review::Severity;

/// An atomic requirement identified by a stable reference string.
///
/// Immutable once loaded. Identity is `standard_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub standard_ref: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(rename = "severity_default", default = "default_rule_severity")]
    pub default_severity: Severity,
}

fn default_rule_severity() -> Severity {
    Severity::Warning
}

impl Rule {
    /// Text the retriever indexes: title, body, then tags.
    pub fn index_text(&self) -> String {
        let mut text = String::with_capacity(self.title.len() + self.body.len() + 32);
        text.push_str(&self.title);
        text.push(' ');
        text.push_str(&self.body);
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text
    }
}

/// One loaded rule file.
///
/// Created at process start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(rename = "standards_set")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub rules: Vec<Rule>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl RuleSet {
    /// Look up a rule by reference.
    pub fn get(&self, standard_ref: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.standard_ref == standard_ref)
    }

    pub fn contains(&self, standard_ref: &str) -> bool {
        self.get(standard_ref).is_some()
    }

    /// Display name, falling back to the set id when the file gave none.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub fn info(&self) -> StandardsSetInfo {
        StandardsSetInfo {
            id: self.id.clone(),
            name: self.display_name().to_string(),
            version: self.version.clone(),
        }
    }
}

/// Listing entry for a loaded rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardsSetInfo {
    pub id: String,
    pub name: String,
    pub version: String,
}
