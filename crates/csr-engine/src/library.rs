//! Rule sets paired with their retrieval indexes.

use std::collections::BTreeMap;
use std::sync::Arc;

use csr_core::{Rule, RuleSet, StandardsSetInfo};
use csr_store::RuleStore;
use tracing::debug;

use crate::retriever::Retriever;

/// A rule set and the index built over it.
#[derive(Debug)]
pub struct IndexedRuleSet {
    rule_set: Arc<RuleSet>,
    retriever: Retriever,
}

impl IndexedRuleSet {
    pub fn new(rule_set: Arc<RuleSet>) -> Self {
        let retriever = Retriever::build(&rule_set.rules);
        debug!(
            set = %rule_set.id,
            rules = retriever.len(),
            terms = retriever.vocabulary_size(),
            "built retrieval index"
        );
        Self {
            rule_set,
            retriever,
        }
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    /// The `min(k, rules)` rules most similar to `content`, best first.
    pub fn retrieve(&self, content: &str, k: usize) -> Vec<&Rule> {
        self.retriever
            .top_k(content, k)
            .into_iter()
            .map(|i| &self.rule_set.rules[i])
            .collect()
    }
}

/// Every loaded rule set, indexed. Read-only once built.
#[derive(Debug, Default)]
pub struct Library {
    sets: BTreeMap<String, Arc<IndexedRuleSet>>,
}

impl Library {
    pub fn build(store: &RuleStore) -> Self {
        let sets = store
            .sets()
            .map(|set| (set.id.clone(), Arc::new(IndexedRuleSet::new(Arc::clone(set)))))
            .collect();
        Self { sets }
    }

    pub fn get(&self, id: &str) -> Option<Arc<IndexedRuleSet>> {
        self.sets.get(id).cloned()
    }

    pub fn infos(&self) -> Vec<StandardsSetInfo> {
        self.sets.values().map(|s| s.rule_set.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
