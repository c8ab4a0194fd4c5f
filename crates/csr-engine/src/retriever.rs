//! Lexical rule retrieval.
//!
//! Each rule's title, body and tags are turned into a TF-IDF vector over the
//! rule-set vocabulary (unigrams and bigrams, English stop words removed).
//! Queries are vectorised the same way and ranked by cosine similarity.

use std::collections::HashMap;
use std::sync::LazyLock;

use csr_core::Rule;

/// Immutable TF-IDF index over one rule set.
///
/// Built once; rebuilt wholesale when the rule set changes.
#[derive(Debug, Clone)]
pub struct Retriever {
    vocab: HashMap<String, usize>,
    idf: Vec<f64>,
    /// One L2-normalised sparse vector per rule, in rule order.
    rows: Vec<Vec<(usize, f64)>>,
}

impl Retriever {
    pub fn build(rules: &[Rule]) -> Self {
        let docs: Vec<Vec<String>> = rules.iter().map(|r| terms(&r.index_text())).collect();

        let mut vocab: HashMap<String, usize> = HashMap::new();
        let mut df: Vec<usize> = Vec::new();
        for doc in &docs {
            let mut seen: Vec<usize> = Vec::new();
            for term in doc {
                let next = vocab.len();
                let id = *vocab.entry(term.clone()).or_insert(next);
                if id == df.len() {
                    df.push(0);
                }
                if !seen.contains(&id) {
                    seen.push(id);
                    df[id] += 1;
                }
            }
        }

        // Smoothed idf: ln((1 + n) / (1 + df)) + 1.
        let n = docs.len() as f64;
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let mut index = Self {
            vocab,
            idf,
            rows: Vec::with_capacity(docs.len()),
        };
        index.rows = docs.iter().map(|doc| index.vectorize(doc)).collect();
        index
    }

    /// Number of indexed rules.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocab.len()
    }

    /// Cosine similarity of `content` to every rule, in rule order.
    pub fn scores(&self, content: &str) -> Vec<f64> {
        let query: HashMap<usize, f64> = self.vectorize(&terms(content)).into_iter().collect();
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|(t, w)| query.get(t).map(|q| w * q))
                    .sum()
            })
            .collect()
    }

    /// Indices of the `k` most similar rules, best first.
    ///
    /// Ties keep rule order, so identical input always yields identical output.
    pub fn top_k(&self, content: &str, k: usize) -> Vec<usize> {
        let scores = self.scores(content);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(k);
        order
    }

    fn vectorize(&self, terms: &[String]) -> Vec<(usize, f64)> {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for term in terms {
            if let Some(&id) = self.vocab.get(term) {
                *counts.entry(id).or_insert(0.0) += 1.0;
            }
        }
        let mut vec: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(id, tf)| (id, tf * self.idf[id]))
            .collect();
        vec.sort_by_key(|(id, _)| *id);
        normalize(&mut vec);
        vec
    }
}

/// L2-normalise a sparse vector in place.
fn normalize(v: &mut [(usize, f64)]) {
    let norm = v.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in v.iter_mut() {
            *w /= norm;
        }
    }
}

/// Lowercased unigrams of two or more characters, stop words removed,
/// followed by the bigrams of adjacent surviving unigrams.
fn terms(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2 && !STOP_WORDS.contains(*w))
        .collect();

    let mut out: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    out.extend(words.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    out
}

static STOP_WORDS: LazyLock<std::collections::HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "above", "across", "after", "afterwards", "again", "against", "all",
        "almost", "alone", "along", "already", "also", "although", "always", "am", "among",
        "amongst", "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone",
        "anything", "anyway", "anywhere", "are", "around", "as", "at", "back", "be", "became",
        "because", "become", "becomes", "becoming", "been", "before", "beforehand", "behind",
        "being", "below", "beside", "besides", "between", "beyond", "bill", "both", "bottom",
        "but", "by", "call", "can", "cannot", "cant", "co", "con", "could", "couldnt", "cry",
        "de", "describe", "detail", "do", "done", "down", "due", "during", "each", "eg",
        "eight", "either", "eleven", "else", "elsewhere", "empty", "enough", "etc", "even",
        "ever", "every", "everyone", "everything", "everywhere", "except", "few", "fifteen",
        "fifty", "fill", "find", "fire", "first", "five", "for", "former", "formerly", "forty",
        "found", "four", "from", "front", "full", "further", "get", "give", "go", "had", "has",
        "hasnt", "have", "he", "hence", "her", "here", "hereafter", "hereby", "herein",
        "hereupon", "hers", "herself", "him", "himself", "his", "how", "however", "hundred",
        "i", "ie", "if", "in", "inc", "indeed", "interest", "into", "is", "it", "its", "itself",
        "keep", "last", "latter", "latterly", "least", "less", "ltd", "made", "many", "may",
        "me", "meanwhile", "might", "mill", "mine", "more", "moreover", "most", "mostly",
        "move", "much", "must", "my", "myself", "name", "namely", "neither", "never",
        "nevertheless", "next", "nine", "no", "nobody", "none", "noone", "nor", "not",
        "nothing", "now", "nowhere", "of", "off", "often", "on", "once", "one", "only", "onto",
        "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own",
        "part", "per", "perhaps", "please", "put", "rather", "re", "same", "see", "seem",
        "seemed", "seeming", "seems", "serious", "several", "she", "should", "show", "side",
        "since", "sincere", "six", "sixty", "so", "some", "somehow", "someone", "something",
        "sometime", "sometimes", "somewhere", "still", "such", "system", "take", "ten", "than",
        "that", "the", "their", "them", "themselves", "then", "thence", "there", "thereafter",
        "thereby", "therefore", "therein", "thereupon", "these", "they", "thick", "thin",
        "third", "this", "those", "though", "three", "through", "throughout", "thru", "thus",
        "to", "together", "too", "top", "toward", "towards", "twelve", "twenty", "two", "un",
        "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well", "were",
        "what", "whatever", "when", "whence", "whenever", "where", "whereafter", "whereas",
        "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while", "whither",
        "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within", "without",
        "would", "yet", "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});
