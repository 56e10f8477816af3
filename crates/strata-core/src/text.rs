//! Text helpers shared by ingestion, lexical search, and KAG scoring.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// Words dropped from content-term lists.
pub const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "each",
    "for", "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me",
    "more", "most", "my", "no", "not", "of", "on", "or", "other", "our", "over", "same", "should",
    "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "under", "up", "vs", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.binary_search(&token).is_ok()
}

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Tokens with stopwords and single characters removed, deduplicated in
/// first-seen order.
pub fn content_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() > 1 && !is_stopword(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Canonical form used for entity identity: lowercase, single spaces,
/// no surrounding punctuation.
pub fn normalize_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Crude suffix stripping for the stemmed fallback pass.
pub fn stem(token: &str) -> String {
    const RULES: &[(&str, &str)] = &[
        ("ational", "ate"),
        ("ization", "ize"),
        ("ingly", ""),
        ("ations", "ate"),
        ("ation", "ate"),
        ("ness", ""),
        ("ment", ""),
        ("ings", ""),
        ("ing", ""),
        ("ies", "y"),
        ("ied", "y"),
        ("ers", ""),
        ("edly", ""),
        ("ed", ""),
        ("er", ""),
        ("ly", ""),
        ("es", ""),
        ("s", ""),
    ];
    let lower = token.to_lowercase();
    for (suffix, replacement) in RULES {
        if let Some(base) = lower.strip_suffix(suffix) {
            if base.chars().count() >= 3 {
                return format!("{}{}", base, replacement);
            }
        }
    }
    lower
}

/// Normalize a document body before hashing and chunking.
///
/// Line endings become `\n`, control characters other than newline and tab
/// are removed, trailing whitespace is stripped from every line, and runs
/// of blank lines collapse to one.
pub fn clean_content(body: &str) -> String {
    let unified = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.split('\n') {
        let line: String = line
            .chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect();
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Jaccard overlap of the content-term sets of two texts.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = content_terms(a).into_iter().collect();
    let b: HashSet<String> = content_terms(b).into_iter().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    inter / union
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
