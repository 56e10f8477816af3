//! Rule-based query classification.
//!
//! Every query is assigned exactly one [`QueryType`] by the first matching
//! rule, in this order:
//!
//! | Order | Rule | Type | Semantic / Lexical |
//! |-------|------|------|--------------------|
//! | 1 | contains a quoted phrase (`"…"` or `“…”`) | `exact_quote` | 0.1 / 0.9 |
//! | 2 | contains a run of ≥ 2 capitalized words | `entity` | 0.4 / 0.6 |
//! | 3 | leading interrogative or comparison wording | `conceptual` | 0.8 / 0.2 |
//! | 4 | a year or a number with a unit | `factual` | 0.5 / 0.5 |
//! | 5 | anything else | `exploratory` | 0.7 / 0.3 |
//!
//! Classification is pure string inspection: no I/O, no model calls, and
//! the regexes are compiled once per process.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["\u{201C}\u{201D}]([^"\u{201C}\u{201D}]+)["\u{201C}\u{201D}]"#)
        .expect("quoted phrase regex")
});

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").expect("year regex"));

static METRIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$\s?\d|\b\d+(?:[.,]\d+)?\s?(?:%|(?:percent|ms|sec|seconds|minutes|hours|kb|mb|gb|tb|km|kg|mhz|ghz|usd|eur|x|k)\b)",
    )
    .expect("metric regex")
});

const INTERROGATIVES: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "explain", "describe", "compare",
];

const COMPARISON_MARKERS: &[&str] = &[
    " vs ",
    " vs. ",
    " versus ",
    "compared to",
    "difference between",
    "differences between",
];

/// Capitalized words that do not start a proper noun when they lead a run.
const LEADING_SKIP: &[&str] = &[
    "a", "an", "are", "can", "compare", "describe", "do", "does", "explain", "find", "how", "is",
    "list", "show", "tell", "the", "what", "when", "where", "which", "who", "why",
];

/// The kind of query, which decides how semantic and lexical evidence are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    ExactQuote,
    Entity,
    Conceptual,
    Factual,
    Exploratory,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::ExactQuote => "exact_quote",
            QueryType::Entity => "entity",
            QueryType::Conceptual => "conceptual",
            QueryType::Factual => "factual",
            QueryType::Exploratory => "exploratory",
        }
    }

    /// The fixed weight profile for this query type.
    pub fn weights(&self) -> WeightProfile {
        let (semantic, lexical) = match self {
            QueryType::ExactQuote => (0.1, 0.9),
            QueryType::Entity => (0.4, 0.6),
            QueryType::Conceptual => (0.8, 0.2),
            QueryType::Factual => (0.5, 0.5),
            QueryType::Exploratory => (0.7, 0.3),
        };
        WeightProfile { semantic, lexical }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact_quote" => Ok(QueryType::ExactQuote),
            "entity" => Ok(QueryType::Entity),
            "conceptual" => Ok(QueryType::Conceptual),
            "factual" => Ok(QueryType::Factual),
            "exploratory" => Ok(QueryType::Exploratory),
            other => anyhow::bail!("unknown query type '{}'", other),
        }
    }
}

/// Relative weight of semantic versus lexical evidence. Sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub semantic: f64,
    pub lexical: f64,
}

impl WeightProfile {
    /// Profile with an explicit semantic weight, clamped to `[0, 1]`.
    pub fn with_semantic(semantic: f64) -> Self {
        let semantic = semantic.clamp(0.0, 1.0);
        WeightProfile {
            semantic,
            lexical: 1.0 - semantic,
        }
    }
}

/// The classifier's verdict plus the surface features it found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub query_type: QueryType,
    pub weights: WeightProfile,
    /// Contents of quoted phrases, without the quotes.
    pub quoted_phrases: Vec<String>,
    /// Runs of two or more capitalized words.
    pub proper_nouns: Vec<String>,
}

/// Classify a query. Total: every input, including the empty string, gets a type.
pub fn classify(query: &str) -> Classification {
    let quoted_phrases = quoted_phrases(query);
    let proper_nouns = proper_nouns(query);

    let query_type = if !quoted_phrases.is_empty() {
        QueryType::ExactQuote
    } else if !proper_nouns.is_empty() {
        QueryType::Entity
    } else if is_conceptual(query) {
        QueryType::Conceptual
    } else if YEAR.is_match(query) || METRIC.is_match(query) {
        QueryType::Factual
    } else {
        QueryType::Exploratory
    };

    Classification {
        query_type,
        weights: query_type.weights(),
        quoted_phrases,
        proper_nouns,
    }
}

fn quoted_phrases(query: &str) -> Vec<String> {
    QUOTED
        .captures_iter(query)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn is_conceptual(query: &str) -> bool {
    let lower = query.trim().to_lowercase();
    let first = lower
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .unwrap_or("");
    if INTERROGATIVES.contains(&first) {
        return true;
    }
    let padded = format!(" {} ", lower);
    COMPARISON_MARKERS.iter().any(|m| padded.contains(m))
}

/// Find runs of consecutive capitalized words.
///
/// A word ending in sentence punctuation closes the run it belongs to.
/// Interrogatives and articles are skipped when they would open a run, so
/// "What Oak Ridge National Laboratory does" yields
/// "Oak Ridge National Laboratory".
pub fn proper_nouns(query: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut run: Vec<String> = Vec::new();

    let flush = |run: &mut Vec<String>, found: &mut Vec<String>| {
        if run.len() >= 2 {
            let phrase = run.join(" ");
            if !found.contains(&phrase) {
                found.push(phrase);
            }
        }
        run.clear();
    };

    for raw in query.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let closes = raw.ends_with(['.', ',', '?', '!', ';', ':', ')']);
        let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase());

        if capitalized && !(run.is_empty() && LEADING_SKIP.contains(&word.to_lowercase().as_str()))
        {
            run.push(word.to_string());
        } else {
            flush(&mut run, &mut found);
        }
        if closes {
            flush(&mut run, &mut found);
        }
    }
    flush(&mut run, &mut found);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_phrase_is_exact_quote() {
        let c = classify("\"ownership and borrowing\"");
        assert_eq!(c.query_type, QueryType::ExactQuote);
        assert_eq!(c.quoted_phrases, vec!["ownership and borrowing"]);
        assert_eq!(c.weights, WeightProfile { semantic: 0.1, lexical: 0.9 });
    }

    #[test]
    fn test_curly_quotes() {
        let c = classify("find \u{201C}zero cost abstractions\u{201D} please");
        assert_eq!(c.query_type, QueryType::ExactQuote);
        assert_eq!(c.quoted_phrases, vec!["zero cost abstractions"]);
    }

    #[test]
    fn test_proper_noun_beats_interrogative() {
        let c = classify("What is Oak Ridge National Laboratory?");
        assert_eq!(c.query_type, QueryType::Entity);
        assert_eq!(c.proper_nouns, vec!["Oak Ridge National Laboratory"]);
    }

    #[test]
    fn test_leading_interrogative_not_part_of_noun() {
        assert_eq!(proper_nouns("What Oak Ridge does"), vec!["Oak Ridge"]);
        assert!(proper_nouns("What Is rust").is_empty());
    }

    #[test]
    fn test_punctuation_splits_runs() {
        assert!(proper_nouns("Rust, Python and go").is_empty());
        assert_eq!(
            proper_nouns("compare Apache Kafka. Then Redis Streams"),
            vec!["Apache Kafka", "Then Redis Streams"]
        );
    }

    #[test]
    fn test_conceptual() {
        assert_eq!(classify("how does garbage collection work").query_type, QueryType::Conceptual);
        assert_eq!(classify("tokio vs async-std").query_type, QueryType::Conceptual);
        assert_eq!(
            classify("difference between mutex and rwlock").query_type,
            QueryType::Conceptual
        );
    }

    #[test]
    fn test_factual() {
        assert_eq!(classify("release notes 2023").query_type, QueryType::Factual);
        assert_eq!(classify("latency under 50ms").query_type, QueryType::Factual);
        assert_eq!(classify("throughput increased 12%").query_type, QueryType::Factual);
        assert_eq!(classify("budget $400").query_type, QueryType::Factual);
    }

    #[test]
    fn test_exploratory_default() {
        let c = classify("vector database tradeoffs");
        assert_eq!(c.query_type, QueryType::Exploratory);
        assert_eq!(c.weights, WeightProfile { semantic: 0.7, lexical: 0.3 });
    }

    #[test]
    fn test_total_on_degenerate_input() {
        assert_eq!(classify("").query_type, QueryType::Exploratory);
        assert_eq!(classify("   ").query_type, QueryType::Exploratory);
        assert_eq!(classify("\"\"").query_type, QueryType::Exploratory);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for t in [
            QueryType::ExactQuote,
            QueryType::Entity,
            QueryType::Conceptual,
            QueryType::Factual,
            QueryType::Exploratory,
        ] {
            let w = t.weights();
            assert!((w.semantic + w.lexical - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_with_semantic_clamps() {
        let w = WeightProfile::with_semantic(1.7);
        assert_eq!(w.semantic, 1.0);
        assert_eq!(w.lexical, 0.0);
    }
}
