//! Content sanitizing applied before chunk text reaches an extraction model.
//!
//! Chunk text is untrusted: a document can carry instructions aimed at the
//! model that reads it. Control and zero-width characters are removed and
//! known injection phrasings are replaced with a neutral marker. The same
//! patterns back the validator's denylist, so an entity named after an
//! injection attempt is rejected even if the model echoes it.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement text for neutralized spans.
pub const NEUTRALIZED: &str = "[filtered]";

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:ignore|disregard|forget|override)\s+(?:all\s+|any\s+)?(?:of\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding|system)\s+(?:instructions?|prompts?|messages?|rules|directions)",
        r"(?i)\b(?:reveal|print|show|repeat|output)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+)?(?:prompt|instructions)",
        r"(?i)\byou\s+are\s+now\s+(?:a|an|in)\b",
        r"(?i)\bnew\s+instructions\s*:",
        r"(?im)^\s*(?:system|assistant|user|developer)\s*:",
        r"(?i)<\|?\s*(?:im_start|im_end|system|endoftext|assistant|user)\s*\|?>",
        r"(?i)\[/?(?:INST|SYS)\]",
        r"(?i)<</?SYS>>",
        r"(?im)^\s*#{2,}\s*(?:system|instruction|instructions)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("injection pattern"))
    .collect()
});

static EXTRA_DENYLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)<\s*script\b", r"(?i)javascript:", r"```", r"(?i)\bprompt\s+injection\b"]
        .iter()
        .map(|p| Regex::new(p).expect("denylist pattern"))
        .collect()
});

/// Sanitized text plus what was changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub removed_chars: usize,
    pub neutralized: usize,
}

/// Strip control characters and neutralize injection phrasing.
pub fn sanitize_for_extraction(content: &str) -> Sanitized {
    let mut removed_chars = 0;
    let stripped: String = content
        .chars()
        .filter(|c| {
            let keep = !is_invisible(*c);
            if !keep {
                removed_chars += 1;
            }
            keep
        })
        .collect();

    let mut neutralized = 0;
    let mut text = stripped;
    for pattern in INJECTION_PATTERNS.iter() {
        let hits = pattern.find_iter(&text).count();
        if hits > 0 {
            neutralized += hits;
            text = pattern.replace_all(&text, NEUTRALIZED).into_owned();
        }
    }

    Sanitized {
        text,
        removed_chars,
        neutralized,
    }
}

/// True when `text` matches an injection pattern or the extra denylist.
pub fn is_suspicious(text: &str) -> bool {
    INJECTION_PATTERNS.iter().any(|p| p.is_match(text))
        || EXTRA_DENYLIST.iter().any(|p| p.is_match(text))
        || text.contains(NEUTRALIZED)
}

fn is_invisible(c: char) -> bool {
    (c.is_control() && c != '\n' && c != '\t')
        || matches!(c, '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}' | '\u{FEFF}')
}
