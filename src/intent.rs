//! Free-text intent detection for sequence generation.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const ROLE_WORDS: &[&str] = &[
    "engineer", "engineers", "developer", "developers", "manager", "managers", "designer", "designers",
    "scientist", "analyst", "architect", "writer", "recruiter", "software", "product", "backend",
    "frontend", "position", "role", "candidate", "candidates",
];

const ACTION_WORDS: &[&str] = &[
    "create", "draft", "recruit", "recruiting", "generate", "write", "make", "build", "sequence",
    "outreach", "email", "emails", "hire", "hiring",
];

const ROLE_NOUNS: &str = "engineer|developer|manager|designer|scientist|analyst|architect|writer|recruiter";

const STOPWORDS: &[&str] = &["a", "an", "the", "for", "our", "new", "this", "that", "my", "as", "of", "to", "and"];

pub const GENERIC_POSITION: &str = "Recruiting Candidate";

static POSITION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"(?i)\bfor\s+(?:an?\s+|the\s+|our\s+)?((?:[a-z0-9/+#.-]+\s+){{0,3}}?)({ROLE_NOUNS})s?\b"),
        format!(r"(?i)\b(?:(senior|junior|lead|staff|principal)\s+)?([a-z0-9/+#-]+)\s+({ROLE_NOUNS})s?\b"),
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub position: String,
    pub title: String,
    pub details: String,
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '/' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn mentions_role(text: &str) -> bool {
    let w = words(text);
    ROLE_WORDS.iter().any(|k| w.contains(*k))
}

pub fn mentions_action(text: &str) -> bool {
    let w = words(text);
    ACTION_WORDS.iter().any(|k| w.contains(*k))
}

/// Both vocabularies have to match before generation is attempted.
pub fn detect(text: &str) -> Option<Intent> {
    if !(mentions_role(text) && mentions_action(text)) {
        return None;
    }
    let position = extract_position(text);
    Some(Intent { title: format!("{} Outreach", position), position, details: text.trim().to_string() })
}

pub fn extract_position(text: &str) -> String {
    match_position(text).unwrap_or_else(|| keyword_position(text).to_string())
}

fn match_position(text: &str) -> Option<String> {
    let patterns = &*POSITION_PATTERNS;
    if let Some(caps) = patterns.first().and_then(|re| re.captures(text)) {
        let qualifier = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let role = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if let Some(pos) = compose(&[qualifier, role]) {
            return Some(pos);
        }
    }
    let re = patterns.get(1)?;
    re.captures_iter(text).find_map(|caps| {
        let seniority = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let qualifier = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let role = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        compose(&[seniority, qualifier, role])
    })
}

/// Join the matched parts, dropping articles. `None` when only the role noun is left.
fn compose(parts: &[&str]) -> Option<String> {
    let tokens: Vec<&str> = parts
        .iter()
        .flat_map(|p| p.split_whitespace())
        .filter(|t| !STOPWORDS.contains(&t.to_lowercase().as_str()))
        .collect();
    if tokens.len() < 2 {
        return None;
    }
    Some(tokens.iter().map(|t| title_word(t)).collect::<Vec<_>>().join(" "))
}

fn title_word(word: &str) -> String {
    if word.chars().any(|c| c.is_uppercase()) && word.chars().skip(1).any(|c| c.is_lowercase()) {
        return word.to_string();
    }
    if word.chars().all(|c| !c.is_lowercase()) && word.len() <= 4 {
        // acronyms such as QA, UX/UI, ML
        return word.to_string();
    }
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn keyword_position(text: &str) -> &'static str {
    let w = words(text);
    if ["software", "engineer", "developer"].iter().any(|k| w.contains(*k)) {
        "Software Engineer"
    } else if w.contains("product") {
        "Product Manager"
    } else if w.contains("designer") {
        "UX/UI Designer"
    } else {
        GENERIC_POSITION
    }
}
