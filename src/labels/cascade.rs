//! The ordered resolver list behind [`LabelMapper`](super::LabelMapper).
//!
//! Each stage is a plain function from a normalized label to an optional
//! match. [`CASCADE`] lists them in precedence order; the first stage that
//! returns a match wins and later stages are never consulted. Adding a new
//! strategy means adding one function and one entry to the list.

use std::collections::BTreeMap;

use super::similarity::similarity_ratio;
use super::{normalize_label, ResolutionMethod};
use crate::model::ClassTaxonomy;

/// Built-in overrides, keyed by normalized source label.
pub const BUILTIN_OVERRIDES: &[(&str, &str)] = &[
    ("battery", "other"),
    ("biological", "other"),
    ("clothes", "other"),
    ("shoes", "other"),
    ("trash", "other"),
    ("plastic", "plastic"),
    ("metal", "metal"),
    ("glass", "glass"),
    ("paper", "paper"),
    ("cardboard", "cardboard"),
];

/// Domain synonyms checked by the keyword stage, in precedence order.
pub const KEYWORD_TABLE: &[(&str, &[&str])] = &[
    (
        "plastic",
        &[
            "plastic", "pet", "hdpe", "pvc", "ldpe", "pp", "ps", "bottle", "wrapper", "bag",
        ],
    ),
    (
        "metal",
        &["metal", "aluminum", "steel", "can", "tin", "foil", "aluminium"],
    ),
    ("glass", &["glass", "jar", "bottle"]),
    (
        "paper",
        &["paper", "newspaper", "magazine", "book", "cardboard", "carton"],
    ),
    ("cardboard", &["cardboard", "carton", "box", "packaging"]),
];

pub const SUBSTRING_CONFIDENCE: f64 = 0.95;
pub const KEYWORD_CONFIDENCE: f64 = 0.90;
pub const FALLBACK_CONFIDENCE: f64 = 0.50;

/// Everything a resolver may look at besides the label itself.
pub struct ResolveContext<'a> {
    pub taxonomy: &'a ClassTaxonomy,
    /// Caller overrides, keys already normalized.
    pub overrides: &'a BTreeMap<String, String>,
    /// Minimum fuzzy score, in percent.
    pub fuzzy_threshold: f64,
}

/// A stage's answer: the target class name and the stage's confidence.
#[derive(Clone, Debug, PartialEq)]
pub struct StageMatch {
    pub target: String,
    pub confidence: f64,
}

impl StageMatch {
    fn new(target: impl Into<String>, confidence: f64) -> Self {
        Self {
            target: target.into(),
            confidence,
        }
    }
}

pub type Resolver = fn(&str, &ResolveContext<'_>) -> Option<StageMatch>;

/// Resolution stages in precedence order. Fallback is not a stage: it is what
/// happens when every stage declines.
pub const CASCADE: [(ResolutionMethod, Resolver); 5] = [
    (ResolutionMethod::Manual, resolve_manual),
    (ResolutionMethod::Exact, resolve_exact),
    (ResolutionMethod::Fuzzy, resolve_fuzzy),
    (ResolutionMethod::Substring, resolve_substring),
    (ResolutionMethod::Keyword, resolve_keyword),
];

fn resolve_manual(label: &str, ctx: &ResolveContext<'_>) -> Option<StageMatch> {
    if let Some(target) = ctx.overrides.get(label) {
        return Some(StageMatch::new(target.clone(), 1.0));
    }

    BUILTIN_OVERRIDES
        .iter()
        .find(|(source, _)| *source == label)
        .map(|(_, target)| StageMatch::new(*target, 1.0))
}

fn resolve_exact(label: &str, ctx: &ResolveContext<'_>) -> Option<StageMatch> {
    ctx.taxonomy
        .names()
        .iter()
        .find(|name| normalize_label(name) == label)
        .map(|name| StageMatch::new(name.clone(), 1.0))
}

fn resolve_fuzzy(label: &str, ctx: &ResolveContext<'_>) -> Option<StageMatch> {
    let mut best: Option<(&String, f64)> = None;

    for name in ctx.taxonomy.names() {
        let score = similarity_ratio(label, &normalize_label(name));
        // Strictly greater keeps the earliest entry on ties.
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((name, score));
        }
    }

    best.filter(|(_, score)| *score >= ctx.fuzzy_threshold)
        .map(|(name, score)| StageMatch::new(name.clone(), score / 100.0))
}

fn resolve_substring(label: &str, ctx: &ResolveContext<'_>) -> Option<StageMatch> {
    ctx.taxonomy
        .names()
        .iter()
        .find(|name| label.contains(normalize_label(name).as_str()))
        .map(|name| StageMatch::new(name.clone(), SUBSTRING_CONFIDENCE))
}

fn resolve_keyword(label: &str, _ctx: &ResolveContext<'_>) -> Option<StageMatch> {
    KEYWORD_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| label.contains(keyword)))
        .map(|(target, _)| StageMatch::new(*target, KEYWORD_CONFIDENCE))
}
