//! Selector chain and page registry value types.
//!
//! Selectors are data, not code: chains are authored offline, stored in
//! registry JSON files, and only *read* at runtime. The sole selectors that
//! live in code are the forbidden-token lists of the popup safety gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Text predicate attached to a selector pattern via `:has-text("...")`.
///
/// Resolvers split the pattern into its base CSS and this post-filter,
/// comparing `textContent` by inclusion or equality.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPredicate {
    /// Text to look for.
    pub text: String,
    /// `true` for equality (trimmed), `false` for substring inclusion.
    #[serde(default)]
    pub exact: bool,
}

impl TextPredicate {
    /// Whether `content` satisfies this predicate.
    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        if self.exact {
            content.trim() == self.text
        } else {
            content.contains(&self.text)
        }
    }
}

/// One pattern in a chain: a CSS selector plus an optional text post-filter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorPattern {
    /// Base CSS selector.
    pub css: String,
    /// Optional `:has-text` post-filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextPredicate>,
}

impl SelectorPattern {
    /// A plain CSS pattern with no text filter.
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            css: selector.into(),
            text: None,
        }
    }

    /// Parse a raw pattern, splitting a trailing `:has-text("...")` into
    /// the base CSS and a substring predicate.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if let Some(idx) = raw.find(":has-text(") {
            let base = raw[..idx].trim().to_string();
            let rest = &raw[idx + ":has-text(".len()..];
            let inner = rest
                .trim_end_matches(')')
                .trim_matches(|c| c == '"' || c == '\'');
            return Self {
                css: base,
                text: Some(TextPredicate {
                    text: inner.to_string(),
                    exact: false,
                }),
            };
        }
        Self::css(raw)
    }
}

/// An ordered selector chain: primary pattern plus fallbacks.
///
/// Invariants: `primary.css` is non-empty and `id` is unique within a page.
/// Runtime resolution tries patterns strictly in declared order; the
/// offline stability scoring never reorders at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorChain {
    /// Chain identifier, unique within its page.
    pub id: String,
    /// The preferred pattern.
    pub primary: SelectorPattern,
    /// Ordered fallbacks, tried after the primary.
    #[serde(default)]
    pub fallbacks: SmallVec<[SelectorPattern; 4]>,
    /// Authoring note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SelectorChain {
    /// Build a chain from raw pattern strings, parsing `:has-text` filters.
    #[must_use]
    pub fn from_patterns(id: impl Into<String>, patterns: &[&str]) -> Self {
        let mut iter = patterns.iter();
        let primary = iter.next().map_or_else(
            || SelectorPattern::css(""),
            |raw| SelectorPattern::parse(raw),
        );
        Self {
            id: id.into(),
            primary,
            fallbacks: iter.map(|raw| SelectorPattern::parse(raw)).collect(),
            description: None,
        }
    }

    /// All patterns in resolution order.
    pub fn patterns(&self) -> impl Iterator<Item = &SelectorPattern> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// Number of patterns including the primary.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.fallbacks.len()
    }

    /// A chain always has at least the primary pattern.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Validation status stamped by the offline registry writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Every chain resolved on the last offline validation.
    Valid,
    /// Some fallbacks were needed or some non-essential chains failed.
    Degraded,
    /// Essential chains failed; the page entry needs re-discovery.
    Broken,
}

/// Result of the last offline validation pass for a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageValidation {
    /// When the validation ran.
    pub timestamp: DateTime<Utc>,
    /// Outcome.
    pub status: ValidationStatus,
    /// Chain ids that failed to resolve.
    #[serde(default)]
    pub failed_selectors: Vec<String>,
}

/// One versioned selector set for a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageVersion {
    /// Version label, e.g. `"2026-06-14"`.
    pub version: String,
    /// Chains keyed by their id.
    pub chains: Vec<SelectorChain>,
}

/// Registry entry for one retailer page.
///
/// Created offline; resolvers treat entries as read-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRegistryEntry {
    /// Stable page identifier, e.g. `"order-detail"`.
    pub page_id: String,
    /// Regex over URLs identifying this page.
    pub url_pattern: String,
    /// Version label currently active.
    pub active_version: String,
    /// All known versions, newest first.
    pub versions: Vec<PageVersion>,
    /// Last offline validation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validation: Option<PageValidation>,
}

impl PageRegistryEntry {
    /// The chains of the active version, if that version exists.
    #[must_use]
    pub fn active_chains(&self) -> Option<&[SelectorChain]> {
        self.versions
            .iter()
            .find(|v| v.version == self.active_version)
            .map(|v| v.chains.as_slice())
    }
}
