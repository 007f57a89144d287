//! Popup pattern configuration.
//!
//! Patterns describe nuisance overlays the arbiter may dismiss. The set is
//! immutable configuration built once at startup; `cartpilot-arbiter` owns
//! the sweep logic and the safety gate that can veto any match.

use serde::{Deserialize, Serialize};

/// How a pattern's `text_match` compares against element text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatchMode {
    /// Element text contains the needle.
    #[default]
    Substring,
    /// Trimmed element text equals the needle.
    Exact,
}

/// One dismissible-overlay pattern.
///
/// Patterns are evaluated highest `priority` first. A pattern with
/// `skip_if_reorder_modal` set is skipped for the whole sweep whenever any
/// reorder-modal variant is visible.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupPattern {
    /// Pattern name, used in logs.
    pub name: String,
    /// Comma-separated CSS selector list for candidate elements.
    pub selector: String,
    /// Required element text, when the selector alone is too broad.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_match: Option<String>,
    /// How `text_match` compares.
    #[serde(default)]
    pub match_mode: TextMatchMode,
    /// Higher runs earlier within a sweep.
    pub priority: i32,
    /// Skip this pattern while a reorder modal is visible.
    #[serde(default)]
    pub skip_if_reorder_modal: bool,
    /// Authoring note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PopupPattern {
    /// Whether `content` satisfies this pattern's text requirement.
    /// Patterns without `text_match` accept any text.
    #[must_use]
    pub fn text_matches(&self, content: &str) -> bool {
        match (&self.text_match, self.match_mode) {
            (None, _) => true,
            (Some(needle), TextMatchMode::Substring) => content.contains(needle.as_str()),
            (Some(needle), TextMatchMode::Exact) => content.trim() == needle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(text: Option<&str>, mode: TextMatchMode) -> PopupPattern {
        PopupPattern {
            name: "t".into(),
            selector: "button".into(),
            text_match: text.map(str::to_string),
            match_mode: mode,
            priority: 0,
            skip_if_reorder_modal: false,
            description: None,
        }
    }

    #[test]
    fn no_text_match_accepts_anything() {
        assert!(pattern(None, TextMatchMode::Substring).text_matches("whatever"));
    }

    #[test]
    fn substring_and_exact_modes() {
        let sub = pattern(Some("Não"), TextMatchMode::Substring);
        assert!(sub.text_matches("Não, obrigado"));
        let exact = pattern(Some("Não"), TextMatchMode::Exact);
        assert!(exact.text_matches("  Não  "));
        assert!(!exact.text_matches("Não, obrigado"));
    }
}
