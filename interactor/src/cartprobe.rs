//! Cart-probe text parsing, shared by both adapters.

use cartpilot_core::money::parse_eur_cents;
use cartpilot_core::types::CartState;
use chrono::{DateTime, Utc};

/// Parse the cart badge text into an item count.
///
/// Badges render as `"12"`, `"12 artigos"` or similar; the first run of
/// digits wins. Empty or digit-free text yields `None`.
#[must_use]
pub fn parse_count(raw: &str) -> Option<u32> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Assemble a [`CartState`] from raw badge and total texts.
///
/// Either side being absent or unparseable yields `None` for that field;
/// the probe itself never fails.
#[must_use]
pub fn build_cart_state(
    count_text: Option<&str>,
    total_text: Option<&str>,
    captured_at: DateTime<Utc>,
) -> CartState {
    CartState {
        item_count: count_text.and_then(parse_count),
        total_cents: total_text.and_then(parse_eur_cents),
        captured_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_parses_plain_and_suffixed() {
        assert_eq!(parse_count("12"), Some(12));
        assert_eq!(parse_count("12 artigos"), Some(12));
        assert_eq!(parse_count(" (3) "), Some(3));
        assert_eq!(parse_count("artigos"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn state_fields_fail_independently() {
        let state = build_cart_state(Some("7"), Some("abc"), Utc::now());
        assert_eq!(state.item_count, Some(7));
        assert_eq!(state.total_cents, None);

        let state = build_cart_state(None, Some("162,51 €"), Utc::now());
        assert_eq!(state.item_count, None);
        assert_eq!(state.total_cents, Some(16251));
    }
}
