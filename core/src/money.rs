//! Locale-numeric money parsing.
//!
//! The retailer renders prices in the Portuguese locale: comma decimal
//! separator, optional dot thousands separator, optional trailing currency
//! symbol (`"1.234,56 €"`). Cart probes and order extraction parse these
//! strings into integer minor units (cents); cross-module display values
//! use floating EUR.

/// Parse a locale-numeric price string into cents.
///
/// Accepts forms like `"162,51 €"`, `"0,86€"`, `"1.234,56 €"` and plain
/// `"12,00"`. Returns `None` for anything that does not contain a parseable
/// amount; callers treat `None` as "probe failed", never as zero.
///
/// # Examples
///
/// ```
/// use cartpilot_core::money::parse_eur_cents;
///
/// assert_eq!(parse_eur_cents("162,51 €"), Some(16251));
/// assert_eq!(parse_eur_cents("0,86 €"), Some(86));
/// assert_eq!(parse_eur_cents("1.234,56 €"), Some(123_456));
/// assert_eq!(parse_eur_cents("abc"), None);
/// ```
#[must_use]
pub fn parse_eur_cents(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let negative = cleaned.starts_with('-');
    let digits = cleaned.trim_start_matches('-');

    // Comma is the decimal separator; dots are thousands grouping.
    let (whole, frac) = match digits.rsplit_once(',') {
        Some((w, f)) => (w.replace('.', ""), f.to_string()),
        None => (digits.replace('.', ""), String::new()),
    };

    if frac.len() > 2 || frac.chars().any(|c| !c.is_ascii_digit()) {
        return None;
    }

    let whole_value: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };

    let frac_value: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };

    let cents = whole_value.checked_mul(100)?.checked_add(frac_value)?;
    Some(if negative { -cents } else { cents })
}

/// Convert cents to floating EUR for display values.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cents_to_eur(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Format cents as a locale price string, e.g. `16251` → `"162,51 €"`.
#[must_use]
pub fn format_eur(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{},{:02} €", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_amounts() {
        assert_eq!(parse_eur_cents("1,39 €"), Some(139));
        assert_eq!(parse_eur_cents("0,93 €"), Some(93));
        assert_eq!(parse_eur_cents("162,51 €"), Some(16251));
    }

    #[test]
    fn parses_thousands_grouping() {
        assert_eq!(parse_eur_cents("1.234,56 €"), Some(123_456));
        assert_eq!(parse_eur_cents("12.000,00"), Some(1_200_000));
    }

    #[test]
    fn parses_without_decimals() {
        assert_eq!(parse_eur_cents("12 €"), Some(1200));
        assert_eq!(parse_eur_cents("3"), Some(300));
    }

    #[test]
    fn parses_single_decimal_digit() {
        assert_eq!(parse_eur_cents("1,5 €"), Some(150));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_eur_cents("abc"), None);
        assert_eq!(parse_eur_cents(""), None);
        assert_eq!(parse_eur_cents("€"), None);
        assert_eq!(parse_eur_cents("1,234"), None);
    }

    #[test]
    fn negative_amounts() {
        assert_eq!(parse_eur_cents("-4,20 €"), Some(-420));
    }

    #[test]
    fn formats_round_trip() {
        assert_eq!(format_eur(16251), "162,51 €");
        assert_eq!(format_eur(86), "0,86 €");
        assert_eq!(format_eur(-420), "-4,20 €");
    }
}
