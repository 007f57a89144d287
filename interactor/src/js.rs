//! JavaScript snippet builders for the injected adapter.
//!
//! Every snippet is a self-contained IIFE returning JSON-serializable data.
//! Selector and text arguments are JSON-encoded into the snippet so quoting
//! is always safe.

use cartpilot_core::probe::{CONFIRM_REORDER_LABEL, MERGE_BUTTON_LABELS, MODAL_ANCESTOR_SELECTOR, REMOVAL_TEXTS};

fn json(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn json_list(values: &[&str]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Idempotent bootstrap: element registry plus mutation observer.
pub(crate) const BOOTSTRAP: &str = r"(() => {
  if (window.__cartpilot) { return true; }
  window.__cartpilot = { seq: 0, refs: {}, mutations: 0 };
  const observer = new MutationObserver(() => { window.__cartpilot.mutations += 1; });
  observer.observe(document.documentElement, { childList: true, subtree: true, attributes: true });
  return true;
})()";

/// Read the mutation counter.
pub(crate) const MUTATION_TICK: &str =
    "(window.__cartpilot ? window.__cartpilot.mutations : 0)";

/// Read `location.href` and `document.readyState`.
pub(crate) const PAGE_STATUS: &str =
    "({ href: location.href, ready: document.readyState })";

const VISIBLE_FN: &str = r"const __visible = (el) => {
    if (!el || !el.isConnected) { return false; }
    const rect = el.getBoundingClientRect();
    if (rect.width <= 0 || rect.height <= 0) { return false; }
    const style = window.getComputedStyle(el);
    return style.display !== 'none' && style.visibility !== 'hidden';
  };";

/// One query attempt: first element matching `css` (and the optional text
/// predicate) is registered and its id returned, else `null`.
pub(crate) fn query_one(css: &str, text: Option<&str>, exact: bool, require_visible: bool) -> String {
    format!(
        r"(() => {{
  {VISIBLE_FN}
  const reg = window.__cartpilot;
  if (!reg) {{ return null; }}
  const needle = {needle};
  for (const el of document.querySelectorAll({css})) {{
    const text = el.textContent || '';
    if (needle !== null) {{
      if ({exact} ? text.trim() !== needle : !text.includes(needle)) {{ continue; }}
    }}
    if ({require_visible} && !__visible(el)) {{ continue; }}
    reg.seq += 1;
    reg.refs[reg.seq] = el;
    return reg.seq;
  }}
  return null;
}})()",
        css = json(css),
        needle = text.map_or_else(|| "null".to_string(), json),
    )
}

/// Register every element matching `css`; returns the id list.
pub(crate) fn query_all(css: &str) -> String {
    format!(
        r"(() => {{
  const reg = window.__cartpilot;
  if (!reg) {{ return []; }}
  const ids = [];
  for (const el of document.querySelectorAll({css})) {{
    reg.seq += 1;
    reg.refs[reg.seq] = el;
    ids.push(reg.seq);
  }}
  return ids;
}})()",
        css = json(css),
    )
}

/// Visibility of a registered element.
pub(crate) fn is_visible(id: u64) -> String {
    format!(
        r"(() => {{
  {VISIBLE_FN}
  const el = window.__cartpilot ? window.__cartpilot.refs[{id}] : null;
  return __visible(el);
}})()"
    )
}

/// Text content of a registered element, or `null` when stale.
pub(crate) fn text_content(id: u64) -> String {
    format!(
        r"(() => {{
  const el = window.__cartpilot ? window.__cartpilot.refs[{id}] : null;
  if (!el || !el.isConnected) {{ return null; }}
  return el.textContent;
}})()"
    )
}

/// Attribute of a registered element, or `null`.
pub(crate) fn attribute(id: u64, name: &str) -> String {
    format!(
        r"(() => {{
  const el = window.__cartpilot ? window.__cartpilot.refs[{id}] : null;
  if (!el || !el.isConnected) {{ return null; }}
  return el.getAttribute({name});
}})()",
        name = json(name),
    )
}

/// One click attempt on a registered element. Returns `"clicked"`,
/// `"blocked"` (not visible/enabled yet) or `"stale"`.
pub(crate) fn click(id: u64) -> String {
    format!(
        r"(() => {{
  {VISIBLE_FN}
  const el = window.__cartpilot ? window.__cartpilot.refs[{id}] : null;
  if (!el || !el.isConnected) {{ return 'stale'; }}
  if (!__visible(el) || el.disabled === true) {{ return 'blocked'; }}
  el.click();
  return 'clicked';
}})()"
    )
}

/// Cart probe: first visible match of each selector list, as raw texts.
pub(crate) fn cart_probe(count_selectors: &[&str], total_selectors: &[&str]) -> String {
    format!(
        r"(() => {{
  {VISIBLE_FN}
  const pick = (selectors) => {{
    for (const sel of selectors) {{
      for (const el of document.querySelectorAll(sel)) {{
        if (__visible(el)) {{ return el.textContent; }}
      }}
    }}
    return null;
  }};
  return {{ count: pick({count}), total: pick({total}) }};
}})()",
        count = json_list(count_selectors),
        total = json_list(total_selectors),
    )
}

/// Reorder-modal observations (see `classify`).
pub(crate) fn modal_observations() -> String {
    format!(
        r"(() => {{
  {VISIBLE_FN}
  const buttons = Array.from(document.querySelectorAll('button')).filter(__visible);
  const mergeLabels = {merge};
  const mergeVisible = buttons.some((b) => mergeLabels.includes((b.textContent || '').trim()));
  const bodyText = (document.body ? document.body.innerText : '').toLowerCase();
  const removalVisible = {removal}.some((t) => bodyText.includes(t.toLowerCase()));
  const confirmInModal = buttons.some((b) =>
    (b.textContent || '').includes({confirm}) && b.closest({ancestor}) !== null);
  return {{ mergeVisible, removalVisible, confirmInModal }};
}})()",
        merge = json_list(MERGE_BUTTON_LABELS),
        removal = json_list(REMOVAL_TEXTS),
        confirm = json(CONFIRM_REORDER_LABEL),
        ancestor = json(MODAL_ANCESTOR_SELECTOR),
    )
}

/// Kick off a same-tab navigation.
pub(crate) fn navigate(url: &str) -> String {
    format!("location.href = {};", json(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_json_escaped() {
        let snippet = query_one("button[aria-label='Fechar \"x\"']", None, false, true);
        assert!(snippet.contains(r#"button[aria-label='Fechar \"x\"']"#));
        assert!(snippet.contains("needle = null"));
    }

    #[test]
    fn text_predicates_are_embedded() {
        let snippet = query_one("button", Some("Juntar"), true, true);
        assert!(snippet.contains(r#""Juntar""#));
        assert!(snippet.contains("text.trim() !== needle"));
    }

    #[test]
    fn modal_snippet_carries_the_shared_vocabulary() {
        let snippet = modal_observations();
        assert!(snippet.contains("Juntar"));
        assert!(snippet.contains("Encomendar de novo"));
        assert!(snippet.contains("Remover produtos do carrinho"));
    }

    #[test]
    fn click_snippet_distinguishes_stale_from_blocked() {
        let snippet = click(4);
        assert!(snippet.contains("'stale'"));
        assert!(snippet.contains("'blocked'"));
        assert!(snippet.contains("'clicked'"));
    }
}
