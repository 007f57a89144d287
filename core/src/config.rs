//! Run configuration.
//!
//! All timeouts from the concurrency model are configurable here; the
//! defaults match the documented operating values. Selector lists for the
//! cart probe are configuration, not code: the orchestrator fills them from
//! the registry when wiring adapters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts used across the run. All values in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Default operation timeout (element waits, clicks).
    pub operation_ms: u64,
    /// Full page navigation.
    pub navigation_ms: u64,
    /// Per-selector attempt while waiting for a modal.
    pub modal_wait_ms: u64,
    /// Wait for the reorder modal to materialize after the click.
    pub modal_materialize_ms: u64,
    /// Wait for the merge button before falling through to confirm.
    pub merge_button_wait_ms: u64,
    /// Wait for the cart to settle after a modal confirmation.
    pub cart_update_wait_ms: u64,
    /// Wait for the order-header chain on the detail page.
    pub order_header_wait_ms: u64,
    /// Keep-alive heartbeat period.
    pub heartbeat_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation_ms: 5_000,
            navigation_ms: 30_000,
            modal_wait_ms: 1_000,
            modal_materialize_ms: 1_500,
            merge_button_wait_ms: 3_000,
            cart_update_wait_ms: 3_000,
            order_header_wait_ms: 10_000,
            heartbeat_ms: 60_000,
        }
    }
}

impl Timeouts {
    /// Default operation timeout as a [`Duration`].
    #[must_use]
    pub const fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }

    /// Navigation timeout as a [`Duration`].
    #[must_use]
    pub const fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }
}

/// Ordered cart-probe selector lists, sourced from the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSelectors {
    /// Cart badge / item count selectors, first visible match wins.
    pub cart_count: Vec<String>,
    /// Cart total selectors, first visible match wins.
    pub cart_total: Vec<String>,
}

/// Retailer site layout: base URL and well-known paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site origin, no trailing slash.
    pub base_url: String,
    /// Order history list page path.
    pub order_history_path: String,
    /// Cart page path; also used to detect post-reorder redirects.
    pub cart_path: String,
    /// Search page path; the query lands in the `q` parameter.
    pub search_path: String,
    /// Delivery slot page path.
    pub slots_path: String,
    /// Lowercased brand markers identifying store-brand products.
    pub store_brand_markers: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.mercado.example".to_string(),
            order_history_path: "/minha-conta/encomendas".to_string(),
            cart_path: "/carrinho".to_string(),
            search_path: "/pesquisa".to_string(),
            slots_path: "/entrega".to_string(),
            store_brand_markers: vec!["polegar".to_string(), "mercado".to_string()],
        }
    }
}

impl SiteConfig {
    /// Absolute URL for a site path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Absolute search URL for a query.
    #[must_use]
    pub fn search_url(&self, query: &str) -> String {
        let encoded: String = query
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_string()
                } else if c == ' ' {
                    "+".to_string()
                } else {
                    let mut buf = [0u8; 4];
                    c.encode_utf8(&mut buf)
                        .bytes()
                        .map(|b| format!("%{b:02X}"))
                        .collect()
                }
            })
            .collect();
        format!("{}{}?q={encoded}", self.base_url, self.search_path)
    }

    /// Make a possibly-relative link absolute.
    #[must_use]
    pub fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{href}", self.base_url)
        }
    }
}

/// Top-level run configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CopilotConfig {
    /// Timeouts.
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Cart probe selectors.
    #[serde(default)]
    pub probe_selectors: ProbeSelectors,
    /// Retailer site layout.
    #[serde(default)]
    pub site: SiteConfig,
    /// Poll interval for the injected adapter's waits, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum prior orders merged into one run.
    pub max_orders_to_merge: usize,
    /// A persisted `running` state older than this is considered abandoned
    /// on wake and triggers recovery.
    pub recovery_stale_after_ms: u64,
    /// Order-history cache time-to-live, in milliseconds.
    pub order_cache_ttl_ms: u64,
    /// Substitute candidates proposed per unavailable item.
    pub max_substitutes_per_item: usize,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            probe_selectors: ProbeSelectors::default(),
            site: SiteConfig::default(),
            poll_interval_ms: 250,
            max_orders_to_merge: 3,
            recovery_stale_after_ms: 30_000,
            order_cache_ttl_ms: 24 * 60 * 60 * 1_000,
            max_substitutes_per_item: 3,
        }
    }
}
