//! Registry loading and lookup.

use crate::error::RegistryError;
use cartpilot_core::selector::{PageRegistryEntry, SelectorChain};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Master index file naming the per-page registry files.
#[derive(Debug, Deserialize)]
struct MasterIndex {
    pages: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    page_id: String,
    file: String,
}

/// The selector registry: read-only shared configuration mapping
/// `(page_id, chain_id)` to selector chains.
#[derive(Debug, Clone)]
pub struct Registry {
    pages: HashMap<String, PageRegistryEntry>,
}

impl Registry {
    /// Build a registry from already-parsed entries. Used by tests and by
    /// [`Registry::bundled`].
    #[must_use]
    pub fn from_entries(entries: Vec<PageRegistryEntry>) -> Self {
        let pages = entries
            .into_iter()
            .map(|e| (e.page_id.clone(), e))
            .collect();
        Self { pages }
    }

    /// Load the registry from a directory holding `index.json` and the
    /// per-page files it names.
    ///
    /// # Errors
    ///
    /// Fails when the index or any named page file is unreadable or does
    /// not parse.
    pub fn load_dir(dir: &Path) -> Result<Self, RegistryError> {
        let index_raw = std::fs::read_to_string(dir.join("index.json"))
            .map_err(|e| RegistryError::Io(e.to_string()))?;
        let index: MasterIndex =
            serde_json::from_str(&index_raw).map_err(|e| RegistryError::Parse(e.to_string()))?;

        let mut entries = Vec::with_capacity(index.pages.len());
        for page in &index.pages {
            let raw = std::fs::read_to_string(dir.join(&page.file))
                .map_err(|e| RegistryError::Io(format!("{}: {e}", page.file)))?;
            let entry: PageRegistryEntry = serde_json::from_str(&raw)
                .map_err(|e| RegistryError::Parse(format!("{}: {e}", page.file)))?;
            if entry.page_id != page.page_id {
                return Err(RegistryError::Parse(format!(
                    "{} declares page '{}' but index names '{}'",
                    page.file, entry.page_id, page.page_id
                )));
            }
            entries.push(entry);
        }
        tracing::info!(pages = entries.len(), "selector registry loaded");
        Ok(Self::from_entries(entries))
    }

    /// The registry bundled with the crate, parsed from the data files
    /// under `registry/data/`.
    ///
    /// # Errors
    ///
    /// Fails only if the bundled files are malformed.
    pub fn bundled() -> Result<Self, RegistryError> {
        const PAGES: &[(&str, &str)] = &[
            ("order-list", include_str!("../data/pages/order-list.json")),
            (
                "order-detail",
                include_str!("../data/pages/order-detail.json"),
            ),
            ("cart", include_str!("../data/pages/cart.json")),
            ("search", include_str!("../data/pages/search.json")),
            ("slots", include_str!("../data/pages/slots.json")),
            ("account", include_str!("../data/pages/account.json")),
            (
                "reorder-modal",
                include_str!("../data/pages/reorder-modal.json"),
            ),
        ];
        let mut entries = Vec::with_capacity(PAGES.len());
        for (page_id, raw) in PAGES {
            let entry: PageRegistryEntry = serde_json::from_str(raw)
                .map_err(|e| RegistryError::Parse(format!("{page_id}: {e}")))?;
            entries.push(entry);
        }
        Ok(Self::from_entries(entries))
    }

    /// Whether the page is registered.
    #[must_use]
    pub fn has_page(&self, page_id: &str) -> bool {
        self.pages.contains_key(page_id)
    }

    /// The registry entry for a page.
    ///
    /// # Errors
    ///
    /// [`RegistryError::PageNotFound`] when absent.
    pub fn page(&self, page_id: &str) -> Result<&PageRegistryEntry, RegistryError> {
        self.pages
            .get(page_id)
            .ok_or_else(|| RegistryError::PageNotFound(page_id.to_string()))
    }

    /// Resolve `(page_id, chain_id)` to its chain in the active version.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ChainNotFound`] when the chain is absent — fatal
    /// for the calling phase — and [`RegistryError::VersionMissing`] when
    /// the entry's active version dangles.
    pub fn resolve(&self, page_id: &str, chain_id: &str) -> Result<&SelectorChain, RegistryError> {
        let entry = self.page(page_id)?;
        let chains = entry
            .active_chains()
            .ok_or_else(|| RegistryError::VersionMissing {
                page_id: page_id.to_string(),
                version: entry.active_version.clone(),
            })?;
        chains
            .iter()
            .find(|c| c.id == chain_id)
            .ok_or_else(|| RegistryError::ChainNotFound {
                page_id: page_id.to_string(),
                chain_id: chain_id.to_string(),
            })
    }

    /// The first registered page whose URL pattern matches `url`.
    #[must_use]
    pub fn match_url(&self, url: &str) -> Option<&PageRegistryEntry> {
        self.pages.values().find(|entry| {
            Regex::new(&entry.url_pattern).is_ok_and(|re| re.is_match(url))
        })
    }

    /// Ids of registered pages, for diagnostics.
    pub fn page_ids(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::expect_used)] // Test code
    fn registry() -> Registry {
        Registry::bundled().expect("bundled registry parses")
    }

    #[test]
    fn bundled_registry_has_all_pages() {
        let reg = registry();
        for page in [
            "order-list",
            "order-detail",
            "cart",
            "search",
            "slots",
            "account",
            "reorder-modal",
        ] {
            assert!(reg.has_page(page), "missing page {page}");
        }
    }

    #[test]
    fn resolve_known_chain() {
        let reg = registry();
        let chain = reg.resolve("order-detail", "reorder-button");
        assert!(chain.is_ok_and(|c| !c.primary.css.is_empty()));
    }

    #[test]
    fn resolve_missing_chain_is_fatal() {
        let reg = registry();
        let err = reg.resolve("order-detail", "no-such-chain");
        assert!(matches!(err, Err(RegistryError::ChainNotFound { .. })));
    }

    #[test]
    fn resolve_missing_page() {
        let reg = registry();
        assert!(matches!(
            reg.resolve("checkout", "anything"),
            Err(RegistryError::PageNotFound(_))
        ));
    }

    #[test]
    fn url_matching_finds_order_detail() {
        let reg = registry();
        let entry = reg.match_url("https://www.store.example/orders/12345/detail");
        assert!(entry.is_some_and(|e| e.page_id == "order-detail"));
    }

    #[test]
    #[allow(clippy::expect_used, clippy::unwrap_used)] // Test code
    fn load_dir_round_trips_bundled_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pages_dir = dir.path();
        std::fs::write(
            pages_dir.join("index.json"),
            r#"{"pages":[{"page_id":"cart","file":"cart.json"}]}"#,
        )
        .unwrap();
        std::fs::write(
            pages_dir.join("cart.json"),
            include_str!("../data/pages/cart.json"),
        )
        .unwrap();
        let reg = Registry::load_dir(pages_dir).expect("loads");
        assert!(reg.has_page("cart"));
        assert!(!reg.has_page("order-list"));
    }
}
