//! Content-script-style adapter: every operation is injected JavaScript.
//!
//! The adapter keeps no element state on the Rust side. A bootstrap snippet
//! installs a window-side registry (`window.__cartpilot`) holding element
//! references behind integer ids, plus a `MutationObserver` whose counter
//! feeds the popup observer's mutation signal. Navigation tears the
//! registry down with the document; handles then read as stale, which the
//! getters report as `false` / `None` per the port contract.
//!
//! There are no high-level waiters here: waits are polls of the page at a
//! configurable interval until the deadline.

use crate::cartprobe::build_cart_state;
use crate::classify::{classify, ModalObservations};
use crate::js;
use async_trait::async_trait;
use cartpilot_core::config::ProbeSelectors;
use cartpilot_core::error::InteractError;
use cartpilot_core::port::{
    ClickOptions, FindOptions, FindResult, Interactor, NavigateOptions, WaitNavigationOptions,
};
use cartpilot_core::probe::ReorderModalProbe;
use cartpilot_core::selector::{SelectorChain, SelectorPattern};
use cartpilot_core::types::CartState;
use chromiumoxide::page::Page;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The injected-script adapter.
#[derive(Clone)]
pub struct InjectedInteractor {
    page: Page,
    poll_interval: Duration,
    probe_selectors: Arc<ProbeSelectors>,
}

#[derive(Debug, Deserialize)]
struct PageStatus {
    href: String,
    ready: String,
}

#[derive(Debug, Deserialize)]
struct CartProbeTexts {
    count: Option<String>,
    total: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModalProbeRaw {
    merge_visible: bool,
    removal_visible: bool,
    confirm_in_modal: bool,
}

impl InjectedInteractor {
    /// Bind to a page. The bootstrap is installed lazily on first use and
    /// re-installed after every navigation.
    #[must_use]
    pub fn new(page: Page, poll_interval: Duration, probe_selectors: ProbeSelectors) -> Self {
        Self {
            page,
            poll_interval,
            probe_selectors: Arc::new(probe_selectors),
        }
    }

    /// Evaluate a snippet and deserialize its JSON result.
    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T, InteractError> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| InteractError::NetworkError(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| InteractError::PageNotReady(format!("evaluation result: {e}")))
    }

    /// Evaluate a snippet where failure is expected (detached documents,
    /// navigations in flight); any fault collapses to the given default.
    async fn eval_or<T: serde::de::DeserializeOwned>(&self, js: &str, default: T) -> T {
        self.eval(js).await.unwrap_or(default)
    }

    async fn ensure_installed(&self) -> Result<(), InteractError> {
        let _: bool = self.eval(js::BOOTSTRAP).await?;
        Ok(())
    }

    async fn try_pattern(
        &self,
        pattern: &SelectorPattern,
        require_visible: bool,
    ) -> Result<Option<u64>, InteractError> {
        self.ensure_installed().await?;
        let snippet = js::query_one(
            &pattern.css,
            pattern.text.as_ref().map(|p| p.text.as_str()),
            pattern.text.as_ref().is_some_and(|p| p.exact),
            require_visible,
        );
        let id: Option<u64> = self.eval_or(&snippet, None).await;
        Ok(id)
    }
}

#[async_trait]
impl Interactor for InjectedInteractor {
    type Handle = u64;

    async fn find_element(
        &self,
        chain: &SelectorChain,
        opts: FindOptions,
    ) -> Result<Option<FindResult<u64>>, InteractError> {
        let deadline = Instant::now() + opts.timeout;
        loop {
            for (index, pattern) in chain.patterns().enumerate() {
                if let Some(id) = self.try_pattern(pattern, opts.visible).await? {
                    return Ok(Some(FindResult {
                        handle: id,
                        selector_index: index,
                        matched_selector: pattern.css.clone(),
                    }));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<u64>, InteractError> {
        self.ensure_installed().await?;
        Ok(self.eval_or(&js::query_all(selector), Vec::new()).await)
    }

    async fn click(&self, handle: &u64, opts: ClickOptions) -> Result<(), InteractError> {
        let deadline = Instant::now() + opts.timeout;
        loop {
            let outcome: String = self.eval_or(&js::click(*handle), String::new()).await;
            match outcome.as_str() {
                "clicked" => return Ok(()),
                "stale" => {
                    return Err(InteractError::ElementNotFound(format!(
                        "stale handle {handle}"
                    )))
                },
                _ => {
                    if Instant::now() >= deadline {
                        return Err(InteractError::Timeout {
                            waited_ms: opts.timeout.as_millis().try_into().unwrap_or(u64::MAX),
                            context: "element never became clickable".to_string(),
                        });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                },
            }
        }
    }

    async fn is_visible(&self, handle: &u64) -> bool {
        self.eval_or(&js::is_visible(*handle), false).await
    }

    async fn text_content(&self, handle: &u64) -> Option<String> {
        self.eval_or(&js::text_content(*handle), None).await
    }

    async fn attribute(&self, handle: &u64, name: &str) -> Option<String> {
        self.eval_or(&js::attribute(*handle, name), None).await
    }

    async fn cart_state(&self) -> CartState {
        let count_refs: Vec<&str> = self
            .probe_selectors
            .cart_count
            .iter()
            .map(String::as_str)
            .collect();
        let total_refs: Vec<&str> = self
            .probe_selectors
            .cart_total
            .iter()
            .map(String::as_str)
            .collect();
        let snippet = js::cart_probe(&count_refs, &total_refs);
        let texts = self
            .eval_or(
                &snippet,
                CartProbeTexts {
                    count: None,
                    total: None,
                },
            )
            .await;
        build_cart_state(texts.count.as_deref(), texts.total.as_deref(), Utc::now())
    }

    async fn reorder_modal(&self) -> ReorderModalProbe {
        let raw = self
            .eval_or(
                &js::modal_observations(),
                ModalProbeRaw {
                    merge_visible: false,
                    removal_visible: false,
                    confirm_in_modal: false,
                },
            )
            .await;
        classify(ModalObservations {
            merge_button_visible: raw.merge_visible,
            removal_text_visible: raw.removal_visible,
            confirm_in_modal: raw.confirm_in_modal,
        })
    }

    async fn current_url(&self) -> Result<String, InteractError> {
        let status: PageStatus = self.eval(js::PAGE_STATUS).await?;
        Ok(status.href)
    }

    async fn navigate_to(&self, url: &str, opts: NavigateOptions) -> Result<(), InteractError> {
        self.page
            .evaluate(js::navigate(url))
            .await
            .map_err(|e| InteractError::NetworkError(e.to_string()))?;
        self.wait_for_navigation(WaitNavigationOptions {
            timeout: Some(opts.timeout),
            url_pattern: None,
        })
        .await
    }

    async fn wait_for_navigation(
        &self,
        opts: WaitNavigationOptions,
    ) -> Result<(), InteractError> {
        let timeout = opts.timeout.unwrap_or(Duration::from_secs(30));
        let deadline = Instant::now() + timeout;
        let pattern = opts
            .url_pattern
            .as_deref()
            .and_then(|p| regex::Regex::new(p).ok());

        loop {
            let status: Option<PageStatus> = self.eval(js::PAGE_STATUS).await.ok();
            if let Some(status) = status {
                let ready = status.ready == "complete";
                let url_ok = pattern.as_ref().is_none_or(|re| re.is_match(&status.href));
                if ready && url_ok {
                    // Fresh document; the registry went with the old one.
                    self.ensure_installed().await?;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(InteractError::Timeout {
                    waited_ms: timeout.as_millis().try_into().unwrap_or(u64::MAX),
                    context: "navigation never settled".to_string(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn screenshot(&self, name: &str) -> Result<String, InteractError> {
        // Content scripts cannot rasterize the page; return a stub id.
        Ok(format!("stub:{name}"))
    }

    async fn mutation_tick(&self) -> Option<u64> {
        if self.ensure_installed().await.is_err() {
            return None;
        }
        self.eval(js::MUTATION_TICK).await.ok()
    }
}
