//! Full-control driver adapter over a persistent CDP browser session.

use crate::cartprobe::build_cart_state;
use crate::classify::{classify, ModalObservations};
use async_trait::async_trait;
use cartpilot_core::config::ProbeSelectors;
use cartpilot_core::error::InteractError;
use cartpilot_core::port::{
    ClickOptions, FindOptions, FindResult, Interactor, NavigateOptions, WaitNavigationOptions,
};
use cartpilot_core::probe::{
    is_merge_label, is_removal_text, ReorderModalProbe, CONFIRM_REORDER_LABEL,
    MODAL_ANCESTOR_SELECTOR,
};
use cartpilot_core::selector::{SelectorChain, SelectorPattern};
use cartpilot_core::types::CartState;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use chrono::Utc;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Options for launching the driver session.
#[derive(Clone, Debug)]
pub struct DriverOptions {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Poll interval for element waits.
    pub poll_interval: Duration,
    /// Directory screenshots are written into.
    pub screenshot_dir: PathBuf,
    /// Cart probe selector lists from the registry.
    pub probe_selectors: ProbeSelectors,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            headless: true,
            poll_interval: Duration::from_millis(250),
            screenshot_dir: PathBuf::from("screenshots"),
            probe_selectors: ProbeSelectors::default(),
        }
    }
}

/// A launched browser plus the task driving its CDP connection.
///
/// Close with [`BrowserSession::close`]; the browser is shut down before
/// the handler task is aborted so the connection drains cleanly.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch a browser and open a blank page, returning the session and a
    /// [`DriverInteractor`] bound to that page.
    ///
    /// # Errors
    ///
    /// Fails when the browser cannot be launched or the page cannot open.
    pub async fn launch(
        options: DriverOptions,
    ) -> Result<(Self, DriverInteractor), InteractError> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(InteractError::NetworkError)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(map_cdp)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(map_cdp)?;
        tracing::info!(headless = options.headless, "browser session launched");

        let interactor = DriverInteractor::new(page, options);
        Ok((
            Self {
                browser,
                handler_task,
            },
            interactor,
        ))
    }

    /// Close the browser, then stop the handler task.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            tracing::warn!(error = %err, "browser close failed");
        }
        if let Err(err) = self.browser.wait().await {
            tracing::debug!(error = %err, "browser wait after close failed");
        }
        self.handler_task.abort();
        let _ = self.handler_task.await;
        tracing::info!("browser session closed");
    }
}

/// The full-control adapter. Cheap to clone; clones share the page.
#[derive(Clone)]
pub struct DriverInteractor {
    page: Page,
    options: Arc<DriverOptions>,
}

fn map_cdp(err: chromiumoxide::error::CdpError) -> InteractError {
    InteractError::NetworkError(err.to_string())
}

const VISIBLE_JS: &str = r"function() {
  if (!this.isConnected) { return false; }
  const rect = this.getBoundingClientRect();
  if (rect.width <= 0 || rect.height <= 0) { return false; }
  const style = window.getComputedStyle(this);
  return style.display !== 'none' && style.visibility !== 'hidden';
}";

const DISABLED_JS: &str = "function() { return this.disabled === true; }";

impl DriverInteractor {
    /// Wrap an existing page.
    #[must_use]
    pub fn new(page: Page, options: DriverOptions) -> Self {
        Self {
            page,
            options: Arc::new(options),
        }
    }

    async fn element_visible(&self, element: &Element) -> bool {
        match element.call_js_fn(VISIBLE_JS, false).await {
            Ok(ret) => ret
                .result
                .value
                .as_ref()
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn element_disabled(&self, element: &Element) -> bool {
        match element.call_js_fn(DISABLED_JS, false).await {
            Ok(ret) => ret
                .result
                .value
                .as_ref()
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    async fn element_in_modal(&self, element: &Element) -> bool {
        let js = format!(
            "function() {{ return this.closest({}) !== null; }}",
            serde_json::to_string(MODAL_ANCESTOR_SELECTOR).unwrap_or_else(|_| "''".to_string())
        );
        match element.call_js_fn(js, false).await {
            Ok(ret) => ret
                .result
                .value
                .as_ref()
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// One attempt at a single pattern: query, text post-filter, optional
    /// visibility requirement.
    async fn try_pattern(
        &self,
        pattern: &SelectorPattern,
        require_visible: bool,
    ) -> Result<Option<Element>, InteractError> {
        let elements = self
            .page
            .find_elements(pattern.css.as_str())
            .await
            .unwrap_or_default();
        for element in elements {
            if let Some(predicate) = &pattern.text {
                let text = element
                    .inner_text()
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                if !predicate.matches(&text) {
                    continue;
                }
            }
            if require_visible && !self.element_visible(&element).await {
                continue;
            }
            return Ok(Some(element));
        }
        Ok(None)
    }

    async fn first_visible_text(&self, selectors: &[String]) -> Option<String> {
        for selector in selectors {
            let elements = self
                .page
                .find_elements(selector.as_str())
                .await
                .unwrap_or_default();
            for element in elements {
                if self.element_visible(&element).await {
                    if let Ok(Some(text)) = element.inner_text().await {
                        return Some(text);
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl Interactor for DriverInteractor {
    type Handle = Arc<Element>;

    async fn find_element(
        &self,
        chain: &SelectorChain,
        opts: FindOptions,
    ) -> Result<Option<FindResult<Arc<Element>>>, InteractError> {
        let deadline = Instant::now() + opts.timeout;
        loop {
            for (index, pattern) in chain.patterns().enumerate() {
                if let Some(element) = self.try_pattern(pattern, opts.visible).await? {
                    return Ok(Some(FindResult {
                        handle: Arc::new(element),
                        selector_index: index,
                        matched_selector: pattern.css.clone(),
                    }));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<Arc<Element>>, InteractError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .unwrap_or_default();
        Ok(elements.into_iter().map(Arc::new).collect())
    }

    async fn click(
        &self,
        handle: &Arc<Element>,
        opts: ClickOptions,
    ) -> Result<(), InteractError> {
        let deadline = Instant::now() + opts.timeout;
        loop {
            if self.element_visible(handle).await && !self.element_disabled(handle).await {
                return handle.click().await.map(|_| ()).map_err(map_cdp);
            }
            if Instant::now() >= deadline {
                return Err(InteractError::Timeout {
                    waited_ms: opts.timeout.as_millis().try_into().unwrap_or(u64::MAX),
                    context: "element never became clickable".to_string(),
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn is_visible(&self, handle: &Arc<Element>) -> bool {
        self.element_visible(handle).await
    }

    async fn text_content(&self, handle: &Arc<Element>) -> Option<String> {
        handle.inner_text().await.ok().flatten()
    }

    async fn attribute(&self, handle: &Arc<Element>, name: &str) -> Option<String> {
        handle.attribute(name).await.ok().flatten()
    }

    async fn cart_state(&self) -> CartState {
        let count_text = self
            .first_visible_text(&self.options.probe_selectors.cart_count)
            .await;
        let total_text = self
            .first_visible_text(&self.options.probe_selectors.cart_total)
            .await;
        build_cart_state(count_text.as_deref(), total_text.as_deref(), Utc::now())
    }

    async fn reorder_modal(&self) -> ReorderModalProbe {
        let buttons = self.page.find_elements("button").await.unwrap_or_default();
        let mut merge_button_visible = false;
        let mut confirm_in_modal = false;
        for button in &buttons {
            if !self.element_visible(button).await {
                continue;
            }
            let text = button.inner_text().await.ok().flatten().unwrap_or_default();
            if is_merge_label(&text) {
                merge_button_visible = true;
                break;
            }
            if text.contains(CONFIRM_REORDER_LABEL) && self.element_in_modal(button).await {
                confirm_in_modal = true;
            }
        }

        let body_text: String = self
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .ok()
            .and_then(|v| v.into_value().ok())
            .unwrap_or_default();

        classify(ModalObservations {
            merge_button_visible,
            removal_text_visible: is_removal_text(&body_text),
            confirm_in_modal,
        })
    }

    async fn current_url(&self) -> Result<String, InteractError> {
        self.page
            .url()
            .await
            .map_err(map_cdp)?
            .ok_or_else(|| InteractError::PageNotReady("page has no URL".to_string()))
    }

    async fn navigate_to(&self, url: &str, opts: NavigateOptions) -> Result<(), InteractError> {
        let navigation = async {
            self.page.goto(url).await.map_err(map_cdp)?;
            self.page.wait_for_navigation().await.map_err(map_cdp)?;
            Ok(())
        };
        match tokio::time::timeout(opts.timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(InteractError::Timeout {
                waited_ms: opts.timeout.as_millis().try_into().unwrap_or(u64::MAX),
                context: format!("navigation to {url}"),
            }),
        }
    }

    async fn wait_for_navigation(
        &self,
        opts: WaitNavigationOptions,
    ) -> Result<(), InteractError> {
        let timeout = opts.timeout.unwrap_or(Duration::from_secs(30));
        let waited = tokio::time::timeout(timeout, self.page.wait_for_navigation()).await;
        match waited {
            Ok(result) => {
                result.map_err(map_cdp)?;
            },
            Err(_) => {
                return Err(InteractError::Timeout {
                    waited_ms: timeout.as_millis().try_into().unwrap_or(u64::MAX),
                    context: "navigation".to_string(),
                })
            },
        }
        if let Some(pattern) = &opts.url_pattern {
            let url = self.current_url().await?;
            let matches = regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&url));
            if !matches {
                return Err(InteractError::WrongPage(format!(
                    "settled on {url}, expected {pattern}"
                )));
            }
        }
        Ok(())
    }

    async fn screenshot(&self, name: &str) -> Result<String, InteractError> {
        let bytes = self
            .page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(map_cdp)?;
        let path = self
            .options
            .screenshot_dir
            .join(format!("{name}-{}.png", Utc::now().timestamp_millis()));
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| InteractError::NetworkError(format!("screenshot write: {e}")))?;
        Ok(path.to_string_lossy().into_owned())
    }
}
