//! Mock implementations of the page and time ports.

use async_trait::async_trait;
use cartpilot_core::error::InteractError;
use cartpilot_core::port::{
    ClickOptions, Clock, FindOptions, FindResult, Interactor, NavigateOptions,
    WaitNavigationOptions,
};
use cartpilot_core::probe::{ReorderModalKind, ReorderModalProbe};
use cartpilot_core::selector::SelectorChain;
use cartpilot_core::types::CartState;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Fixed clock for deterministic tests. Always returns the same time.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock at the given instant.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Default fixed clock for tests (2026-01-01 00:00:00 UTC).
#[must_use]
pub fn test_clock() -> FixedClock {
    let time = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    FixedClock::new(time)
}

/// Side effects applied when a scripted element is clicked.
#[derive(Clone, Debug)]
pub enum ClickEffect {
    /// Remove the clicked element.
    RemoveSelf,
    /// Remove every element registered under this selector.
    RemoveMatching(String),
    /// Set the reorder modal probe.
    SetModal(ReorderModalKind),
    /// Clear the reorder modal probe.
    ClearModal,
    /// Replace the scripted cart probe result.
    SetCartState {
        /// New badge count.
        item_count: Option<u32>,
        /// New cart total in cents.
        total_cents: Option<i64>,
    },
    /// Add a new element to the page.
    AddElement(ElementSpec),
}

/// Declarative element description for scripting.
#[derive(Clone, Debug)]
pub struct ElementSpec {
    /// Selector the element answers to (one segment of a comma list).
    pub selector: String,
    /// Text content.
    pub text: String,
    /// Attributes (`class`, `data-target`, ...).
    pub attributes: HashMap<String, String>,
    /// Visibility.
    pub visible: bool,
    /// Disabled flag.
    pub disabled: bool,
}

impl ElementSpec {
    /// A visible, enabled element.
    #[must_use]
    pub fn new(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: text.into(),
            attributes: HashMap::new(),
            visible: true,
            disabled: false,
        }
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Mark hidden.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Clone, Debug)]
struct MockElement {
    id: u64,
    spec: ElementSpec,
    on_click: Vec<ClickEffect>,
    on_click_queue: VecDeque<Vec<ClickEffect>>,
}

#[derive(Debug, Default)]
struct MockPage {
    elements: Vec<MockElement>,
    next_id: u64,
    url: String,
    cart: CartStateScript,
    modal: ReorderModalKind,
    clicks: Vec<(u64, String)>,
    navigations: Vec<String>,
    screenshots: Vec<String>,
}

#[derive(Debug)]
struct CartStateScript {
    item_count: Option<u32>,
    total_cents: Option<i64>,
}

impl Default for CartStateScript {
    fn default() -> Self {
        Self {
            item_count: Some(0),
            total_cents: Some(0),
        }
    }
}

/// A scripted in-memory page implementing the [`Interactor`] port.
///
/// Elements are registered under the exact selector string they answer to;
/// `find_element` matches a chain pattern when the pattern's CSS equals the
/// registered selector (or one segment of a comma list) and the pattern's
/// text predicate accepts the element text.
#[derive(Clone, Default)]
pub struct MockInteractor {
    page: Arc<Mutex<MockPage>>,
    mutations: Arc<AtomicU64>,
}

impl MockInteractor {
    /// A fresh empty page at `about:blank`.
    #[must_use]
    pub fn new() -> Self {
        let this = Self::default();
        this.lock().url = "about:blank".to_string();
        this
    }

    fn lock(&self) -> MutexGuard<'_, MockPage> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_mutations(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Add a visible element; returns its handle.
    pub fn add_element(&self, selector: impl Into<String>, text: impl Into<String>) -> u64 {
        self.add_spec(ElementSpec::new(selector, text))
    }

    /// Add an element from a full spec; returns its handle.
    pub fn add_spec(&self, spec: ElementSpec) -> u64 {
        let mut page = self.lock();
        let id = page.next_id;
        page.next_id += 1;
        page.elements.push(MockElement {
            id,
            spec,
            on_click: vec![ClickEffect::RemoveSelf],
            on_click_queue: VecDeque::new(),
        });
        drop(page);
        self.bump_mutations();
        id
    }

    /// Replace the click effects of an element.
    pub fn set_click_effects(&self, id: u64, effects: Vec<ClickEffect>) {
        let mut page = self.lock();
        if let Some(el) = page.elements.iter_mut().find(|e| e.id == id) {
            el.on_click = effects;
        }
    }

    /// Script different effects for successive clicks of one element; once
    /// the sequence is exhausted, the element's steady effects apply.
    pub fn set_click_effect_sequence(&self, id: u64, sequence: Vec<Vec<ClickEffect>>) {
        let mut page = self.lock();
        if let Some(el) = page.elements.iter_mut().find(|e| e.id == id) {
            el.on_click_queue = sequence.into();
            el.on_click = Vec::new();
        }
    }

    /// Remove every element registered under `selector`.
    pub fn remove_matching(&self, selector: &str) {
        self.lock().elements.retain(|e| e.spec.selector != selector);
        self.bump_mutations();
    }

    /// Script the reorder modal probe.
    pub fn set_modal(&self, kind: ReorderModalKind) {
        self.lock().modal = kind;
    }

    /// Script the cart probe result.
    pub fn set_cart(&self, item_count: Option<u32>, total_cents: Option<i64>) {
        let mut page = self.lock();
        page.cart.item_count = item_count;
        page.cart.total_cents = total_cents;
    }

    /// Set the current URL without recording a navigation.
    pub fn set_url(&self, url: impl Into<String>) {
        self.lock().url = url.into();
    }

    /// Journal of clicked `(handle, text)` pairs, in order.
    #[must_use]
    pub fn clicks(&self) -> Vec<(u64, String)> {
        self.lock().clicks.clone()
    }

    /// Texts of clicked elements, in order.
    #[must_use]
    pub fn clicked_texts(&self) -> Vec<String> {
        self.lock().clicks.iter().map(|(_, t)| t.clone()).collect()
    }

    /// URLs navigated to, in order.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    /// Screenshot names captured, in order.
    #[must_use]
    pub fn screenshots(&self) -> Vec<String> {
        self.lock().screenshots.clone()
    }

    /// Whether any element under `selector` is still present.
    #[must_use]
    pub fn has_element(&self, selector: &str) -> bool {
        self.lock().elements.iter().any(|e| e.spec.selector == selector)
    }

    fn selector_segment_matches(registered: &str, pattern_css: &str) -> bool {
        if registered == pattern_css {
            return true;
        }
        pattern_css
            .split(',')
            .map(str::trim)
            .any(|segment| segment == registered)
    }

    fn find_in_page(
        page: &MockPage,
        chain: &SelectorChain,
        require_visible: bool,
    ) -> Option<(u64, usize, String)> {
        for (idx, pattern) in chain.patterns().enumerate() {
            let hit = page.elements.iter().find(|el| {
                Self::selector_segment_matches(&el.spec.selector, &pattern.css)
                    && pattern
                        .text
                        .as_ref()
                        .is_none_or(|p| p.matches(&el.spec.text))
                    && (!require_visible || el.spec.visible)
            });
            if let Some(el) = hit {
                return Some((el.id, idx, pattern.css.clone()));
            }
        }
        None
    }

    fn apply_click_effects(&self, id: u64) {
        let effects = {
            let mut page = self.lock();
            page.elements
                .iter_mut()
                .find(|e| e.id == id)
                .map(|e| {
                    e.on_click_queue
                        .pop_front()
                        .unwrap_or_else(|| e.on_click.clone())
                })
                .unwrap_or_default()
        };
        for effect in effects {
            match effect {
                ClickEffect::RemoveSelf => {
                    self.lock().elements.retain(|e| e.id != id);
                    self.bump_mutations();
                },
                ClickEffect::RemoveMatching(selector) => self.remove_matching(&selector),
                ClickEffect::SetModal(kind) => self.set_modal(kind),
                ClickEffect::ClearModal => self.set_modal(ReorderModalKind::None),
                ClickEffect::SetCartState {
                    item_count,
                    total_cents,
                } => self.set_cart(item_count, total_cents),
                ClickEffect::AddElement(spec) => {
                    self.add_spec(spec);
                },
            }
        }
    }
}

#[async_trait]
impl Interactor for MockInteractor {
    type Handle = u64;

    async fn find_element(
        &self,
        chain: &SelectorChain,
        opts: FindOptions,
    ) -> Result<Option<FindResult<u64>>, InteractError> {
        let deadline = tokio::time::Instant::now() + opts.timeout;
        loop {
            let hit = {
                let page = self.lock();
                Self::find_in_page(&page, chain, opts.visible)
            };
            if let Some((id, selector_index, matched_selector)) = hit {
                return Ok(Some(FindResult {
                    handle: id,
                    selector_index,
                    matched_selector,
                }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn find_all(&self, selector: &str) -> Result<Vec<u64>, InteractError> {
        let page = self.lock();
        Ok(page
            .elements
            .iter()
            .filter(|el| Self::selector_segment_matches(&el.spec.selector, selector))
            .map(|el| el.id)
            .collect())
    }

    async fn click(&self, handle: &u64, opts: ClickOptions) -> Result<(), InteractError> {
        let deadline = tokio::time::Instant::now() + opts.timeout;
        loop {
            let state = {
                let page = self.lock();
                page.elements
                    .iter()
                    .find(|e| e.id == *handle)
                    .map(|e| (e.spec.visible, e.spec.disabled, e.spec.text.clone()))
            };
            match state {
                None => {
                    return Err(InteractError::ElementNotFound(format!(
                        "stale handle {handle}"
                    )))
                },
                Some((true, false, text)) => {
                    self.lock().clicks.push((*handle, text));
                    self.apply_click_effects(*handle);
                    return Ok(());
                },
                Some(_) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(InteractError::Timeout {
                            waited_ms: opts.timeout.as_millis().try_into().unwrap_or(u64::MAX),
                            context: format!("click on handle {handle}"),
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                },
            }
        }
    }

    async fn is_visible(&self, handle: &u64) -> bool {
        self.lock()
            .elements
            .iter()
            .find(|e| e.id == *handle)
            .is_some_and(|e| e.spec.visible)
    }

    async fn text_content(&self, handle: &u64) -> Option<String> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.id == *handle)
            .map(|e| e.spec.text.clone())
    }

    async fn attribute(&self, handle: &u64, name: &str) -> Option<String> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.id == *handle)
            .and_then(|e| e.spec.attributes.get(name).cloned())
    }

    async fn cart_state(&self) -> CartState {
        let page = self.lock();
        CartState {
            item_count: page.cart.item_count,
            total_cents: page.cart.total_cents,
            captured_at: Utc::now(),
        }
    }

    async fn reorder_modal(&self) -> ReorderModalProbe {
        let kind = self.lock().modal;
        match kind {
            ReorderModalKind::None => ReorderModalProbe::none(),
            other => ReorderModalProbe::found(other),
        }
    }

    async fn current_url(&self) -> Result<String, InteractError> {
        Ok(self.lock().url.clone())
    }

    async fn navigate_to(&self, url: &str, _opts: NavigateOptions) -> Result<(), InteractError> {
        let mut page = self.lock();
        page.url = url.to_string();
        page.navigations.push(url.to_string());
        Ok(())
    }

    async fn wait_for_navigation(
        &self,
        _opts: WaitNavigationOptions,
    ) -> Result<(), InteractError> {
        Ok(())
    }

    async fn wait_for_timeout(&self, duration: Duration) {
        // Scripted pages settle instantly; cap waits so flow tests stay fast.
        tokio::time::sleep(duration.min(Duration::from_millis(10))).await;
    }

    async fn screenshot(&self, name: &str) -> Result<String, InteractError> {
        let id = format!("mock-screenshot-{name}");
        self.lock().screenshots.push(id.clone());
        Ok(id)
    }

    async fn mutation_tick(&self) -> Option<u64> {
        Some(self.mutations.load(Ordering::SeqCst))
    }
}
