//! Chain-based extraction helpers.
//!
//! List extraction works column-wise: each field chain is queried for all
//! its matches in document order and the columns are zipped by index. Rows
//! missing a field shift the zip; the review pack's data-quality warnings
//! cover that case, extraction itself stays best-effort.

use cartpilot_core::port::Interactor;
use cartpilot_core::selector::SelectorChain;

/// All handles for a chain: patterns are tried in declared order and the
/// first pattern with any match wins. No text post-filtering.
pub async fn find_all_chain<I: Interactor>(
    interactor: &I,
    chain: &SelectorChain,
) -> Vec<I::Handle> {
    for pattern in chain.patterns() {
        match interactor.find_all(&pattern.css).await {
            Ok(handles) if !handles.is_empty() => return handles,
            Ok(_) => {},
            Err(err) => {
                tracing::debug!(chain = %chain.id, error = %err, "find_all failed");
            },
        }
    }
    Vec::new()
}

/// Text contents of every match of a chain, in document order. Stale or
/// text-less elements yield empty strings so columns keep their indices.
pub async fn texts_of_chain<I: Interactor>(
    interactor: &I,
    chain: &SelectorChain,
) -> Vec<String> {
    let handles = find_all_chain(interactor, chain).await;
    let mut texts = Vec::with_capacity(handles.len());
    for handle in &handles {
        texts.push(
            interactor
                .text_content(handle)
                .await
                .unwrap_or_default()
                .trim()
                .to_string(),
        );
    }
    texts
}

/// One attribute of every match of a chain, in document order.
pub async fn attributes_of_chain<I: Interactor>(
    interactor: &I,
    chain: &SelectorChain,
    name: &str,
) -> Vec<Option<String>> {
    let handles = find_all_chain(interactor, chain).await;
    let mut values = Vec::with_capacity(handles.len());
    for handle in &handles {
        values.push(interactor.attribute(handle, name).await);
    }
    values
}

/// Column value at `index`, or an empty default.
#[must_use]
pub fn column<T: Clone + Default>(values: &[T], index: usize) -> T {
    values.get(index).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartpilot_testing::mocks::MockInteractor;

    #[tokio::test]
    async fn chain_falls_back_when_primary_is_empty() {
        let page = MockInteractor::new();
        page.add_element(".auc-order-history__number", "10001");
        page.add_element(".auc-order-history__number", "10002");

        let chain = SelectorChain::from_patterns(
            "order-id",
            &["[data-testid='order-number']", ".auc-order-history__number"],
        );
        let texts = texts_of_chain(&page, &chain).await;
        assert_eq!(texts, vec!["10001".to_string(), "10002".to_string()]);
    }

    #[tokio::test]
    async fn missing_chain_yields_empty_columns() {
        let page = MockInteractor::new();
        let chain = SelectorChain::from_patterns("order-id", &["[data-testid='order-number']"]);
        assert!(texts_of_chain(&page, &chain).await.is_empty());
        assert!(attributes_of_chain(&page, &chain, "href").await.is_empty());
    }

    #[test]
    fn column_defaults_past_the_end() {
        let values = vec!["a".to_string()];
        assert_eq!(column(&values, 0), "a");
        assert_eq!(column::<String>(&values, 5), String::new());
    }
}
