//! Tolerant JSON extraction from model output.
//!
//! Models wrap JSON in prose and code fences; callers hand the raw
//! completion here and get the first JSON value out of it.

use serde::de::DeserializeOwned;

/// Extract and parse the first JSON array or object in `content`.
///
/// Returns `None` when nothing between the outermost brackets parses as
/// the requested type.
#[must_use]
pub fn extract<T: DeserializeOwned>(content: &str) -> Option<T> {
    let array = slice_between(content, '[', ']');
    let object = slice_between(content, '{', '}');

    // Prefer whichever opens first.
    let candidates: Vec<&str> = match (array, object) {
        (Some(a), Some(o)) => {
            let a_start = content.find('[').unwrap_or(usize::MAX);
            let o_start = content.find('{').unwrap_or(usize::MAX);
            if a_start < o_start {
                vec![a, o]
            } else {
                vec![o, a]
            }
        },
        (Some(a), None) => vec![a],
        (None, Some(o)) => vec![o],
        (None, None) => return None,
    };

    candidates
        .into_iter()
        .find_map(|slice| serde_json::from_str(slice).ok())
}

fn slice_between(content: &str, open: char, close: char) -> Option<&str> {
    let start = content.find(open)?;
    let end = content.rfind(close)?;
    (end > start).then(|| &content[start..=end])
}
