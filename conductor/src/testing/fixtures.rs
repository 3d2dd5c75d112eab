//! Numbered item fixtures.

use super::VecSource;
use crate::core::{Item, StageResult};
use serde_json::json;

/// Result key holding the number of a fixture item.
pub const NUMBER_KEY: &str = "n";

/// Creates item number `n` with path `item-{n}`.
#[must_use]
pub fn item_n(n: u64) -> Item {
    Item::new()
        .with_path(format!("item-{n}"))
        .with_result(NUMBER_KEY, StageResult::success(json!(n)))
}

/// Reads the number of a fixture item.
#[must_use]
pub fn number(item: &Item) -> Option<u64> {
    item.values(NUMBER_KEY).first().and_then(|value| value.as_u64())
}

/// A source producing `item_n(0)` to `item_n(count - 1)`.
#[must_use]
pub fn numbered_source(name: impl Into<String>, count: u64) -> VecSource {
    VecSource::new(name, (0..count).map(item_n).collect())
}
