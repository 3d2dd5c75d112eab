//! Closure-backed stages.

use super::{ItemStream, Sink, Source, Transform};
use crate::core::Item;
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// A function-based transform.
pub struct FnTransform<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    /// Creates a new function-based transform.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnTransform<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: Item) -> Result<Item, StageError> {
        (self.func)(item)
    }
}

/// A function-based sink.
pub struct FnSink<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnSink<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    /// Creates a new function-based sink.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnSink<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Sink for FnSink<F>
where
    F: Fn(Item) -> Result<Item, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, item: Item) -> Result<Item, StageError> {
        (self.func)(item)
    }
}

/// A source replaying a fixed list of items.
///
/// Every call to [`Source::produce`] starts again from the first item.
#[derive(Debug, Clone)]
pub struct IterSource {
    name: String,
    items: Vec<Result<Item, StageError>>,
}

impl IterSource {
    /// Creates a source from items.
    pub fn new(name: impl Into<String>, items: impl IntoIterator<Item = Item>) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().map(Ok).collect(),
        }
    }

    /// Creates a source from fallible items; an `Err` aborts the run.
    pub fn from_results(
        name: impl Into<String>,
        items: impl IntoIterator<Item = Result<Item, StageError>>,
    ) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().collect(),
        }
    }
}

impl Source for IterSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> ItemStream {
        Box::pin(futures::stream::iter(self.items.clone()))
    }
}
