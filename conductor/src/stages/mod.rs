//! Stage traits.
//!
//! A pipeline is made of exactly one [`Source`], any number of
//! [`Transform`]s run in declared order, and an optional [`Sink`].

pub mod builtin;
mod fn_stage;

pub use fn_stage::{FnSink, FnTransform, IterSource};

use crate::core::Item;
use crate::errors::StageError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::Debug;

/// A lazy, possibly unbounded sequence of items.
///
/// An `Err` element is a source-level failure and aborts the run.
pub type ItemStream = BoxStream<'static, Result<Item, StageError>>;

/// Produces the items of a run.
///
/// A source that detects a fatal condition it wants reported per item
/// should yield a stopped item carrying a failure result instead of an `Err`.
pub trait Source: Send + Sync + Debug {
    /// Returns the element name.
    fn name(&self) -> &str;

    /// Starts producing items.
    fn produce(&self) -> ItemStream;
}

/// Processes one item and hands it on to the next stage.
#[async_trait]
pub trait Transform: Send + Sync + Debug {
    /// Returns the element name.
    fn name(&self) -> &str;

    /// Applies the transform.
    ///
    /// Returning an error (or panicking) fails only this item. A transform
    /// that wants a timeout must enforce it itself.
    async fn apply(&self, item: Item) -> Result<Item, StageError>;
}

/// Consumes the final item of a pipeline.
#[async_trait]
pub trait Sink: Send + Sync + Debug {
    /// Returns the element name.
    fn name(&self) -> &str;

    /// Consumes the item. Called at most once per item.
    async fn consume(&self, item: Item) -> Result<Item, StageError>;
}
