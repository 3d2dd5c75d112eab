//! Mock stages for testing.

use super::fixtures::number;
use crate::core::{Item, StageResult};
use crate::errors::StageError;
use crate::stages::{ItemStream, Sink, Source, Transform};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A source yielding a fixed list of items and counting how many were pulled.
#[derive(Debug)]
pub struct VecSource {
    name: String,
    items: Vec<Item>,
    pulled: Arc<AtomicUsize>,
}

impl VecSource {
    /// Creates a source.
    #[must_use]
    pub fn new(name: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            name: name.into(),
            items,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a counter of the items pulled so far, shared with the source.
    #[must_use]
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulled)
    }
}

impl Source for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> ItemStream {
        let pulled = Arc::clone(&self.pulled);
        futures::stream::iter(self.items.clone())
            .map(move |item| {
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok(item)
            })
            .boxed()
    }
}

/// A source yielding some items and then failing.
#[derive(Debug)]
pub struct FailingSource {
    name: String,
    items: Vec<Item>,
    message: String,
}

impl FailingSource {
    /// Creates a source failing with `message` after `items`.
    #[must_use]
    pub fn new(name: impl Into<String>, items: Vec<Item>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items,
            message: message.into(),
        }
    }
}

impl Source for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> ItemStream {
        let failure = StageError::new(self.message.clone());
        futures::stream::iter(self.items.clone())
            .map(Ok)
            .chain(futures::stream::once(async move { Err(failure) }))
            .boxed()
    }
}

/// Appends twice the item number under `doubled`.
#[derive(Debug)]
pub struct DoubleTransform {
    name: String,
}

impl DoubleTransform {
    /// Creates the transform.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Transform for DoubleTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, mut item: Item) -> Result<Item, StageError> {
        if let Some(n) = number(&item) {
            item.add_result("doubled", StageResult::success(json!(n * 2)));
        }
        Ok(item)
    }
}

/// Passes items through and counts invocations.
#[derive(Debug)]
pub struct CountingTransform {
    name: String,
    calls: AtomicUsize,
}

impl CountingTransform {
    /// Creates the transform.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for CountingTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: Item) -> Result<Item, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(item)
    }
}

/// Fails for the listed item numbers.
#[derive(Debug)]
pub struct FailOnTransform {
    name: String,
    fail_on: HashSet<u64>,
    keep_item: bool,
}

impl FailOnTransform {
    /// Creates a transform failing for every number in `fail_on`.
    #[must_use]
    pub fn new(name: impl Into<String>, fail_on: impl IntoIterator<Item = u64>) -> Self {
        Self {
            name: name.into(),
            fail_on: fail_on.into_iter().collect(),
            keep_item: false,
        }
    }

    /// Hands the pre-failure item back with the error.
    #[must_use]
    pub fn keeping_item(mut self) -> Self {
        self.keep_item = true;
        self
    }
}

#[async_trait]
impl Transform for FailOnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: Item) -> Result<Item, StageError> {
        match number(&item) {
            Some(n) if self.fail_on.contains(&n) => {
                let error = StageError::new(format!("refusing item {n}")).with_cause("ValueError");
                Err(if self.keep_item { error.with_item(item) } else { error })
            }
            _ => Ok(item),
        }
    }
}

/// Panics for the listed item numbers.
#[derive(Debug)]
pub struct PanicOnTransform {
    name: String,
    panic_on: HashSet<u64>,
}

impl PanicOnTransform {
    /// Creates a transform panicking for every number in `panic_on`.
    #[must_use]
    pub fn new(name: impl Into<String>, panic_on: impl IntoIterator<Item = u64>) -> Self {
        Self {
            name: name.into(),
            panic_on: panic_on.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Transform for PanicOnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: Item) -> Result<Item, StageError> {
        match number(&item) {
            Some(n) if self.panic_on.contains(&n) => panic!("cannot handle item {n}"),
            _ => Ok(item),
        }
    }
}

/// Marks items with an odd number as stopped.
#[derive(Debug)]
pub struct StopWhenOdd {
    name: String,
}

impl StopWhenOdd {
    /// Creates the transform.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Transform for StopWhenOdd {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, mut item: Item) -> Result<Item, StageError> {
        if number(&item).is_some_and(|n| n % 2 == 1) {
            item.add_result("parity", StageResult::stop("odd item"));
            item.stop();
        }
        Ok(item)
    }
}

/// Sleeps for a duration chosen per item number.
pub struct DelayTransform {
    name: String,
    delay_for: Box<dyn Fn(u64) -> Duration + Send + Sync>,
}

impl fmt::Debug for DelayTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayTransform").field("name", &self.name).finish()
    }
}

impl DelayTransform {
    /// Creates a transform sleeping `delay_for(n)` for item `n`.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, delay_for: F) -> Self
    where
        F: Fn(u64) -> Duration + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            delay_for: Box::new(delay_for),
        }
    }
}

#[async_trait]
impl Transform for DelayTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: Item) -> Result<Item, StageError> {
        let delay = number(&item).map_or(Duration::ZERO, |n| (self.delay_for)(n));
        tokio::time::sleep(delay).await;
        Ok(item)
    }
}

/// Records consumed paths and the highest number of concurrent calls.
#[derive(Debug, Default)]
pub struct RecordingSink {
    name: String,
    consumed: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingSink {
    /// Creates the sink.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the consumed paths in call order.
    #[must_use]
    pub fn consumed(&self) -> Vec<String> {
        self.consumed.lock().clone()
    }

    /// Returns the highest number of overlapping calls seen.
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, mut item: Item) -> Result<Item, StageError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::task::yield_now().await;

        self.consumed
            .lock()
            .push(item.path.clone().unwrap_or_default());
        item.add_result("recorded", StageResult::success_empty());

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(item)
    }
}

/// Side-channel record of which stages saw which item, in order.
///
/// Every [`SequencedTransform`] checks on entry that the stage before it has
/// already recorded the item and counts a violation otherwise.
#[derive(Debug, Default)]
pub struct SequenceLog {
    entries: Mutex<HashMap<String, Vec<usize>>>,
    violations: AtomicUsize,
}

impl SequenceLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates the transform at position `index`.
    #[must_use]
    pub fn stage(self: &Arc<Self>, index: usize) -> SequencedTransform {
        SequencedTransform {
            name: format!("stage-{index}"),
            index,
            log: Arc::clone(self),
        }
    }

    /// Returns the stage indices recorded for a path.
    #[must_use]
    pub fn trace(&self, path: &str) -> Vec<usize> {
        self.entries.lock().get(path).cloned().unwrap_or_default()
    }

    /// Returns the number of out-of-order entries.
    #[must_use]
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    fn enter(&self, path: &str, index: usize) {
        let entries = self.entries.lock();
        let previous = entries.get(path).and_then(|trace| trace.last().copied());
        let expected = index.checked_sub(1);
        if previous != expected {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self, path: &str, index: usize) {
        self.entries.lock().entry(path.to_string()).or_default().push(index);
    }
}

/// A transform recording itself in a [`SequenceLog`].
#[derive(Debug)]
pub struct SequencedTransform {
    name: String,
    index: usize,
    log: Arc<SequenceLog>,
}

#[async_trait]
impl Transform for SequencedTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, item: Item) -> Result<Item, StageError> {
        let path = item.path.clone().unwrap_or_default();
        self.log.enter(&path, self.index);
        let pause = rand::random::<u64>() % 3;
        tokio::time::sleep(Duration::from_millis(pause)).await;
        self.log.leave(&path, self.index);
        Ok(item)
    }
}
