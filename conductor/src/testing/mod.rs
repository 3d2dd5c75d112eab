//! Testing utilities for conductor pipelines.
//!
//! This module provides:
//! - Numbered item fixtures
//! - Mock sources, transforms and sinks
//! - A side-channel recorder for checking per-item stage order

mod fixtures;
mod mocks;

pub use fixtures::{item_n, number, numbered_source, NUMBER_KEY};
pub use mocks::{
    CountingTransform, DelayTransform, DoubleTransform, FailOnTransform, FailingSource,
    PanicOnTransform, RecordingSink, SequenceLog, SequencedTransform, StopWhenOdd, VecSource,
};
