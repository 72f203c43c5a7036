//! Batching and rate limiting
//!
//! Splits work into bounded groups, runs a limited number of groups in
//! flight, and preserves result order regardless of completion order.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::debug;

use drift_types::Result;

/// Options controlling `process_in_batches`.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    /// When set, batches run strictly one after another with this pause
    /// between them.
    pub delay_between_batches: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            concurrency: 3,
            delay_between_batches: None,
        }
    }
}

fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Split `items` into fixed-size groups and run at most `concurrency`
/// groups in parallel. The result vector is ordered by batch index; a
/// failed batch occupies its slot with the error.
pub async fn process_in_batches<T, R, F, Fut>(
    items: Vec<T>,
    options: &BatchOptions,
    mut processor: F,
) -> Vec<Result<R>>
where
    F: FnMut(usize, Vec<T>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let batches = chunk(items, options.batch_size);
    let total = batches.len();
    debug!("processing {total} batches, concurrency {}", options.concurrency);

    if options.delay_between_batches.is_some() || options.concurrency <= 1 {
        let mut results = Vec::with_capacity(total);
        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                if let Some(delay) = options.delay_between_batches {
                    sleep(delay).await;
                }
            }
            results.push(processor(index, batch).await);
        }
        return results;
    }

    stream::iter(
        batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| processor(index, batch)),
    )
    .buffered(options.concurrency)
    .collect()
    .await
}

/// Batch size that keeps one in-flight batch under a memory target.
pub fn auto_batch_size(target_memory_bytes: usize, estimated_item_bytes: usize) -> usize {
    (target_memory_bytes / estimated_item_bytes.max(1)).clamp(1, 10_000)
}

/// Run `processor` over each item strictly sequentially, spacing
/// invocations by `ceil(1000 / rate)` milliseconds.
pub async fn process_with_rate_limit<T, R, F, Fut>(
    items: Vec<T>,
    items_per_second: u32,
    mut processor: F,
) -> Vec<Result<R>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let rate = items_per_second.max(1) as u64;
    let spacing = Duration::from_millis(1_000u64.div_ceil(rate));
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            sleep(spacing).await;
        }
        results.push(processor(item).await);
    }
    results
}
