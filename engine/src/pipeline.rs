//! Staged post-processing over drained data items.
//!
//! A [`Pipeline`] chains ordered stages onto the items a
//! [`DataService`](crate::service::DataService) run produced. A stage is
//! one function, or several run concurrently over the same input; each
//! stage is fed the previous stage's output.

use crate::{error::PipelineError, worker::panic_message};
use harvester_common::data::DataItem;
use std::sync::Arc;
use tokio::task::JoinError;

/// One stage function: the previous stage's items in, this stage's items
/// out.
pub type StageFn = Arc<dyn Fn(Vec<DataItem>) -> Vec<DataItem> + Send + Sync>;

/// Ordered stages over a batch of data items.
///
/// Built up with [`Pipeline::add_node`] (one function per stage) and
/// [`Pipeline::add_nodes`] (a fan-out stage whose functions each receive
/// the full previous output, concurrently; their outputs are concatenated
/// in function order before the next stage runs).
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Vec<StageFn>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single-function stage.
    pub fn add_node<F>(mut self, func: F) -> Self
    where
        F: Fn(Vec<DataItem>) -> Vec<DataItem> + Send + Sync + 'static,
    {
        self.stages.push(vec![Arc::new(func)]);
        self
    }

    /// Append a fan-out stage.
    pub fn add_nodes<I>(mut self, funcs: I) -> Self
    where
        I: IntoIterator<Item = StageFn>,
    {
        self.stages.push(funcs.into_iter().collect());
        self
    }

    /// Run every stage in order, starting from `items`.
    ///
    /// Stage functions execute on the blocking pool so heavy
    /// transformations stay off the scheduler threads. A panicking stage
    /// function fails the run.
    pub async fn run(&self, items: Vec<DataItem>) -> Result<Vec<DataItem>, PipelineError> {
        let mut results = items;
        for stage in &self.stages {
            results = match stage.as_slice() {
                [] => results,
                [func] => {
                    let func = func.clone();
                    tokio::task::spawn_blocking(move || func(results))
                        .await
                        .map_err(stage_error)?
                }
                funcs => {
                    let handles: Vec<_> = funcs
                        .iter()
                        .map(|func| {
                            let func = func.clone();
                            let input = results.clone();
                            tokio::task::spawn_blocking(move || func(input))
                        })
                        .collect();

                    let mut merged = Vec::new();
                    for handle in handles {
                        merged.extend(handle.await.map_err(stage_error)?);
                    }
                    merged
                }
            };
        }
        Ok(results)
    }
}

fn stage_error(err: JoinError) -> PipelineError {
    if err.is_panic() {
        PipelineError::Stage(panic_message(err.into_panic()))
    } else {
        PipelineError::Stage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn items() -> Vec<DataItem> {
        (1..=3)
            .map(|key| DataItem::new().field("key", key))
            .collect()
    }

    fn keys(items: &[DataItem]) -> Vec<i64> {
        items
            .iter()
            .filter_map(|item| item.get("key").and_then(Value::as_i64))
            .collect()
    }

    fn double_key(items: Vec<DataItem>) -> Vec<DataItem> {
        items
            .into_iter()
            .map(|item| {
                let key = item.get("key").and_then(Value::as_i64).unwrap_or_default();
                DataItem::new().field("key", key * 2)
            })
            .collect()
    }

    #[tokio::test]
    async fn single_node_transforms_items() {
        let results = Pipeline::new()
            .add_node(double_key)
            .run(items())
            .await
            .unwrap();
        assert_eq!(keys(&results), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn chained_nodes_feed_each_other() {
        let results = Pipeline::new()
            .add_node(double_key)
            .add_node(double_key)
            .add_node(double_key)
            .run(items())
            .await
            .unwrap();
        assert_eq!(keys(&results), vec![8, 16, 24]);
    }

    #[tokio::test]
    async fn fan_out_nodes_share_input_and_concatenate_in_order() {
        let triple_key: StageFn = Arc::new(|items: Vec<DataItem>| {
            items
                .into_iter()
                .map(|item| {
                    let key = item.get("key").and_then(Value::as_i64).unwrap_or_default();
                    DataItem::new().field("key", key * 3)
                })
                .collect()
        });

        let results = Pipeline::new()
            .add_nodes([Arc::new(double_key) as StageFn, triple_key])
            .run(items())
            .await
            .unwrap();
        assert_eq!(keys(&results), vec![2, 4, 6, 3, 6, 9]);
    }

    #[tokio::test]
    async fn fan_out_output_feeds_the_next_node() {
        let results = Pipeline::new()
            .add_nodes([Arc::new(double_key) as StageFn, Arc::new(double_key)])
            .add_node(|items: Vec<DataItem>| vec![DataItem::new().field("count", items.len())])
            .run(items())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("count"), Some(&Value::from(6)));
    }

    #[tokio::test]
    async fn empty_pipeline_passes_items_through() {
        let results = Pipeline::new().run(items()).await.unwrap();
        assert_eq!(keys(&results), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn panicking_node_fails_the_run() {
        let err = Pipeline::new()
            .add_node(|_| panic!("bad transform"))
            .run(items())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Stage(message) if message.contains("bad transform")));
    }
}
