//! Fan-out of dequeued work items into scheduler tasks.
//!
//! One task per node: requests run the full fetch lifecycle, data items
//! go straight to the data queue. Producers (sync or async sequences) are
//! drained here, so a lazy callback result turns into work exactly when
//! its item is dequeued.

use crate::worker::WorkerCtx;
use futures::StreamExt;
use harvester_common::request::{CallbackResult, Node, Request};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// An entry of the work queue: a single request, or a producer of further
/// requests and data items.
pub(crate) enum WorkItem {
    Request(Box<Request>),
    Producer(CallbackResult),
}

/// Spawn one task per node of `item`.
pub(crate) async fn spawn_tasks(ctx: &Arc<WorkerCtx>, item: WorkItem) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();
    match item {
        WorkItem::Request(request) => {
            tasks.push(spawn_node(ctx, Node::Request(request)));
        }
        WorkItem::Producer(CallbackResult::One(node)) => {
            tasks.push(spawn_node(ctx, node));
        }
        WorkItem::Producer(CallbackResult::Seq(nodes)) => {
            for node in nodes {
                tasks.push(spawn_node(ctx, node));
            }
        }
        WorkItem::Producer(CallbackResult::Stream(mut nodes)) => {
            while let Some(node) = nodes.next().await {
                tasks.push(spawn_node(ctx, node));
            }
        }
    }
    tasks
}

fn spawn_node(ctx: &Arc<WorkerCtx>, node: Node) -> JoinHandle<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        match node {
            Node::Request(request) => ctx.handle_request(*request).await,
            Node::Data(item) => ctx.push_data(item),
        }
    })
}
