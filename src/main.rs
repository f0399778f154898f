use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use taskmesh::controller::Controller;
use taskmesh::demo::TreeReduceBuilder;
use taskmesh::runtime::Bootstrap;
use taskmesh::store::{MemoryStore, Store};
use taskmesh::topology::TreeTopology;

/// Demo driver: seeds a job in an in-process store, launches one node per
/// task slot, and runs the tree-reduce application to completion.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut num_tasks: u64 = 7;
    let mut fanout: u64 = 2;
    let mut epochs: u64 = 10;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--tasks" => {
                num_tasks = args[i + 1].parse()?;
                i += 2;
            }
            "--fanout" => {
                fanout = args[i + 1].parse()?;
                i += 2;
            }
            "--epochs" => {
                epochs = args[i + 1].parse()?;
                i += 2;
            }
            "--help" => {
                eprintln!("Usage: {} [--tasks N] [--fanout K] [--epochs M]", args[0]);
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let job = "tree-reduce-demo";
    tracing::info!(
        "running {} with {} tasks, fanout {}, {} epochs",
        job,
        num_tasks,
        fanout,
        epochs
    );

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let controller = Controller::new(job, store.clone(), num_tasks);
    controller.init_layout().await?;
    let detector = controller.start_failure_detector();

    let (results_tx, mut results_rx) = mpsc::unbounded_channel::<i64>();
    let builder = TreeReduceBuilder::new(epochs, results_tx);

    let mut nodes = Vec::new();
    for _ in 0..num_tasks {
        let store = store.clone();
        let builder = builder.clone();
        nodes.push(tokio::spawn(async move {
            let bind: SocketAddr = "127.0.0.1:0".parse().expect("loopback address");
            let listener = TcpListener::bind(bind).await?;
            let mut bootstrap = Bootstrap::new(job, store, HashMap::new(), listener);
            bootstrap.set_task_builder(Box::new(builder));
            bootstrap.set_topology(Box::new(TreeTopology::new(fanout, num_tasks)));
            bootstrap.start().await?;
            Ok::<(), anyhow::Error>(())
        }));
    }

    for epoch in 0..=epochs {
        match results_rx.recv().await {
            Some(sum) => tracing::info!("epoch {}: reduced sum = {}", epoch, sum),
            None => anyhow::bail!("result channel closed before the job finished"),
        }
    }

    for node in nodes {
        node.await??;
    }

    detector.cancel();
    controller.destroy_layout().await?;
    tracing::info!("job finished");
    Ok(())
}
