//! Tree-reduce demo application.
//!
//! The classic parameter-server exercise over a tree topology: per epoch the
//! root broadcasts a parameter vector filled with the epoch number, every
//! other task computes `gradient[i] = task_id * param[i]`, and gradients are
//! reduced back up by addition. The root reports one reduced element per
//! epoch and advances the job when all of its children have reported.
//!
//! With tasks `0..n` the reduced sum at epoch `e` is
//! `e * (1 + 2 + .. + n-1)` per element.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::runtime::Framework;
use crate::task::{Config, Task, TaskBuilder};

pub const VECTOR_LEN: usize = 10;

pub const META_PARAM_READY: &str = "ParamReady";
pub const META_GRADIENT_READY: &str = "GradientReady";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Vector {
    data: Vec<i64>,
}

impl Vector {
    fn filled(value: i64) -> Self {
        Self {
            data: vec![value; VECTOR_LEN],
        }
    }

    fn zero() -> Self {
        Self::filled(0)
    }

    fn add(&mut self, other: &Vector) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }
}

/// Builds the root task for slot 0 and a reducer for every other slot.
#[derive(Clone)]
pub struct TreeReduceBuilder {
    final_epoch: u64,
    results: mpsc::UnboundedSender<i64>,
}

impl TreeReduceBuilder {
    /// `results` receives the root's reduced element once per epoch, in epoch
    /// order; the job shuts down after the report for `final_epoch`.
    pub fn new(final_epoch: u64, results: mpsc::UnboundedSender<i64>) -> Self {
        Self {
            final_epoch,
            results,
        }
    }
}

impl TaskBuilder for TreeReduceBuilder {
    fn get_task(&self, task_id: u64) -> Box<dyn Task> {
        if task_id == 0 {
            Box::new(TreeReduceRoot {
                framework: None,
                epoch: 0,
                final_epoch: self.final_epoch,
                param: Vector::zero(),
                sum: Vector::zero(),
                from_children: HashMap::new(),
                results: self.results.clone(),
            })
        } else {
            Box::new(TreeReduceWorker {
                framework: None,
                task_id,
                epoch: 0,
                param: Vector::zero(),
                gradient: Vector::zero(),
                from_children: HashMap::new(),
            })
        }
    }
}

/// Task 0: broadcasts the parameter vector, reduces gradients, advances the
/// epoch.
struct TreeReduceRoot {
    framework: Option<Arc<Framework>>,
    epoch: u64,
    final_epoch: u64,
    param: Vector,
    sum: Vector,
    from_children: HashMap<u64, Vector>,
    results: mpsc::UnboundedSender<i64>,
}

#[async_trait]
impl Task for TreeReduceRoot {
    async fn init(&mut self, _task_id: u64, framework: Arc<Framework>, _config: Config) {
        self.framework = Some(framework);
    }

    async fn exit(&mut self) {}

    async fn set_epoch(&mut self, epoch: u64) {
        let Some(framework) = self.framework.clone() else { return };
        self.epoch = epoch;
        self.param = Vector::filled(epoch as i64);
        self.sum = Vector::zero();
        self.from_children.clear();
        framework.flag_meta_to_child(META_PARAM_READY).await;
    }

    async fn parent_meta_ready(&mut self, _parent_id: u64, _meta: &str) {}

    async fn child_meta_ready(&mut self, child_id: u64, meta: &str) {
        let Some(framework) = &self.framework else { return };
        framework.data_request(child_id, meta);
    }

    async fn serve_as_parent(&mut self, _from_id: u64, _req: &str) -> Vec<u8> {
        match serde_json::to_vec(&self.param) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("root can't encode parameter: {}", e);
                Vec::new()
            }
        }
    }

    async fn serve_as_child(&mut self, _from_id: u64, _req: &str) -> Vec<u8> {
        Vec::new()
    }

    async fn parent_data_ready(&mut self, _from_id: u64, _req: &str, _data: &[u8]) {}

    async fn child_data_ready(&mut self, from_id: u64, _req: &str, data: &[u8]) {
        let Some(framework) = self.framework.clone() else { return };
        let Ok(gradient) = serde_json::from_slice::<Vector>(data) else {
            tracing::error!("root can't decode gradient from task {}", from_id);
            return;
        };
        self.from_children.insert(from_id, gradient);

        // All children reported: reduce, publish, move the job along.
        if self.from_children.len() == framework.topology().children(self.epoch).len() {
            for gradient in self.from_children.values() {
                self.sum.add(gradient);
            }
            let _ = self.results.send(self.sum.data[0]);
            if self.epoch == self.final_epoch {
                framework.shutdown_job().await;
            } else {
                framework.inc_epoch().await;
            }
        }
    }
}

/// Every non-root task: pulls the parameter from its parent, computes its
/// gradient, reduces its subtree, and reports upward.
struct TreeReduceWorker {
    framework: Option<Arc<Framework>>,
    task_id: u64,
    epoch: u64,
    param: Vector,
    gradient: Vector,
    from_children: HashMap<u64, Vector>,
}

#[async_trait]
impl Task for TreeReduceWorker {
    async fn init(&mut self, task_id: u64, framework: Arc<Framework>, _config: Config) {
        self.task_id = task_id;
        self.framework = Some(framework);
    }

    async fn exit(&mut self) {}

    async fn set_epoch(&mut self, epoch: u64) {
        // Clean slate; the parent's meta hint restarts the flow.
        self.epoch = epoch;
        self.param = Vector::zero();
        self.gradient = Vector::zero();
        self.from_children.clear();
    }

    async fn parent_meta_ready(&mut self, parent_id: u64, meta: &str) {
        let Some(framework) = &self.framework else { return };
        framework.data_request(parent_id, meta);
    }

    async fn child_meta_ready(&mut self, child_id: u64, meta: &str) {
        let Some(framework) = &self.framework else { return };
        framework.data_request(child_id, meta);
    }

    async fn serve_as_parent(&mut self, _from_id: u64, _req: &str) -> Vec<u8> {
        serde_json::to_vec(&self.param).unwrap_or_default()
    }

    async fn serve_as_child(&mut self, _from_id: u64, _req: &str) -> Vec<u8> {
        serde_json::to_vec(&self.gradient).unwrap_or_default()
    }

    async fn parent_data_ready(&mut self, _from_id: u64, _req: &str, data: &[u8]) {
        let Some(framework) = self.framework.clone() else { return };
        let Ok(param) = serde_json::from_slice::<Vector>(data) else {
            tracing::error!("task {} can't decode parameter", self.task_id);
            return;
        };
        self.param = param;
        for (g, p) in self.gradient.data.iter_mut().zip(&self.param.data) {
            *g = self.task_id as i64 * p;
        }

        if framework.topology().children(self.epoch).is_empty() {
            // Leaf: nothing below us, report straight away.
            framework.flag_meta_to_parent(META_GRADIENT_READY).await;
        } else {
            framework.flag_meta_to_child(META_PARAM_READY).await;
        }
    }

    async fn child_data_ready(&mut self, from_id: u64, _req: &str, data: &[u8]) {
        let Some(framework) = self.framework.clone() else { return };
        let Ok(gradient) = serde_json::from_slice::<Vector>(data) else {
            tracing::error!("task {} can't decode gradient from {}", self.task_id, from_id);
            return;
        };
        self.from_children.insert(from_id, gradient);

        if self.from_children.len() == framework.topology().children(self.epoch).len() {
            for gradient in self.from_children.values() {
                self.gradient.add(gradient);
            }
            framework.flag_meta_to_parent(META_GRADIENT_READY).await;
        }
    }
}
