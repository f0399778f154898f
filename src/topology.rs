//! Complete k-ary tree topology.

use crate::task::Topology;

/// Tasks `0..num_tasks` arranged as a complete k-ary tree with task 0 at the
/// root: task `i`'s parent is `(i - 1) / fanout` and its children are
/// `fanout * i + 1 ..= fanout * i + fanout`, clipped to the task count. The
/// shape is the same at every epoch.
pub struct TreeTopology {
    fanout: u64,
    num_tasks: u64,
    task_id: u64,
}

impl TreeTopology {
    pub fn new(fanout: u64, num_tasks: u64) -> Self {
        assert!(fanout >= 1, "tree fanout must be at least 1");
        Self {
            fanout,
            num_tasks,
            task_id: 0,
        }
    }
}

impl Topology for TreeTopology {
    fn set_task_id(&mut self, task_id: u64) {
        self.task_id = task_id;
    }

    fn parents(&self, _epoch: u64) -> Vec<u64> {
        if self.task_id == 0 || self.task_id >= self.num_tasks {
            return Vec::new();
        }
        vec![(self.task_id - 1) / self.fanout]
    }

    fn children(&self, _epoch: u64) -> Vec<u64> {
        let first = self.fanout * self.task_id + 1;
        (first..first + self.fanout)
            .filter(|&c| c < self.num_tasks)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_tree_of_seven() {
        let mut topo = TreeTopology::new(2, 7);

        topo.set_task_id(0);
        assert!(topo.parents(0).is_empty());
        assert_eq!(topo.children(0), vec![1, 2]);

        topo.set_task_id(2);
        assert_eq!(topo.parents(3), vec![0]);
        assert_eq!(topo.children(3), vec![5, 6]);

        // Leaves have no children.
        topo.set_task_id(5);
        assert_eq!(topo.parents(0), vec![2]);
        assert!(topo.children(0).is_empty());
    }

    #[test]
    fn partial_last_level_is_clipped() {
        let mut topo = TreeTopology::new(2, 6);
        topo.set_task_id(2);
        assert_eq!(topo.children(0), vec![5]);
    }

    #[test]
    fn shape_is_epoch_independent() {
        let mut topo = TreeTopology::new(3, 13);
        topo.set_task_id(1);
        for epoch in 0..5 {
            assert_eq!(topo.parents(epoch), vec![0]);
            assert_eq!(topo.children(epoch), vec![4, 5, 6]);
        }
    }
}
