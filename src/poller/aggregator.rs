use crate::registry::task::{Task, TaskState};

/// Aggregate progress across the tasks of a batch
pub struct ProgressAggregator;

impl ProgressAggregator {
    pub fn aggregate(tasks: &[Task]) -> AggregatedProgress {
        let mut progress = AggregatedProgress {
            tasks: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            match task.state {
                TaskState::Running => progress.running += 1,
                TaskState::Paused => progress.paused += 1,
                _ => {}
            }
            progress.current_tiles += task.current;
            progress.total_tiles += task.total;
            progress.failed_tiles += task.failed_tiles.len();
        }

        progress
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedProgress {
    pub tasks: usize,
    pub running: usize,
    pub paused: usize,
    pub current_tiles: u64,
    pub total_tiles: u64,
    pub failed_tiles: usize,
}

impl AggregatedProgress {
    pub fn fraction(&self) -> Option<f64> {
        if self.total_tiles == 0 {
            return None;
        }
        Some(self.current_tiles as f64 / self.total_tiles as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::task::{LngLat, Region, TaskId, TaskSpec, TileKind, TileRef};

    fn task(state: TaskState, current: u64, total: u64) -> Task {
        let region = Region::from_bounds(LngLat::new(0.0, 0.0), LngLat::new(1.0, 1.0));
        let mut task = Task::new(TaskId::generate(), &TaskSpec::new(TileKind::Imagery, 3), region);
        task.state = state;
        task.current = current;
        task.total = total;
        task
    }

    #[test]
    fn test_aggregate_multi_task() {
        let mut failed = task(TaskState::Running, 500, 1000);
        failed.failed_tiles = vec![TileRef { zoom: 3, row: 1, col: 1 }];
        let tasks = vec![failed, task(TaskState::Paused, 1000, 2000)];

        let progress = ProgressAggregator::aggregate(&tasks);
        assert_eq!(progress.tasks, 2);
        assert_eq!(progress.running, 1);
        assert_eq!(progress.paused, 1);
        assert_eq!(progress.total_tiles, 3000);
        assert_eq!(progress.current_tiles, 1500);
        assert_eq!(progress.failed_tiles, 1);
        assert_eq!(progress.fraction(), Some(0.5));
    }

    #[test]
    fn test_aggregate_empty() {
        let progress = ProgressAggregator::aggregate(&[]);
        assert_eq!(progress, AggregatedProgress::default());
        assert_eq!(progress.fraction(), None);
    }
}
