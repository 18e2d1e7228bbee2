//! In-memory registry of active jobs, one at most per file name.

use std::collections::HashMap;
use std::sync::Mutex;

use underlay_core::ProcessResult;

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success(ProcessResult),
    Failure,
}

#[derive(Debug)]
enum TaskState {
    Running,
    Finished(TaskOutcome),
}

/// What a collect call observed.
#[derive(Debug)]
pub enum Collected {
    NoSuchTask,
    StillRunning,
    Finished(TaskOutcome),
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskState>>,
}

impl TaskRegistry {
    /// Registers a task for the file. Refuses (returns false) while another
    /// task for the same file is active.
    pub fn start(&self, file: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        if tasks.contains_key(file) {
            return false;
        }
        tasks.insert(file.to_string(), TaskState::Running);
        true
    }

    pub fn finish(&self, file: &str, outcome: TaskOutcome) {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        tasks.insert(file.to_string(), TaskState::Finished(outcome));
    }

    /// Reads the task state; a finished task is removed by this read.
    pub fn collect(&self, file: &str) -> Collected {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        match tasks.get(file) {
            None => Collected::NoSuchTask,
            Some(TaskState::Running) => Collected::StillRunning,
            Some(TaskState::Finished(_)) => match tasks.remove(file) {
                Some(TaskState::Finished(outcome)) => Collected::Finished(outcome),
                _ => Collected::NoSuchTask,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_task_per_file() {
        let registry = TaskRegistry::default();
        assert!(registry.start("a.pdf"));
        assert!(!registry.start("a.pdf"));
        assert!(registry.start("b.pdf"));
    }

    #[test]
    fn test_collect_lifecycle() {
        let registry = TaskRegistry::default();
        assert!(matches!(registry.collect("a.pdf"), Collected::NoSuchTask));

        registry.start("a.pdf");
        assert!(matches!(registry.collect("a.pdf"), Collected::StillRunning));

        registry.finish("a.pdf", TaskOutcome::Success(ProcessResult::default()));
        assert!(matches!(
            registry.collect("a.pdf"),
            Collected::Finished(TaskOutcome::Success(_))
        ));
        // The terminal read removed the entry; the file can be started
        // again.
        assert!(matches!(registry.collect("a.pdf"), Collected::NoSuchTask));
        assert!(registry.start("a.pdf"));
    }
}
