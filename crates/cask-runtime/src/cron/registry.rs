use std::collections::HashMap;

use cask_core::cron::TaskDefinition;
use cask_core::{CaskError, Result};

/// Registry of recurring tasks, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskDefinition>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Names must be unique.
    pub fn register(&mut self, task: TaskDefinition) -> Result<()> {
        if self.index.contains_key(task.name()) {
            return Err(CaskError::DuplicateRegistration(format!(
                "task '{}' is already registered",
                task.name()
            )));
        }

        self.index.insert(task.name().to_string(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Get a task by name.
    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// All tasks, in registration order.
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
