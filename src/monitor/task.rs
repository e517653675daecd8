// volsnap backup system.
// Copyright 2023-2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Tasks report progress on a long-running operation from the core library
//! to a UI, such as a progress bar.
//!
//! Each task tracks how many nodes and bytes it expects to process and how
//! many it has finished. All the fields of one task are guarded by one mutex,
//! since they're updated together and the updates are cheap.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use thousands::Separable;

#[derive(Default)]
pub struct TaskList {
    tasks: Vec<Weak<TaskInner>>,
}

impl TaskList {
    pub fn start_task(&mut self, name: String) -> Task {
        let inner = Arc::new(TaskInner {
            name,
            status: Mutex::new(TaskStatus::default()),
        });
        self.tasks.push(Arc::downgrade(&inner));
        Task(inner)
    }

    /// Return the tasks that are still alive, and forget the others.
    pub fn active_tasks(&mut self) -> impl Iterator<Item = Arc<TaskInner>> {
        let mut v = Vec::new();
        self.tasks.retain(|task| {
            if let Some(inner) = task.upgrade() {
                v.push(inner);
                true
            } else {
                false
            }
        });
        v.into_iter()
    }
}

/// Progress of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStatus {
    pub total_count: usize,
    pub total_bytes: u64,
    /// Nodes started.
    pub file_count: usize,
    /// Nodes completed.
    pub finished_count: usize,
    pub finished_bytes: u64,
    pub finished: bool,
}

/// A Task is constructed from a monitor. It can be updated while it's
/// alive. When it's dropped, the progress bar is removed.
#[derive(Debug, Clone)]
pub struct Task(Arc<TaskInner>);

impl Task {
    /// Set the expected number of nodes and bytes.
    pub fn set_totals(&self, count: usize, bytes: u64) {
        let mut status = self.0.status.lock().unwrap();
        status.total_count = count;
        status.total_bytes = bytes;
    }

    pub fn inc_file_count(&self) {
        self.0.status.lock().unwrap().file_count += 1;
    }

    pub fn inc_finished_count(&self) {
        self.0.status.lock().unwrap().finished_count += 1;
    }

    pub fn add_finished_size(&self, bytes: u64) {
        self.0.status.lock().unwrap().finished_bytes += bytes;
    }

    /// Mark the whole task complete.
    pub fn finished(&self) {
        self.0.status.lock().unwrap().finished = true;
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn status(&self) -> TaskStatus {
        self.0.status.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub struct TaskInner {
    name: String,
    status: Mutex<TaskStatus>,
}

impl fmt::Display for TaskInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.lock().unwrap();
        write!(
            f,
            "{}: {}/{} nodes, {}/{} MB",
            self.name,
            status.finished_count.separate_with_commas(),
            status.total_count.separate_with_commas(),
            (status.finished_bytes / 1_000_000).separate_with_commas(),
            (status.total_bytes / 1_000_000).separate_with_commas(),
        )?;
        if status.finished {
            write!(f, " (done)")?;
        }
        Ok(())
    }
}
