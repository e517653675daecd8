// volsnap backup system.
// Copyright 2024 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

use std::sync::Arc;

use super::task::{Task, TaskList};
use super::Monitor;
use crate::counters::Counter;
use crate::Error;

/// A monitor that discards everything it's told.
#[derive(Debug, Clone, Default)]
pub struct VoidMonitor;

impl VoidMonitor {
    pub fn arc() -> Arc<VoidMonitor> {
        Arc::new(VoidMonitor)
    }
}

impl Monitor for VoidMonitor {
    fn count(&self, _counter: Counter, _increment: usize) {}

    fn set_counter(&self, _counter: Counter, _value: usize) {}

    fn error(&self, _error: Error) {}

    fn start_task(&self, name: String) -> Task {
        // Nothing keeps the list, so the task is forgotten when it's dropped.
        TaskList::default().start_task(name)
    }
}
