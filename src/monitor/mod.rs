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

//! Communication from the library to a monitor: a test, a UI, etc.

pub mod task;
pub mod test;
pub mod void;

use crate::counters::Counter;
use crate::Error;
use task::Task;

/// A monitor receives events from the library and may collect them, report them
/// to the terminal, log them, etc.
pub trait Monitor: Send + Sync + 'static {
    /// Notify that a counter increased by a given amount.
    fn count(&self, counter: Counter, increment: usize);

    /// Set the absolute value of a counter.
    fn set_counter(&self, counter: Counter, value: usize);

    /// A non-fatal error occurred, such as one node failing to back up.
    fn error(&self, error: Error);

    /// Start a long-running task, such as one phase of a backup.
    ///
    /// The task is finished when it's dropped.
    fn start_task(&self, name: String) -> Task;
}
