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

//! Monitor on a terminal UI.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};
use std::thread::{sleep, spawn, JoinHandle};
use std::time::Duration;

use nutmeg::{Destination, View};
use tracing::warn;

use volsnap::counters::Counters;
use volsnap::monitor::task::{Task, TaskList};
use volsnap::{Counter, Error, Monitor};

pub struct TermUiMonitor {
    counters: Arc<Counters>,
    tasks: Arc<Mutex<TaskList>>,
    view: Arc<View<Model>>,
    poller: Option<JoinHandle<()>>,
    stop_poller: Arc<AtomicBool>,
}

/// The nutmeg model.
pub struct Model {
    counters: Arc<Counters>,
    tasks: Arc<Mutex<TaskList>>,
}

impl TermUiMonitor {
    pub fn new(progress_enabled: bool) -> Self {
        let counters = Arc::new(Counters::default());
        let tasks = Arc::new(Mutex::new(TaskList::default()));
        // Updated from the polling thread, so nutmeg doesn't need to rate limit.
        let options = nutmeg::Options::default()
            .update_interval(Duration::ZERO)
            .progress_enabled(progress_enabled)
            .destination(Destination::Stderr);
        let view = Arc::new(View::new(
            Model {
                counters: counters.clone(),
                tasks: tasks.clone(),
            },
            options,
        ));
        let stop_poller = Arc::new(AtomicBool::new(false));
        let view2 = view.clone();
        let stop_poller2 = stop_poller.clone();
        let poller = Some(spawn(move || {
            while !stop_poller2.load(Relaxed) {
                view2.update(|_| {});
                sleep(Duration::from_millis(100));
            }
        }));
        TermUiMonitor {
            counters,
            tasks,
            view,
            poller,
            stop_poller,
        }
    }

    pub fn view(&self) -> Arc<View<Model>> {
        Arc::clone(&self.view)
    }

    /// Remove the progress bar so that results can be printed to stdout.
    pub fn clear_progress(&self) {
        self.view.suspend();
    }
}

impl Drop for TermUiMonitor {
    fn drop(&mut self) {
        self.stop_poller.store(true, Relaxed);
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}

impl Monitor for TermUiMonitor {
    fn count(&self, counter: Counter, increment: usize) {
        self.counters.count(counter, increment)
    }

    fn set_counter(&self, counter: Counter, value: usize) {
        self.counters.set(counter, value)
    }

    fn error(&self, error: Error) {
        warn!("{error}");
    }

    fn start_task(&self, name: String) -> Task {
        self.tasks.lock().unwrap().start_task(name)
    }
}

impl nutmeg::Model for Model {
    fn render(&mut self, _width: usize) -> String {
        let mut s = String::new();
        for (counter, value) in self.counters.iter() {
            if value > 0 {
                s += &format!("{counter:?}: {value}\n");
            }
        }
        for task in self.tasks.lock().unwrap().active_tasks() {
            s += &format!("{task}\n");
        }
        s
    }
}
