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

//! Count the number of `tracing` errors and warnings.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

static ERROR_COUNT: AtomicUsize = AtomicUsize::new(0);
static WARN_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Return the number of errors logged in the program so far.
pub fn global_error_count() -> usize {
    ERROR_COUNT.load(Ordering::Relaxed)
}

/// Return the number of warnings logged in the program so far.
pub fn global_warn_count() -> usize {
    WARN_COUNT.load(Ordering::Relaxed)
}

/// A tracing Layer that counts errors and warnings into static counters.
pub struct CounterLayer();

impl<S> Layer<S> for CounterLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => ERROR_COUNT.fetch_add(1, Ordering::Relaxed),
            Level::WARN => WARN_COUNT.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }
}
