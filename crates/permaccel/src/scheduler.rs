//! Detached task execution.
//!
//! Shadow validation and the maintenance loop run through a [`Scheduler`] so
//! callers can decide where background work lives (and tests can wait on it).

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, error};

/// Runs fire-and-forget tasks.
pub trait Scheduler: Send + Sync {
    /// Run `task` without awaiting it. Panics must not escape.
    fn spawn_detached(&self, name: &'static str, task: BoxFuture<'static, ()>);
}

/// Spawns onto the current tokio runtime and logs panics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn spawn_detached(&self, name: &'static str, task: BoxFuture<'static, ()>) {
        tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(()) => debug!(task = name, "Detached task completed"),
                Err(panic) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    error!(task = name, panic = %panic_msg, "Detached task panicked");
                }
            }
        });
    }
}
