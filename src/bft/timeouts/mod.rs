//! Named one-shot timers, used to detect a lack of progress on a
//! client request and trigger a view change.
//!
//! Starting a timer under an already-used name cancels and replaces
//! the previous one. Cancellation races with expiry are resolved with
//! a per-name generation counter: a sleeping task only fires if its
//! captured generation still matches the live one when it wakes up,
//! a drain-then-drop pattern that needs no extra synchronization on
//! the consumer side.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bft::async_runtime as rt;
use crate::bft::collections::{self, HashMap};

/// Delivered once a named timer fires without being cancelled or
/// replaced first.
#[derive(Debug, Clone)]
pub struct TimerExpired {
    pub name: String,
}

struct Inner {
    generations: Mutex<HashMap<String, u64>>,
    sink: mpsc::UnboundedSender<TimerExpired>,
}

/// A handle to a replica's collection of named one-shot timers.
///
/// Cheaply `Clone`-able; every clone shares the same underlying table,
/// so any handle can start or stop a timer another handle created.
#[derive(Clone)]
pub struct TimerRegistry {
    inner: Arc<Inner>,
}

impl TimerRegistry {
    /// Creates a registry that reports expirations on `sink`.
    pub fn new(sink: mpsc::UnboundedSender<TimerExpired>) -> Self {
        TimerRegistry {
            inner: Arc::new(Inner {
                generations: Mutex::new(collections::hash_map()),
                sink,
            }),
        }
    }

    /// Cancels any timer named `name` and starts a fresh one, firing
    /// after `duration` unless cancelled or replaced before then.
    pub fn start(&self, name: impl Into<String>, duration: Duration) {
        let name = name.into();
        let generation = {
            let mut generations = self.inner.generations.lock();
            let slot = generations.entry(name.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let inner = self.inner.clone();
        rt::spawn(async move {
            rt::async_sleep(duration).await;

            let still_current = {
                let generations = inner.generations.lock();
                generations.get(&name).copied() == Some(generation)
            };
            if still_current {
                let _ = inner.sink.send(TimerExpired { name });
            }
        });
    }

    /// Cancels the timer named `name`, if one is active.
    ///
    /// A task already past its sleep but not yet checked in will see
    /// the bumped generation and drop its own expiry silently.
    pub fn stop(&self, name: &str) {
        let mut generations = self.inner.generations.lock();
        if let Some(slot) = generations.get_mut(name) {
            *slot += 1;
        }
    }

    /// Cancels every currently active timer.
    ///
    /// Used when a single timer's expiry trips a view change:
    /// expiry of any one timer cancels every other active timer.
    pub fn stop_all(&self) {
        let mut generations = self.inner.generations.lock();
        for slot in generations.values_mut() {
            *slot += 1;
        }
    }
}
