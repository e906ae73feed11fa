//! Per-host heartbeat watchdog.
//!
//! Every non-transient heartbeat re-arms the host's timer. If the timer runs
//! out the host has been silent for the full timeout and an alert fires once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

pub type AlertFn = Arc<dyn Fn(&str) + Send + Sync>;

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    by_host: HashMap<String, Timer>,
}

pub struct HeartbeatWatchdog {
    timeout: Duration,
    timers: Arc<Mutex<Timers>>,
    on_silence: AlertFn,
}

fn log_silence(host: &str) {
    tracing::error!(host, "no heartbeat received from agent, host may be offline");
}

impl HeartbeatWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self::with_alert(timeout, Arc::new(log_silence))
    }

    pub fn with_alert(timeout: Duration, on_silence: AlertFn) -> Self {
        Self {
            timeout,
            timers: Arc::new(Mutex::new(Timers::default())),
            on_silence,
        }
    }

    /// Cancel the host's running timer, if any, and start a fresh one.
    pub fn reset(&self, host: &str) {
        let mut timers = lock(&self.timers);
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let timeout = self.timeout;
        let on_silence = Arc::clone(&self.on_silence);
        let registry = Arc::clone(&self.timers);
        let owned_host = host.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            {
                let mut timers = lock(&registry);
                // A newer reset owns the slot now.
                if timers
                    .by_host
                    .get(&owned_host)
                    .is_some_and(|t| t.generation == generation)
                {
                    timers.by_host.remove(&owned_host);
                } else {
                    return;
                }
            }
            on_silence(&owned_host);
        });

        if let Some(previous) = timers
            .by_host
            .insert(host.to_string(), Timer { generation, handle })
        {
            previous.handle.abort();
        }
    }

    /// Number of hosts with a running timer.
    pub fn armed(&self) -> usize {
        lock(&self.timers).by_host.len()
    }
}

impl Drop for HeartbeatWatchdog {
    fn drop(&mut self) {
        for (_, timer) in lock(&self.timers).by_host.drain() {
            timer.handle.abort();
        }
    }
}

fn lock(timers: &Mutex<Timers>) -> std::sync::MutexGuard<'_, Timers> {
    timers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
