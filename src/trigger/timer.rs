// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-reentrant periodic timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Periodic timer driving a synchronous tick handler on its own task.
///
/// The first tick fires one period after start. The handler runs on the
/// timer's own task, so invocations never overlap; ticks missed during a slow
/// handler are skipped rather than replayed. The timer reports itself
/// disarmed while the handler runs and is re-armed afterwards unless it was
/// stopped meanwhile.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use uapub_lib::trigger::IntervalTimer;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let ticks = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&ticks);
/// let timer = IntervalTimer::start("example", Duration::from_millis(100), CancellationToken::new(), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// })
/// .unwrap();
///
/// tokio::time::sleep(Duration::from_millis(250)).await;
/// timer.join().await;
/// assert_eq!(ticks.load(Ordering::SeqCst), 2);
/// # }
/// ```
#[derive(Debug)]
pub struct IntervalTimer {
    name: &'static str,
    token: CancellationToken,
    armed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Re-arms the timer when the tick handler returns, even by unwinding.
struct Rearm<'a> {
    armed: &'a AtomicBool,
    token: &'a CancellationToken,
}

impl Drop for Rearm<'_> {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            self.armed.store(true, Ordering::Release);
        }
    }
}

impl IntervalTimer {
    /// Starts a timer calling `on_tick` every `period` until `token` is cancelled.
    ///
    /// Returns `None` for a zero `period`: such a timer is disabled.
    /// Must be called within a Tokio runtime.
    pub fn start<F>(
        name: &'static str,
        period: Duration,
        token: CancellationToken,
        on_tick: F,
    ) -> Option<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period.is_zero() {
            tracing::debug!(timer = name, "Zero period, timer disabled");
            return None;
        }
        let armed = Arc::new(AtomicBool::new(true));
        let task_token = token.clone();
        let task_armed = Arc::clone(&armed);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                task_armed.store(false, Ordering::Release);
                let _rearm = Rearm {
                    armed: &task_armed,
                    token: &task_token,
                };
                on_tick();
            }

            task_armed.store(false, Ordering::Release);
            tracing::debug!(timer = name, "Timer stopped");
        });

        tracing::debug!(timer = name, period_ms = period.as_millis(), "Timer started");
        Some(Self {
            name,
            token,
            armed,
            handle,
        })
    }

    /// Returns the timer name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` while the timer waits for its next tick.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Stops the timer without waiting for a running handler.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stops the timer and waits until its task has finished.
    ///
    /// No handler invocation is in flight once this returns.
    pub async fn join(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(timer = self.name, error = %e, "Timer task ended abnormally");
        }
    }
}
