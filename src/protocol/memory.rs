// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process device connector.
//!
//! [`MemoryConnector`] establishes sessions without any network I/O. The
//! feeds of its open sessions are exposed so that values can be injected
//! directly, which makes it the connector of choice for simulations and
//! for exercising triggers end to end.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{DeviceConnector, DeviceSession};
use crate::error::ConnectionError;
use crate::subscription::{MonitoredItem, NotificationFeed, SubscriptionDescriptor};
use crate::types::MessageContext;

#[derive(Default)]
struct Shared {
    feeds: Mutex<HashMap<SubscriptionDescriptor, NotificationFeed>>,
    connect_failure: Mutex<Option<ConnectionError>>,
    modify_failure: Mutex<Option<ConnectionError>>,
    without_context: AtomicBool,
    connects: AtomicUsize,
    modifications: AtomicUsize,
    closes: AtomicUsize,
}

/// Device connector that keeps every session in memory.
///
/// Clones share the same state.
///
/// # Examples
///
/// ```
/// use uapub_lib::protocol::MemoryConnector;
/// use uapub_lib::ConnectionError;
///
/// let connector = MemoryConnector::new();
/// connector.fail_connects_with(ConnectionError::Rejected("maintenance".into()));
/// assert_eq!(connector.connect_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Creates a connector whose sessions publish a context on connect.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose sessions never publish a context.
    #[must_use]
    pub fn without_context() -> Self {
        let connector = Self::default();
        connector.shared.without_context.store(true, Ordering::Relaxed);
        connector
    }

    /// Makes subsequent connects fail with `error`.
    pub fn fail_connects_with(&self, error: ConnectionError) {
        *self.shared.connect_failure.lock() = Some(error);
    }

    /// Makes subsequent item modifications fail with `error`.
    pub fn fail_modifications_with(&self, error: ConnectionError) {
        *self.shared.modify_failure.lock() = Some(error);
    }

    /// Clears configured failures.
    pub fn clear_failures(&self) {
        *self.shared.connect_failure.lock() = None;
        *self.shared.modify_failure.lock() = None;
    }

    /// Returns the feed of the open session for `descriptor`.
    #[must_use]
    pub fn feed(&self, descriptor: &SubscriptionDescriptor) -> Option<NotificationFeed> {
        self.shared.feeds.lock().get(descriptor).cloned()
    }

    /// Returns the feeds of all open sessions on an endpoint.
    #[must_use]
    pub fn feeds_for_endpoint(&self, url: &str) -> Vec<NotificationFeed> {
        self.shared
            .feeds
            .lock()
            .iter()
            .filter(|(descriptor, _)| descriptor.endpoint.url == url)
            .map(|(_, feed)| feed.clone())
            .collect()
    }

    /// Returns the number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.feeds.lock().len()
    }

    /// Returns the number of sessions established so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::Relaxed)
    }

    /// Returns the number of successful item modifications so far.
    #[must_use]
    pub fn modify_count(&self) -> usize {
        self.shared.modifications.load(Ordering::Relaxed)
    }

    /// Returns the number of sessions closed so far.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("sessions", &self.session_count())
            .field("connects", &self.connect_count())
            .finish_non_exhaustive()
    }
}

impl DeviceConnector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(
        &self,
        descriptor: &SubscriptionDescriptor,
        feed: NotificationFeed,
    ) -> Result<MemorySession, ConnectionError> {
        if let Some(error) = self.shared.connect_failure.lock().clone() {
            return Err(error);
        }

        if !self.shared.without_context.load(Ordering::Relaxed) {
            feed.set_context(MessageContext::for_endpoint(&descriptor.endpoint.url));
        }
        self.shared
            .feeds
            .lock()
            .insert(descriptor.clone(), feed);
        self.shared.connects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %descriptor.endpoint.url, "Memory session opened");

        Ok(MemorySession {
            descriptor: descriptor.clone(),
            shared: Arc::clone(&self.shared),
            items: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Session produced by [`MemoryConnector`].
pub struct MemorySession {
    descriptor: SubscriptionDescriptor,
    shared: Arc<Shared>,
    items: Mutex<BTreeSet<MonitoredItem>>,
    closed: AtomicBool,
}

impl MemorySession {
    /// Returns the monitored items currently registered on this session.
    #[must_use]
    pub fn items(&self) -> BTreeSet<MonitoredItem> {
        self.items.lock().clone()
    }

    /// Returns `true` once the session was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl DeviceSession for MemorySession {
    async fn modify(
        &self,
        added: &[MonitoredItem],
        removed: &[MonitoredItem],
    ) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if let Some(error) = self.shared.modify_failure.lock().clone() {
            return Err(error);
        }

        let mut items = self.items.lock();
        for item in removed {
            items.remove(item);
        }
        items.extend(added.iter().cloned());
        self.shared.modifications.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.feeds.lock().remove(&self.descriptor);
        self.shared.closes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %self.descriptor.endpoint.url, "Memory session closed");
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("endpoint", &self.descriptor.endpoint.url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
