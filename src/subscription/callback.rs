// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handler management for subscription notifications.
//!
//! This module provides the core types for managing notification handlers:
//!
//! - [`HandlerId`] - Unique identifier for detaching a handler
//! - [`CallbackRegistry`] - Registry for storing and dispatching handlers

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{Notification, NotificationChannel};

/// Unique identifier for an attached handler.
///
/// Returned when attaching a handler to a subscription and used to detach it
/// later. IDs are unique within a subscription's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.0)
    }
}

type NotificationCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Registry of notification handlers, one map per channel.
///
/// Handlers run synchronously on the dispatching task while a read lock on
/// their channel is held. Detaching a handler takes the write lock, so once
/// [`unsubscribe`](Self::unsubscribe) or [`clear`](Self::clear) returns no
/// invocation of the detached handler is still in flight.
///
/// Handlers must not attach or detach handlers on the same registry.
pub struct CallbackRegistry {
    next_id: AtomicU64,
    sample_callbacks: RwLock<HashMap<HandlerId, NotificationCallback>>,
    batch_callbacks: RwLock<HashMap<HandlerId, NotificationCallback>>,
}

impl CallbackRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sample_callbacks: RwLock::new(HashMap::new()),
            batch_callbacks: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> HandlerId {
        HandlerId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn channel(
        &self,
        channel: NotificationChannel,
    ) -> &RwLock<HashMap<HandlerId, NotificationCallback>> {
        match channel {
            NotificationChannel::Sample => &self.sample_callbacks,
            NotificationChannel::Batch => &self.batch_callbacks,
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Attaches a handler to a channel.
    pub fn on<F>(&self, channel: NotificationChannel, callback: F) -> HandlerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.channel(channel).write().insert(id, Arc::new(callback));
        id
    }

    /// Attaches a handler to the per-sample channel.
    pub fn on_sample<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.on(NotificationChannel::Sample, callback)
    }

    /// Attaches a handler to the per-batch channel.
    pub fn on_batch<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.on(NotificationChannel::Batch, callback)
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Detaches a handler.
    ///
    /// Returns `true` if a handler was found and removed.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        if self.sample_callbacks.write().remove(&id).is_some() {
            return true;
        }
        self.batch_callbacks.write().remove(&id).is_some()
    }

    /// Detaches all handlers.
    pub fn clear(&self) {
        self.sample_callbacks.write().clear();
        self.batch_callbacks.write().clear();
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Invokes every handler attached to `channel`.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, channel: NotificationChannel, notification: &Notification) -> usize {
        let callbacks = self.channel(channel).read();
        for callback in callbacks.values() {
            callback(notification);
        }
        callbacks.len()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Returns the total number of attached handlers.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.sample_callbacks.read().len() + self.batch_callbacks.read().len()
    }

    /// Returns `true` if no handler is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callback_count() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callback_count", &self.callback_count())
            .finish()
    }
}
