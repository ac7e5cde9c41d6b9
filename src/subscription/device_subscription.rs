// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A live device-side subscription shared by every trigger observing it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::feed::SubscriptionState;
use super::{HandlerId, MonitoredItem, Notification, SubscriptionDescriptor};
use crate::error::ConnectionError;
use crate::protocol::DeviceSession;
use crate::types::{DataValue, SharedContext};

/// Outcome of [`Subscription::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Number of monitored items added on the device.
    pub added: usize,
    /// Number of monitored items removed from the device.
    pub removed: usize,
}

impl ApplyOutcome {
    /// Returns `true` if the device-side item set was left untouched.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// A live subscription to one device endpoint.
///
/// Obtained from a [`SubscriptionManager`](super::SubscriptionManager) and
/// shared between all triggers whose descriptors compare equal. Each trigger
/// attaches its own handlers and detaches them when it stops; the manager
/// disposes the subscription once the last owner released it.
pub struct Subscription<S: DeviceSession> {
    state: Arc<SubscriptionState>,
    descriptor: SubscriptionDescriptor,
    session: S,
    apply_lock: Mutex<()>,
    applied: RwLock<BTreeSet<MonitoredItem>>,
}

impl<S: DeviceSession> Subscription<S> {
    pub(crate) fn new(
        descriptor: SubscriptionDescriptor,
        state: Arc<SubscriptionState>,
        session: S,
    ) -> Self {
        Self {
            state,
            descriptor,
            session,
            apply_lock: Mutex::new(()),
            applied: RwLock::new(BTreeSet::new()),
        }
    }

    /// Returns the subscription identity.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Returns the descriptor this subscription was created for.
    #[must_use]
    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    /// Returns the underlying device session.
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Attaches a handler invoked once per raw sample.
    pub fn on_sample<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.state.callbacks.on_sample(handler)
    }

    /// Attaches a handler invoked once per change batch.
    pub fn on_batch<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.state.callbacks.on_batch(handler)
    }

    /// Detaches a handler.
    ///
    /// Once this returns, the handler is not running and will not run again.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.state.callbacks.unsubscribe(id)
    }

    /// Returns the number of attached handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.state.callbacks.callback_count()
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Returns a consistent snapshot of the last-known value of every field.
    #[must_use]
    pub fn last_values(&self) -> BTreeMap<String, DataValue> {
        self.state.last_values()
    }

    /// Returns the session's encoding context, if established.
    #[must_use]
    pub fn context(&self) -> Option<SharedContext> {
        self.state.context()
    }

    /// Returns how many times the session had to reconnect.
    #[must_use]
    pub fn number_of_connection_retries(&self) -> u32 {
        self.state.retries()
    }

    /// Returns `true` once the subscription was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Returns the monitored items currently applied on the device.
    #[must_use]
    pub fn applied_items(&self) -> BTreeSet<MonitoredItem> {
        self.applied.read().clone()
    }

    /// Returns the number of applied items that are reporting.
    ///
    /// An item is reporting unless its last-known value carries a bad
    /// status. Zero while the session has no context.
    #[must_use]
    pub fn number_of_good_nodes(&self) -> usize {
        self.node_health().0
    }

    /// Returns the number of applied items whose last-known value is bad.
    ///
    /// Zero while the session has no context.
    #[must_use]
    pub fn number_of_bad_nodes(&self) -> usize {
        self.node_health().1
    }

    fn node_health(&self) -> (usize, usize) {
        if self.context().is_none() {
            return (0, 0);
        }
        let last = self.last_values();
        let applied = self.applied.read();
        let bad = applied
            .iter()
            .filter(|item| {
                last.get(item.field_name())
                    .is_some_and(|value| value.status.is_bad())
            })
            .count();
        (applied.len() - bad, bad)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Makes the device-side monitored items match `items`.
    ///
    /// Only the difference to the currently applied set is sent to the
    /// device; applying the same set again performs no device call.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the subscription was disposed, or
    /// the session's error if the device rejected the change. The applied set
    /// is left unchanged on error.
    pub async fn apply(
        &self,
        items: &BTreeSet<MonitoredItem>,
    ) -> Result<ApplyOutcome, ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::Closed);
        }

        let _apply = self.apply_lock.lock().await;
        let current = self.applied_items();
        let added: Vec<MonitoredItem> = items.difference(&current).cloned().collect();
        let removed: Vec<MonitoredItem> = current.difference(items).cloned().collect();
        let outcome = ApplyOutcome {
            added: added.len(),
            removed: removed.len(),
        };

        if outcome.is_unchanged() {
            tracing::trace!(subscription = %self.id(), "Monitored items already applied");
            return Ok(outcome);
        }

        self.session.modify(&added, &removed).await?;
        self.applied.write().clone_from(items);
        tracing::debug!(
            subscription = %self.id(),
            added = outcome.added,
            removed = outcome.removed,
            "Applied monitored items"
        );
        Ok(outcome)
    }

    /// Detaches all handlers and closes the device session.
    ///
    /// Idempotent. Called by the manager when the last owner releases.
    pub(crate) async fn dispose(&self) {
        if !self.state.dispose() {
            return;
        }
        self.session.close().await;
        tracing::debug!(subscription = %self.id(), "Subscription disposed");
    }
}

impl<S: DeviceSession> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.state.id)
            .field("handlers", &self.handler_count())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
