// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The inbound side of a subscription.
//!
//! A [`NotificationFeed`] is handed to the device connector when a
//! subscription is created. The connector pushes samples, batches and
//! session context through it; the feed keeps the subscription's last-known
//! values current and dispatches to attached handlers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::{CallbackRegistry, Notification, NotificationChannel};
use crate::types::{
    DataValue, MessageContext, MonitoredItemSample, SharedContext, ValueChangeBatch,
};

/// State shared between a subscription and its feed.
#[derive(Debug)]
pub(crate) struct SubscriptionState {
    pub(crate) id: String,
    pub(crate) callbacks: CallbackRegistry,
    last_values: RwLock<BTreeMap<String, DataValue>>,
    context: RwLock<Option<SharedContext>>,
    retries: AtomicU32,
    disposed: AtomicBool,
    dispatch: Mutex<()>,
}

impl SubscriptionState {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            callbacks: CallbackRegistry::new(),
            last_values: RwLock::new(BTreeMap::new()),
            context: RwLock::new(None),
            retries: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
            dispatch: Mutex::new(()),
        }
    }

    pub(crate) fn last_values(&self) -> BTreeMap<String, DataValue> {
        self.last_values.read().clone()
    }

    pub(crate) fn context(&self) -> Option<SharedContext> {
        self.context.read().clone()
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the state disposed and detaches every handler.
    ///
    /// Returns `false` if it was already disposed. Waits for an in-flight
    /// dispatch to finish.
    pub(crate) fn dispose(&self) -> bool {
        let _dispatch = self.dispatch.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.callbacks.clear();
        true
    }

    fn raise(&self, channel: NotificationChannel, notification: &Notification) -> usize {
        let _dispatch = self.dispatch.lock();
        if self.is_disposed() {
            return 0;
        }

        {
            let mut last = self.last_values.write();
            match notification {
                Notification::Sample(sample) => {
                    last.insert(sample.display_name.clone(), sample.value.clone());
                }
                Notification::Batch { batch, .. } => {
                    for (field, value) in batch.iter() {
                        last.insert(field.clone(), value.clone());
                    }
                }
            }
        }

        self.callbacks.dispatch(channel, notification)
    }

    fn seed(&self, field: String, value: DataValue) {
        let _dispatch = self.dispatch.lock();
        if !self.is_disposed() {
            self.last_values.write().insert(field, value);
        }
    }
}

/// Handle through which a device connector feeds a subscription.
///
/// The feed only holds a weak reference: once the subscription is gone every
/// call becomes a no-op. Cloning is cheap.
#[derive(Clone)]
pub struct NotificationFeed {
    subscription_id: String,
    state: Weak<SubscriptionState>,
}

impl NotificationFeed {
    pub(crate) fn new(state: &Arc<SubscriptionState>) -> Self {
        Self {
            subscription_id: state.id.clone(),
            state: Arc::downgrade(state),
        }
    }

    /// Returns the identity of the subscription this feed belongs to.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Returns `true` while the subscription accepts notifications.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state.upgrade().is_some_and(|state| !state.is_disposed())
    }

    /// Raises a notification on a channel.
    ///
    /// The subscription's last-known values are updated before handlers run.
    /// No validation of the notification's shape against the channel takes
    /// place here; consumers detect mismatches themselves.
    ///
    /// Returns the number of handlers invoked.
    pub fn raise(&self, channel: NotificationChannel, notification: &Notification) -> usize {
        match self.state.upgrade() {
            Some(state) => state.raise(channel, notification),
            None => 0,
        }
    }

    /// Raises a raw sample of a monitored item on the sample channel.
    pub fn sample(
        &self,
        node_id: impl Into<String>,
        display_name: impl Into<String>,
        value: DataValue,
    ) -> usize {
        let sample = MonitoredItemSample::new(
            self.subscription_id.clone(),
            node_id,
            display_name,
            value,
        );
        self.raise(NotificationChannel::Sample, &Notification::Sample(sample))
    }

    /// Raises a change batch on the batch channel, tagged with the current context.
    pub fn batch(&self, batch: ValueChangeBatch) -> usize {
        let Some(state) = self.state.upgrade() else {
            return 0;
        };
        let notification = Notification::Batch {
            subscription_id: self.subscription_id.clone(),
            batch,
            context: state.context(),
        };
        state.raise(NotificationChannel::Batch, &notification)
    }

    /// Records a last-known value without raising a notification.
    ///
    /// Used for initial reads, which populate keyframes but are not changes.
    pub fn seed(&self, field: impl Into<String>, value: DataValue) {
        if let Some(state) = self.state.upgrade() {
            state.seed(field.into(), value);
        }
    }

    /// Publishes the session's encoding context.
    pub fn set_context(&self, context: MessageContext) {
        if let Some(state) = self.state.upgrade() {
            *state.context.write() = Some(Arc::new(context));
        }
    }

    /// Withdraws the session's encoding context, e.g. while reconnecting.
    pub fn clear_context(&self) {
        if let Some(state) = self.state.upgrade() {
            *state.context.write() = None;
        }
    }

    /// Counts one reconnection attempt of the session.
    pub fn record_reconnect(&self) {
        if let Some(state) = self.state.upgrade() {
            state.retries.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for NotificationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeed")
            .field("subscription_id", &self.subscription_id)
            .field("attached", &self.is_attached())
            .finish()
    }
}
