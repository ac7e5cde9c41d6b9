// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sharing of device-side subscriptions between triggers.
//!
//! The manager keeps at most one live [`Subscription`] per distinct
//! [`SubscriptionDescriptor`]. Subscriptions are reference-counted and
//! disposed when the last owner releases them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use super::feed::SubscriptionState;
use super::{NotificationFeed, Subscription, SubscriptionDescriptor};
use crate::error::ConnectionError;
use crate::protocol::{DeviceConnector, DeviceSession};

type SessionOf<C> = <C as DeviceConnector>::Session;

/// One entry of the manager.
///
/// A slot is retired when its last reference is released or its creation
/// failed; a retired slot is already gone from the map and never reused.
struct Slot<S: DeviceSession> {
    subscription: Option<Arc<Subscription<S>>>,
    references: usize,
    retired: bool,
}

impl<S: DeviceSession> Default for Slot<S> {
    fn default() -> Self {
        Self {
            subscription: None,
            references: 0,
            retired: false,
        }
    }
}

type SharedSlot<C> = Arc<Mutex<Slot<SessionOf<C>>>>;

/// Creates, shares and disposes device-side subscriptions.
///
/// Concurrent [`get_or_create`](Self::get_or_create) calls for equal
/// descriptors are serialized per descriptor, so exactly one device
/// subscription is created; calls for different descriptors proceed in
/// parallel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use uapub_lib::protocol::MemoryConnector;
/// use uapub_lib::subscription::{
///     EndpointConfig, MonitoredItem, SubscriptionDescriptor, SubscriptionManager,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), uapub_lib::ConnectionError> {
/// let manager = SubscriptionManager::new(MemoryConnector::new());
/// let descriptor = SubscriptionDescriptor::new(EndpointConfig::new("mem://plc"))
///     .with_item(MonitoredItem::new("ns=2;s=Speed"));
///
/// let first = manager.get_or_create(&descriptor).await?;
/// let second = manager.get_or_create(&descriptor).await?;
/// assert!(Arc::ptr_eq(&first, &second));
///
/// manager.release(&first).await;
/// manager.release(&second).await;
/// assert!(first.is_disposed());
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionManager<C: DeviceConnector> {
    connector: C,
    slots: parking_lot::Mutex<HashMap<SubscriptionDescriptor, SharedSlot<C>>>,
    live: AtomicUsize,
}

impl<C: DeviceConnector> SubscriptionManager<C> {
    /// Creates a manager on top of a device connector.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slots: parking_lot::Mutex::new(HashMap::new()),
            live: AtomicUsize::new(0),
        }
    }

    /// Returns the device connector.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn slot(&self, descriptor: &SubscriptionDescriptor) -> SharedSlot<C> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(descriptor.clone()).or_default())
    }

    fn remove_slot(&self, descriptor: &SubscriptionDescriptor, slot: &SharedSlot<C>) {
        let mut slots = self.slots.lock();
        if slots.get(descriptor).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(descriptor);
        }
    }

    /// Returns the live subscription for `descriptor`, creating it if needed.
    ///
    /// Every successful call takes one reference that must be returned with
    /// [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Returns the connector's [`ConnectionError`] if a new subscription could
    /// not be established. No reference is taken in that case.
    pub async fn get_or_create(
        &self,
        descriptor: &SubscriptionDescriptor,
    ) -> Result<Arc<Subscription<SessionOf<C>>>, ConnectionError> {
        loop {
            let slot = self.slot(descriptor);
            let mut guard = slot.lock().await;

            if guard.retired {
                self.remove_slot(descriptor, &slot);
                continue;
            }

            if let Some(existing) = guard.subscription.clone() {
                guard.references += 1;
                tracing::debug!(
                    subscription = %existing.id(),
                    references = guard.references,
                    "Reusing subscription"
                );
                return Ok(existing);
            }

            let state = Arc::new(SubscriptionState::new(descriptor.id()));
            let feed = NotificationFeed::new(&state);
            match self.connector.connect(descriptor, feed).await {
                Ok(session) => {
                    let subscription =
                        Arc::new(Subscription::new(descriptor.clone(), state, session));
                    guard.subscription = Some(Arc::clone(&subscription));
                    guard.references = 1;
                    self.live.fetch_add(1, Ordering::AcqRel);
                    tracing::info!(
                        subscription = %subscription.id(),
                        endpoint = %descriptor.endpoint.url,
                        "Created subscription"
                    );
                    return Ok(subscription);
                }
                Err(e) => {
                    guard.retired = true;
                    self.remove_slot(descriptor, &slot);
                    tracing::warn!(
                        endpoint = %descriptor.endpoint.url,
                        error = %e,
                        "Failed to create subscription"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Returns one reference to a subscription.
    ///
    /// When the last reference is returned the subscription is disposed: its
    /// handlers are detached and the device session is closed. Returns `true`
    /// if this call disposed it.
    pub async fn release(&self, subscription: &Arc<Subscription<SessionOf<C>>>) -> bool {
        let descriptor = subscription.descriptor();
        let slot = self.slots.lock().get(descriptor).cloned();
        let Some(slot) = slot else {
            tracing::warn!(subscription = %subscription.id(), "Release of unmanaged subscription");
            return false;
        };

        let mut guard = slot.lock().await;
        let owned = guard
            .subscription
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, subscription));
        if !owned || guard.references == 0 {
            tracing::warn!(subscription = %subscription.id(), "Release of unmanaged subscription");
            return false;
        }

        guard.references -= 1;
        if guard.references > 0 {
            tracing::debug!(
                subscription = %subscription.id(),
                references = guard.references,
                "Released subscription reference"
            );
            return false;
        }

        guard.retired = true;
        guard.subscription = None;
        self.remove_slot(descriptor, &slot);
        self.live.fetch_sub(1, Ordering::AcqRel);
        drop(guard);

        subscription.dispose().await;
        tracing::info!(subscription = %subscription.id(), "Released last subscription reference");
        true
    }

    /// Returns the number of live subscriptions.
    ///
    /// Creations still connecting, or abandoned while connecting, are not
    /// counted.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Returns the number of references held on the subscription for `descriptor`.
    pub async fn reference_count(&self, descriptor: &SubscriptionDescriptor) -> usize {
        let slot = self.slots.lock().get(descriptor).cloned();
        match slot {
            Some(slot) => slot.lock().await.references,
            None => 0,
        }
    }
}

impl<C: DeviceConnector + std::fmt::Debug> std::fmt::Debug for SubscriptionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("connector", &self.connector)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
