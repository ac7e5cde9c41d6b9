// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seam between the pipeline and the device connection layer.
//!
//! Session establishment, reconnection and the device protocol itself live
//! behind these traits. The pipeline only asks for a session per
//! subscription descriptor, changes its monitored items and closes it.

use std::future::Future;

use crate::error::ConnectionError;
use crate::subscription::{MonitoredItem, NotificationFeed, SubscriptionDescriptor};

/// A device-side subscription established by a [`DeviceConnector`].
pub trait DeviceSession: Send + Sync + 'static {
    /// Adds and removes monitored items on the device.
    ///
    /// Only called with a non-empty change.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the device did not accept the change.
    fn modify(
        &self,
        added: &[MonitoredItem],
        removed: &[MonitoredItem],
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Closes the device-side subscription.
    ///
    /// After this returns the session must no longer use its feed.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Creates device-side subscriptions.
///
/// The connector receives the [`NotificationFeed`] of the subscription being
/// created and pushes samples, batches and the session context through it
/// for as long as the session is open.
pub trait DeviceConnector: Send + Sync + 'static {
    /// Session type produced by this connector.
    type Session: DeviceSession;

    /// Establishes a device-side subscription for `descriptor`.
    ///
    /// Monitored items are applied separately through
    /// [`DeviceSession::modify`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the endpoint cannot be reached.
    fn connect(
        &self,
        descriptor: &SubscriptionDescriptor,
        feed: NotificationFeed,
    ) -> impl Future<Output = Result<Self::Session, ConnectionError>> + Send;
}
