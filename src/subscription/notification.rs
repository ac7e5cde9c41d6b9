// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notifications delivered by a subscription to its handlers.

use std::fmt;

use crate::types::{MonitoredItemSample, SharedContext, ValueChangeBatch};

/// Shape of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A single raw sample.
    Sample,
    /// An accumulated change batch.
    Batch,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample => write!(f, "sample"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Event channel a notification is raised on.
///
/// Handlers subscribe per channel. Each channel is expected to carry
/// notifications of its own [`NotificationKind`]; a mismatch is a contract
/// violation detected by the consuming handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationChannel {
    /// Raised once per raw sample.
    Sample,
    /// Raised once per notification cycle with the accumulated changes.
    Batch,
}

impl NotificationChannel {
    /// Returns the notification kind this channel is expected to carry.
    #[must_use]
    pub fn expected_kind(self) -> NotificationKind {
        match self {
            Self::Sample => NotificationKind::Sample,
            Self::Batch => NotificationKind::Batch,
        }
    }
}

/// A notification raised by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// One raw value change of one monitored item.
    Sample(MonitoredItemSample),
    /// All changes of one notification cycle.
    Batch {
        /// Identity of the subscription that produced the batch.
        subscription_id: String,
        /// The accumulated changes, possibly empty.
        batch: ValueChangeBatch,
        /// Encoding context of the session, when available.
        context: Option<SharedContext>,
    },
}

impl Notification {
    /// Returns the shape of this notification.
    #[must_use]
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Sample(_) => NotificationKind::Sample,
            Self::Batch { .. } => NotificationKind::Batch,
        }
    }

    /// Returns the identity of the originating subscription.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        match self {
            Self::Sample(sample) => &sample.subscription_id,
            Self::Batch {
                subscription_id, ..
            } => subscription_id,
        }
    }
}
