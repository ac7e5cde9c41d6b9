// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message bus for broadcasting trigger output.

use tokio::sync::broadcast;

use super::TriggerMessage;

/// Default channel capacity for the message bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Bus broadcasting the messages of one trigger to every consumer.
///
/// Uses tokio's broadcast channel: each consumer receives its own copy of
/// every message, in publication order.
///
/// # Capacity
///
/// The bus has a fixed capacity (default 256). A consumer that falls more
/// than that many messages behind loses the oldest ones and observes
/// `RecvError::Lagged`.
///
/// # Examples
///
/// ```
/// use uapub_lib::event::{MessageBus, TriggerMessage};
/// use uapub_lib::types::{DataValue, MonitoredItemSample};
///
/// let bus = MessageBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(TriggerMessage::Sample(MonitoredItemSample::new(
///     "sub", "ns=2;s=A", "a", DataValue::good(1),
/// )));
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<TriggerMessage>,
}

impl MessageBus {
    /// Creates a new bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new bus with the specified capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to messages published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerMessage> {
        self.sender.subscribe()
    }

    /// Returns the number of active consumers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes a message to all consumers.
    ///
    /// Returns the number of consumers that received it; without consumers the
    /// message is discarded.
    pub fn publish(&self, message: TriggerMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
