// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Messages emitted by triggers.

use serde::{Deserialize, Serialize};

use crate::message::NetworkMessage;
use crate::types::MonitoredItemSample;

/// A message emitted by a trigger to its consumers.
///
/// Raw triggers emit [`Sample`](Self::Sample)s; publish/subscribe triggers
/// emit [`Network`](Self::Network) messages. The wire form is the inner
/// value without a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerMessage {
    /// A raw sample, forwarded as received.
    Sample(MonitoredItemSample),
    /// A network message built from a change batch or a keyframe.
    Network(NetworkMessage),
}

impl TriggerMessage {
    /// Returns the identity of the subscription the message originates from.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        match self {
            Self::Sample(sample) => &sample.subscription_id,
            Self::Network(message) => &message.subscription_id,
        }
    }

    /// Returns the sample, if this is a raw sample.
    #[must_use]
    pub fn as_sample(&self) -> Option<&MonitoredItemSample> {
        match self {
            Self::Sample(sample) => Some(sample),
            Self::Network(_) => None,
        }
    }

    /// Returns the network message, if this is one.
    #[must_use]
    pub fn as_network(&self) -> Option<&NetworkMessage> {
        match self {
            Self::Network(message) => Some(message),
            Self::Sample(_) => None,
        }
    }
}

impl From<MonitoredItemSample> for TriggerMessage {
    fn from(sample: MonitoredItemSample) -> Self {
        Self::Sample(sample)
    }
}

impl From<NetworkMessage> for TriggerMessage {
    fn from(message: NetworkMessage) -> Self {
        Self::Network(message)
    }
}
