// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network messages: the outbound envelope around data-set messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DataSetMessage;
use crate::types::SharedContext;

/// Message type tag of data network messages.
pub const MESSAGE_TYPE_DATA: &str = "ua-data";

/// Outbound envelope carrying one or more data-set messages.
///
/// The encoding context travels with the envelope so that the outbound codec
/// can resolve namespace and server indices; it is not part of the wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMessage {
    /// Unique identity of this envelope.
    pub message_id: Uuid,
    /// Identity of the subscription the data sets belong to.
    pub subscription_id: String,
    /// Message type tag.
    pub message_type: String,
    /// Identity of the publisher.
    pub publisher_id: String,
    /// The contained data-set messages; never empty.
    pub messages: Vec<DataSetMessage>,
    /// Encoding context of the originating session.
    #[serde(skip)]
    pub context: Option<SharedContext>,
}

impl NetworkMessage {
    /// Returns the sequence numbers of the contained data-set messages.
    pub fn sequence_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.messages.iter().map(|m| m.sequence_number)
    }
}

/// Wraps data-set messages into a network message.
///
/// Returns `None` when `messages` is empty; empty envelopes are never built.
#[must_use]
pub fn build_network_message(
    subscription_id: &str,
    messages: Vec<DataSetMessage>,
    context: Option<SharedContext>,
) -> Option<NetworkMessage> {
    if messages.is_empty() {
        return None;
    }
    Some(NetworkMessage {
        message_id: Uuid::new_v4(),
        subscription_id: subscription_id.to_string(),
        message_type: MESSAGE_TYPE_DATA.to_string(),
        publisher_id: subscription_id.to_string(),
        messages,
        context,
    })
}
