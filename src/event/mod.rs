// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivery of trigger output to consumers.
//!
//! Every trigger owns a [`MessageBus`]; consumers subscribe to it and
//! receive each [`TriggerMessage`] in emission order.

mod event_bus;
mod trigger_message;

pub use event_bus::{DEFAULT_CHANNEL_CAPACITY, MessageBus};
pub use trigger_message::TriggerMessage;
