// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundaries of the pipeline: device connections in, broker messages out.
//!
//! # Inbound
//!
//! - [`DeviceConnector`] / [`DeviceSession`]: the seam to a device
//!   connection layer
//! - [`MemoryConnector`]: in-process connector driven through
//!   [`NotificationFeed`](crate::subscription::NotificationFeed)s
//!
//! # Outbound
//!
//! - [`MqttSink`]: publishes trigger messages to an MQTT broker
//!   (requires the `mqtt` feature)

mod connector;
mod memory;
#[cfg(feature = "mqtt")]
mod mqtt_sink;

pub use connector::{DeviceConnector, DeviceSession};
pub use memory::{MemoryConnector, MemorySession};
#[cfg(feature = "mqtt")]
pub use mqtt_sink::{MqttSink, MqttSinkConfig};
