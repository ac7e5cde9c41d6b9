// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `UaPub` Lib - Turns industrial device notifications into publishable messages.
//!
//! This library sits between a device connection layer (an OPC UA client,
//! for instance) and a message broker. It shares device-side subscriptions
//! between jobs and converts their notifications into either raw samples or
//! sequenced publish/subscribe network messages.
//!
//! # Supported Features
//!
//! - **Shared subscriptions**: one device subscription per distinct
//!   descriptor, reference counted across triggers
//! - **Raw forwarding**: every monitored-item sample emitted unchanged
//! - **Publish/subscribe messages**: change messages and periodic keyframes
//!   with gap-free sequence numbers
//! - **Live reconfiguration**: datasets of a running trigger are swapped
//!   without touching the subscriptions they keep
//! - **MQTT output**: JSON publication of trigger output (`mqtt` feature)
//!
//! # Quick Start
//!
//! ## In-process pipeline
//!
//! ```
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use uapub_lib::config::JobConfig;
//! use uapub_lib::protocol::MemoryConnector;
//! use uapub_lib::subscription::SubscriptionManager;
//! use uapub_lib::trigger::{MessageTrigger, Trigger};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> uapub_lib::Result<()> {
//! let config = JobConfig::from_json(
//!     r#"{
//!         "jobId": "line-1",
//!         "messagingMode": "samples",
//!         "dataSets": [{
//!             "name": "press",
//!             "endpoint": { "url": "mem://press" },
//!             "items": [{ "nodeId": "ns=2;s=Pressure", "displayName": "pressure" }]
//!         }]
//!     }"#,
//! )?;
//!
//! let manager = Arc::new(SubscriptionManager::new(MemoryConnector::new()));
//! let trigger = Trigger::from_config(&config, manager)?;
//! let _messages = trigger.subscribe();
//!
//! let cancel = CancellationToken::new();
//! cancel.cancel();
//! trigger.run(cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Publishing to MQTT
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use uapub_lib::protocol::{MqttSink, MqttSinkConfig};
//! use uapub_lib::trigger::MessageTrigger;
//!
//! # async fn example(trigger: impl MessageTrigger) -> uapub_lib::Result<()> {
//! let sink = MqttSink::connect(MqttSinkConfig::new("mqtt://192.168.1.50:1883", "plant/line-1"))
//!     .await?;
//! let forwarded = sink.forward(trigger.subscribe(), CancellationToken::new()).await?;
//! println!("forwarded {forwarded} messages");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;
pub mod subscription;
pub mod trigger;
pub mod types;

pub use config::{DataSetConfig, JobConfig, MessagingMode};
pub use error::{ConfigError, ConnectionError, ContractViolation, Error, ProtocolError, Result};
pub use event::{MessageBus, TriggerMessage};
pub use message::{DataSetMessage, NetworkMessage};
pub use subscription::{SubscriptionDescriptor, SubscriptionManager};
pub use trigger::{MessageTrigger, PubSubMessageTrigger, RawMessageTrigger, Trigger};
