// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared device-side subscriptions and their notifications.
//!
//! # Overview
//!
//! - [`SubscriptionDescriptor`] - What to observe on which endpoint; the sharing key
//! - [`SubscriptionManager`] - Creates one [`Subscription`] per distinct descriptor
//!   and disposes it when the last owner releases it
//! - [`Subscription`] - Live subscription with per-channel handlers, last-known
//!   values and the session's encoding context
//! - [`NotificationFeed`] - Inbound handle used by the device connector
//! - [`CallbackRegistry`] / [`HandlerId`] - Handler storage and detachment
//!
//! # Usage
//!
//! ```
//! use uapub_lib::protocol::MemoryConnector;
//! use uapub_lib::subscription::{
//!     EndpointConfig, MonitoredItem, SubscriptionDescriptor, SubscriptionManager,
//! };
//! use uapub_lib::types::{DataValue, ValueChangeBatch};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), uapub_lib::ConnectionError> {
//! let connector = MemoryConnector::new();
//! let manager = SubscriptionManager::new(connector.clone());
//! let descriptor = SubscriptionDescriptor::new(EndpointConfig::new("mem://plc"))
//!     .with_item(MonitoredItem::new("ns=2;s=Speed").with_display_name("speed"));
//!
//! let subscription = manager.get_or_create(&descriptor).await?;
//! subscription.apply(&descriptor.items).await?;
//!
//! let handler = subscription.on_batch(|notification| {
//!     println!("change on {}", notification.subscription_id());
//! });
//!
//! if let Some(feed) = connector.feed(&descriptor) {
//!     feed.batch(ValueChangeBatch::new().with("speed", DataValue::good(42)));
//! }
//!
//! subscription.unsubscribe(handler);
//! manager.release(&subscription).await;
//! # Ok(())
//! # }
//! ```

mod callback;
mod descriptor;
mod device_subscription;
mod feed;
mod notification;
mod subscription_manager;

pub use callback::{CallbackRegistry, HandlerId};
pub(crate) use descriptor::optional_millis;
pub use descriptor::{
    EndpointConfig, MonitoredItem, SecurityMode, SubscriptionDescriptor, SubscriptionSettings,
};
pub use device_subscription::{ApplyOutcome, Subscription};
pub use feed::NotificationFeed;
pub use notification::{Notification, NotificationChannel, NotificationKind};
pub use subscription_manager::SubscriptionManager;
