// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription descriptors: what to observe, where, and how.
//!
//! A [`SubscriptionDescriptor`] is the sharing key of the
//! [`SubscriptionManager`](super::SubscriptionManager): two descriptors that
//! compare equal (same endpoint, same monitored-item set, same settings) are
//! served by one device-side subscription.

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Message security mode requested for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,
    /// Messages are signed.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

/// Connection configuration of a device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Endpoint URL (e.g., `opc.tcp://10.0.0.5:4840`).
    pub url: String,
    /// Requested security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,
    /// User name for authentication; anonymous when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl EndpointConfig {
    /// Creates an anonymous, unsecured endpoint configuration.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_mode: SecurityMode::None,
            username: None,
        }
    }

    /// Sets the security mode.
    #[must_use]
    pub fn with_security_mode(mut self, mode: SecurityMode) -> Self {
        self.security_mode = mode;
        self
    }

    /// Sets the user name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// A single data point registered for change notification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredItem {
    /// Node identity on the device (e.g., `ns=2;s=Line1.Speed`).
    pub node_id: String,
    /// Field name used in payloads; the node identity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Rate at which the device samples the node.
    #[serde(
        default,
        rename = "samplingIntervalMs",
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub sampling_interval: Option<Duration>,
    /// Rate at which the device reports changes of the node.
    #[serde(
        default,
        rename = "publishingIntervalMs",
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub publishing_interval: Option<Duration>,
}

impl MonitoredItem {
    /// Creates a monitored item for a node.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: None,
            sampling_interval: None,
            publishing_interval: None,
        }
    }

    /// Sets the field name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the sampling interval.
    #[must_use]
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = Some(interval);
        self
    }

    /// Sets the publishing interval.
    #[must_use]
    pub fn with_publishing_interval(mut self, interval: Duration) -> Self {
        self.publishing_interval = Some(interval);
        self
    }

    /// Returns the field name used for this item in payloads.
    #[must_use]
    pub fn field_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.node_id)
    }
}

/// Device-side subscription parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSettings {
    /// Publishing interval of the subscription.
    #[serde(
        default,
        rename = "publishingIntervalMs",
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub publishing_interval: Option<Duration>,
    /// Number of empty publishing cycles before a keep-alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_count: Option<u32>,
    /// Relative priority among subscriptions of one session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// Identifies an endpoint, its configuration and the monitored items to observe.
///
/// Items are held in a set, so the order in which they were added does not
/// affect equality.
///
/// # Examples
///
/// ```
/// use uapub_lib::subscription::{EndpointConfig, MonitoredItem, SubscriptionDescriptor};
///
/// let a = SubscriptionDescriptor::new(EndpointConfig::new("opc.tcp://plc:4840"))
///     .with_item(MonitoredItem::new("ns=2;s=Speed"))
///     .with_item(MonitoredItem::new("ns=2;s=Temp"));
/// let b = SubscriptionDescriptor::new(EndpointConfig::new("opc.tcp://plc:4840"))
///     .with_item(MonitoredItem::new("ns=2;s=Temp"))
///     .with_item(MonitoredItem::new("ns=2;s=Speed"));
///
/// assert_eq!(a, b);
/// assert_eq!(a.id(), b.id());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDescriptor {
    /// The endpoint to connect to.
    pub endpoint: EndpointConfig,
    /// The monitored items to observe.
    pub items: BTreeSet<MonitoredItem>,
    /// Device-side subscription parameters.
    #[serde(default)]
    pub settings: SubscriptionSettings,
}

impl SubscriptionDescriptor {
    /// Creates a descriptor without items for an endpoint.
    #[must_use]
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            items: BTreeSet::new(),
            settings: SubscriptionSettings::default(),
        }
    }

    /// Adds a monitored item.
    #[must_use]
    pub fn with_item(mut self, item: MonitoredItem) -> Self {
        self.items.insert(item);
        self
    }

    /// Adds several monitored items.
    #[must_use]
    pub fn with_items(mut self, items: impl IntoIterator<Item = MonitoredItem>) -> Self {
        self.items.extend(items);
        self
    }

    /// Sets the device-side subscription parameters.
    #[must_use]
    pub fn with_settings(mut self, settings: SubscriptionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns a stable identity derived from the full descriptor.
    ///
    /// Equal descriptors always yield the same identity within a process.
    #[must_use]
    pub fn id(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{}#{:016x}", self.endpoint.url, hasher.finish())
    }

    /// Returns the field names of all monitored items.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(MonitoredItem::field_name)
    }
}

/// Serde adapter for optional durations expressed in milliseconds.
///
/// Zero and negative values deserialize to `None`, which disables the
/// setting they configure.
pub(crate) mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // signature imposed by serde's `with`
    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                serializer.serialize_some(&millis)
            }
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<i64>::deserialize(deserializer)?;
        Ok(millis
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }
}
