// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Job configuration.
//!
//! A job describes one trigger: which datasets to observe, in which
//! messaging mode, and the timer intervals of the publish/subscribe variant.
//! Jobs are usually loaded from JSON with [`JobConfig::from_json`].

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::DEFAULT_CHANNEL_CAPACITY;
use crate::message::MetadataVersion;
use crate::subscription::{
    EndpointConfig, MonitoredItem, SubscriptionDescriptor, SubscriptionSettings, optional_millis,
};

/// Endpoint URL schemes accepted by [`JobConfig::validate`].
pub const SUPPORTED_SCHEMES: [&str; 3] = ["opc.tcp://", "opc.https://", "mem://"];

/// How a trigger delivers observed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessagingMode {
    /// Forward every raw sample unchanged.
    Samples,
    /// Build sequenced network messages from change batches and keyframes.
    #[default]
    PubSub,
}

/// One dataset: a named set of monitored items on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetConfig {
    /// Name of the dataset, unique within a job.
    pub name: String,
    /// The endpoint to observe.
    pub endpoint: EndpointConfig,
    /// The monitored items.
    #[serde(default)]
    pub items: Vec<MonitoredItem>,
    /// Device-side subscription parameters.
    #[serde(default)]
    pub settings: SubscriptionSettings,
}

impl DataSetConfig {
    /// Creates a dataset without items.
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: EndpointConfig::new(endpoint_url),
            items: Vec::new(),
            settings: SubscriptionSettings::default(),
        }
    }

    /// Replaces the endpoint configuration.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Adds a monitored item.
    #[must_use]
    pub fn with_item(mut self, item: MonitoredItem) -> Self {
        self.items.push(item);
        self
    }

    /// Sets the device-side subscription parameters.
    #[must_use]
    pub fn with_settings(mut self, settings: SubscriptionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Derives the subscription descriptor of this dataset.
    #[must_use]
    pub fn descriptor(&self) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(self.endpoint.clone())
            .with_items(self.items.iter().cloned())
            .with_settings(self.settings.clone())
    }
}

/// Configuration of one trigger.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use uapub_lib::config::{DataSetConfig, JobConfig, MessagingMode};
/// use uapub_lib::subscription::MonitoredItem;
///
/// let config = JobConfig::new("line-1")
///     .with_data_set(
///         DataSetConfig::new("press", "opc.tcp://10.0.0.5:4840")
///             .with_item(MonitoredItem::new("ns=2;s=Pressure").with_display_name("pressure")),
///     )
///     .with_keyframe_interval(Duration::from_secs(10));
///
/// assert_eq!(config.messaging_mode, MessagingMode::PubSub);
/// assert!(config.validate().is_ok());
///
/// let parsed = JobConfig::from_json(r#"{
///     "jobId": "line-1",
///     "messagingMode": "samples",
///     "dataSets": [{
///         "name": "press",
///         "endpoint": { "url": "opc.tcp://10.0.0.5:4840" },
///         "items": [{ "nodeId": "ns=2;s=Pressure" }]
///     }],
///     "keyFrameIntervalMs": 0
/// }"#).unwrap();
/// assert_eq!(parsed.messaging_mode, MessagingMode::Samples);
/// assert_eq!(parsed.keyframe_interval, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Identity of the trigger.
    pub job_id: String,
    /// Trigger variant.
    #[serde(default)]
    pub messaging_mode: MessagingMode,
    /// Datasets to observe.
    #[serde(default)]
    pub data_sets: Vec<DataSetConfig>,
    /// Whether change batches produce messages (publish/subscribe only).
    #[serde(default = "default_send_change_messages")]
    pub send_change_messages: bool,
    /// Keyframe period; disabled when absent.
    #[serde(
        default,
        rename = "keyFrameIntervalMs",
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub keyframe_interval: Option<Duration>,
    /// Metadata period; disabled when absent.
    #[serde(
        default,
        rename = "metaDataIntervalMs",
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_interval: Option<Duration>,
    /// Metadata version stamped on data-set messages.
    #[serde(default, rename = "metaDataVersion")]
    pub metadata_version: MetadataVersion,
    /// Capacity of the trigger's message bus.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_send_change_messages() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl JobConfig {
    /// Creates a publish/subscribe job without datasets.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            messaging_mode: MessagingMode::PubSub,
            data_sets: Vec::new(),
            send_change_messages: true,
            keyframe_interval: None,
            metadata_interval: None,
            metadata_version: MetadataVersion::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Parses a job from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document is malformed. The result
    /// is not validated; call [`validate`](Self::validate) for that.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks the job for structural errors.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: no datasets, a dataset without items,
    /// an unsupported endpoint URL, or a duplicate dataset name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_sets.is_empty() {
            return Err(ConfigError::NoDataSets);
        }

        let mut names = HashSet::new();
        for data_set in &self.data_sets {
            if !names.insert(data_set.name.as_str()) {
                return Err(ConfigError::DuplicateDataSet(data_set.name.clone()));
            }
            if data_set.items.is_empty() {
                return Err(ConfigError::EmptyItems {
                    dataset: data_set.name.clone(),
                });
            }
            let url = &data_set.endpoint.url;
            let supported = SUPPORTED_SCHEMES
                .iter()
                .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme));
            if !supported {
                return Err(ConfigError::InvalidEndpoint(url.clone()));
            }
        }
        Ok(())
    }

    /// Derives one subscription descriptor per dataset, in dataset order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<SubscriptionDescriptor> {
        self.data_sets.iter().map(DataSetConfig::descriptor).collect()
    }

    /// Sets the messaging mode.
    #[must_use]
    pub fn with_messaging_mode(mut self, mode: MessagingMode) -> Self {
        self.messaging_mode = mode;
        self
    }

    /// Adds a dataset.
    #[must_use]
    pub fn with_data_set(mut self, data_set: DataSetConfig) -> Self {
        self.data_sets.push(data_set);
        self
    }

    /// Enables or disables change messages.
    #[must_use]
    pub fn with_change_messages(mut self, enabled: bool) -> Self {
        self.send_change_messages = enabled;
        self
    }

    /// Sets the keyframe period; a zero period disables keyframes.
    #[must_use]
    pub fn with_keyframe_interval(mut self, interval: Duration) -> Self {
        self.keyframe_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Sets the metadata period; a zero period disables the metadata timer.
    #[must_use]
    pub fn with_metadata_interval(mut self, interval: Duration) -> Self {
        self.metadata_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Sets the metadata version.
    #[must_use]
    pub fn with_metadata_version(mut self, version: MetadataVersion) -> Self {
        self.metadata_version = version;
        self
    }

    /// Sets the message bus capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_set(name: &str, url: &str) -> DataSetConfig {
        DataSetConfig::new(name, url).with_item(MonitoredItem::new("ns=2;s=A"))
    }

    #[test]
    fn defaults_from_minimal_json() {
        let config = JobConfig::from_json(r#"{"jobId": "job"}"#).unwrap();

        assert_eq!(config.messaging_mode, MessagingMode::PubSub);
        assert!(config.send_change_messages);
        assert_eq!(config.keyframe_interval, None);
        assert_eq!(config.metadata_interval, None);
        assert_eq!(config.metadata_version, MetadataVersion::new(1, 0));
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn timer_intervals_parse() {
        let config = JobConfig::from_json(
            r#"{"jobId": "job", "keyFrameIntervalMs": 100, "metaDataIntervalMs": -5}"#,
        )
        .unwrap();

        assert_eq!(config.keyframe_interval, Some(Duration::from_millis(100)));
        assert_eq!(config.metadata_interval, None);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            JobConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn validate_requires_data_sets() {
        assert!(matches!(
            JobConfig::new("job").validate(),
            Err(ConfigError::NoDataSets)
        ));
    }

    #[test]
    fn validate_rejects_empty_items() {
        let config = JobConfig::new("job").with_data_set(DataSetConfig::new("a", "mem://a"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyItems { dataset }) if dataset == "a"
        ));
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        let config = JobConfig::new("job").with_data_set(data_set("a", "http://plc"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint(url)) if url == "http://plc"
        ));

        let bare = JobConfig::new("job").with_data_set(data_set("a", "opc.tcp://"));
        assert!(bare.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let config = JobConfig::new("job")
            .with_data_set(data_set("a", "mem://a"))
            .with_data_set(data_set("a", "mem://b"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateDataSet(name)) if name == "a"
        ));
    }

    #[test]
    fn descriptors_follow_data_sets() {
        let config = JobConfig::new("job")
            .with_data_set(data_set("a", "mem://a"))
            .with_data_set(data_set("b", "opc.tcp://plc:4840"));
        assert!(config.validate().is_ok());

        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].endpoint.url, "mem://a");
        assert_eq!(descriptors[1].items.len(), 1);
    }

    #[test]
    fn zero_interval_builder_disables_timer() {
        let config = JobConfig::new("job").with_keyframe_interval(Duration::ZERO);
        assert_eq!(config.keyframe_interval, None);
    }
}
