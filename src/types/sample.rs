// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw samples and accumulated change batches.
//!
//! A [`MonitoredItemSample`] is one value change of one monitored item. A
//! [`ValueChangeBatch`] collects every change observed on a subscription
//! during one notification cycle, keyed by field name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DataValue, StatusCode};

/// One raw value-change notification of a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredItemSample {
    /// Identity of the subscription that produced the sample.
    pub subscription_id: String,
    /// Node identity of the monitored item.
    pub node_id: String,
    /// Field name of the monitored item.
    pub display_name: String,
    /// The observed value.
    pub value: DataValue,
}

impl MonitoredItemSample {
    /// Creates a sample.
    #[must_use]
    pub fn new(
        subscription_id: impl Into<String>,
        node_id: impl Into<String>,
        display_name: impl Into<String>,
        value: DataValue,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            node_id: node_id.into(),
            display_name: display_name.into(),
            value,
        }
    }

    /// Returns the sample timestamp, if the device reported one.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.value.timestamp()
    }

    /// Returns the quality of the sampled value.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.value.status
    }
}

/// All value changes accumulated during one notification cycle.
///
/// A batch may be empty when every sampled item was unchanged. An empty batch
/// is a valid state that never produces an outbound message.
///
/// # Examples
///
/// ```
/// use uapub_lib::types::{DataValue, ValueChangeBatch};
///
/// let mut batch = ValueChangeBatch::new();
/// assert!(batch.is_empty());
///
/// batch.insert("temperature", DataValue::good(21.5));
/// assert_eq!(batch.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueChangeBatch(BTreeMap<String, DataValue>);

impl ValueChangeBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change for a field, replacing an earlier change of the same field.
    pub fn insert(&mut self, field: impl Into<String>, value: DataValue) {
        self.0.insert(field.into(), value);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: DataValue) -> Self {
        self.insert(field, value);
        self
    }

    /// Returns `true` if no field changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of changed fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the change recorded for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&DataValue> {
        self.0.get(field)
    }

    /// Iterates the changes in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.0.iter()
    }

    /// Returns the changes as a field-name to value map.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, DataValue> {
        &self.0
    }

    /// Consumes the batch, returning the field-name to value map.
    #[must_use]
    pub fn into_values(self) -> BTreeMap<String, DataValue> {
        self.0
    }
}

impl From<BTreeMap<String, DataValue>> for ValueChangeBatch {
    fn from(values: BTreeMap<String, DataValue>) -> Self {
        Self(values)
    }
}

impl FromIterator<(String, DataValue)> for ValueChangeBatch {
    fn from_iter<I: IntoIterator<Item = (String, DataValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_replaces_same_field() {
        let batch = ValueChangeBatch::new()
            .with("x", DataValue::good(1))
            .with("x", DataValue::good(2));

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get("x"), Some(&DataValue::good(2)));
    }

    #[test]
    fn batch_iterates_in_field_order() {
        let batch = ValueChangeBatch::new()
            .with("b", DataValue::good(2))
            .with("a", DataValue::good(1));

        let fields: Vec<&str> = batch.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(fields, vec!["a", "b"]);
    }

    #[test]
    fn sample_exposes_value_metadata() {
        let sample = MonitoredItemSample::new(
            "sub",
            "ns=2;s=Speed",
            "Speed",
            DataValue::new(3, StatusCode::UNCERTAIN),
        );
        assert_eq!(sample.status(), StatusCode::UNCERTAIN);
        assert!(sample.timestamp().is_none());
    }
}
