// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value-with-status-and-timestamp as observed on a device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StatusCode;

/// A single observed value together with its quality and timestamps.
///
/// The value itself is kept as a JSON value so that scalar, array and
/// structured device types flow through the pipeline unchanged; encoding into
/// a specific wire format is left to the outbound codec.
///
/// # Examples
///
/// ```
/// use uapub_lib::types::{DataValue, StatusCode};
///
/// let value = DataValue::good(21.5);
/// assert_eq!(value.status, StatusCode::GOOD);
/// assert_eq!(value.value, serde_json::json!(21.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    /// The observed value.
    pub value: serde_json::Value,
    /// Quality of the value.
    #[serde(default)]
    pub status: StatusCode,
    /// Time the device sampled the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Time the server processed the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a value with the given status and no timestamps.
    #[must_use]
    pub fn new(value: impl Into<serde_json::Value>, status: StatusCode) -> Self {
        Self {
            value: value.into(),
            status,
            source_timestamp: None,
            server_timestamp: None,
        }
    }

    /// Creates a good value with no timestamps.
    #[must_use]
    pub fn good(value: impl Into<serde_json::Value>) -> Self {
        Self::new(value, StatusCode::GOOD)
    }

    /// Sets the source timestamp.
    #[must_use]
    pub fn with_source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    /// Sets the server timestamp.
    #[must_use]
    pub fn with_server_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }

    /// Returns the most relevant timestamp: source first, then server.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.source_timestamp.or(self.server_timestamp)
    }
}
