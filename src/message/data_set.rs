// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data-set messages: one subscription's values at one point in time.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DataValue, StatusCode};

/// Version of the data-set metadata a message was encoded against.
///
/// Defaults to `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataVersion {
    /// Incremented on incompatible metadata changes.
    pub major: u32,
    /// Incremented on compatible metadata changes.
    pub minor: u32,
}

impl MetadataVersion {
    /// Creates a metadata version.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl Default for MetadataVersion {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One data-set message.
///
/// The writer identity is the subscription identity, so consumers can tell
/// the data sets of one trigger apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetMessage {
    /// Identity of the subscription the values belong to.
    pub writer_id: String,
    /// Metadata version the payload was encoded against.
    pub metadata_version: MetadataVersion,
    /// Position of the message in the trigger's emission order.
    pub sequence_number: u32,
    /// Overall quality of the message.
    pub status: StatusCode,
    /// Time the message was built.
    pub timestamp: DateTime<Utc>,
    /// Field name to value.
    pub payload: BTreeMap<String, DataValue>,
}

/// Builds a data-set message from a change batch or keyframe snapshot.
///
/// Pure apart from reading the clock for the timestamp.
#[must_use]
pub fn build_data_set_message(
    subscription_id: &str,
    payload: BTreeMap<String, DataValue>,
    sequence_number: u32,
    metadata_version: MetadataVersion,
) -> DataSetMessage {
    DataSetMessage {
        writer_id: subscription_id.to_string(),
        metadata_version,
        sequence_number,
        status: StatusCode::GOOD,
        timestamp: Utc::now(),
        payload,
    }
}
