// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound publish/subscribe message model.
//!
//! A [`NetworkMessage`] wraps one or more [`DataSetMessage`]s. Both are built
//! by pure functions: [`build_data_set_message`] and [`build_network_message`].
//!
//! # Examples
//!
//! ```
//! use std::collections::BTreeMap;
//! use uapub_lib::message::{MetadataVersion, build_data_set_message, build_network_message};
//! use uapub_lib::types::DataValue;
//!
//! let payload = BTreeMap::from([("speed".to_string(), DataValue::good(42))]);
//! let data_set = build_data_set_message("sub-1", payload, 0, MetadataVersion::default());
//!
//! let message = build_network_message("sub-1", vec![data_set], None).unwrap();
//! assert_eq!(message.messages.len(), 1);
//! assert!(build_network_message("sub-1", Vec::new(), None).is_none());
//! ```

mod data_set;
mod network;

pub use data_set::{DataSetMessage, MetadataVersion, build_data_set_message};
pub use network::{MESSAGE_TYPE_DATA, NetworkMessage, build_network_message};
