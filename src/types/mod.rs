// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types flowing through the pipeline.
//!
//! # Types
//!
//! - [`StatusCode`] - Quality code of an observed value
//! - [`DataValue`] - Value with status and timestamps
//! - [`MonitoredItemSample`] - One raw value change of one monitored item
//! - [`ValueChangeBatch`] - All changes of one notification cycle, by field name
//! - [`MessageContext`] - Encoding tables provided by a device session

mod context;
mod data_value;
mod sample;
mod status_code;

pub use context::{MessageContext, SharedContext};
pub use data_value::DataValue;
pub use sample::{MonitoredItemSample, ValueChangeBatch};
pub use status_code::StatusCode;
