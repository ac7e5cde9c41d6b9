// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the publishing pipeline.
//!
//! Failures fall into a small number of families:
//!
//! - [`ConnectionError`] - the device connection layer could not apply monitored
//!   items or deliver a context. Surfaced to the caller, never retried here.
//! - [`ContractViolation`] - a notification arrived in the wrong shape for the
//!   trigger consuming it. Fatal to that trigger.
//! - [`ConfigError`] - a job configuration could not be loaded or is invalid.
//! - [`ProtocolError`] - the outbound sink failed to publish.

use thiserror::Error;

use crate::config::MessagingMode;
use crate::subscription::NotificationKind;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The device connection layer failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A notification did not match the shape expected by its consumer.
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),

    /// The job configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The outbound transport failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A subscription has no message context yet, so its values cannot be
    /// encoded. The next keyframe tick tries again.
    #[error("message context for subscription {subscription_id} is not available")]
    ContextUnavailable {
        /// The subscription lacking a context.
        subscription_id: String,
    },

    /// The trigger is already running.
    #[error("trigger is already running")]
    AlreadyRunning,
}

/// Errors raised by the device connection layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The endpoint could not be reached.
    #[error("endpoint {endpoint} is unreachable: {reason}")]
    Unreachable {
        /// The endpoint URL.
        endpoint: String,
        /// Description of the failure.
        reason: String,
    },

    /// The device rejected the request.
    #[error("request rejected by device: {0}")]
    Rejected(String),

    /// The session was closed while the request was in flight.
    #[error("session closed")]
    Closed,
}

/// Programming-contract violations between subscriptions and triggers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// A notification of the wrong kind was delivered to a handler.
    #[error(
        "invalid message format on subscription {subscription_id}: expected {expected}, got {actual}"
    )]
    InvalidMessageFormat {
        /// The subscription that delivered the notification.
        subscription_id: String,
        /// The kind the handler accepts.
        expected: NotificationKind,
        /// The kind that was delivered.
        actual: NotificationKind,
    },
}

/// Errors related to job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The job does not configure any dataset.
    #[error("job configures no datasets")]
    NoDataSets,

    /// A dataset has no monitored items.
    #[error("dataset {dataset} has no monitored items")]
    EmptyItems {
        /// Name of the offending dataset.
        dataset: String,
    },

    /// Endpoint URL is empty or uses an unsupported scheme.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Two datasets share a name.
    #[error("duplicate dataset name: {0}")]
    DuplicateDataSet(String),

    /// A running job cannot switch between messaging modes.
    #[error("messaging mode cannot change from {from:?} to {to:?}")]
    MessagingModeChanged {
        /// Mode of the existing trigger.
        from: MessagingMode,
        /// Mode requested by the new configuration.
        to: MessagingMode,
    },
}

/// Errors related to the outbound transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The connection to the broker could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid broker URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A message could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
