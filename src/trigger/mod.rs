// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Triggers turning subscription notifications into outbound messages.
//!
//! A trigger owns a set of shared subscriptions for the duration of
//! [`MessageTrigger::run`] and publishes what it builds on its own message
//! bus.
//!
//! # Variants
//!
//! - [`RawMessageTrigger`] - forwards every raw sample unchanged
//! - [`PubSubMessageTrigger`] - emits sequenced network messages for change
//!   batches and periodic keyframes
//!
//! [`Trigger`] selects the variant from a [`JobConfig`].
//!
//! # Lifecycle
//!
//! `run` acquires and attaches every subscription, then waits until the
//! cancellation token fires or a contract violation is raised. On the way
//! out it stops all timers, detaches its handlers and releases its
//! subscriptions; once `run` returns nothing more is published.
//!
//! [`MessageTrigger::reconfigure`] replaces the datasets of a trigger. On a
//! running trigger only the difference is applied: dropped datasets are
//! released, new ones attached, and unchanged ones keep their subscription.

mod core;
mod pubsub;
mod raw;
mod timer;

pub use pubsub::{PubSubMessageTrigger, PubSubSettings};
pub use raw::RawMessageTrigger;
pub use timer::IntervalTimer;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{JobConfig, MessagingMode};
use crate::error::{ConfigError, Result};
use crate::event::TriggerMessage;
use crate::protocol::DeviceConnector;
use crate::subscription::SubscriptionManager;

/// Counters describing the activity of a trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDiagnostics {
    /// Individual values received.
    pub value_changes: u64,
    /// Notifications received.
    pub data_changes: u64,
    /// Messages published, keyframes included.
    pub messages_sent: u64,
    /// Keyframe messages published.
    pub keyframes_sent: u64,
    /// Reconnection attempts summed over the owned subscriptions.
    pub connection_retries: u32,
    /// Subscriptions currently owned.
    pub subscriptions: usize,
    /// Monitored items reporting, summed over connected subscriptions.
    pub good_nodes: usize,
    /// Monitored items whose last value is bad, summed over connected
    /// subscriptions.
    pub bad_nodes: usize,
}

/// Common interface of all triggers.
pub trait MessageTrigger: Send + Sync {
    /// Returns the trigger identifier.
    fn id(&self) -> &str;

    /// Returns a receiver for every message published from now on.
    fn subscribe(&self) -> broadcast::Receiver<TriggerMessage>;

    /// Returns the reconnection attempts of the owned subscriptions.
    fn number_of_connection_retries(&self) -> u32;

    /// Returns `true` when the trigger owns subscriptions and all of them
    /// currently have a message context.
    fn is_connection_ok(&self) -> bool;

    /// Returns a snapshot of the trigger counters.
    fn diagnostics(&self) -> TriggerDiagnostics;

    /// Runs the trigger until `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`](crate::Error::AlreadyRunning) if another
    ///   run of this trigger is active
    /// - [`Error::Connection`](crate::Error::Connection) if a subscription
    ///   cannot be acquired or its items cannot be applied
    /// - [`Error::Contract`](crate::Error::Contract) if a subscription
    ///   delivers a notification of the wrong kind
    ///
    /// Owned subscriptions are released on every exit path.
    fn run(&self, cancel: CancellationToken) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the datasets observed by the trigger.
    ///
    /// Takes effect immediately on a running trigger and on the next run
    /// otherwise. A job without datasets releases every subscription. Other
    /// settings of the trigger are kept.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if `config` is invalid
    /// - [`Error::Connection`](crate::Error::Connection) if a new
    ///   subscription cannot be acquired or its items cannot be applied
    fn reconfigure(&self, config: &JobConfig) -> impl Future<Output = Result<()>> + Send;
}

/// A trigger of either variant, chosen by [`MessagingMode`].
#[derive(Debug)]
pub enum Trigger<C: DeviceConnector> {
    /// Raw sample forwarding.
    Raw(RawMessageTrigger<C>),
    /// Publish/subscribe network messages.
    PubSub(PubSubMessageTrigger<C>),
}

impl<C: DeviceConnector> Trigger<C> {
    /// Validates `config` and builds the trigger it describes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration
    /// is invalid.
    pub fn from_config(config: &JobConfig, manager: Arc<SubscriptionManager<C>>) -> Result<Self> {
        config.validate()?;
        let trigger = match config.messaging_mode {
            MessagingMode::Samples => Self::Raw(RawMessageTrigger::from_config(config, manager)),
            MessagingMode::PubSub => {
                Self::PubSub(PubSubMessageTrigger::from_config(config, manager))
            }
        };
        tracing::debug!(
            trigger = %config.job_id,
            mode = ?config.messaging_mode,
            data_sets = config.data_sets.len(),
            "Trigger created"
        );
        Ok(trigger)
    }

    /// Returns the messaging mode of this trigger.
    #[must_use]
    pub fn messaging_mode(&self) -> MessagingMode {
        match self {
            Self::Raw(_) => MessagingMode::Samples,
            Self::PubSub(_) => MessagingMode::PubSub,
        }
    }
}

impl<C: DeviceConnector> MessageTrigger for Trigger<C> {
    fn id(&self) -> &str {
        match self {
            Self::Raw(t) => t.id(),
            Self::PubSub(t) => t.id(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TriggerMessage> {
        match self {
            Self::Raw(t) => t.subscribe(),
            Self::PubSub(t) => t.subscribe(),
        }
    }

    fn number_of_connection_retries(&self) -> u32 {
        match self {
            Self::Raw(t) => t.number_of_connection_retries(),
            Self::PubSub(t) => t.number_of_connection_retries(),
        }
    }

    fn is_connection_ok(&self) -> bool {
        match self {
            Self::Raw(t) => t.is_connection_ok(),
            Self::PubSub(t) => t.is_connection_ok(),
        }
    }

    fn diagnostics(&self) -> TriggerDiagnostics {
        match self {
            Self::Raw(t) => t.diagnostics(),
            Self::PubSub(t) => t.diagnostics(),
        }
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        match self {
            Self::Raw(t) => t.run(cancel).await,
            Self::PubSub(t) => t.run(cancel).await,
        }
    }

    /// Also rejects a change of messaging mode with
    /// [`ConfigError::MessagingModeChanged`].
    async fn reconfigure(&self, config: &JobConfig) -> Result<()> {
        let mode = self.messaging_mode();
        if config.messaging_mode != mode {
            return Err(ConfigError::MessagingModeChanged {
                from: mode,
                to: config.messaging_mode,
            }
            .into());
        }
        match self {
            Self::Raw(t) => t.reconfigure(config).await,
            Self::PubSub(t) => t.reconfigure(config).await,
        }
    }
}
