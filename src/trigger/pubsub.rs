// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trigger building sequenced publish/subscribe network messages.
//!
//! Two paths produce messages:
//!
//! - the **change path**: every non-empty change batch of an owned
//!   subscription becomes one network message;
//! - the **keyframe path**: on every keyframe tick, each owned subscription
//!   with a context and at least one known value becomes one network message
//!   carrying its complete last-known state.
//!
//! Both paths draw sequence numbers from one counter inside one critical
//! section, so the emitted stream carries strictly increasing, gap-free
//! sequence numbers starting at 0. Keyframe state is read inside that same
//! section, so a keyframe never carries values older than a change message
//! sequenced before it.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::core::{TriggerCore, validate_reconfiguration};
use super::{IntervalTimer, MessageTrigger, TriggerDiagnostics};
use crate::config::JobConfig;
use crate::error::{ContractViolation, Error, Result};
use crate::event::TriggerMessage;
use crate::message::{MetadataVersion, build_data_set_message, build_network_message};
use crate::protocol::{DeviceConnector, DeviceSession};
use crate::subscription::{
    HandlerId, Notification, NotificationKind, Subscription, SubscriptionDescriptor,
    SubscriptionManager,
};
use crate::types::{DataValue, SharedContext};

/// Settings of a publish/subscribe trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubSubSettings {
    /// Whether change batches produce messages.
    pub send_change_messages: bool,
    /// Keyframe period; no keyframes when `None` or zero.
    pub keyframe_interval: Option<Duration>,
    /// Metadata period; no metadata timer when `None` or zero.
    pub metadata_interval: Option<Duration>,
    /// Metadata version stamped on every data-set message.
    pub metadata_version: MetadataVersion,
    /// Capacity of the message bus.
    pub channel_capacity: usize,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            send_change_messages: true,
            keyframe_interval: None,
            metadata_interval: None,
            metadata_version: MetadataVersion::default(),
            channel_capacity: crate::event::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl PubSubSettings {
    /// Maps zero intervals to `None`.
    fn normalized(self) -> Self {
        Self {
            keyframe_interval: self.keyframe_interval.filter(|d| !d.is_zero()),
            metadata_interval: self.metadata_interval.filter(|d| !d.is_zero()),
            ..self
        }
    }
}

impl From<&JobConfig> for PubSubSettings {
    fn from(config: &JobConfig) -> Self {
        Self {
            send_change_messages: config.send_change_messages,
            keyframe_interval: config.keyframe_interval,
            metadata_interval: config.metadata_interval,
            metadata_version: config.metadata_version,
            channel_capacity: config.channel_capacity,
        }
    }
}

struct Shared<S: DeviceSession> {
    core: TriggerCore<S>,
    settings: PubSubSettings,
}

impl<S: DeviceSession> Shared<S> {
    /// Emits one network message for the payload `read` returns; nothing
    /// for an empty payload.
    ///
    /// `read` runs inside the sequencing critical section.
    fn emit<F>(
        &self,
        subscription_id: &str,
        read: F,
        context: Option<SharedContext>,
    ) -> Option<u32>
    where
        F: FnOnce() -> BTreeMap<String, DataValue>,
    {
        self.core.emit_sequenced(|sequence_number| {
            let payload = read();
            if payload.is_empty() {
                return None;
            }
            let data_set = build_data_set_message(
                subscription_id,
                payload,
                sequence_number,
                self.settings.metadata_version,
            );
            build_network_message(subscription_id, vec![data_set], context)
                .map(TriggerMessage::Network)
        })
    }

    fn on_batch(&self, notification: &Notification) {
        let Notification::Batch {
            subscription_id,
            batch,
            context,
        } = notification
        else {
            self.core.raise_fault(ContractViolation::InvalidMessageFormat {
                subscription_id: notification.subscription_id().to_string(),
                expected: NotificationKind::Batch,
                actual: notification.kind(),
            });
            return;
        };

        self.core.counters.record_notification(batch.len());
        if !self.settings.send_change_messages {
            return;
        }
        if batch.is_empty() {
            tracing::debug!(
                trigger = %self.core.id(),
                subscription = %subscription_id,
                "Empty change batch, nothing to send"
            );
            return;
        }

        if let Some(sequence_number) =
            self.emit(subscription_id, || batch.values().clone(), context.clone())
        {
            tracing::trace!(
                trigger = %self.core.id(),
                subscription = %subscription_id,
                sequence_number,
                "Sent change message"
            );
        }
    }

    fn on_keyframe_tick(&self) {
        for subscription in self.core.subscriptions() {
            match self.emit_keyframe(&subscription) {
                Ok(Some(sequence_number)) => {
                    self.core.counters.record_keyframe();
                    tracing::trace!(
                        trigger = %self.core.id(),
                        subscription = %subscription.id(),
                        sequence_number,
                        "Sent keyframe"
                    );
                }
                Ok(None) => {}
                Err(Error::ContextUnavailable { subscription_id }) => {
                    tracing::debug!(
                        trigger = %self.core.id(),
                        subscription = %subscription_id,
                        "Skipping keyframe, no message context yet"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        trigger = %self.core.id(),
                        subscription = %subscription.id(),
                        error = %e,
                        "Failed to send keyframe"
                    );
                }
            }
        }
    }

    fn emit_keyframe(&self, subscription: &Subscription<S>) -> Result<Option<u32>> {
        let context = subscription
            .context()
            .ok_or_else(|| Error::ContextUnavailable {
                subscription_id: subscription.id().to_string(),
            })?;
        Ok(self.emit(
            subscription.id(),
            || subscription.last_values(),
            Some(context),
        ))
    }

    fn on_metadata_tick(&self) {
        tracing::debug!(
            trigger = %self.core.id(),
            version = %self.settings.metadata_version,
            "Metadata tick"
        );
    }
}

/// Trigger turning change batches and keyframes into network messages.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use uapub_lib::config::{DataSetConfig, JobConfig};
/// use uapub_lib::protocol::MemoryConnector;
/// use uapub_lib::subscription::{MonitoredItem, SubscriptionManager};
/// use uapub_lib::trigger::{MessageTrigger, PubSubMessageTrigger};
/// use uapub_lib::types::{DataValue, ValueChangeBatch};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> uapub_lib::Result<()> {
/// let config = JobConfig::new("line-1").with_data_set(
///     DataSetConfig::new("press", "mem://press")
///         .with_item(MonitoredItem::new("ns=2;s=P").with_display_name("pressure")),
/// );
/// let connector = MemoryConnector::new();
/// let manager = Arc::new(SubscriptionManager::new(connector.clone()));
/// let trigger = Arc::new(PubSubMessageTrigger::from_config(&config, manager));
/// let mut messages = trigger.subscribe();
///
/// let cancel = CancellationToken::new();
/// let run = tokio::spawn({
///     let (trigger, cancel) = (Arc::clone(&trigger), cancel.clone());
///     async move { trigger.run(cancel).await }
/// });
///
/// let descriptor = &config.descriptors()[0];
/// while connector.modify_count() == 0 {
///     tokio::time::sleep(Duration::from_millis(1)).await;
/// }
/// if let Some(feed) = connector.feed(descriptor) {
///     feed.batch(ValueChangeBatch::new().with("pressure", DataValue::good(3.2)));
/// }
///
/// let message = messages.recv().await.unwrap();
/// assert_eq!(message.as_network().unwrap().messages[0].sequence_number, 0);
///
/// cancel.cancel();
/// run.await.unwrap()?;
/// # Ok(())
/// # }
/// ```
pub struct PubSubMessageTrigger<C: DeviceConnector> {
    shared: Arc<Shared<C::Session>>,
    manager: Arc<SubscriptionManager<C>>,
}

impl<C: DeviceConnector> PubSubMessageTrigger<C> {
    /// Creates a trigger observing `descriptors`.
    ///
    /// Equal descriptors are attached once. Zero intervals disable their
    /// timer.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
        manager: Arc<SubscriptionManager<C>>,
        settings: PubSubSettings,
    ) -> Self {
        let settings = settings.normalized();
        Self {
            shared: Arc::new(Shared {
                core: TriggerCore::new(id.into(), descriptors, settings.channel_capacity),
                settings,
            }),
            manager,
        }
    }

    /// Creates a trigger from a job configuration.
    ///
    /// The configuration is not validated here.
    #[must_use]
    pub fn from_config(config: &JobConfig, manager: Arc<SubscriptionManager<C>>) -> Self {
        Self::new(
            config.job_id.clone(),
            config.descriptors(),
            manager,
            PubSubSettings::from(config),
        )
    }

    /// Returns the trigger settings.
    #[must_use]
    pub fn settings(&self) -> &PubSubSettings {
        &self.shared.settings
    }

    /// Returns the distinct descriptors this trigger observes.
    #[must_use]
    pub fn descriptors(&self) -> Vec<SubscriptionDescriptor> {
        self.shared.core.descriptors()
    }

    /// Replaces the observed descriptors.
    ///
    /// See [`MessageTrigger::reconfigure`]. The sequence continues across
    /// the change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if a new subscription cannot be acquired
    /// or its items cannot be applied.
    pub async fn update(
        &self,
        descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
    ) -> Result<()> {
        self.shared
            .core
            .reconfigure(&self.manager, descriptors, batch_handler(&self.shared))
            .await
    }

    /// Returns `true` while [`run`](MessageTrigger::run) is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.core.is_running()
    }

    fn start_timers(&self, token: &CancellationToken) -> Vec<IntervalTimer> {
        let mut timers = Vec::new();

        if let Some(period) = self.shared.settings.keyframe_interval {
            let weak = Arc::downgrade(&self.shared);
            timers.extend(IntervalTimer::start("keyframe", period, token.clone(), move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_keyframe_tick();
                }
            }));
        }

        if let Some(period) = self.shared.settings.metadata_interval {
            let weak = Arc::downgrade(&self.shared);
            timers.extend(IntervalTimer::start("metadata", period, token.clone(), move || {
                if let Some(shared) = weak.upgrade() {
                    shared.on_metadata_tick();
                }
            }));
        }

        timers
    }

    async fn run_attached(
        &self,
        cancel: &CancellationToken,
        fault: &CancellationToken,
    ) -> Result<()> {
        self.shared
            .core
            .attach_all(&self.manager, batch_handler(&self.shared))
            .await?;

        let timer_token = cancel.child_token();
        let timers = self.start_timers(&timer_token);
        tracing::info!(
            trigger = %self.shared.core.id(),
            subscriptions = self.shared.core.diagnostics().subscriptions,
            timers = timers.len(),
            "PubSub trigger running"
        );

        let outcome = self.shared.core.wait(cancel, fault).await;

        timer_token.cancel();
        for timer in timers {
            timer.join().await;
        }
        outcome
    }
}

fn batch_handler<S: DeviceSession>(
    shared: &Arc<Shared<S>>,
) -> impl Fn(&Subscription<S>) -> HandlerId + Send + Sync + 'static {
    let weak: Weak<Shared<S>> = Arc::downgrade(shared);
    move |subscription| {
        let weak = weak.clone();
        subscription.on_batch(move |notification| {
            if let Some(shared) = weak.upgrade() {
                shared.on_batch(notification);
            }
        })
    }
}

impl<C: DeviceConnector> MessageTrigger for PubSubMessageTrigger<C> {
    fn id(&self) -> &str {
        self.shared.core.id()
    }

    fn subscribe(&self) -> broadcast::Receiver<TriggerMessage> {
        self.shared.core.subscribe()
    }

    fn number_of_connection_retries(&self) -> u32 {
        self.shared.core.number_of_connection_retries()
    }

    fn is_connection_ok(&self) -> bool {
        self.shared.core.is_connection_ok()
    }

    fn diagnostics(&self) -> TriggerDiagnostics {
        self.shared.core.diagnostics()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let fault = self.shared.core.begin()?;
        let result = self.run_attached(&cancel, &fault).await;
        self.shared.core.shutdown(&self.manager).await;
        result
    }

    async fn reconfigure(&self, config: &JobConfig) -> Result<()> {
        validate_reconfiguration(config)?;
        self.update(config.descriptors()).await
    }
}

impl<C: DeviceConnector> std::fmt::Debug for PubSubMessageTrigger<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubMessageTrigger")
            .field("core", &self.shared.core)
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NetworkMessage;
    use crate::protocol::MemoryConnector;
    use crate::subscription::{EndpointConfig, MonitoredItem, NotificationChannel};
    use crate::types::{MonitoredItemSample, ValueChangeBatch};

    type Trigger = PubSubMessageTrigger<MemoryConnector>;

    fn descriptor(url: &str) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(EndpointConfig::new(url))
            .with_item(MonitoredItem::new("ns=2;s=X").with_display_name("x"))
            .with_item(MonitoredItem::new("ns=2;s=Y").with_display_name("y"))
    }

    fn setup(
        connector: &MemoryConnector,
        descriptors: Vec<SubscriptionDescriptor>,
        settings: PubSubSettings,
    ) -> Arc<Trigger> {
        let manager = Arc::new(SubscriptionManager::new(connector.clone()));
        Arc::new(PubSubMessageTrigger::new("job", descriptors, manager, settings))
    }

    fn spawn_run(
        trigger: &Arc<Trigger>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let trigger = Arc::clone(trigger);
        let cancel = cancel.clone();
        tokio::spawn(async move { trigger.run(cancel).await })
    }

    async fn wait_attached(connector: &MemoryConnector, sessions: usize) {
        for _ in 0..1000 {
            if connector.session_count() == sessions && connector.modify_count() >= sessions {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("trigger did not attach");
    }

    fn drain(rx: &mut broadcast::Receiver<TriggerMessage>) -> Vec<NetworkMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let TriggerMessage::Network(network) = message {
                out.push(network);
            }
        }
        out
    }

    #[tokio::test]
    async fn change_batches_become_sequenced_messages() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let trigger = setup(&connector, vec![d.clone()], PubSubSettings::default());
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let feed = connector.feed(&d).unwrap();
        feed.batch(ValueChangeBatch::new().with("x", DataValue::good(1)));
        feed.batch(ValueChangeBatch::new());
        feed.batch(ValueChangeBatch::new().with("y", DataValue::good(2)));

        cancel.cancel();
        run.await.unwrap().unwrap();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].messages[0].sequence_number, 0);
        assert_eq!(messages[1].messages[0].sequence_number, 1);
        assert_eq!(messages[0].messages[0].payload.len(), 1);
        assert_eq!(messages[0].subscription_id, d.id());
        assert!(messages[0].context.is_some());

        let diagnostics = trigger.diagnostics();
        assert_eq!(diagnostics.data_changes, 3);
        assert_eq!(diagnostics.value_changes, 2);
        assert_eq!(diagnostics.messages_sent, 2);
    }

    #[tokio::test]
    async fn change_messages_can_be_disabled() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let settings = PubSubSettings {
            send_change_messages: false,
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![d.clone()], settings);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        connector
            .feed(&d)
            .unwrap()
            .batch(ValueChangeBatch::new().with("x", DataValue::good(1)));

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(trigger.diagnostics().data_changes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keyframes_carry_complete_state() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let settings = PubSubSettings {
            keyframe_interval: Some(Duration::from_millis(100)),
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![d.clone()], settings);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let feed = connector.feed(&d).unwrap();
        feed.seed("x", DataValue::good(1));
        feed.seed("y", DataValue::good(2));

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        for (expected, message) in messages.iter().enumerate() {
            let data_set = &message.messages[0];
            assert_eq!(data_set.sequence_number, u32::try_from(expected).unwrap());
            assert_eq!(data_set.payload.get("x"), Some(&DataValue::good(1)));
            assert_eq!(data_set.payload.get("y"), Some(&DataValue::good(2)));
        }
        assert_eq!(trigger.diagnostics().keyframes_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keyframes_skip_subscriptions_without_values_or_context() {
        let connector = MemoryConnector::without_context();
        let d = descriptor("mem://a");
        let settings = PubSubSettings {
            keyframe_interval: Some(Duration::from_millis(50)),
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![d.clone()], settings);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        connector.feed(&d).unwrap().seed("x", DataValue::good(1));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(!trigger.is_connection_ok());

        connector
            .feed(&d)
            .unwrap()
            .set_context(crate::types::MessageContext::for_endpoint("mem://a"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(trigger.is_connection_ok());

        cancel.cancel();
        run.await.unwrap().unwrap();
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].messages[0].sequence_number, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn changes_and_keyframes_share_one_sequence() {
        let connector = MemoryConnector::new();
        let a = descriptor("mem://a");
        let b = descriptor("mem://b");
        let settings = PubSubSettings {
            keyframe_interval: Some(Duration::from_millis(10)),
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![a.clone(), b.clone()], settings);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 2).await;

        let feeds = [connector.feed(&a).unwrap(), connector.feed(&b).unwrap()];
        for round in 0..20 {
            let feed = &feeds[round % 2];
            feed.batch(ValueChangeBatch::new().with("x", DataValue::good(round)));
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        cancel.cancel();
        run.await.unwrap().unwrap();

        let sequence: Vec<u32> = drain(&mut rx)
            .iter()
            .flat_map(NetworkMessage::sequence_numbers)
            .collect();
        assert!(sequence.len() > 20);
        let expected: Vec<u32> = (0..u32::try_from(sequence.len()).unwrap()).collect();
        assert_eq!(sequence, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_changes_and_keyframes_stay_ordered() {
        const CHANGES: u64 = 20_000;

        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let settings = PubSubSettings {
            keyframe_interval: Some(Duration::from_millis(1)),
            channel_capacity: 1 << 16,
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![d.clone()], settings);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let feed = connector.feed(&d).unwrap();
        let feeder = std::thread::spawn(move || {
            for x in 0..CHANGES {
                feed.batch(ValueChangeBatch::new().with("x", DataValue::good(x)));
                if x % 100 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });
        tokio::task::spawn_blocking(move || feeder.join())
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        run.await.unwrap().unwrap();

        let messages = drain(&mut rx);
        let diagnostics = trigger.diagnostics();
        assert!(diagnostics.keyframes_sent > 0);
        assert_eq!(
            u64::try_from(messages.len()).unwrap(),
            CHANGES + diagnostics.keyframes_sent
        );

        let mut last = 0;
        for (expected, message) in messages.iter().enumerate() {
            let data_set = &message.messages[0];
            assert_eq!(data_set.sequence_number, u32::try_from(expected).unwrap());
            let x = data_set.payload["x"].value.as_u64().unwrap();
            assert!(
                x >= last,
                "sequence {} carries x={x} after x={last}",
                data_set.sequence_number
            );
            last = x;
        }
        assert_eq!(last, CHANGES - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_intervals_disable_timers() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let settings = PubSubSettings {
            keyframe_interval: Some(Duration::ZERO),
            metadata_interval: Some(Duration::ZERO),
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![d.clone()], settings);
        assert_eq!(trigger.settings().keyframe_interval, None);
        assert_eq!(trigger.settings().metadata_interval, None);

        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let feed = connector.feed(&d).unwrap();
        feed.seed("x", DataValue::good(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        feed.batch(ValueChangeBatch::new().with("x", DataValue::good(2)));

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(trigger.diagnostics().keyframes_sent, 0);
    }

    #[tokio::test]
    async fn update_continues_the_sequence() {
        let connector = MemoryConnector::new();
        let (a, b) = (descriptor("mem://a"), descriptor("mem://b"));
        let trigger = setup(&connector, vec![a.clone()], PubSubSettings::default());
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let feed_a = connector.feed(&a).unwrap();
        feed_a.batch(ValueChangeBatch::new().with("x", DataValue::good(1)));

        trigger.update(vec![b.clone()]).await.unwrap();
        assert!(!feed_a.is_attached());
        assert_eq!(connector.session_count(), 1);
        feed_a.batch(ValueChangeBatch::new().with("x", DataValue::good(2)));
        connector
            .feed(&b)
            .unwrap()
            .batch(ValueChangeBatch::new().with("y", DataValue::good(3)));

        cancel.cancel();
        run.await.unwrap().unwrap();

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].subscription_id, a.id());
        assert_eq!(messages[1].subscription_id, b.id());
        assert_eq!(messages[1].messages[0].sequence_number, 1);
    }

    #[tokio::test]
    async fn diagnostics_report_node_health() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let trigger = setup(&connector, vec![d.clone()], PubSubSettings::default());
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        connector.feed(&d).unwrap().batch(
            ValueChangeBatch::new()
                .with("x", DataValue::good(1))
                .with("y", DataValue::new(0, crate::types::StatusCode::BAD)),
        );
        let diagnostics = trigger.diagnostics();
        assert_eq!(diagnostics.good_nodes, 1);
        assert_eq!(diagnostics.bad_nodes, 1);

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(trigger.diagnostics().good_nodes, 0);
    }

    #[tokio::test]
    async fn sample_on_batch_channel_fails_run() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let trigger = setup(&connector, vec![d.clone()], PubSubSettings::default());
        let run = spawn_run(&trigger, &CancellationToken::new());
        wait_attached(&connector, 1).await;

        connector.feed(&d).unwrap().raise(
            NotificationChannel::Batch,
            &Notification::Sample(MonitoredItemSample::new(
                d.id(),
                "ns=2;s=X",
                "x",
                DataValue::good(1),
            )),
        );

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Contract(ContractViolation::InvalidMessageFormat {
                expected: NotificationKind::Batch,
                actual: NotificationKind::Sample,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_all_emission() {
        let connector = MemoryConnector::new();
        let d = descriptor("mem://a");
        let settings = PubSubSettings {
            keyframe_interval: Some(Duration::from_millis(10)),
            metadata_interval: Some(Duration::from_millis(10)),
            ..PubSubSettings::default()
        };
        let trigger = setup(&connector, vec![d.clone()], settings);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let feed = connector.feed(&d).unwrap();
        feed.seed("x", DataValue::good(1));
        tokio::time::sleep(Duration::from_millis(35)).await;

        cancel.cancel();
        run.await.unwrap().unwrap();
        let before = drain(&mut rx).len();
        assert!(before > 0);

        feed.batch(ValueChangeBatch::new().with("x", DataValue::good(2)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(!feed.is_attached());
        assert!(!trigger.is_running());
        assert_eq!(trigger.diagnostics().subscriptions, 0);
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let connector = MemoryConnector::new();
        let trigger = setup(&connector, vec![descriptor("mem://a")], PubSubSettings::default());
        let cancel = CancellationToken::new();
        let run = spawn_run(&trigger, &cancel);
        wait_attached(&connector, 1).await;

        let err = trigger.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));

        cancel.cancel();
        run.await.unwrap().unwrap();
    }
}
