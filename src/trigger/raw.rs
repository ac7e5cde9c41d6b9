// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trigger forwarding raw samples.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::core::{TriggerCore, validate_reconfiguration};
use super::{MessageTrigger, TriggerDiagnostics};
use crate::config::JobConfig;
use crate::error::{ContractViolation, Result};
use crate::event::TriggerMessage;
use crate::protocol::{DeviceConnector, DeviceSession};
use crate::subscription::{
    HandlerId, Notification, NotificationKind, Subscription, SubscriptionDescriptor,
    SubscriptionManager,
};

/// Trigger that forwards every raw sample of its subscriptions unchanged.
///
/// Each sample notification yields exactly one [`TriggerMessage::Sample`],
/// in the order the subscriptions delivered them. A batch arriving on the
/// sample channel is a contract violation and ends [`run`](MessageTrigger::run)
/// with an error.
pub struct RawMessageTrigger<C: DeviceConnector> {
    core: Arc<TriggerCore<C::Session>>,
    manager: Arc<SubscriptionManager<C>>,
}

impl<C: DeviceConnector> RawMessageTrigger<C> {
    /// Creates a trigger observing `descriptors`.
    ///
    /// Equal descriptors are attached once.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
        manager: Arc<SubscriptionManager<C>>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            core: Arc::new(TriggerCore::new(id.into(), descriptors, channel_capacity)),
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
            config.channel_capacity,
        )
    }

    /// Returns the distinct descriptors this trigger observes.
    #[must_use]
    pub fn descriptors(&self) -> Vec<SubscriptionDescriptor> {
        self.core.descriptors()
    }

    /// Replaces the observed descriptors.
    ///
    /// See [`MessageTrigger::reconfigure`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if a new
    /// subscription cannot be acquired or its items cannot be applied.
    pub async fn update(
        &self,
        descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
    ) -> Result<()> {
        self.core
            .reconfigure(&self.manager, descriptors, sample_handler(&self.core))
            .await
    }

    /// Returns `true` while [`run`](MessageTrigger::run) is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    async fn run_attached(
        &self,
        cancel: &CancellationToken,
        fault: &CancellationToken,
    ) -> Result<()> {
        self.core
            .attach_all(&self.manager, sample_handler(&self.core))
            .await?;

        tracing::info!(
            trigger = %self.core.id(),
            subscriptions = self.core.diagnostics().subscriptions,
            "Raw trigger running"
        );
        self.core.wait(cancel, fault).await
    }
}

fn sample_handler<S: DeviceSession>(
    core: &Arc<TriggerCore<S>>,
) -> impl Fn(&Subscription<S>) -> HandlerId + Send + Sync + 'static {
    let weak = Arc::downgrade(core);
    move |subscription| {
        let weak = weak.clone();
        subscription.on_sample(move |notification| on_sample(&weak, notification))
    }
}

fn on_sample<S: DeviceSession>(core: &Weak<TriggerCore<S>>, notification: &Notification) {
    let Some(core) = core.upgrade() else {
        return;
    };
    match notification {
        Notification::Sample(sample) => {
            core.counters.record_notification(1);
            if core.emit(TriggerMessage::Sample(sample.clone())) {
                tracing::trace!(
                    trigger = %core.id(),
                    node = %sample.node_id,
                    "Forwarded sample"
                );
            }
        }
        other => core.raise_fault(ContractViolation::InvalidMessageFormat {
            subscription_id: other.subscription_id().to_string(),
            expected: NotificationKind::Sample,
            actual: other.kind(),
        }),
    }
}

impl<C: DeviceConnector> MessageTrigger for RawMessageTrigger<C> {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn subscribe(&self) -> broadcast::Receiver<TriggerMessage> {
        self.core.subscribe()
    }

    fn number_of_connection_retries(&self) -> u32 {
        self.core.number_of_connection_retries()
    }

    fn is_connection_ok(&self) -> bool {
        self.core.is_connection_ok()
    }

    fn diagnostics(&self) -> TriggerDiagnostics {
        self.core.diagnostics()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let fault = self.core.begin()?;
        let result = self.run_attached(&cancel, &fault).await;
        self.core.shutdown(&self.manager).await;
        result
    }

    async fn reconfigure(&self, config: &JobConfig) -> Result<()> {
        validate_reconfiguration(config)?;
        self.update(config.descriptors()).await
    }
}

impl<C: DeviceConnector> std::fmt::Debug for RawMessageTrigger<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMessageTrigger")
            .field("core", &self.core)
            .field("descriptors", &self.core.descriptors().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::MemoryConnector;
    use crate::subscription::{EndpointConfig, MonitoredItem, NotificationChannel};
    use crate::types::{DataValue, ValueChangeBatch};
    use std::time::Duration;

    fn descriptor(url: &str) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(EndpointConfig::new(url))
            .with_item(MonitoredItem::new("ns=2;s=A").with_display_name("a"))
    }

    fn trigger(
        descriptors: Vec<SubscriptionDescriptor>,
    ) -> (Arc<RawMessageTrigger<MemoryConnector>>, MemoryConnector) {
        let connector = MemoryConnector::new();
        let manager = Arc::new(SubscriptionManager::new(connector.clone()));
        let trigger = Arc::new(RawMessageTrigger::new("raw", descriptors, manager, 64));
        (trigger, connector)
    }

    async fn wait_attached(connector: &MemoryConnector, descriptor: &SubscriptionDescriptor) {
        for _ in 0..100 {
            if connector.feed(descriptor).is_some() && connector.modify_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("trigger did not attach");
    }

    #[tokio::test]
    async fn forwards_each_sample_in_order() {
        let d = descriptor("mem://a");
        let (trigger, connector) = trigger(vec![d.clone()]);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            let cancel = cancel.clone();
            async move { trigger.run(cancel).await }
        });
        wait_attached(&connector, &d).await;

        let feed = connector.feed(&d).unwrap();
        for value in 1..=3 {
            feed.sample("ns=2;s=A", "a", DataValue::good(value));
        }

        for expected in 1..=3 {
            let message = rx.recv().await.unwrap();
            let sample = message.as_sample().unwrap();
            assert_eq!(sample.value, DataValue::good(expected));
            assert_eq!(sample.subscription_id, d.id());
        }

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(trigger.diagnostics().messages_sent, 3);
    }

    #[tokio::test]
    async fn batch_on_sample_channel_fails_run() {
        let d = descriptor("mem://a");
        let (trigger, connector) = trigger(vec![d.clone()]);

        let run = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            async move { trigger.run(CancellationToken::new()).await }
        });
        wait_attached(&connector, &d).await;

        let feed = connector.feed(&d).unwrap();
        feed.raise(
            NotificationChannel::Sample,
            &Notification::Batch {
                subscription_id: d.id(),
                batch: ValueChangeBatch::new(),
                context: None,
            },
        );

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Contract(ContractViolation::InvalidMessageFormat {
                expected: NotificationKind::Sample,
                actual: NotificationKind::Batch,
                ..
            })
        ));
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn connect_failure_surfaces_from_run() {
        let d = descriptor("mem://a");
        let (trigger, connector) = trigger(vec![d]);
        connector.fail_connects_with(crate::error::ConnectionError::Closed);

        let err = trigger.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(!trigger.is_running());
    }

    #[tokio::test]
    async fn duplicate_descriptors_attach_once() {
        let d = descriptor("mem://a");
        let (trigger, connector) = trigger(vec![d.clone(), d.clone()]);
        assert_eq!(trigger.descriptors().len(), 1);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            let cancel = cancel.clone();
            async move { trigger.run(cancel).await }
        });
        wait_attached(&connector, &d).await;

        connector.feed(&d).unwrap().sample("ns=2;s=A", "a", DataValue::good(1));
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn update_moves_forwarding_to_new_descriptors() {
        let (a, b) = (descriptor("mem://a"), descriptor("mem://b"));
        let (trigger, connector) = trigger(vec![a.clone()]);
        let mut rx = trigger.subscribe();
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            let cancel = cancel.clone();
            async move { trigger.run(cancel).await }
        });
        wait_attached(&connector, &a).await;
        let feed_a = connector.feed(&a).unwrap();

        trigger.update(vec![b.clone()]).await.unwrap();
        assert_eq!(trigger.descriptors(), vec![b.clone()]);
        assert!(!feed_a.is_attached());
        assert_eq!(feed_a.sample("ns=2;s=A", "a", DataValue::good(1)), 0);

        connector.feed(&b).unwrap().sample("ns=2;s=A", "a", DataValue::good(2));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.as_sample().unwrap().subscription_id, b.id());

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(connector.close_count(), 2);
    }

    #[tokio::test]
    async fn failed_update_is_retried_by_the_next_one() {
        let (a, b) = (descriptor("mem://a"), descriptor("mem://b"));
        let (trigger, connector) = trigger(vec![a.clone()]);
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let trigger = Arc::clone(&trigger);
            let cancel = cancel.clone();
            async move { trigger.run(cancel).await }
        });
        wait_attached(&connector, &a).await;

        connector.fail_connects_with(crate::error::ConnectionError::Closed);
        let err = trigger.update(vec![a.clone(), b.clone()]).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(trigger.is_running());
        assert_eq!(trigger.diagnostics().subscriptions, 1);

        connector.clear_failures();
        trigger.update(vec![a.clone(), b.clone()]).await.unwrap();
        assert_eq!(trigger.diagnostics().subscriptions, 2);
        assert_eq!(connector.connect_count(), 2);

        cancel.cancel();
        run.await.unwrap().unwrap();
    }
}
