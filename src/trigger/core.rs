// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plumbing shared by both trigger variants.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::TriggerDiagnostics;
use crate::config::JobConfig;
use crate::error::{ConfigError, ContractViolation, Error, Result};
use crate::event::{MessageBus, TriggerMessage};
use crate::protocol::{DeviceConnector, DeviceSession};
use crate::subscription::{HandlerId, Subscription, SubscriptionDescriptor, SubscriptionManager};

/// Removes equal descriptors, keeping the first occurrence.
pub(crate) fn dedup_descriptors(
    descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
) -> Vec<SubscriptionDescriptor> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

/// Checks a job used to reconfigure a trigger.
///
/// A job without datasets is accepted: it releases every subscription.
pub(crate) fn validate_reconfiguration(config: &JobConfig) -> Result<()> {
    match config.validate() {
        Ok(()) | Err(ConfigError::NoDataSets) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Emission
// =============================================================================

#[derive(Debug, Default)]
struct EmitterState {
    next_sequence_number: u32,
    stopped: bool,
}

// =============================================================================
// Faults
// =============================================================================

/// Records the first contract violation of a run and wakes the run loop.
#[derive(Debug, Default)]
struct FaultSignal {
    token: CancellationToken,
    violation: Option<ContractViolation>,
}

// =============================================================================
// Counters
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) value_changes: AtomicU64,
    pub(crate) data_changes: AtomicU64,
    pub(crate) messages_sent: AtomicU64,
    pub(crate) keyframes_sent: AtomicU64,
}

impl Counters {
    pub(crate) fn record_notification(&self, values: usize) {
        self.data_changes.fetch_add(1, Ordering::Relaxed);
        self.value_changes
            .fetch_add(u64::try_from(values).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_keyframe(&self) {
        self.keyframes_sent.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Attachments
// =============================================================================

struct Attachment<S: DeviceSession> {
    subscription: Arc<Subscription<S>>,
    handler: HandlerId,
}

impl<S: DeviceSession> Attachment<S> {
    fn descriptor(&self) -> &SubscriptionDescriptor {
        self.subscription.descriptor()
    }
}

/// State of a trigger shared with its subscription handlers and timers.
///
/// Attaching, reconfiguring and shutting down are serialized by the
/// lifecycle lock, whose flag is `true` while handlers are attached.
pub(crate) struct TriggerCore<S: DeviceSession> {
    id: String,
    bus: MessageBus,
    running: AtomicBool,
    emitter: Mutex<EmitterState>,
    fault: Mutex<FaultSignal>,
    descriptors: RwLock<Vec<SubscriptionDescriptor>>,
    lifecycle: tokio::sync::Mutex<bool>,
    attachments: RwLock<Vec<Attachment<S>>>,
    pub(crate) counters: Counters,
}

impl<S: DeviceSession> TriggerCore<S> {
    pub(crate) fn new(
        id: String,
        descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            id,
            bus: MessageBus::with_capacity(channel_capacity),
            running: AtomicBool::new(false),
            emitter: Mutex::new(EmitterState::default()),
            fault: Mutex::new(FaultSignal::default()),
            descriptors: RwLock::new(dedup_descriptors(descriptors)),
            lifecycle: tokio::sync::Mutex::new(false),
            attachments: RwLock::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Returns the distinct descriptors the trigger observes.
    pub(crate) fn descriptors(&self) -> Vec<SubscriptionDescriptor> {
        self.descriptors.read().clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TriggerMessage> {
        self.bus.subscribe()
    }

    // -------------------------------------------------------------------------
    // Emission
    // -------------------------------------------------------------------------

    /// Assigns the next sequence number and publishes the message `build`
    /// produces for it, in one critical section.
    ///
    /// The sequence number is consumed only if a message was published.
    /// Returns `None` when stopped or when `build` declined.
    pub(crate) fn emit_sequenced<F>(&self, build: F) -> Option<u32>
    where
        F: FnOnce(u32) -> Option<TriggerMessage>,
    {
        let mut emitter = self.emitter.lock();
        if emitter.stopped {
            return None;
        }
        let sequence_number = emitter.next_sequence_number;
        let message = build(sequence_number)?;
        self.bus.publish(message);
        emitter.next_sequence_number = sequence_number.wrapping_add(1);
        self.counters.record_message();
        Some(sequence_number)
    }

    /// Publishes a message without sequencing. Returns `false` when stopped.
    pub(crate) fn emit(&self, message: TriggerMessage) -> bool {
        let emitter = self.emitter.lock();
        if emitter.stopped {
            return false;
        }
        self.bus.publish(message);
        drop(emitter);
        self.counters.record_message();
        true
    }

    // -------------------------------------------------------------------------
    // Faults
    // -------------------------------------------------------------------------

    /// Records a contract violation; the run loop ends with it as its error.
    pub(crate) fn raise_fault(&self, violation: ContractViolation) {
        let mut fault = self.fault.lock();
        tracing::error!(trigger = %self.id, error = %violation, "Contract violation");
        if fault.violation.is_none() {
            fault.violation = Some(violation);
        }
        fault.token.cancel();
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Marks the trigger running and resets per-run state.
    ///
    /// Returns the token cancelled when a fault is raised during this run.
    pub(crate) fn begin(&self) -> Result<CancellationToken> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        *self.emitter.lock() = EmitterState::default();
        let mut fault = self.fault.lock();
        *fault = FaultSignal::default();
        Ok(fault.token.clone())
    }

    /// Attaches a handler to the subscription of every descriptor.
    pub(crate) async fn attach_all<C, R>(
        &self,
        manager: &SubscriptionManager<C>,
        register: R,
    ) -> Result<()>
    where
        C: DeviceConnector<Session = S>,
        R: Fn(&Subscription<S>) -> HandlerId + Send + Sync,
    {
        let mut live = self.lifecycle.lock().await;
        *live = true;
        for descriptor in self.descriptors() {
            self.attach(manager, &descriptor, &register).await?;
        }
        Ok(())
    }

    /// Replaces the observed descriptors.
    ///
    /// While handlers are attached, subscriptions of dropped descriptors are
    /// released and new descriptors are attached; subscriptions of kept
    /// descriptors are left untouched. Otherwise the new descriptors only
    /// take effect on the next run.
    ///
    /// A descriptor that fails to attach stays configured and is retried by
    /// the next reconfiguration.
    pub(crate) async fn reconfigure<C, R>(
        &self,
        manager: &SubscriptionManager<C>,
        descriptors: impl IntoIterator<Item = SubscriptionDescriptor>,
        register: R,
    ) -> Result<()>
    where
        C: DeviceConnector<Session = S>,
        R: Fn(&Subscription<S>) -> HandlerId + Send + Sync,
    {
        let descriptors = dedup_descriptors(descriptors);
        let live = self.lifecycle.lock().await;
        self.descriptors.write().clone_from(&descriptors);
        if !*live {
            tracing::debug!(
                trigger = %self.id,
                subscriptions = descriptors.len(),
                "Trigger reconfigured while idle"
            );
            return Ok(());
        }

        let dropped: Vec<Attachment<S>> = {
            let mut attachments = self.attachments.write();
            let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut *attachments)
                .into_iter()
                .partition(|a| descriptors.contains(a.descriptor()));
            *attachments = kept;
            dropped
        };
        let removed = dropped.len();
        for attachment in dropped {
            self.detach(manager, attachment).await;
        }

        let mut added = 0;
        for descriptor in &descriptors {
            if self.attach(manager, descriptor, &register).await? {
                added += 1;
            }
        }

        tracing::info!(
            trigger = %self.id,
            added,
            removed,
            subscriptions = descriptors.len(),
            "Trigger reconfigured"
        );
        Ok(())
    }

    /// Acquires the shared subscription for `descriptor`, attaches a handler
    /// to it and applies its monitored items.
    ///
    /// Returns `false` if the descriptor is already attached. On failure
    /// nothing stays attached.
    async fn attach<C, R>(
        &self,
        manager: &SubscriptionManager<C>,
        descriptor: &SubscriptionDescriptor,
        register: &R,
    ) -> Result<bool>
    where
        C: DeviceConnector<Session = S>,
        R: Fn(&Subscription<S>) -> HandlerId + Send + Sync,
    {
        let attached = self
            .attachments
            .read()
            .iter()
            .any(|a| a.descriptor() == descriptor);
        if attached {
            return Ok(false);
        }

        let subscription = manager.get_or_create(descriptor).await?;
        let attachment = Attachment {
            handler: register(&subscription),
            subscription: Arc::clone(&subscription),
        };
        if let Err(e) = subscription.apply(&descriptor.items).await {
            self.detach(manager, attachment).await;
            return Err(e.into());
        }
        self.attachments.write().push(attachment);
        tracing::debug!(
            trigger = %self.id,
            subscription = %subscription.id(),
            "Attached to subscription"
        );
        Ok(true)
    }

    async fn detach<C>(&self, manager: &SubscriptionManager<C>, attachment: Attachment<S>)
    where
        C: DeviceConnector<Session = S>,
    {
        attachment.subscription.unsubscribe(attachment.handler);
        manager.release(&attachment.subscription).await;
        tracing::debug!(
            trigger = %self.id,
            subscription = %attachment.subscription.id(),
            "Detached from subscription"
        );
    }

    /// Waits until `cancel` is cancelled or a fault is raised.
    pub(crate) async fn wait(
        &self,
        cancel: &CancellationToken,
        fault: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            () = fault.cancelled() => match self.fault.lock().violation.take() {
                Some(violation) => Err(violation.into()),
                None => Ok(()),
            },
            () = cancel.cancelled() => Ok(()),
        }
    }

    /// Stops emission, detaches every handler and releases every subscription.
    ///
    /// Once this returns no handler of this trigger is running and nothing
    /// more is published.
    pub(crate) async fn shutdown<C>(&self, manager: &SubscriptionManager<C>)
    where
        C: DeviceConnector<Session = S>,
    {
        self.emitter.lock().stopped = true;
        let mut live = self.lifecycle.lock().await;
        *live = false;

        let attachments = std::mem::take(&mut *self.attachments.write());
        for attachment in &attachments {
            attachment.subscription.unsubscribe(attachment.handler);
        }
        for attachment in attachments {
            manager.release(&attachment.subscription).await;
        }
        drop(live);

        self.running.store(false, Ordering::Release);
        tracing::info!(trigger = %self.id, "Trigger stopped");
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Returns the subscriptions currently owned by the trigger.
    pub(crate) fn subscriptions(&self) -> Vec<Arc<Subscription<S>>> {
        self.attachments
            .read()
            .iter()
            .map(|a| Arc::clone(&a.subscription))
            .collect()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn number_of_connection_retries(&self) -> u32 {
        self.attachments
            .read()
            .iter()
            .map(|a| a.subscription.number_of_connection_retries())
            .fold(0, u32::saturating_add)
    }

    pub(crate) fn is_connection_ok(&self) -> bool {
        let attachments = self.attachments.read();
        !attachments.is_empty() && attachments.iter().all(|a| a.subscription.context().is_some())
    }

    fn node_health(&self) -> (usize, usize) {
        self.attachments.read().iter().fold((0, 0), |(good, bad), a| {
            (
                good + a.subscription.number_of_good_nodes(),
                bad + a.subscription.number_of_bad_nodes(),
            )
        })
    }

    pub(crate) fn diagnostics(&self) -> TriggerDiagnostics {
        let (good_nodes, bad_nodes) = self.node_health();
        TriggerDiagnostics {
            value_changes: self.counters.value_changes.load(Ordering::Relaxed),
            data_changes: self.counters.data_changes.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            keyframes_sent: self.counters.keyframes_sent.load(Ordering::Relaxed),
            connection_retries: self.number_of_connection_retries(),
            subscriptions: self.attachments.read().len(),
            good_nodes,
            bad_nodes,
        }
    }
}

impl<S: DeviceSession> std::fmt::Debug for TriggerCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerCore")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("subscriptions", &self.attachments.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use crate::protocol::{MemoryConnector, MemorySession};
    use crate::subscription::{EndpointConfig, MonitoredItem, NotificationKind};
    use crate::types::{DataValue, MonitoredItemSample};

    fn descriptor(url: &str) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(EndpointConfig::new(url))
            .with_item(MonitoredItem::new("ns=2;s=A").with_display_name("a"))
    }

    fn noop(subscription: &Subscription<MemorySession>) -> HandlerId {
        subscription.on_batch(|_| {})
    }

    fn core() -> TriggerCore<MemorySession> {
        TriggerCore::new("job".to_string(), Vec::new(), 16)
    }

    fn sample() -> TriggerMessage {
        TriggerMessage::Sample(MonitoredItemSample::new("s", "n", "a", DataValue::good(1)))
    }

    #[test]
    fn sequence_numbers_are_consecutive() {
        let core = core();
        core.begin().unwrap();
        let mut rx = core.subscribe();

        assert_eq!(core.emit_sequenced(|_| Some(sample())), Some(0));
        assert_eq!(core.emit_sequenced(|_| None), None);
        assert_eq!(core.emit_sequenced(|_| Some(sample())), Some(1));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(core.diagnostics().messages_sent, 2);
    }

    #[test]
    fn begin_resets_sequence_and_rejects_reentry() {
        let core = core();
        core.begin().unwrap();
        core.emit_sequenced(|_| Some(sample()));
        assert!(matches!(core.begin(), Err(Error::AlreadyRunning)));

        core.running.store(false, Ordering::Release);
        core.begin().unwrap();
        assert_eq!(core.emit_sequenced(|_| Some(sample())), Some(0));
    }

    #[tokio::test]
    async fn stopped_core_emits_nothing() {
        let manager = SubscriptionManager::new(MemoryConnector::new());
        let core = core();
        core.begin().unwrap();
        core.shutdown(&manager).await;

        assert_eq!(core.emit_sequenced(|_| Some(sample())), None);
        assert!(!core.emit(sample()));
        assert!(!core.is_running());
    }

    #[tokio::test]
    async fn fault_ends_wait_with_error() {
        let core = core();
        let fault = core.begin().unwrap();
        core.raise_fault(ContractViolation::InvalidMessageFormat {
            subscription_id: "s".to_string(),
            expected: NotificationKind::Batch,
            actual: NotificationKind::Sample,
        });

        let result = core.wait(&CancellationToken::new(), &fault).await;
        assert!(matches!(result, Err(Error::Contract(_))));
    }

    #[tokio::test]
    async fn cancellation_ends_wait_cleanly() {
        let core = core();
        let fault = core.begin().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(core.wait(&cancel, &fault).await.is_ok());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = SubscriptionDescriptor::new(EndpointConfig::new("mem://a"))
            .with_item(MonitoredItem::new("n"));
        let b = SubscriptionDescriptor::new(EndpointConfig::new("mem://b"))
            .with_item(MonitoredItem::new("n"));

        let unique = dedup_descriptors(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(unique, vec![a, b]);
    }

    #[tokio::test]
    async fn idle_reconfigure_only_replaces_descriptors() {
        let connector = MemoryConnector::new();
        let manager = SubscriptionManager::new(connector.clone());
        let core = TriggerCore::new("job".to_string(), vec![descriptor("mem://a")], 16);

        let b = descriptor("mem://b");
        core.reconfigure(&manager, vec![b.clone(), b.clone()], noop)
            .await
            .unwrap();

        assert_eq!(core.descriptors(), vec![b]);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn live_reconfigure_attaches_new_and_releases_dropped() {
        let connector = MemoryConnector::new();
        let manager = SubscriptionManager::new(connector.clone());
        let (a, b, c) = (
            descriptor("mem://a"),
            descriptor("mem://b"),
            descriptor("mem://c"),
        );
        let core = TriggerCore::new("job".to_string(), vec![a.clone(), b.clone()], 16);
        core.begin().unwrap();
        core.attach_all(&manager, noop).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        let feed_a = connector.feed(&a).unwrap();
        let feed_b = connector.feed(&b).unwrap();

        core.reconfigure(&manager, vec![b.clone(), c.clone()], noop)
            .await
            .unwrap();
        assert_eq!(connector.connect_count(), 3);
        assert_eq!(connector.close_count(), 1);
        assert!(!feed_a.is_attached());
        assert!(feed_b.is_attached());
        assert_eq!(core.diagnostics().subscriptions, 2);

        core.reconfigure(&manager, Vec::new(), noop).await.unwrap();
        assert_eq!(core.diagnostics().subscriptions, 0);
        assert_eq!(manager.subscription_count(), 0);

        core.shutdown(&manager).await;
        assert_eq!(connector.close_count(), 3);
    }

    #[tokio::test]
    async fn failed_attach_leaves_nothing_attached() {
        let connector = MemoryConnector::new();
        connector.fail_modifications_with(ConnectionError::Rejected("bad node".to_string()));
        let manager = SubscriptionManager::new(connector.clone());
        let core = TriggerCore::new("job".to_string(), vec![descriptor("mem://a")], 16);
        core.begin().unwrap();

        let err = core.attach_all(&manager, noop).await.unwrap_err();
        assert!(matches!(err, Error::Connection(ConnectionError::Rejected(_))));
        assert_eq!(core.diagnostics().subscriptions, 0);
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(connector.close_count(), 1);
    }
}
