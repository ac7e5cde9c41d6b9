// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT sink publishing trigger output to a broker.
//!
//! Every [`TriggerMessage`] is serialized to JSON and published on one
//! configured topic with QoS 1.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use uapub_lib::protocol::{MemoryConnector, MqttSink, MqttSinkConfig};
//! use uapub_lib::subscription::SubscriptionManager;
//! use uapub_lib::trigger::{MessageTrigger, Trigger};
//! use uapub_lib::config::JobConfig;
//!
//! # async fn example(config: JobConfig) -> uapub_lib::Result<()> {
//! let manager = Arc::new(SubscriptionManager::new(MemoryConnector::new()));
//! let trigger = Trigger::from_config(&config, manager)?;
//!
//! let sink = MqttSink::connect(
//!     MqttSinkConfig::new("mqtt://192.168.1.50:1883", "plant/line-1").credentials("user", "pass"),
//! )
//! .await?;
//!
//! let cancel = CancellationToken::new();
//! let messages = trigger.subscribe();
//! let forward = tokio::spawn({
//!     let (sink, cancel) = (sink.clone(), cancel.clone());
//!     async move { sink.forward(messages, cancel).await }
//! });
//!
//! trigger.run(cancel.clone()).await?;
//! cancel.cancel();
//! # let _ = forward.await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ProtocolError;
use crate::event::TriggerMessage;

static SINK_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Connection settings of an [`MqttSink`].
#[derive(Debug, Clone)]
pub struct MqttSinkConfig {
    broker_url: String,
    topic: String,
    client_id: Option<String>,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
}

impl MqttSinkConfig {
    /// Creates settings for publishing on `topic` of the broker at `broker_url`.
    ///
    /// The URL may carry an `mqtt://` or `tcp://` scheme; the port defaults
    /// to 1883.
    #[must_use]
    pub fn new(broker_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            topic: topic.into(),
            client_id: None,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the MQTT client identifier (default: generated).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Returns the topic messages are published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Publishes trigger messages to an MQTT broker.
///
/// Cheaply cloneable; clones share one connection.
#[derive(Clone)]
pub struct MqttSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    client: AsyncClient,
    topic: String,
    host: String,
    port: u16,
    connected: AtomicBool,
    published: AtomicU64,
}

impl MqttSink {
    /// Connects to the broker and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the broker URL or topic is invalid
    /// - the connection fails
    /// - the connection times out
    pub async fn connect(config: MqttSinkConfig) -> Result<Self, ProtocolError> {
        let (host, port) = parse_broker_url(&config.broker_url)?;
        if host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }
        if config.topic.is_empty() || config.topic.contains(['+', '#']) {
            return Err(ProtocolError::InvalidAddress(format!(
                "Invalid publish topic: {:?}",
                config.topic
            )));
        }

        let client_id = config.client_id.clone().unwrap_or_else(|| {
            let counter = SINK_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("uapub_{}_{}", std::process::id(), counter)
        });

        let mut mqtt_options = MqttOptions::new(&client_id, &host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some((ref username, ref password)) = config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 64);
        let sink = Self {
            inner: Arc::new(SinkInner {
                client,
                topic: config.topic.clone(),
                host,
                port,
                connected: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();
        tokio::spawn(handle_sink_events(event_loop, sink.clone(), connack_tx));

        match tokio::time::timeout(config.connection_timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %sink.inner.host,
                    port = sink.inner.port,
                    topic = %sink.inner.topic,
                    "Connected MQTT sink"
                );
                Ok(sink)
            }
            Ok(Err(_)) => Err(ProtocolError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => {
                // Stops the event loop task on its next poll.
                let _ = sink.inner.client.try_disconnect();
                Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    config.connection_timeout.as_secs()
                )))
            }
        }
    }

    /// Returns whether the broker connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the topic messages are published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Returns the number of messages handed to the broker connection.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Publishes one message as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails or the connection is gone.
    pub async fn publish(&self, message: &TriggerMessage) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(message)?;
        self.inner
            .client
            .publish(self.inner.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await?;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            topic = %self.inner.topic,
            subscription = %message.subscription_id(),
            "Published message"
        );
        Ok(())
    }

    /// Publishes every message received on `messages` until `cancel` fires
    /// or the channel closes.
    ///
    /// Messages lost because the receiver lagged are logged and skipped.
    /// Returns the number of messages published.
    ///
    /// # Errors
    ///
    /// Returns the first publish error; forwarding stops there.
    pub async fn forward(
        &self,
        mut messages: broadcast::Receiver<TriggerMessage>,
        cancel: CancellationToken,
    ) -> Result<u64, ProtocolError> {
        let mut forwarded = 0u64;
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = messages.recv() => match received {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(topic = %self.inner.topic, skipped, "Sink lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            self.publish(&message).await?;
            forwarded += 1;
        }
        tracing::debug!(topic = %self.inner.topic, forwarded, "Sink forwarding stopped");
        Ok(forwarded)
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.inner.host,
            port = self.inner.port,
            "Disconnecting MQTT sink"
        );
        self.inner.client.disconnect().await?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for MqttSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSink")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("topic", &self.inner.topic)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn handle_sink_events(
    mut event_loop: EventLoop,
    sink: MqttSink,
    connack_tx: oneshot::Sender<()>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = Some(connack_tx);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT sink connected");
                sink.inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => {
                tracing::trace!(pkid = puback.pkid, "MQTT publish acknowledged");
            }
            Ok(Event::Incoming(Packet::Disconnect) | Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                tracing::info!("MQTT sink disconnected");
                sink.inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT sink event loop error");
                sink.inner.connected.store(false, Ordering::Release);
                break;
            }
        }
    }
}

/// Splits a broker URL into host and port.
fn parse_broker_url(url: &str) -> Result<(String, u16), ProtocolError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = MqttSinkConfig::new("mqtt://localhost", "plant/line");
        assert_eq!(config.topic(), "plant/line");
        assert!(config.client_id.is_none());
        assert!(config.credentials.is_none());
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_chain() {
        let config = MqttSinkConfig::new("mqtt://localhost", "t")
            .client_id("sink-1")
            .credentials("admin", "secret")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(2));

        assert_eq!(config.client_id.as_deref(), Some("sink-1"));
        assert_eq!(
            config.credentials,
            Some(("admin".to_string(), "secret".to_string()))
        );
        assert_eq!(config.keep_alive, Duration::from_secs(45));
        assert_eq!(config.connection_timeout, Duration::from_secs(2));
    }

    #[test]
    fn parse_broker_url_with_scheme() {
        let (host, port) = parse_broker_url("mqtt://192.168.1.50:1883").unwrap();
        assert_eq!(host, "192.168.1.50");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_broker_url_tcp_scheme() {
        let (host, port) = parse_broker_url("tcp://broker.local:8883").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 8883);
    }

    #[test]
    fn parse_broker_url_default_port() {
        let (host, port) = parse_broker_url("localhost").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_broker_url_bad_port() {
        assert!(matches!(
            parse_broker_url("mqtt://localhost:abc"),
            Err(ProtocolError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn connect_rejects_missing_host() {
        let err = MqttSink::connect(MqttSinkConfig::new("mqtt://", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn connect_rejects_wildcard_topic() {
        let err = MqttSink::connect(MqttSinkConfig::new("localhost", "plant/#"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAddress(_)));
    }
}
