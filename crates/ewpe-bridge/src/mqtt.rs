//! MQTT transport backed by `rumqttc`.
//!
//! [`connect`] builds the client, spawns a task pumping the `rumqttc` event
//! loop and returns the [`MqttBus`] handle together with the channel of
//! [`BusEvent`]s the bridge consumes. Reconnecting is left to `rumqttc`,
//! which retries on the next poll after an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ewpe_core::{BridgeConfig, BusError, BusEvent, BusResult, MessageBus, Topics, STATE_OFFLINE};
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay before polling the event loop again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Keep-alive interval negotiated with the broker.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the request and event channels.
const CHANNEL_CAPACITY: usize = 64;

/// Errors raised while setting up the MQTT transport.
#[derive(Debug, Error)]
pub enum MqttError {
    /// The server address could not be parsed.
    #[error("Invalid MQTT server address '{0}'")]
    InvalidServer(String),

    /// The server address uses a scheme this transport cannot speak.
    #[error("Unsupported MQTT scheme '{scheme}' in '{server}'. Use mqtt:// or tcp://.")]
    UnsupportedScheme {
        /// Scheme found in the address.
        scheme: String,
        /// Full address as configured.
        server: String,
    },
}

/// Host and port of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Parse `mqtt://host[:port]`, `tcp://host[:port]` or a bare `host[:port]`.
///
/// A port in the address wins over `default_port`.
///
/// # Errors
///
/// Returns [`MqttError`] for unknown schemes, empty hosts or bad ports.
pub fn broker_endpoint(server: &str, default_port: u16) -> Result<BrokerEndpoint, MqttError> {
    let trimmed = server.trim();
    let rest = match trimmed.split_once("://") {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("mqtt") || scheme.eq_ignore_ascii_case("tcp") =>
        {
            rest
        }
        Some((scheme, _)) => {
            return Err(MqttError::UnsupportedScheme {
                scheme: scheme.to_string(),
                server: server.to_string(),
            })
        }
        None => trimmed,
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| MqttError::InvalidServer(server.to_string()))?;
            (host, port)
        }
        None => (authority, default_port),
    };

    if host.is_empty() {
        return Err(MqttError::InvalidServer(server.to_string()));
    }

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
    })
}

/// Build the `rumqttc` options for `config`.
///
/// # Errors
///
/// Returns [`MqttError`] if the server address is invalid.
pub fn mqtt_options(config: &BridgeConfig) -> Result<MqttOptions, MqttError> {
    let endpoint = broker_endpoint(&config.mqtt_server, config.mqtt_port)?;
    let client_id = format!("ewpe-bridge-{}", Uuid::new_v4());

    let mut options = MqttOptions::new(client_id, endpoint.host, endpoint.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        Topics::new(config.mqtt_base_topic.as_str()).bridge_state(),
        STATE_OFFLINE,
        QoS::AtMostOnce,
        false,
    ));

    if !config.mqtt_username.is_empty() {
        options.set_credentials(config.mqtt_username.as_str(), config.mqtt_password.as_str());
    }

    Ok(options)
}

/// [`MessageBus`] implementation over a `rumqttc` client.
#[derive(Debug, Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Ask the client to send a DISCONNECT and stop the event loop.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] if the event loop is already gone.
    pub async fn disconnect(&self) -> BusResult<()> {
        self.client.disconnect().await.map_err(|_| BusError::Closed)
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> BusResult<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BusError::PublishFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, filter: &str) -> BusResult<()> {
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| BusError::SubscribeFailed {
                filter: filter.to_string(),
                message: e.to_string(),
            })
    }
}

/// A live MQTT transport.
pub struct MqttConnection {
    /// Handle used for publishing and subscribing.
    pub bus: Arc<MqttBus>,
    /// Connection and message events for the bridge.
    pub events: mpsc::Receiver<BusEvent>,
    /// Task pumping the `rumqttc` event loop.
    pub pump: JoinHandle<()>,
}

/// Create the client and start pumping its event loop.
///
/// Must be called from within a Tokio runtime. The connection itself is
/// established asynchronously; [`BusEvent::Connected`] marks success.
///
/// # Errors
///
/// Returns [`MqttError`] if the server address is invalid.
pub fn connect(config: &BridgeConfig) -> Result<MqttConnection, MqttError> {
    let options = mqtt_options(config)?;
    info!(
        "Trying to connect to MQTT server {}:{} ...",
        options.broker_address().0,
        options.broker_address().1
    );

    let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);
    let (events_tx, events) = mpsc::channel(CHANNEL_CAPACITY);
    let pump = tokio::spawn(pump_events(eventloop, events_tx));

    Ok(MqttConnection {
        bus: Arc::new(MqttBus { client }),
        events,
        pump,
    })
}

/// What the pump should do with one event-loop notification.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Forward(BusEvent),
    Skip,
    Stop,
}

fn translate(notification: Event) -> Step {
    match notification {
        Event::Incoming(Packet::ConnAck(_)) => Step::Forward(BusEvent::Connected),
        Event::Incoming(Packet::Publish(publish)) => Step::Forward(BusEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Event::Outgoing(Outgoing::Disconnect) => Step::Stop,
        _ => Step::Skip,
    }
}

async fn pump_events(mut eventloop: EventLoop, events: mpsc::Sender<BusEvent>) {
    loop {
        let step = match eventloop.poll().await {
            Ok(notification) => translate(notification),
            Err(ConnectionError::RequestsDone) => Step::Stop,
            Err(e) => {
                warn!("MQTT event loop error: {}", e);
                if events.send(BusEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        match step {
            Step::Forward(event) => {
                if events.send(event).await.is_err() {
                    debug!("Bridge stopped listening, closing MQTT event loop");
                    break;
                }
            }
            Step::Skip => {}
            Step::Stop => break,
        }
    }
    info!("MQTT connection closed");
}
