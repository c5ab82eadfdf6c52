//! Top-level orchestration of bus events and device events.
//!
//! [`Bridge::run`] consumes two channels: connection and message events from
//! the bus transport, and bind events from the device layer. Inbound messages
//! are routed by [`TopicRouter`] and handled on their own task so a slow device
//! never holds up the next message. Device events are only consumed once the
//! first connection is up.
//!
//! The event loop itself never awaits the bus. The transport may be waiting
//! for the loop to drain its event channel before it accepts more requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{BusEvent, MessageBus};
use crate::device::{DeviceEvent, DeviceId, DeviceLayer, RawStatus};
use crate::error::Result;
use crate::publisher::StatusPublisher;
use crate::scheduler::PollScheduler;
use crate::topics::{Action, TopicRouter, Topics};

/// Payload published on `B/bridge/state` once connected.
pub const STATE_ONLINE: &str = "online";

/// Payload published on `B/bridge/state` on orderly shutdown.
pub const STATE_OFFLINE: &str = "offline";

/// Lifecycle of the bus connection as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not running, or the transport has stopped.
    Disconnected,
    /// Waiting for the broker to accept the connection.
    Connecting,
    /// Subscribed and serving messages.
    Connected,
    /// The transport reported an error and is retrying.
    Error,
}

impl ConnectionState {
    /// State after the transport reports `event`.
    ///
    /// Errors move through [`ConnectionState::Error`] back to
    /// [`ConnectionState::Connecting`], since the transport retries on its own.
    #[must_use]
    pub const fn next(self, event: &BusEvent) -> Self {
        match event {
            BusEvent::Connected => Self::Connected,
            BusEvent::Error(_) => Self::Connecting,
            BusEvent::Message { .. } => self,
        }
    }
}

/// Shared handles needed to serve one action.
#[derive(Clone)]
struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    devices: Arc<dyn DeviceLayer>,
    topics: Topics,
    publisher: StatusPublisher,
}

impl Dispatcher {
    async fn dispatch(&self, action: Action) -> Result<()> {
        match action {
            Action::List => {
                let devices = self.devices.devices().await;
                let payload = serde_json::to_vec(&devices)?;
                self.bus.publish(&self.topics.devices(), payload).await?;
                Ok(())
            }
            Action::Get(device_id) => self.publisher.publish_status(&device_id).await,
            action => match (action.device_id(), action.fragment()) {
                (Some(device_id), Some(fragment)) => self.apply(device_id, fragment).await,
                _ => Ok(()),
            },
        }
    }

    async fn apply(&self, device_id: &DeviceId, fragment: RawStatus) -> Result<()> {
        debug!("Setting state of {}: {:?}", device_id, fragment);
        let snapshot = self.devices.set_device_state(device_id, fragment).await?;
        let payload = serde_json::to_vec(&snapshot)?;
        self.bus
            .publish(&self.topics.status(device_id), payload)
            .await?;
        Ok(())
    }
}

/// The bridge controller.
pub struct Bridge {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    router: TopicRouter,
    dispatcher: Dispatcher,
    scheduler: PollScheduler,
    state: ConnectionState,
    attached: bool,
}

impl Bridge {
    /// Wire a bridge for topics under `base_topic`.
    ///
    /// `poll_interval` of `None` or zero disables periodic status polling.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic router cannot be built for `base_topic`.
    pub fn new(
        base_topic: &str,
        poll_interval: Option<Duration>,
        bus: Arc<dyn MessageBus>,
        devices: Arc<dyn DeviceLayer>,
    ) -> Result<Self> {
        let topics = Topics::new(base_topic);
        let publisher = StatusPublisher::new(bus.clone(), devices.clone(), topics.clone());
        let scheduler = PollScheduler::new(
            bus.clone(),
            publisher.clone(),
            topics.clone(),
            poll_interval,
        );

        Ok(Self {
            router: TopicRouter::new(base_topic)?,
            dispatcher: Dispatcher {
                bus: bus.clone(),
                devices,
                topics: topics.clone(),
                publisher,
            },
            bus,
            topics,
            scheduler,
            state: ConnectionState::Disconnected,
            attached: false,
        })
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Topic layout used by this bridge.
    #[must_use]
    pub const fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Serve events until the bus channel closes.
    ///
    /// # Errors
    ///
    /// Individual operation failures are logged, never returned. The result is
    /// reserved for failures that stop the bridge as a whole.
    pub async fn run(
        mut self,
        mut bus_events: mpsc::Receiver<BusEvent>,
        mut device_events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> Result<()> {
        self.transition(ConnectionState::Connecting);
        let mut devices_open = true;

        loop {
            tokio::select! {
                event = bus_events.recv() => match event {
                    Some(event) => self.handle_bus_event(event),
                    None => break,
                },
                event = device_events.recv(), if self.attached && devices_open => match event {
                    Some(event) => self.handle_device_event(event),
                    None => {
                        debug!("Device event stream closed");
                        devices_open = false;
                    }
                },
            }
        }

        self.transition(ConnectionState::Disconnected);
        Ok(())
    }

    /// React to one transport event.
    pub fn handle_bus_event(&mut self, event: BusEvent) {
        let next = self.state.next(&event);
        match event {
            BusEvent::Connected => {
                self.transition(next);
                self.on_connected();
            }
            BusEvent::Error(message) => {
                error!("MQTT connection error: {}", message);
                self.transition(ConnectionState::Error);
                self.transition(next);
            }
            BusEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    /// React to one device-layer event.
    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Bound {
                device_id,
                descriptor,
            } => {
                if let Err(e) = self.scheduler.on_device_bound(&device_id, &descriptor) {
                    error!("Failed to announce device {}: {}", device_id, e);
                }
            }
        }
    }

    fn on_connected(&mut self) {
        info!("Successfully connected to MQTT server");

        let bus = self.bus.clone();
        let state_topic = self.topics.bridge_state();
        let filter = self.topics.subscription();
        tokio::spawn(async move {
            if let Err(e) = bus
                .publish(&state_topic, STATE_ONLINE.as_bytes().to_vec())
                .await
            {
                error!("Failed to publish bridge state: {}", e);
            }

            match bus.subscribe(&filter).await {
                Ok(()) => info!("Subscribed to {}", filter),
                Err(e) => error!("Failed to subscribe to {}: {}", filter, e),
            }
        });

        self.attached = true;
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        debug!(
            "MQTT message received: {} {}",
            topic,
            String::from_utf8_lossy(payload)
        );

        let action = match self.router.route(topic, payload) {
            Ok(Some(action)) => action,
            Ok(None) => return,
            Err(e) if e.is_payload_error() => {
                warn!(error_code = e.error_code(), "Dropping message on {}: {}", topic, e);
                return;
            }
            Err(e) => {
                error!(error_code = e.error_code(), "Failed to route {}: {}", topic, e);
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let device = action.device_id().map(ToString::to_string);
            if let Err(e) = dispatcher.dispatch(action).await {
                error!(
                    error_code = e.error_code(),
                    "Command for {} failed: {}",
                    device.as_deref().unwrap_or("bridge"),
                    e
                );
            }
        });
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            match next {
                ConnectionState::Error => warn!("Bridge state {:?} -> {:?}", self.state, next),
                _ => info!("Bridge state {:?} -> {:?}", self.state, next),
            }
            self.state = next;
        }
    }
}
