//! Session controller
//!
//! Owns the connection state machine and the session's shared state: the
//! identity, the active transmit frequency and the receive-authorization
//! table. Transport events come in through [`SessionController::handle_transport_event`]
//! (normally driven by [`SessionController::spawn_event_pump`]); encoded audio
//! comes in through the sink registered with the audio engine.
//!
//! Operations whose preconditions fail are silent no-ops. Callers are
//! expected to disable the corresponding controls instead.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::AudioEngine;
use crate::constants::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, HEARTBEAT_INTERVAL_SECS};
use crate::network::{ServerEndpoint, Transport, TransportEvent};
use crate::protocol::{serialize_packet, ControlMessage, MessageType, VoicePacket};
use crate::session::activity::ActivityMonitor;
use crate::session::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::session::radio::RadioControl;
use crate::session::state::{format_mhz, ConnectionState, SessionIdentity, StationInfo};

/// Construction-time session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub endpoint: ServerEndpoint,
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: ServerEndpoint {
                host: "127.0.0.1".to_string(),
                tcp_port: DEFAULT_TCP_PORT,
                udp_port: DEFAULT_UDP_PORT,
            },
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        }
    }
}

// Active frequency and transmitter share one atomic so the capture callback
// never sees a torn pair.
fn pack_active(frequency: u32, transmitter: u8) -> u64 {
    ((transmitter as u64) << 32) | frequency as u64
}

fn unpack_active(value: u64) -> (u32, u8) {
    (value as u32, (value >> 32) as u8)
}

pub struct SessionController {
    this: Weak<SessionController>,
    transport: Arc<dyn Transport>,
    audio: Arc<dyn AudioEngine>,
    config: SessionConfig,
    runtime: Handle,
    state: AtomicU8,
    /// Id of the newest transport connection; events for older ones are stale
    connection: AtomicU64,
    active: AtomicU64,
    receive_flags: DashMap<u32, bool>,
    identity: RwLock<SessionIdentity>,
    station: RwLock<StationInfo>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
    activity: ActivityMonitor,
}

impl SessionController {
    /// Create a controller and register it as the audio engine's encoded sink
    pub fn new(
        transport: Arc<dyn Transport>,
        audio: Arc<dyn AudioEngine>,
        config: SessionConfig,
        runtime: Handle,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let controller = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            transport,
            audio,
            config,
            runtime,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            connection: AtomicU64::new(0),
            active: AtomicU64::new(0),
            receive_flags: DashMap::new(),
            identity: RwLock::new(SessionIdentity::default()),
            station: RwLock::new(StationInfo::default()),
            heartbeat: Mutex::new(None),
            events,
            activity: ActivityMonitor::default(),
        });

        let sink_owner = Arc::downgrade(&controller);
        controller.audio.set_encoded_sink(Some(Arc::new(move |frame: Bytes| {
            if let Some(session) = sink_owner.upgrade() {
                session.encoded_audio_produced(frame);
            }
        })));

        controller
    }

    /// Feed transport events into the controller until the channel closes
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        self.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.handle_transport_event(event);
            }
            tracing::debug!("Transport event pump stopped");
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ready, with both cid and callsign known
    pub fn is_ready(&self) -> bool {
        self.ready_station().is_some()
    }

    pub fn active_frequency(&self) -> u32 {
        unpack_active(self.active.load(Ordering::SeqCst)).0
    }

    pub fn active_transmitter(&self) -> u8 {
        unpack_active(self.active.load(Ordering::SeqCst)).1
    }

    pub fn receive_enabled(&self, frequency: u32) -> bool {
        self.receive_flags.get(&frequency).map(|flag| *flag).unwrap_or(false)
    }

    pub fn cid(&self) -> Option<i32> {
        self.identity.read().cid
    }

    pub fn callsign(&self) -> Option<String> {
        self.identity.read().callsign.clone()
    }

    /// Home frequency announced by the welcome message (0 if none)
    pub fn main_frequency(&self) -> u32 {
        self.station.read().main_frequency
    }

    /// Whether the welcome message identified us as a controller position
    pub fn is_controller(&self) -> bool {
        self.station.read().is_controller
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn set_cid(&self, cid: i32) {
        self.update_identity(|identity| identity.cid = Some(cid));
    }

    pub fn set_callsign(&self, callsign: impl Into<String>) {
        let callsign = callsign.into();
        self.update_identity(|identity| identity.callsign = Some(callsign));
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.update_identity(|identity| identity.token = Some(token));
    }

    fn update_identity<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionIdentity),
    {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            tracing::warn!(%state, "Session identity is read-only while connected");
            return;
        }
        f(&mut self.identity.write());
    }

    /// Connect to the configured server with the stored token
    pub fn connect(&self) {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            tracing::warn!(%state, "Already connected or connecting");
            return;
        }

        let token = self.identity.read().token.clone().filter(|t| !t.is_empty());
        let Some(token) = token else {
            tracing::error!("Cannot connect without an authentication token");
            self.emit(SessionEvent::Error("No authentication token".to_string()));
            return;
        };

        self.set_state(ConnectionState::Connecting);
        let id = self.transport.connect(self.config.endpoint.clone(), token);
        // The transport may already have reported on this id
        self.connection.fetch_max(id, Ordering::SeqCst);
    }

    /// Tell the server we are leaving, then tear the session down locally
    pub fn disconnect(&self) {
        self.transport.send_control(self.control_message(MessageType::Disconnect));
        self.teardown();
    }

    pub fn switch_frequency(&self, frequency: u32, transmitter: u8) {
        let Some((cid, callsign)) = self.ready_station() else {
            return;
        };

        self.active
            .store(pack_active(frequency, transmitter), Ordering::SeqCst);
        self.emit(SessionEvent::FrequencyChanged(frequency));

        tracing::info!(transmitter, "Switch to {}", format_mhz(frequency));
        let message = ControlMessage::new(MessageType::Switch, cid, callsign)
            .with_transmitter(transmitter)
            .with_data(frequency.to_string());
        self.transport.send_control(message);
    }

    pub fn clear_frequency(&self) {
        if !self.is_ready() {
            return;
        }
        self.active.store(0, Ordering::SeqCst);
        self.emit(SessionEvent::FrequencyChanged(0));
        tracing::info!("Transmit frequency cleared");
    }

    pub fn send_text_message(&self, target: &str, text: &str) {
        let Some((cid, callsign)) = self.ready_station() else {
            return;
        };
        let message = ControlMessage::new(MessageType::Message, cid, callsign)
            .with_data(format!("{}:{}", target, text));
        self.transport.send_control(message);
    }

    pub fn set_ptt(&self, active: bool) {
        self.audio.set_ptt(active);
    }

    /// Allow or block playback of voice received on `frequency`
    pub fn set_transmitter_receive_flag(&self, frequency: u32, enabled: bool) {
        if enabled {
            tracing::info!("Start listening frequency {}", format_mhz(frequency));
        } else {
            tracing::info!("Stop listening frequency {}", format_mhz(frequency));
        }
        self.receive_flags.insert(frequency, enabled);
    }

    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected {
                connection,
                connected,
            } => {
                let current = self.connection.fetch_max(connection, Ordering::SeqCst);
                if connection < current {
                    tracing::debug!(
                        connection,
                        current,
                        connected,
                        "Ignoring stale connection event"
                    );
                    return;
                }
                if connected {
                    self.transport_up();
                } else {
                    self.stop_heartbeat();
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            TransportEvent::Control(message) => self.handle_control_message(message),
            TransportEvent::Voice(packet) => self.handle_voice_packet(packet),
            TransportEvent::Error(error) => self.emit(SessionEvent::Error(error)),
        }
    }

    fn transport_up(&self) {
        // Only a pending connect advances; the welcome message promotes to Ready
        let advanced = self
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if advanced {
            tracing::info!(
                from = %ConnectionState::Connecting,
                to = %ConnectionState::Connected,
                "Connection state changed"
            );
            self.emit(SessionEvent::StateChanged(ConnectionState::Connected));
        } else {
            tracing::debug!(state = %self.state(), "Transport up without a pending connect, ignoring");
        }
    }

    /// Sink for encoded capture frames. Runs on the capture thread.
    pub fn encoded_audio_produced(&self, frame: Bytes) {
        if self.state() != ConnectionState::Ready {
            return;
        }
        let (frequency, transmitter) = unpack_active(self.active.load(Ordering::SeqCst));
        if frequency == 0 {
            return;
        }

        let datagram = {
            // Never block the capture thread on an identity writer
            let Some(identity) = self.identity.try_read() else {
                return;
            };
            let Some((cid, callsign)) = identity.station() else {
                return;
            };
            match serialize_packet(cid, transmitter, frequency, callsign, &frame) {
                Ok(datagram) => datagram,
                Err(e) => {
                    tracing::warn!("Failed to build voice packet: {}", e);
                    return;
                }
            }
        };

        self.activity.record_sent();
        self.emit(SessionEvent::VoiceSent);
        self.transport.send_voice(datagram);
    }

    fn handle_control_message(&self, message: ControlMessage) {
        self.emit(SessionEvent::MessageReceived(message.clone()));

        match message.kind {
            MessageType::Error => {
                tracing::error!("Server error: {}", message.data);
                self.emit(SessionEvent::Error(message.data));
            }
            MessageType::Pong => tracing::debug!("Received pong from server"),
            MessageType::Message if message.is_welcome() => self.handle_welcome(&message.data),
            MessageType::Disconnect => {
                tracing::info!("Server requested disconnect");
                self.teardown();
            }
            _ => {}
        }
    }

    /// `SERVER:<callsign>:Welcome...[:<main frequency>]`
    fn handle_welcome(&self, data: &str) {
        let fields: Vec<&str> = data.split(':').collect();
        if let Some(callsign) = fields.get(1) {
            self.identity.write().callsign = Some(callsign.to_string());
        }

        self.start_heartbeat();
        if let Err(e) = self.audio.start_capture() {
            tracing::error!("Failed to start recording: {}", e);
            self.emit(SessionEvent::Error(format!("Failed to start recording: {}", e)));
        }
        if let Err(e) = self.audio.start_playback() {
            tracing::error!("Failed to start playback: {}", e);
            self.emit(SessionEvent::Error(format!("Failed to start playback: {}", e)));
        }

        if fields.len() == 4 {
            match fields[3].trim().parse::<u32>() {
                Ok(main_frequency) => {
                    *self.station.write() = StationInfo {
                        main_frequency,
                        is_controller: true,
                    };
                }
                Err(e) => tracing::warn!("Invalid main frequency in welcome message: {}", e),
            }
        }

        self.set_state(ConnectionState::Ready);
        tracing::info!("Identity verification passed");

        // Zero-length liveness frame
        self.encoded_audio_produced(Bytes::new());
    }

    fn handle_voice_packet(&self, packet: VoicePacket) {
        if !self.receive_enabled(packet.frequency) {
            tracing::trace!(
                frequency = packet.frequency,
                callsign = %packet.callsign,
                "Dropping voice on unmonitored frequency"
            );
            return;
        }

        self.activity.record_received();
        self.audio.enqueue_for_playback(packet.payload.clone());
        self.emit(SessionEvent::VoiceReceived(packet));
    }

    fn teardown(&self) {
        self.stop_heartbeat();
        self.audio.stop_capture();
        self.audio.stop_playback();
        self.transport.disconnect();
        self.set_state(ConnectionState::Disconnected);
    }

    fn start_heartbeat(&self) {
        let session = self.this.clone();
        let period = self.config.heartbeat_interval;

        let task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.send_heartbeat();
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(task) {
            previous.abort();
        }
        tracing::debug!(interval = ?period, "Heartbeat started");
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
            tracing::debug!("Heartbeat stopped");
        }
    }

    fn send_heartbeat(&self) {
        let Some((cid, callsign)) = self.ready_station() else {
            return;
        };
        let message = ControlMessage::new(MessageType::Ping, cid, callsign)
            .with_data(chrono::Utc::now().timestamp().to_string());
        tracing::trace!("Sending heartbeat");
        self.transport.send_control(message);
    }

    fn ready_station(&self) -> Option<(i32, String)> {
        if self.state() != ConnectionState::Ready {
            return None;
        }
        self.identity
            .read()
            .station()
            .map(|(cid, callsign)| (cid, callsign.to_string()))
    }

    fn control_message(&self, kind: MessageType) -> ControlMessage {
        let identity = self.identity.read();
        ControlMessage::new(
            kind,
            identity.cid.unwrap_or_default(),
            identity.callsign.clone().unwrap_or_default(),
        )
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Connection state changed");
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl RadioControl for SessionController {
    fn set_receive(&self, frequency: u32, enabled: bool) {
        self.set_transmitter_receive_flag(frequency, enabled);
    }

    fn switch_transmit(&self, frequency: u32, transmitter: u8) {
        self.switch_frequency(frequency, transmitter);
    }

    fn clear_transmit(&self) {
        self.clear_frequency();
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.get_mut().take() {
            task.abort();
        }
    }
}
