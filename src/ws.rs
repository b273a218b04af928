//! Websocket session to the backend.
//!
//! ```text
//!            ┌─ config changed / Closed / Disconnected / Error ─┐
//!            ▼                                                   │
//!   Init ──open()──▶ Connecting ──Connected──▶ Connected ───────┘
//!    ▲ gate: interface up, host set, port != 0, retry delay over
//! ```
//!
//! While connected the session moves at most one outbound frame per tick
//! and forwards inbound text frames verbatim to the API handler.  With
//! TLS the root certificate comes from the [`AdaptiveCertManager`], which
//! is told about every handshake outcome.

use core::time::Duration;
use std::sync::Arc;

use log::{error, info, warn};

use crate::app::ports::{Clock, StoragePort, WsEvent, WsTarget, WsTransport};
use crate::bus::SharedStateBus;
use crate::certs::AdaptiveCertManager;
use crate::config::SystemConfig;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Init,
    Connecting,
    Connected,
}

pub struct WebsocketSession<T: WsTransport, S: StoragePort, C: Clock> {
    transport: T,
    certs: AdaptiveCertManager<S>,
    settings: Arc<Settings<S>>,
    clock: C,
    bus: Arc<SharedStateBus>,
    state: WsState,
    target: WsTarget,
    retry_at_ms: u64,
    reconnect_delay_ms: u64,
    send_timeout: Duration,
}

impl<T: WsTransport, S: StoragePort, C: Clock> WebsocketSession<T, S, C> {
    pub fn new(
        transport: T,
        certs: AdaptiveCertManager<S>,
        settings: Arc<Settings<S>>,
        clock: C,
        bus: Arc<SharedStateBus>,
        cfg: &SystemConfig,
    ) -> Self {
        let target = settings.api_config().target();
        Self {
            transport,
            certs,
            settings,
            clock,
            bus,
            state: WsState::Init,
            target,
            retry_at_ms: 0,
            reconnect_delay_ms: u64::from(cfg.ws_reconnect_delay_ms),
            send_timeout: Duration::from_millis(u64::from(cfg.ws_send_timeout_ms)),
        }
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    pub fn target(&self) -> &WsTarget {
        &self.target
    }

    pub fn certs(&self) -> &AdaptiveCertManager<S> {
        &self.certs
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn tick(&mut self) {
        while let Some(event) = self.transport.poll_event() {
            self.on_event(event);
        }

        self.check_config();

        match self.state {
            WsState::Init => self.try_connect(),
            WsState::Connecting => {}
            WsState::Connected => self.send_one(),
        }
    }

    /// Backend endpoint edited (CLI): drop the connection and reconnect
    /// immediately with the new target.
    fn check_config(&mut self) {
        let target = self.settings.api_config().target();
        if target == self.target {
            return;
        }
        info!(
            "Websocket: configuration changed ({}:{} -> {}:{})",
            self.target.host, self.target.port, target.host, target.port
        );
        if self.state != WsState::Init {
            self.transport.close();
        }
        self.target = target;
        self.retry_at_ms = 0;
        self.set_state(WsState::Init);
    }

    fn try_connect(&mut self) {
        let now = self.clock.now_ms();
        if now < self.retry_at_ms {
            return;
        }
        if !self.bus.connectivity().any_connected() {
            return;
        }
        if self.target.host.is_empty() || self.target.port == 0 {
            return;
        }

        let ca = if self.target.use_tls {
            match self.certs.certificate() {
                Some(cert) => Some(cert),
                None => {
                    error!("Websocket: TLS enabled but no CA certificate available");
                    self.schedule_retry();
                    return;
                }
            }
        } else {
            None
        };

        info!(
            "Websocket: connecting to {} (CA {})",
            self.target.url(),
            ca.map_or("none", |c| c.name)
        );
        match self.transport.open(&self.target, ca) {
            Ok(()) => self.set_state(WsState::Connecting),
            Err(e) => {
                error!("Websocket: failed to start client: {}", e);
                self.schedule_retry();
            }
        }
    }

    fn send_one(&mut self) {
        let Some(frame) = self.bus.outbound().try_receive() else {
            return;
        };
        if let Err(e) = self.transport.send_text(&frame, self.send_timeout) {
            warn!("Websocket: dropping outbound frame ({} bytes): {}", frame.len(), e);
        }
    }

    fn on_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::Connected => {
                info!("Websocket: connected");
                if self.target.use_tls {
                    self.certs.mark_success();
                }
                self.set_state(WsState::Connected);
            }
            WsEvent::Disconnected | WsEvent::Error => {
                warn!("Websocket: {:?} in state {:?}", event, self.state);
                if self.target.use_tls {
                    self.certs.mark_failure();
                }
                self.transport.close();
                self.set_state(WsState::Init);
                self.schedule_retry();
            }
            WsEvent::Closed => {
                info!("Websocket: closed");
                self.set_state(WsState::Init);
                self.schedule_retry();
            }
            WsEvent::Text(frame) => {
                // The queue logs the drop itself.
                let _ = self.bus.inbound().try_send(frame);
            }
            WsEvent::Binary { len } => {
                warn!("Websocket: ignoring binary frame ({} bytes)", len);
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.retry_at_ms = self.clock.now_ms() + self.reconnect_delay_ms;
    }

    fn set_state(&mut self, next: WsState) {
        if next == self.state {
            return;
        }
        info!("Websocket: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.bus
            .set_transport_state(next == WsState::Connected, &self.target);
    }
}
