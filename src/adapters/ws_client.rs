//! Websocket client adapter.
//!
//! Implements [`WsTransport`] for the [`WebsocketSession`](crate::ws::WebsocketSession).
//! `open` creates a fresh client for the target (the ESP-IDF client
//! connects on its own task); `close` destroys it.  Client callbacks are
//! translated to [`WsEvent`]s and queued for the session's next tick.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::ws::client::EspWebSocketClient`,
//!   with the chosen root certificate handed to mbedTLS as PEM.
//! - **all other targets**: loopback simulation that connects immediately
//!   and records every frame sent.

use core::time::Duration;

use log::{info, warn};

use super::driver_events::WsEventQueue;
use crate::app::ports::{WsError, WsEvent, WsTarget, WsTransport};
use crate::bus::Frame;
use crate::certs::CaCertificate;

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    tls::X509,
    ws::{
        FrameType,
        client::{EspWebSocketClient, EspWebSocketClientConfig, WebSocketEventType},
    },
};

/// Queue a received text message, dropping it if it cannot be a valid frame.
fn push_text(events: &WsEventQueue, text: &str) {
    match Frame::try_from(text) {
        Ok(frame) => events.push(WsEvent::Text(frame)),
        Err(()) => warn!("WS: dropped {}-byte inbound frame (too large)", text.len()),
    }
}

pub struct WsClient {
    events: WsEventQueue,
    #[cfg(target_os = "espidf")]
    client: Option<EspWebSocketClient<'static>>,
    #[cfg(target_os = "espidf")]
    send_timeout: Duration,
    #[cfg(not(target_os = "espidf"))]
    sim_open: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_sent: Vec<String>,
}

// ── ESP-IDF ──────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl WsClient {
    /// `send_timeout` bounds every blocking send of the clients this
    /// adapter creates.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            events: WsEventQueue::new("WS"),
            client: None,
            send_timeout,
        }
    }
}

#[cfg(target_os = "espidf")]
impl WsTransport for WsClient {
    fn open(&mut self, target: &WsTarget, ca: Option<&CaCertificate>) -> Result<(), WsError> {
        self.close();
        if target.host.is_empty() || target.port == 0 {
            return Err(WsError::InvalidTarget);
        }
        let url = target.url();
        let config = EspWebSocketClientConfig {
            server_cert: ca.map(|c| X509::pem_until_nul(c.pem.as_bytes())),
            ..Default::default()
        };

        let events = self.events.clone();
        let client = EspWebSocketClient::new(&url, &config, self.send_timeout, move |event| {
            match event {
                Ok(ev) => match ev.event_type {
                    WebSocketEventType::Connected => events.push(WsEvent::Connected),
                    WebSocketEventType::Disconnected => events.push(WsEvent::Disconnected),
                    WebSocketEventType::Close(_) | WebSocketEventType::Closed => {
                        events.push(WsEvent::Closed);
                    }
                    WebSocketEventType::Text(text) => push_text(&events, text),
                    WebSocketEventType::Binary(data) => {
                        events.push(WsEvent::Binary { len: data.len() });
                    }
                    _ => {}
                },
                Err(e) => {
                    warn!("WS: client error: {}", e);
                    events.push(WsEvent::Error);
                }
            }
        })
        .map_err(|e| {
            warn!("WS: client for {} failed to start: {}", url, e);
            WsError::ConnectFailed
        })?;

        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            info!("WS: client destroyed");
        }
        self.events.clear();
    }

    /// The timeout was fixed when the client was created.
    fn send_text(&mut self, text: &str, _timeout: Duration) -> Result<(), WsError> {
        let client = self.client.as_mut().ok_or(WsError::NotConnected)?;
        if !client.is_connected() {
            return Err(WsError::NotConnected);
        }
        client
            .send(FrameType::Text(false), text.as_bytes())
            .map_err(|_| WsError::SendTimeout)
    }

    fn poll_event(&mut self) -> Option<WsEvent> {
        self.events.pop()
    }
}

// ── Simulation ───────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl WsClient {
    pub fn new(_send_timeout: Duration) -> Self {
        Self {
            events: WsEventQueue::new("WS"),
            sim_open: false,
            sim_sent: Vec::new(),
        }
    }

    /// Deliver a frame as if the backend had sent it.
    pub fn inject_text(&self, text: &str) {
        push_text(&self.events, text);
    }

    /// Frames sent so far, oldest first.
    pub fn sent(&self) -> &[String] {
        &self.sim_sent
    }
}

#[cfg(not(target_os = "espidf"))]
impl WsTransport for WsClient {
    fn open(&mut self, target: &WsTarget, ca: Option<&CaCertificate>) -> Result<(), WsError> {
        if target.host.is_empty() || target.port == 0 {
            return Err(WsError::InvalidTarget);
        }
        info!(
            "WS(sim): connected to {} (ca {})",
            target.url(),
            ca.map_or("none", |c| c.name)
        );
        self.sim_open = true;
        self.events.push(WsEvent::Connected);
        Ok(())
    }

    fn close(&mut self) {
        self.sim_open = false;
        self.events.clear();
    }

    fn send_text(&mut self, text: &str, _timeout: Duration) -> Result<(), WsError> {
        if !self.sim_open {
            return Err(WsError::NotConnected);
        }
        self.sim_sent.push(text.to_owned());
        Ok(())
    }

    fn poll_event(&mut self) -> Option<WsEvent> {
        self.events.pop()
    }
}
