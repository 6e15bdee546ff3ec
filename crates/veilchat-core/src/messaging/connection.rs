//! Relay connection supervisor.
//!
//! Keeps one WebSocket to the relay alive until told to stop. Every
//! (re)connection starts with the current `auth` frame; inbound frames are
//! forwarded to the client, outbound frames are drained from a channel.

use crate::protocol::RelayMessage;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message, Connector};
use tracing::{debug, info, warn};

/// First reconnect delay.
pub const BACKOFF_INITIAL: Duration = Duration::from_millis(500);

/// Reconnect delay ceiling.
pub const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Limit for the WebSocket handshake and for the relay's answer to `auth`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// State of the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and authenticated.
    Connected,
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_INITIAL, BACKOFF_MAX)
    }
}

impl Backoff {
    /// Create a backoff doubling from `initial` up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the next call returns double, capped.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay, after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Channels the supervisor runs on.
pub struct Supervisor {
    /// Relay WebSocket URL.
    pub url: String,
    /// Current auth frame; re-read on every connection.
    pub auth: watch::Receiver<RelayMessage>,
    /// Frames to send.
    pub outbound: mpsc::UnboundedReceiver<RelayMessage>,
    /// Frames received.
    pub inbound: mpsc::UnboundedSender<RelayMessage>,
    /// Published connection state.
    pub state: watch::Sender<ConnectionState>,
    /// Stop signal; `true` or a dropped sender stops the loop.
    pub stop: watch::Receiver<bool>,
    /// Reconnect delays.
    pub backoff: Backoff,
    /// TLS connector for `wss://` URLs; `None` uses the default roots.
    pub connector: Option<Connector>,
}

impl Supervisor {
    /// Run until stopped.
    pub async fn run(mut self) {
        info!(url = %self.url, "Connection supervisor started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);
            match self.connect_once().await {
                Ok(Stop::Requested) => break,
                Ok(Stop::Dropped) => {}
                Err(e) => warn!(url = %self.url, error = %e, "Relay connection failed"),
            }
            self.state.send_replace(ConnectionState::Disconnected);

            let delay = self.backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.changed() => break,
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("Connection supervisor stopped");
    }

    async fn connect_once(&mut self) -> Result<Stop, tokio_tungstenite::tungstenite::Error> {
        let connect = connect_async_tls_with_config(
            self.url.as_str(),
            None,
            false,
            self.connector.clone(),
        );
        let (ws, _) = tokio::select! {
            result = tokio::time::timeout(CONNECT_TIMEOUT, connect) => match result {
                Ok(connected) => connected?,
                Err(_) => {
                    warn!(url = %self.url, "Relay handshake timed out");
                    return Ok(Stop::Dropped);
                }
            },
            _ = self.stop.changed() => return Ok(Stop::Requested),
        };
        let (mut sink, mut stream) = ws.split();

        let auth = self.auth.borrow().clone();
        match auth.to_json() {
            Ok(json) => sink.send(Message::Text(json)).await?,
            Err(e) => {
                warn!(error = %e, "Cannot encode auth frame");
                return Ok(Stop::Dropped);
            }
        }

        // The relay answers a valid auth with the roster and a refused one
        // with an error frame before closing.
        let admission = async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                }
            }
        };
        let first = tokio::select! {
            result = tokio::time::timeout(CONNECT_TIMEOUT, admission) => match result {
                Ok(first) => first?,
                Err(_) => {
                    warn!(url = %self.url, "Relay did not answer auth");
                    return Ok(Stop::Dropped);
                }
            },
            _ = self.stop.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(Stop::Requested);
            }
        };
        match first.as_deref().map(RelayMessage::from_json) {
            Some(Ok(RelayMessage::Error { message })) => {
                warn!(%message, "Relay refused authentication");
                let _ = self.inbound.send(RelayMessage::Error { message });
                return Ok(Stop::Dropped);
            }
            Some(Ok(frame)) => {
                if self.inbound.send(frame).is_err() {
                    return Ok(Stop::Requested);
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Malformed answer to auth");
                return Ok(Stop::Dropped);
            }
            None => {
                info!("Relay closed the connection during auth");
                return Ok(Stop::Dropped);
            }
        }

        self.backoff.reset();
        self.state.send_replace(ConnectionState::Connected);
        info!(url = %self.url, "Connected to relay");

        loop {
            tokio::select! {
                _ = self.stop.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(Stop::Requested);
                }
                Some(frame) = self.outbound.recv() => {
                    match frame.to_json() {
                        Ok(json) => sink.send(Message::Text(json)).await?,
                        Err(e) => warn!(error = %e, "Dropping unencodable frame"),
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match RelayMessage::from_json(&text) {
                        Ok(frame) => {
                            if self.inbound.send(frame).is_err() {
                                return Ok(Stop::Requested);
                            }
                        }
                        Err(e) => debug!(error = %e, "Ignoring malformed frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay closed the connection");
                        return Ok(Stop::Dropped);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                },
            }
        }
    }
}

enum Stop {
    Requested,
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), BACKOFF_INITIAL);
    }

    #[tokio::test]
    async fn test_stop_while_relay_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };

        let (_auth_tx, auth) = watch::channel(RelayMessage::Auth {
            name: "me".into(),
            public_key: "PEM".into(),
        });
        let (_out_tx, outbound) = mpsc::unbounded_channel();
        let (inbound, _in_rx) = mpsc::unbounded_channel();
        let (state, mut state_rx) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, stop) = watch::channel(false);

        let handle = tokio::spawn(
            Supervisor {
                url: format!("ws://127.0.0.1:{}/", port),
                auth,
                outbound,
                inbound,
                state,
                stop,
                backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(20)),
                connector: None,
            }
            .run(),
        );

        state_rx
            .wait_for(|s| *s == ConnectionState::Connecting)
            .await
            .expect("state");
        stop_tx.send(true).expect("stop");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor stops")
            .expect("join");
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
    }

    struct Harness {
        state_rx: watch::Receiver<ConnectionState>,
        in_rx: mpsc::UnboundedReceiver<RelayMessage>,
        stop_tx: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
        _auth_tx: watch::Sender<RelayMessage>,
        _out_tx: mpsc::UnboundedSender<RelayMessage>,
    }

    fn supervise(url: String, backoff: Backoff) -> Harness {
        let (_auth_tx, auth) = watch::channel(RelayMessage::Auth {
            name: "me".into(),
            public_key: "PEM".into(),
        });
        let (_out_tx, outbound) = mpsc::unbounded_channel();
        let (inbound, in_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, stop) = watch::channel(false);
        let handle = tokio::spawn(
            Supervisor {
                url,
                auth,
                outbound,
                inbound,
                state,
                stop,
                backoff,
                connector: None,
            }
            .run(),
        );
        Harness {
            state_rx,
            in_rx,
            stop_tx,
            handle,
            _auth_tx,
            _out_tx,
        }
    }

    /// A relay that accepts the socket, reads `auth` and answers with `reply`.
    async fn fake_relay(reply: RelayMessage) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/", listener.local_addr().expect("addr"));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let reply = reply.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
                    let _ = ws.next().await;
                    let json = reply.to_json().expect("encode");
                    let _ = ws.send(Message::Text(json)).await;
                    if matches!(reply, RelayMessage::Error { .. }) {
                        let _ = ws.close(None).await;
                    } else {
                        // Hold the session open
                        while ws.next().await.is_some() {}
                    }
                });
            }
        });
        (url, attempts)
    }

    #[tokio::test]
    async fn test_stop_during_stalled_handshake() {
        // Accepts TCP but never answers the WebSocket upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/", listener.local_addr().expect("addr"));
        let held = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                sockets.push(tcp);
            }
        });

        let mut h = supervise(url, Backoff::default());
        h.state_rx
            .wait_for(|s| *s == ConnectionState::Connecting)
            .await
            .expect("state");
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.stop_tx.send(true).expect("stop");
        tokio::time::timeout(Duration::from_secs(5), h.handle)
            .await
            .expect("supervisor stops while the handshake is stalled")
            .expect("join");
        assert_eq!(*h.state_rx.borrow(), ConnectionState::Disconnected);
        held.abort();
    }

    #[tokio::test]
    async fn test_refused_auth_is_not_connected_and_backs_off() {
        let (url, attempts) = fake_relay(RelayMessage::error("name already connected")).await;
        let mut h = supervise(url, Backoff::new(Duration::from_millis(20), Duration::from_secs(5)));

        let first = tokio::time::timeout(Duration::from_secs(5), h.in_rx.recv())
            .await
            .expect("refusal forwarded")
            .expect("frame");
        assert_eq!(first, RelayMessage::error("name already connected"));

        // 20 + 40 + 80 + 160 ms of delay leaves room for about five attempts.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_ne!(*h.state_rx.borrow(), ConnectionState::Connected);
        let seen = attempts.load(Ordering::SeqCst);
        assert!(seen <= 6, "backoff reset on refusal: {} attempts", seen);

        h.stop_tx.send(true).expect("stop");
        h.handle.await.expect("join");
    }

    #[tokio::test]
    async fn test_connected_after_relay_admits() {
        let (url, attempts) = fake_relay(RelayMessage::Roster { contacts: vec![] }).await;
        let mut h = supervise(url, Backoff::new(Duration::from_millis(20), Duration::from_secs(5)));

        tokio::time::timeout(
            Duration::from_secs(5),
            h.state_rx.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .expect("admitted")
        .expect("state");
        assert_eq!(
            h.in_rx.recv().await.expect("roster"),
            RelayMessage::Roster { contacts: vec![] }
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        h.stop_tx.send(true).expect("stop");
        h.handle.await.expect("join");
    }
}
