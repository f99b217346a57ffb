//! Session controller.
//!
//! [`GatewayClient`] owns one controller task at a time. The task runs the
//! connection loop: open the transport, wait for HELLO, start the heartbeat
//! monitor, IDENTIFY or RESUME, then pump frames until something ends the
//! attempt. Every ending goes through the [`ReconnectPolicy`] before the next
//! attempt is made. Session identity and the connection state are mutated only
//! by the controller task; the client handle reads snapshots.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatelink_proto::{decode, encode, CloseCode, GatewayEndpoint, Hello, OpCode, Payload, Ready};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::events::{DispatchEvent, GatewayEvent, Termination};
use super::heartbeat::{start_heartbeat_task, HeartbeatHandle, HeartbeatSignal};
use super::policy::{DisconnectSignal, ReconnectAction};
use super::session::Session;
use super::state::{AtomicConnectionState, ConnectionState};
use super::transport::{self, TransportEvent, TransportLink};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// Close code sent when the session should stay resumable.
const RESUMABLE_CLOSE_CODE: u16 = 4000;

/// Close code sent on a user stop; ends the server-side session.
const NORMAL_CLOSE_CODE: u16 = 1000;

/// Build the WebSocket URL for `base` with the version and encoding query.
///
/// Any query already on `base` is replaced.
///
/// # Errors
///
/// Returns [`ClientError::Config`] if `base` is not a valid URL.
pub fn gateway_url(base: &str, api_version: u8) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)
        .map_err(|e| ClientError::Config(format!("invalid gateway url {base}: {e}")))?;
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("v", &api_version.to_string())
        .append_pair("encoding", "json");
    Ok(url)
}

struct Shared {
    state: AtomicConnectionState,
    running: AtomicBool,
    session: RwLock<Session>,
    last_failure: Mutex<Option<String>>,
    termination: watch::Sender<Option<Termination>>,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Persistent, resumable gateway client.
pub struct GatewayClient {
    endpoint: GatewayEndpoint,
    config: ClientConfig,
    shared: Arc<Shared>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("endpoint", &self.endpoint.url)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Create a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the configuration or the endpoint
    /// URL is unusable.
    pub fn new(endpoint: GatewayEndpoint, config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        gateway_url(&endpoint.url, config.api_version)?;

        let (termination, _) = watch::channel(None);
        Ok(Self {
            endpoint,
            config,
            shared: Arc::new(Shared {
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                running: AtomicBool::new(false),
                session: RwLock::new(Session::new()),
                last_failure: Mutex::new(None),
                termination,
            }),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Whether a controller task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the session identity.
    #[must_use]
    pub fn session(&self) -> Session {
        self.shared.session.read().clone()
    }

    /// Reason the most recent connection attempt ended, if it failed.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        self.shared.last_failure.lock().clone()
    }

    /// How the last run ended, once it has.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        self.shared.termination.borrow().clone()
    }

    /// Start the controller and return the consumer event stream.
    ///
    /// The controller waits for the consumer when the channel is full, so
    /// the receiver must be drained.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyRunning`] if a controller is active.
    pub async fn start(&self) -> Result<mpsc::Receiver<GatewayEvent>, ClientError> {
        let mut worker = self.worker.lock().await;
        if self.is_running() {
            return Err(ClientError::AlreadyRunning);
        }
        if let Some(previous) = worker.take() {
            if let Err(e) = previous.task.await {
                error!(error = %e, "previous controller task panicked");
            }
        }

        // A stop closes with 1000, so the server-side session is gone.
        self.shared.session.write().reset();
        *self.shared.last_failure.lock() = None;
        self.shared.termination.send_replace(None);
        self.shared.state.store(ConnectionState::Disconnected);
        self.shared.running.store(true, Ordering::SeqCst);

        // One slot is held back so the final `Stopped` event always fits.
        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity.saturating_add(1));
        let stopped = events_tx.clone().try_reserve_owned().ok();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sequence, _) = watch::channel(None);

        let controller = Controller {
            endpoint: self.endpoint.clone(),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            events: events_tx,
            stopped,
            shutdown: shutdown_rx,
            sequence,
        };
        let task = tokio::spawn(controller.run());

        *worker = Some(Worker {
            shutdown: shutdown_tx,
            task,
        });
        Ok(events_rx)
    }

    /// Stop the controller and wait for it to exit.
    ///
    /// Safe to call at any time and more than once. When this returns, the
    /// heartbeat monitor and the transport task have exited.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(Worker { shutdown, task }) = worker.take() else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = task.await {
            error!(error = %e, "controller task panicked");
            let termination = Termination::Fatal(format!("controller task failed: {e}"));
            *self.shared.last_failure.lock() = Some(termination.to_string());
            self.shared.state.store(ConnectionState::Stopped);
            self.shared.termination.send_replace(Some(termination));
            self.shared.running.store(false, Ordering::SeqCst);
        }
    }

    /// Wait until the client stops, by [`stop`](Self::stop) or on its own.
    ///
    /// Returns [`Termination::Graceful`] straight away if the client was never
    /// started.
    pub async fn run(&self) -> Termination {
        let mut termination = self.shared.termination.subscribe();
        loop {
            if let Some(done) = termination.borrow_and_update().clone() {
                return done;
            }
            if !self.is_running() {
                // termination is published before running is cleared
                return termination.borrow().clone().unwrap_or(Termination::Graceful);
            }
            if termination.changed().await.is_err() {
                return Termination::Graceful;
            }
        }
    }
}

/// How one connection attempt ended.
enum AttemptOutcome {
    Shutdown,
    Disconnected {
        signal: DisconnectSignal,
        proven: bool,
    },
    Fatal(ClientError),
}

enum Wake {
    Shutdown,
    Heartbeat(Option<HeartbeatSignal>),
    Transport(Option<TransportEvent>),
}

struct Controller {
    endpoint: GatewayEndpoint,
    config: ClientConfig,
    shared: Arc<Shared>,
    events: mpsc::Sender<GatewayEvent>,
    stopped: Option<mpsc::OwnedPermit<GatewayEvent>>,
    shutdown: watch::Receiver<bool>,
    sequence: watch::Sender<Option<u64>>,
}

impl Controller {
    async fn run(mut self) {
        let termination = self.connection_loop().await;
        match &termination {
            Termination::Graceful => info!("gateway client stopped"),
            Termination::Abnormal { code, reason } => {
                error!(code = ?code, reason = %reason, "gateway client stopped abnormally");
            }
            Termination::Fatal(reason) => error!(reason = %reason, "gateway client failed"),
        }

        if !termination.is_graceful() {
            *self.shared.last_failure.lock() = Some(termination.to_string());
        }
        self.shared.state.store(ConnectionState::Stopped);
        if let Some(permit) = self.stopped.take() {
            let _ = permit.send(GatewayEvent::Stopped(termination.clone()));
        }
        self.shared.termination.send_replace(Some(termination));
        self.shared.running.store(false, Ordering::SeqCst);
    }

    async fn connection_loop(&mut self) -> Termination {
        let limit = self.endpoint.session_start_limit;
        if limit.is_exhausted() {
            let wait = Duration::from_millis(limit.reset_after);
            warn!(
                reset_after_ms = limit.reset_after,
                total = limit.total,
                "session start limit exhausted, waiting for reset"
            );
            if self.sleep_or_shutdown(wait).await {
                return Termination::Graceful;
            }
        }

        let mut attempt = 0u32;
        loop {
            if *self.shutdown.borrow() {
                return Termination::Graceful;
            }

            let signal = match self.run_attempt().await {
                AttemptOutcome::Shutdown => return Termination::Graceful,
                AttemptOutcome::Fatal(e) => return Termination::Fatal(e.to_string()),
                AttemptOutcome::Disconnected { signal, proven } => {
                    if proven {
                        attempt = 0;
                    }
                    signal
                }
            };

            let action = self.config.policy.classify(signal);
            info!(signal = %signal, action = %action, "connection ended");
            *self.shared.last_failure.lock() = Some(signal.to_string());
            self.emit(GatewayEvent::Disconnected {
                reason: signal.to_string(),
            })
            .await;

            match action {
                ReconnectAction::Terminal { graceful: true } => return Termination::Graceful,
                ReconnectAction::Terminal { graceful: false } => {
                    let code = match signal {
                        DisconnectSignal::AbnormalClose(code) => Some(code),
                        _ => None,
                    };
                    let reason = code.map_or_else(
                        || signal.to_string(),
                        |code| CloseCode::from(code).description().to_string(),
                    );
                    return Termination::Abnormal { code, reason };
                }
                ReconnectAction::FreshIdentify => {
                    self.shared.session.write().reset();
                    self.sequence.send_replace(None);
                }
                ReconnectAction::Resume => {}
            }

            attempt = attempt.saturating_add(1);
            if !self.config.reconnect.should_reconnect(attempt) {
                return Termination::Abnormal {
                    code: None,
                    reason: format!("gave up after {} reconnect attempts", attempt - 1),
                };
            }

            let delay = if matches!(signal, DisconnectSignal::InvalidSession { .. }) {
                self.invalid_session_delay()
            } else {
                self.config.reconnect.jittered_delay(attempt)
            };
            self.shared.state.store(ConnectionState::Reconnecting);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                action = %action,
                "reconnecting"
            );
            self.emit(GatewayEvent::Reconnecting {
                attempt,
                delay,
                action,
            })
            .await;
            if self.sleep_or_shutdown(delay).await {
                return Termination::Graceful;
            }
        }
    }

    async fn run_attempt(&mut self) -> AttemptOutcome {
        let (base, resuming) = self.connect_target();
        let url = match gateway_url(&base, self.config.api_version) {
            Ok(url) => url,
            Err(e) => return AttemptOutcome::Fatal(e),
        };

        self.shared.state.store(ConnectionState::Connecting);
        info!(url = %url, resume = resuming, "connecting to gateway");

        let connected = tokio::select! {
            biased;
            () = wait_shutdown(&mut self.shutdown) => return AttemptOutcome::Shutdown,
            result = transport::connect(url.as_str()) => result,
        };
        let mut link = match connected {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "gateway connection failed");
                return AttemptOutcome::Disconnected {
                    signal: DisconnectSignal::TransportError,
                    proven: false,
                };
            }
        };

        let hello = match self.await_hello(&mut link).await {
            ControlFlow::Continue(hello) => hello,
            ControlFlow::Break(outcome) => {
                let code = match outcome {
                    AttemptOutcome::Disconnected { .. } => RESUMABLE_CLOSE_CODE,
                    _ => NORMAL_CLOSE_CODE,
                };
                link.close(code, "handshake aborted").await;
                return outcome;
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        info!(heartbeat_interval_ms = hello.heartbeat_interval, "hello received");
        self.shared.session.write().set_heartbeat_interval(interval);
        self.shared.state.store(ConnectionState::Authenticating);

        let mut heartbeat = start_heartbeat_task(
            interval,
            self.first_heartbeat_delay(interval),
            link.sender(),
            self.sequence.subscribe(),
        );

        let outcome = match self.handshake_frame() {
            Ok(frame) => {
                if link.send_text(frame).await.is_ok() {
                    self.shared.state.store(ConnectionState::Active);
                    self.pump(&mut link, &mut heartbeat).await
                } else {
                    AttemptOutcome::Disconnected {
                        signal: DisconnectSignal::TransportError,
                        proven: false,
                    }
                }
            }
            Err(e) => AttemptOutcome::Fatal(e),
        };

        // The monitor must be gone before the transport is torn down.
        if matches!(outcome, AttemptOutcome::Disconnected { .. }) {
            self.shared.state.store(ConnectionState::Reconnecting);
        }
        heartbeat.stop().await;
        match outcome {
            AttemptOutcome::Disconnected { .. } => {
                link.close(RESUMABLE_CLOSE_CODE, "reconnecting").await;
            }
            _ => link.close(NORMAL_CLOSE_CODE, "client stopping").await,
        }
        outcome
    }

    async fn await_hello(&mut self, link: &mut TransportLink) -> ControlFlow<AttemptOutcome, Hello> {
        loop {
            let event = tokio::select! {
                biased;
                () = wait_shutdown(&mut self.shutdown) => {
                    return ControlFlow::Break(AttemptOutcome::Shutdown);
                }
                event = link.recv() => event,
            };

            match event {
                Some(TransportEvent::Opened) => {
                    self.shared.state.store(ConnectionState::AwaitingHello);
                    debug!("transport open, awaiting hello");
                    self.emit(GatewayEvent::Connected).await;
                }
                Some(TransportEvent::Text(text)) => {
                    let payload = match decode(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame");
                            continue;
                        }
                    };
                    return match Hello::from_payload(&payload) {
                        Ok(hello) => ControlFlow::Continue(hello),
                        Err(e) => ControlFlow::Break(AttemptOutcome::Fatal(
                            ClientError::Handshake(format!("invalid hello: {e}")),
                        )),
                    };
                }
                Some(TransportEvent::Closed { code, reason }) => {
                    info!(code = ?code, reason = %reason, "closed before hello");
                    return ControlFlow::Break(AttemptOutcome::Disconnected {
                        signal: DisconnectSignal::from_close(code),
                        proven: false,
                    });
                }
                Some(TransportEvent::Error(e)) => {
                    warn!(error = %e, "transport failed before hello");
                    return ControlFlow::Break(AttemptOutcome::Disconnected {
                        signal: DisconnectSignal::TransportError,
                        proven: false,
                    });
                }
                None => {
                    return ControlFlow::Break(AttemptOutcome::Disconnected {
                        signal: DisconnectSignal::TransportError,
                        proven: false,
                    });
                }
            }
        }
    }

    async fn pump(
        &mut self,
        link: &mut TransportLink,
        heartbeat: &mut HeartbeatHandle,
    ) -> AttemptOutcome {
        let mut proven = false;
        let mut monitor_alive = true;

        loop {
            let wake = tokio::select! {
                biased;
                () = wait_shutdown(&mut self.shutdown) => Wake::Shutdown,
                signal = heartbeat.next_signal(), if monitor_alive => Wake::Heartbeat(signal),
                event = link.recv() => Wake::Transport(event),
            };

            let signal = match wake {
                Wake::Shutdown => return AttemptOutcome::Shutdown,
                Wake::Heartbeat(Some(HeartbeatSignal::AckTimeout)) => {
                    Some(DisconnectSignal::HeartbeatAckTimeout)
                }
                Wake::Heartbeat(Some(HeartbeatSignal::TransportClosed)) => {
                    Some(DisconnectSignal::TransportError)
                }
                Wake::Heartbeat(None) => {
                    monitor_alive = false;
                    None
                }
                Wake::Transport(Some(TransportEvent::Text(text))) => {
                    self.handle_frame(&text, link, heartbeat, &mut proven).await
                }
                Wake::Transport(Some(TransportEvent::Opened)) => None,
                Wake::Transport(Some(TransportEvent::Closed { code, reason })) => {
                    info!(code = ?code, reason = %reason, "gateway closed connection");
                    Some(DisconnectSignal::from_close(code))
                }
                Wake::Transport(Some(TransportEvent::Error(e))) => {
                    warn!(error = %e, "gateway transport failed");
                    Some(DisconnectSignal::TransportError)
                }
                Wake::Transport(None) => Some(DisconnectSignal::TransportError),
            };

            if let Some(signal) = signal {
                return AttemptOutcome::Disconnected { signal, proven };
            }
        }
    }

    async fn handle_frame(
        &mut self,
        text: &str,
        link: &TransportLink,
        heartbeat: &HeartbeatHandle,
        proven: &mut bool,
    ) -> Option<DisconnectSignal> {
        let payload = match decode(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return None;
            }
        };

        match payload.op {
            OpCode::Dispatch => {
                *proven = true;
                self.handle_dispatch(payload).await;
                None
            }
            OpCode::HeartbeatAck => {
                trace!("heartbeat acknowledged");
                heartbeat.ack();
                None
            }
            OpCode::Heartbeat => {
                let seq = *self.sequence.borrow();
                debug!(seq = ?seq, "server requested heartbeat");
                match encode(OpCode::Heartbeat, &seq) {
                    Ok(frame) => link
                        .send_text(frame)
                        .await
                        .err()
                        .map(|_| DisconnectSignal::TransportError),
                    Err(e) => {
                        warn!(error = %e, "failed to encode heartbeat");
                        None
                    }
                }
            }
            OpCode::Reconnect => {
                info!("server requested reconnect");
                Some(DisconnectSignal::ReconnectRequested)
            }
            OpCode::InvalidSession => {
                let resumable = payload.d.as_bool().unwrap_or(false);
                warn!(resumable, "session invalidated");
                Some(DisconnectSignal::InvalidSession { resumable })
            }
            op => {
                debug!(op = %op, "ignoring frame");
                None
            }
        }
    }

    async fn handle_dispatch(&mut self, payload: Payload) {
        if let Some(seq) = payload.s {
            let current = {
                let mut session = self.shared.session.write();
                session.observe_sequence(seq);
                session.sequence()
            };
            self.sequence.send_replace(current);
        }

        let name = payload.t.clone().unwrap_or_default();
        match name.as_str() {
            "READY" => match payload.data::<Ready>() {
                Ok(ready) => {
                    info!(session_id = %ready.session_id, seq = ?payload.s, "session ready");
                    self.shared
                        .session
                        .write()
                        .assign(ready.session_id, ready.resume_gateway_url);
                }
                Err(e) => warn!(error = %e, "READY without a usable session id"),
            },
            "RESUMED" => info!(seq = ?*self.sequence.borrow(), "session resumed"),
            _ => trace!(event = %name, seq = ?payload.s, "dispatch"),
        }

        self.emit(GatewayEvent::Dispatch(DispatchEvent {
            name,
            sequence: payload.s,
            data: payload.d,
        }))
        .await;
    }

    fn connect_target(&self) -> (String, bool) {
        let session = self.shared.session.read();
        if session.can_resume() {
            let url = session.resume_url().unwrap_or(&self.endpoint.url);
            (url.to_string(), true)
        } else {
            (self.endpoint.url.clone(), false)
        }
    }

    fn handshake_frame(&self) -> Result<String, ClientError> {
        let session = self.shared.session.read();
        let frame = match self.config.resume(&session) {
            Some(resume) => {
                info!(session_id = %resume.session_id, seq = ?resume.seq, "resuming session");
                encode(OpCode::Resume, &resume)?
            }
            None => {
                info!(intents = self.config.intents.bits(), "identifying");
                encode(OpCode::Identify, &self.config.identify())?
            }
        };
        Ok(frame)
    }

    fn first_heartbeat_delay(&self, interval: Duration) -> Duration {
        if self.config.heartbeat_jitter {
            interval.mul_f64(rand::thread_rng().gen_range(0.0..1.0))
        } else {
            interval
        }
    }

    fn invalid_session_delay(&self) -> Duration {
        let max = self.config.invalid_session_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(max / 5..=max))
    }

    async fn emit(&self, event: GatewayEvent) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            () = wait_shutdown(&mut shutdown) => {}
            result = self.events.send(event) => {
                if result.is_err() {
                    trace!("event receiver dropped");
                }
            }
        }
    }

    /// Returns true if shutdown was requested during the sleep.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = wait_shutdown(&mut self.shutdown) => true,
            () = tokio::time::sleep(delay) => false,
        }
    }
}

/// Resolves once shutdown is requested or the client handle is gone.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
