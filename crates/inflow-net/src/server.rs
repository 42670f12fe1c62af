use std::{
    collections::HashMap,
    io,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use inflow_ruleset::{Message, Registry, RulesetRef};
use mio::{Events, Interest, Poll, Token, net::TcpListener};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    driver::{DriverError, DriverStream, RecvOutcome, StreamDriver},
    session::{FramingPolicy, Session},
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no listeners configured")]
    NoListeners,
    #[error("listener cap ({0}) exceeded")]
    ListenerCapExceeded(usize),
}

/// Module-level parameters shared by every listener instance this process
/// runs (spec.md §4.7: "exactly one TCP server object is created per
/// process; its shared parameters ... come from the module-level config").
#[derive(Clone)]
pub struct ServerParams {
    pub sess_max: usize,
    pub lstn_max: usize,
    pub keep_alive: bool,
    pub notify_on_close: bool,
    pub use_flow_control: bool,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self { sess_max: 200, lstn_max: 20, keep_alive: false, notify_on_close: false, use_flow_control: false }
    }
}

/// A declared listener, resolved to a bind address/port/ruleset at
/// `construct_finalize` time (spec.md §3 "Listener Instance").
pub struct ListenerSpec {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub ruleset: Option<RulesetRef>,
    pub input_name: String,
    pub framing_policy: FramingPolicy,
}

struct ListenerEntry {
    listener: TcpListener,
    ruleset: Option<RulesetRef>,
    input_name: String,
    framing_policy: FramingPolicy,
}

struct SessionEntry {
    stream: Box<dyn DriverStream>,
    session: Session,
    ruleset: Option<RulesetRef>,
    input_name: String,
    /// Flow control: when true, this session is parked off the readable set
    /// until its ruleset queue drains below its resume threshold
    /// (spec.md §4.3 "Backpressure").
    read_gated: bool,
}

const LISTENER_TOKEN_BASE: usize = 0;
const SESSION_TOKEN_BASE: usize = 1 << 20;

/// Listener set, accept loop, and session table (spec.md §4.4).
pub struct TcpServer {
    poll: Poll,
    driver: Arc<dyn StreamDriver>,
    params: ServerParams,
    registry: Arc<Registry>,
    listeners: HashMap<Token, ListenerEntry>,
    sessions: HashMap<Token, SessionEntry>,
    pending: Vec<ListenerSpec>,
    next_listener_token: usize,
    next_session_token: usize,
    shutdown_immediate: Arc<AtomicBool>,
    rejected_peers: Arc<AtomicUsize>,
    dropped_on_shutdown: Arc<AtomicUsize>,
}

impl TcpServer {
    pub fn construct(driver: Arc<dyn StreamDriver>, params: ServerParams, registry: Arc<Registry>) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            driver,
            params,
            registry,
            listeners: HashMap::new(),
            sessions: HashMap::new(),
            pending: Vec::new(),
            next_listener_token: LISTENER_TOKEN_BASE,
            next_session_token: SESSION_TOKEN_BASE,
            shutdown_immediate: Arc::new(AtomicBool::new(false)),
            rejected_peers: Arc::new(AtomicUsize::new(0)),
            dropped_on_shutdown: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// `configureTCPListen` (spec.md §4.4): records listener intent without
    /// opening a socket yet.
    pub fn configure_listen(&mut self, spec: ListenerSpec) -> Result<(), ServerError> {
        if self.pending.len() >= self.params.lstn_max {
            return Err(ServerError::ListenerCapExceeded(self.params.lstn_max));
        }
        self.pending.push(spec);
        Ok(())
    }

    /// `constructFinalize` (spec.md §4.4): opens every pending listener and
    /// registers it with the reactor.
    pub fn construct_finalize(&mut self) -> Result<(), ServerError> {
        if self.pending.is_empty() {
            return Err(ServerError::NoListeners);
        }
        for spec in self.pending.drain(..) {
            let addr = SocketAddr::new(spec.bind_addr, spec.port);
            let mut listener = TcpListener::bind(addr)?;
            let token = Token(self.next_listener_token);
            self.next_listener_token += 1;
            self.poll.registry().register(&mut listener, token, Interest::READABLE)?;
            info!(%addr, input_name = %spec.input_name, "listening");
            self.listeners.insert(
                token,
                ListenerEntry {
                    listener,
                    ruleset: spec.ruleset,
                    input_name: spec.input_name,
                    framing_policy: spec.framing_policy,
                },
            );
        }
        Ok(())
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown_immediate.clone()
    }

    pub fn rejected_peers(&self) -> usize {
        self.rejected_peers.load(Ordering::Relaxed)
    }

    pub fn dropped_on_shutdown(&self) -> usize {
        self.dropped_on_shutdown.load(Ordering::Relaxed)
    }

    /// Spawns the accept/read loop on its own thread and returns a handle
    /// to cooperatively stop it (spec.md §5 "Cancellation": no forced
    /// thread cancellation is required).
    pub fn run(mut self) -> ServerHandle {
        let shutdown_immediate = self.shutdown_immediate.clone();
        let rejected_peers = self.rejected_peers.clone();
        let dropped_on_shutdown = self.dropped_on_shutdown.clone();
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let done_thread = done.clone();
        let join = thread::spawn(move || {
            self.run_loop();
            let (lock, cvar) = &*done_thread;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        });
        ServerHandle { shutdown_immediate, rejected_peers, dropped_on_shutdown, done, join: Some(join) }
    }

    fn run_loop(&mut self) {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shutdown_immediate.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = self.poll.poll(&mut events, Some(Duration::from_millis(200))) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(error = %e, "poll failed");
                break;
            }
            for event in events.iter() {
                if self.shutdown_immediate.load(Ordering::Relaxed) {
                    break;
                }
                let token = event.token();
                if self.listeners.contains_key(&token) {
                    self.accept_loop(token);
                } else if self.sessions.contains_key(&token) {
                    self.readable(token);
                }
            }
            self.apply_flow_control();
        }
        self.close_all_sessions_on_shutdown();
    }

    fn accept_loop(&mut self, token: Token) {
        loop {
            let (stream, peer) = {
                let entry = self.listeners.get_mut(&token).expect("listener token");
                match entry.listener.accept() {
                    Ok(pair) => pair,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        return;
                    }
                }
            };

            if self.sessions.len() >= self.params.sess_max {
                warn!(%peer, "session cap exceeded, rejecting connection");
                drop(stream);
                continue;
            }

            // Keep-alive is an OS-level socket option applied by the stream
            // driver (spec.md §5 "Timeouts"), not this reactor loop.
            let entry = self.listeners.get(&token).expect("listener token");
            match self.driver.accept(stream, peer) {
                Ok(mut driver_stream) => {
                    let session_token = Token(self.next_session_token);
                    self.next_session_token += 1;
                    if let Err(e) =
                        self.poll.registry().register(driver_stream.inner_mut(), session_token, Interest::READABLE)
                    {
                        warn!(%peer, error = %e, "failed to register session with reactor");
                        continue;
                    }
                    debug!(%peer, input_name = %entry.input_name, "session accepted");
                    self.sessions.insert(
                        session_token,
                        SessionEntry {
                            stream: driver_stream,
                            session: Session::new(peer, entry.framing_policy),
                            ruleset: entry.ruleset.clone(),
                            input_name: entry.input_name.clone(),
                            read_gated: false,
                        },
                    );
                }
                Err(DriverError::PeerAuthFailed) => {
                    self.rejected_peers.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(%peer, error = %e, "failed to establish driver stream");
                }
            }
        }
    }

    fn readable(&mut self, token: Token) {
        let mut buf = [0u8; 8192];
        let mut frames = Vec::new();
        let mut close_kind: Option<CloseKind> = None;

        {
            let entry = self.sessions.get_mut(&token).expect("session token");
            loop {
                match entry.stream.recv(&mut buf) {
                    Ok(RecvOutcome::Data(n)) => {
                        let feed_result = entry.session.feed(&buf[..n], |frame| frames.push(frame));
                        if let Err(err) = feed_result {
                            warn!(peer = %entry.session.peer, %err, "framing error, closing session");
                            close_kind = Some(CloseKind::Error);
                            break;
                        }
                    }
                    Ok(RecvOutcome::WouldBlock) => break,
                    Ok(RecvOutcome::Eof) => {
                        close_kind = Some(CloseKind::Regular);
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %entry.session.peer, error = %e, "transport error, closing session");
                        close_kind = Some(CloseKind::Error);
                        break;
                    }
                }
            }
        }

        self.submit_frames(token, frames);

        match close_kind {
            Some(CloseKind::Regular) => self.on_regular_close(token),
            Some(CloseKind::Error) => self.on_err_close(token),
            None => {}
        }
    }

    fn submit_frames(&mut self, token: Token, frames: Vec<Vec<u8>>) {
        let Some(entry) = self.sessions.get(&token) else { return };
        for frame in frames {
            let msg = Message::new(frame, entry.session.peer, entry.input_name.clone())
                .with_ruleset(entry.ruleset.clone());
            self.enqueue(&entry.ruleset, msg);
        }
    }

    fn enqueue(&self, ruleset: &Option<RulesetRef>, msg: Message) {
        let queue = match ruleset.as_ref().and_then(|r| self.registry.resolve(r)) {
            Some(rs) => self.registry.ruleset_queue(&rs),
            None => self.registry.main_queue(),
        };
        if queue.try_enqueue(msg).is_err() {
            if self.shutdown_immediate.load(Ordering::Relaxed) {
                self.dropped_on_shutdown.fetch_add(1, Ordering::Relaxed);
            } else {
                warn!("ruleset queue full, message dropped");
            }
        }
    }

    /// `onRegularClose` (spec.md §4.4): drain a trailing partial frame if
    /// framing rules allow it, emit a notify-on-close message if configured,
    /// then tear the session down.
    fn on_regular_close(&mut self, token: Token) {
        let Some(mut entry) = self.sessions.remove(&token) else { return };
        if let Some(partial) = entry.session.prepare_close() {
            let msg = Message::new(partial, entry.session.peer, entry.input_name.clone())
                .with_ruleset(entry.ruleset.clone());
            self.enqueue(&entry.ruleset, msg);
        }
        self.emit_close_notification(&entry);
        let _ = self.poll.registry().deregister(entry.stream.inner_mut());
        entry.stream.close();
    }

    /// `onErrClose` (spec.md §4.4, §4.3): partial buffer dropped
    /// unconditionally.
    fn on_err_close(&mut self, token: Token) {
        let Some(mut entry) = self.sessions.remove(&token) else { return };
        entry.session.discard_on_error_close();
        self.emit_close_notification(&entry);
        let _ = self.poll.registry().deregister(entry.stream.inner_mut());
        entry.stream.close();
    }

    /// `inputTCPServerNotifyOnConnectionClose` synthetic message (SPEC_FULL
    /// supplement #1): payload is the literal string `"connection closed"`,
    /// attributed to the session's peer and bound ruleset.
    fn emit_close_notification(&self, entry: &SessionEntry) {
        if !self.params.notify_on_close {
            return;
        }
        let msg = Message::new(b"connection closed".to_vec(), entry.session.peer, entry.input_name.clone())
            .with_ruleset(entry.ruleset.clone());
        self.enqueue(&entry.ruleset, msg);
    }

    /// Gates/ungates sessions against their ruleset queue's congestion
    /// signal (spec.md §4.3 "Backpressure").
    fn apply_flow_control(&mut self) {
        if !self.params.use_flow_control {
            return;
        }
        for (&token, entry) in self.sessions.iter_mut() {
            let queue = match entry.ruleset.as_ref().and_then(|r| self.registry.resolve(r)) {
                Some(rs) => self.registry.ruleset_queue(&rs),
                None => self.registry.main_queue(),
            };
            let congested = queue.is_congested();
            if congested && !entry.read_gated {
                entry.read_gated = true;
                // Drop READABLE interest so the reactor stops delivering
                // recv-ready events for this session until the queue drains.
                let _ = self.poll.registry().reregister(entry.stream.inner_mut(), token, Interest::WRITABLE);
                debug!(peer = %entry.session.peer, "session gated: ruleset queue congested");
            } else if !congested && entry.read_gated {
                entry.read_gated = false;
                let _ = self.poll.registry().reregister(entry.stream.inner_mut(), token, Interest::READABLE);
                debug!(peer = %entry.session.peer, "session ungated: ruleset queue drained");
            }
        }
    }

    fn close_all_sessions_on_shutdown(&mut self) {
        let tokens: Vec<Token> = self.sessions.keys().copied().collect();
        for token in tokens {
            if let Some(mut entry) = self.sessions.remove(&token) {
                entry.session.discard_on_error_close();
                let _ = self.poll.registry().deregister(entry.stream.inner_mut());
                entry.stream.close();
            }
        }
        for entry in self.listeners.values_mut() {
            let _ = self.poll.registry().deregister(&mut entry.listener);
        }
        debug!(dropped = self.dropped_on_shutdown(), "server accept/read loop stopped");
    }
}

enum CloseKind {
    Regular,
    Error,
}

/// Handle to a running [`TcpServer`]'s background thread.
pub struct ServerHandle {
    shutdown_immediate: Arc<AtomicBool>,
    rejected_peers: Arc<AtomicUsize>,
    dropped_on_shutdown: Arc<AtomicUsize>,
    done: Arc<(Mutex<bool>, Condvar)>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown_immediate.clone()
    }

    pub fn rejected_peers(&self) -> usize {
        self.rejected_peers.load(Ordering::Relaxed)
    }

    pub fn dropped_on_shutdown(&self) -> usize {
        self.dropped_on_shutdown.load(Ordering::Relaxed)
    }

    /// Cooperative, non-cancelling shutdown (SPEC_FULL supplement #3):
    /// returns only once the accept/read loop has observed the flag and
    /// closed every session. `grace` only governs when a "taking longer
    /// than expected" warning is logged; the call still blocks until the
    /// loop actually exits, since sessions cannot be forcibly cancelled.
    pub fn shutdown(mut self, grace: Duration) {
        self.shutdown_immediate.store(true, Ordering::Relaxed);
        let (lock, cvar) = &*self.done;
        let start = Instant::now();
        let mut done = lock.lock().unwrap();
        while !*done {
            let (guard, timeout) = cvar.wait_timeout(done, grace.saturating_sub(start.elapsed())).unwrap();
            done = guard;
            if *done {
                break;
            }
            if timeout.timed_out() {
                warn!(elapsed_ms = start.elapsed().as_millis(), "shutdown exceeding grace period, still waiting");
            }
        }
        drop(done);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
