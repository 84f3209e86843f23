//! # Client Sessions
//!
//! One [`Session`] per accepted socket. It carries the negotiated protocol
//! version, the login state machine, the actor the client controls and the
//! outbound queue drained by the session's writer task.
//!
//! # State Machine
//!
//! ```text
//! NotConnected --login--> Connecting --world init--> Playing
//!       |                     |                         |
//!       |                     |                   socket lost
//!       |                     |                         v
//!       +---------------------+-----------------> Linkdead --grace--> Disconnected
//! ```
//!
//! Every transition is a compare-and-set under the session's state lock, so
//! two packets racing on one socket can never both win a transition.
//! `Disconnected` is terminal.

use bytes::Bytes;
use parking_lot::Mutex;
use realmd_core::{ClientVersion, RealmError, Result, SessionId};
use realmd_protocol::{Direction, PacketHistory};
use realmd_world::{Actor, ClientLink};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Login state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Socket accepted, no login yet
    NotConnected,
    /// Credentials accepted, character not in the world yet
    Connecting,
    Playing,
    /// Socket lost while playing; the actor lingers until the grace timeout
    Linkdead,
    Disconnected,
}

/// How far behind the highest inbound sequence a packet may arrive
pub const SEQUENCE_LATE_WINDOW: u16 = 0x4000;

impl SessionState {
    pub const ALL: &'static [SessionState] = &[
        Self::NotConnected,
        Self::Connecting,
        Self::Playing,
        Self::Linkdead,
        Self::Disconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not connected",
            Self::Connecting => "connecting",
            Self::Playing => "playing",
            Self::Linkdead => "linkdead",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic counters
#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub packets_in: AtomicU64,
    pub packets_out: AtomicU64,
}

/// Snapshot of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounts {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
}

impl TrafficCounts {
    pub fn add(&mut self, other: TrafficCounts) {
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;
        self.packets_in += other.packets_in;
        self.packets_out += other.packets_out;
    }
}

/// Per-client connection state
///
/// # Thread Safety
/// Shared between the reader task, the writer task and region schedulers
/// (through the actor's [`ClientLink`]). Outbound frames go through an
/// unbounded channel, so senders never block and frames of one session are
/// written in the order they were queued.
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    connected_at: Instant,
    state: Mutex<SessionState>,
    version: AtomicU16,
    account: Mutex<Option<String>>,
    character_id: AtomicU32,
    actor: Mutex<Option<Arc<Actor>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    closed: watch::Sender<bool>,
    last_sequence: Mutex<Option<u16>>,
    bad_packets: AtomicU32,
    history: Mutex<PacketHistory>,
    stats: SessionStats,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue
    pub fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        history_len: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            state: Mutex::new(SessionState::NotConnected),
            version: AtomicU16::new(ClientVersion::MIN.get()),
            account: Mutex::new(None),
            character_id: AtomicU32::new(0),
            actor: Mutex::new(None),
            outbound: Mutex::new(Some(tx)),
            closed,
            last_sequence: Mutex::new(None),
            bad_packets: AtomicU32::new(0),
            history: Mutex::new(PacketHistory::new(history_len)),
            stats: SessionStats::default(),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move from one of `from` to `to`
    ///
    /// # Errors
    /// `StateViolation` when the current state is not in `from`, or when the
    /// session is already disconnected; the state is left untouched.
    pub fn transition(&self, from: &[SessionState], to: SessionState) -> Result<SessionState> {
        let mut state = self.state.lock();
        if state.is_terminal() || !from.contains(&*state) {
            return Err(RealmError::StateViolation(format!(
                "session {} cannot go from {} to {}",
                self.id, *state, to
            )));
        }
        let previous = *state;
        *state = to;
        tracing::debug!("Session {}: {} -> {}", self.id, previous, to);
        Ok(previous)
    }

    /// Enter the terminal state from anywhere
    ///
    /// # Returns
    /// The previous state, `None` if already disconnected.
    pub fn mark_disconnected(&self) -> Option<SessionState> {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return None;
        }
        let previous = *state;
        *state = SessionState::Disconnected;
        tracing::debug!("Session {}: {} -> disconnected", self.id, previous);
        Some(previous)
    }

    pub fn version(&self) -> ClientVersion {
        ClientVersion::new(self.version.load(Ordering::Acquire))
    }

    pub fn set_version(&self, version: ClientVersion) {
        self.version.store(version.get(), Ordering::Release);
    }

    pub fn account(&self) -> Option<String> {
        self.account.lock().clone()
    }

    pub fn set_account(&self, account: Option<String>) {
        *self.account.lock() = account;
    }

    pub fn character_id(&self) -> u32 {
        self.character_id.load(Ordering::Acquire)
    }

    pub fn set_character_id(&self, id: u32) {
        self.character_id.store(id, Ordering::Release);
    }

    pub fn actor(&self) -> Option<Arc<Actor>> {
        self.actor.lock().clone()
    }

    pub fn set_actor(&self, actor: Option<Arc<Actor>>) {
        *self.actor.lock() = actor;
    }

    /// Take the actor out, breaking the session/actor reference cycle
    pub fn take_actor(&self) -> Option<Arc<Actor>> {
        self.actor.lock().take()
    }

    /// Check an inbound sequence number
    ///
    /// Sequences are compared in wrapping arithmetic against the highest one
    /// seen so far. Late and duplicated packets up to [`SEQUENCE_LATE_WINDOW`]
    /// behind are accepted and leave the highest sequence untouched.
    ///
    /// # Returns
    /// `false` when the sequence lies further behind than the window, which
    /// only happens on a corrupted or forged stream.
    pub fn check_sequence(&self, sequence: u16) -> bool {
        let mut highest = self.last_sequence.lock();
        let Some(previous) = *highest else {
            *highest = Some(sequence);
            return true;
        };
        let delta = sequence.wrapping_sub(previous) as i16;
        if delta >= 0 {
            *highest = Some(sequence);
            true
        } else {
            delta.unsigned_abs() <= SEQUENCE_LATE_WINDOW
        }
    }

    /// Count one malformed packet
    ///
    /// # Returns
    /// The total so far.
    pub fn note_bad_packet(&self) -> u32 {
        self.bad_packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn bad_packets(&self) -> u32 {
        self.bad_packets.load(Ordering::Relaxed)
    }

    pub fn record_inbound(&self, opcode: u8, payload: &[u8], wire_size: usize) {
        self.stats.packets_in.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_in.fetch_add(wire_size as u64, Ordering::Relaxed);
        self.history.lock().record(Direction::Inbound, opcode, payload);
    }

    /// Log the recent packet history at info level
    pub fn dump_history(&self) {
        let owner = match self.account() {
            Some(account) => format!("session {} ({})", self.id, account),
            None => format!("session {}", self.id),
        };
        self.history.lock().dump(&owner);
    }

    pub fn traffic(&self) -> TrafficCounts {
        TrafficCounts {
            bytes_in: self.stats.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.stats.bytes_out.load(Ordering::Relaxed),
            packets_in: self.stats.packets_in.load(Ordering::Relaxed),
            packets_out: self.stats.packets_out.load(Ordering::Relaxed),
        }
    }

    /// Queue a frame regardless of the login state
    ///
    /// Used for replies during login; gameplay traffic goes through
    /// [`ClientLink::send`], which drops frames for sessions not in play.
    pub fn send_raw(&self, frame: Bytes) {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return;
        };
        let opcode = frame.get(2).copied().unwrap_or(0);
        self.history.lock().record(Direction::Outbound, opcode, &frame);
        self.stats.packets_out.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_out.fetch_add(frame.len() as u64, Ordering::Relaxed);
        if tx.send(frame).is_err() {
            tracing::trace!("Session {} writer already gone", self.id);
        }
    }

    /// Stop accepting outbound frames and ask the reader to stop
    ///
    /// Frames already queued are still written before the socket closes.
    pub fn close(&self) {
        self.outbound.lock().take();
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` once [`Session::close`] ran
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl ClientLink for Session {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn version(&self) -> ClientVersion {
        Session::version(self)
    }

    fn is_connected(&self) -> bool {
        matches!(self.state(), SessionState::Connecting | SessionState::Playing) && !self.is_closed()
    }

    fn send(&self, frame: Bytes) {
        self.send_raw(frame);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("version", &self.version())
            .field("account", &self.account())
            .finish()
    }
}
