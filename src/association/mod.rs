#[cfg(test)]
mod association_test;

mod association_internal;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::aid::{AssociationId, AssociationIdGenerator};
use crate::config::Config;
use crate::error::Result;
use crate::events::PeerAddrEvent;
use crate::transport::TransportState;

pub(crate) use association_internal::AssociationInternal;

/// association state enums
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationState {
    Closed = 0,
    CookieWait = 1,
    CookieEchoed = 2,
    Established = 3,
    ShutdownAckSent = 4,
    ShutdownPending = 5,
    ShutdownReceived = 6,
    ShutdownSent = 7,
}

impl Default for AssociationState {
    fn default() -> Self {
        AssociationState::Closed
    }
}

impl From<u8> for AssociationState {
    fn from(v: u8) -> AssociationState {
        match v {
            1 => AssociationState::CookieWait,
            2 => AssociationState::CookieEchoed,
            3 => AssociationState::Established,
            4 => AssociationState::ShutdownAckSent,
            5 => AssociationState::ShutdownPending,
            6 => AssociationState::ShutdownReceived,
            7 => AssociationState::ShutdownSent,
            _ => AssociationState::Closed,
        }
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssociationState::Closed => "Closed",
            AssociationState::CookieWait => "CookieWait",
            AssociationState::CookieEchoed => "CookieEchoed",
            AssociationState::Established => "Established",
            AssociationState::ShutdownPending => "ShutdownPending",
            AssociationState::ShutdownSent => "ShutdownSent",
            AssociationState::ShutdownReceived => "ShutdownReceived",
            AssociationState::ShutdownAckSent => "ShutdownAckSent",
        };
        write!(f, "{}", s)
    }
}

/// Transport health-state commands applied by the chunk state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportCmd {
    Up,
    Down,
    PartiallyFailed,
}

impl fmt::Display for TransportCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            TransportCmd::Up => "Up",
            TransportCmd::Down => "Down",
            TransportCmd::PartiallyFailed => "PartiallyFailed",
        };
        write!(f, "{}", s)
    }
}

/// Why a transport transition happened; carried into the user notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SnError {
    FailedThreshold = 0,
    ReceivedSack = 1,
    HeartbeatSuccess = 2,
    ResponseToUserReq = 3,
    InternalError = 4,
    ShutdownGuardExpires = 5,
    PeerFaulty = 6,
}

/// Peer authentication parameters carried opaquely through the handshake;
/// key derivation happens elsewhere.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerAuthParams {
    pub random: Bytes,
    pub chunk_list: Bytes,
    pub hmac_algo: Bytes,
}

impl PeerAuthParams {
    pub(crate) fn is_empty(&self) -> bool {
        self.random.is_empty() && self.chunk_list.is_empty() && self.hmac_algo.is_empty()
    }
}

/// Peer parameters parsed out of a duplicate or restarting handshake, fed
/// into [`Association::update`].
#[derive(Debug, Default)]
pub struct PeerUpdate {
    pub peer_verification_tag: u32,
    /// The peer's freshly advertised receive window.
    pub rwnd: u32,
    /// The peer's initial TSN from the new handshake.
    pub initial_tsn: u32,
    /// Our next TSN as negotiated by the new handshake; only adopted on a
    /// true restart.
    pub next_tsn: u32,
    pub addip_serial: u32,
    pub sack_needed: bool,
    pub auth_capable: bool,
    /// The complete peer address set of the new handshake.
    pub addresses: Vec<(SocketAddr, TransportState)>,
    /// Auth parameters of the new handshake; moved into the association.
    pub auth: PeerAuthParams,
}

/// An SCTP association: one reliable session, potentially multi-homed.
///
/// This handle is the unit of reference counting; clones share the same
/// internal state and the association is destroyed when the last clone
/// drops. `close` marks the association dead first, so borrowers that still
/// hold a clone observe the flag and abandon their work.
#[derive(Clone)]
pub struct Association {
    name: String,
    state: Arc<AtomicU8>,
    dead: Arc<AtomicBool>,

    pub(crate) association_internal: Arc<Mutex<AssociationInternal>>,
}

impl Association {
    /// Create an association and the receiving end of its peer-address
    /// event stream. The id generator is the endpoint-wide allocation
    /// service; tests pass an isolated one.
    pub fn new(
        config: Config,
        aid_generator: Arc<dyn AssociationIdGenerator>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerAddrEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ai = AssociationInternal::new(config, aid_generator, events_tx);
        let name = ai.name.clone();
        let state = Arc::clone(&ai.state);
        let dead = Arc::clone(&ai.dead);

        (
            Association {
                name,
                state,
                dead,
                association_internal: Arc::new(Mutex::new(ai)),
            },
            events_rx,
        )
    }

    /// add_peer registers a peer destination address. Adding an address
    /// that is already present confirms it instead.
    pub async fn add_peer(&self, addr: SocketAddr, state: TransportState) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.add_peer(addr, state).map(|_| ())
    }

    /// remove_peer drops a peer destination address, re-electing paths and
    /// re-homing any of its in-flight data.
    pub async fn remove_peer(&self, addr: SocketAddr) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.remove_peer(addr)
    }

    /// set_primary makes `addr` the administratively preferred path.
    pub async fn set_primary(&self, addr: SocketAddr) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.set_primary_addr(addr)
    }

    /// control_transport applies an Up/Down/PartiallyFailed transition and
    /// re-elects the active and retransmission paths before returning.
    pub async fn control_transport(
        &self,
        addr: SocketAddr,
        cmd: TransportCmd,
        error: SnError,
    ) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.control_transport_addr(addr, cmd, error)
    }

    /// choose_alter_transport picks the path for the next retransmission,
    /// preferring divergence from the last path actually used.
    pub async fn choose_alter_transport(&self) -> Result<SocketAddr> {
        let mut ai = self.association_internal.lock().await;
        let last_sent_to = ai.last_sent_to;
        let id = ai.choose_alter_transport(last_sent_to)?;
        Ok(ai.transports[id].addr)
    }

    /// update applies a duplicate or restarting handshake to this
    /// association.
    pub async fn update(&self, peer: PeerUpdate) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.update(peer)
    }

    /// rwnd_increase returns window to the peer; the result says whether a
    /// window-update advertisement is warranted now.
    pub async fn rwnd_increase(&self, len: u32) -> Result<bool> {
        let mut ai = self.association_internal.lock().await;
        ai.check_alive()?;
        Ok(ai.rwnd_increase(len))
    }

    /// rwnd_decrease consumes window for received data.
    pub async fn rwnd_decrease(&self, len: u32) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.check_alive()?;
        ai.rwnd_decrease(len);
        Ok(())
    }

    pub async fn rwnd(&self) -> u32 {
        let ai = self.association_internal.lock().await;
        ai.rwnd.rwnd
    }

    /// The retransmission queue reports a chunk put on the wire on `addr`.
    pub async fn record_transmitted(
        &self,
        tsn: u32,
        user_data: Bytes,
        addr: SocketAddr,
    ) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.check_alive()?;
        let id = ai
            .transports
            .find(&addr)
            .ok_or(crate::error::Error::ErrTransportNotFound)?;
        ai.record_transmitted(tsn, user_data, id);
        Ok(())
    }

    /// The retransmission queue reports a chunk acked by the peer.
    pub async fn ack_transmitted(&self, tsn: u32) {
        let mut ai = self.association_internal.lock().await;
        ai.ack_transmitted(tsn);
    }

    /// Which path is this in-flight TSN attributed to?
    pub async fn transport_for_tsn(&self, tsn: u32) -> Option<SocketAddr> {
        let ai = self.association_internal.lock().await;
        ai.lookup_tsn(tsn).map(|id| ai.transports[id].addr)
    }

    pub async fn outstanding_bytes(&self) -> u32 {
        let ai = self.association_internal.lock().await;
        ai.outstanding_bytes()
    }

    /// The retransmission queue reports its queued-but-unsent length.
    pub async fn set_out_qlen(&self, out_qlen: usize) {
        let mut ai = self.association_internal.lock().await;
        ai.set_out_qlen(out_qlen);
    }

    /// Record a received TSN and advance the cumulative point.
    pub async fn mark_received(&self, tsn: u32) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.mark_received(tsn)
    }

    /// Buffer a received payload for delivery, consuming receive window.
    pub async fn buffer_received(&self, data: Bytes) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.check_alive()?;
        ai.buffer_received(data);
        Ok(())
    }

    /// Hand the oldest buffered payload to the user, returning window.
    pub async fn deliver_pending(&self) -> Option<Bytes> {
        let mut ai = self.association_internal.lock().await;
        ai.deliver_pending()
    }

    /// Note that `addr` was heard from, for path-election recency.
    pub async fn mark_heard(&self, addr: SocketAddr) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.check_alive()?;
        let id = ai
            .transports
            .find(&addr)
            .ok_or(crate::error::Error::ErrTransportNotFound)?;
        ai.mark_heard(id, std::time::Instant::now());
        Ok(())
    }

    /// Feed an RTT sample for `addr`; returns the new smoothed RTT.
    pub async fn transport_update_rto(&self, addr: SocketAddr, rtt: u64) -> Result<u64> {
        let mut ai = self.association_internal.lock().await;
        ai.check_alive()?;
        let id = ai
            .transports
            .find(&addr)
            .ok_or(crate::error::Error::ErrTransportNotFound)?;
        Ok(ai.transport_update_rto(id, rtt))
    }

    pub async fn association_id(&self) -> Option<AssociationId> {
        let ai = self.association_internal.lock().await;
        ai.assoc_id
    }

    pub async fn primary_path(&self) -> Option<SocketAddr> {
        let ai = self.association_internal.lock().await;
        ai.primary_path.map(|id| ai.transports[id].addr)
    }

    pub async fn active_path(&self) -> Option<SocketAddr> {
        let ai = self.association_internal.lock().await;
        ai.active_path.map(|id| ai.transports[id].addr)
    }

    pub async fn retran_path(&self) -> Option<SocketAddr> {
        let ai = self.association_internal.lock().await;
        ai.retran_path.map(|id| ai.transports[id].addr)
    }

    pub async fn transport_state(&self, addr: SocketAddr) -> Option<TransportState> {
        let ai = self.association_internal.lock().await;
        ai.transports
            .find(&addr)
            .map(|id| ai.transports[id].state)
    }

    /// close marks the association dead and tears down its state. Clones of
    /// this handle stay valid but every further operation is rejected.
    pub async fn close(&self) -> Result<()> {
        let mut ai = self.association_internal.lock().await;
        ai.free();
        Ok(())
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// set_state atomically sets the state of the Association.
    pub fn set_state(&self, new_state: AssociationState) {
        let old_state = AssociationState::from(self.state.swap(new_state as u8, Ordering::SeqCst));
        if new_state != old_state {
            log::debug!(
                "[{}] state change: '{}' => '{}'",
                self.name,
                old_state,
                new_state,
            );
        }
    }

    /// get_state atomically returns the state of the Association.
    pub fn get_state(&self) -> AssociationState {
        self.state.load(Ordering::SeqCst).into()
    }
}
