
use super::*;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::random;

use crate::aid::AssociationIdGenerator;
use crate::config::{Config, DEFAULT_MAX_WINDOW};
use crate::elector;
use crate::error::Error;
use crate::events::PeerAddrChange;
use crate::rwnd::WindowTracker;
use crate::transport::set::TransportSet;
use crate::transport::TransportId;
use crate::util::{sna32gt, sna32lt};

pub(crate) const TSN_MAP_INITIAL_CAPACITY: u32 = 4096;
pub(crate) const TSN_MAP_MAX_CAPACITY: u32 = 64 * 1024;

/// Tracks which TSNs past the cumulative point have been received. The
/// window slides as the cumulative point advances; capacity is bounded so a
/// hostile or broken peer cannot grow it without limit.
#[derive(Debug, Default)]
pub(crate) struct TsnMap {
    base_tsn: u32,
    len: u32,
    bits: Vec<u64>,
}

impl TsnMap {
    pub(crate) fn init(&mut self, base_tsn: u32, capacity: u32) -> Result<()> {
        if capacity > TSN_MAP_MAX_CAPACITY {
            return Err(Error::ErrTsnMapCapacity);
        }
        self.base_tsn = base_tsn;
        self.len = capacity;
        self.bits.clear();
        self.bits.resize((capacity as usize + 63) / 64, 0);
        Ok(())
    }

    pub(crate) fn mark(&mut self, tsn: u32) -> Result<()> {
        if self.len == 0 {
            self.init(tsn, TSN_MAP_INITIAL_CAPACITY)?;
        }
        if sna32lt(tsn, self.base_tsn) {
            // Duplicate of something already cumulatively acked.
            return Ok(());
        }

        let gap = tsn.wrapping_sub(self.base_tsn);
        if gap >= self.len {
            let needed = gap.checked_add(1).ok_or(Error::ErrTsnMapCapacity)?;
            if needed > TSN_MAP_MAX_CAPACITY {
                return Err(Error::ErrTsnMapCapacity);
            }
            let cap = needed
                .next_power_of_two()
                .clamp(TSN_MAP_INITIAL_CAPACITY, TSN_MAP_MAX_CAPACITY);
            self.len = cap;
            self.bits.resize((cap as usize + 63) / 64, 0);
        }

        self.bits[(gap / 64) as usize] |= 1 << (gap % 64);
        Ok(())
    }

    pub(crate) fn is_marked(&self, tsn: u32) -> bool {
        if sna32lt(tsn, self.base_tsn) {
            return true;
        }
        let gap = tsn.wrapping_sub(self.base_tsn);
        if gap >= self.len {
            return false;
        }
        (self.bits[(gap / 64) as usize] >> (gap % 64)) & 1 == 1
    }

    /// Slide the window past every contiguously received TSN and return the
    /// new cumulative point (one below the base).
    pub(crate) fn advance(&mut self) -> u32 {
        let mut run = 0u32;
        while run < self.len {
            if (self.bits[(run / 64) as usize] >> (run % 64)) & 1 == 0 {
                break;
            }
            run += 1;
        }

        if run > 0 {
            self.base_tsn = self.base_tsn.wrapping_add(run);
            self.shift_right(run);
        }
        self.base_tsn.wrapping_sub(1)
    }

    fn shift_right(&mut self, n: u32) {
        let words = ((n / 64) as usize).min(self.bits.len());
        if words > 0 {
            self.bits.drain(..words);
            self.bits.extend(std::iter::repeat(0).take(words));
        }
        let shift = n % 64;
        if shift > 0 {
            for i in 0..self.bits.len() {
                let hi = if i + 1 < self.bits.len() {
                    self.bits[i + 1]
                } else {
                    0
                };
                self.bits[i] = (self.bits[i] >> shift) | (hi << (64 - shift));
            }
        }
    }
}

/// Per-stream sequence numbering, reset wholesale on association restart.
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct StreamSeq {
    pub(crate) next_ssn: u16,
    pub(crate) expected_ssn: u16,
}

#[derive(Default)]
pub struct AssociationInternal {
    pub(crate) name: String,
    pub(crate) state: Arc<AtomicU8>,
    /// Set once under the association lock at teardown; everything checks
    /// it before mutating.
    pub(crate) dead: Arc<AtomicBool>,

    pub(crate) assoc_id: Option<AssociationId>,
    aid_generator: Option<Arc<dyn AssociationIdGenerator>>,

    pub(crate) my_verification_tag: u32,
    pub(crate) peer_verification_tag: u32,

    pub(crate) my_next_tsn: u32,
    pub(crate) cumulative_tsn_ack_point: u32,
    pub(crate) advanced_peer_tsn_ack_point: u32,
    pub(crate) highest_sacked: u32,
    pub(crate) peer_last_tsn: u32,
    pub(crate) tsn_map: TsnMap,

    pub(crate) overall_error_count: u32,
    pub(crate) max_retrans: u32,

    // All information about our peer.
    pub(crate) peer_rwnd: u32,
    pub(crate) peer_port: u16,
    pub(crate) local_port: u16,
    pub(crate) peer_sack_needed: bool,
    pub(crate) peer_auth_capable: bool,
    pub(crate) addip_serial: u32,

    pub(crate) transports: TransportSet,
    pub(crate) primary_path: Option<TransportId>,
    pub(crate) active_path: Option<TransportId>,
    pub(crate) retran_path: Option<TransportId>,
    pub(crate) last_sent_to: Option<TransportId>,
    pub(crate) last_data_from: Option<TransportId>,
    pub(crate) init_last_sent_to: Option<TransportId>,
    pub(crate) shutdown_last_sent_to: Option<TransportId>,

    pub(crate) rwnd: WindowTracker,
    pub(crate) will_send_window_update: bool,
    /// Received payloads not yet handed to the user; their byte count is
    /// the receive-buffer occupancy the window tracker works against.
    pending_delivery: VecDeque<Bytes>,
    rmem_used: usize,

    /// Queued-but-unsent length, reported by the retransmission queue.
    pub(crate) out_qlen: usize,

    pub(crate) streams: HashMap<u16, StreamSeq>,

    pub(crate) local_auth: PeerAuthParams,
    pub(crate) peer_auth: PeerAuthParams,
    pub(crate) association_shared_key: Bytes,

    // Address-family capabilities from the bind-address layer.
    pub(crate) ipv4_capable: bool,
    pub(crate) ipv6_capable: bool,

    pub(crate) pathmtu: u32,
    pub(crate) rto_initial: Duration,
    pub(crate) rto_min: Duration,
    pub(crate) rto_max: Duration,
    pub(crate) hb_interval: Duration,
    pub(crate) pf_retrans: u32,
    pub(crate) pf_expose: bool,
    pub(crate) max_transports: usize,

    events_tx: Option<mpsc::UnboundedSender<PeerAddrEvent>>,
}

impl AssociationInternal {
    pub(crate) fn new(
        config: Config,
        aid_generator: Arc<dyn AssociationIdGenerator>,
        events_tx: mpsc::UnboundedSender<PeerAddrEvent>,
    ) -> Self {
        let mut tsn = random::<u32>();
        if tsn == 0 {
            tsn += 1;
        }
        let mut vtag = random::<u32>();
        if vtag == 0 {
            vtag += 1;
        }

        let a = AssociationInternal {
            name: config.name,
            local_port: config.local_port,
            peer_port: config.peer_port,
            ipv4_capable: config.ipv4_capable,
            ipv6_capable: config.ipv6_capable,
            pathmtu: config.pathmtu,
            rto_initial: config.rto_initial,
            rto_min: config.rto_min,
            rto_max: config.rto_max,
            hb_interval: config.hb_interval,
            max_retrans: config.max_retrans,
            pf_retrans: config.pf_retrans,
            pf_expose: config.pf_expose,
            max_transports: config.max_transports,

            my_verification_tag: vtag,
            my_next_tsn: tsn,
            cumulative_tsn_ack_point: tsn.wrapping_sub(1),
            advanced_peer_tsn_ack_point: tsn.wrapping_sub(1),
            highest_sacked: tsn.wrapping_sub(1),

            rwnd: WindowTracker::new(
                config.max_receive_buffer_size,
                config.pathmtu,
                config.rwnd_update_shift,
            ),

            local_auth: PeerAuthParams {
                random: Bytes::copy_from_slice(&random::<[u8; 32]>()),
                ..Default::default()
            },

            state: Arc::new(AtomicU8::new(AssociationState::Closed as u8)),
            dead: Arc::new(AtomicBool::new(false)),
            aid_generator: Some(aid_generator),
            events_tx: Some(events_tx),
            ..Default::default()
        };

        log::debug!(
            "[{}] created: my_vtag={} initial_tsn={}",
            a.name,
            a.my_verification_tag,
            a.my_next_tsn
        );

        a
    }

    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            Err(Error::ErrAssociationDead)
        } else {
            Ok(())
        }
    }

    /// set_state atomically sets the state of the Association.
    pub(crate) fn set_state(&self, new_state: AssociationState) {
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
    pub(crate) fn get_state(&self) -> AssociationState {
        self.state.load(Ordering::SeqCst).into()
    }

    fn is_established_or_later(&self) -> bool {
        matches!(
            self.get_state(),
            AssociationState::Established
                | AssociationState::ShutdownPending
                | AssociationState::ShutdownSent
                | AssociationState::ShutdownReceived
                | AssociationState::ShutdownAckSent
        )
    }

    fn notify(&self, addr: SocketAddr, change: PeerAddrChange, error: u32) {
        if let Some(events_tx) = &self.events_tx {
            let _ = events_tx.send(PeerAddrEvent {
                addr,
                change,
                error,
            });
        }
    }

    /// add_peer registers a destination address for the peer. Adding an
    /// address that already has a record confirms it instead of duplicating
    /// membership.
    pub(crate) fn add_peer(
        &mut self,
        addr: SocketAddr,
        peer_state: TransportState,
    ) -> Result<TransportId> {
        self.check_alive()?;

        match addr {
            SocketAddr::V4(_) if !self.ipv4_capable => {
                return Err(Error::ErrAddressFamilyUnsupported)
            }
            SocketAddr::V6(_) if !self.ipv6_capable => {
                return Err(Error::ErrAddressFamilyUnsupported)
            }
            _ => {}
        }

        // Set the peer port if it has not been set yet.
        if self.peer_port == 0 {
            self.peer_port = addr.port();
        }

        // Refuse before registering anything, so a failed add leaves no
        // partial record behind.
        if self.transports.find(&addr).is_none() && self.transports.len() >= self.max_transports {
            return Err(Error::ErrTransportLimitExceeded);
        }

        let (id, added) = self.transports.add(
            addr,
            peer_state,
            self.pathmtu,
            DEFAULT_MAX_WINDOW,
            self.rto_initial,
            Instant::now(),
        );
        if !added {
            log::trace!(
                "[{}] add_peer: {} already present, state={}",
                self.name,
                addr,
                self.transports[id].state
            );
            // A duplicate add may have confirmed an Unknown path; paths are
            // re-elected so the confirmation takes effect immediately.
            self.select_paths();
            return Ok(id);
        }

        // The first path seeds the association PMTU; afterwards the
        // association runs at the floor across paths.
        let peer_pathmtu = self.transports[id].pathmtu;
        self.pathmtu = if self.pathmtu != 0 {
            std::cmp::min(peer_pathmtu, self.pathmtu)
        } else {
            peer_pathmtu
        };
        self.rwnd.pathmtu = self.pathmtu;

        log::debug!(
            "[{}] add_peer: {} state={} (transports={})",
            self.name,
            addr,
            peer_state,
            self.transports.len()
        );

        // If we do not yet have a primary path, set one.
        if self.primary_path.is_none() {
            self.set_primary(id);
            self.retran_path = Some(id);
        }

        self.notify(addr, PeerAddrChange::Added, 0);
        Ok(id)
    }

    /// remove_peer drops a destination address. The association must keep
    /// at least one path; removing the last one is a protocol
    /// inconsistency.
    pub(crate) fn remove_peer(&mut self, addr: SocketAddr) -> Result<()> {
        self.check_alive()?;
        let id = self
            .transports
            .find(&addr)
            .ok_or(Error::ErrTransportNotFound)?;
        self.rm_peer(id)
    }

    fn rm_peer(&mut self, id: TransportId) -> Result<()> {
        if self.transports.len() <= 1 {
            return Err(Error::ErrRemoveLastTransport);
        }
        let addr = self.transports[id].addr;

        // Every reference that pointed at the removed path falls back on
        // the first remaining one; the re-election below refines this.
        let fallback = match self.transports.ids().find(|&t| t != id) {
            Some(t) => t,
            None => return Err(Error::ErrRemoveLastTransport),
        };

        if self.primary_path == Some(id) {
            self.set_primary(fallback);
        }
        if self.active_path == Some(id) {
            self.active_path = Some(fallback);
        }
        if self.retran_path == Some(id) {
            self.retran_path = Some(fallback);
        }
        if self.last_data_from == Some(id) {
            self.last_data_from = Some(fallback);
        }
        // References that only remember where something was last sent are
        // cleared; the next send re-decides.
        if self.last_sent_to == Some(id) {
            self.last_sent_to = None;
        }
        if self.init_last_sent_to == Some(id) {
            self.init_last_sent_to = None;
        }
        if self.shutdown_last_sent_to == Some(id) {
            self.shutdown_last_sent_to = None;
        }

        // In-flight chunks need a new retransmission home before the record
        // goes away.
        let migrate_to = self.active_path.unwrap_or(fallback);
        self.transports.remove(id, migrate_to);

        log::debug!(
            "[{}] rm_peer: {} (transports={})",
            self.name,
            addr,
            self.transports.len()
        );

        self.select_paths();
        self.notify(addr, PeerAddrChange::Removed, 0);
        Ok(())
    }

    /// set_primary changes the administratively preferred path and keeps
    /// the SFR-CACC changeover bookkeeping honest.
    pub(crate) fn set_primary(&mut self, id: TransportId) {
        // It's a changeover only if we already had a different primary.
        let changeover = match self.primary_path {
            Some(p) => p != id,
            None => false,
        };

        self.primary_path = Some(id);

        // If the primary is changing, assume the user wants new data on
        // the new path, provided it is usable.
        let state = self.transports[id].state;
        if state == TransportState::Active || state == TransportState::Unknown {
            self.active_path = Some(id);
        }

        // SFR-CACC: the changeover state only matters while data is queued
        // or outstanding; otherwise skip the bookkeeping entirely.
        if self.outstanding_bytes() == 0 && self.out_qlen == 0 {
            return;
        }

        let next_tsn = self.my_next_tsn;
        let t = &mut self.transports[id];
        if t.cacc.changeover_active {
            // A second switch to this destination during an active switch.
            t.cacc.cycling_changeover = changeover;
        }
        t.cacc.changeover_active = changeover;
        t.cacc.next_tsn_at_change = next_tsn;
    }

    pub(crate) fn set_primary_addr(&mut self, addr: SocketAddr) -> Result<()> {
        self.check_alive()?;
        let id = self
            .transports
            .find(&addr)
            .ok_or(Error::ErrTransportNotFound)?;
        self.set_primary(id);
        self.notify(addr, PeerAddrChange::MadePrimary, 0);
        Ok(())
    }

    /// control_transport applies an Up/Down/PartiallyFailed transition to
    /// one path and re-elects the active and retransmission paths before
    /// returning, so no send decision ever sees a half-applied change.
    pub(crate) fn control_transport(
        &mut self,
        id: TransportId,
        cmd: TransportCmd,
        error: SnError,
    ) -> Result<()> {
        self.check_alive()?;

        let addr = self.transports[id].addr;
        let mut ulp_notify = true;
        let mut change = PeerAddrChange::Available;

        match cmd {
            TransportCmd::Up => {
                let pf_expose = self.pf_expose;
                let t = &mut self.transports[id];
                // Recovery from a partial failure stays quiet unless the
                // user asked to see PF transitions.
                if t.state == TransportState::PartiallyFailed && !pf_expose {
                    ulp_notify = false;
                } else if t.state == TransportState::Unconfirmed
                    && error == SnError::HeartbeatSuccess
                {
                    change = PeerAddrChange::Confirmed;
                }
                t.state = TransportState::Active;
            }
            TransportCmd::Down => {
                let t = &mut self.transports[id];
                // A path that never confirmed cannot become inactive; the
                // connection was never established on it. Drop the cached
                // route though, there may be a better one next time.
                if t.state != TransportState::Unconfirmed {
                    t.state = TransportState::Inactive;
                } else {
                    t.clear_dst_cache();
                    ulp_notify = false;
                }
                change = PeerAddrChange::Unreachable;
            }
            TransportCmd::PartiallyFailed => {
                self.transports[id].state = TransportState::PartiallyFailed;
                if self.pf_expose {
                    change = PeerAddrChange::PotentiallyFailed;
                } else {
                    ulp_notify = false;
                }
            }
        }

        log::debug!(
            "[{}] control_transport: {} cmd={} => {}",
            self.name,
            addr,
            cmd,
            self.transports[id].state
        );

        if ulp_notify {
            self.notify(addr, change, error as u32);
        }

        self.select_paths();
        Ok(())
    }

    pub(crate) fn control_transport_addr(
        &mut self,
        addr: SocketAddr,
        cmd: TransportCmd,
        error: SnError,
    ) -> Result<()> {
        let id = self
            .transports
            .find(&addr)
            .ok_or(Error::ErrTransportNotFound)?;
        self.control_transport(id, cmd, error)
    }

    /// Recompute active and retransmission paths from current health state.
    pub(crate) fn select_paths(&mut self) {
        let primary = match self.primary_path {
            Some(p) => p,
            None => return,
        };
        let active = self.active_path.unwrap_or(primary);

        let (active_path, retran_path) =
            elector::select_active_and_retran_path(&self.transports, primary, active);
        self.active_path = Some(active_path);
        self.retran_path = Some(retran_path);

        log::trace!(
            "[{}] elected active={} retran={}",
            self.name,
            self.transports[active_path].addr,
            self.transports[retran_path].addr
        );
    }

    pub(crate) fn update_retran_path(&mut self) {
        if let (Some(active), Some(retran)) = (self.active_path, self.retran_path) {
            let next = elector::update_retran_path(&self.transports, active, retran);
            if Some(next) != self.retran_path {
                log::trace!(
                    "[{}] retran path => {}",
                    self.name,
                    self.transports[next].addr
                );
            }
            self.retran_path = Some(next);
        }
    }

    /// Pick the path for the next retransmission. First send goes on the
    /// active path; afterwards prefer a path that differs from the one the
    /// data was last sent on, rotating through the candidates.
    pub(crate) fn choose_alter_transport(
        &mut self,
        last_sent_to: Option<TransportId>,
    ) -> Result<TransportId> {
        self.check_alive()?;
        match last_sent_to {
            None => self.active_path.ok_or(Error::ErrNoTransports),
            Some(last) => {
                if Some(last) == self.retran_path {
                    self.update_retran_path();
                }
                self.retran_path.ok_or(Error::ErrNoTransports)
            }
        }
    }

    /// update applies a duplicate or restarting handshake: adopt the peer's
    /// freshly advertised parameters, drop paths it no longer lists, and
    /// either restart our own numbering (established) or merge the racing
    /// handshake (still connecting).
    pub(crate) fn update(&mut self, new: PeerUpdate) -> Result<()> {
        self.check_alive()?;

        // Copy in new parameters of peer.
        self.peer_verification_tag = new.peer_verification_tag;
        self.peer_rwnd = new.rwnd;
        self.peer_sack_needed = new.sack_needed;
        self.peer_auth_capable = new.auth_capable;
        self.addip_serial = new.addip_serial;

        self.tsn_map.init(new.initial_tsn, TSN_MAP_INITIAL_CAPACITY)?;
        self.peer_last_tsn = new.initial_tsn.wrapping_sub(1);

        let restart = self.is_established_or_later();

        // Remove any peer addresses not present in the new handshake; a
        // restart also resets what we learned about the survivors.
        let stale: Vec<TransportId> = self
            .transports
            .ids()
            .filter(|&id| {
                let addr = self.transports[id].addr;
                !new.addresses.iter().any(|(a, _)| *a == addr)
            })
            .collect();
        for id in stale {
            self.rm_peer(id)?;
        }
        if restart {
            let pathmtu = self.pathmtu;
            let ssthresh = if self.peer_rwnd != 0 {
                self.peer_rwnd
            } else {
                DEFAULT_MAX_WINDOW
            };
            let rto_initial = self.rto_initial;
            let survivors: Vec<TransportId> = self.transports.ids().collect();
            for id in survivors {
                self.transports[id].reset(pathmtu, ssthresh, rto_initial);
            }
        }

        if restart {
            // Case A, a true restart: the new handshake's numbering wins.
            self.my_next_tsn = new.next_tsn;
            self.cumulative_tsn_ack_point = self.my_next_tsn.wrapping_sub(1);
            self.advanced_peer_tsn_ack_point = self.cumulative_tsn_ack_point;

            // The peer's stream numbering starts over.
            for seq in self.streams.values_mut() {
                *seq = StreamSeq::default();
            }

            // Anything received but not yet delivered is stale now.
            self.flush_pending_delivery();

            // A legitimate restart must not inherit its predecessor's
            // error count and get torn down right away.
            self.overall_error_count = 0;

            log::debug!(
                "[{}] restart: next_tsn={} peer_rwnd={}",
                self.name,
                self.my_next_tsn,
                self.peer_rwnd
            );
        } else {
            // Case B, a duplicate handshake while still connecting: merge
            // any addresses we have not seen, keep our own numbering.
            let missing: Vec<(SocketAddr, TransportState)> = new
                .addresses
                .iter()
                .filter(|(a, _)| self.transports.find(a).is_none())
                .copied()
                .collect();
            for (addr, state) in missing {
                self.add_peer(addr, state)?;
            }

            self.cumulative_tsn_ack_point = self.my_next_tsn.wrapping_sub(1);
            self.advanced_peer_tsn_ack_point = self.cumulative_tsn_ack_point;

            self.set_id();
        }

        // Take over the new handshake's auth parameters and refresh the
        // active key from them.
        self.peer_auth = new.auth;
        self.refresh_active_key();

        Ok(())
    }

    /// Assign an association id if none is set yet.
    pub(crate) fn set_id(&mut self) {
        if self.assoc_id.is_some() {
            return;
        }
        if let Some(aid_generator) = &self.aid_generator {
            let aid = aid_generator.generate_aid();
            log::trace!("[{}] assigned assoc_id={}", self.name, aid);
            self.assoc_id = Some(aid);
        }
    }

    /// Rebuild the active key material after auth parameters changed.
    /// Actual key derivation is the auth collaborator's job; this keeps the
    /// input material it derives from.
    fn refresh_active_key(&mut self) {
        let mut key = Vec::with_capacity(
            self.local_auth.random.len()
                + self.local_auth.chunk_list.len()
                + self.local_auth.hmac_algo.len()
                + self.peer_auth.random.len()
                + self.peer_auth.chunk_list.len()
                + self.peer_auth.hmac_algo.len(),
        );
        key.extend_from_slice(&self.local_auth.random);
        key.extend_from_slice(&self.local_auth.chunk_list);
        key.extend_from_slice(&self.local_auth.hmac_algo);
        key.extend_from_slice(&self.peer_auth.random);
        key.extend_from_slice(&self.peer_auth.chunk_list);
        key.extend_from_slice(&self.peer_auth.hmac_algo);
        self.association_shared_key = Bytes::from(key);
    }

    /// rwnd_decrease consumes receive window for `len` bytes of data.
    pub(crate) fn rwnd_decrease(&mut self, len: u32) {
        let buffer_full = self.rmem_used >= self.rwnd.max_receive_buffer_size as usize;
        self.rwnd.decrease(len, buffer_full);
        log::trace!(
            "[{}] rwnd decreased by {} to {} (over={} press={})",
            self.name,
            len,
            self.rwnd.rwnd,
            self.rwnd.rwnd_over,
            self.rwnd.rwnd_press
        );
    }

    /// rwnd_increase returns receive window for `len` bytes handed to the
    /// user; the result says whether a window update should go out now.
    pub(crate) fn rwnd_increase(&mut self, len: u32) -> bool {
        self.rwnd.increase(len);

        let update = match self.get_state() {
            AssociationState::Established
            | AssociationState::ShutdownPending
            | AssociationState::ShutdownReceived
            | AssociationState::ShutdownSent => self.rwnd.needs_update(),
            _ => false,
        };
        if update {
            log::trace!(
                "[{}] window update warranted: rwnd={} a_rwnd={}",
                self.name,
                self.rwnd.rwnd,
                self.rwnd.a_rwnd
            );
            self.rwnd.mark_advertised();
            self.will_send_window_update = true;
        }
        update
    }

    /// Buffer a received payload for delivery, consuming window for it.
    pub(crate) fn buffer_received(&mut self, data: Bytes) {
        let len = data.len();
        self.rmem_used += len;
        self.pending_delivery.push_back(data);
        self.rwnd_decrease(len as u32);
    }

    /// Hand the oldest buffered payload to the user, returning window.
    pub(crate) fn deliver_pending(&mut self) -> Option<Bytes> {
        let data = self.pending_delivery.pop_front()?;
        self.rmem_used -= data.len();
        self.rwnd_increase(data.len() as u32);
        Some(data)
    }

    pub(crate) fn flush_pending_delivery(&mut self) {
        self.pending_delivery.clear();
        self.rmem_used = 0;
    }

    pub(crate) fn rmem_used(&self) -> usize {
        self.rmem_used
    }

    /// Record a received TSN and advance the cumulative point.
    pub(crate) fn mark_received(&mut self, tsn: u32) -> Result<()> {
        self.check_alive()?;
        self.tsn_map.mark(tsn)?;
        self.peer_last_tsn = self.tsn_map.advance();
        Ok(())
    }

    /// The retransmission queue reports a chunk put on the wire.
    pub(crate) fn record_transmitted(&mut self, tsn: u32, user_data: Bytes, id: TransportId) {
        self.transports.push_inflight(tsn, user_data, id);
        self.mark_sent(id, Instant::now());
        if !sna32lt(tsn, self.my_next_tsn) {
            self.my_next_tsn = tsn.wrapping_add(1);
        }
    }

    /// The retransmission queue reports a chunk acked by the peer.
    pub(crate) fn ack_transmitted(&mut self, tsn: u32) {
        if self.transports.ack_inflight(tsn).is_some() {
            if sna32gt(tsn, self.highest_sacked) {
                self.highest_sacked = tsn;
            }
            if tsn == self.cumulative_tsn_ack_point.wrapping_add(1) {
                self.cumulative_tsn_ack_point = tsn;
            }
        }
    }

    /// Which path does this in-flight TSN belong to? Checks the active
    /// path's list first.
    pub(crate) fn lookup_tsn(&self, tsn: u32) -> Option<TransportId> {
        self.transports.lookup_tsn(tsn, self.active_path)
    }

    pub(crate) fn outstanding_bytes(&self) -> u32 {
        self.transports.outstanding_bytes()
    }

    pub(crate) fn set_out_qlen(&mut self, out_qlen: usize) {
        self.out_qlen = out_qlen;
    }

    pub(crate) fn mark_sent(&mut self, id: TransportId, now: Instant) {
        self.transports[id].last_time_sent = now;
        self.last_sent_to = Some(id);
    }

    pub(crate) fn mark_heard(&mut self, id: TransportId, now: Instant) {
        self.transports[id].last_time_heard = now;
        self.last_data_from = Some(id);
    }

    /// Feed an RTT sample for one path into its smoothed estimate.
    pub(crate) fn transport_update_rto(&mut self, id: TransportId, rtt: u64) -> u64 {
        let (rto_min, rto_max) = (self.rto_min, self.rto_max);
        let t = &mut self.transports[id];
        let srtt = t.update_rto(rtt, rto_min, rto_max);
        t.rto_pending = false;
        log::trace!(
            "[{}] SRTT: {} RTO: {:?} ({})",
            self.name,
            srtt,
            t.rto,
            t.addr
        );
        srtt
    }

    /// Keep the association PMTU at the floor across all paths.
    pub(crate) fn sync_pmtu(&mut self) {
        let min = self
            .transports
            .ids()
            .map(|id| self.transports[id].pathmtu)
            .min();
        if let Some(min) = min {
            if min != self.pathmtu {
                log::debug!("[{}] pmtu {} => {}", self.name, self.pathmtu, min);
                self.pathmtu = min;
                self.rwnd.pathmtu = min;
            }
        }
    }

    /// Assign the next SSN for an outbound stream.
    pub(crate) fn next_ssn(&mut self, stream_id: u16) -> u16 {
        let seq = self.streams.entry(stream_id).or_default();
        let ssn = seq.next_ssn;
        seq.next_ssn = seq.next_ssn.wrapping_add(1);
        ssn
    }

    /// Bump the association-wide error count; true means the hard failure
    /// threshold was crossed and the outer machine should tear down.
    pub(crate) fn increment_overall_error_count(&mut self) -> bool {
        self.overall_error_count += 1;
        self.overall_error_count > self.max_retrans
    }

    /// free marks the association dead and drops its owned state. Later
    /// calls observe the flag and bail out; the memory itself goes when the
    /// last handle drops.
    pub(crate) fn free(&mut self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!(
            "[{}] freeing association (transports={} inflight={})",
            self.name,
            self.transports.len(),
            self.transports.inflight_len()
        );

        self.set_state(AssociationState::Closed);
        self.transports.clear();
        self.primary_path = None;
        self.active_path = None;
        self.retran_path = None;
        self.last_sent_to = None;
        self.last_data_from = None;
        self.init_last_sent_to = None;
        self.shutdown_last_sent_to = None;
        self.flush_pending_delivery();
    }
}
