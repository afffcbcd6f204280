use std::net::SocketAddr;
use std::ops::{Index, IndexMut};
use std::time::{Duration, Instant};

use bytes::Bytes;
use fxhash::FxHashMap;
use slab::Slab;

use super::{Transport, TransportId, TransportState};

/// A DATA chunk that has been transmitted but not yet cumulatively acked,
/// attributed to the path it was last sent on. Re-homing a chunk onto
/// another path is an owner-index update, nothing more.
#[derive(Debug)]
pub(crate) struct InflightChunk {
    pub(crate) tsn: u32,
    pub(crate) owner: TransportId,
    pub(crate) user_data: Bytes,
    /// How many times this chunk has been put on the wire.
    pub(crate) nsent: u32,
}

/// The association's ordered collection of peer paths, plus the arena of
/// chunks currently in flight across all of them.
#[derive(Debug, Default)]
pub(crate) struct TransportSet {
    records: Slab<Transport>,
    /// Membership order; election walks and round-robin follow this.
    order: Vec<TransportId>,
    by_addr: FxHashMap<SocketAddr, TransportId>,
    inflight: Slab<InflightChunk>,
}

impl TransportSet {
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn get(&self, id: TransportId) -> Option<&Transport> {
        self.records.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: TransportId) -> Option<&mut Transport> {
        self.records.get_mut(id)
    }

    pub(crate) fn contains(&self, id: TransportId) -> bool {
        self.records.contains(id)
    }

    pub(crate) fn first(&self) -> Option<TransportId> {
        self.order.first().copied()
    }

    /// Membership order, for election walks.
    pub(crate) fn ids(&self) -> impl Iterator<Item = TransportId> + '_ {
        self.order.iter().copied()
    }

    /// Cyclic successor in membership order.
    pub(crate) fn next_after(&self, id: TransportId) -> TransportId {
        let pos = self
            .order
            .iter()
            .position(|&t| t == id)
            .unwrap_or(self.order.len() - 1);
        self.order[(pos + 1) % self.order.len()]
    }

    /// Exact-address lookup. A miss is a normal outcome, not an error.
    pub(crate) fn find(&self, addr: &SocketAddr) -> Option<TransportId> {
        self.by_addr.get(addr).copied()
    }

    /// Add a path, or return the existing record for a duplicate address.
    /// A duplicate add of a user-supplied (Unknown) path counts as
    /// confirmation: the peer has now listed it too. RFC 4960 5.4.
    pub(crate) fn add(
        &mut self,
        addr: SocketAddr,
        state: TransportState,
        pathmtu: u32,
        ssthresh: u32,
        rto_initial: Duration,
        now: Instant,
    ) -> (TransportId, bool) {
        if let Some(id) = self.find(&addr) {
            if self.records[id].state == TransportState::Unknown {
                self.records[id].state = TransportState::Active;
            }
            return (id, false);
        }

        let id = self
            .records
            .insert(Transport::new(addr, state, pathmtu, ssthresh, rto_initial, now));
        self.order.push(id);
        self.by_addr.insert(addr, id);
        (id, true)
    }

    /// Remove a path, migrating its in-flight chunks onto `migrate_to` so
    /// they keep a retransmission home. The caller has already re-pointed
    /// the association's path references and guarantees `migrate_to` stays
    /// a member.
    pub(crate) fn remove(&mut self, id: TransportId, migrate_to: TransportId) -> Transport {
        debug_assert_ne!(id, migrate_to);

        let mut migrated = 0usize;
        let mut migrated_bytes = 0u32;
        for (_, chunk) in self.inflight.iter_mut() {
            if chunk.owner == id {
                chunk.owner = migrate_to;
                migrated += 1;
                migrated_bytes += chunk.user_data.len() as u32;
            }
        }

        let removed = self.records.remove(id);
        self.order.retain(|&t| t != id);
        self.by_addr.remove(&removed.addr);

        if migrated > 0 {
            let survivor = &mut self.records[migrate_to];
            survivor.inflight_chunk_count += migrated;
            survivor.flight_size += migrated_bytes;
            // The migrated chunks need a running T3-rtx to ever be
            // retransmitted; tell the timer engine if it has none.
            survivor.rtx_timer_armed = true;
        }

        removed
    }

    /// Record a chunk as transmitted on `owner`.
    pub(crate) fn push_inflight(&mut self, tsn: u32, user_data: Bytes, owner: TransportId) {
        let len = user_data.len() as u32;
        self.inflight.insert(InflightChunk {
            tsn,
            owner,
            user_data,
            nsent: 1,
        });
        let t = &mut self.records[owner];
        t.inflight_chunk_count += 1;
        t.flight_size += len;
    }

    /// Release an acked chunk, returning the path it was charged to.
    pub(crate) fn ack_inflight(&mut self, tsn: u32) -> Option<TransportId> {
        let key = self
            .inflight
            .iter()
            .find(|(_, c)| c.tsn == tsn)
            .map(|(k, _)| k)?;
        let chunk = self.inflight.remove(key);
        let t = &mut self.records[chunk.owner];
        t.inflight_chunk_count -= 1;
        t.flight_size = t.flight_size.saturating_sub(chunk.user_data.len() as u32);
        Some(chunk.owner)
    }

    /// Which path is the given in-flight TSN attributed to? The active path
    /// is checked first as a probabilistic fast path; most traffic lives
    /// there.
    pub(crate) fn lookup_tsn(&self, tsn: u32, active: Option<TransportId>) -> Option<TransportId> {
        if let Some(active) = active {
            if self
                .inflight
                .iter()
                .any(|(_, c)| c.owner == active && c.tsn == tsn)
            {
                return Some(active);
            }
        }

        self.inflight
            .iter()
            .find(|(_, c)| Some(c.owner) != active && c.tsn == tsn)
            .map(|(_, c)| c.owner)
    }

    /// Total bytes in flight across all paths.
    pub(crate) fn outstanding_bytes(&self) -> u32 {
        self.inflight
            .iter()
            .map(|(_, c)| c.user_data.len() as u32)
            .sum()
    }

    pub(crate) fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.by_addr.clear();
        self.inflight.clear();
    }
}

impl Index<TransportId> for TransportSet {
    type Output = Transport;

    fn index(&self, id: TransportId) -> &Transport {
        &self.records[id]
    }
}

impl IndexMut<TransportId> for TransportSet {
    fn index_mut(&mut self, id: TransportId) -> &mut Transport {
        &mut self.records[id]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PMTU: u32 = 1452;
    const SSTHRESH: u32 = 65535;
    const RTO: Duration = Duration::from_millis(3000);

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{}:5000", n).parse().unwrap()
    }

    fn set_with(n: u8) -> (TransportSet, Vec<TransportId>) {
        let mut set = TransportSet::default();
        let now = Instant::now();
        let ids = (1..=n)
            .map(|i| {
                set.add(addr(i), TransportState::Active, PMTU, SSTHRESH, RTO, now)
                    .0
            })
            .collect();
        (set, ids)
    }

    #[test]
    fn test_add_is_idempotent() {
        let (mut set, ids) = set_with(2);

        let (id, added) = set.add(
            addr(1),
            TransportState::Active,
            PMTU,
            SSTHRESH,
            RTO,
            Instant::now(),
        );
        assert!(!added, "duplicate address is not registered twice");
        assert_eq!(id, ids[0], "the existing record is returned");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_duplicate_add_confirms_unknown_path() {
        let mut set = TransportSet::default();
        let now = Instant::now();
        let (id, _) = set.add(addr(1), TransportState::Unknown, PMTU, SSTHRESH, RTO, now);

        let (id2, added) = set.add(addr(1), TransportState::Unconfirmed, PMTU, SSTHRESH, RTO, now);
        assert_eq!(id, id2);
        assert!(!added);
        assert_eq!(
            set.get(id).unwrap().state,
            TransportState::Active,
            "a user-added path listed by the peer is confirmed"
        );
    }

    #[test]
    fn test_remove_migrates_inflight_chunks() {
        let (mut set, ids) = set_with(2);
        set.push_inflight(100, Bytes::from_static(b"ABC"), ids[0]);
        set.push_inflight(101, Bytes::from_static(b"DEFG"), ids[0]);

        set.remove(ids[0], ids[1]);

        let survivor = set.get(ids[1]).unwrap();
        assert_eq!(survivor.inflight_chunk_count, 2, "chunks re-homed");
        assert_eq!(survivor.flight_size, 7, "flight bytes follow the chunks");
        assert!(
            survivor.rtx_timer_armed,
            "migrated chunks need a running T3-rtx"
        );
        assert_eq!(set.lookup_tsn(100, None), Some(ids[1]));
        assert!(set.find(&addr(1)).is_none());
    }

    #[test]
    fn test_lookup_tsn_checks_active_path_first() {
        let (mut set, ids) = set_with(2);
        set.push_inflight(7, Bytes::from_static(b"x"), ids[1]);

        assert_eq!(set.lookup_tsn(7, Some(ids[0])), Some(ids[1]));
        assert_eq!(set.lookup_tsn(7, Some(ids[1])), Some(ids[1]));
        assert_eq!(set.lookup_tsn(8, Some(ids[1])), None, "absent TSN is a miss");
    }

    #[test]
    fn test_next_after_is_cyclic() {
        let (set, ids) = set_with(3);
        assert_eq!(set.next_after(ids[0]), ids[1]);
        assert_eq!(set.next_after(ids[1]), ids[2]);
        assert_eq!(set.next_after(ids[2]), ids[0], "walk wraps to the front");
    }
}
