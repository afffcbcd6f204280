//! Path election.
//!
//! Pure selection logic over the transport set: nothing in here mutates a
//! record, callers apply the returned choices to the association's path
//! pointers. Health-state change and re-election are one atomic step from
//! the caller's point of view; every send decision that follows sees the
//! refreshed pointers.

use crate::transport::set::TransportSet;
use crate::transport::{TransportId, TransportState};

/// Rank a path by health alone. Unconfirmed paths never take part in
/// election; their score only matters as "worst".
pub(crate) fn score(state: TransportState) -> u8 {
    match state {
        TransportState::Active => 3, // best case
        TransportState::Unknown => 2,
        TransportState::PartiallyFailed => 1,
        TransportState::Inactive => 0, // worst case
        TransportState::Unconfirmed => 0,
    }
}

/// Break a score tie: fewer consecutive errors wins, then the path heard
/// from most recently.
pub(crate) fn elect_tie(set: &TransportSet, t1: TransportId, t2: TransportId) -> TransportId {
    let (a, b) = (&set[t1], &set[t2]);

    if a.error_count != b.error_count {
        return if a.error_count < b.error_count { t1 } else { t2 };
    }

    if a.last_time_heard > b.last_time_heard {
        t1
    } else {
        t2
    }
}

/// The better of `curr` and the best candidate seen so far.
pub(crate) fn elect_best(
    set: &TransportSet,
    curr: TransportId,
    best: Option<TransportId>,
) -> TransportId {
    let best = match best {
        None => return curr,
        Some(best) if best == curr => return curr,
        Some(best) => best,
    };

    let score_curr = score(set[curr].state);
    let score_best = score(set[best].state);

    if score_curr > score_best {
        curr
    } else if score_curr == score_best {
        elect_tie(set, best, curr)
    } else {
        best
    }
}

/// Recompute the active and retransmission paths after a health change or a
/// removal.
///
/// One scan tracks the two most recently heard Active/Unknown paths and,
/// separately, the best partially-failed one. The configured primary is
/// sticky: while it is itself usable it takes the primary slot back even if
/// another path was heard from more recently, and the displaced candidate
/// becomes the secondary. With no usable candidate at all we camp on the
/// current active path unless a partially-failed one outranks it.
pub(crate) fn select_active_and_retran_path(
    set: &TransportSet,
    primary_path: TransportId,
    active_path: TransportId,
) -> (TransportId, TransportId) {
    let mut trans_pri: Option<TransportId> = None;
    let mut trans_sec: Option<TransportId> = None;
    let mut trans_pf: Option<TransportId> = None;

    for id in set.ids() {
        match set[id].state {
            TransportState::Inactive | TransportState::Unconfirmed => continue,
            TransportState::PartiallyFailed => {
                trans_pf = Some(elect_best(set, id, trans_pf));
                continue;
            }
            TransportState::Active | TransportState::Unknown => {}
        }

        match trans_pri {
            None => trans_pri = Some(id),
            Some(pri) if set[id].last_time_heard > set[pri].last_time_heard => {
                trans_sec = trans_pri;
                trans_pri = Some(id);
            }
            Some(_) => {
                if trans_sec
                    .map_or(true, |sec| set[id].last_time_heard > set[sec].last_time_heard)
                {
                    trans_sec = Some(id);
                }
            }
        }
    }

    // RFC 2960 6.4: the administratively configured primary keeps its slot
    // while it is usable, recency notwithstanding.
    let primary_state = set[primary_path].state;
    if (primary_state == TransportState::Active || primary_state == TransportState::Unknown)
        && trans_pri != Some(primary_path)
    {
        trans_sec = trans_pri;
        trans_pri = Some(primary_path);
    }

    let trans_pri = match trans_pri {
        Some(pri) => pri,
        None => elect_best(set, active_path, trans_pf),
    };
    let trans_sec = trans_sec.unwrap_or(trans_pri);

    (trans_pri, trans_sec)
}

/// Pick the next retransmission path.
///
/// The walk starts just past the current retransmission path and runs the
/// membership order cyclically, skipping unconfirmed paths and stopping as
/// soon as an Active candidate turns up, so successive refreshes make
/// round-robin progress across the non-active paths instead of pinning to
/// one.
pub(crate) fn update_retran_path(
    set: &TransportSet,
    active_path: TransportId,
    retran_path: TransportId,
) -> TransportId {
    // We're done as we only have the one and only path.
    if set.len() == 1 {
        return retran_path;
    }
    // If active_path and retran_path coincide on an Active record, this is
    // the only active path. Use it.
    if active_path == retran_path && set[active_path].state == TransportState::Active {
        return retran_path;
    }

    let mut next: Option<TransportId> = None;
    let mut trans = set.next_after(retran_path);
    loop {
        if set[trans].state != TransportState::Unconfirmed {
            let best = elect_best(set, trans, next);
            next = Some(best);
            // Active is good enough for immediate return.
            if set[best].state == TransportState::Active {
                break;
            }
        }
        // We've reached the end, time to update path.
        if trans == retran_path {
            break;
        }
        trans = set.next_after(trans);
    }

    next.unwrap_or(retran_path)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    const PMTU: u32 = 1452;
    const SSTHRESH: u32 = 65535;
    const RTO: Duration = Duration::from_millis(3000);

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{}:5000", n).parse().unwrap()
    }

    fn set_with(states: &[TransportState]) -> (TransportSet, Vec<TransportId>) {
        let mut set = TransportSet::default();
        let now = Instant::now();
        let ids = states
            .iter()
            .enumerate()
            .map(|(i, &state)| {
                set.add(addr(i as u8 + 1), state, PMTU, SSTHRESH, RTO, now).0
            })
            .collect();
        (set, ids)
    }

    #[test]
    fn test_score_ranks_health_states() {
        assert!(score(TransportState::Active) > score(TransportState::Unknown));
        assert!(score(TransportState::Unknown) > score(TransportState::PartiallyFailed));
        assert!(score(TransportState::PartiallyFailed) > score(TransportState::Inactive));
    }

    #[test]
    fn test_elect_tie_prefers_fewer_errors_then_recency() {
        let (mut set, ids) = set_with(&[TransportState::Active, TransportState::Active]);

        set[ids[0]].error_count = 2;
        set[ids[1]].error_count = 1;
        assert_eq!(elect_tie(&set, ids[0], ids[1]), ids[1], "fewer errors wins");

        set[ids[0]].error_count = 1;
        set[ids[0]].last_time_heard = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            elect_tie(&set, ids[0], ids[1]),
            ids[0],
            "equal errors, most recently heard wins"
        );
    }

    #[test]
    fn test_elect_best_compares_scores_before_tie_break() {
        let (mut set, ids) = set_with(&[TransportState::PartiallyFailed, TransportState::Active]);

        assert_eq!(elect_best(&set, ids[0], None), ids[0], "no champion yet");
        assert_eq!(elect_best(&set, ids[0], Some(ids[0])), ids[0]);
        assert_eq!(
            elect_best(&set, ids[0], Some(ids[1])),
            ids[1],
            "Active outranks PF regardless of recency"
        );

        set[ids[0]].state = TransportState::Active;
        set[ids[0]].error_count = 5;
        assert_eq!(
            elect_best(&set, ids[0], Some(ids[1])),
            ids[1],
            "equal score falls back to the tie-break"
        );
    }

    #[test]
    fn test_select_prefers_most_recent_active() {
        let (mut set, ids) = set_with(&[
            TransportState::Active,
            TransportState::Active,
            TransportState::Active,
        ]);
        set[ids[2]].last_time_heard = Instant::now() + Duration::from_secs(1);

        let (active, retran) = select_active_and_retran_path(&set, ids[2], ids[0]);
        assert_eq!(active, ids[2], "most recently heard active path wins");
        assert_ne!(retran, active, "retran diverges when another active exists");
    }

    #[test]
    fn test_select_sticky_primary_overrides_recency() {
        let (mut set, ids) = set_with(&[TransportState::Active, TransportState::Active]);
        set[ids[1]].last_time_heard = Instant::now() + Duration::from_secs(1);

        let (active, retran) = select_active_and_retran_path(&set, ids[0], ids[0]);
        assert_eq!(
            active, ids[0],
            "configured primary keeps the slot while usable"
        );
        assert_eq!(retran, ids[1], "displaced candidate becomes secondary");
    }

    #[test]
    fn test_select_skips_unconfirmed_and_inactive() {
        let (set, ids) = set_with(&[
            TransportState::Unconfirmed,
            TransportState::Inactive,
            TransportState::Unknown,
        ]);

        let (active, retran) = select_active_and_retran_path(&set, ids[2], ids[2]);
        assert_eq!(active, ids[2]);
        assert_eq!(retran, ids[2]);
    }

    #[test]
    fn test_select_falls_back_to_best_pf() {
        let (mut set, ids) = set_with(&[
            TransportState::Inactive,
            TransportState::PartiallyFailed,
            TransportState::PartiallyFailed,
        ]);
        set[ids[2]].error_count = 1;

        // Primary and active both went down; only PF paths remain.
        let (active, retran) = select_active_and_retran_path(&set, ids[0], ids[0]);
        assert_eq!(
            active, ids[1],
            "best PF path beats camping on an inactive one"
        );
        assert_eq!(retran, active);
    }

    #[test]
    fn test_update_retran_path_single_transport_is_noop() {
        let (set, ids) = set_with(&[TransportState::Active]);
        assert_eq!(update_retran_path(&set, ids[0], ids[0]), ids[0]);
    }

    #[test]
    fn test_update_retran_path_round_robin() {
        // T1 inactive, T2 and T3 active, T2 heard from more recently.
        let (mut set, ids) = set_with(&[
            TransportState::Inactive,
            TransportState::Active,
            TransportState::Active,
        ]);
        set[ids[1]].last_time_heard = Instant::now() + Duration::from_secs(1);

        let (active, mut retran) = select_active_and_retran_path(&set, ids[1], ids[1]);
        assert_eq!(active, ids[1]);
        assert_eq!(retran, ids[2]);

        // Each refresh models "the current retran path was just used".
        let mut seen = vec![retran];
        retran = update_retran_path(&set, active, retran);
        seen.push(retran);

        assert!(
            seen.contains(&ids[1]) && seen.contains(&ids[2]),
            "both active paths are visited before either repeats: {:?}",
            seen
        );
        assert_eq!(seen.len(), 2, "no repeats while a path was still unvisited");
    }

    #[test]
    fn test_update_retran_path_skips_unconfirmed() {
        let (set, ids) = set_with(&[
            TransportState::Active,
            TransportState::Unconfirmed,
            TransportState::PartiallyFailed,
        ]);

        let next = update_retran_path(&set, ids[0], ids[2]);
        assert_eq!(next, ids[0], "the walk lands on the active path");

        let next = update_retran_path(&set, ids[2], ids[2]);
        assert_ne!(next, ids[1], "unconfirmed paths are never elected");
    }
}
