pub(crate) mod set;

use std::cmp;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::random;

/// Index of a transport inside its association's transport set. Never handed
/// out across the crate boundary; the public API is keyed by address.
pub(crate) type TransportId = usize;

/// Health state of one peer destination address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Not yet verified by a heartbeat; never used for sends.
    Unconfirmed,
    Active,
    Inactive,
    /// Soft error threshold exceeded, hard threshold not yet reached.
    PartiallyFailed,
    /// Added by the user rather than the handshake; treated as confirmed.
    Unknown,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            TransportState::Unconfirmed => "Unconfirmed",
            TransportState::Active => "Active",
            TransportState::Inactive => "Inactive",
            TransportState::PartiallyFailed => "PartiallyFailed",
            TransportState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// SFR-CACC state, kept per destination so a primary changeover with data in
/// flight can be recognized during SACK processing.
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct CaccState {
    pub(crate) changeover_active: bool,
    pub(crate) cycling_changeover: bool,
    pub(crate) cacc_saw_newack: bool,
    pub(crate) next_tsn_at_change: u32,
}

const RTO_ALPHA: u64 = 1;
const RTO_BETA: u64 = 2;
const RTO_BASE: u64 = 8;

/// One candidate path to the peer, with its own congestion, RTT and error
/// bookkeeping. RFC 2960 12.3, Per Transport Address Data.
#[derive(Debug)]
pub(crate) struct Transport {
    pub(crate) addr: SocketAddr,
    pub(crate) state: TransportState,

    pub(crate) rto: Duration,
    pub(crate) srtt: u64, // msec, 0 until the first measurement
    pub(crate) rttvar: f64,
    /// A DATA chunk on this path is being timed for RTT right now.
    pub(crate) rto_pending: bool,

    pub(crate) pathmtu: u32,
    pub(crate) error_count: u32,
    pub(crate) last_time_heard: Instant,
    pub(crate) last_time_sent: Instant,

    pub(crate) cwnd: u32,
    pub(crate) ssthresh: u32,
    pub(crate) partial_bytes_acked: u32,
    pub(crate) flight_size: u32,
    /// Chunks in the association's inflight arena attributed to this path.
    pub(crate) inflight_chunk_count: usize,

    /// Asks the external retransmission engine to (re)arm T3-rtx for this
    /// path; set when another path's unacked chunks migrate here.
    pub(crate) rtx_timer_armed: bool,
    pub(crate) hb_sent: bool,
    pub(crate) hb_nonce: u64,
    /// A routing decision is cached for this destination.
    pub(crate) dst_cached: bool,

    pub(crate) cacc: CaccState,
}

/// RFC 4960 7.2.1: the initial cwnd before DATA transmission MUST be
/// min(4*MTU, max(2*MTU, 4380 bytes)).
pub(crate) fn initial_cwnd(pathmtu: u32) -> u32 {
    cmp::min(4 * pathmtu, cmp::max(2 * pathmtu, 4380))
}

impl Transport {
    pub(crate) fn new(
        addr: SocketAddr,
        state: TransportState,
        pathmtu: u32,
        ssthresh: u32,
        rto_initial: Duration,
        now: Instant,
    ) -> Self {
        Transport {
            addr,
            state,
            rto: rto_initial,
            srtt: 0,
            rttvar: 0.0,
            rto_pending: false,
            pathmtu,
            error_count: 0,
            last_time_heard: now,
            last_time_sent: now,
            cwnd: initial_cwnd(pathmtu),
            ssthresh,
            partial_bytes_acked: 0,
            flight_size: 0,
            inflight_chunk_count: 0,
            rtx_timer_armed: false,
            hb_sent: false,
            hb_nonce: random::<u64>(),
            dst_cached: false,
            cacc: CaccState::default(),
        }
    }

    /// Restore the path to its initial congestion/RTT/error state. Used on
    /// association restart, when everything we learned is stale.
    pub(crate) fn reset(&mut self, pathmtu: u32, ssthresh: u32, rto_initial: Duration) {
        self.cwnd = initial_cwnd(pathmtu);
        self.ssthresh = ssthresh;
        self.rto = rto_initial;
        self.srtt = 0;
        self.rttvar = 0.0;
        self.rto_pending = false;
        self.partial_bytes_acked = 0;
        self.flight_size = 0;
        self.error_count = 0;
        self.hb_sent = false;
        self.cacc = CaccState::default();
    }

    /// Feed a new RTT measurement into the smoothed estimate and recompute
    /// the RTO. RFC 4960 6.3.1.
    pub(crate) fn update_rto(&mut self, rtt: u64, rto_min: Duration, rto_max: Duration) -> u64 {
        if self.srtt == 0 {
            // First measurement
            self.srtt = rtt;
            self.rttvar = rtt as f64 / 2.0;
        } else {
            self.rttvar = ((RTO_BASE - RTO_BETA) as f64 * self.rttvar
                + RTO_BETA as f64 * (self.srtt as i64 - rtt as i64).abs() as f64)
                / RTO_BASE as f64;
            self.srtt = ((RTO_BASE - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt) / RTO_BASE;
        }

        let rto = cmp::min(
            cmp::max(
                self.srtt + (4.0 * self.rttvar) as u64,
                rto_min.as_millis() as u64,
            ),
            rto_max.as_millis() as u64,
        );
        self.rto = Duration::from_millis(rto);

        self.srtt
    }

    /// Forget the cached routing decision; a better route may exist next
    /// time this destination is tried.
    pub(crate) fn clear_dst_cache(&mut self) {
        self.dst_cached = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr() -> SocketAddr {
        "10.0.0.1:5000".parse().unwrap()
    }

    fn transport() -> Transport {
        Transport::new(
            addr(),
            TransportState::Active,
            1452,
            65535,
            Duration::from_millis(3000),
            Instant::now(),
        )
    }

    #[test]
    fn test_initial_cwnd_formula() {
        assert_eq!(initial_cwnd(1452), 4380, "2*MTU < 4380 < 4*MTU clamps to 4380");
        assert_eq!(initial_cwnd(512), 2048, "small MTU caps at 4*MTU");
        assert_eq!(initial_cwnd(9000), 18000, "jumbo frames take 2*MTU");
    }

    #[test]
    fn test_new_transport_defaults() {
        let t = transport();
        assert_eq!(t.cwnd, 4380);
        assert_eq!(t.ssthresh, 65535);
        assert_eq!(t.rto, Duration::from_millis(3000));
        assert_eq!(t.error_count, 0);
        assert_eq!(t.flight_size, 0);
        assert!(!t.cacc.changeover_active);
    }

    #[test]
    fn test_update_rto_first_and_subsequent_measurements() {
        let mut t = transport();

        let srtt = t.update_rto(600, Duration::from_millis(100), Duration::from_millis(60000));
        assert_eq!(srtt, 600, "first measurement adopts the sample");
        assert_eq!(
            t.rto,
            Duration::from_millis(600 + 4 * 300),
            "rto = srtt + 4*rttvar"
        );

        let srtt = t.update_rto(600, Duration::from_millis(100), Duration::from_millis(60000));
        assert_eq!(srtt, 600, "stable samples keep srtt stable");
        assert!(t.rto < Duration::from_millis(1800), "rttvar decays");

        let mut t = transport();
        t.update_rto(10, Duration::from_millis(1000), Duration::from_millis(60000));
        assert_eq!(
            t.rto,
            Duration::from_millis(1000),
            "rto never drops below the floor"
        );
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut t = transport();
        t.cwnd = 100_000;
        t.flight_size = 4242;
        t.error_count = 3;
        t.srtt = 120;
        t.cacc.changeover_active = true;
        t.cacc.next_tsn_at_change = 77;

        t.reset(1452, 65535, Duration::from_millis(3000));

        assert_eq!(t.cwnd, 4380);
        assert_eq!(t.flight_size, 0);
        assert_eq!(t.error_count, 0);
        assert_eq!(t.srtt, 0);
        assert!(!t.cacc.changeover_active, "changeover history is cleared");
        assert_eq!(t.cacc.next_tsn_at_change, 0);
    }
}
