use std::time::Duration;

/// Path MTU assumed for a new transport until discovery says otherwise.
pub(crate) const INITIAL_PMTU: u32 = 1452;
pub(crate) const INITIAL_RECV_BUF_SIZE: u32 = 1024 * 1024;
/// RFC 4960 7.2.1: ssthresh MAY be arbitrarily high; use the receiver
/// default max window until the peer's INIT tells us better.
pub(crate) const DEFAULT_MAX_WINDOW: u32 = 65535;

pub(crate) const RTO_INITIAL: Duration = Duration::from_millis(3000);
pub(crate) const RTO_MIN: Duration = Duration::from_millis(1000);
pub(crate) const RTO_MAX: Duration = Duration::from_millis(60000);
pub(crate) const HB_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) const DEFAULT_MAX_RETRANS: u32 = 10;
pub(crate) const DEFAULT_PF_RETRANS: u32 = 0;
/// Window updates are advertised once the window has grown by at least
/// max(rcvbuf >> shift, pmtu).
pub(crate) const DEFAULT_RWND_UPDATE_SHIFT: u32 = 1;
/// Never more than a few dozen paths per association in practice.
pub(crate) const DEFAULT_MAX_TRANSPORTS: usize = 64;

/// Config collects the arguments for association construction into a single
/// structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) name: String,
    pub(crate) local_port: u16,
    pub(crate) peer_port: u16,
    pub(crate) ipv4_capable: bool,
    pub(crate) ipv6_capable: bool,
    pub(crate) max_receive_buffer_size: u32,
    pub(crate) rwnd_update_shift: u32,
    pub(crate) pathmtu: u32,
    pub(crate) rto_initial: Duration,
    pub(crate) rto_min: Duration,
    pub(crate) rto_max: Duration,
    pub(crate) hb_interval: Duration,
    pub(crate) max_retrans: u32,
    pub(crate) pf_retrans: u32,
    pub(crate) pf_expose: bool,
    pub(crate) max_transports: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: String::new(),
            local_port: 0,
            peer_port: 0,
            ipv4_capable: true,
            ipv6_capable: true,
            max_receive_buffer_size: INITIAL_RECV_BUF_SIZE,
            rwnd_update_shift: DEFAULT_RWND_UPDATE_SHIFT,
            pathmtu: INITIAL_PMTU,
            rto_initial: RTO_INITIAL,
            rto_min: RTO_MIN,
            rto_max: RTO_MAX,
            hb_interval: HB_INTERVAL,
            max_retrans: DEFAULT_MAX_RETRANS,
            pf_retrans: DEFAULT_PF_RETRANS,
            pf_expose: false,
            max_transports: DEFAULT_MAX_TRANSPORTS,
        }
    }
}

impl Config {
    pub fn with_name(mut self, value: String) -> Self {
        self.name = value;
        self
    }

    pub fn with_ports(mut self, local_port: u16, peer_port: u16) -> Self {
        self.local_port = local_port;
        self.peer_port = peer_port;
        self
    }

    /// Address-family capability flags handed down by the bind-address layer;
    /// peer addresses of an unsupported family are never registered.
    pub fn with_address_families(mut self, ipv4: bool, ipv6: bool) -> Self {
        self.ipv4_capable = ipv4;
        self.ipv6_capable = ipv6;
        self
    }

    pub fn with_max_receive_buffer_size(mut self, value: u32) -> Self {
        self.max_receive_buffer_size = value;
        self
    }

    pub fn with_rwnd_update_shift(mut self, value: u32) -> Self {
        self.rwnd_update_shift = value;
        self
    }

    pub fn with_pathmtu(mut self, value: u32) -> Self {
        self.pathmtu = value;
        self
    }

    pub fn with_rto_initial(mut self, value: Duration) -> Self {
        self.rto_initial = value;
        self
    }

    pub fn with_max_retrans(mut self, value: u32) -> Self {
        self.max_retrans = value;
        self
    }

    pub fn with_pf_retrans(mut self, value: u32) -> Self {
        self.pf_retrans = value;
        self
    }

    /// Whether partially-failed transitions are exposed to the user as
    /// notifications (RFC 7829 exposure switch).
    pub fn with_pf_expose(mut self, value: bool) -> Self {
        self.pf_expose = value;
        self
    }

    pub fn with_max_transports(mut self, value: usize) -> Self {
        self.max_transports = value;
        self
    }
}
