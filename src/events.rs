use std::fmt;
use std::net::SocketAddr;

/// What happened to a peer address, as reported to the user layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerAddrChange {
    /// The address is reachable again (or for the first time).
    Available,
    /// The address failed its retransmission threshold.
    Unreachable,
    /// The address was removed from the association.
    Removed,
    /// The address was added to the association.
    Added,
    /// The address became the primary path.
    MadePrimary,
    /// A heartbeat proved an unconfirmed address.
    Confirmed,
    /// The address crossed the partial-failure threshold.
    PotentiallyFailed,
}

impl fmt::Display for PeerAddrChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PeerAddrChange::Available => "Available",
            PeerAddrChange::Unreachable => "Unreachable",
            PeerAddrChange::Removed => "Removed",
            PeerAddrChange::Added => "Added",
            PeerAddrChange::MadePrimary => "MadePrimary",
            PeerAddrChange::Confirmed => "Confirmed",
            PeerAddrChange::PotentiallyFailed => "PotentiallyFailed",
        };
        write!(f, "{}", s)
    }
}

/// A peer-address change notification. Delivery is a plain channel; the
/// user-facing event mechanism is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddrEvent {
    pub addr: SocketAddr,
    pub change: PeerAddrChange,
    /// Error code carried by the transition that caused this event, zero
    /// when the transition was benign.
    pub error: u32,
}
