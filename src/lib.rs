//! SCTP association and multi-homed path management
//!
//! [SCTP](https://en.wikipedia.org/wiki/Stream_Control_Transmission_Protocol), defined in RFC 4960,
//! lets one reliable session ride on several candidate network paths at once. This crate owns the
//! association object for such a session: the set of peer transport addresses, their health states,
//! the election of primary/active/retransmission paths, and the local receive-window accounting.
//!
//! Chunk encoding, the chunk-driven protocol state machine, sockets and the retransmission timer
//! engine are collaborators; they drive this crate through the methods on [`Association`] and
//! consume the path decisions and window-update signals it produces.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod aid;
mod association;
mod config;
mod elector;
mod error;
mod events;
mod rwnd;
mod transport;
mod util;

pub use crate::aid::{AssociationId, AssociationIdGenerator, CyclicAssociationIdGenerator};
pub use crate::association::{
    Association, AssociationState, PeerAuthParams, PeerUpdate, SnError, TransportCmd,
};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::events::{PeerAddrChange, PeerAddrEvent};
pub use crate::transport::TransportState;
