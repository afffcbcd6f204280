use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("association is dead")]
    ErrAssociationDead,
    #[error("cannot remove the last transport of an association")]
    ErrRemoveLastTransport,
    #[error("transport limit for this association exceeded")]
    ErrTransportLimitExceeded,
    #[error("TSN map capacity exceeded")]
    ErrTsnMapCapacity,
    #[error("address family not supported by this association")]
    ErrAddressFamilyUnsupported,
    #[error("no transport with the given peer address")]
    ErrTransportNotFound,
    #[error("association has no transports yet")]
    ErrNoTransports,

    #[error("{0}")]
    Other(String),
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::ErrAssociationDead => {
                io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
            }
            e @ Error::ErrTransportNotFound => {
                io::Error::new(io::ErrorKind::AddrNotAvailable, e.to_string())
            }
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
