//! # Source-Measure Unit Control Library
//!
//! This library drives a bench source-measure instrument over a serial link.
//! It encodes SCPI commands, sequences them with the pauses the instrument's
//! command buffer needs, and decodes the comma-delimited numeric responses into
//! per-channel time series.
//!
//! The entry point is [`open_session`], which returns either a [`LiveSession`]
//! bound to a serial port or a [`NullSession`] for offline use, both behind the
//! [`InstrumentSession`] trait.

use std::io;

pub mod command;
pub mod config;
pub mod response;
pub mod session;
pub mod sweep;
pub mod transport;

pub use command::{ChannelSelector, Clamp, Command, Function, Numeric};
pub use config::{SessionConfig, Timing};
pub use response::{MeasurementFrame, Quantity};
pub use session::{open_session, InstrumentSession, LiveSession, NullSession, SessionState};
pub use sweep::{SweepPlan, SweepSpec};
pub use transport::{SerialTransport, Transport};

/// Errors surfaced by the encoder, the parser and the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The port could not be opened or the startup sequence failed.
    #[error("failed to connect to instrument on {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: io::Error,
    },
    /// An operation was attempted while the session was not ready.
    #[error("instrument session is not ready (state: {state:?})")]
    NotConnected { state: SessionState },
    /// A value could not be encoded. Nothing was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The instrument answered with something that could not be decoded.
    #[error("malformed instrument response: {0}")]
    Protocol(String),
    /// The transport failed part way through a command sequence.
    ///
    /// The instrument output state is undefined afterwards until output is
    /// explicitly switched off again.
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
