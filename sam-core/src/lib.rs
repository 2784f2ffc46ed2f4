//! SAM bridge protocol core.
//! No I/O: builds command lines, parses replies, tracks connection phases, frames datagrams.

pub mod chunk;
pub mod config;
pub mod datagram;
pub mod emit;
pub mod identity;
pub mod reply;
pub mod state;

pub use config::{
    AccessListType, BridgeAddr, ConfigError, SamVersion, SessionConfig, SessionConfigBuilder,
    Style,
};
pub use datagram::{
    DatagramError, DatagramHeader, DatagramOptions, MAX_DATAGRAM_SIZE, RECOMMENDED_SIZE,
};
pub use emit::CommandBuilder;
pub use identity::{Destination, KeyPair, SessionIdentity};
pub use reply::{ReplyError, StreamPeer};
pub use state::{
    AcceptMachine, AcceptState, ControlMachine, ControlState, Outcome, Request, StateError,
};
