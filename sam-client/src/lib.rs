//! Tokio host for the SAM bridge protocol: control connections, stream sessions,
//! inbound accept, datagram transport.

pub mod config;
pub mod conn;
pub mod control;
pub mod datagram;
pub mod error;
pub mod listener;
pub mod session;

pub use conn::SamConn;
pub use control::ControlClient;
pub use datagram::DatagramSession;
pub use error::{Error, Result};
pub use listener::{StreamListener, DEFAULT_ACCEPT_TIMEOUT};
pub use session::StreamSession;
