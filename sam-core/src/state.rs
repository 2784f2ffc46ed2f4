//! Control-connection and accept state machines. No I/O: the host feeds reply lines in and
//! drives the socket according to the resulting state.

use crate::identity::{Destination, KeyPair};
use crate::reply::{self, ReplyError, StreamPeer};

/// Phase of one control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Unconnected,
    HelloSent,
    HelloOk,
    SessionPending,
    SessionActive,
    Closed,
}

/// Command awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    DestGenerate,
    Lookup,
    SessionCreate,
    StreamConnect,
    StreamAccept,
}

impl Request {
    pub fn name(self) -> &'static str {
        match self {
            Request::DestGenerate => "DEST GENERATE",
            Request::Lookup => "NAMING LOOKUP",
            Request::SessionCreate => "SESSION CREATE",
            Request::StreamConnect => "STREAM CONNECT",
            Request::StreamAccept => "STREAM ACCEPT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("{op} not allowed in state {state:?}")]
    InvalidTransition {
        op: &'static str,
        state: ControlState,
    },
    #[error("{0} already awaiting a reply")]
    Busy(&'static str),
    #[error("no request awaiting a reply")]
    NoRequest,
    #[error("{0} received out of order")]
    OutOfOrder(&'static str),
    #[error("connection closed before destination line")]
    DestinationMissing,
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

/// Successful reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Keys(KeyPair),
    Resolved(Destination),
    /// Private destination echoed by the bridge, if any.
    SessionCreated(Option<String>),
    StreamOk,
}

/// Request/response discipline for one control connection: one command in flight at a time.
#[derive(Debug, Clone)]
pub struct ControlMachine {
    state: ControlState,
    in_flight: Option<Request>,
    version: Option<String>,
}

impl Default for ControlMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMachine {
    pub fn new() -> Self {
        Self {
            state: ControlState::Unconnected,
            in_flight: None,
            version: None,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Version the bridge agreed to in `HELLO REPLY`.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn in_flight(&self) -> Option<Request> {
        self.in_flight
    }

    pub fn hello_sent(&mut self) -> Result<(), StateError> {
        if self.state != ControlState::Unconnected {
            return Err(StateError::InvalidTransition {
                op: "HELLO",
                state: self.state,
            });
        }
        self.state = ControlState::HelloSent;
        Ok(())
    }

    /// Feed the `HELLO REPLY` line. A failed handshake closes the connection.
    pub fn on_hello_reply(&mut self, line: &str) -> Result<&str, StateError> {
        if self.state != ControlState::HelloSent {
            return Err(StateError::InvalidTransition {
                op: "HELLO REPLY",
                state: self.state,
            });
        }
        match reply::parse_hello(line) {
            Ok(v) => {
                self.state = ControlState::HelloOk;
                Ok(self.version.insert(v).as_str())
            }
            Err(e) => {
                self.state = ControlState::Closed;
                Err(e.into())
            }
        }
    }

    /// Mark `req` as sent. Rejects a second outstanding command.
    pub fn begin(&mut self, req: Request) -> Result<(), StateError> {
        if let Some(pending) = self.in_flight {
            return Err(StateError::Busy(pending.name()));
        }
        let allowed = match req {
            Request::DestGenerate | Request::Lookup => matches!(
                self.state,
                ControlState::HelloOk | ControlState::SessionActive
            ),
            Request::SessionCreate | Request::StreamConnect | Request::StreamAccept => {
                self.state == ControlState::HelloOk
            }
        };
        if !allowed {
            return Err(StateError::InvalidTransition {
                op: req.name(),
                state: self.state,
            });
        }
        if req == Request::SessionCreate {
            self.state = ControlState::SessionPending;
        }
        self.in_flight = Some(req);
        Ok(())
    }

    /// Feed the reply line for the outstanding command.
    pub fn on_reply(&mut self, line: &str) -> Result<Outcome, StateError> {
        let req = self.in_flight.take().ok_or(StateError::NoRequest)?;
        let outcome = match req {
            Request::DestGenerate => reply::parse_dest_reply(line).map(Outcome::Keys),
            Request::Lookup => reply::parse_naming_reply(line).map(Outcome::Resolved),
            Request::SessionCreate => {
                reply::parse_session_status(line).map(Outcome::SessionCreated)
            }
            Request::StreamConnect | Request::StreamAccept => {
                reply::parse_stream_status(line).map(|_| Outcome::StreamOk)
            }
        };
        match (&outcome, req) {
            (Ok(_), Request::SessionCreate) => self.state = ControlState::SessionActive,
            (Err(_), Request::SessionCreate) => self.state = ControlState::Closed,
            _ => {}
        }
        outcome.map_err(StateError::from)
    }

    pub fn close(&mut self) {
        self.state = ControlState::Closed;
        self.in_flight = None;
    }
}

/// Phase of one inbound accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptState {
    Idle,
    Connecting,
    AwaitingStatus,
    AwaitingDestination,
    Ready(StreamPeer),
    Failed,
}

/// Accept cycle: connect, `STREAM STATUS`, destination line.
#[derive(Debug, Clone)]
pub struct AcceptMachine {
    state: AcceptState,
}

impl Default for AcceptMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceptMachine {
    pub fn new() -> Self {
        Self {
            state: AcceptState::Idle,
        }
    }

    pub fn state(&self) -> &AcceptState {
        &self.state
    }

    pub fn start(&mut self) {
        self.state = AcceptState::Connecting;
    }

    /// Handshake done and `STREAM ACCEPT` sent.
    pub fn accept_sent(&mut self) {
        if self.state == AcceptState::Connecting {
            self.state = AcceptState::AwaitingStatus;
        }
    }

    pub fn on_status(&mut self, line: &str) -> Result<(), StateError> {
        if self.state != AcceptState::AwaitingStatus {
            return Err(self.out_of_order("STREAM STATUS"));
        }
        match reply::parse_stream_status(line) {
            Ok(()) => {
                self.state = AcceptState::AwaitingDestination;
                Ok(())
            }
            Err(e) => {
                self.state = AcceptState::Failed;
                Err(e.into())
            }
        }
    }

    /// Feed the destination line, or `None` on EOF.
    pub fn on_destination(&mut self, line: Option<&str>) -> Result<StreamPeer, StateError> {
        if self.state != AcceptState::AwaitingDestination {
            return Err(self.out_of_order("destination line"));
        }
        let Some(line) = line else {
            self.state = AcceptState::Failed;
            return Err(StateError::DestinationMissing);
        };
        match StreamPeer::parse(line) {
            Ok(peer) => {
                self.state = AcceptState::Ready(peer.clone());
                Ok(peer)
            }
            Err(e) => {
                self.state = AcceptState::Failed;
                Err(e.into())
            }
        }
    }

    pub fn fail(&mut self) {
        self.state = AcceptState::Failed;
    }

    fn out_of_order(&mut self, op: &'static str) -> StateError {
        self.state = AcceptState::Failed;
        StateError::OutOfOrder(op)
    }
}
