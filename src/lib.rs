//! Low-level protocol logic for the address proxy of a two-tier AMQP 1.0 router
//!
//! edge-proto contains a fully deterministic implementation of the controller that makes an
//! edge router's locally-terminated producers and consumers visible to its interior router
//! over a single connection, while also proxying local destinations onto a mesh of peer
//! edge routers. It contains no networking code and performs no I/O; the router-core model
//! emits wire-visible actions via `poll_action` and lifecycle events via `poll_event`.
//!
//! The most important types are `RouterCore`, which owns the connection, address, and link
//! tables and realizes the mutator surface the controller drives, and `AddressProxy`, which
//! holds the controller state (the interior connection, its control links, and the
//! per-address proxy-link slots) and reacts to the event stream.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

use std::{fmt, ops};

mod config;
pub use crate::config::{
    ProxyConfig, CAPABILITY_EDGE_DOWNLINK, EDGE_CONN_ADDR, TERMINUS_EDGE_ADDRESS_TRACKING,
};

mod error;
pub use crate::error::{Error, Result};

mod router;
pub use crate::router::{
    address::{AddrClass, Address, AddressKey, Treatment},
    connection::{ConnRole, Connection},
    events::{CoreEvent, DetachedLink},
    link::{Link, LinkRef, Terminus},
    AddressHandle, ConnectionHandle, DeliveryId, Disposition, LinkHandle, RouterCore, WireAction,
};

mod proxy;
pub use crate::proxy::AddressProxy;

mod tracking;
pub use crate::tracking::TrackingUpdate;

/// Direction of a link, seen from the local container
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Direction {
    /// Deliveries flow into the local container over the link
    Incoming = 0,
    /// Deliveries flow out of the local container over the link
    Outgoing = 1,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Direction::Incoming => "Incoming",
            Direction::Outgoing => "Outgoing",
        };
        write!(f, "{}", s)
    }
}

impl Direction {
    #[inline]
    /// Shorthand for `self == Direction::Incoming`
    pub fn is_incoming(self) -> bool {
        self == Direction::Incoming
    }

    #[inline]
    /// Shorthand for `self == Direction::Outgoing`
    pub fn is_outgoing(self) -> bool {
        self == Direction::Outgoing
    }
}

impl ops::Not for Direction {
    type Output = Direction;
    fn not(self) -> Direction {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        }
    }
}
