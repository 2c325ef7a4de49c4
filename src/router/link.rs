use crate::config::CAPABILITY_EDGE_DOWNLINK;
use crate::router::{AddressHandle, ConnectionHandle, LinkHandle, RouterCore};
use crate::Direction;

use bytes::Bytes;

/// One endpoint terminus of a link
#[derive(Debug, Clone, Default)]
pub struct Terminus {
    pub(crate) address: Option<Bytes>,
    pub(crate) capabilities: Vec<&'static str>,
}

impl Terminus {
    /// Terminus with no address and no capabilities
    pub fn anonymous() -> Self {
        Terminus::default()
    }

    /// Terminus addressed at `address`, no capabilities
    pub fn normal(address: impl Into<Bytes>) -> Self {
        Terminus {
            address: Some(address.into()),
            capabilities: Vec::new(),
        }
    }

    /// Terminus carrying the edge-downlink capability, optionally addressed
    pub fn edge_downlink(address: Option<Bytes>) -> Self {
        Terminus {
            address,
            capabilities: vec![CAPABILITY_EDGE_DOWNLINK],
        }
    }

    pub fn address(&self) -> Option<&Bytes> {
        self.address.as_ref()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| *c == capability)
    }
}

/// A link record in the core link table
#[derive(Debug)]
pub struct Link {
    /// Identity used in log lines, `[L{ident}]`; never reused
    pub(crate) ident: u64,
    pub(crate) conn: ConnectionHandle,
    pub(crate) conn_identity: u64,
    pub(crate) direction: Direction,
    pub(crate) source: Terminus,
    pub(crate) target: Terminus,
    pub(crate) priority: u8,
    /// Set when the link was created by the address proxy rather than a user attach
    pub(crate) proxy: bool,
    pub(crate) owning_addr: Option<AddressHandle>,
}

impl Link {
    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn conn(&self) -> ConnectionHandle {
        self.conn
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn source(&self) -> &Terminus {
        &self.source
    }

    pub fn target(&self) -> &Terminus {
        &self.target
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy
    }

    pub fn owning_addr(&self) -> Option<AddressHandle> {
        self.owning_addr
    }
}

/// Revocable reference to a link
///
/// Holding a `LinkRef` does not keep the record alive. `resolve` yields the handle only
/// while the identified link still occupies its arena slot, so a stale reference can never
/// reach a freed or recycled record.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LinkRef {
    pub(crate) handle: LinkHandle,
    pub(crate) ident: u64,
}

impl LinkRef {
    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn resolve(&self, core: &RouterCore) -> Option<LinkHandle> {
        match core.links.get(self.handle.0) {
            Some(link) if link.ident == self.ident => Some(self.handle),
            _ => None,
        }
    }
}
