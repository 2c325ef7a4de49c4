use crate::router::link::LinkRef;
use crate::router::LinkHandle;

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Address class, encoded as the first byte of every address key
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AddrClass {
    /// Visible to this router only
    Local,
    /// User-routable across the network
    Mobile,
    /// Topological, follows the router topology
    Topological,
}

impl AddrClass {
    pub(crate) fn prefix(self) -> u8 {
        match self {
            AddrClass::Local => b'L',
            AddrClass::Mobile => b'M',
            AddrClass::Topological => b'T',
        }
    }

    pub(crate) fn from_prefix(prefix: u8) -> Option<AddrClass> {
        match prefix {
            b'L' => Some(AddrClass::Local),
            b'M' => Some(AddrClass::Mobile),
            b'T' => Some(AddrClass::Topological),
            _ => None,
        }
    }
}

/// Hash key identifying an address, class prefix included
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AddressKey(pub(crate) Bytes);

impl AddressKey {
    pub fn new(class: AddrClass, name: &str) -> Self {
        let mut key = BytesMut::with_capacity(1 + name.len());
        key.put_u8(class.prefix());
        key.put_slice(name.as_bytes());
        AddressKey(key.freeze())
    }

    pub fn class(&self) -> Option<AddrClass> {
        self.0.first().copied().and_then(AddrClass::from_prefix)
    }

    pub fn is_mobile(&self) -> bool {
        self.class() == Some(AddrClass::Mobile)
    }

    /// Key with the class prefix stripped, as used in terminus addresses
    pub fn suffix(&self) -> Bytes {
        self.0.slice(1..)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Routing treatment applied to deliveries for an address
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Treatment {
    AnycastClosest,
    AnycastBalanced,
    Multicast,
}

/// An address record in the core address table
///
/// The two `edge_*_slot` fields belong to the address proxy; everything else is general
/// routing state the proxy only reads.
#[derive(Debug)]
pub struct Address {
    pub(crate) key: AddressKey,
    pub(crate) treatment: Treatment,
    /// Links over which deliveries leave the router toward consumers
    pub(crate) rlinks: Vec<LinkHandle>,
    pub(crate) proxy_rlink_count: usize,
    /// Links over which deliveries enter the router from producers
    pub(crate) inlinks: Vec<LinkHandle>,
    pub(crate) proxy_inlink_count: usize,
    /// In-process consumers
    pub(crate) subscriptions: usize,
    /// In-process observers that want source-side announcements
    pub(crate) watches: usize,
    pub(crate) propagate_local: bool,
    pub(crate) edge_inlink_slot: Option<LinkRef>,
    pub(crate) edge_outlink_slot: Option<LinkRef>,
}

impl Address {
    pub(crate) fn new(key: AddressKey, treatment: Treatment) -> Self {
        Address {
            key,
            treatment,
            rlinks: Vec::new(),
            proxy_rlink_count: 0,
            inlinks: Vec::new(),
            proxy_inlink_count: 0,
            subscriptions: 0,
            watches: 0,
            propagate_local: false,
            edge_inlink_slot: None,
            edge_outlink_slot: None,
        }
    }

    pub fn key(&self) -> &AddressKey {
        &self.key
    }

    pub fn treatment(&self) -> Treatment {
        self.treatment
    }

    pub fn rlinks(&self) -> &[LinkHandle] {
        &self.rlinks
    }

    pub fn inlinks(&self) -> &[LinkHandle] {
        &self.inlinks
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions
    }

    pub fn watches(&self) -> usize {
        self.watches
    }

    pub fn propagate_local(&self) -> bool {
        self.propagate_local
    }

    pub fn edge_inlink_slot(&self) -> Option<LinkRef> {
        self.edge_inlink_slot
    }

    pub fn edge_outlink_slot(&self) -> Option<LinkRef> {
        self.edge_outlink_slot
    }

    /// Locally-attached consumers, proxies excluded
    pub fn nonproxy_rlinks(&self) -> usize {
        self.rlinks.len() - self.proxy_rlink_count
    }

    /// Locally-attached producers, proxies excluded
    pub fn nonproxy_inlinks(&self) -> usize {
        self.inlinks.len() - self.proxy_inlink_count
    }
}
