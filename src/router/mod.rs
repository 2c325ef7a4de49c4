
pub(crate) mod address;
pub(crate) mod connection;
pub(crate) mod events;
pub(crate) mod link;

use std::{
    collections::VecDeque,
    fmt,
    ops::{Index, IndexMut},
};

use crate::config::DEFAULT_PRIORITY;
use crate::router::address::{AddrClass, Address, AddressKey, Treatment};
use crate::router::connection::{ConnRole, Connection};
use crate::router::events::{CoreEvent, DetachedLink};
use crate::router::link::{Link, LinkRef, Terminus};
use crate::Direction;

use bytes::Bytes;
use fxhash::FxHashMap;
use log::trace;
use slab::Slab;

/// Internal identifier for a `Connection` in the core connection table
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionHandle(pub usize);

/// Internal identifier for an `Address` in the core address table
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AddressHandle(pub usize);

/// Internal identifier for a `Link` in the core link table
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LinkHandle(pub usize);

impl From<ConnectionHandle> for usize {
    fn from(x: ConnectionHandle) -> usize {
        x.0
    }
}

impl From<AddressHandle> for usize {
    fn from(x: AddressHandle) -> usize {
        x.0
    }
}

impl From<LinkHandle> for usize {
    fn from(x: LinkHandle) -> usize {
        x.0
    }
}

impl Index<ConnectionHandle> for Slab<Connection> {
    type Output = Connection;
    fn index(&self, ch: ConnectionHandle) -> &Connection {
        &self[ch.0]
    }
}

impl Index<AddressHandle> for Slab<Address> {
    type Output = Address;
    fn index(&self, ah: AddressHandle) -> &Address {
        &self[ah.0]
    }
}

impl IndexMut<AddressHandle> for Slab<Address> {
    fn index_mut(&mut self, ah: AddressHandle) -> &mut Address {
        &mut self[ah.0]
    }
}

impl Index<LinkHandle> for Slab<Link> {
    type Output = Link;
    fn index(&self, lh: LinkHandle) -> &Link {
        &self[lh.0]
    }
}

impl IndexMut<LinkHandle> for Slab<Link> {
    fn index_mut(&mut self, lh: LinkHandle) -> &mut Link {
        &mut self[lh.0]
    }
}

/// Identifier of one delivery on an endpoint-managed link
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DeliveryId(pub u64);

/// Terminal outcome applied to a settled delivery
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Disposition {
    Accepted,
    Rejected,
}

/// Wire-visible actions produced by the core, drained with `poll_action`
#[derive(Debug, Clone, PartialEq)]
pub enum WireAction {
    /// An attach goes out for a newly-created link
    Attach { link: LinkRef },
    /// A detach goes out for a link
    Detach {
        link: LinkRef,
        error: Option<String>,
    },
    /// Credit is issued to the remote sender of a link
    Flow { link: LinkRef, credit: u32 },
    /// A delivery is settled with a terminal outcome
    Disposition {
        delivery: DeliveryId,
        disposition: Disposition,
    },
}

/// Deterministic model of the router core
///
/// This object performs no I/O whatsoever. It owns the connection, address, and link
/// tables, queues lifecycle events for the address proxy (drained with `poll_event`),
/// and queues the wire-visible side effects of the mutator surface (drained with
/// `poll_action`).
pub struct RouterCore {
    router_id: String,
    next_identity: u64,
    next_delivery: u64,
    connections: Slab<Connection>,
    addresses: Slab<Address>,
    pub(crate) links: Slab<Link>,
    /// Address hash; keys are locally registered, so the cheaper hasher is fine
    addr_hash: FxHashMap<Bytes, AddressHandle>,
    /// Open inter-edge connections, in open order
    edge_peers: Vec<ConnectionHandle>,
    /// The connection most recently selected as the path to the interior
    active_edge_conn: Option<ConnectionHandle>,
    events: VecDeque<CoreEvent>,
    actions: VecDeque<WireAction>,
}

impl fmt::Debug for RouterCore {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("RouterCore")
            .field("router_id", &self.router_id)
            .field("connections", &self.connections.len())
            .field("addresses", &self.addresses.len())
            .field("links", &self.links.len())
            .field("edge_peers", &self.edge_peers)
            .field("active_edge_conn", &self.active_edge_conn)
            .finish()
    }
}

impl RouterCore {
    pub fn new(router_id: impl Into<String>) -> Self {
        RouterCore {
            router_id: router_id.into(),
            next_identity: 1,
            next_delivery: 1,
            connections: Slab::new(),
            addresses: Slab::new(),
            links: Slab::new(),
            addr_hash: FxHashMap::default(),
            edge_peers: Vec::new(),
            active_edge_conn: None,
            events: VecDeque::new(),
            actions: VecDeque::new(),
        }
    }

    /// Identity of this router, used as the downlink source address
    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    /// Get the next queued lifecycle event
    #[must_use]
    pub fn poll_event(&mut self) -> Option<CoreEvent> {
        self.events.pop_front()
    }

    /// Get the next queued wire action
    #[must_use]
    pub fn poll_action(&mut self) -> Option<WireAction> {
        self.actions.pop_front()
    }

    fn new_identity(&mut self) -> u64 {
        let identity = self.next_identity;
        self.next_identity += 1;
        identity
    }

    //
    // Address table
    //

    /// Allocate an addressable record, or return the existing one with the same key
    pub fn add_local_address(
        &mut self,
        class: AddrClass,
        name: &str,
        treatment: Treatment,
    ) -> AddressHandle {
        let key = AddressKey::new(class, name);
        if let Some(handle) = self.addr_hash.get(&key.0[..]) {
            return *handle;
        }
        let handle = AddressHandle(self.addresses.insert(Address::new(key.clone(), treatment)));
        self.addr_hash.insert(key.0, handle);
        handle
    }

    /// Look an address up by its raw hash key, class prefix included
    pub fn address_by_key(&self, key: &[u8]) -> Option<AddressHandle> {
        self.addr_hash.get(key).copied()
    }

    pub fn address(&self, handle: AddressHandle) -> &Address {
        &self.addresses[handle]
    }

    pub(crate) fn address_mut(&mut self, handle: AddressHandle) -> &mut Address {
        &mut self.addresses[handle]
    }

    pub fn addresses(&self) -> impl Iterator<Item = (AddressHandle, &Address)> {
        self.addresses.iter().map(|(i, a)| (AddressHandle(i), a))
    }

    pub fn add_subscription(&mut self, addr: AddressHandle) {
        self.addresses[addr].subscriptions += 1;
    }

    pub fn remove_subscription(&mut self, addr: AddressHandle) {
        self.addresses[addr].subscriptions -= 1;
    }

    pub fn set_propagate_local(&mut self, addr: AddressHandle, propagate: bool) {
        self.addresses[addr].propagate_local = propagate;
    }

    pub fn address_watch_on(&mut self, addr: AddressHandle) {
        self.addresses[addr].watches += 1;
        self.events.push_back(CoreEvent::AddrWatchOn(addr));
    }

    pub fn address_watch_off(&mut self, addr: AddressHandle) {
        self.addresses[addr].watches -= 1;
        self.events.push_back(CoreEvent::AddrWatchOff(addr));
    }

    //
    // Connection table
    //

    pub fn open_connection(&mut self, role: ConnRole) -> ConnectionHandle {
        let identity = self.new_identity();
        let handle = ConnectionHandle(self.connections.insert(Connection { identity, role }));
        if role == ConnRole::InterEdge {
            self.edge_peers.push(handle);
        }
        self.events.push_back(CoreEvent::ConnOpened(handle));
        handle
    }

    /// The connection manager selected `conn` as the path to the interior
    pub fn edge_connection_established(&mut self, conn: ConnectionHandle) {
        self.active_edge_conn = Some(conn);
        self.events.push_back(CoreEvent::ConnEdgeEstablished(conn));
    }

    /// Abrupt loss of a connection; its links are freed without outbound detaches
    pub fn close_connection(&mut self, conn: ConnectionHandle) {
        let on_conn: Vec<LinkHandle> = self
            .links
            .iter()
            .filter(|(_, l)| l.conn == conn)
            .map(|(i, _)| LinkHandle(i))
            .collect();
        for link in on_conn {
            self.observe_link_detached(link);
        }

        self.edge_peers.retain(|peer| *peer != conn);
        self.connections.remove(conn.0);
        if self.active_edge_conn == Some(conn) {
            self.active_edge_conn = None;
            self.events.push_back(CoreEvent::ConnEdgeLost(conn));
        }
    }

    pub fn connection(&self, handle: ConnectionHandle) -> &Connection {
        &self.connections[handle]
    }

    /// Like `connection`, but tolerates a handle whose record was already freed. Queued
    /// events can outlive the connection they name.
    pub fn try_connection(&self, handle: ConnectionHandle) -> Option<&Connection> {
        self.connections.get(handle.0)
    }

    pub fn edge_peers(&self) -> &[ConnectionHandle] {
        &self.edge_peers
    }

    pub fn active_edge_conn(&self) -> Option<ConnectionHandle> {
        self.active_edge_conn
    }

    //
    // Link table
    //

    pub fn create_link(
        &mut self,
        conn: ConnectionHandle,
        direction: Direction,
        source: Terminus,
        target: Terminus,
        priority: u8,
        proxy: bool,
    ) -> LinkHandle {
        let ident = self.new_identity();
        let conn_identity = self.connections[conn].identity;
        let handle = LinkHandle(self.links.insert(Link {
            ident,
            conn,
            conn_identity,
            direction,
            source,
            target,
            priority,
            proxy,
            owning_addr: None,
        }));
        trace!(
            "[C{}][L{}] {} link created (proxy: {})",
            conn_identity,
            ident,
            direction,
            proxy
        );
        self.actions.push_back(WireAction::Attach {
            link: self.link_ref(handle),
        });
        handle
    }

    pub fn link(&self, handle: LinkHandle) -> &Link {
        &self.links[handle]
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkHandle, &Link)> {
        self.links.iter().map(|(i, l)| (LinkHandle(i), l))
    }

    pub fn link_ref(&self, handle: LinkHandle) -> LinkRef {
        LinkRef {
            handle,
            ident: self.links[handle].ident,
        }
    }

    /// Bind `link` to `addr` for routing; a no-op if already bound there
    pub fn bind_address_link(&mut self, addr: AddressHandle, link: LinkHandle) {
        let record = &mut self.links[link];
        if record.owning_addr.is_some() {
            return;
        }
        record.owning_addr = Some(addr);
        let direction = record.direction;
        let proxy = record.proxy;

        let address = &mut self.addresses[addr];
        match direction {
            Direction::Outgoing => {
                address.rlinks.push(link);
                if proxy {
                    address.proxy_rlink_count += 1;
                } else {
                    self.events.push_back(CoreEvent::AddrAddedLocalDest(addr));
                }
            }
            Direction::Incoming => {
                let first_nonproxy = address.nonproxy_inlinks() == 0;
                address.inlinks.push(link);
                if proxy {
                    address.proxy_inlink_count += 1;
                } else if first_nonproxy {
                    self.events.push_back(CoreEvent::AddrBecameSource(addr));
                }
            }
        }
    }

    /// Unbind `link` from `addr`; a no-op if not bound there
    pub fn unbind_address_link(&mut self, addr: AddressHandle, link: LinkHandle) {
        let record = &mut self.links[link];
        if record.owning_addr != Some(addr) {
            return;
        }
        record.owning_addr = None;
        let direction = record.direction;
        let proxy = record.proxy;

        let address = &mut self.addresses[addr];
        match direction {
            Direction::Outgoing => {
                address.rlinks.retain(|l| *l != link);
                if proxy {
                    address.proxy_rlink_count -= 1;
                } else {
                    self.events.push_back(CoreEvent::AddrRemovedLocalDest(addr));
                }
            }
            Direction::Incoming => {
                address.inlinks.retain(|l| *l != link);
                if proxy {
                    address.proxy_inlink_count -= 1;
                } else if address.nonproxy_inlinks() == 0 {
                    self.events.push_back(CoreEvent::AddrNoLongerSource(addr));
                }
            }
        }
    }

    /// Initiate a detach toward the remote and free the link record
    pub fn link_outbound_detach(&mut self, link: LinkHandle, error: Option<String>) {
        if let Some(addr) = self.links[link].owning_addr {
            self.unbind_address_link(addr, link);
        }
        let link_ref = self.link_ref(link);
        self.actions.push_back(WireAction::Detach {
            link: link_ref,
            error,
        });
        let record = self.links.remove(link.0);
        trace!(
            "[C{}][L{}] outbound detach",
            record.conn_identity,
            record.ident
        );
    }

    /// A detach arrived from the remote, or the transport collapsed under the link.
    /// The record is freed and a detach event carrying its snapshot is queued.
    pub fn remote_detach_link(&mut self, link: LinkHandle) {
        self.observe_link_detached(link);
    }

    fn observe_link_detached(&mut self, link: LinkHandle) {
        let snapshot = DetachedLink {
            link: self.link_ref(link),
            conn: self.links[link].conn,
            conn_identity: self.links[link].conn_identity,
            conn_role: self.connections[self.links[link].conn].role,
            owning_addr: self.links[link].owning_addr,
        };
        if let Some(addr) = snapshot.owning_addr {
            self.unbind_address_link(addr, link);
        }
        let record = self.links.remove(link.0);
        let event = match record.direction {
            Direction::Incoming => CoreEvent::LinkInDetached(snapshot),
            Direction::Outgoing => CoreEvent::LinkOutDetached(snapshot),
        };
        self.events.push_back(event);
    }

    //
    // Endpoint framework: links whose transfers are dispatched back to the owning
    // module instead of being routed
    //

    pub fn endpoint_create_link(
        &mut self,
        conn: ConnectionHandle,
        direction: Direction,
        source: Terminus,
        target: Terminus,
    ) -> LinkHandle {
        self.create_link(conn, direction, source, target, DEFAULT_PRIORITY, false)
    }

    /// Issue additional credit to the remote sender
    pub fn endpoint_flow(&mut self, link: LinkHandle, credit: u32) {
        let link_ref = self.link_ref(link);
        self.actions.push_back(WireAction::Flow {
            link: link_ref,
            credit,
        });
    }

    /// Settle a delivery with a terminal outcome
    pub fn endpoint_settle(&mut self, delivery: DeliveryId, disposition: Disposition) {
        self.actions.push_back(WireAction::Disposition {
            delivery,
            disposition,
        });
    }

    /// Detach the endpoint-managed link
    pub fn endpoint_detach(&mut self, link: LinkHandle, error: Option<String>) {
        self.link_outbound_detach(link, error);
    }

    /// The remote acknowledged the attach of an endpoint-managed link
    pub fn endpoint_second_attach(&mut self, link: LinkHandle) {
        let link_ref = self.link_ref(link);
        self.events
            .push_back(CoreEvent::EndpointSecondAttach { link: link_ref });
    }

    /// A transfer arrived on an endpoint-managed link
    pub fn deliver_transfer(&mut self, link: LinkHandle, body: Bytes) -> DeliveryId {
        let delivery = DeliveryId(self.next_delivery);
        self.next_delivery += 1;
        let link_ref = self.link_ref(link);
        self.events.push_back(CoreEvent::EndpointTransfer {
            link: link_ref,
            delivery,
            body,
        });
        delivery
    }
}
