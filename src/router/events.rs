use crate::router::connection::ConnRole;
use crate::router::link::LinkRef;
use crate::router::{AddressHandle, ConnectionHandle, DeliveryId};

use bytes::Bytes;

/// Snapshot of a link taken when its detach was observed
///
/// The link record is freed before the event is consumed, so the fields the controller
/// needs to reconcile its slots ride in the event itself.
#[derive(Debug, Clone)]
pub struct DetachedLink {
    pub link: LinkRef,
    pub conn: ConnectionHandle,
    pub conn_identity: u64,
    pub conn_role: ConnRole,
    pub owning_addr: Option<AddressHandle>,
}

/// Events raised by the router core, delivered serially to the address proxy
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A connection of any role finished opening
    ConnOpened(ConnectionHandle),
    /// The connection manager selected this connection as the path to the interior
    ConnEdgeEstablished(ConnectionHandle),
    /// The path to the interior dropped abruptly; its links are presumed gone
    ConnEdgeLost(ConnectionHandle),
    /// A consumer link was bound to the address
    AddrAddedLocalDest(AddressHandle),
    /// A consumer link was unbound from the address
    AddrRemovedLocalDest(AddressHandle),
    /// The address gained its first non-proxy producer link
    AddrBecameSource(AddressHandle),
    /// The address lost its last non-proxy producer link
    AddrNoLongerSource(AddressHandle),
    AddrWatchOn(AddressHandle),
    AddrWatchOff(AddressHandle),
    LinkInDetached(DetachedLink),
    LinkOutDetached(DetachedLink),
    /// The remote acknowledged an endpoint-managed link attach
    EndpointSecondAttach { link: LinkRef },
    /// A transfer arrived on an endpoint-managed link
    EndpointTransfer {
        link: LinkRef,
        delivery: DeliveryId,
        body: Bytes,
    },
}
