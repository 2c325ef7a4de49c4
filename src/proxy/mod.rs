
use crate::config::{ProxyConfig, DEFAULT_PRIORITY, EDGE_CONN_ADDR, TERMINUS_EDGE_ADDRESS_TRACKING};
use crate::router::address::{AddrClass, Treatment};
use crate::router::connection::ConnRole;
use crate::router::events::{CoreEvent, DetachedLink};
use crate::router::link::{LinkRef, Terminus};
use crate::router::{
    AddressHandle, ConnectionHandle, DeliveryId, Disposition, LinkHandle, RouterCore,
};
use crate::tracking::TrackingUpdate;
use crate::Direction;

use bytes::Bytes;
use log::{debug, error};

/// Address-proxy controller of the edge router
///
/// One instance exists per router process. While an edge connection to the interior is
/// active, the controller keeps three control links on it (the anonymous uplink bound to
/// `_edge`, the router-addressed downlink, and the tracking endpoint) plus one incoming
/// proxy link per mobile address with local consumers and one outgoing proxy link per
/// mobile address with local producers. Independently of the interior, it mirrors every
/// consumer-bearing mobile address onto each open inter-edge connection.
///
/// The controller owns only its own control-link state and the per-address proxy-link
/// slots; every other table it touches belongs to the core and is reached through the
/// mutator surface.
pub struct AddressProxy {
    config: ProxyConfig,
    /// The `_edge` address; deliveries with no local destination are routed here
    edge_conn_addr: AddressHandle,

    // Connection-related state
    edge_conn: Option<ConnectionHandle>,
    /// Anonymous link carrying deliveries to the interior
    edge_uplink: Option<LinkRef>,
    /// Carries router-addressed deliveries from the interior
    edge_downlink: Option<LinkRef>,
    /// Carries address tracking updates from the interior
    tracking_endpoint: Option<LinkRef>,
}

impl AddressProxy {
    /// Create the controller and publish the edge connection address into the core
    pub fn new(core: &mut RouterCore, config: ProxyConfig) -> Self {
        let edge_conn_addr =
            core.add_local_address(AddrClass::Local, EDGE_CONN_ADDR, Treatment::AnycastClosest);
        AddressProxy {
            config,
            edge_conn_addr,
            edge_conn: None,
            edge_uplink: None,
            edge_downlink: None,
            tracking_endpoint: None,
        }
    }

    /// Handle of the `_edge` address representing destinations reachable via the interior
    pub fn edge_conn_addr(&self) -> AddressHandle {
        self.edge_conn_addr
    }

    /// The currently established edge-to-interior connection, if any
    pub fn edge_conn(&self) -> Option<ConnectionHandle> {
        self.edge_conn
    }

    /// Deliver one core event to the controller
    pub fn handle_event(&mut self, core: &mut RouterCore, event: CoreEvent) {
        match event {
            CoreEvent::ConnOpened(conn) => self.on_conn_opened(core, conn),
            CoreEvent::ConnEdgeEstablished(conn) => self.on_edge_established(core, conn),
            CoreEvent::ConnEdgeLost(_) => self.on_edge_lost(),
            CoreEvent::AddrAddedLocalDest(addr) => self.on_added_local_dest(core, addr),
            CoreEvent::AddrRemovedLocalDest(addr) => self.on_removed_local_dest(core, addr),
            CoreEvent::AddrBecameSource(addr) => self.on_became_source(core, addr),
            CoreEvent::AddrNoLongerSource(addr) => self.on_no_longer_source(core, addr),
            CoreEvent::AddrWatchOn(addr) => self.on_watch_on(core, addr),
            CoreEvent::AddrWatchOff(addr) => self.on_watch_off(core, addr),
            CoreEvent::LinkInDetached(detached) => {
                self.on_link_detached(core, detached, Direction::Incoming)
            }
            CoreEvent::LinkOutDetached(detached) => {
                self.on_link_detached(core, detached, Direction::Outgoing)
            }
            CoreEvent::EndpointSecondAttach { link } => self.on_second_attach(core, link),
            CoreEvent::EndpointTransfer {
                link,
                delivery,
                body,
            } => self.on_transfer(core, link, delivery, body),
        }
    }

    //
    // Connection events
    //

    fn on_conn_opened(&mut self, core: &mut RouterCore, conn: ConnectionHandle) {
        // The connection may already be gone by the time the event is consumed.
        if core.try_connection(conn).map(|c| c.role()) != Some(ConnRole::InterEdge) {
            return;
        }
        let eligible: Vec<AddressHandle> = core
            .addresses()
            .filter(|(_, a)| a.key().is_mobile() && a.nonproxy_rlinks() > 0)
            .map(|(h, _)| h)
            .collect();
        for addr in eligible {
            self.proxy_addr_on_inter_edge_connection(core, addr, conn);
        }
    }

    fn on_edge_established(&mut self, core: &mut RouterCore, conn: ConnectionHandle) {
        if core.try_connection(conn).is_none() {
            // Already lost again; the trailing loss event does the cleanup.
            return;
        }
        match self.edge_conn {
            None => self.setup_edge_connection(core, conn),
            Some(old) => {
                // The connection manager found a better path to the interior. Migrate.
                if let Some(old_conn) = core.try_connection(old) {
                    debug!(
                        "upgrading edge-to-interior connection [C{}] to [C{}]",
                        old_conn.identity(),
                        core.connection(conn).identity()
                    );
                }
                self.teardown_edge_connection(core);
                self.setup_edge_connection(core, conn);
            }
        }
    }

    fn on_edge_lost(&mut self) {
        // The links went down with the connection; no detaches are owed.
        self.edge_conn = None;
        self.edge_uplink = None;
        self.edge_downlink = None;
        self.tracking_endpoint = None;
    }

    /// The edge connection has opened. Set up the control links and the tracking
    /// endpoint, then walk the mobile addresses and create proxy links reflecting the
    /// current local state.
    fn setup_edge_connection(&mut self, core: &mut RouterCore, conn: ConnectionHandle) {
        debug_assert!(self.edge_conn.is_none());
        self.edge_conn = Some(conn);

        // Anonymous sender toward the interior. Binding it to the edge connection
        // address routes every off-edge delivery through this link.
        debug_assert!(self.edge_uplink.is_none());
        let uplink = core.create_link(
            conn,
            Direction::Outgoing,
            Terminus::anonymous(),
            Terminus::anonymous(),
            DEFAULT_PRIORITY,
            true,
        );
        core.bind_address_link(self.edge_conn_addr, uplink);
        self.edge_uplink = Some(core.link_ref(uplink));

        // Receiver for deliveries addressed to this router.
        debug_assert!(self.edge_downlink.is_none());
        let router_id = Bytes::copy_from_slice(core.router_id().as_bytes());
        let downlink = core.create_link(
            conn,
            Direction::Incoming,
            Terminus::edge_downlink(Some(router_id)),
            Terminus::edge_downlink(None),
            DEFAULT_PRIORITY,
            true,
        );
        self.edge_downlink = Some(core.link_ref(downlink));

        // Receiver for address tracking updates. Credit is granted on second attach.
        debug_assert!(self.tracking_endpoint.is_none());
        let tracking = core.endpoint_create_link(
            conn,
            Direction::Incoming,
            Terminus::normal(TERMINUS_EDGE_ADDRESS_TRACKING),
            Terminus::anonymous(),
        );
        self.tracking_endpoint = Some(core.link_ref(tracking));

        // Seed proxy links for eligible local destinations and sources.
        let mobile: Vec<AddressHandle> = core
            .addresses()
            .filter(|(_, a)| a.key().is_mobile())
            .map(|(h, _)| h)
            .collect();
        for addr in mobile {
            self.seed_address(core, addr, conn);
        }
    }

    fn seed_address(&mut self, core: &mut RouterCore, addr: AddressHandle, conn: ConnectionHandle) {
        let address = core.address(addr);

        // Local consumers are announced with an incoming link from the interior.
        let rlinks = address.rlinks().len();
        if rlinks > 0 || (address.subscriptions > 0 && address.propagate_local) {
            if rlinks == 1 {
                // A sole receiver already on the edge connection is a proxy echo, not a
                // local consumer.
                // TODO: also skip when every one of several receivers is on the edge
                // connection, not just a sole one.
                let sole = address.rlinks()[0];
                if core.link(sole).conn() != conn {
                    self.add_inlink(core, addr);
                }
            } else {
                self.add_inlink(core, addr);
            }
        }

        // Local producers are announced with an outgoing link toward the interior.
        let address = core.address(addr);
        let inlinks = address.inlinks().len();
        let watches = address.watches;
        if inlinks > 0 || watches > 0 {
            let add = if inlinks == 1 && watches == 0 {
                core.link(address.inlinks()[0]).conn() != conn
            } else {
                true
            };
            if add {
                self.add_outlink(core, addr);
            }
        }
    }

    /// Remove all control and proxy links from the current edge connection, reverting
    /// `setup_edge_connection`. Streaming links are left alone: they are anonymous, not
    /// mobile, and may carry flows that outlive the control plane.
    fn teardown_edge_connection(&mut self, core: &mut RouterCore) {
        let old_conn = self.edge_conn;

        if let Some(tracking) = self.tracking_endpoint.take().and_then(|r| r.resolve(core)) {
            core.endpoint_detach(tracking, None);
        }

        if let Some(downlink) = self.edge_downlink.take().and_then(|r| r.resolve(core)) {
            core.link_outbound_detach(downlink, None);
        }

        if let Some(uplink) = self.edge_uplink.take().and_then(|r| r.resolve(core)) {
            core.unbind_address_link(self.edge_conn_addr, uplink);
            core.link_outbound_detach(uplink, None);
        }

        // Clear both proxy slots of every address; a stale slot would block the rebuild
        // on the next connection.
        let all: Vec<AddressHandle> = core.addresses().map(|(h, _)| h).collect();
        for addr in all {
            if let Some(link) = resolve_slot(core, core.address(addr).edge_inlink_slot()) {
                debug_assert_eq!(Some(core.link(link).conn()), old_conn);
                self.del_inlink(core, addr);
            }
            if let Some(link) = resolve_slot(core, core.address(addr).edge_outlink_slot()) {
                debug_assert_eq!(Some(core.link(link).conn()), old_conn);
                self.del_outlink(core, addr);
            }
        }

        // Leave the connection itself up; it may be used for failover.
        self.edge_conn = None;
    }

    //
    // Address events
    //

    fn on_added_local_dest(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if !core.address(addr).key().is_mobile() {
            return;
        }
        // The inter-edge mesh is maintained whether or not an interior path exists.
        if core.address(addr).nonproxy_rlinks() == 1 {
            self.proxy_addr_on_all_inter_edge_connections(core, addr);
        }
        if self.edge_conn.is_none() {
            return;
        }
        if core.address(addr).nonproxy_rlinks() == 1 {
            self.add_inlink(core, addr);
        }
    }

    fn on_removed_local_dest(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if !core.address(addr).key().is_mobile() {
            return;
        }
        if core.address(addr).nonproxy_rlinks() == 0 {
            self.remove_inter_edge_proxies(core, addr);
        }
        if self.edge_conn.is_none() {
            return;
        }
        if core.address(addr).nonproxy_rlinks() == 0 {
            self.del_inlink(core, addr);
        }
    }

    fn on_became_source(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if !core.address(addr).key().is_mobile() || self.edge_conn.is_none() {
            return;
        }
        self.add_outlink(core, addr);
    }

    fn on_no_longer_source(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if !core.address(addr).key().is_mobile() || self.edge_conn.is_none() {
            return;
        }
        if core.address(addr).watches == 0 {
            self.del_outlink(core, addr);
        }
    }

    fn on_watch_on(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if !core.address(addr).key().is_mobile() || self.edge_conn.is_none() {
            return;
        }
        self.add_outlink(core, addr);
    }

    fn on_watch_off(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if !core.address(addr).key().is_mobile() || self.edge_conn.is_none() {
            return;
        }
        let address = core.address(addr);
        if address.inlinks().len() == address.proxy_inlink_count {
            // No local producers remain behind the watch.
            self.del_outlink(core, addr);
        }
    }

    //
    // Link events
    //

    fn on_link_detached(&mut self, core: &mut RouterCore, detached: DetachedLink, dir: Direction) {
        // Only detaches on the edge connection can touch a slot.
        if detached.conn_role != ConnRole::Edge {
            return;
        }
        let Some(addr) = detached.owning_addr else {
            return;
        };
        let address = core.address_mut(addr);
        let slot = match dir {
            Direction::Incoming => &mut address.edge_inlink_slot,
            Direction::Outgoing => &mut address.edge_outlink_slot,
        };
        // The record is about to be unreachable; drop our reference so nothing
        // dereferences it later.
        if slot.map(|r| r.ident()) == Some(detached.link.ident()) {
            *slot = None;
            debug!(
                "[C{}][L{}] {} proxy link to address '{}' detached",
                detached.conn_identity,
                detached.link.ident(),
                dir,
                core.address(addr).key()
            );
        }
    }

    //
    // Interior proxy links
    //

    fn add_inlink(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        if resolve_slot(core, core.address(addr).edge_inlink_slot()).is_some() {
            return;
        }
        let Some(conn) = self.edge_conn else {
            return;
        };
        let key = core.address(addr).key().clone();
        let link = core.create_link(
            conn,
            Direction::Incoming,
            Terminus::normal(key.suffix()),
            Terminus::anonymous(),
            DEFAULT_PRIORITY,
            true,
        );
        core.bind_address_link(addr, link);
        let link_ref = core.link_ref(link);
        core.address_mut(addr).edge_inlink_slot = Some(link_ref);
        debug!(
            "[C{}][L{}] creating incoming proxy link to address '{}'",
            core.link(link).conn_identity,
            link_ref.ident(),
            key
        );
    }

    fn del_inlink(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        let Some(link) = resolve_slot(core, core.address(addr).edge_inlink_slot()) else {
            return;
        };
        debug!(
            "[C{}][L{}] deleting incoming proxy link to address '{}'",
            core.link(link).conn_identity,
            core.link(link).ident(),
            core.address(addr).key()
        );
        core.address_mut(addr).edge_inlink_slot = None;
        core.unbind_address_link(addr, link);
        core.link_outbound_detach(link, None);
    }

    fn add_outlink(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        let address = core.address(addr);
        if resolve_slot(core, address.edge_outlink_slot()).is_some() || address.subscriptions > 0 {
            return;
        }
        let Some(conn) = self.edge_conn else {
            return;
        };
        // The link must not be bound to the address yet. That happens when the interior
        // announces upstream destinations for it over the tracking endpoint.
        let key = core.address(addr).key().clone();
        let link = core.create_link(
            conn,
            Direction::Outgoing,
            Terminus::anonymous(),
            Terminus::normal(key.suffix()),
            DEFAULT_PRIORITY,
            true,
        );
        let link_ref = core.link_ref(link);
        core.address_mut(addr).edge_outlink_slot = Some(link_ref);
        debug!(
            "[C{}][L{}] created outgoing proxy link to address '{}'",
            core.link(link).conn_identity,
            link_ref.ident(),
            key
        );
    }

    fn del_outlink(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        let Some(link) = resolve_slot(core, core.address(addr).edge_outlink_slot()) else {
            return;
        };
        debug!(
            "[C{}][L{}] deleting outgoing proxy link to address '{}'",
            core.link(link).conn_identity,
            core.link(link).ident(),
            core.address(addr).key()
        );
        core.address_mut(addr).edge_outlink_slot = None;
        core.unbind_address_link(addr, link);
        core.link_outbound_detach(link, None);
    }

    //
    // Inter-edge mesh
    //

    fn proxy_addr_on_inter_edge_connection(
        &mut self,
        core: &mut RouterCore,
        addr: AddressHandle,
        conn: ConnectionHandle,
    ) {
        let key = core.address(addr).key().clone();
        let link = core.create_link(
            conn,
            Direction::Incoming,
            Terminus::normal(key.suffix()),
            Terminus::anonymous(),
            DEFAULT_PRIORITY,
            true,
        );
        core.bind_address_link(addr, link);
        debug!(
            "[C{}][L{}] creating inter-edge proxy link to address '{}'",
            core.link(link).conn_identity,
            core.link(link).ident(),
            key
        );
    }

    fn proxy_addr_on_all_inter_edge_connections(
        &mut self,
        core: &mut RouterCore,
        addr: AddressHandle,
    ) {
        let peers: Vec<ConnectionHandle> = core.edge_peers().to_vec();
        for peer in peers {
            self.proxy_addr_on_inter_edge_connection(core, addr, peer);
        }
    }

    fn remove_inter_edge_proxies(&mut self, core: &mut RouterCore, addr: AddressHandle) {
        let peered: Vec<LinkHandle> = core
            .address(addr)
            .inlinks()
            .iter()
            .copied()
            .filter(|l| core.connection(core.link(*l).conn()).role() == ConnRole::InterEdge)
            .collect();
        for link in peered {
            core.unbind_address_link(addr, link);
            core.link_outbound_detach(link, None);
        }
    }

    //
    // Tracking endpoint
    //

    fn is_tracking_endpoint(&self, link: &LinkRef) -> bool {
        self.tracking_endpoint.map(|r| r.ident()) == Some(link.ident())
    }

    fn on_second_attach(&mut self, core: &mut RouterCore, link: LinkRef) {
        if !self.is_tracking_endpoint(&link) {
            return;
        }
        if let Some(link) = link.resolve(core) {
            core.endpoint_flow(link, self.config.initial_credit());
        }
    }

    fn on_transfer(
        &mut self,
        core: &mut RouterCore,
        link: LinkRef,
        delivery: DeliveryId,
        body: Bytes,
    ) {
        if !self.is_tracking_endpoint(&link) {
            return;
        }

        let disposition = match TrackingUpdate::unmarshal(&body) {
            Ok(update) => {
                self.apply_tracking_update(core, &update);
                Disposition::Accepted
            }
            Err(err) => {
                error!("received an invalid address-tracking body, rejecting: {}", err);
                Disposition::Rejected
            }
        };
        core.endpoint_settle(delivery, disposition);

        // Replenish the credit consumed by this delivery.
        if let Some(link) = link.resolve(core) {
            core.endpoint_flow(link, 1);
        }
    }

    fn apply_tracking_update(&mut self, core: &mut RouterCore, update: &TrackingUpdate) {
        // An address we have never heard of carries nothing to bind; accept and move on.
        let Some(addr) = core.address_by_key(&update.address) else {
            return;
        };
        let Some(link) = resolve_slot(core, core.address(addr).edge_outlink_slot()) else {
            return;
        };
        if update.reachable {
            if core.link(link).owning_addr().is_none() {
                debug!(
                    "[C{}][L{}] binding proxy link to address '{}'",
                    core.link(link).conn_identity,
                    core.link(link).ident(),
                    core.address(addr).key()
                );
                core.bind_address_link(addr, link);
            }
        } else if core.link(link).owning_addr() == Some(addr) {
            debug!(
                "[C{}][L{}] unbinding proxy link from address '{}'",
                core.link(link).conn_identity,
                core.link(link).ident(),
                core.address(addr).key()
            );
            core.unbind_address_link(addr, link);
        }
    }
}

/// Resolve a slot to a live link handle; a stale or empty slot reads as vacant
fn resolve_slot(core: &RouterCore, slot: Option<LinkRef>) -> Option<LinkHandle> {
    slot.and_then(|r| r.resolve(core))
}
