/// Credit granted to the interior once the tracking link is fully attached
pub(crate) const INITIAL_CREDIT: u32 = 32;
/// Priority assigned to links the controller creates
pub(crate) const DEFAULT_PRIORITY: u8 = 4;

/// Class-local address bound to the anonymous uplink; the routing layer forwards any
/// delivery without a local destination through whichever link is bound here.
pub const EDGE_CONN_ADDR: &str = "_edge";

/// Well-known source address of the receiver link carrying address-tracking updates
/// from the interior.
pub const TERMINUS_EDGE_ADDRESS_TRACKING: &str = "edge-address-tracking";

/// Capability declared on both termini of the downlink so the interior routes
/// router-addressed deliveries to this edge.
pub const CAPABILITY_EDGE_DOWNLINK: &str = "edge-downlink";

/// Config collects the tunable parameters of the address proxy into a single structure
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    initial_credit: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            initial_credit: INITIAL_CREDIT,
        }
    }
}

impl ProxyConfig {
    pub fn with_initial_credit(mut self, value: u32) -> Self {
        self.initial_credit = value;
        self
    }

    pub(crate) fn initial_credit(&self) -> u32 {
        self.initial_credit
    }
}
