use std::fmt;

/// Role a connection plays in the edge topology
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ConnRole {
    /// A locally-attached client
    Local,
    /// The connection to the interior router
    Edge,
    /// A connection to a peer edge router
    InterEdge,
}

impl fmt::Display for ConnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ConnRole::Local => "local",
            ConnRole::Edge => "edge",
            ConnRole::InterEdge => "inter-edge",
        };
        write!(f, "{}", s)
    }
}

/// A connection record in the core connection table
#[derive(Debug)]
pub struct Connection {
    pub(crate) identity: u64,
    pub(crate) role: ConnRole,
}

impl Connection {
    /// Identity used in log lines, `[C{identity}]`
    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn role(&self) -> ConnRole {
        self.role
    }
}
