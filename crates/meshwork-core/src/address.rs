//! Hierarchical addresses of the tier graph
//!
//! Addresses compose downward: a mesh address names an edge and a mesh,
//! a part address adds a part key, a host address adds a host URI, and so
//! on down to lanes and links. All address types are plain values with a
//! derived total order, so they can key ordered tables.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Uri;

/// Key of a partition within a mesh
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartKey {
    /// Catch-all gateway partition
    Extant,
    /// Partition hosting introspection nodes
    Meta,
    /// Named partition
    Key(String),
}

impl PartKey {
    pub fn named(name: impl Into<String>) -> Self {
        PartKey::Key(name.into())
    }

    #[inline]
    pub fn is_gateway(&self) -> bool {
        matches!(self, PartKey::Extant)
    }

    #[inline]
    pub fn is_meta(&self) -> bool {
        matches!(self, PartKey::Meta)
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartKey::Extant => f.write_str("#extant"),
            PartKey::Meta => f.write_str("#meta"),
            PartKey::Key(name) => f.write_str(name),
        }
    }
}

/// Address of a mesh on an edge
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshAddress {
    pub edge_name: String,
    pub mesh_uri: Uri,
}

impl MeshAddress {
    pub fn new(edge_name: impl Into<String>, mesh_uri: Uri) -> Self {
        MeshAddress {
            edge_name: edge_name.into(),
            mesh_uri,
        }
    }

    pub fn part(&self, part_key: PartKey) -> PartAddress {
        PartAddress {
            edge_name: self.edge_name.clone(),
            mesh_uri: self.mesh_uri.clone(),
            part_key,
        }
    }
}

/// Address of a partition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartAddress {
    pub edge_name: String,
    pub mesh_uri: Uri,
    pub part_key: PartKey,
}

impl PartAddress {
    pub fn mesh(&self) -> MeshAddress {
        MeshAddress::new(self.edge_name.clone(), self.mesh_uri.clone())
    }

    pub fn host(&self, host_uri: Uri) -> HostAddress {
        HostAddress {
            edge_name: self.edge_name.clone(),
            mesh_uri: self.mesh_uri.clone(),
            part_key: self.part_key.clone(),
            host_uri,
        }
    }
}

/// Address of a host within a partition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddress {
    pub edge_name: String,
    pub mesh_uri: Uri,
    pub part_key: PartKey,
    pub host_uri: Uri,
}

impl HostAddress {
    pub fn part(&self) -> PartAddress {
        self.mesh().part(self.part_key.clone())
    }

    pub fn mesh(&self) -> MeshAddress {
        MeshAddress::new(self.edge_name.clone(), self.mesh_uri.clone())
    }

    pub fn node(&self, node_uri: Uri) -> NodeAddress {
        NodeAddress {
            edge_name: self.edge_name.clone(),
            mesh_uri: self.mesh_uri.clone(),
            part_key: self.part_key.clone(),
            host_uri: self.host_uri.clone(),
            node_uri,
        }
    }
}

/// Address of a node (agent container)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub edge_name: String,
    pub mesh_uri: Uri,
    pub part_key: PartKey,
    pub host_uri: Uri,
    pub node_uri: Uri,
}

impl NodeAddress {
    pub fn host(&self) -> HostAddress {
        self.mesh().part(self.part_key.clone()).host(self.host_uri.clone())
    }

    pub fn mesh(&self) -> MeshAddress {
        MeshAddress::new(self.edge_name.clone(), self.mesh_uri.clone())
    }

    pub fn lane(&self, lane_uri: Uri) -> LaneAddress {
        LaneAddress {
            edge_name: self.edge_name.clone(),
            mesh_uri: self.mesh_uri.clone(),
            part_key: self.part_key.clone(),
            host_uri: self.host_uri.clone(),
            node_uri: self.node_uri.clone(),
            lane_uri,
        }
    }
}

/// Address of a lane on a node
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneAddress {
    pub edge_name: String,
    pub mesh_uri: Uri,
    pub part_key: PartKey,
    pub host_uri: Uri,
    pub node_uri: Uri,
    pub lane_uri: Uri,
}

impl LaneAddress {
    pub fn node(&self) -> NodeAddress {
        self.mesh()
            .part(self.part_key.clone())
            .host(self.host_uri.clone())
            .node(self.node_uri.clone())
    }

    pub fn mesh(&self) -> MeshAddress {
        MeshAddress::new(self.edge_name.clone(), self.mesh_uri.clone())
    }
}

/// Identifier of a single link, unique per lane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LinkKey(pub u64);

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Address a link binding asks to be connected to
///
/// Unlike the tier addresses, a link address is only partially resolved
/// when the link is opened: the part key is derived by the mesh from the
/// node URI, and an empty host URI selects the partition's master host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkAddress {
    pub mesh_uri: Uri,
    pub host_uri: Uri,
    pub node_uri: Uri,
    pub lane_uri: Uri,
}

impl LinkAddress {
    pub fn new(node_uri: Uri, lane_uri: Uri) -> Self {
        LinkAddress {
            mesh_uri: Uri::empty(),
            host_uri: Uri::empty(),
            node_uri,
            lane_uri,
        }
    }

    pub fn with_host(mut self, host_uri: Uri) -> Self {
        self.host_uri = host_uri;
        self
    }

    pub fn with_mesh(mut self, mesh_uri: Uri) -> Self {
        self.mesh_uri = mesh_uri;
        self
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node_uri, self.lane_uri)
    }
}
