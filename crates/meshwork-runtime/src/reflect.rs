//! Reflection records and the meta node's lane names

use serde::{Deserialize, Serialize};

use meshwork_core::{LogLevel, PartKey, Uri};

use crate::part::{PartBinding, PartPredicate};

/// Node URI of the per-mesh reflection node
pub const META_MESH_NODE: &str = "meta:mesh";

/// Demand lane streaming one [`PartInfo`] per membership change
pub const PARTS_LANE: &str = "parts";

pub fn meta_mesh_node() -> Uri {
    Uri::parse(META_MESH_NODE)
}

/// Supply lane carrying log entries of `level`
pub fn log_lane(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "traceLog",
        LogLevel::Debug => "debugLog",
        LogLevel::Info => "infoLog",
        LogLevel::Warn => "warnLog",
        LogLevel::Error => "errorLog",
        LogLevel::Fail => "failLog",
    }
}

/// Snapshot of one part, as published on the `parts` lane
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartInfo {
    pub part_key: PartKey,
    pub predicate: PartPredicate,
    pub host_count: usize,
}

impl PartInfo {
    pub fn of(part: &dyn PartBinding) -> Self {
        PartInfo {
            part_key: part.part_key(),
            predicate: part.predicate(),
            host_count: part.hosts().len(),
        }
    }
}

/// Receives membership changes of a mesh
pub trait MembershipObserver: Send + Sync {
    fn did_open_part(&self, info: &PartInfo);
    fn did_close_part(&self, part_key: &PartKey);
}
