//! Flows: unsplittable units of traffic traversing an overlay.

use rustc_hash::FxHashMap;

use crate::overlay::{EdgeKey, InstanceKey};
use crate::template::ComponentId;

/// An unsplittable flow with a unique ID and the data rate it leaves its source with.
///
/// A flow is owned by the overlay it traverses and referenced by the edges it is mapped to. Its
/// rate may differ per edge, since components scale traffic up or down.
#[derive(Debug, Clone)]
pub struct Flow {
    pub(crate) id: String,
    pub(crate) src_dr: f64,
    /// The flow's data rate along each edge it traverses.
    pub(crate) dr: FxHashMap<EdgeKey, f64>,
    /// The stateful instance the flow passed per component, fixed on the forward traversal and
    /// honored on the way back.
    pub(crate) passed_stateful: FxHashMap<ComponentId, InstanceKey>,
}

impl Flow {
    pub(crate) fn new(id: impl Into<String>, src_dr: f64) -> Self {
        Self {
            id: id.into(),
            src_dr,
            dr: FxHashMap::default(),
            passed_stateful: FxHashMap::default(),
        }
    }

    /// The flow's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The data rate the flow leaves its source with.
    pub fn src_dr(&self) -> f64 {
        self.src_dr
    }

    /// The flow's data rate on the given edge, if it traverses it.
    pub fn dr_on(&self, edge: EdgeKey) -> Option<f64> {
        self.dr.get(&edge).copied()
    }

    /// An iterator over the edges the flow traverses and its rate on each.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, f64)> + '_ {
        self.dr.iter().map(|(&e, &dr)| (e, dr))
    }
}
