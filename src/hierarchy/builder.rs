use log::trace;
use ndarray::Array1;
use typed_index_collections::TiVec;

use super::{distance, Hierarchy, Node, NodeIndex};
use crate::error::{Result, TransportError};

/// Assembles a [`Hierarchy`] from levels produced by an external clustering.
///
/// Levels are added coarsest first. Every node below the root level names its
/// parent in the previous level; child lists, radii and local radii are derived
/// in [`HierarchyBuilder::build`].
#[derive(Debug, Clone)]
pub struct HierarchyBuilder {
    dimension: usize,
    levels: Vec<TiVec<NodeIndex, Node>>,
}

impl HierarchyBuilder {
    pub fn new(dimension: usize) -> Self {
        HierarchyBuilder {
            dimension,
            levels: Vec::new(),
        }
    }

    /// Appends an empty level below the current finest one and returns its scale
    pub fn add_level(&mut self) -> usize {
        self.levels.push(TiVec::new());
        self.levels.len() - 1
    }

    pub fn add_node(
        &mut self,
        scale: usize,
        center: Vec<f64>,
        mass: f64,
        parent: Option<NodeIndex>,
    ) -> Result<NodeIndex> {
        if center.len() != self.dimension {
            return Err(TransportError::DimensionMismatch {
                expected: self.dimension,
                found: center.len(),
            });
        }
        if !(mass >= 0.0) || !mass.is_finite() {
            return Err(TransportError::InvalidMass {
                index: self.levels.get(scale).map(|l| l.len()).unwrap_or(0),
                mass,
            });
        }
        let level = self
            .levels
            .get_mut(scale)
            .ok_or_else(|| TransportError::InvalidHierarchy(format!("no level {}", scale)))?;

        let index = NodeIndex::from(level.len());
        level.push(Node {
            index,
            scale,
            mass,
            center: Array1::from(center),
            radius: 0.0,
            local_radius: 0.0,
            parent,
            children: Vec::new(),
            points: Vec::new(),
        });
        Ok(index)
    }

    /// Overrides the ids of the input points a node stands for. Finest-level nodes
    /// without explicit points stand for the point with their own index.
    pub fn set_points(&mut self, scale: usize, index: NodeIndex, points: Vec<usize>) -> Result<()> {
        let node = self
            .levels
            .get_mut(scale)
            .and_then(|l| l.get_mut(index))
            .ok_or_else(|| TransportError::InvalidHierarchy(format!("no node {:?} at {}", index, scale)))?;
        node.points = points;
        Ok(())
    }

    /// Sets a lower bound for a node's radius, e.g. the spread of the points it aggregates
    pub fn set_radius(&mut self, scale: usize, index: NodeIndex, radius: f64) -> Result<()> {
        let node = self
            .levels
            .get_mut(scale)
            .and_then(|l| l.get_mut(index))
            .ok_or_else(|| TransportError::InvalidHierarchy(format!("no node {:?} at {}", index, scale)))?;
        node.radius = radius;
        Ok(())
    }

    pub fn build(self) -> Result<Hierarchy> {
        link(self.levels, self.dimension)
    }
}

/// Validates parent links, fills in child lists and computes radii bottom-up.
pub(super) fn link(mut levels: Vec<TiVec<NodeIndex, Node>>, dimension: usize) -> Result<Hierarchy> {
    if levels.is_empty() {
        return Err(TransportError::EmptyHierarchy);
    }
    if let Some(scale) = levels.iter().position(|l| l.is_empty()) {
        return Err(TransportError::EmptyLevel { scale });
    }

    for scale in 0..levels.len() {
        for node in levels[scale].iter_mut() {
            node.children.clear();
        }
    }

    for scale in 0..levels.len() {
        let (coarse, fine) = levels.split_at_mut(scale);
        for i in 0..fine[0].len() {
            let node = &fine[0][NodeIndex::from(i)];
            match (scale, node.parent) {
                (0, None) => {}
                (0, Some(_)) => {
                    return Err(TransportError::InvalidHierarchy(format!(
                        "root node {} has a parent",
                        i
                    )))
                }
                (_, None) => {
                    return Err(TransportError::InvalidHierarchy(format!(
                        "node {} at scale {} has no parent",
                        i, scale
                    )))
                }
                (_, Some(parent)) => {
                    let parent = coarse[scale - 1].get_mut(parent).ok_or_else(|| {
                        TransportError::InvalidHierarchy(format!(
                            "node {} at scale {} names missing parent {:?}",
                            i, scale, parent
                        ))
                    })?;
                    parent.children.push(NodeIndex::from(i));
                }
            }
        }
    }

    let finest = levels.len() - 1;
    for scale in 0..finest {
        if let Some(node) = levels[scale].iter().find(|n| n.children.is_empty()) {
            return Err(TransportError::InvalidHierarchy(format!(
                "node {:?} at scale {} has no children but is not at the finest scale",
                node.index, scale
            )));
        }
    }

    for node in levels[finest].iter_mut() {
        if node.points.is_empty() {
            node.points = vec![*node.index];
        }
    }

    for scale in (0..finest).rev() {
        let (coarse, fine) = levels.split_at_mut(scale + 1);
        let fine = &fine[0];
        for node in coarse[scale].iter_mut() {
            let mut radius = node.radius;
            let mut local_radius: f64 = 0.0;
            let mut points = Vec::new();
            for &c in node.children.iter() {
                let child = &fine[c];
                let d = distance(&node.center, &child.center);
                radius = radius.max(d + child.radius);
                local_radius = local_radius.max(d);
                points.extend_from_slice(&child.points);
            }
            node.radius = radius;
            node.local_radius = local_radius;
            if node.points.is_empty() {
                node.points = points;
            }
        }
    }

    trace!(
        "linked hierarchy with {} levels of sizes {:?}",
        levels.len(),
        levels.iter().map(|l| l.len()).collect::<Vec<_>>()
    );

    Ok(Hierarchy { levels, dimension })
}
