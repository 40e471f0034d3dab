pub mod builder;
pub mod duals;
pub mod points;

pub use builder::HierarchyBuilder;
pub use duals::{Duals, HierarchyDuals, NodeDual};
pub use points::PointSet;

use derive_more::{Deref, From, Into};
use log::trace;
use ndarray::Array1;
use typed_index_collections::{TiSlice, TiVec};

use crate::error::{Result, TransportError};

/// Position of a node within its level
#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct NodeIndex(usize);

#[derive(Debug, Clone)]
pub struct Node {
    /// The node's id, unique within its level
    pub index: NodeIndex,
    /// Depth in the hierarchy, 0 is the root level
    pub scale: usize,
    /// Mass, rewritten bottom-up by normalization
    pub mass: f64,
    pub center: Array1<f64>,
    /// Radius of a ball around `center` containing every descendant
    pub radius: f64,
    /// Distance from `center` to the farthest child center
    pub local_radius: f64,
    pub parent: Option<NodeIndex>,
    /// Children at `scale + 1`, empty at the finest level
    pub children: Vec<NodeIndex>,
    /// Ids of the input points aggregated by this node
    pub points: Vec<usize>,
}

impl Node {
    /// Euclidean distance between the node centers
    pub fn distance(&self, other: &Node) -> f64 {
        distance(&self.center, &other.center)
    }

    /// The cost of moving one unit of mass from this node to `other`, i.e. distance^p
    pub fn transport_cost(&self, other: &Node, p: f64) -> f64 {
        let d = self.distance(other);
        if p == 1.0 {
            d
        } else if p == 2.0 {
            d * d
        } else {
            d.powf(p)
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub(crate) fn distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// A multiresolution tree over a point set, stored as one node arena per scale,
/// coarsest first.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    levels: Vec<TiVec<NodeIndex, Node>>,
    dimension: usize,
}

impl Hierarchy {
    pub fn n_scales(&self) -> usize {
        self.levels.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// A view of the level at `scale`. Panics if the scale does not exist.
    pub fn level(&self, scale: usize) -> Level<'_> {
        assert!(scale < self.levels.len(), "no level at scale {}", scale);
        Level {
            hierarchy: self,
            scale,
        }
    }

    pub fn root(&self) -> Level<'_> {
        self.level(0)
    }

    pub fn finest(&self) -> Level<'_> {
        self.level(self.levels.len() - 1)
    }

    pub fn levels(&self) -> impl Iterator<Item = Level<'_>> + '_ {
        (0..self.levels.len()).map(move |scale| self.level(scale))
    }

    pub fn node(&self, scale: usize, index: NodeIndex) -> &Node {
        &self.levels[scale][index]
    }

    /// Total mass of the coarsest level
    pub fn total_mass(&self) -> f64 {
        self.levels
            .first()
            .map(|level| level.iter().map(|n| n.mass).sum())
            .unwrap_or(0.0)
    }

    /// Checks that the hierarchy can be transported: every level holds nodes and
    /// the finest level carries positive mass.
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(TransportError::EmptyHierarchy);
        }
        if let Some(scale) = self.levels.iter().position(|l| l.is_empty()) {
            return Err(TransportError::EmptyLevel { scale });
        }
        let mass: f64 = self.finest().nodes().iter().map(|n| n.mass).sum();
        if !(mass > 0.0) || !mass.is_finite() {
            return Err(TransportError::ZeroMass(mass));
        }
        Ok(())
    }

    /// Recomputes every internal node's mass as the sum of its children's masses,
    /// bottom-up. Leaves keep their mass. With `scale_mass` every mass is divided by
    /// the total so that each level sums to one. Returns the total before scaling.
    pub fn normalize(&mut self, scale_mass: bool) -> Result<f64> {
        self.validate()?;

        for scale in (0..self.levels.len() - 1).rev() {
            let (coarse, fine) = self.levels.split_at_mut(scale + 1);
            let fine = &fine[0];
            for node in coarse[scale].iter_mut() {
                node.mass = node.children.iter().map(|&c| fine[c].mass).sum();
            }
        }

        let total = self.total_mass();
        trace!("normalized hierarchy, total mass {}", total);
        if !(total > 0.0) {
            return Err(TransportError::ZeroMass(total));
        }

        if scale_mass {
            for level in self.levels.iter_mut() {
                for node in level.iter_mut() {
                    node.mass /= total;
                }
            }
        }

        Ok(total)
    }
}

/// All nodes at one scale of one hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct Level<'h> {
    hierarchy: &'h Hierarchy,
    scale: usize,
}

impl<'h> Level<'h> {
    pub fn scale(&self) -> usize {
        self.scale
    }

    pub fn hierarchy(&self) -> &'h Hierarchy {
        self.hierarchy
    }

    pub fn nodes(&self) -> &'h TiSlice<NodeIndex, Node> {
        &self.hierarchy.levels[self.scale]
    }

    pub fn node(&self, index: NodeIndex) -> &'h Node {
        &self.hierarchy.levels[self.scale][index]
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + Clone {
        (0..self.len()).map(NodeIndex::from)
    }

    /// The next coarser level, `None` at the root
    pub fn parent(&self) -> Option<Level<'h>> {
        match self.scale {
            0 => None,
            s => Some(self.hierarchy.level(s - 1)),
        }
    }

    /// The next finer level, `None` at the finest scale
    pub fn child(&self) -> Option<Level<'h>> {
        if self.scale + 1 < self.hierarchy.n_scales() {
            Some(self.hierarchy.level(self.scale + 1))
        } else {
            None
        }
    }

    pub fn root(&self) -> Level<'h> {
        self.hierarchy.root()
    }

    pub fn is_finest(&self) -> bool {
        self.scale + 1 == self.hierarchy.n_scales()
    }

    pub fn total_mass(&self) -> f64 {
        self.nodes().iter().map(|n| n.mass).sum()
    }

    pub fn maximal_radius(&self) -> f64 {
        self.nodes().iter().map(|n| n.radius).fold(0.0, f64::max)
    }

    pub fn mean_local_radius(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.indices().map(|i| self.local_node_radius(i)).sum::<f64>() / self.len() as f64
    }

    /// The local radius of the node's parent, or the node's own when it is a root.
    pub fn local_node_radius(&self, index: NodeIndex) -> f64 {
        let node = self.node(index);
        match (node.parent, self.parent()) {
            (Some(parent), Some(level)) => level.node(parent).local_radius,
            _ => node.local_radius,
        }
    }

    /// All nodes of this level whose center lies within `eps` of the center of `index`.
    pub fn neighborhood(&self, index: NodeIndex, eps: f64) -> Vec<NodeIndex> {
        self.ball(&self.node(index).center, eps)
    }

    /// All nodes of this level whose center lies within `eps` of `center`.
    /// Subtrees are pruned from the root down using the node radii.
    pub fn ball(&self, center: &Array1<f64>, eps: f64) -> Vec<NodeIndex> {
        let mut frontier: Vec<NodeIndex> = self
            .root()
            .nodes()
            .iter()
            .filter(|n| distance(center, &n.center) - n.radius <= eps)
            .map(|n| n.index)
            .collect();

        for scale in 1..=self.scale {
            let level = &self.hierarchy.levels[scale];
            frontier = frontier
                .iter()
                .flat_map(|&i| self.hierarchy.levels[scale - 1][i].children.iter())
                .filter(|&&c| distance(center, &level[c].center) - level[c].radius <= eps)
                .copied()
                .collect();
        }

        frontier.retain(|&i| distance(center, &self.node(i).center) <= eps);
        frontier.sort_unstable();
        frontier
    }

    /// The nodes `index` expands into when moving from this level to `next`: its
    /// children, or the node itself when the hierarchy is pinned at this level.
    pub fn successors(&self, index: NodeIndex, next: &Level<'h>) -> Vec<NodeIndex> {
        if next.scale == self.scale || self.node(index).is_leaf() {
            vec![index]
        } else {
            self.node(index).children.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn line(positions: &[f64]) -> Hierarchy {
        let mut builder = HierarchyBuilder::new(1);
        let root = builder.add_level();
        let leaves = builder.add_level();
        let center = positions.iter().sum::<f64>() / positions.len() as f64;
        let r = builder.add_node(root, vec![center], 0.0, None).unwrap();
        for &x in positions {
            builder.add_node(leaves, vec![x], 1.0, Some(r)).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn normalization_sums_children() {
        let mut h = line(&[0.0, 1.0, 2.0, 3.0]);
        let total = h.normalize(false).unwrap();
        assert_eq!(total, 4.0);
        assert_eq!(h.root().node(NodeIndex(0)).mass, 4.0);

        h.normalize(true).unwrap();
        assert!((h.root().total_mass() - 1.0).abs() < 1e-12);
        assert!((h.finest().total_mass() - 1.0).abs() < 1e-12);
        for leaf in h.finest().nodes().iter() {
            assert!((leaf.mass - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn radii_cover_children() {
        let h = line(&[0.0, 1.0, 2.0, 3.0]);
        let root = h.root().node(NodeIndex(0));
        assert_eq!(root.center[0], 1.5);
        assert!((root.radius - 1.5).abs() < 1e-12);
        assert!((root.local_radius - 1.5).abs() < 1e-12);
        assert_eq!(h.finest().local_node_radius(NodeIndex(2)), root.local_radius);
    }

    #[test]
    fn neighborhood_matches_brute_force() {
        let h = line(&[0.0, 0.4, 1.0, 2.5, 2.6]);
        let level = h.finest();
        for i in level.indices() {
            for eps in [0.0, 0.5, 1.0, 3.0] {
                let expected: Vec<_> = level
                    .indices()
                    .filter(|&j| level.node(i).distance(level.node(j)) <= eps)
                    .collect();
                assert_eq!(level.neighborhood(i, eps), expected);
            }
        }
    }

    #[test]
    fn zero_mass_is_rejected() {
        let mut builder = HierarchyBuilder::new(1);
        let scale = builder.add_level();
        builder.add_node(scale, vec![0.0], 0.0, None).unwrap();
        let mut h = builder.build().unwrap();
        assert!(matches!(h.normalize(true), Err(TransportError::ZeroMass(_))));
    }

    #[test]
    fn pinned_level_expands_to_itself() {
        let h = line(&[0.0, 1.0]);
        let leaves = h.finest();
        assert_eq!(leaves.successors(NodeIndex(1), &leaves), vec![NodeIndex(1)]);
        let root = h.root();
        assert_eq!(root.successors(NodeIndex(0), &leaves), vec![NodeIndex(0), NodeIndex(1)]);
    }
}
