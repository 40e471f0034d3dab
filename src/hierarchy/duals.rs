use typed_index_collections::{TiSlice, TiVec};

use super::{Hierarchy, NodeIndex};

/// Dual state of a single node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeDual {
    /// Dual value of the node's mass balance row from the most recent solve
    pub potential: f64,
    /// Lower bound on the potentials of the node's descendants
    pub pi_min: f64,
    /// Upper bound on the potentials of the node's descendants
    pub pi_max: f64,
}

impl Default for NodeDual {
    fn default() -> Self {
        NodeDual {
            potential: 0.0,
            pi_min: f64::MAX,
            pi_max: f64::MIN,
        }
    }
}

impl NodeDual {
    /// Empties the bounds so that any widening replaces them
    pub fn reset_pi(&mut self) {
        self.pi_min = f64::MAX;
        self.pi_max = f64::MIN;
    }

    /// Collapses the bounds onto a single potential
    pub fn reset_pi_to(&mut self, pi: f64) {
        self.pi_min = pi;
        self.pi_max = pi;
    }

    pub fn widen(&mut self, pi_min: f64, pi_max: f64) {
        self.pi_min = self.pi_min.min(pi_min);
        self.pi_max = self.pi_max.max(pi_max);
    }
}

/// Per-node dual state for every scale of one hierarchy
#[derive(Debug, Clone)]
pub struct HierarchyDuals {
    levels: Vec<TiVec<NodeIndex, NodeDual>>,
}

impl HierarchyDuals {
    pub fn new(hierarchy: &Hierarchy) -> Self {
        HierarchyDuals {
            levels: hierarchy
                .levels()
                .map(|level| TiVec::from(vec![NodeDual::default(); level.len()]))
                .collect(),
        }
    }

    pub fn level(&self, scale: usize) -> &TiSlice<NodeIndex, NodeDual> {
        &self.levels[scale]
    }

    pub fn level_mut(&mut self, scale: usize) -> &mut TiSlice<NodeIndex, NodeDual> {
        &mut self.levels[scale]
    }

    pub fn potential(&self, scale: usize, index: NodeIndex) -> f64 {
        self.levels[scale][index].potential
    }

    /// Recomputes the pi bounds of every node above `scale` from the bounds at
    /// `scale`, which are left untouched. Afterwards each coarse node's bounds
    /// enclose the potentials of all its descendants at `scale`.
    pub fn propagate_bounds(&mut self, hierarchy: &Hierarchy, scale: usize) {
        for s in (0..scale).rev() {
            let (coarse, fine) = self.levels.split_at_mut(s + 1);
            let fine = &fine[0];
            for node in hierarchy.level(s).nodes().iter() {
                let dual = &mut coarse[s][node.index];
                dual.reset_pi();
                for &c in node.children.iter() {
                    dual.widen(fine[c].pi_min, fine[c].pi_max);
                }
            }
        }
    }
}

/// The dual side state of one multiscale solve: potentials and pi bounds for
/// both hierarchies, threaded through every strategy.
#[derive(Debug, Clone)]
pub struct Duals {
    pub source: HierarchyDuals,
    pub target: HierarchyDuals,
}

impl Duals {
    pub fn new(source: &Hierarchy, target: &Hierarchy) -> Self {
        Duals {
            source: HierarchyDuals::new(source),
            target: HierarchyDuals::new(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyBuilder;

    #[test]
    fn bounds_enclose_descendants() {
        let mut builder = HierarchyBuilder::new(1);
        let s0 = builder.add_level();
        let s1 = builder.add_level();
        let s2 = builder.add_level();
        let r = builder.add_node(s0, vec![0.0], 0.0, None).unwrap();
        let a = builder.add_node(s1, vec![-1.0], 0.0, Some(r)).unwrap();
        let b = builder.add_node(s1, vec![1.0], 0.0, Some(r)).unwrap();
        for (x, parent) in [(-1.5, a), (-0.5, a), (0.5, b), (1.5, b)] {
            builder.add_node(s2, vec![x], 1.0, Some(parent)).unwrap();
        }
        let h = builder.build().unwrap();

        let mut duals = HierarchyDuals::new(&h);
        for (i, pi) in [3.0, -2.0, 7.0, 0.5].into_iter().enumerate() {
            duals.level_mut(2)[NodeIndex::from(i)].reset_pi_to(pi);
        }
        duals.propagate_bounds(&h, 2);

        let root = duals.level(0)[NodeIndex::from(0)];
        assert_eq!((root.pi_min, root.pi_max), (-2.0, 7.0));
        let a = duals.level(1)[a];
        assert_eq!((a.pi_min, a.pi_max), (-2.0, 3.0));
        let b = duals.level(1)[b];
        assert_eq!((b.pi_min, b.pi_max), (0.5, 7.0));
    }
}
