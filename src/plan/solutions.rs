use super::TransportPlan;

/// A primary plan together with alternative plans over the same levels
#[derive(Debug, Clone)]
pub struct TransportPlanSolutions<'h> {
    pub primary: TransportPlan<'h>,
    pub alternatives: Vec<TransportPlan<'h>>,
}

impl<'h> TransportPlanSolutions<'h> {
    pub fn new(primary: TransportPlan<'h>) -> Self {
        TransportPlanSolutions {
            primary,
            alternatives: Vec::new(),
        }
    }

    pub fn add_alternative(&mut self, plan: TransportPlan<'h>) {
        self.alternatives.push(plan);
    }

    /// A copy of the primary plan extended by every arc of the alternatives.
    /// Arcs present in several plans keep their largest weight.
    pub fn combined_paths(&self) -> TransportPlan<'h> {
        let mut combined = self.primary.clone();
        for alternative in self.alternatives.iter() {
            for path in alternative.iter() {
                combined.add_path(*path);
            }
        }
        combined
    }

    pub fn into_primary(self) -> TransportPlan<'h> {
        self.primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{HierarchyBuilder, NodeIndex};
    use crate::plan::Path;

    #[test]
    fn combined_paths_union_alternatives() {
        let mut builder = HierarchyBuilder::new(1);
        let scale = builder.add_level();
        for x in [0.0, 1.0, 2.0] {
            builder.add_node(scale, vec![x], 1.0, None).unwrap();
        }
        let h = builder.build().unwrap();
        let level = h.root();
        let (a, b, c) = (NodeIndex::from(0), NodeIndex::from(1), NodeIndex::from(2));

        let mut primary = TransportPlan::new(level, level);
        let mut p = Path::new(a, a, 0.0);
        p.w = 1.0;
        primary.add_path(p);

        let mut alternative = TransportPlan::new(level, level);
        let mut q = Path::new(a, a, 0.0);
        q.w = 2.0;
        alternative.add_path(q);
        alternative.add_path(Path::new(b, c, 1.0));

        let mut solutions = TransportPlanSolutions::new(primary);
        solutions.add_alternative(alternative);
        let combined = solutions.combined_paths();

        assert_eq!(combined.n_paths(), 2);
        assert_eq!(combined.path(a, a).unwrap().w, 2.0);
        assert!(combined.has_path(b, c));
        assert_eq!(solutions.primary.n_paths(), 1);
    }
}
