use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use itertools::iproduct;
use log::trace;

use crate::error::{Result, TransportError};
use crate::hierarchy::Node;
use crate::plan::TransportPlan;

/// A sparse coupling between two point sets: (source point id, target point id)
/// to transported mass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coupling {
    pub weights: BTreeMap<(usize, usize), f64>,
}

/// Point ids a node stands for. Nodes handed over without point ids stand for
/// their own index.
fn point_ids(node: &Node) -> Vec<usize> {
    if node.points.is_empty() {
        vec![*node.index]
    } else {
        node.points.clone()
    }
}

impl Coupling {
    /// The coupling induced by the arcs of `plan` with positive weight. The weight
    /// of an arc is split evenly over all pairs of points its nodes aggregate.
    pub fn from_plan(plan: &TransportPlan) -> Self {
        let mut coupling = Coupling::default();
        for path in plan.positive() {
            let from = point_ids(plan.source.node(path.from));
            let to = point_ids(plan.target.node(path.to));
            let w = path.w / (from.len() * to.len()) as f64;
            for (&i, &j) in iproduct!(from.iter(), to.iter()) {
                *coupling.weights.entry((i, j)).or_insert(0.0) += w;
            }
        }
        trace!("coupling with {} entries from {} arcs", coupling.len(), plan.n_paths());
        coupling
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total_mass(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Writes one `source, target, weight` line per entry
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        for (&(i, j), w) in self.weights.iter() {
            writeln!(writer, "{}, {}, {}", i, j, w)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads the format of [`Coupling::write`]. Blank lines are skipped.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut coupling = Coupling::default();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let malformed = || TransportError::MalformedCoupling {
                line: number + 1,
                content: line.clone(),
            };
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let (i, j, w) = match fields[..] {
                [i, j, w] => (
                    i.parse::<usize>().map_err(|_| malformed())?,
                    j.parse::<usize>().map_err(|_| malformed())?,
                    w.parse::<f64>().map_err(|_| malformed())?,
                ),
                _ => return Err(malformed()),
            };
            *coupling.weights.entry((i, j)).or_insert(0.0) += w;
        }
        Ok(coupling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, NodeIndex};
    use ndarray::array;

    #[test]
    fn coarse_arcs_spread_over_points() {
        let a = Hierarchy::from_points(&array![[0.0], [1.0]], None, None).unwrap();
        let b = Hierarchy::from_points(&array![[0.0], [1.0], [2.0]], None, None).unwrap();
        let mut plan = TransportPlan::new(a.root(), b.root());
        let root = NodeIndex::from(0);
        plan.add(root, root, 2.0);
        plan.path_mut(root, root).unwrap().w = 1.2;

        let coupling = Coupling::from_plan(&plan);
        assert_eq!(coupling.len(), 6);
        assert!((coupling.weights[&(1, 2)] - 0.2).abs() < 1e-12);
        assert!((coupling.total_mass() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn written_couplings_read_back() {
        let mut coupling = Coupling::default();
        coupling.weights.insert((0, 3), 0.25);
        coupling.weights.insert((2, 1), 0.75);
        let mut out = Vec::new();
        coupling.write(&mut out).unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), "0, 3, 0.25\n2, 1, 0.75\n");
        assert_eq!(Coupling::read(&out[..]).unwrap(), coupling);
    }

    #[test]
    fn malformed_lines_are_reported() {
        let input = "0, 1, 0.5\n\n3, x, 1\n";
        match Coupling::read(input.as_bytes()) {
            Err(TransportError::MalformedCoupling { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a malformed line error, got {:?}", other),
        }
    }
}
