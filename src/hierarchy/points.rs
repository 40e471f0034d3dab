use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use float_ord::FloatOrd;
use itertools::Itertools;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

use super::{builder::link, Hierarchy, Node, NodeIndex};
use crate::error::{Result, TransportError};

impl Hierarchy {
    /// Builds a bisection tree over a weighted point set. Every level splits each
    /// cluster with more than one point at the median of its widest coordinate;
    /// single-point clusters are carried down unchanged so that all leaves sit at
    /// the finest scale. With `max_scales` the tree is cut off after that many
    /// levels and the remaining clusters become leaves.
    ///
    /// Points are rows of `points`. Masses default to one per point.
    pub fn from_points(
        points: &Array2<f64>,
        masses: Option<&[f64]>,
        max_scales: Option<usize>,
    ) -> Result<Hierarchy> {
        let n = points.nrows();
        if n == 0 {
            return Err(TransportError::EmptyLevel { scale: 0 });
        }
        let masses = match masses {
            Some(m) if m.len() != n => {
                return Err(TransportError::MassCountMismatch {
                    points: n,
                    masses: m.len(),
                })
            }
            Some(m) => m.to_vec(),
            None => vec![1.0; n],
        };
        if let Some((index, &mass)) = masses
            .iter()
            .find_position(|m| !(**m >= 0.0) || !m.is_finite())
        {
            return Err(TransportError::InvalidMass { index, mass });
        }

        let max_scales = max_scales.unwrap_or(usize::MAX).max(1);
        let mut clusters: Vec<(Vec<usize>, Option<NodeIndex>)> = vec![((0..n).collect(), None)];
        let mut levels: Vec<TiVec<NodeIndex, Node>> = Vec::new();

        loop {
            let scale = levels.len();
            let level: TiVec<NodeIndex, Node> = clusters
                .iter()
                .enumerate()
                .map(|(i, (members, parent))| cluster_node(points, &masses, members, NodeIndex::from(i), scale, *parent))
                .collect::<Vec<_>>()
                .into();
            levels.push(level);

            if clusters.iter().all(|(m, _)| m.len() == 1) || levels.len() == max_scales {
                break;
            }

            clusters = clusters
                .into_iter()
                .enumerate()
                .flat_map(|(i, (members, _))| {
                    let parent = Some(NodeIndex::from(i));
                    if members.len() > 1 {
                        let (left, right) = bisect(points, members);
                        vec![(left, parent), (right, parent)]
                    } else {
                        vec![(members, parent)]
                    }
                })
                .collect();
        }

        debug!(
            "built bisection hierarchy over {} points with {} levels",
            n,
            levels.len()
        );

        link(levels, points.ncols())
    }
}

/// A weighted point set, stored as `{"points": [[x, y, ..], ..], "masses": [..]}`.
/// Without masses every point weighs one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub points: Vec<Vec<f64>>,
    #[serde(default)]
    pub masses: Option<Vec<f64>>,
}

impl PointSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// The points as rows of a matrix
    pub fn to_array(&self) -> Result<Array2<f64>> {
        let dimension = self.points.first().map(Vec::len).ok_or(TransportError::EmptyLevel { scale: 0 })?;
        if let Some(row) = self.points.iter().find(|row| row.len() != dimension) {
            return Err(TransportError::DimensionMismatch {
                expected: dimension,
                found: row.len(),
            });
        }
        let flat: Vec<f64> = self.points.iter().flatten().copied().collect();
        Array2::from_shape_vec((self.points.len(), dimension), flat)
            .map_err(|e| TransportError::InvalidHierarchy(e.to_string()))
    }

    /// The bisection hierarchy over the points, see [`Hierarchy::from_points`]
    pub fn hierarchy(&self, max_scales: Option<usize>) -> Result<Hierarchy> {
        Hierarchy::from_points(&self.to_array()?, self.masses.as_deref(), max_scales)
    }
}

fn cluster_node(
    points: &Array2<f64>,
    masses: &[f64],
    members: &[usize],
    index: NodeIndex,
    scale: usize,
    parent: Option<NodeIndex>,
) -> Node {
    let mass: f64 = members.iter().map(|&i| masses[i]).sum();
    let mut center: Array1<f64> = Array1::zeros(points.ncols());
    for &i in members {
        let w = if mass > 0.0 {
            masses[i] / mass
        } else {
            1.0 / members.len() as f64
        };
        center.scaled_add(w, &points.row(i));
    }
    let radius = members
        .iter()
        .map(|&i| point_distance(&center.view(), &points.row(i)))
        .fold(0.0, f64::max);

    Node {
        index,
        scale,
        mass,
        center,
        radius,
        local_radius: 0.0,
        parent,
        children: Vec::new(),
        points: members.to_vec(),
    }
}

fn point_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Splits a cluster at the median of its widest coordinate
fn bisect(points: &Array2<f64>, mut members: Vec<usize>) -> (Vec<usize>, Vec<usize>) {
    let dim = (0..points.ncols())
        .max_by_key(|&d| {
            let (lo, hi) = members
                .iter()
                .map(|&i| points[[i, d]])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
            FloatOrd(hi - lo)
        })
        .unwrap_or(0);

    members.sort_by_key(|&i| (FloatOrd(points[[i, dim]]), i));
    let right = members.split_off(members.len() / 2);
    (members, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn every_point_ends_in_its_own_leaf() {
        let points = array![[0.0, 0.0], [1.0, 0.0], [0.0, 3.0], [1.0, 3.0], [5.0, 5.0]];
        let h = Hierarchy::from_points(&points, None, None).unwrap();
        let finest = h.finest();
        assert_eq!(finest.len(), 5);
        let mut ids: Vec<_> = finest.nodes().iter().flat_map(|n| n.points.clone()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(h.root().len(), 1);
        assert_eq!(h.root().node(NodeIndex::from(0)).mass, 5.0);
    }

    #[test]
    fn radius_bounds_descendants() {
        let points = array![[0.0], [0.1], [0.7], [2.0], [2.2], [3.0], [9.0]];
        let h = Hierarchy::from_points(&points, None, None).unwrap();
        for level in h.levels() {
            for node in level.nodes().iter() {
                for &p in node.points.iter() {
                    let d = (node.center[0] - points[[p, 0]]).abs();
                    assert!(d <= node.radius + 1e-12);
                }
            }
        }
    }

    #[test]
    fn point_sets_parse_and_validate() {
        let set: PointSet = serde_json::from_str(r#"{"points": [[0.0, 1.0], [2.0, 3.0]]}"#).unwrap();
        assert_eq!(set.masses, None);
        assert_eq!(set.to_array().unwrap(), array![[0.0, 1.0], [2.0, 3.0]]);

        let ragged = PointSet {
            points: vec![vec![0.0, 1.0], vec![2.0]],
            masses: None,
        };
        assert!(matches!(
            ragged.to_array(),
            Err(TransportError::DimensionMismatch { expected: 2, found: 1 })
        ));
        assert!(PointSet::default().hierarchy(None).is_err());
    }

    #[test]
    fn max_scales_cuts_the_tree() {
        let points = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0]];
        let h = Hierarchy::from_points(&points, None, Some(2)).unwrap();
        assert_eq!(h.n_scales(), 2);
        assert_eq!(h.finest().len(), 2);
        assert_eq!(h.finest().node(NodeIndex::from(0)).points.len(), 4);
    }

    #[test]
    fn mass_count_must_match() {
        let points = array![[0.0], [1.0]];
        assert!(matches!(
            Hierarchy::from_points(&points, Some(&[1.0]), None),
            Err(TransportError::MassCountMismatch { points: 2, masses: 1 })
        ));
    }
}
