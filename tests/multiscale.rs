use std::collections::BTreeSet;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use multiscale_transport::hierarchy::{HierarchyBuilder, NodeIndex};
use multiscale_transport::lp::DenseTransportLp;
use multiscale_transport::{
    Coupling, Hierarchy, Level, MultiscaleTransport, TransportConfig, TransportPlan,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A root and one unit mass leaf per position
fn line(positions: &[f64]) -> Hierarchy {
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

fn random_points(rng: &mut StdRng, n: usize, dimension: usize) -> (Array2<f64>, Vec<f64>) {
    let points = Array2::from_shape_fn((n, dimension), |_| rng.gen_range(0.0..10.0));
    let masses = (0..n).map(|_| rng.gen_range(0.2..3.0)).collect();
    (points, masses)
}

/// Optimal cost between two levels by a single LP over all pairs
fn dense_optimum(source: Level, target: Level, p: f64) -> f64 {
    let cost = Array2::from_shape_fn((source.len(), target.len()), |(i, j)| {
        source
            .node(NodeIndex::from(i))
            .transport_cost(target.node(NodeIndex::from(j)), p)
    });
    let from: Vec<f64> = source.nodes().iter().map(|n| n.mass).collect();
    let to: Vec<f64> = target.nodes().iter().map(|n| n.mass).collect();
    let solution = DenseTransportLp::default().solve(&cost, &from, &to).unwrap();
    assert!(solution.optimal);
    solution.objective.powf(1.0 / p)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

#[test]
fn four_leaves_match_closest_pairs() {
    init();
    let mut a = line(&[0.0, 1.0, 2.0, 3.0]);
    let mut b = line(&[2.1, 0.2, 3.4, 1.3]);
    let config = TransportConfig::from_json(r#"{ "options": { "p": 2.0, "scale_mass": false } }"#).unwrap();
    let mut transport = config.build().unwrap();
    let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();

    assert_eq!(plans.len(), 2);
    let finest = &plans[1];
    let used: BTreeSet<(usize, usize)> = finest.positive().map(|p| (*p.from, *p.to)).collect();
    assert_eq!(used, BTreeSet::from([(0, 1), (1, 3), (2, 0), (3, 2)]));
    for path in finest.iter() {
        assert!(path.w.abs() < 1e-9 || (path.w - 1.0).abs() < 1e-9);
    }
    let expected = (0.04_f64 + 0.09 + 0.01 + 0.16).sqrt();
    assert!(close(finest.cost, expected));
}

#[test]
fn normalization_conserves_mass_at_every_node() {
    let mut rng = StdRng::seed_from_u64(1);
    for scale_mass in [false, true] {
        let (points, masses) = random_points(&mut rng, 37, 3);
        let mut h = Hierarchy::from_points(&points, Some(&masses), None).unwrap();
        h.normalize(scale_mass).unwrap();
        for level in h.levels().filter(|l| !l.is_finest()) {
            let next = level.child().unwrap();
            for node in level.nodes().iter() {
                let children: f64 = node.children.iter().map(|&c| next.node(c).mass).sum();
                assert!((children - node.mass).abs() < 1e-9);
            }
        }
        if scale_mass {
            assert!((h.root().total_mass() - 1.0).abs() < 1e-12);
        }
    }
}

#[test]
fn balanced_plans_respect_node_masses() {
    init();
    let mut rng = StdRng::seed_from_u64(2);
    let (ps, ms) = random_points(&mut rng, 40, 2);
    let (pt, mt) = random_points(&mut rng, 33, 2);
    let mut a = Hierarchy::from_points(&ps, Some(&ms), None).unwrap();
    let mut b = Hierarchy::from_points(&pt, Some(&mt), None).unwrap();
    let config = TransportConfig::from_json(
        r#"{
            "propagation": { "strategy": "neighborhood", "expansion_factor": 1.0 },
            "neighborhoods": [{ "strategy": "expand" }, { "strategy": "refine", "iterations": 2 }]
        }"#,
    )
    .unwrap();
    let mut transport = config.build().unwrap();
    let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();

    for plan in plans.iter() {
        assert!(plan.status.is_lp());
        for node in plan.source.nodes().iter() {
            assert!((plan.out_mass(node.index) - node.mass).abs() < 1e-6);
        }
        for node in plan.target.nodes().iter() {
            assert!((plan.in_mass(node.index) - node.mass).abs() < 1e-6);
        }
    }
}

#[test]
fn coarse_optimum_bounds_the_aggregated_fine_plan() {
    init();
    let mut rng = StdRng::seed_from_u64(3);
    let (ps, ms) = random_points(&mut rng, 16, 2);
    let (pt, mt) = random_points(&mut rng, 16, 2);
    let mut a = Hierarchy::from_points(&ps, Some(&ms), None).unwrap();
    let mut b = Hierarchy::from_points(&pt, Some(&mt), None).unwrap();
    let config = TransportConfig::from_json(
        r#"{ "neighborhoods": [{ "strategy": "potential", "iterations": 30 }] }"#,
    )
    .unwrap();
    let mut transport = config.build().unwrap();
    let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();

    let finest: &TransportPlan = plans.last().unwrap();
    let aggregated = finest.multiscale_cost(2.0);
    let (mut source, mut target) = (finest.source, finest.target);
    for &restricted in aggregated.iter() {
        let optimum = dense_optimum(source, target, 2.0);
        assert!(optimum <= restricted + 1e-6 * restricted.max(1.0));
        match (source.parent(), target.parent()) {
            (Some(s), Some(t)) => {
                source = s;
                target = t;
            }
            _ => break,
        }
    }
}

#[test]
fn potential_refinement_reaches_the_brute_force_optimum() {
    init();
    let mut rng = StdRng::seed_from_u64(4);
    for (n, m) in [(12, 20), (50, 43), (31, 31)] {
        let (ps, ms) = random_points(&mut rng, n, 2);
        let (pt, mt) = random_points(&mut rng, m, 2);
        let mut a = Hierarchy::from_points(&ps, Some(&ms), None).unwrap();
        let mut b = Hierarchy::from_points(&pt, Some(&mt), None).unwrap();
        let config = TransportConfig::from_json(
            r#"{ "neighborhoods": [{ "strategy": "potential", "iterations": 50 }] }"#,
        )
        .unwrap();
        let mut transport = config.build().unwrap();
        let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();

        for plan in plans.iter().skip(1) {
            let optimum = dense_optimum(plan.source, plan.target, 2.0);
            assert!(close(plan.cost, optimum), "{} vs optimum {}", plan.cost, optimum);
        }
    }
}

#[test]
fn sinkhorn_support_matches_the_lp() {
    init();
    let points = Array2::from_shape_vec((4, 1), vec![0.0, 10.0, 20.0, 30.0]).unwrap();
    let shifted = &points + 1.0;
    let masses = [0.1, 0.4, 0.3, 0.2];
    let support = |config: &str| -> BTreeSet<(usize, usize)> {
        let config = TransportConfig::from_json(config).unwrap();
        let mut a = Hierarchy::from_points(&points, Some(&masses), None).unwrap();
        let mut b = Hierarchy::from_points(&shifted, Some(&masses), None).unwrap();
        let mut transport = config.build().unwrap();
        let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();
        let coupling = Coupling::from_plan(plans.last().unwrap());
        coupling
            .weights
            .iter()
            .filter(|(_, w)| **w > 1e-6)
            .map(|(&arc, _)| arc)
            .collect()
    };

    let exact = support("{}");
    let entropic = support(
        r#"{ "driver": "sinkhorn", "sinkhorn": { "lambda": 5.0, "tolerance": 1e-12, "iterations": 5000 } }"#,
    );
    assert_eq!(exact, BTreeSet::from([(0, 0), (1, 1), (2, 2), (3, 3)]));
    assert_eq!(entropic, exact);
}
