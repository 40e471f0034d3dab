//! Primal network simplex for integer min-cost flow.
//!
//! The spanning tree is kept strongly feasible: the initial tree only uses
//! artificial arcs that point away from the root when they carry no flow, and
//! the leaving arc is the last blocking arc of the cycle when walking it in
//! flow direction from the apex. This excludes cycling on degenerate pivots.

use log::trace;

/// Marker for an uncapacitated arc
pub const INF: i64 = i64::MAX;

const NONE: usize = usize::MAX;

const STATE_UPPER: i8 = -1;
const STATE_TREE: i8 = 0;
const STATE_LOWER: i8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Optimal,
    /// Supplies cannot be routed within the capacities
    Infeasible,
    /// A negative cycle of uncapacitated arcs exists
    Unbounded,
    /// The pivot limit was hit before optimality was proven
    PivotLimit,
}

/// Where a nonbasic arc sits after a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcState {
    Lower,
    Tree,
    Upper,
}

#[derive(Debug, Clone)]
pub struct NetworkSimplex {
    n_nodes: usize,
    n_arcs: usize,
    supply: Vec<i64>,
    source: Vec<usize>,
    target: Vec<usize>,
    lower: Vec<i64>,
    upper: Vec<i64>,
    cap: Vec<i64>,
    cost: Vec<i64>,
    flow: Vec<i64>,
    state: Vec<i8>,
    // spanning tree, indexed by node, the root is node `n_nodes`
    parent: Vec<usize>,
    pred: Vec<usize>,
    pred_up: Vec<bool>,
    depth: Vec<usize>,
    pi: Vec<i64>,
    first_child: Vec<usize>,
    next_sibling: Vec<usize>,
    prev_sibling: Vec<usize>,
    pivots: usize,
}

impl NetworkSimplex {
    pub fn new(n_nodes: usize) -> Self {
        NetworkSimplex {
            n_nodes,
            n_arcs: 0,
            supply: vec![0; n_nodes],
            source: Vec::new(),
            target: Vec::new(),
            lower: Vec::new(),
            upper: Vec::new(),
            cap: Vec::new(),
            cost: Vec::new(),
            flow: Vec::new(),
            state: Vec::new(),
            parent: Vec::new(),
            pred: Vec::new(),
            pred_up: Vec::new(),
            depth: Vec::new(),
            pi: Vec::new(),
            first_child: Vec::new(),
            next_sibling: Vec::new(),
            prev_sibling: Vec::new(),
            pivots: 0,
        }
    }

    /// Adds an arc with flow bounds `lower..=upper` (`upper` may be [`INF`]) and
    /// returns its id
    pub fn add_arc(&mut self, from: usize, to: usize, lower: i64, upper: i64, cost: i64) -> usize {
        self.source.push(from);
        self.target.push(to);
        self.lower.push(lower);
        self.upper.push(upper);
        self.cost.push(cost);
        self.n_arcs += 1;
        self.n_arcs - 1
    }

    /// Sets the net outflow required at `node`
    pub fn set_supply(&mut self, node: usize, supply: i64) {
        self.supply[node] = supply;
    }

    pub fn flow(&self, arc: usize) -> i64 {
        self.flow[arc] + self.lower[arc]
    }

    /// Node potential with reduced costs `cost + pi(from) - pi(to)`
    pub fn potential(&self, node: usize) -> i64 {
        self.pi[node]
    }

    pub fn arc_state(&self, arc: usize) -> ArcState {
        match self.state[arc] {
            STATE_TREE => ArcState::Tree,
            STATE_UPPER => ArcState::Upper,
            _ => ArcState::Lower,
        }
    }

    pub fn pivots(&self) -> usize {
        self.pivots
    }

    pub fn run(&mut self) -> FlowStatus {
        let n = self.n_nodes;
        let m = self.n_arcs;
        let root = n;

        let mut supply = self.supply.clone();
        let mut cap = Vec::with_capacity(m + n);
        for e in 0..m {
            let l = self.lower[e];
            if l != 0 {
                supply[self.source[e]] -= l;
                supply[self.target[e]] += l;
            }
            let c = self.upper[e];
            if c != INF && c < l {
                return FlowStatus::Infeasible;
            }
            cap.push(if c == INF { INF } else { c - l });
        }
        if supply.iter().sum::<i64>() != 0 {
            return FlowStatus::Infeasible;
        }

        let max_cost = self.cost.iter().map(|c| c.abs()).max().unwrap_or(0);
        let art_cost = (max_cost + 1).saturating_mul(n as i64 + 1);

        self.source.truncate(m);
        self.target.truncate(m);
        self.cost.truncate(m);
        self.flow = vec![0; m + n];
        self.state = vec![STATE_LOWER; m + n];
        self.parent = vec![NONE; n + 1];
        self.pred = vec![NONE; n + 1];
        self.pred_up = vec![false; n + 1];
        self.depth = vec![0; n + 1];
        self.pi = vec![0; n + 1];
        self.first_child = vec![NONE; n + 1];
        self.next_sibling = vec![NONE; n + 1];
        self.prev_sibling = vec![NONE; n + 1];
        self.pivots = 0;

        for u in 0..n {
            let e = m + u;
            if supply[u] > 0 {
                self.source.push(u);
                self.target.push(root);
                self.flow[e] = supply[u];
                self.pred_up[u] = true;
                self.pi[u] = -art_cost;
            } else {
                self.source.push(root);
                self.target.push(u);
                self.flow[e] = -supply[u];
                self.pred_up[u] = false;
                self.pi[u] = art_cost;
            }
            cap.push(INF);
            self.cost.push(art_cost);
            self.state[e] = STATE_TREE;
            self.parent[u] = root;
            self.pred[u] = e;
            self.depth[u] = 1;
            self.add_child(root, u);
        }
        self.cap = cap;

        let total = m + n;
        let block = ((total as f64).sqrt() as usize).max(10);
        let limit = 100 * total + 100_000;
        let mut next_arc = 0;

        let status = loop {
            let entering = match self.find_entering(&mut next_arc, block) {
                Some(e) => e,
                None => break FlowStatus::Optimal,
            };
            if !self.pivot(entering) {
                break FlowStatus::Unbounded;
            }
            self.pivots += 1;
            if self.pivots >= limit {
                break FlowStatus::PivotLimit;
            }
        };

        let status = match status {
            FlowStatus::Optimal if (m..total).any(|e| self.flow[e] > 0) => FlowStatus::Infeasible,
            s => s,
        };

        // drop the artificial arcs but keep the tree arrays for the potentials
        self.cap.truncate(m);
        self.flow.truncate(m);
        self.state.truncate(m);
        self.source.truncate(m);
        self.target.truncate(m);
        self.cost.truncate(m);

        trace!(
            "network simplex on {} nodes and {} arcs: {:?} after {} pivots",
            n,
            m,
            status,
            self.pivots
        );
        status
    }

    fn reduced_cost(&self, e: usize) -> i64 {
        self.cost[e] + self.pi[self.source[e]] - self.pi[self.target[e]]
    }

    /// Block search pivot rule: the most violating arc of the first block that
    /// contains a violating arc
    fn find_entering(&self, next_arc: &mut usize, block: usize) -> Option<usize> {
        let total = self.state.len();
        let mut best = None;
        let mut min = 0;
        let mut count = block;
        for k in 0..total {
            let e = (*next_arc + k) % total;
            let c = self.state[e] as i64 * self.reduced_cost(e);
            if c < min {
                min = c;
                best = Some(e);
            }
            count -= 1;
            if count == 0 {
                if best.is_some() {
                    *next_arc = (e + 1) % total;
                    return best;
                }
                count = block;
            }
        }
        best
    }

    fn residual(&self, e: usize) -> i64 {
        if self.cap[e] == INF {
            INF
        } else {
            self.cap[e] - self.flow[e]
        }
    }

    fn join(&self, mut a: usize, mut b: usize) -> usize {
        while a != b {
            if self.depth[a] > self.depth[b] {
                a = self.parent[a];
            } else if self.depth[b] > self.depth[a] {
                b = self.parent[b];
            } else {
                a = self.parent[a];
                b = self.parent[b];
            }
        }
        a
    }

    /// Performs one pivot on `e_in`. Returns false if the cycle is unbounded.
    fn pivot(&mut self, e_in: usize) -> bool {
        let (first, second) = if self.state[e_in] == STATE_LOWER {
            (self.source[e_in], self.target[e_in])
        } else {
            (self.target[e_in], self.source[e_in])
        };
        let join = self.join(first, second);

        let mut delta = self.cap[e_in];
        let mut result = 0;
        let mut u_out = NONE;

        let mut u = first;
        while u != join {
            let e = self.pred[u];
            let d = if self.pred_up[u] { self.flow[e] } else { self.residual(e) };
            if d < delta {
                delta = d;
                u_out = u;
                result = 1;
            }
            u = self.parent[u];
        }
        let mut u = second;
        while u != join {
            let e = self.pred[u];
            let d = if self.pred_up[u] { self.residual(e) } else { self.flow[e] };
            if d <= delta {
                delta = d;
                u_out = u;
                result = 2;
            }
            u = self.parent[u];
        }

        if delta == INF {
            return false;
        }

        if delta > 0 {
            let val = self.state[e_in] as i64 * delta;
            self.flow[e_in] += val;
            let mut u = self.source[e_in];
            while u != join {
                let dir = if self.pred_up[u] { 1 } else { -1 };
                self.flow[self.pred[u]] -= dir * val;
                u = self.parent[u];
            }
            let mut u = self.target[e_in];
            while u != join {
                let dir = if self.pred_up[u] { 1 } else { -1 };
                self.flow[self.pred[u]] += dir * val;
                u = self.parent[u];
            }
        }

        if result == 0 {
            self.state[e_in] = -self.state[e_in];
            return true;
        }

        let e_out = self.pred[u_out];
        self.state[e_in] = STATE_TREE;
        self.state[e_out] = if self.flow[e_out] == 0 {
            STATE_LOWER
        } else {
            STATE_UPPER
        };

        let (u_in, v_in) = if result == 1 {
            (first, second)
        } else {
            (second, first)
        };

        // reverse the tree path u_in -> u_out and hang it below v_in
        let mut u = u_in;
        let mut new_parent = v_in;
        let mut new_pred = e_in;
        loop {
            let old_parent = self.parent[u];
            let old_pred = self.pred[u];
            self.remove_child(old_parent, u);
            self.parent[u] = new_parent;
            self.pred[u] = new_pred;
            self.pred_up[u] = self.source[new_pred] == u;
            self.add_child(new_parent, u);
            if u == u_out {
                break;
            }
            new_parent = u;
            new_pred = old_pred;
            u = old_parent;
        }

        let pi_in = if self.source[e_in] == u_in {
            self.pi[v_in] - self.cost[e_in]
        } else {
            self.pi[v_in] + self.cost[e_in]
        };
        let sigma = pi_in - self.pi[u_in];
        let mut stack = vec![u_in];
        while let Some(v) = stack.pop() {
            self.pi[v] += sigma;
            self.depth[v] = self.depth[self.parent[v]] + 1;
            let mut c = self.first_child[v];
            while c != NONE {
                stack.push(c);
                c = self.next_sibling[c];
            }
        }

        true
    }

    fn add_child(&mut self, p: usize, c: usize) {
        let head = self.first_child[p];
        self.next_sibling[c] = head;
        self.prev_sibling[c] = NONE;
        if head != NONE {
            self.prev_sibling[head] = c;
        }
        self.first_child[p] = c;
    }

    fn remove_child(&mut self, p: usize, c: usize) {
        let (prev, next) = (self.prev_sibling[c], self.next_sibling[c]);
        if prev != NONE {
            self.next_sibling[prev] = next;
        } else {
            self.first_child[p] = next;
        }
        if next != NONE {
            self.prev_sibling[next] = prev;
        }
        self.next_sibling[c] = NONE;
        self.prev_sibling[c] = NONE;
    }
}
