// Comparison graph: who has raced whom, how often, and where the holes are.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::config::GraphConfig;
use crate::race::AthleteId;
use crate::rating::extract::{BoatWeighting, PairwiseOutcome};

// ---------------------------------------------------------------------------
// Union-find
// ---------------------------------------------------------------------------

/// Disjoint sets over `0..n` with path halving and union by size.
#[derive(Debug, Clone)]
pub(crate) struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub(crate) fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub(crate) fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }

    /// Groups of indices, each sorted, ordered by their smallest member.
    pub(crate) fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

/// Fraction of node pairs joined by some path, given component sizes.
/// A graph with fewer than two nodes is fully connected.
pub fn connectivity_from_sizes(sizes: &[usize]) -> f64 {
    let n: usize = sizes.iter().sum();
    if n < 2 {
        return 1.0;
    }
    let total = (n * (n - 1) / 2) as f64;
    let reachable: usize = sizes.iter().map(|&s| s * s.saturating_sub(1) / 2).sum();
    reachable as f64 / total
}

// ---------------------------------------------------------------------------
// Graph types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub athlete_id: AthleteId,
    /// Pairwise outcomes this athlete took part in.
    pub comparisons: usize,
    /// Distinct opponents compared against.
    pub opponents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub athlete_a: AthleteId,
    pub athlete_b: AthleteId,
    pub comparison_count: usize,
    /// Comparison count under the same-boat weighting policy.
    pub weighted_count: f64,
}

/// A pair of athletes compared fewer times than the configured minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonGap {
    pub athlete_a: AthleteId,
    pub athlete_b: AthleteId,
    pub comparison_count: usize,
    pub needed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    /// Nodes with at least one recorded comparison.
    pub compared_count: usize,
    pub edge_count: usize,
    pub total_comparisons: usize,
    /// Fraction of compared-athlete pairs reachable through recorded
    /// comparisons.
    pub connectivity: f64,
    /// Fraction of compared-athlete pairs with a direct comparison.
    pub direct_coverage: f64,
    pub component_count: usize,
    pub gap_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub gaps: Vec<ComparisonGap>,
    /// Connected components of compared athletes, largest first. More than
    /// one means ratings in different components cannot be compared.
    pub components: Vec<Vec<AthleteId>>,
    /// Roster athletes with no comparisons yet. They carry no rating and
    /// stay out of components, gaps and connectivity.
    pub uncompared: Vec<AthleteId>,
    pub statistics: GraphStatistics,
}

impl ComparisonGraph {
    /// Build the graph over `roster` plus everyone who appears in `outcomes`.
    ///
    /// Roster athletes with no comparisons show up as nodes and in
    /// `uncompared`. Components, gaps and connectivity cover compared
    /// athletes only, matching the universe the Bradley-Terry fit sees.
    pub fn build(
        roster: &[AthleteId],
        outcomes: &[PairwiseOutcome],
        weighting: BoatWeighting,
        config: &GraphConfig,
    ) -> Self {
        let mut node_ids: BTreeSet<AthleteId> = roster.iter().copied().collect();
        let mut pair_counts: BTreeMap<(AthleteId, AthleteId), (usize, f64)> = BTreeMap::new();
        for outcome in outcomes {
            node_ids.insert(outcome.winner);
            node_ids.insert(outcome.loser);
            let entry = pair_counts.entry(outcome.unordered_pair()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += outcome.weight(weighting);
        }

        let ids: Vec<AthleteId> = node_ids.into_iter().collect();
        let index: BTreeMap<AthleteId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut comparisons = vec![0usize; ids.len()];
        let mut opponents = vec![0usize; ids.len()];
        let mut sets = DisjointSet::new(ids.len());
        let mut edges = Vec::with_capacity(pair_counts.len());
        for (&(a, b), &(count, weighted)) in &pair_counts {
            let (ia, ib) = (index[&a], index[&b]);
            comparisons[ia] += count;
            comparisons[ib] += count;
            opponents[ia] += 1;
            opponents[ib] += 1;
            sets.union(ia, ib);
            edges.push(GraphEdge {
                athlete_a: a,
                athlete_b: b,
                comparison_count: count,
                weighted_count: weighted,
            });
        }

        let nodes: Vec<GraphNode> = ids
            .iter()
            .enumerate()
            .map(|(i, &athlete_id)| GraphNode {
                athlete_id,
                comparisons: comparisons[i],
                opponents: opponents[i],
            })
            .collect();

        let compared: Vec<AthleteId> = nodes
            .iter()
            .filter(|n| n.comparisons > 0)
            .map(|n| n.athlete_id)
            .collect();
        let uncompared: Vec<AthleteId> = nodes
            .iter()
            .filter(|n| n.comparisons == 0)
            .map(|n| n.athlete_id)
            .collect();

        let mut gaps = Vec::new();
        for (i, &a) in compared.iter().enumerate() {
            for &b in &compared[i + 1..] {
                let count = pair_counts.get(&(a, b)).map_or(0, |c| c.0);
                if count < config.min_comparisons {
                    gaps.push(ComparisonGap {
                        athlete_a: a,
                        athlete_b: b,
                        comparison_count: count,
                        needed: config.min_comparisons - count,
                    });
                }
            }
        }

        let mut components: Vec<Vec<AthleteId>> = sets
            .groups()
            .into_iter()
            .filter(|g| comparisons[g[0]] > 0)
            .map(|g| g.into_iter().map(|i| ids[i]).collect())
            .collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

        let sizes: Vec<usize> = components.iter().map(|c| c.len()).collect();
        let connectivity = connectivity_from_sizes(&sizes);
        let possible_pairs = compared.len() * compared.len().saturating_sub(1) / 2;
        let direct_coverage = if possible_pairs == 0 {
            1.0
        } else {
            edges.len() as f64 / possible_pairs as f64
        };

        if components.len() > 1 {
            warn!(
                "comparison graph is disconnected: {} components over {} athletes (connectivity {:.3})",
                components.len(),
                compared.len(),
                connectivity
            );
        }

        let statistics = GraphStatistics {
            node_count: ids.len(),
            compared_count: compared.len(),
            edge_count: edges.len(),
            total_comparisons: outcomes.len(),
            connectivity,
            direct_coverage,
            component_count: components.len(),
            gap_count: gaps.len(),
        };

        ComparisonGraph {
            nodes,
            edges,
            gaps,
            components,
            uncompared,
            statistics,
        }
    }

    /// Components other than the largest: the athletes whose ratings cannot
    /// be placed against the main group.
    pub fn isolated_components(&self) -> &[Vec<AthleteId>] {
        if self.components.is_empty() {
            &[]
        } else {
            &self.components[1..]
        }
    }

    /// Recorded comparisons between two athletes, in either order.
    pub fn comparison_count(&self, a: AthleteId, b: AthleteId) -> usize {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.edges
            .binary_search_by(|e| (e.athlete_a, e.athlete_b).cmp(&key))
            .map_or(0, |i| self.edges[i].comparison_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::extract::OutcomeKind;
    use chrono::NaiveDate;

    fn outcome(winner: AthleteId, loser: AthleteId) -> PairwiseOutcome {
        PairwiseOutcome {
            session_id: "s".into(),
            session_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            piece_order: 1,
            winner,
            loser,
            kind: OutcomeKind::Win,
            margin_seconds: 1.0,
            crew_sizes: (2, 2),
        }
    }

    fn build(roster: &[AthleteId], outcomes: &[PairwiseOutcome]) -> ComparisonGraph {
        ComparisonGraph::build(
            roster,
            outcomes,
            BoatWeighting::InverseBoatSize,
            &GraphConfig { min_comparisons: 2 },
        )
    }

    #[test]
    fn counts_edges_in_both_directions() {
        let graph = build(&[], &[outcome(1, 2), outcome(2, 1), outcome(2, 3)]);
        assert_eq!(graph.statistics.node_count, 3);
        assert_eq!(graph.statistics.edge_count, 2);
        assert_eq!(graph.comparison_count(2, 1), 2);
        assert_eq!(graph.comparison_count(1, 3), 0);
        assert!((graph.edges[0].weighted_count - 1.0).abs() < 1e-12);
        assert_eq!(graph.nodes[1].comparisons, 3);
        assert_eq!(graph.nodes[1].opponents, 2);
    }

    #[test]
    fn gaps_include_never_compared_pairs() {
        let graph = build(&[], &[outcome(1, 2), outcome(2, 1), outcome(2, 3)]);
        let gap_pairs: Vec<(AthleteId, AthleteId)> =
            graph.gaps.iter().map(|g| (g.athlete_a, g.athlete_b)).collect();
        assert_eq!(gap_pairs, vec![(1, 3), (2, 3)]);
        assert_eq!(graph.gaps[0].needed, 2);
    }

    #[test]
    fn connected_chain_is_fully_connected() {
        let graph = build(&[], &[outcome(1, 2), outcome(2, 3), outcome(3, 4)]);
        assert_eq!(graph.statistics.connectivity, 1.0);
        assert_eq!(graph.statistics.component_count, 1);
        assert!((graph.statistics.direct_coverage - 0.5).abs() < 1e-12);
    }

    #[test]
    fn disconnected_groups_are_reported() {
        let graph = build(&[9], &[outcome(1, 2), outcome(3, 4)]);
        // 4 compared athletes, 6 pairs, 2 reachable.
        assert!((graph.statistics.connectivity - 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(graph.statistics.node_count, 5);
        assert_eq!(graph.statistics.compared_count, 4);
        assert_eq!(graph.components[0], vec![1, 2]);
        assert_eq!(graph.isolated_components(), &[vec![3, 4]]);
        assert_eq!(graph.uncompared, vec![9]);
    }

    #[test]
    fn roster_only_athletes_leave_connectivity_alone() {
        let outcomes = [outcome(1, 2), outcome(1, 2)];
        let graph = build(&[9], &outcomes);
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.statistics.connectivity, 1.0);
        assert_eq!(graph.statistics.component_count, 1);
        assert_eq!(graph.statistics.direct_coverage, 1.0);
        assert!(graph.gaps.is_empty());
        assert_eq!(graph.uncompared, vec![9]);
    }

    #[test]
    fn comparing_known_athletes_never_lowers_connectivity() {
        let roster: Vec<AthleteId> = (1..=6).collect();
        let mut outcomes = vec![outcome(1, 2), outcome(3, 4), outcome(5, 6)];
        let mut last = build(&roster, &outcomes).statistics.connectivity;
        assert!((last - 0.2).abs() < 1e-12);
        for (a, b) in [(1, 2), (2, 3), (1, 2), (4, 5), (6, 1)] {
            outcomes.push(outcome(a, b));
            let now = build(&roster, &outcomes).statistics.connectivity;
            assert!(now >= last, "connectivity dropped from {last} to {now}");
            last = now;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn empty_graph_is_trivially_connected() {
        let graph = build(&[], &[]);
        assert_eq!(graph.statistics.connectivity, 1.0);
        assert!(graph.isolated_components().is_empty());
    }

    #[test]
    fn connectivity_from_component_sizes() {
        assert_eq!(connectivity_from_sizes(&[4]), 1.0);
        assert!((connectivity_from_sizes(&[2, 2]) - 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(connectivity_from_sizes(&[1]), 1.0);
    }
}
