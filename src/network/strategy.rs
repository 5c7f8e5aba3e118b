//! Choosing which two adjacent nodes to contract next.

use serde::{Deserialize, Serialize};

use crate::{
    contraction::{contracted_size, contracted_structure},
    structure::HasStructure,
};

use super::{NodeId, TensorNetwork};

/// Picks the next pair of adjacent nodes. Returning `None`, or a pair that is
/// not adjacent, makes the network fall back to its first connected pair.
pub trait ContractionStrategy {
    fn next_pair(&self, network: &TensorNetwork) -> Option<(NodeId, NodeId)>;
}

/// The pair whose result has the fewest open slots, then the fewest components.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyMinFill;

impl ContractionStrategy for GreedyMinFill {
    fn next_pair(&self, network: &TensorNetwork) -> Option<(NodeId, NodeId)> {
        let nodes = &network.graph.nodes;
        network
            .graph
            .connected_pairs()
            .into_iter()
            .min_by_key(|&(a, b)| {
                let merged =
                    contracted_structure(nodes[a].structure(), nodes[b].structure());
                let size = contracted_size(&merged.structure);
                (merged.structure.len(), size, a, b)
            })
    }
}

/// The node of least degree, joined with its neighbour of least degree.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinDegree;

impl ContractionStrategy for MinDegree {
    fn next_pair(&self, network: &TensorNetwork) -> Option<(NodeId, NodeId)> {
        let graph = &network.graph;
        let degree = |n: NodeId| graph.neighbors(n).len();
        let first = graph
            .nodes
            .keys()
            .filter(|&n| degree(n) > 0)
            .min_by_key(|&n| (degree(n), n))?;
        let second = graph
            .neighbors(first)
            .into_iter()
            .min_by_key(|&n| (degree(n), n))?;
        Some((first, second))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    #[default]
    GreedyMinFill,
    MinDegree,
}

impl ContractionStrategy for Strategy {
    fn next_pair(&self, network: &TensorNetwork) -> Option<(NodeId, NodeId)> {
        match self {
            Strategy::GreedyMinFill => GreedyMinFill.next_pair(network),
            Strategy::MinDegree => MinDegree.next_pair(network),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        network::{ContractionSettings, TensorNetwork},
        symbolic::parse,
    };

    use super::*;

    const CHAIN: &str = "A(bis(3,1))*B(bis(3,1),bis(3,2),bis(5,3))*C(bis(3,2))*D(bis(5,3),bis(5,4))";

    #[test]
    fn greedy_prefers_small_results() {
        let net = TensorNetwork::parse(CHAIN).unwrap();
        let (a, b) = GreedyMinFill.next_pair(&net).unwrap();
        let orders = [a, b].map(|n| net.graph.nodes[n].structure().structure.len());
        // A or C against B leaves two open slots, D against B leaves three
        assert!(orders.contains(&3));
        assert!(orders.contains(&1));
    }

    #[test]
    fn min_degree_starts_at_a_leaf() {
        let net = TensorNetwork::parse(CHAIN).unwrap();
        let (a, b) = MinDegree.next_pair(&net).unwrap();
        assert_eq!(net.graph.neighbors(a).len(), 1);
        assert_eq!(net.graph.nodes[b].structure().structure.len(), 3);
    }

    #[test]
    fn strategies_agree_on_the_result() {
        let expr = parse(CHAIN).unwrap();
        let results = [Strategy::GreedyMinFill, Strategy::MinDegree].map(|strategy| {
            let mut net = TensorNetwork::from_expression(
                &expr,
                ContractionSettings {
                    strategy,
                    ..Default::default()
                },
            )
            .unwrap();
            net.contract().unwrap();
            net.result().unwrap()
        });
        let [greedy, min_degree] = results;
        for k in 0..5 {
            assert_eq!(
                greedy.get_owned(&[k]).unwrap().expand(),
                min_degree.get_owned(&[k]).unwrap().expand()
            );
        }
    }
}
