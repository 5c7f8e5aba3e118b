use std::fmt::Display;

use indexmap::IndexMap;
use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, DenseSlotMap, Key, SecondaryMap};
use thiserror::Error;

use crate::{
    gamma::GammaError,
    parametric::ParamTensor,
    structure::{AbstractIndex, HasStructure, NamedStructure, ShapeError, Slot, VecStructure},
    symbolic::{parse, Atom, AtomKind, DomainError, ParseError},
};

pub mod strategy;

pub use strategy::{ContractionStrategy, GreedyMinFill, MinDegree, Strategy};

new_key_type! {
    pub struct NodeId;
    pub struct HedgeId;
}

/// A graph stored as half edges. Paired half edges form an edge between two
/// nodes (or a loop on one node), unpaired ones are external legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfEdgeGraph<N, E> {
    pub edges: DenseSlotMap<HedgeId, E>,
    pub involution: SecondaryMap<HedgeId, HedgeId>,
    pub nodemap: SecondaryMap<HedgeId, NodeId>,
    pub nodes: DenseSlotMap<NodeId, N>,
    pub incidence: SecondaryMap<NodeId, Vec<HedgeId>>,
}

impl<N, E> Default for HalfEdgeGraph<N, E> {
    fn default() -> Self {
        HalfEdgeGraph::new()
    }
}

impl<N, E> HalfEdgeGraph<N, E> {
    pub fn new() -> Self {
        HalfEdgeGraph {
            edges: DenseSlotMap::with_key(),
            involution: SecondaryMap::new(),
            nodemap: SecondaryMap::new(),
            nodes: DenseSlotMap::with_key(),
            incidence: SecondaryMap::new(),
        }
    }

    /// Add a node with a list of half edges. Each half edge is paired with the
    /// first unpaired one for which `f` holds, including earlier half edges of
    /// the same node.
    pub fn add_node_with_edges_fn<F>(&mut self, data: N, edges: &[E], f: F) -> NodeId
    where
        E: Clone,
        F: Fn(&E, &E) -> bool,
    {
        let node = self.nodes.insert(data);
        let mut incident = Vec::with_capacity(edges.len());
        for e in edges {
            let partner = self
                .edges
                .iter()
                .find(|(h, other)| self.involution[*h] == *h && f(e, *other))
                .map(|(h, _)| h);
            let hedge = self.edges.insert(e.clone());
            self.nodemap.insert(hedge, node);
            match partner {
                Some(p) => {
                    self.involution.insert(hedge, p);
                    self.involution.insert(p, hedge);
                }
                None => {
                    self.involution.insert(hedge, hedge);
                }
            }
            incident.push(hedge);
        }
        self.incidence.insert(node, incident);
        node
    }

    pub fn is_internal(&self, hedge: HedgeId) -> bool {
        self.involution.get(hedge).is_some_and(|&o| o != hedge)
    }

    pub fn incident(&self, node: NodeId) -> &[HedgeId] {
        self.incidence.get(node).map_or(&[], Vec::as_slice)
    }

    /// The node at the other end of an internal half edge.
    pub fn opposite(&self, hedge: HedgeId) -> Option<NodeId> {
        if !self.is_internal(hedge) {
            return None;
        }
        self.nodemap.get(self.involution[hedge]).copied()
    }

    /// Distinct neighbours, loops excluded, in key order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .incident(node)
            .iter()
            .filter_map(|&h| self.opposite(h))
            .filter(|&m| m != node)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn are_connected(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.nodes.contains_key(a) && self.neighbors(a).contains(&b)
    }

    /// Every pair of distinct adjacent nodes, `(smaller, larger)`, sorted.
    pub fn connected_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let mut pairs: Vec<(NodeId, NodeId)> = self
            .edges
            .keys()
            .filter_map(|h| {
                let a = self.nodemap[h];
                let b = self.opposite(h)?;
                (a < b).then_some((a, b))
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    pub fn self_loops(&self, node: NodeId) -> Vec<HedgeId> {
        self.incident(node)
            .iter()
            .copied()
            .filter(|&h| self.opposite(h) == Some(node))
            .collect()
    }

    pub fn internal_edge_count(&self) -> usize {
        self.edges.keys().filter(|&h| self.is_internal(h)).count() / 2
    }

    pub fn external_edges(&self) -> impl Iterator<Item = &E> {
        self.edges
            .iter()
            .filter(|(h, _)| !self.is_internal(*h))
            .map(|(_, e)| e)
    }

    /// Removes a half edge together with its partner.
    fn remove_edge(&mut self, hedge: HedgeId) {
        let Some(&other) = self.involution.get(hedge) else {
            return;
        };
        for h in [hedge, other] {
            self.edges.remove(h);
            self.involution.remove(h);
            if let Some(node) = self.nodemap.remove(h) {
                if let Some(list) = self.incidence.get_mut(node) {
                    list.retain(|&x| x != h);
                }
            }
        }
    }

    pub fn remove_self_loops(&mut self, node: NodeId) {
        for h in self.self_loops(node) {
            self.remove_edge(h);
        }
    }

    /// Replaces `a` and `b` by a single node carrying `data`. Edges between
    /// the two disappear, all others are inherited.
    pub fn merge_nodes(&mut self, a: NodeId, b: NodeId, data: N) -> NodeId {
        let merged = self.nodes.insert(data);
        let hedges: Vec<HedgeId> = self
            .incident(a)
            .iter()
            .chain(self.incident(b))
            .copied()
            .collect();

        let mut incident = Vec::with_capacity(hedges.len());
        for h in hedges {
            if !self.edges.contains_key(h) {
                continue;
            }
            match self.opposite(h) {
                Some(other) if other == a || other == b => self.remove_edge(h),
                _ => {
                    self.nodemap.insert(h, merged);
                    incident.push(h);
                }
            }
        }

        self.nodes.remove(a);
        self.nodes.remove(b);
        self.incidence.remove(a);
        self.incidence.remove(b);
        self.incidence.insert(merged, incident);
        merged
    }

    pub fn dot(&self) -> String
    where
        E: Display,
    {
        let mut out = "graph {\n".to_string();
        out.push_str("  node [shape=circle,height=0.1,label=\"\"];  overlap=\"scale\";");

        for (h, e) in &self.edges {
            let node = self.nodemap[h].data().as_ffi();
            let other = self.involution[h];
            match h.cmp(&other) {
                std::cmp::Ordering::Greater => {
                    out.push_str(&format!(
                        "\n {} -- {} [label=\" {} \"];",
                        node,
                        self.nodemap[other].data().as_ffi(),
                        e
                    ));
                }
                std::cmp::Ordering::Equal => {
                    out.push_str(&format!(
                        " \n ext{} [shape=none, label=\"\"];",
                        h.data().as_ffi()
                    ));
                    out.push_str(&format!(
                        "\n {} -- ext{} [label =\" {}\"];",
                        node,
                        h.data().as_ffi(),
                        e
                    ));
                }
                std::cmp::Ordering::Less => {}
            }
        }

        out += "\n}";
        out
    }
}

/// How a network gets contracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractionSettings {
    /// Keep library tensors symbolic and contract them through their identities.
    pub apply_identities: bool,
    pub strategy: Strategy,
}

impl Default for ContractionSettings {
    fn default() -> Self {
        ContractionSettings {
            apply_identities: true,
            strategy: Strategy::default(),
        }
    }
}

impl ContractionSettings {
    /// Every tensor written out, contracted by summation only.
    pub fn explicit() -> Self {
        ContractionSettings {
            apply_identities: false,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("contraction not finished: {pending} internal edges across {nodes} nodes remain")]
    ContractionPending { pending: usize, nodes: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorNetworkError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Gamma(#[from] GammaError),
    #[error("result has open indices {0}, not a scalar")]
    NotScalarOutput(VecStructure),
    #[error("tensor nested inside the function {0}")]
    NestedTensor(Atom),
}

/// Tensors connected by their shared labels, times a scalar.
#[derive(Debug, Clone)]
pub struct TensorNetwork {
    pub graph: HalfEdgeGraph<ParamTensor, Slot>,
    /// Each contracted label with its two half edges.
    pub adjacency: IndexMap<AbstractIndex, [HedgeId; 2]>,
    pub scalar: Option<Atom>,
    pub settings: ContractionSettings,
}

impl Default for TensorNetwork {
    fn default() -> Self {
        TensorNetwork::new(ContractionSettings::default())
    }
}

fn check_pair(first: &Slot, second: &Slot) -> Result<(), ShapeError> {
    let label = second.aind.clone();
    if first.kind().base() != second.kind().base() {
        return Err(ShapeError::IncompatibleRepresentations {
            label,
            first: first.kind(),
            second: second.kind(),
        });
    }
    if first.dim() != second.dim() {
        return Err(ShapeError::IncompatibleDimensions {
            label,
            first: first.dim().clone(),
            second: second.dim().clone(),
        });
    }
    if !first.kind().matches(second.kind()) {
        return Err(ShapeError::SameVariance {
            label,
            rep: first.kind(),
        });
    }
    Ok(())
}

impl TensorNetwork {
    pub fn new(settings: ContractionSettings) -> Self {
        TensorNetwork {
            graph: HalfEdgeGraph::new(),
            adjacency: IndexMap::new(),
            scalar: None,
            settings,
        }
    }

    pub fn parse(text: &str) -> Result<Self, TensorNetworkError> {
        TensorNetwork::from_expression(&parse(text)?, ContractionSettings::default())
    }

    /// Splits a product into tensor nodes and a scalar factor.
    ///
    /// A factor that is a sum containing tensors is contracted on its own, one
    /// network per summand, and enters as the single node of their sum.
    pub fn from_expression(
        expr: &Atom,
        settings: ContractionSettings,
    ) -> Result<Self, TensorNetworkError> {
        let mut network = TensorNetwork::new(settings);
        let factors = match expr.kind() {
            AtomKind::Mul(factors) => factors.clone(),
            _ => vec![expr.clone()],
        };
        for factor in &factors {
            network.push_factor(factor)?;
        }
        debug!(
            "built network of {} nodes and {} contracted labels",
            network.graph.nodes.len(),
            network.adjacency.len()
        );
        Ok(network)
    }

    fn push_factor(&mut self, factor: &Atom) -> Result<(), TensorNetworkError> {
        if let Some(named) = NamedStructure::try_from_atom(factor)? {
            let tensor = ParamTensor::from_named(&named, self.settings.apply_identities)?;
            self.push(tensor)?;
            return Ok(());
        }
        if !NamedStructure::contains_tensor(factor) {
            self.scalar_mul(factor);
            return Ok(());
        }
        match factor.kind() {
            AtomKind::Add(_) => {
                let mut set = TensorNetworkSet::from_expression(factor, self.settings.clone())?;
                set.contract()?;
                let sum = set.result()?;
                match sum.scalar() {
                    Some(s) => self.scalar_mul(&s),
                    None => {
                        self.push(sum)?;
                    }
                }
                Ok(())
            }
            AtomKind::Pow(..) => Err(ShapeError::TensorPower(factor.clone()).into()),
            _ => Err(TensorNetworkError::NestedTensor(factor.clone())),
        }
    }

    pub fn scalar_mul(&mut self, factor: &Atom) {
        self.scalar = Some(match self.scalar.take() {
            Some(s) => s * factor,
            None => factor.clone(),
        });
    }

    /// Adds a node, checking each of its labels against the ones already present.
    pub fn push(&mut self, tensor: ParamTensor) -> Result<NodeId, TensorNetworkError> {
        let slots = tensor.structure().structure.clone();
        for (n, slot) in slots.iter().enumerate() {
            let seen: Vec<&Slot> = self
                .graph
                .edges
                .values()
                .chain(&slots[..n])
                .filter(|s| s.aind == slot.aind)
                .collect();
            match seen.as_slice() {
                [] => {}
                [first] => check_pair(first, slot)?,
                _ => {
                    return Err(ShapeError::OverContracted {
                        label: slot.aind.clone(),
                        count: seen.len() + 1,
                    }
                    .into())
                }
            }
        }

        let node = self
            .graph
            .add_node_with_edges_fn(tensor, &slots, |new, old| new.matches(old));
        for &h in self.graph.incident(node) {
            if self.graph.is_internal(h) {
                let label = self.graph.edges[h].aind.clone();
                self.adjacency.insert(label, [self.graph.involution[h], h]);
            }
        }
        Ok(node)
    }

    /// No edges left and at most one node.
    pub fn is_contracted(&self) -> bool {
        self.graph.internal_edge_count() == 0 && self.graph.nodes.len() <= 1
    }

    pub fn contract(&mut self) -> Result<(), TensorNetworkError> {
        let strategy = self.settings.strategy;
        self.contract_algo(&strategy)
    }

    /// Contracts until a single node remains, asking `strategy` which pair to
    /// merge next. A pair the strategy cannot provide falls back to the first
    /// connected pair.
    pub fn contract_algo(
        &mut self,
        strategy: &dyn ContractionStrategy,
    ) -> Result<(), TensorNetworkError> {
        debug!(
            "contracting {} nodes, {} labels",
            self.graph.nodes.len(),
            self.adjacency.len()
        );
        self.resolve_self_loops()?;

        loop {
            let next = strategy
                .next_pair(self)
                .filter(|&(a, b)| self.graph.are_connected(a, b))
                .or_else(|| self.graph.connected_pairs().first().copied());
            let Some((a, b)) = next else {
                break;
            };
            self.contract_pair(a, b)?;
        }

        while self.graph.nodes.len() > 1 {
            let mut keys: Vec<NodeId> = self.graph.nodes.keys().collect();
            keys.sort();
            let product = self.graph.nodes[keys[0]].product(&self.graph.nodes[keys[1]])?;
            self.graph.merge_nodes(keys[0], keys[1], product);
        }
        debug!("contraction finished");
        Ok(())
    }

    fn resolve_self_loops(&mut self) -> Result<(), TensorNetworkError> {
        let looped: Vec<NodeId> = self
            .graph
            .nodes
            .keys()
            .filter(|&n| !self.graph.self_loops(n).is_empty())
            .collect();
        for node in looped {
            let traced = self.graph.nodes[node].trace(self.settings.apply_identities)?;
            trace!("traced node into {}", traced.structure());
            self.graph.nodes[node] = traced;
            self.graph.remove_self_loops(node);
        }
        self.prune_adjacency();
        Ok(())
    }

    fn contract_pair(&mut self, a: NodeId, b: NodeId) -> Result<(), TensorNetworkError> {
        let merged = self.graph.nodes[a]
            .contract_with(&self.graph.nodes[b], self.settings.apply_identities)?;
        trace!("contracted pair into {}", merged.structure());
        self.graph.merge_nodes(a, b, merged);
        self.prune_adjacency();
        Ok(())
    }

    fn prune_adjacency(&mut self) {
        let edges = &self.graph.edges;
        self.adjacency.retain(|_, [h, _]| edges.contains_key(*h));
    }

    /// The contracted tensor, times the scalar factor.
    pub fn result(&self) -> Result<ParamTensor, TensorNetworkError> {
        if !self.is_contracted() {
            return Err(StateError::ContractionPending {
                pending: self.graph.internal_edge_count(),
                nodes: self.graph.nodes.len(),
            }
            .into());
        }
        let scalar = self.scalar.clone().unwrap_or_else(Atom::one);
        Ok(match self.graph.nodes.values().next() {
            Some(tensor) => tensor.scalar_mul(&scalar),
            None => ParamTensor::new_scalar(scalar),
        })
    }

    pub fn result_scalar(&self) -> Result<Atom, TensorNetworkError> {
        let result = self.result()?;
        result
            .scalar()
            .ok_or_else(|| TensorNetworkError::NotScalarOutput(result.structure().clone()))
    }

    pub fn dot(&self) -> String {
        self.graph.dot()
    }
}

impl TryFrom<&Atom> for TensorNetwork {
    type Error = TensorNetworkError;

    fn try_from(expr: &Atom) -> Result<Self, Self::Error> {
        TensorNetwork::from_expression(expr, ContractionSettings::default())
    }
}

/// One network per summand of a sum. The contracted results are summed again.
#[derive(Debug, Clone, Default)]
pub struct TensorNetworkSet {
    pub networks: Vec<TensorNetwork>,
}

impl TensorNetworkSet {
    pub fn new() -> Self {
        TensorNetworkSet::default()
    }

    pub fn push(&mut self, network: TensorNetwork) {
        self.networks.push(network);
    }

    pub fn from_expression(
        expr: &Atom,
        settings: ContractionSettings,
    ) -> Result<Self, TensorNetworkError> {
        let terms = match expr.kind() {
            AtomKind::Add(terms) => terms.clone(),
            _ => vec![expr.clone()],
        };
        let networks = terms
            .iter()
            .map(|t| TensorNetwork::from_expression(t, settings.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("fanned out into {} networks", networks.len());
        Ok(TensorNetworkSet { networks })
    }

    pub fn contract(&mut self) -> Result<(), TensorNetworkError> {
        self.networks
            .par_iter_mut()
            .try_for_each(TensorNetwork::contract)
    }

    pub fn results(&self) -> Result<Vec<ParamTensor>, TensorNetworkError> {
        self.networks.iter().map(TensorNetwork::result).collect()
    }

    /// Sum of the results. Every summand must carry the same open slots.
    pub fn result(&self) -> Result<ParamTensor, TensorNetworkError> {
        let mut results = self.results()?.into_iter();
        let Some(first) = results.next() else {
            return Ok(ParamTensor::new_scalar(Atom::zero()));
        };
        results.try_fold(first, |acc, r| acc.add(&r))
    }
}

#[cfg(test)]
mod tests {
    use crate::structure::{Rep, TensorStructure};

    use super::*;

    fn p(s: &str) -> Atom {
        parse(s).unwrap()
    }

    #[test]
    fn half_edge_merge() {
        let mut graph: HalfEdgeGraph<&str, usize> = HalfEdgeGraph::new();
        let a = graph.add_node_with_edges_fn("a", &[1, 2], |x, y| x == y);
        let b = graph.add_node_with_edges_fn("b", &[2, 3], |x, y| x == y);
        let c = graph.add_node_with_edges_fn("c", &[3, 4, 4], |x, y| x == y);
        assert_eq!(graph.connected_pairs().len(), 2);
        assert_eq!(graph.self_loops(c).len(), 2);
        assert_eq!(graph.internal_edge_count(), 3);

        let ab = graph.merge_nodes(a, b, "ab");
        assert_eq!(graph.neighbors(ab), vec![c]);
        assert_eq!(graph.internal_edge_count(), 2);
        graph.remove_self_loops(c);
        assert_eq!(graph.internal_edge_count(), 1);
        assert_eq!(graph.external_edges().count(), 1);
        assert!(graph.dot().contains("--"));
    }

    #[test]
    fn label_validation() {
        let over = TensorNetwork::parse("A(bis(4,1))*B(bis(4,1))*C(bis(4,1))");
        assert!(matches!(
            over,
            Err(TensorNetworkError::Shape(ShapeError::OverContracted { count: 3, .. }))
        ));

        let dims = TensorNetwork::parse("A(bis(4,1))*B(bis(3,1))");
        assert!(matches!(
            dims,
            Err(TensorNetworkError::Shape(ShapeError::IncompatibleDimensions { .. }))
        ));

        let variance = TensorNetwork::parse("A(loru(4,1))*B(loru(4,1))");
        assert!(matches!(
            variance,
            Err(TensorNetworkError::Shape(ShapeError::SameVariance { rep: Rep::LorentzUp, .. }))
        ));

        let kinds = TensorNetwork::parse("A(bis(4,1))*B(mink(4,1))");
        assert!(matches!(
            kinds,
            Err(TensorNetworkError::Shape(ShapeError::IncompatibleRepresentations { .. }))
        ));

        assert!(matches!(
            TensorNetwork::parse("A(bis(4,1))^2"),
            Err(TensorNetworkError::Shape(ShapeError::TensorPower(_)))
        ));
        assert!(matches!(
            TensorNetwork::parse("A(bis(4,1)*"),
            Err(TensorNetworkError::Parse(_))
        ));
    }

    #[test]
    fn result_requires_contraction() {
        let mut net = TensorNetwork::parse("A(bis(2,1),bis(2,2))*B(bis(2,2))*x").unwrap();
        assert_eq!(net.adjacency.len(), 1);
        assert!(matches!(
            net.result(),
            Err(TensorNetworkError::State(StateError::ContractionPending {
                pending: 1,
                nodes: 2
            }))
        ));
        net.contract().unwrap();
        assert!(net.adjacency.is_empty());
        let result = net.result().unwrap();
        assert_eq!(
            result.get_owned(&[1]).unwrap().expand(),
            p("x*A(cind(1,0))*B(cind(0))+x*A(cind(1,1))*B(cind(1))").expand()
        );
        assert!(matches!(
            net.result_scalar(),
            Err(TensorNetworkError::NotScalarOutput(_))
        ));
    }

    #[test]
    fn sums_fan_out() {
        let expr = p("A(bis(2,1))*(B(bis(2,1),bis(2,2))+y*C(bis(2,2),bis(2,1)))");
        let mut net = TensorNetwork::try_from(&expr).unwrap();
        assert_eq!(net.graph.nodes.len(), 2);
        net.contract().unwrap();
        let r = net.result().unwrap();
        assert_eq!(r.structure().order(), 1);
        assert_eq!(
            r.get_owned(&[0]).unwrap().expand(),
            p("A(cind(0))*B(cind(0,0))+A(cind(1))*B(cind(1,0))+y*A(cind(0))*C(cind(0,0))+y*A(cind(1))*C(cind(0,1))")
                .expand()
        );

        let mismatch = TensorNetwork::parse("A(bis(2,1))+B(bis(2,2))");
        assert!(matches!(
            mismatch,
            Err(TensorNetworkError::Shape(ShapeError::StructureMismatch(..)))
        ));
    }

    #[test]
    fn disconnected_and_scalar_networks() {
        let mut net = TensorNetwork::parse("A(bis(2,1))*B(bis(3,2))*2").unwrap();
        net.contract().unwrap();
        let r = net.result().unwrap();
        assert_eq!(r.size().unwrap(), 6);

        let mut scalar = TensorNetwork::parse("2*x").unwrap();
        scalar.contract().unwrap();
        assert_eq!(scalar.result_scalar().unwrap(), p("2*x"));
    }

    #[test]
    fn identities_match_summation() {
        let text = "gamma(mink(4,1),bis(4,2),bis(4,3))*gamma(mink(4,1),bis(4,3),bis(4,4))*A(bis(4,2))*B(bis(4,4))";
        let mut structured = TensorNetwork::parse(text).unwrap();
        structured.contract().unwrap();
        let mut summed =
            TensorNetwork::from_expression(&p(text), ContractionSettings::explicit()).unwrap();
        summed.contract().unwrap();
        assert_eq!(
            structured.result_scalar().unwrap().expand(),
            summed.result_scalar().unwrap().expand()
        );
    }

    #[test]
    fn settings_from_json() {
        let settings = ContractionSettings::from_json(r#"{"strategy":"MinDegree"}"#).unwrap();
        assert!(settings.apply_identities);
        assert_eq!(settings.strategy, Strategy::MinDegree);
    }
}
