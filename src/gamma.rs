//! Contraction identities of the Dirac algebra and of Kronecker deltas.
//!
//! These rules act on symbolic library tensors without materialising their
//! components, so they also hold for symbolic dimensions. Whenever no rule
//! applies the caller falls back to brute force contraction.

use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    parametric::{ParamTensor, SymbolicTensor},
    structure::{HasStructure, NamedStructure, ShapeError, Slot, TensorStructure, VecStructure},
    symbolic::{Atom, AtomKind, DomainError},
    tensor_library::LibraryTensor,
};

/// Highest power of a tensor factor that gets unrolled into repeated factors.
const MAX_UNROLLED_POWER: i64 = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GammaError {
    #[error("spinor index {0} does not close a gamma chain")]
    OpenChain(Slot),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// A symbolic tensor of the form `coefficient * library_tensor(...)`.
struct Leaf {
    coefficient: Atom,
    named: NamedStructure,
    kind: LibraryTensor,
}

impl Leaf {
    fn of(tensor: &SymbolicTensor) -> Option<Leaf> {
        let mut coefficient = Vec::new();
        let mut found = None;
        for factor in factors(&tensor.expression) {
            match NamedStructure::try_from_atom(&factor) {
                Ok(Some(named)) => {
                    if found.is_some() {
                        return None;
                    }
                    let kind = LibraryTensor::of(&named)?;
                    found = Some((named, kind));
                }
                Ok(None) if !NamedStructure::contains_tensor(&factor) => coefficient.push(factor),
                _ => return None,
            }
        }
        let (named, kind) = found?;
        Some(Leaf {
            coefficient: Atom::mul_all(coefficient),
            named,
            kind,
        })
    }

    fn slots(&self) -> &[Slot] {
        self.named.external_structure()
    }
}

fn factors(atom: &Atom) -> Vec<Atom> {
    match atom.kind() {
        AtomKind::Mul(items) => items.clone(),
        _ => vec![atom.clone()],
    }
}

fn terms(atom: &Atom) -> Vec<Atom> {
    match atom.kind() {
        AtomKind::Add(items) => items.clone(),
        _ => vec![atom.clone()],
    }
}

/// `T^n` becomes `n` copies of `T`, so that each copy can be contracted on its own.
fn unroll_powers(factors: Vec<Atom>) -> Vec<Atom> {
    let mut out = Vec::with_capacity(factors.len());
    for factor in factors {
        if let AtomKind::Pow(base, exp) = factor.kind() {
            if let Some(n) = exp.as_integer() {
                if (1..=MAX_UNROLLED_POWER).contains(&n) && NamedStructure::is_tensor(base) {
                    out.extend(std::iter::repeat(base.clone()).take(n as usize));
                    continue;
                }
            }
        }
        out.push(factor);
    }
    out
}

fn symbolic(structure: VecStructure, expression: Atom) -> ParamTensor {
    ParamTensor::Symbolic(SymbolicTensor {
        structure,
        expression,
    })
}

/// Applies an identity to the contraction of `a` with `b`, if one is known.
///
/// `Ok(None)` means no rule covers this pair.
pub fn contract_structured(
    a: &ParamTensor,
    b: &ParamTensor,
) -> Result<Option<ParamTensor>, GammaError> {
    let pairs = a.structure().match_indices(b.structure());
    if pairs.is_empty() {
        return Ok(None);
    }
    let shared: Vec<Slot> = pairs
        .iter()
        .map(|&(i, _)| a.structure().structure[i].clone())
        .collect();

    let leaf_a = a.try_as_symbolic().ok().and_then(Leaf::of);
    let leaf_b = b.try_as_symbolic().ok().and_then(Leaf::of);

    if let Some(kronecker) = leaf_a.as_ref().filter(|l| l.kind.is_kronecker()) {
        return kronecker_contract(kronecker, b, &shared);
    }
    if let Some(kronecker) = leaf_b.as_ref().filter(|l| l.kind.is_kronecker()) {
        return kronecker_contract(kronecker, a, &shared);
    }

    match (leaf_a, leaf_b) {
        (Some(x), Some(y)) if x.kind == LibraryTensor::Gamma && y.kind == LibraryTensor::Gamma => {
            Ok(gamma_gamma(&x, &y, pairs.len()))
        }
        _ => Ok(None),
    }
}

/// `delta(s1, s2) * X(.., s1', ..) = X(.., s2, ..)`, and its double contraction, a trace of X.
fn kronecker_contract(
    kronecker: &Leaf,
    partner: &ParamTensor,
    shared: &[Slot],
) -> Result<Option<ParamTensor>, GammaError> {
    let [k0, k1] = kronecker.slots() else {
        return Ok(None);
    };
    let (from, to) = if shared.iter().any(|s| s.aind == k0.aind) {
        (k0, k1)
    } else {
        (k1, k0)
    };
    let Some(partner_slot) = partner
        .structure()
        .structure
        .iter()
        .find(|s| s.matches(from))
        .cloned()
    else {
        return Ok(None);
    };

    let relabeled = partner
        .replace_slot(&partner_slot, to)?
        .scalar_mul(&kronecker.coefficient);

    match shared.len() {
        1 => Ok(Some(relabeled)),
        2 => match relabeled {
            ParamTensor::Symbolic(s) => Ok(trace_structured(&s)?.map(ParamTensor::Symbolic)),
            ParamTensor::Explicit(d) => Ok(Some(ParamTensor::Explicit(d.internal_contract()?))),
        },
        _ => Ok(None),
    }
}

/// Products of two gamma matrices sharing their Lorentz index, their spinor
/// indices, or both.
fn gamma_gamma(x: &Leaf, y: &Leaf, shared: usize) -> Option<ParamTensor> {
    let [xm, xi, xk] = x.slots() else {
        return None;
    };
    let [ym, yi, yk] = y.slots() else {
        return None;
    };
    let lorentz = xm.matches(ym);
    let forward = xk.matches(yi);
    let backward = xi.matches(yk);
    if shared != [lorentz, forward, backward].iter().filter(|&&c| c).count() {
        return None;
    }

    let coefficient = &x.coefficient * &y.coefficient;
    let d = xm.dim().to_atom();
    let spinor_dim = xi.dim().to_atom();

    match (lorentz, forward, backward) {
        (true, true, true) => Some(symbolic(
            VecStructure::empty(),
            coefficient * d * spinor_dim,
        )),
        (true, true, false) => Some(symbolic(
            VecStructure::new(vec![xi.clone(), yk.clone()]),
            coefficient * d * xi.kronecker_atom(yk),
        )),
        (true, false, true) => Some(symbolic(
            VecStructure::new(vec![yi.clone(), xk.clone()]),
            coefficient * d * yi.kronecker_atom(xk),
        )),
        (false, true, true) if xm.kind().base() == ym.kind().base() && xm.dim() == ym.dim() => {
            Some(symbolic(
                VecStructure::new(vec![xm.clone(), ym.clone()]),
                coefficient * spinor_dim * xm.metric_atom(ym),
            ))
        }
        _ => None,
    }
}

/// Trace of a single library tensor over its repeated index.
pub fn trace_structured(tensor: &SymbolicTensor) -> Result<Option<SymbolicTensor>, GammaError> {
    let Some(leaf) = Leaf::of(tensor) else {
        return Ok(None);
    };
    let traces = leaf.named.traces();
    let slots = leaf.slots();

    let traced = match (leaf.kind, traces.as_slice()) {
        (LibraryTensor::Identity | LibraryTensor::Metric, [[0, 1]]) => SymbolicTensor {
            structure: VecStructure::empty(),
            expression: &leaf.coefficient * &slots[0].dim().to_atom(),
        },
        (LibraryTensor::Gamma, [[1, 2]]) => SymbolicTensor {
            structure: VecStructure::new(vec![slots[0].clone()]),
            expression: Atom::zero(),
        },
        (LibraryTensor::Gamma5, [[0, 1]]) => SymbolicTensor {
            structure: VecStructure::empty(),
            expression: Atom::zero(),
        },
        (LibraryTensor::ProjM | LibraryTensor::ProjP, [[0, 1]]) => SymbolicTensor {
            structure: VecStructure::empty(),
            expression: &leaf.coefficient
                * &slots[0].dim().to_atom()
                * Atom::new_frac(1, 2)?,
        },
        _ => return Ok(None),
    };
    Ok(Some(traced))
}

/// Traces all closed chains of gamma matrices in `expr`.
///
/// The expression is expanded first; every gamma of every term must sit in a
/// closed spinor chain. Lorentz indices shared by the resulting metrics and the
/// remaining factors are contracted afterwards.
pub fn dirac_trace(expr: &Atom) -> Result<Atom, GammaError> {
    let traced = terms(&expr.expand())
        .iter()
        .map(trace_term)
        .collect::<Result<Vec<_>, _>>()?;
    simplify_kronecker(&Atom::add_all(traced))
}

fn trace_term(term: &Atom) -> Result<Atom, GammaError> {
    let mut rest = Vec::new();
    let mut gammas: Vec<[Slot; 3]> = Vec::new();
    for factor in unroll_powers(factors(term)) {
        match NamedStructure::try_from_atom(&factor)? {
            Some(named) if LibraryTensor::of(&named) == Some(LibraryTensor::Gamma) => {
                LibraryTensor::Gamma.validate(&named)?;
                if let [mu, i, j] = named.external_structure() {
                    gammas.push([mu.clone(), i.clone(), j.clone()]);
                }
            }
            _ => rest.push(factor),
        }
    }

    let mut used = vec![false; gammas.len()];
    while let Some(start) = used.iter().position(|u| !u) {
        let mut chain = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            chain.push(gammas[current][0].clone());
            let out = &gammas[current][2];
            let next = gammas
                .iter()
                .position(|g| g[1].matches(out))
                .ok_or_else(|| GammaError::OpenChain(out.clone()))?;
            if next == start {
                break;
            }
            if used[next] {
                return Err(GammaError::OpenChain(out.clone()));
            }
            current = next;
        }
        rest.push(trace_chain(&chain, &gammas[start][1].dim().to_atom()));
    }
    Ok(Atom::mul_all(rest))
}

/// `Tr(γ^μ1 ... γ^μn) = Σ_k (-1)^k g^{μ1 μk} Tr(γ^μ2 .. (no μk) .. γ^μn)`
fn trace_chain(mus: &[Slot], spinor_dim: &Atom) -> Atom {
    match mus {
        [] => spinor_dim.clone(),
        _ if mus.len() % 2 == 1 => Atom::zero(),
        [first, rest @ ..] => Atom::add_all(rest.iter().enumerate().map(|(k, mu)| {
            let remaining: Vec<Slot> = rest
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != k)
                .map(|(_, s)| s.clone())
                .collect();
            let sign = if k % 2 == 0 { Atom::one() } else { Atom::num(-1) };
            sign * first.metric_atom(mu) * trace_chain(&remaining, spinor_dim)
        })),
    }
}

enum KroneckerStep {
    Trace { position: usize, value: Atom },
    Relabel {
        kronecker: usize,
        partner: usize,
        from: Slot,
        to: Slot,
    },
}

/// Contracts every identity and metric inside products with its partner factor.
pub fn simplify_kronecker(expr: &Atom) -> Result<Atom, GammaError> {
    let simplified = terms(&expr.expand())
        .iter()
        .map(simplify_term)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Atom::add_all(simplified))
}

fn simplify_term(term: &Atom) -> Result<Atom, GammaError> {
    let mut factors = unroll_powers(factors(term));
    while let Some(step) = next_kronecker_step(&factors)? {
        match step {
            KroneckerStep::Trace { position, value } => factors[position] = value,
            KroneckerStep::Relabel {
                kronecker,
                partner,
                from,
                to,
            } => {
                let map = IndexMap::from([(from.to_atom(), to.to_atom())]);
                factors[partner] = factors[partner].replace_map(&map)?;
                factors.remove(kronecker);
            }
        }
    }
    Ok(Atom::mul_all(factors))
}

fn next_kronecker_step(factors: &[Atom]) -> Result<Option<KroneckerStep>, GammaError> {
    for (position, factor) in factors.iter().enumerate() {
        let Some(named) = NamedStructure::try_from_atom(factor)? else {
            continue;
        };
        if !LibraryTensor::of(&named).is_some_and(LibraryTensor::is_kronecker) {
            continue;
        }
        let [a, b] = named.external_structure() else {
            continue;
        };
        if a.matches(b) {
            return Ok(Some(KroneckerStep::Trace {
                position,
                value: a.dim().to_atom(),
            }));
        }
        for (own, other) in [(a, b), (b, a)] {
            if let Some((partner, from)) = find_partner(factors, position, own)? {
                return Ok(Some(KroneckerStep::Relabel {
                    kronecker: position,
                    partner,
                    from,
                    to: other.clone(),
                }));
            }
        }
    }
    Ok(None)
}

/// Another tensor factor carrying a slot that contracts with `slot`.
fn find_partner(
    factors: &[Atom],
    skip: usize,
    slot: &Slot,
) -> Result<Option<(usize, Slot)>, GammaError> {
    for (position, factor) in factors.iter().enumerate() {
        if position == skip {
            continue;
        }
        if let Some(named) = NamedStructure::try_from_atom(factor)? {
            if let Some(s) = named.external_structure().iter().find(|s| s.matches(slot)) {
                return Ok(Some((position, s.clone())));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use crate::symbolic::parse;

    use super::*;

    fn p(s: &str) -> Atom {
        parse(s).unwrap()
    }

    fn leaf(s: &str) -> ParamTensor {
        let named = NamedStructure::try_from_atom(&p(s)).unwrap().unwrap();
        ParamTensor::from_named(&named, true).unwrap()
    }

    #[test]
    fn kronecker_relabels() {
        let delta = leaf("id(aind(bis(4,1),bis(4,2)))");
        let g = leaf("gamma(aind(mink(4,5),bis(4,2),bis(4,3)))");
        let out = contract_structured(&delta, &g).unwrap().unwrap();
        assert_eq!(
            out.try_as_symbolic().unwrap().expression,
            p("gamma(aind(mink(4,5),bis(4,1),bis(4,3)))")
        );

        let lowered = leaf("metric(aind(loru(4,1),loru(4,7)))");
        let v = ParamTensor::Explicit(
            crate::tensor_library::shadow(
                &NamedStructure::try_from_atom(&p("P(2,aind(lord(4,1)))"))
                    .unwrap()
                    .unwrap(),
            )
            .unwrap(),
        );
        let raised = contract_structured(&v, &lowered).unwrap().unwrap();
        assert_eq!(
            raised.structure().structure,
            vec![Slot::new(crate::structure::Rep::LorentzUp, 4usize, 7usize)]
        );
    }

    #[test]
    fn gamma_identities() {
        let a = leaf("gamma(aind(mink(D,1),bis(4,2),bis(4,3)))");
        let b = leaf("gamma(aind(mink(D,1),bis(4,3),bis(4,4)))");
        let out = contract_structured(&a, &b).unwrap().unwrap();
        assert_eq!(
            out.try_as_symbolic().unwrap().expression,
            p("D*id(aind(bis(4,2),bis(4,4)))")
        );

        let closed = leaf("gamma(aind(mink(D,1),bis(4,4),bis(4,2)))");
        let swapped = contract_structured(&a, &closed).unwrap().unwrap();
        assert_eq!(
            swapped.try_as_symbolic().unwrap().expression,
            p("D*id(aind(bis(4,4),bis(4,3)))")
        );

        let x = leaf("gamma(aind(mink(4,1),bis(4,2),bis(4,3)))");
        let y = leaf("gamma(aind(mink(4,5),bis(4,3),bis(4,2)))");
        let out = contract_structured(&x, &y).unwrap().unwrap();
        assert_eq!(
            out.try_as_symbolic().unwrap().expression,
            p("4*metric(aind(mink(4,1),mink(4,5)))")
        );
    }

    #[test]
    fn traces_of_library_tensors() {
        let g = leaf("gamma(aind(mink(4,1),bis(4,2),bis(4,2)))");
        let t = trace_structured(g.try_as_symbolic().unwrap())
            .unwrap()
            .unwrap();
        assert!(t.expression.is_zero());
        assert_eq!(t.structure.order(), 1);

        let pm = leaf("projm(aind(bis(4,2),bis(4,2)))");
        let t = trace_structured(pm.try_as_symbolic().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(t.expression, Atom::num(2));
    }

    #[test]
    fn four_gamma_trace() {
        let chain = p("gamma(aind(mink(4,a),bis(4,1),bis(4,2)))*gamma(aind(mink(4,b),bis(4,2),bis(4,3)))*gamma(aind(mink(4,c),bis(4,3),bis(4,4)))*gamma(aind(mink(4,d),bis(4,4),bis(4,1)))");
        let expected = p("4*metric(aind(mink(4,a),mink(4,b)))*metric(aind(mink(4,c),mink(4,d)))-4*metric(aind(mink(4,a),mink(4,c)))*metric(aind(mink(4,b),mink(4,d)))+4*metric(aind(mink(4,a),mink(4,d)))*metric(aind(mink(4,b),mink(4,c)))");
        assert_eq!(dirac_trace(&chain).unwrap(), expected);
    }

    #[test]
    fn contracted_trace() {
        let chain = p("gamma(aind(mink(4,a),bis(4,1),bis(4,2)))*gamma(aind(mink(4,a),bis(4,2),bis(4,1)))");
        assert_eq!(dirac_trace(&chain).unwrap(), Atom::num(16));

        let odd = p("gamma(aind(mink(4,a),bis(4,1),bis(4,1)))");
        assert_eq!(dirac_trace(&odd).unwrap(), Atom::zero());

        let open = p("gamma(aind(mink(4,a),bis(4,1),bis(4,2)))*W(aind(bis(4,1)))");
        assert!(matches!(dirac_trace(&open), Err(GammaError::OpenChain(_))));
    }

    #[test]
    fn kronecker_simplification() {
        let expr = p("metric(aind(mink(4,a),mink(4,b)))*P(aind(mink(4,a)))*Q(aind(mink(4,b)))");
        assert_eq!(
            simplify_kronecker(&expr).unwrap(),
            p("P(aind(mink(4,b)))*Q(aind(mink(4,b)))")
        );
        let squared = p("metric(aind(mink(D,a),mink(D,b)))^2");
        assert_eq!(simplify_kronecker(&squared).unwrap(), p("D"));
    }
}
