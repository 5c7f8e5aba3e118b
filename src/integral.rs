//! Interface to an external loop-integral engine, and the Laurent series in
//! the dimensional regulator that such engines return.

use std::fmt::Display;

use indexmap::IndexMap;

use crate::{
    complex::Complex,
    symbolic::{Atom, AtomKind},
};

/// Symbol of the dimensional regulator.
pub const EPSILON: &str = "ε";

/// An engine that canonicalises, reduces and evaluates loop integrals written
/// as expressions.
pub trait LoopIntegralBackend {
    fn to_canonical(&self, expr: &Atom, short_form: bool) -> anyhow::Result<Atom>;

    fn tensor_reduce(&self, expr: &Atom) -> anyhow::Result<Atom>;

    fn evaluate_integral(&self, expr: &Atom) -> anyhow::Result<Atom>;

    /// The value and, when the engine provides one, its error estimate.
    fn numerical_evaluation(
        &self,
        expr: &Atom,
        params: &IndexMap<String, f64>,
    ) -> anyhow::Result<(NumericalEvaluationResult, Option<NumericalEvaluationResult>)>;

    /// Canonical form, reduction and evaluation in one go.
    fn evaluate(&self, expr: &Atom) -> anyhow::Result<Atom> {
        let canonical = self.to_canonical(expr, false)?;
        let reduced = self.tensor_reduce(&canonical)?;
        self.evaluate_integral(&reduced)
    }
}

/// Coefficients of `ε^k`, sorted by `k`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumericalEvaluationResult(pub Vec<(i64, Complex<f64>)>);

impl NumericalEvaluationResult {
    pub fn new(mut terms: Vec<(i64, Complex<f64>)>) -> Self {
        terms.sort_by_key(|(k, _)| *k);
        NumericalEvaluationResult(terms)
    }

    /// Reads a polynomial in `epsilon` with numerical coefficients.
    pub fn from_expression(expr: &Atom, epsilon: &str) -> anyhow::Result<Self> {
        let eps = Atom::var(epsilon);
        let mut terms: IndexMap<i64, Complex<f64>> = IndexMap::new();
        let expanded = expr.expand();
        let summands = match expanded.kind() {
            AtomKind::Add(terms) => terms.clone(),
            _ => vec![expanded.clone()],
        };
        for term in &summands {
            let (power, coefficient) = split_power(term, &eps)?;
            if coefficient.contains(&eps) {
                anyhow::bail!("{term} is not a monomial in {epsilon}");
            }
            let value = coefficient.to_complex()?;
            *terms.entry(power).or_insert(Complex::zero()) += value;
        }
        Ok(NumericalEvaluationResult::new(terms.into_iter().collect()))
    }

    pub fn to_expression(&self, epsilon: &str) -> anyhow::Result<Atom> {
        let eps = Atom::var(epsilon);
        let terms = self
            .0
            .iter()
            .map(|(k, c)| {
                let coefficient = Atom::from_f64(c.re)? + Atom::from_f64(c.im)? * Atom::i();
                Ok(coefficient * eps.powi(*k)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Atom::add_all(terms))
    }

    pub fn to_list(&self) -> Vec<(i64, (f64, f64))> {
        self.0.iter().map(|(k, c)| (*k, (c.re, c.im))).collect()
    }

    pub fn get(&self, power: i64) -> Complex<f64> {
        self.0
            .iter()
            .find(|(k, _)| *k == power)
            .map_or(Complex::zero(), |(_, c)| *c)
    }

    /// Compares order by order, real and imaginary parts separately.
    ///
    /// With an error estimate, a difference passes when it lies within
    /// `max_pull` standard deviations. Without one, the relative difference
    /// must stay below `relative_threshold`. The message lists every failure.
    pub fn does_approx_match(
        &self,
        other: &NumericalEvaluationResult,
        error: Option<&NumericalEvaluationResult>,
        relative_threshold: f64,
        max_pull: f64,
    ) -> (bool, String) {
        let mut powers: Vec<i64> = self.0.iter().chain(&other.0).map(|(k, _)| *k).collect();
        powers.sort_unstable();
        powers.dedup();

        let mut failures = Vec::new();
        for k in powers {
            let (a, b) = (self.get(k), other.get(k));
            let err = error.map(|e| e.get(k));
            for (part, x, y, sigma) in [
                ("real", a.re, b.re, err.map(|e| e.re)),
                ("imaginary", a.im, b.im, err.map(|e| e.im)),
            ] {
                let diff = (x - y).abs();
                let ok = match sigma {
                    Some(s) if s > 0.0 => diff / s <= max_pull,
                    _ => {
                        let scale = x.abs().max(y.abs());
                        scale == 0.0 || diff / scale <= relative_threshold
                    }
                };
                if !ok {
                    failures.push(format!(
                        "{part} part of the ε^{k} coefficient differs: {x:e} vs {y:e}"
                    ));
                }
            }
        }

        if failures.is_empty() {
            (true, "results match".to_string())
        } else {
            (false, failures.join("\n"))
        }
    }

    /// [`does_approx_match`](Self::does_approx_match) with the usual pull of three.
    pub fn compare_to(
        &self,
        other: &NumericalEvaluationResult,
        relative_threshold: f64,
        error: Option<&NumericalEvaluationResult>,
    ) -> (bool, String) {
        self.does_approx_match(other, error, relative_threshold, 3.0)
    }
}

fn split_power(term: &Atom, eps: &Atom) -> anyhow::Result<(i64, Atom)> {
    let power_of = |factor: &Atom| -> anyhow::Result<Option<i64>> {
        if factor == eps {
            return Ok(Some(1));
        }
        if let AtomKind::Pow(base, exp) = factor.kind() {
            if base == eps {
                return exp
                    .as_integer()
                    .map(Some)
                    .ok_or_else(|| anyhow::anyhow!("non-integer power {factor}"));
            }
        }
        Ok(None)
    };

    let factors = match term.kind() {
        AtomKind::Mul(factors) => factors.clone(),
        _ => vec![term.clone()],
    };
    let mut power = 0;
    let mut rest = Vec::with_capacity(factors.len());
    for f in factors {
        match power_of(&f)? {
            Some(k) => power += k,
            None => rest.push(f),
        }
    }
    Ok((power, Atom::mul_all(rest)))
}

/// A series printed in a named regulator, see [`NumericalEvaluationResult::display`].
pub struct SeriesDisplay<'a> {
    series: &'a NumericalEvaluationResult,
    epsilon: &'a str,
}

impl Display for SeriesDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (k, c)) in self.series.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "({c}) {}^{k}", self.epsilon)?;
        }
        Ok(())
    }
}

impl NumericalEvaluationResult {
    /// Prints the series in `epsilon`, matching [`to_expression`](Self::to_expression).
    pub fn display<'a>(&'a self, epsilon: &'a str) -> SeriesDisplay<'a> {
        SeriesDisplay {
            series: self,
            epsilon,
        }
    }
}

/// Prints the series in [`EPSILON`].
impl Display for NumericalEvaluationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display(EPSILON).fmt(f)
    }
}
