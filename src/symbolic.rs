//! Canonical symbolic expressions.
//!
//! An [`Atom`] is an immutable, reference counted expression tree. Every
//! constructor returns the canonical form, so two atoms that are equal up to
//! reordering of commutative operations compare (and hash) equal.
//!
//! ```
//! # use symtensor::symbolic::{parse, Atom};
//! let a = parse("x*y + 2*x*y").unwrap();
//! let b = parse("3*y*x").unwrap();
//! assert_eq!(a, b);
//! ```

mod normalize;
mod parse;
mod replace;
mod transform;

pub use parse::{parse, ParseError};
pub use replace::Bindings;

use std::{
    fmt::{self, Debug, Display},
    ops::{Add, Mul, Neg, Sub},
    sync::Arc,
};

use duplicate::duplicate;
use num::{BigInt, BigRational, FromPrimitive, One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;
use thiserror::Error;

use crate::utils::stable_hash;

/// Name of the imaginary unit. Integer powers of it are reduced during canonicalisation.
pub const IMAGINARY_UNIT: &str = "𝑖";

/// Functions with a known numerical implementation and derivative.
pub const BUILTIN_FUNCTIONS: [&str; 6] = ["exp", "log", "sin", "cos", "sqrt", "conj"];

/// A symbol name. Symbols are ordered lexicographically.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(SmartString);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn imaginary_unit() -> Self {
        Symbol::new(IMAGINARY_UNIT)
    }

    pub fn is_imaginary_unit(&self) -> bool {
        self.as_str() == IMAGINARY_UNIT
    }

    /// Symbols ending in an underscore act as wildcards in patterns.
    pub fn is_wildcard(&self) -> bool {
        self.0.len() > 1 && self.0.ends_with('_')
    }

    pub fn is_builtin_function(&self) -> bool {
        BUILTIN_FUNCTIONS.contains(&self.as_str())
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol::new(value)
    }
}

/// The node types of an expression tree.
///
/// The variant order is the canonical order of terms: numbers, symbols, then
/// compound expressions.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AtomKind {
    Num(BigRational),
    Var(Symbol),
    Fun(Symbol, Vec<Atom>),
    Pow(Atom, Atom),
    Mul(Vec<Atom>),
    Add(Vec<Atom>),
}

/// An immutable expression in canonical form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "AtomKind", into = "AtomKind")]
pub struct Atom(Arc<AtomKind>);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0} is not a variable, cannot differentiate with respect to it")]
    NotAVariable(Atom),
    #[error("function {0} has no symbolic derivative")]
    NotDifferentiable(Symbol),
    #[error("{0} is not a finite number")]
    NotFinite(f64),
}

impl From<AtomKind> for Atom {
    fn from(kind: AtomKind) -> Self {
        match kind {
            AtomKind::Num(n) => Atom::rational(n),
            AtomKind::Var(s) => Atom::sym(s),
            AtomKind::Fun(name, args) => Atom::fun_sym(name, args),
            AtomKind::Pow(base, exp) => {
                normalize::pow(&base, &exp).unwrap_or_else(|_| normalize::raw_pow(base, exp))
            }
            AtomKind::Mul(factors) => Atom::mul_all(factors),
            AtomKind::Add(terms) => Atom::add_all(terms),
        }
    }
}

impl From<Atom> for AtomKind {
    fn from(atom: Atom) -> Self {
        atom.kind().clone()
    }
}

impl Atom {
    pub(crate) fn raw(kind: AtomKind) -> Atom {
        Atom(Arc::new(kind))
    }

    pub fn kind(&self) -> &AtomKind {
        &self.0
    }

    pub fn zero() -> Atom {
        Atom::raw(AtomKind::Num(BigRational::zero()))
    }

    pub fn one() -> Atom {
        Atom::raw(AtomKind::Num(BigRational::one()))
    }

    /// The imaginary unit `𝑖`.
    pub fn i() -> Atom {
        Atom::sym(Symbol::imaginary_unit())
    }

    pub fn num(n: impl Into<BigInt>) -> Atom {
        Atom::raw(AtomKind::Num(BigRational::from_integer(n.into())))
    }

    pub fn rational(r: BigRational) -> Atom {
        Atom::raw(AtomKind::Num(r))
    }

    pub fn new_frac(num: i64, den: i64) -> Result<Atom, DomainError> {
        if den == 0 {
            return Err(DomainError::DivisionByZero);
        }
        Ok(Atom::rational(BigRational::new(num.into(), den.into())))
    }

    /// Exact rational value of a finite float.
    pub fn from_f64(value: f64) -> Result<Atom, DomainError> {
        BigRational::from_f64(value)
            .map(Atom::rational)
            .ok_or(DomainError::NotFinite(value))
    }

    pub fn var(name: &str) -> Atom {
        Atom::sym(Symbol::new(name))
    }

    pub fn sym(symbol: Symbol) -> Atom {
        Atom::raw(AtomKind::Var(symbol))
    }

    pub fn fun(name: &str, args: impl IntoIterator<Item = Atom>) -> Atom {
        Atom::fun_sym(Symbol::new(name), args)
    }

    pub fn fun_sym(name: Symbol, args: impl IntoIterator<Item = Atom>) -> Atom {
        Atom::raw(AtomKind::Fun(name, args.into_iter().collect()))
    }

    pub fn add_all(terms: impl IntoIterator<Item = Atom>) -> Atom {
        normalize::add(terms)
    }

    pub fn mul_all(factors: impl IntoIterator<Item = Atom>) -> Atom {
        normalize::mul(factors)
    }

    /// `self^exp`, failing for a zero base with a negative exponent.
    pub fn pow(&self, exp: &Atom) -> Result<Atom, DomainError> {
        normalize::pow(self, exp)
    }

    pub fn powi(&self, exp: i64) -> Result<Atom, DomainError> {
        self.pow(&Atom::num(exp))
    }

    pub fn checked_div(&self, rhs: &Atom) -> Result<Atom, DomainError> {
        if rhs.is_zero() {
            return Err(DomainError::DivisionByZero);
        }
        Ok(self * &rhs.powi(-1)?)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.kind(), AtomKind::Num(n) if n.is_zero())
    }

    pub fn is_one(&self) -> bool {
        matches!(self.kind(), AtomKind::Num(n) if n.is_one())
    }

    pub fn as_num(&self) -> Option<&BigRational> {
        match self.kind() {
            AtomKind::Num(n) => Some(n),
            _ => None,
        }
    }

    /// The value of an integer number that fits an `i64`.
    pub fn as_integer(&self) -> Option<i64> {
        self.as_num()
            .filter(|n| n.is_integer())
            .and_then(|n| n.to_integer().to_i64())
    }

    pub fn as_var(&self) -> Option<&Symbol> {
        match self.kind() {
            AtomKind::Var(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fun(&self) -> Option<(&Symbol, &[Atom])> {
        match self.kind() {
            AtomKind::Fun(name, args) => Some((name, args.as_slice())),
            _ => None,
        }
    }

    /// Direct sub-expressions, in canonical order.
    pub fn children(&self) -> Vec<&Atom> {
        match self.kind() {
            AtomKind::Num(_) | AtomKind::Var(_) => vec![],
            AtomKind::Fun(_, args) => args.iter().collect(),
            AtomKind::Pow(b, e) => vec![b, e],
            AtomKind::Mul(items) | AtomKind::Add(items) => items.iter().collect(),
        }
    }

    pub fn contains(&self, target: &Atom) -> bool {
        self == target || self.children().into_iter().any(|c| c.contains(target))
    }

    /// All symbols appearing as variables (not function names).
    pub fn variables(&self) -> indexmap::IndexSet<Symbol> {
        let mut out = indexmap::IndexSet::new();
        self.collect_variables(&mut out);
        out.sort();
        out
    }

    fn collect_variables(&self, out: &mut indexmap::IndexSet<Symbol>) {
        if let AtomKind::Var(s) = self.kind() {
            out.insert(s.clone());
        }
        for c in self.children() {
            c.collect_variables(out);
        }
    }

    /// Deterministic hash of the canonical form, stable within a build.
    pub fn canonical_hash(&self) -> u64 {
        stable_hash(self)
    }

    fn precedence(&self) -> u8 {
        match self.kind() {
            AtomKind::Add(_) => 1,
            AtomKind::Mul(_) => 2,
            AtomKind::Num(n) if n.is_negative() || !n.is_integer() => 2,
            AtomKind::Pow(..) => 3,
            _ => 4,
        }
    }

    fn fmt_factor(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.precedence() < 2 {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

fn fmt_rational(n: &BigRational, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_integer() {
        write!(f, "{}", n.numer())
    } else {
        write!(f, "{}/{}", n.numer(), n.denom())
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            AtomKind::Num(n) => fmt_rational(n, f),
            AtomKind::Var(s) => write!(f, "{s}"),
            AtomKind::Fun(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            AtomKind::Pow(base, exp) => {
                if base.precedence() < 4 {
                    write!(f, "({base})")?;
                } else {
                    write!(f, "{base}")?;
                }
                f.write_str("^")?;
                match exp.kind() {
                    AtomKind::Var(_) | AtomKind::Fun(..) => write!(f, "{exp}"),
                    AtomKind::Num(n) if n.is_integer() && !n.is_negative() => write!(f, "{exp}"),
                    _ => write!(f, "({exp})"),
                }
            }
            AtomKind::Mul(factors) => {
                let mut rest = factors.as_slice();
                if let Some(n) = factors.first().and_then(Atom::as_num) {
                    rest = &factors[1..];
                    if n == &-BigRational::one() {
                        f.write_str("-")?;
                    } else {
                        fmt_rational(n, f)?;
                        f.write_str("*")?;
                    }
                }
                for (i, factor) in rest.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    factor.fmt_factor(f)?;
                }
                Ok(())
            }
            AtomKind::Add(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    let printed = term.to_string();
                    if i > 0 && !printed.starts_with('-') {
                        f.write_str("+")?;
                    }
                    f.write_str(&printed)?;
                }
                Ok(())
            }
        }
    }
}

impl Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::str::FromStr for Atom {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

duplicate! {
    [
        lhs_type rhs_type;
        [Atom] [Atom];
        [&Atom] [&Atom];
        [Atom] [&Atom];
        [&Atom] [Atom];
    ]
    impl Add<rhs_type> for lhs_type {
        type Output = Atom;
        fn add(self, rhs: rhs_type) -> Atom {
            Atom::add_all([self.to_owned(), rhs.to_owned()])
        }
    }

    impl Sub<rhs_type> for lhs_type {
        type Output = Atom;
        fn sub(self, rhs: rhs_type) -> Atom {
            Atom::add_all([self.to_owned(), -rhs.to_owned()])
        }
    }

    impl Mul<rhs_type> for lhs_type {
        type Output = Atom;
        fn mul(self, rhs: rhs_type) -> Atom {
            Atom::mul_all([self.to_owned(), rhs.to_owned()])
        }
    }
}

impl Neg for Atom {
    type Output = Atom;
    fn neg(self) -> Atom {
        Atom::mul_all([Atom::num(-1), self])
    }
}

impl Neg for &Atom {
    type Output = Atom;
    fn neg(self) -> Atom {
        -self.clone()
    }
}

duplicate! {
    [int_type; [i32]; [i64]; [usize]; [u32]]
    impl From<int_type> for Atom {
        fn from(value: int_type) -> Self {
            Atom::num(value)
        }
    }
}

impl From<BigRational> for Atom {
    fn from(value: BigRational) -> Self {
        Atom::rational(value)
    }
}

impl From<Symbol> for Atom {
    fn from(value: Symbol) -> Self {
        Atom::sym(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Atom {
        parse(s).unwrap()
    }

    #[test]
    fn parse_is_deterministic() {
        let text = "gamma(aind(loru(4,3),bis(4,2),bis(4,13)))*(P(2,aind(lord(4,11)))+mq)*W(1,aind(bis(4,2)))";
        assert_eq!(p(text), p(text));
        assert_eq!(p(text).canonical_hash(), p(text).canonical_hash());
    }

    #[test]
    fn commutative_reordering() {
        assert_eq!(p("a+b+c"), p("c+a+b"));
        assert_eq!(p("a*b*f(x)"), p("f(x)*b*a"));
        assert_eq!(p("(x+y)*(y+x)"), p("(y+x)^2"));
        assert_ne!(p("f(a,b)"), p("f(b,a)"));
    }

    #[test]
    fn collects_like_terms_and_factors() {
        assert_eq!(p("x+2*x-3*x"), Atom::zero());
        assert_eq!(p("x*x*x^a"), p("x^(a+2)"));
        assert_eq!(p("2*3*x/6"), p("x"));
        assert_eq!(p("x^0"), Atom::one());
        assert_eq!(p("(2*x)^2"), p("4*x^2"));
        assert_eq!(p("(x^2)^3"), p("x^6"));
    }

    #[test]
    fn collected_sums_are_flattened() {
        let collected = p("x+2*(a+b)-(a+b)");
        assert_eq!(collected, p("x+a+b"));
        let AtomKind::Add(terms) = collected.kind() else {
            panic!("expected sum")
        };
        assert!(terms.iter().all(|t| !matches!(t.kind(), AtomKind::Add(_))));
        assert_eq!(p(&collected.to_string()), collected);
        assert_eq!(p("3*(a+2*(b+c))-2*(b+c)-2*a"), p("a+4*(b+c)"));
    }

    #[test]
    fn canonical_order() {
        let a = p("f(x)+y+3+x^2");
        let AtomKind::Add(terms) = a.kind() else {
            panic!("expected sum")
        };
        assert_eq!(terms[0], Atom::num(3));
        assert_eq!(terms[1], Atom::var("y"));
        assert_eq!(terms[2], p("f(x)"));
        assert_eq!(terms[3], p("x^2"));
    }

    #[test]
    fn imaginary_unit_powers() {
        assert_eq!(p("𝑖*𝑖"), Atom::num(-1));
        assert_eq!(p("𝑖^3"), p("-𝑖"));
        assert_eq!(p("(2*𝑖)^4"), Atom::num(16));
        assert_eq!(p("(1+𝑖)*(1-𝑖)").expand(), Atom::num(2));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            Atom::var("x").checked_div(&Atom::zero()),
            Err(DomainError::DivisionByZero)
        );
        assert_eq!(Atom::zero().powi(-2), Err(DomainError::DivisionByZero));
        assert!(matches!(
            parse("1/(x-x)"),
            Err(ParseError::Domain(DomainError::DivisionByZero))
        ));
    }

    #[test]
    fn display_reparses() {
        for text in [
            "-x^2+3/2*y-f(a,-b)",
            "2^(1/2)*x^(-1)",
            "(a+b)^c*(x-y)",
            "-(1/3)*x*𝑖",
            "gamma(aind(loru(4,mu),bis(4,1),bis(4,2)))",
            "(x^a)^(1/2)",
        ] {
            let atom = p(text);
            assert_eq!(p(&atom.to_string()), atom, "{text} printed as {atom}");
        }
    }

    #[test]
    fn display_snapshot() {
        insta::assert_snapshot!(p("b+a*2+a").to_string(), @"b+3*a");
        insta::assert_snapshot!(p("x-1/2*y^2").to_string(), @"x-1/2*y^2");
    }

    #[test]
    fn operators() {
        let x = Atom::var("x");
        let y = Atom::var("y");
        assert_eq!(&x + &y - &x, y);
        assert_eq!((&x * &y) * Atom::num(2), p("2*x*y"));
        assert_eq!(-(-x.clone()), x);
        assert_eq!(Atom::from_f64(0.25).unwrap(), Atom::new_frac(1, 4).unwrap());
        assert!(matches!(
            Atom::from_f64(f64::NAN),
            Err(DomainError::NotFinite(_))
        ));
    }

    #[test]
    fn serde_roundtrip_keeps_canonical_form() {
        let atom = p("3*x*f(y)+z^2");
        let json = serde_json::to_string(&atom).unwrap();
        let back: Atom = serde_json::from_str(&json).unwrap();
        assert_eq!(atom, back);
    }
}
