use super::{Atom, AtomKind, DomainError};

/// Expanded terms of a product of two already expanded atoms.
fn distribute(a: &Atom, b: &Atom) -> Atom {
    let terms = |x: &Atom| match x.kind() {
        AtomKind::Add(ts) => ts.clone(),
        _ => vec![x.clone()],
    };
    let rhs = terms(b);
    Atom::add_all(
        terms(a)
            .iter()
            .flat_map(|l| rhs.iter().map(move |r| l * r))
            .collect::<Vec<_>>(),
    )
}

fn expand_product(factors: impl IntoIterator<Item = Atom>) -> Atom {
    factors
        .into_iter()
        .fold(Atom::one(), |acc, f| distribute(&acc, &f))
}

impl Atom {
    /// Distributes products over sums, including positive integer powers of sums.
    pub fn expand(&self) -> Atom {
        match self.kind() {
            AtomKind::Num(_) | AtomKind::Var(_) => self.clone(),
            AtomKind::Fun(name, args) => Atom::fun_sym(name.clone(), args.iter().map(Atom::expand)),
            AtomKind::Add(terms) => Atom::add_all(terms.iter().map(Atom::expand)),
            AtomKind::Mul(factors) => expand_product(factors.iter().map(Atom::expand)),
            AtomKind::Pow(base, exp) => {
                let base = base.expand();
                let exp = exp.expand();
                match (base.kind(), exp.as_integer()) {
                    (AtomKind::Add(_), Some(n)) if n > 0 => {
                        expand_product(std::iter::repeat(base.clone()).take(n as usize))
                    }
                    _ => match base.pow(&exp) {
                        Ok(p) if matches!(p.kind(), AtomKind::Mul(_)) && p != *self => p.expand(),
                        Ok(p) => p,
                        Err(_) => Atom::raw(AtomKind::Pow(base, exp)),
                    },
                }
            }
        }
    }

    /// Derivative with respect to a symbol or a function leaf.
    ///
    /// `exp`, `log`, `sin`, `cos` and `sqrt` are differentiated with the chain rule.
    /// Any other function depending on `x` yields [`DomainError::NotDifferentiable`].
    pub fn derivative(&self, x: &Atom) -> Result<Atom, DomainError> {
        match x.kind() {
            AtomKind::Var(_) | AtomKind::Fun(..) => self.derivative_wrt(x),
            _ => Err(DomainError::NotAVariable(x.clone())),
        }
    }

    fn derivative_wrt(&self, x: &Atom) -> Result<Atom, DomainError> {
        if self == x {
            return Ok(Atom::one());
        }
        if !self.contains(x) {
            return Ok(Atom::zero());
        }

        Ok(match self.kind() {
            AtomKind::Num(_) | AtomKind::Var(_) => Atom::zero(),
            AtomKind::Add(terms) => Atom::add_all(
                terms
                    .iter()
                    .map(|t| t.derivative_wrt(x))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            AtomKind::Mul(factors) => {
                let mut terms = Vec::with_capacity(factors.len());
                for (i, f) in factors.iter().enumerate() {
                    let df = f.derivative_wrt(x)?;
                    if df.is_zero() {
                        continue;
                    }
                    let others = factors
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, g)| g.clone());
                    terms.push(Atom::mul_all(others.chain(std::iter::once(df))));
                }
                Atom::add_all(terms)
            }
            AtomKind::Pow(base, exp) => {
                let db = base.derivative_wrt(x)?;
                if !exp.contains(x) {
                    let lowered = base.pow(&(exp - Atom::one()))?;
                    exp * &lowered * db
                } else {
                    let de = exp.derivative_wrt(x)?;
                    let log_base = Atom::fun("log", [base.clone()]);
                    let inner = de * log_base + exp * &db * base.powi(-1)?;
                    self * &inner
                }
            }
            AtomKind::Fun(name, args) => {
                if args.len() != 1 {
                    return Err(DomainError::NotDifferentiable(name.clone()));
                }
                let arg = &args[0];
                let da = arg.derivative_wrt(x)?;
                let outer = match name.as_str() {
                    "exp" => self.clone(),
                    "log" => arg.powi(-1)?,
                    "sin" => Atom::fun("cos", [arg.clone()]),
                    "cos" => -Atom::fun("sin", [arg.clone()]),
                    "sqrt" => Atom::new_frac(1, 2)? * self.powi(-1)?,
                    _ => return Err(DomainError::NotDifferentiable(name.clone())),
                };
                outer * da
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::symbolic::{parse, Symbol};

    use super::*;

    fn p(s: &str) -> Atom {
        parse(s).unwrap()
    }

    #[test]
    fn expand_distributes() {
        assert_eq!(p("(x+y)^2").expand(), p("x^2+2*x*y+y^2"));
        assert_eq!(p("(a+b)*(c-d)").expand(), p("a*c-a*d+b*c-b*d"));
        assert_eq!(p("f((x+1)*(x-1))").expand(), p("f(x^2-1)"));
        assert_eq!(p("(x*(y+z))^2").expand(), p("x^2*y^2+2*x^2*y*z+x^2*z^2"));
    }

    #[test]
    fn polynomial_derivative() {
        let x = p("x");
        assert_eq!(p("3*x^3+2*x+7").derivative(&x).unwrap(), p("9*x^2+2"));
        assert_eq!(p("x*y").derivative(&p("y")).unwrap(), x);
    }

    #[test]
    fn chain_rule() {
        let x = p("x");
        assert_eq!(
            p("sin(x^2)").derivative(&x).unwrap(),
            p("2*x*cos(x^2)")
        );
        assert_eq!(p("exp(2*x)").derivative(&x).unwrap(), p("2*exp(2*x)"));
        assert_eq!(p("log(x)").derivative(&x).unwrap(), p("x^(-1)"));
    }

    #[test]
    fn derivative_wrt_function_leaf() {
        let leaf = p("W(1,cind(0))");
        let expr = p("W(1,cind(0))^2*mq");
        assert_eq!(expr.derivative(&leaf).unwrap(), p("2*mq*W(1,cind(0))"));
    }

    #[test]
    fn derivative_errors() {
        assert_eq!(
            p("f(x)").derivative(&p("x")),
            Err(DomainError::NotDifferentiable(Symbol::new("f")))
        );
        assert!(matches!(
            p("x").derivative(&p("x+1")),
            Err(DomainError::NotAVariable(_))
        ));
        assert_eq!(p("f(y)").derivative(&p("x")).unwrap(), Atom::zero());
    }
}
