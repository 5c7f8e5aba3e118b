use std::collections::BTreeMap;

use num::{BigInt, BigRational, Integer, One, Signed, ToPrimitive, Zero};

use super::{Atom, AtomKind, DomainError};

/// Integer powers of numbers above this exponent are kept symbolic.
const MAX_EXACT_EXPONENT: i32 = 1024;

pub(super) fn raw_pow(base: Atom, exp: Atom) -> Atom {
    Atom::raw(AtomKind::Pow(base, exp))
}

fn number(n: BigRational) -> Atom {
    Atom::raw(AtomKind::Num(n))
}

/// Splits `c*rest` into its rational coefficient and the remaining product.
fn split_coefficient(term: &Atom) -> (BigRational, Atom) {
    if let AtomKind::Mul(factors) = term.kind() {
        if let Some(c) = factors[0].as_num() {
            let rest = if factors.len() == 2 {
                factors[1].clone()
            } else {
                Atom::raw(AtomKind::Mul(factors[1..].to_vec()))
            };
            return (c.clone(), rest);
        }
    }
    (BigRational::one(), term.clone())
}

fn with_coefficient(c: BigRational, rest: Atom) -> Atom {
    if c.is_one() {
        return rest;
    }
    match rest.kind() {
        AtomKind::Mul(factors) => {
            let mut all = Vec::with_capacity(factors.len() + 1);
            all.push(number(c));
            all.extend(factors.iter().cloned());
            Atom::raw(AtomKind::Mul(all))
        }
        _ => Atom::raw(AtomKind::Mul(vec![number(c), rest])),
    }
}

pub(super) fn add(terms: impl IntoIterator<Item = Atom>) -> Atom {
    let mut stack: Vec<Atom> = terms.into_iter().collect();
    let mut constant = BigRational::zero();
    let mut collected: BTreeMap<Atom, BigRational> = BTreeMap::new();

    while let Some(term) = stack.pop() {
        match term.kind() {
            AtomKind::Add(inner) => stack.extend(inner.iter().cloned()),
            AtomKind::Num(n) => constant += n,
            _ => {
                let (c, rest) = split_coefficient(&term);
                *collected.entry(rest).or_insert_with(BigRational::zero) += c;
            }
        }
    }

    let mut out = Vec::with_capacity(collected.len() + 1);
    if !constant.is_zero() {
        out.push(number(constant));
    }
    out.extend(
        collected
            .into_iter()
            .filter(|(_, c)| !c.is_zero())
            .map(|(rest, c)| with_coefficient(c, rest)),
    );
    // a sum whose coefficient collected to one is spliced back in
    if out.iter().any(|t| matches!(t.kind(), AtomKind::Add(_))) {
        return add(out);
    }
    out.sort();

    match out.len() {
        0 => Atom::zero(),
        1 => out.swap_remove(0),
        _ => Atom::raw(AtomKind::Add(out)),
    }
}

pub(super) fn mul(factors: impl IntoIterator<Item = Atom>) -> Atom {
    let mut stack: Vec<Atom> = factors.into_iter().collect();
    let mut coefficient = BigRational::one();
    let mut powers: BTreeMap<Atom, Vec<Atom>> = BTreeMap::new();

    while let Some(factor) = stack.pop() {
        match factor.kind() {
            AtomKind::Mul(inner) => stack.extend(inner.iter().cloned()),
            AtomKind::Num(n) => coefficient = &coefficient * n,
            AtomKind::Pow(base, exp) => powers.entry(base.clone()).or_default().push(exp.clone()),
            _ => powers.entry(factor.clone()).or_default().push(Atom::one()),
        }
    }

    if coefficient.is_zero() {
        return Atom::zero();
    }

    let mut out = Vec::with_capacity(powers.len() + 1);
    let mut needs_merge = false;
    for (base, exps) in powers {
        let exp = add(exps);
        let is_unit = base.as_var().is_some_and(|s| s.is_imaginary_unit());
        let power = pow(&base, &exp).unwrap_or_else(|_| raw_pow(base, exp));
        match power.kind() {
            AtomKind::Num(n) => coefficient = &coefficient * n,
            AtomKind::Mul(inner) => {
                needs_merge |= !is_unit;
                for f in inner {
                    match f.kind() {
                        AtomKind::Num(n) => coefficient = &coefficient * n,
                        _ => out.push(f.clone()),
                    }
                }
            }
            _ => out.push(power),
        }
    }

    if coefficient.is_zero() {
        return Atom::zero();
    }

    if needs_merge {
        // powers of products may have produced bases that already occur
        out.push(number(coefficient));
        return mul(out);
    }

    out.sort();
    if !coefficient.is_one() {
        if out.is_empty() {
            return number(coefficient);
        }
        out.insert(0, number(coefficient));
    }

    match out.len() {
        0 => Atom::one(),
        1 => out.swap_remove(0),
        _ => Atom::raw(AtomKind::Mul(out)),
    }
}

fn imaginary_power(n: &BigInt) -> Atom {
    match n.mod_floor(&BigInt::from(4)).to_u8() {
        Some(0) => Atom::one(),
        Some(1) => Atom::i(),
        Some(2) => Atom::num(-1),
        _ => Atom::raw(AtomKind::Mul(vec![Atom::num(-1), Atom::i()])),
    }
}

pub(super) fn pow(base: &Atom, exp: &Atom) -> Result<Atom, DomainError> {
    if exp.is_zero() || base.is_one() {
        return Ok(Atom::one());
    }
    if exp.is_one() {
        return Ok(base.clone());
    }
    if base.is_zero() {
        return match exp.as_num() {
            Some(e) if e.is_negative() => Err(DomainError::DivisionByZero),
            Some(_) => Ok(Atom::zero()),
            None => Ok(raw_pow(base.clone(), exp.clone())),
        };
    }

    let Some(n) = exp.as_num().filter(|e| e.is_integer()).map(|e| e.to_integer()) else {
        return Ok(raw_pow(base.clone(), exp.clone()));
    };

    match base.kind() {
        AtomKind::Num(b) => match n.to_i32() {
            Some(small) if small.abs() <= MAX_EXACT_EXPONENT => Ok(number(b.pow(small))),
            _ => Ok(raw_pow(base.clone(), exp.clone())),
        },
        AtomKind::Var(s) if s.is_imaginary_unit() => Ok(imaginary_power(&n)),
        AtomKind::Pow(inner_base, inner_exp) => {
            let combined = inner_exp * exp;
            pow(inner_base, &combined)
        }
        AtomKind::Mul(factors) => {
            let powered = factors
                .iter()
                .map(|f| pow(f, exp))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(mul(powered))
        }
        _ => Ok(raw_pow(base.clone(), exp.clone())),
    }
}
