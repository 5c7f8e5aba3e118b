use indexmap::IndexMap;

use super::{Atom, AtomKind, DomainError, Symbol};

/// Wildcard assignments produced by a successful match.
pub type Bindings = IndexMap<Symbol, Atom>;

fn match_atom(pattern: &Atom, target: &Atom, bindings: &mut Bindings) -> bool {
    match pattern.kind() {
        AtomKind::Var(s) if s.is_wildcard() => match bindings.get(s) {
            Some(bound) => bound == target,
            None => {
                bindings.insert(s.clone(), target.clone());
                true
            }
        },
        AtomKind::Num(_) | AtomKind::Var(_) => pattern == target,
        AtomKind::Fun(name, pattern_args) => match target.kind() {
            AtomKind::Fun(target_name, target_args)
                if name == target_name && pattern_args.len() == target_args.len() =>
            {
                let checkpoint = bindings.len();
                let ok = pattern_args
                    .iter()
                    .zip(target_args)
                    .all(|(p, t)| match_atom(p, t, bindings));
                if !ok {
                    bindings.truncate(checkpoint);
                }
                ok
            }
            _ => false,
        },
        AtomKind::Pow(pb, pe) => match target.kind() {
            AtomKind::Pow(tb, te) => {
                let checkpoint = bindings.len();
                let ok = match_atom(pb, tb, bindings) && match_atom(pe, te, bindings);
                if !ok {
                    bindings.truncate(checkpoint);
                }
                ok
            }
            _ => false,
        },
        AtomKind::Mul(pattern_items) => match target.kind() {
            AtomKind::Mul(target_items) if pattern_items.len() == target_items.len() => {
                match_multiset(pattern_items, target_items, bindings).is_some()
            }
            _ => false,
        },
        AtomKind::Add(pattern_items) => match target.kind() {
            AtomKind::Add(target_items) if pattern_items.len() == target_items.len() => {
                match_multiset(pattern_items, target_items, bindings).is_some()
            }
            _ => false,
        },
    }
}

/// Matches every pattern item against a distinct target item.
/// Returns the indices of the targets used, in pattern order.
fn match_multiset(
    patterns: &[Atom],
    targets: &[Atom],
    bindings: &mut Bindings,
) -> Option<Vec<usize>> {
    fn search(
        patterns: &[Atom],
        targets: &[Atom],
        used: &mut Vec<usize>,
        bindings: &mut Bindings,
    ) -> bool {
        let Some((first, rest)) = patterns.split_first() else {
            return true;
        };
        for (i, target) in targets.iter().enumerate() {
            if used.contains(&i) {
                continue;
            }
            let checkpoint = bindings.len();
            if match_atom(first, target, bindings) {
                used.push(i);
                if search(rest, targets, used, bindings) {
                    return true;
                }
                used.pop();
            }
            bindings.truncate(checkpoint);
        }
        false
    }

    let mut used = Vec::with_capacity(patterns.len());
    let checkpoint = bindings.len();
    if search(patterns, targets, &mut used, bindings) {
        Some(used)
    } else {
        bindings.truncate(checkpoint);
        None
    }
}

/// Rebuilds `atom` with every child mapped through `f`, renormalising.
fn rebuild(
    atom: &Atom,
    mut f: impl FnMut(&Atom) -> Result<Atom, DomainError>,
) -> Result<Atom, DomainError> {
    Ok(match atom.kind() {
        AtomKind::Num(_) | AtomKind::Var(_) => atom.clone(),
        AtomKind::Fun(name, args) => Atom::fun_sym(
            name.clone(),
            args.iter().map(&mut f).collect::<Result<Vec<_>, _>>()?,
        ),
        AtomKind::Pow(b, e) => f(b)?.pow(&f(e)?)?,
        AtomKind::Mul(items) => Atom::mul_all(items.iter().map(&mut f).collect::<Result<Vec<_>, _>>()?),
        AtomKind::Add(items) => Atom::add_all(items.iter().map(&mut f).collect::<Result<Vec<_>, _>>()?),
    })
}

fn substitute(rhs: &Atom, bindings: &Bindings) -> Result<Atom, DomainError> {
    if let AtomKind::Var(s) = rhs.kind() {
        if let Some(value) = bindings.get(s) {
            return Ok(value.clone());
        }
    }
    rebuild(rhs, |c| substitute(c, bindings))
}

impl Atom {
    /// Tries to match `pattern` against the whole of `self`.
    pub fn pattern_match(&self, pattern: &Atom) -> Option<Bindings> {
        let mut bindings = Bindings::new();
        match_atom(pattern, self, &mut bindings).then_some(bindings)
    }

    /// Replaces every occurrence of `pattern`, top-down.
    ///
    /// Symbols ending in `_` are wildcards. A product or sum pattern also matches
    /// a subset of the factors or terms of a larger product or sum.
    pub fn replace_all(&self, pattern: &Atom, rhs: &Atom) -> Result<Atom, DomainError> {
        let mut bindings = Bindings::new();
        if match_atom(pattern, self, &mut bindings) {
            return substitute(rhs, &bindings);
        }

        match (pattern.kind(), self.kind()) {
            (AtomKind::Mul(p), AtomKind::Mul(t)) | (AtomKind::Add(p), AtomKind::Add(t))
                if p.len() < t.len() =>
            {
                if let Some(used) = match_multiset(p, t, &mut bindings) {
                    let replaced = substitute(rhs, &bindings)?;
                    let rest = t
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !used.contains(i))
                        .map(|(_, a)| a.replace_all(pattern, rhs))
                        .collect::<Result<Vec<_>, _>>()?;
                    let items = std::iter::once(replaced).chain(rest);
                    return Ok(if matches!(self.kind(), AtomKind::Mul(_)) {
                        Atom::mul_all(items)
                    } else {
                        Atom::add_all(items)
                    });
                }
            }
            _ => {}
        }

        rebuild(self, |c| c.replace_all(pattern, rhs))
    }

    /// Applies several replacements in one top-down pass. The first pattern that
    /// matches a subexpression wins.
    pub fn replace_all_multiple(&self, replacements: &[(Atom, Atom)]) -> Result<Atom, DomainError> {
        for (pattern, rhs) in replacements {
            if let Some(bindings) = self.pattern_match(pattern) {
                return substitute(rhs, &bindings);
            }
        }
        rebuild(self, |c| c.replace_all_multiple(replacements))
    }

    /// Replaces exact subexpressions, no wildcards involved.
    pub fn replace_map(&self, map: &IndexMap<Atom, Atom>) -> Result<Atom, DomainError> {
        if let Some(value) = map.get(self) {
            return Ok(value.clone());
        }
        rebuild(self, |c| c.replace_map(map))
    }
}
