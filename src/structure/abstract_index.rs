use num::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::symbolic::{Atom, AtomKind, Symbol};

pub const ABSTRACTIND: &str = "aind";

/// A type that represents the name of an index in a tensor.
///
/// Two slots anywhere in a network that carry the same label refer to the same
/// index.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AbstractIndex {
    Normal(usize),
    Symbol(Symbol),
}

impl AbstractIndex {
    pub fn to_atom(&self) -> Atom {
        match self {
            AbstractIndex::Normal(v) => Atom::num(*v),
            AbstractIndex::Symbol(s) => Atom::sym(s.clone()),
        }
    }
}

impl std::fmt::Display for AbstractIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbstractIndex::Normal(v) => write!(f, "{v}"),
            AbstractIndex::Symbol(v) => write!(f, "{v}"),
        }
    }
}

impl From<usize> for AbstractIndex {
    fn from(value: usize) -> Self {
        AbstractIndex::Normal(value)
    }
}

impl From<Symbol> for AbstractIndex {
    fn from(value: Symbol) -> Self {
        AbstractIndex::Symbol(value)
    }
}

impl From<&str> for AbstractIndex {
    fn from(value: &str) -> Self {
        AbstractIndex::Symbol(Symbol::new(value))
    }
}

impl TryFrom<&Atom> for AbstractIndex {
    type Error = Atom;

    fn try_from(atom: &Atom) -> Result<Self, Self::Error> {
        match atom.kind() {
            AtomKind::Num(n) if n.is_integer() => n
                .to_integer()
                .to_usize()
                .map(AbstractIndex::Normal)
                .ok_or_else(|| atom.clone()),
            AtomKind::Var(s) => Ok(AbstractIndex::Symbol(s.clone())),
            _ => Err(atom.clone()),
        }
    }
}
