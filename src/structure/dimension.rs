use derive_more::Display;
use num::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::symbolic::{Atom, AtomKind, Symbol};

/// A Dimension
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, Display)]
pub enum Dimension {
    Concrete(usize),
    Symbolic(Symbol),
}

impl Dimension {
    pub fn new_concrete(value: usize) -> Self {
        Self::Concrete(value)
    }

    pub fn to_atom(&self) -> Atom {
        match self {
            Self::Concrete(c) => Atom::num(*c),
            Self::Symbolic(s) => Atom::sym(s.clone()),
        }
    }

    pub fn concrete(&self) -> Option<usize> {
        match self {
            Self::Concrete(c) => Some(*c),
            Self::Symbolic(_) => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DimensionError {
    #[error("Dimension {0} is not concrete")]
    NotConcrete(Dimension),
    #[error("{0} is not a dimension, expected a non-negative integer or a symbol")]
    Malformed(Atom),
}

impl TryFrom<&Dimension> for usize {
    type Error = DimensionError;

    fn try_from(value: &Dimension) -> Result<Self, Self::Error> {
        value
            .concrete()
            .ok_or_else(|| DimensionError::NotConcrete(value.clone()))
    }
}

impl TryFrom<&Atom> for Dimension {
    type Error = DimensionError;

    fn try_from(atom: &Atom) -> Result<Self, Self::Error> {
        match atom.kind() {
            AtomKind::Num(n) if n.is_integer() => n
                .to_integer()
                .to_usize()
                .map(Dimension::Concrete)
                .ok_or_else(|| DimensionError::Malformed(atom.clone())),
            AtomKind::Var(s) => Ok(Dimension::Symbolic(s.clone())),
            _ => Err(DimensionError::Malformed(atom.clone())),
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Dimension::Concrete(value)
    }
}

impl From<Symbol> for Dimension {
    fn from(value: Symbol) -> Self {
        Dimension::Symbolic(value)
    }
}

impl PartialEq<usize> for Dimension {
    fn eq(&self, other: &usize) -> bool {
        self.concrete() == Some(*other)
    }
}

impl PartialEq<Dimension> for usize {
    fn eq(&self, other: &Dimension) -> bool {
        other == self
    }
}
