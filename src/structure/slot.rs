use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

use super::{
    abstract_index::AbstractIndex,
    dimension::{Dimension, DimensionError},
    representation::{Rep, Representation},
};
use crate::symbolic::{Atom, Symbol};

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
/// A [`Slot`] is an index, identified by an [`AbstractIndex`] and a [`Representation`].
///
/// A vector of slots thus identifies the shape and type of the tensor.
/// Two slots match if they carry the same label and dimension and dual kinds.
///
/// # Example
///
/// ```
/// # use symtensor::structure::{Rep, Representation, Slot};
/// let lor = Representation::new(Rep::LorentzUp, 4usize);
/// let mu_up: Slot = lor.new_slot("mu");
/// let mu_down: Slot = mu_up.dual();
/// assert!(mu_up.matches(&mu_down));
/// assert_eq!("lord(4,mu)", format!("{mu_down}"));
/// ```
pub struct Slot {
    pub aind: AbstractIndex,
    pub rep: Representation,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlotError {
    #[error("{0} is not a slot, isn't a representation")]
    NotRepresentation(Atom),
    #[error("slot {0} needs exactly a dimension and an index")]
    WrongArity(Atom),
    #[error("slot index {0} is not a natural number or a symbol")]
    NotIndex(Atom),
    #[error(transparent)]
    Dimension(#[from] DimensionError),
}

impl Slot {
    pub fn new(rep: Rep, dim: impl Into<Dimension>, aind: impl Into<AbstractIndex>) -> Self {
        Representation::new(rep, dim).new_slot(aind)
    }

    pub fn dual(&self) -> Self {
        Slot {
            aind: self.aind.clone(),
            rep: self.rep.dual(),
        }
    }

    pub fn kind(&self) -> Rep {
        self.rep.rep
    }

    pub fn dim(&self) -> &Dimension {
        &self.rep.dim
    }

    /// Same label, same dimension and dual kinds.
    pub fn matches(&self, other: &Slot) -> bool {
        self.aind == other.aind && self.rep.dim == other.rep.dim && self.kind().matches(other.kind())
    }

    pub fn with_aind(&self, aind: AbstractIndex) -> Self {
        Slot {
            aind,
            rep: self.rep.clone(),
        }
    }

    pub fn to_atom(&self) -> Atom {
        self.rep.to_atom(&self.aind)
    }

    /// Whether `atom` is headed by a representation name.
    pub fn is_slot_like(atom: &Atom) -> bool {
        atom.as_fun()
            .is_some_and(|(name, _)| Rep::from_name(name.as_str()).is_some())
    }

    /// `id(aind(self, other))`
    pub fn kronecker_atom(&self, other: &Slot) -> Atom {
        Atom::fun(
            "id",
            [Atom::fun("aind", [self.to_atom(), other.to_atom()])],
        )
    }

    /// `metric(aind(self, other))`
    pub fn metric_atom(&self, other: &Slot) -> Atom {
        Atom::fun(
            "metric",
            [Atom::fun("aind", [self.to_atom(), other.to_atom()])],
        )
    }
}

impl TryFrom<&Atom> for Slot {
    type Error = SlotError;

    fn try_from(atom: &Atom) -> Result<Self, Self::Error> {
        let (name, args) = atom
            .as_fun()
            .ok_or_else(|| SlotError::NotRepresentation(atom.clone()))?;
        let rep =
            Rep::from_name(name.as_str()).ok_or_else(|| SlotError::NotRepresentation(atom.clone()))?;
        let [dim, aind] = args else {
            return Err(SlotError::WrongArity(atom.clone()));
        };
        let dim = Dimension::try_from(dim)?;
        let aind = AbstractIndex::try_from(aind).map_err(SlotError::NotIndex)?;
        Ok(Slot::new(rep, dim, aind))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_atom())
    }
}

impl From<(Rep, usize, Symbol)> for Slot {
    fn from((rep, dim, aind): (Rep, usize, Symbol)) -> Self {
        Slot::new(rep, dim, aind)
    }
}

#[cfg(test)]
mod tests {
    use crate::symbolic::parse;

    use super::*;

    #[test]
    fn slot_from_atom() {
        let slot = Slot::try_from(&parse("loru(4,3)").unwrap()).unwrap();
        assert_eq!(slot, Slot::new(Rep::LorentzUp, 4usize, 3usize));

        let symbolic = Slot::try_from(&parse("bis(D,i)").unwrap()).unwrap();
        assert_eq!(*symbolic.dim(), Dimension::Symbolic(Symbol::new("D")));
        assert_eq!(symbolic.aind, AbstractIndex::from("i"));
        assert_eq!(Slot::try_from(&symbolic.to_atom()).unwrap(), symbolic);
    }

    #[test]
    fn malformed_slots() {
        assert!(matches!(
            Slot::try_from(&parse("spin(4,1)").unwrap()),
            Err(SlotError::NotRepresentation(_))
        ));
        assert!(matches!(
            Slot::try_from(&parse("bis(4)").unwrap()),
            Err(SlotError::WrongArity(_))
        ));
        assert!(matches!(
            Slot::try_from(&parse("bis(4,f(x))").unwrap()),
            Err(SlotError::NotIndex(_))
        ));
        assert!(matches!(
            Slot::try_from(&parse("bis(-4,1)").unwrap()),
            Err(SlotError::Dimension(_))
        ));
    }

    #[test]
    fn matching() {
        let mu = Slot::new(Rep::LorentzUp, 4usize, "mu");
        assert!(mu.matches(&mu.dual()));
        assert!(!mu.matches(&mu));
        assert!(!mu.matches(&Slot::new(Rep::LorentzDown, 3usize, "mu")));
        let i = Slot::new(Rep::Bispinor, 4usize, 1usize);
        assert!(i.matches(&i));
    }
}
