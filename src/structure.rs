use std::fmt::Display;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod abstract_index;
pub mod dimension;
pub mod representation;
pub mod slot;

pub use abstract_index::{AbstractIndex, ABSTRACTIND};
pub use dimension::{Dimension, DimensionError};
pub use representation::{Rep, Representation};
pub use slot::{Slot, SlotError};

use crate::symbolic::{Atom, AtomKind, Symbol};

/// Wrapper of concrete component indices in shadowed component names, `T(cind(0,1))`.
pub const COMPONENTIND: &str = "cind";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("index {label} appears {count} times, at most two occurrences are allowed")]
    OverContracted { label: AbstractIndex, count: usize },
    #[error("index {label} has incompatible dimensions {first} and {second}")]
    IncompatibleDimensions {
        label: AbstractIndex,
        first: Dimension,
        second: Dimension,
    },
    #[error("index {label} is used with incompatible representations {first} and {second}")]
    IncompatibleRepresentations {
        label: AbstractIndex,
        first: Rep,
        second: Rep,
    },
    #[error("index {label} appears twice as {rep}, a contraction needs dual representations")]
    SameVariance { label: AbstractIndex, rep: Rep },
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },
    #[error("flat index {index} out of bounds for size {size}")]
    FlatIndexOutOfBounds { index: usize, size: usize },
    #[error("data of length {found} does not fit a structure of size {expected}")]
    DataLength { expected: usize, found: usize },
    #[error("structures {0} and {1} do not carry the same slots")]
    StructureMismatch(VecStructure, VecStructure),
    #[error("{0} contains a tensor raised to a power")]
    TensorPower(Atom),
    #[error("{name} expects slots {expected}, got {found}")]
    LibraryShape {
        name: Symbol,
        expected: &'static str,
        found: VecStructure,
    },
}

/// Anything that carries a list of slots.
pub trait TensorStructure {
    fn external_structure(&self) -> &[Slot];

    fn order(&self) -> usize {
        self.external_structure().len()
    }

    fn is_scalar(&self) -> bool {
        self.order() == 0
    }

    fn external_indices_iter(&self) -> impl Iterator<Item = &AbstractIndex> {
        self.external_structure().iter().map(|s| &s.aind)
    }

    fn position(&self, aind: &AbstractIndex) -> Option<usize> {
        self.external_structure().iter().position(|s| &s.aind == aind)
    }

    /// yields the (outwards facing) shape of the tensor as a list of dimensions
    fn shape(&self) -> Vec<Dimension> {
        self.external_structure().iter().map(|s| s.dim().clone()).collect()
    }

    /// The concrete shape, failing on symbolic dimensions.
    fn dims(&self) -> Result<Vec<usize>, ShapeError> {
        self.external_structure()
            .iter()
            .map(|s| usize::try_from(s.dim()).map_err(ShapeError::from))
            .collect()
    }

    fn size(&self) -> Result<usize, ShapeError> {
        Ok(self.dims()?.iter().product())
    }

    /// Row major strides, the last index runs fastest.
    fn strides(&self) -> Result<Vec<usize>, ShapeError> {
        let dims = self.dims()?;
        let mut strides = vec![1; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
        Ok(strides)
    }

    fn flat_index(&self, indices: &[usize]) -> Result<usize, ShapeError> {
        let dims = self.dims()?;
        if indices.len() != dims.len() || indices.iter().zip(&dims).any(|(i, d)| i >= d) {
            return Err(ShapeError::IndexOutOfBounds {
                index: indices.to_vec(),
                shape: dims,
            });
        }
        Ok(indices.iter().zip(&dims).fold(0, |acc, (i, d)| acc * d + i))
    }

    fn expanded_index(&self, flat: usize) -> Result<Vec<usize>, ShapeError> {
        let dims = self.dims()?;
        let size: usize = dims.iter().product();
        if flat >= size {
            return Err(ShapeError::FlatIndexOutOfBounds { index: flat, size });
        }
        let mut out = vec![0; dims.len()];
        let mut rest = flat;
        for (o, d) in out.iter_mut().zip(&dims).rev() {
            *o = rest % d;
            rest /= d;
        }
        Ok(out)
    }

    /// Pairs `(i, j)` of positions whose slots contract with each other.
    fn match_indices(&self, other: &impl TensorStructure) -> Vec<(usize, usize)> {
        let posmap = self
            .external_structure()
            .iter()
            .enumerate()
            .map(|(i, slot)| (&slot.aind, i))
            .collect::<AHashMap<_, _>>();

        other
            .external_structure()
            .iter()
            .enumerate()
            .filter_map(|(j, slot)| {
                posmap
                    .get(&slot.aind)
                    .filter(|&&i| self.external_structure()[i].matches(slot))
                    .map(|&i| (i, j))
            })
            .collect()
    }

    /// Identify the repeated slots in the external index list
    fn traces(&self) -> Vec<[usize; 2]> {
        let slots = self.external_structure();
        let mut out = Vec::new();
        for (i, a) in slots.iter().enumerate() {
            for (j, b) in slots.iter().enumerate().skip(i + 1) {
                if a.matches(b) {
                    out.push([i, j]);
                }
            }
        }
        out
    }

    /// Same slots, possibly in a different order.
    fn same_content(&self, other: &impl TensorStructure) -> bool {
        self.order() == other.order()
            && self
                .external_structure()
                .iter()
                .all(|s| other.external_structure().contains(s))
    }
}

pub trait HasStructure {
    type Structure: TensorStructure;
    type Scalar;

    fn structure(&self) -> &Self::Structure;
    fn scalar(&self) -> Option<Self::Scalar>;
}

/// The plain list of slots of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VecStructure {
    pub structure: Vec<Slot>,
}

impl VecStructure {
    pub fn new(structure: Vec<Slot>) -> Self {
        VecStructure { structure }
    }

    pub fn empty() -> Self {
        VecStructure::default()
    }

    /// Slots of `self` not in `skip` followed by slots of `other` not in `skip_other`.
    pub fn merge_at(&self, other: &Self, skip: &[usize], skip_other: &[usize]) -> Self {
        let left = self
            .structure
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip.contains(i));
        let right = other
            .structure
            .iter()
            .enumerate()
            .filter(|(j, _)| !skip_other.contains(j));
        left.chain(right).map(|(_, s)| s.clone()).collect()
    }

    /// Positions in `self` of each slot of `target`, if both carry the same slots.
    pub fn permutation_to(&self, target: &VecStructure) -> Result<Vec<usize>, ShapeError> {
        if !self.same_content(target) {
            return Err(ShapeError::StructureMismatch(self.clone(), target.clone()));
        }
        target
            .structure
            .iter()
            .map(|s| {
                self.structure
                    .iter()
                    .position(|t| t == s)
                    .ok_or_else(|| ShapeError::StructureMismatch(self.clone(), target.clone()))
            })
            .collect()
    }

    pub fn relabel(&mut self, from: &AbstractIndex, to: &AbstractIndex) {
        for slot in self.structure.iter_mut().filter(|s| &s.aind == from) {
            slot.aind = to.clone();
        }
    }

    /// `aind(slot, slot, ...)`
    pub fn to_aind_atom(&self) -> Atom {
        Atom::fun(ABSTRACTIND, self.structure.iter().map(Slot::to_atom))
    }
}

impl TensorStructure for VecStructure {
    fn external_structure(&self) -> &[Slot] {
        &self.structure
    }
}

impl FromIterator<Slot> for VecStructure {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        VecStructure {
            structure: iter.into_iter().collect(),
        }
    }
}

impl Display for VecStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, slot) in self.structure.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{slot}")?;
        }
        f.write_str(")")
    }
}

/// A tensor known by name: `name(args..., slots...)`.
///
/// Slots may be written directly as arguments, `T(bis(4,1),loru(4,2))`, or
/// wrapped, `T(aind(bis(4,1),loru(4,2)))`. Arguments that are not slots are
/// kept in `args` and become part of every component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedStructure {
    pub name: Symbol,
    pub args: Vec<Atom>,
    pub structure: VecStructure,
}

impl NamedStructure {
    /// `Ok(None)` for functions without any slot, which are scalars.
    pub fn try_from_atom(atom: &Atom) -> Result<Option<Self>, ShapeError> {
        let AtomKind::Fun(name, fargs) = atom.kind() else {
            return Ok(None);
        };
        if name.as_str() == ABSTRACTIND || Rep::from_name(name.as_str()).is_some() {
            return Ok(None);
        }

        let mut args = Vec::new();
        let mut slots = Vec::new();
        for arg in fargs {
            match arg.as_fun() {
                Some((wrapper, inner)) if wrapper.as_str() == ABSTRACTIND => {
                    for s in inner {
                        slots.push(Slot::try_from(s)?);
                    }
                }
                Some(_) if Slot::is_slot_like(arg) => slots.push(Slot::try_from(arg)?),
                _ => args.push(arg.clone()),
            }
        }

        if slots.is_empty() {
            return Ok(None);
        }

        Ok(Some(NamedStructure {
            name: name.clone(),
            args,
            structure: VecStructure::new(slots),
        }))
    }

    /// Whether the atom is a function carrying at least one slot.
    pub fn is_tensor(atom: &Atom) -> bool {
        matches!(NamedStructure::try_from_atom(atom), Ok(Some(_)))
    }

    /// Whether a tensor appears anywhere inside the atom.
    pub fn contains_tensor(atom: &Atom) -> bool {
        NamedStructure::is_tensor(atom)
            || atom
                .children()
                .into_iter()
                .any(NamedStructure::contains_tensor)
    }

    /// The symbolic name of a single component, `name(args..., cind(i0,i1,...))`.
    pub fn component_atom(&self, indices: &[usize]) -> Atom {
        let cind = Atom::fun(COMPONENTIND, indices.iter().map(|&i| Atom::num(i)));
        Atom::fun_sym(
            self.name.clone(),
            self.args.iter().cloned().chain(std::iter::once(cind)),
        )
    }

    pub fn to_atom(&self) -> Atom {
        Atom::fun_sym(
            self.name.clone(),
            self.args
                .iter()
                .cloned()
                .chain(std::iter::once(self.structure.to_aind_atom())),
        )
    }
}

impl TensorStructure for NamedStructure {
    fn external_structure(&self) -> &[Slot] {
        &self.structure.structure
    }
}
