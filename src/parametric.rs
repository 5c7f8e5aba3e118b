use std::fmt::Display;

use enum_try_as_inner::EnumTryAsInner;
use indexmap::IndexMap;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    contraction::{Contract, ExteriorProduct},
    data::DenseTensor,
    gamma,
    network::{ContractionSettings, TensorNetwork, TensorNetworkError},
    structure::{HasStructure, NamedStructure, ShapeError, Slot, TensorStructure, VecStructure},
    symbolic::{Atom, DomainError},
    tensor_library::{explicit_tensor, LibraryTensor},
};

/// A tensor kept as a single expression, whose open slots are `structure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolicTensor {
    pub structure: VecStructure,
    pub expression: Atom,
}

impl SymbolicTensor {
    pub fn from_named(named: &NamedStructure) -> Self {
        SymbolicTensor {
            structure: named.structure.clone(),
            expression: named.to_atom(),
        }
    }
}

impl HasStructure for SymbolicTensor {
    type Structure = VecStructure;
    type Scalar = Atom;

    fn structure(&self) -> &VecStructure {
        &self.structure
    }

    fn scalar(&self) -> Option<Atom> {
        self.structure
            .is_scalar()
            .then(|| self.expression.clone())
    }
}

/// The payload of a network node: either a structured expression, or every
/// component written out.
#[derive(Debug, Clone, PartialEq, EnumTryAsInner, Serialize, Deserialize)]
#[derive_err(Debug)]
pub enum ParamTensor {
    Symbolic(SymbolicTensor),
    Explicit(DenseTensor<Atom>),
}

impl HasStructure for ParamTensor {
    type Structure = VecStructure;
    type Scalar = Atom;

    fn structure(&self) -> &VecStructure {
        match self {
            ParamTensor::Symbolic(s) => &s.structure,
            ParamTensor::Explicit(d) => &d.structure,
        }
    }

    fn scalar(&self) -> Option<Atom> {
        match self {
            ParamTensor::Symbolic(s) => s.scalar(),
            ParamTensor::Explicit(d) => d.scalar(),
        }
    }
}

/// The slots left once every repeated label is traced out.
fn free_structure(structure: &VecStructure) -> VecStructure {
    let traced: Vec<usize> = structure.traces().into_iter().flatten().collect();
    structure
        .structure
        .iter()
        .enumerate()
        .filter(|(i, _)| !traced.contains(i))
        .map(|(_, s)| s.clone())
        .collect()
}

impl ParamTensor {
    /// Library tensors stay symbolic when identities are used, everything else
    /// gets its components written out.
    pub fn from_named(named: &NamedStructure, apply_identities: bool) -> Result<Self, ShapeError> {
        match LibraryTensor::of(named) {
            Some(library) if apply_identities => {
                library.validate(named)?;
                Ok(ParamTensor::Symbolic(SymbolicTensor::from_named(named)))
            }
            _ => Ok(ParamTensor::Explicit(explicit_tensor(named)?)),
        }
    }

    pub fn new_scalar(value: Atom) -> Self {
        ParamTensor::Symbolic(SymbolicTensor {
            structure: VecStructure::empty(),
            expression: value,
        })
    }

    pub fn is_scalar(&self) -> bool {
        self.structure().is_scalar()
    }

    pub fn size(&self) -> Result<usize, ShapeError> {
        free_structure(self.structure()).size()
    }

    #[must_use]
    pub fn scalar_mul(&self, factor: &Atom) -> Self {
        if factor.is_one() {
            return self.clone();
        }
        match self {
            ParamTensor::Symbolic(s) => ParamTensor::Symbolic(SymbolicTensor {
                structure: s.structure.clone(),
                expression: &s.expression * factor,
            }),
            ParamTensor::Explicit(d) => ParamTensor::Explicit(d.scalar_mul(factor)),
        }
    }

    /// Swaps one slot for another, relabelling the expression accordingly.
    pub fn replace_slot(&self, old: &Slot, new: &Slot) -> Result<Self, DomainError> {
        let swap = |structure: &VecStructure| -> VecStructure {
            structure
                .structure
                .iter()
                .map(|s| if s == old { new.clone() } else { s.clone() })
                .collect()
        };
        Ok(match self {
            ParamTensor::Symbolic(s) => {
                let map = IndexMap::from([(old.to_atom(), new.to_atom())]);
                ParamTensor::Symbolic(SymbolicTensor {
                    structure: swap(&s.structure),
                    expression: s.expression.replace_map(&map)?,
                })
            }
            ParamTensor::Explicit(d) => ParamTensor::Explicit(DenseTensor {
                data: d.data.clone(),
                structure: swap(&d.structure),
            }),
        })
    }

    /// All components, ordered like the open slots of the tensor.
    ///
    /// A symbolic tensor is materialised by building and contracting a network
    /// of its expression with every tensor written out.
    pub fn to_dense(&self) -> Result<DenseTensor<Atom>, TensorNetworkError> {
        let symbolic = match self {
            ParamTensor::Explicit(d) => return Ok(d.clone()),
            ParamTensor::Symbolic(s) => s,
        };
        let target = free_structure(&symbolic.structure);
        if symbolic.expression.is_zero() {
            return Ok(DenseTensor::zero(target)?);
        }

        let mut network =
            TensorNetwork::from_expression(&symbolic.expression, ContractionSettings::explicit())?;
        network.contract()?;
        match network.result()? {
            ParamTensor::Explicit(d) => Ok(d.permute_to(&target)?),
            ParamTensor::Symbolic(s) if s.structure.is_scalar() && target.is_scalar() => {
                Ok(DenseTensor::new_scalar(s.expression))
            }
            ParamTensor::Symbolic(s) => Err(ShapeError::StructureMismatch(s.structure, target).into()),
        }
    }

    pub fn get_owned(&self, indices: &[usize]) -> Result<Atom, TensorNetworkError> {
        Ok(self.to_dense()?.get(indices)?.clone())
    }

    pub fn get_owned_linear(&self, index: usize) -> Result<Atom, TensorNetworkError> {
        Ok(self.to_dense()?.get_linear(index)?.clone())
    }

    /// Sets one component. A symbolic tensor is written out first.
    pub fn set(&mut self, indices: &[usize], value: Atom) -> Result<(), TensorNetworkError> {
        let mut dense = self.to_dense()?;
        dense.set(indices, value)?;
        *self = ParamTensor::Explicit(dense);
        Ok(())
    }

    pub fn set_flat(&mut self, index: usize, value: Atom) -> Result<(), TensorNetworkError> {
        let mut dense = self.to_dense()?;
        dense.set_flat(index, value)?;
        *self = ParamTensor::Explicit(dense);
        Ok(())
    }

    /// `(flat index, component)` pairs in row major order.
    pub fn iter_flat(&self) -> Result<impl Iterator<Item = (usize, Atom)>, TensorNetworkError> {
        Ok(self.to_dense()?.data.into_iter().enumerate())
    }

    /// Sum of two tensors with the same open slots, in any order.
    pub fn add(&self, other: &ParamTensor) -> Result<ParamTensor, TensorNetworkError> {
        if !self.structure().same_content(other.structure()) {
            return Err(
                ShapeError::StructureMismatch(self.structure().clone(), other.structure().clone())
                    .into(),
            );
        }
        match (self, other) {
            (ParamTensor::Symbolic(a), ParamTensor::Symbolic(b)) => {
                Ok(ParamTensor::Symbolic(SymbolicTensor {
                    structure: a.structure.clone(),
                    expression: &a.expression + &b.expression,
                }))
            }
            _ => Ok(ParamTensor::Explicit(
                self.to_dense()?.add(&other.to_dense()?)?,
            )),
        }
    }

    /// Outer product, for tensors that share no label.
    pub fn product(&self, other: &ParamTensor) -> Result<ParamTensor, TensorNetworkError> {
        if let Some(s) = self.scalar() {
            return Ok(other.scalar_mul(&s));
        }
        if let Some(s) = other.scalar() {
            return Ok(self.scalar_mul(&s));
        }
        match (self, other) {
            (ParamTensor::Symbolic(a), ParamTensor::Symbolic(b)) => {
                Ok(ParamTensor::Symbolic(SymbolicTensor {
                    structure: a.structure.merge_at(&b.structure, &[], &[]),
                    expression: &a.expression * &b.expression,
                }))
            }
            _ => Ok(ParamTensor::Explicit(
                self.to_dense()?.exterior_product(&other.to_dense()?)?,
            )),
        }
    }

    /// Contracts every label shared with `other`, through an identity when one
    /// applies and by summing over components otherwise.
    pub fn contract_with(
        &self,
        other: &ParamTensor,
        apply_identities: bool,
    ) -> Result<ParamTensor, TensorNetworkError> {
        if apply_identities {
            if let Some(out) = gamma::contract_structured(self, other)? {
                trace!("identity contraction into {}", out.structure());
                return Ok(out);
            }
        }
        if self.structure().match_indices(other.structure()).is_empty() {
            return self.product(other);
        }
        trace!(
            "dense contraction of {} with {}",
            self.structure(),
            other.structure()
        );
        Ok(ParamTensor::Explicit(
            self.to_dense()?.contract(&other.to_dense()?)?,
        ))
    }

    /// Traces over all labels repeated within the tensor.
    pub fn trace(&self, apply_identities: bool) -> Result<ParamTensor, TensorNetworkError> {
        if self.structure().traces().is_empty() {
            return Ok(self.clone());
        }
        match self {
            ParamTensor::Symbolic(s) => {
                if apply_identities {
                    if let Some(traced) = gamma::trace_structured(s)? {
                        return Ok(ParamTensor::Symbolic(traced));
                    }
                }
                Ok(ParamTensor::Explicit(self.to_dense()?))
            }
            ParamTensor::Explicit(d) => Ok(ParamTensor::Explicit(d.internal_contract()?)),
        }
    }
}

impl Display for ParamTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamTensor::Symbolic(s) => write!(f, "{}", s.expression),
            ParamTensor::Explicit(d) => write!(f, "{d}"),
        }
    }
}
