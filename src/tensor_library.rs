//! Tensors with known components: the Dirac matrices, chiral projectors,
//! identities and metrics. Any other named tensor is shadowed, each component
//! becoming an opaque symbol `T(args..., cind(i0,i1,...))`.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{
    data::DenseTensor,
    structure::{NamedStructure, Rep, ShapeError, Slot, TensorStructure},
    symbolic::Atom,
};

/// Non-zero entries `([mu, i, j], (re, im))` of the Dirac representation gamma matrices.
static GAMMA_ENTRIES: Lazy<Vec<([usize; 3], (i64, i64))>> = Lazy::new(|| {
    vec![
        ([0, 0, 0], (1, 0)),
        ([0, 1, 1], (1, 0)),
        ([0, 2, 2], (-1, 0)),
        ([0, 3, 3], (-1, 0)),
        ([1, 0, 3], (1, 0)),
        ([1, 1, 2], (1, 0)),
        ([1, 2, 1], (-1, 0)),
        ([1, 3, 0], (-1, 0)),
        ([2, 0, 3], (0, -1)),
        ([2, 1, 2], (0, 1)),
        ([2, 2, 1], (0, 1)),
        ([2, 3, 0], (0, -1)),
        ([3, 0, 2], (1, 0)),
        ([3, 1, 3], (-1, 0)),
        ([3, 2, 0], (-1, 0)),
        ([3, 3, 1], (1, 0)),
    ]
});

/// Off-diagonal entries of gamma5 in the Dirac representation, all equal to one.
const GAMMA5_ENTRIES: [[usize; 2]; 4] = [[0, 2], [1, 3], [2, 0], [3, 1]];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibraryTensor {
    Gamma,
    Gamma5,
    ProjM,
    ProjP,
    Identity,
    Metric,
}

impl LibraryTensor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gamma" | "γ" => Some(LibraryTensor::Gamma),
            "gamma5" | "γ5" => Some(LibraryTensor::Gamma5),
            "projm" | "ProjM" => Some(LibraryTensor::ProjM),
            "projp" | "ProjP" => Some(LibraryTensor::ProjP),
            "id" | "𝟙" => Some(LibraryTensor::Identity),
            "metric" | "g" | "η" => Some(LibraryTensor::Metric),
            _ => None,
        }
    }

    /// The library tensor a named structure refers to. Tensors with extra
    /// non-slot arguments are never library tensors.
    pub fn of(structure: &NamedStructure) -> Option<Self> {
        if !structure.args.is_empty() {
            return None;
        }
        LibraryTensor::from_name(structure.name.as_str())
    }

    pub fn is_kronecker(self) -> bool {
        matches!(self, LibraryTensor::Identity | LibraryTensor::Metric)
    }

    fn expected(self) -> &'static str {
        match self {
            LibraryTensor::Gamma => "(lorentz, bis(d,_), bis(d,_))",
            LibraryTensor::Gamma5 | LibraryTensor::ProjM | LibraryTensor::ProjP => {
                "(bis(d,_), bis(d,_))"
            }
            LibraryTensor::Identity => "(r(d,_), dual r(d,_))",
            LibraryTensor::Metric => "(r(d,_), r(d,_)) of the same kind",
        }
    }

    fn shape_error(self, structure: &NamedStructure) -> ShapeError {
        ShapeError::LibraryShape {
            name: structure.name.clone(),
            expected: self.expected(),
            found: structure.structure.clone(),
        }
    }

    /// Checks the slot layout, dimensions may still be symbolic.
    pub fn validate(self, structure: &NamedStructure) -> Result<(), ShapeError> {
        let slots = structure.external_structure();
        let spinor_pair = |a: &Slot, b: &Slot| {
            a.kind() == Rep::Bispinor && b.kind() == Rep::Bispinor && a.dim() == b.dim()
        };
        let ok = match (self, slots) {
            (LibraryTensor::Gamma, [mu, i, j]) => mu.kind().is_lorentz() && spinor_pair(i, j),
            (LibraryTensor::Gamma5 | LibraryTensor::ProjM | LibraryTensor::ProjP, [i, j]) => {
                spinor_pair(i, j)
            }
            (LibraryTensor::Identity, [a, b]) => a.kind().matches(b.kind()) && a.dim() == b.dim(),
            (LibraryTensor::Metric, [a, b]) => {
                a.kind().base() == b.kind().base() && a.dim() == b.dim()
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.shape_error(structure))
        }
    }

    /// All components, with the slots of `structure`.
    pub fn explicit(self, structure: &NamedStructure) -> Result<DenseTensor<Atom>, ShapeError> {
        self.validate(structure)?;
        let slots = structure.external_structure();
        let dims = structure.dims()?;
        let mut tensor = DenseTensor::repeat(structure.structure.clone(), Atom::zero())?;

        match self {
            LibraryTensor::Gamma => {
                if dims != [4, 4, 4] {
                    return Err(self.shape_error(structure));
                }
                for (idx, (re, im)) in GAMMA_ENTRIES.iter() {
                    let value = Atom::num(*re) + Atom::num(*im) * Atom::i();
                    tensor.set(idx, value)?;
                }
            }
            LibraryTensor::Gamma5 | LibraryTensor::ProjM | LibraryTensor::ProjP => {
                if dims != [4, 4] {
                    return Err(self.shape_error(structure));
                }
                let (diagonal, off) = match self {
                    LibraryTensor::Gamma5 => (Atom::zero(), Atom::one()),
                    LibraryTensor::ProjM => (half(), -half()),
                    _ => (half(), half()),
                };
                for k in 0..4 {
                    tensor.set(&[k, k], diagonal.clone())?;
                }
                for idx in GAMMA5_ENTRIES {
                    tensor.set(&idx, off.clone())?;
                }
            }
            LibraryTensor::Identity | LibraryTensor::Metric => {
                let rep = slots[0].kind();
                for k in 0..dims[0] {
                    tensor.set(&[k, k], Atom::num(rep.metric_sign(k)))?;
                }
            }
        }
        Ok(tensor)
    }
}

fn half() -> Atom {
    Atom::rational(num::BigRational::new(1.into(), 2.into()))
}

/// A tensor whose components are the opaque symbols `name(args..., cind(...))`.
pub fn shadow(structure: &NamedStructure) -> Result<DenseTensor<Atom>, ShapeError> {
    DenseTensor::from_fn(structure.structure.clone(), |idx| {
        structure.component_atom(idx)
    })
}

/// Library components when the tensor is known, shadowed components otherwise.
pub fn explicit_tensor(structure: &NamedStructure) -> Result<DenseTensor<Atom>, ShapeError> {
    match LibraryTensor::of(structure) {
        Some(library) => library.explicit(structure),
        None => shadow(structure),
    }
}
