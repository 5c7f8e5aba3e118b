use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    contraction::Contractable,
    structure::{AbstractIndex, HasStructure, ShapeError, TensorStructure, VecStructure},
};

/// A tensor with every component stored, in row major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseTensor<T> {
    pub data: Vec<T>,
    pub structure: VecStructure,
}

impl<T> HasStructure for DenseTensor<T>
where
    T: Clone,
{
    type Structure = VecStructure;
    type Scalar = T;

    fn structure(&self) -> &VecStructure {
        &self.structure
    }

    fn scalar(&self) -> Option<T> {
        if self.structure.is_scalar() {
            self.data.first().cloned()
        } else {
            None
        }
    }
}

impl<T> DenseTensor<T> {
    pub fn from_data(data: Vec<T>, structure: VecStructure) -> Result<Self, ShapeError> {
        let expected = structure.size()?;
        if data.len() != expected {
            return Err(ShapeError::DataLength {
                expected,
                found: data.len(),
            });
        }
        Ok(DenseTensor { data, structure })
    }

    pub fn repeat(structure: VecStructure, value: T) -> Result<Self, ShapeError>
    where
        T: Clone,
    {
        let size = structure.size()?;
        Ok(DenseTensor {
            data: vec![value; size],
            structure,
        })
    }

    /// Builds every component from its expanded index.
    pub fn from_fn(
        structure: VecStructure,
        mut f: impl FnMut(&[usize]) -> T,
    ) -> Result<Self, ShapeError> {
        let size = structure.size()?;
        let data = (0..size)
            .map(|i| structure.expanded_index(i).map(|idx| f(&idx)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DenseTensor { data, structure })
    }

    pub fn new_scalar(value: T) -> Self {
        DenseTensor {
            data: vec![value],
            structure: VecStructure::empty(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, indices: &[usize]) -> Result<&T, ShapeError> {
        let flat = self.structure.flat_index(indices)?;
        self.get_linear(flat)
    }

    pub fn get_linear(&self, index: usize) -> Result<&T, ShapeError> {
        self.data.get(index).ok_or(ShapeError::FlatIndexOutOfBounds {
            index,
            size: self.data.len(),
        })
    }

    pub fn set(&mut self, indices: &[usize], value: T) -> Result<(), ShapeError> {
        let flat = self.structure.flat_index(indices)?;
        self.set_flat(flat, value)
    }

    pub fn set_flat(&mut self, index: usize, value: T) -> Result<(), ShapeError> {
        let size = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(ShapeError::FlatIndexOutOfBounds { index, size })?;
        *slot = value;
        Ok(())
    }

    pub fn flat_iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.data.iter().enumerate()
    }

    pub fn map_data<U>(self, f: impl Fn(T) -> U) -> DenseTensor<U> {
        DenseTensor {
            data: self.data.into_iter().map(f).collect(),
            structure: self.structure,
        }
    }

    pub fn map_data_ref<U>(&self, f: impl Fn(&T) -> U) -> DenseTensor<U> {
        DenseTensor {
            data: self.data.iter().map(f).collect(),
            structure: self.structure.clone(),
        }
    }

    pub fn try_map_data_ref<U, E>(&self, f: impl Fn(&T) -> Result<U, E>) -> Result<DenseTensor<U>, E> {
        Ok(DenseTensor {
            data: self.data.iter().map(f).collect::<Result<_, _>>()?,
            structure: self.structure.clone(),
        })
    }

    pub fn relabel(&mut self, from: &AbstractIndex, to: &AbstractIndex) {
        self.structure.relabel(from, to);
    }

    /// The same tensor with its axes reordered to follow `target`.
    pub fn permute_to(&self, target: &VecStructure) -> Result<Self, ShapeError>
    where
        T: Clone,
    {
        if &self.structure == target {
            return Ok(self.clone());
        }
        let perm = self.structure.permutation_to(target)?;
        let strides = self.structure.strides()?;
        let size = target.size()?;
        let mut data = Vec::with_capacity(size);
        for t in 0..size {
            let idx = target.expanded_index(t)?;
            let flat: usize = idx
                .iter()
                .zip(&perm)
                .map(|(i, &p)| i * strides[p])
                .sum();
            data.push(self.data[flat].clone());
        }
        Ok(DenseTensor {
            data,
            structure: target.clone(),
        })
    }
}

impl<T: Contractable> DenseTensor<T> {
    pub fn zero(structure: VecStructure) -> Result<Self, ShapeError> {
        DenseTensor::repeat(structure, T::zero())
    }

    /// Component-wise sum. `other` may list the same slots in another order.
    pub fn add(&self, other: &Self) -> Result<Self, ShapeError> {
        let aligned = other.permute_to(&self.structure)?;
        Ok(DenseTensor {
            data: self
                .data
                .iter()
                .zip(&aligned.data)
                .map(|(a, b)| a.add_ref(b))
                .collect(),
            structure: self.structure.clone(),
        })
    }

    pub fn scalar_mul(&self, factor: &T) -> Self {
        self.map_data_ref(|a| a.mul_ref(factor))
    }
}

impl<T: Display> Display for DenseTensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.structure)?;
        for (i, value) in self.data.iter().enumerate() {
            match self.structure.expanded_index(i) {
                Ok(idx) => writeln!(f, "{idx:?}: {value}")?,
                Err(_) => writeln!(f, "{i}: {value}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        complex::Complex,
        structure::{Rep, Slot},
    };

    use super::*;

    fn structure(slots: &[(Rep, usize, usize)]) -> VecStructure {
        slots
            .iter()
            .map(|&(r, d, a)| Slot::new(r, d, a))
            .collect()
    }

    #[test]
    fn data_length_checked() {
        let s = structure(&[(Rep::Bispinor, 2, 1), (Rep::Euclidean, 3, 2)]);
        assert!(matches!(
            DenseTensor::from_data(vec![1.0; 5], s.clone()),
            Err(ShapeError::DataLength {
                expected: 6,
                found: 5
            })
        ));
        let t = DenseTensor::from_fn(s, |idx| (idx[0] * 10 + idx[1]) as f64).unwrap();
        assert_eq!(*t.get(&[1, 2]).unwrap(), 12.0);
        assert!(t.get(&[2, 0]).is_err());
    }

    #[test]
    fn permute_and_add() {
        let s = structure(&[(Rep::Bispinor, 2, 1), (Rep::Euclidean, 3, 2)]);
        let t = DenseTensor::from_fn(s.clone(), |idx| {
            Complex::new((idx[0] * 10 + idx[1]) as f64, 0.)
        })
        .unwrap();
        let swapped = structure(&[(Rep::Euclidean, 3, 2), (Rep::Bispinor, 2, 1)]);
        let p = t.permute_to(&swapped).unwrap();
        assert_eq!(p.get(&[2, 1]).unwrap().re, 12.0);

        let sum = t.add(&p).unwrap();
        assert_eq!(sum.structure, s);
        assert_eq!(sum.get(&[1, 2]).unwrap().re, 24.0);

        let other = structure(&[(Rep::Bispinor, 2, 1), (Rep::Euclidean, 3, 5)]);
        assert!(matches!(
            t.add(&DenseTensor::zero(other).unwrap()),
            Err(ShapeError::StructureMismatch(..))
        ));
    }

    #[test]
    fn scalar_access() {
        let t = DenseTensor::new_scalar(3.0);
        assert_eq!(t.scalar(), Some(3.0));
        let v = DenseTensor::repeat(structure(&[(Rep::Bispinor, 4, 1)]), 1.0).unwrap();
        assert_eq!(v.scalar(), None);
    }
}
