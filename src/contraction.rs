use crate::{
    complex::Complex,
    data::DenseTensor,
    structure::{ShapeError, Slot, TensorStructure, VecStructure},
    symbolic::Atom,
};

pub trait IsZero {
    fn is_zero(&self) -> bool;

    fn is_non_zero(&self) -> bool {
        !self.is_zero()
    }
}

/// Scalars that tensor components can be made of.
pub trait Contractable: Clone + IsZero {
    fn zero() -> Self;
    fn mul_ref(&self, other: &Self) -> Self;
    fn add_ref(&self, other: &Self) -> Self;
    fn neg_ref(&self) -> Self;

    /// Sum of many terms at once.
    fn sum_terms(terms: Vec<Self>) -> Self {
        terms
            .iter()
            .fold(Self::zero(), |acc, t| acc.add_ref(t))
    }
}

impl IsZero for Atom {
    fn is_zero(&self) -> bool {
        Atom::is_zero(self)
    }
}

impl Contractable for Atom {
    fn zero() -> Self {
        Atom::zero()
    }

    fn mul_ref(&self, other: &Self) -> Self {
        self * other
    }

    fn add_ref(&self, other: &Self) -> Self {
        self + other
    }

    fn neg_ref(&self) -> Self {
        -self
    }

    fn sum_terms(terms: Vec<Self>) -> Self {
        Atom::add_all(terms)
    }
}

impl IsZero for f64 {
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl Contractable for f64 {
    fn zero() -> Self {
        0.0
    }

    fn mul_ref(&self, other: &Self) -> Self {
        self * other
    }

    fn add_ref(&self, other: &Self) -> Self {
        self + other
    }

    fn neg_ref(&self) -> Self {
        -self
    }
}

impl Contractable for Complex<f64> {
    fn zero() -> Self {
        Complex::zero()
    }

    fn mul_ref(&self, other: &Self) -> Self {
        self * other
    }

    fn add_ref(&self, other: &Self) -> Self {
        self + other
    }

    fn neg_ref(&self) -> Self {
        -*self
    }
}

pub trait Contract<T = Self> {
    type LCM;
    fn contract(&self, other: &T) -> Result<Self::LCM, ShapeError>;
}

pub trait SingleContract<T = Self> {
    type LCM;
    fn single_contract(&self, other: &T, i: usize, j: usize) -> Result<Self::LCM, ShapeError>;
}

pub trait MultiContract<T = Self> {
    type LCM;
    fn multi_contract(&self, other: &T) -> Result<Self::LCM, ShapeError>;
}

pub trait ExteriorProduct<T = Self> {
    type LCM;
    fn exterior_product(&self, other: &T) -> Result<Self::LCM, ShapeError>;
}

/// Odometer increment of a row major multi index. Returns false on wrap around.
fn increment(idx: &mut [usize], dims: &[usize]) -> bool {
    for (i, d) in idx.iter_mut().zip(dims).rev() {
        *i += 1;
        if *i < *d {
            return true;
        }
        *i = 0;
    }
    false
}

impl<T: Contractable> DenseTensor<T> {
    /// Contracts the slot pairs `pairs` (positions in `self`, positions in `other`).
    ///
    /// Lorentz components `k > 0` pick up a minus sign per contracted pair, so
    /// stored components are contracted with the metric implied.
    fn contract_pairs(
        &self,
        other: &DenseTensor<T>,
        pairs: &[(usize, usize)],
    ) -> Result<DenseTensor<T>, ShapeError> {
        let (skip_self, skip_other): (Vec<usize>, Vec<usize>) = pairs.iter().copied().unzip();
        let final_structure = self.structure.merge_at(&other.structure, &skip_self, &skip_other);

        let dims_self = self.structure.dims()?;
        let strides_self = self.structure.strides()?;
        let strides_other = other.structure.strides()?;

        let free_self: Vec<usize> = (0..self.structure.order())
            .filter(|i| !skip_self.contains(i))
            .collect();
        let free_other: Vec<usize> = (0..other.structure.order())
            .filter(|j| !skip_other.contains(j))
            .collect();

        let contracted_dims: Vec<usize> = pairs.iter().map(|&(i, _)| dims_self[i]).collect();
        let contracted_reps: Vec<_> = pairs
            .iter()
            .map(|&(i, _)| self.structure.structure[i].kind())
            .collect();
        let contracted_size: usize = contracted_dims.iter().product();

        let final_dims = final_structure.dims()?;
        let final_size: usize = final_dims.iter().product();
        let mut data = Vec::with_capacity(final_size);

        let mut result_idx = vec![0; final_dims.len()];
        for r in 0..final_size {
            if r > 0 {
                increment(&mut result_idx, &final_dims);
            }
            let (left, right) = result_idx.split_at(free_self.len());
            let base_self: usize = left
                .iter()
                .zip(&free_self)
                .map(|(k, &i)| k * strides_self[i])
                .sum();
            let base_other: usize = right
                .iter()
                .zip(&free_other)
                .map(|(k, &j)| k * strides_other[j])
                .sum();

            let mut terms = Vec::new();
            let mut k = vec![0; pairs.len()];
            for c in 0..contracted_size {
                if c > 0 {
                    increment(&mut k, &contracted_dims);
                }
                let mut off_self = base_self;
                let mut off_other = base_other;
                let mut negative = false;
                for ((&(i, j), &kk), rep) in pairs.iter().zip(&k).zip(&contracted_reps) {
                    off_self += kk * strides_self[i];
                    off_other += kk * strides_other[j];
                    negative ^= rep.is_neg(kk);
                }
                let a = &self.data[off_self];
                if a.is_zero() {
                    continue;
                }
                let b = &other.data[off_other];
                if b.is_zero() {
                    continue;
                }
                let product = a.mul_ref(b);
                terms.push(if negative { product.neg_ref() } else { product });
            }
            data.push(T::sum_terms(terms));
        }

        DenseTensor::from_data(data, final_structure)
    }

    #[must_use = "the traced tensor is returned, self is unchanged"]
    /// Contract the tensor with itself, i.e. trace over all matching indices.
    pub fn internal_contract(&self) -> Result<Self, ShapeError> {
        let traces = self.structure.traces();
        if traces.is_empty() {
            return Ok(self.clone());
        }
        let traced: Vec<usize> = traces.iter().flatten().copied().collect();
        let free: Vec<usize> = (0..self.structure.order())
            .filter(|i| !traced.contains(i))
            .collect();
        let final_structure: VecStructure = free
            .iter()
            .map(|&i| self.structure.structure[i].clone())
            .collect();

        let dims = self.structure.dims()?;
        let strides = self.structure.strides()?;
        let trace_dims: Vec<usize> = traces.iter().map(|[i, _]| dims[*i]).collect();
        let trace_reps: Vec<_> = traces
            .iter()
            .map(|[i, _]| self.structure.structure[*i].kind())
            .collect();
        let trace_size: usize = trace_dims.iter().product();

        let final_dims = final_structure.dims()?;
        let final_size: usize = final_dims.iter().product();
        let mut data = Vec::with_capacity(final_size);
        let mut result_idx = vec![0; final_dims.len()];
        for r in 0..final_size {
            if r > 0 {
                increment(&mut result_idx, &final_dims);
            }
            let base: usize = result_idx
                .iter()
                .zip(&free)
                .map(|(k, &i)| k * strides[i])
                .sum();
            let mut terms = Vec::new();
            let mut k = vec![0; traces.len()];
            for c in 0..trace_size {
                if c > 0 {
                    increment(&mut k, &trace_dims);
                }
                let mut offset = base;
                let mut negative = false;
                for ((&[i, j], &kk), rep) in traces.iter().zip(&k).zip(&trace_reps) {
                    offset += kk * (strides[i] + strides[j]);
                    negative ^= rep.is_neg(kk);
                }
                let value = &self.data[offset];
                if value.is_non_zero() {
                    terms.push(if negative { value.neg_ref() } else { value.clone() });
                }
            }
            data.push(T::sum_terms(terms));
        }
        DenseTensor::from_data(data, final_structure)
    }
}

impl<T: Contractable> SingleContract for DenseTensor<T> {
    type LCM = DenseTensor<T>;

    fn single_contract(&self, other: &Self, i: usize, j: usize) -> Result<Self::LCM, ShapeError> {
        self.contract_pairs(other, &[(i, j)])
    }
}

impl<T: Contractable> MultiContract for DenseTensor<T> {
    type LCM = DenseTensor<T>;

    fn multi_contract(&self, other: &Self) -> Result<Self::LCM, ShapeError> {
        let pairs = self.structure.match_indices(&other.structure);
        self.contract_pairs(other, &pairs)
    }
}

impl<T: Contractable> ExteriorProduct for DenseTensor<T> {
    type LCM = DenseTensor<T>;

    fn exterior_product(&self, other: &Self) -> Result<Self::LCM, ShapeError> {
        self.contract_pairs(other, &[])
    }
}

impl<T: Contractable> Contract for DenseTensor<T> {
    type LCM = DenseTensor<T>;

    fn contract(&self, other: &Self) -> Result<Self::LCM, ShapeError> {
        match self.structure.match_indices(&other.structure).as_slice() {
            [] => self.exterior_product(other),
            [(i, j)] => self.single_contract(other, *i, *j),
            _ => self.multi_contract(other),
        }
    }
}

/// The slots a pair of tensors would keep after contracting with each other.
pub fn contracted_structure(a: &VecStructure, b: &VecStructure) -> VecStructure {
    let (skip_a, skip_b): (Vec<usize>, Vec<usize>) = a.match_indices(b).into_iter().unzip();
    a.merge_at(b, &skip_a, &skip_b)
}

/// Number of components a contraction result would hold, symbolic dimensions count as one.
pub fn contracted_size(slots: &[Slot]) -> usize {
    slots
        .iter()
        .map(|s| s.dim().concrete().unwrap_or(1))
        .product()
}
