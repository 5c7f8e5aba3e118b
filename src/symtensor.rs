/*!

Symbolic tensor networks: parse an expression, let shared abstract indices
connect its tensor factors into a network, contract it, and evaluate the result
numerically, either interpreted or through a compiled native routine.

Tensors are recognised by their slot arguments, `T(args..., bis(4,i), loru(4,mu))`.
Library tensors ([`tensor_library::LibraryTensor`]) can be contracted through
their algebraic identities ([`gamma`]), everything else is shadowed into explicit
components `T(args..., cind(...))` and contracted by summation
([`contraction::Contract`]).

The [`network::TensorNetwork`] drives the contraction, the result is a
[`parametric::ParamTensor`] that can be bound into an
[`evaluate::TensorEvaluator`].

*/

/// Canonical symbolic expressions
pub mod symbolic;

/// Tensor structures, indices and representations
pub mod structure;

/// complex numbers
pub mod complex;

/// Tensors with dense data
pub mod data;

/// Tensor contraction
pub mod contraction;

/// Built-in tensors with known components
pub mod tensor_library;

/// Dirac and Kronecker identities
pub mod gamma;

/// Tensor networks
pub mod network;

/// Symbolic or explicit network nodes
pub mod parametric;

/// Numerical evaluation and native compilation
pub mod evaluate;

/// Loop-integral engines
pub mod integral;

pub mod utils;

#[cfg(test)]
mod tests;

pub use complex::Complex;
pub use network::{ContractionSettings, TensorNetwork, TensorNetworkError, TensorNetworkSet};
pub use parametric::ParamTensor;
pub use symbolic::{parse, Atom};
