//! Numerical evaluation of result tensors.
//!
//! A tensor is bound to constants, ordered parameters and external functions,
//! then linearised into a single instruction list shared by all of its
//! components. The list is interpreted directly or turned into C and compiled
//! (see [`compile`]).

use std::{fmt::Debug, sync::Arc, time::Duration};

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use num::ToPrimitive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    complex::Complex,
    data::DenseTensor,
    network::TensorNetworkError,
    parametric::ParamTensor,
    structure::VecStructure,
    symbolic::{Atom, AtomKind, DomainError, Symbol},
};

pub mod cache;
pub mod compile;

pub use cache::EvaluatorCache;
pub use compile::{CompileOptions, CompiledEvaluator, InlineAsm};

/// A user supplied numerical function.
pub type ExternalFunction = Arc<dyn Fn(&[Complex<f64>]) -> Complex<f64> + Send + Sync>;

pub type FunctionMap = IndexMap<Symbol, ExternalFunction>;

/// Rounds of constant substitution before giving up on a cycle.
pub const MAX_CONSTANT_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    #[error("{0} is neither a parameter, a constant nor a known function")]
    Unbound(Atom),
    #[error("parameter {0} given more than once")]
    DuplicateParam(Atom),
    #[error("parameter {0} must be a symbol or a function")]
    InvalidParam(Atom),
    #[error("expected {expected} parameters, got {found}")]
    ParamLength { expected: usize, found: usize },
    #[error("output buffer holds {found} components, the tensor has {expected}")]
    OutputLength { expected: usize, found: usize },
    #[error("constants still reference each other after {0} substitution rounds")]
    RecursiveConstants(usize),
}

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Network(#[from] TensorNetworkError),
    #[error("{0:?} cannot name a C function")]
    InvalidFunctionName(String),
    #[error("compilation failed:\n{diagnostic}")]
    Compile { diagnostic: String },
    #[error("compilation did not finish within {timeout:?}")]
    CompileTimeout { timeout: Duration },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Load(#[from] libloading::Error),
}

/// Where an instruction reads a value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Param(usize),
    Const(usize),
    Reg(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    Exp,
    Log,
    Sin,
    Cos,
    Sqrt,
    Conj,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Builtin::Exp),
            "log" => Some(Builtin::Log),
            "sin" => Some(Builtin::Sin),
            "cos" => Some(Builtin::Cos),
            "sqrt" => Some(Builtin::Sqrt),
            "conj" => Some(Builtin::Conj),
            _ => None,
        }
    }

    pub fn apply(self, z: Complex<f64>) -> Complex<f64> {
        match self {
            Builtin::Exp => z.exp(),
            Builtin::Log => z.ln(),
            Builtin::Sin => z.sin(),
            Builtin::Cos => z.cos(),
            Builtin::Sqrt => z.sqrt(),
            Builtin::Conj => z.conj(),
        }
    }

    /// The `complex.h` counterpart.
    pub fn c_name(self) -> &'static str {
        match self {
            Builtin::Exp => "cexp",
            Builtin::Log => "clog",
            Builtin::Sin => "csin",
            Builtin::Cos => "ccos",
            Builtin::Sqrt => "csqrt",
            Builtin::Conj => "conj",
        }
    }
}

/// One step of the linearised evaluation. Its result lands in the register of
/// the same index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Add(Vec<Operand>),
    Mul(Vec<Operand>),
    Powi(Operand, i64),
    Powf(Operand, Operand),
    Builtin(Builtin, Operand),
    External(usize, Vec<Operand>),
}

/// A tensor of expressions ready for numerical evaluation.
#[derive(Clone)]
pub struct TensorEvaluator {
    pub(crate) structure: VecStructure,
    pub(crate) params: Vec<Atom>,
    pub(crate) constants: Vec<Complex<f64>>,
    pub(crate) instructions: Vec<Instr>,
    pub(crate) outputs: Vec<Operand>,
    pub(crate) functions: Vec<(Symbol, ExternalFunction)>,
}

impl Debug for TensorEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorEvaluator")
            .field("structure", &self.structure)
            .field("params", &self.params)
            .field("constants", &self.constants)
            .field("instructions", &self.instructions)
            .field("outputs", &self.outputs)
            .field(
                "functions",
                &self.functions.iter().map(|(s, _)| s).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Substitutes constants until nothing changes.
fn substitute_constants(
    expr: &Atom,
    constants: &IndexMap<Atom, Atom>,
) -> Result<Atom, EvaluatorError> {
    if constants.is_empty() {
        return Ok(expr.clone());
    }
    let mut current = expr.clone();
    for _ in 0..MAX_CONSTANT_DEPTH {
        let next = current.replace_map(constants)?;
        if next == current {
            return Ok(current);
        }
        current = next;
    }
    Err(BindingError::RecursiveConstants(MAX_CONSTANT_DEPTH).into())
}

fn validate_params(params: &[Atom]) -> Result<IndexMap<Atom, usize>, BindingError> {
    let mut index = IndexMap::with_capacity(params.len());
    for (i, p) in params.iter().enumerate() {
        if !matches!(p.kind(), AtomKind::Var(_) | AtomKind::Fun(..)) {
            return Err(BindingError::InvalidParam(p.clone()));
        }
        if index.insert(p.clone(), i).is_some() {
            return Err(BindingError::DuplicateParam(p.clone()));
        }
    }
    Ok(index)
}

fn rational_to_complex(atom: &Atom) -> Result<Complex<f64>, DomainError> {
    let value = atom
        .as_num()
        .and_then(|r| r.to_f64())
        .unwrap_or(f64::NAN);
    if value.is_finite() {
        Ok(Complex::new_re(value))
    } else {
        Err(DomainError::NotFinite(value))
    }
}

/// Turns expression trees into instructions, sharing every repeated subtree.
struct Linearizer<'a> {
    params: IndexMap<Atom, usize>,
    functions: &'a FunctionMap,
    used_functions: IndexSet<Symbol>,
    constants: Vec<Complex<f64>>,
    constant_index: AHashMap<(u64, u64), usize>,
    instructions: Vec<Instr>,
    seen: AHashMap<Atom, Operand>,
}

impl<'a> Linearizer<'a> {
    fn constant(&mut self, value: Complex<f64>) -> Operand {
        let key = (value.re.to_bits(), value.im.to_bits());
        let next = self.constants.len();
        let index = *self.constant_index.entry(key).or_insert(next);
        if index == next {
            self.constants.push(value);
        }
        Operand::Const(index)
    }

    fn operands(&mut self, atoms: &[Atom]) -> Result<Vec<Operand>, EvaluatorError> {
        atoms.iter().map(|a| self.operand(a)).collect()
    }

    fn operand(&mut self, atom: &Atom) -> Result<Operand, EvaluatorError> {
        if let Some(&i) = self.params.get(atom) {
            return Ok(Operand::Param(i));
        }
        if let Some(&op) = self.seen.get(atom) {
            return Ok(op);
        }

        let instr = match atom.kind() {
            AtomKind::Num(_) => return Ok(self.constant(rational_to_complex(atom)?)),
            AtomKind::Var(s) if s.is_imaginary_unit() => return Ok(self.constant(Complex::i())),
            AtomKind::Var(_) => return Err(BindingError::Unbound(atom.clone()).into()),
            AtomKind::Fun(name, args) => {
                if self.functions.contains_key(name) {
                    let (slot, _) = self.used_functions.insert_full(name.clone());
                    Instr::External(slot, self.operands(args)?)
                } else if let (Some(b), [arg]) = (Builtin::from_name(name.as_str()), args.as_slice())
                {
                    Instr::Builtin(b, self.operand(arg)?)
                } else {
                    return Err(BindingError::Unbound(atom.clone()).into());
                }
            }
            AtomKind::Pow(base, exp) => {
                let base = self.operand(base)?;
                match exp.as_integer() {
                    Some(n) => Instr::Powi(base, n),
                    None => Instr::Powf(base, self.operand(exp)?),
                }
            }
            AtomKind::Mul(factors) => Instr::Mul(self.operands(factors)?),
            AtomKind::Add(terms) => Instr::Add(self.operands(terms)?),
        };

        trace!("r{} = {:?}", self.instructions.len(), instr);
        let op = Operand::Reg(self.instructions.len());
        self.instructions.push(instr);
        self.seen.insert(atom.clone(), op);
        Ok(op)
    }
}

impl TensorEvaluator {
    /// Linearises one expression per component of `structure`.
    pub fn new(
        structure: VecStructure,
        expressions: &[Atom],
        params: &[Atom],
        functions: &FunctionMap,
    ) -> Result<Self, EvaluatorError> {
        let mut linearizer = Linearizer {
            params: validate_params(params)?,
            functions,
            used_functions: IndexSet::new(),
            constants: Vec::new(),
            constant_index: AHashMap::new(),
            instructions: Vec::new(),
            seen: AHashMap::new(),
        };
        let outputs = linearizer.operands(expressions)?;
        debug!(
            "linearised {} components into {} instructions, {} constants",
            outputs.len(),
            linearizer.instructions.len(),
            linearizer.constants.len()
        );

        let functions = linearizer
            .used_functions
            .iter()
            .filter_map(|s| functions.get(s).map(|f| (s.clone(), f.clone())))
            .collect();

        Ok(TensorEvaluator {
            structure,
            params: params.to_vec(),
            constants: linearizer.constants,
            instructions: linearizer.instructions,
            outputs,
            functions,
        })
    }

    pub fn structure(&self) -> &VecStructure {
        &self.structure
    }

    pub fn params(&self) -> &[Atom] {
        &self.params
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.instructions
    }

    /// Number of components of each result.
    pub fn output_len(&self) -> usize {
        self.outputs.len()
    }

    fn check_params(&self, params: &[Complex<f64>]) -> Result<(), BindingError> {
        if params.len() != self.params.len() {
            return Err(BindingError::ParamLength {
                expected: self.params.len(),
                found: params.len(),
            });
        }
        Ok(())
    }

    fn read(&self, op: Operand, params: &[Complex<f64>], regs: &[Complex<f64>]) -> Complex<f64> {
        match op {
            Operand::Param(i) => params[i],
            Operand::Const(i) => self.constants[i],
            Operand::Reg(i) => regs[i],
        }
    }

    fn run(&self, params: &[Complex<f64>], regs: &mut Vec<Complex<f64>>) {
        regs.clear();
        for instr in &self.instructions {
            let value = match instr {
                Instr::Add(ops) => ops.iter().map(|&o| self.read(o, params, regs)).sum(),
                Instr::Mul(ops) => ops
                    .iter()
                    .fold(Complex::one(), |acc, &o| acc * self.read(o, params, regs)),
                Instr::Powi(base, n) => self.read(*base, params, regs).powi(*n),
                Instr::Powf(base, exp) => self
                    .read(*base, params, regs)
                    .powc(&self.read(*exp, params, regs)),
                Instr::Builtin(b, arg) => b.apply(self.read(*arg, params, regs)),
                Instr::External(f, args) => {
                    let args: Vec<_> = args.iter().map(|&o| self.read(o, params, regs)).collect();
                    (self.functions[*f].1)(&args)
                }
            };
            regs.push(value);
        }
    }

    /// Writes all components for one parameter vector into `out`.
    pub fn evaluate_complex_into(
        &self,
        params: &[Complex<f64>],
        out: &mut [Complex<f64>],
    ) -> Result<(), BindingError> {
        self.check_params(params)?;
        if out.len() != self.outputs.len() {
            return Err(BindingError::OutputLength {
                expected: self.outputs.len(),
                found: out.len(),
            });
        }
        let mut regs = Vec::with_capacity(self.instructions.len());
        self.run(params, &mut regs);
        for (o, &op) in out.iter_mut().zip(&self.outputs) {
            *o = self.read(op, params, &regs);
        }
        Ok(())
    }

    fn evaluate_one(
        &self,
        params: &[Complex<f64>],
        regs: &mut Vec<Complex<f64>>,
    ) -> Result<DenseTensor<Complex<f64>>, BindingError> {
        self.check_params(params)?;
        self.run(params, regs);
        let data = self
            .outputs
            .iter()
            .map(|&op| self.read(op, params, regs))
            .collect();
        Ok(DenseTensor {
            data,
            structure: self.structure.clone(),
        })
    }

    /// One result tensor per parameter vector, in input order.
    pub fn evaluate_complex(
        &self,
        batch: &[Vec<Complex<f64>>],
    ) -> Result<Vec<DenseTensor<Complex<f64>>>, BindingError> {
        let mut regs = Vec::with_capacity(self.instructions.len());
        batch
            .iter()
            .map(|params| self.evaluate_one(params, &mut regs))
            .collect()
    }

    /// Same as [`TensorEvaluator::evaluate_complex`], spread over the rayon pool.
    pub fn evaluate_complex_par(
        &self,
        batch: &[Vec<Complex<f64>>],
    ) -> Result<Vec<DenseTensor<Complex<f64>>>, BindingError> {
        batch
            .par_iter()
            .map_init(
                || Vec::with_capacity(self.instructions.len()),
                |regs, params| self.evaluate_one(params, regs),
            )
            .collect()
    }
}

impl ParamTensor {
    /// Binds the tensor for numerical evaluation.
    ///
    /// Constants are substituted first. Afterwards every leaf has to be one of
    /// `params`, a function of `functions`, a built-in function or `𝑖`, which
    /// stands for the imaginary unit unless it is listed as a parameter.
    pub fn evaluator(
        &self,
        constants: &IndexMap<Atom, Atom>,
        params: &[Atom],
        functions: &FunctionMap,
    ) -> Result<TensorEvaluator, EvaluatorError> {
        let dense = self.to_dense()?;
        let expressions = dense
            .data
            .iter()
            .map(|e| substitute_constants(e, constants))
            .collect::<Result<Vec<_>, _>>()?;
        TensorEvaluator::new(dense.structure, &expressions, params, functions)
    }
}

impl Atom {
    /// The numerical value of an expression without free symbols.
    pub fn to_complex(&self) -> Result<Complex<f64>, EvaluatorError> {
        let evaluator = TensorEvaluator::new(
            VecStructure::empty(),
            std::slice::from_ref(self),
            &[],
            &FunctionMap::new(),
        )?;
        let mut out = [Complex::zero()];
        evaluator.evaluate_complex_into(&[], &mut out)?;
        Ok(out[0])
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::symbolic::parse;

    use super::*;

    fn p(s: &str) -> Atom {
        parse(s).unwrap()
    }

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex::new(re, im)
    }

    #[test]
    fn numbers_and_builtins() {
        assert_relative_eq!(p("3/4+2*𝑖").to_complex().unwrap(), c(0.75, 2.));
        assert_relative_eq!(p("𝑖^2").to_complex().unwrap(), c(-1., 0.));
        assert_relative_eq!(
            p("exp(𝑖*x)").replace_map(&IndexMap::from([(p("x"), p("0"))])).unwrap().to_complex().unwrap(),
            c(1., 0.)
        );
        assert_relative_eq!(p("sqrt(-4)").to_complex().unwrap(), c(0., 2.), epsilon = 1e-12);
        assert_relative_eq!(p("conj(1+𝑖)*cos(0)").to_complex().unwrap(), c(1., -1.));
        assert!(matches!(
            p("x+1").to_complex(),
            Err(EvaluatorError::Binding(BindingError::Unbound(_)))
        ));
    }

    #[test]
    fn shared_subexpressions() {
        let exprs = [p("(x+y)^2*z"), p("(x+y)^2+z"), p("x+y")];
        let eval = TensorEvaluator::new(
            VecStructure::empty(),
            &exprs,
            &[p("x"), p("y"), p("z")],
            &FunctionMap::new(),
        )
        .unwrap();
        let adds = eval
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instr::Add(ops) if ops == &[Operand::Param(0), Operand::Param(1)]))
            .count();
        assert_eq!(adds, 1);

        let mut out = [Complex::zero(); 3];
        eval.evaluate_complex_into(&[c(1., 0.), c(2., 0.), c(0., 1.)], &mut out)
            .unwrap();
        assert_relative_eq!(out[0], c(0., 9.));
        assert_relative_eq!(out[1], c(9., 1.));
        assert_relative_eq!(out[2], c(3., 0.));
    }

    #[test]
    fn bindings() {
        let constants = IndexMap::from([(p("m"), p("2*k")), (p("k"), p("3"))]);
        let tensor = ParamTensor::new_scalar(p("m*x+f(x)+𝑖"));
        let mut functions = FunctionMap::new();
        functions.insert(
            Symbol::new("f"),
            Arc::new(|args: &[Complex<f64>]| args[0] * args[0]),
        );
        let eval = tensor.evaluator(&constants, &[p("x")], &functions).unwrap();
        let out = eval.evaluate_complex(&[vec![c(2., 0.)]]).unwrap();
        assert_relative_eq!(out[0].data[0], c(16., 1.));

        // 𝑖 bound as a parameter replaces the imaginary unit
        let eval = tensor
            .evaluator(&constants, &[p("x"), p("𝑖")], &functions)
            .unwrap();
        let out = eval.evaluate_complex(&[vec![c(1., 0.), c(5., 0.)]]).unwrap();
        assert_relative_eq!(out[0].data[0], c(12., 0.));

        assert!(matches!(
            eval.evaluate_complex(&[vec![c(1., 0.)]]),
            Err(BindingError::ParamLength { expected: 2, found: 1 })
        ));
        assert!(matches!(
            tensor.evaluator(&constants, &[p("x"), p("x")], &functions),
            Err(EvaluatorError::Binding(BindingError::DuplicateParam(_)))
        ));
        assert!(matches!(
            tensor.evaluator(&constants, &[p("x")], &FunctionMap::new()),
            Err(EvaluatorError::Binding(BindingError::Unbound(_)))
        ));

        let cyclic = IndexMap::from([(p("a"), p("b+1")), (p("b"), p("a"))]);
        assert!(matches!(
            ParamTensor::new_scalar(p("a")).evaluator(&cyclic, &[], &functions),
            Err(EvaluatorError::Binding(BindingError::RecursiveConstants(_)))
        ));
    }

    #[test]
    fn parallel_matches_sequential() {
        let tensor = ParamTensor::new_scalar(p("x^3-2*x*y+y^(1/2)"));
        let eval = tensor
            .evaluator(&IndexMap::new(), &[p("x"), p("y")], &FunctionMap::new())
            .unwrap();
        let batch: Vec<_> = (0..64)
            .map(|k| vec![c(k as f64 * 0.1, 0.5), c(1. + k as f64, -0.25)])
            .collect();
        let seq = eval.evaluate_complex(&batch).unwrap();
        let par = eval.evaluate_complex_par(&batch).unwrap();
        assert_eq!(seq, par);
    }
}
