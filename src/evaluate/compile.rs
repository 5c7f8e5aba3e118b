//! C code generation and native compilation of evaluators.

use std::{
    ffi::c_void,
    fmt::Write as _,
    fs,
    io::Read,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use libloading::Library;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{complex::Complex, data::DenseTensor, structure::VecStructure};

use super::{BindingError, EvaluatorError, ExternalFunction, Instr, Operand, TensorEvaluator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InlineAsm {
    /// Portable C only.
    None,
    /// SSE3 inline assembly for complex products.
    X64,
}

impl Default for InlineAsm {
    fn default() -> Self {
        if cfg!(target_arch = "x86_64") {
            InlineAsm::X64
        } else {
            InlineAsm::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub compiler: String,
    pub optimization_level: usize,
    pub fast_math: bool,
    pub native: bool,
    pub inline_asm: InlineAsm,
    /// Give up on the compiler after this long.
    pub timeout: Option<Duration>,
    /// Extra compiler arguments.
    pub custom: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            compiler: "cc".to_string(),
            optimization_level: 3,
            fast_math: true,
            native: true,
            inline_asm: InlineAsm::default(),
            timeout: Some(Duration::from_secs(120)),
            custom: Vec::new(),
        }
    }
}

impl CompileOptions {
    /// Defaults, with the compiler taken from `SYMTENSOR_CC` or `CC` when set.
    pub fn from_env() -> Self {
        let mut options = CompileOptions::default();
        if let Some(cc) = ["SYMTENSOR_CC", "CC"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        {
            options.compiler = cc;
        }
        options
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-shared".to_string(),
            "-fPIC".to_string(),
            format!("-O{}", self.optimization_level),
        ];
        if self.fast_math {
            args.push("-ffast-math".to_string());
        }
        if self.native {
            args.push("-march=native".to_string());
        }
        args.extend(self.custom.iter().cloned());
        args
    }
}

const C_HEADER: &str = r#"#include <complex.h>
#include <stddef.h>

typedef double complex (*symtensor_callback)(const void *ctx, size_t function,
                                             const double complex *args, size_t n_args);

static inline double complex symtensor_powi(double complex x, long n) {
    double complex r = 1.0;
    int inverse = n < 0;
    unsigned long e = inverse ? -(unsigned long)n : (unsigned long)n;
    while (e) {
        if (e & 1) r *= x;
        x *= x;
        e >>= 1;
    }
    return inverse ? 1.0 / r : r;
}
"#;

const X64_CMUL: &str = r#"
static inline void symtensor_cmul(double complex *r, const double complex *a,
                                  const double complex *b) {
    __asm__ volatile(
        "movupd (%1), %%xmm0\n\t"
        "movddup (%2), %%xmm1\n\t"
        "movddup 8(%2), %%xmm2\n\t"
        "mulpd %%xmm0, %%xmm1\n\t"
        "shufpd $1, %%xmm0, %%xmm0\n\t"
        "mulpd %%xmm0, %%xmm2\n\t"
        "addsubpd %%xmm2, %%xmm1\n\t"
        "movupd %%xmm1, (%0)\n\t"
        :
        : "r"(r), "r"(a), "r"(b)
        : "xmm0", "xmm1", "xmm2", "memory");
}
"#;

fn c_double(x: f64) -> String {
    format!("{x:e}")
}

fn c_operand(op: Operand) -> String {
    match op {
        Operand::Param(i) => format!("params[{i}]"),
        Operand::Const(i) => format!("C[{i}]"),
        Operand::Reg(i) => format!("Z[{i}]"),
    }
}

fn join(ops: &[Operand], sep: &str) -> String {
    ops.iter().map(|&o| c_operand(o)).collect::<Vec<_>>().join(sep)
}

/// C keywords, including the GNU extensions, and names the generated code defines or calls.
const RESERVED_NAMES: &[&str] = &[
    "asm", "auto", "bool", "break", "case", "char", "complex", "const", "constexpr", "continue",
    "default", "do", "double", "else", "enum", "extern", "false", "float", "for", "goto", "if",
    "imaginary", "inline", "int", "long", "nullptr", "register", "restrict", "return", "short",
    "signed", "sizeof", "static", "static_assert", "struct", "switch", "thread_local", "true",
    "typedef", "typeof", "typeof_unqual", "union", "unsigned", "void", "volatile", "while",
    "main", "I", "cb", "ctx", "params", "out", "cpow", "cexp", "clog", "csin", "ccos", "csqrt",
    "conj", "symtensor_callback", "symtensor_powi", "symtensor_cmul",
];

/// Accepts plain C identifiers that no keyword, reserved prefix or generated name claims.
fn check_function_name(name: &str) -> Result<(), EvaluatorError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    let reserved = name.starts_with("__")
        || (name.starts_with('_') && name[1..].starts_with(|c: char| c.is_ascii_uppercase()))
        || RESERVED_NAMES.contains(&name);
    if valid && !reserved {
        Ok(())
    } else {
        Err(EvaluatorError::InvalidFunctionName(name.to_string()))
    }
}

impl TensorEvaluator {
    /// The evaluator as a C function
    /// `void name(const double complex *params, double complex *out, symtensor_callback cb, const void *ctx)`.
    pub fn export_c_source(&self, function_name: &str, inline_asm: InlineAsm) -> String {
        let asm = match inline_asm {
            InlineAsm::X64 if cfg!(target_arch = "x86_64") => true,
            InlineAsm::X64 => {
                warn!("x86-64 assembly requested on another target, emitting portable C");
                false
            }
            InlineAsm::None => false,
        };

        let mut src = C_HEADER.to_string();
        if asm {
            src.push_str(X64_CMUL);
        }
        let _ = write!(
            src,
            "\nvoid {function_name}(const double complex *params, double complex *out, \
             symtensor_callback cb, const void *ctx) {{\n    (void)cb; (void)ctx; (void)params;\n"
        );

        if !self.constants.is_empty() {
            let values = self
                .constants
                .iter()
                .map(|c| format!("{} + {} * I", c_double(c.re), c_double(c.im)))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                src,
                "    const double complex C[{}] = {{{values}}};",
                self.constants.len()
            );
        }
        if !self.instructions.is_empty() {
            let _ = writeln!(src, "    double complex Z[{}];", self.instructions.len());
        }

        for (k, instr) in self.instructions.iter().enumerate() {
            let line = match instr {
                Instr::Add(ops) => format!("Z[{k}] = {};", join(ops, " + ")),
                Instr::Mul(ops) if asm && ops.len() > 1 => {
                    let mut line = format!("Z[{k}] = {};", c_operand(ops[0]));
                    for &op in &ops[1..] {
                        let _ = write!(line, " symtensor_cmul(&Z[{k}], &Z[{k}], &{});", c_operand(op));
                    }
                    line
                }
                Instr::Mul(ops) => format!("Z[{k}] = {};", join(ops, " * ")),
                Instr::Powi(base, n) => {
                    format!("Z[{k}] = symtensor_powi({}, {n}L);", c_operand(*base))
                }
                Instr::Powf(base, exp) => {
                    format!("Z[{k}] = cpow({}, {});", c_operand(*base), c_operand(*exp))
                }
                Instr::Builtin(b, arg) => format!("Z[{k}] = {}({});", b.c_name(), c_operand(*arg)),
                Instr::External(f, args) if args.is_empty() => {
                    format!("Z[{k}] = cb(ctx, {f}, NULL, 0);")
                }
                Instr::External(f, args) => format!(
                    "{{ const double complex a[{n}] = {{{}}}; Z[{k}] = cb(ctx, {f}, a, {n}); }}",
                    join(args, ", "),
                    n = args.len()
                ),
            };
            let _ = writeln!(src, "    {line}");
        }

        for (j, &op) in self.outputs.iter().enumerate() {
            let _ = writeln!(src, "    out[{j}] = {};", c_operand(op));
        }
        src.push_str("}\n");
        src
    }

    /// Writes the C source to `filename`.
    pub fn export_c(
        &self,
        filename: impl AsRef<Path>,
        function_name: &str,
        inline_asm: InlineAsm,
    ) -> Result<ExportedCode, EvaluatorError> {
        check_function_name(function_name)?;
        let path = filename.as_ref().to_path_buf();
        fs::write(&path, self.export_c_source(function_name, inline_asm))?;
        debug!("wrote {} instructions to {}", self.instructions.len(), path.display());
        Ok(ExportedCode {
            source_path: path,
            function_name: function_name.to_string(),
        })
    }

    /// Generates, compiles and loads a native version of the evaluator.
    pub fn compile(
        &self,
        function_name: &str,
        filename: impl AsRef<Path>,
        library_name: impl AsRef<Path>,
        options: &CompileOptions,
    ) -> Result<CompiledEvaluator, EvaluatorError> {
        self.export_c(filename, function_name, options.inline_asm)?
            .compile(library_name, options)?
            .load(self)
    }
}

/// C source on disk.
#[derive(Debug, Clone)]
pub struct ExportedCode {
    pub source_path: PathBuf,
    pub function_name: String,
}

impl ExportedCode {
    /// Runs the compiler. On failure or timeout no library is left behind.
    pub fn compile(
        &self,
        library_name: impl AsRef<Path>,
        options: &CompileOptions,
    ) -> Result<CompiledCode, EvaluatorError> {
        let library_path = library_name.as_ref().to_path_buf();
        info!(
            "compiling {} into {} with {}",
            self.source_path.display(),
            library_path.display(),
            options.compiler
        );

        let mut child = Command::new(&options.compiler)
            .args(options.args())
            .arg("-o")
            .arg(&library_path)
            .arg(&self.source_path)
            .arg("-lm")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take();
        let reader = thread::spawn(move || {
            let mut diagnostic = String::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_string(&mut diagnostic) {
                    diagnostic.push_str(&format!("\n<could not read compiler output: {e}>"));
                }
            }
            diagnostic
        });

        let status = match options.timeout {
            None => child.wait()?,
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= timeout {
                        if let Err(e) = child.kill() {
                            warn!("could not stop the compiler: {e}");
                        }
                        child.wait()?;
                        remove_artifact(&library_path);
                        return Err(EvaluatorError::CompileTimeout { timeout });
                    }
                    thread::sleep(Duration::from_millis(5));
                }
            }
        };

        let diagnostic = reader.join().unwrap_or_default();
        if !status.success() {
            remove_artifact(&library_path);
            return Err(EvaluatorError::Compile { diagnostic });
        }
        Ok(CompiledCode {
            library_path,
            function_name: self.function_name.clone(),
        })
    }
}

fn remove_artifact(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("could not remove {}: {e}", path.display());
        }
    }
}

/// A compiled library on disk.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    pub library_path: PathBuf,
    pub function_name: String,
}

type Callback = unsafe extern "C" fn(
    ctx: *const c_void,
    function: usize,
    args: *const Complex<f64>,
    n_args: usize,
) -> Complex<f64>;

type RawEvaluator = unsafe extern "C" fn(
    params: *const Complex<f64>,
    out: *mut Complex<f64>,
    cb: Callback,
    ctx: *const c_void,
);

/// Forwards a call from native code to the external function table in `ctx`.
unsafe extern "C" fn dispatch(
    ctx: *const c_void,
    function: usize,
    args: *const Complex<f64>,
    n_args: usize,
) -> Complex<f64> {
    let nan = Complex::new(f64::NAN, f64::NAN);
    if ctx.is_null() {
        return nan;
    }
    // SAFETY: ctx points at the function table owned by the calling CompiledEvaluator
    let table = unsafe { &*(ctx as *const Vec<ExternalFunction>) };
    let args = if n_args == 0 || args.is_null() {
        &[]
    } else {
        // SAFETY: generated code passes an array of n_args values
        unsafe { std::slice::from_raw_parts(args, n_args) }
    };
    match table.get(function) {
        Some(f) => catch_unwind(AssertUnwindSafe(|| f(args))).unwrap_or(nan),
        None => nan,
    }
}

impl CompiledCode {
    pub fn load(&self, evaluator: &TensorEvaluator) -> Result<CompiledEvaluator, EvaluatorError> {
        // SAFETY: the library was produced from our own generated source
        let library = unsafe { Library::new(&self.library_path)? };
        let function = {
            // SAFETY: the signature matches the exported C function
            let symbol: libloading::Symbol<RawEvaluator> =
                unsafe { library.get(self.function_name.as_bytes())? };
            *symbol
        };
        Ok(CompiledEvaluator {
            function,
            structure: evaluator.structure.clone(),
            n_params: evaluator.params.len(),
            n_outputs: evaluator.outputs.len(),
            functions: evaluator.functions.iter().map(|(_, f)| f.clone()).collect(),
            library_path: self.library_path.clone(),
            _library: library,
        })
    }
}

/// A natively compiled evaluator. The library stays loaded while it lives.
pub struct CompiledEvaluator {
    function: RawEvaluator,
    structure: VecStructure,
    n_params: usize,
    n_outputs: usize,
    functions: Vec<ExternalFunction>,
    library_path: PathBuf,
    // dropped last, `function` points into it
    _library: Library,
}

impl std::fmt::Debug for CompiledEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledEvaluator")
            .field("structure", &self.structure)
            .field("n_params", &self.n_params)
            .field("n_outputs", &self.n_outputs)
            .field("library_path", &self.library_path)
            .finish()
    }
}

impl CompiledEvaluator {
    pub fn structure(&self) -> &VecStructure {
        &self.structure
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn evaluate_complex_into(
        &self,
        params: &[Complex<f64>],
        out: &mut [Complex<f64>],
    ) -> Result<(), BindingError> {
        if params.len() != self.n_params {
            return Err(BindingError::ParamLength {
                expected: self.n_params,
                found: params.len(),
            });
        }
        if out.len() != self.n_outputs {
            return Err(BindingError::OutputLength {
                expected: self.n_outputs,
                found: out.len(),
            });
        }
        let ctx = &self.functions as *const Vec<ExternalFunction> as *const c_void;
        // SAFETY: both buffers have the lengths the generated code indexes up to
        unsafe { (self.function)(params.as_ptr(), out.as_mut_ptr(), dispatch, ctx) };
        Ok(())
    }

    /// One result tensor per parameter vector, in input order.
    pub fn evaluate_complex(
        &self,
        batch: &[Vec<Complex<f64>>],
    ) -> Result<Vec<DenseTensor<Complex<f64>>>, BindingError> {
        batch
            .iter()
            .map(|params| {
                let mut data = vec![Complex::zero(); self.n_outputs];
                self.evaluate_complex_into(params, &mut data)?;
                Ok(DenseTensor {
                    data,
                    structure: self.structure.clone(),
                })
            })
            .collect()
    }
}
