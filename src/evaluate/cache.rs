use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use log::debug;

use crate::{
    parametric::ParamTensor,
    symbolic::{Atom, Symbol},
    utils::stable_hash,
};

use super::{CompileOptions, CompiledEvaluator, EvaluatorError, FunctionMap};

/// Identifies a compiled evaluator: the tensor together with everything it
/// was bound to. External functions are identified by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub expression: u64,
    pub constants: Vec<(Atom, Atom)>,
    pub params: Vec<Atom>,
    pub functions: Vec<Symbol>,
}

impl CacheKey {
    pub fn new(
        tensor: &ParamTensor,
        constants: &IndexMap<Atom, Atom>,
        params: &[Atom],
        functions: &FunctionMap,
    ) -> Self {
        let expression = match tensor {
            ParamTensor::Symbolic(s) => stable_hash(&(&s.structure, s.expression.canonical_hash())),
            ParamTensor::Explicit(d) => stable_hash(&(&d.structure, &d.data)),
        };
        CacheKey {
            expression,
            constants: constants
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            params: params.to_vec(),
            functions: functions.keys().cloned().collect(),
        }
    }

    fn digest(&self) -> u64 {
        stable_hash(self)
    }
}

/// Compiled evaluators shared by key. Artifacts are written to `dir`.
#[derive(Debug)]
pub struct EvaluatorCache {
    dir: PathBuf,
    options: CompileOptions,
    entries: IndexMap<CacheKey, Arc<CompiledEvaluator>>,
}

impl EvaluatorCache {
    pub fn new(dir: impl Into<PathBuf>, options: CompileOptions) -> Self {
        EvaluatorCache {
            dir: dir.into(),
            options,
            entries: IndexMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The cached evaluator for this binding, compiling it on a miss.
    pub fn get_or_compile(
        &mut self,
        tensor: &ParamTensor,
        constants: &IndexMap<Atom, Atom>,
        params: &[Atom],
        functions: &FunctionMap,
    ) -> Result<Arc<CompiledEvaluator>, EvaluatorError> {
        let key = CacheKey::new(tensor, constants, params, functions);
        if let Some(hit) = self.entries.get(&key) {
            debug!("evaluator cache hit {:016x}", key.digest());
            return Ok(hit.clone());
        }

        let name = format!("symtensor_{:016x}", key.digest());
        let source = self.dir.join(format!("{name}.c"));
        let library = self
            .dir
            .join(format!("{name}.{}", std::env::consts::DLL_EXTENSION));
        let compiled = Arc::new(
            tensor
                .evaluator(constants, params, functions)?
                .compile(&name, source, library, &self.options)?,
        );
        self.entries.insert(key, compiled.clone());
        Ok(compiled)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompiledEvaluator>> {
        self.entries.get(key).cloned()
    }

    /// Drops an entry. Evaluators handed out earlier stay usable.
    pub fn invalidate(&mut self, key: &CacheKey) -> Option<Arc<CompiledEvaluator>> {
        self.entries.shift_remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::symbolic::parse;

    use super::*;

    #[test]
    fn keys_cover_the_binding() {
        let tensor = ParamTensor::new_scalar(parse("m*x").unwrap());
        let x = [parse("x").unwrap()];
        let m2 = IndexMap::from([(parse("m").unwrap(), Atom::num(2))]);
        let m3 = IndexMap::from([(parse("m").unwrap(), Atom::num(3))]);
        let functions = FunctionMap::new();

        let a = CacheKey::new(&tensor, &m2, &x, &functions);
        assert_eq!(a, CacheKey::new(&tensor, &m2, &x, &functions));
        assert_ne!(a, CacheKey::new(&tensor, &m3, &x, &functions));
        assert_ne!(a, CacheKey::new(&tensor, &m2, &[], &functions));

        let other = ParamTensor::new_scalar(parse("m*x+1").unwrap());
        assert_ne!(a, CacheKey::new(&other, &m2, &x, &functions));

        let cache = EvaluatorCache::new(std::env::temp_dir(), CompileOptions::default());
        assert!(cache.is_empty());
        assert!(cache.get(&a).is_none());
    }
}
