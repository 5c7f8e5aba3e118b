#![allow(dead_code)]

use std::process::Command;

use indexmap::IndexMap;
use rand::{distributions::Uniform, Rng, SeedableRng};
use rand_xoshiro::Xoroshiro64Star;
use symtensor::{
    complex::Complex, evaluate::CompileOptions, parse, structure::NamedStructure,
    tensor_library::shadow, Atom,
};

/// A quark line: two spinors, a vector boson and a fermion propagator.
pub const QUARK_LINE: &str = "γ(aind(loru(4,3),bis(4,2),bis(4,13)))*(P(2,aind(lord(4,11)))*γ(aind(loru(4,11),bis(4,13),bis(4,1)))+mq*id(aind(bis(4,13),bis(4,1))))*W(1,aind(bis(4,2)))*W(3,aind(lord(4,3)))";

pub const EXTERNAL: [&str; 3] = [
    "W(1,aind(bis(4,2)))",
    "W(3,aind(lord(4,3)))",
    "P(2,aind(lord(4,11)))",
];

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn constants() -> IndexMap<Atom, Atom> {
    IndexMap::from([(parse("mq").unwrap(), Atom::num(173))])
}

/// `𝑖` followed by the components of every external tensor.
pub fn params() -> Vec<Atom> {
    let mut params = vec![Atom::i()];
    for tensor in EXTERNAL {
        let structure = NamedStructure::try_from_atom(&parse(tensor).unwrap())
            .unwrap()
            .unwrap();
        params.extend(shadow(&structure).unwrap().data);
    }
    params
}

/// Random parameter vectors, with the leading `𝑖` bound to the imaginary unit.
pub fn random_batch(n: usize, len: usize, seed: u64) -> Vec<Vec<Complex<f64>>> {
    let mut rng = Xoroshiro64Star::seed_from_u64(seed);
    let range = Uniform::new(-1., 1.);
    (0..n)
        .map(|_| {
            let mut v: Vec<_> = (0..len)
                .map(|_| Complex::new(rng.sample(range), rng.sample(range)))
                .collect();
            v[0] = Complex::i();
            v
        })
        .collect()
}

/// Whether the configured C compiler can be started at all.
pub fn compiler_available() -> bool {
    let compiler = CompileOptions::from_env().compiler;
    let found = Command::new(&compiler)
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success());
    if !found {
        eprintln!("{compiler} not found, skipping native compilation");
    }
    found
}
