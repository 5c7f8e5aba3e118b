use std::time::Instant;

use anyhow::Context;
use indexmap::IndexMap;
use log::info;
use rand::{distributions::Uniform, Rng, SeedableRng};
use rand_xoshiro::Xoroshiro64Star;
use symtensor::{
    complex::Complex,
    evaluate::{CompileOptions, FunctionMap},
    parse,
    structure::NamedStructure,
    tensor_library::shadow,
    Atom, TensorNetwork,
};

const QUARK_LINE: &str = "γ(aind(loru(4,3),bis(4,2),bis(4,13)))*(P(2,aind(lord(4,11)))*γ(aind(loru(4,11),bis(4,13),bis(4,1)))+mq*id(aind(bis(4,13),bis(4,1))))*W(1,aind(bis(4,2)))*W(3,aind(lord(4,3)))";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut net = TensorNetwork::parse(QUARK_LINE)?;
    println!("{}", net.dot());
    net.contract()?;
    let tensor = net.result()?;
    println!("{tensor}");

    let mut params = vec![Atom::i()];
    for external in ["W(1,aind(bis(4,2)))", "W(3,aind(lord(4,3)))", "P(2,aind(lord(4,11)))"] {
        let structure = NamedStructure::try_from_atom(&parse(external)?)?
            .with_context(|| format!("{external} is not a tensor"))?;
        params.extend(shadow(&structure)?.data);
    }
    let constants = IndexMap::from([(parse("mq")?, Atom::num(173))]);
    let evaluator = tensor.evaluator(&constants, &params, &FunctionMap::new())?;
    info!("{} instructions", evaluator.instructions().len());

    let mut rng = Xoroshiro64Star::seed_from_u64(1);
    let range = Uniform::new(-1., 1.);
    let batch: Vec<Vec<Complex<f64>>> = (0..1000)
        .map(|_| {
            std::iter::once(Complex::i())
                .chain((1..params.len()).map(|_| Complex::new(rng.sample(range), rng.sample(range))))
                .collect()
        })
        .collect();

    let now = Instant::now();
    let interpreted = evaluator.evaluate_complex(&batch)?;
    println!("interpreted: {:?}", now.elapsed());

    let dir = std::env::temp_dir();
    let compiled = evaluator.compile(
        "quark_line",
        dir.join("quark_line.c"),
        dir.join(format!("quark_line.{}", std::env::consts::DLL_EXTENSION)),
        &CompileOptions::from_env(),
    )?;
    let now = Instant::now();
    let native = compiled.evaluate_complex(&batch)?;
    println!("compiled: {:?}", now.elapsed());

    println!("first result {:?}", interpreted[0].data);
    println!("compiled     {:?}", native[0].data);
    Ok(())
}
