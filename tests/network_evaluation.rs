use std::{sync::Arc, time::Duration};

use approx::assert_relative_eq;
use indexmap::IndexMap;
use symtensor::{
    complex::Complex,
    data::DenseTensor,
    evaluate::{
        BindingError, CompileOptions, CompiledEvaluator, EvaluatorCache, EvaluatorError,
        FunctionMap, InlineAsm, TensorEvaluator,
    },
    network::{ContractionSettings, StateError, Strategy},
    parse,
    symbolic::Symbol,
    structure::{HasStructure, Rep, ShapeError, TensorStructure},
    Atom, ParamTensor, TensorNetwork, TensorNetworkError,
};

mod common;
use common::*;

fn quark_line(settings: ContractionSettings) -> ParamTensor {
    let mut net = TensorNetwork::from_expression(&parse(QUARK_LINE).unwrap(), settings).unwrap();
    net.contract().unwrap();
    net.result().unwrap()
}

fn quark_line_evaluator() -> TensorEvaluator {
    quark_line(ContractionSettings::default())
        .evaluator(&constants(), &params(), &FunctionMap::new())
        .unwrap()
}

#[test]
fn quark_line_leaves_one_spinor_index() {
    init();
    let result = quark_line(ContractionSettings::default());
    let structure = result.structure();
    assert_eq!(structure.order(), 1);
    assert_eq!(structure.structure[0].kind(), Rep::Bispinor);
    assert_eq!(result.size().unwrap(), 4);
}

#[test]
fn quark_line_is_independent_of_the_contraction_path() {
    init();
    let batch = random_batch(3, params().len(), 11);
    let evaluate = |settings: ContractionSettings| {
        quark_line(settings)
            .evaluator(&constants(), &params(), &FunctionMap::new())
            .unwrap()
            .evaluate_complex(&batch)
            .unwrap()
    };

    let reference = evaluate(ContractionSettings::default());
    for settings in [
        ContractionSettings::explicit(),
        ContractionSettings {
            strategy: Strategy::MinDegree,
            ..Default::default()
        },
    ] {
        for (a, b) in reference.iter().zip(evaluate(settings)) {
            for (x, y) in a.data.iter().zip(&b.data) {
                assert_relative_eq!(*x, *y, epsilon = 1e-10);
            }
        }
    }
}

#[test]
fn quark_line_is_linear_in_the_spinor() {
    let evaluator = quark_line_evaluator();
    let mut batch = random_batch(1, params().len(), 5);
    let mut doubled = batch[0].clone();
    for v in &mut doubled[1..5] {
        *v = *v * Complex::new_re(2.0);
    }
    batch.push(doubled);

    let out = evaluator.evaluate_complex_par(&batch).unwrap();
    for (x, y) in out[0].data.iter().zip(&out[1].data) {
        assert_relative_eq!(*x * Complex::new_re(2.0), *y, epsilon = 1e-10);
    }
}

fn bits(results: &[DenseTensor<Complex<f64>>]) -> Vec<(u64, u64)> {
    results
        .iter()
        .flat_map(|t| t.data.iter().map(|z| (z.re.to_bits(), z.im.to_bits())))
        .collect()
}

#[test]
fn quark_line_runs_are_bitwise_identical() {
    let batch = random_batch(4, params().len(), 23);
    let run = || {
        let mut net = TensorNetwork::parse(QUARK_LINE).unwrap();
        net.contract().unwrap();
        let tensor = net.result().unwrap();
        let evaluator = tensor
            .evaluator(&constants(), &params(), &FunctionMap::new())
            .unwrap();
        (tensor, bits(&evaluator.evaluate_complex(&batch).unwrap()))
    };
    let (first_tensor, first) = run();
    let (second_tensor, second) = run();
    assert_eq!(first_tensor, second_tensor);
    assert_eq!(first, second);

    let parallel = quark_line_evaluator().evaluate_complex_par(&batch).unwrap();
    assert_eq!(bits(&parallel), first);
}

#[test]
fn evaluators_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<TensorEvaluator>();
    assert_send_sync::<CompiledEvaluator>();
    assert_send_sync::<EvaluatorCache>();
    assert_send_sync::<ParamTensor>();
    assert_send_sync::<TensorNetwork>();
}

#[test]
fn shared_evaluators_serve_many_threads() {
    init();
    let evaluator = quark_line_evaluator();
    let batch = random_batch(32, params().len(), 17);
    let expected = evaluator.evaluate_complex(&batch).unwrap();

    let interpreted: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = batch
            .chunks(8)
            .map(|chunk| {
                let evaluator = &evaluator;
                s.spawn(move || evaluator.evaluate_complex(chunk).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    assert_eq!(bits(&interpreted), bits(&expected));

    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let compiled = evaluator
        .compile(
            "shared",
            dir.path().join("shared.c"),
            dir.path().join("shared.so"),
            &CompileOptions::from_env(),
        )
        .unwrap();
    let native: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = batch
            .chunks(8)
            .map(|chunk| {
                let compiled = &compiled;
                s.spawn(move || compiled.evaluate_complex(chunk).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    assert_eq!(native.len(), expected.len());
    for (a, b) in expected.iter().zip(&native) {
        for (x, y) in a.data.iter().zip(&b.data) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }
}

#[test]
fn compiled_matches_interpreted() {
    init();
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let evaluator = quark_line_evaluator();
    let batch = random_batch(8, params().len(), 3);
    let expected = evaluator.evaluate_complex(&batch).unwrap();

    for (name, inline_asm) in [("portable", InlineAsm::None), ("with_asm", InlineAsm::default())] {
        let options = CompileOptions {
            inline_asm,
            ..CompileOptions::from_env()
        };
        let compiled = evaluator
            .compile(
                name,
                dir.path().join(format!("{name}.c")),
                dir.path().join(format!("{name}.so")),
                &options,
            )
            .unwrap();
        assert_eq!(compiled.structure(), evaluator.structure());

        let got = compiled.evaluate_complex(&batch).unwrap();
        for (a, b) in expected.iter().zip(&got) {
            for (x, y) in a.data.iter().zip(&b.data) {
                assert_relative_eq!(*x, *y, epsilon = 1e-9);
            }
        }
    }
}

#[test]
fn external_functions_are_called_back() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let x = parse("x").unwrap();
    let mut functions = FunctionMap::new();
    functions.insert(
        Symbol::new("f"),
        Arc::new(|args: &[Complex<f64>]| args[0] * args[0] + Complex::one()),
    );
    let evaluator = ParamTensor::new_scalar(parse("2*f(x)").unwrap())
        .evaluator(&IndexMap::new(), &[x], &functions)
        .unwrap();
    let compiled = evaluator
        .compile(
            "with_callback",
            dir.path().join("f.c"),
            dir.path().join("f.so"),
            &CompileOptions::from_env(),
        )
        .unwrap();

    let batch = vec![vec![Complex::new(3.0, 0.0)]];
    let native = compiled.evaluate_complex(&batch).unwrap();
    let interpreted = evaluator.evaluate_complex(&batch).unwrap();
    assert_relative_eq!(native[0].data[0], Complex::new(20.0, 0.0), epsilon = 1e-12);
    assert_relative_eq!(native[0].data[0], interpreted[0].data[0], epsilon = 1e-12);
}

#[test]
fn compiler_failures_leave_no_library() {
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let evaluator = quark_line_evaluator();
    let library = dir.path().join("broken.so");

    let broken = CompileOptions {
        custom: vec!["-include".into(), "/nonexistent/symtensor.h".into()],
        ..CompileOptions::from_env()
    };
    match evaluator.compile("broken", dir.path().join("broken.c"), &library, &broken) {
        Err(EvaluatorError::Compile { diagnostic }) => assert!(!diagnostic.is_empty()),
        other => panic!("expected a compiler diagnostic, got {other:?}"),
    }
    assert!(!library.exists());

    let impatient = CompileOptions {
        timeout: Some(Duration::ZERO),
        ..CompileOptions::from_env()
    };
    match evaluator.compile("late", dir.path().join("late.c"), &library, &impatient) {
        Err(EvaluatorError::CompileTimeout { timeout }) => assert_eq!(timeout, Duration::ZERO),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(!library.exists());
}

#[test]
fn cache_reuses_compiled_evaluators() {
    init();
    if !compiler_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut cache = EvaluatorCache::new(dir.path(), CompileOptions::from_env());
    let tensor = quark_line(ContractionSettings::default());
    let functions = FunctionMap::new();

    let first = cache
        .get_or_compile(&tensor, &constants(), &params(), &functions)
        .unwrap();
    let second = cache
        .get_or_compile(&tensor, &constants(), &params(), &functions)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
    assert!(first.library_path().starts_with(dir.path()));

    let heavier = IndexMap::from([(parse("mq").unwrap(), Atom::num(175))]);
    let third = cache
        .get_or_compile(&tensor, &heavier, &params(), &functions)
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert!(cache.is_empty());
    let batch = random_batch(1, params().len(), 1);
    assert_eq!(first.evaluate_complex(&batch).unwrap()[0].data.len(), 4);
}

#[test]
fn errors_surface_as_values() {
    let mut net = TensorNetwork::parse(QUARK_LINE).unwrap();
    assert!(matches!(
        net.result(),
        Err(TensorNetworkError::State(StateError::ContractionPending { .. }))
    ));

    assert!(matches!(
        TensorNetwork::parse("A(bis(4,1))*B(bis(3,1))"),
        Err(TensorNetworkError::Shape(ShapeError::IncompatibleDimensions { .. }))
    ));
    assert!(matches!(
        TensorNetwork::parse("A(bis(4,1))*B(bis(4,1))*C(bis(4,1))"),
        Err(TensorNetworkError::Shape(ShapeError::OverContracted { count: 3, .. }))
    ));

    net.contract().unwrap();
    let tensor = net.result().unwrap();
    let missing_mass = tensor.evaluator(&IndexMap::new(), &params(), &FunctionMap::new());
    assert!(matches!(
        missing_mass,
        Err(EvaluatorError::Binding(BindingError::Unbound(_)))
    ));

    let evaluator = quark_line_evaluator();
    assert_eq!(
        evaluator.evaluate_complex(&[vec![Complex::i()]]).unwrap_err(),
        BindingError::ParamLength {
            expected: params().len(),
            found: 1
        }
    );
}
