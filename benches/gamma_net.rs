use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use symtensor::{parse, Atom, ContractionSettings, TensorNetwork};

/// A spinor chain `V γ.p1 γ.p2 ... γ^μ ... γ_μ ... U`, where positive entries
/// are slashed momenta and each `-1` closes a gamma pair.
fn gamma_chain(minkindices: &[i32]) -> String {
    let mut factors = vec!["V(aind(bis(4,0)))".to_string()];
    let mut open_pair = false;
    let mut momentum = 0;
    for (i, m) in minkindices.iter().enumerate() {
        let (ui, uj) = (i, i + 1);
        if *m > 0 {
            momentum += 1;
            factors.push(format!("P({momentum},aind(lord(4,{m})))"));
            factors.push(format!("gamma(aind(loru(4,{m}),bis(4,{ui}),bis(4,{uj})))"));
        } else {
            let mu = if open_pair { "lord(4,10001)" } else { "loru(4,10001)" };
            open_pair = !open_pair;
            factors.push(format!("gamma(aind({mu},bis(4,{ui}),bis(4,{uj})))"));
        }
    }
    factors.push(format!("U(aind(bis(4,{})))", minkindices.len()));
    factors.join("*")
}

fn indices(n: i32, m: i32) -> Vec<i32> {
    let spacings: [i32; 2] = [n, m];
    let mut start = 1;
    let mut ranges = Vec::new();

    for &spacing in spacings.iter() {
        ranges.push((start..start + spacing).chain(std::iter::once(-1)));
        start += spacing;
    }

    ranges.into_iter().flatten().collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let expr: Atom = parse(&gamma_chain(&indices(3, 4))).unwrap();

    let mut group = c.benchmark_group("gamma_net");

    group.bench_function("gamma_net_contract_identities", |b| {
        b.iter_batched(
            || TensorNetwork::from_expression(&expr, ContractionSettings::default()).unwrap(),
            |mut net| {
                net.contract().unwrap();
                net.result().unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("gamma_net_contract_explicit", |b| {
        b.iter_batched(
            || TensorNetwork::from_expression(&expr, ContractionSettings::explicit()).unwrap(),
            |mut net| {
                net.contract().unwrap();
                net.result().unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
