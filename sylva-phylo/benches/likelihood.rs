//! Pruning, reconstruction and simulation throughput.
//!
//! Data is simulated under the benchmarked model so every run sees the
//! same alignment.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use sylva_phylo::{
    Alphabet, BranchAndBound, Calculator, Domain, DynamicProgramming, EngineConfig, Gtr,
    JointReconstructor, MarginalReconstructor, Model, Parameters, PhyloTree, Probabilities,
    Simulator,
};

// =========================================================================
// Fixtures
// =========================================================================

/// Caterpillar tree with `leaves` tips and varied branch lengths.
fn caterpillar(leaves: usize) -> PhyloTree {
    let mut newick = String::from("(t0:0.05,t1:0.07)");
    for i in 2..leaves {
        newick = format!("({}:0.02,t{}:{:.3})", newick, i, 0.03 + 0.01 * (i % 5) as f64);
    }
    newick.push(';');
    PhyloTree::from_newick(&newick).unwrap()
}

fn gtr_gamma() -> (Model, Parameters) {
    let gtr = Gtr::new(
        vec!["ac".into(), "ag".into(), "at".into(), "cg".into(), "ct".into(), 1.0.into()],
        vec![0.3.into(), 0.2.into(), 0.2.into(), 0.3.into()],
    )
    .unwrap();
    let model = Model::single(Alphabet::dna(), gtr).unwrap().with_gamma("alpha", 4).unwrap();
    let mut params = Parameters::new();
    let values = [
        ("ac", 1.2),
        ("ag", 3.9),
        ("at", 0.8),
        ("cg", 1.1),
        ("ct", 4.7),
        ("alpha", 0.5),
    ];
    for (name, v) in values {
        params = params.free(name, v, Domain::Positive).unwrap();
    }
    (model, params)
}

// =========================================================================
// Benchmarks
// =========================================================================

fn bench_pruning(c: &mut Criterion) {
    let (model, params) = gtr_gamma();
    let dna = Alphabet::dna();
    let mut group = c.benchmark_group("pruning");

    for &leaves in &[8usize, 32, 128] {
        let tree = caterpillar(leaves);
        let probs = Probabilities::new(&model, &tree, &params, &EngineConfig::default()).unwrap();
        let aln = Simulator::new(&probs, &tree, &dna, 42).unwrap().alignment(1000).unwrap();
        let calc: Calculator =
            Calculator::new(model.clone(), tree.clone(), &aln, EngineConfig::default()).unwrap();

        group.throughput(Throughput::Elements(aln.len() as u64));
        group.bench_with_input(BenchmarkId::new("evaluate", leaves), &probs, |b, probs| {
            b.iter(|| black_box(calc.evaluate(probs).unwrap().log_likelihood))
        });
        group.bench_with_input(BenchmarkId::new("snapshot", leaves), &params, |b, params| {
            b.iter(|| black_box(calc.probabilities(params).unwrap().n_categories()))
        });
    }
    group.finish();
}

fn bench_reconstruction(c: &mut Criterion) {
    let (model, params) = gtr_gamma();
    let dna = Alphabet::dna();
    let mut group = c.benchmark_group("reconstruction");

    // 4^5 joint assignments: small enough for branch-and-bound.
    let tree = caterpillar(6);
    let probs = Probabilities::new(&model, &tree, &params, &EngineConfig::default()).unwrap();
    let aln = Simulator::new(&probs, &tree, &dna, 7).unwrap().alignment(200).unwrap();
    group.throughput(Throughput::Elements(aln.len() as u64));

    group.bench_function("joint_dp", |b| {
        let dp = DynamicProgramming::new(&tree, &dna);
        b.iter(|| black_box(dp.reconstruct(&probs, &aln).unwrap().len()))
    });
    group.bench_function("joint_bnb", |b| {
        let bnb = BranchAndBound::new(&tree, &dna);
        b.iter(|| black_box(bnb.reconstruct(&probs, &aln).unwrap().len()))
    });
    group.bench_function("marginal", |b| {
        let marginal: MarginalReconstructor = MarginalReconstructor::new(&tree, &dna);
        b.iter(|| black_box(marginal.calculate(&probs, &aln).unwrap().len()))
    });
    group.finish();
}

fn bench_simulation(c: &mut Criterion) {
    let (model, params) = gtr_gamma();
    let dna = Alphabet::dna();
    let tree = caterpillar(32);
    let probs = Probabilities::new(&model, &tree, &params, &EngineConfig::default()).unwrap();

    let mut group = c.benchmark_group("simulation");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("alignment_1000", |b| {
        b.iter(|| {
            let mut sim = Simulator::new(&probs, &tree, &dna, 1).unwrap();
            black_box(sim.alignment(1000).unwrap().len())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_pruning, bench_reconstruction, bench_simulation);
criterion_main!(benches);
