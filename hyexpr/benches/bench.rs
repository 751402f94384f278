use criterion::{Criterion, black_box, criterion_group, criterion_main};

use hyexpr::interval::interval_evaluate;
use hyexpr::parser::parse_value;
use hyexpr::{Expression, Interval, Operator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

const VARIABLES: [&str; 3] = ["x", "y", "z"];

fn build_simple_expr() -> Expression {
    parse_value("x' == -0.5 * x + sin(y) * z ^ 2 - 3").unwrap()
}

fn build_complex_expr() -> Expression {
    // Medium-sized arithmetic tree, seeded for determinism.
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);

    fn next_create(budget: usize, rng: &mut impl Rng) -> Expression {
        if budget == 0 || rng.random_bool(0.2) {
            return match rng.random_range(0..=1) {
                0 => Expression::num(rng.random_range(-10.0..10.0)),
                _ => Expression::var(VARIABLES[rng.random_range(0..VARIABLES.len())]),
            };
        }

        match rng.random_range(0..=5) {
            0 => next_create(budget - 1, rng) + next_create(budget - 1, rng),
            1 => next_create(budget - 1, rng) - next_create(budget - 1, rng),
            2 => next_create(budget - 1, rng) * next_create(budget - 1, rng),
            3 => -next_create(budget - 1, rng),
            4 => Expression::unary(Operator::Cos, next_create(budget - 1, rng)),
            _ => Expression::pow(next_create(budget - 1, rng), Expression::num(2.0)),
        }
    }

    next_create(10, &mut rng)
}

fn bench_parse_print(c: &mut Criterion) {
    let simple = build_simple_expr().to_string();
    let complex = build_complex_expr().to_string();

    c.bench_function("parse_simple", |b| {
        b.iter(|| {
            black_box(parse_value(&simple).unwrap());
        })
    });

    c.bench_function("parse_complex", |b| {
        b.iter(|| {
            black_box(parse_value(&complex).unwrap());
        })
    });

    let expr = build_complex_expr();
    c.bench_function("print_complex", |b| {
        b.iter(|| {
            black_box(expr.to_default_string());
        })
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let expr = build_complex_expr();
    let point = |name: &str| match name {
        "x" => Some(0.5),
        "y" => Some(-1.25),
        "z" => Some(2.0),
        _ => None,
    };

    c.bench_function("evaluate_complex", |b| {
        b.iter(|| {
            black_box(expr.evaluate(&point).unwrap());
        })
    });

    c.bench_function("evaluate_by_substitution_complex", |b| {
        b.iter(|| {
            black_box(expr.evaluate_constant(&point).unwrap());
        })
    });

    let bounds = |_: &str| Some(Interval::new(-1.0, 1.0));
    c.bench_function("interval_evaluate_complex", |b| {
        b.iter(|| {
            black_box(interval_evaluate(&expr, &bounds).unwrap());
        })
    });
}

criterion_group!(benches, bench_parse_print, bench_evaluate);
criterion_main!(benches);
