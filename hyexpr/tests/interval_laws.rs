use hyexpr::interval::interval_evaluate;
use hyexpr::parser::parse_value;
use hyexpr::{Interval, Operator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn random_interval(rng: &mut impl Rng) -> Interval {
    let a: f64 = rng.random_range(-100.0..100.0);
    let b: f64 = rng.random_range(-100.0..100.0);
    Interval::new(a.min(b), a.max(b))
}

#[test]
fn union_contains_both_operands() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    for _ in 0..1000 {
        let (a, b) = (random_interval(&mut rng), random_interval(&mut rng));
        let u = a.union(&b);
        assert!(u.contains_interval(&a), "{u} does not contain {a}");
        assert!(u.contains_interval(&b), "{u} does not contain {b}");
    }
}

#[test]
fn sum_width_is_sum_of_widths() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    for _ in 0..1000 {
        let (a, b) = (random_interval(&mut rng), random_interval(&mut rng));
        let sum = a + b;
        assert!((sum.width() - (a.width() + b.width())).abs() < 1e-9);
    }
}

#[test]
fn negative_scalar_swaps_bounds() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    for _ in 0..1000 {
        let a = random_interval(&mut rng);
        let k: f64 = rng.random_range(-10.0..-0.001);
        let scaled = a.scale(k);
        assert_eq!(scaled.min, a.max * k);
        assert_eq!(scaled.max, a.min * k);
        assert!(scaled.min <= scaled.max);
    }
}

#[test]
fn evaluation_encloses_sampled_values() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    let exprs = [
        "x * y - x ^ 2",
        "sin(x) * cos(y) + exp(x / 10)",
        "(x - y) / (2 + y ^ 2)",
        "-x ^ 3 + sqrt(y + 101)",
    ];
    for text in exprs {
        let e = parse_value(text).unwrap();
        for _ in 0..50 {
            let (bx, by) = (random_interval(&mut rng), random_interval(&mut rng));
            let bounds = |name: &str| match name {
                "x" => Some(bx),
                "y" => Some(by),
                _ => None,
            };
            let enclosure = interval_evaluate(&e, &bounds).unwrap();
            for _ in 0..20 {
                let x = rng.random_range(bx.min..=bx.max);
                let y = rng.random_range(by.min..=by.max);
                let value = e
                    .evaluate(&|name| match name {
                        "x" => Some(x),
                        "y" => Some(y),
                        _ => None,
                    })
                    .unwrap();
                let tol = 1e-9 * (1.0 + value.abs());
                assert!(
                    value >= enclosure.min - tol && value <= enclosure.max + tol,
                    "{text} = {value} at ({x}, {y}) escapes {enclosure}"
                );
            }
        }
    }
}

#[test]
fn unsupported_operators_are_reported() {
    let e = parse_value("x < 1").unwrap();
    let err = interval_evaluate(&e, &|_| Some(Interval::new(0.0, 1.0))).unwrap_err();
    assert!(err.is_unsupported_operator());
    assert_eq!(Operator::Less.priority(), Some(2));
}
