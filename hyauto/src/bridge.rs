//! Numeric bridge: algebraic simplification and bounding of an expression over a box.
//!
//! Passes depend on [`NumericBridge`] only. [`LocalBridge`] is the in-process
//! implementation, [`TimeoutBridge`] bounds the latency of any bridge, and
//! [`SharedBridge`] serializes access from worker threads and degrades to the local
//! bridge when the configured one is unavailable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{RecvTimeoutError, bounded};
use hyexpr::{EvalError, Expression, Interval, interval_evaluate};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::magic::{DEFAULT_BRIDGE_TIMEOUT_MS, SAMPLING_POINTS_PER_DIM};
use crate::utils::error::{HyError, HyResult};

/// Box over which an expression is bounded, keyed by variable name.
pub type Domain = BTreeMap<String, Interval>;

/// Range of an expression over a [`Domain`]. `sound` is false when the range may miss
/// part of the true one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub range: Interval,
    pub sound: bool,
}

impl Bound {
    pub fn sound(range: Interval) -> Self {
        Self { range, sound: true }
    }

    pub fn best_effort(range: Interval) -> Self {
        Self { range, sound: false }
    }
}

pub trait NumericBridge: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    /// Whether [`bound_over_domain`](Self::bound_over_domain) is expected to enclose the
    /// true range. Individual bounds still report their own soundness.
    fn is_sound(&self) -> bool;

    /// Upper bound on the latency of one call, if any.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn simplify(&self, e: &Expression) -> HyResult<Expression>;

    fn bound_over_domain(&self, e: &Expression, domain: &Domain) -> HyResult<Bound>;
}

/// How [`LocalBridge`] bounds expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundStrategy {
    /// Interval evaluation over `subdivisions` slices per dimension. Falls back to
    /// sampling for operators without an interval extension.
    Interval { subdivisions: usize },
    /// Min and max over a regular grid of samples. Not sound.
    Sampling { points_per_dim: usize },
}

/// Cap on the number of sub-boxes or samples per bound.
const MAX_EVALUATIONS: usize = 4096;

#[derive(Debug, Clone)]
pub struct LocalBridge {
    pub strategy: BoundStrategy,
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self {
            strategy: BoundStrategy::Interval { subdivisions: 8 },
        }
    }
}

impl LocalBridge {
    pub fn sampling() -> Self {
        Self {
            strategy: BoundStrategy::Sampling {
                points_per_dim: SAMPLING_POINTS_PER_DIM,
            },
        }
    }

    fn variables_of<'a>(e: &Expression, domain: &'a Domain) -> HyResult<Vec<(&'a str, Interval)>> {
        e.variables()
            .into_iter()
            .map(|var| {
                domain
                    .get_key_value(var.as_str())
                    .map(|(k, v)| (k.as_str(), *v))
                    .ok_or_else(|| HyError::from(EvalError::UnboundVariable { name: var }))
            })
            .collect()
    }

    /// Per-dimension count such that `count^dims` stays under [`MAX_EVALUATIONS`].
    fn per_dim(requested: usize, dims: usize) -> usize {
        let mut n = requested.max(1);
        while n > 1 && n.checked_pow(dims as u32).is_none_or(|total| total > MAX_EVALUATIONS) {
            n -= 1;
        }
        n
    }

    /// Visit the index tuples of an `n^dims` grid.
    fn for_each_index<E>(
        n: usize,
        dims: usize,
        mut f: impl FnMut(&[usize]) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut index = vec![0usize; dims];
        loop {
            f(&index)?;
            let mut d = 0;
            while d < dims {
                index[d] += 1;
                if index[d] < n {
                    break;
                }
                index[d] = 0;
                d += 1;
            }
            if d == dims {
                return Ok(());
            }
        }
    }

    fn bound_by_intervals(
        e: &Expression,
        vars: &[(&str, Interval)],
        subdivisions: usize,
    ) -> Result<Interval, EvalError> {
        let n = Self::per_dim(subdivisions, vars.len());
        let mut rv: Option<Interval> = None;

        Self::for_each_index(n, vars.len(), |index| -> Result<(), EvalError> {
            let slice = |d: usize| {
                let range = vars[d].1;
                if range.is_open() || n == 1 {
                    return range;
                }
                let width = range.width() / n as f64;
                let lo = range.min + width * index[d] as f64;
                let hi = if index[d] + 1 == n { range.max } else { lo + width };
                Interval::new(lo, hi)
            };
            let lookup = |name: &str| vars.iter().position(|(v, _)| *v == name).map(slice);
            let part = interval_evaluate(e, &lookup)?;
            rv = Some(rv.map_or(part, |acc| acc.union(&part)));
            Ok(())
        })?;

        Ok(rv.unwrap_or_else(|| Interval::point(0.0)))
    }

    fn bound_by_sampling(e: &Expression, vars: &[(&str, Interval)], points_per_dim: usize) -> HyResult<Interval> {
        if let Some((var, _)) = vars.iter().find(|(_, r)| r.is_open()) {
            return Err(HyError::UnsupportedCondition {
                expression: e.to_default_string(),
                message: format!("cannot sample over the unbounded range of '{var}'"),
            });
        }

        let n = Self::per_dim(points_per_dim.max(2), vars.len()).max(2);
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;

        Self::for_each_index(n, vars.len(), |index| -> HyResult<()> {
            let coord = |d: usize| {
                let range = vars[d].1;
                range.min + range.width() * index[d] as f64 / (n - 1) as f64
            };
            let lookup = |name: &str| vars.iter().position(|(v, _)| *v == name).map(coord);
            let value = e.evaluate(&lookup)?;
            lo = lo.min(value);
            hi = hi.max(value);
            Ok(())
        })?;

        Ok(Interval::new(lo, hi))
    }
}

impl NumericBridge for LocalBridge {
    fn name(&self) -> &str {
        "local"
    }

    fn is_sound(&self) -> bool {
        matches!(self.strategy, BoundStrategy::Interval { .. })
    }

    fn simplify(&self, e: &Expression) -> HyResult<Expression> {
        Ok(e.simplify())
    }

    fn bound_over_domain(&self, e: &Expression, domain: &Domain) -> HyResult<Bound> {
        let vars = Self::variables_of(e, domain)?;

        match self.strategy {
            BoundStrategy::Interval { subdivisions } => {
                match Self::bound_by_intervals(e, &vars, subdivisions) {
                    Ok(range) => Ok(Bound::sound(range)),
                    Err(err @ EvalError::UnsupportedOperator { .. }) => {
                        warn!("interval bound of {e} failed ({err}); using sampled bound, which is not sound");
                        Self::bound_by_sampling(e, &vars, SAMPLING_POINTS_PER_DIM).map(Bound::best_effort)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            BoundStrategy::Sampling { points_per_dim } => {
                Self::bound_by_sampling(e, &vars, points_per_dim).map(Bound::best_effort)
            }
        }
    }
}

/// Runs every call of the wrapped bridge on a worker thread and gives up after a timeout.
///
/// A call that times out keeps running in the background; its result is discarded.
pub struct TimeoutBridge<B> {
    inner: Arc<B>,
    timeout: Duration,
}

impl<B: NumericBridge + 'static> TimeoutBridge<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    pub fn with_default_timeout(inner: B) -> Self {
        Self::new(inner, Duration::from_millis(DEFAULT_BRIDGE_TIMEOUT_MS))
    }

    fn call<T: Send + 'static>(&self, f: impl FnOnce(&B) -> HyResult<T> + Send + 'static) -> HyResult<T> {
        let (tx, rx) = bounded(1);
        let inner = self.inner.clone();
        std::thread::Builder::new()
            .name(format!("bridge-{}", self.inner.name()))
            .spawn(move || {
                let _ = tx.send(f(&inner));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(HyError::BridgeTimeout {
                millis: self.timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(HyError::BridgeUnavailable {
                name: self.inner.name().to_string(),
            }),
        }
    }
}

impl<B: NumericBridge + 'static> NumericBridge for TimeoutBridge<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn is_sound(&self) -> bool {
        self.inner.is_sound()
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    fn simplify(&self, e: &Expression) -> HyResult<Expression> {
        let e = e.clone();
        self.call(move |b| b.simplify(&e))
    }

    fn bound_over_domain(&self, e: &Expression, domain: &Domain) -> HyResult<Bound> {
        let (e, domain) = (e.clone(), domain.clone());
        self.call(move |b| b.bound_over_domain(&e, &domain))
    }
}

/// A bridge shared by the worker threads of one pass. Calls are serialized; when the
/// configured bridge reports itself unavailable, the local bridge answers instead.
pub struct SharedBridge {
    inner: Mutex<Box<dyn NumericBridge>>,
    fallback: LocalBridge,
    name: String,
}

impl SharedBridge {
    pub fn new(bridge: Box<dyn NumericBridge>) -> Self {
        Self {
            name: bridge.name().to_string(),
            inner: Mutex::new(bridge),
            fallback: LocalBridge::default(),
        }
    }

    pub fn local() -> Self {
        Self::new(Box::new(LocalBridge::default()))
    }

    fn with<T>(&self, f: impl FnOnce(&dyn NumericBridge) -> HyResult<T>) -> HyResult<T> {
        let bridge = self.inner.lock();
        if bridge.is_available() {
            f(&**bridge)
        } else {
            warn!(
                "numeric bridge '{}' is unavailable, using the local bridge",
                self.name
            );
            f(&self.fallback)
        }
    }
}

impl NumericBridge for SharedBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_sound(&self) -> bool {
        let bridge = self.inner.lock();
        if bridge.is_available() {
            bridge.is_sound()
        } else {
            self.fallback.is_sound()
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.lock().timeout()
    }

    fn simplify(&self, e: &Expression) -> HyResult<Expression> {
        self.with(|b| b.simplify(e))
    }

    fn bound_over_domain(&self, e: &Expression, domain: &Domain) -> HyResult<Bound> {
        debug!("bounding {e} over {} variables", domain.len());
        self.with(|b| b.bound_over_domain(e, domain))
    }
}

impl Default for SharedBridge {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyexpr::parser::parse_value;

    fn domain(items: &[(&str, f64, f64)]) -> Domain {
        items
            .iter()
            .map(|(v, lo, hi)| (v.to_string(), Interval::new(*lo, *hi)))
            .collect()
    }

    struct SlowBridge;

    impl NumericBridge for SlowBridge {
        fn name(&self) -> &str {
            "slow"
        }

        fn is_sound(&self) -> bool {
            true
        }

        fn simplify(&self, e: &Expression) -> HyResult<Expression> {
            Ok(e.clone())
        }

        fn bound_over_domain(&self, _: &Expression, _: &Domain) -> HyResult<Bound> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Bound::sound(Interval::point(0.0)))
        }
    }

    struct OfflineBridge;

    impl NumericBridge for OfflineBridge {
        fn name(&self) -> &str {
            "offline"
        }

        fn is_available(&self) -> bool {
            false
        }

        fn is_sound(&self) -> bool {
            true
        }

        fn simplify(&self, _: &Expression) -> HyResult<Expression> {
            Err(HyError::BridgeUnavailable { name: "offline".into() })
        }

        fn bound_over_domain(&self, _: &Expression, _: &Domain) -> HyResult<Bound> {
            Err(HyError::BridgeUnavailable { name: "offline".into() })
        }
    }

    #[test]
    fn interval_bound_encloses_square() {
        let e = parse_value("x ^ 2 - 3 * x").unwrap();
        let bound = LocalBridge::default()
            .bound_over_domain(&e, &domain(&[("x", 1.0, 2.0)]))
            .unwrap();
        assert!(bound.sound);
        // True range is [-2.25, -2].
        let range = bound.range;
        assert!(range.min <= -2.25 && range.max >= -2.0, "{range}");
        assert!(range.width() < 1.5, "{range}");
    }

    #[test]
    fn sampled_fallback_is_marked_unsound() {
        let bridge = LocalBridge::default();
        assert!(bridge.is_sound());
        // Comparisons have no interval extension.
        let e = parse_value("x * (x > 0.5)").unwrap();
        let bound = bridge
            .bound_over_domain(&e, &domain(&[("x", 0.0, 1.0)]))
            .unwrap();
        assert!(!bound.sound);
        assert!(bound.range.approx_eq(&Interval::new(0.0, 1.0), 1e-12), "{}", bound.range);
    }

    #[test]
    fn sampling_is_tight_but_not_sound() {
        let bridge = LocalBridge::sampling();
        assert!(!bridge.is_sound());
        let e = parse_value("x * y").unwrap();
        let bound = bridge
            .bound_over_domain(&e, &domain(&[("x", -1.0, 2.0), ("y", 0.0, 3.0)]))
            .unwrap();
        assert_eq!(bound, Bound::best_effort(Interval::new(-3.0, 6.0)));
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let e = parse_value("x + z").unwrap();
        let err = LocalBridge::default()
            .bound_over_domain(&e, &domain(&[("x", 0.0, 1.0)]))
            .unwrap_err();
        assert!(err.is_eval());
    }

    #[test]
    fn slow_bridge_times_out() {
        let bridge = TimeoutBridge::new(SlowBridge, Duration::from_millis(20));
        let err = bridge
            .bound_over_domain(&Expression::num(1.0), &Domain::new())
            .unwrap_err();
        assert!(matches!(err, HyError::BridgeTimeout { millis: 20 }), "{err}");
        assert_eq!(bridge.simplify(&Expression::num(1.0)).unwrap(), Expression::num(1.0));
    }

    #[test]
    fn unavailable_bridge_falls_back() {
        let logs = hylog::capture();
        let shared = SharedBridge::new(Box::new(OfflineBridge));
        let e = parse_value("x + 1").unwrap();
        let bound = shared
            .bound_over_domain(&e, &domain(&[("x", 0.0, 1.0)]))
            .unwrap();
        assert!(bound.sound);
        assert!(bound.range.approx_eq(&Interval::new(1.0, 2.0), 1e-12), "{}", bound.range);
        assert!(logs.contains(hylog::LogLevel::Warn, "'offline' is unavailable"));
    }
}
