use crate::utils::error::{HyError, HyResult};

/// Map `f` over `items` on up to `threads` scoped workers. Results keep the input order,
/// and the first failing item (in input order) decides the error.
pub fn map_ordered<I, T, F>(threads: usize, items: &[I], f: F) -> HyResult<Vec<T>>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> HyResult<T> + Sync,
{
    if threads <= 1 || items.len() <= 1 {
        return items.iter().map(&f).collect();
    }

    let chunk = items.len().div_ceil(threads);
    let f = &f;
    let joined = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = items
            .chunks(chunk)
            .map(|part| s.spawn(move |_| part.iter().map(f).collect::<HyResult<Vec<T>>>()))
            .collect();
        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    })
    .map_err(|_| HyError::Unknown("worker scope panicked".into()))?;

    let mut rv = Vec::with_capacity(items.len());
    for part in joined {
        rv.extend(part.map_err(|_| HyError::Unknown("worker thread panicked".into()))??);
    }
    Ok(rv)
}
