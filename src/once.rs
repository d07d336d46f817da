use std::sync::{Mutex, OnceLock};

/// Wraps a function so that only the first call runs it.
///
/// Every later call returns a clone of the first call's result without running anything. Safe to
/// share between threads: concurrent first calls block until the winner has finished.
///
/// ```
/// use client_rate_limiter::Once;
///
/// let double = Once::new(|x: u32| x * 2);
/// assert_eq!(double.call(2), 4);
/// assert_eq!(double.call(10), 4);
/// ```
pub struct Once<F, R> {
    f: Mutex<Option<F>>,
    result: OnceLock<R>,
}

impl<F, R> Once<F, R> {
    pub fn new(f: F) -> Self {
        Self {
            f: Mutex::new(Some(f)),
            result: OnceLock::new(),
        }
    }

    /// Run the wrapped function, or return the memoized result if it has already run.
    ///
    /// # Panics
    ///
    /// If the wrapped function panicked on an earlier call.
    pub fn call<A>(&self, arg: A) -> R
    where
        F: FnOnce(A) -> R,
        R: Clone,
    {
        self.result
            .get_or_init(|| {
                let f = self
                    .f
                    .lock()
                    .unwrap()
                    .take()
                    .expect("Once function panicked on an earlier call");
                f(arg)
            })
            .clone()
    }

    /// The result of the first call, if there has been one.
    pub fn get(&self) -> Option<&R> {
        self.result.get()
    }

    pub fn is_called(&self) -> bool {
        self.result.get().is_some()
    }
}

impl<F, R: std::fmt::Debug> std::fmt::Debug for Once<F, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Once")
            .field("result", &self.result.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::Once;

    #[test]
    fn runs_once() {
        let calls = AtomicUsize::new(0);
        let once = Once::new(|s: &str| {
            calls.fetch_add(1, Ordering::Relaxed);
            s.len()
        });

        assert!(!once.is_called());
        assert_eq!(once.call("abc"), 3);
        assert_eq!(once.call("abcdef"), 3);
        assert_eq!(once.get(), Some(&3));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn memoizes_errors() {
        let once = Once::new(|x: i32| if x < 0 { Err("negative") } else { Ok(x) });

        assert_eq!(once.call(-1), Err("negative"));
        assert_eq!(once.call(1), Err("negative"));
    }

    #[test]
    fn shared_between_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let once = {
            let calls = calls.clone();
            Arc::new(Once::new(move |x: usize| {
                calls.fetch_add(1, Ordering::Relaxed);
                x
            }))
        };

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let once = once.clone();
                std::thread::spawn(move || once.call(i))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }
}
