//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the copy
//! engine from whatever displays progress (CLI bar, log lines, tests).

/// Trait for receiving byte-level progress from a copy.
///
/// Called synchronously after every chunk written, so implementations
/// should return quickly.
pub trait ProgressCallback: Send + Sync {
    /// `bytes_copied` is cumulative for the current operation.
    fn on_progress(&self, bytes_copied: u64, total_bytes: u64);
}

impl<F> ProgressCallback for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, bytes_copied: u64, total_bytes: u64) {
        self(bytes_copied, total_bytes)
    }
}

/// Progress adapter that offsets a per-file callback into a tree-wide total.
pub(crate) struct OffsetProgress<'a> {
    pub inner: &'a dyn ProgressCallback,
    pub offset: u64,
    pub total: u64,
}

impl ProgressCallback for OffsetProgress<'_> {
    fn on_progress(&self, bytes_copied: u64, _total_bytes: u64) {
        self.inner.on_progress(self.offset + bytes_copied, self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_is_callback() {
        let seen = Mutex::new(Vec::new());
        let cb = |done: u64, total: u64| seen.lock().unwrap().push((done, total));
        cb.on_progress(5, 10);
        assert_eq!(*seen.lock().unwrap(), vec![(5, 10)]);
    }

    #[test]
    fn test_offset_progress() {
        let seen = Mutex::new(Vec::new());
        let cb = |done: u64, total: u64| seen.lock().unwrap().push((done, total));
        let offset = OffsetProgress {
            inner: &cb,
            offset: 100,
            total: 300,
        };
        offset.on_progress(50, 80);
        assert_eq!(*seen.lock().unwrap(), vec![(150, 300)]);
    }
}
