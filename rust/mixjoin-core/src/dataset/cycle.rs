// rust/mixjoin-core/src/dataset/cycle.rs

use std::path::PathBuf;

use tracing::debug;

use crate::error::{Result, RuntimeError};

/// An infinite sequence that restarts a finite source each time it runs out.
///
/// Each cycle asks the factory for a fresh iterator and yields its items in
/// order. There is no deduplication across cycle boundaries, so a source of
/// length `n` repeats with period `n`.
///
/// A source that is empty on the first cycle is rejected at construction. If
/// a later cycle comes back empty, one `EmptyShardSource` error is yielded and
/// the sequence ends. Any other error also ends the sequence after it has
/// been yielded.
pub struct CyclingSequence<F, I, T> {
    factory: F,
    current: Option<I>,
    /// Item pulled eagerly by `new`, yielded first.
    pending: Option<T>,
    source: PathBuf,
    yielded_this_cycle: u64,
    cycles_completed: u64,
    done: bool,
}

impl<F, I, T> CyclingSequence<F, I, T>
where
    F: FnMut() -> Result<I>,
    I: Iterator<Item = Result<T>>,
{
    /// Starts the first cycle. `source` names the underlying data in
    /// `EmptyShardSource` errors.
    pub fn new(source: impl Into<PathBuf>, mut factory: F) -> Result<Self> {
        let source = source.into();
        let mut current = factory()?;
        let first = match current.next() {
            Some(Ok(item)) => item,
            Some(Err(e)) => return Err(e),
            None => return Err(RuntimeError::empty_shard_source(source)),
        };

        Ok(Self {
            factory,
            current: Some(current),
            pending: Some(first),
            source,
            yielded_this_cycle: 0,
            cycles_completed: 0,
            done: false,
        })
    }

    /// Number of times the source has been exhausted and restarted.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    fn fail(&mut self, error: RuntimeError) -> Option<Result<T>> {
        self.done = true;
        self.current = None;
        Some(Err(error))
    }
}

impl<F, I, T> Iterator for CyclingSequence<F, I, T>
where
    F: FnMut() -> Result<I>,
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(item) = self.pending.take() {
            self.yielded_this_cycle += 1;
            return Some(Ok(item));
        }

        loop {
            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(Ok(item)) => {
                        self.yielded_this_cycle += 1;
                        return Some(Ok(item));
                    }
                    Some(Err(e)) => return self.fail(e),
                    None => {
                        if self.yielded_this_cycle == 0 {
                            let error = RuntimeError::empty_shard_source(self.source.clone());
                            return self.fail(error);
                        }
                        self.cycles_completed += 1;
                        self.yielded_this_cycle = 0;
                        debug!(
                            source = %self.source.display(),
                            cycles = self.cycles_completed,
                            "source exhausted, restarting"
                        );
                    }
                }
            }

            match (self.factory)() {
                Ok(next) => self.current = Some(next),
                Err(e) => return self.fail(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn ok_items(items: Vec<u32>) -> impl Iterator<Item = Result<u32>> {
        items.into_iter().map(Ok)
    }

    #[test]
    fn test_repeats_with_period_of_source_length() {
        let cycle = CyclingSequence::new("src", || Ok(ok_items(vec![1, 2, 3]))).unwrap();
        let items: Vec<u32> = cycle.take(10).map(|r| r.unwrap()).collect();

        assert_eq!(items, vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1]);
        for k in 0..7 {
            assert_eq!(items[k], items[k + 3]);
        }
    }

    #[test]
    fn test_single_element_source() {
        let cycle = CyclingSequence::new("src", || Ok(ok_items(vec![9]))).unwrap();
        assert!(cycle.take(5).all(|r| r.unwrap() == 9));
    }

    #[test]
    fn test_factory_called_once_per_cycle() {
        let calls = Cell::new(0);
        let mut cycle = CyclingSequence::new("src", || {
            calls.set(calls.get() + 1);
            Ok(ok_items(vec![1, 2]))
        })
        .unwrap();

        for _ in 0..5 {
            cycle.next().unwrap().unwrap();
        }
        // Items 1,2 | 1,2 | 1 -> three sequences created
        assert_eq!(calls.get(), 3);
        assert_eq!(cycle.cycles_completed(), 2);
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let result = CyclingSequence::new("empty", || Ok(ok_items(vec![])));
        assert!(matches!(
            result.err(),
            Some(RuntimeError::EmptyShardSource { .. })
        ));
    }

    #[test]
    fn test_source_emptied_after_first_cycle() {
        let calls = Cell::new(0);
        let mut cycle = CyclingSequence::new("shrinking", || {
            calls.set(calls.get() + 1);
            let items = if calls.get() == 1 { vec![1, 2] } else { vec![] };
            Ok(ok_items(items))
        })
        .unwrap();

        assert_eq!(cycle.next().unwrap().unwrap(), 1);
        assert_eq!(cycle.next().unwrap().unwrap(), 2);
        assert!(matches!(
            cycle.next(),
            Some(Err(RuntimeError::EmptyShardSource { .. }))
        ));
        assert!(cycle.next().is_none());
    }

    #[test]
    fn test_item_error_ends_sequence() {
        let mut cycle = CyclingSequence::new("src", || {
            Ok(vec![Ok(1), Err(RuntimeError::dataset("src", "bad line"))].into_iter())
        })
        .unwrap();

        assert_eq!(cycle.next().unwrap().unwrap(), 1);
        assert!(cycle.next().unwrap().is_err());
        assert!(cycle.next().is_none());
    }

    #[test]
    fn test_factory_error_on_restart() {
        let calls = Cell::new(0);
        let mut cycle = CyclingSequence::new("src", || {
            calls.set(calls.get() + 1);
            if calls.get() > 1 {
                return Err(RuntimeError::storage("src", "gone"));
            }
            Ok(ok_items(vec![1]))
        })
        .unwrap();

        assert_eq!(cycle.next().unwrap().unwrap(), 1);
        assert!(matches!(cycle.next(), Some(Err(RuntimeError::Storage { .. }))));
        assert!(cycle.next().is_none());
    }
}
