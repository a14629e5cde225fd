//! Order-preserving partitioning of operations into bounded batches.

use std::num::NonZeroUsize;

use crate::error::AppError;

/// Operations per `addOperations` call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Largest batch the service accepts in a single call.
pub const MAX_BATCH_SIZE: usize = 10_000;

const DEFAULT_NON_ZERO: NonZeroUsize = match NonZeroUsize::new(DEFAULT_BATCH_SIZE) {
    Some(size) => size,
    None => panic!("DEFAULT_BATCH_SIZE must be non-zero"),
};

/// Validated batch size in `1..=MAX_BATCH_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    /// # Errors
    ///
    /// `AppError::Config` if `size` is zero or above `MAX_BATCH_SIZE`.
    pub fn new(size: usize) -> Result<Self, AppError> {
        if size > MAX_BATCH_SIZE {
            return Err(AppError::Config(format!(
                "batch size {} exceeds the maximum of {}",
                size, MAX_BATCH_SIZE
            )));
        }
        NonZeroUsize::new(size)
            .map(Self)
            .ok_or_else(|| AppError::Config("batch size must be greater than 0".to_string()))
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(DEFAULT_NON_ZERO)
    }
}

/// A contiguous slice of the full operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    /// 1-based position among all batches.
    pub number: usize,
    /// Index of the first item in the full list.
    pub offset: usize,
    pub items: &'a [T],
}

impl<T> Batch<'_, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits `items` into `ceil(N / size)` batches of `size`, the last possibly shorter.
///
/// An empty input yields no batches.
pub fn plan_batches<T>(items: &[T], size: BatchSize) -> Vec<Batch<'_, T>> {
    items
        .chunks(size.get())
        .enumerate()
        .map(|(i, chunk)| Batch {
            number: i + 1,
            offset: i * size.get(),
            items: chunk,
        })
        .collect()
}

/// Number of batches `plan_batches` produces for `len` items.
pub fn batch_count(len: usize, size: BatchSize) -> usize {
    len.div_ceil(size.get())
}
