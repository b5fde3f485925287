use crate::SlabError;
use aos_info::memory::BASE_PAGE_SIZE;

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = BASE_PAGE_SIZE as usize;

/// A source of backing for a [`SlabPool`](crate::SlabPool).
pub trait SlabRefill {
    /// Provides backing for at least one block of `block_size` bytes and
    /// returns how many bytes the pool may use.
    ///
    /// # Errors
    /// [`SlabError::SourceExhausted`] when no backing is left.
    fn refill(&mut self, block_size: usize) -> Result<usize, SlabError>;
}

impl<R: SlabRefill + ?Sized> SlabRefill for &mut R {
    fn refill(&mut self, block_size: usize) -> Result<usize, SlabError> {
        (**self).refill(block_size)
    }
}

/// Grows by one page per refill, without limit.
#[derive(Debug, Copy, Clone, Default)]
pub struct DefaultRefill;

impl SlabRefill for DefaultRefill {
    fn refill(&mut self, block_size: usize) -> Result<usize, SlabError> {
        Ok(PAGE_BYTES.max(block_size))
    }
}

/// A fixed bootstrap budget, handed out a page at a time.
#[derive(Debug, Copy, Clone)]
pub struct StaticRefill {
    remaining: usize,
}

impl StaticRefill {
    #[must_use]
    pub const fn new(bytes: usize) -> Self {
        Self { remaining: bytes }
    }

    /// A budget of exactly `count` blocks of a `SlabPool<T>`.
    #[must_use]
    pub const fn with_blocks<T>(count: usize) -> Self {
        Self::new(count * crate::SlabPool::<T>::block_size())
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }
}

impl SlabRefill for StaticRefill {
    fn refill(&mut self, block_size: usize) -> Result<usize, SlabError> {
        if self.remaining < block_size {
            return Err(SlabError::SourceExhausted);
        }
        let take = self.remaining.min(PAGE_BYTES.max(block_size));
        self.remaining -= take;
        Ok(take)
    }
}

/// Adapts a closure into a [`SlabRefill`].
pub struct FnRefill<F>(pub F);

impl<F> FnRefill<F>
where
    F: FnMut(usize) -> Result<usize, SlabError>,
{
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SlabRefill for FnRefill<F>
where
    F: FnMut(usize) -> Result<usize, SlabError>,
{
    fn refill(&mut self, block_size: usize) -> Result<usize, SlabError> {
        (self.0)(block_size)
    }
}
