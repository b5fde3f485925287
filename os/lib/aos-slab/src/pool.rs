use crate::{SlabError, SlabRefill};
use alloc::vec::Vec;
use core::mem;
use core::ops::{Index, IndexMut};

/// Handle to an occupied block of a [`SlabPool`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SlabKey {
    index: u32,
    generation: u32,
}

/// Whether a refill is currently running.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum RefillState {
    #[default]
    Idle,
    Refilling,
}

#[derive(Debug)]
enum Block<T> {
    Vacant { next: Option<u32>, generation: u32 },
    Occupied { value: T, generation: u32 },
}

/// Fixed-size block allocator with generational keys.
#[derive(Debug)]
pub struct SlabPool<T> {
    blocks: Vec<Block<T>>,
    free_head: Option<u32>,
    free: usize,
    state: RefillState,
    deferred: bool,
}

impl<T> Default for SlabPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlabPool<T> {
    /// Creates a pool without any blocks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            free_head: None,
            free: 0,
            state: RefillState::Idle,
            deferred: false,
        }
    }

    /// Bytes of backing one block occupies.
    #[must_use]
    pub const fn block_size() -> usize {
        let size = size_of::<Block<T>>();
        if size == 0 { 1 } else { size }
    }

    /// Adds as many blocks as fit into `bytes` and returns how many.
    pub fn grow(&mut self, bytes: usize) -> usize {
        self.grow_blocks(bytes / Self::block_size())
    }

    /// Adds `count` blocks and returns how many were added. The result is
    /// smaller than `count` only when the key space is full.
    pub fn grow_blocks(&mut self, count: usize) -> usize {
        let start = self.blocks.len();
        let room = (u32::MAX as usize).saturating_sub(start);
        let count = count.min(room);
        if count == 0 {
            return 0;
        }

        self.blocks.reserve_exact(count);
        for index in (start..start + count).map(Self::to_index) {
            let next = if (index as usize) + 1 < start + count {
                Some(index + 1)
            } else {
                self.free_head
            };
            self.blocks.push(Block::Vacant {
                next,
                generation: 0,
            });
        }
        self.free_head = Some(Self::to_index(start));
        self.free += count;
        log::trace!("slab grown by {count} blocks to {}", self.blocks.len());
        count
    }

    /// Stores `value` in a free block. Returns `None` when the pool is
    /// exhausted; the pool never grows implicitly.
    pub fn alloc(&mut self, value: T) -> Option<SlabKey> {
        let index = self.free_head?;
        let block = &mut self.blocks[index as usize];
        let (next, generation) = match *block {
            Block::Vacant { next, generation } => (next, generation),
            Block::Occupied { .. } => unreachable!("free chain points at an occupied block"),
        };
        *block = Block::Occupied { value, generation };
        self.free_head = next;
        self.free -= 1;
        Some(SlabKey { index, generation })
    }

    /// Like [`alloc`](Self::alloc), but reports exhaustion as an error.
    ///
    /// # Errors
    /// [`SlabError::Exhausted`] when no block is free.
    pub fn try_alloc(&mut self, value: T) -> Result<SlabKey, SlabError> {
        self.alloc(value).ok_or(SlabError::Exhausted)
    }

    /// Returns the block behind `key` to the pool. Stale keys are ignored.
    pub fn free(&mut self, key: SlabKey) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        let vacant = Block::Vacant {
            next: self.free_head,
            generation: key.generation.wrapping_add(1),
        };
        let old = mem::replace(&mut self.blocks[key.index as usize], vacant);
        self.free_head = Some(key.index);
        self.free += 1;
        match old {
            Block::Occupied { value, .. } => Some(value),
            Block::Vacant { .. } => None,
        }
    }

    #[must_use]
    pub fn contains(&self, key: SlabKey) -> bool {
        matches!(
            self.blocks.get(key.index as usize),
            Some(Block::Occupied { generation, .. }) if *generation == key.generation
        )
    }

    #[must_use]
    pub fn get(&self, key: SlabKey) -> Option<&T> {
        match self.blocks.get(key.index as usize)? {
            Block::Occupied { value, generation } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_mut(&mut self, key: SlabKey) -> Option<&mut T> {
        match self.blocks.get_mut(key.index as usize)? {
            Block::Occupied { value, generation } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Number of free blocks.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free
    }

    /// Number of blocks, free or occupied.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Number of occupied blocks.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.blocks.len() - self.free
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether fewer than `watermark` blocks are free.
    #[inline]
    #[must_use]
    pub const fn needs_refill(&self, watermark: usize) -> bool {
        self.free < watermark
    }

    #[inline]
    #[must_use]
    pub const fn refill_state(&self) -> RefillState {
        self.state
    }

    /// Marks the start of a refill.
    ///
    /// # Errors
    /// [`SlabError::ReentrantRefill`] if a refill is already running; the
    /// request is then recorded and reported by
    /// [`finish_refill`](Self::finish_refill).
    pub fn begin_refill(&mut self) -> Result<(), SlabError> {
        match self.state {
            RefillState::Idle => {
                self.state = RefillState::Refilling;
                Ok(())
            }
            RefillState::Refilling => {
                self.deferred = true;
                Err(SlabError::ReentrantRefill)
            }
        }
    }

    /// Marks the end of a refill. Returns `true` if another refill was
    /// requested in the meantime and should run now.
    pub fn finish_refill(&mut self) -> bool {
        self.state = RefillState::Idle;
        mem::take(&mut self.deferred)
    }

    /// Grows the pool with backing obtained from `source` and returns the
    /// number of blocks added.
    ///
    /// # Errors
    /// * [`SlabError::ReentrantRefill`] if a refill is already running.
    /// * [`SlabError::SourceExhausted`] if `source` cannot provide enough
    ///   backing for a single block.
    pub fn refill<R: SlabRefill + ?Sized>(&mut self, source: &mut R) -> Result<usize, SlabError> {
        let mut total = 0;
        loop {
            self.begin_refill()?;
            let grown = source
                .refill(Self::block_size())
                .map(|bytes| self.grow(bytes));
            let again = self.finish_refill();
            match grown {
                Ok(0) if total == 0 => return Err(SlabError::SourceExhausted),
                Ok(n) => total += n,
                Err(e) if total == 0 => return Err(e),
                Err(e) => {
                    log::warn!("deferred slab refill failed: {e}");
                    return Ok(total);
                }
            }
            if !again {
                return Ok(total);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn to_index(i: usize) -> u32 {
        i as u32
    }
}

impl<T> Index<SlabKey> for SlabPool<T> {
    type Output = T;

    /// # Panics
    /// Panics if `key` is stale.
    fn index(&self, key: SlabKey) -> &T {
        self.get(key).expect("stale slab key")
    }
}

impl<T> IndexMut<SlabKey> for SlabPool<T> {
    /// # Panics
    /// Panics if `key` is stale.
    fn index_mut(&mut self, key: SlabKey) -> &mut T {
        self.get_mut(key).expect("stale slab key")
    }
}
