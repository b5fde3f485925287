/// Slab pool failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SlabError {
    #[error("slab pool exhausted")]
    Exhausted,
    #[error("slab refill source exhausted")]
    SourceExhausted,
    #[error("slab refill requested while a refill is in progress")]
    ReentrantRefill,
}
