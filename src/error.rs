use thiserror::Error;

/// Errors produced while building, training or sampling from the model.
///
/// None of these are recoverable mid-run; callers are expected to abort with the message.
#[derive(Error, Debug)]
pub enum Error {
    /// A character outside the vocabulary was passed to `encode`.
    #[error("unknown symbol {0:?} is not in the vocabulary")]
    UnknownSymbol(char),
    /// A token id outside `[0, vocab_size)` was passed to `decode`.
    #[error("token id {0} is out of range for the vocabulary")]
    InvalidId(i64),
    #[error("cannot build a vocabulary from an empty corpus")]
    EmptyCorpus,
    /// A split holds no more tokens than a single context window.
    #[error("split of {len} tokens is too short for block size {block_size}")]
    InsufficientData { len: usize, block_size: usize },
    /// The forward pass was given more positions than the positional table holds.
    #[error("sequence of length {len} exceeds the maximum block size {max}")]
    SequenceTooLong { len: usize, max: usize },
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<i64>, got: Vec<i64> },
    #[error("context must contain at least one token")]
    EmptyContext,
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Torch(#[from] tch::TchError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
