/// Prefix of every environment variable read by [`crate::config::from_env`].
pub const ENV_PREFIX: &str = "CHAR_GPT_";

/// Independent windows per training batch.
pub const BATCH_SIZE: usize = 32;
/// Maximum context length; also the size of the positional table and causal mask.
pub const BLOCK_SIZE: usize = 8;
/// Total optimisation steps.
pub const MAX_ITERS: usize = 10_000;
/// Loss is estimated every this many steps, starting at step 0.
pub const EVAL_INTERVAL: usize = 300;
/// Batches averaged per split when estimating loss.
pub const EVAL_ITERS: usize = 200;
/// Step size for the AdamW optimizer.
pub const LEARNING_RATE: f64 = 1e-3;
/// The number of dimensions in the embedding space.
pub const EMBEDDING_DIM: usize = 32;
/// The number of "heads" (attention passes) per block.
pub const HEADS: usize = 4;
/// Number of stacked transformer blocks.
pub const LAYERS: usize = 3;
/// Probability of zeroing an activation during training.
pub const DROPOUT: f64 = 0.1;
/// The fraction of the corpus used for training; the rest is used for validation.
pub const TRAIN_VALIDATION_SPLIT: f64 = 0.9;
/// Width multiplier of the feed-forward hidden layer.
pub const FFN_MULTIPLIER: usize = 4;

/// Seeds the batch sampler, the sampling RNG and torch's global RNG.
pub const SEED: u64 = 1337;
/// The training text, read whole as one character stream.
pub const CORPUS_PATH: &str = "input.txt";
/// Divides the final logits before softmax when generating.
pub const TEMPERATURE: f64 = 1.0;
/// Characters generated after training.
pub const GENERATE_TOKENS: usize = 500;
