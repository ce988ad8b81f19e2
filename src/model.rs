use tch::{
    Device,
    Kind::{self, Float},
    Tensor,
    nn::{Embedding, LayerNorm, Linear, LinearConfig, ModuleT, Path, embedding, layer_norm, linear},
};

use crate::{
    config::Config,
    constants::FFN_MULTIPLIER,
    error::{Error, Result},
};

/// Whether stochastic regularisation is active for a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

/// Lower-triangular `[size, size]` boolean matrix: `mask[q][k]` is true iff `k <= q`.
pub fn causal_mask(size: usize, device: Device) -> Tensor {
    let size = size as i64;
    Tensor::ones([size, size], (Kind::Int64, device))
        .tril(0)
        .to_kind(Kind::Bool)
}

fn no_bias() -> LinearConfig {
    LinearConfig {
        bias: false,
        ..Default::default()
    }
}

#[derive(Debug)]
struct Embeddings {
    token: Embedding,
    position: Embedding,
}

impl Embeddings {
    fn new(vs: &Path, vocab_size: i64, block_size: i64, embedding_dim: i64) -> Self {
        let token = embedding(vs / "token", vocab_size, embedding_dim, Default::default());
        let position = embedding(vs / "position", block_size, embedding_dim, Default::default());
        Embeddings { token, position }
    }

    /// Takes token ids `[batch, seq_len]` and returns `[batch, seq_len, embedding_dim]`,
    /// the sum of each token's embedding and the embedding of its position.
    fn forward(&self, input: &Tensor) -> Tensor {
        let token_embeds = input.apply(&self.token);
        let seq_length = input.size()[1];
        // [seq_len, embedding_dim], broadcast over the batch.
        let position_embeds =
            Tensor::arange(seq_length, (Kind::Int64, input.device())).apply(&self.position);
        token_embeds + position_embeds
    }
}

/// Single-head causal self-attention.
/// Takes `[batch, seq_len, embed_dim]` and produces `[batch, seq_len, head_size]`, where each
/// position's output is a weighted combination of the values at that position and earlier ones.
#[derive(Debug)]
pub struct AttentionHead {
    query: Linear,
    key: Linear,
    value: Linear,
    // Shares storage with the model's mask; never written.
    mask: Tensor,
    head_size: i64,
    dropout: f64,
}

impl AttentionHead {
    pub fn new(vs: &Path, embed_dim: i64, head_size: i64, mask: &Tensor, dropout: f64) -> Self {
        AttentionHead {
            query: linear(vs / "query", embed_dim, head_size, no_bias()),
            key: linear(vs / "key", embed_dim, head_size, no_bias()),
            value: linear(vs / "value", embed_dim, head_size, no_bias()),
            mask: mask.shallow_clone(),
            head_size,
            dropout,
        }
    }

    /// Attention probabilities `[batch, seq_len, seq_len]`: row `q` is a distribution over key
    /// positions `0..=q`, with every later position exactly zero.
    pub fn attention_weights(&self, xs: &Tensor, train: bool) -> Tensor {
        let seq_len = xs.size()[1];
        let q = xs.apply(&self.query);
        let k = xs.apply(&self.key);
        let scores = q.matmul(&k.transpose(-2, -1)) / (self.head_size as f64).sqrt();
        let visible = self.mask.narrow(0, 0, seq_len).narrow(1, 0, seq_len);
        scores
            .masked_fill(&visible.logical_not(), f64::NEG_INFINITY)
            .softmax(-1, Float)
            .dropout(self.dropout, train)
    }

    pub fn value(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.value)
    }
}

impl ModuleT for AttentionHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.attention_weights(xs, train).matmul(&self.value(xs))
    }
}

/// Independent heads over the same input, concatenated back to `embed_dim` and projected.
#[derive(Debug)]
pub struct MultiHeadAttention {
    heads: Vec<AttentionHead>,
    output_projection: Linear,
    dropout: f64,
}

impl MultiHeadAttention {
    pub fn new(vs: &Path, embed_dim: i64, num_heads: i64, mask: &Tensor, dropout: f64) -> Self {
        let head_size = embed_dim / num_heads;
        let heads = (0..num_heads)
            .map(|i| AttentionHead::new(&(vs / i), embed_dim, head_size, mask, dropout))
            .collect();
        let output_projection = linear(vs / "output", embed_dim, embed_dim, Default::default());
        MultiHeadAttention {
            heads,
            output_projection,
            dropout,
        }
    }
}

impl ModuleT for MultiHeadAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let outputs: Vec<Tensor> = self
            .heads
            .iter()
            .map(|head| head.forward_t(xs, train))
            .collect();
        Tensor::cat(&outputs, -1)
            .apply(&self.output_projection)
            .dropout(self.dropout, train)
    }
}

/// Position-wise `embed_dim -> 4 * embed_dim -> embed_dim` with a ReLU in between.
#[derive(Debug)]
pub struct FeedForward {
    expand: Linear,
    contract: Linear,
    dropout: f64,
}

impl FeedForward {
    pub fn new(vs: &Path, embed_dim: i64, dropout: f64) -> Self {
        let hidden_dim = embed_dim * FFN_MULTIPLIER as i64;
        FeedForward {
            expand: linear(vs / "expand", embed_dim, hidden_dim, Default::default()),
            contract: linear(vs / "contract", hidden_dim, embed_dim, Default::default()),
            dropout,
        }
    }
}

impl ModuleT for FeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.expand)
            .relu()
            .apply(&self.contract)
            .dropout(self.dropout, train)
    }
}

/// Pre-norm transformer block: `x + attn(ln1(x))`, then `x + ffn(ln2(x))`.
#[derive(Debug)]
pub struct Block {
    attention_norm: LayerNorm,
    attention: MultiHeadAttention,
    feed_forward_norm: LayerNorm,
    feed_forward: FeedForward,
}

impl Block {
    pub fn new(vs: &Path, embed_dim: i64, num_heads: i64, mask: &Tensor, dropout: f64) -> Self {
        Block {
            attention_norm: layer_norm(vs / "attention_norm", vec![embed_dim], Default::default()),
            attention: MultiHeadAttention::new(
                &(vs / "attention"),
                embed_dim,
                num_heads,
                mask,
                dropout,
            ),
            feed_forward_norm: layer_norm(
                vs / "feed_forward_norm",
                vec![embed_dim],
                Default::default(),
            ),
            feed_forward: FeedForward::new(&(vs / "feed_forward"), embed_dim, dropout),
        }
    }
}

impl ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs + self
            .attention
            .forward_t(&xs.apply(&self.attention_norm), train);
        &xs + self
            .feed_forward
            .forward_t(&xs.apply(&self.feed_forward_norm), train)
    }
}

/// Character-level GPT: embeddings, `n_layer` blocks, final norm and a projection to logits.
#[derive(Debug)]
pub struct LanguageModel {
    embeddings: Embeddings,
    blocks: Vec<Block>,
    final_norm: LayerNorm,
    lm_head: Linear,
    block_size: usize,
    vocab_size: usize,
}

impl LanguageModel {
    pub fn new(vs: &Path, vocab_size: usize, config: &Config) -> Self {
        let embed_dim = config.n_embd as i64;
        let mask = causal_mask(config.block_size, vs.device());
        let embeddings = Embeddings::new(
            &(vs / "embeddings"),
            vocab_size as i64,
            config.block_size as i64,
            embed_dim,
        );
        let blocks = (0..config.n_layer)
            .map(|i| {
                Block::new(
                    &(vs / "blocks" / i),
                    embed_dim,
                    config.n_head as i64,
                    &mask,
                    config.dropout,
                )
            })
            .collect();
        let final_norm = layer_norm(vs / "final_norm", vec![embed_dim], Default::default());
        let lm_head = linear(vs / "lm_head", embed_dim, vocab_size as i64, Default::default());
        LanguageModel {
            embeddings,
            blocks,
            final_norm,
            lm_head,
            block_size: config.block_size,
            vocab_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Maps token ids `[batch, seq_len]` to logits `[batch, seq_len, vocab_size]`.
    pub fn logits(&self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let (_, seq_len) = input.size2()?;
        if seq_len == 0 {
            return Err(Error::EmptyContext);
        }
        if seq_len as usize > self.block_size {
            return Err(Error::SequenceTooLong {
                len: seq_len as usize,
                max: self.block_size,
            });
        }
        let train = mode.is_train();
        let hidden = self
            .blocks
            .iter()
            .fold(self.embeddings.forward(input), |xs, block| {
                block.forward_t(&xs, train)
            });
        Ok(hidden.apply(&self.final_norm).apply(&self.lm_head))
    }

    /// Mean cross-entropy of `logits` `[batch, seq_len, vocab_size]` against target ids
    /// `[batch, seq_len]`, taken over all `batch * seq_len` positions. Returns a scalar tensor.
    pub fn cross_entropy(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, vocab_size) = logits.size3()?;
        if targets.size() != [batch, seq_len] {
            return Err(Error::ShapeMismatch {
                expected: vec![batch, seq_len],
                got: targets.size(),
            });
        }
        Ok(logits
            .view([batch * seq_len, vocab_size])
            .cross_entropy_for_logits(&targets.view([batch * seq_len])))
    }

    /// Training objective for a batch; shorthand for [`Self::logits`] then [`Self::cross_entropy`].
    pub fn loss(&self, input: &Tensor, targets: &Tensor, mode: Mode) -> Result<Tensor> {
        let logits = self.logits(input, mode)?;
        self.cross_entropy(&logits, targets)
    }

    /// Logits for `input`, plus the loss when `targets` are given. Without targets the loss is
    /// `None`, not zero.
    pub fn forward(
        &self,
        input: &Tensor,
        targets: Option<&Tensor>,
        mode: Mode,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let logits = self.logits(input, mode)?;
        let loss = targets
            .map(|targets| self.cross_entropy(&logits, targets))
            .transpose()?;
        Ok((logits, loss))
    }
}
