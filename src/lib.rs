//! A character-level GPT: causal self-attention transformer trained to predict the next
//! character of a text corpus, then sampled autoregressively.

pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod generate;
pub mod model;
pub mod tokenizer;
pub mod train;

pub use error::{Error, Result};
