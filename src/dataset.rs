use std::path::Path;

use log::debug;
use rand::Rng;
use tch::{Device, Tensor};

use crate::error::{Error, Result};

/// Reads the whole corpus into memory as one flat character stream.
pub fn read_corpus(path: impl AsRef<Path>) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
        }
    }
}

/// The encoded corpus, partitioned once into a training prefix and a validation suffix.
#[derive(Debug, Clone)]
pub struct DataSet {
    training: DataSubset,
    validation: DataSubset,
}

impl DataSet {
    /// Splits `tokens` at `floor(train_fraction * len)`; the stream is never shuffled.
    pub fn new(mut tokens: Vec<i64>, train_fraction: f64) -> Self {
        let boundary = ((tokens.len() as f64) * train_fraction) as usize;
        let validation = tokens.split_off(boundary.min(tokens.len()));
        debug!(
            "split corpus into {} training and {} validation tokens",
            tokens.len(),
            validation.len()
        );
        DataSet {
            training: DataSubset::new(tokens),
            validation: DataSubset::new(validation),
        }
    }

    pub fn subset(&self, split: Split) -> &DataSubset {
        match split {
            Split::Train => &self.training,
            Split::Validation => &self.validation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSubset {
    tokens: Vec<i64>,
}

/// `B` context windows of length `T` and the same windows shifted one token ahead,
/// both `[B, T]` Int64.
#[derive(Debug)]
pub struct Batch {
    pub context: Tensor,
    pub target: Tensor,
}

impl DataSubset {
    pub fn new(tokens: Vec<i64>) -> Self {
        DataSubset { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[i64] {
        &self.tokens
    }

    fn ensure_fits(&self, block_size: usize) -> Result<()> {
        if self.tokens.len() <= block_size {
            return Err(Error::InsufficientData {
                len: self.tokens.len(),
                block_size,
            });
        }
        Ok(())
    }

    /// The (context, target) pair starting at `offset`. Both are read from the corpus directly.
    pub fn window(&self, offset: usize, block_size: usize) -> Result<(&[i64], &[i64])> {
        self.ensure_fits(block_size)?;
        if offset + block_size >= self.tokens.len() {
            return Err(Error::InsufficientData {
                len: self.tokens.len().saturating_sub(offset),
                block_size,
            });
        }
        Ok((
            &self.tokens[offset..offset + block_size],
            &self.tokens[offset + 1..offset + block_size + 1],
        ))
    }

    /// Builds a batch from explicit start offsets, one row per offset.
    pub fn batch_at(&self, offsets: &[usize], block_size: usize, device: Device) -> Result<Batch> {
        let mut context = Vec::with_capacity(offsets.len() * block_size);
        let mut target = Vec::with_capacity(offsets.len() * block_size);
        for &offset in offsets {
            let (x, y) = self.window(offset, block_size)?;
            context.extend_from_slice(x);
            target.extend_from_slice(y);
        }
        let shape = [offsets.len() as i64, block_size as i64];
        Ok(Batch {
            context: Tensor::from_slice(&context).view(shape).to_device(device),
            target: Tensor::from_slice(&target).view(shape).to_device(device),
        })
    }

    /// Draws `batch_size` start offsets uniformly from `[0, len - block_size)`.
    pub fn sample_batch<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        batch_size: usize,
        block_size: usize,
        device: Device,
    ) -> Result<Batch> {
        self.ensure_fits(block_size)?;
        let upper = self.tokens.len() - block_size;
        let offsets: Vec<usize> = (0..batch_size).map(|_| rng.random_range(0..upper)).collect();
        self.batch_at(&offsets, block_size, device)
    }
}
