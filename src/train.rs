use std::fmt;

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};
use tch::{
    Device, Tensor,
    nn::{AdamW, Optimizer, OptimizerConfig, VarStore},
};

use crate::{
    config::Config,
    dataset::{Batch, DataSet, Split},
    error::{Error, Result},
    model::{LanguageModel, Mode},
};

/// Mean losses measured at one evaluation checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossReport {
    pub iter: usize,
    pub train: f64,
    pub validation: f64,
}

impl fmt::Display for LossReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Iter {}: train loss {:.4}, val loss {:.4}",
            self.iter, self.train, self.validation
        )
    }
}

pub struct Trainer {
    var_store: VarStore,
    model: LanguageModel,
    optimizer: Optimizer,
    dataset: DataSet,
    config: Config,
    device: Device,
    rng: StdRng,
}

impl Trainer {
    /// Builds the model and optimizer. Fails early if either split cannot hold one window.
    pub fn new(
        device: Device,
        vocab_size: usize,
        dataset: DataSet,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        for split in [Split::Train, Split::Validation] {
            let len = dataset.subset(split).len();
            if len <= config.block_size {
                return Err(Error::InsufficientData {
                    len,
                    block_size: config.block_size,
                });
            }
        }
        let var_store = VarStore::new(device);
        let model = LanguageModel::new(&var_store.root(), vocab_size, &config);
        let optimizer = AdamW::default().build(&var_store, config.learning_rate)?;
        let parameters: usize = var_store
            .trainable_variables()
            .iter()
            .map(Tensor::numel)
            .sum();
        info!("model has {parameters} trainable parameters on {device:?}");
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Trainer {
            var_store,
            model,
            optimizer,
            dataset,
            config,
            device,
            rng,
        })
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    pub fn var_store(&self) -> &VarStore {
        &self.var_store
    }

    /// Runs exactly `max_iters` optimisation steps, estimating losses every `eval_interval`
    /// steps starting at step 0. Returns the reports that were printed.
    pub fn train(&mut self) -> Result<Vec<LossReport>> {
        let mut reports = Vec::new();
        for iter in 0..self.config.max_iters {
            if iter % self.config.eval_interval == 0 {
                let report = self.estimate_loss(iter)?;
                println!("{report}");
                reports.push(report);
            }
            let loss = self.train_step()?;
            debug!("iter {iter}: batch loss {loss:.4}");
        }
        Ok(reports)
    }

    /// Mean loss over `eval_iters` fresh batches per split, in eval mode with gradients disabled.
    pub fn estimate_loss(&mut self, iter: usize) -> Result<LossReport> {
        Ok(LossReport {
            iter,
            train: self.estimate_split(Split::Train)?,
            validation: self.estimate_split(Split::Validation)?,
        })
    }

    fn estimate_split(&mut self, split: Split) -> Result<f64> {
        let mut total = 0.0;
        for _ in 0..self.config.eval_iters {
            let batch = self.sample(split)?;
            let loss =
                tch::no_grad(|| self.model.loss(&batch.context, &batch.target, Mode::Eval))?;
            total += finite_scalar(&loss, "evaluation loss")?;
        }
        let mean = total / self.config.eval_iters as f64;
        debug!("estimated {} loss {mean:.4}", split.name());
        Ok(mean)
    }

    /// One optimisation step on a fresh training batch; returns that batch's loss.
    pub fn train_step(&mut self) -> Result<f64> {
        let batch = self.sample(Split::Train)?;
        let loss = self.model.loss(&batch.context, &batch.target, Mode::Train)?;
        let value = finite_scalar(&loss, "training loss")?;
        self.optimizer.zero_grad();
        loss.backward();
        self.optimizer.step();
        Ok(value)
    }

    fn sample(&mut self, split: Split) -> Result<Batch> {
        self.dataset.subset(split).sample_batch(
            &mut self.rng,
            self.config.batch_size,
            self.config.block_size,
            self.device,
        )
    }
}

fn finite_scalar(loss: &Tensor, what: &'static str) -> Result<f64> {
    let value = f64::try_from(loss)?;
    if !value.is_finite() {
        return Err(Error::NonFinite(what));
    }
    Ok(value)
}
