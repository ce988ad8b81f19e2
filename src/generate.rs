use rand::Rng;
use tch::{Device, Kind, Tensor};

use crate::{
    error::{Error, Result},
    model::{LanguageModel, Mode},
};

/// Picks the next token id from a probability distribution over the vocabulary.
pub trait TokenSampler {
    fn sample(&mut self, probs: &[f64]) -> Result<i64>;
}

/// Draws from the categorical distribution with one uniform sample and a cumulative search.
#[derive(Debug, Clone)]
pub struct Categorical<R> {
    rng: R,
}

impl<R: Rng> Categorical<R> {
    pub fn new(rng: R) -> Self {
        Categorical { rng }
    }
}

impl<R: Rng> TokenSampler for Categorical<R> {
    fn sample(&mut self, probs: &[f64]) -> Result<i64> {
        let u: f64 = self.rng.random();
        let mut cumulative = 0.0;
        for (id, &p) in probs.iter().enumerate() {
            cumulative += p;
            if u < cumulative {
                return Ok(id as i64);
            }
        }
        // Rounding left the total just under `u`; fall back to the last reachable id.
        probs
            .iter()
            .rposition(|&p| p > 0.0)
            .map(|id| id as i64)
            .ok_or(Error::NonFinite("sampling distribution"))
    }
}

/// Always picks the most probable id (lowest id on ties).
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy;

impl TokenSampler for Greedy {
    fn sample(&mut self, probs: &[f64]) -> Result<i64> {
        let mut best: Option<(usize, f64)> = None;
        for (id, &p) in probs.iter().enumerate() {
            if best.is_none_or(|(_, top)| p > top) {
                best = Some((id, p));
            }
        }
        best.map(|(id, _)| id as i64)
            .ok_or(Error::NonFinite("sampling distribution"))
    }
}

/// Normalised exponential of `logits / temperature`.
///
/// Fails instead of returning NaNs when the input is empty or not finite.
pub fn softmax(logits: &[f64], temperature: f64) -> Result<Vec<f64>> {
    let scaled: Vec<f64> = logits.iter().map(|l| l / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(Error::NonFinite("logits"));
    }
    let exps: Vec<f64> = scaled.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(Error::NonFinite("softmax normaliser"));
    }
    Ok(exps.into_iter().map(|e| e / total).collect())
}

/// Autoregressive sampler over a trained [`LanguageModel`].
pub struct Generator<'m> {
    model: &'m LanguageModel,
    device: Device,
    temperature: f64,
}

impl<'m> Generator<'m> {
    pub fn new(model: &'m LanguageModel, device: Device) -> Self {
        Generator {
            model,
            device,
            temperature: 1.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Next-token distribution given `context`, conditioning on at most the last `block_size` ids.
    pub fn next_token_distribution(&self, context: &[i64]) -> Result<Vec<f64>> {
        if context.is_empty() {
            return Err(Error::EmptyContext);
        }
        let start = context.len().saturating_sub(self.model.block_size());
        let window = &context[start..];
        let input = Tensor::from_slice(window)
            .view([1, window.len() as i64])
            .to_device(self.device);
        // Disable gradient tracking since we're not training now.
        let logits = tch::no_grad(|| self.model.logits(&input, Mode::Eval))?;
        // Only the final time step predicts the next token: [vocab_size]
        let last = logits
            .get(0)
            .get(window.len() as i64 - 1)
            .to_kind(Kind::Double)
            .to_device(Device::Cpu);
        softmax(&Vec::<f64>::try_from(&last)?, self.temperature)
    }

    /// Yields sampled ids one at a time, each conditioned on `seed` plus everything yielded so far.
    ///
    /// The stream is unbounded; it ends only after yielding an error.
    pub fn stream<'g, S: TokenSampler>(
        &'g self,
        seed: &[i64],
        sampler: &'g mut S,
    ) -> Tokens<'g, 'm, S> {
        Tokens {
            generator: self,
            sampler,
            sequence: seed.to_vec(),
            failed: false,
        }
    }

    /// Returns `seed` followed by exactly `max_new_tokens` sampled ids.
    pub fn generate<S: TokenSampler>(
        &self,
        seed: &[i64],
        max_new_tokens: usize,
        sampler: &mut S,
    ) -> Result<Vec<i64>> {
        if seed.is_empty() {
            return Err(Error::EmptyContext);
        }
        let mut sequence = seed.to_vec();
        for token in self.stream(seed, sampler).take(max_new_tokens) {
            sequence.push(token?);
        }
        Ok(sequence)
    }
}

pub struct Tokens<'g, 'm, S> {
    generator: &'g Generator<'m>,
    sampler: &'g mut S,
    sequence: Vec<i64>,
    failed: bool,
}

impl<S: TokenSampler> Iterator for Tokens<'_, '_, S> {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let sampled = self
            .generator
            .next_token_distribution(&self.sequence)
            .and_then(|probs| self.sampler.sample(&probs));
        match sampled {
            Ok(token) => {
                self.sequence.push(token);
                Some(Ok(token))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rand::{SeedableRng, rngs::StdRng};
    use tch::nn::VarStore;

    const VOCAB_SIZE: usize = 7;

    fn setup_model(seed: i64) -> (VarStore, LanguageModel) {
        tch::manual_seed(seed);
        let config = Config {
            block_size: 4,
            n_embd: 8,
            n_head: 2,
            n_layer: 1,
            ..Config::default()
        };
        let vs = VarStore::new(Device::Cpu);
        let model = LanguageModel::new(&vs.root(), VOCAB_SIZE, &config);
        (vs, model) // keep the var store alive alongside the model
    }

    #[test]
    fn test_softmax_is_a_distribution() {
        let probs = softmax(&[1.0, 2.0, 3.0, -1000.0], 1.0).unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|&p| p >= 0.0));
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_temperature_sharpens() {
        let warm = softmax(&[1.0, 2.0], 1.0).unwrap();
        let cold = softmax(&[1.0, 2.0], 0.1).unwrap();
        assert!(cold[1] > warm[1]);
    }

    #[test]
    fn test_softmax_rejects_non_finite() {
        assert!(matches!(softmax(&[f64::NAN, 1.0], 1.0), Err(Error::NonFinite(_))));
        assert!(matches!(softmax(&[], 1.0), Err(Error::NonFinite(_))));
    }

    #[test]
    fn test_categorical_respects_point_mass() {
        let mut sampler = Categorical::new(StdRng::seed_from_u64(1));
        for _ in 0..50 {
            assert_eq!(sampler.sample(&[0.0, 0.0, 1.0, 0.0]).unwrap(), 2);
        }
    }

    #[test]
    fn test_categorical_frequencies() {
        let mut sampler = Categorical::new(StdRng::seed_from_u64(9));
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[sampler.sample(&[0.25, 0.75]).unwrap() as usize] += 1;
        }
        let share = counts[1] as f64 / 10_000.0;
        assert!((share - 0.75).abs() < 0.03, "share was {share}");
    }

    #[test]
    fn test_greedy_picks_argmax() {
        assert_eq!(Greedy.sample(&[0.1, 0.6, 0.3]).unwrap(), 1);
        assert_eq!(Greedy.sample(&[0.5, 0.5]).unwrap(), 0);
    }

    #[test]
    fn test_generation_length() {
        let (_vs, model) = setup_model(0);
        let generator = Generator::new(&model, Device::Cpu);
        let mut sampler = Categorical::new(StdRng::seed_from_u64(0));
        for seed in [vec![0i64], vec![1, 2, 3]] {
            for k in [0usize, 1, 5, 12] {
                let out = generator.generate(&seed, k, &mut sampler).unwrap();
                assert_eq!(out.len(), seed.len() + k);
                assert_eq!(&out[..seed.len()], &seed[..]);
                assert!(out.iter().all(|&id| (0..VOCAB_SIZE as i64).contains(&id)));
            }
        }
    }

    #[test]
    fn test_generation_is_reproducible() {
        let (_vs, model) = setup_model(11);
        let generator = Generator::new(&model, Device::Cpu);
        let a = generator
            .generate(&[0], 30, &mut Categorical::new(StdRng::seed_from_u64(5)))
            .unwrap();
        let b = generator
            .generate(&[0], 30, &mut Categorical::new(StdRng::seed_from_u64(5)))
            .unwrap();
        assert_eq!(a, b);
        let greedy_a = generator.generate(&[3], 10, &mut Greedy).unwrap();
        let greedy_b = generator.generate(&[3], 10, &mut Greedy).unwrap();
        assert_eq!(greedy_a, greedy_b);
    }

    #[test]
    fn test_long_context_is_truncated() {
        let (_vs, model) = setup_model(2);
        let generator = Generator::new(&model, Device::Cpu);
        // Ten ids with a block size of four: only the last four are visible.
        let long: Vec<i64> = (0..10).map(|i| i % VOCAB_SIZE as i64).collect();
        let full = generator.next_token_distribution(&long).unwrap();
        let tail = generator.next_token_distribution(&long[6..]).unwrap();
        assert_eq!(full, tail);
        assert_eq!(full.len(), VOCAB_SIZE);
    }

    #[test]
    fn test_empty_seed_rejected() {
        let (_vs, model) = setup_model(0);
        let generator = Generator::new(&model, Device::Cpu);
        assert!(matches!(
            generator.generate(&[], 3, &mut Greedy),
            Err(Error::EmptyContext)
        ));
    }

    #[test]
    fn test_stream_yields_one_token_per_step() {
        let (_vs, model) = setup_model(4);
        let generator = Generator::new(&model, Device::Cpu);
        let mut sampler = Greedy;
        let streamed: Vec<i64> = generator
            .stream(&[1], &mut sampler)
            .take(6)
            .collect::<Result<_>>()
            .unwrap();
        let generated = generator.generate(&[1], 6, &mut Greedy).unwrap();
        assert_eq!(streamed, generated[1..]);
    }
}
