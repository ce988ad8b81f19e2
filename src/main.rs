use anyhow::{Context, Result};
use log::info;
use rand::{SeedableRng, rngs::StdRng};
use tch::Device;

use char_gpt::{
    config,
    dataset::{self, DataSet, Split},
    generate::{Categorical, Generator},
    tokenizer::Tokenizer,
    train::Trainer,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::from_env()?;
    config.validate()?;
    tch::manual_seed(config.seed as i64);
    let device = Device::cuda_if_available();

    let text = dataset::read_corpus(&config.corpus_path)
        .with_context(|| format!("failed to read corpus {}", config.corpus_path.display()))?;
    let tokenizer = Tokenizer::new(&text)?;
    println!("{}", tokenizer.alphabet());
    println!("{}", tokenizer.vocab_size());

    let dataset = DataSet::new(tokenizer.encode(&text)?, config.train_fraction);
    info!(
        "corpus of {} characters: {} train / {} val tokens",
        text.chars().count(),
        dataset.subset(Split::Train).len(),
        dataset.subset(Split::Validation).len()
    );

    let mut trainer = Trainer::new(device, tokenizer.vocab_size(), dataset, config.clone())?;
    trainer.train()?;

    // Seed generation with id 0, the lowest code point in the corpus.
    let generator = Generator::new(trainer.model(), device).with_temperature(config.temperature);
    let mut sampler = Categorical::new(StdRng::seed_from_u64(config.seed));
    let tokens = generator.generate(&[0], config.generate_tokens, &mut sampler)?;
    println!("{}", tokenizer.decode(&tokens)?);
    Ok(())
}
