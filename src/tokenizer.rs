use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Character-level codec whose alphabet is every distinct character of the training corpus,
/// ordered by code point. Ids are dense in `[0, vocab_size)`.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    chars: Vec<char>,
    ids: HashMap<char, i64>,
}

impl Tokenizer {
    pub fn new(corpus: &str) -> Result<Self> {
        let chars: Vec<char> = corpus.chars().collect::<BTreeSet<_>>().into_iter().collect();
        if chars.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let ids = chars
            .iter()
            .enumerate()
            .map(|(id, &c)| (c, id as i64))
            .collect();
        Ok(Tokenizer { chars, ids })
    }

    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    /// The alphabet in id order.
    pub fn alphabet(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let mut tokens = Vec::with_capacity(text.len());
        for c in text.chars() {
            let id = self.ids.get(&c).ok_or(Error::UnknownSymbol(c))?;
            tokens.push(*id);
        }
        Ok(tokens)
    }

    pub fn decode(&self, tokens: &[i64]) -> Result<String> {
        let mut text = String::with_capacity(tokens.len());
        for &token in tokens {
            let c = usize::try_from(token)
                .ok()
                .and_then(|index| self.chars.get(index))
                .ok_or(Error::InvalidId(token))?;
            text.push(*c);
        }
        Ok(text)
    }
}
