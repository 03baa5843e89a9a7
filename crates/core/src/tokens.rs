//! Token counting used for context-budget accounting.

use tiktoken_rs::CoreBPE;

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    fn name(&self) -> &str;
}

/// `cl100k_base`, the encoding of the OpenAI embedding models.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self, String> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|error| error.to_string())?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        "cl100k_base"
    }
}
