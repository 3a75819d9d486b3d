use tiktoken_rs::CoreBPE;

use super::TokenCounter;

/// Token counter backed by the tiktoken encodings
///
/// Models tiktoken does not know are counted with `o200k_base`, the
/// encoding of current `OpenAI` models, unless `strict` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenCounter {
    strict: bool,
}

impl TiktokenCounter {
    /// Counter that returns `None` for models tiktoken does not know
    pub const fn strict() -> Self {
        Self { strict: true }
    }

    fn encoding(self, model: &str) -> Option<CoreBPE> {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(bpe),
            Err(_) if self.strict => None,
            Err(_) => tiktoken_rs::o200k_base().ok(),
        }
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, model: &str, text: &str) -> Option<u32> {
        let bpe = self.encoding(model)?;
        u32::try_from(bpe.encode_with_special_tokens(text).len()).ok()
    }
}
