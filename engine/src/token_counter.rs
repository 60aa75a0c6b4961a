//! Streaming token estimates.
//!
//! Counts are **approximate**: every provider gets the `o200k_base` encoding
//! from tiktoken. The number only drives the "tokens so far" indicator while a
//! turn streams, so provider-exact counts are not worth a round trip.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, o200k_base};

use parley_types::StreamChunk;

/// The encoder loads vocabulary data on construction, so it is built once.
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Thread-safe approximate token counter. Falls back to byte length when the
/// encoder cannot be initialized.
#[derive(Clone, Copy)]
pub struct TokenCounter {
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            tracing::error!(
                "Failed to initialize tiktoken o200k_base encoder. Falling back to byte-length estimates."
            );
        }

        Self { encoder }
    }

    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len(),
        };

        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Estimate for the text or reasoning increment of a stream fragment.
    #[must_use]
    pub fn count_chunk(&self, chunk: &StreamChunk) -> u32 {
        chunk.increment().map_or(0, |delta| self.count_str(delta))
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}
