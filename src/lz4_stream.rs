//! Streaming LZ4 block codec.
//!
//! A file transfer uses one [`StreamCompressor`] for all of its blocks and
//! one matching [`StreamDecompressor`] on the receiving side: each block is
//! compressed against the uncompressed bytes of the blocks before it, so
//! blocks can only be decoded in order. Framing is the transport's job.

use lz4_flex::block::{compress_with_dict, decompress_with_dict, DecompressError};

/// LZ4 match window - history beyond this distance cannot be referenced,
/// so both sides cap their dictionary at the same bound.
const DICT_WINDOW: usize = 64 * 1024;

fn push_history(history: &mut Vec<u8>, block: &[u8]) {
    history.extend_from_slice(block);
    if history.len() > DICT_WINDOW {
        let excess = history.len() - DICT_WINDOW;
        history.drain(..excess);
    }
}

/// Compressor half of one transfer.
#[derive(Default)]
pub struct StreamCompressor {
    history: Vec<u8>,
}

impl StreamCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compresses the next block of the stream. Empty blocks produce empty
    /// output and leave the dictionary untouched.
    pub fn compress_block(&mut self, input: &[u8]) -> Vec<u8> {
        if input.is_empty() {
            return Vec::new();
        }
        let out = compress_with_dict(input, &self.history);
        push_history(&mut self.history, input);
        out
    }

    #[cfg(test)]
    pub(crate) fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Decompressor half of one transfer; must see blocks in send order.
#[derive(Default)]
pub struct StreamDecompressor {
    history: Vec<u8>,
}

impl StreamDecompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompresses the next block. `uncompressed_size` comes from the
    /// block's transport header and is the exact expected output length.
    pub fn decompress_block(
        &mut self,
        block: &[u8],
        uncompressed_size: usize,
    ) -> Result<Vec<u8>, DecompressError> {
        if uncompressed_size == 0 {
            return Ok(Vec::new());
        }
        let out = decompress_with_dict(block, uncompressed_size, &self.history)?;
        push_history(&mut self.history, &out);
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn history_len(&self) -> usize {
        self.history.len()
    }
}
