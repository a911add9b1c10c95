//! Platform primitives the importers rely on but do not implement.
//!
//! Every import call receives a `&dyn Dependencies`. Hosts that already have
//! a decompressor or a faster JSON parser can supply their own; everyone else
//! uses [`DefaultDependencies`].

use serde::Deserialize;
use std::io::Read;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Capability bundle threaded through every import.
pub trait Dependencies {
    /// Decompress `bytes`. `None` means the input is not compressed (or not
    /// in a format this implementation understands); it is never an error.
    fn decompress(&self, bytes: &[u8]) -> Option<Vec<u8>>;

    /// Parse a JSON document.
    fn parse_json(&self, bytes: &[u8]) -> Result<serde_json::Value, serde_json::Error>;
}

/// gzip and zstd by magic bytes, `serde_json` for JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDependencies;

impl Dependencies for DefaultDependencies {
    fn decompress(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoder = flate2::read::MultiGzDecoder::new(bytes);
            let mut out = Vec::new();
            match decoder.read_to_end(&mut out) {
                Ok(_) => Some(out),
                Err(e) => {
                    log::debug!("gzip magic present but decompression failed: {e}");
                    None
                }
            }
        } else if bytes.starts_with(&ZSTD_MAGIC) {
            match zstd::stream::decode_all(bytes) {
                Ok(out) => Some(out),
                Err(e) => {
                    log::debug!("zstd magic present but decompression failed: {e}");
                    None
                }
            }
        } else {
            None
        }
    }

    /// No nesting limit: call trees are as deep as the stacks they record.
    /// `serde_stacker` grows the stack on the heap while parsing.
    fn parse_json(&self, bytes: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        deserializer.disable_recursion_limit();
        let value = serde_json::Value::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
        deserializer.end()?;
        Ok(value)
    }
}
