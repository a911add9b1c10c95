//! Uniform access to profile input.
//!
//! A [`DataSource`] hands out a display name, the raw (already decompressed)
//! bytes and a [`TextFileContent`] view of them. Text is held in bounded
//! chunks so that inputs larger than any single string can still be walked
//! line by line.

use crate::deps::Dependencies;
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::Path;

/// Default upper bound for one text chunk, in bytes.
pub const DEFAULT_TEXT_CHUNK_SIZE: usize = 128 * 1024 * 1024;

/// Input to the format detector.
pub trait DataSource {
    /// Display name, normally the file name. Filename heuristics match on it.
    fn name(&self) -> &str;

    /// The input bytes, after speculative decompression.
    fn read_as_bytes(&self) -> io::Result<Cow<'_, [u8]>>;

    /// The input as chunked text.
    fn read_as_text(&self, deps: &dyn Dependencies) -> io::Result<TextFileContent>;
}

// ============================================================================
// Sources
// ============================================================================

/// An in-memory buffer, decompressed once on construction if it is compressed.
#[derive(Debug, Clone)]
pub struct BufferSource {
    name: String,
    bytes: Vec<u8>,
}

impl BufferSource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, deps: &dyn Dependencies) -> Self {
        let name = name.into();
        let bytes = match deps.decompress(&bytes) {
            Some(decompressed) => {
                log::debug!(
                    "{name}: decompressed {} bytes to {}",
                    bytes.len(),
                    decompressed.len()
                );
                decompressed
            }
            None => bytes,
        };
        Self { name, bytes }
    }
}

impl DataSource for BufferSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_as_bytes(&self) -> io::Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(&self.bytes))
    }

    fn read_as_text(&self, _deps: &dyn Dependencies) -> io::Result<TextFileContent> {
        Ok(TextFileContent::from_bytes(&self.bytes))
    }
}

/// A file on disk, read eagerly.
#[derive(Debug, Clone)]
pub struct FileSource {
    inner: BufferSource,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>, deps: &dyn Dependencies) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            inner: BufferSource::new(name, bytes, deps),
        })
    }
}

impl DataSource for FileSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read_as_bytes(&self) -> io::Result<Cow<'_, [u8]>> {
        self.inner.read_as_bytes()
    }

    fn read_as_text(&self, deps: &dyn Dependencies) -> io::Result<TextFileContent> {
        self.inner.read_as_text(deps)
    }
}

/// Literal text. Never decompressed.
#[derive(Debug, Clone)]
pub struct TextSource {
    name: String,
    text: String,
}

impl TextSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl DataSource for TextSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_as_bytes(&self) -> io::Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(self.text.as_bytes()))
    }

    fn read_as_text(&self, _deps: &dyn Dependencies) -> io::Result<TextFileContent> {
        Ok(TextFileContent::from_bytes(self.text.as_bytes()))
    }
}

// ============================================================================
// Text content
// ============================================================================

/// Decoded text split into chunks of bounded size.
#[derive(Debug, Clone, Default)]
pub struct TextFileContent {
    chunks: Vec<String>,
    len: usize,
}

impl TextFileContent {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_bytes_with_chunk_size(bytes, DEFAULT_TEXT_CHUNK_SIZE)
    }

    /// Decode `bytes` into chunks of at most `chunk_size` bytes, cut on
    /// character boundaries. Invalid UTF-8 is replaced.
    pub fn from_bytes_with_chunk_size(bytes: &[u8], chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < bytes.len() {
            let end = chunk_end(bytes, start, chunk_size);
            chunks.push(String::from_utf8_lossy(&bytes[start..end]).into_owned());
            start = end;
        }
        Self {
            chunks,
            len: bytes.len(),
        }
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Input size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bounded prefix of the text, for signature sniffing.
    pub fn first_chunk(&self) -> &str {
        self.chunks.first().map(String::as_str).unwrap_or("")
    }

    /// Iterate over lines. Each call starts from the beginning.
    pub fn split_lines(&self) -> Lines<'_> {
        Lines {
            chunks: &self.chunks,
            chunk_index: 0,
            pos: 0,
            carry: String::new(),
        }
    }

    /// Parse the text as JSON, repairing a truncated top-level array first.
    pub fn parse_as_json(
        &self,
        deps: &dyn Dependencies,
    ) -> Result<serde_json::Value, serde_json::Error> {
        let joined: Cow<'_, [u8]> = match self.chunks.as_slice() {
            [] => Cow::Borrowed(b"".as_slice()),
            [only] => Cow::Borrowed(only.as_bytes()),
            many => Cow::Owned(many.concat().into_bytes()),
        };
        match repair_truncated_array(&joined) {
            Some(repaired) => deps.parse_json(&repaired),
            None => deps.parse_json(&joined),
        }
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

fn chunk_end(bytes: &[u8], start: usize, chunk_size: usize) -> usize {
    let mut end = start.saturating_add(chunk_size).min(bytes.len());
    if end == bytes.len() {
        return end;
    }
    // Back up to the start of the character that straddles the cut.
    let mut back = end;
    while back > start && end - back < 4 && is_continuation(bytes[back]) {
        back -= 1;
    }
    if back > start {
        return back;
    }
    // Chunk smaller than one character: extend to the next boundary.
    while end < bytes.len() && is_continuation(bytes[end]) {
        end += 1;
    }
    end
}

/// Close a JSON array whose tail was cut off: `[1, 2,` becomes `[1, 2]`.
/// Returns `None` when no repair applies.
pub fn repair_truncated_array(bytes: &[u8]) -> Option<Vec<u8>> {
    let trimmed = bytes.trim_ascii();
    if !trimmed.starts_with(b"[") || trimmed.ends_with(b"]") {
        return None;
    }
    let body = trimmed.strip_suffix(b",").unwrap_or(trimmed).trim_ascii_end();
    let mut repaired = Vec::with_capacity(body.len() + 1);
    repaired.extend_from_slice(body);
    repaired.push(b']');
    Some(repaired)
}

/// Lines of a [`TextFileContent`], with lines that straddle chunks reassembled.
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    chunks: &'a [String],
    chunk_index: usize,
    pos: usize,
    carry: String,
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

impl<'a> Iterator for Lines<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunks = self.chunks;
        loop {
            let Some(chunk) = chunks.get(self.chunk_index) else {
                if self.carry.is_empty() {
                    return None;
                }
                let mut last = std::mem::take(&mut self.carry);
                if last.ends_with('\r') {
                    last.pop();
                }
                return Some(Cow::Owned(last));
            };
            let rest = &chunk[self.pos..];
            match rest.find('\n') {
                Some(newline) => {
                    let line = &rest[..newline];
                    self.pos += newline + 1;
                    if self.carry.is_empty() {
                        return Some(Cow::Borrowed(strip_cr(line)));
                    }
                    self.carry.push_str(line);
                    let mut joined = std::mem::take(&mut self.carry);
                    if joined.ends_with('\r') {
                        joined.pop();
                    }
                    return Some(Cow::Owned(joined));
                }
                None => {
                    self.carry.push_str(rest);
                    self.chunk_index += 1;
                    self.pos = 0;
                }
            }
        }
    }
}
