//! Content metadata extraction during upload.
//!
//! Extractors see the bytes of an upload as they stream and produce a
//! [`Metadata`] map when the write closes. They are opportunistic: an
//! extractor failure is logged and the upload proceeds without metadata.

use std::collections::HashMap;
use std::sync::Arc;

use nimbus_types::Metadata;

use crate::error::VfsResult;

/// Streaming metadata extractor for one upload.
pub trait MetadataExtractor: Send {
    /// Keys this extractor may produce.
    fn known_keys(&self) -> &'static [&'static str];

    /// Feed a chunk of content.
    fn write(&mut self, chunk: &[u8]) -> VfsResult<()>;

    /// The upload failed; drop any partial state.
    fn abort(self: Box<Self>);

    /// Finish and return the extracted metadata.
    fn result(self: Box<Self>) -> VfsResult<Metadata>;
}

/// Builds a fresh extractor for one upload.
pub type ExtractorFactory = Arc<dyn Fn() -> Box<dyn MetadataExtractor> + Send + Sync>;

/// MIME type to extractor factory.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    factories: HashMap<String, ExtractorFactory>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mimes: Vec<_> = self.factories.keys().collect();
        mimes.sort();
        f.debug_struct("ExtractorRegistry").field("mimes", &mimes).finish()
    }
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in extractors.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        let text: ExtractorFactory =
            Arc::new(|| Box::new(TextExtractor::default()) as Box<dyn MetadataExtractor>);
        r.register("text/plain", Arc::clone(&text));
        r.register("text/markdown", text);
        r
    }

    pub fn register(&mut self, mime: impl Into<String>, factory: ExtractorFactory) {
        self.factories.insert(mime.into(), factory);
    }

    pub fn supports(&self, mime: &str) -> bool {
        self.factories.contains_key(mime)
    }

    /// New extractor for `mime`, if one is registered.
    pub fn for_mime(&self, mime: &str) -> Option<Box<dyn MetadataExtractor>> {
        self.factories.get(mime).map(|f| f())
    }
}

/// Line and word counts of text content.
#[derive(Debug, Default)]
pub struct TextExtractor {
    lines: u64,
    words: u64,
    in_word: bool,
    last: Option<u8>,
}

impl TextExtractor {
    pub const KEYS: &'static [&'static str] = &["lineCount", "wordCount"];
}

impl MetadataExtractor for TextExtractor {
    fn known_keys(&self) -> &'static [&'static str] {
        Self::KEYS
    }

    fn write(&mut self, chunk: &[u8]) -> VfsResult<()> {
        for &b in chunk {
            if b == b'\n' {
                self.lines += 1;
            }
            if b.is_ascii_whitespace() {
                self.in_word = false;
            } else if !self.in_word {
                self.in_word = true;
                self.words += 1;
            }
        }
        if let Some(&b) = chunk.last() {
            self.last = Some(b);
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {}

    fn result(self: Box<Self>) -> VfsResult<Metadata> {
        let lines = match self.last {
            Some(b'\n') | None => self.lines,
            Some(_) => self.lines + 1,
        };
        let mut meta = Metadata::new();
        meta.insert("lineCount".into(), lines.into());
        meta.insert("wordCount".into(), self.words.into());
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(chunks: &[&[u8]]) -> Metadata {
        let mut x = ExtractorRegistry::with_defaults().for_mime("text/plain").unwrap();
        for c in chunks {
            x.write(c).unwrap();
        }
        x.result().unwrap()
    }

    #[test]
    fn test_counts_across_chunks() {
        let meta = run(&[b"hello wo", b"rld\nsecond line"]);
        assert_eq!(meta["lineCount"], json!(2));
        assert_eq!(meta["wordCount"], json!(4));
    }

    #[test]
    fn test_trailing_newline_and_empty() {
        assert_eq!(run(&[b"a\nb\n"])["lineCount"], json!(2));
        assert_eq!(run(&[])["lineCount"], json!(0));
    }

    #[test]
    fn test_result_only_uses_known_keys() {
        let x = TextExtractor::default();
        let keys = x.known_keys();
        let meta = Box::new(x).result().unwrap();
        assert!(meta.keys().all(|k| keys.contains(&k.as_str())));
    }

    #[test]
    fn test_unregistered_mime() {
        let r = ExtractorRegistry::with_defaults();
        assert!(r.for_mime("image/png").is_none());
        assert!(r.supports("text/markdown"));
    }
}
