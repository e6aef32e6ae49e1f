use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::books::BookCreate;
use crate::semantic::{EmbeddingError, Encoder};

mod build;

/// Bag-of-words encoder over a fixed vocabulary. One dimension per word,
/// value is the word count; words outside the vocabulary are ignored.
pub struct VocabEncoder {
    name: String,
    vocabulary: Vec<String>,
    calls: AtomicUsize,
}

impl VocabEncoder {
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let vocabulary: BTreeSet<String> = texts.into_iter().flat_map(tokens).collect();
        Self {
            name: "vocab-test".to_string(),
            vocabulary: vocabulary.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Number of `encode`/`encode_batch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for token in tokens(text) {
            if let Ok(idx) = self.vocabulary.binary_search(&token) {
                vector[idx] += 1.0;
            }
        }
        vector
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl Encoder for VocabEncoder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectorize(text))
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

/// Encoder that fails on any text containing `poison`.
pub struct FailingEncoder {
    pub inner: VocabEncoder,
    pub poison: &'static str,
}

impl Encoder for FailingEncoder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains(self.poison) {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "cannot encode '{text}'"
            )));
        }
        self.inner.encode(text)
    }
}

pub fn book(title: &str, description: &str) -> BookCreate {
    BookCreate {
        title: title.to_string(),
        authors: "Unknown".to_string(),
        description: description.to_string(),
        categories: "Fiction".to_string(),
    }
}

/// The three-book corpus: two detective stories and a fantasy.
pub fn detective_books() -> Vec<BookCreate> {
    vec![
        book("The Case", "detective solves a murder"),
        book("The Dragon", "wizard fights a dragon"),
        book("The Inquiry", "detective investigates a crime"),
    ]
}

/// `count` books with distinct descriptions.
pub fn numbered_books(count: usize) -> Vec<BookCreate> {
    (0..count)
        .map(|i| {
            book(
                &format!("Book {i}"),
                &format!("story number n{i} about theme{}", i % 7),
            )
        })
        .collect()
}

pub fn encoder_for(books: &[BookCreate]) -> VocabEncoder {
    VocabEncoder::from_texts(books.iter().map(|b| b.description.as_str()))
}
