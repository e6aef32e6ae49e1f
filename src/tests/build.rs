use std::sync::Arc;

use super::{book, detective_books, encoder_for, numbered_books, FailingEncoder};
use crate::books::MetadataStore;
use crate::semantic::{
    build_corpus, persist, BuildError, BuildOptions, Corpus, EmbeddingError, Encoder,
    RecommendError, Recommender, VectorStorage, VectorStorageError,
};

fn paths(tmp: &tempfile::TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    (
        tmp.path().join("vectors.bin"),
        tmp.path().join("books_metadata.csv"),
    )
}

#[test]
fn persisted_index_searches_identically() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let books = numbered_books(50);
    let encoder = encoder_for(&books);
    let corpus = build_corpus(&encoder, books, &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    let reloaded = Corpus::open(&index_path, &metadata_path, &encoder.model_id_hash()).unwrap();
    assert_eq!(reloaded.index(), corpus.index());
    assert_eq!(reloaded.metadata(), corpus.metadata());

    for query in ["story about theme3", "n7 n8 n9", "number"] {
        let vector = encoder.encode(query).unwrap();
        let before = corpus.index().search(&vector, 50).unwrap();
        let after = reloaded.index().search(&vector, 50).unwrap();
        assert_eq!(before, after);
    }
}

#[test]
fn recommender_opens_persisted_corpus() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let books = detective_books();
    let encoder = Arc::new(encoder_for(&books));
    let corpus = build_corpus(encoder.as_ref(), books, &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    let recommender = Recommender::open(encoder, &index_path, &metadata_path).unwrap();
    let results = recommender.recommend("murder mystery detective", 3).unwrap();
    let ids: Vec<u64> = results.iter().map(|r| r.book.id).collect();
    assert_eq!(ids, vec![0, 2, 1]);
}

#[test]
fn open_detects_row_count_mismatch() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let books = detective_books();
    let encoder = encoder_for(&books);
    let corpus = build_corpus(&encoder, books.clone(), &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    // Drop a row from the metadata file
    MetadataStore::from_books(books[..2].to_vec())
        .save(&metadata_path)
        .unwrap();

    let result = Corpus::open(&index_path, &metadata_path, &encoder.model_id_hash());
    assert!(matches!(
        result,
        Err(RecommendError::MetadataMismatch {
            index: 3,
            metadata: 2
        })
    ));
}

#[test]
fn open_detects_edited_metadata() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let books = detective_books();
    let encoder = encoder_for(&books);
    let corpus = build_corpus(&encoder, books.clone(), &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    // Same row count, rows swapped
    let mut swapped = books;
    swapped.swap(0, 1);
    MetadataStore::from_books(swapped)
        .save(&metadata_path)
        .unwrap();

    let result = Corpus::open(&index_path, &metadata_path, &encoder.model_id_hash());
    assert!(matches!(result, Err(RecommendError::MetadataDigestMismatch)));
}

#[test]
fn open_rejects_index_from_other_model() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let books = detective_books();
    let encoder = encoder_for(&books);
    let corpus = build_corpus(&encoder, books.clone(), &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    let other = Arc::new(encoder_for(&books).named("other-model"));
    let result = Recommender::open(other, &index_path, &metadata_path);
    assert!(matches!(
        result,
        Err(RecommendError::Storage(VectorStorageError::ModelMismatch))
    ));
}

#[test]
fn open_missing_files_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);
    let encoder = encoder_for(&detective_books());

    let result = Corpus::open(&index_path, &metadata_path, &encoder.model_id_hash());
    assert!(matches!(
        result,
        Err(RecommendError::Storage(VectorStorageError::Io(_)))
    ));
}

#[test]
fn parallel_build_matches_sequential() {
    let books = numbered_books(100);
    let encoder = encoder_for(&books);

    let sequential = build_corpus(
        &encoder,
        books.clone(),
        &BuildOptions {
            batch_size: 100,
            parallelism: Some(1),
            ..Default::default()
        },
    )
    .unwrap();

    let parallel = build_corpus(
        &encoder,
        books,
        &BuildOptions {
            batch_size: 7,
            parallelism: Some(4),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(sequential.index(), parallel.index());
    assert_eq!(sequential.metadata(), parallel.metadata());
}

#[test]
fn build_encodes_in_batches() {
    let books = numbered_books(70);
    let encoder = encoder_for(&books);

    let corpus = build_corpus(
        &encoder,
        books,
        &BuildOptions {
            batch_size: 32,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(corpus.len(), 70);
    assert_eq!(encoder.calls(), 3);
}

#[test]
fn build_assigns_ids_by_position() {
    let books = detective_books();
    let encoder = encoder_for(&books);
    let corpus = build_corpus(&encoder, books, &BuildOptions::default()).unwrap();

    let titles: Vec<(u64, &str)> = corpus
        .metadata()
        .iter()
        .map(|b| (b.id, b.title.as_str()))
        .collect();
    assert_eq!(
        titles,
        vec![(0, "The Case"), (1, "The Dragon"), (2, "The Inquiry")]
    );
}

#[test]
fn build_rejects_empty_corpus() {
    let encoder = encoder_for(&detective_books());
    let result = build_corpus(&encoder, vec![], &BuildOptions::default());
    assert!(matches!(result, Err(BuildError::EmptyCorpus)));
}

#[test]
fn build_rejects_blank_description() {
    let books = vec![book("A", "detective"), book("B", "   ")];
    let encoder = encoder_for(&books);
    let result = build_corpus(&encoder, books, &BuildOptions::default());
    assert!(matches!(result, Err(BuildError::EmptyDescription(1))));
}

#[test]
fn failed_build_persists_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let mut books = detective_books();
    books.push(book("Bad", "a forbidden description"));
    let encoder = FailingEncoder {
        inner: encoder_for(&books),
        poison: "forbidden",
    };

    let result = build_corpus(&encoder, books, &BuildOptions::default())
        .and_then(|corpus| persist(&corpus, &index_path, &metadata_path));

    assert!(matches!(
        result,
        Err(BuildError::Embedding(EmbeddingError::EmbeddingFailed(_)))
    ));
    assert!(!index_path.exists());
    assert!(!metadata_path.exists());
}

#[test]
fn rebuild_overwrites_previous_pair() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let small = numbered_books(5);
    let encoder = encoder_for(&numbered_books(20));
    let corpus = build_corpus(&encoder, small, &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    let large = numbered_books(20);
    let corpus = build_corpus(&encoder, large, &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    let stored = VectorStorage::new(index_path.clone()).load_unchecked().unwrap();
    assert_eq!(stored.index.len(), 20);

    let reloaded = Corpus::open(&index_path, &metadata_path, &encoder.model_id_hash()).unwrap();
    assert_eq!(reloaded.len(), 20);
}

#[test]
fn failed_index_write_keeps_previous_pair() {
    let tmp = tempfile::tempdir().unwrap();
    let (index_path, metadata_path) = paths(&tmp);

    let encoder = encoder_for(&numbered_books(20));
    let corpus = build_corpus(&encoder, numbered_books(5), &BuildOptions::default()).unwrap();
    persist(&corpus, &index_path, &metadata_path).unwrap();

    // The index cannot be written into a directory that does not exist
    let unwritable = tmp.path().join("missing").join("vectors.bin");
    let larger = build_corpus(&encoder, numbered_books(20), &BuildOptions::default()).unwrap();
    let result = persist(&larger, &unwritable, &metadata_path);

    assert!(matches!(
        result,
        Err(BuildError::Storage(VectorStorageError::Io(_)))
    ));
    assert!(!metadata_path.with_extension("csv-tmp").exists());

    let reloaded = Corpus::open(&index_path, &metadata_path, &encoder.model_id_hash()).unwrap();
    assert_eq!(reloaded.len(), 5);
    assert_eq!(reloaded.metadata(), corpus.metadata());
}
