use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A book as displayed to the user. The id is its row position in the
/// metadata file and in the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub authors: String,
    pub description: String,
    pub categories: String,
}

/// Fields of a book before it has been given a position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookCreate {
    pub title: String,
    pub authors: String,
    pub description: String,
    pub categories: String,
}

impl From<&Book> for BookCreate {
    fn from(book: &Book) -> Self {
        Self {
            title: book.title.clone(),
            authors: book.authors.clone(),
            description: book.description.clone(),
            categories: book.categories.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("book {0} not found")]
    NotFound(u64),

    #[error("row {row} has id {id}; ids must match row order")]
    IdOutOfOrder { row: usize, id: u64 },

    #[error("metadata file {0} does not exist")]
    Missing(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
}

const CSV_HEADERS: [&str; 5] = ["id", "title", "authors", "description", "categories"];

/// Ordered, read-only collection of books aligned with the vector index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataStore {
    books: Vec<Book>,
}

impl MetadataStore {
    /// Assign ids by position.
    pub fn from_books(books: Vec<BookCreate>) -> Self {
        let books = books
            .into_iter()
            .enumerate()
            .map(|(id, book)| Book {
                id: id as u64,
                title: book.title,
                authors: book.authors,
                description: book.description,
                categories: book.categories,
            })
            .collect();

        Self { books }
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        if let Err(err) = std::fs::metadata(path) {
            return match err.kind() {
                ErrorKind::NotFound => Err(MetadataError::Missing(path.display().to_string())),
                _ => Err(err.into()),
            };
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut books = vec![];
        for (row, record) in csv_reader.deserialize::<Book>().enumerate() {
            let book = record?;
            if book.id != row as u64 {
                return Err(MetadataError::IdOutOfOrder { row, id: book.id });
            }
            books.push(book);
        }

        log::debug!(
            "took {}ms to read {} metadata rows",
            now.elapsed().as_micros() as f64 / 1000.0,
            books.len()
        );

        Ok(Self { books })
    }

    /// Write the store as CSV. Writes to a temp file first, then renames.
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let temp_path = self.stage(path)?;
        if let Err(err) = std::fs::rename(&temp_path, path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err.into());
        }
        Ok(())
    }

    /// Write the CSV to a synced temp file next to `path` and return the
    /// temp file's path. Renaming it onto `path` completes the save.
    pub(crate) fn stage(&self, path: &Path) -> Result<PathBuf, MetadataError> {
        let temp_path = path.with_extension("csv-tmp");

        if let Err(err) = self.write_csv(&temp_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        Ok(temp_path)
    }

    fn write_csv(&self, path: &Path) -> Result<(), MetadataError> {
        let mut csv_wrt = csv::Writer::from_path(path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for book in &self.books {
            csv_wrt.write_record([
                book.id.to_string().as_str(),
                &book.title,
                &book.authors,
                &book.description,
                &book.categories,
            ])?;
        }
        let file = csv_wrt.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<&Book, MetadataError> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.books.get(idx))
            .ok_or(MetadataError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Book> {
        self.books.iter()
    }

    /// SHA256 over every row, in order. Stored alongside the vector index
    /// so a metadata file that was edited or swapped after the build is
    /// detected on load.
    pub fn digest(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update((self.books.len() as u64).to_le_bytes());
        for book in &self.books {
            hasher.update(book.id.to_le_bytes());
            for field in [
                &book.title,
                &book.authors,
                &book.description,
                &book.categories,
            ] {
                // length prefix keeps field boundaries unambiguous
                hasher.update((field.len() as u64).to_le_bytes());
                hasher.update(field.as_bytes());
            }
        }
        hasher.finalize().into()
    }

    /// Up to `count` distinct books in random order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Vec<&Book> {
        let amount = count.min(self.books.len());
        rand::seq::index::sample(rng, self.books.len(), amount)
            .into_iter()
            .map(|idx| &self.books[idx])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn create(title: &str, description: &str) -> BookCreate {
        BookCreate {
            title: title.to_string(),
            authors: "Author".to_string(),
            description: description.to_string(),
            categories: "Fiction".to_string(),
        }
    }

    fn sample_store() -> MetadataStore {
        MetadataStore::from_books(vec![
            create("A", "detective solves a murder"),
            create("B", "wizard fights a dragon"),
            create("C, with \"quotes\"", "multi\nline"),
        ])
    }

    #[test]
    fn ids_follow_position() {
        let store = sample_store();
        let ids: Vec<u64> = store.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(store.get(1).unwrap().title, "B");
    }

    #[test]
    fn get_out_of_range_is_not_found() {
        let store = sample_store();
        assert!(matches!(store.get(3), Err(MetadataError::NotFound(3))));
        assert!(matches!(
            store.get(u64::MAX),
            Err(MetadataError::NotFound(u64::MAX))
        ));
    }

    #[test]
    fn save_load_roundtrip_preserves_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("books_metadata.csv");

        let store = sample_store();
        store.save(&path).unwrap();

        let loaded = MetadataStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.digest(), store.digest());
        assert!(!path.with_extension("csv-tmp").exists());
    }

    #[test]
    fn stage_keeps_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("books_metadata.csv");
        sample_store().save(&path).unwrap();

        let other = MetadataStore::from_books(vec![create("Z", "something else")]);
        let staged = other.stage(&path).unwrap();

        assert_eq!(MetadataStore::load(&path).unwrap(), sample_store());
        std::fs::rename(&staged, &path).unwrap();
        assert_eq!(MetadataStore::load(&path).unwrap(), other);
    }

    #[test]
    fn load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let result = MetadataStore::load(&tmp.path().join("nope.csv"));
        assert!(matches!(result, Err(MetadataError::Missing(_))));
    }

    #[test]
    fn load_rejects_out_of_order_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("books_metadata.csv");
        std::fs::write(
            &path,
            "id,title,authors,description,categories\n0,A,x,d,c\n2,B,x,d,c\n",
        )
        .unwrap();

        let result = MetadataStore::load(&path);
        assert!(matches!(
            result,
            Err(MetadataError::IdOutOfOrder { row: 1, id: 2 })
        ));
    }

    #[test]
    fn digest_changes_with_content_and_order() {
        let store = sample_store();

        let edited = MetadataStore::from_books(vec![
            create("A", "detective solves a murder"),
            create("B", "wizard fights a dragon!"),
            create("C, with \"quotes\"", "multi\nline"),
        ]);
        assert_ne!(store.digest(), edited.digest());

        let reordered = MetadataStore::from_books(vec![
            create("B", "wizard fights a dragon"),
            create("A", "detective solves a murder"),
            create("C, with \"quotes\"", "multi\nline"),
        ]);
        assert_ne!(store.digest(), reordered.digest());
    }

    #[test]
    fn digest_separates_fields() {
        let a = MetadataStore::from_books(vec![create("ab", "c")]);
        let b = MetadataStore::from_books(vec![create("a", "bc")]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn sample_returns_distinct_books() {
        let store = sample_store();
        let mut rng = StdRng::seed_from_u64(7);

        let picked = store.sample(&mut rng, 2);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0].id, picked[1].id);

        let all = store.sample(&mut rng, 10);
        assert_eq!(all.len(), 3);
    }
}
