//! Cleaning of the raw book dataset before it is embedded.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::books::BookCreate;

/// Placeholder for missing authors and categories
pub const UNKNOWN: &str = "Unknown";

/// A row of the raw dataset. Only the columns we need are read; any other
/// column in the file is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBook {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub total: usize,
    pub missing_description: usize,
    pub duplicate_titles: usize,
    pub kept: usize,
}

pub fn read_raw(path: &Path) -> anyhow::Result<Vec<RawBook>> {
    let mut csv_reader = csv::Reader::from_path(path)
        .with_context(|| format!("couldnt open raw dataset {}", path.display()))?;

    let mut rows = vec![];
    for (idx, record) in csv_reader.deserialize::<RawBook>().enumerate() {
        rows.push(record.with_context(|| format!("malformed row {}", idx + 1))?);
    }
    Ok(rows)
}

/// Drop rows without a description, fill in missing authors and
/// categories, and keep only the first book for each title.
pub fn clean_books(raw: Vec<RawBook>) -> (Vec<BookCreate>, PrepareReport) {
    let mut report = PrepareReport {
        total: raw.len(),
        ..Default::default()
    };

    let mut seen_titles = HashSet::new();
    let mut books = vec![];

    for row in raw {
        let description = match non_blank(row.description) {
            Some(description) => description,
            None => {
                report.missing_description += 1;
                continue;
            }
        };

        let title = row.title.unwrap_or_default();
        if !seen_titles.insert(title.clone()) {
            report.duplicate_titles += 1;
            continue;
        }

        books.push(BookCreate {
            title,
            authors: non_blank(row.authors).unwrap_or_else(|| UNKNOWN.to_string()),
            description,
            categories: non_blank(row.categories).unwrap_or_else(|| UNKNOWN.to_string()),
        });
    }

    report.kept = books.len();
    (books, report)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
