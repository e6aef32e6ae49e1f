use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::books::Book;
use crate::semantic::{truncate_chars, Mood, Recommendation};

/// Characters of a query kept in the activity feed
const ACTIVITY_DETAIL_CHARS: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum InteractionError {
    #[error("couldnt parse {path}: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewSource {
    Search,
    Mood,
    Surprise,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchEvent {
    pub query: String,
    pub result_titles: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoodEvent {
    pub mood: Mood,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurpriseEvent {
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// A book shown to the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    pub title: String,
    pub categories: String,
    pub source: ViewSource,
    pub timestamp: DateTime<Utc>,
}

/// Everything recorded so far, as stored in `interactions.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionLog {
    #[serde(default)]
    pub searches: Vec<SearchEvent>,
    #[serde(default)]
    pub mood_selections: Vec<MoodEvent>,
    #[serde(default)]
    pub surprise_picks: Vec<SurpriseEvent>,
    #[serde(default)]
    pub book_views: Vec<BookView>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Search,
    Mood,
    Surprise,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InteractionStats {
    pub total_searches: usize,
    pub total_moods: usize,
    pub total_surprises: usize,
    pub total_interactions: usize,
    pub top_mood: Option<Mood>,
    /// Searches per UTC day, `YYYY-MM-DD`
    pub search_trends: BTreeMap<String, usize>,
    /// Most picked first, ties in declaration order
    pub mood_distribution: Vec<(Mood, usize)>,
    /// Most viewed first, ties by name
    pub popular_books: Vec<(String, usize)>,
    pub popular_categories: Vec<(String, usize)>,
    /// Newest first
    pub recent_activity: Vec<Activity>,
}

/// Records searches, mood picks and surprise picks to a JSON file under the
/// base path, and summarises them.
pub struct InteractionTracker {
    path: PathBuf,
    log: InteractionLog,
}

impl InteractionTracker {
    /// Open the log at `path`. A missing file is an empty log.
    pub fn open(path: &Path) -> Result<Self, InteractionError> {
        let log = match std::fs::read_to_string(path) {
            Ok(data) => {
                serde_json::from_str(&data).map_err(|source| InteractionError::Malformed {
                    path: path.display().to_string(),
                    source,
                })?
            }
            Err(err) if err.kind() == ErrorKind::NotFound => InteractionLog::default(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            log,
        })
    }

    pub fn log(&self) -> &InteractionLog {
        &self.log
    }

    pub fn record_search(&mut self, query: &str, results: &[Recommendation]) {
        let now = Utc::now();
        self.log.searches.push(SearchEvent {
            query: query.to_string(),
            result_titles: results.iter().map(|r| r.book.title.clone()).collect(),
            timestamp: now,
        });
        self.record_views(results.iter().map(|r| &r.book), ViewSource::Search, now);
    }

    pub fn record_mood(&mut self, mood: Mood, results: &[Recommendation]) {
        let now = Utc::now();
        self.log.mood_selections.push(MoodEvent {
            mood,
            timestamp: now,
        });
        self.record_views(results.iter().map(|r| &r.book), ViewSource::Mood, now);
    }

    pub fn record_surprise(&mut self, books: &[Book]) {
        let now = Utc::now();
        self.log.surprise_picks.push(SurpriseEvent {
            count: books.len(),
            timestamp: now,
        });
        self.record_views(books.iter(), ViewSource::Surprise, now);
    }

    fn record_views<'a>(
        &mut self,
        books: impl Iterator<Item = &'a Book>,
        source: ViewSource,
        timestamp: DateTime<Utc>,
    ) {
        self.log.book_views.extend(books.map(|book| BookView {
            title: book.title.clone(),
            categories: book.categories.clone(),
            source,
            timestamp,
        }));
    }

    /// Write the log. Writes to a temp file first, then renames.
    pub fn save(&self) -> Result<(), InteractionError> {
        let temp_path = self.path.with_extension("json-tmp");
        let data = serde_json::to_string_pretty(&self.log)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&temp_path, data.as_bytes())?;
        if let Err(err) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err.into());
        }
        Ok(())
    }

    /// Summary with the `limit` most popular books and categories and the
    /// `limit` most recent activities.
    pub fn stats(&self, limit: usize) -> InteractionStats {
        let log = &self.log;

        let mut search_trends = BTreeMap::new();
        for search in &log.searches {
            let day = search.timestamp.format("%Y-%m-%d").to_string();
            *search_trends.entry(day).or_insert(0) += 1;
        }

        let mut mood_distribution: Vec<(Mood, usize)> = Mood::value_variants()
            .iter()
            .map(|mood| {
                let count = log
                    .mood_selections
                    .iter()
                    .filter(|event| event.mood == *mood)
                    .count();
                (*mood, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();
        // stable sort keeps declaration order among ties
        mood_distribution.sort_by(|a, b| b.1.cmp(&a.1));
        let top_mood = mood_distribution.first().map(|(mood, _)| *mood);

        let popular_books = top_counts(log.book_views.iter().map(|v| v.title.as_str()), limit);
        let popular_categories =
            top_counts(log.book_views.iter().map(|v| v.categories.as_str()), limit);

        let mut recent_activity: Vec<Activity> = log
            .searches
            .iter()
            .map(|s| Activity {
                kind: ActivityKind::Search,
                detail: truncate_chars(&s.query, ACTIVITY_DETAIL_CHARS),
                timestamp: s.timestamp,
            })
            .chain(log.mood_selections.iter().map(|m| Activity {
                kind: ActivityKind::Mood,
                detail: mood_name(m.mood),
                timestamp: m.timestamp,
            }))
            .chain(log.surprise_picks.iter().map(|p| Activity {
                kind: ActivityKind::Surprise,
                detail: format!("{} random books", p.count),
                timestamp: p.timestamp,
            }))
            .collect();
        recent_activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent_activity.truncate(limit);

        InteractionStats {
            total_searches: log.searches.len(),
            total_moods: log.mood_selections.len(),
            total_surprises: log.surprise_picks.len(),
            total_interactions: log.searches.len()
                + log.mood_selections.len()
                + log.surprise_picks.len(),
            top_mood,
            search_trends,
            mood_distribution,
            popular_books,
            popular_categories,
            recent_activity,
        }
    }
}

pub fn mood_name(mood: Mood) -> String {
    mood.to_possible_value()
        .map(|value| value.get_name().to_string())
        .unwrap_or_default()
}

fn top_counts<'a>(items: impl Iterator<Item = &'a str>, limit: usize) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }

    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(item, count)| (item.to_string(), count))
        .collect();
    // BTreeMap order is by name, stable sort keeps it among ties
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.truncate(limit);
    counts
}
