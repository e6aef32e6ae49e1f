use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

mod cli;

use shelfmatch::books::{Book, BookCreate, MetadataStore};
use shelfmatch::config::Config;
use shelfmatch::interactions::{mood_name, InteractionStats, InteractionTracker};
use shelfmatch::prepare;
use shelfmatch::semantic::{
    self, truncate_chars, BuildOptions, EmbeddingModel, Recommendation, Recommender,
    VectorStorage,
};

/// Characters of the description shown per result
const DESCRIPTION_PREVIEW_CHARS: usize = 300;

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shelfmatch=info,warn"));

    // stdout is reserved for results
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_model(config: &Config) -> anyhow::Result<EmbeddingModel> {
    let timeout = Duration::from_secs(config.download_timeout_secs);
    EmbeddingModel::new(&config.model, config.base_path().to_path_buf(), Some(timeout))
        .with_context(|| format!("couldnt load embedding model '{}'", config.model))
}

fn open_recommender(config: &Config) -> anyhow::Result<Recommender> {
    let model = Arc::new(load_model(config)?);
    let recommender = Recommender::open(model, &config.index_path(), &config.metadata_path())
        .context("couldnt open index, run `shelfmatch build` first")?;
    Ok(recommender.with_max_input_chars(config.max_input_chars))
}

/// Append to the interaction log. A log that cannot be read or written only
/// produces a warning.
fn track(config: &Config, record: impl FnOnce(&mut InteractionTracker)) {
    if !config.track_interactions {
        return;
    }

    let path = config.interactions_path();
    let result = InteractionTracker::open(&path).and_then(|mut tracker| {
        record(&mut tracker);
        tracker.save()
    });
    if let Err(err) = result {
        log::warn!("couldnt record interaction in {}: {}", path.display(), err);
    }
}

fn print_stats(stats: &InteractionStats) {
    println!("searches: {}", stats.total_searches);
    println!("mood picks: {}", stats.total_moods);
    println!("surprise picks: {}", stats.total_surprises);
    println!("total: {}", stats.total_interactions);
    println!(
        "top mood: {}",
        stats.top_mood.map(mood_name).unwrap_or_else(|| "-".to_string())
    );

    if !stats.search_trends.is_empty() {
        println!("\nSearches per day:");
        for (day, count) in &stats.search_trends {
            println!("  {day}  {count}");
        }
    }

    if !stats.mood_distribution.is_empty() {
        println!("\nMoods:");
        for (mood, count) in &stats.mood_distribution {
            println!("  {:<12} {}", mood_name(*mood), count);
        }
    }

    if !stats.popular_books.is_empty() {
        println!("\nMost shown books:");
        for (title, count) in &stats.popular_books {
            println!("  {count:>4}  {title}");
        }
    }

    if !stats.popular_categories.is_empty() {
        println!("\nMost shown categories:");
        for (category, count) in &stats.popular_categories {
            println!("  {count:>4}  {category}");
        }
    }

    if !stats.recent_activity.is_empty() {
        println!("\nRecent activity:");
        for activity in &stats.recent_activity {
            println!(
                "  {}  {:<8} {}",
                activity.timestamp.format("%Y-%m-%d %H:%M"),
                format!("{:?}", activity.kind).to_lowercase(),
                activity.detail
            );
        }
    }
}

fn print_recommendations(recommendations: &[Recommendation], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(recommendations)?);
        return Ok(());
    }

    if recommendations.is_empty() {
        println!("No recommendations");
        return Ok(());
    }

    for rec in recommendations {
        print_book(rec.rank, &rec.book, Some(rec.similarity));
    }
    Ok(())
}

fn print_book(rank: usize, book: &Book, similarity: Option<f32>) {
    println!("\n{}", "=".repeat(60));
    println!("#{} - {}", rank, book.title);
    println!("{}", "=".repeat(60));
    println!("Author(s): {}", book.authors);
    println!("Category: {}", book.categories);
    if let Some(similarity) = similarity {
        println!("Similarity: {:.3}", similarity);
    }
    println!("\nDescription:");
    println!(
        "{}",
        truncate_chars(&book.description, DESCRIPTION_PREVIEW_CHARS)
    );
}

fn main() -> anyhow::Result<()> {
    setup_tracing();
    let args = cli::Args::parse();

    let config = Config::load()?;

    match args.command {
        cli::Command::Prepare { input, output } => {
            let raw = prepare::read_raw(&input)?;
            let (books, report) = prepare::clean_books(raw);

            let store = MetadataStore::from_books(books);
            store
                .save(&output)
                .with_context(|| format!("couldnt write {}", output.display()))?;

            log::info!(
                "prepared {} of {} books ({} without description, {} duplicate titles)",
                report.kept,
                report.total,
                report.missing_description,
                report.duplicate_titles
            );
            println!("{} books written to {}", report.kept, output.display());
            Ok(())
        }

        cli::Command::Build { input, no_progress } => {
            let books = MetadataStore::load(&input)
                .with_context(|| format!("couldnt read {}", input.display()))?
                .iter()
                .map(BookCreate::from)
                .collect::<Vec<_>>();

            let model = load_model(&config)?;
            let opts = BuildOptions {
                show_progress: !no_progress,
                ..BuildOptions::from(&config)
            };

            let corpus = semantic::build_corpus(&model, books, &opts)?;
            semantic::persist(&corpus, &config.index_path(), &config.metadata_path())?;

            println!(
                "indexed {} books ({} dimensions, model {})",
                corpus.len(),
                corpus.index().dimensions(),
                config.model
            );
            Ok(())
        }

        cli::Command::Recommend { query, k, json } => {
            let recommender = open_recommender(&config)?;
            let recommendations = recommender.recommend(&query, k.unwrap_or(config.default_k))?;
            track(&config, |tracker| tracker.record_search(&query, &recommendations));
            print_recommendations(&recommendations, json)
        }

        cli::Command::Mood { mood, k, json } => {
            let recommender = open_recommender(&config)?;
            let recommendations =
                recommender.recommend_mood(mood, k.unwrap_or(config.default_k))?;
            track(&config, |tracker| tracker.record_mood(mood, &recommendations));
            print_recommendations(&recommendations, json)
        }

        cli::Command::Surprise { n, json } => {
            let recommender = open_recommender(&config)?;
            let books = recommender.surprise(&mut rand::rng(), n)?;
            track(&config, |tracker| tracker.record_surprise(&books));

            if json {
                println!("{}", serde_json::to_string_pretty(&books)?);
                return Ok(());
            }

            for (idx, book) in books.iter().enumerate() {
                print_book(idx + 1, book, None);
            }
            Ok(())
        }

        cli::Command::Stats { limit, json } => {
            let path = config.interactions_path();
            let tracker = InteractionTracker::open(&path)
                .with_context(|| format!("couldnt read {}", path.display()))?;
            let stats = tracker.stats(limit);

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            Ok(())
        }

        cli::Command::Info {} => {
            println!("base path: {}", config.base_path().display());
            println!("model: {}", config.model);
            println!("default k: {}", config.default_k);

            let storage = VectorStorage::new(config.index_path());
            if !storage.exists() {
                println!("index: not built");
                return Ok(());
            }

            match storage.load_unchecked() {
                Ok(stored) => {
                    let same_model = stored.model_id
                        == semantic::embeddings::model_id_hash(&config.model);
                    println!(
                        "index: {} vectors, {} dimensions{}",
                        stored.index.len(),
                        stored.index.dimensions(),
                        if same_model {
                            ""
                        } else {
                            " (built with a different model)"
                        }
                    );
                }
                Err(err) => println!("index: unreadable ({err})"),
            }
            Ok(())
        }
    }
}
