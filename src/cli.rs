use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shelfmatch::semantic::Mood;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean a raw books CSV: drop rows without a description,
    /// fill missing authors/categories and remove duplicate titles.
    Prepare {
        /// Raw dataset (needs title, authors, description, categories columns)
        input: PathBuf,

        /// Where to write the cleaned dataset
        output: PathBuf,
    },

    /// Encode a cleaned dataset and write the index and metadata files.
    Build {
        /// Cleaned dataset, as written by `prepare`
        input: PathBuf,

        /// Hide the progress bar
        #[clap(long, default_value = "false")]
        no_progress: bool,
    },

    /// Recommend books similar to a free-text description
    Recommend {
        /// What you'd like to read about
        query: String,

        /// Number of recommendations (defaults to config)
        #[clap(short, long)]
        k: Option<usize>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Recommend books for a mood
    Mood {
        #[clap(value_enum)]
        mood: Mood,

        /// Number of recommendations (defaults to config)
        #[clap(short, long)]
        k: Option<usize>,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Pick random books
    Surprise {
        #[clap(short, long, default_value = "5")]
        n: usize,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Summarise recorded searches, moods and surprise picks
    Stats {
        /// Entries per list (popular books, categories, recent activity)
        #[clap(short, long, default_value = "10")]
        limit: usize,

        /// Print results as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Show the configuration and the state of the index
    Info {},
}
