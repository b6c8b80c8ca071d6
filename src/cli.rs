use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::index::{DedupKey, ResightPolicy};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Embed images from a directory into the vector store
    Index {
        /// Directory to scan. Defaults to `image_dir` from the config
        #[clap(short, long)]
        dir: Option<PathBuf>,

        /// What to do with images that are already indexed
        #[clap(long, value_enum)]
        resight: Option<ResightPolicy>,
    },

    /// Find images matching a text description
    Search {
        text: String,

        /// Number of results
        #[clap(short = 'k', long, default_value = "24")]
        top_k: usize,

        /// Skip this many of the best matches
        #[clap(short, long, default_value = "0")]
        offset: usize,
    },

    /// Print one page of stored entries
    List {
        #[clap(short, long, default_value = "0")]
        offset: usize,
    },

    /// Remove duplicate entries from the store
    Dedup {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,

        /// How entries are grouped
        #[clap(long, value_enum)]
        key: Option<DedupKey>,
    },

    /// Serve the HTTP API
    Serve,
}
