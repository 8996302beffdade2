use clap::{Args, Parser, Subcommand};
use sift_duper_core::calculators::histogram::HistogramMethod;
use sift_duper_core::FileTypeFilter;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sift-duper")]
#[command(about = "Find matching files across directory trees", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile a directory (or every configured root) into the store
    Sync {
        /// Directory to sync; defaults to the configured roots
        #[arg(long)]
        path: Option<PathBuf>,
        /// Only look at files directly inside the directory
        #[arg(long)]
        no_recursive: bool,
    },
    /// Group stored files by the selected criteria
    Find(FindArgs),
    /// List registered sources
    Sources,
    /// Remove every source and all stored file data
    ClearSources,
    /// Forget the stored record of a file without touching it on disk
    Forget {
        dir: PathBuf,
        name: String,
    },
    /// Show a stored file and its attributes
    Show {
        id: i64,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct FindArgs {
    /// Source ids to search; defaults to every registered source
    #[arg(long = "source")]
    pub sources: Vec<i64>,
    /// Match on identical file names
    #[arg(long)]
    pub name: bool,
    /// Match on identical modification times
    #[arg(long)]
    pub date: bool,
    /// Match on identical sizes
    #[arg(long)]
    pub size: bool,
    /// Match on identical content hashes
    #[arg(long)]
    pub hash: bool,
    /// Match on similar colour histograms using the given method
    #[arg(long, value_name = "METHOD")]
    pub histogram: Option<HistogramMethod>,
    /// Match on similar image embeddings
    #[arg(long)]
    pub embedding: bool,
    /// Threshold for the similarity criteria
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Restrict the search to a file category (all, image, video, audio, document)
    #[arg(long = "file-type")]
    pub file_type: Option<FileTypeFilter>,
}
