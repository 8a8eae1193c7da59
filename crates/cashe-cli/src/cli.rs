use std::path::PathBuf;

use cashe_types::ChecksumType;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cashe",
    about = "Access a content-addressed file cache from the command line",
    version
)]
pub struct Cli {
    /// Defaults to `summary`.
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Cache root; overrides the configuration file.
    #[arg(long, global = true)]
    pub path: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Never hardlink on save or load.
    #[arg(long, global = true)]
    pub copy_only: bool,

    /// Listing order; `time` means access time.
    #[arg(long, global = true, default_value = "filename")]
    pub sort_by: SortBy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum SortBy {
    Filename,
    Size,
    Atime,
    Ctime,
    Mtime,
    Nlink,
    Time,
}

impl SortBy {
    pub fn resolve(self) -> Self {
        match self {
            SortBy::Time => SortBy::Atime,
            other => other,
        }
    }

    /// For listings that only make sense in time order; non-time orders
    /// become mtime.
    pub fn time_only(self) -> Self {
        match self.resolve() {
            t @ (SortBy::Atime | SortBy::Ctime | SortBy::Mtime) => t,
            _ => SortBy::Mtime,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Object counts and sizes per checksum type
    Summary(FilterArgs),
    /// One line per cached object
    List(FilterArgs),
    /// Detailed metadata per cached object
    Info(FilterArgs),
    /// Re-digest cached objects, removing corrupt ones
    Check(FilterArgs),
    /// Save files; the digest is computed unless given for a single file
    Save(SaveArgs),
    /// Save a file under a trusted digest without verification
    SaveFast(ObjectFileArgs),
    /// Materialize a cached object at a path
    Load(ObjectFileArgs),
    /// Remove an object from the cache
    Unlink(ObjectArgs),
    /// List paths that do not belong in the cache layout
    LsExtra,
    /// Remove paths that do not belong in the cache layout
    RmExtra,
    /// Print the on-disk path of cached objects
    ListFiles(FilterArgs),
    /// Print the path of the most recently used objects, oldest first
    Recent(RecentArgs),
    /// Print a file's digest
    ChecksumFile(ChecksumFileArgs),
    /// Show the effective configuration
    Config,
}

#[derive(Args, Default)]
pub struct FilterArgs {
    pub checksum_type: Option<ChecksumType>,
    /// Only objects whose digest starts with this
    pub prefix: Option<String>,
}

#[derive(Args)]
pub struct RecentArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: usize,
}

#[derive(Args)]
pub struct SaveArgs {
    pub checksum_type: ChecksumType,
    /// `<file>`, `<digest> <file>`, or `<file> <file>...`
    #[arg(required = true, value_name = "DIGEST|FILE")]
    pub items: Vec<String>,
}

#[derive(Args)]
pub struct ObjectArgs {
    pub checksum_type: ChecksumType,
    pub digest: String,
}

#[derive(Args)]
pub struct ObjectFileArgs {
    pub checksum_type: ChecksumType,
    pub digest: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ChecksumFileArgs {
    pub checksum_type: ChecksumType,
    pub file: PathBuf,
}
