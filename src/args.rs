use clap::Parser;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Browser {
    Chrome,
    Edge,
    Firefox,
    Vivaldi,
    Zen,
}

impl Browser {
    pub const ALL: [Browser; 5] = [
        Browser::Chrome,
        Browser::Edge,
        Browser::Firefox,
        Browser::Vivaldi,
        Browser::Zen,
    ];

    /// Firefox and its forks keep history in `places.sqlite` inside a profile.
    pub fn is_firefox_based(&self) -> bool {
        matches!(self, Browser::Firefox | Browser::Zen)
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Browser::Chrome => write!(f, "Chrome"),
            Browser::Edge => write!(f, "Edge"),
            Browser::Firefox => write!(f, "Firefox"),
            Browser::Vivaldi => write!(f, "Vivaldi"),
            Browser::Zen => write!(f, "Zen"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "domain-tally",
    about = "Analyze browser history to find unique domains and their visit counts",
    version,
    long_about = None
)]
pub struct Args {
    /// Browser to analyze
    #[arg(short, long, value_enum, default_value_t = Browser::Vivaldi)]
    pub browser: Browser,

    /// Analyze all supported browsers
    #[arg(long)]
    pub all_browsers: bool,

    /// Number of top domains to display (default: 10 when --bottom is not given)
    #[arg(short, long)]
    pub top: Option<usize>,

    /// Number of bottom domains to display
    #[arg(long)]
    pub bottom: Option<usize>,

    /// Path to custom domain pattern file
    #[arg(short, long)]
    pub patterns: Option<PathBuf>,

    /// Disable pattern-based domain normalization
    #[arg(long, conflicts_with = "patterns")]
    pub no_patterns: bool,

    /// Custom temporary file path for database copy
    #[arg(long)]
    pub temp_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of worker threads (default: auto-detect, max 8)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Redact domain names for privacy
    #[arg(long)]
    pub redact: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Initialize domain_patterns.txt with default patterns
    #[arg(long)]
    pub init: bool,
}
