pub mod args;
pub mod batch;
pub mod browser;
pub mod context;
pub mod domain;
pub mod error;
pub mod patterns;
pub mod sqlite;
pub mod stats;
pub mod utils;

pub use args::{Args, Browser};
pub use batch::{process_batch, BatchConfig};
pub use browser::analyze_browser_history;
pub use context::RunContext;
pub use domain::{has_valid_tld, normalize_domain};
pub use error::{BatchError, PatternError};
pub use patterns::{init_default_patterns, load_domain_patterns, Rule};
pub use stats::{AnalysisResult, DateRange, DomainStats};
