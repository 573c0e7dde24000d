use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::error;

use domain_tally::patterns::DEFAULT_PATTERN_FILE;
use domain_tally::{browser, init_default_patterns, utils, Args, RunContext};

fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(args.verbose);

    utils::validate_args(&args)?;

    if args.init {
        init_default_patterns(Path::new(DEFAULT_PATTERN_FILE))?;
        return Ok(());
    }

    let ctx = RunContext::new(if args.all_browsers {
        "all-browsers"
    } else {
        "single-browser"
    });

    match browser::analyze_browser_history(&args, &ctx) {
        Ok(result) => browser::print_analysis_results(&result, &args),
        Err(e) => {
            error!(parent: ctx.span(), "Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
