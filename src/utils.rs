use time::macros::format_description;
use time::UtcOffset;
use tracing_subscriber::fmt::time::{OffsetTime, Uptime};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Call once, from `main`.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects `info` and the
/// default is `error`. Verbose runs are stamped with time since start.
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "error" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if verbose {
        builder.with_timer(Uptime::default()).init();
    } else {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        let format = format_description!("[hour]:[minute]:[second].[subsecond digits:3]");
        builder.with_timer(OffsetTime::new(offset, format)).init();
    }
}

pub fn format_number(num: u64) -> String {
    let digits = num.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn redact_domain(domain: &str) -> String {
    let parts: Vec<&str> = domain.split('.').collect();
    if parts.len() <= 1 {
        return domain.to_string();
    }

    let tld = parts[parts.len() - 1];
    if parts[parts.len() - 2].len() <= 3 {
        return format!("???.{tld}");
    }

    let mut redacted: Vec<String> = parts[..parts.len() - 1]
        .iter()
        .map(|part| "*".repeat(part.len()))
        .collect();
    redacted.push(tld.to_string());
    redacted.join(".")
}

pub fn validate_args(args: &crate::args::Args) -> anyhow::Result<()> {
    if let Some(top) = args.top {
        if top == 0 {
            anyhow::bail!("--top must be greater than 0");
        }
    }

    if let Some(bottom) = args.bottom {
        if bottom == 0 {
            anyhow::bail!("--bottom must be greater than 0");
        }
    }

    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("--workers must be greater than 0");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use clap::Parser;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(100000), "100,000");
    }

    #[test]
    fn test_redact_domain() {
        assert_eq!(redact_domain("github.io"), "******.io");
        assert_eq!(redact_domain("www.example.com"), "***.*******.com");
        assert_eq!(redact_domain("bbc.co.uk"), "???.uk");
        assert_eq!(redact_domain("abc.com"), "???.com");
        assert_eq!(redact_domain("localhost"), "localhost");
    }

    #[test]
    fn test_validate_args_rejects_zero() {
        for flag in ["--top", "--bottom", "--workers"] {
            let args = Args::try_parse_from(["domain-tally", flag, "0"]).unwrap();
            let err = validate_args(&args).unwrap_err();
            assert!(err.to_string().contains(flag));
        }

        let args = Args::try_parse_from(["domain-tally", "--top", "5", "-w", "2"]).unwrap();
        assert!(validate_args(&args).is_ok());
    }
}
