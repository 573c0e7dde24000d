use regex::Regex;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::error::{InvalidPattern, PatternError};

// Include default patterns at compile time
pub const DEFAULT_PATTERNS: &str = include_str!("../default_domain_patterns.txt");

/// File looked up in the working directory when no pattern file is given.
pub const DEFAULT_PATTERN_FILE: &str = "domain_patterns.txt";

const BUILTIN_ORIGIN: &str = "<built-in>";

/// A compiled normalization rule and the line it came from.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    source: String,
    line: usize,
}

impl Rule {
    /// Compiles `source` so that it only ever matches a whole domain.
    pub fn compile(source: &str, line: usize) -> Result<Self, regex::Error> {
        // Validate the line on its own first; wrapping alone could balance
        // stray parentheses.
        Regex::new(source)?;
        // A trailing `# comment` in verbose mode runs to the end of the line,
        // so it needs a newline before the closing group.
        let pattern = Regex::new(&format!("^(?:{source})$"))
            .or_else(|_| Regex::new(&format!("^(?:{source}\n)$")))?;
        Ok(Self {
            pattern,
            source: source.to_string(),
            line,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// The non-empty first capture for `domain`, if this rule applies.
    pub fn canonical<'a>(&self, domain: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(domain)?
            .get(1)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Splits rule file content into `(line_number, pattern)` pairs, skipping
/// blank lines and `#` comments.
fn pattern_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Compiles every line, returning the rules that compiled and the failures.
fn compile_all(content: &str, origin: &str) -> (Vec<Rule>, Vec<InvalidPattern>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    for (line, source) in pattern_lines(content) {
        match Rule::compile(source, line) {
            Ok(rule) => rules.push(rule),
            Err(e) => errors.push(InvalidPattern {
                origin: origin.to_string(),
                line,
                pattern: source.to_string(),
                message: e.to_string(),
            }),
        }
    }

    (rules, errors)
}

pub fn builtin_rules() -> Result<Vec<Rule>, PatternError> {
    let (rules, errors) = compile_all(DEFAULT_PATTERNS, BUILTIN_ORIGIN);
    if rules.is_empty() {
        return Err(PatternError::NoUsablePatterns(errors));
    }
    Ok(rules)
}

/// Loads normalization rules.
///
/// With an explicit `pattern_file_path` the file must exist and every line
/// must compile. Without one, `domain_patterns.txt` in the working directory
/// is read leniently and the built-in list is used when it yields nothing.
pub fn load_domain_patterns(
    pattern_file_path: Option<&Path>,
    ctx: &RunContext,
) -> Result<Vec<Rule>, PatternError> {
    load_domain_patterns_with_default(pattern_file_path, Path::new(DEFAULT_PATTERN_FILE), ctx)
}

pub fn load_domain_patterns_with_default(
    pattern_file_path: Option<&Path>,
    default_file: &Path,
    ctx: &RunContext,
) -> Result<Vec<Rule>, PatternError> {
    let start_time = Instant::now();
    info!(
        parent: ctx.span(),
        action = "start",
        component = "pattern_loading",
        "Starting domain pattern loading"
    );

    let rules = match pattern_file_path {
        Some(path) => load_strict(path, ctx)?,
        None => load_lenient(default_file, ctx)?,
    };

    info!(
        parent: ctx.span(),
        action = "complete",
        component = "pattern_loading",
        pattern_count = rules.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Successfully compiled patterns"
    );
    Ok(rules)
}

fn load_strict(path: &Path, ctx: &RunContext) -> Result<Vec<Rule>, PatternError> {
    info!(parent: ctx.span(), action = "load", component = "pattern_file", file_path = ?path, "Loading patterns from specified file");
    if !path.exists() {
        return Err(PatternError::FileNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| PatternError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let (rules, errors) = compile_all(&content, &path.display().to_string());
    if !errors.is_empty() {
        return Err(PatternError::InvalidPatterns {
            path: path.to_path_buf(),
            errors,
        });
    }

    info!(parent: ctx.span(), action = "loaded", component = "pattern_file", pattern_count = rules.len(), file_path = ?path, "Loaded patterns from file");
    Ok(rules)
}

fn load_lenient(default_file: &Path, ctx: &RunContext) -> Result<Vec<Rule>, PatternError> {
    let mut rules = Vec::new();

    if default_file.exists() {
        info!(parent: ctx.span(), action = "load", component = "default_pattern_file", file_path = ?default_file, "Loading patterns from default file");
        match fs::read_to_string(default_file) {
            Ok(content) => {
                let (compiled, errors) =
                    compile_all(&content, &default_file.display().to_string());
                for e in &errors {
                    warn!(parent: ctx.span(), action = "parse", component = "regex_pattern", line_number = e.line, pattern = %e.pattern, error = %e.message, "Invalid regex pattern, skipping");
                }
                rules = compiled;
            }
            Err(e) => {
                warn!(parent: ctx.span(), action = "read", component = "default_pattern_file", file_path = ?default_file, error = %e, "Could not read default pattern file");
            }
        }
        info!(parent: ctx.span(), action = "loaded", component = "default_pattern_file", pattern_count = rules.len(), file_path = ?default_file, "Loaded patterns from default file");
    }

    if rules.is_empty() {
        warn!(
            parent: ctx.span(),
            action = "fallback",
            component = "embedded_patterns",
            file_path = ?default_file,
            "{}",
            fallback_reason(default_file.exists())
        );
        rules = builtin_rules()?;
    }

    Ok(rules)
}

fn fallback_reason(default_file_exists: bool) -> &'static str {
    if default_file_exists {
        "No usable patterns in default file, using embedded defaults"
    } else {
        "Default pattern file not found, using embedded defaults"
    }
}

pub fn init_default_patterns(target: &Path) -> Result<(), PatternError> {
    if target.exists() {
        return Err(PatternError::AlreadyExists(target.to_path_buf()));
    }

    fs::write(target, DEFAULT_PATTERNS).map_err(|source| PatternError::Write {
        path: target.to_path_buf(),
        source,
    })?;
    println!("Created {} with default patterns", target.display());

    Ok(())
}
