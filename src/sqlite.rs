use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result as SqliteResult};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::args::Browser;
use crate::context::RunContext;
use crate::stats::DateRange;

fn home_dir() -> Result<PathBuf> {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .context("Could not determine home directory")
}

fn env_dir(var: &str) -> Result<PathBuf> {
    env::var(var)
        .map(PathBuf::from)
        .with_context(|| format!("{var} is not set"))
}

/// Location of the history database for Chromium browsers, or of the
/// profiles directory for Firefox-based ones.
pub fn get_browser_history_path(browser: Browser, ctx: &RunContext) -> Result<PathBuf> {
    let system = env::consts::OS;

    let path = match (browser, system) {
        (Browser::Chrome, "windows") => {
            env_dir("LOCALAPPDATA")?.join("Google/Chrome/User Data/Default/History")
        }
        (Browser::Chrome, "macos") => {
            home_dir()?.join("Library/Application Support/Google/Chrome/Default/History")
        }
        (Browser::Chrome, "linux") => home_dir()?.join(".config/google-chrome/Default/History"),

        (Browser::Edge, "windows") => {
            env_dir("LOCALAPPDATA")?.join("Microsoft/Edge/User Data/Default/History")
        }
        (Browser::Edge, "macos") => {
            home_dir()?.join("Library/Application Support/Microsoft Edge/Default/History")
        }
        (Browser::Edge, "linux") => home_dir()?.join(".config/microsoft-edge/Default/History"),

        (Browser::Vivaldi, "windows") => {
            env_dir("LOCALAPPDATA")?.join("Vivaldi/User Data/Default/History")
        }
        (Browser::Vivaldi, "macos") => {
            home_dir()?.join("Library/Application Support/Vivaldi/Default/History")
        }
        (Browser::Vivaldi, "linux") => home_dir()?.join(".config/vivaldi/default/History"),

        (Browser::Firefox, "windows") => env_dir("APPDATA")?.join("Mozilla/Firefox"),
        (Browser::Firefox, "macos") => {
            home_dir()?.join("Library/Application Support/Firefox/Profiles")
        }
        (Browser::Firefox, "linux") => home_dir()?.join(".mozilla/firefox"),

        (Browser::Zen, "windows") => env_dir("APPDATA")?.join("zen"),
        (Browser::Zen, "macos") => home_dir()?.join("Library/Application Support/zen/Profiles"),
        (Browser::Zen, "linux") => home_dir()?.join(".zen"),

        _ => anyhow::bail!(
            "Unsupported browser '{}' or operating system '{}'",
            browser,
            system
        ),
    };

    if system != "windows" {
        warn!(
            parent: ctx.span(),
            action = "platform_warning",
            component = "browser_path",
            platform = system,
            browser = %browser,
            "Browser handling has not been tested on this platform. Paths may be incorrect."
        );
    }

    info!(parent: ctx.span(), action = "resolve", component = "browser_path", browser = %browser, path = ?path, "Browser history path resolved");
    Ok(path)
}

/// Resolves the history file for `browser`, descending into the selected
/// profile for Firefox-based browsers.
pub fn resolve_history_file(browser: Browser, ctx: &RunContext) -> Result<PathBuf> {
    let path = get_browser_history_path(browser, ctx)?;
    if browser.is_firefox_based() {
        find_firefox_profile_history(browser, &path, ctx)
    } else {
        Ok(path)
    }
}

/// Section name → `Path=` value for every profile in `profiles.ini`.
pub fn parse_profiles_ini(content: &str) -> BTreeMap<String, String> {
    let mut profiles = BTreeMap::new();
    let mut current_section: Option<&str> = None;

    for line in content.lines() {
        let line = line.trim();
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current_section = Some(section);
        } else if let (Some(section), Some(path)) = (current_section, line.strip_prefix("Path=")) {
            profiles.insert(section.to_string(), path.trim().to_string());
        }
    }

    profiles
}

/// Picks a profile: a `Profile0`/dev-edition one first, then one mentioning
/// "default", then the first listed.
pub fn select_profile(profiles: &BTreeMap<String, String>) -> Option<(&str, &str)> {
    profiles
        .iter()
        .find(|(name, path)| name.contains("Profile0") || path.contains("dev-edition"))
        .or_else(|| {
            profiles.iter().find(|(name, path)| {
                name.to_lowercase().contains("default") || path.to_lowercase().contains("default")
            })
        })
        .or_else(|| profiles.iter().next())
        .map(|(name, path)| (name.as_str(), path.as_str()))
}

pub fn find_firefox_profile_history(
    browser: Browser,
    profiles_dir: &Path,
    ctx: &RunContext,
) -> Result<PathBuf> {
    if !profiles_dir.exists() {
        anyhow::bail!(
            "{} profiles directory not found at {:?}",
            browser,
            profiles_dir
        );
    }

    let profiles_ini = profiles_dir.join("profiles.ini");
    if !profiles_ini.exists() {
        anyhow::bail!("{} profiles.ini not found at {:?}", browser, profiles_ini);
    }

    let content = fs::read_to_string(&profiles_ini)
        .with_context(|| format!("Failed to read {profiles_ini:?}"))?;
    let profiles = parse_profiles_ini(&content);
    info!(parent: ctx.span(), action = "parse", component = "profile_parsing", profiles = ?profiles, "Parsed profiles.ini");

    let (profile_name, profile_path) = select_profile(&profiles).ok_or_else(|| {
        anyhow::anyhow!("Could not find default {} profile in profiles.ini", browser)
    })?;
    info!(
        parent: ctx.span(),
        action = "select",
        component = "profile_parsing",
        selected_profile = profile_name,
        path = profile_path,
        "Selected profile"
    );

    // Profile paths are relative to the profiles directory
    let history_path = profiles_dir.join(profile_path).join("places.sqlite");
    if !history_path.exists() {
        anyhow::bail!(
            "{} history database not found at {:?}",
            browser,
            history_path
        );
    }

    Ok(history_path)
}

/// A private copy of a history database, deleted on drop.
///
/// Browsers keep their live database locked, so analysis always runs on a
/// copy.
#[derive(Debug)]
pub struct HistoryCopy {
    path: PathBuf,
    ctx: RunContext,
}

impl HistoryCopy {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HistoryCopy {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(parent: self.ctx.span(), action = "cleanup", component = "temp_file", path = ?self.path, error = %e, "Failed to remove temporary file");
        }
    }
}

pub fn copy_history_database(
    history_path: &Path,
    temp_path: Option<&Path>,
    ctx: &RunContext,
) -> Result<HistoryCopy> {
    let start_time = Instant::now();
    info!(parent: ctx.span(), action = "start", component = "database_copy", "Copying browser history database");

    let temp_path = match temp_path {
        Some(p) => p.to_path_buf(),
        None => home_dir()?.join("browser_history_copy.db"),
    };

    info!(parent: ctx.span(), action = "copy", component = "database_copy", source = ?history_path, destination = ?temp_path, "Database copy paths");

    if !history_path.exists() {
        anyhow::bail!("History file not found at {:?}", history_path);
    }

    // Copying a file onto itself truncates it, and the guard would then delete it.
    if temp_path.exists() && fs::canonicalize(history_path)? == fs::canonicalize(&temp_path)? {
        anyhow::bail!(
            "Temporary path {:?} is the history database itself",
            temp_path
        );
    }

    fs::copy(history_path, &temp_path)
        .with_context(|| format!("Failed to copy {history_path:?} to {temp_path:?}"))?;

    info!(parent: ctx.span(), action = "complete", component = "database_copy", duration_ms = start_time.elapsed().as_millis(), "Database copy completed");
    Ok(HistoryCopy {
        path: temp_path,
        ctx: ctx.clone(),
    })
}

/// Microseconds between 1601-01-01 and the Unix epoch.
const CHROMIUM_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Chromium stores microseconds since 1601-01-01, Firefox since the Unix epoch.
fn visit_time(browser: Browser, micros: i64) -> Result<DateTime<Utc>> {
    let unix_micros = if browser.is_firefox_based() {
        micros
    } else {
        micros - CHROMIUM_EPOCH_OFFSET_MICROS
    };
    DateTime::from_timestamp_micros(unix_micros)
        .with_context(|| format!("Visit timestamp {micros} is out of range"))
}

pub fn get_date_range(conn: &Connection, browser: Browser, ctx: &RunContext) -> Result<DateRange> {
    let start_time = Instant::now();
    info!(parent: ctx.span(), action = "start", component = "date_range_query", "Querying visit date range");

    let sql = if browser.is_firefox_based() {
        "SELECT MIN(visit_date), MAX(visit_date) FROM moz_historyvisits"
    } else {
        "SELECT MIN(visit_time), MAX(visit_time) FROM visits"
    };

    let (earliest, latest): (Option<i64>, Option<i64>) = conn
        .query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
        .context("Failed to query visit dates")?;

    let (Some(earliest), Some(latest)) = (earliest, latest) else {
        warn!(parent: ctx.span(), action = "complete", component = "date_range_query", duration_ms = start_time.elapsed().as_millis(), "No visit data found");
        return Ok(DateRange::default());
    };

    let range = DateRange::new(visit_time(browser, earliest)?, visit_time(browser, latest)?);

    info!(
        parent: ctx.span(),
        action = "complete",
        component = "date_range_query",
        earliest = ?range.earliest,
        latest = ?range.latest,
        days_between = range.days(),
        duration_ms = start_time.elapsed().as_millis(),
        "Date range query completed"
    );
    Ok(range)
}

fn query_urls(conn: &Connection, sql: &str) -> SqliteResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let urls = stmt
        .query_map([], |row| row.get(0))?
        .collect::<SqliteResult<Vec<String>>>()?;
    Ok(urls)
}

pub fn fetch_urls(conn: &Connection, browser: Browser, ctx: &RunContext) -> Result<Vec<String>> {
    let start_time = Instant::now();

    let (sql, table) = if browser.is_firefox_based() {
        ("SELECT url FROM moz_places WHERE url IS NOT NULL", "moz_places")
    } else {
        ("SELECT url FROM urls", "urls")
    };

    let urls = query_urls(conn, sql).with_context(|| {
            format!(
                "Error querying the database. The '{table}' table might not exist or the database is corrupt"
            )
        })?;

    info!(
        parent: ctx.span(),
        action = "query",
        component = "domain_extraction",
        url_count = urls.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Found URLs to process"
    );
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chromium_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("History");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE urls (id INTEGER PRIMARY KEY, url TEXT NOT NULL);
             CREATE TABLE visits (id INTEGER PRIMARY KEY, visit_time INTEGER);
             INSERT INTO urls (url) VALUES ('https://www.rust-lang.org/'), ('https://docs.rs/regex');
             INSERT INTO visits (visit_time) VALUES (13300000000000000), (13300864000000000);",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_fetch_urls_chromium() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(chromium_db(&dir)).unwrap();

        let urls = fetch_urls(&conn, Browser::Chrome, &RunContext::disabled()).unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains(&"https://docs.rs/regex".to_string()));
    }

    #[test]
    fn test_fetch_urls_missing_table() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(chromium_db(&dir)).unwrap();

        let err = fetch_urls(&conn, Browser::Firefox, &RunContext::disabled()).unwrap_err();
        assert!(err.to_string().contains("moz_places"));
    }

    #[test]
    fn test_date_range_chromium() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(chromium_db(&dir)).unwrap();

        let range = get_date_range(&conn, Browser::Vivaldi, &RunContext::disabled()).unwrap();
        assert_eq!(range.days(), 10);
        // 13_300_000_000_000_000 µs after 1601-01-01
        assert_eq!(
            range.earliest.unwrap().date_naive().to_string(),
            "2022-06-18"
        );
    }

    #[test]
    fn test_date_range_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("places.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE moz_historyvisits (id INTEGER PRIMARY KEY, visit_date INTEGER);")
            .unwrap();

        let range = get_date_range(&conn, Browser::Firefox, &RunContext::disabled()).unwrap();
        assert_eq!(range, DateRange::default());
    }

    #[test]
    fn test_copy_is_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let source = chromium_db(&dir);
        let target = dir.path().join("copy.db");

        let copy = copy_history_database(&source, Some(&target), &RunContext::disabled()).unwrap();
        assert!(copy.path().exists());
        drop(copy);
        assert!(!target.exists());
    }

    #[test]
    fn test_copy_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = copy_history_database(
            &dir.path().join("nope"),
            Some(&dir.path().join("copy.db")),
            &RunContext::disabled(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_copy_onto_source_is_refused() {
        let dir = TempDir::new().unwrap();
        let source = chromium_db(&dir);
        let original = fs::read(&source).unwrap();

        // Same file reached through a different spelling of the path
        let alias = dir.path().join(".").join("History");
        let err = copy_history_database(&source, Some(&alias), &RunContext::disabled())
            .unwrap_err();
        assert!(err.to_string().contains("history database itself"), "{err}");

        assert!(source.exists());
        assert_eq!(fs::read(&source).unwrap(), original);
    }

    #[test]
    fn test_profile_selection() {
        let ini = "[General]\nStartWithLastProfile=1\n\n[Profile1]\nName=default-release\nPath=abcd.default-release\n\n[Profile2]\nName=work\nPath=wxyz.work\n";
        let profiles = parse_profiles_ini(ini);
        assert_eq!(profiles.len(), 2);
        assert_eq!(
            select_profile(&profiles),
            Some(("Profile1", "abcd.default-release"))
        );

        let ini = "[Profile1]\nPath=a.default\n[Profile0]\nPath=b.dev-edition-default\n";
        let profiles = parse_profiles_ini(ini);
        assert_eq!(
            select_profile(&profiles),
            Some(("Profile0", "b.dev-edition-default"))
        );

        assert_eq!(select_profile(&BTreeMap::new()), None);
    }

    #[test]
    fn test_find_firefox_profile_history() {
        let dir = TempDir::new().unwrap();
        let profile_dir = dir.path().join("abcd.default-release");
        fs::create_dir_all(&profile_dir).unwrap();
        fs::write(profile_dir.join("places.sqlite"), b"").unwrap();
        fs::write(
            dir.path().join("profiles.ini"),
            "[Profile1]\nName=default-release\nPath=abcd.default-release\n",
        )
        .unwrap();

        let path =
            find_firefox_profile_history(Browser::Firefox, dir.path(), &RunContext::disabled())
                .unwrap();
        assert_eq!(path, profile_dir.join("places.sqlite"));
    }
}
