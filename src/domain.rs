use url::Url;

use crate::patterns::Rule;

/// Pulls the host out of a raw history URL.
///
/// `Ok(None)` covers URLs that parse but carry no host (`mailto:`, `file:///`)
/// as well as an empty host.
pub fn extract_host(raw: &str) -> Result<Option<String>, url::ParseError> {
    let url = Url::parse(raw)?;
    Ok(url
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string))
}

pub fn has_valid_tld(domain: &str) -> bool {
    if domain.is_empty() || domain.len() < 3 || !domain.contains('.') {
        return false;
    }

    if let Some(last_dot) = domain.rfind('.') {
        if last_dot == domain.len() - 1 {
            return false;
        }
        let tld = &domain[last_dot + 1..];
        tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_lowercase())
    } else {
        false
    }
}

/// Keeps at most the last three labels of `domain`.
fn truncate_labels(domain: &str) -> &str {
    if domain.matches('.').count() <= 2 {
        return domain;
    }

    // Byte offset just past the third dot from the right.
    let mut cut = domain.len();
    for _ in 0..3 {
        cut = match domain[..cut].rfind('.') {
            Some(idx) => idx,
            None => return domain,
        };
    }
    &domain[cut + 1..]
}

pub fn normalize_domain(domain: &str, rules: &[Rule]) -> String {
    if domain.is_empty() {
        return domain.to_string();
    }

    let truncated = truncate_labels(domain);

    rules
        .iter()
        .find_map(|rule| rule.canonical(truncated))
        .unwrap_or(truncated)
        .to_string()
}
