use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Unique domains, per-domain visit counts and the number of rejected
/// entries.
///
/// Produced locally for every batch and folded into a single value with
/// [`DomainStats::merge`]. Merging is associative and commutative, so the
/// final value does not depend on batch size or completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    pub unique_domains: HashSet<String>,
    pub domain_counts: HashMap<String, u64>,
    pub domains_removed: u64,
}

impl DomainStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, domain: String) {
        *self.domain_counts.entry(domain.clone()).or_insert(0) += 1;
        self.unique_domains.insert(domain);
    }

    pub fn reject(&mut self) {
        self.domains_removed += 1;
    }

    pub fn merge(&mut self, other: DomainStats) {
        self.unique_domains.extend(other.unique_domains);
        for (domain, count) in other.domain_counts {
            *self.domain_counts.entry(domain).or_insert(0) += count;
        }
        self.domains_removed += other.domains_removed;
    }

    pub fn merge_all<I>(partials: I) -> Self
    where
        I: IntoIterator<Item = DomainStats>,
    {
        partials.into_iter().fold(Self::new(), |mut acc, partial| {
            acc.merge(partial);
            acc
        })
    }

    pub fn unique_count(&self) -> usize {
        self.unique_domains.len()
    }

    /// Sum of every per-domain count.
    pub fn total_visits(&self) -> u64 {
        self.domain_counts.values().sum()
    }

    /// Most visited domains first; equal counts ordered by domain name.
    pub fn top_n(&self, n: usize) -> Vec<(&str, u64)> {
        self.ranked(n, |a, b| b.cmp(a))
    }

    /// Least visited domains first; equal counts ordered by domain name.
    pub fn bottom_n(&self, n: usize) -> Vec<(&str, u64)> {
        self.ranked(n, |a, b| a.cmp(b))
    }

    fn ranked<F>(&self, n: usize, by_count: F) -> Vec<(&str, u64)>
    where
        F: Fn(&u64, &u64) -> Ordering,
    {
        let mut sorted: Vec<(&str, u64)> = self
            .domain_counts
            .iter()
            .map(|(domain, count)| (domain.as_str(), *count))
            .collect();
        sorted.sort_unstable_by(|a, b| by_count(&a.1, &b.1).then_with(|| a.0.cmp(b.0)));
        sorted.truncate(n);
        sorted
    }
}

/// Earliest and latest recorded visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(earliest: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        Self {
            earliest: Some(earliest),
            latest: Some(latest),
        }
    }

    pub fn days(&self) -> i64 {
        match (self.earliest, self.latest) {
            (Some(earliest), Some(latest)) => (latest - earliest).num_days(),
            _ => 0,
        }
    }

    /// Widens this range to also cover `other`.
    pub fn widen(&mut self, other: DateRange) {
        self.earliest = match (self.earliest, other.earliest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.latest = match (self.latest, other.latest) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub source: String,
    pub date_range: DateRange,
    pub stats: DomainStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(entries: &[(&str, u64)], removed: u64) -> DomainStats {
        let mut stats = DomainStats::new();
        for (domain, count) in entries {
            for _ in 0..*count {
                stats.record(domain.to_string());
            }
        }
        stats.domains_removed = removed;
        stats
    }

    #[test]
    fn test_merge_sums_counts_and_removed() {
        let mut a = stats(&[("example.com", 2), ("rust-lang.org", 1)], 3);
        let b = stats(&[("example.com", 5), ("docs.rs", 1)], 4);

        a.merge(b);
        assert_eq!(a.unique_count(), 3);
        assert_eq!(a.domain_counts["example.com"], 7);
        assert_eq!(a.domain_counts["docs.rs"], 1);
        assert_eq!(a.domains_removed, 7);
        assert_eq!(a.total_visits(), 9);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let parts = vec![
            stats(&[("a.com", 1), ("b.com", 2)], 1),
            stats(&[("b.com", 3)], 0),
            stats(&[("c.com", 4), ("a.com", 1)], 2),
        ];

        let forward = DomainStats::merge_all(parts.clone());
        let backward = DomainStats::merge_all(parts.iter().rev().cloned());

        // (p0 + p1) + p2 == p0 + (p1 + p2)
        let mut left = parts[0].clone();
        left.merge(parts[1].clone());
        left.merge(parts[2].clone());
        let mut right_tail = parts[1].clone();
        right_tail.merge(parts[2].clone());
        let mut right = parts[0].clone();
        right.merge(right_tail);

        assert_eq!(forward, backward);
        assert_eq!(left, right);
        assert_eq!(forward, left);
    }

    #[test]
    fn test_merge_all_of_nothing_is_empty() {
        assert_eq!(DomainStats::merge_all(Vec::new()), DomainStats::new());
    }

    #[test]
    fn test_top_and_bottom_break_ties_by_name() {
        let s = stats(
            &[("zeta.com", 3), ("alpha.com", 3), ("mid.com", 5), ("low.com", 1)],
            0,
        );

        assert_eq!(
            s.top_n(3),
            vec![("mid.com", 5), ("alpha.com", 3), ("zeta.com", 3)]
        );
        assert_eq!(
            s.bottom_n(3),
            vec![("low.com", 1), ("alpha.com", 3), ("zeta.com", 3)]
        );
        assert_eq!(s.top_n(10).len(), 4);
        assert!(s.top_n(0).is_empty());
    }

    #[test]
    fn test_date_range_widen() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let jun = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut range = DateRange::default();
        assert_eq!(range.days(), 0);

        range.widen(DateRange::new(mar, jun));
        range.widen(DateRange::new(jan, mar));
        range.widen(DateRange::default());
        assert_eq!(range, DateRange::new(jan, jun));
        assert_eq!(range.days(), 152);
    }
}
