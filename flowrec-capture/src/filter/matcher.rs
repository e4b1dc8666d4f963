//! Host pattern and address range matching

use ipnet::{Ipv4Net, Ipv6Net};
use std::net::IpAddr;
use wildmatch::WildMatch;

/// One lowercased wildcard pattern and its literal label count
#[derive(Debug, Clone)]
struct HostPattern {
    glob: WildMatch,
    specificity: usize,
}

impl HostPattern {
    fn new(pattern: &str) -> Self {
        let pattern = pattern.to_ascii_lowercase();
        Self {
            specificity: pattern_specificity(&pattern),
            glob: WildMatch::new(&pattern),
        }
    }
}

/// Set of host patterns plus IPv4/IPv6 ranges
#[derive(Debug, Clone, Default)]
pub struct HostMatcher {
    patterns: Vec<HostPattern>,
    ipv4_ranges: Vec<Ipv4Net>,
    ipv6_ranges: Vec<Ipv6Net>,
}

impl HostMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patterns are case-insensitive: "Fonts.GStatic.com" matches "fonts.gstatic.com"
    pub fn add_pattern(&mut self, pattern: &str) {
        self.patterns.push(HostPattern::new(pattern));
    }

    pub fn add_ipv4_range(&mut self, range: Ipv4Net) {
        self.ipv4_ranges.push(range);
    }

    pub fn add_ipv6_range(&mut self, range: Ipv6Net) {
        self.ipv6_ranges.push(range);
    }

    pub fn matches_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.ipv4_ranges.iter().any(|net| net.contains(&v4)),
            IpAddr::V6(v6) => self.ipv6_ranges.iter().any(|net| net.contains(&v6)),
        }
    }

    /// Specificity of the most specific pattern matching `host`, if any
    ///
    /// A trailing root dot on the host is ignored.
    pub fn matches_with_specificity(&self, host: &str) -> Option<usize> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.patterns
            .iter()
            .filter(|p| p.glob.matches(&host))
            .map(|p| p.specificity)
            .max()
    }
}

/// Labels of a pattern that are not a bare `*`
///
/// "*.doubleclick.net" = 2, "stats.g.doubleclick.net" = 4, "*" = 0
fn pattern_specificity(pattern: &str) -> usize {
    pattern.split('.').filter(|label| *label != "*").count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_hosts() {
        let mut matcher = HostMatcher::new();
        matcher.add_pattern("*.doubleclick.net");
        matcher.add_pattern("cdn.*.io");

        assert_eq!(matcher.matches_with_specificity("ad.doubleclick.net"), Some(2));
        assert_eq!(matcher.matches_with_specificity("cdn.assets.io"), Some(2));
        assert_eq!(matcher.matches_with_specificity("doubleclick.net"), None);
        assert_eq!(matcher.matches_with_specificity("api.assets.io"), None);
    }

    #[test]
    fn test_case_and_trailing_dot_ignored() {
        let mut matcher = HostMatcher::new();
        matcher.add_pattern("Fonts.GoogleAPIs.com");

        assert_eq!(matcher.matches_with_specificity("fonts.googleapis.com"), Some(3));
        assert_eq!(matcher.matches_with_specificity("FONTS.googleapis.com."), Some(3));
    }

    #[test]
    fn test_most_specific_pattern_reported() {
        let mut matcher = HostMatcher::new();
        matcher.add_pattern("*");
        matcher.add_pattern("*.example.com");
        matcher.add_pattern("*.api.example.com");

        assert_eq!(matcher.matches_with_specificity("v1.api.example.com"), Some(3));
        assert_eq!(matcher.matches_with_specificity("www.example.com"), Some(2));
        assert_eq!(matcher.matches_with_specificity("localhost"), Some(0));
    }

    #[test]
    fn test_address_ranges() {
        let mut matcher = HostMatcher::new();
        matcher.add_ipv4_range("10.0.0.0/8".parse().unwrap());
        matcher.add_ipv6_range("fd00::/8".parse().unwrap());

        assert!(matcher.matches_ip("10.20.30.40".parse().unwrap()));
        assert!(!matcher.matches_ip("192.168.1.1".parse().unwrap()));
        assert!(matcher.matches_ip("fd12::1".parse().unwrap()));
        assert!(!matcher.matches_ip("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_pattern_specificity() {
        assert_eq!(pattern_specificity("stats.g.doubleclick.net"), 4);
        assert_eq!(pattern_specificity("*.doubleclick.net"), 2);
        assert_eq!(pattern_specificity("*"), 0);
        assert_eq!(pattern_specificity("localhost"), 1);
    }
}
