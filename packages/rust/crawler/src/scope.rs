//! Origin filter deciding which discovered links are traversed.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::warn;
use url::Url;

use docmodules_shared::CrawlConfig;

/// Where a discovered link falls relative to the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScope {
    /// Same site (or an explicitly allowed domain): may be enqueued.
    Internal,
    /// Another site: recorded, never fetched.
    External,
    /// Not an HTTP page we will ever fetch (scheme, pattern, or private host).
    Ignored,
}

/// Determines which URLs are "in scope" for a crawl.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    /// Hosts of the seed URLs.
    seed_hosts: HashSet<String>,
    /// Extra domains; subdomains of these are allowed too.
    allowed_domains: Vec<String>,
    /// Include patterns (if non-empty, path must match at least one).
    include_patterns: Vec<regex::Regex>,
    /// Exclude patterns (if path matches any, it's ignored).
    exclude_patterns: Vec<regex::Regex>,
    allow_private_hosts: bool,
}

impl CrawlScope {
    pub fn new(seeds: &[Url], config: &CrawlConfig) -> Self {
        let seed_hosts = seeds
            .iter()
            .filter_map(|u| u.host_str())
            .map(str::to_ascii_lowercase)
            .collect();

        let allowed_domains = config
            .allowed_domains
            .iter()
            .map(|d| d.trim().trim_start_matches("*.").to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|p| {
                    let re = glob_to_regex(p);
                    if re.is_none() {
                        warn!(pattern = %p, "ignoring invalid URL pattern");
                    }
                    re
                })
                .collect()
        };

        Self {
            seed_hosts,
            allowed_domains,
            include_patterns: compile(&config.include_patterns),
            exclude_patterns: compile(&config.exclude_patterns),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    pub fn classify(&self, url: &Url) -> LinkScope {
        if url.scheme() != "http" && url.scheme() != "https" {
            return LinkScope::Ignored;
        }

        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        if !self.host_allowed(&host) {
            return LinkScope::External;
        }

        if !self.allow_private_hosts && is_private_target(url) {
            return LinkScope::Ignored;
        }

        let path = url.path();
        if self.exclude_patterns.iter().any(|p| p.is_match(path)) {
            return LinkScope::Ignored;
        }
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(path))
        {
            return LinkScope::Ignored;
        }

        LinkScope::Internal
    }

    /// Whether a seed itself may be fetched (private-host protection only).
    pub fn seed_allowed(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && (self.allow_private_hosts || !is_private_target(url))
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.seed_hosts.contains(host)
            || self
                .allowed_domains
                .iter()
                .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// Private network protection
// ---------------------------------------------------------------------------

/// Check if a URL targets localhost or a private/reserved network.
fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodules_shared::AppConfig;

    fn config() -> CrawlConfig {
        CrawlConfig::from(&AppConfig::default())
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn same_host_is_internal_other_host_external() {
        let scope = CrawlScope::new(&[url("https://example.com/docs")], &config());
        assert_eq!(scope.classify(&url("https://example.com/docs/intro")), LinkScope::Internal);
        assert_eq!(scope.classify(&url("https://EXAMPLE.com/blog")), LinkScope::Internal);
        assert_eq!(scope.classify(&url("https://other.com/")), LinkScope::External);
        assert_eq!(scope.classify(&url("https://sub.example.com/")), LinkScope::External);
    }

    #[test]
    fn allowed_domains_include_subdomains() {
        let mut cfg = config();
        cfg.allowed_domains = vec!["help.example.org".into()];
        let scope = CrawlScope::new(&[url("https://example.com/")], &cfg);
        assert_eq!(scope.classify(&url("https://help.example.org/a")), LinkScope::Internal);
        assert_eq!(scope.classify(&url("https://eu.help.example.org/a")), LinkScope::Internal);
        assert_eq!(scope.classify(&url("https://example.org/a")), LinkScope::External);
    }

    #[test]
    fn non_http_schemes_are_ignored() {
        let scope = CrawlScope::new(&[url("https://example.com/")], &config());
        assert_eq!(scope.classify(&url("ftp://example.com/file")), LinkScope::Ignored);
        assert_eq!(scope.classify(&url("file:///etc/passwd")), LinkScope::Ignored);
    }

    #[test]
    fn exclude_and_include_patterns() {
        let mut cfg = config();
        cfg.exclude_patterns = vec!["/blog/**".into()];
        let scope = CrawlScope::new(&[url("https://example.com/")], &cfg);
        assert_eq!(scope.classify(&url("https://example.com/blog/post-1")), LinkScope::Ignored);
        assert_eq!(scope.classify(&url("https://example.com/guide/intro")), LinkScope::Internal);

        let mut cfg = config();
        cfg.include_patterns = vec!["/docs/**".into()];
        let scope = CrawlScope::new(&[url("https://example.com/")], &cfg);
        assert_eq!(scope.classify(&url("https://example.com/docs/a/b")), LinkScope::Internal);
        assert_eq!(scope.classify(&url("https://example.com/pricing")), LinkScope::Ignored);
    }

    #[test]
    fn private_hosts_blocked_unless_allowed() {
        let scope = CrawlScope::new(&[url("http://127.0.0.1:8080/")], &config());
        assert_eq!(scope.classify(&url("http://127.0.0.1:8080/a")), LinkScope::Ignored);
        assert!(!scope.seed_allowed(&url("http://127.0.0.1:8080/")));
        assert!(!scope.seed_allowed(&url("http://localhost:3000/")));

        let mut cfg = config();
        cfg.allow_private_hosts = true;
        let scope = CrawlScope::new(&[url("http://127.0.0.1:8080/")], &cfg);
        assert_eq!(scope.classify(&url("http://127.0.0.1:8080/a")), LinkScope::Internal);
        assert!(scope.seed_allowed(&url("http://127.0.0.1:8080/")));
    }

    #[test]
    fn private_ranges() {
        assert!(is_private_target(&url("http://192.168.1.1/admin")));
        assert!(is_private_target(&url("http://10.0.0.1/")));
        assert!(is_private_target(&url("http://100.64.0.1/")));
        assert!(!is_private_target(&url("https://docs.example.com/page")));
    }
}
