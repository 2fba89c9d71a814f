//! Result URL policy.

use peerseek_core::config::FilterConfig;
use url::Url;

pub trait ResultFilter: Send + Sync {
    fn is_accepted(&self, url: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ResultFilter for AllowAll {
    fn is_accepted(&self, _url: &str) -> bool {
        true
    }
}

/// Host-based filter. A domain entry also covers its subdomains.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    blacklist: Vec<String>,
    accepted: Vec<String>,
}

impl DomainFilter {
    pub fn new<I, J>(blacklist: I, accepted: J) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        J: IntoIterator,
        J::Item: AsRef<str>,
    {
        let norm = |d: &str| d.trim().trim_start_matches('.').to_ascii_lowercase();
        Self {
            blacklist: blacklist.into_iter().map(|d| norm(d.as_ref())).filter(|d| !d.is_empty()).collect(),
            accepted: accepted.into_iter().map(|d| norm(d.as_ref())).filter(|d| !d.is_empty()).collect(),
        }
    }

    pub fn from_config(cfg: &FilterConfig) -> Self {
        Self::new(&cfg.blacklist, &cfg.accepted_domains)
    }
}

fn covers(domain: &str, host: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

impl ResultFilter for DomainFilter {
    fn is_accepted(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https" | "ftp" | "smb" | "file") {
            return false;
        }
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if self.blacklist.iter().any(|d| covers(d, &host)) {
            return false;
        }
        self.accepted.is_empty() || self.accepted.iter().any(|d| covers(d, &host))
    }
}
