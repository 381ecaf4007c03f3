//! Utility functions for domain and proxy list processing.
//!
//! This module contains helper functions for domain name validation,
//! normalization and for turning list files into pipeline inputs.

use crate::error::ProxyWhoisError;
use crate::proxy::{ProxyEndpoint, ProxyType};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::warn;

lazy_static::lazy_static! {
    static ref DOMAIN_RE: Regex = Regex::new(
        r"^(?i)(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+(?:[a-z]{2,63}|xn--[a-z0-9-]{1,59})$"
    )
    .expect("domain regex is valid");
}

/// Normalize a domain the way records are keyed: trimmed and upper-cased.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_uppercase()
}

/// Validate a domain name format.
///
/// Checks label syntax and length. Whether the TLD has a WHOIS server is
/// decided later, during lookup.
pub fn validate_domain(domain: &str) -> Result<(), ProxyWhoisError> {
    let domain = domain.trim().trim_end_matches('.');

    if domain.is_empty() {
        return Err(ProxyWhoisError::invalid_domain(
            domain,
            "Domain name cannot be empty",
        ));
    }

    if domain.len() > 253 {
        return Err(ProxyWhoisError::invalid_domain(
            domain,
            "Domain name exceeds 253 characters",
        ));
    }

    if !DOMAIN_RE.is_match(domain) {
        return Err(ProxyWhoisError::invalid_domain(
            domain,
            "Domain name has invalid syntax",
        ));
    }

    Ok(())
}

/// Extract the last label of a domain, lower-cased.
pub fn extract_tld(domain: &str) -> Result<String, ProxyWhoisError> {
    let domain = domain.trim().trim_end_matches('.');
    match domain.rsplit_once('.') {
        Some((_, tld)) if !tld.is_empty() => Ok(tld.to_lowercase()),
        _ => Err(ProxyWhoisError::invalid_domain(
            domain,
            "Domain must contain at least one dot",
        )),
    }
}

/// Parse a domain list: one name per line, `#` comments and blank lines
/// ignored, duplicates (after normalization) dropped, order kept.
pub fn parse_domain_list(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(normalize_domain(line)))
        .map(str::to_string)
        .collect()
}

/// Parse a proxy list. Entries that fail to parse are logged and skipped.
pub fn parse_proxy_list(content: &str, default_type: ProxyType) -> Vec<ProxyEndpoint> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let entry = line.split('#').next().unwrap_or("").trim();
            if entry.is_empty() {
                return None;
            }
            match ProxyEndpoint::parse(entry, default_type) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "skipping proxy entry");
                    None
                }
            }
        })
        .collect()
}

fn read_list_file(path: &Path) -> Result<String, ProxyWhoisError> {
    fs::read_to_string(path).map_err(|e| {
        ProxyWhoisError::file_error(path.to_string_lossy(), format!("Failed to read file: {}", e))
    })
}

/// Read and parse a domain list file.
pub fn load_domain_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>, ProxyWhoisError> {
    Ok(parse_domain_list(&read_list_file(path.as_ref())?))
}

/// Read and parse a proxy list file.
pub fn load_proxy_file<P: AsRef<Path>>(
    path: P,
    default_type: ProxyType,
) -> Result<Vec<ProxyEndpoint>, ProxyWhoisError> {
    Ok(parse_proxy_list(
        &read_list_file(path.as_ref())?,
        default_type,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" example.com "), "EXAMPLE.COM");
        assert_eq!(normalize_domain("Example.Com."), "EXAMPLE.COM");
    }

    #[test]
    fn test_validate_domain() {
        for good in [
            "example.com",
            "EXAMPLE.COM",
            "sub.example.co.uk",
            "a-b.io",
            "xn--bcher-kva.xn--p1ai",
        ] {
            assert!(validate_domain(good).is_ok(), "{} should be valid", good);
        }
        for bad in [
            "",
            "example",
            "-bad.com",
            "bad-.com",
            "spa ce.com",
            "exa_mple.com",
            "example.c",
        ] {
            assert!(validate_domain(bad).is_err(), "{} should be invalid", bad);
        }
    }

    #[test]
    fn test_extract_tld() {
        assert_eq!(extract_tld("example.com").unwrap(), "com");
        assert_eq!(extract_tld("EXAMPLE.CO.UK").unwrap(), "uk");
        assert!(extract_tld("localhost").is_err());
    }

    #[test]
    fn test_parse_domain_list() {
        let content = "# seed list\nexample.com\n\n  EXAMPLE.com  \nexample.org # trailing\n";
        assert_eq!(parse_domain_list(content), vec!["example.com", "example.org"]);
    }

    #[test]
    fn test_parse_proxy_list_skips_bad_lines() {
        let content = "socks5://10.0.0.1:1080\n# comment\nnot-a-proxy\n10.0.0.2:1080\n";
        let proxies = parse_proxy_list(content, ProxyType::Socks4);
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].proxy_type, ProxyType::Socks5);
        assert_eq!(proxies[1].proxy_type, ProxyType::Socks4);
    }

    #[test]
    fn test_load_missing_file_is_file_error() {
        let err = load_domain_file("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, ProxyWhoisError::FileError { .. }));
    }
}
