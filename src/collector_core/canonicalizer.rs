//! URL canonicalization and reversed-domain key derivation
//!
//! Normalization is deliberately narrow: lowercase scheme, lowercase host,
//! uppercase percent-escapes. No trailing-slash removal, no query sorting, no
//! default-port stripping.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

/// Domain-derived attributes attached to every storage item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMetadata {
    /// `hex(md5(domain))-domain`, the summary partition key
    pub domain_md5: String,
    /// Reversed eTLD+1, colon-joined (`com:example`)
    pub domain: String,
    pub hostname: String,
    pub normalized_url: String,
    /// Path plus `?query` when present
    pub request_uri: String,
}

impl DomainMetadata {
    /// Attribute names in the order they are merged into a storage item.
    pub const FIELDS: [&'static str; 5] = [
        "domain_md5",
        "domain",
        "hostname",
        "normalized_url",
        "request_uri",
    ];

    /// `(name, value)` pairs for merging into a storage item.
    pub fn attributes(&self) -> [(&'static str, &str); 5] {
        [
            ("domain_md5", self.domain_md5.as_str()),
            ("domain", self.domain.as_str()),
            ("hostname", self.hostname.as_str()),
            ("normalized_url", self.normalized_url.as_str()),
            ("request_uri", self.request_uri.as_str()),
        ]
    }
}

#[derive(Debug)]
pub enum CanonicalizeError {
    MissingScheme(String),
    InvalidScheme(String),
    Malformed(url::ParseError),
    MissingHost(String),
    IpHost(String),
    NoRegistrableDomain(String),
}

impl From<url::ParseError> for CanonicalizeError {
    fn from(err: url::ParseError) -> Self {
        CanonicalizeError::Malformed(err)
    }
}

impl std::fmt::Display for CanonicalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalizeError::MissingScheme(u) => write!(f, "URL has no scheme/authority: {:?}", u),
            CanonicalizeError::InvalidScheme(s) => write!(f, "Invalid URL scheme: {:?}", s),
            CanonicalizeError::Malformed(e) => write!(f, "Malformed URL: {}", e),
            CanonicalizeError::MissingHost(u) => write!(f, "URL has no host: {:?}", u),
            CanonicalizeError::IpHost(h) => write!(f, "IP address host has no registrable domain: {}", h),
            CanonicalizeError::NoRegistrableDomain(h) => write!(f, "No registrable domain for host: {}", h),
        }
    }
}

impl std::error::Error for CanonicalizeError {}

/// Normalize `raw` by lowercasing scheme and host and uppercasing
/// percent-escapes. Everything else is left as sent.
pub fn normalize_url(raw: &str) -> Result<String, CanonicalizeError> {
    let raw = raw.trim();
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| CanonicalizeError::MissingScheme(raw.to_string()))?;

    if !is_valid_scheme(scheme) {
        return Err(CanonicalizeError::InvalidScheme(scheme.to_string()));
    }

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    // userinfo keeps its case, only host[:port] is lowercased
    let (userinfo, host_port) = match authority.rsplit_once('@') {
        Some((userinfo, host_port)) => (Some(userinfo), host_port),
        None => (None, authority),
    };

    let mut normalized = String::with_capacity(raw.len());
    normalized.push_str(&scheme.to_ascii_lowercase());
    normalized.push_str("://");
    if let Some(userinfo) = userinfo {
        normalized.push_str(userinfo);
        normalized.push('@');
    }
    normalized.push_str(&host_port.to_lowercase());
    normalized.push_str(tail);

    Ok(uppercase_escapes(&normalized))
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn uppercase_escapes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push(b'%');
            out.push(bytes[i + 1].to_ascii_uppercase());
            out.push(bytes[i + 2].to_ascii_uppercase());
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // only ASCII hex digits change case, so the input's UTF-8 validity holds
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Reverse the labels of a dotted domain and join them with `:`.
///
/// `example.co.uk` → `uk:co:example`
pub fn reverse_domain(domain: &str) -> String {
    domain.split('.').rev().collect::<Vec<_>>().join(":")
}

/// Composite partition key: `hex(md5(reversed))-reversed`.
pub fn domain_key(reversed_domain: &str) -> String {
    let digest = Md5::digest(reversed_domain.as_bytes());
    format!("{}-{}", hex::encode(digest), reversed_domain)
}

/// Path and query of a normalized URL exactly as sent, without the fragment.
///
/// Dot segments and backslashes are kept, so `/a/../b` and `/b` count as
/// distinct paths. An empty path becomes `/`.
fn request_target(normalized_url: &str) -> String {
    let rest = normalized_url
        .split_once("://")
        .map_or(normalized_url, |(_, rest)| rest);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let tail = &rest[authority_end..];
    let tail = tail.split_once('#').map_or(tail, |(before, _)| before);

    if tail.starts_with('/') {
        tail.to_string()
    } else {
        format!("/{}", tail)
    }
}

/// Derive [`DomainMetadata`] for a raw URL string.
pub fn canonicalize(raw: &str) -> Result<DomainMetadata, CanonicalizeError> {
    let normalized_url = normalize_url(raw)?;
    let parsed = Url::parse(&normalized_url)?;

    let host = match parsed.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(ip)) => return Err(CanonicalizeError::IpHost(ip.to_string())),
        Some(Host::Ipv6(ip)) => return Err(CanonicalizeError::IpHost(ip.to_string())),
        None => return Err(CanonicalizeError::MissingHost(normalized_url)),
    };

    let registrable = psl::domain_str(host.trim_end_matches('.'))
        .ok_or_else(|| CanonicalizeError::NoRegistrableDomain(host.clone()))?;

    let domain = reverse_domain(registrable);
    let domain_md5 = domain_key(&domain);

    let request_uri = request_target(&normalized_url);

    Ok(DomainMetadata {
        domain_md5,
        domain,
        hostname: host,
        normalized_url,
        request_uri,
    })
}
