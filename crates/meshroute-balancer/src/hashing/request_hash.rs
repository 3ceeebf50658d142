use http::Uri;
use meshroute_common::error::Result;
use rand::Rng;
use regex::Regex;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use super::ring::RING_MASK;

/// Ring hash of an arbitrary key string.
pub fn hash_key(key: &str) -> u32 {
    (xxh64(key.as_bytes(), 0) & RING_MASK) as u32
}

/// Uniformly random ring hash.
pub fn random_hash() -> u32 {
    rand::thread_rng().gen_range(0..=RING_MASK as u32)
}

/// How a request picks its starting point on the ring.
#[derive(Debug, Clone)]
pub enum RequestHash {
    /// A fresh random point per request.
    Random,
    /// A point derived from parts of the request URI, so equal parts always
    /// land on the same host ("sticky" routing).
    UriRegex(UriRegexHash),
}

impl RequestHash {
    pub fn is_sticky(&self) -> bool {
        matches!(self, RequestHash::UriRegex(_))
    }

    pub fn hash_uri(&self, uri: &Uri) -> u32 {
        match self {
            RequestHash::Random => random_hash(),
            RequestHash::UriRegex(regex_hash) => regex_hash.hash(uri),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UriRegexHash {
    regexes: Vec<Regex>,
}

impl UriRegexHash {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let regexes = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { regexes })
    }

    /// Capture groups of the first matching regex, joined with `;`.
    pub fn sticky_key(&self, uri: &Uri) -> Option<String> {
        let input = uri.to_string();
        self.regexes.iter().find_map(|regex| {
            regex.captures(&input).map(|captures| {
                captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(";")
            })
        })
    }

    /// Hash of the sticky key, or a random point when no regex matches.
    pub fn hash(&self, uri: &Uri) -> u32 {
        match self.sticky_key(uri) {
            Some(key) => hash_key(&key),
            None => {
                trace!("No sticky key in {}, using a random ring point", uri);
                random_hash()
            }
        }
    }
}
