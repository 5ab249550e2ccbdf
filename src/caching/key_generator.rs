//! # Cache Key Generator
//!
//! Derives the cache ident for a request. The selected request attributes are
//! collected into a composite value, serialised canonically and hashed with the
//! configured digest. Attributes excluded by [`ParseOptions`] are replaced
//! with an explicit `null` marker, so flipping a flag always changes the
//! digest even when the underlying value is empty.

use crate::core::config::ParseOptions;
use crate::core::types::CacheRequest;
use md5::Md5;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Hash functions available for ident derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Djb2,
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Ripemd160,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 6] = [
        Self::Djb2,
        Self::Md5,
        Self::Sha1,
        Self::Sha256,
        Self::Sha512,
        Self::Ripemd160,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Djb2 => "djb2",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Ripemd160 => "ripemd160",
        }
    }

    /// Hash `input`. djb2 renders as a decimal number, the rest as lowercase hex.
    pub fn digest(&self, input: &[u8]) -> String {
        match self {
            Self::Djb2 => djb2(input).to_string(),
            Self::Md5 => hex::encode(Md5::digest(input)),
            Self::Sha1 => hex::encode(Sha1::digest(input)),
            Self::Sha256 => hex::encode(Sha256::digest(input)),
            Self::Sha512 => hex::encode(Sha512::digest(input)),
            Self::Ripemd160 => hex::encode(Ripemd160::digest(input)),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|algorithm| algorithm.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown digest '{}', expected one of \
                     djb2, md5, sha1, sha256, sha512, ripemd160",
                    s
                )
            })
    }
}

fn djb2(input: &[u8]) -> u32 {
    input.iter().fold(5381u32, |hash, byte| {
        hash.wrapping_mul(33).wrapping_add(u32::from(*byte))
    })
}

/// Externally addressable key handed to the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub id: String,
    pub segment: String,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.id)
    }
}

/// Composite value that gets hashed. Field order is fixed by the struct and
/// query parameters go through a sorted map, so serialisation is canonical.
#[derive(Serialize)]
struct IdentParts<'a> {
    method: Option<&'a str>,
    query: Option<BTreeMap<String, Vec<String>>>,
    route: Option<&'a str>,
}

/// Parse a query string into a key-sorted multimap. Repeated keys keep the
/// order their values appeared in.
fn canonical_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    params
}

/// Build the ident for a request from the attributes selected by `parse`
pub fn build_ident(
    request: &CacheRequest,
    parse: &ParseOptions,
    digest: DigestAlgorithm,
) -> String {
    let parts = IdentParts {
        method: parse.method.then(|| request.method.as_str()),
        query: parse.query.then(|| canonical_query(request.query())),
        route: parse.route.then(|| request.path()),
    };

    // Serialising strings, options and string maps cannot fail.
    let composite = serde_json::to_vec(&parts).unwrap_or_default();
    digest.digest(&composite)
}

/// Pair an ident with its segment
pub fn build_cache_key<I: ToString>(id: I, segment: &str) -> CacheKey {
    CacheKey {
        id: id.to_string(),
        segment: segment.to_string(),
    }
}
