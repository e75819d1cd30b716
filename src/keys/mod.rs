//! Platform signing keys
//!
//! [`KeyFetcher`] pulls the key listing over HTTPS and picks the entry marked
//! current. [`KeyCache`] holds the one active [`SigningKey`] that every
//! verification reads, and replaces it wholesale on refresh.

mod cache;
mod fetcher;

pub use cache::KeyCache;
pub use fetcher::{
    DEFAULT_KEYS_URL, KeyAlgorithm, KeyError, KeyFetcher, KeySource, SigningKey, parse_key_listing,
};
