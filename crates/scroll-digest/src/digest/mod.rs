//! Digest generation.

mod builder;

pub use builder::{latest_digest, DigestBuilder, DigestError};
