//! Key and identifier generation.
//!
//! All draws are uniform and independent but not cryptographic. Uniqueness
//! is enforced by the key manager against each token's history, not here.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of the web id assigned at creation.
pub const WEB_ID_LENGTH: usize = 12;

/// Suffix appended to keys and web numbers.
pub const KEY_SUFFIX: char = 'K';

/// Source of key candidates and web identifiers.
pub trait KeyGenerator: Send + Sync {
    /// Ten digits followed by `K`.
    fn generate_key(&self) -> String;

    /// `length` characters from `A-Z`, `a-z`, `0-9`.
    fn generate_web_id(&self, length: usize) -> String;

    /// Five digits followed by `K`.
    fn generate_web_number(&self) -> String;
}

/// [`KeyGenerator`] backed by the thread-local `rand` generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomKeyGenerator;

fn digits_with_suffix(count: usize) -> String {
    let mut rng = rand::rng();
    let mut out: String = (0..count)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect();
    out.push(KEY_SUFFIX);
    out
}

impl KeyGenerator for RandomKeyGenerator {
    fn generate_key(&self) -> String {
        digits_with_suffix(10)
    }

    fn generate_web_id(&self, length: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    fn generate_web_number(&self) -> String {
        digits_with_suffix(5)
    }
}
