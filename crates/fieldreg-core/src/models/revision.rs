//! Revision tokens

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deterministic merge disambiguators.
const MERGE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c3a_8b47_4e59_9a0c_5d3e_7f21_b864);

const DISAMBIGUATOR_LEN: usize = 16;

/// Version stamp of a stored document: `(generation, disambiguator)`.
///
/// Revisions are compared for equality only. The generation counter advances
/// on every accepted write; the disambiguator separates concurrent writes that
/// reached the same generation on different replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    generation: u64,
    disambiguator: String,
}

impl Revision {
    /// First revision of a newly created document.
    #[must_use]
    pub fn initial() -> Self {
        Self::with_generation(1)
    }

    /// The revision following this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self::with_generation(self.generation + 1)
    }

    /// Revision of a merge of `a` and `b`.
    ///
    /// The generation is `max(a, b) + 1`. The disambiguator is derived from the
    /// two parent tokens in sorted order, so the result does not depend on
    /// argument order or on which replica computes it.
    #[must_use]
    pub fn merge(a: &Self, b: &Self) -> Self {
        let (low, high) = if a.to_string() <= b.to_string() {
            (a, b)
        } else {
            (b, a)
        };
        let seed = format!("{low}|{high}");
        let digest = Uuid::new_v5(&MERGE_NAMESPACE, seed.as_bytes()).simple().to_string();
        Self {
            generation: a.generation.max(b.generation) + 1,
            disambiguator: digest[..DISAMBIGUATOR_LEN].to_string(),
        }
    }

    fn with_generation(generation: u64) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self {
            generation,
            disambiguator: random[..DISAMBIGUATOR_LEN].to_string(),
        }
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn disambiguator(&self) -> &str {
        &self.disambiguator
    }

    /// Token sent to the remote as the idempotency key of a change.
    pub fn idempotency_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.disambiguator)
    }
}

impl FromStr for Revision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, disambiguator) = s
            .split_once('-')
            .ok_or_else(|| format!("revision '{s}' is missing a disambiguator"))?;
        let generation = generation
            .parse::<u64>()
            .map_err(|error| format!("revision '{s}' has an invalid generation: {error}"))?;
        if generation == 0 {
            return Err(format!("revision '{s}' has generation 0"));
        }
        if disambiguator.is_empty() || !disambiguator.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("revision '{s}' has an invalid disambiguator"));
        }
        Ok(Self {
            generation,
            disambiguator: disambiguator.to_string(),
        })
    }
}

impl TryFrom<String> for Revision {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Revision> for String {
    fn from(value: Revision) -> Self {
        value.to_string()
    }
}
