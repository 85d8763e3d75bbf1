//! Situation fingerprints: deterministic feature-hashed vectors.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::normalize_text;
use crate::device::Observation;

/// Width of every fingerprint.
pub const FINGERPRINT_DIM: usize = 64;

/// Fixed-width, L2-normalized numeric summary of a (goal, observation) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(Vec<f32>);

impl Fingerprint {
    /// Wrap a raw vector, normalizing it. Vectors of the wrong width are
    /// truncated or zero-padded.
    pub fn from_vec(mut values: Vec<f32>) -> Self {
        values.resize(FINGERPRINT_DIM, 0.0);
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// Cosine similarity in [-1, 1]; 0 when either side is all zeros.
    pub fn similarity(&self, other: &Fingerprint) -> f32 {
        let dot: f32 = self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum();
        let na = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        let nb = other.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            (dot / (na * nb)).clamp(-1.0, 1.0)
        }
    }
}

/// Derives fingerprints from a goal and an observation.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, goal: &str, observation: &Observation) -> Fingerprint;
}

/// Signed feature hashing over SHA-256 of each normalized token.
///
/// Same input, same vector, on every platform and run.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashFingerprinter;

impl HashFingerprinter {
    /// Fingerprint arbitrary text.
    pub fn fingerprint_text(&self, text: &str) -> Fingerprint {
        let normalized = normalize_text(text);
        let mut values = vec![0.0f32; FINGERPRINT_DIM];

        for token in normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % FINGERPRINT_DIM;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }

        Fingerprint::from_vec(values)
    }
}

impl Fingerprinter for HashFingerprinter {
    fn fingerprint(&self, goal: &str, observation: &Observation) -> Fingerprint {
        self.fingerprint_text(&format!("{}\n{}", goal, observation.render()))
    }
}
