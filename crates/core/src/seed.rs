//! Per-attempt seed randomization.
//!
//! A resubmitted job must not replay the previous attempt bit-for-bit,
//! so every literal sampler seed is replaced with a fresh random value
//! before each submission.

use rand::Rng;
use serde_json::Value;

use crate::template::JobTemplate;

/// Input names that carry a sampler seed.
pub const SEED_FIELDS: &[&str] = &["seed", "noise_seed"];

/// Largest seed drawn. Kept within 2^53 so the value survives a round
/// trip through JavaScript clients of the backend.
pub const MAX_SEED: u64 = (1 << 53) - 1;

/// Replace every literal integer seed input with one fresh random value.
///
/// Returns the new template and the seed used, or `None` when the
/// template has no literal seed input (linked seeds are left alone).
pub fn randomize_seed(template: &JobTemplate) -> (JobTemplate, Option<u64>) {
    let seed = rand::rng().random_range(0..=MAX_SEED);
    with_seed(template, seed)
}

/// Like [`randomize_seed`] but with a caller-chosen value.
pub fn with_seed(template: &JobTemplate, seed: u64) -> (JobTemplate, Option<u64>) {
    let mut seeded = template.clone();
    let mut replaced = false;

    for inputs in seeded.all_inputs_mut() {
        for field in SEED_FIELDS {
            if let Some(value) = inputs.get_mut(*field) {
                if value.is_u64() || value.is_i64() {
                    *value = Value::from(seed);
                    replaced = true;
                }
            }
        }
    }

    (seeded, replaced.then_some(seed))
}
