//! Memory module: situation fingerprints and the bounded record store.

mod fingerprint;
mod store;

pub use crate::actions::PlanSummary;
pub use fingerprint::{Fingerprint, Fingerprinter, HashFingerprinter, FINGERPRINT_DIM};
pub use store::{MemoryError, MemoryRecord, MemoryStore, Outcome};
