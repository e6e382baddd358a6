pub mod alias;
mod device_key;
mod envelope;
mod error;
mod normalizer;

pub use alias::{core_telemetry_requests, AliasLookup, AliasMapping, STATIC_ALIAS_TABLE};
pub use device_key::canonical_device_key;
pub use envelope::extract_elements;
pub use error::{PayloadError, Result};
pub use normalizer::{decode_envelope, normalize_batch};
