pub mod engine;
pub mod fingerprint;
pub mod patch;
mod sniffer;

pub use engine::{CacheKey, SignatureStore, ThoughtSignature, SKIP_SIGNATURE_SENTINEL};
pub use fingerprint::KeyScope;
pub use patch::{patch_request, PatchStats};
pub use sniffer::SignatureSniffer;
