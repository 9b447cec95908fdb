pub mod base64url;
pub mod canonical;
pub mod keys;

pub use keys::{KeyRing, KeyRings, RingKind, Signature};
