//! Events module
//!
//! The wire layer shared by producers and consumers: routing keys and
//! exchange names, the JSON envelope codec, and typed payload structs.

pub mod envelope;
pub mod names;
pub mod payloads;

pub use envelope::{Envelope, EnvelopeError, EventMeta};
pub use names::{exchanges, EventName};
