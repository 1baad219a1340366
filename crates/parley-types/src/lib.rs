//! Shared wire and domain types for the Parley relay.
//!
//! Everything here is plain data. The server never sees plaintext: message
//! bodies and content keys are opaque ciphertext strings produced by clients.

pub mod api;
pub mod events;
pub mod models;
