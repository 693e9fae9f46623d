//! Secret handling utilities.
//!
//! Re-exports secrecy types used throughout fieldwork.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
