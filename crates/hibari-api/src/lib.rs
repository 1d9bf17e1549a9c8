//! Provider clients for hibari.
//!
//! Each provider module speaks one tracker's wire protocol and converts
//! its payloads into the shared `hibari-core` model types. The
//! [`client::ClientSet`] bundles the configured clients behind the
//! core's service registry.

pub mod anilist;
pub mod client;
pub mod mal;

pub use client::{ClientSet, ProviderClient};
