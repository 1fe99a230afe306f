//! market-cli library: Exposes the config and backend seeding for testing.
//!
//! The binary runs against an in-memory store and auth provider seeded from
//! `config.json`; changes are written back to the same file.

pub mod config;
pub mod render;

pub use config::{AccountSeed, Config, ListingSeed};
pub use render::render_view;
