//! ImageDeck service
//!
//! Owns the shared registry and runtime variables, and wires the reaper,
//! downloader, slideshow and control server together for one process.

mod server;

pub use server::{DeckState, DeckStatus, ImageDeck, ImageDeckBuilder};
