//! ImageDeck - image acquisition pipeline feeding a slideshow
//!
//! A shared registry of on-disk image paths is filled by a downloader,
//! aged out by a reaper, read by a slideshow loop and administered over a
//! line-oriented TCP control protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          ImageDeck                            │
//! │                                                               │
//! │  ┌────────────────┐   commit terms    ┌────────────────────┐  │
//! │  │ Control server │──────────────────▶│      Registry      │  │
//! │  │ (task/session) │◀── snapshot ──────│ images + TermSet   │  │
//! │  └──┬─────────┬───┘                   └──▲──────▲──────┬───┘  │
//! │     │ ^clear  │ new terms                │ add  │remove│ rev  │
//! │     ▼         ▼                          │      │      ▼      │
//! │  ┌────────┐ ┌────────────┐               │      │  ┌─────────┐│
//! │  │ Reaper │ │ Downloader │───────────────┘      │  │Slideshow││
//! │  └───┬────┘ └────────────┘                      │  └─────────┘│
//! │      └──────────────────────────────────────────┘             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: shared image set and TermSet behind one lock
//! - [`reaper`]: age-based deletion with per-request completion reports
//! - [`acquisition`]: download passes and the new-terms event
//! - [`slideshow`]: random image selection for a presenter
//! - [`control`]: TCP line protocol
//! - [`settings`]: runtime variables and persisted state
//! - [`deck`]: service lifecycle wiring it all together
//! - [`config`]: configuration management

pub mod acquisition;
pub mod config;
pub mod control;
pub mod deck;
pub mod error;
pub mod reaper;
pub mod registry;
pub mod settings;
pub mod slideshow;

pub use config::ImageDeckConfig;
pub use deck::{DeckState, ImageDeck, ImageDeckBuilder};
pub use error::{Error, Result};
