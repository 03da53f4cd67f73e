//! Live runtime variables
//!
//! Workers read tunables (intervals, thresholds) from [`RuntimeVars`] on
//! every cycle; control sessions change them with `^vars`. Terms and
//! variables survive restarts through [`PersistedState`].

pub mod store;
pub mod types;

pub use store::{PersistedState, RuntimeVars, VarsUpdate};
pub use types::{declared_type, parse_pairs, VarType};
