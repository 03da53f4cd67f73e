//! Image registry and TermSet
//!
//! One lock guards both the image path set and the active search terms.
//! See [`store::Registry`] for the locking discipline.

pub mod scan;
mod store;
pub mod terms;

pub use scan::{is_valid_term, scan_terms, term_dir, total_image_bytes, walk_image_root, ImageFile};
pub use store::Registry;
pub use terms::{format_terms, TermEdit, WorkingTerms};
