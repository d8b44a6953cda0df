//! Data models for the Herb Finder application.
//!
//! Shared by the backend handlers and the client core, so both sides agree on the
//! JSON shapes byte for byte.

mod analysis;
mod post;
mod storage;
mod user;

pub use analysis::*;
pub use post::*;
pub use storage::*;
pub use user::*;
