//! Utility functions and helpers.

pub mod text;
pub mod url;

pub use url::{get_domain, resolve, resolve_url};
