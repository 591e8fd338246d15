//! URL handling module for NetWatch
//!
//! The engine identifies URLs by their exact string and rate-limits them by
//! origin key, a textual `scheme://host[:port]` prefix. This module provides
//! origin extraction and the link resolution rules used by link discovery.

mod links;
mod origin;

pub use links::{passes_scope, resolve_link, resolve_media, strip_fragment};
pub use origin::{origin_key, same_origin};
