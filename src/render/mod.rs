//! Output renderers for CLI results.

pub(crate) mod json;
pub(crate) mod markdown;
