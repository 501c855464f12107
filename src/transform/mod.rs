//! Transform adapters from registry payloads into normalized trial records.

pub(crate) mod trial;
