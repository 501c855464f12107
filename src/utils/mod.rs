//! Internal utility helpers.

pub(crate) mod date;
