//! CLI command handlers.

pub(crate) mod sync;
