//! Internal helpers.

pub(crate) mod slab;
