//! Various utilities

pub mod byte_size;
