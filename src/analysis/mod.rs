//! Graph algorithms over dependency closures.

pub mod topology;
