//! Authentication middleware chains (spec.md §4.3, §4.4, §4.5).

pub mod dt4a;
pub mod eckrypto;
pub mod presence;
