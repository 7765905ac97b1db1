//! Graphics formats used by the portrait archive

pub mod kao;
