//! Integration test suite modules

mod delivery;
mod recovery;
mod sync;
