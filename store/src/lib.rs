//! Durable storage for the prompt draft, the outgoing queue, and sent history.
//!
//! One JSON file per session. The store never fails its callers: if the disk
//! misbehaves it logs once and keeps going in memory.

mod draft_store;
mod session;

pub use draft_store::{DEFAULT_SEARCH_LIMIT, DraftStore, MAX_SEARCH_LIMIT};
pub use session::{SessionFile, StoreError, session_file_name};
