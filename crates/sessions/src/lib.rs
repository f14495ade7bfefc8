//! Session Store (§4.11): JSON-on-disk persistence of session metadata
//! (identity, token usage, timestamps, origin) so a restarted process can
//! enumerate known sessions. Conversation text never lives here — it stays
//! in the agent crate's process-lifetime Conversation Store.

pub mod store;

pub use store::SessionStore;
