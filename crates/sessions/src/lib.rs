//! Per-address session state for a messaging bot.
//!
//! Each address owns one JSON record in the `bot_sessions` table holding
//! arbitrary keys plus the open conversation thread and its state. Sessions
//! are loaded on demand through [`SessionManager`], mutated in memory, and
//! written back whole after every change.

pub mod address;
pub mod error;
pub mod manager;
pub mod session;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod thread;
pub mod transport;
pub mod writer;

pub use {
    address::Address,
    error::{Error, Result},
    manager::SessionManager,
    session::{STATE_KEY, Session, THREAD_KEY},
    store::{SessionData, SessionRecord, SessionStore, connect_store},
    store_memory::MemorySessionStore,
    store_sqlite::SqliteSessionStore,
    thread::{ConversationThread, ThreadRegistry},
    transport::{LogTransport, Transport},
};
