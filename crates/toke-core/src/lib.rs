//! toke-core - Core library for Toke Diary
//!
//! This crate contains the models, local cache, remote gateway, session
//! lifecycle, and entry synchronization logic shared by every Toke Diary
//! client shell.

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod favorites;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{Error, ErrorKind, Result};
pub use models::{Entry, EntryDraft, EntryId, EntryPatch};
