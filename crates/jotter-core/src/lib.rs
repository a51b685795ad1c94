//! jotter-core - Core library for Jotter
//!
//! This crate contains the note models, the libSQL note repository, the remote
//! object store abstraction, and the attachment reconciliation logic used by
//! the Jotter API service.

pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod reconcile;
pub mod services;
pub mod storage;
pub mod util;

pub use error::{Error, Result};
pub use models::{Attachment, Note, NoteId};
