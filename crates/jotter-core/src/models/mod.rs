//! Data models for Jotter

mod attachment;
mod note;

pub use attachment::Attachment;
pub use note::{NewNote, Note, NoteChanges, NoteId};
