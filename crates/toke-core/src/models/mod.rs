//! Data models for Toke Diary

mod entry;
mod rating;

pub use entry::{
    filter_entries, sort_entries, Entry, EntryDraft, EntryId, EntryPatch, Size, SizeUnit,
    StrainType,
};
pub use rating::Rating;
