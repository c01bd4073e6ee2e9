use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] toke_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Entry ID cannot be empty")]
    EmptyEntryId,
    #[error("Invalid date '{0}'; use YYYY-MM-DD or RFC 3339")]
    InvalidDate(String),
    #[error("Not signed in. Run `toke auth login` first.")]
    NotSignedIn,
}
