use inquire::error::InquireError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharevfsCliError {
    #[error("Input error: {0}")]
    Input(String),
    #[error("{0}")]
    Vfs(#[from] sharevfs::VfsError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    InteractionError(#[from] InquireError),
}

pub type Result<T> = std::result::Result<T, SharevfsCliError>;
