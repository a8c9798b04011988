use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source controller close failed: {0}")]
    ControllerClose(String),
}

pub type Result<T> = std::result::Result<T, Error>;
