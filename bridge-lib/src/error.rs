use std::{fmt, result};

use thiserror::Error;

use crate::handle::ResourceKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(i64),
    #[error("handle {handle} refers to a {found} resource, expected {expected}")]
    WrongKind {
        handle: i64,
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("bridge is not initialized")]
    NotInitialized,
    #[error("bridge is already initialized")]
    AlreadyInitialized,

    #[error("codec error: {0}")]
    Codec(String),
    #[error("stream already finished")]
    StreamFinished,
    #[error("previous output has not been drained")]
    NotDrained,

    #[error("invalid node: {0}")]
    InvalidNode(i64),

    #[error("db error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("net error: {0}")]
    Net(#[from] reqwest::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn config<T: fmt::Display>(inner: T) -> Self {
        Self::Config(inner.to_string())
    }
    pub fn runtime<T: fmt::Display>(inner: T) -> Self {
        Self::Runtime(inner.to_string())
    }
    pub fn argument<T: fmt::Display>(inner: T) -> Self {
        Self::Argument(inner.to_string())
    }
    pub(crate) fn codec<T: fmt::Display>(inner: T) -> Self {
        Self::Codec(inner.to_string())
    }
}
