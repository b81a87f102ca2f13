use crate::transport::TransportError;
use raxm_protocol::{ComponentId, RaxmError};
use thiserror::Error;

/// Errors raised while parsing server HTML into the DOM model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unterminated {0}")]
    Unterminated(&'static str),

    #[error("fragment has no element")]
    NoElement,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("html: {0}")]
    Dom(#[from] DomError),

    #[error(transparent)]
    Protocol(#[from] RaxmError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("unknown component: {0}")]
    UnknownComponent(ComponentId),

    #[error("invalid initial data: {0}")]
    InitialData(String),

    #[error("invalid directive: {0}")]
    Directive(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
