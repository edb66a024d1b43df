use serde::{Deserialize, Serialize};

use crate::core::ManagerError;

/// Machine-readable error codes for the wire protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    IllegalArgument,
    CallbackDuplicated,
    CallbackNotFound,
    ResolveTimeout,
    EngineError,
    ParseError,
}

impl From<&ManagerError> for ErrorCode {
    fn from(e: &ManagerError) -> Self {
        match e {
            ManagerError::IllegalArgument => Self::IllegalArgument,
            ManagerError::CallbackDuplicated => Self::CallbackDuplicated,
            ManagerError::CallbackNotFound => Self::CallbackNotFound,
            ManagerError::ResolveTimeout => Self::ResolveTimeout,
            ManagerError::Engine(_) => Self::EngineError,
        }
    }
}
