use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace and placement failures reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("{0}: no such file or directory")]
    NotFound(String),
    #[error("{0}: file exists")]
    AlreadyExists(String),
    #[error("{0}: not a directory")]
    NotADirectory(String),
    #[error("{0}: is a directory")]
    IsADirectory(String),
    #[error("{0}: directory is not empty")]
    NotEmpty(String),
    #[error("{0}: operation not permitted on the root directory")]
    IsRoot(String),
    #[error("cannot move {src} to a subdirectory of itself, {dst}")]
    InvalidMove { src: String, dst: String },
    #[error("{0}: invalid name")]
    InvalidName(String),
    #[error("need {wanted} storage daemons, only {registered} registered")]
    Configuration { wanted: usize, registered: usize },
    #[error("metadata storage failure: {0}")]
    Storage(String),
}

pub type FsResult<T> = Result<T, FsError>;

/// Serializable discriminant of [`FsError`] carried in failure responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    NotEmpty,
    IsRoot,
    InvalidMove,
    InvalidName,
    Configuration,
    Storage,
}

impl FsError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotADirectory(_) => ErrorKind::NotADirectory,
            Self::IsADirectory(_) => ErrorKind::IsADirectory,
            Self::NotEmpty(_) => ErrorKind::NotEmpty,
            Self::IsRoot(_) => ErrorKind::IsRoot,
            Self::InvalidMove { .. } => ErrorKind::InvalidMove,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Malformed or incomplete wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("field too long for wire encoding: {0} bytes")]
    FieldTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path() {
        let err = FsError::NotFound("/a/b".to_string());
        assert_eq!(err.to_string(), "/a/b: no such file or directory");
    }

    #[test]
    fn kind_matches_variant() {
        let err = FsError::Configuration {
            wanted: 3,
            registered: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("need 3"));
        assert_eq!(
            FsError::InvalidMove {
                src: "/a".into(),
                dst: "/a/b".into()
            }
            .kind(),
            ErrorKind::InvalidMove
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotADirectory).unwrap();
        assert_eq!(json, "\"not_a_directory\"");
    }

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::Truncated { need: 9, have: 2 };
        assert!(err.to_string().contains("need 9"));
        assert!(ProtocolError::UnknownTag(7).to_string().contains("0x07"));
    }
}
