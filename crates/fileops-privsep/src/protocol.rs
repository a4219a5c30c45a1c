//! Line protocol spoken between the executor child and its parent.
//!
//! Every record is one UTF-8 line terminated by `\n`:
//!
//! | record | meaning |
//! |---|---|
//! | `deleted:<path>` | `path` was deleted |
//! | `completed:<path>` | `path` was copied or moved |
//! | `error:<code>:<path>` | `path` failed with the numeric [`ErrorCode`] |
//! | `error:<code>:` | setup failure, no path |
//! | `done` | the batch completed without failure |
//! | `true` | a single-path operation succeeded |

use std::path::{Path, PathBuf};

use fileops_core::ErrorCode;
use thiserror::Error;

/// A decoded protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Deleted(PathBuf),
    Completed(PathBuf),
    Error {
        code: ErrorCode,
        path: Option<PathBuf>,
    },
    Done,
    True,
}

/// A line that is not a valid record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown record: {0:?}")]
    UnknownRecord(String),

    #[error("invalid error code in record: {0:?}")]
    InvalidCode(String),
}

impl Record {
    /// A failure record for `path`.
    pub fn error(code: ErrorCode, path: &Path) -> Self {
        Self::Error {
            code,
            path: Some(path.to_path_buf()),
        }
    }

    /// A setup failure record.
    pub fn setup_error(code: ErrorCode) -> Self {
        Self::Error { code, path: None }
    }

    /// Encode the record as a newline-terminated line.
    pub fn encode(&self) -> String {
        match self {
            Self::Deleted(path) => format!("deleted:{}\n", path.display()),
            Self::Completed(path) => format!("completed:{}\n", path.display()),
            Self::Error { code, path } => {
                let path = path.as_deref().map(|p| p.display().to_string()).unwrap_or_default();
                format!("error:{}:{}\n", code.as_u32(), path)
            }
            Self::Done => "done\n".to_string(),
            Self::True => "true\n".to_string(),
        }
    }

    /// Parse a single line, without its terminator.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if let Some(path) = line.strip_prefix("deleted:") {
            return Ok(Self::Deleted(PathBuf::from(path)));
        }
        if let Some(path) = line.strip_prefix("completed:") {
            return Ok(Self::Completed(PathBuf::from(path)));
        }

        if let Some(rest) = line.strip_prefix("error:") {
            let (code, path) = rest
                .split_once(':')
                .ok_or_else(|| ProtocolError::UnknownRecord(line.to_string()))?;
            let code = code
                .parse::<u32>()
                .ok()
                .and_then(ErrorCode::from_u32)
                .ok_or_else(|| ProtocolError::InvalidCode(line.to_string()))?;
            let path = (!path.is_empty()).then(|| PathBuf::from(path));
            return Ok(Self::Error { code, path });
        }

        match line {
            "done" => Ok(Self::Done),
            "true" => Ok(Self::True),
            _ => Err(ProtocolError::UnknownRecord(line.to_string())),
        }
    }
}

/// Incremental splitter turning pipe reads into complete lines.
///
/// A read may end in the middle of a line (or of a UTF-8 sequence); the
/// unterminated tail is carried over to the next read.
#[derive(Debug, Default)]
pub struct LineAssembler {
    carry: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.carry[start..end]).into_owned());
            start = end + 1;
        }
        self.carry.drain(..start);
        lines
    }

    /// Consume the assembler, returning any unterminated trailing fragment.
    pub fn finish(self) -> Option<String> {
        (!self.carry.is_empty()).then(|| String::from_utf8_lossy(&self.carry).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records() {
        assert_eq!(
            Record::parse("deleted:/tmp/a b").unwrap(),
            Record::Deleted(PathBuf::from("/tmp/a b"))
        );
        assert_eq!(
            Record::parse("error:6:/tmp/with:colon").unwrap(),
            Record::error(ErrorCode::DeleteFailed, Path::new("/tmp/with:colon"))
        );
        assert_eq!(
            Record::parse("error:12:").unwrap(),
            Record::setup_error(ErrorCode::UserChangeFailed)
        );
        assert_eq!(
            Record::parse("completed:/tmp/a").unwrap(),
            Record::Completed(PathBuf::from("/tmp/a"))
        );
        assert_eq!(Record::parse("done").unwrap(), Record::Done);
        assert_eq!(Record::parse("true").unwrap(), Record::True);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Record::parse("false"),
            Err(ProtocolError::UnknownRecord(_))
        ));
        assert!(matches!(
            Record::parse("error:99:/x"),
            Err(ProtocolError::InvalidCode(_))
        ));
        assert!(matches!(
            Record::parse("error:abc"),
            Err(ProtocolError::UnknownRecord(_))
        ));
    }

    #[test]
    fn test_encode_setup_error() {
        assert_eq!(
            Record::setup_error(ErrorCode::UserChangeFailed).encode(),
            "error:12:\n"
        );
        assert_eq!(
            Record::error(ErrorCode::CopyFailed, Path::new("/a")).encode(),
            "error:3:/a\n"
        );
        assert_eq!(
            Record::Completed(PathBuf::from("/a")).encode(),
            "completed:/a\n"
        );
    }

    #[test]
    fn test_assembler_handles_split_reads() {
        let mut assembler = LineAssembler::new();

        assert!(assembler.push(b"dele").is_empty());
        assert_eq!(assembler.push(b"ted:/a\ndo"), vec!["deleted:/a".to_string()]);
        assert_eq!(
            assembler.push(b"ne\ntrue\n"),
            vec!["done".to_string(), "true".to_string()]
        );
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_assembler_keeps_multibyte_sequences_intact() {
        let line = "deleted:/tmp/caf\u{e9}\n".as_bytes();
        let split = line.len() - 2;
        let mut assembler = LineAssembler::new();

        assert!(assembler.push(&line[..split]).is_empty());
        assert_eq!(
            assembler.push(&line[split..]),
            vec!["deleted:/tmp/caf\u{e9}".to_string()]
        );
    }

    #[test]
    fn test_assembler_returns_trailing_fragment() {
        let mut assembler = LineAssembler::new();
        assert_eq!(assembler.push(b"done\nerror:3:/tr"), vec!["done".to_string()]);
        assert_eq!(assembler.finish(), Some("error:3:/tr".to_string()));
    }
}
