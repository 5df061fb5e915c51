use thiserror::Error;

/// Error taxonomy shared by every layer of the database: shard server
/// replies, client return codes, and ingress diagnostics all map into this
/// enum. Numeric codes are part of the wire contract (see [`DbError::code`])
/// and must stay stable across releases.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("io error: {0}")]
    Io(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Stable numeric error code, §4.7 / §7.
    pub fn code(&self) -> i32 {
        match self {
            DbError::ServerUnreachable(_) => 1000,
            DbError::InvalidId(_) => 1001,
            DbError::InvalidType(_) => 1002,
            DbError::Duplicate(_) => 1003,
            DbError::InvalidHeader(_) => 1004,
            DbError::InvalidCommand(_) => 1005,
            // Local-only failures never cross the RPC boundary; they are
            // assigned codes outside the wire taxonomy so a stray
            // serialization bug is never mistaken for a domain error.
            DbError::Codec(_) => 2000,
            DbError::Io(_) => 2001,
        }
    }

    /// Reconstruct an error from a wire code plus its accompanying message,
    /// used by the client when decoding a shard server reply.
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            1000 => DbError::ServerUnreachable(message),
            1001 => DbError::InvalidId(message),
            1002 => DbError::InvalidType(message),
            1003 => DbError::Duplicate(message),
            1004 => DbError::InvalidHeader(message),
            1005 => DbError::InvalidCommand(message),
            _ => DbError::Io(format!("unknown error code {code}: {message}")),
        }
    }
}

pub const OK: i32 = 0;

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_from_code() {
        let cases = [
            DbError::ServerUnreachable("peer gone".into()),
            DbError::InvalidId("vertex 7".into()),
            DbError::InvalidType("delta on string".into()),
            DbError::Duplicate("vertex 3".into()),
            DbError::InvalidHeader("bad cmd byte".into()),
            DbError::InvalidCommand("9".into()),
        ];
        for err in cases {
            let code = err.code();
            let msg = err.to_string();
            let rebuilt = DbError::from_code(code, msg.clone());
            assert_eq!(rebuilt.code(), code);
        }
    }

    #[test]
    fn ok_is_zero() {
        assert_eq!(OK, 0);
    }
}
