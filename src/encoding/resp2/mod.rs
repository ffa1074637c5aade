mod de;
mod ser;

use bytes::Bytes;

pub use self::ser::Command;
pub use crate::encoding::Error;

/// A decoded RESP2 reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string (`$-1`).
    Bulk(Option<Bytes>),
    /// `None` is the null array (`*-1`).
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Text carried by a simple or bulk string.
    pub fn into_text(self) -> Result<Option<String>, Error> {
        match self {
            Self::Simple(s) => Ok(Some(s)),
            Self::Bulk(Some(b)) => String::from_utf8(b.to_vec())
                .map(Some)
                .map_err(|_| Error::InvalidUtf8),
            _ => Ok(None),
        }
    }
}

/// Decodes one reply from the front of `input`.
///
/// Returns `Ok(None)` while the frame is still incomplete, otherwise the reply
/// and the number of bytes it occupied.
pub fn from_bytes(input: &[u8]) -> Result<Option<(Reply, usize)>, Error> {
    match de::reply(input) {
        Ok((rest, reply)) => Ok(Some((reply, input.len() - rest.len()))),
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn to_bytes(command: &Command) -> Bytes {
    command.to_bytes()
}
