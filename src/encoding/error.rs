use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Malformed RESP2 frame")]
    Malformed,
    #[error("Bad number")]
    ExpectedNumber,
    #[error("Frame is not valid utf8")]
    InvalidUtf8,
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        use nom::error::ErrorKind;

        match value {
            nom::Err::Error(e) | nom::Err::Failure(e) => match e.code {
                ErrorKind::Digit => Self::ExpectedNumber,
                ErrorKind::Verify => Self::InvalidUtf8,
                _ => Self::Malformed,
            },
            nom::Err::Incomplete(_) => Self::Malformed,
        }
    }
}
