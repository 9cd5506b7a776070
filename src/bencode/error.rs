use thiserror::Error;

#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer literal")]
    InvalidInteger,

    #[error("invalid string length prefix")]
    InvalidLength,

    #[error("unexpected byte {0:#04x}")]
    UnexpectedByte(u8),

    #[error("dictionary key is not a byte string")]
    NonStringKey,

    #[error("trailing bytes after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
