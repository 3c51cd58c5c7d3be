use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("image is wrong size")]
    WrongSize,
    #[error("not enough image data")]
    NotEnough,
    #[error("too much image data")]
    TooMuch,
    #[error("invalid palette index")]
    BadPalette,
    #[error("cannot pack image into three palettes")]
    Unpackable,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
