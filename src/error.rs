use crate::merger::StreamOrigin;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Illegal parameter: {0}")]
    InvalidParameters(String),
    #[error("buffer capacity {configured} is below the {required} records of the search window")]
    CapacityTooSmall { required: u32, configured: u32 },
    #[error("record {index} of the {stream} stream has an invalid level but is not the sentinel")]
    MalformedRecord { stream: StreamOrigin, index: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
