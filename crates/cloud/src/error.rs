//! Error types for catalog search and COG reading.

use thiserror::Error;

/// Errors produced by the catalog client, COG reader and scene stacker.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("server does not support Range requests for {url}")]
    RangeNotSupported { url: String },

    #[error("invalid TIFF: {reason}")]
    InvalidTiff { reason: String },

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u16),

    #[error("unsupported data type: bits_per_sample={bps}, sample_format={sf}")]
    UnsupportedDataType { bps: u16, sf: u16 },

    #[error("unsupported planar configuration: {0} (only chunky=1 supported)")]
    UnsupportedPlanarConfig(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("catalog response error: {0}")]
    Catalog(String),

    #[error("scene {item} has no '{asset}' asset")]
    MissingAsset { item: String, asset: String },

    #[error("tile {tile_idx} out of range (max {max})")]
    TileOutOfRange { tile_idx: usize, max: usize },

    #[error("no IFD entries found in TIFF")]
    NoIfd,

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("fetch failed after {attempts} attempt(s): {reason}")]
    TransientFetch { attempts: u32, reason: String },

    #[error("core error: {0}")]
    Core(#[from] hexchange_core::Error),
}

impl CloudError {
    /// Whether retrying the same request could succeed.
    ///
    /// Timeouts, dropped connections, throttling (429) and server errors
    /// (5xx) are transient; malformed data and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.is_body()
                    || e.status().map_or(false, |s| is_transient_status(s.as_u16()))
            }
            CloudError::HttpStatus { status, .. } => is_transient_status(*status),
            CloudError::Network(_) => true,
            _ => false,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = |status| CloudError::HttpStatus {
            status,
            url: "https://example.com".into(),
        };
        assert!(err(503).is_transient());
        assert!(err(429).is_transient());
        assert!(!err(404).is_transient());
        assert!(!err(400).is_transient());
    }

    #[test]
    fn data_errors_are_fatal() {
        assert!(!CloudError::InvalidTiff { reason: "bad magic".into() }.is_transient());
        assert!(!CloudError::UnsupportedCompression(34887).is_transient());
        assert!(CloudError::Network("connection reset".into()).is_transient());
        assert!(!CloudError::TransientFetch { attempts: 3, reason: "x".into() }.is_transient());
    }
}
