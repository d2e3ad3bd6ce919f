// src/error.rs
//
// Unified error handling for pagefeed
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input or configuration, recoverable
// - CodecError: Format/decoding/encoding issues
// - ResourceLimit: Memory/dimension limits, I/O and missing capabilities
// - InternalBug: Library bugs and broken worker plumbing (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used when reducing failures to descriptors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/dimension limits, I/O, unavailable capabilities
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

/// pagefeed error types
#[derive(Debug, Error)]
pub enum PipelineError {
    // Source I/O Errors
    #[error("Failed to read source '{path}': {source}")]
    SourceReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map source '{path}': {source}")]
    MmapFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch '{url}': {message}")]
    FetchFailed {
        url: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Format Errors
    #[error("Unsupported document format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Malformed TIFF: {message}")]
    MalformedTiff { message: Cow<'static, str> },

    #[error("TIFF tag {tag} is missing")]
    MissingTag { tag: u16 },

    #[error("Page {page} is out of range (document has {pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },

    #[error("Failed to decode page: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Source bytes are empty")]
    EmptySource,

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    // Capability Errors
    #[error("Capability unavailable in this execution context: {capability}")]
    CapabilityUnavailable { capability: Cow<'static, str> },

    // Configuration Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Worker Errors
    #[error("Worker {worker} terminated abnormally")]
    WorkerTerminated { worker: usize },

    #[error("Worker channel closed")]
    ChannelClosed,

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },

    // Generic Error
    #[error("{message}")]
    Generic { message: Cow<'static, str> },
}

// Constructor Helpers
impl PipelineError {
    pub fn source_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::SourceReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn mmap_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::MmapFailed {
            path: path.into(),
            source,
        }
    }

    pub fn fetch_failed(
        url: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::FetchFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn malformed_tiff(message: impl Into<Cow<'static, str>>) -> Self {
        Self::MalformedTiff {
            message: message.into(),
        }
    }

    pub fn missing_tag(tag: u16) -> Self {
        Self::MissingTag { tag }
    }

    pub fn page_out_of_range(page: usize, pages: usize) -> Self {
        Self::PageOutOfRange { page, pages }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn empty_source() -> Self {
        Self::EmptySource
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn capability_unavailable(capability: impl Into<Cow<'static, str>>) -> Self {
        Self::CapabilityUnavailable {
            capability: capability.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn worker_terminated(worker: usize) -> Self {
        Self::WorkerTerminated { worker }
    }

    pub fn channel_closed() -> Self {
        Self::ChannelClosed
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the host can fix it)
    ///
    /// Consistent with category():
    /// - UserError and ResourceLimit errors are recoverable
    /// - CodecError and InternalBug errors are not
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. } | Self::EmptySource | Self::PageOutOfRange { .. } => {
                ErrorCategory::UserError
            }

            Self::UnsupportedFormat { .. }
            | Self::MalformedTiff { .. }
            | Self::MissingTag { .. }
            | Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. } => ErrorCategory::CodecError,

            // Fetch and mmap failures usually mean the source moved or the host is
            // under pressure; the page can be retried later.
            Self::SourceReadFailed { .. }
            | Self::MmapFailed { .. }
            | Self::FetchFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::CapabilityUnavailable { .. } => ErrorCategory::ResourceLimit,

            Self::WorkerTerminated { .. }
            | Self::ChannelClosed
            | Self::InternalPanic { .. }
            | Self::Generic { .. } => ErrorCategory::InternalBug,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::fetch_failed("file:///scan.tif", "connection reset");
        assert!(err.to_string().contains("file:///scan.tif"));
        assert!(err.to_string().contains("connection reset"));

        let err = PipelineError::missing_tag(513);
        assert_eq!(err.to_string(), "TIFF tag 513 is missing");
    }

    #[test]
    fn test_error_recoverable() {
        assert!(PipelineError::invalid_argument("workers", "0", "must be positive").is_recoverable());
        assert!(PipelineError::capability_unavailable("raster surface").is_recoverable());
        assert!(!PipelineError::malformed_tiff("bad magic").is_recoverable());
        assert!(!PipelineError::internal_panic("boom").is_recoverable());
    }

    #[test]
    fn test_error_category_codec_error() {
        assert_eq!(
            PipelineError::unsupported_format("psd").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            PipelineError::missing_tag(273).category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            PipelineError::encode_failed("png", "test").category(),
            ErrorCategory::CodecError
        );
    }

    #[test]
    fn test_error_category_resource_limit() {
        assert_eq!(
            PipelineError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            PipelineError::source_read_failed(
                "scan.tif",
                std::io::Error::from(std::io::ErrorKind::NotFound)
            )
            .category(),
            ErrorCategory::ResourceLimit
        );
    }

    #[test]
    fn test_error_category_internal_bug() {
        assert_eq!(
            PipelineError::worker_terminated(3).category(),
            ErrorCategory::InternalBug
        );
        assert_eq!(
            PipelineError::channel_closed().category(),
            ErrorCategory::InternalBug
        );
        assert_eq!(ErrorCategory::InternalBug.as_str(), "InternalBug");
    }
}
