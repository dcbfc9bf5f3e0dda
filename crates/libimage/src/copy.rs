//! The seam to the layer that actually moves image bytes. The resolver only
//! decides what to copy and in which order.
use std::collections::HashMap;

use crate::reference::ImageReference;
use crate::store::StoreReference;
use crate::system_context::SystemContext;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A copy failure. Whether it is worth retrying is decided by whoever
/// produced it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CopyError {
    message: String,
    retryable: bool,
    #[source]
    source: Option<BoxedError>,
}

impl CopyError {
    /// A failure that may go away on its own, such as a dropped connection.
    pub fn transient<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            source: None,
        }
    }

    /// A failure that retrying cannot fix, such as a missing manifest.
    pub fn fatal<M: Into<String>>(message: M) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningOptions {
    pub remove_signatures: bool,
    pub sign_by: Option<String>,
}

/// Options handed to the copy layer for a single source/destination pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions<'a> {
    pub source_ctx: &'a SystemContext,
    pub dest_ctx: &'a SystemContext,
    pub signing: &'a SigningOptions,
}

pub trait ImageCopier {
    /// Copies `src` into local storage as `dst`.
    fn copy_image(
        &self,
        dst: &StoreReference,
        src: &ImageReference,
        options: &CopyOptions<'_>,
    ) -> Result<(), CopyError>;

    /// Reads the labels of the image config behind `src` without copying it.
    fn inspect_labels(
        &self,
        src: &ImageReference,
        ctx: &SystemContext,
    ) -> Result<HashMap<String, String>, CopyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_copy_error_retryable() {
        assert!(CopyError::transient("connection reset").is_retryable());
        assert!(!CopyError::fatal("manifest unknown").is_retryable());
    }

    #[test]
    fn test_copy_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = CopyError::transient("reading blob").with_source(io);
        assert_eq!(err.to_string(), "reading blob");
        assert_eq!(err.source().map(|s| s.to_string()), Some("timed out".to_owned()));
    }
}
