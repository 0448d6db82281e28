//! Post-build image size gate

use crate::engine::BuildEngine;
use crate::error::{Error, Result};
use crate::logging::Logger;
use std::sync::Arc;
use tracing::debug;

pub struct SizeValidator {
    engine: Arc<dyn BuildEngine>,
    logger: Logger,
}

impl SizeValidator {
    pub fn new(engine: Arc<dyn BuildEngine>, logger: Logger) -> Self {
        Self { engine, logger }
    }

    /// Check the content size of `image` against `limit` bytes. A limit of 0 disables the check.
    pub async fn validate(&self, image: &str, limit: u64) -> Result<()> {
        if limit == 0 {
            debug!(image, "size limit disabled");
            return Ok(());
        }

        let metadata = self
            .engine
            .image_metadata(image)
            .await
            .map_err(|e| Error::ImageInspection {
                image: image.to_string(),
                reason: e.to_string(),
            })?;

        let actual = metadata.content_size;
        debug!(image, actual, limit, "checked image size");
        if actual > limit {
            return Err(Error::ImageTooLarge {
                image: image.to_string(),
                actual,
                limit,
            });
        }

        self.logger.detail(&format!(
            "Image size {} within limit {}",
            self.logger.format_size(actual),
            self.logger.format_size(limit)
        ));
        Ok(())
    }
}
