//! Image transformer trait.

use crate::error::Result;
use crate::image::types::{TransformRequest, TransformedImage};
use async_trait::async_trait;

/// Something that can edit a portrait according to a prompt.
///
/// Implementations make exactly one attempt per call.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Transforms the image in `request`.
    async fn transform(&self, request: &TransformRequest) -> Result<TransformedImage>;

    /// Returns the name of this transformer for display.
    fn name(&self) -> &str;

    /// Checks if the backing service is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
impl<T: ImageTransformer + ?Sized> ImageTransformer for std::sync::Arc<T> {
    async fn transform(&self, request: &TransformRequest) -> Result<TransformedImage> {
        (**self).transform(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }
}
