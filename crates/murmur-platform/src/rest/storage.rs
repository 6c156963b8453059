use reqwest::Method;
use tracing::debug;

use super::HttpPlatform;
use crate::error::Result;

impl HttpPlatform {
    pub(super) async fn storage_upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let size = bytes.len();
        let resp = self
            .request(Method::POST, &format!("storage/v1/object/{}/{}", bucket, path))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        Self::check(resp).await?;
        debug!("Uploaded {}/{} ({} bytes)", bucket, path, size);
        Ok(())
    }

    pub(super) fn storage_public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base, bucket, path)
    }
}
