use std::path::{Path, PathBuf};

use anyhow::Result;
use axum::extract::Multipart;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};

/// 5 MB per image
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Public URL prefix the server mounts the upload directory under.
pub const UPLOADS_PREFIX: &str = "/uploads";

/// An image pulled out of a multipart body, not yet written to disk.
pub struct ImageUpload {
    pub extension: &'static str,
    pub data: Bytes,
}

/// On-disk image storage for listing photos and avatars.
///
/// Files are named by the SHA-256 of their content, so re-uploading the same
/// image reuses the stored file.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the image and returns its public URL.
    pub async fn save_image(&self, image: &ImageUpload) -> Result<String> {
        let digest = hex::encode(Sha256::digest(&image.data));
        let file_name = format!("{}.{}", digest, image.extension);
        let path = self.dir.join(&file_name);

        if fs::try_exists(&path).await? {
            debug!("Image {} already stored", file_name);
        } else {
            fs::write(&path, &image.data).await?;
            debug!("Stored image {} ({} bytes)", file_name, image.data.len());
        }

        Ok(format!("{UPLOADS_PREFIX}/{file_name}"))
    }
}

pub fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Reads every file field of a multipart body as an image.
pub async fn read_images(mut multipart: Multipart) -> ApiResult<Vec<ImageUpload>> {
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_none() {
            continue;
        }

        let extension = field
            .content_type()
            .and_then(image_extension)
            .ok_or_else(|| ApiError::Validation("Only image files are allowed".into()))?;

        let data = field.bytes().await?;
        if data.is_empty() {
            return Err(ApiError::Validation("Uploaded file is empty".into()));
        }
        if data.len() > MAX_IMAGE_SIZE {
            return Err(ApiError::PayloadTooLarge("Images must be 5 MB or smaller".into()));
        }

        images.push(ImageUpload { extension, data });
    }

    if images.is_empty() {
        return Err(ApiError::Validation("No image uploaded".into()));
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_image_types_are_accepted() {
        assert_eq!(image_extension("image/png"), Some("png"));
        assert_eq!(image_extension("image/jpeg"), Some("jpg"));
        assert_eq!(image_extension("application/pdf"), None);
        assert_eq!(image_extension("image/svg+xml"), None);
    }

    #[tokio::test]
    async fn identical_images_share_a_file() {
        let dir = std::env::temp_dir().join(format!("bazaar-storage-{}", uuid::Uuid::new_v4()));
        let storage = Storage::new(dir.clone()).await.unwrap();

        let image = ImageUpload {
            extension: "png",
            data: Bytes::from_static(b"\x89PNG fake"),
        };
        let first = storage.save_image(&image).await.unwrap();
        let second = storage.save_image(&image).await.unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("/uploads/"));
        assert!(first.ends_with(".png"));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);

        std::fs::remove_dir_all(dir).ok();
    }
}
