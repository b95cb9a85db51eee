use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{FleetResult, ImageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsImage {
    pub name: String,
    pub version: String,
    pub os_type: String,
}

impl OsImage {
    pub fn new(name: &str, version: &str, os_type: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            os_type: os_type.to_string(),
        }
    }

    fn validate(&self) -> Result<(), ImageError> {
        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("os_type", &self.os_type),
        ] {
            if value.trim().is_empty() {
                return Err(ImageError::MissingField { field });
            }
        }
        Ok(())
    }
}

/// Read-only view of the image catalog, as the orchestrator sees it.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    async fn lookup(&self, name: &str) -> Option<OsImage>;
}

/// In-memory catalog keyed by image name.
#[derive(Debug, Default)]
pub struct ImageRepository {
    images: RwLock<BTreeMap<String, OsImage>>,
}

impl ImageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog pre-loaded with `images`, failing on the first bad one.
    pub async fn seeded(images: impl IntoIterator<Item = OsImage>) -> FleetResult<Self> {
        let repo = Self::new();
        repo.seed(images).await?;
        Ok(repo)
    }

    pub async fn seed(&self, images: impl IntoIterator<Item = OsImage>) -> FleetResult<()> {
        for image in images {
            self.add_image(image).await?;
        }
        Ok(())
    }

    pub async fn add_image(&self, image: OsImage) -> FleetResult<()> {
        image.validate()?;

        let mut images = self.images.write().await;
        if images.contains_key(&image.name) {
            warn!(image = %image.name, "Rejected duplicate OS image");
            return Err(ImageError::AlreadyExists { name: image.name }.into());
        }

        info!(image = %image.name, version = %image.version, "Registered OS image");
        images.insert(image.name.clone(), image);
        Ok(())
    }

    pub async fn load_image(&self, name: &str) -> Option<OsImage> {
        self.images.read().await.get(name).cloned()
    }

    /// Removing an image leaves VMs created from it untouched.
    pub async fn remove_image(&self, name: &str) -> FleetResult<OsImage> {
        let removed = self.images.write().await.remove(name);
        match removed {
            Some(image) => {
                info!(image = %name, "Removed OS image");
                Ok(image)
            }
            None => Err(ImageError::NotFound { name: name.to_string() }.into()),
        }
    }

    /// Replaces the entry stored under `image.name`. Names are immutable
    /// keys: renaming is a remove followed by an add.
    pub async fn update_image(&self, image: OsImage) -> FleetResult<()> {
        let mut images = self.images.write().await;
        let Some(slot) = images.get_mut(&image.name) else {
            return Err(ImageError::NotFound { name: image.name }.into());
        };
        image.validate()?;

        info!(image = %image.name, version = %image.version, "Updated OS image");
        *slot = image;
        Ok(())
    }

    pub async fn list_images(&self) -> Vec<OsImage> {
        self.images.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ImageCatalog for ImageRepository {
    async fn lookup(&self, name: &str) -> Option<OsImage> {
        let found = self.load_image(name).await;
        debug!(image = %name, found = found.is_some(), "Catalog lookup");
        found
    }
}
