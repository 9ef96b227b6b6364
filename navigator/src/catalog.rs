use std::path::{Path, PathBuf};

use campus_nav_lib::location::{CatalogError, LocationCatalog};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("failed to read catalog {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Invalid(#[from] CatalogError),
}

/// Loads the static catalog once at startup.
pub async fn load_catalog(path: &Path) -> Result<LocationCatalog, CatalogLoadError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|source| CatalogLoadError::Io {
        path: path.to_owned(),
        source,
    })?;

    let catalog = LocationCatalog::from_json(&json)?;
    tracing::info!(
        "Loaded {} locations in {} categories from {:?}",
        catalog.len(),
        catalog.categories().len(),
        path
    );

    Ok(catalog)
}
