//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Directory where downloaded models are cached.
pub fn model_cache_dir() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("no cache directory on this platform")?
        .join("signcam");
    std::fs::create_dir_all(&dir)?;

    Ok(dir)
}

/// Resolve the model file, downloading it into the cache if it is missing.
///
/// An existing `model` path is used as is. Otherwise, the file name of `model` is looked up in
/// the cache directory and fetched from `url` when not cached yet.
pub async fn ensure_model(model: &Path, url: Option<&str>) -> Result<PathBuf> {
    if model.exists() {
        return Ok(model.to_owned());
    }

    let file_name = model
        .file_name()
        .with_context(|| format!("invalid model path {:?}", model))?;
    let cached = model_cache_dir()?.join(file_name);
    if cached.exists() {
        log::info!("Using cached model {:?}", &cached);
        return Ok(cached);
    }

    match url {
        Some(url) => {
            log::info!("Downloading model from {} to {:?}", url, &cached);
            // Download next to the target first so an interrupted download is not picked up
            let partial = cached.with_extension("part");
            download_file(&Client::new(), url, &partial).await?;
            std::fs::rename(&partial, &cached)?;
            Ok(cached)
        }
        None => bail!("model {:?} not found and no download URL given", model),
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[tokio::test]
    async fn test_existing_model_is_used() -> Result<()> {
        let path = std::env::temp_dir().join(format!("hand_sender_model_{}.onnx", std::process::id()));
        File::create(&path)?;

        let resolved = ensure_model(&path, None).await;
        std::fs::remove_file(&path)?;

        assert_eq!(resolved?, path);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_model_without_url() {
        let path = Path::new("/nonexistent/signcam_model_that_does_not_exist.onnx");

        assert!(ensure_model(path, None).await.is_err());
    }
}
