use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::docker::build;
use crate::error::CoordinatorError;

/// Everything produced by the upload/build stage, ready for dispatch.
pub struct BuiltImage {
    pub image_tag: String,
}

/// §4.2: persist the bundle, extract it if it's a zip, locate the build
/// context, build the image, and push it if push is enabled.
pub async fn upload_and_build(
    bundle_bytes: Vec<u8>,
    filename: &str,
    config: &CoordinatorConfig,
) -> Result<BuiltImage, CoordinatorError> {
    let scratch_dir = fresh_scratch_dir()?;
    let file_path = scratch_dir.join(filename);
    fs::write(&file_path, &bundle_bytes)
        .map_err(|e| CoordinatorError::BadRequest(format!("failed to persist upload: {e}")))?;

    if filename.to_ascii_lowercase().ends_with(".zip") {
        extract_zip(&file_path, &scratch_dir)
            .map_err(|e| CoordinatorError::BadBundle(format!("failed to unzip: {e}")))?;
        let _ = fs::remove_file(&file_path);
    }

    let build_context = locate_build_context(&scratch_dir)?;

    let image_tag = format!("user_code_image_{}", &Uuid::new_v4().simple().to_string()[..8]);

    build::build_image(&build_context, &image_tag)
        .await
        .map_err(|e| CoordinatorError::BuildFailed(e.to_string()))?;

    if config.should_push() {
        let username = config.docker_username.as_deref().unwrap_or_default();
        let password = config.docker_password.as_deref().unwrap_or_default();
        build::push_image(&image_tag, username, password)
            .await
            .map_err(|e| CoordinatorError::PushFailed(e.to_string()))?;
    }

    Ok(BuiltImage { image_tag })
}

fn fresh_scratch_dir() -> Result<PathBuf, CoordinatorError> {
    let dir = std::env::temp_dir().join(format!("code_upload_{}", Uuid::new_v4()));
    fs::create_dir_all(&dir)
        .map_err(|e| CoordinatorError::BadRequest(format!("failed to create scratch dir: {e}")))?;
    Ok(dir)
}

fn extract_zip(zip_path: &Path, dest: &Path) -> anyhow::Result<()> {
    let bytes = fs::read(zip_path)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    archive.extract(dest)?;
    Ok(())
}

/// Locate the Dockerfile: at the scratch root, or in a single top-level
/// subdirectory. Anything else is `BadBundle`.
fn locate_build_context(scratch_dir: &Path) -> Result<PathBuf, CoordinatorError> {
    if scratch_dir.join("Dockerfile").exists() {
        return Ok(scratch_dir.to_path_buf());
    }

    let subdirs: Vec<PathBuf> = fs::read_dir(scratch_dir)
        .map_err(|e| CoordinatorError::BadBundle(format!("failed to read scratch dir: {e}")))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();

    if subdirs.len() == 1 && subdirs[0].join("Dockerfile").exists() {
        return Ok(subdirs[0].clone());
    }

    Err(CoordinatorError::BadBundle(
        "cannot locate a Dockerfile at the bundle root or in a single top-level subdirectory"
            .to_string(),
    ))
}
