// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use zip::ZipArchive;

pub const SIGNATURE_EXTENSION: &str = "signature";
pub const METADATA_EXTENSION: &str = "metadata";

fn is_cache_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some(SIGNATURE_EXTENSION) | Some(METADATA_EXTENSION)
    )
}

/// Replaces the signature cache contents with the files of a zip archive.
///
/// The archive is opened before anything is deleted, so a corrupt download
/// leaves the existing cache untouched. Files in the directory other than
/// `*.signature` and `*.metadata` are left alone.
pub fn refresh_signature_cache(sig_dir: impl AsRef<Path>, zip_path: impl AsRef<Path>) -> Result<()> {
    let sig_dir = sig_dir.as_ref();
    let zip_path = zip_path.as_ref();

    let file = File::open(zip_path)
        .with_context(|| format!("unable to open signature archive: {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("invalid signature archive: {}", zip_path.display()))?;

    if !sig_dir.exists() {
        std::fs::create_dir_all(sig_dir).with_context(|| {
            format!("unable to create signature directory: {}", sig_dir.display())
        })?;
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(sig_dir)
        .with_context(|| format!("unable to list signature directory: {}", sig_dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_cache_file(&path) {
            std::fs::remove_file(&path)
                .with_context(|| format!("unable to remove signature: {}", path.display()))?;
            removed += 1;
        }
    }
    debug!("removed {} cached signature files", removed);

    archive
        .extract(sig_dir)
        .with_context(|| format!("unable to extract signatures to {}", sig_dir.display()))?;

    info!(
        "refreshed signature cache {} with {} files",
        sig_dir.display(),
        archive.len()
    );

    Ok(())
}
