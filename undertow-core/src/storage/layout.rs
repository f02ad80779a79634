//! Reassembly of the contiguous content store into the declared file layout.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::{ContentStore, StorageError};
use crate::torrent::Manifest;

/// Bytes copied per read from the content store
const COPY_CHUNK: u64 = 1 << 20;

/// Writes every manifest file to `output_dir/<name>/<path...>`.
///
/// A single-file manifest whose only path is its own name lands directly at
/// `output_dir/<name>`. Each file receives the `[offset, offset + length)`
/// range of the store. Returns the directory the files were written under.
///
/// # Errors
///
/// - `StorageError::InvalidPath` - Name or path component is empty, `.` or `..`
/// - `StorageError::OutOfBounds` - File range exceeds the content store
/// - `StorageError::Io` - Directory creation or file write failed
pub async fn assemble_files(
    store: &dyn ContentStore,
    manifest: &Manifest,
    output_dir: &Path,
) -> Result<PathBuf, StorageError> {
    let name = checked_component(&manifest.name, &manifest.name)?;
    let single_file = matches!(manifest.files.as_slice(), [only] if only.path == [name]);
    let root = if single_file {
        output_dir.to_path_buf()
    } else {
        output_dir.join(name)
    };

    for file in &manifest.files {
        let declared: PathBuf = file.path.iter().collect();
        if file.path.is_empty() {
            return Err(StorageError::InvalidPath { path: declared });
        }
        let mut target = root.clone();
        for component in &file.path {
            target.push(checked_component(component, &declared)?);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut output = tokio::fs::File::create(&target).await?;
        let mut copied = 0u64;
        while copied < file.length {
            let chunk = (file.length - copied).min(COPY_CHUNK);
            let bytes = store.read_at(file.offset + copied, chunk as usize).await?;
            output.write_all(&bytes).await?;
            copied += chunk;
        }
        output.flush().await?;
        output.set_len(file.length).await?;

        tracing::debug!(path = %target.display(), length = file.length, "Assembled file");
    }

    tracing::info!(root = %root.display(), files = manifest.files.len(), "Content reassembled");
    Ok(root)
}

fn checked_component<'a>(
    component: &'a str,
    declared: impl AsRef<Path>,
) -> Result<&'a str, StorageError> {
    let invalid = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\');

    if invalid {
        return Err(StorageError::InvalidPath {
            path: declared.as_ref().to_path_buf(),
        });
    }
    Ok(component)
}
