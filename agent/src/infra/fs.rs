//! Filesystem infrastructure: implements `HostFs`.
//!
//! Writes go to a temp file in the destination directory and are renamed
//! into place, so a reader never sees a half-written unit or binary.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::application::ports::HostFs;

#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    /// uid/gid applied to every written file.
    owner: Option<(u32, u32)>,
}

impl LocalFs {
    pub fn new(owner: Option<(u32, u32)>) -> Self {
        Self { owner }
    }
}

fn parent_of(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", path.display()))
}

/// Atomically replace `dest` with the bytes produced by `fill`.
fn atomic_write(
    dest: &Path,
    mode: u32,
    owner: Option<(u32, u32)>,
    fill: impl FnOnce(&mut std::fs::File) -> std::io::Result<()>,
) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = parent_of(dest)?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    fill(tmp.as_file_mut()).with_context(|| format!("writing {}", dest.display()))?;
    tmp.as_file_mut()
        .flush()
        .with_context(|| format!("flushing {}", dest.display()))?;
    std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting mode on {}", dest.display()))?;
    if let Some((uid, gid)) = owner {
        std::os::unix::fs::chown(tmp.path(), Some(uid), Some(gid))
            .with_context(|| format!("setting owner on {}", dest.display()))?;
    }
    tmp.persist(dest)
        .with_context(|| format!("renaming into {}", dest.display()))?;
    Ok(())
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .with_context(|| format!("spawn_blocking for {what}"))?
}

#[async_trait]
impl HostFs for LocalFs {
    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        let dest = path.to_path_buf();
        let contents = contents.to_vec();
        let owner = self.owner;
        blocking("write_file", move || {
            atomic_write(&dest, mode, owner, |f| f.write_all(&contents))
        })
        .await
    }

    async fn place(&self, src: &Path, dest: &Path, mode: u32) -> Result<()> {
        let (src, dest): (PathBuf, PathBuf) = (src.to_path_buf(), dest.to_path_buf());
        let owner = self.owner;
        blocking("place", move || {
            let mut input = std::fs::File::open(&src)
                .with_context(|| format!("opening {}", src.display()))?;
            atomic_write(&dest, mode, owner, |f| {
                std::io::copy(&mut input, f).map(|_| ())
            })
        })
        .await
    }

    async fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("removing {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("removing directory {}", path.display()))
            }
            _ => Ok(()),
        }
    }
}
