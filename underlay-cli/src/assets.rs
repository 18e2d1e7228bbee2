//! Where jobs come from and where results go: local directories or object
//! stores.

use std::path::{Path, PathBuf};

use anyhow::Context;
use underlay_core::storage::ObjectStore;

pub enum AssetSource {
    Files { input_path: PathBuf },
    Store { store: ObjectStore },
}

impl AssetSource {
    /// File names to process, in stable order, PDFs only.
    pub async fn filenames(&self) -> anyhow::Result<Vec<String>> {
        match self {
            AssetSource::Files { input_path } => {
                if input_path.is_file() {
                    let name = file_name(input_path)?;
                    return Ok(vec![name]);
                }
                let mut names = Vec::new();
                for entry in std::fs::read_dir(input_path)
                    .with_context(|| format!("cannot read {}", input_path.display()))?
                {
                    let entry = entry?;
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.to_lowercase().ends_with(".pdf") {
                        names.push(name);
                    }
                }
                names.sort();
                Ok(names)
            }
            AssetSource::Store { store } => {
                let mut names = store.list_filenames().await?;
                names.sort();
                Ok(names)
            }
        }
    }

    /// Materializes the input file at `local_path`.
    pub async fn fetch(&self, name: &str, local_path: &Path) -> anyhow::Result<()> {
        match self {
            AssetSource::Files { input_path } => {
                let source = if input_path.is_file() {
                    input_path.clone()
                } else {
                    input_path.join(name)
                };
                std::fs::copy(&source, local_path)
                    .with_context(|| format!("cannot copy {}", source.display()))?;
                Ok(())
            }
            AssetSource::Store { store } => {
                store.download(name, local_path).await?;
                Ok(())
            }
        }
    }
}

pub enum AssetTarget {
    Files { output_path: PathBuf },
    Store { store: ObjectStore },
}

impl AssetTarget {
    /// Names already present at the target, for the skip-existing filter.
    pub async fn existing_filenames(&self) -> anyhow::Result<Vec<String>> {
        match self {
            AssetTarget::Files { output_path } => {
                let mut names = Vec::new();
                if output_path.is_dir() {
                    for entry in std::fs::read_dir(output_path)? {
                        names.push(entry?.file_name().to_string_lossy().into_owned());
                    }
                }
                Ok(names)
            }
            AssetTarget::Store { store } => Ok(store.list_filenames().await?),
        }
    }

    pub async fn save(
        &self,
        name: &str,
        local_path: &Path,
        page_count: Option<usize>,
    ) -> anyhow::Result<()> {
        match self {
            AssetTarget::Files { output_path } => {
                std::fs::create_dir_all(output_path)?;
                let destination = output_path.join(name);
                std::fs::copy(local_path, &destination)
                    .with_context(|| format!("cannot write {}", destination.display()))?;
                Ok(())
            }
            AssetTarget::Store { store } => {
                store.upload_pdf(name, local_path, page_count).await?;
                Ok(())
            }
        }
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}
