//! File operations from the command line.

use anyhow::{Context, Result};
use std::path::Path;

use filequota::file::{ExtrasPatch, NewFile, StoredFile};
use filequota::utils::format_bytes;

use super::Engine;

/// Arguments of `filequota put`.
pub struct PutArgs<'a> {
    pub tenant: &'a str,
    pub file: &'a Path,
    pub object_id: Option<&'a str>,
    pub folder: Option<&'a str>,
    pub actor: &'a str,
    /// Publish for this many hours after upload.
    pub publish_hours: Option<i64>,
}

/// Upload a local file.
pub async fn put(engine: &Engine, args: PutArgs<'_>) -> Result<()> {
    let data = tokio::fs::read(args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File name is not valid UTF-8")?;

    let mut extras = ExtrasPatch::default();
    if let Some(folder) = args.folder {
        extras = extras.folder_path(folder);
    }

    let input = NewFile::new(args.object_id.unwrap_or(args.tenant), args.tenant, name, data)
        .extras(extras)
        .actor(args.actor)
        .with_thumbnail();
    let file = engine.files.create(input).await?;
    print_file(&file);

    if let Some(hours) = args.publish_hours {
        let link = engine.files.generate_public_url(file.id(), hours).await?;
        println!("Public URL: {}", link.url);
    }
    Ok(())
}

/// List the files of a tenant.
pub async fn list(engine: &Engine, tenant: &str) -> Result<()> {
    let files = engine.files.list_by_owner(tenant).await?;
    if files.is_empty() {
        println!("No files for '{tenant}'");
        return Ok(());
    }
    for file in &files {
        print_file(file);
    }
    Ok(())
}

/// Delete a file and release its quota.
pub async fn remove(engine: &Engine, id: &str, actor: &str) -> Result<()> {
    let file = engine.files.delete(id, actor).await?;
    println!(
        "Deleted {} ({})",
        file.record.name,
        format_bytes(u64::try_from(file.record.size).unwrap_or_default())
    );
    Ok(())
}

fn print_file(file: &StoredFile) {
    println!(
        "{}  {:>10}  {}  {}",
        file.id(),
        format_bytes(u64::try_from(file.record.size).unwrap_or_default()),
        file.record.content_type,
        file.record.path
    );
}
