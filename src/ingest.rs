//! Attachment Ingestor.
//!
//! Harvests file attachments from a mailbox into the staging directory the
//! loader reads from. One failing message is logged and skipped; the rest of
//! the batch continues.

use crate::errors::{EtlError, ResultExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MailItem {
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

/// Source of mail items.
pub trait MailSource {
    /// All messages, newest first.
    fn messages(&self) -> Result<Vec<MailItem>, EtlError>;
}

/// A mailbox laid out on disk.
///
/// Each subdirectory of `root` is one message: the directory name is the
/// subject, its modification time the received time, and every regular file
/// inside an attachment.
#[derive(Debug, Clone)]
pub struct DirectoryMailbox {
    root: PathBuf,
}

impl DirectoryMailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_message(&self, dir: &Path) -> Result<MailItem, EtlError> {
        let subject = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let received_at: DateTime<Utc> = std::fs::metadata(dir)?.modified()?.into();

        let mut attachments = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            attachments.push(Attachment {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                content: std::fs::read(entry.path())?,
            });
        }
        attachments.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        Ok(MailItem {
            subject,
            received_at,
            attachments,
        })
    }
}

impl MailSource for DirectoryMailbox {
    fn messages(&self) -> Result<Vec<MailItem>, EtlError> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("opening mailbox {}", self.root.display()))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match self.read_message(&entry.path()) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(
                    "Skipping unreadable message {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }

        items.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.subject.cmp(&b.subject))
        });
        Ok(items)
    }
}

/// Saves every attachment of `item` into `staging_dir`, creating it if needed.
///
/// All names are checked before the first write, so a message with a bad
/// name leaves nothing behind. Returns the written paths.
pub fn download_attachments(item: &MailItem, staging_dir: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let targets = item
        .attachments
        .iter()
        .map(|a| safe_file_name(&a.file_name).map(|name| (staging_dir.join(name), a)))
        .collect::<Result<Vec<_>, _>>()?;

    std::fs::create_dir_all(staging_dir)
        .with_context(|| format!("creating staging directory {}", staging_dir.display()))?;

    let mut written = Vec::with_capacity(targets.len());
    for (path, attachment) in targets {
        std::fs::write(&path, &attachment.content)
            .with_context(|| format!("saving attachment {}", path.display()))?;
        tracing::info!("Attachment {} saved to {}", attachment.file_name, path.display());
        written.push(path);
    }
    Ok(written)
}

/// Attachment names must not escape the staging directory.
fn safe_file_name(name: &str) -> Result<&str, EtlError> {
    let file_name = Path::new(name).file_name().and_then(|n| n.to_str());
    match file_name {
        Some(n) if n == name && n != "." && n != ".." => Ok(n),
        _ => Err(EtlError::Format(format!(
            "attachment name '{}' is not a plain file name",
            name
        ))),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestReport {
    pub messages_processed: usize,
    pub messages_failed: usize,
    pub files_saved: Vec<PathBuf>,
}

/// Downloads attachments of every message, newest first.
///
/// When several messages carry a file with the same name, the newest one is
/// kept. Per-message failures are logged and counted.
pub fn harvest<S: MailSource + ?Sized>(
    source: &S,
    staging_dir: &Path,
) -> Result<HarvestReport, EtlError> {
    let mut report = HarvestReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for mut item in source.messages()? {
        if item.attachments.is_empty() {
            continue;
        }
        tracing::info!("Processing email: {}", item.subject);

        item.attachments.retain(|a| {
            let fresh = !seen.contains(&a.file_name);
            if !fresh {
                tracing::debug!(
                    "Ignoring older copy of {} from '{}'",
                    a.file_name,
                    item.subject
                );
            }
            fresh
        });

        match download_attachments(&item, staging_dir) {
            Ok(paths) => {
                // A name is claimed only once its message is saved.
                seen.extend(item.attachments.iter().map(|a| a.file_name.clone()));
                report.messages_processed += 1;
                report.files_saved.extend(paths);
            }
            Err(e) => {
                tracing::warn!("Error processing email '{}': {}", item.subject, e);
                report.messages_failed += 1;
            }
        }
    }

    tracing::info!(
        "Harvest complete: {} messages processed, {} failed, {} files saved",
        report.messages_processed,
        report.messages_failed,
        report.files_saved.len()
    );
    Ok(report)
}
