use log::{debug, info};
use regex::Regex;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::DownloadError;
use crate::extractor::AttachmentDescriptor;
use crate::provider::MessageRef;

/// Subjects longer than this are cut before entering a folder name.
const SUBJECT_MAX_CHARS: usize = 40;

/// How many trailing characters of the message id go into the folder name.
/// Enough to keep folders unique even for identical date and subject.
const ID_SUFFIX_CHARS: usize = 8;

/// What happened while writing one message's attachments.
#[derive(Debug)]
pub struct WriteOutcome {
    pub folder: String,
    pub saved: Vec<String>,
    pub failures: Vec<String>,
}

/// Writes attachments under the download root, one folder per message.
pub struct StorageWriter {
    root: PathBuf,
    unsafe_chars: Regex,
}

impl StorageWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StorageWriter {
            root: root.into(),
            // Same character class the filesystems we care about reject,
            // plus control characters
            unsafe_chars: Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#)
                .expect("invalid filename sanitization regex"),
        }
    }

    /// Destination folder for one message:
    /// `{YYYY-MM-DD}_{truncated sanitized subject}_{id suffix}`.
    pub fn folder_name(&self, meta: &MessageRef) -> String {
        let date = meta.internal_date.format("%Y-%m-%d");

        let subject: String = self
            .sanitize(&meta.subject)
            .chars()
            .take(SUBJECT_MAX_CHARS)
            .collect();
        let subject = subject.trim().trim_matches('.');
        let subject = if subject.is_empty() {
            "no-subject"
        } else {
            subject
        };

        format!("{}_{}_{}", date, subject, id_suffix(&meta.id))
    }

    /// Replace path-unsafe characters with underscores.
    pub fn sanitize(&self, name: &str) -> String {
        self.unsafe_chars.replace_all(name, "_").to_string()
    }

    /// Write all attachments of one message into its folder.
    ///
    /// A folder left over from a previous run is a resume point, not an
    /// error. A failed attachment is reported in the outcome and does not
    /// stop the remaining ones.
    pub fn write_attachments(
        &self,
        meta: &MessageRef,
        attachments: &[AttachmentDescriptor],
    ) -> Result<WriteOutcome, DownloadError> {
        let folder = self.folder_name(meta);
        let dir = self.root.join(&folder);

        fs::create_dir_all(&dir).map_err(|e| DownloadError::write(&dir, e))?;

        let mut saved = Vec::new();
        let mut failures = Vec::new();

        for attachment in attachments {
            match self.write_one(&dir, attachment) {
                Ok(file_name) => {
                    info!(
                        "💾 Saved {} ({} bytes) into {}",
                        file_name, attachment.size_bytes, folder
                    );
                    saved.push(file_name);
                }
                Err(e) => {
                    failures.push(format!("{}: {}", attachment.filename, e));
                }
            }
        }

        Ok(WriteOutcome {
            folder,
            saved,
            failures,
        })
    }

    /// Write one attachment, disambiguating its name against files already
    /// in the folder. The bytes go through a temp file in the same folder
    /// and are persisted with a rename, so the target is either fully
    /// written or absent.
    fn write_one(
        &self,
        dir: &Path,
        attachment: &AttachmentDescriptor,
    ) -> Result<String, DownloadError> {
        let safe_name = self.sanitize(&attachment.filename);
        let safe_name = if safe_name.trim().is_empty() {
            "attachment".to_string()
        } else {
            safe_name
        };

        let path = unique_path(dir, &safe_name);
        debug!("Writing attachment to {:?}", path);

        let mut tmp =
            NamedTempFile::new_in(dir).map_err(|e| DownloadError::write(&path, e))?;
        tmp.write_all(&attachment.payload)
            .map_err(|e| DownloadError::write(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| DownloadError::write(&path, e.error))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(safe_name);

        Ok(file_name)
    }
}

/// First free path for `name` in `dir`, appending `_1`, `_2`, ... before
/// the extension on collision (`report.pdf` becomes `report_1.pdf`).
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let mut candidate = dir.join(name);
    let (stem, ext) = split_extension(name);
    let mut counter = 1;

    while candidate.exists() {
        candidate = dir.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }

    candidate
}

/// Split `name.ext` into (`name`, `.ext`); a leading dot is not an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

fn id_suffix(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    let start = chars.len().saturating_sub(ID_SUFFIX_CHARS);
    chars[start..].iter().collect()
}
