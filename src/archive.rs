//! Conversion of zip packages into tar streams for container injection.
//!
//! The container runtime only accepts tar archives, while packages arrive
//! from the grading service as zip files. [`TarStream`] produces the tar
//! incrementally: one chunk per copied file followed by the end-of-archive
//! marker, so the copy into the container can start before the whole
//! archive exists.

use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use zip::ZipArchive;

use crate::error::TranscodeError;

/// Directory every package entry is placed under
pub const PACKAGE_ROOT: &str = "package";

/// Mode given to every file copied into the tar
pub const ENTRY_MODE: u32 = 0o664;

/// Chunks the transcoder may run ahead of the body's consumer
const BODY_BUFFER: usize = 4;

/// A finite, non-restartable sequence of tar chunks built from a zip package
pub struct TarStream {
    zip: ZipArchive<Cursor<Bytes>>,
    next_index: usize,
    builder: Option<tar::Builder<Vec<u8>>>,
}

impl TarStream {
    /// Opens the zip central directory; fails if the input is not a zip archive
    pub fn new(package: Bytes) -> Result<Self, TranscodeError> {
        let zip = ZipArchive::new(Cursor::new(package))?;
        Ok(Self {
            zip,
            next_index: 0,
            builder: Some(tar::Builder::new(Vec::new())),
        })
    }

    /// Converts the stream into an infallible byte stream for runtimes that
    /// cannot carry errors through their request body. The first transcoding
    /// error ends the body and is kept in the returned [`TranscodeFailure`].
    ///
    /// Inflation runs on the blocking pool, at most a few chunks ahead of the
    /// consumer. Must be called from within a tokio runtime.
    pub fn into_body(self) -> (BoxStream<'static, Bytes>, TranscodeFailure) {
        let failure = TranscodeFailure::default();
        let slot = failure.clone();
        let (tx, rx) = mpsc::channel(BODY_BUFFER);

        tokio::task::spawn_blocking(move || {
            for chunk in self {
                match chunk {
                    Ok(bytes) => {
                        if tx.blocking_send(bytes).is_err() {
                            // Consumer hung up
                            return;
                        }
                    }
                    Err(e) => {
                        // Recorded before the sender drops
                        slot.record(e);
                        return;
                    }
                }
            }
        });

        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();

        (body, failure)
    }

    /// Appends entry `index` to the builder. Returns false for skipped entries.
    fn append_entry(
        zip: &mut ZipArchive<Cursor<Bytes>>,
        builder: &mut tar::Builder<Vec<u8>>,
        index: usize,
    ) -> Result<bool, TranscodeError> {
        let mut file = zip.by_index(index)?;
        if !file.is_file() {
            return Ok(false);
        }

        let relative = safe_relative_path(file.name())?;
        let declared = file.size();
        let mtime = entry_mtime(file.last_modified());

        // Header size must equal the bytes written
        let mut content = Vec::new();
        (&mut file)
            .take(declared.saturating_add(1))
            .read_to_end(&mut content)?;
        let actual = content.len() as u64;
        if actual != declared {
            return Err(TranscodeError::SizeMismatch {
                name: file.name().to_string(),
                declared,
                actual,
            });
        }

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(actual);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(mtime);

        builder.append_data(
            &mut header,
            Path::new(PACKAGE_ROOT).join(relative),
            content.as_slice(),
        )?;
        Ok(true)
    }
}

impl Iterator for TarStream {
    type Item = Result<Bytes, TranscodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let builder = self.builder.as_mut()?;

        while self.next_index < self.zip.len() {
            let index = self.next_index;
            self.next_index += 1;

            match Self::append_entry(&mut self.zip, builder, index) {
                Ok(true) => return Some(Ok(Bytes::from(std::mem::take(builder.get_mut())))),
                Ok(false) => continue,
                Err(e) => {
                    self.builder = None;
                    return Some(Err(e));
                }
            }
        }

        // Every entry has been copied: emit the end-of-archive marker once
        let builder = self.builder.take()?;
        Some(
            builder
                .into_inner()
                .map(Bytes::from)
                .map_err(TranscodeError::from),
        )
    }
}

/// Holds the first error raised while a [`TarStream`] body was consumed
#[derive(Clone, Default)]
pub struct TranscodeFailure(Arc<Mutex<Option<TranscodeError>>>);

impl TranscodeFailure {
    fn record(&self, err: TranscodeError) {
        self.0.lock().get_or_insert(err);
    }

    pub fn take(&self) -> Option<TranscodeError> {
        self.0.lock().take()
    }
}

/// Returns the contents of the first entry of a tar archive, or `None` if the
/// archive has no entries.
pub fn first_entry(archive: &[u8]) -> Result<Option<Vec<u8>>, TranscodeError> {
    let mut archive = tar::Archive::new(archive);
    let Some(entry) = archive.entries()?.next() else {
        return Ok(None);
    };

    let mut content = Vec::new();
    entry?.read_to_end(&mut content)?;
    Ok(Some(content))
}

/// Seconds since the epoch for a zip timestamp, or now if the entry has none
fn entry_mtime(modified: Option<zip::DateTime>) -> u64 {
    let seconds = modified
        .and_then(|t| {
            chrono::NaiveDate::from_ymd_opt(t.year().into(), t.month().into(), t.day().into())?
                .and_hms_opt(t.hour().into(), t.minute().into(), t.second().into())
        })
        .map(|t| t.and_utc().timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    u64::try_from(seconds).unwrap_or(0)
}

/// Rejects entry names that are absolute or walk out of the package root
fn safe_relative_path(name: &str) -> Result<PathBuf, TranscodeError> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(TranscodeError::UnsafePath(name.to_string())),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(TranscodeError::UnsafePath(name.to_string()));
    }
    Ok(relative)
}
