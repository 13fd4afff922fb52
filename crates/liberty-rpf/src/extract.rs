//! Bulk archive-to-loose-files extraction.
//!
//! Entries are fed through a bounded queue to a fixed set of scoped
//! worker threads. The archive file handle is shared behind one mutex that
//! covers the seek+read pair; decryption, decompression and writing run
//! unlocked. A [`MemoryBudget`] caps the bytes held by in-flight entries.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::bounded;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::budget::MemoryBudget;
use crate::crypto::{self, RpfKey};
use crate::decompress;
use crate::entry::{self, RpfEntry};
use crate::header::{self, RpfHeader, HEADER_SIZE, TOC_OFFSET};
use crate::{Error, Result};

/// Default memory budget for in-flight buffers (512 MiB).
pub const DEFAULT_MEMORY_BUDGET: u64 = 512 * 1024 * 1024;

/// Minimum worker count when the thread count is derived from the host.
const MIN_WORKERS: usize = 4;

/// Extraction tuning.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Worker threads. 0 uses the host parallelism, at least 4.
    pub threads: usize,
    /// Byte capacity of the in-flight buffer budget.
    pub memory_budget: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }
}

impl ExtractOptions {
    /// Effective number of workers.
    pub fn worker_count(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(MIN_WORKERS)
    }
}

/// Outcome of one extraction call.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    /// True when every entry was written.
    pub success: bool,
    /// Directory the entries were written to.
    pub output_dir: PathBuf,
    pub files_extracted: usize,
    pub bytes_extracted: u64,
    /// Number of entries that failed.
    pub errors: usize,
    /// Summary when `success` is false.
    pub error_message: Option<String>,
}

impl ExtractionResult {
    fn failed(output_dir: &Path, message: String) -> Self {
        Self {
            success: false,
            output_dir: output_dir.to_path_buf(),
            error_message: Some(message),
            ..Default::default()
        }
    }
}

/// Shared state of one extraction run.
struct Job<'a> {
    file: Mutex<File>,
    archive_len: u64,
    output_dir: &'a Path,
    key: Option<&'a RpfKey>,
    budget: MemoryBudget,
    total: usize,
    files_extracted: AtomicUsize,
    bytes_extracted: AtomicU64,
    errors: AtomicUsize,
    progress: &'a (dyn Fn(f32) + Sync),
}

impl Job<'_> {
    fn run(&self, entry: &RpfEntry) {
        let _held = self.budget.acquire(2 * entry.max_len());

        match self.extract_entry(entry) {
            Ok(written) => {
                let done = self.files_extracted.fetch_add(1, Ordering::Relaxed) + 1;
                self.bytes_extracted.fetch_add(written, Ordering::Relaxed);
                (self.progress)(done as f32 / self.total as f32);
            }
            Err(e) => {
                warn!("Failed to extract {}: {}", entry.name, e);
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn extract_entry(&self, entry: &RpfEntry) -> Result<u64> {
        let relative = entry.output_path()?;
        entry.check_bounds(self.archive_len)?;

        let mut data = vec![0u8; entry.stored_len() as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset as u64))?;
            file.read_exact(&mut data)?;
        }

        if entry.is_encrypted {
            if let Some(key) = self.key {
                crypto::decrypt_body(key.as_bytes(), &mut data);
            }
        }
        if entry.is_compressed {
            data = decompress::decompress_entry(data, entry.size as usize);
        }

        let out_path = self.output_dir.join(relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, &data)?;

        Ok(data.len() as u64)
    }
}

/// Parse the header and TOC of an archive on disk.
pub fn read_archive_index(file: &mut File, key: Option<&RpfKey>) -> Result<(RpfHeader, Vec<RpfEntry>)> {
    let archive_len = file.metadata()?.len();

    let mut head = [0u8; HEADER_SIZE];
    let head_len = read_up_to(file, 0, &mut head)?;
    let header = header::parse_header(&head[..head_len])?;

    let available = archive_len.saturating_sub(TOC_OFFSET);
    let mut toc = vec![0u8; (header.toc_size as u64).min(available) as usize];
    let toc_len = read_up_to(file, TOC_OFFSET, &mut toc)?;
    toc.truncate(toc_len);

    if header.encrypted {
        match key {
            Some(key) => crypto::decrypt_toc_block(key.as_bytes(), &mut toc, 0),
            None => debug!("TOC is encrypted but no key is available; reading as-is"),
        }
    }

    let entries = entry::list_toc_entries(&toc, header.entry_count);
    Ok((header, entries))
}

fn read_up_to(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Extract every file entry of `archive_path` into `output_dir`.
///
/// A failing entry is counted and skipped; it never aborts the rest of
/// the run. `progress` receives `files_extracted / total` after each
/// written entry and a final `1.0`.
pub fn extract_archive<P: AsRef<Path>, Q: AsRef<Path>>(
    archive_path: P,
    output_dir: Q,
    key: Option<&RpfKey>,
    options: &ExtractOptions,
    progress: &(dyn Fn(f32) + Sync),
) -> ExtractionResult {
    let archive_path = archive_path.as_ref();
    let output_dir = output_dir.as_ref();

    let mut file = match File::open(archive_path) {
        Ok(f) => f,
        Err(e) => {
            return ExtractionResult::failed(
                output_dir,
                format!("Failed to open {}: {}", archive_path.display(), e),
            )
        }
    };

    let (archive_len, entries) = match file
        .metadata()
        .map_err(Error::from)
        .and_then(|m| Ok((m.len(), read_archive_index(&mut file, key)?.1)))
    {
        Ok(v) => v,
        Err(e) => {
            return ExtractionResult::failed(
                output_dir,
                format!("Failed to read {}: {}", archive_path.display(), e),
            )
        }
    };

    if entries.is_empty() {
        return ExtractionResult::failed(output_dir, "No entries found in RPF".to_string());
    }
    let files: Vec<&RpfEntry> = entries.iter().filter(|e| !e.is_directory).collect();

    if let Err(e) = create_directory_tree(output_dir, &entries) {
        return ExtractionResult::failed(
            output_dir,
            format!("Failed to create {}: {}", output_dir.display(), e),
        );
    }

    let workers = options.worker_count();
    info!(
        "Extracting {} files from {} with {} workers",
        files.len(),
        archive_path.display(),
        workers
    );

    let job = Job {
        file: Mutex::new(file),
        archive_len,
        output_dir,
        key,
        budget: MemoryBudget::new(options.memory_budget),
        total: files.len(),
        files_extracted: AtomicUsize::new(0),
        bytes_extracted: AtomicU64::new(0),
        errors: AtomicUsize::new(0),
        progress,
    };

    let (tx, rx) = bounded::<&RpfEntry>(workers * 2);
    std::thread::scope(|s| {
        for _ in 0..workers {
            let rx = rx.clone();
            let job = &job;
            s.spawn(move || {
                for entry in rx {
                    job.run(entry);
                }
            });
        }
        drop(rx);

        for entry in files.iter().copied() {
            if tx.send(entry).is_err() {
                break;
            }
        }
        drop(tx);
    });

    progress(1.0);

    let files_extracted = job.files_extracted.into_inner();
    let errors = job.errors.into_inner();
    let bytes_extracted = job.bytes_extracted.into_inner();

    info!(
        "Extracted {} files ({} bytes), {} errors",
        files_extracted, bytes_extracted, errors
    );

    ExtractionResult {
        success: errors == 0,
        output_dir: output_dir.to_path_buf(),
        files_extracted,
        bytes_extracted,
        errors,
        error_message: (errors > 0).then(|| format!("Failed to extract {} files", errors)),
    }
}

/// Pre-create the output root and every directory entry beneath it.
fn create_directory_tree(output_dir: &Path, entries: &[RpfEntry]) -> std::io::Result<()> {
    fs::create_dir_all(output_dir)?;

    for dir in entries.iter().filter(|e| e.is_directory && !e.name.is_empty()) {
        match dir.output_path() {
            Ok(relative) => fs::create_dir_all(output_dir.join(relative))?,
            Err(e) => debug!("Skipping directory {}: {}", dir.name, e),
        }
    }
    Ok(())
}
