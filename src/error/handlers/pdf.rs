/// PDF fault recovery: validation, password dictionary, alternate extraction, quarantine
///
/// Inputs that cannot be recovered are moved out of the pipeline into
/// `<quarantine_root>/<instance>/<reason>/<timestamp>_<name>` with a sidecar
/// `<file>.metadata.json` describing where the file came from and why it was isolated.
use super::HandlerOutcome;
use crate::error::classification::ProcessingError;
use crate::error::taxonomy::ErrorType;
use crate::settings::PdfConfig;
use crate::{SentinelError, SentinelResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const PDF_HEADER: &[u8] = b"%PDF-";
const PDF_TRAILER: &[u8] = b"%%EOF";
const TRAILER_SCAN_BYTES: u64 = 1024;
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Parsing backend used for password attempts and alternate extraction
#[cfg_attr(test, mockall::automock)]
pub trait PdfBackend: Send + Sync {
    /// Whether the document opens with `password`
    fn try_password(&self, path: &Path, password: &str) -> SentinelResult<bool>;

    /// Extract text with the alternate method numbered `method`
    fn extract_text(&self, path: &Path, method: usize) -> SentinelResult<String>;

    fn method_name(&self, method: usize) -> String;
}

/// Dependency-free backend working on uncompressed content streams
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicPdfBackend;

impl HeuristicPdfBackend {
    /// Text shown with `Tj`/`TJ` operators: literal strings inside BT..ET blocks
    fn literal_strings(content: &[u8]) -> String {
        let mut text = String::new();
        let mut in_text_block = false;
        let mut depth = 0usize;
        let mut current = Vec::new();
        let mut i = 0;

        while i < content.len() {
            let byte = content[i];
            if depth == 0 {
                if content[i..].starts_with(b"BT") {
                    in_text_block = true;
                } else if content[i..].starts_with(b"ET") {
                    in_text_block = false;
                }
            }

            if in_text_block {
                match byte {
                    b'\\' if depth > 0 => {
                        if let Some(next) = content.get(i + 1) {
                            current.push(*next);
                        }
                        i += 1;
                    }
                    b'(' => {
                        if depth > 0 {
                            current.push(byte);
                        }
                        depth += 1;
                    }
                    b')' if depth > 0 => {
                        depth -= 1;
                        if depth == 0 {
                            text.push_str(&String::from_utf8_lossy(&current));
                            text.push(' ');
                            current.clear();
                        } else {
                            current.push(byte);
                        }
                    }
                    _ if depth > 0 => current.push(byte),
                    _ => {}
                }
            }
            i += 1;
        }

        text.trim().to_string()
    }

    /// Runs of printable ASCII outside PDF syntax
    fn printable_runs(content: &[u8]) -> String {
        content
            .split(|b| !(b.is_ascii_alphanumeric() || *b == b' ' || b.is_ascii_punctuation()))
            .filter(|run| run.len() >= 8)
            .map(String::from_utf8_lossy)
            .filter(|run| {
                let letters = run.chars().filter(|c| c.is_ascii_alphabetic()).count();
                !run.starts_with('/') && !run.contains("obj") && letters * 2 > run.len()
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl PdfBackend for HeuristicPdfBackend {
    fn try_password(&self, path: &Path, _password: &str) -> SentinelResult<bool> {
        let content = fs::read(path)?;
        // No decryption support: only documents without an /Encrypt dictionary open
        Ok(!content.windows(8).any(|w| w == b"/Encrypt"))
    }

    fn extract_text(&self, path: &Path, method: usize) -> SentinelResult<String> {
        let content = fs::read(path)?;
        match method {
            0 => Ok(Self::literal_strings(&content)),
            1 => Ok(Self::printable_runs(&content)),
            other => Err(SentinelError::ActionFailed {
                action: "extract_text".to_string(),
                reason: format!("no extraction method {}", other),
            }),
        }
    }

    fn method_name(&self, method: usize) -> String {
        match method {
            0 => "literal_strings".to_string(),
            1 => "printable_runs".to_string(),
            other => format!("method_{}", other),
        }
    }
}

/// Outcome of structural validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfValidation {
    pub is_valid: bool,
    pub issue: Option<String>,
    pub size_bytes: u64,
}

impl PdfValidation {
    fn invalid(issue: &str, size_bytes: u64) -> Self {
        Self {
            is_valid: false,
            issue: Some(issue.to_string()),
            size_bytes,
        }
    }
}

/// Quarantine subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    Corrupt,
    Encrypted,
    NoText,
    ExtractionFailed,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::Corrupt => "corrupt",
            QuarantineReason::Encrypted => "encrypted",
            QuarantineReason::NoText => "no_text",
            QuarantineReason::ExtractionFailed => "extraction_failed",
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sidecar metadata written next to every quarantined file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub original_path: PathBuf,
    pub quarantined_path: PathBuf,
    pub reason: QuarantineReason,
    pub detail: String,
    pub error_type: ErrorType,
    pub error_id: String,
    pub instance: String,
    pub quarantined_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub sha256: Option<String>,
}

impl QuarantineRecord {
    pub fn sidecar_path(quarantined: &Path) -> PathBuf {
        let mut name = quarantined
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".metadata.json");
        quarantined.with_file_name(name)
    }
}

#[derive(Debug, Default)]
struct HashCache {
    by_hash: HashMap<String, PathBuf>,
    order: VecDeque<String>,
}

/// PDF error handler
pub struct PdfHandler {
    instance: String,
    quarantine_root: PathBuf,
    config: PdfConfig,
    backend: Arc<dyn PdfBackend>,
    hashes: Mutex<HashCache>,
}

impl PdfHandler {
    pub fn new(
        instance: impl Into<String>,
        quarantine_root: impl Into<PathBuf>,
        config: PdfConfig,
    ) -> Self {
        Self::with_backend(instance, quarantine_root, config, Arc::new(HeuristicPdfBackend))
    }

    pub fn with_backend(
        instance: impl Into<String>,
        quarantine_root: impl Into<PathBuf>,
        config: PdfConfig,
        backend: Arc<dyn PdfBackend>,
    ) -> Self {
        Self {
            instance: instance.into(),
            quarantine_root: quarantine_root.into(),
            config,
            backend,
            hashes: Mutex::new(HashCache::default()),
        }
    }

    /// Quarantine directory for this instance
    pub fn instance_quarantine(&self) -> PathBuf {
        self.quarantine_root.join(&self.instance)
    }

    /// Apply the mitigation for a PDF error
    pub fn handle(&self, error: &ProcessingError) -> HandlerOutcome {
        let Some(path) = error.context.file_path.as_deref() else {
            return HandlerOutcome::Unrecovered("no file path in error context".to_string());
        };

        match error.error_type {
            ErrorType::PdfCorrupt => self.handle_corrupt(error, path),
            ErrorType::PdfEncrypted => self.handle_encrypted(error, path),
            ErrorType::PdfParseFailed | ErrorType::PdfTextExtractionFailed => {
                self.try_alternate_extraction(error, path)
            }
            other => HandlerOutcome::Unrecovered(format!("{} is not a PDF error", other)),
        }
    }

    fn handle_corrupt(&self, error: &ProcessingError, path: &Path) -> HandlerOutcome {
        let validation = Self::validate(path);
        match validation.issue {
            Some(issue) if !path.exists() => HandlerOutcome::Unrecovered(issue),
            Some(issue) => {
                tracing::warn!(path = %path.display(), issue = %issue, "PDF corruption confirmed");
                self.quarantine_outcome(error, path, QuarantineReason::Corrupt, &issue)
            }
            None => {
                tracing::info!(path = %path.display(), "PDF validates; retrying with alternate parser");
                self.try_alternate_extraction(error, path)
            }
        }
    }

    fn handle_encrypted(&self, error: &ProcessingError, path: &Path) -> HandlerOutcome {
        for password in &self.config.common_passwords {
            match self.backend.try_password(path, password) {
                Ok(true) => {
                    tracing::info!(path = %path.display(), "PDF opened with a common password");
                    return HandlerOutcome::Recovered("opened with a common password".to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Password attempt failed");
                }
            }
        }

        self.quarantine_outcome(
            error,
            path,
            QuarantineReason::Encrypted,
            "no common password opened the document",
        )
    }

    fn try_alternate_extraction(&self, error: &ProcessingError, path: &Path) -> HandlerOutcome {
        let mut ran_cleanly = false;
        let mut failures = Vec::new();

        for method in 0..self.config.max_alternate_attempts as usize {
            let name = self.backend.method_name(method);
            match self.backend.extract_text(path, method) {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::info!(
                        path = %path.display(),
                        method = %name,
                        chars = text.len(),
                        "Alternate extraction succeeded"
                    );
                    return HandlerOutcome::Recovered(format!(
                        "alternate method {} extracted {} chars",
                        name,
                        text.len()
                    ));
                }
                Ok(_) => ran_cleanly = true,
                Err(e) => failures.push(format!("{}: {}", name, e)),
            }
        }

        let (reason, detail) = if ran_cleanly {
            (QuarantineReason::NoText, "alternate methods found no text".to_string())
        } else {
            (
                QuarantineReason::ExtractionFailed,
                format!("alternate methods failed: {}", failures.join("; ")),
            )
        };
        self.quarantine_outcome(error, path, reason, &detail)
    }

    fn quarantine_outcome(
        &self,
        error: &ProcessingError,
        path: &Path,
        reason: QuarantineReason,
        detail: &str,
    ) -> HandlerOutcome {
        match self.quarantine(error, path, reason, detail) {
            Ok(record) => HandlerOutcome::Quarantined(record.quarantined_path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Quarantine failed");
                HandlerOutcome::Unrecovered(e.to_string())
            }
        }
    }

    /// Structural checks: exists, non-empty, `%PDF-` header, `%%EOF` near the end
    pub fn validate(path: &Path) -> PdfValidation {
        let size_bytes = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return PdfValidation::invalid("File does not exist", 0),
        };
        if size_bytes == 0 {
            return PdfValidation::invalid("File is empty", 0);
        }

        let mut file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) => return PdfValidation::invalid(&format!("File unreadable: {}", e), size_bytes),
        };

        let mut header = [0u8; 5];
        if file.read_exact(&mut header).is_err() || header != PDF_HEADER {
            return PdfValidation::invalid("Invalid PDF header", size_bytes);
        }

        let tail_len = size_bytes.min(TRAILER_SCAN_BYTES);
        let mut tail = Vec::with_capacity(tail_len as usize);
        let tail_read = file
            .seek(SeekFrom::End(-(tail_len as i64)))
            .and_then(|_| file.read_to_end(&mut tail));
        if tail_read.is_err() || !tail.windows(PDF_TRAILER.len()).any(|w| w == PDF_TRAILER) {
            return PdfValidation::invalid("Missing EOF marker", size_bytes);
        }

        PdfValidation {
            is_valid: true,
            issue: None,
            size_bytes,
        }
    }

    /// Move a file into the quarantine tree and write its sidecar
    pub fn quarantine(
        &self,
        error: &ProcessingError,
        path: &Path,
        reason: QuarantineReason,
        detail: &str,
    ) -> SentinelResult<QuarantineRecord> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SentinelError::Quarantine {
                path: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;

        let size_bytes = fs::metadata(path).map(|m| m.len())?;
        let sha256 = content_hash(path).ok();

        let target_dir = self.instance_quarantine().join(reason.as_str());
        fs::create_dir_all(&target_dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f").to_string();
        let quarantine_err = |e: std::io::Error| SentinelError::Quarantine {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let target = reserve_target(&target_dir, &stamp, &file_name).map_err(quarantine_err)?;

        if let Err(e) = move_file(path, &target) {
            let _ = fs::remove_file(&target);
            return Err(quarantine_err(e));
        }

        let record = QuarantineRecord {
            original_path: path.to_path_buf(),
            quarantined_path: target.clone(),
            reason,
            detail: detail.to_string(),
            error_type: error.error_type,
            error_id: error.id.clone(),
            instance: self.instance.clone(),
            quarantined_at: Utc::now(),
            size_bytes,
            sha256,
        };

        let sidecar = QuarantineRecord::sidecar_path(&target);
        let written = serde_json::to_vec_pretty(&record)
            .map_err(SentinelError::from)
            .and_then(|bytes| fs::write(&sidecar, bytes).map_err(SentinelError::from));
        if let Err(e) = written {
            tracing::warn!(sidecar = %sidecar.display(), error = %e, "Failed to write quarantine metadata");
        }

        tracing::warn!(
            original = %path.display(),
            quarantined = %target.display(),
            reason = %reason,
            "PDF quarantined"
        );

        Ok(record)
    }

    /// Quarantined files for this instance, oldest first
    pub fn list_quarantine(&self) -> SentinelResult<Vec<QuarantineRecord>> {
        let mut records: Vec<QuarantineRecord> = self
            .sidecars()?
            .into_iter()
            .filter_map(|sidecar| match read_record(&sidecar) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(sidecar = %sidecar.display(), error = %e, "Unreadable quarantine metadata");
                    None
                }
            })
            .collect();
        records.sort_by_key(|r| r.quarantined_at);
        Ok(records)
    }

    /// Delete quarantined files (and sidecars) older than `max_age`
    pub fn cleanup_quarantine(&self, max_age: Duration) -> SentinelResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for sidecar in self.sidecars()? {
            let record = match read_record(&sidecar) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(sidecar = %sidecar.display(), error = %e, "Skipping unreadable quarantine metadata");
                    continue;
                }
            };
            if record.quarantined_at > cutoff {
                continue;
            }

            if let Err(e) = fs::remove_file(&record.quarantined_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %record.quarantined_path.display(), error = %e, "Failed to remove quarantined file");
                    continue;
                }
            }
            let _ = fs::remove_file(&sidecar);
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed = removed, "Quarantine cleanup finished");
        }
        Ok(removed)
    }

    fn sidecars(&self) -> SentinelResult<Vec<PathBuf>> {
        let root = self.instance_quarantine();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/*/*.metadata.json",
            glob::Pattern::escape(&root.to_string_lossy())
        );
        let paths = glob::glob(&pattern).map_err(|e| SentinelError::Quarantine {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(paths.filter_map(Result::ok).collect())
    }

    /// Earlier path with identical content, if this file was seen before
    pub fn check_duplicate(&self, path: &Path) -> SentinelResult<Option<PathBuf>> {
        let hash = content_hash(path)?;
        let mut cache = self.hashes.lock();

        if let Some(existing) = cache.by_hash.get(&hash) {
            if existing != path {
                return Ok(Some(existing.clone()));
            }
            return Ok(None);
        }

        if cache.order.len() >= self.config.hash_cache_capacity.max(1) {
            if let Some(oldest) = cache.order.pop_front() {
                cache.by_hash.remove(&oldest);
            }
        }
        cache.order.push_back(hash.clone());
        cache.by_hash.insert(hash, path.to_path_buf());
        Ok(None)
    }
}

/// Streaming SHA-256 of a file's content, hex encoded
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Rename, falling back to copy + remove across filesystems
/// Claim `<stamp>_<name>` in `dir`, or a uuid-suffixed variant when it is taken
///
/// The placeholder is created with `create_new`, so two quarantines of the same
/// name never resolve to one path.
fn reserve_target(dir: &Path, stamp: &str, file_name: &str) -> std::io::Result<PathBuf> {
    let mut candidate = dir.join(format!("{}_{}", stamp, file_name));
    for _ in 0..8 {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                candidate = dir.join(format!("{}_{}_{}", stamp, &suffix[..8], file_name));
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free quarantine name for {}", file_name),
    ))
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(error = %rename_err, "Rename failed, copying instead");
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn read_record(sidecar: &Path) -> SentinelResult<QuarantineRecord> {
    let bytes = fs::read(sidecar)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classification::{ErrorClassifier, ErrorContext, Failure};
    use tempfile::TempDir;

    const VALID_PDF: &[u8] =
        b"%PDF-1.4\n1 0 obj\n<< /Length 44 >>\nstream\nBT /F1 12 Tf (Attention is all you need) Tj ET\nendstream\nendobj\ntrailer\n%%EOF\n";

    fn pdf_error(error_type: ErrorType, path: &Path) -> ProcessingError {
        ErrorClassifier::default().classify(
            &Failure::new("PdfReadError", "pdf failure"),
            ErrorContext::new("worker-1", "extract_text").with_file_path(path),
            Some(error_type),
            None,
        )
    }

    fn handler(dir: &TempDir, backend: Arc<dyn PdfBackend>) -> PdfHandler {
        PdfHandler::with_backend(
            "worker-1",
            dir.path().join("quarantine"),
            PdfConfig::default(),
            backend,
        )
    }

    #[test]
    fn test_validation_messages() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.pdf");
        assert_eq!(
            PdfHandler::validate(&missing).issue.as_deref(),
            Some("File does not exist")
        );

        let empty = dir.path().join("empty.pdf");
        fs::write(&empty, b"").unwrap();
        assert_eq!(PdfHandler::validate(&empty).issue.as_deref(), Some("File is empty"));

        let html = dir.path().join("html.pdf");
        fs::write(&html, b"<html>not a pdf</html>").unwrap();
        assert_eq!(
            PdfHandler::validate(&html).issue.as_deref(),
            Some("Invalid PDF header")
        );

        let truncated = dir.path().join("truncated.pdf");
        fs::write(&truncated, b"%PDF-1.4\n1 0 obj\n").unwrap();
        assert_eq!(
            PdfHandler::validate(&truncated).issue.as_deref(),
            Some("Missing EOF marker")
        );

        let valid = dir.path().join("valid.pdf");
        fs::write(&valid, VALID_PDF).unwrap();
        assert!(PdfHandler::validate(&valid).is_valid);
    }

    #[test]
    fn test_corrupt_pdf_is_quarantined_with_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, b"").unwrap();
        let handler = handler(&dir, Arc::new(HeuristicPdfBackend));

        let outcome = handler.handle(&pdf_error(ErrorType::PdfCorrupt, &path));
        let HandlerOutcome::Quarantined(target) = outcome else {
            panic!("expected quarantine, got {:?}", outcome);
        };

        assert!(!path.exists());
        assert!(target.exists());
        assert!(target.starts_with(dir.path().join("quarantine/worker-1/corrupt")));
        assert!(target
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_paper.pdf"));

        let record = read_record(&QuarantineRecord::sidecar_path(&target)).unwrap();
        assert_eq!(record.original_path, path);
        assert_eq!(record.detail, "File is empty");
        assert_eq!(record.reason, QuarantineReason::Corrupt);
    }

    #[test]
    fn test_valid_file_reported_corrupt_gets_alternate_parser() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, VALID_PDF).unwrap();
        let handler = handler(&dir, Arc::new(HeuristicPdfBackend));

        let outcome = handler.handle(&pdf_error(ErrorType::PdfCorrupt, &path));
        assert!(outcome.is_recovered(), "got {:?}", outcome);
        assert!(path.exists());
    }

    #[test]
    fn test_encrypted_pdf_tries_password_dictionary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.pdf");
        fs::write(&path, VALID_PDF).unwrap();

        let mut backend = MockPdfBackend::new();
        backend
            .expect_try_password()
            .returning(|_, password| Ok(password == "password"));

        let handler = handler(&dir, Arc::new(backend));
        let outcome = handler.handle(&pdf_error(ErrorType::PdfEncrypted, &path));
        assert!(outcome.is_recovered());
    }

    #[test]
    fn test_encrypted_pdf_without_password_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.pdf");
        fs::write(&path, VALID_PDF).unwrap();

        let mut backend = MockPdfBackend::new();
        backend
            .expect_try_password()
            .times(PdfConfig::default().common_passwords.len())
            .returning(|_, _| Ok(false));

        let handler = handler(&dir, Arc::new(backend));
        let outcome = handler.handle(&pdf_error(ErrorType::PdfEncrypted, &path));
        match outcome {
            HandlerOutcome::Quarantined(target) => {
                assert!(target.starts_with(dir.path().join("quarantine/worker-1/encrypted")))
            }
            other => panic!("expected quarantine, got {:?}", other),
        }
    }

    #[test]
    fn test_extraction_reason_depends_on_method_results() {
        let dir = TempDir::new().unwrap();

        let empty_text = dir.path().join("scan.pdf");
        fs::write(&empty_text, VALID_PDF).unwrap();
        let mut backend = MockPdfBackend::new();
        backend.expect_method_name().returning(|m| format!("m{}", m));
        backend
            .expect_extract_text()
            .times(2)
            .returning(|_, _| Ok("   ".to_string()));
        let outcome = handler(&dir, Arc::new(backend))
            .handle(&pdf_error(ErrorType::PdfTextExtractionFailed, &empty_text));
        match outcome {
            HandlerOutcome::Quarantined(target) => {
                assert!(target.starts_with(dir.path().join("quarantine/worker-1/no_text")))
            }
            other => panic!("expected no_text quarantine, got {:?}", other),
        }

        let broken = dir.path().join("broken.pdf");
        fs::write(&broken, VALID_PDF).unwrap();
        let mut backend = MockPdfBackend::new();
        backend.expect_method_name().returning(|m| format!("m{}", m));
        backend.expect_extract_text().returning(|_, _| {
            Err(SentinelError::ActionFailed {
                action: "extract_text".to_string(),
                reason: "xref table broken".to_string(),
            })
        });
        let outcome = handler(&dir, Arc::new(backend))
            .handle(&pdf_error(ErrorType::PdfParseFailed, &broken));
        match outcome {
            HandlerOutcome::Quarantined(target) => assert!(target
                .starts_with(dir.path().join("quarantine/worker-1/extraction_failed"))),
            other => panic!("expected extraction_failed quarantine, got {:?}", other),
        }
    }

    #[test]
    fn test_heuristic_backend_extracts_literal_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        fs::write(&path, VALID_PDF).unwrap();

        let text = HeuristicPdfBackend.extract_text(&path, 0).unwrap();
        assert_eq!(text, "Attention is all you need");
    }

    #[test]
    fn test_list_and_cleanup_quarantine() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, Arc::new(HeuristicPdfBackend));

        for name in ["a.pdf", "b.pdf"] {
            let path = dir.path().join(name);
            fs::write(&path, b"").unwrap();
            handler.handle(&pdf_error(ErrorType::PdfCorrupt, &path));
        }

        let records = handler.list_quarantine().unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(handler.cleanup_quarantine(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(handler.cleanup_quarantine(Duration::ZERO).unwrap(), 2);
        assert!(handler.list_quarantine().unwrap().is_empty());
        assert!(!records[0].quarantined_path.exists());
    }

    #[test]
    fn test_same_name_quarantines_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, Arc::new(HeuristicPdfBackend));

        let mut quarantined = Vec::new();
        for (batch, contents) in [("batch-a", b"first".as_slice()), ("batch-b", b"second".as_slice())] {
            let source = dir.path().join(batch);
            fs::create_dir_all(&source).unwrap();
            let path = source.join("paper.pdf");
            fs::write(&path, contents).unwrap();
            let record = handler
                .quarantine(&pdf_error(ErrorType::PdfCorrupt, &path), &path, QuarantineReason::Corrupt, "bad")
                .unwrap();
            quarantined.push(record.quarantined_path);
        }

        assert_ne!(quarantined[0], quarantined[1]);
        assert_eq!(fs::read(&quarantined[0]).unwrap(), b"first");
        assert_eq!(fs::read(&quarantined[1]).unwrap(), b"second");
        assert_eq!(handler.list_quarantine().unwrap().len(), 2);
    }

    #[test]
    fn test_reserved_name_falls_back_to_suffix() {
        let dir = TempDir::new().unwrap();
        let taken = dir.path().join("20260101_000000000_paper.pdf");
        fs::write(&taken, b"already here").unwrap();

        let reserved = reserve_target(dir.path(), "20260101_000000000", "paper.pdf").unwrap();

        assert_ne!(reserved, taken);
        assert!(reserved.exists());
        let name = reserved.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("20260101_000000000_"));
        assert!(name.ends_with("_paper.pdf"));
        assert_eq!(fs::read(&taken).unwrap(), b"already here");
    }

    #[test]
    fn test_duplicate_detection_by_content_hash() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, Arc::new(HeuristicPdfBackend));

        let first = dir.path().join("first.pdf");
        let copy = dir.path().join("copy.pdf");
        let other = dir.path().join("other.pdf");
        fs::write(&first, VALID_PDF).unwrap();
        fs::write(&copy, VALID_PDF).unwrap();
        fs::write(&other, b"%PDF-1.7 different\n%%EOF").unwrap();

        assert_eq!(handler.check_duplicate(&first).unwrap(), None);
        assert_eq!(handler.check_duplicate(&first).unwrap(), None);
        assert_eq!(handler.check_duplicate(&copy).unwrap(), Some(first.clone()));
        assert_eq!(handler.check_duplicate(&other).unwrap(), None);
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            content_hash(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
