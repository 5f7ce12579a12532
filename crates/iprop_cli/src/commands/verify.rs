//! Verify command implementation.

use iprop_core::{
    LogConfig, LogTarget, RecordHeader, RecordTrailer, UberPayload, Version, LOG_HEADER_SZ,
    LOG_TRAILER_SZ, LOG_UBER_LEN, LOG_UBER_SZ, LOG_WRAPPER_SZ,
};
use iprop_storage::{FileBackend, LockMode, LockRequest, StorageBackend, StorageResult};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked, the uber record included.
    pub records_checked: usize,
    /// Records past the confirmed marker.
    pub unconfirmed_records: usize,
    /// Oldest record version.
    pub first_version: Option<Version>,
    /// Newest record version.
    pub last_version: Option<Version>,
    /// Problems that make the log unusable or inconsistent.
    pub errors: Vec<String>,
    /// Conditions worth knowing about that a writer repairs on open.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let LogTarget::File(path) = &config.log_file else {
        return Err("No log file configured".into());
    };
    if !path.exists() {
        return Err(format!("Log file not found: {}", path.display()).into());
    }

    println!("Verifying log at {}", path.display());
    println!();
    let backend = FileBackend::open(path, LockRequest::nonblocking(LockMode::Shared))?;
    let result = verify_log(&backend)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Scans every record in `backend`, checking framing, the uber record and
/// the version sequence. Scanning stops at the first record that cannot be
/// framed.
pub fn verify_log(backend: &dyn StorageBackend) -> StorageResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let size = backend.size()?;
    if size == 0 {
        result.warnings.push("Log is empty".to_string());
        return Ok(result);
    }

    let mut offset = 0u64;
    let mut confirmed_end = None;
    let mut boundaries = vec![0u64];
    let mut previous: Option<Version> = None;

    while offset < size {
        if size - offset < LOG_HEADER_SZ {
            result.warnings.push(format!(
                "Partial header at offset {offset}: {} trailing byte(s)",
                size - offset
            ));
            break;
        }
        let header = match RecordHeader::decode(&backend.read_at(offset, LOG_HEADER_SZ as usize)?) {
            Ok(header) => header,
            Err(e) => {
                result
                    .errors
                    .push(format!("Bad header at offset {offset}: {e}"));
                break;
            }
        };

        let end = offset + LOG_WRAPPER_SZ + u64::from(header.len);
        if end > size {
            result.warnings.push(format!(
                "Truncated record at offset {offset}: needs {} bytes, only {} available",
                end - offset,
                size - offset
            ));
            break;
        }
        let trailer =
            match RecordTrailer::decode(&backend.read_at(end - LOG_TRAILER_SZ, LOG_TRAILER_SZ as usize)?) {
                Ok(trailer) => trailer,
                Err(e) => {
                    result
                        .errors
                        .push(format!("Bad trailer at offset {offset}: {e}"));
                    break;
                }
            };
        if !header.matches(&trailer) {
            result.errors.push(format!(
                "Header and trailer disagree at offset {offset}: version {}/{} length {}/{}",
                header.version, trailer.version, header.len, trailer.len
            ));
            break;
        }
        result.records_checked += 1;

        if header.is_uber_at(offset) {
            let raw = backend.read_at(offset + LOG_HEADER_SZ, LOG_UBER_LEN as usize)?;
            match UberPayload::decode(&raw) {
                Ok(uber) => confirmed_end = Some(uber.next_offset),
                Err(e) => result.errors.push(format!("Bad uber record: {e}")),
            }
        } else {
            if offset == 0 {
                result
                    .warnings
                    .push("No uber record: old-format log, a writer upgrades it on open".to_string());
            }
            if let Some(prev) = previous {
                if header.version != prev.next() {
                    result.errors.push(format!(
                        "Version {} at offset {offset} does not follow {prev}",
                        header.version
                    ));
                }
            }
            previous = Some(header.version);
            result.first_version.get_or_insert(header.version);
            result.last_version = Some(header.version);
            if confirmed_end.is_some_and(|confirmed| end > confirmed) {
                result.unconfirmed_records += 1;
            }
        }

        boundaries.push(end);
        offset = end;
    }

    if let Some(confirmed) = confirmed_end {
        if confirmed < LOG_UBER_SZ || confirmed > size {
            result.errors.push(format!(
                "Uber record points at offset {confirmed}, outside {LOG_UBER_SZ}..={size}"
            ));
        } else if !boundaries.contains(&confirmed) {
            result.errors.push(format!(
                "Uber record points at offset {confirmed}, which is not a record boundary"
            ));
        }
    }

    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Records checked:     {}", result.records_checked);
    println!("  Unconfirmed records: {}", result.unconfirmed_records);
    if let (Some(first), Some(last)) = (result.first_version, result.last_version) {
        println!("  Versions:            {first}..={last}");
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iprop_core::log::record::{encode_record, encode_uber};
    use iprop_core::{OpCode, Timestamp};
    use iprop_storage::InMemoryBackend;

    fn log(next: u64, versions: &[u32]) -> Vec<u8> {
        let mut bytes = encode_uber(
            Timestamp::new(1),
            &UberPayload {
                next_offset: next,
                last_timestamp: Timestamp::new(1),
                last_version: Version::ZERO,
            },
        );
        for &v in versions {
            bytes.extend(encode_record(Version::new(v), Timestamp::new(v), OpCode::Nop, &[]).unwrap());
        }
        bytes
    }

    fn verify(bytes: Vec<u8>) -> VerifyResult {
        verify_log(&InMemoryBackend::with_data(bytes)).unwrap()
    }

    #[test]
    fn clean_log_passes() {
        let result = verify(log(LOG_UBER_SZ + 3 * LOG_WRAPPER_SZ, &[1, 2, 3]));
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.records_checked, 4);
        assert_eq!(result.unconfirmed_records, 0);
        assert_eq!(result.first_version, Some(Version::new(1)));
        assert_eq!(result.last_version, Some(Version::new(3)));
    }

    #[test]
    fn counts_unconfirmed_records() {
        let result = verify(log(LOG_UBER_SZ + LOG_WRAPPER_SZ, &[1, 2, 3]));
        assert!(result.is_ok());
        assert_eq!(result.unconfirmed_records, 2);
    }

    #[test]
    fn reports_version_gap() {
        let result = verify(log(LOG_UBER_SZ + 2 * LOG_WRAPPER_SZ, &[1, 3]));
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("does not follow"));
    }

    #[test]
    fn reports_marker_off_boundary() {
        let result = verify(log(LOG_UBER_SZ + 5, &[1]));
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("not a record boundary"));
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let mut bytes = log(LOG_UBER_SZ + LOG_WRAPPER_SZ, &[1]);
        bytes.extend_from_slice(&[0, 0, 0, 2, 0]);
        let result = verify(bytes);
        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn mismatched_trailer_fails() {
        let mut bytes = log(LOG_UBER_SZ + 2 * LOG_WRAPPER_SZ, &[1, 2]);
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;
        let result = verify(bytes);
        assert!(!result.is_ok());
        assert!(result.errors[0].contains("disagree"));
    }
}
