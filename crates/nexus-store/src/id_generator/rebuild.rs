//! Recover id generator state from the records themselves

use super::INTEGER_MINUS_ONE;
use crate::file::FileWithRecords;
use crate::Result;

/// Records read per I/O during a scan
const SCAN_BATCH: usize = 1024;

/// Outcome of a rebuild scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildResult {
    /// One past the last record in use
    pub high_id: u64,
    /// Unused records below the high id
    pub free_ids: Vec<u64>,
}

fn whole_records(file: &FileWithRecords) -> Result<u64> {
    let size = file.size()?;
    let record_size = file.record_size() as u64;
    if size % record_size != 0 && !file.is_read_only() {
        tracing::warn!(
            "{:?}: truncating {} trailing bytes of a partial record",
            file.path(),
            size % record_size
        );
        file.set_len(size - size % record_size)?;
    }
    Ok(size / record_size)
}

/// Scan every record, collecting free ids and the high id
///
/// A run of unused records only becomes free once an in-use record follows
/// it; unused records at the end of the file lie above the high id. The
/// first `reserved` records count as in use.
pub fn rebuild_full<F>(file: &FileWithRecords, reserved: u64, is_in_use: F) -> Result<RebuildResult>
where
    F: Fn(&[u8]) -> bool,
{
    let count = whole_records(file)?;
    let record_size = file.record_size();
    let mut result = RebuildResult::default();
    let mut pending = Vec::new();
    let mut buf = vec![0u8; SCAN_BATCH * record_size];

    let mut from = 0;
    while from < count {
        let batch = (count - from).min(SCAN_BATCH as u64) as usize;
        let bytes = &mut buf[..batch * record_size];
        file.read_into(from, bytes)?;
        for (i, record) in bytes.chunks_exact(record_size).enumerate() {
            let id = from + i as u64;
            if id < reserved || is_in_use(record) {
                result.free_ids.append(&mut pending);
                result.high_id = id + 1;
            } else if id != INTEGER_MINUS_ONE {
                pending.push(id);
            }
        }
        from += batch as u64;
    }

    tracing::info!(
        "Rebuilt ids of {:?} with a full scan: high id {}, {} free",
        file.path(),
        result.high_id,
        result.free_ids.len()
    );
    Ok(result)
}

/// Scan backwards from the end of the file to the last record in use
///
/// No free ids are collected; holes below the high id stay unused.
pub fn rebuild_fast<F>(file: &FileWithRecords, reserved: u64, is_in_use: F) -> Result<RebuildResult>
where
    F: Fn(&[u8]) -> bool,
{
    let count = whole_records(file)?;
    let record_size = file.record_size();
    let mut buf = vec![0u8; SCAN_BATCH * record_size];
    let mut high_id = 0;

    let mut end = count;
    'scan: while end > reserved {
        let from = end.saturating_sub(SCAN_BATCH as u64).max(reserved);
        let batch = (end - from) as usize;
        let bytes = &mut buf[..batch * record_size];
        file.read_into(from, bytes)?;
        for (i, record) in bytes.chunks_exact(record_size).enumerate().rev() {
            if is_in_use(record) {
                high_id = from + i as u64 + 1;
                break 'scan;
            }
        }
        end = from;
    }
    let high_id = high_id.max(reserved.min(count));

    tracing::info!(
        "Rebuilt ids of {:?} with a backward scan: high id {}",
        file.path(),
        high_id
    );
    Ok(RebuildResult {
        high_id,
        free_ids: Vec::new(),
    })
}
