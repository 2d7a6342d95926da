//! The read-before-write ledger.
//!
//! Records which file contents the agent has actually been shown, keyed by
//! absolute path, with a SHA-256 fingerprint of the bytes on disk at read
//! time and the union of line ranges shown. Writes and edits are gated on
//! this: a file is write-eligible only if the ledger's hash still matches
//! the bytes on disk, i.e. the agent saw the current file.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;
use sha2::Sha256;

/// SHA-256 hex digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// What the ledger knows about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub content_hash: String,
    /// Inclusive 1-based line ranges shown to the agent, unmerged.
    pub ranges_read: Vec<(usize, usize)>,
    pub total_lines: usize,
}

impl ReadRecord {
    pub fn percentage_read(&self) -> f64 {
        if self.total_lines == 0 {
            return 100.0;
        }
        let mut read = vec![false; self.total_lines];
        for &(start, end) in &self.ranges_read {
            for line in start..=end.min(self.total_lines) {
                if line >= 1 {
                    read[line - 1] = true;
                }
            }
        }
        let count = read.iter().filter(|&&r| r).count();
        (count as f64 / self.total_lines as f64) * 100.0
    }

    pub fn is_read_enough(&self) -> bool {
        self.percentage_read() >= 99.0
    }

    /// 1-based inclusive gaps the agent has not seen yet.
    pub fn unread_ranges(&self) -> Vec<(usize, usize)> {
        if self.total_lines == 0 {
            return Vec::new();
        }
        let mut read = vec![false; self.total_lines];
        for &(start, end) in &self.ranges_read {
            for line in start..=end.min(self.total_lines) {
                if line >= 1 {
                    read[line - 1] = true;
                }
            }
        }
        let mut gaps = Vec::new();
        let mut open: Option<usize> = None;
        for (idx, &seen) in read.iter().enumerate() {
            match (seen, open) {
                (false, None) => open = Some(idx + 1),
                (true, Some(start)) => {
                    gaps.push((start, idx));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            gaps.push((start, self.total_lines));
        }
        gaps
    }
}

/// Outcome of a write-eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteGate {
    Eligible,
    /// The path was never read this session.
    NeverRead,
    /// The file changed on disk since the agent last saw it.
    StaleHash,
    /// Read, but too little of it; carries the unread ranges to request.
    ReadTooLittle { unread: Vec<(usize, usize)> },
}

/// Per-session mapping from absolute path to what was shown. Cleared on
/// Initialize. BTreeMap keeps iteration deterministic for tests and logs.
#[derive(Debug, Default)]
pub struct ReadLedger {
    records: BTreeMap<PathBuf, ReadRecord>,
}

impl ReadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `range` (1-based inclusive) of the file was shown, with
    /// the full on-disk content bytes for fingerprinting. Ranges union with
    /// earlier reads; a changed hash resets them, since earlier views no
    /// longer describe the current file.
    pub fn record_read(&mut self, path: &Path, content: &[u8], range: (usize, usize)) {
        let hash = hash_bytes(content);
        let total_lines = count_lines(content);
        match self.records.get_mut(path) {
            Some(record) if record.content_hash == hash => {
                record.total_lines = total_lines;
                record.ranges_read.push(range);
            }
            _ => {
                self.records.insert(
                    path.to_path_buf(),
                    ReadRecord {
                        content_hash: hash,
                        ranges_read: vec![range],
                        total_lines,
                    },
                );
            }
        }
    }

    /// Record a full read of `content` (used after successful writes/edits,
    /// where the agent by construction knows the whole new content).
    pub fn record_full(&mut self, path: &Path, content: &[u8]) {
        let total = count_lines(content);
        self.records.insert(
            path.to_path_buf(),
            ReadRecord {
                content_hash: hash_bytes(content),
                ranges_read: vec![(1, total.max(1))],
                total_lines: total,
            },
        );
    }

    pub fn get(&self, path: &Path) -> Option<&ReadRecord> {
        self.records.get(path)
    }

    /// Gate a mutation of `path` whose current on-disk bytes are `current`.
    pub fn check_write(&self, path: &Path, current: &[u8]) -> WriteGate {
        let Some(record) = self.records.get(path) else {
            return WriteGate::NeverRead;
        };
        if record.content_hash != hash_bytes(current) {
            return WriteGate::StaleHash;
        }
        if !record.is_read_enough() {
            return WriteGate::ReadTooLittle {
                unread: record.unread_ranges(),
            };
        }
        WriteGate::Eligible
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn count_lines(content: &[u8]) -> usize {
    if content.is_empty() {
        return 0;
    }
    let newlines = content.iter().filter(|&&b| b == b'\n').count();
    if content.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}
