//! # Journal Store
//!
//! **Crash-safe, file-backed account store**
//!
//! Every `store` call appends one transaction to an append-only journal and
//! syncs it before the in-memory copy is updated. On open, the journal is
//! replayed:
//! - Committed transactions: applied in order, later records win
//! - Incomplete transactions: discarded
//! - First frame with a bad CRC: replay stops there
//!
//! Anything after the last committed transaction is cut off before the
//! journal accepts new appends.
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "DJNL"]
//! [4 bytes: version]
//! [8 bytes: LSN at last checkpoint]
//!
//! Frame format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [1 byte: frame type (BEGIN/RECORD/COMMIT)]
//! [4 bytes: payload length]
//! [N bytes: payload]
//! [4 bytes: CRC32 of above]
//!
//! RECORD payload:
//! [8 bytes: account] [8 bytes: balance] [8 bytes: last settled at]
//! [4 bytes: upgrade count] then per upgrade [8 bytes: index] [8 bytes: amount]
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::account::AccountEconomy;
use crate::error::{EconomyError, EconomyResult};
use crate::store::{AccountId, EconomyStore};

/// Magic bytes identifying a journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"DJNL";

/// Current journal format version.
const JOURNAL_VERSION: u32 = 1;

/// Header length in bytes.
const HEADER_LEN: u64 = 16;

/// Bytes a frame adds around its payload (LSN, type, length, CRC).
const FRAME_OVERHEAD: u64 = 17;

/// Journal frame types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    /// Opens a transaction.
    Begin = 1,
    /// A full account record.
    Record = 2,
    /// Makes the transaction durable.
    Commit = 3,
}

impl FrameType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Record),
            3 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// A frame read back from disk.
struct Frame {
    lsn: u64,
    frame_type: FrameType,
    payload: Vec<u8>,
    /// Bytes the frame occupies on disk.
    encoded_len: u64,
}

/// State rebuilt by replay.
struct Replayed {
    records: HashMap<AccountId, AccountEconomy>,
    next_lsn: u64,
    report: RecoveryReport,
    /// Offset just past the last committed transaction.
    durable_len: u64,
}

/// What replay found when the journal was opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Accounts restored.
    pub accounts: usize,
    /// Committed transactions applied.
    pub committed: u64,
    /// Incomplete transactions dropped.
    pub discarded: u64,
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> EconomyError {
    EconomyError::Storage(format!("{context}: {e}"))
}

fn frame_len(len: usize) -> EconomyResult<u32> {
    u32::try_from(len).map_err(|e| storage_err("length does not fit a frame", e))
}

fn encode_record(account: AccountId, record: &AccountEconomy) -> EconomyResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(28 + record.owned.len() * 16);
    buf.extend_from_slice(&account.to_le_bytes());
    buf.extend_from_slice(&record.balance.to_le_bytes());
    buf.extend_from_slice(&record.last_settled_at.to_le_bytes());
    buf.extend_from_slice(&frame_len(record.owned.len())?.to_le_bytes());
    for (&index, &amount) in &record.owned {
        let index = u64::try_from(index).map_err(|e| storage_err("powerup index too large", e))?;
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&amount.to_le_bytes());
    }
    Ok(buf)
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_le_bytes(data.get(at..at + 8)?.try_into().ok()?))
}

fn decode_record(data: &[u8]) -> Option<(AccountId, AccountEconomy)> {
    let account = read_u64(data, 0)?;
    let balance = read_u64(data, 8)?;
    let last_settled_at = read_u64(data, 16)?;
    let count = u32::from_le_bytes(data.get(24..28)?.try_into().ok()?) as usize;

    if data.len() != count.checked_mul(16)?.checked_add(28)? {
        return None;
    }

    let mut owned = BTreeMap::new();
    for i in 0..count {
        let at = 28 + i * 16;
        let index = usize::try_from(read_u64(data, at)?).ok()?;
        owned.insert(index, read_u64(data, at + 8)?);
    }

    Some((
        account,
        AccountEconomy::from_parts(balance, owned, last_settled_at),
    ))
}

fn encode_frame(
    buf: &mut Vec<u8>,
    lsn: u64,
    frame_type: FrameType,
    payload: &[u8],
) -> EconomyResult<()> {
    let payload_len = frame_len(payload.len())?;
    let start = buf.len();
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.push(frame_type as u8);
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf[start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

fn encode_header(buf: &mut Vec<u8>, checkpoint_lsn: u64) {
    buf.extend_from_slice(JOURNAL_MAGIC);
    buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    buf.extend_from_slice(&checkpoint_lsn.to_le_bytes());
}

/// File-backed [`EconomyStore`].
pub struct JournalStore {
    /// Path to the journal file.
    path: PathBuf,
    /// Next Log Sequence Number.
    next_lsn: AtomicU64,
    /// Append handle. Holding this lock serializes writers.
    file: Mutex<File>,
    /// Replayed state.
    records: RwLock<HashMap<AccountId, AccountEconomy>>,
    /// Result of the replay done by `open`.
    report: RecoveryReport,
}

impl JournalStore {
    /// Opens or creates a journal and replays it.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the file cannot be opened or has a foreign header.
    pub fn open(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| storage_err("failed to open journal", e))?;

        let len = file
            .metadata()
            .map_err(|e| storage_err("failed to stat journal", e))?
            .len();

        let len = if len == 0 {
            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            encode_header(&mut header, 0);
            file.write_all(&header)
                .map_err(|e| storage_err("failed to write header", e))?;
            file.sync_all()
                .map_err(|e| storage_err("failed to sync header", e))?;
            HEADER_LEN
        } else {
            len
        };

        let replayed = Self::replay(&path)?;

        // Appends must follow the last committed transaction, not a torn tail.
        if len > replayed.durable_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = len - replayed.durable_len,
                "truncating journal tail after last commit"
            );
            file.set_len(replayed.durable_len)
                .and_then(|()| file.sync_all())
                .map_err(|e| storage_err("failed to truncate journal tail", e))?;
        }

        let report = replayed.report;
        tracing::info!(
            path = %path.display(),
            accounts = report.accounts,
            committed = report.committed,
            discarded = report.discarded,
            "journal replayed"
        );

        Ok(Self {
            path,
            next_lsn: AtomicU64::new(replayed.next_lsn),
            file: Mutex::new(file),
            records: RwLock::new(replayed.records),
            report,
        })
    }

    /// What replay found when this store was opened.
    #[must_use]
    pub const fn recovery_report(&self) -> RecoveryReport {
        self.report
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the journal at `path`.
    fn replay(path: &Path) -> EconomyResult<Replayed> {
        let file =
            File::open(path).map_err(|e| storage_err("failed to open journal for replay", e))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| storage_err("failed to read magic", e))?;
        if &magic != JOURNAL_MAGIC {
            return Err(EconomyError::Storage("invalid journal magic".to_string()));
        }

        let mut version_bytes = [0u8; 4];
        reader
            .read_exact(&mut version_bytes)
            .map_err(|e| storage_err("failed to read version", e))?;
        let version = u32::from_le_bytes(version_bytes);
        if version != JOURNAL_VERSION {
            return Err(EconomyError::Storage(format!(
                "unsupported journal version: {version}"
            )));
        }

        let mut lsn_bytes = [0u8; 8];
        reader
            .read_exact(&mut lsn_bytes)
            .map_err(|e| storage_err("failed to read checkpoint LSN", e))?;
        let mut next_lsn = u64::from_le_bytes(lsn_bytes);

        let mut records = HashMap::new();
        let mut report = RecoveryReport::default();
        let mut pending: Option<Vec<(AccountId, AccountEconomy)>> = None;
        let mut offset = HEADER_LEN;
        let mut durable_len = HEADER_LEN;

        // Stops at end of file or at the first damaged frame.
        while let Some(frame) = Self::read_frame(&mut reader) {
            next_lsn = next_lsn.max(frame.lsn + 1);
            offset += frame.encoded_len;

            match frame.frame_type {
                FrameType::Begin => {
                    if pending.replace(Vec::new()).is_some() {
                        report.discarded += 1;
                    }
                }
                FrameType::Record => match (pending.as_mut(), decode_record(&frame.payload)) {
                    (Some(ops), Some(entry)) => ops.push(entry),
                    _ => {
                        tracing::warn!(
                            lsn = frame.lsn,
                            "skipping orphan or malformed record frame"
                        );
                    }
                },
                FrameType::Commit => {
                    if let Some(ops) = pending.take() {
                        records.extend(ops);
                        report.committed += 1;
                        durable_len = offset;
                    }
                }
            }
        }

        if pending.is_some() {
            report.discarded += 1;
        }
        if report.discarded > 0 {
            tracing::warn!(
                discarded = report.discarded,
                "journal replay dropped uncommitted transactions"
            );
        }

        report.accounts = records.len();
        Ok(Replayed {
            records,
            next_lsn,
            report,
            durable_len,
        })
    }

    /// Reads one frame, or `None` at end of file or on damage.
    fn read_frame(reader: &mut impl Read) -> Option<Frame> {
        let mut head = [0u8; 13];
        reader.read_exact(&mut head).ok()?;

        let lsn = u64::from_le_bytes(head[0..8].try_into().ok()?);
        let frame_type = FrameType::from_u8(head[8])?;
        let payload_len = u32::from_le_bytes(head[9..13].try_into().ok()?);

        let mut payload = vec![0u8; usize::try_from(payload_len).ok()?];
        reader.read_exact(&mut payload).ok()?;

        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes).ok()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head);
        hasher.update(&payload);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            tracing::warn!(lsn, "journal CRC mismatch, replay stops here");
            return None;
        }

        Some(Frame {
            lsn,
            frame_type,
            payload,
            encoded_len: FRAME_OVERHEAD + u64::from(payload_len),
        })
    }

    /// Appends `bytes` and syncs. On failure the file is cut back to its
    /// previous length.
    fn append(file: &mut File, bytes: &[u8]) -> EconomyResult<()> {
        let before = file
            .metadata()
            .map_err(|e| storage_err("failed to stat journal", e))?
            .len();

        let result = file
            .write_all(bytes)
            .and_then(|()| file.sync_data())
            .map_err(|e| storage_err("journal write failed", e));

        if result.is_err() {
            file.set_len(before)
                .map_err(|e| storage_err("failed to cut back partial append", e))?;
        }
        result
    }

    /// Rewrites the journal as one transaction holding the latest record of
    /// every account.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the compacted file cannot be written. The old
    /// journal stays in place in that case.
    pub fn checkpoint(&self) -> EconomyResult<()> {
        let mut file = self.file.lock();
        let records = self.records.read();

        let mut accounts: Vec<_> = records.keys().copied().collect();
        accounts.sort_unstable();

        let first_lsn = self.next_lsn.load(Ordering::SeqCst);
        let mut lsn = first_lsn;
        let mut buf = Vec::new();
        encode_header(&mut buf, first_lsn);
        encode_frame(&mut buf, lsn, FrameType::Begin, &[])?;
        for account in &accounts {
            lsn += 1;
            encode_frame(
                &mut buf,
                lsn,
                FrameType::Record,
                &encode_record(*account, &records[account])?,
            )?;
        }
        lsn += 1;
        encode_frame(&mut buf, lsn, FrameType::Commit, &[])?;

        let tmp_path = self.path.with_extension("compact");
        fs::write(&tmp_path, &buf)
            .map_err(|e| storage_err("failed to write compacted journal", e))?;
        File::open(&tmp_path)
            .and_then(|f| f.sync_all())
            .map_err(|e| storage_err("failed to sync compacted journal", e))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| storage_err("failed to swap journal", e))?;

        *file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| storage_err("failed to reopen journal", e))?;
        self.next_lsn.store(lsn + 1, Ordering::SeqCst);

        tracing::debug!(accounts = accounts.len(), "journal checkpointed");
        Ok(())
    }
}

impl EconomyStore for JournalStore {
    fn exists(&self, account: AccountId) -> EconomyResult<bool> {
        Ok(self.records.read().contains_key(&account))
    }

    fn load(&self, account: AccountId) -> EconomyResult<Option<AccountEconomy>> {
        Ok(self.records.read().get(&account).cloned())
    }

    fn store(&self, account: AccountId, record: &AccountEconomy) -> EconomyResult<()> {
        let mut file = self.file.lock();

        let payload = encode_record(account, record)?;
        let lsn = self.next_lsn.fetch_add(3, Ordering::SeqCst);
        let mut buf = Vec::with_capacity(64);
        encode_frame(&mut buf, lsn, FrameType::Begin, &[])?;
        encode_frame(&mut buf, lsn + 1, FrameType::Record, &payload)?;
        encode_frame(&mut buf, lsn + 2, FrameType::Commit, &[])?;

        Self::append(&mut file, &buf)?;
        self.records.write().insert(account, record.clone());
        Ok(())
    }

    fn accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<_> = self.records.read().keys().copied().collect();
        accounts.sort_unstable();
        accounts
    }
}
