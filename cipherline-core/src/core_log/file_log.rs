/*
    file_log.rs - Durable append-only message log

    Every message is one framed record:
    [len: u32 LE][bincode(Message): len bytes][crc32: u32 LE]

    On open the file is replayed and every checksum verified. A torn final
    record (crash mid-write) is cut off; a checksum mismatch anywhere is
    reported as corruption. Each append is fsynced before it is acknowledged.

    A handle holds an exclusive lock on the file for its whole lifetime, so
    one writer owns the clock. A second open fails with `Unavailable`.
*/

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::delivery::DeliveryHub;
use super::errors::{LogError, LogResult};
use super::traits::{DeliveryChannel, MessageLog, Subscription, SubscriptionId};
use super::types::{LogClock, Message};
use crate::core_identity::{Timestamp, UserId};

const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// Upper bound on one encoded record; anything larger is treated as garbage
const MAX_RECORD_LEN: usize = 1024 * 1024;

struct FileLogState {
    file: File,
    messages: Vec<Message>,
    clock: LogClock,
    size: u64,
    /// Set when a failed append could not be rolled back
    broken: Option<String>,
}

pub struct FileMessageLog {
    path: PathBuf,
    state: Mutex<FileLogState>,
    hub: DeliveryHub,
}

impl FileMessageLog {
    /// Create or reopen the log at `path`
    pub fn open(path: impl Into<PathBuf>) -> LogResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|e| {
            LogError::Unavailable(format!(
                "{} is locked by another handle: {}",
                path.display(),
                e
            ))
        })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (messages, valid_len) = replay(&data)?;
        if valid_len < data.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = data.len() - valid_len,
                "Truncating torn record at end of message log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let mut clock = LogClock::new();
        for message in &messages {
            clock.observe(message);
        }

        info!(path = %path.display(), messages = messages.len(), "Opened message log");

        Ok(FileMessageLog {
            path,
            state: Mutex::new(FileLogState {
                file,
                messages,
                clock,
                size: valid_len as u64,
                broken: None,
            }),
            hub: DeliveryHub::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hub(&self) -> &DeliveryHub {
        &self.hub
    }

    /// Bytes of valid records on disk
    pub async fn size(&self) -> u64 {
        self.state.lock().await.size
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn encode_record(message: &Message) -> LogResult<Vec<u8>> {
    let body = bincode::serialize(message)?;
    let mut record = Vec::with_capacity(LEN_SIZE + body.len() + CRC_SIZE);
    record.extend_from_slice(&(body.len() as u32).to_le_bytes());
    record.extend_from_slice(&body);
    record.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(record)
}

/// Parse every complete record; returns the messages and the byte length they cover
fn replay(data: &[u8]) -> LogResult<(Vec<Message>, usize)> {
    let mut messages: Vec<Message> = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let remaining = &data[offset..];
        if remaining.len() < LEN_SIZE {
            break;
        }
        let mut len_buf = [0u8; LEN_SIZE];
        len_buf.copy_from_slice(&remaining[..LEN_SIZE]);
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_RECORD_LEN {
            return Err(LogError::Corrupted(format!(
                "record at offset {} claims {} bytes",
                offset, len
            )));
        }
        if remaining.len() < LEN_SIZE + len + CRC_SIZE {
            break;
        }

        let body = &remaining[LEN_SIZE..LEN_SIZE + len];
        let mut crc_buf = [0u8; CRC_SIZE];
        crc_buf.copy_from_slice(&remaining[LEN_SIZE + len..LEN_SIZE + len + CRC_SIZE]);
        if crc32fast::hash(body) != u32::from_le_bytes(crc_buf) {
            return Err(LogError::Corrupted(format!(
                "invalid checksum at offset {}",
                offset
            )));
        }

        let message: Message = bincode::deserialize(body)
            .map_err(|e| LogError::Corrupted(format!("undecodable record at offset {}: {}", offset, e)))?;

        if let Some(prev) = messages.last() {
            if message.sort_key() <= prev.sort_key() {
                return Err(LogError::Corrupted(format!(
                    "record {} out of order at offset {}",
                    message.id, offset
                )));
            }
        }

        messages.push(message);
        offset += LEN_SIZE + len + CRC_SIZE;
    }

    Ok((messages, offset))
}

#[async_trait]
impl MessageLog for FileMessageLog {
    async fn append(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        ciphertext: &str,
    ) -> LogResult<Message> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.broken {
            return Err(LogError::Unavailable(format!(
                "append rejected, log needs reopening: {}",
                reason
            )));
        }

        // Only commit the clock once the record is durable
        let mut clock = state.clock.clone();
        let (created_at, id) = clock.next(Timestamp::now());
        let message = Message {
            id,
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            ciphertext: ciphertext.to_string(),
            created_at,
        };

        let record = encode_record(&message)?;
        let written = state.file.write_all(&record);
        let synced = written.and_then(|_| state.file.sync_data());
        if let Err(e) = synced {
            // Drop any partial record so later appends stay framed
            let size = state.size;
            if let Err(rollback) = state.file.set_len(size) {
                error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Could not roll back failed append; refusing further appends"
                );
                state.broken = Some(format!("rollback to {} bytes failed: {}", size, rollback));
            }
            return Err(e.into());
        }

        state.size += record.len() as u64;
        state.clock = clock;
        state.messages.push(message.clone());

        // Published under the lock so pushes follow append order
        let delivered = self.hub.publish(&message);
        drop(state);
        debug!(message_id = %message.id, delivered, "Appended message to file log");
        Ok(message)
    }

    async fn query(&self, participant_id: &UserId) -> LogResult<Vec<Message>> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.involves(participant_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryChannel for FileMessageLog {
    async fn subscribe(&self, topic: &UserId) -> LogResult<Subscription> {
        Ok(self.hub.subscribe(topic))
    }

    async fn unsubscribe(&self, handle: SubscriptionId) -> bool {
        self.hub.unsubscribe(handle)
    }

    fn active_subscriptions(&self) -> usize {
        self.hub.active_subscriptions()
    }
}
