//! Modem-boundary types and the per-router-profile access lock.
//!
//! The engine never talks to a modem itself: the I/O layer reads batches of
//! [`RawPdu`] over the router's AT-command channel and hands them in. The
//! AT channel is a single serial resource, so sync and send against one
//! router profile share a [`ProfileLock`]: a second operation either waits
//! or gets [`ModemBusy`], never interleaves.

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Message direction relative to this relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Modem-side storage status, as reported by `AT+CMGL` in PDU mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    ReceivedUnread,
    ReceivedRead,
    StoredUnsent,
    StoredSent,
    Unknown,
}

impl MessageStatus {
    /// Map the numeric `<stat>` field of a CMGL entry.
    pub fn from_cmgl(stat: u8) -> Self {
        match stat {
            0 => MessageStatus::ReceivedUnread,
            1 => MessageStatus::ReceivedRead,
            2 => MessageStatus::StoredUnsent,
            3 => MessageStatus::StoredSent,
            _ => MessageStatus::Unknown,
        }
    }

    /// Direction hint from the storage status. The PDU type stays
    /// authoritative; the reconciler logs when the two disagree, which
    /// points at a modem misreporting MTI.
    pub fn direction(self) -> Direction {
        match self {
            MessageStatus::StoredUnsent | MessageStatus::StoredSent => Direction::Out,
            _ => Direction::In,
        }
    }
}

/// One raw PDU as read from modem storage. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPdu {
    /// Hex string exactly as the modem reported it.
    pub hex: String,
    /// Opaque storage handle, used only for modem-side deletion. Indices
    /// get reused after deletion and are never a message identity.
    pub storage_index: String,
    pub status: MessageStatus,
}

/// Parse the text of an `AT+CMGL` response in PDU mode into raw PDUs.
///
/// Each entry is a `+CMGL: <index>,<stat>,[<alpha>],<length>` line followed
/// by the PDU hex on the next line. Lines that do not fit the shape are
/// skipped; a final `OK` is ignored.
pub fn parse_cmgl(response: &str) -> Vec<RawPdu> {
    let mut out = Vec::new();
    let mut lines = response.lines().map(str::trim).peekable();
    while let Some(line) = lines.next() {
        let Some(fields) = line.strip_prefix("+CMGL:") else {
            continue;
        };
        let mut parts = fields.split(',').map(str::trim);
        let index = parts.next().unwrap_or("").to_string();
        let stat = parts.next().and_then(|s| s.parse::<u8>().ok());
        let (Some(stat), false) = (stat, index.is_empty()) else {
            debug!("skipping malformed CMGL header line: {}", line);
            continue;
        };
        match lines.peek() {
            Some(&pdu_line)
                if !pdu_line.is_empty()
                    && pdu_line != "OK"
                    && !pdu_line.starts_with('+') =>
            {
                out.push(RawPdu {
                    hex: pdu_line.to_string(),
                    storage_index: index,
                    status: MessageStatus::from_cmgl(stat),
                });
                lines.next();
            }
            _ => debug!("CMGL entry {} has no PDU line", index),
        }
    }
    out
}

/// Error returned by [`ProfileLock::try_acquire`] when a sync or send is
/// already running against the same router profile.
#[derive(Debug, thiserror::Error)]
#[error("modem channel for profile '{0}' is busy")]
pub struct ModemBusy(pub String);

/// Mutual-exclusion token for one router profile's AT channel.
///
/// Clones share the same underlying lock; hold the guard for the full
/// duration of one sync-or-send operation.
#[derive(Debug, Clone)]
pub struct ProfileLock {
    profile: String,
    inner: Arc<Mutex<()>>,
}

/// Guard proving exclusive access to the profile's modem channel.
pub struct ProfileGuard {
    profile: String,
    _guard: OwnedMutexGuard<()>,
}

impl ProfileLock {
    pub fn new(profile: impl Into<String>) -> Self {
        ProfileLock {
            profile: profile.into(),
            inner: Arc::new(Mutex::new(())),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> ProfileGuard {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        debug!("modem channel '{}' acquired", self.profile);
        ProfileGuard {
            profile: self.profile.clone(),
            _guard: guard,
        }
    }

    /// Take the channel only if it is free; callers surface [`ModemBusy`]
    /// instead of queueing when the operation is user-interactive.
    pub fn try_acquire(&self) -> Result<ProfileGuard, ModemBusy> {
        match Arc::clone(&self.inner).try_lock_owned() {
            Ok(guard) => {
                debug!("modem channel '{}' acquired", self.profile);
                Ok(ProfileGuard {
                    profile: self.profile.clone(),
                    _guard: guard,
                })
            }
            Err(_) => Err(ModemBusy(self.profile.clone())),
        }
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        debug!("modem channel '{}' released", self.profile);
    }
}
