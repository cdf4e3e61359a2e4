//! Batch reconciliation between modem storage and the persisted history.
//!
//! One sync run: parse every raw PDU, feed the fragments through the
//! reassembler, dedupe completed messages against identities the caller
//! already persisted, and report what is new, what was malformed, and
//! which storage indices a destructive cleanup could safely delete.
//!
//! The reconciler is pure: it never reads the modem, never writes the
//! store, and never deletes anything itself. Pending reassembly state
//! lives in the [`Reassembler`] the caller passes in (and may persist
//! between runs via its snapshot API).

use crate::logutil::{escape_log, hex_snippet};
use crate::modem::{Direction, MessageStatus, RawPdu};
use crate::pdu::{parse_pdu, Pdu};
use crate::reassembly::{FeedResult, Fragment, LogicalMessage, Reassembler};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;

/// Options for one reconcile run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Collect storage indices that are safe to delete from the modem.
    /// Only set when the caller intends a destructive cleanup.
    pub collect_deletable: bool,
}

/// Result of one reconcile run.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Messages not yet present in the persisted store, in batch order.
    pub inserted: Vec<LogicalMessage>,
    /// PDUs that failed to decode and were skipped.
    pub skipped_malformed: usize,
    /// Completed messages whose identity the store already had.
    pub duplicates: usize,
    /// Indices backing fragments of completed messages; never indices
    /// still held by an incomplete group. Empty unless requested.
    pub deletable_indices: Vec<String>,
}

/// Reconcile one modem batch against the persisted history.
///
/// `known_identities` are the stable identities already in the store;
/// running the same batch twice with the store updated in between yields
/// zero inserts the second time.
pub fn reconcile(
    batch: &[RawPdu],
    known_identities: &HashSet<String>,
    reassembler: &mut Reassembler,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    let mut seen_this_run: HashSet<String> = HashSet::new();

    for raw in batch {
        let pdu = match parse_pdu(&raw.hex) {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!(
                    "skipping malformed PDU at index {}: {} ({})",
                    raw.storage_index,
                    err,
                    hex_snippet(&raw.hex, 48)
                );
                outcome.skipped_malformed += 1;
                continue;
            }
        };
        let fragment = to_fragment(raw, &pdu, now);
        debug!(
            "fragment from {} ({:?}): {}",
            fragment.address,
            fragment.direction,
            escape_log(&fragment.text)
        );

        match reassembler.feed(fragment, now) {
            FeedResult::Single(msg) | FeedResult::Completed(msg) => {
                settle(msg, known_identities, &mut seen_this_run, options, &mut outcome);
            }
            FeedResult::Pending => {}
        }
    }

    // Retention policy pass: stale groups may surface as partials.
    for msg in reassembler.sweep(now) {
        settle(msg, known_identities, &mut seen_this_run, options, &mut outcome);
    }

    info!(
        "sync: {} new, {} duplicate, {} malformed, {} group(s) still pending",
        outcome.inserted.len(),
        outcome.duplicates,
        outcome.skipped_malformed,
        reassembler.pending_groups()
    );
    outcome
}

fn settle(
    msg: LogicalMessage,
    known: &HashSet<String>,
    seen_this_run: &mut HashSet<String>,
    options: &SyncOptions,
    outcome: &mut SyncOutcome,
) {
    // A message the store already has is still backed by fragments on the
    // modem; its indices are as deletable as a fresh one's.
    if options.collect_deletable {
        outcome
            .deletable_indices
            .extend(msg.storage_indices.iter().cloned());
    }
    if known.contains(&msg.identity) || !seen_this_run.insert(msg.identity.clone()) {
        debug!("duplicate message {} from {}", msg.identity, msg.address);
        outcome.duplicates += 1;
        return;
    }
    outcome.inserted.push(msg);
}

/// Reduce a parsed PDU plus its modem metadata to a reassembly fragment.
///
/// Submit PDUs carry no service-centre timestamp; stored outbound messages
/// get the sync time, matching what the history can actually know.
fn to_fragment(raw: &RawPdu, pdu: &Pdu, now: DateTime<Utc>) -> Fragment {
    let (direction, timestamp) = match pdu {
        Pdu::Deliver { scts, .. } => (Direction::In, scts.with_timezone(&Utc)),
        Pdu::Submit { .. } => (Direction::Out, now),
    };
    if raw.status != MessageStatus::Unknown && raw.status.direction() != direction {
        debug!(
            "storage status {:?} at index {} disagrees with the PDU type",
            raw.status, raw.storage_index
        );
    }
    Fragment {
        direction,
        address: pdu.counterpart().to_string(),
        timestamp,
        alphabet: pdu.coding().alphabet,
        text: pdu.text().to_string(),
        concat: pdu.concat(),
        storage_index: raw.storage_index.clone(),
        unsupported_dcs: pdu.coding().unsupported,
    }
}
