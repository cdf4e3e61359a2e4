//! Concatenated-SMS reassembly.
//!
//! Fragments sharing a grouping key `(address, reference width, reference,
//! total parts)` collect in a pending map until the set covers every part
//! index, at which point one [`LogicalMessage`] is emitted and the group is
//! discarded. Single-fragment PDUs bypass the map entirely.
//!
//! The engine holds no clock and does no I/O: staleness is applied only
//! when the caller invokes [`Reassembler::sweep`] with its notion of now,
//! and pending state can be snapshotted to JSON so a caller may carry it
//! across separate sync runs.

use crate::modem::Direction;
use crate::pdu::alphabet::Alphabet;
use crate::pdu::ConcatInfo;
use chrono::{DateTime, Duration, Utc};
use crc::{Crc, CRC_64_ECMA_182};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const IDENTITY_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// One decoded PDU, reduced to what reassembly and sync need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub direction: Direction,
    /// Counterpart address in normalized string form.
    pub address: String,
    /// Service-centre timestamp for received fragments; the sync time for
    /// stored outbound ones.
    pub timestamp: DateTime<Utc>,
    pub alphabet: Alphabet,
    /// Text of this fragment only.
    pub text: String,
    pub concat: Option<ConcatInfo>,
    /// Modem storage handle backing this fragment.
    pub storage_index: String,
    /// Set when the DCS was a reserved group decoded best-effort.
    pub unsupported_dcs: bool,
}

/// Key under which fragments of one concatenated message group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub address: String,
    pub wide_ref: bool,
    pub reference: u16,
    pub total_parts: u8,
}

impl GroupKey {
    fn for_fragment(frag: &Fragment, concat: &ConcatInfo) -> Self {
        GroupKey {
            address: frag.address.clone(),
            wide_ref: concat.wide_ref,
            reference: concat.reference,
            total_parts: concat.total_parts,
        }
    }
}

/// The externally visible message unit.
///
/// `identity` is derived from PDU content only (never storage indices) and
/// is stable across repeated syncs, so the external store can upsert on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMessage {
    pub identity: String,
    pub direction: Direction,
    pub address: String,
    pub body: String,
    /// Timestamp of the lowest-sequence fragment.
    pub timestamp: DateTime<Utc>,
    /// False for a partial emitted under a retention policy.
    pub complete: bool,
    /// Storage indices of every fragment that contributed, in part order.
    pub storage_indices: Vec<String>,
    /// True when any fragment carried a reserved DCS.
    pub degraded: bool,
}

/// What became of one fragment fed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResult {
    /// Unconcatenated fragment, promoted to a message immediately.
    Single(LogicalMessage),
    /// Last missing part arrived; the group completed.
    Completed(LogicalMessage),
    /// Parts still missing; the fragment joined its pending group.
    Pending,
}

/// What to do with groups whose parts stop arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Hold pending groups indefinitely.
    #[default]
    Keep,
    /// Emit the partial body, marked incomplete, once the group is stale.
    EmitPartial,
    /// Silently discard stale groups.
    Drop,
}

/// Retention configuration for the pending map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassemblyConfig {
    /// Hard cap on concurrently pending groups; the oldest-touched group
    /// is evicted when a new key would exceed it.
    #[serde(default = "default_max_pending_groups")]
    pub max_pending_groups: usize,
    #[serde(default)]
    pub stale_policy: StalePolicy,
    /// Age threshold for `stale_policy`, measured from last fragment arrival.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u32,
}

fn default_max_pending_groups() -> usize {
    64
}

fn default_stale_after_minutes() -> u32 {
    24 * 60
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        ReassemblyConfig {
            max_pending_groups: default_max_pending_groups(),
            stale_policy: StalePolicy::Keep,
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingGroup {
    /// Received fragments keyed by 1-based part index.
    parts: BTreeMap<u8, Fragment>,
    first_seen: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

/// Serializable snapshot of the pending map, for callers that persist
/// reassembly state between syncs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingSnapshot {
    groups: Vec<(GroupKey, PendingGroup)>,
}

/// The reassembly state machine.
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<GroupKey, PendingGroup>,
    config: ReassemblyConfig,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        Reassembler {
            pending: HashMap::new(),
            config,
        }
    }

    /// Restore an engine from a snapshot taken by [`Reassembler::snapshot`].
    pub fn with_pending(config: ReassemblyConfig, snapshot: PendingSnapshot) -> Self {
        Reassembler {
            pending: snapshot.groups.into_iter().collect(),
            config,
        }
    }

    pub fn pending_groups(&self) -> usize {
        self.pending.len()
    }

    /// Storage indices held by still-incomplete groups. These are never
    /// safe to delete from the modem.
    pub fn pending_indices(&self) -> Vec<String> {
        self.pending
            .values()
            .flat_map(|g| g.parts.values().map(|f| f.storage_index.clone()))
            .collect()
    }

    /// Feed one fragment, using `now` for arrival bookkeeping.
    pub fn feed(&mut self, frag: Fragment, now: DateTime<Utc>) -> FeedResult {
        let Some(concat) = frag.concat else {
            return FeedResult::Single(singleton_message(&frag));
        };
        let key = GroupKey::for_fragment(&frag, &concat);

        if !self.pending.contains_key(&key) && self.pending.len() >= self.config.max_pending_groups
        {
            self.evict_oldest();
        }

        let group = self.pending.entry(key.clone()).or_insert_with(|| PendingGroup {
            parts: BTreeMap::new(),
            first_seen: now,
            last_touched: now,
        });
        group.last_touched = now;

        match group.parts.get(&concat.part_index) {
            // Replay protection: an older duplicate never overwrites a
            // newer fragment.
            Some(existing) if existing.timestamp >= frag.timestamp => {
                debug!(
                    "ignoring stale duplicate part {}/{} (ref {}) from {}",
                    concat.part_index, concat.total_parts, concat.reference, frag.address
                );
            }
            _ => {
                group.parts.insert(concat.part_index, frag);
            }
        }

        let complete = (1..=key.total_parts).all(|i| group.parts.contains_key(&i));
        if complete {
            let group = self.pending.remove(&key).expect("group present");
            FeedResult::Completed(assemble(&key, group, true))
        } else {
            FeedResult::Pending
        }
    }

    /// Apply the stale policy, returning any partial messages it emits.
    ///
    /// Never called implicitly; the reconciler invokes it once per sync.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<LogicalMessage> {
        if self.config.stale_policy == StalePolicy::Keep {
            return Vec::new();
        }
        let cutoff = now - Duration::minutes(i64::from(self.config.stale_after_minutes));
        let stale: Vec<GroupKey> = self
            .pending
            .iter()
            .filter(|(_, g)| g.last_touched < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        let mut emitted = Vec::new();
        for key in stale {
            let group = self.pending.remove(&key).expect("key just listed");
            match self.config.stale_policy {
                StalePolicy::EmitPartial => {
                    warn!(
                        "emitting incomplete message from {} ({}/{} parts, ref {})",
                        key.address,
                        group.parts.len(),
                        key.total_parts,
                        key.reference
                    );
                    emitted.push(assemble(&key, group, false));
                }
                StalePolicy::Drop => {
                    warn!(
                        "dropping abandoned group from {} ({}/{} parts, ref {})",
                        key.address,
                        group.parts.len(),
                        key.total_parts,
                        key.reference
                    );
                }
                StalePolicy::Keep => unreachable!(),
            }
        }
        emitted
    }

    fn evict_oldest(&mut self) {
        let Some(oldest) = self
            .pending
            .iter()
            .min_by_key(|(_, g)| g.last_touched)
            .map(|(k, _)| k.clone())
        else {
            return;
        };
        warn!(
            "pending group cap {} reached; evicting group from {} (ref {})",
            self.config.max_pending_groups, oldest.address, oldest.reference
        );
        self.pending.remove(&oldest);
    }

    /// Capture the pending map for external persistence.
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            groups: self
                .pending
                .iter()
                .map(|(k, g)| (k.clone(), g.clone()))
                .collect(),
        }
    }

    /// Restore pending state saved by [`Reassembler::save_to_file`].
    pub fn load_from_file<P: AsRef<Path>>(
        config: ReassemblyConfig,
        path: P,
    ) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: PendingSnapshot = serde_json::from_str(&content)?;
        Ok(Self::with_pending(config, snapshot))
    }

    /// Persist pending state with an atomic temp-file replace.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        use std::io::Write;
        let path_ref = path.as_ref();
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path_ref.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let dir = path_ref.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(".pending.tmp-{}", std::process::id()));
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        let _ = tmp.sync_all();
        std::fs::rename(&tmp_path, path_ref)?;
        Ok(())
    }
}

/// Identity and message for an unconcatenated fragment: a content hash, so
/// two reads of the same stored PDU dedupe regardless of storage index.
fn singleton_message(frag: &Fragment) -> LogicalMessage {
    let mut digest = IDENTITY_CRC.digest();
    digest.update(match frag.direction {
        Direction::In => b"in",
        Direction::Out => b"out",
    });
    digest.update(frag.address.as_bytes());
    // Stored submits have no timestamp of their own (the engine stamps
    // them with the sync time), so hashing it would break idempotency.
    if frag.direction == Direction::In {
        digest.update(frag.timestamp.timestamp().to_be_bytes().as_ref());
    }
    digest.update(frag.text.as_bytes());
    LogicalMessage {
        identity: format!("s:{:016x}", digest.finalize()),
        direction: frag.direction,
        address: frag.address.clone(),
        body: frag.text.clone(),
        timestamp: frag.timestamp,
        complete: true,
        storage_indices: vec![frag.storage_index.clone()],
        degraded: frag.unsupported_dcs,
    }
}

fn assemble(key: &GroupKey, group: PendingGroup, complete: bool) -> LogicalMessage {
    let parts = &group.parts;
    let first = parts.values().next().expect("group never empty");
    let direction = first.direction;
    let timestamp = first.timestamp;

    let mut body = String::new();
    for frag in parts.values() {
        body.push_str(&frag.text);
    }
    if !complete {
        body.push_str(&format!(
            "\n[incomplete: {}/{} parts received]",
            parts.len(),
            key.total_parts
        ));
    }

    // Concatenated identity: the grouping key, plus the representative
    // timestamp to disambiguate reference-number wraparound (only received
    // fragments carry a real one). Partials add the received-index set so
    // a later, fuller assembly is a new record.
    let width = if key.wide_ref { 16 } else { 8 };
    let mut identity = format!(
        "c:{}:{}:{}:{}",
        key.address, width, key.reference, key.total_parts
    );
    if direction == Direction::In {
        identity.push_str(&format!(":{}", timestamp.timestamp()));
    }
    if !complete {
        let received: Vec<String> = parts.keys().map(|i| i.to_string()).collect();
        identity.push_str(":p");
        identity.push_str(&received.join("."));
    }

    LogicalMessage {
        identity,
        direction,
        address: key.address.clone(),
        body,
        timestamp,
        complete,
        storage_indices: parts.values().map(|f| f.storage_index.clone()).collect(),
        degraded: parts.values().any(|f| f.unsupported_dcs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frag(text: &str, index: u8, total: u8, storage: &str) -> Fragment {
        Fragment {
            direction: Direction::In,
            address: "+989121234567".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, index as u32).unwrap(),
            alphabet: Alphabet::Gsm7,
            text: text.into(),
            concat: Some(ConcatInfo {
                reference: 0x5A,
                wide_ref: false,
                total_parts: total,
                part_index: index,
            }),
            storage_index: storage.into(),
            unsupported_dcs: false,
        }
    }

    fn single(text: &str) -> Fragment {
        Fragment {
            concat: None,
            ..frag(text, 1, 2, "9")
        }
    }

    #[test]
    fn singleton_bypasses_state_machine() {
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        let result = engine.feed(single("hi"), Utc::now());
        match result {
            FeedResult::Single(msg) => {
                assert_eq!(msg.body, "hi");
                assert!(msg.complete);
                assert!(msg.identity.starts_with("s:"));
            }
            other => panic!("expected single, got {:?}", other),
        }
        assert_eq!(engine.pending_groups(), 0);
    }

    #[test]
    fn two_parts_assemble_in_either_order() {
        let now = Utc::now();
        for order in [[1u8, 2], [2, 1]] {
            let mut engine = Reassembler::new(ReassemblyConfig::default());
            let texts = ["", "first half ", "second half"];
            let mut completed = None;
            for &i in &order {
                match engine.feed(frag(texts[i as usize], i, 2, &i.to_string()), now) {
                    FeedResult::Completed(msg) => completed = Some(msg),
                    FeedResult::Pending => {}
                    other => panic!("unexpected {:?}", other),
                }
            }
            let msg = completed.expect("group completed");
            assert_eq!(msg.body, "first half second half");
            assert_eq!(msg.storage_indices, vec!["1", "2"]);
            assert!(msg.complete);
        }
    }

    #[test]
    fn identity_independent_of_arrival_order() {
        let now = Utc::now();
        let build = |order: [u8; 3]| {
            let mut engine = Reassembler::new(ReassemblyConfig::default());
            let mut out = None;
            for &i in &order {
                if let FeedResult::Completed(msg) =
                    engine.feed(frag(&format!("p{}", i), i, 3, &i.to_string()), now)
                {
                    out = Some(msg);
                }
            }
            out.expect("completed")
        };
        let a = build([1, 2, 3]);
        let b = build([3, 1, 2]);
        assert_eq!(a.identity, b.identity);
        assert_eq!(a.body, b.body);
    }

    #[test]
    fn stale_duplicate_is_ignored_newer_wins() {
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        let now = Utc::now();
        let mut old = frag("OLD", 1, 2, "1");
        old.timestamp = Utc.with_ymd_and_hms(2024, 5, 14, 9, 0, 0).unwrap();
        let newer = frag("NEW", 1, 2, "4");

        assert_eq!(engine.feed(newer, now), FeedResult::Pending);
        assert_eq!(engine.feed(old, now), FeedResult::Pending);
        match engine.feed(frag("-tail", 2, 2, "2"), now) {
            FeedResult::Completed(msg) => assert_eq!(msg.body, "NEW-tail"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn different_senders_never_share_a_group() {
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        let now = Utc::now();
        let mut other_sender = frag("x", 1, 2, "1");
        other_sender.address = "+31641600986".into();
        assert_eq!(engine.feed(other_sender, now), FeedResult::Pending);
        assert_eq!(engine.feed(frag("y", 2, 2, "2"), now), FeedResult::Pending);
        assert_eq!(engine.pending_groups(), 2);
    }

    #[test]
    fn reference_width_separates_groups() {
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        let now = Utc::now();
        let mut wide = frag("x", 1, 2, "1");
        wide.concat = Some(ConcatInfo {
            reference: 0x5A,
            wide_ref: true,
            total_parts: 2,
            part_index: 1,
        });
        engine.feed(wide, now);
        engine.feed(frag("y", 2, 2, "2"), now);
        assert_eq!(engine.pending_groups(), 2);
    }

    #[test]
    fn sweep_emits_partial_when_configured() {
        let mut engine = Reassembler::new(ReassemblyConfig {
            stale_policy: StalePolicy::EmitPartial,
            stale_after_minutes: 60,
            ..Default::default()
        });
        let fed_at = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap();
        engine.feed(frag("only part ", 1, 3, "1"), fed_at);

        assert!(engine.sweep(fed_at + Duration::minutes(30)).is_empty());
        let emitted = engine.sweep(fed_at + Duration::minutes(90));
        assert_eq!(emitted.len(), 1);
        let msg = &emitted[0];
        assert!(!msg.complete);
        assert!(msg.body.contains("only part"));
        assert!(msg.body.contains("1/3 parts"));
        assert!(msg.identity.contains(":p1"));
        assert_eq!(engine.pending_groups(), 0);
    }

    #[test]
    fn sweep_drop_discards_silently() {
        let mut engine = Reassembler::new(ReassemblyConfig {
            stale_policy: StalePolicy::Drop,
            stale_after_minutes: 10,
            ..Default::default()
        });
        let fed_at = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap();
        engine.feed(frag("x", 1, 2, "1"), fed_at);
        assert!(engine.sweep(fed_at + Duration::hours(1)).is_empty());
        assert_eq!(engine.pending_groups(), 0);
    }

    #[test]
    fn keep_policy_retains_indefinitely() {
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        let fed_at = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap();
        engine.feed(frag("x", 1, 2, "1"), fed_at);
        assert!(engine.sweep(fed_at + Duration::days(365)).is_empty());
        assert_eq!(engine.pending_groups(), 1);
    }

    #[test]
    fn group_cap_evicts_oldest() {
        let mut engine = Reassembler::new(ReassemblyConfig {
            max_pending_groups: 2,
            ..Default::default()
        });
        let t0 = Utc.with_ymd_and_hms(2024, 5, 14, 10, 0, 0).unwrap();
        for (n, minutes) in [(1u16, 0i64), (2, 5), (3, 10)] {
            let mut f = frag("x", 1, 2, "1");
            f.concat = Some(ConcatInfo {
                reference: n,
                wide_ref: false,
                total_parts: 2,
                part_index: 1,
            });
            engine.feed(f, t0 + Duration::minutes(minutes));
        }
        assert_eq!(engine.pending_groups(), 2);
        // The ref-1 group (oldest touch) must be the one gone.
        let refs: Vec<u16> = engine
            .snapshot()
            .groups
            .iter()
            .map(|(k, _)| k.reference)
            .collect();
        assert!(!refs.contains(&1));
        assert!(refs.contains(&2) && refs.contains(&3));
    }

    #[test]
    fn snapshot_roundtrips_and_resumes() {
        let now = Utc::now();
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        engine.feed(frag("part one ", 1, 2, "1"), now);

        let snapshot = engine.snapshot();
        let mut resumed = Reassembler::with_pending(ReassemblyConfig::default(), snapshot);
        match resumed.feed(frag("part two", 2, 2, "2"), now) {
            FeedResult::Completed(msg) => assert_eq!(msg.body, "part one part two"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn snapshot_file_roundtrip_resumes_the_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pending.json");
        let now = Utc::now();

        let mut engine = Reassembler::new(ReassemblyConfig::default());
        engine.feed(frag("part one ", 1, 2, "1"), now);
        engine.save_to_file(&path).unwrap();
        assert!(path.exists());

        let mut resumed =
            Reassembler::load_from_file(ReassemblyConfig::default(), &path).unwrap();
        assert_eq!(resumed.pending_groups(), 1);
        assert_eq!(resumed.pending_indices(), vec!["1".to_string()]);
        match resumed.feed(frag("part two", 2, 2, "2"), now) {
            FeedResult::Completed(msg) => assert_eq!(msg.body, "part one part two"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn load_from_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(Reassembler::load_from_file(ReassemblyConfig::default(), &path).is_err());
    }

    #[test]
    fn pending_indices_reported() {
        let mut engine = Reassembler::new(ReassemblyConfig::default());
        engine.feed(frag("x", 1, 3, "17"), Utc::now());
        assert_eq!(engine.pending_indices(), vec!["17".to_string()]);
    }
}
