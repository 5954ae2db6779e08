//! Serializable record types. A recording is a JSONL file where each line
//! is a [`RecordEntry`].

use super::recorder::{next_seq, timestamp_ns};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

const LARGE_CALL_THRESHOLD: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEntry {
    SessionStart(SessionStartRecord),
    MockCall(MockCallRecord),
    PatchEntered(PatchRecord),
    PatchExited(PatchRecord),
    DictPatched(DictPatchRecord),
    SessionEnd(SessionEndRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartRecord {
    pub run_id: String,
    pub recorded_at_unix_ns: u64,
    pub standin_version: String,
    /// Full `AppConfig` serialized as JSON.
    pub config_snapshot: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockCallRecord {
    pub seq: u64,
    pub timestamp_ns: u64,
    pub thread_id: String,
    pub mock: String,
    /// Rendered call, or `<hash:sha256:XXXXXXXXXXXXXXXX>` when too large.
    pub call: String,
    #[serde(default)]
    pub call_truncated: bool,
    pub call_count: u64,
}

impl MockCallRecord {
    pub fn capture(mock: &str, call: &str, call_count: usize) -> Self {
        let (call, call_truncated) = if call.len() > LARGE_CALL_THRESHOLD {
            let hash = Sha256::digest(call.as_bytes());
            (format!("<hash:sha256:{}>", hex_bytes(&hash[..8])), true)
        } else {
            (call.to_string(), false)
        };
        Self {
            seq: next_seq(),
            timestamp_ns: timestamp_ns(),
            thread_id: format!("{:?}", std::thread::current().id()),
            mock: mock.to_string(),
            call,
            call_truncated,
            call_count: call_count as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub seq: u64,
    pub timestamp_ns: u64,
    /// `target.attribute`
    pub target: String,
    /// `"replaced"` / `"created"` on entry, `"restored"` / `"deleted"` on exit.
    pub action: String,
}

impl PatchRecord {
    pub fn capture(target: &str, action: &str) -> Self {
        Self {
            seq: next_seq(),
            timestamp_ns: timestamp_ns(),
            target: target.to_string(),
            action: action.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictPatchRecord {
    pub seq: u64,
    pub timestamp_ns: u64,
    pub target: String,
    /// `"enter"` or `"exit"`
    pub phase: String,
    /// Entries present after the transition.
    pub entries: usize,
    pub cleared: bool,
}

impl DictPatchRecord {
    pub fn capture(target: &str, phase: &str, entries: usize, cleared: bool) -> Self {
        Self {
            seq: next_seq(),
            timestamp_ns: timestamp_ns(),
            target: target.to_string(),
            phase: phase.to_string(),
            entries,
            cleared,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndRecord {
    pub total_records: u64,
    pub total_duration_ns: u64,
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_calls_are_hashed() {
        let big = format!("call({})", "x".repeat(LARGE_CALL_THRESHOLD));
        let record = MockCallRecord::capture("mock.method", &big, 1);
        assert!(record.call_truncated);
        assert!(record.call.starts_with("<hash:sha256:"));
        assert_eq!(record.call.len(), "<hash:sha256:>".len() + 16);
    }

    #[test]
    fn small_calls_are_kept() {
        let record = MockCallRecord::capture("mock", "call(1)", 2);
        assert!(!record.call_truncated);
        assert_eq!(record.call, "call(1)");
        assert_eq!(record.call_count, 2);
    }

    #[test]
    fn entries_are_tagged_by_type() {
        let entry = RecordEntry::PatchEntered(PatchRecord::capture("pkg.thing", "replaced"));
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["type"], "patch_entered");
        assert_eq!(json["target"], "pkg.thing");

        let back: RecordEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, entry);
    }
}
