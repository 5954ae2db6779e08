//! Session recording: one JSON object per line describing every proxy call
//! and patch transition, for post-run inspection.

pub mod entry;
pub mod recorder;

pub use entry::{
    DictPatchRecord, MockCallRecord, PatchRecord, RecordEntry, SessionEndRecord,
    SessionStartRecord,
};
pub use recorder::{
    clear_session_recorder, emit_record, end_session, init_session_recorder, is_recording,
    load_recording, next_seq, timestamp_ns,
};
