use mongodb::bson::{doc, Document, Regex};

/// Operation kinds that count toward the longest running query.
pub const TRACKED_OP_KINDS: [&str; 6] = ["command", "query", "update", "delete", "insert", "getmore"];

/// Namespace tailed by secondaries; its getmore cursors run forever.
pub const OPLOG_NAMESPACE: &str = "local.oplog.rs";

pub const SYSTEM_INDEXES_PATTERN: &str = r".\.system\.indexes";
pub const INDEX_BUILD_MSG_PATTERN: &str = "Index Build.*";

/// `currentOp` restricted to user-facing operation kinds.
///
/// `$all` is left unset so the server only reports active operations.
pub fn longest_query_command() -> Document {
    doc! {
        "currentOp": 1,
        "op": { "$in": TRACKED_OP_KINDS.to_vec() },
    }
}

/// `currentOp` matching any of the three index build signatures.
pub fn index_build_command() -> Document {
    let create_indexes_command = doc! {
        "op": "command",
        "$or": [
            { "query.createIndexes": { "$exists": true } },
            { "command.createIndexes": { "$exists": true } },
        ],
    };
    let system_indexes_insert = doc! {
        "op": "insert",
        "ns": case_insensitive(SYSTEM_INDEXES_PATTERN),
    };
    let index_build_message = doc! {
        "msg": case_insensitive(INDEX_BUILD_MSG_PATTERN),
    };

    doc! {
        "currentOp": 1,
        "$or": [create_indexes_command, system_indexes_insert, index_build_message],
    }
}

pub fn ping_command() -> Document {
    doc! { "ping": 1 }
}

fn case_insensitive(pattern: &str) -> Regex {
    Regex {
        pattern: pattern.to_string(),
        options: "i".to_string(),
    }
}
