//! Derives the operations health signals from the server's `currentOp` list.
//!
//! One collection cycle issues two commands against the `admin` database:
//! the first yields the longest running user operation, the second reports
//! whether an index build is in progress. Either both succeed and a complete
//! [`OperationsStatus`] is produced, or the cycle yields nothing.

pub mod context;
pub mod error;
pub mod query;

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{self, Bson, Document};
use serde::Deserialize;

pub use context::CollectContext;
pub use error::{CollectError, Stage};

/// Runs administrative commands against the `admin` database.
#[async_trait]
pub trait AdminCommandRunner: Send + Sync {
    async fn run_admin_command(&self, command: Document) -> anyhow::Result<Document>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub done: i64,
    #[serde(default)]
    pub total: i64,
}

/// One entry of the `inprog` array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OperationRecord {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub ns: String,
    #[serde(default)]
    pub secs_running: i64,
    #[serde(default)]
    pub microsecs_running: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub progress: Option<Progress>,
}

impl OperationRecord {
    /// Replication tailing cursors never finish and are not user latency.
    pub fn is_replication_getmore(&self) -> bool {
        self.op == "getmore" && self.ns == query::OPLOG_NAMESPACE
    }

    pub fn running_time(&self) -> Duration {
        let secs = u64::try_from(self.secs_running).unwrap_or(0);
        let micros = u64::try_from(self.microsecs_running).unwrap_or(0);
        Duration::from_secs(secs) + Duration::from_micros(micros)
    }
}

/// Snapshot of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationsStatus {
    pub longest_query_time: Duration,
    pub index_building: bool,
    pub index_building_progress_total: i64,
    pub index_building_progress_done: i64,
}

/// Longest running time among records that are not replication getmores.
pub fn longest_running(records: &[OperationRecord]) -> Duration {
    records
        .iter()
        .filter(|op| !op.is_replication_getmore())
        .map(OperationRecord::running_time)
        .max()
        .unwrap_or(Duration::ZERO)
}

/// Fills the index build fields from the first reported build only.
pub fn apply_index_builds(status: &mut OperationsStatus, builds: &[OperationRecord]) {
    match builds.first() {
        Some(first) => {
            let progress = first.progress.clone().unwrap_or_default();
            status.index_building = true;
            status.index_building_progress_done = progress.done;
            status.index_building_progress_total = progress.total;
        }
        None => {
            status.index_building = false;
            status.index_building_progress_done = 0;
            status.index_building_progress_total = 0;
        }
    }
}

/// Runs one collection cycle; failures are logged and reported as `None`.
pub async fn get_operations_status<R>(runner: &R, ctx: &CollectContext) -> Option<OperationsStatus>
where
    R: AdminCommandRunner + ?Sized,
{
    match try_get_operations_status(runner, ctx).await {
        Ok(status) => Some(status),
        Err(e) => {
            log::error!("{e}");
            None
        }
    }
}

pub async fn try_get_operations_status<R>(
    runner: &R,
    ctx: &CollectContext,
) -> Result<OperationsStatus, CollectError>
where
    R: AdminCommandRunner + ?Sized,
{
    let reply = run(runner, ctx, Stage::LongestQuery, query::longest_query_command()).await?;
    let running = decode_lenient(&reply);
    log::debug!("ops running: {running:?}");

    let mut status = OperationsStatus {
        longest_query_time: longest_running(&running),
        ..OperationsStatus::default()
    };

    let reply = run(runner, ctx, Stage::IndexBuild, query::index_build_command()).await?;
    let builds = decode_strict(&reply, Stage::IndexBuild)?;
    if builds.len() > 1 {
        log::debug!("{} index builds running, reporting the first", builds.len());
    }
    apply_index_builds(&mut status, &builds);

    Ok(status)
}

async fn run<R>(
    runner: &R,
    ctx: &CollectContext,
    stage: Stage,
    command: Document,
) -> Result<Document, CollectError>
where
    R: AdminCommandRunner + ?Sized,
{
    ctx.run(stage, async {
        runner
            .run_admin_command(command)
            .await
            .map_err(|e| CollectError::command(stage, e.to_string()))
    })
    .await
}

fn inprog(reply: &Document, stage: Stage) -> Result<&Vec<Bson>, CollectError> {
    reply
        .get_array("inprog")
        .map_err(|e| CollectError::decode(stage, e.to_string()))
}

fn decode_record(entry: &Bson, stage: Stage) -> Result<OperationRecord, CollectError> {
    let doc = entry
        .as_document()
        .ok_or_else(|| CollectError::decode(stage, format!("inprog entry is not a document: {entry}")))?;
    bson::from_document(doc.clone()).map_err(|e| CollectError::decode(stage, e.to_string()))
}

/// Keeps whatever decodes; a broken first reply must not cost the index check.
fn decode_lenient(reply: &Document) -> Vec<OperationRecord> {
    let stage = Stage::LongestQuery;
    let entries = match inprog(reply, stage) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("{e}");
            return Vec::new();
        }
    };

    entries
        .iter()
        .filter_map(|entry| match decode_record(entry, stage) {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("{e}");
                None
            }
        })
        .collect()
}

fn decode_strict(reply: &Document, stage: Stage) -> Result<Vec<OperationRecord>, CollectError> {
    inprog(reply, stage)?
        .iter()
        .map(|entry| decode_record(entry, stage))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Replays canned replies in order and records the commands it saw.
    struct ScriptedRunner {
        replies: Mutex<VecDeque<anyhow::Result<Document>>>,
        seen: Mutex<Vec<Document>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<anyhow::Result<Document>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Document> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AdminCommandRunner for ScriptedRunner {
        async fn run_admin_command(&self, command: Document) -> anyhow::Result<Document> {
            self.seen.lock().unwrap().push(command);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no reply scripted")))
        }
    }

    fn ctx() -> CollectContext {
        CollectContext::with_timeout(Duration::from_secs(5))
    }

    fn record(op: &str, ns: &str, secs: i64, micros: i64) -> OperationRecord {
        OperationRecord {
            op: op.to_string(),
            ns: ns.to_string(),
            secs_running: secs,
            microsecs_running: micros,
            active: true,
            ..OperationRecord::default()
        }
    }

    #[test]
    fn running_time_adds_micro_component() {
        let op = record("query", "app.users", 5, 250_000);
        assert_eq!(op.running_time(), Duration::from_millis(5250));
        assert_eq!(op.running_time().as_secs_f64(), 5.25);
    }

    #[test]
    fn running_time_clamps_negative_components() {
        let op = record("query", "app.users", -3, -1);
        assert_eq!(op.running_time(), Duration::ZERO);
    }

    #[test]
    fn longest_running_skips_oplog_getmore() {
        let ops = vec![
            record("query", "app.users", 2, 0),
            record("getmore", "local.oplog.rs", 999, 0),
        ];
        assert_eq!(longest_running(&ops), Duration::from_secs(2));
    }

    #[test]
    fn longest_running_keeps_getmore_on_user_collections() {
        let ops = vec![
            record("query", "app.users", 2, 0),
            record("getmore", "app.events", 30, 0),
        ];
        assert_eq!(longest_running(&ops), Duration::from_secs(30));
    }

    #[test]
    fn longest_running_of_nothing_is_zero() {
        assert_eq!(longest_running(&[]), Duration::ZERO);
        let only_oplog = vec![record("getmore", "local.oplog.rs", 50, 0)];
        assert_eq!(longest_running(&only_oplog), Duration::ZERO);
    }

    #[test]
    fn apply_index_builds_takes_first_record() {
        let mut first = record("command", "app.users", 1, 0);
        first.progress = Some(Progress { done: 40, total: 100 });
        let mut second = record("command", "app.orders", 1, 0);
        second.progress = Some(Progress { done: 99, total: 100 });

        let mut status = OperationsStatus::default();
        apply_index_builds(&mut status, &[first, second]);
        assert!(status.index_building);
        assert_eq!(status.index_building_progress_done, 40);
        assert_eq!(status.index_building_progress_total, 100);
    }

    #[test]
    fn apply_index_builds_without_progress_reads_zero() {
        let mut status = OperationsStatus::default();
        apply_index_builds(&mut status, &[record("insert", "app.system.indexes", 1, 0)]);
        assert!(status.index_building);
        assert_eq!(status.index_building_progress_done, 0);
        assert_eq!(status.index_building_progress_total, 0);
    }

    #[test]
    fn decode_record_defaults_missing_fields() {
        let entry = Bson::Document(doc! { "op": "query", "secs_running": 3_i32 });
        let op = decode_record(&entry, Stage::LongestQuery).expect("decode");
        assert_eq!(op.op, "query");
        assert_eq!(op.ns, "");
        assert_eq!(op.secs_running, 3);
        assert_eq!(op.microsecs_running, 0);
        assert!(!op.active);
        assert!(op.msg.is_none());
        assert!(op.progress.is_none());
    }

    #[tokio::test]
    async fn status_combines_both_commands() {
        let runner = ScriptedRunner::new(vec![
            Ok(doc! { "inprog": [
                { "op": "query", "ns": "app.users", "secs_running": 2_i64, "microsecs_running": 0_i64, "active": true },
                { "op": "getmore", "ns": "local.oplog.rs", "secs_running": 999_i64, "active": true },
            ], "ok": 1.0 }),
            Ok(doc! { "inprog": [
                { "op": "command", "progress": { "done": 40_i64, "total": 100_i64 } },
                { "op": "command", "progress": { "done": 99_i64, "total": 100_i64 } },
            ], "ok": 1.0 }),
        ]);

        let status = get_operations_status(&runner, &ctx()).await.expect("status");
        assert_eq!(status.longest_query_time, Duration::from_secs(2));
        assert!(status.index_building);
        assert_eq!(status.index_building_progress_done, 40);
        assert_eq!(status.index_building_progress_total, 100);

        let seen = runner.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], query::longest_query_command());
        assert_eq!(seen[1], query::index_build_command());
    }

    #[tokio::test]
    async fn no_index_build_leaves_counters_at_zero() {
        let runner = ScriptedRunner::new(vec![
            Ok(doc! { "inprog": [], "ok": 1.0 }),
            Ok(doc! { "inprog": [], "ok": 1.0 }),
        ]);

        let status = get_operations_status(&runner, &ctx()).await.expect("status");
        assert_eq!(status, OperationsStatus::default());
    }

    #[tokio::test]
    async fn first_command_failure_skips_second() {
        let runner = ScriptedRunner::new(vec![Err(anyhow::anyhow!("connection refused"))]);

        let err = try_get_operations_status(&runner, &ctx()).await.unwrap_err();
        assert!(matches!(err, CollectError::Command { stage: Stage::LongestQuery, .. }));
        assert_eq!(runner.seen().len(), 1);
    }

    #[tokio::test]
    async fn second_command_failure_yields_no_status() {
        let runner = ScriptedRunner::new(vec![
            Ok(doc! { "inprog": [{ "op": "query", "secs_running": 4_i64 }] }),
            Err(anyhow::anyhow!("not master")),
        ]);

        assert!(get_operations_status(&runner, &ctx()).await.is_none());
    }

    #[tokio::test]
    async fn malformed_first_reply_still_checks_index_builds() {
        let runner = ScriptedRunner::new(vec![
            Ok(doc! { "inprog": "garbage" }),
            Ok(doc! { "inprog": [{ "msg": "Index Build: 10/20", "progress": { "done": 10_i32, "total": 20_i32 } }] }),
        ]);

        let status = get_operations_status(&runner, &ctx()).await.expect("status");
        assert_eq!(status.longest_query_time, Duration::ZERO);
        assert!(status.index_building);
        assert_eq!(status.index_building_progress_done, 10);
        assert_eq!(status.index_building_progress_total, 20);
    }

    #[tokio::test]
    async fn undecodable_first_entries_are_skipped() {
        let runner = ScriptedRunner::new(vec![
            Ok(doc! { "inprog": [
                "not a document",
                { "op": "update", "secs_running": "soon" },
                { "op": "update", "secs_running": 7_i64 },
            ] }),
            Ok(doc! { "inprog": [] }),
        ]);

        let status = get_operations_status(&runner, &ctx()).await.expect("status");
        assert_eq!(status.longest_query_time, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn malformed_second_reply_yields_no_status() {
        let runner = ScriptedRunner::new(vec![
            Ok(doc! { "inprog": [] }),
            Ok(doc! { "ok": 1.0 }),
        ]);

        let err = try_get_operations_status(&runner, &ctx()).await.unwrap_err();
        assert!(matches!(err, CollectError::Decode { stage: Stage::IndexBuild, .. }));
    }

    #[tokio::test]
    async fn expired_deadline_never_reaches_the_runner() {
        let runner = ScriptedRunner::new(vec![]);
        let ctx = CollectContext::new(Instant::now(), CancellationToken::new());

        let err = try_get_operations_status(&runner, &ctx).await.unwrap_err();
        assert!(matches!(err, CollectError::Timeout { stage: Stage::LongestQuery }));
        assert!(runner.seen().is_empty());
    }

    #[tokio::test]
    async fn cancelled_context_yields_no_status() {
        let runner = ScriptedRunner::new(vec![]);
        let ctx = ctx();
        ctx.cancel();

        assert!(get_operations_status(&runner, &ctx).await.is_none());
        assert!(runner.seen().is_empty());
    }
}
