use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use ferry_common::{FailureReason, SyncToken, WorkItem, WorkItemId, WorkItemRelation};
use ferry_config::MigrationConfig;
use ferry_orchestrator::{MigrationRun, Migrator, RecordOutcome};
use ferry_remote::{
    BatchItemResponse, Expand, Fault, InMemoryRemote, RemoteClient, RemoteError, WriteRequest,
};
use serde_json::{Value, json};

const SOURCE_URL: &str = "https://dev.example.com/legacy";
const TARGET_URL: &str = "https://dev.example.com/modern";

fn config() -> MigrationConfig {
    format!(
        r#"
        [source]
        url = "{SOURCE_URL}"
        project = "Legacy"
        query = "SELECT [System.Id] FROM WorkItems"

        [target]
        url = "{TARGET_URL}"
        project = "Modern"

        [batch]
        size = 50
        parallelism = 2
        max_attempts = 3
        backoff_step_ms = 1
        "#
    )
    .parse()
    .unwrap()
}

struct Fixture {
    source: InMemoryRemote,
    target: InMemoryRemote,
}

impl Fixture {
    fn new() -> Self {
        Self {
            source: InMemoryRemote::new(SOURCE_URL, "Legacy"),
            target: InMemoryRemote::new(TARGET_URL, "Modern").with_work_item_type(
                "Bug",
                &[
                    "System.Title",
                    "System.State",
                    "System.Tags",
                    "System.AreaPath",
                    "System.Description",
                ],
            ),
        }
    }

    fn bug(&self, title: &str) -> WorkItemId {
        self.source.insert(
            "Bug",
            &[
                ("System.Title", json!(title)),
                ("System.State", json!("Active")),
                ("System.AreaPath", json!("Legacy\\Core")),
            ],
        )
    }

    async fn run(&self, config: MigrationConfig) -> MigrationRun {
        Migrator::new(
            config,
            Arc::new(self.source.clone()),
            Arc::new(self.target.clone()),
        )
        .unwrap()
        .migrate()
        .await
        .unwrap()
    }

    fn target_of(&self, run: &MigrationRun, source_id: WorkItemId) -> WorkItem {
        let target_id = run.report.record(source_id).unwrap().target_id.unwrap();
        self.target.record(target_id).unwrap()
    }
}

/// Source endpoint where someone edits a record just before the first batch write
/// reaches the service.
#[derive(Debug)]
struct EditedBeforeWrite {
    inner: InMemoryRemote,
    record: WorkItemId,
    edited: AtomicBool,
}

#[async_trait::async_trait]
impl RemoteClient for EditedBeforeWrite {
    fn project(&self) -> &str {
        self.inner.project()
    }

    fn record_url(&self, id: WorkItemId) -> String {
        self.inner.record_url(id)
    }

    async fn submit_batch(
        &self,
        requests: &[WriteRequest],
    ) -> Result<Option<Vec<BatchItemResponse>>, RemoteError> {
        if !self.edited.swap(true, Ordering::SeqCst) {
            self.inner
                .set_field(self.record, "System.Title", json!("edited concurrently"));
        }
        self.inner.submit_batch(requests).await
    }

    async fn query_by_cross_reference(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, Vec<WorkItemId>>, RemoteError> {
        self.inner.query_by_cross_reference(urls).await
    }

    async fn fetch_records(
        &self,
        ids: &[WorkItemId],
        expand: Expand,
    ) -> Result<Vec<WorkItem>, RemoteError> {
        self.inner.fetch_records(ids, expand).await
    }

    async fn run_query(&self, query: &str) -> Result<Vec<WorkItemId>, RemoteError> {
        self.inner.run_query(query).await
    }

    async fn work_item_type_fields(
        &self,
        work_item_type: &str,
    ) -> Result<Option<Vec<String>>, RemoteError> {
        self.inner.work_item_type_fields(work_item_type).await
    }

    async fn download_attachment(&self, url: &str) -> Result<Bytes, RemoteError> {
        self.inner.download_attachment(url).await
    }

    async fn upload_attachment(
        &self,
        file_name: &str,
        content: Bytes,
    ) -> Result<String, RemoteError> {
        self.inner.upload_attachment(file_name, content).await
    }
}

fn timeout() -> RemoteError {
    RemoteError::Timeout {
        operation: "submit_batch".into(),
        elapsed_ms: 10,
    }
}

fn source_url(id: WorkItemId) -> String {
    format!("{SOURCE_URL}/_apis/wit/workItems/{id}")
}

fn token_of(target: &WorkItem, source_id: WorkItemId) -> SyncToken {
    let indexes = target.cross_reference_indexes(&source_url(source_id));
    assert_eq!(indexes.len(), 1, "exactly one cross-reference expected");
    target.relations[indexes[0]]
        .comment()
        .unwrap()
        .parse()
        .unwrap()
}

fn outcome(run: &MigrationRun, source_id: WorkItemId) -> RecordOutcome {
    run.report.record(source_id).unwrap().outcome
}

fn reasons_contain(run: &MigrationRun, source_id: WorkItemId, reason: FailureReason) -> bool {
    run.report.record(source_id).unwrap().reasons.contains(reason)
}

#[tokio::test]
async fn first_run_creates_links_and_tags() {
    let fixture = Fixture::new();
    let id = fixture.bug("Crash on start");

    let run = fixture.run(config()).await;

    assert_eq!(outcome(&run, id), RecordOutcome::Created);
    assert!(!run.report.has_failures());
    let target = fixture.target_of(&run, id);
    assert_eq!(target.field_str("System.Title"), Some("Crash on start"));
    assert_eq!(target.field_str("System.AreaPath"), Some("Modern\\Core"));
    assert_eq!(target.team_project(), Some("Modern"));

    let source = fixture.source.record(id).unwrap();
    assert_eq!(source.field_str("System.Tags"), Some("migrated"));
    let token = token_of(&target, id);
    assert_eq!(token.revision, source.rev);
    assert!(token.covers(["clear-relations", "links", "remote-links"]));
}

#[tokio::test]
async fn second_run_without_changes_writes_nothing() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..3).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.run(config()).await;
    let target_writes = fixture.target.applied_writes();
    let source_writes = fixture.source.applied_writes();
    let batches = fixture.target.submitted_batches().len();

    let run = fixture.run(config()).await;

    assert_eq!(fixture.target.applied_writes(), target_writes);
    assert_eq!(fixture.source.applied_writes(), source_writes);
    assert_eq!(fixture.target.submitted_batches().len(), batches);
    for id in ids {
        assert_eq!(outcome(&run, id), RecordOutcome::SkippedUnchanged);
        assert!(!run.report.record(id).unwrap().source_changed);
    }
}

#[tokio::test]
async fn changed_source_is_updated_in_place() {
    let fixture = Fixture::new();
    let id = fixture.bug("Crash");
    let first = fixture.run(config()).await;
    let target_id = first.report.record(id).unwrap().target_id.unwrap();

    fixture
        .source
        .set_field(id, "System.Title", json!("Crash on start"));
    let run = fixture.run(config()).await;

    let record = run.report.record(id).unwrap();
    assert_eq!(record.outcome, RecordOutcome::Updated);
    assert!(record.source_changed);
    assert_eq!(record.target_id, Some(target_id));
    assert_eq!(fixture.target.records().len(), 1);

    let target = fixture.target.record(target_id).unwrap();
    assert_eq!(target.field_str("System.Title"), Some("Crash on start"));
    let token = token_of(&target, id);
    assert_eq!(token.revision, fixture.source.record(id).unwrap().rev);
    assert!(token.covers(["clear-relations", "links", "remote-links"]));
}

#[tokio::test]
async fn batch_results_are_matched_by_position() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..5).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture
        .target
        .push_fault(Fault::Statuses(vec![200, 200, 400, 200, 500]));
    let dumps = tempfile::tempdir().unwrap();
    let mut config = config();
    config.diagnostics.dir = Some(dumps.path().to_path_buf());

    let run = fixture.run(config).await;

    for index in [0, 1, 3] {
        assert_eq!(outcome(&run, ids[index]), RecordOutcome::Created);
    }
    assert_eq!(outcome(&run, ids[2]), RecordOutcome::Failed);
    assert!(reasons_contain(&run, ids[2], FailureReason::BadRequest));
    assert_eq!(outcome(&run, ids[4]), RecordOutcome::Failed);
    assert!(reasons_contain(&run, ids[4], FailureReason::UnexpectedError));
    assert_eq!(fixture.target.records().len(), 3);
    assert_eq!(run.report.totals.created, 3);
    assert_eq!(run.report.totals.failed, 2);

    // Failed records are not tagged on the source.
    assert!(
        fixture
            .source
            .record(ids[2])
            .unwrap()
            .field_str("System.Tags")
            .is_none()
    );
    let dumped = std::fs::read_dir(dumps.path()).unwrap().count();
    assert_eq!(dumped, 1);
}

#[tokio::test]
async fn single_response_for_a_batch_fails_every_record() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..3).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::Aggregate(
        400,
        json!({ "value": { "Message": "batch rejected" } }).to_string(),
    ));

    let run = fixture.run(config()).await;

    for id in &ids {
        assert_eq!(outcome(&run, *id), RecordOutcome::Failed);
        assert!(reasons_contain(&run, *id, FailureReason::CriticalError));
    }
    assert!(fixture.target.records().is_empty());
}

#[tokio::test]
async fn missing_response_list_fails_every_record() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..2).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::NoResponse);

    let run = fixture.run(config()).await;

    for id in &ids {
        assert!(reasons_contain(&run, *id, FailureReason::CriticalError));
    }
    assert_eq!(run.report.totals.failed, 2);
}

#[tokio::test]
async fn transient_failure_without_side_effects_is_retried() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..2).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::Fail(RemoteError::Timeout {
        operation: "submit_batch".into(),
        elapsed_ms: 10,
    }));

    let run = fixture.run(config()).await;

    let batches = fixture.target.submitted_batches();
    assert_eq!(batches[0], batches[1]);
    assert_eq!(fixture.target.records().len(), 2);
    for id in ids {
        assert_eq!(outcome(&run, id), RecordOutcome::Created);
    }
}

#[tokio::test]
async fn applied_create_batch_is_not_retried_and_resumes_next_run() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..3).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::FailAfterApply(RemoteError::Timeout {
        operation: "submit_batch".into(),
        elapsed_ms: 10,
    }));

    let first = fixture.run(config()).await;

    assert_eq!(fixture.target.submitted_batches().len(), 1);
    assert_eq!(fixture.target.records().len(), 3);
    for id in &ids {
        assert_eq!(outcome(&first, *id), RecordOutcome::Failed);
        assert!(reasons_contain(&first, *id, FailureReason::CreateBatchFailure));
    }

    let second = fixture.run(config()).await;

    assert_eq!(fixture.target.records().len(), 3);
    for id in &ids {
        assert_eq!(outcome(&second, *id), RecordOutcome::Updated);
        let target = fixture.target_of(&second, *id);
        let token = token_of(&target, *id);
        assert!(token.covers(["clear-relations", "links", "remote-links"]));
        assert_eq!(token.revision, fixture.source.record(*id).unwrap().rev);
    }
}

#[tokio::test]
async fn partially_applied_create_batch_fails_every_record() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..3).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::FailAfterApplying {
        positions: vec![1],
        error: timeout(),
    });

    let first = fixture.run(config()).await;

    assert_eq!(fixture.target.submitted_batches().len(), 1);
    assert_eq!(fixture.target.records().len(), 1);
    for id in &ids {
        assert_eq!(outcome(&first, *id), RecordOutcome::Failed);
        assert!(reasons_contain(&first, *id, FailureReason::CreateBatchFailure));
        assert!(!reasons_contain(&first, *id, FailureReason::DuplicateCrossReference));
    }

    let second = fixture.run(config()).await;

    assert!(!second.report.has_failures());
    assert_eq!(fixture.target.records().len(), 3);
    assert_eq!(outcome(&second, ids[0]), RecordOutcome::Created);
    assert_eq!(outcome(&second, ids[1]), RecordOutcome::Updated);
    assert_eq!(outcome(&second, ids[2]), RecordOutcome::Created);
}

#[tokio::test]
async fn create_applied_twice_is_flagged_as_duplicate() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..3).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::FailAfterApplying {
        positions: vec![0, 0, 1],
        error: timeout(),
    });

    let run = fixture.run(config()).await;

    assert_eq!(fixture.target.submitted_batches().len(), 1);
    assert_eq!(fixture.target.records().len(), 3);
    for id in &ids {
        assert!(reasons_contain(&run, *id, FailureReason::CreateBatchFailure));
    }
    assert!(reasons_contain(&run, ids[0], FailureReason::DuplicateCrossReference));
    assert!(!reasons_contain(&run, ids[1], FailureReason::DuplicateCrossReference));
    assert!(!reasons_contain(&run, ids[2], FailureReason::DuplicateCrossReference));
}

#[tokio::test]
async fn unverified_create_retry_duplicates_records() {
    let fixture = Fixture::new();
    let ids: Vec<_> = (0..2).map(|n| fixture.bug(&format!("bug {n}"))).collect();
    fixture.target.push_fault(Fault::FailAfterApply(timeout()));
    let mut config = config();
    config.batch.verify_on_create_failure = false;

    let first = fixture.run(config.clone()).await;

    let batches = fixture.target.submitted_batches();
    assert_eq!(batches[0], batches[1]);
    assert_eq!(fixture.target.records().len(), 4);
    for id in &ids {
        assert_eq!(outcome(&first, *id), RecordOutcome::Created);
    }

    let second = fixture.run(config).await;

    for id in &ids {
        assert_eq!(outcome(&second, *id), RecordOutcome::Failed);
        assert!(reasons_contain(&second, *id, FailureReason::DuplicateCrossReference));
    }
    assert_eq!(fixture.target.records().len(), 4);
}

#[tokio::test]
async fn source_edited_during_tagging_is_migrated_next_run() {
    let fixture = Fixture::new();
    let id = fixture.bug("original");
    let source = EditedBeforeWrite {
        inner: fixture.source.clone(),
        record: id,
        edited: AtomicBool::new(false),
    };

    let first = Migrator::new(config(), Arc::new(source), Arc::new(fixture.target.clone()))
        .unwrap()
        .migrate()
        .await
        .unwrap();

    assert!(reasons_contain(&first, id, FailureReason::BadRequest));
    let edited = fixture.source.record(id).unwrap();
    assert_eq!(edited.field_str("System.Title"), Some("edited concurrently"));
    assert!(edited.field_str("System.Tags").is_none());
    let target = fixture.target_of(&first, id);
    assert_eq!(target.field_str("System.Title"), Some("original"));
    assert!(token_of(&target, id).revision < edited.rev);

    let second = fixture.run(config()).await;

    let record = second.report.record(id).unwrap();
    assert_eq!(record.outcome, RecordOutcome::Updated);
    assert!(record.source_changed);
    let target = fixture.target_of(&second, id);
    assert_eq!(target.field_str("System.Title"), Some("edited concurrently"));
    let source = fixture.source.record(id).unwrap();
    assert_eq!(source.field_str("System.Tags"), Some("migrated"));
    assert_eq!(token_of(&target, id).revision, source.rev);
}

#[tokio::test]
async fn links_point_at_target_counterparts() {
    let fixture = Fixture::new();
    let parent = fixture.bug("parent");
    let child = fixture.bug("child");
    fixture.source.add_relation(
        child,
        WorkItemRelation::new("System.LinkTypes.Hierarchy-Reverse", source_url(parent)),
    );
    fixture.source.add_relation(
        child,
        WorkItemRelation::new("Hyperlink", "https://docs.example.com/design")
            .with_attribute("comment", "design notes"),
    );

    let run = fixture.run(config()).await;

    let parent_target = fixture.target_of(&run, parent);
    let child_target = fixture.target_of(&run, child);
    let link = child_target
        .relations
        .iter()
        .find(|r| r.rel == "System.LinkTypes.Hierarchy-Reverse")
        .unwrap();
    assert_eq!(link.url, parent_target.url);
    let hyperlink = child_target
        .relations
        .iter()
        .find(|r| r.url == "https://docs.example.com/design")
        .unwrap();
    assert_eq!(hyperlink.comment(), Some("design notes"));
    // The cross-reference stays first.
    assert!(child_target.relations[0].is_cross_reference_to(&source_url(child)));
}

#[tokio::test]
async fn hyperlinks_to_source_records_follow_the_migration() {
    let fixture = Fixture::new();
    let a = fixture.bug("a");
    let b = fixture.bug("b");
    fixture
        .source
        .add_relation(a, WorkItemRelation::new("Hyperlink", source_url(b)));
    fixture.source.add_relation(
        a,
        WorkItemRelation::new("Hyperlink", format!("{SOURCE_URL}/Legacy/_workitems/edit/{b}")),
    );

    let first = fixture.run(config()).await;

    assert!(!first.report.has_failures());
    let a_target = fixture.target_of(&first, a);
    let b_target = fixture.target_of(&first, b);
    let hyperlinks: Vec<&str> = a_target
        .relations
        .iter()
        .filter(|r| r.rel == "Hyperlink")
        .map(|r| r.url.as_str())
        .collect();
    let edit_url = format!("{TARGET_URL}/Modern/_workitems/edit/{}", b_target.id);
    assert_eq!(
        hyperlinks,
        vec![source_url(a).as_str(), b_target.url.as_str(), edit_url.as_str()]
    );

    let second = fixture.run(config()).await;

    assert!(!second.report.has_failures());
    assert_eq!(outcome(&second, a), RecordOutcome::SkippedUnchanged);
    assert_eq!(outcome(&second, b), RecordOutcome::SkippedUnchanged);
    assert_eq!(fixture.target.records().len(), 2);
}

#[tokio::test]
async fn attachments_are_copied_to_the_target() {
    let fixture = Fixture::new();
    let id = fixture.bug("with log");
    let missing = fixture.bug("with lost file");
    let file_url = format!("{SOURCE_URL}/_apis/wit/attachments/1?fileName=log.txt");
    fixture
        .source
        .store_attachment(&file_url, Bytes::from_static(b"panic at line 4"));
    fixture.source.add_relation(
        id,
        WorkItemRelation::new("AttachedFile", &file_url).with_attribute("name", "log.txt"),
    );
    fixture.source.add_relation(
        missing,
        WorkItemRelation::new(
            "AttachedFile",
            format!("{SOURCE_URL}/_apis/wit/attachments/2?fileName=gone.txt"),
        )
        .with_attribute("name", "gone.txt"),
    );
    let mut config = config();
    config.relations.attachments = true;

    let run = fixture.run(config).await;

    let target = fixture.target_of(&run, id);
    let attached = target
        .relations
        .iter()
        .find(|r| r.rel == "AttachedFile")
        .unwrap();
    assert!(attached.url.starts_with(TARGET_URL));
    assert_eq!(
        fixture.target.attachment(&attached.url),
        Some(Bytes::from_static(b"panic at line 4"))
    );
    assert!(token_of(&target, id).covers(["attachments"]));

    // A failed transfer keeps the record but leaves the phase open for the next run.
    assert!(reasons_contain(&run, missing, FailureReason::AttachmentTransfer));
    let lost = fixture.target_of(&run, missing);
    assert!(!token_of(&lost, missing).covers(["attachments"]));
    assert!(
        fixture
            .source
            .record(missing)
            .unwrap()
            .field_str("System.Tags")
            .is_none()
    );
}

#[tokio::test]
async fn field_rules_shape_the_target_content() {
    let fixture = Fixture::new();
    let referenced = fixture.bug("referenced");
    let mut config: MigrationConfig = format!(
        r#"
        [source]
        url = "{SOURCE_URL}"
        project = "Legacy"
        query = "SELECT [System.Id] FROM WorkItems"

        [target]
        url = "{TARGET_URL}"
        project = "Modern"

        [batch]
        backoff_step_ms = 1

        [[fields.replacements]]
        source = "Custom.Notes"
        target = "System.Description"

        [fields.value_maps."System.State"]
        Active = "Doing"

        [[fields.content_substitutions]]
        from = "legacy-wiki"
        to = "modern-wiki"
        "#
    )
    .parse()
    .unwrap();
    config.fields.target_tag = Some("imported".into());
    let first = fixture.run(config.clone()).await;
    let referenced_target = fixture.target_of(&first, referenced);

    let id = fixture.source.insert(
        "Bug",
        &[
            ("System.Title", json!("follow-up")),
            ("System.State", json!("Active")),
            (
                "Custom.Notes",
                json!(format!("see {} and legacy-wiki", source_url(referenced))),
            ),
        ],
    );
    let run = fixture.run(config).await;

    assert_eq!(outcome(&run, referenced), RecordOutcome::SkippedUnchanged);
    let target = fixture.target_of(&run, id);
    assert_eq!(target.field_str("System.State"), Some("Doing"));
    assert_eq!(
        target.field_str("System.Description"),
        Some(format!("see {} and modern-wiki", referenced_target.url).as_str())
    );
    assert!(!target.fields.contains_key("Custom.Notes"));
    assert_eq!(target.field_str("System.Tags"), Some("imported"));
}

#[tokio::test]
async fn embedded_images_are_rehosted() {
    let fixture = Fixture::new();
    let image = format!("{SOURCE_URL}/_apis/wit/attachments/9?fileName=shot.png");
    fixture
        .source
        .store_attachment(&image, Bytes::from_static(b"png"));
    let id = fixture.source.insert(
        "Bug",
        &[
            ("System.Title", json!("screenshot")),
            ("System.Description", json!(format!(r#"<p><img src="{image}"></p>"#))),
        ],
    );
    let mut config = config();
    config.fields.inline_images = true;

    let run = fixture.run(config).await;

    let target = fixture.target_of(&run, id);
    let description = target.field_str("System.Description").unwrap();
    assert!(!description.contains(SOURCE_URL));
    assert!(description.contains(&format!("{TARGET_URL}/_apis/wit/attachments/")));
}

#[tokio::test]
async fn unsupported_records_fail_without_blocking_others() {
    let fixture = Fixture::new();
    let good = fixture.bug("fine");
    let other = fixture.bug("also fine");
    let epic = fixture.source.insert("Epic", &[("System.Title", json!("big"))]);
    let foreign = fixture.bug("moved");
    fixture
        .source
        .set_field(foreign, "System.TeamProject", json!("Elsewhere"));
    let mut config = config();
    config.batch.size = 1;

    let run = fixture.run(config).await;

    assert_eq!(outcome(&run, good), RecordOutcome::Created);
    assert_eq!(outcome(&run, other), RecordOutcome::Created);
    assert!(reasons_contain(&run, epic, FailureReason::UnsupportedWorkItemType));
    assert!(reasons_contain(&run, foreign, FailureReason::CrossProjectMismatch));
    assert_eq!(fixture.target.records().len(), 2);
    // One lookup per type, however many batches need it.
    assert_eq!(fixture.target.type_lookups(), 2);
}

#[tokio::test]
async fn disabled_phases_are_skipped() {
    let fixture = Fixture::new();
    let id = fixture.bug("core only");
    let mut config = config();
    config.phases.relations = false;
    config.phases.post_move = false;

    let run = fixture.run(config).await;

    assert_eq!(outcome(&run, id), RecordOutcome::Created);
    let target = fixture.target_of(&run, id);
    let token = token_of(&target, id);
    assert!(token.completed_phases.is_empty());
    assert!(
        fixture
            .source
            .record(id)
            .unwrap()
            .field_str("System.Tags")
            .is_none()
    );
}
