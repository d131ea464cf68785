use std::sync::Arc;

use ferry_common::{RecordState, WorkItemId};
use ferry_config::MigrationConfig;
use ferry_remote::{Expand, HttpRemoteClient, RemoteClient, http::HttpClientConfig};
use tracing::{Span, info, info_span, warn};
use uuid::Uuid;

use crate::{
    context::MigrationContext,
    error::MigrationError,
    phases::{CoreFieldsPhase, PhaseStrategy, PostMovePhase, RelationsPhase},
    pipeline::PhasePipeline,
    processors::ProcessorRegistry,
    report::MigrationReport,
    resolver::SyncResolver,
};

/// Final record states of a run, with the report derived from them.
#[derive(Debug)]
pub struct MigrationRun {
    pub states: Vec<RecordState>,
    pub report: MigrationReport,
}

/// Entry point of a migration run.
pub struct Migrator {
    ctx: Arc<MigrationContext>,
    resolver: SyncResolver,
    pipeline: PhasePipeline,
    run_id: Uuid,
    span: Span,
}

impl Migrator {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn RemoteClient>,
        target: Arc<dyn RemoteClient>,
    ) -> Result<Self, MigrationError> {
        Self::with_registry(config, source, target, ProcessorRegistry::standard())
    }

    pub fn with_registry(
        config: MigrationConfig,
        source: Arc<dyn RemoteClient>,
        target: Arc<dyn RemoteClient>,
        registry: ProcessorRegistry,
    ) -> Result<Self, MigrationError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("migration", %run_id);
        let registry = registry.enabled(&config);
        let phase_names = registry.relation_phase_names(&config);
        let ctx = Arc::new(MigrationContext::new(config, source, target, phase_names)?);

        let phases: Vec<Box<dyn PhaseStrategy>> = vec![
            Box::new(CoreFieldsPhase::new(
                registry.pre_processors,
                registry.field_processors,
            )),
            Box::new(RelationsPhase::new(registry.relation_processors)),
            Box::new(PostMovePhase),
        ];
        Ok(Self {
            resolver: SyncResolver::new(ctx.clone(), span.clone()),
            pipeline: PhasePipeline::new(ctx.clone(), phases, span.clone()),
            ctx,
            run_id,
            span,
        })
    }

    /// Builds http clients for both endpoints from `config`. Access tokens are read
    /// from the environment.
    pub fn connect(config: MigrationConfig) -> Result<Self, MigrationError> {
        let http_config = HttpClientConfig {
            timeout: config.batch.request_timeout(),
            ..Default::default()
        };
        let source = HttpRemoteClient::new(
            &config.source.url,
            &config.source.project,
            Some(config.source_token()?),
            http_config.clone(),
        )?;
        let target = HttpRemoteClient::new(
            &config.target.url,
            &config.target.project,
            Some(config.target_token()?),
            http_config,
        )?;
        Self::new(config, Arc::new(source), Arc::new(target))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn context(&self) -> &MigrationContext {
        &self.ctx
    }

    /// Checks the configuration and runs the source query. Nothing is written.
    pub async fn validate(&self) -> Result<Vec<WorkItemId>, MigrationError> {
        self.ctx.config.validate()?;
        let query = self.ctx.config.source.query.as_deref().unwrap_or_default();
        let ids = self
            .ctx
            .retry_policy(self.span.clone())
            .run("run_query", self.run_id, || self.ctx.source.run_query(query), None)
            .await
            .map_err(MigrationError::SourceQuery)?;
        info!(parent: &self.span, records = ids.len(), "Source query selected records");
        Ok(ids)
    }

    pub async fn migrate(&self) -> Result<MigrationRun, MigrationError> {
        let ids = self.validate().await?;

        let sources = self
            .ctx
            .retry_policy(self.span.clone())
            .run(
                "fetch_records",
                self.run_id,
                || self.ctx.source.fetch_records(&ids, Expand::None),
                None,
            )
            .await
            .map_err(MigrationError::SourceRead)?;
        if sources.len() < ids.len() {
            warn!(
                parent: &self.span,
                selected = ids.len(),
                readable = sources.len(),
                "Some selected records could not be read"
            );
        }

        let mut states: Vec<RecordState> = sources
            .into_iter()
            .map(|source| {
                let mut state =
                    RecordState::new(source.id, self.ctx.source.record_url(source.id), source.rev);
                state.work_item_type = source.work_item_type().map(str::to_owned);
                state
            })
            .collect();

        self.resolver.resolve(&mut states).await;
        let states = self.pipeline.run(states).await;
        let report = MigrationReport::new(self.run_id, &states, &self.ctx);

        let totals = &report.totals;
        info!(
            parent: &self.span,
            created = totals.created,
            updated = totals.updated,
            skipped = totals.skipped_unchanged,
            failed = totals.failed,
            "Migration finished"
        );
        Ok(MigrationRun { states, report })
    }
}
