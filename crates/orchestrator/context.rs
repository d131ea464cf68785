use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use ferry_common::WorkItemId;
use ferry_config::MigrationConfig;
use ferry_remote::{RemoteClient, RemoteError, types::encode_path_segment};
use regex::Regex;
use tracing::Span;
use uuid::Uuid;

use crate::{
    diagnostics::Diagnostics, retry::RetryPolicy, single_flight::SingleFlight,
};

/// Which side of the migration a phase writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

/// Process-wide source id to target id map.
///
/// Filled by the resolver and by phase 1 creates, read by later phases. Entries are
/// never replaced: the first writer wins.
#[derive(Debug, Default)]
pub struct SourceTargetMap {
    inner: RwLock<HashMap<WorkItemId, WorkItemId>>,
}

impl SourceTargetMap {
    /// Inserts the pair unless the source id is already mapped and returns the stored
    /// target id.
    pub fn insert_if_absent(&self, source_id: WorkItemId, target_id: WorkItemId) -> WorkItemId {
        if let Some(existing) = self.get(source_id) {
            return existing;
        }
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *map.entry(source_id).or_insert(target_id)
    }

    pub fn get(&self, source_id: WorkItemId) -> Option<WorkItemId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source_id)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Target field catalogue for one work item type, `None` when the type is missing.
pub type TypeFields = Option<Arc<HashSet<String>>>;

/// Patterns over rich text field content, compiled once per run.
#[derive(Debug)]
pub struct ContentPatterns {
    /// `src` attribute of embedded images.
    pub inline_image: Regex,
    /// Links to source records, either the REST url or the web edit url.
    pub record_reference: Regex,
}

impl ContentPatterns {
    pub fn new(source_url: &str) -> Result<Self, regex::Error> {
        let base = regex::escape(source_url.trim_end_matches('/'));
        Ok(Self {
            inline_image: Regex::new(r#"(?i)<img[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)?,
            record_reference: Regex::new(&format!(
                r#"(?i){base}(?:/_apis/wit/workitems/|/[^/\s"'<>]+/_workitems/edit/)(\d+)"#
            ))?,
        })
    }
}

/// State shared by every component for the duration of one run.
pub struct MigrationContext {
    pub config: MigrationConfig,
    pub source: Arc<dyn RemoteClient>,
    pub target: Arc<dyn RemoteClient>,
    pub id_map: SourceTargetMap,
    pub diagnostics: Diagnostics,
    pub patterns: ContentPatterns,
    enabled_relation_phases: Vec<String>,
    source_changed: RwLock<HashSet<WorkItemId>>,
    type_fields: SingleFlight<String, TypeFields>,
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("enabled_relation_phases", &self.enabled_relation_phases)
            .field("mapped", &self.id_map.len())
            .finish_non_exhaustive()
    }
}

impl MigrationContext {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn RemoteClient>,
        target: Arc<dyn RemoteClient>,
        enabled_relation_phases: Vec<String>,
    ) -> Result<Self, regex::Error> {
        let diagnostics = Diagnostics::new(config.diagnostics.dir.clone());
        let patterns = ContentPatterns::new(&config.source.url)?;
        Ok(Self {
            config,
            source,
            target,
            id_map: SourceTargetMap::default(),
            diagnostics,
            patterns,
            enabled_relation_phases,
            source_changed: RwLock::new(HashSet::new()),
            type_fields: SingleFlight::default(),
        })
    }

    pub fn client(&self, endpoint: Endpoint) -> &Arc<dyn RemoteClient> {
        match endpoint {
            Endpoint::Source => &self.source,
            Endpoint::Target => &self.target,
        }
    }

    pub fn retry_policy(&self, span: Span) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.batch, span)
    }

    /// Names written into sync tokens by phase 2, in processor order. Empty when the
    /// relations phase is disabled.
    pub fn enabled_relation_phases(&self) -> &[String] {
        &self.enabled_relation_phases
    }

    pub fn mark_source_changed(&self, source_id: WorkItemId) {
        self.source_changed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id);
    }

    pub fn is_source_changed(&self, source_id: WorkItemId) -> bool {
        self.source_changed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&source_id)
    }

    /// Source record a url points at, when the whole url is a link to a source record.
    pub fn source_reference(&self, url: &str) -> Option<WorkItemId> {
        let url = url.trim_end_matches('/');
        let captures = self.patterns.record_reference.captures(url)?;
        let whole = captures.get(0)?;
        if whole.start() != 0 || whole.end() != url.len() {
            return None;
        }
        captures[1].parse().ok()
    }

    /// Link to the target counterpart of `source_id`, in the form `reference` uses
    /// (REST url or web edit url). `None` when the source record is not mapped.
    pub fn retarget_reference(&self, reference: &str, source_id: WorkItemId) -> Option<String> {
        let target_id = self.id_map.get(source_id)?;
        if reference.to_ascii_lowercase().contains("/_workitems/edit/") {
            Some(format!(
                "{}/{}/_workitems/edit/{target_id}",
                self.config.target.url.trim_end_matches('/'),
                encode_path_segment(&self.config.target.project),
            ))
        } else {
            Some(self.target.record_url(target_id))
        }
    }

    /// Field catalogue of `work_item_type` on the target. Looked up once per type no
    /// matter how many batches ask concurrently.
    pub async fn target_type_fields(&self, work_item_type: &str) -> Result<TypeFields, RemoteError> {
        let target = self.target.clone();
        let retry = self.retry_policy(Span::current());
        let name = work_item_type.to_owned();
        self.type_fields
            .get_or_try_init(work_item_type.to_owned(), || async move {
                let fields = retry
                    .run(
                        "work_item_type_fields",
                        Uuid::new_v4(),
                        || target.work_item_type_fields(&name),
                        None,
                    )
                    .await?;
                Ok(fields.map(|fields| Arc::new(fields.into_iter().collect())))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_remote::InMemoryRemote;
    use std::thread;

    fn context() -> MigrationContext {
        let config: MigrationConfig = r#"
            [source]
            url = "https://src/coll"
            project = "A"
            query = "SELECT [System.Id] FROM WorkItems"
            [target]
            url = "https://tgt/coll/"
            project = "Team B"
        "#
        .parse()
        .unwrap();
        MigrationContext::new(
            config,
            Arc::new(InMemoryRemote::new("https://src/coll", "A")),
            Arc::new(InMemoryRemote::new("https://tgt/coll", "Team B")),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn first_mapping_wins() {
        let map = Arc::new(SourceTargetMap::default());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let map = map.clone();
                thread::spawn(move || map.insert_if_absent(7, 100 + worker))
            })
            .collect();
        let stored: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(stored.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(map.get(7), Some(stored[0]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn record_reference_pattern_matches_both_url_forms() {
        let patterns = ContentPatterns::new("https://dev.example.com/old/").unwrap();
        let text = r#"see https://dev.example.com/old/_apis/wit/workItems/12 and
            <a href="https://dev.example.com/old/Legacy/_workitems/edit/34">x</a>
            but not https://elsewhere.example.com/_apis/wit/workItems/56"#;
        let ids: Vec<&str> = patterns
            .record_reference
            .captures_iter(text)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(ids, vec!["12", "34"]);
    }

    #[test]
    fn only_whole_urls_are_source_references() {
        let ctx = context();
        assert_eq!(ctx.source_reference("https://src/coll/_apis/wit/workItems/12"), Some(12));
        assert_eq!(ctx.source_reference("https://SRC/coll/A/_workitems/edit/12/"), Some(12));
        assert_eq!(ctx.source_reference("https://src/coll/_apis/wit/workItems/12/updates"), None);
        assert_eq!(ctx.source_reference("https://tgt/coll/_apis/wit/workItems/12"), None);
        assert_eq!(ctx.source_reference("https://docs.example.com/page"), None);
    }

    #[test]
    fn references_are_retargeted_in_their_own_form() {
        let ctx = context();
        ctx.id_map.insert_if_absent(12, 40);
        assert_eq!(
            ctx.retarget_reference("https://src/coll/_apis/wit/workItems/12", 12).as_deref(),
            Some("https://tgt/coll/_apis/wit/workItems/40")
        );
        assert_eq!(
            ctx.retarget_reference("https://src/coll/A/_workitems/edit/12", 12).as_deref(),
            Some("https://tgt/coll/Team%20B/_workitems/edit/40")
        );
        assert_eq!(ctx.retarget_reference("https://src/coll/_apis/wit/workItems/13", 13), None);
    }

    #[test]
    fn inline_image_pattern_captures_src() {
        let patterns = ContentPatterns::new("https://dev.example.com/old").unwrap();
        let html = r#"<p><IMG alt='x' src="https://dev.example.com/old/_apis/wit/attachments/a1?fileName=shot.png"></p>"#;
        let captured = patterns.inline_image.captures(html).unwrap();
        assert_eq!(
            &captured[1],
            "https://dev.example.com/old/_apis/wit/attachments/a1?fileName=shot.png"
        );
    }
}
