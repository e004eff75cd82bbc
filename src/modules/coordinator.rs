//! Search → detail → reconcile → submit, as explicit cancellable stages.
//!
//! Every stage swaps in a fresh [`CancellationToken`] for itself and for the
//! stages downstream of it, so an older request that resolves late is
//! dropped instead of overwriting newer state. State is only touched while
//! the lock is held and the lock is never held across an await.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use derive_more::with_trait::Display;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::modules::catalog::{Catalog, CatalogError};
use crate::modules::navigation::{DEFAULT_LISTING_PATH, Navigator};
use crate::modules::provider::{MetadataProvider, ProviderError};
use crate::modules::query::SearchQuery;
use crate::modules::types::{Candidate, Record, RecordField};

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[display("search")]
    Search,
    #[display("detail")]
    Detail,
    #[display("reconcile")]
    Reconcile,
    #[display("submit")]
    Submit,
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Searching,
    CandidatesShown,
    DetailLoading,
    Reconciling,
    Editable,
    LockedExisting,
    Submitting,
    Done,
}

#[derive(Debug, Clone, Default, Display, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    #[display("idle")]
    Idle,
    #[display("running")]
    Running,
    #[display("succeeded")]
    Succeeded,
    #[display("failed: {_0}")]
    Failed(String),
    #[display("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStatuses {
    pub search: StageStatus,
    pub detail: StageStatus,
    pub reconcile: StageStatus,
    pub submit: StageStatus,
}

/// Everything a front end needs to render the page.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub query: String,
    pub candidates: Vec<Candidate>,
    /// The last search finished with no match.
    pub not_found: bool,
    pub record: Option<Record>,
    pub exists: bool,
    /// The record's identifier has not been checked against the catalog.
    pub needs_reconcile: bool,
    pub phase: Phase,
    pub status: StageStatuses,
    pub navigated_to: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            query: String::new(),
            candidates: Vec::new(),
            not_found: false,
            record: None,
            exists: false,
            needs_reconcile: false,
            phase: Phase::Idle,
            status: StageStatuses::default(),
            navigated_to: None,
        }
    }
}

impl Session {
    pub fn can_submit(&self) -> bool {
        self.record.is_some()
            && !self.exists
            && !self.needs_reconcile
            && !matches!(self.phase, Phase::Reconciling | Phase::Submitting | Phase::Done)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{0} superseded by a newer request")]
    Cancelled(Stage),
    #[error("no movie selected")]
    NoRecord,
    #[error("{0} is already in the catalog")]
    RecordLocked(String),
    #[error("{0} has not been checked against the catalog")]
    Unreconciled(String),
    #[error("{0} still running")]
    Busy(Stage),
    #[error("movie already submitted")]
    AlreadySubmitted,
    #[error("no movie matches {0:?}")]
    NoMatch(String),
    #[error("{0} movies match, pick one")]
    Ambiguous(usize),
    #[error("pick {pick} is out of range, {len} movies matched")]
    PickOutOfRange { pick: usize, len: usize },
}

struct Inner {
    session: Session,
    search_token: CancellationToken,
    detail_token: CancellationToken,
    reconcile_token: CancellationToken,
    reconciled_id: Option<String>,
    /// Bumped whenever the working record is replaced or dropped.
    generation: u64,
    /// Fields edited while a reconciliation was in flight.
    edited_while_reconciling: Vec<RecordField>,
}

impl Inner {
    fn new() -> Self {
        Self {
            session: Session::default(),
            search_token: CancellationToken::new(),
            detail_token: CancellationToken::new(),
            reconcile_token: CancellationToken::new(),
            reconciled_id: None,
            generation: 0,
            edited_while_reconciling: Vec::new(),
        }
    }

    /// Cancels `stage` and everything downstream of it, returning a fresh
    /// token for `stage`.
    fn restart(&mut self, stage: Stage) -> CancellationToken {
        let token = CancellationToken::new();
        match stage {
            Stage::Search => {
                self.search_token.cancel();
                self.detail_token.cancel();
                self.reconcile_token.cancel();
                self.search_token = token.clone();
            }
            Stage::Detail => {
                self.detail_token.cancel();
                self.reconcile_token.cancel();
                self.detail_token = token.clone();
            }
            Stage::Reconcile => {
                self.reconcile_token.cancel();
                self.reconcile_token = token.clone();
            }
            Stage::Submit => {}
        }
        token
    }

    /// Drops the working record and everything derived from it.
    fn discard_record(&mut self) {
        let session = &mut self.session;
        session.record = None;
        session.exists = false;
        session.navigated_to = None;
        session.status.detail = StageStatus::Idle;
        session.status.reconcile = StageStatus::Idle;
        session.status.submit = StageStatus::Idle;
        self.reconciled_id = None;
        self.generation += 1;
        self.edited_while_reconciling.clear();
    }

    fn settled_phase(&self) -> Phase {
        match &self.session.record {
            Some(_) if self.session.exists => Phase::LockedExisting,
            Some(_) => Phase::Editable,
            None if !self.session.candidates.is_empty() || self.session.not_found => {
                Phase::CandidatesShown
            }
            None => Phase::Idle,
        }
    }

    fn needs_reconcile(&self) -> bool {
        match self.session.record.as_ref().and_then(Record::imdb_id) {
            Some(id) => self.reconciled_id.as_deref() != Some(id),
            None => false,
        }
    }
}

/// Runs `work` unless `token` fires first.
async fn cancellable<F: Future>(token: &CancellationToken, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = work => Some(output),
    }
}

pub struct Coordinator<P, C, N> {
    provider: P,
    catalog: C,
    navigator: N,
    listing_path: String,
    inner: Mutex<Inner>,
}

impl<P, C, N> Coordinator<P, C, N>
where
    P: MetadataProvider,
    C: Catalog,
    N: Navigator,
{
    pub fn new(provider: P, catalog: C, navigator: N) -> Self {
        Self {
            provider,
            catalog,
            navigator,
            listing_path: DEFAULT_LISTING_PATH.to_string(),
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn with_listing_path(mut self, path: impl Into<String>) -> Self {
        self.listing_path = path.into();
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Session {
        let inner = self.lock();
        let mut session = inner.session.clone();
        session.needs_reconcile = inner.needs_reconcile();
        session
    }

    pub fn needs_reconcile(&self) -> bool {
        self.lock().needs_reconcile()
    }

    /// Looks `query` up at the provider and replaces the candidate list.
    ///
    /// Starting a search discards the working record and cancels every
    /// in-flight stage. A blank query only clears the list. On failure the
    /// previous list is kept and the search status reports the error.
    pub async fn search(&self, query: &str) -> Result<Vec<Candidate>, CoordinatorError> {
        let (token, search) = {
            let mut inner = self.lock();
            inner.session.query = query.to_string();

            let Some(search) = SearchQuery::classify(query) else {
                inner.search_token.cancel();
                inner.session.candidates.clear();
                inner.session.not_found = false;
                inner.session.status.search = StageStatus::Idle;
                inner.session.phase = inner.settled_phase();
                return Ok(Vec::new());
            };

            let token = inner.restart(Stage::Search);
            inner.discard_record();
            inner.session.phase = Phase::Searching;
            inner.session.status.search = StageStatus::Running;
            (token, search)
        };

        info!("Searching for {search}");
        let outcome = cancellable(&token, self.provider.search(&search)).await;

        let mut inner = self.lock();
        let result = match outcome {
            Some(result) if !token.is_cancelled() => result,
            _ => {
                debug!("Dropping superseded search for {search}");
                return Err(CoordinatorError::Cancelled(Stage::Search));
            }
        };

        match result {
            Ok(candidates) => {
                info!("Found {} candidates for {search}", candidates.len());
                inner.session.not_found = candidates.is_empty();
                inner.session.candidates = candidates.clone();
                inner.session.status.search = StageStatus::Succeeded;
                inner.session.phase = Phase::CandidatesShown;
                Ok(candidates)
            }
            Err(e) => {
                error!("Search for {search} failed: {e}");
                inner.session.status.search = StageStatus::Failed(e.to_string());
                inner.session.phase = inner.settled_phase();
                Err(e.into())
            }
        }
    }

    /// Picks `candidate` as the movie to load. Clears the query, the list
    /// and the working record; does not touch the network.
    pub fn select_candidate(&self, candidate: &Candidate) -> String {
        let mut inner = self.lock();
        inner.restart(Stage::Search);
        inner.discard_record();
        inner.session.query.clear();
        inner.session.candidates.clear();
        inner.session.not_found = false;
        inner.session.status.search = StageStatus::Idle;
        inner.session.phase = Phase::Idle;
        info!("Selected {candidate}");
        candidate.imdb_id.clone()
    }

    /// Loads the full record for `imdb_id` as the new working record.
    pub async fn fetch_detail(&self, imdb_id: &str) -> Result<Record, CoordinatorError> {
        let (token, previous) = {
            let mut inner = self.lock();
            let token = inner.restart(Stage::Detail);
            let previous = inner.session.phase;
            inner.session.phase = Phase::DetailLoading;
            inner.session.status.detail = StageStatus::Running;
            (token, previous)
        };

        info!("Fetching details for {imdb_id}");
        let outcome = cancellable(&token, self.provider.lookup_id(imdb_id)).await;

        let mut inner = self.lock();
        let result = match outcome {
            Some(result) if !token.is_cancelled() => result,
            _ => {
                debug!("Dropping superseded detail fetch for {imdb_id}");
                return Err(CoordinatorError::Cancelled(Stage::Detail));
            }
        };

        match result {
            Ok(record) => {
                info!("Loaded {record}");
                inner.session.record = Some(record.clone());
                inner.session.exists = false;
                inner.reconciled_id = None;
                inner.generation += 1;
                inner.session.status.detail = StageStatus::Succeeded;
                inner.session.phase = if inner.needs_reconcile() {
                    Phase::Reconciling
                } else {
                    Phase::Editable
                };
                Ok(record)
            }
            Err(e) => {
                error!("Fetching details for {imdb_id} failed: {e}");
                inner.session.status.detail = StageStatus::Failed(e.to_string());
                inner.session.phase = previous;
                Err(e.into())
            }
        }
    }

    /// Checks the catalog for a stored copy of the working record.
    ///
    /// Runs once per identifier; later calls for the same identifier return
    /// the known existence flag without a request. A stored match replaces
    /// the working record, including any edits made while the check was in
    /// flight, and locks it.
    pub async fn reconcile(&self) -> Result<bool, CoordinatorError> {
        let (token, imdb_id) = {
            let mut inner = self.lock();
            let imdb_id = match inner.session.record.as_ref() {
                Some(record) => record.imdb_id().map(str::to_string),
                None => return Err(CoordinatorError::NoRecord),
            };
            let Some(imdb_id) = imdb_id else {
                inner.session.phase = inner.settled_phase();
                return Ok(false);
            };
            if !inner.needs_reconcile() {
                return Ok(inner.session.exists);
            }
            let token = inner.restart(Stage::Reconcile);
            inner.edited_while_reconciling.clear();
            inner.session.phase = Phase::Reconciling;
            inner.session.status.reconcile = StageStatus::Running;
            (token, imdb_id)
        };

        info!("Checking catalog for {imdb_id}");
        let outcome = cancellable(&token, self.catalog.find_by_imdb_id(&imdb_id)).await;

        let mut inner = self.lock();
        let still_current =
            inner.session.record.as_ref().and_then(Record::imdb_id) == Some(imdb_id.as_str());
        let result = match outcome {
            Some(result) if still_current && !token.is_cancelled() => result,
            _ => {
                debug!("Dropping superseded catalog check for {imdb_id}");
                if !token.is_cancelled() {
                    inner.session.status.reconcile = StageStatus::Cancelled;
                    inner.session.phase = inner.settled_phase();
                }
                return Err(CoordinatorError::Cancelled(Stage::Reconcile));
            }
        };

        match result {
            Ok(stored) => {
                let matches = stored.len();
                match stored.into_iter().next() {
                    Some(existing) => {
                        if !inner.edited_while_reconciling.is_empty() {
                            warn!(
                                "Discarding edits to {:?}: {imdb_id} is already in the catalog",
                                inner.edited_while_reconciling
                            );
                        }
                        info!("{imdb_id} already in catalog ({matches} stored), locking");
                        inner.session.record = Some(existing);
                        inner.session.exists = true;
                        inner.session.phase = Phase::LockedExisting;
                    }
                    None => {
                        info!("{imdb_id} not in catalog yet");
                        inner.session.exists = false;
                        inner.session.phase = Phase::Editable;
                    }
                }
                inner.edited_while_reconciling.clear();
                inner.reconciled_id = Some(imdb_id);
                inner.session.status.reconcile = StageStatus::Succeeded;
                Ok(inner.session.exists)
            }
            Err(e) => {
                error!("Catalog check for {imdb_id} failed: {e}");
                inner.session.status.reconcile = StageStatus::Failed(e.to_string());
                inner.session.phase = inner.settled_phase();
                Err(e.into())
            }
        }
    }

    /// Selects `candidate`, loads its record and reconciles it with the catalog.
    pub async fn open(&self, candidate: &Candidate) -> Result<Session, CoordinatorError> {
        let imdb_id = self.select_candidate(candidate);
        self.fetch_detail(&imdb_id).await?;
        self.reconcile().await?;
        Ok(self.snapshot())
    }

    /// Searches and opens the single match, or the `pick`-th one.
    pub async fn lookup(
        &self,
        query: &str,
        pick: Option<usize>,
    ) -> Result<Session, CoordinatorError> {
        let candidates = self.search(query).await?;
        let candidate = match (pick, candidates.len()) {
            (_, 0) => return Err(CoordinatorError::NoMatch(query.to_string())),
            (Some(pick), len) if pick >= len => {
                return Err(CoordinatorError::PickOutOfRange { pick, len });
            }
            (Some(pick), _) => &candidates[pick],
            (None, 1) => &candidates[0],
            (None, len) => return Err(CoordinatorError::Ambiguous(len)),
        };
        self.open(candidate).await
    }

    /// Overwrites one field of the working record.
    ///
    /// Changing the identifier invalidates the catalog check; call
    /// [`Coordinator::reconcile`] again before submitting.
    pub fn edit_field(
        &self,
        field: RecordField,
        value: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let mut inner = self.lock();
        let reconciling = inner.session.phase == Phase::Reconciling;
        let Some(record) = inner.session.record.as_mut() else {
            return Err(CoordinatorError::NoRecord);
        };
        record.set(field, value);
        debug!("Edited {field}");

        if reconciling {
            inner.edited_while_reconciling.push(field);
        }
        if field == RecordField::ImdbId && inner.needs_reconcile() {
            inner.session.exists = false;
            inner.session.status.reconcile = StageStatus::Idle;
            if !reconciling {
                inner.session.phase = inner.settled_phase();
            }
        }
        Ok(())
    }

    /// Publishes the working record and navigates to the listing page.
    ///
    /// Refused until the record's identifier has been checked against the
    /// catalog. If the record is replaced or dropped while the request is in
    /// flight, the outcome is logged but neither recorded nor followed by
    /// navigation.
    pub async fn submit(&self) -> Result<Value, CoordinatorError> {
        let (record, previous, generation) = {
            let mut inner = self.lock();
            let session = &inner.session;
            let Some(record) = session.record.clone() else {
                return Err(CoordinatorError::NoRecord);
            };
            if session.exists {
                let id = record.imdb_id().unwrap_or_default().to_string();
                return Err(CoordinatorError::RecordLocked(id));
            }
            match session.phase {
                Phase::Reconciling => return Err(CoordinatorError::Busy(Stage::Reconcile)),
                Phase::Submitting => return Err(CoordinatorError::Busy(Stage::Submit)),
                Phase::Done => return Err(CoordinatorError::AlreadySubmitted),
                _ => {}
            }
            if inner.needs_reconcile() {
                let id = record.imdb_id().unwrap_or_default().to_string();
                return Err(CoordinatorError::Unreconciled(id));
            }
            let previous = session.phase;
            let generation = inner.generation;
            inner.session.phase = Phase::Submitting;
            inner.session.status.submit = StageStatus::Running;
            (record, previous, generation)
        };

        info!("Submitting {record}");
        let result = self.catalog.add(&record).await;

        {
            let mut inner = self.lock();
            if inner.generation != generation {
                match &result {
                    Ok(_) => info!("Catalog accepted {record} after it was closed"),
                    Err(e) => error!("Submitting {record} failed after it was closed: {e}"),
                }
                return result.map_err(CoordinatorError::from);
            }
            match &result {
                Ok(_) => {
                    inner.session.status.submit = StageStatus::Succeeded;
                    inner.session.phase = Phase::Done;
                    inner.session.navigated_to = Some(self.listing_path.clone());
                }
                Err(e) => {
                    let message = match e {
                        CatalogError::Rejected { body, .. } if !body.is_empty() => body.clone(),
                        other => other.to_string(),
                    };
                    error!("Submitting {record} failed: {message}");
                    inner.session.status.submit = StageStatus::Failed(message);
                    inner.session.phase = previous;
                }
            }
        }

        let confirmation = result?;
        info!("Catalog accepted {record}: {confirmation}");
        self.navigator.navigate(&self.listing_path);
        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::modules::navigation::RecordingNavigator;

    fn record(id: &str, title: &str) -> Record {
        let mut record = Record::default();
        record.set(RecordField::ImdbId, id);
        record.set(RecordField::Title, title);
        record.set(RecordField::Year, "2010");
        record
    }

    #[derive(Default)]
    struct FakeProvider {
        titles: HashMap<String, Vec<Candidate>>,
        records: HashMap<String, Record>,
        delays: HashMap<String, Duration>,
        failing_queries: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MetadataProvider for FakeProvider {
        async fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>, ProviderError> {
            self.log(query.to_string());
            if let Some(delay) = self.delays.get(query.text()) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing_queries.contains(query.text()) {
                return Err(ProviderError::Status(500, "down".into()));
            }
            Ok(match query {
                SearchQuery::ImdbId(id) => self
                    .records
                    .get(id)
                    .and_then(Record::to_candidate)
                    .into_iter()
                    .collect(),
                SearchQuery::Title(title) => self.titles.get(title).cloned().unwrap_or_default(),
            })
        }

        async fn lookup_id(&self, imdb_id: &str) -> Result<Record, ProviderError> {
            self.log(format!("lookup:{imdb_id}"));
            if let Some(delay) = self.delays.get(imdb_id) {
                tokio::time::sleep(*delay).await;
            }
            self.records
                .get(imdb_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound("Incorrect IMDb ID.".into()))
        }
    }

    #[derive(Default)]
    struct FakeCatalog {
        stored: Mutex<HashMap<String, Vec<Record>>>,
        reject_with: Option<String>,
        lookup_delay: Option<Duration>,
        add_delay: Option<Duration>,
        lookups: Mutex<Vec<String>>,
        added: Mutex<Vec<Record>>,
    }

    impl Catalog for FakeCatalog {
        async fn find_by_imdb_id(&self, imdb_id: &str) -> Result<Vec<Record>, CatalogError> {
            self.lookups.lock().unwrap().push(imdb_id.to_string());
            if let Some(delay) = self.lookup_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.stored.lock().unwrap().get(imdb_id).cloned().unwrap_or_default())
        }

        async fn add(&self, record: &Record) -> Result<Value, CatalogError> {
            if let Some(delay) = self.add_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(body) = &self.reject_with {
                return Err(CatalogError::Rejected {
                    status: 400,
                    body: body.clone(),
                });
            }
            self.added.lock().unwrap().push(record.clone());
            Ok(serde_json::json!({"message": "created"}))
        }
    }

    fn inception_provider() -> FakeProvider {
        let mut provider = FakeProvider::default();
        provider.titles.insert(
            "Inception".into(),
            vec![
                Candidate::new("tt1375666", "Inception", "2010", "N/A"),
                Candidate::new("tt5295894", "Inception: The Cobol Job", "2010", "N/A"),
            ],
        );
        provider
            .records
            .insert("tt1375666".into(), record("tt1375666", "Inception"));
        provider
    }

    type TestCoordinator = Coordinator<FakeProvider, Arc<FakeCatalog>, Arc<RecordingNavigator>>;

    fn harness(
        provider: FakeProvider,
        catalog: FakeCatalog,
    ) -> (TestCoordinator, Arc<FakeCatalog>, Arc<RecordingNavigator>) {
        let catalog = Arc::new(catalog);
        let navigator = Arc::new(RecordingNavigator::default());
        let coordinator = Coordinator::new(provider, catalog.clone(), navigator.clone());
        (coordinator, catalog, navigator)
    }

    #[tokio::test]
    async fn title_search_exposes_the_match_list() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        let found = coordinator.search("Inception").await.unwrap();
        assert_eq!(found.len(), 2);

        let session = coordinator.snapshot();
        assert_eq!(session.candidates, found);
        assert_eq!(session.phase, Phase::CandidatesShown);
        assert!(!session.not_found);
    }

    #[tokio::test]
    async fn identifier_search_wraps_one_result() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        let found = coordinator.search("tt1375666").await.unwrap();
        assert_eq!(found, vec![Candidate::new("tt1375666", "Inception", "2010", "")]);
        assert_eq!(coordinator.provider.calls(), vec!["id:tt1375666"]);
    }

    #[tokio::test]
    async fn no_match_sets_not_found() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        assert!(coordinator.search("Nothing Like This").await.unwrap().is_empty());
        let session = coordinator.snapshot();
        assert!(session.not_found);
        assert_eq!(session.phase, Phase::CandidatesShown);
    }

    #[tokio::test]
    async fn blank_query_clears_without_a_request() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        coordinator.search("Inception").await.unwrap();
        assert!(coordinator.search("  ").await.unwrap().is_empty());
        assert!(coordinator.snapshot().candidates.is_empty());
        assert_eq!(coordinator.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_search_keeps_previous_list() {
        let mut provider = inception_provider();
        provider.failing_queries.insert("Interstellar".into());
        let (coordinator, _, _) = harness(provider, FakeCatalog::default());
        coordinator.search("Inception").await.unwrap();

        let err = coordinator.search("Interstellar").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Provider(_)));

        let session = coordinator.snapshot();
        assert_eq!(session.candidates[0].imdb_id, "tt1375666");
        assert_eq!(session.candidates.len(), 2);
        assert!(matches!(session.status.search, StageStatus::Failed(_)));
        assert_eq!(session.phase, Phase::CandidatesShown);
    }

    #[tokio::test]
    async fn superseded_search_never_lands() {
        let mut provider = inception_provider();
        provider
            .titles
            .insert("Incep".into(), vec![Candidate::new("tt0000001", "Incep", "1999", "")]);
        provider.delays.insert("Incep".into(), Duration::from_millis(200));
        let (coordinator, _, _) = harness(provider, FakeCatalog::default());

        let (slow, fast) = tokio::join!(coordinator.search("Incep"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.search("Inception").await
        });

        assert!(matches!(slow, Err(CoordinatorError::Cancelled(Stage::Search))));
        assert_eq!(fast.unwrap().len(), 2);
        let session = coordinator.snapshot();
        assert_eq!(session.query, "Inception");
        assert_eq!(session.candidates.len(), 2);
        assert_eq!(session.status.search, StageStatus::Succeeded);
    }

    #[tokio::test]
    async fn selecting_clears_query_list_and_record() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        coordinator.lookup("Inception", Some(0)).await.unwrap();
        coordinator.search("Inception").await.unwrap();

        let candidates = coordinator.snapshot().candidates;
        let id = coordinator.select_candidate(&candidates[1]);
        assert_eq!(id, "tt5295894");

        let session = coordinator.snapshot();
        assert!(session.query.is_empty());
        assert!(session.candidates.is_empty());
        assert!(session.record.is_none());
        assert!(!session.exists);
    }

    #[tokio::test]
    async fn failed_detail_leaves_record_empty() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        let candidate = Candidate::new("tt5295894", "Inception: The Cobol Job", "2010", "");
        let err = coordinator.open(&candidate).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Provider(ProviderError::NotFound(_))));

        let session = coordinator.snapshot();
        assert!(session.record.is_none());
        assert!(matches!(session.status.detail, StageStatus::Failed(_)));
        assert_eq!(session.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn reconcile_runs_once_per_identifier() {
        let (coordinator, catalog, _) = harness(inception_provider(), FakeCatalog::default());
        coordinator.fetch_detail("tt1375666").await.unwrap();
        assert!(coordinator.needs_reconcile());

        assert!(!coordinator.reconcile().await.unwrap());
        assert!(!coordinator.reconcile().await.unwrap());
        coordinator.edit_field(RecordField::HdUrl, "https://example.com/hd").unwrap();
        assert!(!coordinator.reconcile().await.unwrap());
        assert_eq!(*catalog.lookups.lock().unwrap(), vec!["tt1375666"]);

        coordinator.edit_field(RecordField::ImdbId, "tt0816692").unwrap();
        assert!(coordinator.needs_reconcile());
        coordinator.reconcile().await.unwrap();
        assert_eq!(*catalog.lookups.lock().unwrap(), vec!["tt1375666", "tt0816692"]);
    }

    #[tokio::test]
    async fn edit_without_record_is_refused() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        let err = coordinator.edit_field(RecordField::HdUrl, "x").unwrap_err();
        assert!(matches!(err, CoordinatorError::NoRecord));
    }

    #[tokio::test]
    async fn new_title_flow_submits_edited_record() {
        let (coordinator, catalog, navigator) =
            harness(inception_provider(), FakeCatalog::default());

        let candidates = coordinator.search("Inception").await.unwrap();
        assert_eq!(candidates.len(), 2);
        let session = coordinator.open(&candidates[0]).await.unwrap();
        assert!(!session.exists);
        assert_eq!(session.phase, Phase::Editable);
        assert!(session.can_submit());

        coordinator.edit_field(RecordField::HdUrl, "https://example.com/hd").unwrap();
        coordinator.submit().await.unwrap();

        let added = catalog.added.lock().unwrap().clone();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].title.as_deref(), Some("Inception"));
        assert_eq!(added[0].hd_url.as_deref(), Some("https://example.com/hd"));
        assert_eq!(navigator.visited(), vec![DEFAULT_LISTING_PATH]);

        let session = coordinator.snapshot();
        assert_eq!(session.phase, Phase::Done);
        assert_eq!(session.navigated_to.as_deref(), Some(DEFAULT_LISTING_PATH));
        assert!(matches!(
            coordinator.submit().await,
            Err(CoordinatorError::AlreadySubmitted)
        ));
        assert_eq!(catalog.added.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stored_record_locks_submission() {
        let catalog = FakeCatalog::default();
        let mut stored = record("tt1375666", "Inception");
        stored.set(RecordField::QhdUrl, "https://cdn.example.com/qhd");
        catalog
            .stored
            .lock()
            .unwrap()
            .insert("tt1375666".into(), vec![stored.clone()]);
        let (coordinator, catalog, navigator) = harness(inception_provider(), catalog);

        let candidates = coordinator.search("tt1375666").await.unwrap();
        assert_eq!(candidates.len(), 1);
        let session = coordinator.open(&candidates[0]).await.unwrap();

        assert!(session.exists);
        assert_eq!(session.phase, Phase::LockedExisting);
        assert_eq!(session.record, Some(stored));
        assert!(!session.can_submit());

        let err = coordinator.submit().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::RecordLocked(id) if id == "tt1375666"));
        assert!(catalog.added.lock().unwrap().is_empty());
        assert!(navigator.visited().is_empty());
    }

    #[tokio::test]
    async fn rejected_submit_reports_body_and_stays() {
        let catalog = FakeCatalog {
            reject_with: Some("{\"error\":\"Title is required\"}".into()),
            ..FakeCatalog::default()
        };
        let (coordinator, _, navigator) = harness(inception_provider(), catalog);
        coordinator.lookup("tt1375666", None).await.unwrap();

        assert!(coordinator.submit().await.is_err());
        let session = coordinator.snapshot();
        assert_eq!(
            session.status.submit,
            StageStatus::Failed("{\"error\":\"Title is required\"}".into())
        );
        assert_eq!(session.phase, Phase::Editable);
        assert!(navigator.visited().is_empty());
    }

    #[tokio::test]
    async fn submit_without_record_is_refused() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        assert!(matches!(coordinator.submit().await, Err(CoordinatorError::NoRecord)));
    }

    #[tokio::test]
    async fn lookup_needs_a_pick_for_many_matches() {
        let (coordinator, _, _) = harness(inception_provider(), FakeCatalog::default());
        assert!(matches!(
            coordinator.lookup("Inception", None).await,
            Err(CoordinatorError::Ambiguous(2))
        ));
        assert!(matches!(
            coordinator.lookup("Inception", Some(5)).await,
            Err(CoordinatorError::PickOutOfRange { pick: 5, len: 2 })
        ));
        assert!(matches!(
            coordinator.lookup("Nope", None).await,
            Err(CoordinatorError::NoMatch(_))
        ));
    }

    #[tokio::test]
    async fn detail_superseded_by_a_new_search_is_dropped() {
        let mut provider = inception_provider();
        provider.delays.insert("tt1375666".into(), Duration::from_millis(200));
        let (coordinator, catalog, _) = harness(provider, FakeCatalog::default());

        let (slow, fresh) = tokio::join!(coordinator.fetch_detail("tt1375666"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.search("Inception").await
        });

        assert!(matches!(slow, Err(CoordinatorError::Cancelled(Stage::Detail))));
        assert_eq!(fresh.unwrap().len(), 2);
        let session = coordinator.snapshot();
        assert!(session.record.is_none());
        assert_eq!(session.phase, Phase::CandidatesShown);
        assert_eq!(session.status.detail, StageStatus::Idle);
        assert!(catalog.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn newer_selection_wins_over_a_slow_detail() {
        let mut provider = inception_provider();
        provider.records.insert(
            "tt5295894".into(),
            record("tt5295894", "Inception: The Cobol Job"),
        );
        provider.delays.insert("tt1375666".into(), Duration::from_millis(200));
        let (coordinator, _, _) = harness(provider, FakeCatalog::default());
        let candidates = coordinator.search("Inception").await.unwrap();

        let (slow, fast) = tokio::join!(coordinator.open(&candidates[0]), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.open(&candidates[1]).await
        });

        assert!(matches!(slow, Err(CoordinatorError::Cancelled(Stage::Detail))));
        fast.unwrap();
        let session = coordinator.snapshot();
        assert_eq!(
            session.record.as_ref().and_then(Record::imdb_id),
            Some("tt5295894")
        );
        assert_eq!(session.phase, Phase::Editable);
        assert!(session.can_submit());
    }

    #[tokio::test]
    async fn search_cancels_a_running_catalog_check() {
        let catalog = FakeCatalog {
            lookup_delay: Some(Duration::from_millis(200)),
            ..FakeCatalog::default()
        };
        catalog
            .stored
            .lock()
            .unwrap()
            .insert("tt1375666".into(), vec![record("tt1375666", "Inception")]);
        let (coordinator, _, _) = harness(inception_provider(), catalog);
        coordinator.fetch_detail("tt1375666").await.unwrap();

        let (check, found) = tokio::join!(coordinator.reconcile(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.search("Inception").await
        });

        assert!(matches!(check, Err(CoordinatorError::Cancelled(Stage::Reconcile))));
        assert_eq!(found.unwrap().len(), 2);
        let session = coordinator.snapshot();
        assert!(session.record.is_none());
        assert!(!session.exists);
        assert_eq!(session.phase, Phase::CandidatesShown);
        assert_eq!(session.status.reconcile, StageStatus::Idle);
    }

    #[tokio::test]
    async fn identifier_edit_mid_check_discards_the_answer() {
        let catalog = FakeCatalog {
            lookup_delay: Some(Duration::from_millis(200)),
            ..FakeCatalog::default()
        };
        catalog
            .stored
            .lock()
            .unwrap()
            .insert("tt1375666".into(), vec![record("tt1375666", "Inception")]);
        let (coordinator, catalog, _) = harness(inception_provider(), catalog);
        coordinator.fetch_detail("tt1375666").await.unwrap();

        let (check, edit) = tokio::join!(coordinator.reconcile(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.edit_field(RecordField::ImdbId, "tt0816692")
        });

        edit.unwrap();
        assert!(matches!(check, Err(CoordinatorError::Cancelled(Stage::Reconcile))));
        let session = coordinator.snapshot();
        assert!(!session.exists);
        assert!(session.needs_reconcile);
        assert_eq!(session.status.reconcile, StageStatus::Cancelled);
        assert_eq!(session.phase, Phase::Editable);
        assert_eq!(
            session.record.as_ref().and_then(Record::imdb_id),
            Some("tt0816692")
        );

        assert!(!coordinator.reconcile().await.unwrap());
        assert_eq!(*catalog.lookups.lock().unwrap(), vec!["tt1375666", "tt0816692"]);
    }

    #[tokio::test]
    async fn edits_during_check_yield_to_the_stored_record() {
        let catalog = FakeCatalog {
            lookup_delay: Some(Duration::from_millis(200)),
            ..FakeCatalog::default()
        };
        let stored = record("tt1375666", "Inception");
        catalog
            .stored
            .lock()
            .unwrap()
            .insert("tt1375666".into(), vec![stored.clone()]);
        let (coordinator, _, _) = harness(inception_provider(), catalog);
        coordinator.fetch_detail("tt1375666").await.unwrap();

        let (check, edit) = tokio::join!(coordinator.reconcile(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.edit_field(RecordField::HdUrl, "https://example.com/hd")
        });

        edit.unwrap();
        assert!(check.unwrap());
        let session = coordinator.snapshot();
        assert_eq!(session.record, Some(stored));
        assert_eq!(session.phase, Phase::LockedExisting);
        assert!(!session.can_submit());
    }

    #[tokio::test]
    async fn edits_during_check_survive_without_a_stored_match() {
        let catalog = FakeCatalog {
            lookup_delay: Some(Duration::from_millis(200)),
            ..FakeCatalog::default()
        };
        let (coordinator, _, _) = harness(inception_provider(), catalog);
        coordinator.fetch_detail("tt1375666").await.unwrap();

        let (check, edit) = tokio::join!(coordinator.reconcile(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.edit_field(RecordField::HdUrl, "https://example.com/hd")
        });

        edit.unwrap();
        assert!(!check.unwrap());
        let session = coordinator.snapshot();
        assert_eq!(
            session.record.and_then(|r| r.hd_url),
            Some("https://example.com/hd".to_string())
        );
        assert_eq!(session.phase, Phase::Editable);
    }

    #[tokio::test]
    async fn edited_identifier_is_checked_before_submit() {
        let catalog = FakeCatalog::default();
        catalog
            .stored
            .lock()
            .unwrap()
            .insert("tt0816692".into(), vec![record("tt0816692", "Interstellar")]);
        let (coordinator, catalog, navigator) = harness(inception_provider(), catalog);
        coordinator.lookup("tt1375666", None).await.unwrap();

        coordinator.edit_field(RecordField::ImdbId, "tt0816692").unwrap();
        let session = coordinator.snapshot();
        assert!(session.needs_reconcile);
        assert!(!session.can_submit());
        let err = coordinator.submit().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Unreconciled(id) if id == "tt0816692"));
        assert!(catalog.added.lock().unwrap().is_empty());

        assert!(coordinator.reconcile().await.unwrap());
        assert!(matches!(
            coordinator.submit().await,
            Err(CoordinatorError::RecordLocked(_))
        ));
        assert!(catalog.added.lock().unwrap().is_empty());
        assert!(navigator.visited().is_empty());
    }

    #[tokio::test]
    async fn search_during_submit_keeps_the_new_session() {
        let catalog = FakeCatalog {
            add_delay: Some(Duration::from_millis(200)),
            ..FakeCatalog::default()
        };
        let (coordinator, catalog, navigator) = harness(inception_provider(), catalog);
        coordinator.lookup("tt1375666", None).await.unwrap();

        let (published, found) = tokio::join!(coordinator.submit(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator.search("Inception").await
        });

        assert!(published.is_ok());
        assert_eq!(found.unwrap().len(), 2);
        assert_eq!(catalog.added.lock().unwrap().len(), 1);
        assert!(navigator.visited().is_empty());

        let session = coordinator.snapshot();
        assert!(session.record.is_none());
        assert_eq!(session.phase, Phase::CandidatesShown);
        assert_eq!(session.navigated_to, None);
        assert_eq!(session.status.submit, StageStatus::Idle);
    }
}
