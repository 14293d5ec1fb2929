use async_trait::async_trait;
use chrono::NaiveDate;
use portal_scan_lib::errors::PortalError;
use portal_scan_lib::flex_id::FlexId;
use portal_scan_lib::model::{Channel, CheckOutcome, Endpoint, Genre, Status};
use portal_scan_lib::player::StreamProbe;
use portal_scan_lib::scheduler::{
    check_identifier, ScanLimits, SchedulerSettings, ValidationScheduler,
};
use portal_scan_lib::session::{Portal, PortalFactory};
use portal_scan_lib::store::{CredentialStore, SqliteStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PLAYABLE: &str = "play://ok";
const DEAD: &str = "play://dead";

#[derive(Clone, Debug)]
enum Behavior {
    /// Logs in after `delay`, one German genre, the channel plays
    Works(Duration),
    /// Logs in after `delay`, one German genre, nothing plays
    Dead(Duration),
    LoginFails,
    Panics,
}

/// How one genre answers `list_channels`, overriding the portal behavior.
#[derive(Clone, Copy, Debug)]
enum GenrePlan {
    Empty,
    ListingFails,
    Plays,
}

struct FakePortal {
    behavior: Behavior,
    genres: Vec<&'static str>,
    plans: HashMap<&'static str, GenrePlan>,
    listed: Arc<Mutex<Vec<String>>>,
}

impl FakePortal {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            genres: vec!["DE: SPORT"],
            plans: HashMap::new(),
            listed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_genres(behavior: Behavior, genres: Vec<&'static str>) -> Self {
        Self {
            genres,
            ..Self::new(behavior)
        }
    }
}

#[async_trait]
impl Portal for FakePortal {
    async fn login(&mut self) -> Result<(), PortalError> {
        match &self.behavior {
            Behavior::Works(delay) | Behavior::Dead(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            Behavior::LoginFails => Err(PortalError::AuthenticationFailed(
                "Token not found in handshake response".to_string(),
            )),
            Behavior::Panics => panic!("portal exploded"),
        }
    }

    async fn list_genres(&mut self) -> Result<Vec<Genre>, PortalError> {
        if self.genres.is_empty() {
            return Err(PortalError::EmptyCatalog("Portal returned no genres".to_string()));
        }
        Ok(self
            .genres
            .iter()
            .enumerate()
            .map(|(i, title)| Genre::new(FlexId::Number(i as i64 + 1), title))
            .collect())
    }

    async fn list_channels(&mut self, genre: &Genre) -> Result<Vec<Channel>, PortalError> {
        self.listed.lock().unwrap().push(genre.name.clone());
        let cmd = match (self.plans.get(genre.name.as_str()), &self.behavior) {
            (Some(GenrePlan::Empty), _) => return Ok(Vec::new()),
            (Some(GenrePlan::ListingFails), _) => {
                return Err(PortalError::ServerError(502, "Bad Gateway".to_string()))
            }
            (Some(GenrePlan::Plays), _) | (None, Behavior::Works(_)) => PLAYABLE,
            (None, _) => DEAD,
        };
        Ok(vec![Channel {
            id: FlexId::Number(1),
            name: format!("{} 1", genre.name),
            cmd: cmd.to_string(),
            stream_url: None,
        }])
    }

    async fn resolve_stream(&mut self, channel: &mut Channel) -> Result<String, PortalError> {
        channel.stream_url = Some(channel.cmd.clone());
        Ok(channel.cmd.clone())
    }
}

struct FakeProbe;

#[async_trait]
impl StreamProbe for FakeProbe {
    async fn is_playable(&self, url: &str) -> bool {
        url == PLAYABLE
    }
}

#[derive(Default)]
struct FakeFactory {
    behaviors: HashMap<String, Behavior>,
    opened: Mutex<Vec<String>>,
}

impl FakeFactory {
    fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(id, b)| (id.to_string(), b.clone()))
                .collect(),
            opened: Mutex::new(Vec::new()),
        })
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl PortalFactory for FakeFactory {
    fn open(&self, _endpoint: &str, identifier: &str) -> Box<dyn Portal> {
        self.opened.lock().unwrap().push(identifier.to_string());
        let behavior = self
            .behaviors
            .get(identifier)
            .cloned()
            .unwrap_or(Behavior::LoginFails);
        Box::new(FakePortal::new(behavior))
    }
}

const ENDPOINT: &str = "http://portal.test";

/// Identifiers in the order given come back from the store newest-expiring first.
fn seeded_store(identifiers: &[&str]) -> (Arc<SqliteStore>, Endpoint) {
    let store = Arc::new(SqliteStore::open_in_memory(3).unwrap());
    let newest = NaiveDate::from_ymd_opt(2030, 12, 31).unwrap();
    for (i, ident) in identifiers.iter().enumerate() {
        let expires = newest - chrono::Duration::days(i as i64);
        store.add_identifier(ENDPOINT, ident, Some(expires)).unwrap();
    }
    let endpoint = store.list_endpoints().unwrap().remove(0);
    (store, endpoint)
}

fn status_of(store: &SqliteStore, endpoint: &Endpoint, ident: &str) -> (Option<Status>, u32) {
    let all = store.list_candidates(endpoint).unwrap();
    let found = all.into_iter().find(|i| i.value == ident).unwrap();
    (found.status, found.failure_count)
}

fn scheduler(
    store: Arc<SqliteStore>,
    factory: Arc<FakeFactory>,
    pool_width: usize,
    exhaustive: bool,
) -> ValidationScheduler {
    ValidationScheduler::new(
        store,
        factory,
        Arc::new(FakeProbe),
        SchedulerSettings {
            pool_width,
            exhaustive,
            limits: ScanLimits::default(),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_first_success_skips_queued_candidates() {
    let (store, endpoint) = seeded_store(&["A", "B", "C", "D", "E"]);
    let factory = FakeFactory::new(&[
        ("A", Behavior::Works(Duration::from_millis(10))),
        ("B", Behavior::Dead(Duration::from_secs(5))),
        ("C", Behavior::Dead(Duration::from_secs(5))),
        ("D", Behavior::Works(Duration::ZERO)),
        ("E", Behavior::Works(Duration::ZERO)),
    ]);

    let summary = scheduler(store.clone(), factory.clone(), 3, false)
        .check_endpoint(&endpoint)
        .await
        .unwrap();

    let mut opened = factory.opened();
    opened.sort();
    assert_eq!(opened, vec!["A", "B", "C"]);

    assert_eq!(status_of(&store, &endpoint, "A"), (Some(Status::Success), 0));
    // in-flight attempts finish with their real result
    assert_eq!(status_of(&store, &endpoint, "B"), (Some(Status::Error), 1));
    assert_eq!(status_of(&store, &endpoint, "C"), (Some(Status::Error), 1));
    assert_eq!(status_of(&store, &endpoint, "D"), (Some(Status::Skipped), 0));
    assert_eq!(status_of(&store, &endpoint, "E"), (Some(Status::Skipped), 0));

    assert_eq!(summary.counts.success, 1);
    assert_eq!(summary.counts.error, 2);
    assert_eq!(summary.counts.skipped, 2);
    assert_eq!(summary.reports.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustive_checks_everything() {
    let (store, endpoint) = seeded_store(&["A", "B", "C", "D"]);
    let factory = FakeFactory::new(&[
        ("A", Behavior::Works(Duration::ZERO)),
        ("B", Behavior::Works(Duration::from_secs(1))),
        ("C", Behavior::LoginFails),
        ("D", Behavior::Dead(Duration::ZERO)),
    ]);

    let summary = scheduler(store.clone(), factory.clone(), 2, true)
        .check_endpoint(&endpoint)
        .await
        .unwrap();

    assert_eq!(factory.opened().len(), 4);
    assert_eq!(summary.counts.success, 2);
    assert_eq!(summary.counts.login, 1);
    assert_eq!(summary.counts.error, 1);
    assert_eq!(summary.counts.skipped, 0);
    assert_eq!(status_of(&store, &endpoint, "C"), (Some(Status::Login), 1));
}

#[tokio::test]
async fn test_known_good_identifier_short_circuits() {
    let (store, endpoint) = seeded_store(&["A", "B", "K"]);
    let k = store
        .list_candidates(&endpoint)
        .unwrap()
        .into_iter()
        .find(|i| i.value == "K")
        .unwrap();
    store
        .record_status(k.id, &CheckOutcome::new(Status::Success, "worked last time"))
        .unwrap();

    let factory = FakeFactory::new(&[
        ("A", Behavior::Works(Duration::ZERO)),
        ("B", Behavior::Works(Duration::ZERO)),
        ("K", Behavior::Works(Duration::ZERO)),
    ]);
    let summary = scheduler(store.clone(), factory.clone(), 4, false)
        .check_endpoint(&endpoint)
        .await
        .unwrap();

    assert_eq!(factory.opened(), vec!["K"]);
    assert_eq!(summary.counts.success, 1);
    assert_eq!(summary.counts.skipped, 2);
    assert_eq!(status_of(&store, &endpoint, "A"), (Some(Status::Skipped), 0));
    assert_eq!(status_of(&store, &endpoint, "B"), (Some(Status::Skipped), 0));
}

#[tokio::test]
async fn test_failed_known_good_falls_back_to_pool() {
    let (store, endpoint) = seeded_store(&["A", "K"]);
    let k = store
        .list_candidates(&endpoint)
        .unwrap()
        .into_iter()
        .find(|i| i.value == "K")
        .unwrap();
    store
        .record_status(k.id, &CheckOutcome::new(Status::Success, "worked last time"))
        .unwrap();

    let factory = FakeFactory::new(&[
        ("A", Behavior::Works(Duration::ZERO)),
        ("K", Behavior::LoginFails),
    ]);
    let summary = scheduler(store.clone(), factory.clone(), 4, false)
        .check_endpoint(&endpoint)
        .await
        .unwrap();

    // K is not queued a second time
    assert_eq!(factory.opened(), vec!["K", "A"]);
    assert_eq!(summary.counts.login, 1);
    assert_eq!(summary.counts.success, 1);
    assert_eq!(status_of(&store, &endpoint, "K"), (Some(Status::Login), 1));
}

#[tokio::test]
async fn test_panicking_attempt_is_recorded_as_error() {
    let (store, endpoint) = seeded_store(&["A", "B"]);
    let factory = FakeFactory::new(&[
        ("A", Behavior::Panics),
        ("B", Behavior::Dead(Duration::ZERO)),
    ]);

    let summary = scheduler(store.clone(), factory, 1, false)
        .check_endpoint(&endpoint)
        .await
        .unwrap();

    assert_eq!(summary.counts.error, 2);
    let a = summary.reports.iter().find(|r| r.identifier == "A").unwrap();
    assert_eq!(a.outcome.status, Status::Error);
    assert!(a.outcome.message.contains("crashed"));
    assert_eq!(status_of(&store, &endpoint, "A"), (Some(Status::Error), 1));
}

#[tokio::test]
async fn test_exhausted_identifiers_are_not_retried() {
    let (store, endpoint) = seeded_store(&["A"]);
    let factory = FakeFactory::new(&[("A", Behavior::LoginFails)]);
    let scheduler = scheduler(store.clone(), factory.clone(), 1, false);

    for _ in 0..3 {
        scheduler.check_endpoint(&endpoint).await.unwrap();
    }
    let summary = scheduler.check_endpoint(&endpoint).await.unwrap();

    assert_eq!(factory.opened().len(), 3);
    assert_eq!(summary.counts.total(), 0);
    assert!(store.list_candidates(&endpoint).unwrap().is_empty());
}

#[tokio::test]
async fn test_run_aggregates_endpoints() {
    let store = Arc::new(SqliteStore::open_in_memory(3).unwrap());
    store.add_identifier("http://one.test", "A", None).unwrap();
    store.add_identifier("http://two.test", "B", None).unwrap();
    let factory = FakeFactory::new(&[
        ("A", Behavior::Works(Duration::ZERO)),
        ("B", Behavior::LoginFails),
    ]);

    let summary = scheduler(store, factory, 2, false).run().await.unwrap();
    assert_eq!(summary.endpoints.len(), 2);
    assert_eq!(summary.working_endpoints(), 1);
    assert_eq!(summary.counts.success, 1);
    assert_eq!(summary.counts.login, 1);
}

fn limits(cap: usize) -> ScanLimits {
    ScanLimits {
        samples_per_genre: 2,
        max_relevant_genres: cap,
    }
}

#[tokio::test]
async fn test_genre_cap_ends_with_content() {
    let mut portal = FakePortal::with_genres(
        Behavior::Dead(Duration::ZERO),
        vec!["DE: NEWS", "UK: SPORT", "DE: MOVIES", "AT: ORF", "XXX ADULT", "DE: KIDS"],
    );
    let listed = portal.listed.clone();

    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;

    assert_eq!(outcome.status, Status::Content);
    assert!(outcome.message.contains('3'));
    assert_eq!(
        *listed.lock().unwrap(),
        vec!["DE: NEWS", "DE: MOVIES", "AT: ORF"]
    );
    assert_eq!(outcome.region_match, Some(true));
    assert_eq!(outcome.category_match, Some(true));
}

#[tokio::test]
async fn test_dead_channels_within_cap_end_with_error() {
    let mut portal = FakePortal::with_genres(Behavior::Dead(Duration::ZERO), vec!["DE: NEWS"]);
    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;
    assert_eq!(outcome.status, Status::Error);
    assert_eq!(outcome.category_match, Some(false));
}

#[tokio::test]
async fn test_no_relevant_genre_is_content() {
    let mut portal = FakePortal::with_genres(
        Behavior::Works(Duration::ZERO),
        vec!["UK: SPORT", "FR: CINEMA"],
    );
    let listed = portal.listed.clone();
    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;

    assert_eq!(outcome.status, Status::Content);
    assert_eq!(outcome.region_match, Some(false));
    assert_eq!(outcome.category_match, Some(false));
    assert!(listed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_catalog_is_content() {
    let mut portal = FakePortal::with_genres(Behavior::Works(Duration::ZERO), Vec::new());
    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;
    assert_eq!(outcome.status, Status::Content);
    assert_eq!(outcome.region_match, None);
}

#[tokio::test]
async fn test_login_failure_keeps_message() {
    let mut portal = FakePortal::new(Behavior::LoginFails);
    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;
    assert_eq!(outcome.status, Status::Login);
    assert!(outcome.message.contains("Token not found"));
}

#[tokio::test]
async fn test_playable_channel_is_success() {
    let mut portal = FakePortal::with_genres(
        Behavior::Works(Duration::ZERO),
        vec!["UK: NEWS", "AT: ORF"],
    );
    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;
    assert_eq!(outcome.status, Status::Success);
    assert_eq!(outcome.region_match, Some(true));
}

#[tokio::test]
async fn test_later_genre_can_still_succeed() {
    let mut portal = FakePortal::with_genres(
        Behavior::Dead(Duration::ZERO),
        vec!["DE: EMPTY", "AT: BROKEN", "XXX NIGHT"],
    );
    portal.plans.insert("DE: EMPTY", GenrePlan::Empty);
    portal.plans.insert("AT: BROKEN", GenrePlan::ListingFails);
    portal.plans.insert("XXX NIGHT", GenrePlan::Plays);
    let listed = portal.listed.clone();

    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;

    assert_eq!(outcome.status, Status::Success);
    assert_eq!(
        *listed.lock().unwrap(),
        vec!["DE: EMPTY", "AT: BROKEN", "XXX NIGHT"]
    );
}

#[tokio::test]
async fn test_empty_and_failing_genres_without_success() {
    let mut portal = FakePortal::with_genres(
        Behavior::Dead(Duration::ZERO),
        vec!["DE: BROKEN", "AT: EMPTY"],
    );
    portal.plans.insert("DE: BROKEN", GenrePlan::ListingFails);
    portal.plans.insert("AT: EMPTY", GenrePlan::Empty);

    let outcome = check_identifier(&mut portal, &FakeProbe, &limits(3)).await;
    assert_eq!(outcome.status, Status::Content);
    assert!(outcome.message.contains("AT: EMPTY"));
}
