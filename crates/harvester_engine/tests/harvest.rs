use std::collections::{HashMap, HashSet};
use std::sync::Once;

use harvester_core::{
    HarvestOptions, ItemRef, ListingPage, MessageCode, Seed, COUNTER_PHOTO, COUNTER_USER,
};
use harvester_engine::{
    checkpoint_key, resolve, ApiError, CheckpointStore, Harvester, ItemDetail,
    MemoryCheckpointStore, Profile, RemoteApi, Variant, CHECKPOINT_NAMESPACE,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

/// Scripted remote: one photo stream per stable id, paged newest-first.
#[derive(Default)]
struct FakeApi {
    aliases: HashMap<String, String>,
    profiles: HashMap<String, String>,
    streams: HashMap<String, Vec<String>>,
    page_size: usize,
    missing_details: HashSet<String>,
    broken_variants: HashSet<String>,
    pages_fetched: Vec<u32>,
    details_fetched: Vec<String>,
}

impl FakeApi {
    fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    fn user(mut self, alias: &str, stable_id: &str, photos: &[&str]) -> Self {
        self.aliases.insert(alias.into(), stable_id.into());
        self.profiles.insert(stable_id.into(), alias.into());
        self.streams
            .insert(stable_id.into(), photos.iter().map(|id| id.to_string()).collect());
        self
    }

    fn take_calls(&mut self) -> (Vec<u32>, Vec<String>) {
        (
            std::mem::take(&mut self.pages_fetched),
            std::mem::take(&mut self.details_fetched),
        )
    }
}

#[async_trait::async_trait]
impl RemoteApi for FakeApi {
    async fn lookup_id_by_alias(&mut self, alias: &str) -> Result<String, ApiError> {
        self.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("user {alias}")))
    }

    async fn get_profile(&mut self, stable_id: &str) -> Result<Profile, ApiError> {
        let alias = self
            .profiles
            .get(stable_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("user id {stable_id}")))?;
        Ok(Profile {
            stable_id: stable_id.to_string(),
            alias,
        })
    }

    async fn list_items(
        &mut self,
        stable_id: &str,
        page: u32,
        _per_page: Option<u32>,
    ) -> Result<ListingPage, ApiError> {
        self.pages_fetched.push(page);
        let stream = self.streams.get(stable_id).cloned().unwrap_or_default();
        let total_pages = stream.len().div_ceil(self.page_size) as u32;
        let start = (page as usize - 1) * self.page_size;
        let items = stream
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|id| ItemRef::new(id.clone(), format!("secret-{id}")))
            .collect();
        Ok(ListingPage {
            page,
            total_pages,
            items,
        })
    }

    async fn get_item_detail(&mut self, item: &ItemRef) -> Result<ItemDetail, ApiError> {
        self.details_fetched.push(item.id.clone());
        if self.missing_details.contains(&item.id) {
            return Err(ApiError::NotFound(format!("photo {}", item.id)));
        }
        Ok(ItemDetail {
            id: item.id.clone(),
            secret: item.secret.clone(),
            title: None,
            posted: None,
            owner: None,
        })
    }

    async fn get_item_variants(&mut self, item_id: &str) -> Result<Vec<Variant>, ApiError> {
        if self.broken_variants.contains(item_id) {
            return Err(ApiError::Remote {
                code: 105,
                message: "Service currently unavailable".into(),
            });
        }
        Ok(["Thumbnail", "Small", "Large", "Original"]
            .iter()
            .map(|label| Variant {
                label: label.to_string(),
                source: format!("https://live.example/{item_id}_{label}.jpg"),
            })
            .collect())
    }
}

fn stored_checkpoint(store: &MemoryCheckpointStore, stable_id: &str) -> Option<String> {
    store
        .get_state(CHECKPOINT_NAMESPACE, &checkpoint_key(stable_id))
        .unwrap()
}

fn thumbnails_only() -> HarvestOptions {
    HarvestOptions {
        sizes: vec!["Thumbnail".into()],
        ..HarvestOptions::default()
    }
}

#[tokio::test]
async fn harvests_only_items_newer_than_checkpoint() {
    init_logging();
    let api = FakeApi::new(10).user("alice", "1@N01", &["A", "B", "C", "D", "E"]);
    let mut store = MemoryCheckpointStore::new();
    store
        .set_state(CHECKPOINT_NAMESPACE, &checkpoint_key("1@N01"), Some("C"))
        .unwrap();

    let mut harvester = Harvester::new(api, store, thumbnails_only());
    let outcome = harvester
        .harvest(&[Seed::with_stable_id("s1", "1@N01").known_as("alice")])
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(
        outcome.urls,
        vec![
            "https://live.example/A_Thumbnail.jpg".to_string(),
            "https://live.example/B_Thumbnail.jpg".to_string(),
        ]
    );
    assert_eq!(outcome.counter(COUNTER_PHOTO), 2);
    assert_eq!(outcome.counter(COUNTER_USER), 1);
    let (mut api, store) = harvester.into_parts();
    let (_, details) = api.take_calls();
    assert_eq!(details, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(stored_checkpoint(&store, "1@N01").as_deref(), Some("A"));
}

#[tokio::test]
async fn full_walk_over_three_pages_sets_checkpoint_to_newest() {
    init_logging();
    let ids: Vec<String> = (1..=12).map(|n| format!("p{n:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let api = FakeApi::new(5).user("bob", "2@N02", &id_refs);

    let mut harvester = Harvester::new(api, MemoryCheckpointStore::new(), thumbnails_only());
    let outcome = harvester
        .harvest(&[Seed::with_stable_id("s2", "2@N02").known_as("bob")])
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.counter(COUNTER_PHOTO), 12);
    let (mut api, store) = harvester.into_parts();
    let (pages, details) = api.take_calls();
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!(details, ids);
    assert_eq!(stored_checkpoint(&store, "2@N02").as_deref(), Some("p01"));
}

#[tokio::test]
async fn second_run_over_unchanged_listing_is_a_no_op() {
    init_logging();
    let api = FakeApi::new(2).user("carol", "3@N03", &["A", "B", "C", "D", "E"]);
    let seeds = [Seed::with_stable_id("s3", "3@N03").known_as("carol")];
    let mut harvester = Harvester::new(api, MemoryCheckpointStore::new(), thumbnails_only());

    let first = harvester.harvest(&seeds).await.unwrap();
    assert_eq!(first.counter(COUNTER_PHOTO), 5);
    let (mut api, store) = harvester.into_parts();
    api.take_calls();

    let mut harvester = Harvester::new(api, store, thumbnails_only());
    let second = harvester.harvest(&seeds).await.unwrap();

    assert!(second.success);
    assert!(second.urls.is_empty());
    assert_eq!(second.counter(COUNTER_PHOTO), 0);
    let (mut api, store) = harvester.into_parts();
    let (pages, details) = api.take_calls();
    assert_eq!(pages, vec![1]);
    assert!(details.is_empty());
    assert_eq!(stored_checkpoint(&store, "3@N03").as_deref(), Some("A"));
}

#[tokio::test]
async fn walk_stops_paging_once_checkpoint_is_seen() {
    init_logging();
    let api = FakeApi::new(2).user("dan", "4@N04", &["A", "B", "C", "D", "E", "F"]);
    let mut store = MemoryCheckpointStore::new();
    store
        .set_state(CHECKPOINT_NAMESPACE, &checkpoint_key("4@N04"), Some("C"))
        .unwrap();

    let mut harvester = Harvester::new(api, store, thumbnails_only());
    harvester
        .harvest(&[Seed::with_stable_id("s4", "4@N04").known_as("dan")])
        .await
        .unwrap();

    let (mut api, _) = harvester.into_parts();
    let (pages, details) = api.take_calls();
    assert_eq!(pages, vec![1, 2]);
    assert_eq!(details, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn stale_checkpoint_harvests_whole_listing() {
    init_logging();
    let api = FakeApi::new(10).user("erin", "5@N05", &["A", "B", "C"]);
    let mut store = MemoryCheckpointStore::new();
    store
        .set_state(CHECKPOINT_NAMESPACE, &checkpoint_key("5@N05"), Some("deleted"))
        .unwrap();

    let mut harvester = Harvester::new(api, store, thumbnails_only());
    let outcome = harvester
        .harvest(&[Seed::with_stable_id("s5", "5@N05").known_as("erin")])
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.counter(COUNTER_PHOTO), 3);
    let (_, store) = harvester.into_parts();
    assert_eq!(stored_checkpoint(&store, "5@N05").as_deref(), Some("A"));
}

#[tokio::test]
async fn non_incremental_harvest_ignores_checkpoint() {
    init_logging();
    let api = FakeApi::new(10).user("fay", "6@N06", &["A", "B", "C"]);
    let mut store = MemoryCheckpointStore::new();
    store
        .set_state(CHECKPOINT_NAMESPACE, &checkpoint_key("6@N06"), Some("A"))
        .unwrap();
    let options = HarvestOptions {
        incremental: false,
        ..thumbnails_only()
    };

    let mut harvester = Harvester::new(api, store, HarvestOptions::default());
    let outcome = harvester
        .harvest(&[Seed::with_stable_id("s6", "6@N06")
            .known_as("fay")
            .with_options(options)])
        .await
        .unwrap();

    assert_eq!(outcome.counter(COUNTER_PHOTO), 3);
    assert_eq!(outcome.urls.len(), 3);
}

#[tokio::test]
async fn item_failure_stops_seed_and_keeps_checkpoint() {
    init_logging();
    let mut api = FakeApi::new(10)
        .user("gus", "7@N07", &["A", "B", "C", "D"])
        .user("hal", "8@N08", &["X"]);
    api.broken_variants.insert("B".into());
    let mut store = MemoryCheckpointStore::new();
    store
        .set_state(CHECKPOINT_NAMESPACE, &checkpoint_key("7@N07"), Some("D"))
        .unwrap();

    let mut harvester = Harvester::new(api, store, thumbnails_only());
    let outcome = harvester
        .harvest(&[
            Seed::with_stable_id("s7", "7@N07").known_as("gus"),
            Seed::with_stable_id("s8", "8@N08").known_as("hal"),
        ])
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].code, MessageCode::UnknownError);
    assert_eq!(outcome.errors[0].seed_id.as_deref(), Some("s7"));
    // A was harvested before the failure and its url is kept.
    assert_eq!(
        outcome.urls,
        vec![
            "https://live.example/A_Thumbnail.jpg".to_string(),
            "https://live.example/X_Thumbnail.jpg".to_string(),
        ]
    );
    let (mut api, store) = harvester.into_parts();
    let (_, details) = api.take_calls();
    assert_eq!(details, vec!["A".to_string(), "B".to_string(), "X".to_string()]);
    assert_eq!(stored_checkpoint(&store, "7@N07").as_deref(), Some("D"));
    assert_eq!(stored_checkpoint(&store, "8@N08").as_deref(), Some("X"));
}

#[tokio::test]
async fn missing_item_detail_is_a_warning_and_is_skipped() {
    init_logging();
    let mut api = FakeApi::new(10).user("ivy", "9@N09", &["A", "B", "C"]);
    api.missing_details.insert("B".into());

    let mut harvester = Harvester::new(api, MemoryCheckpointStore::new(), thumbnails_only());
    let outcome = harvester
        .harvest(&[Seed::with_stable_id("s9", "9@N09").known_as("ivy")])
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].code, MessageCode::ItemNotFound);
    assert_eq!(outcome.counter(COUNTER_PHOTO), 2);
    let (_, store) = harvester.into_parts();
    assert_eq!(stored_checkpoint(&store, "9@N09").as_deref(), Some("A"));
}

#[tokio::test]
async fn alias_seed_reports_discovered_stable_id() {
    init_logging();
    let mut api = FakeApi::new(10).user("justin.littman", "131866249@N02", &[]);

    let resolution = resolve(&mut api, &Seed::with_alias("seed-1", "justin.littman"))
        .await
        .unwrap();

    assert_eq!(resolution.stable_id.as_deref(), Some("131866249@N02"));
    let outcome = resolution.outcome;
    assert!(outcome.success);
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.infos.len(), 1);
    assert_eq!(outcome.infos[0].code, MessageCode::UidFound);
    assert_eq!(outcome.infos[0].seed_id.as_deref(), Some("seed-1"));
    assert!(outcome.infos[0].message.contains("131866249@N02"));
    assert_eq!(
        outcome.uids.get("seed-1").map(String::as_str),
        Some("131866249@N02")
    );
}

#[tokio::test]
async fn changed_alias_is_reported_as_update() {
    init_logging();
    let mut api = FakeApi::new(10).user("new.name", "10@N10", &[]);

    let resolution = resolve(
        &mut api,
        &Seed::with_stable_id("seed-2", "10@N10").known_as("old.name"),
    )
    .await
    .unwrap();

    let outcome = resolution.outcome;
    assert!(outcome.success);
    assert_eq!(resolution.alias.as_deref(), Some("new.name"));
    assert_eq!(outcome.infos.len(), 1);
    assert_eq!(outcome.infos[0].code, MessageCode::TokenUpdated);
    assert_eq!(outcome.infos[0].seed_id.as_deref(), Some("seed-2"));
    assert_eq!(
        outcome.alias_updates.get("seed-2").map(String::as_str),
        Some("new.name")
    );
}

#[tokio::test]
async fn unknown_alias_and_id_are_warnings() {
    init_logging();
    let api = FakeApi::new(10).user("known", "11@N11", &["A"]);

    let mut harvester = Harvester::new(api, MemoryCheckpointStore::new(), thumbnails_only());
    let outcome = harvester
        .harvest(&[
            Seed::with_alias("a", "nobody"),
            Seed::with_stable_id("b", "0@N00"),
            Seed::with_alias("c", "known"),
        ])
        .await
        .unwrap();

    assert!(outcome.success);
    let codes: Vec<MessageCode> = outcome.warnings.iter().map(|m| m.code).collect();
    assert_eq!(codes, vec![MessageCode::TokenNotFound, MessageCode::UidNotFound]);
    assert_eq!(outcome.counter(COUNTER_PHOTO), 1);
    assert_eq!(outcome.counter(COUNTER_USER), 1);
}

#[tokio::test]
async fn seed_without_identity_is_rejected() {
    init_logging();
    let seed = Seed {
        id: "empty".into(),
        alias: None,
        stable_id: None,
        options: None,
    };
    let mut harvester = Harvester::new(
        FakeApi::new(10),
        MemoryCheckpointStore::new(),
        HarvestOptions::default(),
    );

    let outcome = harvester.harvest(&[seed]).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.errors[0].code, MessageCode::InvalidSeed);
}
