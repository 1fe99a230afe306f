//! End-to-end tests for the listing view model.
//!
//! Drives the view model through the in-memory collaborators plus a
//! recording store that exposes call order and lets tests deliver snapshots
//! whenever they like, including to watches that were already cancelled.

use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use market_sync::store::{Fields, WatchCallback, WatchRegistration};
use market_sync::{
    CollectionConfig, DeleteOutcome, EventBus, FormValues, IdentityState, InMemoryAuthProvider, InMemoryStore,
    ListingView, ListingViewModel, LiveSubscription, LoginController, Notification, Principal,
    Record, RemoteStore, SessionStore, StoreError, ViewState, WatchEvent, WatchQuery,
};
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

fn book(owner: &str, name: &str) -> Fields {
    json!({
        "sellerEmail": owner,
        "name": name,
        "category": "CSE",
        "quantity": 2,
        "available": true,
        "sellingPrice": 200
    })
    .as_object()
    .cloned()
    .unwrap()
}

/// Two listings for a@x.edu, one for b@x.edu.
fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.put("books", "1", book("a@x.edu", "Algo"));
    store.put("books", "2", book("a@x.edu", "Calc"));
    store.put("books", "3", book("b@x.edu", "Circuits"));
    store
}

fn alice() -> Principal {
    Principal::new("u-a", "a@x.edu")
}

fn bob() -> Principal {
    Principal::new("u-b", "b@x.edu")
}

fn mount(provider: &InMemoryAuthProvider, store: Arc<dyn RemoteStore>) -> ListingViewModel {
    let session = SessionStore::new(Arc::new(provider.clone()));
    ListingViewModel::mount(
        session,
        store,
        Arc::new(EventBus::<Notification>::new()),
        CollectionConfig::default(),
    )
}

fn form(email: &str, password: &str) -> FormValues {
    [("email", email), ("password", password)]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn rendered_ids(view: &ListingView) -> Vec<String> {
    match view {
        ListingView::Rows(rows) => rows.iter().map(|r| r.id.clone()).collect(),
        _ => Vec::new(),
    }
}

fn rendered_owners(vm: &ListingViewModel) -> Vec<String> {
    vm.snapshot()
        .map(|s| s.iter().map(|l| l.seller_email.clone()).collect())
        .unwrap_or_default()
}

/// Remote store that records watch/cancel order and never delivers on its own.
#[derive(Clone, Default)]
struct RecordingStore {
    log: Arc<Mutex<Vec<String>>>,
    watches: Arc<Mutex<Vec<(String, WatchCallback)>>>,
}

impl RecordingStore {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Deliver to every watch ever opened for `owner`, cancelled or not.
    fn deliver(&self, owner: &str, records: Vec<Record>) {
        let callbacks: Vec<WatchCallback> = self
            .watches
            .lock()
            .unwrap()
            .iter()
            .filter(|(value, _)| value == owner)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(WatchEvent::Snapshot(records.clone()));
        }
    }
}

struct RecordingWatch {
    log: Arc<Mutex<Vec<String>>>,
    value: String,
}

impl WatchRegistration for RecordingWatch {
    fn cancel(&self) {
        self.log.lock().unwrap().push(format!("cancel {}", self.value));
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    fn watch(
        &self,
        query: &WatchQuery,
        callback: WatchCallback,
    ) -> Result<Box<dyn WatchRegistration>, StoreError> {
        self.log.lock().unwrap().push(format!("watch {}", query.value));
        self.watches
            .lock()
            .unwrap()
            .push((query.value.clone(), callback));
        Ok(Box::new(RecordingWatch {
            log: Arc::clone(&self.log),
            value: query.value.clone(),
        }))
    }

    async fn insert(&self, _collection: &str, _data: Fields) -> Result<String, StoreError> {
        Ok("new".to_string())
    }

    async fn update(&self, _collection: &str, _id: &str, _fields: Fields) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// Ownership filter
// ============================================================================

#[test]
fn test_only_own_listings_are_rendered() {
    let provider = InMemoryAuthProvider::new();
    let vm = mount(&provider, Arc::new(seeded_store()));

    provider.resolve(Some(alice()));

    assert_eq!(rendered_ids(&vm.render()), vec!["1", "2"]);
}

#[tokio::test]
async fn test_account_switch_never_shows_previous_owner() {
    let provider = InMemoryAuthProvider::new();
    provider.add_account(alice(), "abc12345!");
    provider.add_account(bob(), "xyz98765!");
    let session = SessionStore::new(Arc::new(provider.clone()));
    let notifier = Arc::new(EventBus::<Notification>::new());
    let vm = ListingViewModel::mount(
        Arc::clone(&session),
        Arc::new(seeded_store()),
        notifier.clone(),
        CollectionConfig::default(),
    );
    let login = LoginController::new(Arc::new(provider.clone()), notifier);

    let owners = Arc::new(Mutex::new(Vec::new()));
    let owners_clone = Arc::clone(&owners);
    let _sub = vm.on_change(move |state| {
        if let ViewState::Ready(snapshot) = state {
            let set: Vec<String> = snapshot.iter().map(|l| l.seller_email.clone()).collect();
            owners_clone.lock().unwrap().push(set);
        }
    });

    login.sign_in(&form("a@x.edu", "abc12345!")).await.unwrap();
    assert!(rendered_owners(&vm).iter().all(|o| o == "a@x.edu"));

    session.sign_out().await.unwrap();
    assert_eq!(vm.state(), ViewState::SignedOut);

    login.sign_in(&form("b@x.edu", "xyz98765!")).await.unwrap();
    assert_eq!(rendered_owners(&vm), vec!["b@x.edu"]);

    let owners = owners.lock().unwrap();
    assert_eq!(owners.len(), 2);
    assert!(owners[0].iter().all(|o| o == "a@x.edu"));
    assert!(owners[1].iter().all(|o| o == "b@x.edu"));
}

// ============================================================================
// Subscription lifecycle
// ============================================================================

#[test]
fn test_old_subscription_closes_before_new_one_opens() {
    let provider = InMemoryAuthProvider::new();
    let store = RecordingStore::default();
    let _vm = mount(&provider, Arc::new(store.clone()));

    provider.resolve(Some(alice()));
    provider.resolve(Some(bob()));

    assert_eq!(
        store.log(),
        vec!["watch a@x.edu", "cancel a@x.edu", "watch b@x.edu"]
    );
}

#[test]
fn test_late_snapshot_from_previous_owner_is_ignored() {
    let provider = InMemoryAuthProvider::new();
    let store = RecordingStore::default();
    let vm = mount(&provider, Arc::new(store.clone()));

    provider.resolve(Some(alice()));
    provider.resolve(Some(bob()));
    store.deliver(
        "a@x.edu",
        vec![Record {
            id: "1".into(),
            data: book("a@x.edu", "Algo"),
        }],
    );

    assert_eq!(vm.state(), ViewState::Loading);

    store.deliver(
        "b@x.edu",
        vec![Record {
            id: "3".into(),
            data: book("b@x.edu", "Circuits"),
        }],
    );
    assert_eq!(rendered_ids(&vm.render()), vec!["3"]);
}

#[test]
fn test_held_deliveries_from_closed_watch_are_ignored() {
    let provider = InMemoryAuthProvider::new();
    let store = seeded_store();
    let vm = mount(&provider, Arc::new(store.clone()));
    provider.resolve(Some(alice()));

    store.hold_deliveries();
    store.put("books", "4", book("a@x.edu", "Physics"));
    provider.resolve(Some(bob()));
    store.release_deliveries();

    assert_eq!(rendered_ids(&vm.render()), vec!["3"]);
}

#[test]
fn test_closing_twice_cancels_once() {
    let store = RecordingStore::default();
    let live = LiveSubscription::new(Arc::new(store.clone()), CollectionConfig::default());
    let handle = live.subscribe("a@x.edu", |_| {}).unwrap();

    handle.close();
    handle.close();
    drop(handle);

    assert_eq!(store.log(), vec!["watch a@x.edu", "cancel a@x.edu"]);
}

#[test]
fn test_closed_view_model_ignores_deliveries() {
    let provider = InMemoryAuthProvider::new();
    let store = RecordingStore::default();
    let vm = mount(&provider, Arc::new(store.clone()));
    provider.resolve(Some(alice()));

    vm.close();
    vm.close();
    store.deliver("a@x.edu", Vec::new());

    assert_eq!(vm.state(), ViewState::Loading);
    assert_eq!(store.log(), vec!["watch a@x.edu", "cancel a@x.edu"]);
}

// ============================================================================
// Identity states
// ============================================================================

#[test]
fn test_unresolved_then_signed_out_never_loads() {
    let provider = InMemoryAuthProvider::new();
    let store = RecordingStore::default();
    let vm = mount(&provider, Arc::new(store.clone()));
    let states = Arc::new(Mutex::new(Vec::new()));
    let states_clone = Arc::clone(&states);
    let _sub = vm.on_change(move |state| states_clone.lock().unwrap().push(state.clone()));

    assert_eq!(vm.state(), ViewState::Idle);
    assert_eq!(vm.render(), ListingView::Nothing);

    provider.resolve(None);

    assert_eq!(vm.render(), ListingView::NotSignedIn);
    assert_eq!(*states.lock().unwrap(), vec![ViewState::SignedOut]);
    assert!(store.log().is_empty());
}

#[test]
fn test_same_principal_does_not_resubscribe() {
    let provider = InMemoryAuthProvider::new();
    let store = RecordingStore::default();
    let _vm = mount(&provider, Arc::new(store.clone()));

    provider.resolve(Some(alice()));
    provider.resolve(Some(alice()));

    assert_eq!(store.log(), vec!["watch a@x.edu"]);
}

#[test]
fn test_identity_state_is_shared_with_session() {
    let provider = InMemoryAuthProvider::new();
    let session = SessionStore::new(Arc::new(provider.clone()));
    let _vm = ListingViewModel::mount(
        Arc::clone(&session),
        Arc::new(InMemoryStore::new()),
        Arc::new(EventBus::<Notification>::new()),
        CollectionConfig::default(),
    );

    provider.resolve(Some(alice()));

    assert_eq!(session.state(), IdentityState::SignedIn(alice()));
    assert_eq!(provider.watch_opens(), 1);
}

// ============================================================================
// Callbacks that re-enter the view model
// ============================================================================

/// Run `f` on another thread and fail if it has not returned within a few
/// seconds.
fn finishes(f: impl FnOnce() + Send + 'static) {
    let (done, finished) = mpsc::channel();
    std::thread::spawn(move || {
        f();
        let _ = done.send(());
    });
    finished
        .recv_timeout(Duration::from_secs(5))
        .expect("call did not return");
}

#[test]
fn test_sign_out_from_change_callback() {
    let provider = InMemoryAuthProvider::new();
    let store = seeded_store();
    let vm = mount(&provider, Arc::new(store.clone()));
    let signer = provider.clone();
    let _sub = vm.on_change(move |state| {
        if matches!(state, ViewState::Ready(_)) {
            signer.resolve(None);
        }
    });

    let resolver = provider.clone();
    finishes(move || resolver.resolve(Some(alice())));

    assert_eq!(vm.state(), ViewState::SignedOut);
    assert_eq!(vm.render(), ListingView::NotSignedIn);
    assert_eq!(store.watcher_count(), 0);
}

#[test]
fn test_switch_account_from_change_callback() {
    let provider = InMemoryAuthProvider::new();
    let store = seeded_store();
    let vm = mount(&provider, Arc::new(store.clone()));
    let switcher = provider.clone();
    let _sub = vm.on_change(move |state| {
        let ViewState::Ready(snapshot) = state else {
            return;
        };
        if snapshot.iter().any(|l| l.seller_email == "a@x.edu") {
            switcher.resolve(Some(bob()));
        }
    });

    let resolver = provider.clone();
    finishes(move || resolver.resolve(Some(alice())));

    assert_eq!(rendered_owners(&vm), vec!["b@x.edu"]);
    assert_eq!(store.watcher_count(), 1);
}

#[test]
fn test_close_from_change_callback() {
    let provider = InMemoryAuthProvider::new();
    let store = seeded_store();
    let vm = Arc::new(mount(&provider, Arc::new(store.clone())));
    let weak = Arc::downgrade(&vm);
    let _sub = vm.on_change(move |state| {
        if let (ViewState::Ready(_), Some(vm)) = (state, weak.upgrade()) {
            vm.close();
        }
    });

    let resolver = provider.clone();
    finishes(move || resolver.resolve(Some(alice())));

    assert_eq!(store.watcher_count(), 0);
    assert_eq!(provider.watcher_count(), 0);

    store.put("books", "4", book("a@x.edu", "Optics"));
    assert_eq!(rendered_ids(&vm.render()), vec!["1", "2"]);
}

// ============================================================================
// Mutations
// ============================================================================

#[tokio::test]
async fn test_delete_waits_for_snapshot() {
    let provider = InMemoryAuthProvider::new();
    let store = seeded_store();
    let vm = mount(&provider, Arc::new(store.clone()));
    provider.resolve(Some(alice()));
    let listing = vm.snapshot().unwrap().get("2").cloned().unwrap();

    store.hold_deliveries();
    let outcome = vm.request_delete(&listing, &|_: &str| true).await;

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert!(store.get("books", "2").is_none());
    assert_eq!(rendered_ids(&vm.render()), vec!["1", "2"]);

    store.release_deliveries();
    assert_eq!(rendered_ids(&vm.render()), vec!["1"]);
}

#[tokio::test]
async fn test_sold_out_badge_follows_snapshot() {
    let provider = InMemoryAuthProvider::new();
    let vm = mount(&provider, Arc::new(seeded_store()));
    provider.resolve(Some(alice()));
    let listing = vm.snapshot().unwrap().get("1").cloned().unwrap();

    vm.mark_sold_out(&listing).await.unwrap();

    let ListingView::Rows(rows) = vm.render() else {
        panic!("expected rows");
    };
    let row = rows.iter().find(|r| r.id == "1").unwrap();
    assert_eq!(row.quantity, 0);
    assert_eq!(row.badge(), "Out of Stock");
    assert_eq!(rows.iter().find(|r| r.id == "2").unwrap().badge(), "In Stock");
}
