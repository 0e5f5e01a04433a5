//! Session controller
//!
//! Owns the local [`SessionState`], keeps it in sync with the shared store,
//! and performs user actions. Every action updates local state first, so the
//! UI never waits on the network; the remote write runs on a spawned task
//! whose handle is returned to callers that care when it finishes. Remote
//! failures are logged and otherwise ignored.
//!
//! Auto-reveal: whenever participants, votes or the reveal flag change, a
//! pending reveal is cancelled, and a new one is scheduled if the round is
//! still hidden and everyone present has voted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use poker_core::paths::session;
use poker_core::{
    next_ticket, validate_display_name, Error, IdentityRepository, Participant, ParticipantId,
    Participants, RemoteStore, Result, RoundId, RoundVotes, StoreKind, StoreNotification,
    StorePath, Subscription, Ticket, TicketDraft, Tickets, Vote, VoteValue, VotesByRound,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::{reduce, SessionEvent, SessionState};

/// Timer settings
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Stop showing "loading" after this long even if the store is silent
    pub startup_timeout: Duration,
    /// Settle time between the last vote and the automatic reveal
    pub auto_reveal_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(2000),
            auto_reveal_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct Timers {
    startup: Option<JoinHandle<()>>,
    auto_reveal: Option<JoinHandle<()>>,
}

struct Inner {
    state: watch::Sender<SessionState>,
    identity: Mutex<Box<dyn IdentityRepository + Send>>,
    store: Arc<dyn RemoteStore>,
    options: ControllerOptions,
    timers: Mutex<Timers>,
    subscriptions: Mutex<Vec<Subscription>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running session
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Load identity, subscribe to the session, and start the startup timer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        identity: Box<dyn IdentityRepository + Send>,
        store: Arc<dyn RemoteStore>,
        options: ControllerOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let inner = Arc::new(Inner {
            state,
            identity: Mutex::new(identity),
            store,
            options,
            timers: Mutex::new(Timers::default()),
            subscriptions: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
        });
        inner.initialize();
        Self { inner }
    }

    /// Observe state changes
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Current state
    pub fn snapshot(&self) -> SessionState {
        self.inner.snapshot()
    }

    pub fn store_kind(&self) -> StoreKind {
        self.inner.store.kind()
    }

    /// Enter the session under `name`
    pub fn join(&self, name: &str) -> Result<JoinHandle<()>> {
        self.inner.join(name)
    }

    /// Cast or replace this participant's vote for the current round
    pub fn submit_vote(&self, value: VoteValue) -> Result<JoinHandle<()>> {
        self.inner.submit_vote(value)
    }

    pub fn reveal_votes(&self) -> Result<JoinHandle<()>> {
        self.inner.reveal_votes()
    }

    /// Clear the current round's votes and hide results
    pub fn start_new_round(&self) -> Result<JoinHandle<()>> {
        self.inner.start_new_round()
    }

    /// Start a new round and move on to the next ticket, if any
    pub fn advance_ticket(&self) -> Result<JoinHandle<()>> {
        self.inner.advance_ticket()
    }

    /// Queue a ticket; it becomes current if none is
    pub fn add_ticket(&self, draft: TicketDraft) -> Result<JoinHandle<()>> {
        self.inner.add_ticket(draft)
    }

    /// Cancel timers and subscriptions. Local state stays readable.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn initialize(self: &Arc<Self>) {
        let identity = {
            let repo = lock(&self.identity);
            repo.get_or_create_participant_id()
                .and_then(|id| Ok((id, repo.display_name()?)))
        };

        let (participant_id, display_name) = match identity {
            Ok(identity) => identity,
            Err(e) => {
                error!(error = %e, "Failed to load identity");
                self.dispatch(SessionEvent::ErrorOccurred(e.to_string()));
                self.dispatch(SessionEvent::LoadingChanged(false));
                return;
            }
        };

        info!(participant_id = %participant_id, store = %self.store.kind(), "Session starting");
        self.dispatch(SessionEvent::UserIdentified {
            participant_id,
            display_name,
        });

        let weak = Arc::downgrade(self);
        let timeout = self.options.startup_timeout;
        lock(&self.timers).startup = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                if inner.snapshot().loading {
                    debug!("Startup timeout elapsed");
                    inner.dispatch(SessionEvent::LoadingChanged(false));
                }
            }
        }));

        let (tx, rx) = mpsc::unbounded_channel();
        let paths = [
            session::participants(),
            session::current_ticket(),
            session::tickets(),
            session::votes(),
            session::current_revealed(),
        ];
        let subscriptions: Vec<Subscription> = paths
            .iter()
            .map(|path| self.store.subscribe(path, tx.clone()))
            .collect();
        *lock(&self.subscriptions) = subscriptions;

        *lock(&self.pump) = Some(tokio::spawn(pump(Arc::downgrade(self), rx)));
    }

    fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn dispatch(&self, event: SessionEvent) {
        self.state
            .send_modify(|state| *state = reduce(std::mem::take(state), event));
    }

    fn require_participant(&self) -> Result<ParticipantId> {
        self.state
            .borrow()
            .participant_id
            .clone()
            .ok_or_else(|| Error::Unavailable("participant identity not loaded".into()))
    }

    /// First value from the store ends loading; so does the startup timer
    fn mark_loaded(&self) {
        if let Some(timer) = lock(&self.timers).startup.take() {
            timer.abort();
        }
        if self.state.borrow().loading {
            self.dispatch(SessionEvent::LoadingChanged(false));
        }
    }

    fn handle_notification(self: &Arc<Self>, notification: StoreNotification) {
        match notification {
            StoreNotification::Value { path, value } => {
                self.mark_loaded();
                self.apply_remote(&path, value);
            }
            StoreNotification::Error { path, reason } => {
                warn!(path = %path, reason = %reason, "Subscription error");
                self.mark_loaded();
            }
        }
    }

    fn apply_remote(self: &Arc<Self>, path: &StorePath, value: Value) {
        if *path == session::participants() {
            let participants: Participants = decode_entries(path, value);
            self.dispatch(SessionEvent::ParticipantsChanged(participants));
            self.schedule_auto_reveal();
        } else if *path == session::current_ticket() {
            let ticket = decode_optional::<Ticket>(path, value);
            self.dispatch(SessionEvent::CurrentTicketChanged(ticket));
        } else if *path == session::tickets() {
            let tickets: Tickets = decode_entries(path, value);
            self.dispatch(SessionEvent::TicketsChanged(tickets));
        } else if *path == session::votes() {
            self.dispatch(SessionEvent::VotesChanged(decode_votes(path, value)));
            self.schedule_auto_reveal();
        } else if *path == session::current_revealed() {
            let revealed = value.as_bool().unwrap_or(false);
            self.dispatch(SessionEvent::RevealedChanged(revealed));
            self.schedule_auto_reveal();
        } else {
            debug!(path = %path, "Ignoring notification for unknown path");
        }
    }

    fn schedule_auto_reveal(self: &Arc<Self>) {
        let mut timers = lock(&self.timers);
        if let Some(pending) = timers.auto_reveal.take() {
            pending.abort();
        }

        let ready = {
            let state = self.state.borrow();
            !state.revealed && state.everyone_voted()
        };
        if !ready {
            return;
        }

        debug!(delay_ms = self.options.auto_reveal_delay.as_millis() as u64, "Auto-reveal scheduled");
        let weak = Arc::downgrade(self);
        let delay = self.options.auto_reveal_delay;
        timers.auto_reveal = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // This task is the pending timer; forget it before revealing
            lock(&inner.timers).auto_reveal.take();
            info!("Everyone voted, revealing");
            if let Err(e) = inner.reveal_votes() {
                warn!(error = %e, "Auto-reveal failed");
            }
        }));
    }

    fn join(self: &Arc<Self>, name: &str) -> Result<JoinHandle<()>> {
        let name = validate_display_name(name)?;
        let id = self.require_participant()?;
        let path = session::participant(&id)?;

        lock(&self.identity).set_display_name(&name)?;

        let participant = Participant::new(name.clone());
        let record = self.stamped(&participant, "lastSeen")?;

        let mut participants = self.snapshot().participants;
        participants.insert(id.clone(), participant);
        self.dispatch(SessionEvent::UserIdentified {
            participant_id: id.clone(),
            display_name: name.clone(),
        });
        self.dispatch(SessionEvent::ParticipantsChanged(participants));
        self.schedule_auto_reveal();

        info!(participant_id = %id, name = %name, "Joined session");
        Ok(self.spawn_write(path, record))
    }

    fn submit_vote(self: &Arc<Self>, value: VoteValue) -> Result<JoinHandle<()>> {
        let id = self.require_participant()?;
        let round = RoundId::current();
        let vote_path = session::vote(&round, &id)?;
        let state = self.snapshot();

        // A vote from someone missing in the participant list would never
        // count toward auto-reveal, so restore the record first
        let mut heal = None;
        if !state.participants.contains_key(&id) {
            if state.display_name.is_empty() {
                return Err(Error::InvalidName("join before voting".into()));
            }
            let participant = Participant::new(state.display_name.clone());
            heal = Some((
                session::participant(&id)?,
                self.stamped(&participant, "lastSeen")?,
            ));
            let mut participants = state.participants.clone();
            participants.insert(id.clone(), participant);
            self.dispatch(SessionEvent::ParticipantsChanged(participants));
        }

        let vote = Vote::new(value);
        let record = self.stamped(&vote, "timestamp")?;

        let mut votes = state.votes_by_round;
        votes
            .entry(round)
            .or_insert_with(RoundVotes::new)
            .insert(id.clone(), vote);
        self.dispatch(SessionEvent::VotesChanged(votes));
        self.schedule_auto_reveal();

        debug!(participant_id = %id, vote = %value, "Vote submitted");
        let store = self.store.clone();
        Ok(tokio::spawn(async move {
            if let Some((path, participant)) = heal {
                log_failure("write", &path, store.write(&path, participant).await);
            }
            log_failure("write", &vote_path, store.write(&vote_path, record).await);
        }))
    }

    fn reveal_votes(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let path = session::current_revealed();
        self.dispatch(SessionEvent::RevealedChanged(true));
        self.schedule_auto_reveal();
        Ok(self.spawn_write(path, Value::Bool(true)))
    }

    fn start_new_round(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let round = RoundId::current();
        let votes_path = session::round_votes(&round)?;
        let revealed_path = session::current_revealed();

        let mut votes = self.snapshot().votes_by_round;
        votes.remove(&round);
        self.dispatch(SessionEvent::VotesChanged(votes));
        self.dispatch(SessionEvent::RevealedChanged(false));
        self.schedule_auto_reveal();

        info!("New round started");
        let store = self.store.clone();
        Ok(tokio::spawn(async move {
            let (votes, revealed) =
                tokio::join!(store.remove(&votes_path), store.remove(&revealed_path));
            log_failure("remove", &votes_path, votes);
            log_failure("remove", &revealed_path, revealed);
        }))
    }

    fn advance_ticket(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let state = self.snapshot();
        let Some(current) = state.current_ticket else {
            return self.start_new_round();
        };

        let next = next_ticket(&state.tickets, &current).cloned();
        let pointer = match &next {
            Some(ticket) => serde_json::to_value(ticket)?,
            None => Value::Null,
        };

        let reset = self.start_new_round()?;
        self.dispatch(SessionEvent::CurrentTicketChanged(next.clone()));

        match &next {
            Some(ticket) => info!(ticket_id = %ticket.id, title = %ticket.title, "Moved to next ticket"),
            None => info!("Ticket queue finished"),
        }

        let store = self.store.clone();
        let path = session::current_ticket();
        Ok(tokio::spawn(async move {
            let result = if pointer.is_null() {
                store.remove(&path).await
            } else {
                store.write(&path, pointer).await
            };
            log_failure("write", &path, result);
            if let Err(e) = reset.await {
                warn!(error = %e, "New round task failed");
            }
        }))
    }

    fn add_ticket(self: &Arc<Self>, draft: TicketDraft) -> Result<JoinHandle<()>> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(Error::InvalidTicket("title cannot be empty".into()));
        }
        let description = draft
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let ticket = Ticket::from_draft(TicketDraft { title, description });
        let ticket_path = session::ticket(&ticket.id)?;
        let record = serde_json::to_value(&ticket)?;

        let state = self.snapshot();
        let becomes_current = state.current_ticket.is_none();

        let mut tickets = state.tickets;
        tickets.insert(ticket.id.clone(), ticket.clone());
        self.dispatch(SessionEvent::TicketsChanged(tickets));
        if becomes_current {
            self.dispatch(SessionEvent::CurrentTicketChanged(Some(ticket.clone())));
        }

        info!(ticket_id = %ticket.id, title = %ticket.title, "Ticket added");
        let store = self.store.clone();
        Ok(tokio::spawn(async move {
            log_failure("write", &ticket_path, store.write(&ticket_path, record.clone()).await);
            if becomes_current {
                let path = session::current_ticket();
                log_failure("write", &path, store.write(&path, record).await);
            }
        }))
    }

    /// Serialize `record` with `field` set to the store's notion of now
    fn stamped(&self, record: &impl Serialize, field: &str) -> Result<Value> {
        let mut value = serde_json::to_value(record)?;
        if let Value::Object(map) = &mut value {
            map.insert(field.to_string(), self.store.timestamp_now());
        }
        Ok(value)
    }

    fn spawn_write(&self, path: StorePath, value: Value) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            log_failure("write", &path, store.write(&path, value).await);
        })
    }

    fn shutdown(&self) {
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
        let mut timers = lock(&self.timers);
        for timer in [timers.startup.take(), timers.auto_reveal.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}

/// Feed store notifications into the controller until either side goes away
async fn pump(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<StoreNotification>) {
    while let Some(notification) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_notification(notification);
    }
    debug!("Notification pump finished");
}

fn log_failure(op: &str, path: &StorePath, result: Result<()>) {
    if let Err(e) = result {
        warn!(op, path = %path, error = %e, "Remote update failed");
    }
}

fn decode_optional<T: DeserializeOwned>(path: &StorePath, value: Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(path = %path, error = %e, "Malformed value");
            None
        }
    }
}

/// Decode a keyed mapping, skipping malformed entries
fn decode_entries<K, T>(path: &StorePath, value: Value) -> std::collections::BTreeMap<K, T>
where
    K: Ord + for<'a> From<&'a str>,
    T: DeserializeOwned,
{
    let Value::Object(map) = value else {
        if !value.is_null() {
            warn!(path = %path, "Expected an object");
        }
        return Default::default();
    };
    map.into_iter()
        .filter_map(|(key, entry)| match serde_json::from_value(entry) {
            Ok(decoded) => Some((K::from(key.as_str()), decoded)),
            Err(e) => {
                warn!(path = %path, key = %key, error = %e, "Skipping malformed entry");
                None
            }
        })
        .collect()
}

fn decode_votes(path: &StorePath, value: Value) -> VotesByRound {
    let Value::Object(rounds) = value else {
        return VotesByRound::new();
    };
    rounds
        .into_iter()
        .map(|(round, votes)| {
            let votes: RoundVotes = decode_entries(path, votes);
            (RoundId::new(round), votes)
        })
        .filter(|(_, votes)| !votes.is_empty())
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use poker_core::{calculate_average, Database, MemoryStore, NotificationSink};
    use serde_json::json;

    fn identity() -> Box<dyn IdentityRepository + Send> {
        Box::new(Database::open_in_memory().unwrap())
    }

    fn start(store: &MemoryStore) -> SessionController {
        SessionController::start(identity(), Arc::new(store.clone()), ControllerOptions::default())
    }

    /// Let spawned writes and notifications run
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn my_id(controller: &SessionController) -> ParticipantId {
        controller.snapshot().participant_id.unwrap()
    }

    struct UnreachableStore;

    #[async_trait]
    impl RemoteStore for UnreachableStore {
        fn subscribe(&self, path: &StorePath, sink: NotificationSink) -> Subscription {
            let _ = sink.send(StoreNotification::Error {
                path: path.clone(),
                reason: "unreachable".into(),
            });
            Subscription::new(|| {})
        }

        async fn write(&self, _path: &StorePath, _value: Value) -> Result<()> {
            Err(Error::Unavailable("unreachable".into()))
        }

        async fn remove(&self, _path: &StorePath) -> Result<()> {
            Err(Error::Unavailable("unreachable".into()))
        }

        fn timestamp_now(&self) -> Value {
            json!(0)
        }

        fn kind(&self) -> StoreKind {
            StoreKind::Network
        }
    }

    /// Accepts everything, never reports a value
    struct SilentStore;

    #[async_trait]
    impl RemoteStore for SilentStore {
        fn subscribe(&self, _path: &StorePath, _sink: NotificationSink) -> Subscription {
            Subscription::new(|| {})
        }

        async fn write(&self, _path: &StorePath, _value: Value) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _path: &StorePath) -> Result<()> {
            Ok(())
        }

        fn timestamp_now(&self) -> Value {
            json!(0)
        }

        fn kind(&self) -> StoreKind {
            StoreKind::Memory
        }
    }

    struct BrokenIdentity;

    impl IdentityRepository for BrokenIdentity {
        fn get_or_create_participant_id(&self) -> Result<ParticipantId> {
            Err(Error::Unavailable("disk gone".into()))
        }

        fn display_name(&self) -> Result<String> {
            Ok(String::new())
        }

        fn set_display_name(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_participants_full_round() {
        let store = MemoryStore::new();
        let alice = start(&store);
        let bob = start(&store);
        settle().await;
        assert!(!alice.snapshot().loading);

        alice.join("Alice").unwrap().await.unwrap();
        bob.join("Bob").unwrap().await.unwrap();
        settle().await;
        assert_eq!(alice.snapshot().participants.len(), 2);

        alice.submit_vote(VoteValue::Numeric(5.0)).unwrap().await.unwrap();
        bob.submit_vote(VoteValue::Numeric(8.0)).unwrap().await.unwrap();
        settle().await;

        let state = alice.snapshot();
        assert!(!state.revealed);
        assert_eq!(state.current_round_votes().map(|v| v.len()), Some(2));

        tokio::time::sleep(Duration::from_millis(600)).await;
        for controller in [&alice, &bob] {
            let state = controller.snapshot();
            assert!(state.revealed);
            assert_eq!(calculate_average(state.current_round_votes().unwrap()), 6.5);
        }
        assert_eq!(store.snapshot(&session::current_revealed()), json!(true));

        bob.start_new_round().unwrap().await.unwrap();
        settle().await;
        for controller in [&alice, &bob] {
            let state = controller.snapshot();
            assert!(state.current_round_votes().is_none());
            assert!(!state.revealed);
            assert_eq!(state.participants.len(), 2);
        }
        assert_eq!(store.snapshot(&session::votes()), Value::Null);
        assert_eq!(store.snapshot(&session::current_revealed()), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voting_twice_keeps_latest() {
        let store = MemoryStore::new();
        let alice = start(&store);
        let bob = start(&store);
        alice.join("Alice").unwrap().await.unwrap();
        bob.join("Bob").unwrap().await.unwrap();

        alice.submit_vote(VoteValue::Numeric(3.0)).unwrap().await.unwrap();
        alice.submit_vote(VoteValue::Unknown).unwrap().await.unwrap();
        settle().await;

        let state = alice.snapshot();
        let votes = state.current_round_votes().unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[&my_id(&alice)].value, VoteValue::Unknown);

        let vote_path = session::vote(&RoundId::current(), &my_id(&alice)).unwrap();
        assert_eq!(store.snapshot(&vote_path)["value"], json!("?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawn_vote_cancels_auto_reveal() {
        let store = MemoryStore::new();
        let alice = start(&store);
        let bob = start(&store);
        alice.join("Alice").unwrap().await.unwrap();
        bob.join("Bob").unwrap().await.unwrap();
        alice.submit_vote(VoteValue::Numeric(1.0)).unwrap().await.unwrap();
        bob.submit_vote(VoteValue::Numeric(2.0)).unwrap().await.unwrap();
        settle().await;
        assert!(alice.snapshot().everyone_voted());

        let bob_vote = session::vote(&RoundId::current(), &my_id(&bob)).unwrap();
        store.remove(&bob_vote).await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!alice.snapshot().revealed);
        assert!(!bob.snapshot().revealed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_works_locally_when_store_unreachable() {
        let controller = SessionController::start(
            identity(),
            Arc::new(UnreachableStore),
            ControllerOptions::default(),
        );
        settle().await;

        let state = controller.snapshot();
        assert!(!state.loading);
        assert!(state.error.is_none());

        controller.join("Solo").unwrap().await.unwrap();
        controller.submit_vote(VoteValue::Numeric(13.0)).unwrap().await.unwrap();
        assert_eq!(controller.snapshot().participants.len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(controller.snapshot().revealed);

        controller.start_new_round().unwrap().await.unwrap();
        let state = controller.snapshot();
        assert!(!state.revealed);
        assert!(state.current_round_votes().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_failure_is_reported() {
        let store = MemoryStore::new();
        let controller = SessionController::start(
            Box::new(BrokenIdentity),
            Arc::new(store.clone()),
            ControllerOptions::default(),
        );

        let state = controller.snapshot();
        assert!(state.error.unwrap().contains("disk gone"));
        assert!(!state.loading);
        assert_eq!(store.subscriber_count(), 0);
        assert!(controller.join("Alice").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_timeout_clears_loading() {
        let controller = SessionController::start(
            identity(),
            Arc::new(SilentStore),
            ControllerOptions::default(),
        );
        settle().await;
        assert!(controller.snapshot().loading);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(!controller.snapshot().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_name_changes_nothing() {
        let store = MemoryStore::new();
        let controller = start(&store);
        settle().await;
        let before = controller.snapshot();

        assert!(matches!(controller.join("   "), Err(Error::InvalidName(_))));
        assert!(controller.join(&"x".repeat(51)).is_err());
        assert_eq!(controller.snapshot(), before);
        assert_eq!(store.snapshot(&session::participants()), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_restores_missing_participant() {
        let store = MemoryStore::new();
        let alice = start(&store);
        alice.join("Alice").unwrap().await.unwrap();
        let id = my_id(&alice);

        store.remove(&session::participant(&id).unwrap()).await.unwrap();
        settle().await;
        assert!(alice.snapshot().participants.is_empty());

        alice.submit_vote(VoteValue::Break).unwrap().await.unwrap();
        settle().await;
        assert_eq!(alice.snapshot().participants[&id].name, "Alice");
        assert_eq!(
            store.snapshot(&session::participant(&id).unwrap())["name"],
            json!("Alice")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_before_join_is_refused() {
        let store = MemoryStore::new();
        let bob = start(&store);
        let lurker = start(&store);
        bob.join("Bob").unwrap().await.unwrap();
        bob.submit_vote(VoteValue::Numeric(1.0)).unwrap().await.unwrap();
        settle().await;
        let before = lurker.snapshot();

        assert!(matches!(
            lurker.submit_vote(VoteValue::Numeric(89.0)),
            Err(Error::InvalidName(_))
        ));
        assert_eq!(lurker.snapshot(), before);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let state = bob.snapshot();
        let votes = state.current_round_votes().unwrap();
        assert_eq!(votes.len(), 1);
        assert!(votes.keys().all(|id| state.participants.contains_key(id)));
        assert_eq!(calculate_average(votes), 1.0);
        let round = session::round_votes(&RoundId::current()).unwrap();
        assert_eq!(store.snapshot(&round).as_object().map(|m| m.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newcomer_cancels_pending_reveal() {
        let store = MemoryStore::new();
        let alice = start(&store);
        let bob = start(&store);
        alice.join("Alice").unwrap().await.unwrap();
        bob.join("Bob").unwrap().await.unwrap();
        alice.submit_vote(VoteValue::Numeric(3.0)).unwrap().await.unwrap();
        bob.submit_vote(VoteValue::Numeric(5.0)).unwrap().await.unwrap();
        settle().await;
        assert!(alice.snapshot().everyone_voted());

        // Arrives inside the settle window
        tokio::time::sleep(Duration::from_millis(200)).await;
        let carol = start(&store);
        carol.join("Carol").unwrap().await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        for controller in [&alice, &bob, &carol] {
            let state = controller.snapshot();
            assert_eq!(state.participants.len(), 3);
            assert!(!state.revealed);
        }
        assert_eq!(store.snapshot(&session::current_revealed()), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_votes_stay_hidden() {
        let store = MemoryStore::new();
        let alice = start(&store);
        let bob = start(&store);
        alice.join("Alice").unwrap().await.unwrap();
        bob.join("Bob").unwrap().await.unwrap();
        alice.submit_vote(VoteValue::Numeric(8.0)).unwrap().await.unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_millis(2000)).await;
        for controller in [&alice, &bob] {
            let state = controller.snapshot();
            assert!(!state.everyone_voted());
            assert!(!state.revealed);
        }
        assert_eq!(store.snapshot(&session::current_revealed()), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_queue() {
        let store = MemoryStore::new();
        let controller = start(&store);
        controller.join("Alice").unwrap().await.unwrap();

        let draft = |title: &str| TicketDraft {
            title: title.to_string(),
            description: None,
        };
        controller.add_ticket(draft("Login page")).unwrap().await.unwrap();
        // Creation order comes from the wall clock
        std::thread::sleep(std::time::Duration::from_millis(2));
        controller.add_ticket(draft("Search")).unwrap().await.unwrap();
        assert!(controller.add_ticket(draft("  ")).is_err());
        settle().await;

        let state = controller.snapshot();
        assert_eq!(state.tickets.len(), 2);
        assert_eq!(state.current_ticket.unwrap().title, "Login page");

        controller.submit_vote(VoteValue::Numeric(3.0)).unwrap().await.unwrap();
        controller.advance_ticket().unwrap().await.unwrap();
        settle().await;
        let state = controller.snapshot();
        assert_eq!(state.current_ticket.as_ref().unwrap().title, "Search");
        assert!(state.current_round_votes().is_none());
        assert_eq!(store.snapshot(&session::current_ticket())["title"], json!("Search"));

        controller.advance_ticket().unwrap().await.unwrap();
        settle().await;
        assert!(controller.snapshot().current_ticket.is_none());
        assert_eq!(store.snapshot(&session::current_ticket()), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_subscriptions() {
        let store = MemoryStore::new();
        let controller = start(&store);
        assert_eq!(store.subscriber_count(), 5);

        controller.shutdown();
        assert_eq!(store.subscriber_count(), 0);

        let other = start(&store);
        assert_eq!(store.subscriber_count(), 5);
        drop(other);
        assert_eq!(store.subscriber_count(), 0);
    }
}
