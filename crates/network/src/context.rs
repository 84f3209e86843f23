//! # Server Context
//!
//! Everything a handler needs, passed explicitly: configuration, the world,
//! the persistence backend and the session table. Built once in `main` and
//! shared as `Arc<ServerContext>`.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use realmd_config::RealmConfig;
use realmd_core::{IdGenerator, SessionId};
use realmd_protocol::LoginDenial;
use realmd_world::{Actor, Persistence, World};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::session::{Session, SessionState, TrafficCounts};

pub struct ServerContext {
    config: Arc<RealmConfig>,
    world: Arc<World>,
    persistence: Arc<dyn Persistence>,
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Lowercased account name -> session holding it
    accounts: DashMap<String, SessionId>,
    session_ids: IdGenerator,
    /// Traffic of sessions that already closed
    closed_traffic: parking_lot::Mutex<TrafficCounts>,
    sessions_total: AtomicU64,
    /// Character saves still in flight
    saves: parking_lot::Mutex<JoinSet<()>>,
}

impl ServerContext {
    pub fn new(config: Arc<RealmConfig>, world: Arc<World>, persistence: Arc<dyn Persistence>) -> Arc<Self> {
        Arc::new(Self {
            config,
            world,
            persistence,
            sessions: DashMap::new(),
            accounts: DashMap::new(),
            session_ids: IdGenerator::new(u16::MAX),
            closed_traffic: parking_lot::Mutex::new(TrafficCounts::default()),
            sessions_total: AtomicU64::new(0),
            saves: parking_lot::Mutex::new(JoinSet::new()),
        })
    }

    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Register a freshly accepted connection
    ///
    /// # Returns
    /// `None` when every session id is in use.
    pub fn open_session(&self, peer_addr: SocketAddr) -> Option<(Arc<Session>, mpsc::UnboundedReceiver<Bytes>)> {
        let id = SessionId::new(self.session_ids.acquire()?);
        let (session, rx) = Session::new(id, peer_addr, self.config.packet_history);
        self.sessions.insert(id, session.clone());
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        debug!("Session {} opened for {}", id, peer_addr);
        Some((session, rx))
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session currently holding `account`, if any
    pub fn session_for_account(&self, account: &str) -> Option<Arc<Session>> {
        let id = *self.accounts.get(&account.to_lowercase())?;
        self.session(id)
    }

    /// Reserve `account` for `session`
    ///
    /// # Errors
    /// The denial to send back when another live session owns the account,
    /// or when the server already carries `max_sessions` logged-in accounts.
    pub fn claim_account(&self, account: &str, session: &Session) -> std::result::Result<(), LoginDenial> {
        let key = account.to_lowercase();
        let at_capacity = self.accounts.len() >= self.config.max_sessions;
        match self.accounts.entry(key) {
            Entry::Occupied(mut entry) => {
                let holder = self.sessions.get(entry.get()).map(|s| s.state());
                match holder {
                    Some(SessionState::Linkdead) => Err(LoginDenial::AccountIsInLogoutProcedure),
                    Some(SessionState::Disconnected) | None => {
                        // Stale claim of a session that is already gone
                        entry.insert(session.id());
                        Ok(())
                    }
                    Some(_) => Err(LoginDenial::AccountAlreadyLoggedIn),
                }
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    return Err(LoginDenial::TooManyPlayersLoggedIn);
                }
                entry.insert(session.id());
                Ok(())
            }
        }
    }

    fn release_account(&self, session: &Session) {
        if let Some(account) = session.account() {
            self.accounts
                .remove_if(&account.to_lowercase(), |_, holder| *holder == session.id());
        }
    }

    /// The socket of `session` is gone
    ///
    /// # Purpose
    /// A playing session turns linkdead: its actor stays in the world until
    /// the grace timeout fires on the actor's region scheduler. Sessions that
    /// never reached the world are finished immediately.
    pub fn connection_lost(self: &Arc<Self>, session: &Arc<Session>) {
        match session.transition(&[SessionState::Playing], SessionState::Linkdead) {
            Ok(_) => {
                let Some(actor) = session.actor() else {
                    self.finish_session(session);
                    return;
                };
                info!(
                    "Session {} ({}) is linkdead; removing in {:?}",
                    session.id(),
                    actor.name,
                    self.config.linkdead_timeout
                );
                let ctx = Arc::clone(self);
                let linkdead = Arc::clone(session);
                let delay = self.config.linkdead_timeout.as_millis() as u64;
                let queued = self.world.enqueue(
                    &actor,
                    delay,
                    Box::new(move |_| {
                        if linkdead.state() == SessionState::Linkdead {
                            ctx.finish_session(&linkdead);
                        }
                    }),
                );
                if let Err(e) = queued {
                    warn!("Cannot schedule linkdead timeout for session {}: {}", session.id(), e);
                    self.finish_session(session);
                }
            }
            Err(_) => {
                if session.state() != SessionState::Linkdead {
                    self.finish_session(session);
                }
            }
        }
    }

    /// Orderly logout requested by the client
    ///
    /// The actor is saved and removed from its region scheduler so that it
    /// leaves the world after every action it already queued.
    pub fn logout(self: &Arc<Self>, session: &Arc<Session>) {
        let Some(actor) = session.actor() else {
            self.finish_session(session);
            return;
        };
        let ctx = Arc::clone(self);
        let leaving = Arc::clone(session);
        if let Err(e) = self.world.enqueue(&actor, 0, Box::new(move |_| ctx.finish_session(&leaving))) {
            warn!("Cannot schedule logout for session {}: {}", session.id(), e);
            self.finish_session(session);
        }
    }

    /// Tear the session down for good
    ///
    /// Idempotent. Saves and removes the actor, frees the account and the
    /// session id, and closes the outbound queue.
    pub fn finish_session(&self, session: &Arc<Session>) {
        let Some(previous) = session.mark_disconnected() else {
            return;
        };
        if let Some(actor) = session.take_actor() {
            self.retire_actor(&actor);
        }
        self.release_account(session);
        session.close();
        if self.sessions.remove(&session.id()).is_some() {
            self.session_ids.release(session.id().get());
            self.closed_traffic.lock().add(session.traffic());
        }
        info!(
            "Session {} from {} disconnected (was {}, up {:?})",
            session.id(),
            session.peer_addr(),
            previous,
            session.uptime()
        );
    }

    fn retire_actor(&self, actor: &Arc<Actor>) {
        let record = actor.to_record();
        self.world.remove_actor(actor.id);
        if record.character_id == 0 {
            return;
        }
        let persistence = Arc::clone(&self.persistence);
        let name = actor.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut saves = self.saves.lock();
                while saves.try_join_next().is_some() {}
                saves.spawn_on(
                    async move {
                        if let Err(e) = persistence.save_actor(&record).await {
                            error!("Failed to save {}: {}", name, e);
                        }
                    },
                    &handle,
                );
            }
            Err(_) => error!("No runtime to save {}; changes are lost", name),
        }
    }

    /// Wait until every character save started so far has completed
    pub async fn flush_saves(&self) {
        let mut saves = std::mem::take(&mut *self.saves.lock());
        while let Some(joined) = saves.join_next().await {
            if let Err(e) = joined {
                error!("Save task failed: {}", e);
            }
        }
    }

    /// Traffic of every session, open or closed
    pub fn traffic(&self) -> TrafficCounts {
        let mut total = *self.closed_traffic.lock();
        for entry in self.sessions.iter() {
            total.add(entry.value().traffic());
        }
        total
    }

    pub fn sessions_total(&self) -> u64 {
        self.sessions_total.load(Ordering::Relaxed)
    }

    /// Finish every session, used on shutdown
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            self.finish_session(&session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmd_world::{MemoryPersistence, NoopHooks};

    fn context(max_sessions: usize) -> Arc<ServerContext> {
        let config = RealmConfig {
            max_sessions,
            ..RealmConfig::default()
        };
        let world = Arc::new(World::from_config(&config, Arc::new(NoopHooks)).unwrap());
        ServerContext::new(Arc::new(config), world, Arc::new(MemoryPersistence::new()))
    }

    fn open(ctx: &ServerContext) -> Arc<Session> {
        ctx.open_session("127.0.0.1:5000".parse().unwrap()).unwrap().0
    }

    #[test]
    fn test_claim_account_denials() {
        let ctx = context(10);
        let first = open(&ctx);
        let second = open(&ctx);
        first.set_account(Some("Arthur".into()));
        first
            .transition(&[SessionState::NotConnected], SessionState::Connecting)
            .unwrap();
        ctx.claim_account("Arthur", &first).unwrap();

        assert_eq!(ctx.claim_account("arthur", &second), Err(LoginDenial::AccountAlreadyLoggedIn));

        first
            .transition(&[SessionState::Connecting], SessionState::Playing)
            .unwrap();
        first
            .transition(&[SessionState::Playing], SessionState::Linkdead)
            .unwrap();
        assert_eq!(
            ctx.claim_account("ARTHUR", &second),
            Err(LoginDenial::AccountIsInLogoutProcedure)
        );

        ctx.finish_session(&first);
        assert!(ctx.claim_account("Arthur", &second).is_ok());
    }

    #[test]
    fn test_capacity() {
        let ctx = context(1);
        let first = open(&ctx);
        let second = open(&ctx);
        ctx.claim_account("one", &first).unwrap();
        assert_eq!(ctx.claim_account("two", &second), Err(LoginDenial::TooManyPlayersLoggedIn));
    }

    #[test]
    fn test_finish_is_idempotent_and_frees_ids() {
        let ctx = context(10);
        let session = open(&ctx);
        let id = session.id();
        ctx.finish_session(&session);
        ctx.finish_session(&session);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.is_closed());
        assert_eq!(ctx.session_count(), 0);
        assert_eq!(open(&ctx).id(), id);
        assert_eq!(ctx.sessions_total(), 2);
    }

    #[test]
    fn test_connection_lost_before_play_finishes() {
        let ctx = context(10);
        let session = open(&ctx);
        ctx.connection_lost(&session);
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
