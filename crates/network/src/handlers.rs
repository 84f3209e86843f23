//! # Packet Handlers
//!
//! One handler per client message plus the declaration table the registry is
//! built from.
//!
//! Read-only requests (ping, ability list) are answered inline on the reader
//! task. Everything that changes the world is wrapped in an action and queued
//! on the scheduler of the actor's region.
//!
//! # Payload Formats
//!
//! ```text
//! LoginRequest      {u8 client type}{u8 major}{u8 minor}{u8 build}{pstring account}{pstring password}
//! WorldInitRequest  (empty)
//! PositionUpdate    see realmd_protocol::position
//! PingRequest       {u32 timestamp}
//! AbilityListRequest (empty)
//! UseAbility        {u16 ability}{u16 target object id, 0 = none}
//! QuitRequest       {u8 totally}
//! ```

use async_trait::async_trait;
use realmd_core::{ActorId, ClientVersion, RealmError, Result};
use realmd_protocol::packet_builder::{
    build_ability_list, build_login_denied, build_login_granted, build_message, build_ping_reply, build_quit,
};
use realmd_protocol::{ChatType, ClientOpcode, LoginDenial, PositionFrame, PositionUpdate, RawPacket};
use realmd_world::{AbilityCommand, Actor, AuthOutcome, ClientLink, Interactable, MovementInput, Movable};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::ServerContext;
use crate::registry::{OpcodeRegistry, OpcodeRegistryBuilder, PacketHandler};
use crate::session::{Session, SessionState};

/// Every handler and the oldest client version it serves
pub fn declarations() -> Vec<(ClientVersion, ClientOpcode, Arc<dyn PacketHandler>)> {
    vec![
        (ClientVersion::V168, ClientOpcode::LoginRequest, handler(LoginHandler)),
        (ClientVersion::V168, ClientOpcode::WorldInitRequest, handler(WorldInitHandler)),
        (ClientVersion::V168, ClientOpcode::PositionUpdate, handler(PositionUpdateHandler)),
        (ClientVersion::V168, ClientOpcode::PingRequest, handler(PingHandler)),
        (ClientVersion::V168, ClientOpcode::AbilityListRequest, handler(AbilityListHandler)),
        (ClientVersion::V168, ClientOpcode::UseAbility, handler(UseAbilityHandler)),
        (ClientVersion::V168, ClientOpcode::QuitRequest, handler(QuitHandler)),
    ]
}

fn handler<H: PacketHandler + 'static>(handler: H) -> Arc<dyn PacketHandler> {
    Arc::new(handler)
}

/// Build the registry from [`declarations`]
///
/// # Errors
/// `DuplicateHandler` if the table declares a pair twice.
pub fn build_registry() -> Result<OpcodeRegistry> {
    let mut builder = OpcodeRegistryBuilder::new();
    for (version, opcode, handler) in declarations() {
        builder.register(version, opcode.wire(), handler)?;
    }
    Ok(builder.build())
}

fn session_actor(session: &Session) -> Result<Arc<Actor>> {
    session
        .actor()
        .ok_or_else(|| RealmError::StateViolation(format!("session {} has no actor", session.id())))
}

/// Account names are plain ASCII letters and digits
pub fn is_valid_account_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

fn deny(ctx: &ServerContext, session: &Arc<Session>, denial: LoginDenial) {
    info!(
        "Login from {} denied: {} (0x{:02X})",
        session.peer_addr(),
        denial.as_str(),
        denial.code()
    );
    session.send_raw(build_login_denied(denial, session.version()));
    ctx.finish_session(session);
}

pub struct LoginHandler;

#[async_trait]
impl PacketHandler for LoginHandler {
    fn name(&self) -> &'static str {
        "LoginRequest"
    }

    fn accepted_states(&self) -> &'static [SessionState] {
        &[SessionState::NotConnected]
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: &RawPacket) -> Result<()> {
        let mut reader = packet.reader();
        let _client_type = reader.read_u8();
        let major = reader.read_u8();
        let minor = reader.read_u8();
        let _build = reader.read_u8();
        let account = reader.read_pascal_string();
        let password = reader.read_pascal_string();
        if reader.is_truncated() {
            return Err(RealmError::Protocol(format!(
                "login request of {} bytes",
                packet.payload.len()
            )));
        }

        // Only one login per socket, even if two arrive back to back
        session.transition(&[SessionState::NotConnected], SessionState::Connecting)?;
        let version = ClientVersion::from_major_minor(major, minor);
        session.set_version(version);
        info!("({}) User {} logging on with client {}", session.peer_addr(), account, version);

        if !version.is_supported() {
            deny(ctx, session, LoginDenial::ServiceNotAvailable);
            return Ok(());
        }
        if !is_valid_account_name(&account) {
            deny(ctx, session, LoginDenial::AccountInvalid);
            return Ok(());
        }
        if let Err(denial) = ctx.claim_account(&account, session) {
            deny(ctx, session, denial);
            return Ok(());
        }
        session.set_account(Some(account.clone()));

        match ctx.persistence().authenticate(&account, &password).await {
            Ok(AuthOutcome::Granted { character_id }) => {
                session.set_character_id(character_id);
                session.send_raw(build_login_granted(session.id(), &account));
                info!("User {} logged in as session {}", account, session.id());
            }
            Ok(AuthOutcome::WrongPassword) => deny(ctx, session, LoginDenial::WrongPassword),
            Ok(AuthOutcome::UnknownAccount) => deny(ctx, session, LoginDenial::AccountInvalid),
            Err(e) => {
                error!("Authentication of {} failed: {}", account, e);
                deny(ctx, session, LoginDenial::ServiceNotAvailable);
            }
        }
        Ok(())
    }
}

pub struct WorldInitHandler;

#[async_trait]
impl PacketHandler for WorldInitHandler {
    fn name(&self) -> &'static str {
        "WorldInitRequest"
    }

    fn accepted_states(&self) -> &'static [SessionState] {
        &[SessionState::Connecting]
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, _packet: &RawPacket) -> Result<()> {
        if session.actor().is_some() {
            return Err(RealmError::StateViolation(format!(
                "session {} already has an actor",
                session.id()
            )));
        }
        let record = match ctx.persistence().load_actor(session.character_id()).await {
            Ok(record) => record,
            Err(e) => {
                error!("Cannot load character {}: {}", session.character_id(), e);
                deny(ctx, session, LoginDenial::ServiceNotAvailable);
                return Ok(());
            }
        };
        session.transition(&[SessionState::Connecting], SessionState::Playing)?;

        let world = ctx.world();
        let Some(id) = world.allocate_actor_id() else {
            warn!("No object id left for {}", record.name);
            ctx.finish_session(session);
            return Ok(());
        };
        let link: Arc<dyn ClientLink> = session.clone();
        let actor = Arc::new(Actor::from_record(id, &record, link));
        session.set_actor(Some(actor.clone()));

        if let Err(e) = world.enter_world(actor) {
            error!("{} cannot enter the world: {}", record.name, e);
            ctx.finish_session(session);
            return Ok(());
        }
        info!("{} ({}) entering the world", record.name, id);
        Ok(())
    }
}

pub struct PositionUpdateHandler;

#[async_trait]
impl PacketHandler for PositionUpdateHandler {
    fn name(&self) -> &'static str {
        "PositionUpdate"
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: &RawPacket) -> Result<()> {
        let actor = session_actor(session)?;
        let version = session.version();
        let dialect = version.dialect();

        let mut reader = packet.reader();
        let update = PositionUpdate::decode(&mut reader, dialect);
        if reader.is_truncated() {
            return Err(RealmError::Protocol(format!(
                "position update of {} bytes",
                packet.payload.len()
            )));
        }
        let frame = PositionFrame::from_payload(&packet.payload, dialect);
        let input = MovementInput::new(update, frame, version);

        ctx.world().enqueue(
            &actor,
            0,
            Box::new(move |action| {
                action
                    .world
                    .validator()
                    .process(action.world, action.region, action.actor, input, action.now);
            }),
        )?;
        Ok(())
    }
}

pub struct PingHandler;

#[async_trait]
impl PacketHandler for PingHandler {
    fn name(&self) -> &'static str {
        "PingRequest"
    }

    fn accepted_states(&self) -> &'static [SessionState] {
        &[SessionState::NotConnected, SessionState::Connecting, SessionState::Playing]
    }

    async fn handle(&self, _ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: &RawPacket) -> Result<()> {
        let mut reader = packet.reader();
        let timestamp = reader.read_u32();
        if reader.is_truncated() {
            return Err(RealmError::Protocol("short ping request".into()));
        }
        session.send_raw(build_ping_reply(timestamp, packet.sequence));
        Ok(())
    }
}

pub struct AbilityListHandler;

#[async_trait]
impl PacketHandler for AbilityListHandler {
    fn name(&self) -> &'static str {
        "AbilityListRequest"
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, _packet: &RawPacket) -> Result<()> {
        let actor = session_actor(session)?;
        let abilities = ctx.world().hooks().abilities_of(&actor);
        session.send_raw(build_ability_list(&abilities));
        Ok(())
    }
}

pub struct UseAbilityHandler;

#[async_trait]
impl PacketHandler for UseAbilityHandler {
    fn name(&self) -> &'static str {
        "UseAbility"
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: &RawPacket) -> Result<()> {
        let actor = session_actor(session)?;
        let mut reader = packet.reader();
        let ability = reader.read_u16();
        let target = reader.read_u16();
        if reader.is_truncated() {
            return Err(RealmError::Protocol("short ability command".into()));
        }
        let command = AbilityCommand {
            ability,
            target: (target != 0).then(|| ActorId::new(target)),
        };

        ctx.world().enqueue(
            &actor,
            0,
            Box::new(move |action| {
                if let Some(target_id) = command.target {
                    let Some(target) = action.world.actor(target_id) else {
                        debug!("{} used ability {} on vanished {}", action.actor.id, command.ability, target_id);
                        return;
                    };
                    if !action.actor.can_interact_with(&target.position()) {
                        action
                            .actor
                            .send(build_message("That target is too far away!", ChatType::System));
                        return;
                    }
                }
                action.world.hooks().on_ability_command(action.actor, &command);
            }),
        )?;
        Ok(())
    }
}

pub struct QuitHandler;

#[async_trait]
impl PacketHandler for QuitHandler {
    fn name(&self) -> &'static str {
        "QuitRequest"
    }

    fn accepted_states(&self) -> &'static [SessionState] {
        &[SessionState::Connecting, SessionState::Playing]
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: &RawPacket) -> Result<()> {
        let totally = packet.reader().read_u8() != 0;
        info!("Session {} quits (totally: {})", session.id(), totally);
        session.send_raw(build_quit(totally));
        ctx.logout(session);
        Ok(())
    }
}
