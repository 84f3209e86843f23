//! # Dispatcher
//!
//! Routes one decoded client frame to its handler and applies the error
//! policy:
//!
//! | Error | Policy |
//! |---|---|
//! | bad sequence, unknown opcode, malformed payload | count a bad packet; disconnect past the threshold |
//! | opcode not valid in the session state | log and ignore |
//! | other recoverable errors | log and ignore |
//! | anything else | disconnect |

use realmd_core::{RealmError, Result};
use realmd_protocol::RawPacket;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use crate::context::ServerContext;
use crate::registry::OpcodeRegistry;
use crate::session::Session;

pub struct Dispatcher {
    registry: OpcodeRegistry,
    max_bad_packets: u32,
}

impl Dispatcher {
    pub fn new(registry: OpcodeRegistry, max_bad_packets: u32) -> Self {
        Self {
            registry,
            max_bad_packets: max_bad_packets.max(1),
        }
    }

    pub fn registry(&self) -> &OpcodeRegistry {
        &self.registry
    }

    /// Handle one inbound frame of `session`
    ///
    /// # Errors
    /// Only when the session must be dropped: too many bad packets, or a
    /// handler failed in a way that leaves the session unusable.
    pub async fn dispatch(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: RawPacket) -> Result<()> {
        session.record_inbound(packet.opcode, &packet.payload, packet.wire_size());

        if !session.check_sequence(packet.sequence) {
            return self.bad_packet(session, format!("sequence 0x{:04X} went backwards", packet.sequence));
        }

        let version = session.version();
        let Some(handler) = self.registry.resolve(version, packet.opcode) else {
            return self.bad_packet(
                session,
                format!("no handler for opcode 0x{:02X} (client {})", packet.opcode, version),
            );
        };

        let state = session.state();
        if !handler.accepted_states().contains(&state) {
            debug!(
                "Session {}: {} ignored while {}",
                session.id(),
                handler.name(),
                state
            );
            return Ok(());
        }

        trace!("Session {}: {} ({} bytes)", session.id(), handler.name(), packet.payload.len());
        match handler.handle(ctx, session, &packet).await {
            Ok(()) => Ok(()),
            Err(RealmError::Protocol(reason)) => self.bad_packet(session, reason),
            Err(RealmError::StateViolation(reason)) => {
                debug!("Session {}: {} ignored: {}", session.id(), handler.name(), reason);
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!("Session {}: {} failed: {}", session.id(), handler.name(), e);
                Ok(())
            }
            Err(e) => {
                error!("Session {}: {} failed fatally: {}", session.id(), handler.name(), e);
                Err(e)
            }
        }
    }

    fn bad_packet(&self, session: &Session, reason: String) -> Result<()> {
        let count = session.note_bad_packet();
        warn!(
            "Session {}: bad packet ({}), {} of {}",
            session.id(),
            reason,
            count,
            self.max_bad_packets
        );
        if count >= self.max_bad_packets {
            session.dump_history();
            return Err(RealmError::Protocol(format!("{} bad packets", count)));
        }
        Ok(())
    }
}
