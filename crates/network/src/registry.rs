//! # Opcode Registry
//!
//! Maps `(client version, wire opcode)` to a packet handler.
//!
//! # Architecture
//!
//! Handlers are declared in an explicit table at startup and registered for
//! the oldest client version they understand. [`OpcodeRegistryBuilder::build`]
//! then resolves every supported version once: a version without its own
//! registration inherits the handler of the nearest older registered version,
//! never a newer one. Lookups afterwards are a single hash lookup.
//!
//! Opcodes are stored in their wire form, i.e. already XORed with
//! [`realmd_protocol::FAMILY_KEY`].

use async_trait::async_trait;
use realmd_core::{ClientVersion, RealmError, Result};
use realmd_protocol::RawPacket;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::context::ServerContext;
use crate::session::{Session, SessionState};

/// A handler for one client message
///
/// # Thread Safety
/// One instance serves every session. Handlers run on the session's reader
/// task; anything that mutates world state must be enqueued on the actor's
/// region scheduler instead of being done inline.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Session states in which the message is meaningful
    fn accepted_states(&self) -> &'static [SessionState] {
        &[SessionState::Playing]
    }

    async fn handle(&self, ctx: &Arc<ServerContext>, session: &Arc<Session>, packet: &RawPacket) -> Result<()>;
}

/// Collects handler declarations before the registry is frozen
#[derive(Default)]
pub struct OpcodeRegistryBuilder {
    /// opcode -> (declared version -> handler)
    declared: HashMap<u8, BTreeMap<ClientVersion, Arc<dyn PacketHandler>>>,
}

impl OpcodeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `handler` for `opcode` starting at client `version`
    ///
    /// # Arguments
    /// * `version` - Oldest client version the handler understands
    /// * `opcode` - Wire opcode (XORed form)
    ///
    /// # Errors
    /// `DuplicateHandler` if the pair is already declared. This is a startup
    /// error; the server refuses to start.
    pub fn register(
        &mut self,
        version: ClientVersion,
        opcode: u8,
        handler: Arc<dyn PacketHandler>,
    ) -> Result<&mut Self> {
        let by_version = self.declared.entry(opcode).or_default();
        if by_version.contains_key(&version) {
            return Err(RealmError::DuplicateHandler {
                version: version.get(),
                opcode,
            });
        }
        tracing::debug!(
            "Declared {} for opcode 0x{:02X} from version {}",
            handler.name(),
            opcode,
            version
        );
        by_version.insert(version, handler);
        Ok(self)
    }

    /// Resolve every supported version and freeze the table
    pub fn build(self) -> OpcodeRegistry {
        let mut table = HashMap::new();
        let versions: Vec<ClientVersion> = ClientVersion::supported().collect();

        for (opcode, by_version) in &self.declared {
            for &version in &versions {
                if let Some((_, handler)) = by_version.range(..=version).next_back() {
                    table.insert((version, *opcode), handler.clone());
                }
            }
        }

        tracing::info!(
            "Opcode registry built: {} opcodes, {} bindings",
            self.declared.len(),
            table.len()
        );
        OpcodeRegistry { table, versions }
    }
}

/// Frozen `(version, opcode) -> handler` table
pub struct OpcodeRegistry {
    table: HashMap<(ClientVersion, u8), Arc<dyn PacketHandler>>,
    /// Supported versions, ascending
    versions: Vec<ClientVersion>,
}

impl OpcodeRegistry {
    /// Find the handler for a wire opcode sent by a client of `version`
    ///
    /// # Returns
    /// `None` if no handler was declared for the opcode at or below the
    /// version. Versions the server does not list are mapped to the nearest
    /// older supported version first.
    pub fn resolve(&self, version: ClientVersion, opcode: u8) -> Option<&Arc<dyn PacketHandler>> {
        if let Some(handler) = self.table.get(&(version, opcode)) {
            return Some(handler);
        }
        let known = self.nearest_supported(version)?;
        if known == version {
            return None;
        }
        self.table.get(&(known, opcode))
    }

    fn nearest_supported(&self, version: ClientVersion) -> Option<ClientVersion> {
        let at = self.versions.partition_point(|v| *v <= version);
        at.checked_sub(1).map(|i| self.versions[i])
    }

    pub fn binding_count(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
