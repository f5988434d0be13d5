//! Session coordinator: documents, participants, roles and event fan-out.
//!
//! ```text
//! Participant A ──┐                    ┌── edit stream (single consumer)
//!                 ├── Room (doc id) ───┼── rejection stream (single consumer)
//! Participant B ──┘    │               └── cursor broadcast (lossy)
//!                      ├── Replica (hub) behind RwLock
//!                      └── members + cursors behind Mutex
//! ```
//!
//! Every document lives in its own room. The registry lock is only held
//! to look a room up, so edits to different documents never contend.
//! Within a room, edits are applied one at a time under the replica's
//! write lock and published on the edit stream in application order.
//! Membership is checked under that same lock, so leaving and editing
//! never interleave. Buffered operations the room gives up on are sent
//! to their author on the rejection stream.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use rand_core::OsRng;
use rand_core::RngCore;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::crdt::causal::Delivery;
use crate::crdt::causal::Rejected;
use crate::crdt::op::Operation;
use crate::crdt::primitives::ElementId;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::VersionVector;
use crate::crdt::replica::Replica;
use crate::error::Error;
use crate::error::Result;
use crate::presence::PresenceTracker;

/// Identifies a shared document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> DocumentId {
        return DocumentId(Uuid::new_v4());
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        return DocumentId::new();
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// Identifies a connected user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> ParticipantId {
        return ParticipantId(Uuid::new_v4());
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        return ParticipantId::new();
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// What a participant may do to a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Editor,
    Viewer,
}

impl Role {
    pub fn can_edit(&self) -> bool {
        return *self == Role::Editor;
    }
}

const CODE_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// An opaque token granting a role on one document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareCode(String);

impl ShareCode {
    /// Generate a fresh random code from the operating system's RNG.
    fn generate(len: usize) -> ShareCode {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        // 256 is a multiple of the alphabet size, so every symbol is equally likely
        let code = bytes.iter().map(|b| CODE_ALPHABET[(*b as usize) % CODE_ALPHABET.len()] as char).collect();
        return ShareCode(code);
    }

    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

impl From<&str> for ShareCode {
    fn from(code: &str) -> Self {
        return ShareCode(code.to_string());
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

/// The share codes visible to one participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCodes {
    /// Only handed to editors.
    pub editor: Option<ShareCode>,
    pub viewer: ShareCode,
}

/// Everything a participant needs to start editing after joining.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joined {
    pub document_id: DocumentId,
    pub role: Role,
    /// The replica id the participant must stamp its operations with.
    pub replica: ReplicaId,
    /// The document text at the moment of joining.
    pub content: String,
    /// Every applied operation, in causal order, for building a local
    /// replica with `Replica::from_history`.
    pub history: Vec<Operation>,
}

/// A cursor moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub document_id: DocumentId,
    pub participant: ParticipantId,
    /// The element the cursor rests after.
    pub target: ElementId,
    /// Caret position of the target when the cursor was placed.
    pub position: usize,
}

/// An operation applied to a document, in application order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEvent {
    pub document_id: DocumentId,
    /// The participant the operation is attributed to.
    pub author: ParticipantId,
    pub op: Operation,
}

/// A buffered operation the document gave up on, addressed to the
/// participant that authored it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectionEvent {
    pub document_id: DocumentId,
    pub author: ParticipantId,
    pub op: Operation,
    pub error: Error,
}

#[derive(Clone, Copy, Debug)]
struct Member {
    role: Role,
    replica: ReplicaId,
    cursor: Option<ElementId>,
}

#[derive(Debug)]
struct Members {
    members: FxHashMap<ParticipantId, Member>,
    /// Who owns each replica id handed out, kept after they leave so late
    /// operations are still attributed.
    authors: FxHashMap<ReplicaId, ParticipantId>,
    next_replica: u64,
}

impl Members {
    fn new() -> Members {
        return Members {
            members: FxHashMap::default(),
            authors: FxHashMap::default(),
            next_replica: ReplicaId::HUB.0 + 1,
        };
    }

    /// Register (or re-register) a participant under a fresh replica id.
    fn admit(&mut self, participant: ParticipantId, role: Role) -> ReplicaId {
        let replica = ReplicaId(self.next_replica);
        self.next_replica += 1;
        self.authors.insert(replica, participant);
        self.members.insert(participant, Member { role, replica, cursor: None });
        return replica;
    }

    fn get(&self, participant: ParticipantId) -> Result<Member> {
        return self.members.get(&participant).copied().ok_or(Error::UnknownParticipant(participant));
    }
}

/// One shared document and everything attached to it.
struct Room {
    id: DocumentId,
    replica: RwLock<Replica>,
    members: Mutex<Members>,
    editor_code: ShareCode,
    viewer_code: ShareCode,
    edits: mpsc::UnboundedSender<EditEvent>,
    edit_stream: Mutex<Option<mpsc::UnboundedReceiver<EditEvent>>>,
    rejections: mpsc::UnboundedSender<RejectionEvent>,
    rejection_stream: Mutex<Option<mpsc::UnboundedReceiver<RejectionEvent>>>,
    cursors: broadcast::Sender<CursorUpdate>,
}

impl Room {
    /// Check the participant may edit, returning its record.
    ///
    /// Call with the replica write lock held.
    fn editor(&self, participant: ParticipantId) -> Result<Member> {
        let member = self.members.lock().get(participant)?;
        if !member.role.can_edit() {
            log::debug!("{participant} is a viewer of {}, edit refused", self.id);
            return Err(Error::Unauthorized { participant });
        }
        return Ok(member);
    }

    fn publish(&self, author: ParticipantId, op: Operation) {
        // Nobody listening is fine
        let _ = self.edits.send(EditEvent {
            document_id: self.id,
            author,
            op,
        });
    }

    fn reject(&self, members: &Members, rejected: &[Rejected]) {
        for Rejected { op, error } in rejected {
            let author = match members.authors.get(&op.replica()) {
                Some(author) => *author,
                None => {
                    log::warn!("no author for rejected {:?} in {}", op.id(), self.id);
                    continue;
                }
            };
            let _ = self.rejections.send(RejectionEvent {
                document_id: self.id,
                author,
                op: *op,
                error: error.clone(),
            });
        }
    }
}

/// Owns every live document and brokers access to them.
pub struct SessionCoordinator {
    config: EngineConfig,
    rooms: RwLock<FxHashMap<DocumentId, Arc<Room>>>,
    codes: RwLock<FxHashMap<ShareCode, (DocumentId, Role)>>,
    presence: PresenceTracker,
}

impl SessionCoordinator {
    pub fn new(config: EngineConfig) -> SessionCoordinator {
        let presence = PresenceTracker::new(config.event_capacity);
        return SessionCoordinator {
            config,
            rooms: RwLock::new(FxHashMap::default()),
            codes: RwLock::new(FxHashMap::default()),
            presence,
        };
    }

    pub fn config(&self) -> &EngineConfig {
        return &self.config;
    }

    /// Presence of the participants of every document.
    pub fn presence(&self) -> &PresenceTracker {
        return &self.presence;
    }

    /// Number of open documents.
    pub fn len(&self) -> usize {
        return self.rooms.read().len();
    }

    pub fn is_empty(&self) -> bool {
        return self.rooms.read().is_empty();
    }

    /// Open a new document, optionally holding `initial` text, with
    /// `creator` as its first editor.
    pub fn create_session(&self, creator: ParticipantId, initial: Option<&str>) -> Result<DocumentId> {
        let id = DocumentId::new();
        let replica = match initial {
            Some(text) => Replica::with_content(ReplicaId::HUB, text, &self.config),
            None => Replica::new(ReplicaId::HUB, &self.config),
        };

        let mut members = Members::new();
        members.admit(creator, Role::Editor);

        let (editor_code, viewer_code) = self.fresh_codes();
        let (edits, edit_stream) = mpsc::unbounded_channel();
        let (rejections, rejection_stream) = mpsc::unbounded_channel();
        let (cursors, _) = broadcast::channel(self.config.event_capacity.max(1));

        let room = Arc::new(Room {
            id,
            replica: RwLock::new(replica),
            members: Mutex::new(members),
            editor_code: editor_code.clone(),
            viewer_code: viewer_code.clone(),
            edits,
            edit_stream: Mutex::new(Some(edit_stream)),
            rejections,
            rejection_stream: Mutex::new(Some(rejection_stream)),
            cursors,
        });

        {
            let mut codes = self.codes.write();
            codes.insert(editor_code, (id, Role::Editor));
            codes.insert(viewer_code, (id, Role::Viewer));
        }
        self.rooms.write().insert(id, room);

        log::info!("created document {id} for {creator}");
        return Ok(id);
    }

    /// Open a new document holding `text`.
    pub fn import_document(&self, creator: ParticipantId, text: &str) -> Result<DocumentId> {
        return self.create_session(creator, Some(text));
    }

    /// The current text of a document.
    pub fn export_document(&self, document: DocumentId) -> Result<String> {
        let room = self.room(document)?;
        let text = room.replica.read().materialize();
        return Ok(text);
    }

    /// Join the document a share code points at, with the code's role.
    pub fn join(&self, code: &ShareCode, participant: ParticipantId) -> Result<Joined> {
        let (document_id, role) = match self.codes.read().get(code) {
            Some(entry) => *entry,
            None => return Err(Error::UnknownShareCode),
        };
        let room = self.room(document_id)?;

        // Snapshot and registration under the write lock, so no edit lands
        // between the history handed out and the new member appearing
        let replica_guard = room.replica.write();
        let replica = room.members.lock().admit(participant, role);
        let joined = Joined {
            document_id,
            role,
            replica,
            content: replica_guard.materialize(),
            history: replica_guard.document().log().ops().to_vec(),
        };
        drop(replica_guard);

        log::info!("{participant} joined {document_id} as {role:?} with replica {replica}");
        return Ok(joined);
    }

    /// Remove a participant from a document.
    pub fn leave(&self, document: DocumentId, participant: ParticipantId) -> Result<()> {
        let room = self.room(document)?;
        {
            let _replica = room.replica.write();
            if room.members.lock().members.remove(&participant).is_none() {
                return Err(Error::UnknownParticipant(participant));
            }
        }
        // Presence is optional for a member
        if let Err(error) = self.presence.leave(document, participant) {
            log::debug!("{participant} had no presence in {document}: {error}");
        }
        log::info!("{participant} left {document}");
        return Ok(());
    }

    /// Close a document. Its share codes stop resolving, anything still
    /// buffered is rejected to its author, and its streams end.
    pub fn close_session(&self, document: DocumentId) -> Result<()> {
        let room = match self.rooms.write().remove(&document) {
            Some(room) => room,
            None => return Err(Error::UnknownDocument(document)),
        };
        {
            let mut codes = self.codes.write();
            codes.remove(&room.editor_code);
            codes.remove(&room.viewer_code);
        }

        let dropped = room.replica.write().discard_pending();
        if !dropped.is_empty() {
            log::warn!("closing {document} with {} buffered operations", dropped.len());
            room.reject(&room.members.lock(), &dropped);
        }
        self.presence.clear(document);
        log::info!("closed document {document}");
        return Ok(());
    }

    /// Insert a character on behalf of an editor.
    pub fn insert(&self, document: DocumentId, participant: ParticipantId, position: usize, value: char) -> Result<Operation> {
        let room = self.room(document)?;
        let mut replica = room.replica.write();
        room.editor(participant)?;

        let op = replica.apply_local_insert(position, value)?;
        room.publish(participant, op);
        return Ok(op);
    }

    /// Delete a character on behalf of an editor.
    pub fn delete(&self, document: DocumentId, participant: ParticipantId, position: usize) -> Result<Operation> {
        let room = self.room(document)?;
        let mut replica = room.replica.write();
        room.editor(participant)?;

        let op = replica.apply_local_delete(position)?;
        room.publish(participant, op);
        return Ok(op);
    }

    /// Apply an operation an editor produced on its own replica.
    ///
    /// `known` is the participant's version when it sent the operation.
    /// Every operation applied as a result, including buffered ones the
    /// new operation released, is published on the edit stream. Buffered
    /// operations that expired along the way, whoever sent them, go out
    /// on the rejection stream.
    pub fn submit(
        &self,
        document: DocumentId,
        participant: ParticipantId,
        op: Operation,
        known: Option<&VersionVector>,
    ) -> Result<Delivery> {
        let room = self.room(document)?;
        let mut replica = room.replica.write();
        let member = room.editor(participant)?;
        if op.replica() != member.replica {
            return Err(Error::Malformed {
                id: op.id(),
                reason: "operation is stamped with another replica's id",
            });
        }

        let delivery = replica.apply_remote_operation(op, known)?;
        if !delivery.applied.is_empty() || !delivery.expired.is_empty() {
            let members = room.members.lock();
            for applied in &delivery.applied {
                let author = members.authors.get(&applied.replica()).copied().unwrap_or(participant);
                room.publish(author, *applied);
            }
            room.reject(&members, &delivery.expired);
        }
        return Ok(delivery);
    }

    /// Operations applied to a document that the holder of `version` has
    /// not seen.
    pub fn sync(&self, document: DocumentId, version: &VersionVector) -> Result<Vec<Operation>> {
        let room = self.room(document)?;
        let ops = room.replica.read().ops_since(version);
        return Ok(ops);
    }

    /// Place a participant's cursor after `target`.
    ///
    /// The target may be a tombstone or a sentinel, but must exist.
    pub fn update_cursor(&self, document: DocumentId, participant: ParticipantId, target: ElementId) -> Result<CursorUpdate> {
        let room = self.room(document)?;
        let position = match room.replica.read().document().caret_position(&target) {
            Some(position) => position,
            None => return Err(Error::InvalidCursorTarget(target)),
        };

        {
            let mut members = room.members.lock();
            match members.members.get_mut(&participant) {
                Some(member) => member.cursor = Some(target),
                None => return Err(Error::UnknownParticipant(participant)),
            }
        }

        let update = CursorUpdate {
            document_id: document,
            participant,
            target,
            position,
        };
        let _ = room.cursors.send(update);
        log::trace!("{participant} cursor in {document} at {position}");
        return Ok(update);
    }

    /// Current cursors of a document with freshly computed positions,
    /// sorted by participant.
    pub fn cursors(&self, document: DocumentId) -> Result<Vec<CursorUpdate>> {
        let room = self.room(document)?;
        let placed: Vec<(ParticipantId, ElementId)> = room
            .members
            .lock()
            .members
            .iter()
            .filter_map(|(id, member)| member.cursor.map(|target| (*id, target)))
            .collect();

        let replica = room.replica.read();
        let mut cursors: Vec<CursorUpdate> = placed
            .into_iter()
            .filter_map(|(participant, target)| {
                let position = replica.document().caret_position(&target)?;
                Some(CursorUpdate {
                    document_id: document,
                    participant,
                    target,
                    position,
                })
            })
            .collect();
        cursors.sort_by_key(|c| c.participant);
        return Ok(cursors);
    }

    /// Members of a document and their roles, sorted by participant.
    pub fn participants(&self, document: DocumentId) -> Result<Vec<(ParticipantId, Role)>> {
        let room = self.room(document)?;
        let mut list: Vec<(ParticipantId, Role)> =
            room.members.lock().members.iter().map(|(id, member)| (*id, member.role)).collect();
        list.sort_by_key(|(id, _)| *id);
        return Ok(list);
    }

    /// The share codes a participant may hand out.
    pub fn share_codes(&self, document: DocumentId, participant: ParticipantId) -> Result<ShareCodes> {
        let room = self.room(document)?;
        let member = room.members.lock().get(participant)?;
        let editor = match member.role {
            Role::Editor => Some(room.editor_code.clone()),
            Role::Viewer => None,
        };
        return Ok(ShareCodes {
            editor,
            viewer: room.viewer_code.clone(),
        });
    }

    /// Take the document's edit stream. There is one consumer per
    /// document; later calls get `None`.
    pub fn take_edit_stream(&self, document: DocumentId) -> Result<Option<mpsc::UnboundedReceiver<EditEvent>>> {
        let room = self.room(document)?;
        let stream = room.edit_stream.lock().take();
        return Ok(stream);
    }

    /// Take the document's rejection stream, on which every buffered
    /// operation the document gives up on is addressed to its author.
    /// There is one consumer per document; later calls get `None`.
    pub fn take_rejection_stream(&self, document: DocumentId) -> Result<Option<mpsc::UnboundedReceiver<RejectionEvent>>> {
        let room = self.room(document)?;
        let stream = room.rejection_stream.lock().take();
        return Ok(stream);
    }

    /// Subscribe to cursor updates. Slow subscribers miss the oldest ones.
    pub fn subscribe_cursors(&self, document: DocumentId) -> Result<broadcast::Receiver<CursorUpdate>> {
        let room = self.room(document)?;
        return Ok(room.cursors.subscribe());
    }

    fn room(&self, document: DocumentId) -> Result<Arc<Room>> {
        return self.rooms.read().get(&document).cloned().ok_or(Error::UnknownDocument(document));
    }

    /// Two codes that differ from each other and from every live code.
    fn fresh_codes(&self) -> (ShareCode, ShareCode) {
        let len = self.config.share_code_len.max(1);
        let codes = self.codes.read();
        let fresh = || loop {
            let code = ShareCode::generate(len);
            if !codes.contains_key(&code) {
                return code;
            }
        };
        let editor = fresh();
        let viewer = loop {
            let code = fresh();
            if code != editor {
                break code;
            }
        };
        return (editor, viewer);
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        return SessionCoordinator::new(EngineConfig::default());
    }
}
