//! End-to-end sessions: participants holding their own replicas, the
//! coordinator relaying edits between them.

use cotext::EngineConfig;
use cotext::Error;
use cotext::crdt::primitives::ElementId;
use cotext::crdt::replica::Replica;
use cotext::presence::PresenceEvent;
use cotext::session::EditEvent;
use cotext::session::ParticipantId;
use cotext::session::Role;
use cotext::session::SessionCoordinator;

/// A participant with a local replica, as a client would hold it.
struct Client {
    id: ParticipantId,
    replica: Replica,
}

impl Client {
    fn join(coordinator: &SessionCoordinator, code: &cotext::session::ShareCode) -> Client {
        let id = ParticipantId::new();
        let joined = coordinator.join(code, id).unwrap();
        let replica = Replica::from_history(joined.replica, &joined.history, coordinator.config()).unwrap();
        assert_eq!(replica.materialize(), joined.content);
        return Client { id, replica };
    }

    fn receive(&mut self, event: &EditEvent) {
        if event.op.replica() != self.replica.replica() {
            self.replica.apply_remote_operation(event.op, None).unwrap();
        }
    }
}

#[test]
fn two_editors_converge_through_the_hub() {
    let coordinator = SessionCoordinator::new(EngineConfig::default());
    let owner = ParticipantId::new();
    let document = coordinator.create_session(owner, Some("hello")).unwrap();
    let mut edits = coordinator.take_edit_stream(document).unwrap().unwrap();
    let code = coordinator.share_codes(document, owner).unwrap().editor.unwrap();

    let mut alice = Client::join(&coordinator, &code);
    let mut bob = Client::join(&coordinator, &code);

    // Concurrent edits on both sides of the same gap
    let a1 = alice.replica.apply_local_insert(5, ',').unwrap();
    let a2 = alice.replica.apply_local_insert(6, ' ').unwrap();
    let b1 = bob.replica.apply_local_insert(5, '!').unwrap();
    let owner_op = coordinator.insert(document, owner, 0, '>').unwrap();

    // Bob's edit arrives first, Alice's out of order
    coordinator.submit(document, bob.id, b1, Some(bob.replica.version())).unwrap();
    assert!(coordinator.submit(document, alice.id, a2, None).unwrap().buffered);
    let delivery = coordinator.submit(document, alice.id, a1, None).unwrap();
    assert_eq!(delivery.applied, vec![a1, a2]);

    let mut events = Vec::new();
    while let Ok(event) = edits.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].op, owner_op);
    assert_eq!(events[0].author, owner);
    assert_eq!(events[1].author, bob.id);
    assert_eq!(events[2].author, alice.id);

    for event in &events {
        alice.receive(event);
        bob.receive(event);
    }

    let hub = coordinator.export_document(document).unwrap();
    assert_eq!(alice.replica.materialize(), hub);
    assert_eq!(bob.replica.materialize(), hub);
    assert!(hub.starts_with(">hello"));
    assert_eq!(hub.chars().count(), 9);
}

#[test]
fn viewer_insert_is_unauthorized() {
    let coordinator = SessionCoordinator::default();
    let owner = ParticipantId::new();
    let document = coordinator.import_document(owner, "read only").unwrap();
    let code = coordinator.share_codes(document, owner).unwrap().viewer;

    let viewer = Client::join(&coordinator, &code);
    let mut replica = viewer.replica.clone();
    let op = replica.apply_local_insert(0, 'x').unwrap();

    assert_eq!(coordinator.insert(document, viewer.id, 0, 'x'), Err(Error::Unauthorized { participant: viewer.id }));
    assert_eq!(
        coordinator.submit(document, viewer.id, op, None).unwrap_err(),
        Error::Unauthorized { participant: viewer.id },
    );
    assert_eq!(coordinator.export_document(document).unwrap(), "read only");
    assert_eq!(coordinator.participants(document).unwrap().iter().filter(|(_, r)| *r == Role::Viewer).count(), 1);
}

#[test]
fn delete_past_end() {
    let coordinator = SessionCoordinator::default();
    let owner = ParticipantId::new();
    let document = coordinator.create_session(owner, Some("abc")).unwrap();

    let err = coordinator.delete(document, owner, 5).unwrap_err();
    assert_eq!(err, Error::NotFound { position: 5, len: 3 });
    assert_eq!(coordinator.export_document(document).unwrap(), "abc");
}

#[test]
fn cursor_follows_its_element() {
    let coordinator = SessionCoordinator::default();
    let owner = ParticipantId::new();
    let document = coordinator.create_session(owner, Some("abcd")).unwrap();
    let mut cursors = coordinator.subscribe_cursors(document).unwrap();

    let c = coordinator.sync(document, &Default::default()).unwrap()[2].id();
    assert_eq!(coordinator.update_cursor(document, owner, c).unwrap().position, 3);
    assert_eq!(cursors.try_recv().unwrap().target, c);

    coordinator.insert(document, owner, 0, 'z').unwrap();
    assert_eq!(coordinator.cursors(document).unwrap()[0].position, 4);

    coordinator.delete(document, owner, 3).unwrap();
    assert_eq!(coordinator.cursors(document).unwrap()[0].position, 3);

    let bogus = ElementId::new(77, cotext::crdt::primitives::ReplicaId(12));
    assert_eq!(coordinator.update_cursor(document, owner, bogus), Err(Error::InvalidCursorTarget(bogus)));
    assert_eq!(coordinator.update_cursor(document, owner, ElementId::START).unwrap().position, 0);
}

#[test]
fn share_codes_are_independent() {
    let coordinator = SessionCoordinator::default();
    let owner = ParticipantId::new();
    let first = coordinator.create_session(owner, None).unwrap();
    let second = coordinator.create_session(owner, None).unwrap();

    let a = coordinator.share_codes(first, owner).unwrap();
    let b = coordinator.share_codes(second, owner).unwrap();
    let all = [a.editor.clone().unwrap(), a.viewer.clone(), b.editor.clone().unwrap(), b.viewer.clone()];
    for (i, x) in all.iter().enumerate() {
        for y in &all[i + 1..] {
            assert_ne!(x, y);
        }
        assert!(!x.as_str().contains(&first.to_string()[..8]));
    }

    let joined = coordinator.join(&b.viewer, ParticipantId::new()).unwrap();
    assert_eq!(joined.document_id, second);
    assert_eq!(joined.role, Role::Viewer);

    coordinator.close_session(second).unwrap();
    assert_eq!(coordinator.join(&b.editor.unwrap(), ParticipantId::new()), Err(Error::UnknownShareCode));
    assert!(coordinator.join(&a.editor.unwrap(), ParticipantId::new()).is_ok());
}

#[test]
fn presence_through_the_coordinator() {
    let coordinator = SessionCoordinator::default();
    let owner = ParticipantId::new();
    let document = coordinator.create_session(owner, None).unwrap();
    let mut events = coordinator.presence().subscribe();

    let entry = coordinator.presence().join(document, owner, "owner");
    assert_eq!(entry.color, coordinator.presence().list(document)[0].color);

    coordinator.leave(document, owner).unwrap();
    assert!(coordinator.presence().list(document).is_empty());

    assert!(matches!(events.try_recv().unwrap(), PresenceEvent::Joined { .. }));
    assert!(matches!(events.try_recv().unwrap(), PresenceEvent::Left { .. }));
}
