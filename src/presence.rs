//! Who is connected to which document, with a stable color per person.
//!
//! Colors come from hashing the participant id, so every replica renders
//! the same person in the same color without coordinating.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::error::Result;
use crate::session::DocumentId;
use crate::session::ParticipantId;

const SATURATION: f32 = 0.9;
const BRIGHTNESS: f32 = 0.9;

/// A participant's display color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    /// Hue in degrees, `0..360`.
    pub hue: u16,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// The color assigned to a participant.
    pub fn for_participant(participant: ParticipantId) -> Color {
        let hash = blake3::hash(participant.0.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        let hue = (u64::from_le_bytes(head) % 360) as u16;
        return Color::from_hsb(hue, SATURATION, BRIGHTNESS);
    }

    /// Convert hue, saturation and brightness (value) to RGB.
    pub fn from_hsb(hue: u16, saturation: f32, brightness: f32) -> Color {
        let hue = hue % 360;
        let chroma = brightness * saturation;
        let sector = hue as f32 / 60.0;
        let x = chroma * (1.0 - ((sector % 2.0) - 1.0).abs());
        let (r, g, b) = match hue / 60 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = brightness - chroma;
        let channel = |c: f32| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        return Color {
            hue,
            r: channel(r),
            g: channel(g),
            b: channel(b),
        };
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        return (self.r, self.g, self.b);
    }

    /// `#rrggbb`
    pub fn hex(&self) -> String {
        return format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b);
    }
}

/// A connected participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub participant: ParticipantId,
    pub display_name: String,
    pub color: Color,
}

/// A change in who is present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceEvent {
    Joined { document_id: DocumentId, entry: PresenceEntry },
    Left { document_id: DocumentId, participant: ParticipantId },
}

/// Tracks presence for every document.
pub struct PresenceTracker {
    documents: Mutex<FxHashMap<DocumentId, FxHashMap<ParticipantId, PresenceEntry>>>,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceTracker {
    /// Create a tracker whose event stream buffers `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> PresenceTracker {
        let (events, _) = broadcast::channel(capacity.max(1));
        return PresenceTracker {
            documents: Mutex::new(FxHashMap::default()),
            events,
        };
    }

    /// Mark a participant present. Joining again replaces the display name.
    pub fn join(&self, document: DocumentId, participant: ParticipantId, display_name: &str) -> PresenceEntry {
        let entry = PresenceEntry {
            participant,
            display_name: display_name.to_string(),
            color: Color::for_participant(participant),
        };
        self.documents.lock().entry(document).or_default().insert(participant, entry.clone());

        log::debug!("{participant} present in {document} as {display_name:?}");
        let _ = self.events.send(PresenceEvent::Joined {
            document_id: document,
            entry: entry.clone(),
        });
        return entry;
    }

    /// Mark a participant absent.
    pub fn leave(&self, document: DocumentId, participant: ParticipantId) -> Result<()> {
        {
            let mut documents = self.documents.lock();
            let present = match documents.get_mut(&document) {
                Some(present) => present,
                None => return Err(Error::UnknownDocument(document)),
            };
            if present.remove(&participant).is_none() {
                return Err(Error::UnknownParticipant(participant));
            }
            if present.is_empty() {
                documents.remove(&document);
            }
        }

        let _ = self.events.send(PresenceEvent::Left {
            document_id: document,
            participant,
        });
        return Ok(());
    }

    /// Everyone present in a document, sorted by participant id.
    pub fn list(&self, document: DocumentId) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = match self.documents.lock().get(&document) {
            Some(present) => present.values().cloned().collect(),
            None => Vec::new(),
        };
        entries.sort_by_key(|e| e.participant);
        return entries;
    }

    /// Forget a document, announcing everyone in it as gone.
    pub fn clear(&self, document: DocumentId) {
        let removed = self.documents.lock().remove(&document);
        for participant in removed.into_iter().flat_map(|present| present.into_keys()) {
            let _ = self.events.send(PresenceEvent::Left {
                document_id: document,
                participant,
            });
        }
    }

    /// Subscribe to presence changes. Slow subscribers miss the oldest.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        return self.events.subscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsb_primaries() {
        assert_eq!(Color::from_hsb(0, 1.0, 1.0).rgb(), (255, 0, 0));
        assert_eq!(Color::from_hsb(120, 1.0, 1.0).rgb(), (0, 255, 0));
        assert_eq!(Color::from_hsb(240, 1.0, 1.0).rgb(), (0, 0, 255));
        assert_eq!(Color::from_hsb(0, 0.0, 1.0).hex(), "#ffffff");
    }

    #[test]
    fn colors_are_stable() {
        let p = ParticipantId::new();
        let a = Color::for_participant(p);
        let b = Color::for_participant(p);
        assert_eq!(a, b);
        assert!(a.hue < 360);
        assert_eq!(a.hex().len(), 7);
    }

    #[test]
    fn join_list_leave() {
        let tracker = PresenceTracker::new(16);
        let mut events = tracker.subscribe();
        let document = DocumentId::new();
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();

        tracker.join(document, alice, "alice");
        tracker.join(document, bob, "bob");
        let list = tracker.list(document);
        assert_eq!(list.len(), 2);
        assert!(list[0].participant < list[1].participant);

        tracker.leave(document, alice).unwrap();
        assert_eq!(tracker.leave(document, alice), Err(Error::UnknownParticipant(alice)));
        assert_eq!(tracker.list(document).len(), 1);

        assert!(matches!(events.try_recv().unwrap(), PresenceEvent::Joined { .. }));
        assert!(matches!(events.try_recv().unwrap(), PresenceEvent::Joined { .. }));
        assert_eq!(events.try_recv().unwrap(), PresenceEvent::Left {
            document_id: document,
            participant: alice,
        });
    }

    #[test]
    fn leave_unknown_document() {
        let tracker = PresenceTracker::new(16);
        let document = DocumentId::new();
        let alice = ParticipantId::new();
        assert_eq!(tracker.leave(document, alice), Err(Error::UnknownDocument(document)));

        // The last one out forgets the document
        tracker.join(document, alice, "alice");
        let mut events = tracker.subscribe();
        tracker.leave(document, alice).unwrap();
        assert_eq!(tracker.leave(document, alice), Err(Error::UnknownDocument(document)));
        assert!(matches!(events.try_recv().unwrap(), PresenceEvent::Left { .. }));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn clear_announces_departures() {
        let tracker = PresenceTracker::new(16);
        let document = DocumentId::new();
        tracker.join(document, ParticipantId::new(), "a");
        let mut events = tracker.subscribe();

        tracker.clear(document);
        assert!(tracker.list(document).is_empty());
        assert!(matches!(events.try_recv().unwrap(), PresenceEvent::Left { .. }));
    }
}
