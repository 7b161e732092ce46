//! In-memory, per-stream event log used for resumable SSE delivery.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    str::FromStr,
    sync::Arc,
};

use serde_json::Value;

use crate::error::{GatewayError, Result};

pub type StreamId = Arc<str>;

/// Position of one event: its stream and its sequence number in that stream.
///
/// Rendered on the wire (SSE `id:` / `Last-Event-ID`) as `<stream>_<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    stream_id: StreamId,
    sequence: u64,
}

impl EventId {
    pub fn new(stream_id: impl Into<StreamId>, sequence: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            sequence,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.stream_id, self.sequence)
    }
}

impl FromStr for EventId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GatewayError::Protocol(format!("invalid Last-Event-ID: {s}"));
        let (stream_id, sequence) = s.rsplit_once('_').ok_or_else(invalid)?;
        if stream_id.is_empty() {
            return Err(invalid());
        }
        let sequence = sequence.parse().map_err(|_| invalid())?;
        Ok(Self::new(stream_id, sequence))
    }
}

/// An event as held in (and replayed from) the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub payload: Arc<Value>,
}

/// Bounds applied to every [`EventStore`].
///
/// Each stream keeps at most `max_events_per_stream` events (oldest dropped
/// first); a store keeps at most `max_streams` streams, dropping the one
/// least recently appended to. Pinned streams are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_events_per_stream: usize,
    pub max_streams: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_events_per_stream: 1024,
            max_streams: 64,
        }
    }
}

#[derive(Debug)]
struct StreamLog {
    last_sequence: u64,
    last_touched: u64,
    events: VecDeque<(u64, Arc<Value>)>,
}

impl StreamLog {
    fn first_retained(&self) -> u64 {
        self.events
            .front()
            .map(|(sequence, _)| *sequence)
            .unwrap_or(self.last_sequence + 1)
    }
}

/// Append-only event log keyed by stream.
///
/// Sequence numbers start at 1 and are gapless within a stream. Replaying
/// from marker `n` yields exactly the retained events with sequence `> n`;
/// marker `0` means "from the beginning".
///
/// A stream dropped by the stream cap leaves its last sequence behind, so an
/// id is never handed out twice: later appends continue the numbering and
/// markers into the dropped history replay as a gap.
#[derive(Debug, Default)]
pub struct EventStore {
    streams: HashMap<StreamId, StreamLog>,
    evicted: VecDeque<(StreamId, u64)>,
    pinned: HashSet<StreamId>,
    retention: RetentionPolicy,
    clock: u64,
}

impl EventStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            streams: HashMap::new(),
            evicted: VecDeque::new(),
            pinned: HashSet::new(),
            retention,
            clock: 0,
        }
    }

    /// Exempt `stream_id` from stream-cap eviction.
    pub fn pin(mut self, stream_id: impl Into<StreamId>) -> Self {
        self.pinned.insert(stream_id.into());
        self
    }

    /// Append `payload` to `stream_id`, returning its assigned id.
    pub fn append(&mut self, stream_id: &str, payload: impl Into<Arc<Value>>) -> EventId {
        self.clock += 1;

        let (key, resumed_from) = match self.streams.get_key_value(stream_id) {
            Some((key, _)) => (key.clone(), 0),
            None => {
                self.evict_streams_for_insert();
                (StreamId::from(stream_id), self.take_evicted(stream_id))
            }
        };

        let max_events = self.retention.max_events_per_stream.max(1);
        let log = self.streams.entry(key.clone()).or_insert_with(|| StreamLog {
            last_sequence: resumed_from,
            last_touched: 0,
            events: VecDeque::new(),
        });

        log.last_sequence += 1;
        log.last_touched = self.clock;
        log.events.push_back((log.last_sequence, payload.into()));
        while log.events.len() > max_events {
            log.events.pop_front();
        }

        EventId {
            stream_id: key,
            sequence: log.last_sequence,
        }
    }

    /// Events of `stream_id` strictly after sequence `after`, in order.
    ///
    /// Fails with [`GatewayError::ReplayGap`] when `after` is older than the
    /// retained window or newer than anything appended.
    pub fn replay_from(&self, stream_id: &str, after: u64) -> Result<Vec<StoredEvent>> {
        let gap = || GatewayError::ReplayGap {
            stream_id: stream_id.to_string(),
            event_id: after,
        };

        let Some((key, log)) = self.streams.get_key_value(stream_id) else {
            // A caught-up marker on a dropped stream has nothing left to miss.
            let last = self.evicted_sequence(stream_id).unwrap_or(0);
            return if after == last { Ok(Vec::new()) } else { Err(gap()) };
        };

        if after > log.last_sequence || after + 1 < log.first_retained() {
            return Err(gap());
        }

        Ok(log
            .events
            .iter()
            .filter(|(sequence, _)| *sequence > after)
            .map(|(sequence, payload)| StoredEvent {
                id: EventId {
                    stream_id: key.clone(),
                    sequence: *sequence,
                },
                payload: payload.clone(),
            })
            .collect())
    }

    /// Replay everything after the given marker.
    pub fn replay_after(&self, marker: &EventId) -> Result<Vec<StoredEvent>> {
        self.replay_from(&marker.stream_id, marker.sequence)
    }

    /// Id of the newest event in `stream_id`, if any.
    pub fn last_event_id(&self, stream_id: &str) -> Option<EventId> {
        match self.streams.get_key_value(stream_id) {
            Some((key, log)) => (log.last_sequence > 0).then(|| EventId {
                stream_id: key.clone(),
                sequence: log.last_sequence,
            }),
            None => self
                .evicted
                .iter()
                .find(|(id, _)| id.as_ref() == stream_id)
                .map(|(id, sequence)| EventId {
                    stream_id: id.clone(),
                    sequence: *sequence,
                }),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn retained(&self, stream_id: &str) -> usize {
        self.streams
            .get(stream_id)
            .map(|log| log.events.len())
            .unwrap_or(0)
    }

    fn evict_streams_for_insert(&mut self) {
        let max_streams = self.retention.max_streams.max(1);
        while self.streams.len() >= max_streams {
            let Some(oldest) = self
                .streams
                .iter()
                .filter(|(id, _)| !self.pinned.contains(*id))
                .min_by_key(|(_, log)| log.last_touched)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            tracing::debug!(stream_id = %oldest, "evicting event stream");
            if let Some(log) = self.streams.remove(&oldest) {
                self.evicted.push_back((oldest, log.last_sequence));
                while self.evicted.len() > max_streams {
                    self.evicted.pop_front();
                }
            }
        }
    }

    fn evicted_sequence(&self, stream_id: &str) -> Option<u64> {
        self.evicted
            .iter()
            .find(|(id, _)| id.as_ref() == stream_id)
            .map(|(_, sequence)| *sequence)
    }

    fn take_evicted(&mut self, stream_id: &str) -> u64 {
        match self.evicted.iter().position(|(id, _)| id.as_ref() == stream_id) {
            Some(index) => self
                .evicted
                .remove(index)
                .map(|(_, sequence)| sequence)
                .unwrap_or(0),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(stream: &str, count: u64) -> EventStore {
        let mut store = EventStore::new(RetentionPolicy::default());
        for n in 1..=count {
            store.append(stream, json!({"n": n}));
        }
        store
    }

    fn sequences(events: &[StoredEvent]) -> Vec<u64> {
        events.iter().map(|e| e.id.sequence()).collect()
    }

    #[test]
    fn assigns_gapless_sequences_per_stream() {
        let mut store = EventStore::default();
        assert_eq!(store.append("a", json!(1)).sequence(), 1);
        assert_eq!(store.append("b", json!(1)).sequence(), 1);
        assert_eq!(store.append("a", json!(2)).sequence(), 2);

        let full = store.replay_from("a", 0).unwrap();
        assert_eq!(sequences(&full), [1, 2]);
    }

    #[test]
    fn replays_strict_suffix_in_order() {
        let store = store_with("standalone", 5);
        let events = store.replay_from("standalone", 3).unwrap();
        assert_eq!(sequences(&events), [4, 5]);
        assert_eq!(*events[0].payload, json!({"n": 4}));
    }

    #[test]
    fn replay_is_idempotent() {
        let store = store_with("s", 4);
        assert_eq!(
            store.replay_from("s", 1).unwrap(),
            store.replay_from("s", 1).unwrap()
        );
    }

    #[test]
    fn replay_from_last_event_is_empty() {
        let store = store_with("s", 2);
        assert!(store.replay_from("s", 2).unwrap().is_empty());
    }

    #[test]
    fn marker_beyond_last_is_a_gap() {
        let store = store_with("s", 2);
        assert!(matches!(
            store.replay_from("s", 9),
            Err(GatewayError::ReplayGap { event_id: 9, .. })
        ));
    }

    #[test]
    fn unknown_stream_only_replays_from_zero() {
        let store = EventStore::default();
        assert!(store.replay_from("nope", 0).unwrap().is_empty());
        assert!(matches!(
            store.replay_from("nope", 1),
            Err(GatewayError::ReplayGap { .. })
        ));
    }

    #[test]
    fn evicted_markers_are_gaps() {
        let mut store = EventStore::new(RetentionPolicy {
            max_events_per_stream: 3,
            max_streams: 4,
        });
        for n in 1..=5 {
            store.append("s", json!(n));
        }
        assert_eq!(store.retained("s"), 3);
        // 3, 4, 5 are retained; resuming after 2 is still complete.
        assert_eq!(sequences(&store.replay_from("s", 2).unwrap()), [3, 4, 5]);
        assert!(matches!(
            store.replay_from("s", 1),
            Err(GatewayError::ReplayGap { .. })
        ));
        assert!(store.replay_from("s", 0).is_err());
    }

    #[test]
    fn evicts_least_recently_appended_stream() {
        let mut store = EventStore::new(RetentionPolicy {
            max_events_per_stream: 8,
            max_streams: 2,
        });
        store.append("first", json!(1));
        store.append("second", json!(1));
        store.append("first", json!(2));
        store.append("third", json!(1));

        assert_eq!(store.stream_count(), 2);
        assert_eq!(store.retained("second"), 0);
        assert_eq!(store.retained("first"), 2);
        assert!(store.replay_from("second", 0).is_err());
    }

    #[test]
    fn evicted_stream_continues_its_numbering() {
        let mut store = EventStore::new(RetentionPolicy {
            max_events_per_stream: 8,
            max_streams: 2,
        });
        store.append("standalone", json!(1));
        store.append("standalone", json!(2));
        store.append("post-a", json!("a"));
        store.append("post-b", json!("b"));
        assert_eq!(store.retained("standalone"), 0);

        let id = store.append("standalone", json!(3));
        assert_eq!(id, EventId::new("standalone", 3));

        // History before the eviction is gone, and says so.
        assert!(matches!(
            store.replay_from("standalone", 1),
            Err(GatewayError::ReplayGap { event_id: 1, .. })
        ));
        let tail = store.replay_from("standalone", 2).unwrap();
        assert_eq!(sequences(&tail), [3]);
        assert_eq!(*tail[0].payload, json!(3));
    }

    #[test]
    fn markers_on_an_evicted_stream_are_gaps_until_caught_up() {
        let mut store = EventStore::new(RetentionPolicy {
            max_events_per_stream: 8,
            max_streams: 1,
        });
        store.append("old", json!(1));
        store.append("old", json!(2));
        store.append("new", json!(1));

        assert_eq!(store.last_event_id("old"), Some(EventId::new("old", 2)));
        assert!(store.replay_from("old", 0).is_err());
        assert!(store.replay_from("old", 1).is_err());
        assert!(store.replay_from("old", 2).unwrap().is_empty());
    }

    #[test]
    fn pinned_streams_survive_the_stream_cap() {
        let mut store = EventStore::new(RetentionPolicy {
            max_events_per_stream: 8,
            max_streams: 2,
        })
        .pin("standalone");
        store.append("standalone", json!(1));
        for n in 0..5 {
            store.append(&format!("post-{n}"), json!(n));
        }

        assert_eq!(store.stream_count(), 2);
        assert_eq!(store.retained("standalone"), 1);
        assert_eq!(store.retained("post-4"), 1);
        assert_eq!(
            sequences(&store.replay_from("standalone", 0).unwrap()),
            [1]
        );
    }

    #[test]
    fn last_event_id_tracks_newest() {
        let store = store_with("s", 3);
        assert_eq!(store.last_event_id("s"), Some(EventId::new("s", 3)));
        assert_eq!(store.last_event_id("other"), None);
    }

    #[test]
    fn event_id_wire_format() {
        let id = EventId::new("standalone", 42);
        assert_eq!(id.to_string(), "standalone_42");
        assert_eq!("standalone_42".parse::<EventId>().unwrap(), id);

        let with_underscores: EventId = "post_a_b_7".parse().unwrap();
        assert_eq!(with_underscores.stream_id().as_ref(), "post_a_b");
        assert_eq!(with_underscores.sequence(), 7);

        assert!("nosequence".parse::<EventId>().is_err());
        assert!("_5".parse::<EventId>().is_err());
        assert!("s_x".parse::<EventId>().is_err());
    }
}
