//! Persisted key-value slots.
//!
//! Each slot holds one JSON document and is always replaced as a whole. Every
//! write is announced on a broadcast channel so other handles sharing the same
//! store (other "tabs") can pick up the change. A handle never hears about its
//! own writes.
//!
//! Other processes may open the same database file. Their writes are found by
//! [`Store::watch_external`], which polls the per-row revision and announces
//! what it finds on the same channel.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const EVENT_CAPACITY: usize = 64;

/// Origin of events found by polling, never handed out to a handle
const OUTSIDE_ORIGIN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// The enriched dish cache
    Meals,
    Cart,
    /// The dish opened on the detail page
    SelectedMeal,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meals => "meals",
            Self::Cart => "cart",
            Self::SelectedMeal => "selectedMeal",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [Self::Meals, Self::Cart, Self::SelectedMeal]
            .into_iter()
            .find(|key| key.as_str() == name)
    }
}

#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: StorageKey,
    /// Raw JSON written to the slot
    pub new_value: Option<String>,
    origin: u64,
}

impl StorageEvent {
    /// Parse the new value, `None` when it is missing or not a `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        let raw = self.new_value.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("ignore unparsable value for {}: {e}", self.key.as_str());
                None
            }
        }
    }
}

/// What a subscriber gets out of [`Subscription::recv`].
#[derive(Debug)]
pub enum Notification {
    Changed(StorageEvent),
    /// Events were dropped; the subscriber should re-read the slots it cares about.
    Lagged(u64),
}

pub struct Subscription {
    rx: broadcast::Receiver<StorageEvent>,
    origin: u64,
}

impl Subscription {
    /// Wait for the next change made by another handle.
    ///
    /// Returns `None` once every handle of the store is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(Notification::Changed(event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Notification::Lagged(n))
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct Shared {
    pool: SqlitePool,
    events: broadcast::Sender<StorageEvent>,
    next_origin: AtomicU64,
    /// Written into every row this process stores
    instance: i64,
    /// Highest revision the poller has looked at
    seen: AtomicI64,
}

impl Shared {
    /// Announce rows written by other processes since the last poll.
    async fn poll_external(&self) -> anyhow::Result<()> {
        let rows = sqlx::query(
            r#"
SELECT key, value, revision, writer
FROM kv_store
WHERE revision > ?
ORDER BY revision"#,
        )
        .bind(self.seen.load(Ordering::Acquire))
        .fetch_all(&self.pool)
        .await
        .with_context(|| "fail to poll kv_store")?;

        for row in rows {
            let revision: i64 = row.get("revision");
            self.seen.fetch_max(revision, Ordering::AcqRel);

            let writer: i64 = row.get("writer");
            if writer == self.instance {
                continue;
            }
            let name: String = row.get("key");
            let Some(key) = StorageKey::from_name(&name) else {
                continue;
            };
            tracing::debug!("outside write to {name} at revision {revision}");
            // no subscriber is fine
            let _ = self.events.send(StorageEvent {
                key,
                new_value: Some(row.get("value")),
                origin: OUTSIDE_ORIGIN,
            });
        }
        Ok(())
    }
}

/// One handle on the shared store.
pub struct Store {
    shared: Arc<Shared>,
    origin: u64,
}

impl Store {
    /// Open (creating if missing) the database at `url`.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("fail to open database {url}"))?;
        Self::from_pool(pool).await
    }

    /// A private in-memory store, mostly for tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .with_context(|| "fail to open in-memory database")?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key      TEXT PRIMARY KEY NOT NULL,
    value    TEXT NOT NULL,
    revision INTEGER NOT NULL,
    writer   INTEGER NOT NULL
)"#,
        )
        .execute(&pool)
        .await
        .with_context(|| "fail to create kv_store table")?;

        let seen: i64 = sqlx::query("SELECT COALESCE(MAX(revision), 0) AS seen FROM kv_store")
            .fetch_one(&pool)
            .await
            .with_context(|| "fail to read kv_store revision")?
            .get("seen");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                events,
                next_origin: AtomicU64::new(1),
                instance: rand::random(),
                seen: AtomicI64::new(seen),
            }),
            origin: 0,
        })
    }

    /// Another handle on the same slots, with its own identity.
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            origin: self.shared.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.shared.events.subscribe(),
            origin: self.origin,
        }
    }

    /// Poll the database every `interval` for writes made by other processes.
    ///
    /// The task ends on the first tick after every handle is dropped.
    pub fn watch_external(&self, interval: Duration) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if let Err(e) = shared.poll_external().await {
                    tracing::warn!("{e:#}");
                }
            }
        })
    }

    pub async fn get_raw(&self, key: StorageKey) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.shared.pool)
            .await
            .with_context(|| format!("fail to read {}", key.as_str()))?;
        Ok(row.map(|row| row.get("value")))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: StorageKey) -> anyhow::Result<Option<T>> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("fail to parse stored {}", key.as_str()))?;
        Ok(Some(value))
    }

    /// Replace the whole slot and notify the other handles.
    pub async fn set<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) -> anyhow::Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("fail to serialize {}", key.as_str()))?;

        sqlx::query(
            r#"
INSERT INTO kv_store
    (key, value, revision, writer)
VALUES
    (?, ?, (SELECT COALESCE(MAX(revision), 0) + 1 FROM kv_store), ?)
ON CONFLICT(key) DO UPDATE SET
    value = excluded.value,
    revision = excluded.revision,
    writer = excluded.writer"#,
        )
        .bind(key.as_str())
        .bind(raw.as_str())
        .bind(self.shared.instance)
        .execute(&self.shared.pool)
        .await
        .with_context(|| format!("fail to write {}", key.as_str()))?;

        // no subscriber is fine
        let _ = self.shared.events.send(StorageEvent {
            key,
            new_value: Some(raw),
            origin: self.origin,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_replaces_value() {
        let store = Store::in_memory().await.unwrap();
        assert_eq!(store.get::<Vec<u32>>(StorageKey::Cart).await.unwrap(), None);

        store.set(StorageKey::Cart, &vec![1, 2, 3]).await.unwrap();
        store.set(StorageKey::Cart, &vec![4]).await.unwrap();

        assert_eq!(
            store.get::<Vec<u32>>(StorageKey::Cart).await.unwrap(),
            Some(vec![4])
        );
        assert_eq!(store.get_raw(StorageKey::Meals).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handles_share_slots() {
        let first = Store::in_memory().await.unwrap();
        let second = first.handle();

        first.set(StorageKey::SelectedMeal, "52771").await.unwrap();
        assert_eq!(
            second.get::<String>(StorageKey::SelectedMeal).await.unwrap(),
            Some("52771".to_string())
        );
    }

    #[tokio::test]
    async fn test_writer_does_not_hear_itself() {
        let first = Store::in_memory().await.unwrap();
        let second = first.handle();
        let mut own = first.subscribe();
        let mut other = second.subscribe();

        first.set(StorageKey::Meals, &vec!["a"]).await.unwrap();
        second.set(StorageKey::Cart, &vec!["b"]).await.unwrap();

        let Some(Notification::Changed(event)) = other.recv().await else {
            panic!("second handle should see the first write");
        };
        assert_eq!(event.key, StorageKey::Meals);
        assert_eq!(event.parse::<Vec<String>>(), Some(vec!["a".to_string()]));

        let Some(Notification::Changed(event)) = own.recv().await else {
            panic!("first handle should see the second write");
        };
        assert_eq!(event.key, StorageKey::Cart);
    }

    #[tokio::test]
    async fn test_unparsable_event_value() {
        let event = StorageEvent {
            key: StorageKey::Meals,
            new_value: Some("not json".to_string()),
            origin: 3,
        };
        assert_eq!(event.parse::<Vec<String>>(), None);
    }

    async fn file_store(dir: &tempfile::TempDir) -> Store {
        let url = format!("sqlite:{}", dir.path().join("catalog.db").display());
        Store::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_outside_write_is_announced() {
        let dir = tempfile::tempdir().unwrap();
        let ours = file_store(&dir).await;
        let theirs = file_store(&dir).await;
        let _watch = ours.watch_external(Duration::from_millis(10));
        let mut events = ours.subscribe();

        theirs.set(StorageKey::Meals, &vec!["pozole"]).await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("outside write was never announced");
        let Some(Notification::Changed(event)) = notification else {
            panic!("expected a change");
        };
        assert_eq!(event.key, StorageKey::Meals);
        assert_eq!(event.parse::<Vec<String>>(), Some(vec!["pozole".to_string()]));
    }

    #[tokio::test]
    async fn test_own_process_writes_are_not_polled_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        let _watch = store.watch_external(Duration::from_millis(10));
        let mut events = store.handle().subscribe();

        store.set(StorageKey::Cart, &vec![1]).await.unwrap();
        assert!(matches!(events.recv().await, Some(Notification::Changed(_))));

        let again = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(again.is_err(), "write announced twice: {again:?}");
    }

    #[tokio::test]
    async fn test_older_rows_are_not_announced() {
        let dir = tempfile::tempdir().unwrap();
        file_store(&dir)
            .await
            .set(StorageKey::Meals, &vec!["old"])
            .await
            .unwrap();

        let store = file_store(&dir).await;
        let _watch = store.watch_external(Duration::from_millis(10));
        let mut events = store.subscribe();
        let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err(), "{quiet:?}");
    }

    #[tokio::test]
    async fn test_watch_ends_with_store() {
        let store = Store::in_memory().await.unwrap();
        let watch = store.watch_external(Duration::from_millis(10));
        drop(store);

        tokio::time::timeout(Duration::from_secs(5), watch)
            .await
            .expect("watch task outlived the store")
            .unwrap();
    }
}
