use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Hands raw image payloads to clients by opaque reference.
///
/// Payloads are stored base64 encoded. An unread entry is dropped once
/// `pending_ttl` elapses. The first `take` of a reference removes it from the
/// primary map and promotes it into a small secondary map, where it stays
/// readable until `ttl` elapses or `capacity` newer promotions push it out.
pub struct ImageDataCache {
    inner: Mutex<Inner>,
    pending_ttl: Duration,
    ttl: Duration,
    capacity: usize,
}

#[derive(Default)]
struct Inner {
    primary: HashMap<String, Entry>,
    secondary: HashMap<String, Entry>,
}

struct Entry {
    payload: String,
    at: Instant,
}

impl ImageDataCache {
    pub fn new(pending_ttl: Duration, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pending_ttl,
            ttl,
            capacity,
        }
    }

    /// Store a payload and return its fresh reference.
    pub fn store(&self, payload: &[u8]) -> String {
        let encoded = STANDARD.encode(payload);
        let now = Instant::now();
        let mut inner = self.lock();
        self.expire(&mut inner, now);

        loop {
            let reference = Uuid::new_v4().to_string();
            if inner.primary.contains_key(&reference) || inner.secondary.contains_key(&reference) {
                tracing::error!(reference, "Image data reference collision, regenerating");
                continue;
            }
            inner.primary.insert(
                reference.clone(),
                Entry {
                    payload: encoded,
                    at: now,
                },
            );
            return reference;
        }
    }

    /// Read the payload for `reference`, or `None` if it is unknown, expired,
    /// or has left the re-read window.
    pub fn take(&self, reference: &str) -> Option<String> {
        let now = Instant::now();
        let mut inner = self.lock();
        self.expire(&mut inner, now);

        if let Some(entry) = inner.primary.remove(reference) {
            self.promote(&mut inner, reference, &entry.payload, now);
            tracing::debug!(reference, "Image data taken");
            return Some(entry.payload);
        }

        inner
            .secondary
            .get(reference)
            .map(|entry| entry.payload.clone())
    }

    /// Entries waiting for their first read.
    pub fn pending(&self) -> usize {
        self.lock().primary.len()
    }

    fn expire(&self, inner: &mut Inner, now: Instant) {
        let before = inner.primary.len();
        inner
            .primary
            .retain(|_, entry| now.duration_since(entry.at) < self.pending_ttl);
        let dropped = before - inner.primary.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Expired unread image data");
        }

        inner
            .secondary
            .retain(|_, entry| now.duration_since(entry.at) < self.ttl);
    }

    fn promote(&self, inner: &mut Inner, reference: &str, payload: &str, now: Instant) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }

        while inner.secondary.len() >= self.capacity {
            let oldest = inner
                .secondary
                .iter()
                .min_by_key(|(_, entry)| entry.at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.secondary.remove(&key);
                }
                None => break,
            }
        }

        inner.secondary.insert(
            reference.to_string(),
            Entry {
                payload: payload.to_string(),
                at: now,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Every critical section leaves the maps consistent, so a poisoned
        // lock still guards valid data.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
