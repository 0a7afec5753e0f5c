/*
 * Time-bounded, process-local quote cache
 */

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;
use crate::models::{GatewayError, Result};
use super::Quote;

struct Entry {
    quote: Arc<Quote>,
    deadline: Instant,
    in_flight: bool,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Quotes keyed by their id. Entries are unreachable once their TTL has
/// passed, whether or not the sweeper has removed them yet.
pub struct QuoteCache {
    entries: DashMap<Uuid, Entry>,
    ttl: Duration,
}

impl QuoteCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&self, quote: Quote) -> Uuid {
        let id = quote.id;
        self.entries.insert(
            id,
            Entry {
                quote: Arc::new(quote),
                deadline: Instant::now() + self.ttl,
                in_flight: false,
            },
        );
        id
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<Quote>> {
        let now = Instant::now();
        match self.entries.get(id) {
            Some(entry) if !entry.expired(now) => Ok(entry.quote.clone()),
            Some(_) => {
                debug!("Quote {} requested after expiry", id);
                Err(not_found(id))
            }
            None => {
                debug!("Quote {} is unknown", id);
                Err(not_found(id))
            }
        }
    }

    /// Marks the quote as being executed. Only one claim per quote can be
    /// held at a time; dropping the claim without consuming it releases it.
    pub fn claim(self: &Arc<Self>, id: &Uuid) -> Result<QuoteClaim> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(id).ok_or_else(|| {
            debug!("Quote {} is unknown", id);
            not_found(id)
        })?;

        if entry.expired(now) {
            debug!("Quote {} claimed after expiry", id);
            return Err(not_found(id));
        }
        if entry.in_flight {
            return Err(GatewayError::BadRequest(format!(
                "Quote {id} is already being executed"
            )));
        }

        entry.in_flight = true;
        Ok(QuoteClaim {
            cache: self.clone(),
            id: *id,
            quote: entry.quote.clone(),
            consumed: false,
        })
    }

    fn release(&self, id: &Uuid) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.in_flight = false;
        }
    }

    /// Removes expired entries that are not being executed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.in_flight || !entry.expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweeps every half TTL. The task ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = (self.ttl / 2).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired quotes", purged);
                }
            }
        })
    }
}

fn not_found(id: &Uuid) -> GatewayError {
    GatewayError::NotFound(format!("Quote {id} not found or expired"))
}

pub fn parse_quote_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| GatewayError::BadRequest(format!("Invalid quote id: {raw}")))
}

/// Exclusive right to execute one cached quote.
pub struct QuoteClaim {
    cache: Arc<QuoteCache>,
    id: Uuid,
    quote: Arc<Quote>,
    consumed: bool,
}

impl QuoteClaim {
    #[must_use]
    pub fn quote(&self) -> &Arc<Quote> {
        &self.quote
    }

    /// Removes the quote for good; called once its transaction is submitted.
    pub fn consume(mut self) {
        self.cache.entries.remove(&self.id);
        self.consumed = true;
    }
}

impl Drop for QuoteClaim {
    fn drop(&mut self) {
        if !self.consumed {
            self.cache.release(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn returns_inserted_quote_within_ttl() {
        let cache = QuoteCache::new(Duration::from_secs(120));
        let quote = testing::sample_quote();
        let id = cache.insert(quote.clone());
        let stored = cache.get(&id).unwrap();
        assert_eq!(stored.context, quote.context);
        assert_eq!(stored.amounts, quote.amounts);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_quotes_are_not_found() {
        let cache = QuoteCache::new(Duration::from_secs(120));
        let id = cache.insert(testing::sample_quote());

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(cache.get(&id).is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(cache.get(&id), Err(GatewayError::NotFound(_))));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let cache = QuoteCache::new(Duration::from_secs(120));
        assert!(matches!(cache.get(&Uuid::new_v4()), Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_claims_are_rejected() {
        let cache = Arc::new(QuoteCache::new(Duration::from_secs(120)));
        let id = cache.insert(testing::sample_quote());

        let claim = cache.claim(&id).unwrap();
        assert!(matches!(cache.claim(&id), Err(GatewayError::BadRequest(_))));

        drop(claim);
        let claim = cache.claim(&id).unwrap();
        claim.consume();
        assert!(matches!(cache.claim(&id), Err(GatewayError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(QuoteCache::new(Duration::from_secs(10)));
        cache.insert(testing::sample_quote());
        let handle = cache.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(cache.is_empty());
        handle.abort();
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        assert!(matches!(parse_quote_id("abc"), Err(GatewayError::BadRequest(_))));
        assert!(parse_quote_id(&Uuid::new_v4().to_string()).is_ok());
    }
}
