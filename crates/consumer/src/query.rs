//! Cache-aside query consumer
//!
//! Serves the three read-query kinds: check the cache first, fall back to
//! a durable-store query on miss, populate the cache with a TTL, reply
//! through the correlation envelope. The serialized reply is the cached
//! unit, so a repeat query inside the TTL returns an identical result
//! without touching the store. Empty results are valid outcomes and are
//! cached too; internal errors are not.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use slopestream_broker::{Envelope, PooledChannel};
use slopestream_storage::{QueryCache, RideStore};
use slopestream_types::keys::{
    day_prefix, index_key, partition_key, resort_prefix, season_prefix,
};
use slopestream_types::{QueryReply, QueryRequest, Result, SeasonVertical};

/// Query-consumer tuning
#[derive(Debug, Clone)]
pub struct QueryConsumerConfig {
    /// Queue carrying query requests
    pub queue: String,
    /// Expiry for cached replies
    pub cache_ttl: Duration,
}

impl Default for QueryConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "skiers.queries".to_string(),
            cache_ttl: Duration::from_secs(900),
        }
    }
}

/// Counters for one query consumer
#[derive(Debug, Default)]
pub struct QueryConsumerStats {
    served: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    dropped_malformed: AtomicU64,
    undeliverable: AtomicU64,
}

impl QueryConsumerStats {
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn dropped_malformed(&self) -> u64 {
        self.dropped_malformed.load(Ordering::Relaxed)
    }

    pub fn undeliverable(&self) -> u64 {
        self.undeliverable.load(Ordering::Relaxed)
    }
}

/// One read-path worker holding one pooled broker channel for its lifetime
pub struct QueryConsumer {
    channel: PooledChannel,
    store: Arc<dyn RideStore>,
    cache: Arc<dyn QueryCache>,
    config: QueryConsumerConfig,
    stats: Arc<QueryConsumerStats>,
}

impl QueryConsumer {
    pub fn new(
        channel: PooledChannel,
        store: Arc<dyn RideStore>,
        cache: Arc<dyn QueryCache>,
        config: QueryConsumerConfig,
    ) -> Self {
        Self {
            channel,
            store,
            cache,
            config,
            stats: Arc::new(QueryConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<QueryConsumerStats> {
        self.stats.clone()
    }

    /// Consume query requests until the stream ends
    pub async fn run(&self) -> Result<()> {
        loop {
            let Some(delivery) = self.channel.next_delivery(&self.config.queue).await? else {
                break;
            };

            let request = match serde_json::from_slice::<QueryRequest>(&delivery.payload) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "dropping malformed query request");
                    self.stats.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                    self.channel.ack(delivery.ack_tag).await?;
                    continue;
                }
            };

            let reply = self.serve(&request).await;
            self.stats.served.fetch_add(1, Ordering::Relaxed);

            // The waiter may already have timed out; processing still
            // completes and the reply is simply undelivered.
            match &delivery.envelope.reply_to {
                Some(reply_to) => {
                    let envelope = Envelope {
                        correlation_id: delivery.envelope.correlation_id.clone(),
                        reply_to: None,
                    };
                    let payload = serde_json::to_vec(&reply)?;
                    if let Err(err) = self.channel.publish(reply_to, &envelope, &payload).await {
                        error!(error = %err, %reply_to, "failed to publish reply");
                        self.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    warn!(kind = request.kind(), "query without reply destination");
                    self.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
                }
            }

            self.channel.ack(delivery.ack_tag).await?;
        }

        info!(
            served = self.stats.served(),
            cache_hits = self.stats.cache_hits(),
            "query consumer finished"
        );
        Ok(())
    }

    /// Cache-aside: cached serialized reply on hit, store query plus cache
    /// fill on miss
    async fn serve(&self, request: &QueryRequest) -> QueryReply {
        let key = request.cache_key();

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<QueryReply>(&cached) {
                Ok(reply) => {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return reply;
                }
                Err(err) => {
                    warn!(error = %err, %key, "discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "cache read failed, falling back to store");
            }
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let reply = self.compute(request).await;

        // Internal errors are not pinned into the cache.
        if reply.response_code() < 500 {
            match serde_json::to_string(&reply) {
                Ok(serialized) => {
                    if let Err(err) = self
                        .cache
                        .put_with_ttl(&key, &serialized, self.config.cache_ttl)
                        .await
                    {
                        warn!(error = %err, "cache write failed");
                    }
                }
                Err(err) => warn!(error = %err, "reply not cacheable"),
            }
        }
        reply
    }

    async fn compute(&self, request: &QueryRequest) -> QueryReply {
        match request {
            QueryRequest::DayVertical {
                skier_id,
                resort_id,
                season_id,
                day_id,
            } => {
                self.day_vertical(*skier_id, *resort_id, *season_id, *day_id)
                    .await
            }
            QueryRequest::ResortVertical {
                skier_id,
                resorts,
                seasons,
            } => self.resort_vertical(*skier_id, resorts, seasons).await,
            QueryRequest::UniqueSkiers {
                resort_id,
                season_id,
                day_id,
            } => self.unique_skiers(*resort_id, *season_id, *day_id).await,
        }
    }

    async fn day_vertical(
        &self,
        skier_id: u32,
        resort_id: u32,
        season_id: u16,
        day_id: u16,
    ) -> QueryReply {
        let records = match self
            .store
            .query_prefix(
                &partition_key(skier_id),
                &day_prefix(resort_id, season_id, day_id),
            )
            .await
        {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "day vertical store query failed");
                return QueryReply::internal_error("Error retrieving day vertical");
            }
        };

        if records.is_empty() {
            return QueryReply::DayVertical {
                response_code: 404,
                total_vertical: -1,
                message: Some("No data found".to_string()),
            };
        }

        QueryReply::DayVertical {
            response_code: 200,
            total_vertical: records.iter().map(|r| r.vertical).sum(),
            message: None,
        }
    }

    async fn resort_vertical(
        &self,
        skier_id: u32,
        resorts: &[u32],
        seasons: &[u16],
    ) -> QueryReply {
        // Only the first supplied resort is used.
        let Some(&resort_id) = resorts.first() else {
            return QueryReply::internal_error("No resort specified");
        };
        let pk = partition_key(skier_id);

        if seasons.is_empty() {
            // Whole-resort scan, grouped by the season segment of each key.
            let records = match self.store.query_prefix(&pk, &resort_prefix(resort_id)).await {
                Ok(records) => records,
                Err(err) => {
                    error!(error = %err, "resort vertical store query failed");
                    return QueryReply::internal_error("Error retrieving resort vertical");
                }
            };

            let mut by_season: BTreeMap<String, i64> = BTreeMap::new();
            for record in &records {
                match record.season() {
                    Some(season) => {
                        *by_season.entry(season.to_string()).or_insert(0) += record.vertical;
                    }
                    None => debug!(sort_key = %record.sort_key, "record without season segment"),
                }
            }

            return QueryReply::ResortVertical {
                response_code: 200,
                resorts: by_season
                    .into_iter()
                    .map(|(season_id, total_vert)| SeasonVertical {
                        season_id,
                        total_vert,
                    })
                    .collect(),
            };
        }

        let mut results = Vec::with_capacity(seasons.len());
        for &season in seasons {
            let records = match self
                .store
                .query_prefix(&pk, &season_prefix(resort_id, season))
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    error!(error = %err, season, "resort vertical store query failed");
                    return QueryReply::internal_error("Error retrieving resort vertical");
                }
            };
            results.push(SeasonVertical {
                season_id: season.to_string(),
                total_vert: records.iter().map(|r| r.vertical).sum(),
            });
        }

        QueryReply::ResortVertical {
            response_code: 200,
            resorts: results,
        }
    }

    async fn unique_skiers(&self, resort_id: u32, season_id: u16, day_id: u16) -> QueryReply {
        let records = match self
            .store
            .query_index(&index_key(resort_id, season_id, day_id))
            .await
        {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "unique skiers store query failed");
                return QueryReply::internal_error("Error retrieving number of unique skiers");
            }
        };

        let distinct: HashSet<&str> = records
            .iter()
            .map(|record| record.partition_key.as_str())
            .collect();

        QueryReply::UniqueSkiers {
            response_code: 200,
            resort: resort_id,
            num_skiers: distinct.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slopestream_broker::{ChannelPool, MemoryBroker};
    use slopestream_storage::{MemoryCache, MemoryRideStore};
    use slopestream_types::{LiftRideEvent, RideRecord};

    async fn seeded_store(events: &[(u32, u32, u16, u16, u16, u32)]) -> Arc<MemoryRideStore> {
        let store = Arc::new(MemoryRideStore::new());
        for &(skier, resort, season, day, time, lift) in events {
            let event = LiftRideEvent::new(skier, resort, season, day, time, lift).unwrap();
            store.put(&RideRecord::from_event(&event)).await.unwrap();
        }
        store
    }

    async fn consumer_over(
        broker: &MemoryBroker,
        store: Arc<MemoryRideStore>,
        cache: Arc<MemoryCache>,
    ) -> QueryConsumer {
        let pool = ChannelPool::new(vec![broker.channel()]);
        QueryConsumer::new(
            pool.acquire().await.unwrap(),
            store,
            cache,
            QueryConsumerConfig::default(),
        )
    }

    fn day_vertical_request() -> QueryRequest {
        QueryRequest::DayVertical {
            skier_id: 55,
            resort_id: 7,
            season_id: 2024,
            day_id: 3,
        }
    }

    #[tokio::test]
    async fn test_day_vertical_sums_rides() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[(55, 7, 2024, 3, 120, 9), (55, 7, 2024, 3, 200, 5)]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;

        let reply = consumer.serve(&day_vertical_request()).await;
        assert_eq!(
            reply,
            QueryReply::DayVertical {
                response_code: 200,
                total_vertical: 140,
                message: None,
            }
        );
    }

    #[tokio::test]
    async fn test_empty_day_vertical_is_a_cached_404() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[]).await;
        let cache = Arc::new(MemoryCache::new());
        let consumer = consumer_over(&broker, store.clone(), cache.clone()).await;

        let reply = consumer.serve(&day_vertical_request()).await;
        assert_eq!(reply.response_code(), 404);
        assert_eq!(store.query_count(), 1);

        // Second identical query inside the TTL: cache hit, store untouched.
        let repeat = consumer.serve(&day_vertical_request()).await;
        assert_eq!(repeat, reply);
        assert_eq!(store.query_count(), 1);
        assert_eq!(consumer.stats().cache_hits(), 1);
    }

    #[tokio::test]
    async fn test_cache_aside_queries_store_at_most_once() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[(55, 7, 2024, 3, 120, 9)]).await;
        let cache = Arc::new(MemoryCache::new());
        let consumer = consumer_over(&broker, store.clone(), cache).await;

        let first = consumer.serve(&day_vertical_request()).await;
        let second = consumer.serve(&day_vertical_request()).await;

        // Identical serialized result both times, one store query total.
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_resort_vertical_groups_by_season() {
        let broker = MemoryBroker::new();
        // Same skier and resort, verticals 50 and 30 on different days.
        let store = seeded_store(&[(55, 7, 2024, 3, 100, 5), (55, 7, 2024, 4, 110, 3)]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;

        let reply = consumer
            .serve(&QueryRequest::ResortVertical {
                skier_id: 55,
                resorts: vec![7],
                seasons: vec![],
            })
            .await;

        assert_eq!(
            reply,
            QueryReply::ResortVertical {
                response_code: 200,
                resorts: vec![SeasonVertical {
                    season_id: "2024".to_string(),
                    total_vert: 80,
                }],
            }
        );
    }

    #[tokio::test]
    async fn test_resort_vertical_splits_across_seasons() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[(55, 7, 2024, 3, 100, 5), (55, 7, 2025, 3, 110, 3)]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;

        let reply = consumer
            .serve(&QueryRequest::ResortVertical {
                skier_id: 55,
                resorts: vec![7],
                seasons: vec![],
            })
            .await;

        assert_eq!(
            reply,
            QueryReply::ResortVertical {
                response_code: 200,
                resorts: vec![
                    SeasonVertical {
                        season_id: "2024".to_string(),
                        total_vert: 50,
                    },
                    SeasonVertical {
                        season_id: "2025".to_string(),
                        total_vert: 30,
                    },
                ],
            }
        );
    }

    #[tokio::test]
    async fn test_resort_vertical_with_explicit_seasons() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[(55, 7, 2024, 3, 100, 5), (55, 7, 2025, 3, 110, 3)]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;

        let reply = consumer
            .serve(&QueryRequest::ResortVertical {
                skier_id: 55,
                resorts: vec![7],
                seasons: vec![2025, 2026],
            })
            .await;

        assert_eq!(
            reply,
            QueryReply::ResortVertical {
                response_code: 200,
                resorts: vec![
                    SeasonVertical {
                        season_id: "2025".to_string(),
                        total_vert: 30,
                    },
                    SeasonVertical {
                        season_id: "2026".to_string(),
                        total_vert: 0,
                    },
                ],
            }
        );
    }

    #[tokio::test]
    async fn test_resort_vertical_uses_only_the_first_resort() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[(55, 7, 2024, 3, 100, 5), (55, 8, 2024, 3, 110, 9)]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;

        let reply = consumer
            .serve(&QueryRequest::ResortVertical {
                skier_id: 55,
                resorts: vec![7, 8],
                seasons: vec![],
            })
            .await;

        // Resort 8's 90 vertical is not included.
        assert_eq!(
            reply,
            QueryReply::ResortVertical {
                response_code: 200,
                resorts: vec![SeasonVertical {
                    season_id: "2024".to_string(),
                    total_vert: 50,
                }],
            }
        );
    }

    #[tokio::test]
    async fn test_unique_skiers_counts_distinct_partitions() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[
            (55, 7, 2024, 3, 120, 9),
            (55, 7, 2024, 3, 200, 5),
            (56, 7, 2024, 3, 100, 4),
            (57, 7, 2024, 4, 100, 4),
        ])
        .await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;

        let reply = consumer
            .serve(&QueryRequest::UniqueSkiers {
                resort_id: 7,
                season_id: 2024,
                day_id: 3,
            })
            .await;

        assert_eq!(
            reply,
            QueryReply::UniqueSkiers {
                response_code: 200,
                resort: 7,
                num_skiers: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_run_replies_through_the_correlation_envelope() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[(55, 7, 2024, 3, 120, 9)]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;
        let handle = tokio::spawn(async move { consumer.run().await });

        let client = broker.channel();
        client
            .publish(
                "skiers.queries",
                &Envelope::with_correlation("q-1", "reply.here"),
                &serde_json::to_vec(&day_vertical_request()).unwrap(),
            )
            .await
            .unwrap();

        let reply = client.next_delivery("reply.here").await.unwrap().unwrap();
        assert_eq!(reply.envelope.correlation_id.as_deref(), Some("q-1"));
        let parsed: QueryReply = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(parsed.response_code(), 200);
        client.ack(reply.ack_tag).await.unwrap();

        broker.close();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_is_dropped() {
        let broker = MemoryBroker::new();
        let store = seeded_store(&[]).await;
        let consumer = consumer_over(&broker, store, Arc::new(MemoryCache::new())).await;
        let stats = consumer.stats();

        let client = broker.channel();
        client
            .publish("skiers.queries", &Envelope::default(), b"{\"type\":\"??\"}")
            .await
            .unwrap();
        broker.close();

        consumer.run().await.unwrap();
        assert_eq!(stats.dropped_malformed(), 1);
        assert_eq!(broker.unacked_count(), 0);
    }
}
