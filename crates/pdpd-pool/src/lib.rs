//! pdpd Pooling
//!
//! Spreads the events of one logical controller over every live host running
//! it. Request ids hash into buckets, each bucket is owned by one host, and an
//! event that lands on the wrong host is forwarded to the owner over a shared
//! pooling topic.
//!
//! # Architecture
//!
//! ```text
//!                ┌─────────────────────────────────┐
//!                │   PoolingFeature (feature.rs)   │
//!                │  - controller hooks             │
//!                │  - one manager per controller   │
//!                └──────────────┬──────────────────┘
//!                               │
//!                ┌──────────────▼──────────────────┐
//!                │   PoolingManager (manager.rs)   │
//!                │  - Idle/Start/Query/Active/     │
//!                │    Inactive state machine       │
//!                │  - event routing                │
//!                │  - ring heartbeats              │
//!                └──┬───────────┬───────────┬──────┘
//!                   │           │           │
//!      ┌────────────▼───┐ ┌─────▼──────┐ ┌──▼──────────────┐
//!      │ Assignments    │ │ EventQueue │ │ DmaapManager    │
//!      │(assignments.rs)│ │(event_     │ │ (dmaap.rs)      │
//!      │ - hashing      │ │  queue.rs) │ │ - topic source  │
//!      │ - rebalance    │ │ - bounded  │ │ - topic sink    │
//!      │ - leader       │ │ - aged     │ │ - bounded stop  │
//!      └────────────────┘ └────────────┘ └────────┬────────┘
//!                                                 │
//!                                     ┌───────────▼─────────┐
//!                                     │ Messages (message.rs)│
//!                                     │ Heartbeat, Offline,  │
//!                                     │ Query, Identification│
//!                                     │ Leader, Forward      │
//!                                     └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! A starting host heartbeats itself to confirm the topic works, then queries
//! the pool. Every host answers with its current assignments. When the round
//! ends, the smallest live host rebalances the buckets and broadcasts them.
//! Active hosts heartbeat their ring predecessor; a silent successor starts a
//! new round. A stopping host announces itself offline so the others can take
//! over its buckets.
//!
//! # Example
//!
//! ```rust,no_run
//! use pdpd_controller::{FeatureRegistry, PolicyControllerFactory};
//! use pdpd_core::properties::Properties;
//! use pdpd_core::topic::{MemoryBroker, MemoryTopicEndpoints, TopicEndpointProvider};
//! use pdpd_pool::PoolingFeature;
//! use std::sync::Arc;
//!
//! let endpoints: Arc<dyn TopicEndpointProvider> =
//!     Arc::new(MemoryTopicEndpoints::new(MemoryBroker::new()));
//! let pooling = Properties::new()
//!     .with("pooling.enabled", "true")
//!     .with("pooling.topic", "POOLING");
//!
//! let features = FeatureRegistry::new();
//! features.register(Arc::new(PoolingFeature::new("host-1", pooling, Arc::clone(&endpoints))));
//! let factory = PolicyControllerFactory::new(endpoints, features);
//! let controller = factory.build("usecases", Properties::new()).unwrap();
//! controller.start().unwrap();
//! ```

pub mod assignments;
pub mod config;
pub mod dmaap;
pub mod error;
pub mod event_queue;
pub mod feature;
pub mod manager;
pub mod message;
pub mod metrics;

pub use assignments::{bucket_of, BucketAssignments};
pub use config::PoolingProperties;
pub use dmaap::DmaapManager;
pub use error::{PoolingError, PoolingResult};
pub use event_queue::EventQueue;
pub use feature::PoolingFeature;
pub use manager::{PoolState, PoolingManager};
pub use message::{Forward, Message, Serializer};
pub use metrics::PoolingStats;
