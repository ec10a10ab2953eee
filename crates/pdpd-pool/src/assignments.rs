//! Bucket assignments.
//!
//! Request ids hash to a fixed number of buckets and each bucket is owned by at
//! most one host. An assignment is immutable once published: the leader builds
//! a new one and every host swaps it in whole.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PoolingError, PoolingResult};

/// Number of buckets in a freshly built assignment.
pub const DEFAULT_BUCKETS: usize = 1024;

/// Largest assignment accepted from a peer.
pub const MAX_BUCKETS: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAssignments {
    host_array: Vec<Option<String>>,
}

impl BucketAssignments {
    pub fn new(host_array: Vec<Option<String>>) -> Self {
        Self { host_array }
    }

    pub fn host_array(&self) -> &[Option<String>] {
        &self.host_array
    }

    pub fn len(&self) -> usize {
        self.host_array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host_array.is_empty()
    }

    /// Every host owning at least one bucket, in order.
    pub fn all_hosts(&self) -> BTreeSet<String> {
        self.host_array.iter().flatten().cloned().collect()
    }

    /// The smallest assigned host.
    pub fn leader(&self) -> Option<&str> {
        self.host_array.iter().flatten().map(String::as_str).min()
    }

    pub fn is_leader(&self, host: &str) -> bool {
        self.leader() == Some(host)
    }

    pub fn has_assignment(&self, host: &str) -> bool {
        self.host_array.iter().flatten().any(|h| h == host)
    }

    /// Number of buckets owned by `host`.
    pub fn bucket_count(&self, host: &str) -> usize {
        self.host_array.iter().flatten().filter(|h| *h == host).count()
    }

    /// Bucket index of a request id, or `None` for an empty assignment.
    pub fn bucket(&self, request_id: &str) -> Option<usize> {
        bucket_of(request_id, self.len())
    }

    /// Owner of the bucket `request_id` hashes to. `None` when the bucket is
    /// unassigned or the assignment is empty.
    pub fn assigned_host(&self, request_id: &str) -> Option<&str> {
        self.bucket(request_id)
            .and_then(|b| self.host_array[b].as_deref())
    }

    /// Structural checks applied to assignments received from peers.
    pub fn check_valid(&self) -> PoolingResult<()> {
        if self.host_array.is_empty() {
            return Err(PoolingError::protocol("bucket assignments are empty"));
        }
        if self.host_array.len() > MAX_BUCKETS {
            return Err(PoolingError::protocol(format!(
                "too many buckets: {}",
                self.host_array.len()
            )));
        }
        if self.host_array.iter().flatten().any(|h| h.trim().is_empty()) {
            return Err(PoolingError::protocol("blank host in bucket assignments"));
        }
        Ok(())
    }

    /// Copy with every bucket of `host` unassigned.
    pub fn without_host(&self, host: &str) -> BucketAssignments {
        BucketAssignments::new(
            self.host_array
                .iter()
                .map(|slot| slot.clone().filter(|h| h != host))
                .collect(),
        )
    }

    /// Spreads the buckets over `hosts`.
    ///
    /// Buckets already owned by one of `hosts` stay put unless their owner holds
    /// more than its share; buckets of any other host are freed. Each host ends
    /// up with `len / hosts` buckets, or one more, with the fewest moves. An
    /// empty assignment is first sized to `default_buckets`.
    pub fn rebalance(&self, hosts: &BTreeSet<String>, default_buckets: usize) -> BucketAssignments {
        let size = if self.is_empty() {
            default_buckets.max(1)
        } else {
            self.len()
        };
        let mut slots: Vec<Option<String>> = if self.is_empty() {
            vec![None; size]
        } else {
            self.host_array.clone()
        };

        if hosts.is_empty() {
            return BucketAssignments::new(vec![None; size]);
        }

        let mut owned: BTreeMap<&str, Vec<usize>> =
            hosts.iter().map(|h| (h.as_str(), Vec::new())).collect();
        let mut free: Vec<usize> = Vec::new();
        for (bucket, slot) in slots.iter().enumerate() {
            match slot.as_deref().and_then(|h| owned.get_mut(h)) {
                Some(buckets) => buckets.push(bucket),
                None => free.push(bucket),
            }
        }

        // hosts that already hold the most buckets get the larger shares
        let mut order: Vec<&str> = owned.keys().copied().collect();
        order.sort_by(|a, b| owned[b].len().cmp(&owned[a].len()).then_with(|| a.cmp(b)));

        let base = size / hosts.len();
        let extra = size % hosts.len();
        let targets: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(rank, host)| (*host, if rank < extra { base + 1 } else { base }))
            .collect();

        for (host, buckets) in owned.iter_mut() {
            let target = targets[host];
            while buckets.len() > target {
                if let Some(bucket) = buckets.pop() {
                    free.push(bucket);
                }
            }
        }

        free.sort_unstable();
        let mut free = free.into_iter();
        for host in &order {
            let missing = targets[host].saturating_sub(owned[host].len());
            for bucket in free.by_ref().take(missing) {
                slots[bucket] = Some(host.to_string());
            }
        }
        for bucket in free {
            slots[bucket] = None;
        }

        BucketAssignments::new(slots)
    }
}

/// 32-bit string hash over UTF-16 code units (`h = 31 * h + c`), the hash
/// peers use to agree on bucket indexes.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
}

/// Bucket index of `request_id` among `buckets` buckets.
pub fn bucket_of(request_id: &str, buckets: usize) -> Option<usize> {
    if buckets == 0 {
        return None;
    }
    let hash = (string_hash(request_id) & i32::MAX) as usize;
    Some(hash % buckets)
}
