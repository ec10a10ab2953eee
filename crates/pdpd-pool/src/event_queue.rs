//! Bounded, age-limited queue of forwarded events.
//!
//! Holds forwards that arrive before the host knows who owns their buckets.
//! When full, the oldest entry is evicted. Entries older than the age limit are
//! skipped by [`EventQueue::poll`] and [`EventQueue::is_empty`].

use pdpd_core::types::now_millis;
use std::collections::VecDeque;
use std::time::Duration;

use crate::message::Forward;

#[derive(Debug)]
pub struct EventQueue {
    max_size: usize,
    max_age: Duration,
    entries: VecDeque<Forward>,
}

impl EventQueue {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            max_age,
            entries: VecDeque::new(),
        }
    }

    /// Appends an event, evicting the oldest when full. Returns the evicted
    /// entry, if any.
    pub fn add(&mut self, event: Forward) -> Option<Forward> {
        let evicted = if self.entries.len() >= self.max_size {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(event);
        evicted
    }

    /// Removes and returns the oldest unexpired event.
    pub fn poll(&mut self) -> Option<Forward> {
        let min_create_time = self.min_create_time();
        while let Some(event) = self.entries.pop_front() {
            if !event.is_expired(min_create_time) {
                return Some(event);
            }
        }
        None
    }

    /// Discards expired entries and reports whether any remain.
    pub fn is_empty(&mut self) -> bool {
        let min_create_time = self.min_create_time();
        while self
            .entries
            .front()
            .is_some_and(|event| event.is_expired(min_create_time))
        {
            self.entries.pop_front();
        }
        self.entries.is_empty()
    }

    /// Number of entries, expired ones included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes every unexpired entry, oldest first.
    pub fn drain(&mut self) -> Vec<Forward> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(event) = self.poll() {
            out.push(event);
        }
        out
    }

    fn min_create_time(&self) -> i64 {
        let age = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        now_millis().saturating_sub(age)
    }
}
