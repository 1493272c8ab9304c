/*! Cross-plane cluster matching.

Clusters arrive per plane in time order. The matcher pairs the oldest
clusters across planes when their weighted time centers lie within the
matching window; a cluster with no candidate in the window is emitted
alone, which the event stage records as a no-coincidence event. Without a
flush, clusters younger than the safety margin stay queued so they can
still pair with future arrivals — this is the only place cross-plane
ordering is enforced.
*/
use std::collections::VecDeque;

use crate::cluster::{Cluster, PLANE_X, PLANE_Y};

/// Cross-plane matched event. One side may be empty (no coincidence).
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Cluster on the x (strip) plane.
    pub cluster_a: Cluster,
    /// Cluster on the y (wire) plane.
    pub cluster_b: Cluster,
}

impl Event {
    /// Event from a single cluster, placed by its plane tag.
    #[must_use]
    pub fn from_cluster(cluster: Cluster) -> Self {
        let mut e = Self::default();
        e.merge(cluster);
        e
    }

    /// Place `cluster` on its plane's side.
    pub fn merge(&mut self, cluster: Cluster) {
        match cluster.plane() {
            PLANE_X => self.cluster_a = cluster,
            _ => self.cluster_b = cluster,
        }
    }

    /// True when neither side holds hits.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.cluster_a.empty() && self.cluster_b.empty()
    }

    /// True when both planes contributed.
    #[must_use]
    pub fn both_planes(&self) -> bool {
        !self.cluster_a.empty() && !self.cluster_b.empty()
    }

    /// Earliest hit time over both sides.
    #[must_use]
    pub fn time_start(&self) -> u64 {
        match (self.cluster_a.empty(), self.cluster_b.empty()) {
            (false, false) => self.cluster_a.time_start().min(self.cluster_b.time_start()),
            (false, true) => self.cluster_a.time_start(),
            (true, false) => self.cluster_b.time_start(),
            (true, true) => 0,
        }
    }
}

/// Matches per-plane cluster streams by weighted center time.
pub struct CenterMatcher {
    max_delta_time: u64,
    safety_margin: u64,
    latest: [u64; 2],
    unmatched: [VecDeque<Cluster>; 2],
    /// Matched (and lone) events, drained by the caller.
    pub matched_events: Vec<Event>,
    /// Events emitted over the matcher's lifetime.
    pub stats_event_count: usize,
}

impl CenterMatcher {
    /// Matcher with a center window of `max_delta_time` ns and a
    /// `safety_margin` ns guard against matching too-recent clusters.
    #[must_use]
    pub fn new(max_delta_time: u64, safety_margin: u64) -> Self {
        Self {
            max_delta_time,
            safety_margin,
            latest: [0; 2],
            unmatched: [VecDeque::new(), VecDeque::new()],
            matched_events: Vec::new(),
            stats_event_count: 0,
        }
    }

    /// Queue closed clusters for `plane` (0 or 1), in time order.
    pub fn insert(&mut self, plane: u8, clusters: impl IntoIterator<Item = Cluster>) {
        let plane = usize::from(plane) & 1;
        for cluster in clusters {
            self.latest[plane] = self.latest[plane].max(cluster.time_end());
            self.unmatched[plane].push_back(cluster);
        }
    }

    /// Number of queued clusters across both planes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.unmatched[0].len() + self.unmatched[1].len()
    }

    /// Run one matching pass. With `flush` everything queued is resolved;
    /// otherwise clusters newer than the safety margin stay queued.
    pub fn match_clusters(&mut self, flush: bool) {
        loop {
            let older = match self.older_plane() {
                Some(p) => p,
                None => return,
            };
            if !flush && !self.ready(older) {
                return;
            }
            let head = self.unmatched[older].pop_front().unwrap();
            let other = older ^ 1;
            let paired = match self.unmatched[other].front() {
                Some(candidate) => {
                    let delta = (head.time_center() - candidate.time_center()).abs();
                    delta <= self.max_delta_time as f64
                }
                None => false,
            };
            let mut event = Event::from_cluster(head);
            if paired {
                event.merge(self.unmatched[other].pop_front().unwrap());
            }
            self.stats_event_count += 1;
            self.matched_events.push(event);
        }
    }

    // Plane whose head cluster is older, by start time.
    fn older_plane(&self) -> Option<usize> {
        match (self.unmatched[0].front(), self.unmatched[1].front()) {
            (None, None) => None,
            (Some(_), None) => Some(0),
            (None, Some(_)) => Some(1),
            (Some(a), Some(b)) => {
                if a.time_start() <= b.time_start() {
                    Some(0)
                } else {
                    Some(1)
                }
            }
        }
    }

    // A head is ready when both planes have seen data past its end plus
    // the safety margin.
    fn ready(&self, plane: usize) -> bool {
        let head = match self.unmatched[plane].front() {
            Some(c) => c,
            None => return false,
        };
        let seen = self.latest[0].min(self.latest[1]);
        head.time_end() + self.safety_margin < seen
    }
}
