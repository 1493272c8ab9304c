/*! Per-hybrid 2D event builder.

Buffers hits per plane, time-sorts them, runs the single-plane gap
clusterers and hands the closed clusters to the cross-plane matcher. One
builder exists per hybrid; cross-hybrid ordering is not preserved past this
point.
*/
use itertools::Itertools;

use crate::cluster::{GapClusterer, Hit, PLANE_X, PLANE_Y};
use crate::matcher::CenterMatcher;

/// Two gap clusterers and a matcher for one hybrid.
pub struct EventBuilder {
    hits: [Vec<Hit>; 2],
    clusterers: [GapClusterer; 2],
    /// The matcher; matched events are drained from
    /// [`CenterMatcher::matched_events`].
    pub matcher: CenterMatcher,
}

impl EventBuilder {
    /// Builder with the given clustering and matching windows.
    #[must_use]
    pub fn new(
        max_time_gap: u64,
        max_coord_gap: u16,
        max_matching_time_gap: u64,
        time_box_ns: u64,
    ) -> Self {
        Self {
            hits: [Vec::new(), Vec::new()],
            clusterers: [
                GapClusterer::new(max_time_gap, max_coord_gap, PLANE_X),
                GapClusterer::new(max_time_gap, max_coord_gap, PLANE_Y),
            ],
            matcher: CenterMatcher::new(max_matching_time_gap, time_box_ns),
        }
    }

    /// Buffer one hit on its plane.
    pub fn insert(&mut self, hit: Hit) {
        self.hits[usize::from(hit.plane) & 1].push(hit);
    }

    /// Buffered hits not yet clustered.
    #[must_use]
    pub fn pending_hits(&self) -> usize {
        self.hits[0].len() + self.hits[1].len()
    }

    /// Cluster and match everything buffered so far.
    ///
    /// Without `force` each plane's open cluster stays open (it may
    /// continue in the next batch) and the matcher only resolves clusters
    /// older than the safety margin. With `force` the open clusters are
    /// closed and every queued cluster is resolved; that is the
    /// end-of-stream path.
    pub fn flush(&mut self, force: bool) {
        for plane in [PLANE_X, PLANE_Y] {
            let p = usize::from(plane);
            let hits = std::mem::take(&mut self.hits[p]);
            let sorted = hits.into_iter().sorted_by_key(|h| h.time).collect::<Vec<_>>();
            self.clusterers[p].cluster(&sorted);
            if force {
                self.clusterers[p].flush();
            }
            let clusters = std::mem::take(&mut self.clusterers[p].clusters);
            self.matcher.insert(plane, clusters);
        }
        self.matcher.match_clusters(force);
    }
}
