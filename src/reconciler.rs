//! Grid reconciliation
//!
//! Keeps the tile cache in step with what is visible. Every pass computes the
//! required coordinate range, creates records for coordinates not yet cached
//! and submits their fetches. An identity change flushes everything first.
//!
//! The reconciler is owned by one control thread. Fetches run elsewhere and
//! come back as [`Completion`]s, which are applied here only if the record
//! that issued them is still the one in the cache.

use crate::cache::{TileCache, TileRecord};
use crate::config::{EvictionPolicy, ViewerConfig};
use crate::identity::{Identity, IdentityTracker};
use crate::queue::{Completion, FetchOutcome, QueueStats, RequestQueue};
use crate::sink::TileSink;
use crate::transport::{TileRequest, TileTransport};
use crate::viewport::{compute_viewport, required_range, tile_bounds, ContainerGeometry, CoordRange};

/// What one reconciliation pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// The pass did not run (identity incomplete or no geometry yet)
    pub skipped: bool,
    /// Records dropped because the identity changed
    pub flushed: usize,
    /// Coordinates in the required range
    pub required: usize,
    /// New records created and requested
    pub requested: usize,
    /// Records dropped by the eviction policy
    pub evicted: usize,
}

pub struct GridReconciler<T: TileTransport, S: TileSink> {
    config: ViewerConfig,
    identity: IdentityTracker,
    cache: TileCache,
    queue: RequestQueue<T>,
    sink: S,
    geometry: Option<ContainerGeometry>,
    range: Option<CoordRange>,
}

impl<T: TileTransport, S: TileSink> GridReconciler<T, S> {
    pub fn new(config: ViewerConfig, transport: T, sink: S, runtime: tokio::runtime::Handle) -> Self {
        let queue = RequestQueue::new(transport, config.max_concurrent, runtime);
        Self {
            config,
            identity: IdentityTracker::new(),
            cache: TileCache::new(),
            queue,
            sink,
            geometry: None,
            range: None,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        self.identity.current()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn geometry(&self) -> Option<ContainerGeometry> {
        self.geometry
    }

    /// Required range of the last pass that ran
    pub fn range(&self) -> Option<CoordRange> {
        self.range
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// No record is waiting on a fetch
    pub fn is_idle(&self) -> bool {
        self.cache.iter().all(|record| record.pending.is_none())
    }

    pub fn set_seed(&mut self, seed: Option<i64>) -> PassReport {
        let mut next = self.identity.current().clone();
        next.seed = seed;
        self.observe_identity(next)
    }

    pub fn set_world_type(&mut self, world_type: Option<&str>) -> PassReport {
        let current = self.identity.current();
        let next = Identity::new(current.seed, world_type, current.version.as_deref());
        self.observe_identity(next)
    }

    pub fn set_version(&mut self, version: Option<&str>) -> PassReport {
        let current = self.identity.current();
        let next = Identity::new(current.seed, current.world_type.as_deref(), version);
        self.observe_identity(next)
    }

    pub fn set_identity(&mut self, seed: Option<i64>, world_type: Option<&str>, version: Option<&str>) -> PassReport {
        self.observe_identity(Identity::new(seed, world_type, version))
    }

    fn observe_identity(&mut self, next: Identity) -> PassReport {
        if !self.identity.observe(next) {
            return PassReport { skipped: true, ..Default::default() };
        }

        log::info!("New map generating with {}", self.identity.current());
        let flushed = self.flush();
        let mut report = self.reconcile();
        report.flushed = flushed;
        report
    }

    /// Entry point for container resizes and pans
    pub fn on_viewport_or_identity_change(&mut self, geometry: ContainerGeometry) -> PassReport {
        let resized = self
            .geometry
            .map_or(false, |g| g.width_px != geometry.width_px || g.height_px != geometry.height_px);
        self.geometry = Some(geometry);

        if resized {
            self.reposition_all();
        }
        self.reconcile()
    }

    /// Drop every record, cancelling its request and detaching its element
    fn flush(&mut self) -> usize {
        let flushed = self.cache.flush_all();
        let count = flushed.len();
        for record in flushed {
            self.discard(record);
        }
        count
    }

    fn discard(&mut self, record: TileRecord) {
        if let Some(request) = &record.pending {
            request.cancel();
        }
        self.sink.remove(record.ui);
    }

    fn reconcile(&mut self) -> PassReport {
        let identity = self.identity.current();
        let (Some(seed), Some(world_type), Some(version)) =
            (identity.seed, identity.world_type.clone(), identity.version.clone())
        else {
            return PassReport { skipped: true, ..Default::default() };
        };
        let Some(geometry) = self.geometry else {
            return PassReport { skipped: true, ..Default::default() };
        };

        let viewport = compute_viewport(geometry.width_px, geometry.height_px, geometry.pan, self.config.scale);
        let range = required_range(&viewport, self.config.tile_size);
        let tile_px = self.config.tile_px();
        let (half_w, half_h) = (geometry.width_px / 2.0, geometry.height_px / 2.0);

        let mut report = PassReport {
            required: range.len(),
            ..Default::default()
        };

        for coord in range.iter() {
            if self.cache.contains(coord) {
                continue;
            }

            let bounds = tile_bounds(coord, tile_px);
            let record = self.cache.ensure(coord, bounds, &mut self.sink);
            self.sink.set_offset(record.ui, bounds.left + half_w, bounds.top + half_h);

            let handle = self.queue.submit(TileRequest {
                coord,
                seed,
                world_type: world_type.clone(),
                version: version.clone(),
            });
            record.pending = Some(handle);
            report.requested += 1;
        }

        self.range = Some(range);
        report.evicted = self.evict(&range);

        if report.requested > 0 {
            log::debug!(
                "Requested {} of {} tiles in x [{}, {}) z [{}, {})",
                report.requested, report.required, range.x_min, range.x_max, range.z_min, range.z_max,
            );
        }
        report
    }

    fn evict(&mut self, range: &CoordRange) -> usize {
        let EvictionPolicy::ViewportMargin(margin) = self.config.eviction else {
            return 0;
        };

        let evicted = self
            .cache
            .remove_where(|record| range.distance_outside(record.coord) > margin as i64);
        let count = evicted.len();
        for record in evicted {
            self.discard(record);
        }
        count
    }

    /// Element offsets depend on the container size
    fn reposition_all(&mut self) {
        let Some(geometry) = self.geometry else {
            return;
        };
        let (half_w, half_h) = (geometry.width_px / 2.0, geometry.height_px / 2.0);
        for record in self.cache.iter() {
            self.sink
                .set_offset(record.ui, record.bounds.left + half_w, record.bounds.top + half_h);
        }
    }

    /// Cancel every outstanding request without touching the cache.
    ///
    /// Stopped tiles stay cached without an image and are not requested again.
    /// Fetches that already finished are applied, not stopped.
    pub fn stop_all(&mut self) -> usize {
        self.drain_completions();

        let mut stopped = 0;
        for record in self.cache.iter_mut() {
            // A request that finished after the drain keeps its ticket so its
            // result still lands
            if record.pending.as_ref().is_some_and(|request| request.cancel()) {
                record.pending = None;
                stopped += 1;
            }
        }
        if stopped > 0 {
            log::info!("Stopped {} tile requests", stopped);
        }
        stopped
    }

    /// Apply a finished fetch. Returns false when the completion is stale,
    /// i.e. its record was flushed, evicted or stopped in the meantime.
    pub fn apply_completion(&mut self, completion: Completion) -> bool {
        let Completion { ticket, coord, outcome } = completion;

        let Some(record) = self.cache.get_mut(coord) else {
            return false;
        };
        if record.pending.as_ref().map(|p| p.ticket()) != Some(ticket) {
            log::debug!("Ignoring stale completion for tile ({}, {})", coord.x, coord.z);
            return false;
        }
        record.pending = None;

        match outcome {
            FetchOutcome::Loaded(tile) => {
                record.fetched = true;
                self.sink.clear(record.ui);
                if let Some(image) = tile.image {
                    self.sink.show_image(record.ui, &image);
                    record.image = Some(image);
                }
                if !tile.values.is_empty() {
                    self.sink.show_biomes(record.ui, &tile.values);
                }
            }
            FetchOutcome::Failed(e) => {
                log::warn!("Tile ({}, {}) failed: {}", coord.x, coord.z, e);
                record.error = Some(e);
            }
            FetchOutcome::Cancelled => {}
        }
        true
    }

    /// Apply every completion that is already waiting
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.queue.try_next_completion() {
            if self.apply_completion(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for one completion and apply it
    pub async fn next_completion(&mut self) -> Option<bool> {
        let completion = self.queue.next_completion().await?;
        Some(self.apply_completion(completion))
    }

    /// Wait until no record is waiting on a fetch
    pub async fn run_until_idle(&mut self) {
        while !self.is_idle() {
            if self.next_completion().await.is_none() {
                break;
            }
        }
    }
}
