//! Chunk map viewer library
//!
//! Streams square map tiles from a map server into an infinite, pannable
//! grid. Re-exports modules for use by the binary and front ends.

pub mod cache;
pub mod config;
pub mod explorer;
pub mod identity;
pub mod queue;
pub mod reconciler;
pub mod seed;
pub mod sink;
pub mod transport;
pub mod viewport;

pub use cache::{RecordId, TileCache, TileRecord, TileState};
pub use config::{ConfigError, EvictionPolicy, ViewerConfig};
pub use identity::{Identity, IdentityTracker};
pub use queue::{Completion, FetchOutcome, QueueStats, RequestHandle, RequestQueue, Ticket};
pub use reconciler::{GridReconciler, PassReport};
pub use sink::{MemorySink, TileSink, UiHandle};
pub use transport::{FetchError, HttpTransport, Tile, TileImage, TileRequest, TileTransport};
pub use viewport::{compute_viewport, required_range, ContainerGeometry, Coord, CoordRange, PanCenter, Viewport};
