//! Tile entities and their loading state machine.
//!
//! A [`Tile`] is the smallest addressable unit of cached track data: one
//! level-of-detail step and one offset within that level. Tiles are cheap and
//! identity-stable: the pyramid hands out the same `Arc<Tile>` for the same
//! `(level, lod_x)` for its whole lifetime, so observer subscriptions stay
//! valid across queries.
//!
//! # State machine
//!
//! ```text
//!           begin load            fetch resolved
//!  Empty ───────────────► Loading ───────────────► Complete(payload)
//!    ▲                       │
//!    └───────────────────────┘
//!        fetch failed (retried only on next explicit access)
//! ```
//!
//! Transitions are monotonic apart from the failure edge, and the payload is
//! structurally inaccessible unless the tile is `Complete`.
//!
//! # Observers
//!
//! Consumers subscribe a [`TileObserver`] to learn when a tile completes or
//! fails. Subscriptions are explicit: [`Tile::add_observer`] returns an
//! [`ObserverId`] that must be passed to [`Tile::remove_observer`]. There is
//! no event bus; a tile notifies exactly its own subscribers.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

/// Immutable addressing data for one tile.
///
/// `x` and `span` are absolute coordinates; `lod_x` and `tile_width` are in
/// LOD space, where one unit covers `2^level` absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDescriptor {
    /// Level-of-detail step. Higher is coarser.
    pub level: u32,
    /// Offset of the tile in LOD-space units.
    pub lod_x: u64,
    /// Tile width in LOD-space units.
    pub tile_width: u32,
    /// Absolute coordinate of the tile's left edge (`lod_x << level`).
    pub x: u64,
    /// Absolute width covered (`tile_width << level`).
    pub span: u64,
}

impl TileDescriptor {
    pub(crate) fn new(level: u32, lod_x: u64, tile_width: u32) -> Self {
        Self {
            level,
            lod_x,
            tile_width,
            x: lod_x << level,
            span: (tile_width as u64) << level,
        }
    }
}

/// Coarse view of a tile's loading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePhase {
    /// No fetch requested, or the last fetch failed.
    Empty,
    /// A fetch has started and not yet settled.
    Loading,
    /// Payload is present and readable.
    Complete,
}

enum TileState<P> {
    Empty,
    Loading,
    Complete(P),
}

/// Subscription handle returned by [`Tile::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Callbacks fired when a tile's fetch settles.
///
/// Observers are invoked synchronously from whichever task settles the fetch,
/// so implementations should stay short, typically flagging a re-render.
pub trait TileObserver<P>: Send + Sync {
    /// The tile transitioned to `Complete`.
    fn on_complete(&self, tile: &Arc<Tile<P>>, payload: &P);

    /// The fetch failed; the tile is `Empty` again and will retry on the next
    /// explicit access.
    fn on_load_failed(&self, tile: &Arc<Tile<P>>, reason: &str);
}

/// Shared last-used timestamp for a block of tiles.
///
/// Written by [`Tile::mark_last_used`], never read by the cache itself: the
/// value exists for an external usage-tracking collaborator that implements
/// eviction above this layer.
#[derive(Debug, Default)]
pub struct UsageStamp {
    millis: AtomicI64,
}

impl UsageStamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the current wall-clock time.
    pub fn touch(&self) {
        self.millis
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since the Unix epoch of the last touch, or `None` if the
    /// block has never been used.
    pub fn last_used_millis(&self) -> Option<i64> {
        match self.millis.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }
}

/// One cached unit of track data.
///
/// See the [module docs](self) for the state machine and observer contract.
pub struct Tile<P> {
    descriptor: TileDescriptor,
    /// Row of this tile within its owning block.
    block_row_index: u32,
    key: String,
    state: Mutex<TileState<P>>,
    observers: Mutex<Vec<(ObserverId, Arc<dyn TileObserver<P>>)>>,
    next_observer_id: AtomicU64,
    usage: Arc<UsageStamp>,
    /// Back-reference handed to observers; tiles only ever live in an `Arc`.
    self_ref: Weak<Tile<P>>,
}

impl<P> Tile<P> {
    pub(crate) fn new(
        level: u32,
        lod_x: u64,
        tile_width: u32,
        block_row_index: u32,
        usage: Arc<UsageStamp>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            descriptor: TileDescriptor::new(level, lod_x, tile_width),
            block_row_index,
            key: format!("{}:{}", level, lod_x),
            state: Mutex::new(TileState::Empty),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(0),
            usage,
            self_ref: self_ref.clone(),
        })
    }

    /// Addressing data for this tile.
    pub fn descriptor(&self) -> TileDescriptor {
        self.descriptor
    }

    /// Level-of-detail step.
    pub fn level(&self) -> u32 {
        self.descriptor.level
    }

    /// Offset in LOD-space units.
    pub fn lod_x(&self) -> u64 {
        self.descriptor.lod_x
    }

    /// Absolute coordinate of the left edge.
    pub fn x(&self) -> u64 {
        self.descriptor.x
    }

    /// Absolute width covered.
    pub fn span(&self) -> u64 {
        self.descriptor.span
    }

    /// Row of this tile within its owning block.
    pub fn block_row_index(&self) -> u32 {
        self.block_row_index
    }

    /// Stable key, `"{level}:{lod_x}"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current loading phase.
    pub fn phase(&self) -> TilePhase {
        match *self.state.lock() {
            TileState::Empty => TilePhase::Empty,
            TileState::Loading => TilePhase::Loading,
            TileState::Complete(_) => TilePhase::Complete,
        }
    }

    /// Stamps the owning block's last-used timestamp.
    pub fn mark_last_used(&self) {
        self.usage.touch();
    }

    /// Subscribes an observer; keep the returned id to unsubscribe.
    pub fn add_observer(&self, observer: Arc<dyn TileObserver<P>>) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    /// Removes a previously added observer. Unknown ids are ignored.
    pub fn remove_observer(&self, id: ObserverId) {
        self.observers.lock().retain(|(oid, _)| *oid != id);
    }

    fn observer_snapshot(&self) -> Vec<Arc<dyn TileObserver<P>>> {
        self.observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect()
    }

    /// Marks the tile as loading.
    ///
    /// Returns `false` without side effects when the tile is not `Empty`,
    /// which makes a stale queued fetch a no-op.
    pub(crate) fn set_loading(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TileState::Empty => {
                *state = TileState::Loading;
                true
            }
            TileState::Loading | TileState::Complete(_) => false,
        }
    }
}

impl<P: Clone> Tile<P> {
    /// The payload, readable only once the tile is `Complete`.
    pub fn payload(&self) -> Option<P> {
        match &*self.state.lock() {
            TileState::Complete(payload) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Completes the fetch and notifies observers.
    ///
    /// Only valid from `Loading`; a settlement racing a state the tile has
    /// already left is dropped with a warning rather than corrupting it.
    pub(crate) fn complete_with(&self, payload: P) {
        {
            let mut state = self.state.lock();
            match *state {
                TileState::Loading => *state = TileState::Complete(payload.clone()),
                _ => {
                    warn!(tile = %self.key, "Dropping completion for a tile that is not loading");
                    return;
                }
            }
        }
        if let Some(this) = self.self_ref.upgrade() {
            for observer in self.observer_snapshot() {
                observer.on_complete(&this, &payload);
            }
        }
    }

    /// Resets the tile to `Empty` and notifies observers of the failure.
    ///
    /// The failure is not fatal: the tile simply returns to its unrequested
    /// state, and the next explicit access starts a fresh fetch.
    pub(crate) fn fail_with(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            match *state {
                TileState::Loading => *state = TileState::Empty,
                _ => {
                    warn!(tile = %self.key, "Dropping failure for a tile that is not loading");
                    return;
                }
            }
        }
        if let Some(this) = self.self_ref.upgrade() {
            for observer in self.observer_snapshot() {
                observer.on_load_failed(&this, reason);
            }
        }
    }
}

impl<P> std::fmt::Debug for Tile<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("key", &self.key)
            .field("x", &self.descriptor.x)
            .field("span", &self.descriptor.span)
            .field("phase", &self.phase())
            .finish()
    }
}
