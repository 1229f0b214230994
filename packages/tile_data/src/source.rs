use crate::tile_type::{
    TileTypeId,
    TileType,
    TextureLayer,
};
use std::{
    fmt::Debug,
    sync::Arc,
};
use crossbeam_channel::{
    Sender,
    Receiver,
    TryIter,
    unbounded,
};
use parking_lot::Mutex;
use vek::*;


/// A tileset: texture atlas layers plus the tile types it serves.
///
/// Identity matters: the renderer compares tilesets by `Arc` pointer.
pub trait TilesetSource: Debug + Send + Sync {
    /// Size of one tile in the atlas, in pixels.
    fn pixel_size(&self) -> Extent2<u32>;

    /// Size of the atlas, in tiles.
    fn texture_size(&self) -> Extent2<u32>;

    /// Tile type ids this tileset serves.
    fn tile_types(&self) -> Vec<TileTypeId>;

    fn tile_type(&self, id: TileTypeId) -> Option<TileType>;

    /// RGBA8 pixels of the given atlas layer, if the tileset has it.
    fn texture(&self, layer: TextureLayer) -> Option<&[u8]>;
}


/// Notification from a map source.
#[derive(Debug, Clone)]
pub enum MapEvent {
    /// Tiles in the region became available or changed.
    RegionUpdated {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    },
    /// Tilesets were registered. `Some` lists tilesets whose content was
    /// replaced.
    TilesetsUpdated(Option<Vec<TilesetReplaced>>),
}


/// A registered tileset swapped for new content.
#[derive(Debug, Clone)]
pub struct TilesetReplaced {
    pub old: Arc<dyn TilesetSource>,
    pub new: Arc<dyn TilesetSource>,
}


#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);


/// Receiving end of a map event subscription.
#[derive(Debug)]
pub struct MapSubscription {
    id: SubscriptionId,
    recv: Receiver<MapEvent>,
}

impl MapSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Drain events received so far, without blocking.
    pub fn try_iter(&self) -> TryIter<'_, MapEvent> {
        self.recv.try_iter()
    }
}


/// Source of tile content. External collaborator of the renderer.
///
/// Loading may be asynchronous: `tile` returns `None` for tiles not loaded
/// yet, and the source later publishes `MapEvent::RegionUpdated` to
/// subscribers once they are.
pub trait MapSource: Send + Sync {
    fn tile(&self, x: i32, y: i32) -> Option<TileTypeId>;

    fn tileset(&self, id: TileTypeId) -> Option<Arc<dyn TilesetSource>>;

    fn subscribe(&self) -> MapSubscription;

    fn unsubscribe(&self, id: SubscriptionId);
}


/// Subscriber list a `MapSource` implementation can embed.
///
/// Subscribers whose receiving end was dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct MapEventHub {
    inner: Mutex<HubInner>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Sender<MapEvent>)>,
}

impl MapEventHub {
    pub fn new() -> Self {
        MapEventHub::default()
    }

    pub fn subscribe(&self) -> MapSubscription {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        let (send, recv) = unbounded();
        inner.subscribers.push((id, send));
        trace!(?id, "map subscription added");
        MapSubscription { id, recv }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|&(sub_id, _)| sub_id != id);
        trace!(?id, "map subscription removed");
    }

    pub fn num_subscribers(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn emit(&self, event: MapEvent) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|(_, send)| send.send(event.clone()).is_ok());
    }

    pub fn emit_region(&self, x: i32, y: i32, w: i32, h: i32) {
        self.emit(MapEvent::RegionUpdated { x, y, w, h });
    }
}


#[test]
fn test_hub_unsubscribe() {
    let hub = MapEventHub::new();
    let a = hub.subscribe();
    let b = hub.subscribe();
    hub.emit_region(0, 0, 1, 1);
    hub.unsubscribe(a.id());
    hub.emit_region(1, 1, 1, 1);
    assert_eq!(a.try_iter().count(), 1);
    assert_eq!(b.try_iter().count(), 2);
    drop(b);
    hub.emit_region(2, 2, 1, 1);
    assert_eq!(hub.num_subscribers(), 0);
}
