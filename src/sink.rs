//! UI attachment sink
//!
//! The core never draws anything. It asks a sink to create a positioned
//! element per tile, to move it, to fill it with an image or clear it, and
//! finally to remove it. Front ends implement [`TileSink`]; [`MemorySink`]
//! keeps elements in memory for the headless front end and tests.

use std::collections::HashMap;

use crate::transport::TileImage;
use crate::viewport::{Coord, Rect};

/// Opaque reference to one UI element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UiHandle(pub u64);

pub trait TileSink {
    /// Create an element showing placeholder content at the given bounds
    fn create(&mut self, coord: Coord, bounds: Rect) -> UiHandle;
    /// Position the element inside its container
    fn set_offset(&mut self, handle: UiHandle, left: f64, top: f64);
    /// Replace the element's content with an image
    fn show_image(&mut self, handle: UiHandle, image: &TileImage);
    /// Per-column biome ids of a loaded tile, for sinks that draw them
    /// instead of the image
    fn show_biomes(&mut self, _handle: UiHandle, _values: &[i64]) {}
    /// Empty the element
    fn clear(&mut self, handle: UiHandle);
    /// Detach the element
    fn remove(&mut self, handle: UiHandle);
}

/// What an element currently shows
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Placeholder,
    Empty,
    Image(TileImage),
}

#[derive(Clone, Debug)]
pub struct Element {
    pub coord: Coord,
    pub bounds: Rect,
    pub offset: (f64, f64),
    pub content: Content,
    pub biomes: Vec<i64>,
}

/// Calls observed by a [`MemorySink`], in order
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Created(UiHandle, Coord),
    Offset(UiHandle),
    Image(UiHandle),
    Biomes(UiHandle),
    Cleared(UiHandle),
    Removed(UiHandle),
}

/// In-memory sink
#[derive(Default)]
pub struct MemorySink {
    next_handle: u64,
    elements: HashMap<UiHandle, Element>,
    events: Vec<SinkEvent>,
    /// Writes aimed at elements that were already removed
    stale_writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self, handle: UiHandle) -> Option<&Element> {
        self.elements.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn stale_writes(&self) -> usize {
        self.stale_writes
    }

    /// Count elements by what they show: (placeholder, empty, image)
    pub fn content_counts(&self) -> (usize, usize, usize) {
        self.elements.values().fold((0, 0, 0), |(p, e, i), el| match el.content {
            Content::Placeholder => (p + 1, e, i),
            Content::Empty => (p, e + 1, i),
            Content::Image(_) => (p, e, i + 1),
        })
    }

    fn with_element(&mut self, handle: UiHandle, f: impl FnOnce(&mut Element)) -> bool {
        match self.elements.get_mut(&handle) {
            Some(element) => {
                f(element);
                true
            }
            None => {
                self.stale_writes += 1;
                false
            }
        }
    }
}

impl TileSink for MemorySink {
    fn create(&mut self, coord: Coord, bounds: Rect) -> UiHandle {
        let handle = UiHandle(self.next_handle);
        self.next_handle += 1;
        self.elements.insert(
            handle,
            Element {
                coord,
                bounds,
                offset: (bounds.left, bounds.top),
                content: Content::Placeholder,
                biomes: Vec::new(),
            },
        );
        self.events.push(SinkEvent::Created(handle, coord));
        handle
    }

    fn set_offset(&mut self, handle: UiHandle, left: f64, top: f64) {
        if self.with_element(handle, |el| el.offset = (left, top)) {
            self.events.push(SinkEvent::Offset(handle));
        }
    }

    fn show_image(&mut self, handle: UiHandle, image: &TileImage) {
        if self.with_element(handle, |el| el.content = Content::Image(image.clone())) {
            self.events.push(SinkEvent::Image(handle));
        }
    }

    fn show_biomes(&mut self, handle: UiHandle, values: &[i64]) {
        if self.with_element(handle, |el| el.biomes = values.to_vec()) {
            self.events.push(SinkEvent::Biomes(handle));
        }
    }

    fn clear(&mut self, handle: UiHandle) {
        if self.with_element(handle, |el| el.content = Content::Empty) {
            self.events.push(SinkEvent::Cleared(handle));
        }
    }

    fn remove(&mut self, handle: UiHandle) {
        if self.elements.remove(&handle).is_some() {
            self.events.push(SinkEvent::Removed(handle));
        } else {
            self.stale_writes += 1;
        }
    }
}
