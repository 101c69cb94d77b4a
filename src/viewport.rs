//! Viewport and tile coordinate math
//!
//! Converts container geometry plus a pan center into the visible world
//! rectangle, and that rectangle into the half-open range of tile coordinates
//! that must be present.

/// A tile's grid position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: i64,
    pub z: i64,
}

impl Coord {
    pub fn new(x: i64, z: i64) -> Self {
        Self { x, z }
    }
}

/// Axis-aligned rectangle; z grows downwards
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl Rect {
    /// True when the two rectangles touch or overlap
    pub fn intersects(&self, other: &Rect) -> bool {
        self.top <= other.bottom
            && self.bottom >= other.top
            && self.left <= other.right
            && self.right >= other.left
    }
}

/// Visible area in world units
pub type Viewport = Rect;

/// Pan center in world units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PanCenter {
    pub x: f64,
    pub z: f64,
}

impl PanCenter {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }
}

/// Size of the on-screen container plus where it is looking
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContainerGeometry {
    pub width_px: f64,
    pub height_px: f64,
    pub pan: PanCenter,
}

impl ContainerGeometry {
    pub fn new(width_px: f64, height_px: f64, pan: PanCenter) -> Self {
        Self { width_px, height_px, pan }
    }
}

/// Compute the visible world rectangle.
///
/// The half extents are the container dimensions divided by two and by the
/// pixel scale, centred on the pan point.
pub fn compute_viewport(width_px: f64, height_px: f64, pan: PanCenter, scale: f64) -> Viewport {
    let half_w = width_px / 2.0 / scale;
    let half_h = height_px / 2.0 / scale;

    Rect {
        top: pan.z - half_h,
        left: pan.x - half_w,
        bottom: pan.z + half_h,
        right: pan.x + half_w,
    }
}

/// Half-open range `[min, max)` of tile coordinates on both axes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordRange {
    pub x_min: i64,
    pub x_max: i64,
    pub z_min: i64,
    pub z_max: i64,
}

impl CoordRange {
    pub fn is_empty(&self) -> bool {
        self.x_min >= self.x_max || self.z_min >= self.z_max
    }

    /// Number of coordinates, saturating at `usize::MAX`
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let width = self.x_max as i128 - self.x_min as i128;
        let height = self.z_max as i128 - self.z_min as i128;
        usize::try_from(width.saturating_mul(height)).unwrap_or(usize::MAX)
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= self.x_min && coord.x < self.x_max && coord.z >= self.z_min && coord.z < self.z_max
    }

    /// How many tiles the coordinate lies outside the range (0 when inside)
    pub fn distance_outside(&self, coord: Coord) -> i64 {
        let dx = if coord.x < self.x_min {
            self.x_min.saturating_sub(coord.x)
        } else if coord.x >= self.x_max {
            coord.x.saturating_sub(self.x_max).saturating_add(1)
        } else {
            0
        };
        let dz = if coord.z < self.z_min {
            self.z_min.saturating_sub(coord.z)
        } else if coord.z >= self.z_max {
            coord.z.saturating_sub(self.z_max).saturating_add(1)
        } else {
            0
        };
        dx.max(dz)
    }

    /// Row-major iteration: rows of z, each walked along x
    pub fn iter(&self) -> impl Iterator<Item = Coord> {
        let (x_min, x_max) = (self.x_min, self.x_max);
        (self.z_min..self.z_max).flat_map(move |z| (x_min..x_max).map(move |x| Coord::new(x, z)))
    }
}

/// Tile coordinates needed to cover a viewport
pub fn required_range(viewport: &Viewport, tile_size: i64) -> CoordRange {
    let size = tile_size as f64;
    CoordRange {
        x_min: (viewport.left / size).floor() as i64,
        x_max: (viewport.right / size).ceil() as i64,
        z_min: (viewport.top / size).floor() as i64,
        z_max: (viewport.bottom / size).ceil() as i64,
    }
}

/// Pixel rectangle a tile occupies inside the map container
pub fn tile_bounds(coord: Coord, tile_px: f64) -> Rect {
    let top = coord.z as f64 * tile_px;
    let left = coord.x as f64 * tile_px;
    Rect {
        top,
        left,
        bottom: top + tile_px,
        right: left + tile_px,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_for_800x600_at_scale_2() {
        let vp = compute_viewport(800.0, 600.0, PanCenter::default(), 2.0);
        assert_eq!(vp, Rect { top: -150.0, left: -200.0, bottom: 150.0, right: 200.0 });

        let range = required_range(&vp, 16);
        assert_eq!((range.x_min, range.x_max), (-13, 13));
        assert_eq!((range.z_min, range.z_max), (-10, 10));
        assert_eq!(range.len(), 26 * 20);
    }

    #[test]
    fn test_pan_shifts_viewport() {
        let vp = compute_viewport(64.0, 64.0, PanCenter::new(100.0, -40.0), 2.0);
        assert_eq!(vp.left, 84.0);
        assert_eq!(vp.right, 116.0);
        assert_eq!(vp.top, -56.0);
        assert_eq!(vp.bottom, -24.0);

        let range = required_range(&vp, 16);
        assert_eq!((range.x_min, range.x_max), (5, 8));
        assert_eq!((range.z_min, range.z_max), (-4, -1));
    }

    #[test]
    fn test_aligned_edges_do_not_add_extra_tiles() {
        let vp = Rect { top: 0.0, left: 0.0, bottom: 32.0, right: 32.0 };
        let range = required_range(&vp, 16);
        assert_eq!(range, CoordRange { x_min: 0, x_max: 2, z_min: 0, z_max: 2 });
        assert_eq!(range.iter().count(), 4);
    }

    #[test]
    fn test_computation_is_reproducible() {
        let pan = PanCenter::new(-7.5, 13.25);
        let a = required_range(&compute_viewport(333.0, 217.0, pan, 3.0), 16);
        let b = required_range(&compute_viewport(333.0, 217.0, pan, 3.0), 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_size_container_needs_no_tiles_when_aligned() {
        let vp = compute_viewport(0.0, 0.0, PanCenter::default(), 2.0);
        let range = required_range(&vp, 16);
        assert!(range.is_empty());
        assert_eq!(range.iter().count(), 0);
    }

    #[test]
    fn test_iteration_is_row_major() {
        let range = CoordRange { x_min: 0, x_max: 2, z_min: 5, z_max: 7 };
        let coords: Vec<Coord> = range.iter().collect();
        assert_eq!(
            coords,
            vec![Coord::new(0, 5), Coord::new(1, 5), Coord::new(0, 6), Coord::new(1, 6)]
        );
    }

    #[test]
    fn test_distance_outside() {
        let range = CoordRange { x_min: 0, x_max: 4, z_min: 0, z_max: 4 };
        assert_eq!(range.distance_outside(Coord::new(2, 2)), 0);
        assert_eq!(range.distance_outside(Coord::new(4, 0)), 1);
        assert_eq!(range.distance_outside(Coord::new(-3, 1)), 3);
        assert_eq!(range.distance_outside(Coord::new(1, 9)), 6);
    }

    #[test]
    fn test_huge_viewport_saturates() {
        let vp = compute_viewport(1e30, 1e30, PanCenter::default(), 2.0);
        let range = required_range(&vp, 16);
        assert_eq!((range.x_min, range.x_max), (i64::MIN, i64::MAX));
        assert_eq!(range.len(), usize::MAX);
        assert_eq!(range.distance_outside(Coord::new(0, 0)), 0);

        let wide = CoordRange { x_min: i64::MIN, x_max: i64::MIN + 3, z_min: 0, z_max: 2 };
        assert_eq!(wide.len(), 6);
        assert_eq!(wide.distance_outside(Coord::new(i64::MAX, 0)), i64::MAX);
    }

    #[test]
    fn test_tile_bounds() {
        let b = tile_bounds(Coord::new(-1, 2), 32.0);
        assert_eq!(b, Rect { top: 64.0, left: -32.0, bottom: 96.0, right: 0.0 });
        assert!(b.intersects(&Rect { top: 90.0, left: -10.0, bottom: 200.0, right: 10.0 }));
        assert!(!b.intersects(&Rect { top: 0.0, left: 0.0, bottom: 10.0, right: 10.0 }));
    }
}
