//! Canvas geometry helpers for the auto-layout operation: snap to grid,
//! greedy overlap resolution, vertical compaction. Pure and stateless;
//! handlers load draft geometry, apply a subset of these in order, and
//! persist the result.

/// One widget's rectangle on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRect {
    pub widget_id: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub z_index: i64,
}

impl LayoutRect {
    /// Zero-area rectangles never count as intersecting.
    pub fn intersects(&self, other: &LayoutRect) -> bool {
        if self.w == 0 || self.h == 0 || other.w == 0 || other.h == 0 {
            return false;
        }
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }

    pub fn overlaps_in_x(&self, other: &LayoutRect) -> bool {
        self.w > 0 && other.w > 0 && self.x < other.x + other.w && other.x < self.x + self.w
    }
}

/// Round to the nearest multiple of `grid`, ties rounding up.
fn round_to(value: i64, grid: i64) -> i64 {
    let rem = value.rem_euclid(grid);
    if rem * 2 >= grid {
        value - rem + grid
    } else {
        value - rem
    }
}

/// Round every coordinate and dimension to multiples of `grid`; dimensions
/// never drop below `grid`.
pub fn snap_to_grid(rects: &mut [LayoutRect], grid: i64) {
    if grid <= 1 {
        return;
    }
    for rect in rects {
        rect.x = round_to(rect.x, grid);
        rect.y = round_to(rect.y, grid);
        rect.w = round_to(rect.w, grid).max(grid);
        rect.h = round_to(rect.h, grid).max(grid);
    }
}

fn sort_reading_order(rects: &mut [LayoutRect]) {
    rects.sort_by(|a, b| {
        (a.y, a.x)
            .cmp(&(b.y, b.x))
            .then_with(|| a.widget_id.cmp(&b.widget_id))
    });
}

/// Greedy O(n²) overlap resolution: sort by `(y, x, widget_id)`, place each
/// rectangle in order, pushing it downward below the lowest already-placed
/// rectangle it intersects until it intersects nothing.
pub fn resolve_overlaps(rects: &mut Vec<LayoutRect>) {
    sort_reading_order(rects);
    for i in 0..rects.len() {
        loop {
            let mut push_to: Option<i64> = None;
            for j in 0..i {
                if rects[i].intersects(&rects[j]) {
                    let bottom = rects[j].y + rects[j].h;
                    push_to = Some(push_to.map_or(bottom, |cur| cur.max(bottom)));
                }
            }
            match push_to {
                Some(y) => rects[i].y = y,
                None => break,
            }
        }
    }
}

/// Move each rectangle (in `(y, x)` order) up to the lowest free y: zero, or
/// the bottom edge of the closest already-placed rectangle sharing x-extent.
/// Rectangles only ever move up, so an overlap-free input stays overlap-free.
pub fn compact_vertical(rects: &mut Vec<LayoutRect>) {
    sort_reading_order(rects);
    for i in 0..rects.len() {
        let mut target = 0i64;
        for j in 0..i {
            if rects[i].overlaps_in_x(&rects[j]) {
                target = target.max(rects[j].y + rects[j].h);
            }
        }
        if target < rects[i].y {
            rects[i].y = target;
        }
    }
}
