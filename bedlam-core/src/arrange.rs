//! # Arrangement
//!
//! Packs item silhouettes onto an unbounded sequence of identically-shaped
//! "virtual beds". Items are transient [`ArrangePolygon`]s derived from the
//! scene; the solved placement travels back to the scene through an
//! [`ArrangeTarget`] applied on the interactive thread, never through a
//! pointer captured on a worker.
//!
//! The packer is a bottom-left heuristic over bounding boxes: candidate
//! positions are seeded from the corners of already-placed items, the first
//! candidate that fits the bed and clears every neighbour wins. Fixed items
//! act as obstacles on the bed their `bed_idx` names.

use crate::geometry::{BoundingBox, Point, Polygon};
use crate::scene::{InstanceId, ObjectId};

/// `bed_idx` value of an item the packer could not place.
pub const UNARRANGED: i32 = -1;

/// Where a solved placement is written back to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArrangeTarget {
    Instance {
        object: ObjectId,
        instance: InstanceId,
    },
    AuxTower,
}

/// Transient silhouette of one placeable item.
#[derive(Clone, Debug)]
pub struct ArrangePolygon {
    /// 2D silhouette with the item's rotation/scale baked in, positioned
    /// relative to its own origin.
    pub poly: Polygon,
    /// Which virtual bed the item occupies. On input this is a hint; on
    /// output the solved bed, or [`UNARRANGED`].
    pub bed_idx: i32,
    /// Bed-plane translation, local to `bed_idx`.
    pub translation: Point,
    /// Additional rotation the placement asks for, radians.
    pub rotation: f64,
    /// Tie-break weight. Higher priority packs later; unprintable and
    /// auxiliary items use this to end up on trailing beds.
    pub priority: u32,
    pub target: Option<ArrangeTarget>,
}
impl Default for ArrangePolygon {
    fn default() -> Self {
        Self {
            poly: Polygon::default(),
            bed_idx: UNARRANGED,
            translation: Point::default(),
            rotation: 0.0,
            priority: 0,
            target: None,
        }
    }
}
impl ArrangePolygon {
    #[must_use]
    pub fn is_arranged(&self) -> bool {
        self.bed_idx >= 0
    }
}

/// The shape every virtual bed shares.
#[derive(Clone, Debug, PartialEq)]
pub struct BedShape {
    pub poly: Polygon,
}
impl BedShape {
    #[must_use]
    pub fn new(poly: Polygon) -> Self {
        Self { poly }
    }
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        self.poly.bounding_box()
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ArrangeError {
    #[error("cannot pack items with degenerate silhouettes")]
    DegenerateGeometry,
    #[error("the bed shape is degenerate")]
    DegenerateBed,
}

// One occupied axis-aligned region on a virtual bed.
struct Placed {
    bed: i32,
    rect: BoundingBox,
}

/// Pack `movable` onto virtual beds, around `fixed` obstacles, honoring a
/// minimum clearance between any two items.
///
/// `progress` is invoked once per placed item with the running count;
/// `stop` is polled between items and aborts the remaining placements
/// (their `bed_idx` is left untouched).
pub fn arrange(
    movable: &mut [ArrangePolygon],
    fixed: &[ArrangePolygon],
    min_obj_distance: f64,
    bed: &BedShape,
    mut progress: impl FnMut(u32),
    stop: impl Fn() -> bool,
) -> Result<(), ArrangeError> {
    let bed_bb = bed.bounding_box();
    if bed_bb.is_empty() || bed_bb.width() <= 0.0 || bed_bb.height() <= 0.0 {
        return Err(ArrangeError::DegenerateBed);
    }
    if movable.iter().any(|item| item.poly.is_degenerate()) {
        return Err(ArrangeError::DegenerateGeometry);
    }

    let mut placed: Vec<Placed> = fixed
        .iter()
        .map(|item| Placed {
            bed: item.bed_idx.max(0),
            rect: item.poly.translated(item.translation).bounding_box(),
        })
        .collect();

    // Pack low priorities first, big items first within a priority.
    let mut order: Vec<usize> = (0..movable.len()).collect();
    order.sort_by(|&a, &b| {
        movable[a]
            .priority
            .cmp(&movable[b].priority)
            .then(movable[b].poly.area().abs().total_cmp(&movable[a].poly.area().abs()))
    });

    let mut count = 0u32;
    for idx in order {
        if stop() {
            return Ok(());
        }
        let item = &mut movable[idx];
        let rect = item.poly.bounding_box();
        if rect.width() > bed_bb.width() || rect.height() > bed_bb.height() {
            // Oversized for any bed; report it unplaced and move on.
            item.bed_idx = UNARRANGED;
            continue;
        }

        // The item's current bed is a hint worth trying first.
        let hint = item.bed_idx.max(0);
        let beds = std::iter::once(hint).chain((0..).filter(move |&b| b != hint));
        for bed_idx in beds {
            let obstacles: Vec<&BoundingBox> = placed
                .iter()
                .filter(|p| p.bed == bed_idx)
                .map(|p| &p.rect)
                .collect();
            if let Some(pos) = bottom_left_fit(&rect, &obstacles, &bed_bb, min_obj_distance) {
                item.translation = pos - rect.min;
                item.bed_idx = bed_idx;
                placed.push(Placed {
                    bed: bed_idx,
                    rect: rect.translated(item.translation),
                });
                count += 1;
                progress(count);
                break;
            }
        }
    }
    Ok(())
}

/// Find the lowest-then-leftmost position where `rect` fits inside `bed`
/// while keeping `clearance` to every obstacle. `None` if the bed is full.
fn bottom_left_fit(
    rect: &BoundingBox,
    obstacles: &[&BoundingBox],
    bed: &BoundingBox,
    clearance: f64,
) -> Option<Point> {
    let mut candidates: smallvec::SmallVec<[Point; 16]> = smallvec::smallvec![bed.min];
    for o in obstacles {
        candidates.push(Point::new(o.max.x + clearance, bed.min.y));
        candidates.push(Point::new(o.max.x + clearance, o.min.y));
        candidates.push(Point::new(o.min.x, o.max.y + clearance));
        candidates.push(Point::new(bed.min.x, o.max.y + clearance));
    }
    candidates.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    candidates.into_iter().find(|&pos| {
        let r = rect.at(pos);
        bed.contains_box(&r) && {
            // Inflating the moving box by the full clearance keeps the
            // object distance to every already placed neighbour.
            let swept = r.inflated(clearance);
            obstacles.iter().all(|o| !swept.intersects(o))
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::Polygon;

    fn square(side: f64) -> ArrangePolygon {
        ArrangePolygon {
            poly: Polygon::rectangle(side, side),
            ..ArrangePolygon::default()
        }
    }
    fn bed(side: f64) -> BedShape {
        BedShape::new(Polygon::rectangle(side, side))
    }

    #[test]
    fn items_spill_to_next_bed() {
        // Four 60mm squares cannot share one 100mm bed with 5mm clearance.
        let mut items: Vec<_> = (0..4).map(|_| square(60.0)).collect();
        let mut placed = 0;
        arrange(&mut items, &[], 5.0, &bed(100.0), |_| placed += 1, || false).unwrap();
        assert_eq!(placed, 4);
        assert!(items.iter().all(ArrangePolygon::is_arranged));
        let max_bed = items.iter().map(|i| i.bed_idx).max().unwrap();
        assert!(max_bed >= 3, "one 60mm square per 100mm bed");
    }

    #[test]
    fn clearance_is_kept_from_fixed_obstacles() {
        let mut obstacle = square(40.0);
        obstacle.bed_idx = 0;
        obstacle.translation = Point::new(0.0, 0.0);
        let mut items = vec![square(40.0)];
        arrange(&mut items, &[obstacle.clone()], 10.0, &bed(100.0), |_| (), || false).unwrap();
        assert_eq!(items[0].bed_idx, 0);
        let placed = items[0].poly.translated(items[0].translation).bounding_box();
        let fixed = obstacle.poly.translated(obstacle.translation).bounding_box();
        assert!(!placed.inflated(10.0 - 1e-9).intersects(&fixed));
    }

    #[test]
    fn degenerate_silhouette_is_an_error() {
        let mut items = vec![ArrangePolygon::default()];
        let err = arrange(&mut items, &[], 5.0, &bed(100.0), |_| (), || false);
        assert_eq!(err, Err(ArrangeError::DegenerateGeometry));
    }

    #[test]
    fn stop_aborts_between_items() {
        let placed = std::cell::Cell::new(0u32);
        let mut items: Vec<_> = (0..8).map(|_| square(10.0)).collect();
        arrange(
            &mut items,
            &[],
            1.0,
            &bed(100.0),
            |n| placed.set(n),
            // Give up after the second placement.
            || placed.get() >= 2,
        )
        .unwrap();
        assert!(placed.get() <= 2);
        assert!(items.iter().any(|i| !i.is_arranged()));
    }

    #[test]
    fn bed_hint_is_honored() {
        let mut items = vec![square(20.0)];
        items[0].bed_idx = 3;
        arrange(&mut items, &[], 5.0, &bed(100.0), |_| (), || false).unwrap();
        assert_eq!(items[0].bed_idx, 3);
    }

    #[test]
    fn oversized_item_stays_unarranged() {
        let mut items = vec![square(150.0), square(20.0)];
        arrange(&mut items, &[], 5.0, &bed(100.0), |_| (), || false).unwrap();
        assert_eq!(items[0].bed_idx, UNARRANGED);
        assert!(items[1].is_arranged());
    }
}
