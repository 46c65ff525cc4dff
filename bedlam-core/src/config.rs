//! Editor configuration. A plain value passed by reference at well-defined
//! apply points - components never reach for a global.

use crate::arrange::BedShape;
use crate::geometry::Polygon;

/// The two mutually exclusive compute modes, each with its own derived
/// compute graph.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum::EnumCount,
)]
pub enum Technology {
    /// Filament deposition. Refreshing the scene on invalidation is only
    /// needed when the auxiliary tower preview participates.
    Fdm,
    /// Resin. Support structures live in the scene, so every invalidation
    /// refreshes it.
    Sla,
}
impl Technology {
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Outline of one (and thus every virtual) bed.
    pub bed_shape: Polygon,
    /// Minimum clearance between any two arranged items, mm.
    pub min_object_distance: f64,
    pub max_print_height: f64,
    pub technology: Technology,
    /// Whether the auxiliary tower participates in layout and preview.
    pub aux_tower_enabled: bool,
    /// Automatic background (re)processing after edits.
    pub background_processing: bool,
    /// Name of the active printer profile.
    pub printer_profile: String,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            bed_shape: Polygon::rectangle(200.0, 200.0),
            min_object_distance: 6.0,
            max_print_height: 200.0,
            technology: Technology::Fdm,
            aux_tower_enabled: false,
            background_processing: true,
            printer_profile: "default".into(),
        }
    }
}
impl Config {
    #[must_use]
    pub fn bed(&self) -> BedShape {
        BedShape::new(self.bed_shape.clone())
    }
    /// Hash of everything that invalidates computed results. Deliberately
    /// excludes `background_processing` and the profile name - toggling
    /// those must not force a recompute.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        for p in &self.bed_shape.points {
            h.write_u64(p.x.to_bits());
            h.write_u64(p.y.to_bits());
        }
        h.write_u64(self.min_object_distance.to_bits());
        h.write_u64(self.max_print_height.to_bits());
        self.technology.index().hash(&mut h);
        self.aux_tower_enabled.hash(&mut h);
        h.finish()
    }
}
