//! # Arrangement job
//!
//! Lays the scene out over virtual beds. The job snapshots its inputs into
//! [`bedlam_core::arrange::ArrangePolygon`]s during `prepare`, packs on the
//! worker, and writes placements back during `finalize` - so the scene is
//! never touched off the interactive thread.
//!
//! Items keep the logical bed their x offset puts them on as a packing
//! hint, and unprintable items always land on beds after the last printable
//! one.

use bedlam_core::arrange::{arrange, ArrangePolygon, BedShape, UNARRANGED};
use bedlam_core::config::Config;
use bedlam_core::geometry::Point;
use bedlam_core::scene::{ObjectId, Scene};

use super::{Ctl, Job, JobContext};

/// Gap between neighbouring virtual beds, as a fraction of bed width.
pub const LOGICAL_BED_GAP: f64 = 1.0 / 5.0;

/// Distance between the origins of two neighbouring virtual beds.
#[must_use]
pub fn bed_stride(bed: &BedShape) -> f64 {
    (1.0 + LOGICAL_BED_GAP) * bed.bounding_box().width()
}

/// Derive the logical bed from the item's x offset and make the
/// translation local to that bed. The packer reasons within a single bed;
/// the stride is re-added when results are committed.
fn assign_bed(item: &mut ArrangePolygon, stride: f64) {
    let idx = ((item.translation.x / stride).floor() as i32).max(0);
    item.bed_idx = idx;
    item.translation.x -= f64::from(idx) * stride;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ArrangeScope {
    /// Everything printable, plus the aux tower when enabled.
    All,
    /// The current selection, with unselected printable items as fixed
    /// obstacles. An empty selection arranges everything.
    #[default]
    Selected,
}

#[derive(Default)]
pub struct ArrangeJob {
    scope: ArrangeScope,
    selected: Vec<ArrangePolygon>,
    unselected: Vec<ArrangePolygon>,
    unprintable: Vec<ArrangePolygon>,
    bed: Option<BedShape>,
    min_distance: f64,
    stride: f64,
    warning: Option<String>,
}
impl ArrangeJob {
    pub fn set_scope(&mut self, scope: ArrangeScope) {
        self.scope = scope;
    }
    /// A packing failure from the last run, to be surfaced as a warning.
    pub fn take_warning(&mut self) -> Option<String> {
        self.warning.take()
    }

    fn prepare_all(&mut self, ctx: &JobContext<'_>) {
        for (object, instance) in ctx.scene.instances() {
            let poly = object.arrange_poly(instance);
            if instance.printable {
                self.selected.push(poly);
            } else {
                self.unprintable.push(poly);
            }
        }
        if ctx.config.aux_tower_enabled {
            self.selected.push(ctx.scene.aux_tower.arrange_poly());
        }
    }
    fn prepare_selected(&mut self, ctx: &JobContext<'_>) {
        let everything = ctx.selection.is_empty();
        for (object, instance) in ctx.scene.instances() {
            let poly = object.arrange_poly(instance);
            if !instance.printable {
                self.unprintable.push(poly);
            } else if everything || ctx.selection.contains(object.id, instance.id) {
                self.selected.push(poly);
            } else {
                self.unselected.push(poly);
            }
        }
        if ctx.config.aux_tower_enabled {
            let poly = ctx.scene.aux_tower.arrange_poly();
            if everything || ctx.selection.aux_tower {
                self.selected.push(poly);
            } else {
                self.unselected.push(poly);
            }
        }
    }
}

impl Job for ArrangeJob {
    fn name(&self) -> &'static str {
        "arrange"
    }

    fn prepare(&mut self, ctx: &JobContext<'_>) {
        self.selected.clear();
        self.unselected.clear();
        self.unprintable.clear();
        self.warning = None;

        let bed = ctx.config.bed();
        self.stride = bed_stride(&bed);
        self.min_distance = ctx.config.min_object_distance;
        match self.scope {
            ArrangeScope::All => self.prepare_all(ctx),
            ArrangeScope::Selected => self.prepare_selected(ctx),
        }
        for item in self
            .selected
            .iter_mut()
            .chain(&mut self.unselected)
            .chain(&mut self.unprintable)
        {
            assign_bed(item, self.stride);
        }
        self.bed = Some(bed);
    }

    fn process(&mut self, ctl: &Ctl) {
        let Some(bed) = self.bed.clone() else {
            return;
        };
        let total = (self.selected.len() + self.unprintable.len()).max(1) as u32;
        let percent = |n: u32| (n * 100 / total) as i32;

        ctl.update_status(0, "Arranging");
        let printable = arrange(
            &mut self.selected,
            &self.unselected,
            self.min_distance,
            &bed,
            |n| ctl.update_status(percent(n), "Arranging"),
            || ctl.was_canceled(),
        );
        // Unprintable items pack among themselves; their beds are made
        // disjoint from the printable ones in finalize.
        let placed = self.selected.len() as u32;
        let unprintable = arrange(
            &mut self.unprintable,
            &[],
            self.min_distance,
            &bed,
            |n| ctl.update_status(percent(placed + n), "Arranging"),
            || ctl.was_canceled(),
        );
        if let Err(e) = printable.and(unprintable) {
            log::warn!("arrangement failed: {e}");
            self.warning = Some(format!("Arrangement left some items in place: {e}"));
        }
        ctl.update_status(100, "Arranging done.");
    }

    fn finalize(&mut self, canceled: bool, scene: &mut Scene, _config: &Config) -> bool {
        if canceled {
            log::debug!("arrange canceled, results discarded");
            return false;
        }
        // Unprintable items go on trailing beds, past everything printable.
        let first_free_bed = self
            .selected
            .iter()
            .chain(&self.unselected)
            .map(|item| item.bed_idx)
            .max()
            .unwrap_or(UNARRANGED)
            + 1;
        for item in &mut self.unprintable {
            if item.is_arranged() {
                item.bed_idx += first_free_bed;
            }
        }
        for item in self.selected.iter().chain(&self.unprintable) {
            if !item.is_arranged() {
                continue;
            }
            let Some(target) = item.target else {
                continue;
            };
            let translation = Point::new(
                item.translation.x + f64::from(item.bed_idx) * self.stride,
                item.translation.y,
            );
            scene.apply_arrange_result(target, translation, item.rotation);
        }
        true
    }
}

/// Re-place every instance of `object` with everything else printable (and
/// the aux tower) fixed in place. Used after a rotation changed the
/// object's footprint.
pub fn find_new_position(scene: &mut Scene, object: ObjectId, config: &Config) {
    let bed = config.bed();
    let stride = bed_stride(&bed);
    let mut movable = Vec::new();
    let mut fixed = Vec::new();
    for (o, instance) in scene.instances() {
        let mut poly = o.arrange_poly(instance);
        assign_bed(&mut poly, stride);
        if o.id == object {
            movable.push(poly);
        } else if instance.printable {
            fixed.push(poly);
        }
    }
    if config.aux_tower_enabled {
        let mut poly = scene.aux_tower.arrange_poly();
        assign_bed(&mut poly, stride);
        fixed.push(poly);
    }
    if let Err(e) = arrange(
        &mut movable,
        &fixed,
        config.min_object_distance,
        &bed,
        |_| (),
        || false,
    ) {
        log::warn!("could not re-place the rotated object: {e}");
        return;
    }
    for item in movable {
        let (Some(target), true) = (item.target, item.is_arranged()) else {
            continue;
        };
        let translation = Point::new(
            item.translation.x + f64::from(item.bed_idx) * stride,
            item.translation.y,
        );
        scene.apply_arrange_result(target, translation, item.rotation);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jobs::test_ctl;
    use bedlam_core::scene::{testing::cube_object, Selection};

    /// 6 cube instances in one object: 5 printable, the last unprintable.
    fn scene_of_six() -> Scene {
        let mut scene = Scene::default();
        let mut object = cube_object(10.0, 6, 40.0);
        object.instances[5].printable = false;
        scene.add_object(object);
        scene
    }
    fn prepared(scene: &Scene, selection: &Selection, scope: ArrangeScope) -> ArrangeJob {
        let config = Config::default();
        let ctx = JobContext {
            scene,
            selection,
            config: &config,
        };
        let mut job = ArrangeJob::default();
        job.set_scope(scope);
        job.prepare(&ctx);
        job
    }

    #[test]
    fn empty_selection_arranges_everything() {
        let scene = scene_of_six();
        let selection = Selection::default();
        let job = prepared(&scene, &selection, ArrangeScope::Selected);
        assert_eq!(job.selected.len(), 5);
        assert_eq!(job.unselected.len(), 0);
        assert_eq!(job.unprintable.len(), 1);
    }

    #[test]
    fn partial_selection_pins_the_rest() {
        let scene = scene_of_six();
        let mut selection = Selection::default();
        let object = &scene.objects[0];
        for instance in &object.instances[..3] {
            selection.add_instance(object.id, instance.id);
        }
        let job = prepared(&scene, &selection, ArrangeScope::Selected);
        assert_eq!(job.selected.len(), 3);
        assert_eq!(job.unselected.len(), 2);
        assert_eq!(job.unprintable.len(), 1);
    }

    #[test]
    fn bed_hint_comes_from_the_x_offset() {
        let mut scene = Scene::default();
        let mut object = cube_object(10.0, 1, 0.0);
        // 240mm stride for the default 200mm bed; sit on logical bed 2.
        object.instances[0].transform.translation.x = 2.0 * 240.0 + 30.0;
        scene.add_object(object);
        let selection = Selection::default();
        let job = prepared(&scene, &selection, ArrangeScope::All);
        assert_eq!(job.selected[0].bed_idx, 2);
        assert!((job.selected[0].translation.x - 30.0).abs() < 1e-9);
    }

    #[test]
    fn unprintable_items_end_up_on_trailing_beds() {
        let mut scene = scene_of_six();
        let selection = Selection::default();
        let config = Config::default();
        let stride = bed_stride(&config.bed());

        let mut job = prepared(&scene, &selection, ArrangeScope::All);
        let (ctl, _progress) = test_ctl();
        job.process(&ctl);
        assert!(job.finalize(false, &mut scene, &config));

        let beds: Vec<i32> = scene.objects[0]
            .instances
            .iter()
            .map(|i| ((i.transform.translation.x + 1.0) / stride).floor() as i32)
            .collect();
        let printable_max = beds[..5].iter().copied().max().unwrap();
        assert!(
            beds[5] > printable_max,
            "unprintable bed {} must trail printable beds {beds:?}",
            beds[5]
        );
    }

    #[test]
    fn canceled_run_moves_nothing() {
        let mut scene = scene_of_six();
        let before = scene.clone();
        let selection = Selection::default();
        let config = Config::default();
        let mut job = prepared(&scene, &selection, ArrangeScope::All);
        let (ctl, _progress) = test_ctl();
        job.process(&ctl);
        assert!(!job.finalize(true, &mut scene, &config));
        assert_eq!(scene, before);
    }
}
