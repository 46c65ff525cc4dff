//! # Orientation search job
//!
//! Finds a resting orientation for the single selected object that
//! minimizes a support-need metric, then squares the footprint up to
//! landscape, re-places the object around its neighbours and drops it back
//! onto the bed.

use std::f64::consts::{FRAC_PI_2, PI};

use bedlam_core::config::Config;
use bedlam_core::geometry::{MinAreaBoundingBox, Transform3, Vec3};
use bedlam_core::scene::{Mesh, ObjectId, Scene};

use super::{Ctl, Job, JobContext};

/// Rotation-search tolerance, radians.
const ACCURACY: f64 = 0.005;
/// Candidate down-directions in the coarse pass.
const COARSE_SAMPLES: usize = 192;
/// Progress is reported at most this many times.
const STATUS_STEPS: usize = 100;

/// Cost of printing `mesh` under an `(rx, ry)` euler rotation. Lower is
/// better. Implementations must be pure: the search calls this from a
/// worker thread, many times.
pub trait SupportCost: Send {
    fn cost(&self, mesh: &Mesh, rotation: (f64, f64)) -> f64;
}

/// Default metric: bed-projected area of downward-facing facets.
pub struct DownwardFacingArea;
impl SupportCost for DownwardFacingArea {
    fn cost(&self, mesh: &Mesh, (rx, ry): (f64, f64)) -> f64 {
        let t = Transform3 {
            rotation: Vec3::new(rx, ry, 0.0),
            ..Transform3::default()
        };
        mesh.triangles
            .iter()
            .map(|tri| {
                let rotated = [t.apply(tri[0]), t.apply(tri[1]), t.apply(tri[2])];
                let n = Mesh::normal(&rotated);
                // Half the normal's -z component is the facet's footprint
                // on the bed.
                if n.z < 0.0 {
                    -n.z * 0.5
                } else {
                    0.0
                }
            })
            .sum()
    }
}

/// Euler X-then-Y rotation that maps direction `d` onto +Z.
fn upright_rotation(d: Vec3) -> (f64, f64) {
    let rx = d.y.atan2(d.z);
    let ry = (-d.x).atan2(d.y.hypot(d.z));
    (rx, ry)
}

/// `k`th of `n` directions on a golden spiral over the unit sphere.
fn spiral_direction(k: usize, n: usize) -> Vec3 {
    let golden = PI * (3.0 - 5f64.sqrt());
    let z = 1.0 - 2.0 * (k as f64 + 0.5) / n as f64;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let azimuth = golden * k as f64;
    Vec3::new(r * azimuth.cos(), r * azimuth.sin(), z)
}

pub struct OrientJob {
    object: Option<ObjectId>,
    mesh: Mesh,
    cost: Box<dyn SupportCost>,
    result: Option<(f64, f64)>,
}
impl Default for OrientJob {
    fn default() -> Self {
        Self {
            object: None,
            mesh: Mesh::default(),
            cost: Box::new(DownwardFacingArea),
            result: None,
        }
    }
}
impl OrientJob {
    pub fn set_metric(&mut self, cost: Box<dyn SupportCost>) {
        self.cost = cost;
    }
}

impl Job for OrientJob {
    fn name(&self) -> &'static str {
        "orientation-search"
    }

    fn prepare(&mut self, ctx: &JobContext<'_>) {
        self.result = None;
        self.mesh = Mesh::default();
        self.object = ctx.selection.single_object();
        let Some(id) = self.object else {
            log::debug!("orientation search needs exactly one selected object");
            return;
        };
        // The search runs on the combined volume mesh in object space.
        if let Some(object) = ctx.scene.object(id) {
            for volume in &object.volumes {
                self.mesh
                    .triangles
                    .extend_from_slice(&volume.mesh.triangles);
            }
        } else {
            self.object = None;
        }
    }

    fn process(&mut self, ctl: &Ctl) {
        if self.object.is_none() || self.mesh.triangles.is_empty() {
            return;
        }
        ctl.update_status(0, "Searching for optimal orientation");
        let mut best = (0.0, 0.0);
        let mut best_cost = self.cost.cost(&self.mesh, best);

        // Coarse pass over evenly spread candidate orientations. Rounding
        // the stride up keeps the total report count, with the initial and
        // final reports, within the status budget.
        let report_every = COARSE_SAMPLES.div_ceil(STATUS_STEPS);
        for k in 0..COARSE_SAMPLES {
            if ctl.was_canceled() {
                return;
            }
            let candidate = upright_rotation(spiral_direction(k, COARSE_SAMPLES));
            let c = self.cost.cost(&self.mesh, candidate);
            if c < best_cost {
                best_cost = c;
                best = candidate;
            }
            if k % report_every == 0 {
                ctl.update_status(
                    (k * 100 / COARSE_SAMPLES) as i32,
                    "Searching for optimal orientation",
                );
            }
        }
        // Hill-climb around the winner until the step is below tolerance.
        // Starts at roughly the coarse sample spacing.
        let mut step = 0.25;
        let mut rounds = 0;
        while step > ACCURACY && rounds < 10_000 {
            rounds += 1;
            if ctl.was_canceled() {
                return;
            }
            let mut improved = false;
            for (dx, dy) in [(-step, 0.0), (step, 0.0), (0.0, -step), (0.0, step)] {
                let candidate = (best.0 + dx, best.1 + dy);
                let c = self.cost.cost(&self.mesh, candidate);
                if c + 1e-12 < best_cost {
                    best_cost = c;
                    best = candidate;
                    improved = true;
                }
            }
            if !improved {
                step *= 0.5;
            }
        }
        self.result = Some(best);
        ctl.update_status(100, "Orientation found");
    }

    fn finalize(&mut self, canceled: bool, scene: &mut Scene, config: &Config) -> bool {
        let Some(id) = self.object else {
            return false;
        };
        if canceled {
            log::debug!("orientation search canceled, nothing applied");
            return false;
        }
        let Some((rx, ry)) = self.result else {
            return false;
        };
        let Some(object) = scene.object_mut(id) else {
            log::warn!("oriented object {id} vanished before finalize");
            return false;
        };
        for n in 0..object.instances.len() {
            // The search evaluated absolute object-space rotations, so the
            // result replaces any previous orientation outright.
            object.instances[n].transform.rotation.x = rx;
            object.instances[n].transform.rotation.y = ry;
            object.instances[n].transform.rotation.z = 0.0;
            // Deterministic tie-break: turn the footprint's minimum box
            // landscape.
            let silhouette = Transform3 {
                translation: Vec3::ZERO,
                ..object.instances[n].transform
            };
            let obb = MinAreaBoundingBox::from_hull(&object.convex_hull_2d(&silhouette));
            let mut correction = obb.angle_to_x();
            if obb.width() < obb.height() {
                correction += FRAC_PI_2;
            }
            object.instances[n].transform.rotation.z += correction;
        }
        object.ensure_on_bed();
        // The new footprint may overlap neighbours.
        super::arrange::find_new_position(scene, id, config);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jobs::test_ctl;
    use bedlam_core::scene::{testing::cube_object, Selection};

    #[test]
    fn upright_rotation_sends_the_direction_up() {
        for k in 0..24 {
            let d = spiral_direction(k, 24);
            let (rx, ry) = upright_rotation(d);
            let t = Transform3 {
                rotation: Vec3::new(rx, ry, 0.0),
                ..Transform3::default()
            };
            let up = t.apply(d);
            assert!(up.x.abs() < 1e-9, "{up:?}");
            assert!(up.y.abs() < 1e-9, "{up:?}");
            assert!((up.z - 1.0).abs() < 1e-9, "{up:?}");
        }
    }

    #[test]
    fn tilting_a_cube_costs_support() {
        let mesh = bedlam_core::scene::testing::cube_mesh(10.0);
        let metric = DownwardFacingArea;
        let flat = metric.cost(&mesh, (0.0, 0.0));
        // Resting on a face: only the 10x10 bottom faces down.
        assert!((flat - 100.0).abs() < 1e-9, "{flat}");
        // Resting on an edge: two faces at 45 degrees overhang.
        let tilted = metric.cost(&mesh, (std::f64::consts::FRAC_PI_4, 0.0));
        assert!(tilted > flat, "{tilted} vs {flat}");
    }

    /// Cost minimized at the identity rotation, independent of the mesh.
    struct UprightBias;
    impl SupportCost for UprightBias {
        fn cost(&self, _mesh: &Mesh, (rx, ry): (f64, f64)) -> f64 {
            rx * rx + ry * ry
        }
    }

    #[test]
    fn result_replaces_a_previous_rotation() {
        let mut scene = Scene::default();
        let id = scene.add_object(cube_object(10.0, 1, 0.0));
        // A stale orientation from an earlier edit must not leak into the
        // committed result.
        scene.objects[0].instances[0].transform.rotation.x = 0.3;
        let mut selection = Selection::default();
        selection.add_instance(id, scene.objects[0].instances[0].id);
        let config = Config::default();

        let mut job = OrientJob::default();
        job.set_metric(Box::new(UprightBias));
        {
            let ctx = JobContext {
                scene: &scene,
                selection: &selection,
                config: &config,
            };
            job.prepare(&ctx);
        }
        let (ctl, _progress) = test_ctl();
        job.process(&ctl);
        assert!(job.finalize(false, &mut scene, &config));

        let rotation = scene.objects[0].instances[0].transform.rotation;
        assert_eq!(rotation.x, 0.0, "{rotation:?}");
        assert_eq!(rotation.y, 0.0, "{rotation:?}");
    }

    #[test]
    fn progress_reports_stay_within_the_status_budget() {
        let mut scene = Scene::default();
        let id = scene.add_object(cube_object(10.0, 1, 0.0));
        let mut selection = Selection::default();
        selection.add_instance(id, scene.objects[0].instances[0].id);
        let config = Config::default();

        let mut job = OrientJob::default();
        {
            let ctx = JobContext {
                scene: &scene,
                selection: &selection,
                config: &config,
            };
            job.prepare(&ctx);
        }
        let (ctl, progress) = test_ctl();
        job.process(&ctl);
        let reports = progress.try_iter().count();
        assert!(reports > 0);
        assert!(reports <= 100, "{reports} reports");
    }

    #[test]
    fn needs_exactly_one_selected_object() {
        let mut scene = Scene::default();
        scene.add_object(cube_object(10.0, 1, 0.0));
        let selection = Selection::default();
        let config = Config::default();
        let ctx = JobContext {
            scene: &scene,
            selection: &selection,
            config: &config,
        };
        let mut job = OrientJob::default();
        job.prepare(&ctx);
        let (ctl, _progress) = test_ctl();
        job.process(&ctl);
        let before = scene.clone();
        assert!(!job.finalize(false, &mut scene, &config));
        assert_eq!(scene, before);
    }

    #[test]
    fn orients_and_keeps_the_object_on_the_bed() {
        let mut scene = Scene::default();
        let id = scene.add_object(cube_object(20.0, 1, 0.0));
        // A fixed neighbour sharing the spot, to force a re-placement.
        scene.add_object(cube_object(20.0, 1, 0.0));
        let mut selection = Selection::default();
        selection.add_instance(id, scene.objects[0].instances[0].id);
        let config = Config::default();

        let mut job = OrientJob::default();
        {
            let ctx = JobContext {
                scene: &scene,
                selection: &selection,
                config: &config,
            };
            job.prepare(&ctx);
        }
        let (ctl, _progress) = test_ctl();
        job.process(&ctl);
        assert!(job.finalize(false, &mut scene, &config));

        // Still resting on the bed.
        let object = scene.object(id).unwrap();
        let t = object.instances[0].transform;
        let min_z = object
            .volumes
            .iter()
            .flat_map(|v| v.mesh.vertices())
            .map(|p| t.apply(p).z)
            .fold(f64::INFINITY, f64::min);
        assert!(min_z.abs() < 1e-6, "{min_z}");

        // And clear of the fixed neighbour.
        let moved = object.convex_hull_2d(&t).bounding_box();
        let neighbour = scene.objects[1]
            .convex_hull_2d(&scene.objects[1].instances[0].transform)
            .bounding_box();
        assert!(
            !moved.intersects(&neighbour),
            "{moved:?} overlaps {neighbour:?}"
        );
    }
}
