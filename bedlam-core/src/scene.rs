//! # Scene model
//!
//! The mutable ground truth the editor operates on: a [`Scene`] exclusively
//! owns [`Object`]s, an object exclusively owns its [`Volume`]s (sub-meshes)
//! and one or more placed [`Instance`]s. Everything derived from the scene
//! (compute graphs, arrange input, snapshots) refers back into it by stable
//! [`Id`]s, never by ownership.
//!
//! The [`AuxTower`] is the odd one out: it is placed on the bed like an
//! instance and participates in arrangement, but is not stored among the
//! objects.

use crate::arrange::{ArrangePolygon, ArrangeTarget};
use crate::geometry::{convex_hull, BoundingBox, Point, Polygon, Transform3, Vec3};
use crate::Id;

pub type ObjectId = Id<Object>;
pub type InstanceId = Id<Instance>;
pub type VolumeId = Id<Volume>;

/// A triangle soup. No topology guarantees; only vertices and facet
/// orientation are ever consulted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub triangles: Vec<[Vec3; 3]>,
}
impl Mesh {
    #[must_use]
    pub fn vertices(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.triangles.iter().flatten().copied()
    }
    /// Unnormalized facet normal, by the right-hand rule.
    #[must_use]
    pub fn normal(tri: &[Vec3; 3]) -> Vec3 {
        let u = Vec3::new(
            tri[1].x - tri[0].x,
            tri[1].y - tri[0].y,
            tri[1].z - tri[0].z,
        );
        let v = Vec3::new(
            tri[2].x - tri[0].x,
            tri[2].y - tri[0].y,
            tri[2].z - tri[0].z,
        );
        Vec3::new(
            u.y * v.z - u.z * v.y,
            u.z * v.x - u.x * v.z,
            u.x * v.y - u.y * v.x,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub mesh: Mesh,
}
impl Volume {
    #[must_use]
    pub fn new(name: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            id: VolumeId::next(),
            name: name.into(),
            mesh,
        }
    }
}

/// One placed copy of an object.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub transform: Transform3,
    pub printable: bool,
}
impl Default for Instance {
    fn default() -> Self {
        Self {
            id: InstanceId::next(),
            transform: Transform3::default(),
            printable: true,
        }
    }
}
impl Instance {
    /// Commit a solved placement: bed-plane translation plus an additional
    /// rotation about Z. Z offset and the other rotation axes are untouched.
    pub fn apply_arrange_result(&mut self, translation: Point, rotation: f64) {
        self.transform.translation.x = translation.x;
        self.transform.translation.y = translation.y;
        self.transform.rotation.z += rotation;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub id: ObjectId,
    pub name: String,
    pub volumes: Vec<Volume>,
    pub instances: Vec<Instance>,
}
impl Object {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.into(),
            volumes: Vec::new(),
            instances: Vec::new(),
        }
    }
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }
    #[must_use]
    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }
    /// Convex hull of every volume vertex projected to the bed plane under
    /// the given transform.
    #[must_use]
    pub fn convex_hull_2d(&self, transform: &Transform3) -> Polygon {
        let projected: Vec<Point> = self
            .volumes
            .iter()
            .flat_map(|v| v.mesh.vertices())
            .map(|p| transform.apply(p).xy())
            .collect();
        convex_hull(&projected)
    }
    /// Arrange silhouette of one instance: the hull under the instance's
    /// rotation/scale/mirror, with the bed-plane translation reported
    /// separately so the packer can reason about relative placement.
    #[must_use]
    pub fn arrange_poly(&self, instance: &Instance) -> ArrangePolygon {
        let silhouette = Transform3 {
            translation: Vec3::ZERO,
            ..instance.transform
        };
        ArrangePolygon {
            poly: self.convex_hull_2d(&silhouette),
            translation: instance.transform.translation.xy(),
            target: Some(ArrangeTarget::Instance {
                object: self.id,
                instance: instance.id,
            }),
            ..ArrangePolygon::default()
        }
    }
    /// Sink or raise every instance so the object rests exactly on z = 0.
    pub fn ensure_on_bed(&mut self) {
        for i in 0..self.instances.len() {
            let transform = self.instances[i].transform;
            let min_z = self
                .volumes
                .iter()
                .flat_map(|v| v.mesh.vertices())
                .map(|p| transform.apply(p).z)
                .fold(f64::INFINITY, f64::min);
            if min_z.is_finite() {
                self.instances[i].transform.translation.z -= min_z;
            }
        }
    }
    /// Height of the tallest instance above the bed.
    #[must_use]
    pub fn max_z(&self) -> f64 {
        self.instances
            .iter()
            .flat_map(|inst| {
                self.volumes
                    .iter()
                    .flat_map(|v| v.mesh.vertices())
                    .map(move |p| inst.transform.apply(p).z)
            })
            .fold(0.0, f64::max)
    }
}

/// The auxiliary tower: placed like an instance, owned by the scene itself.
#[derive(Clone, Debug, PartialEq)]
pub struct AuxTower {
    pub position: Point,
    pub rotation: f64,
    /// Footprint of the tower on the bed.
    pub size: Point,
}
impl Default for AuxTower {
    fn default() -> Self {
        Self {
            position: Point::new(0.0, 0.0),
            rotation: 0.0,
            size: Point::new(20.0, 20.0),
        }
    }
}
impl AuxTower {
    pub fn apply_arrange_result(&mut self, translation: Point, rotation: f64) {
        self.position = translation;
        self.rotation = rotation;
    }
    #[must_use]
    pub fn arrange_poly(&self) -> ArrangePolygon {
        ArrangePolygon {
            poly: Polygon::rectangle(self.size.x, self.size.y),
            translation: self.position,
            rotation: self.rotation,
            // Packed after everything else.
            priority: 1,
            target: Some(ArrangeTarget::AuxTower),
            ..ArrangePolygon::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub objects: Vec<Object>,
    pub aux_tower: AuxTower,
}
impl Scene {
    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.iter().find(|o| o.id == id)
    }
    #[must_use]
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.iter_mut().find(|o| o.id == id)
    }
    pub fn add_object(&mut self, object: Object) -> ObjectId {
        let id = object.id;
        self.objects.push(object);
        id
    }
    pub fn remove_object(&mut self, id: ObjectId) -> Option<Object> {
        let idx = self.objects.iter().position(|o| o.id == id)?;
        Some(self.objects.remove(idx))
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
    /// All `(object, instance)` pairs, in scene order.
    pub fn instances(&self) -> impl Iterator<Item = (&Object, &Instance)> {
        self.objects
            .iter()
            .flat_map(|o| o.instances.iter().map(move |i| (o, i)))
    }
    /// Resolve an arrange write-back target.
    pub fn apply_arrange_result(
        &mut self,
        target: ArrangeTarget,
        translation: Point,
        rotation: f64,
    ) {
        match target {
            ArrangeTarget::Instance { object, instance } => {
                if let Some(inst) = self
                    .object_mut(object)
                    .and_then(|o| o.instance_mut(instance))
                {
                    inst.apply_arrange_result(translation, rotation);
                } else {
                    // The instance can legitimately be gone: the job that
                    // produced this result was abandoned past its timeout.
                    log::warn!("arrange result for vanished instance {instance:?}");
                }
            }
            ArrangeTarget::AuxTower => self.aux_tower.apply_arrange_result(translation, rotation),
        }
    }
    /// Cheap content hash for change detection. Covers ids, transforms,
    /// printable flags and mesh shapes; stable only within this process.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        for o in &self.objects {
            o.id.hash(&mut h);
            for v in &o.volumes {
                v.id.hash(&mut h);
                v.mesh.triangles.len().hash(&mut h);
            }
            for i in &o.instances {
                i.id.hash(&mut h);
                i.printable.hash(&mut h);
                hash_transform(&i.transform, &mut h);
            }
        }
        h.write_u64(self.aux_tower.position.x.to_bits());
        h.write_u64(self.aux_tower.position.y.to_bits());
        h.write_u64(self.aux_tower.rotation.to_bits());
        h.finish()
    }
    /// Estimated heap footprint, for the snapshot memory budget.
    #[must_use]
    pub fn memsize(&self) -> usize {
        let mut size = std::mem::size_of::<Self>();
        for o in &self.objects {
            size += std::mem::size_of::<Object>() + o.name.len();
            size += o.instances.len() * std::mem::size_of::<Instance>();
            for v in &o.volumes {
                size += std::mem::size_of::<Volume>() + v.name.len();
                size += v.mesh.triangles.len() * std::mem::size_of::<[Vec3; 3]>();
            }
        }
        size
    }
    /// Bounding box of the whole scene footprint (selected placements).
    #[must_use]
    pub fn footprint(&self) -> BoundingBox {
        let mut bb = BoundingBox::default();
        for (o, i) in self.instances() {
            let hull = o.convex_hull_2d(&i.transform);
            for p in hull.points {
                bb.merge(p);
            }
        }
        bb
    }
}

fn hash_transform(t: &Transform3, h: &mut impl std::hash::Hasher) {
    for v in [t.translation, t.rotation, t.scale, t.mirror] {
        h.write_u64(v.x.to_bits());
        h.write_u64(v.y.to_bits());
        h.write_u64(v.z.to_bits());
    }
}

/// Which instances (and possibly the aux tower) the user has selected.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection {
    instances: hashbrown::HashMap<ObjectId, hashbrown::HashSet<InstanceId>>,
    pub aux_tower: bool,
}
impl Selection {
    pub fn clear(&mut self) {
        self.instances.clear();
        self.aux_tower = false;
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.aux_tower && self.instances.values().all(hashbrown::HashSet::is_empty)
    }
    pub fn add_instance(&mut self, object: ObjectId, instance: InstanceId) {
        self.instances.entry(object).or_default().insert(instance);
    }
    #[must_use]
    pub fn contains(&self, object: ObjectId, instance: InstanceId) -> bool {
        self.instances
            .get(&object)
            .is_some_and(|set| set.contains(&instance))
    }
    /// `Some(id)` when the selection covers instances of exactly one object.
    #[must_use]
    pub fn single_object(&self) -> Option<ObjectId> {
        let mut nonempty = self
            .instances
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(&id, _)| id);
        match (nonempty.next(), nonempty.next()) {
            (Some(id), None) if !self.aux_tower => Some(id),
            _ => None,
        }
    }
}

/// Opaque capture of the active tool/gizmo, restored verbatim by undo/redo.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GizmoState {
    pub active: Option<String>,
    pub payload: Vec<u8>,
}

/// Canned meshes and objects for tests. Not part of the editor surface.
pub mod testing {
    use super::*;

    /// A `size`-edged cube mesh resting on z = 0, centered on the z axis.
    #[must_use]
    pub fn cube_mesh(size: f64) -> Mesh {
        let s = size / 2.0;
        let v = |x: f64, y: f64, z: f64| Vec3::new(x * s, y * s, z * s + s);
        let corners = [
            v(-1.0, -1.0, -1.0),
            v(1.0, -1.0, -1.0),
            v(1.0, 1.0, -1.0),
            v(-1.0, 1.0, -1.0),
            v(-1.0, -1.0, 1.0),
            v(1.0, -1.0, 1.0),
            v(1.0, 1.0, 1.0),
            v(-1.0, 1.0, 1.0),
        ];
        // Two triangles per face, outward winding.
        let quads = [
            [0, 3, 2, 1], // bottom, normal -z
            [4, 5, 6, 7], // top, normal +z
            [0, 1, 5, 4],
            [1, 2, 6, 5],
            [2, 3, 7, 6],
            [3, 0, 4, 7],
        ];
        let mut triangles = Vec::with_capacity(12);
        for q in quads {
            triangles.push([corners[q[0]], corners[q[1]], corners[q[2]]]);
            triangles.push([corners[q[0]], corners[q[2]], corners[q[3]]]);
        }
        Mesh { triangles }
    }

    /// Object with a single cube volume and `instances` placed copies in a
    /// row along x, `spacing` apart.
    #[must_use]
    pub fn cube_object(size: f64, instances: usize, spacing: f64) -> Object {
        let mut o = Object::new("cube");
        o.volumes.push(Volume::new("cube", cube_mesh(size)));
        for n in 0..instances {
            let mut inst = Instance::default();
            inst.transform.translation.x = n as f64 * spacing;
            o.instances.push(inst);
        }
        o
    }
}
