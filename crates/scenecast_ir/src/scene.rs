//! Scene arena - the object table actions are replayed onto
//!
//! A [`Scene`] owns every object. Links between objects are plain handles
//! that are scrubbed when the referenced object is released, so the table
//! never holds a dangling link. Iteration is in handle order, which keeps
//! equal action sequences producing equal scenes.

use scenecast_resource::ResourceHash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::action::{ObjectKind, Projection, SceneAction, TextureFilter, UniformValue, Visibility};
use crate::error::ActionError;
use crate::ids::ObjectHandle;

/// Transform node in the scene hierarchy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeData {
    pub name: String,
    pub parent: Option<ObjectHandle>,
    pub children: Vec<ObjectHandle>,
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
    pub scaling: [f32; 3],
    pub visibility: Visibility,
}

impl NodeData {
    pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
    pub const UNIT_SCALING: [f32; 3] = [1.0, 1.0, 1.0];

    fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            translation: [0.0; 3],
            rotation: Self::IDENTITY_ROTATION,
            scaling: Self::UNIT_SCALING,
            visibility: Visibility::Visible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraData {
    pub node: Option<ObjectHandle>,
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppearanceData {
    pub effect: ResourceHash,
    pub uniforms: BTreeMap<String, UniformValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderableData {
    pub node: Option<ObjectHandle>,
    pub appearance: Option<ObjectHandle>,
    pub indices: Option<ResourceHash>,
    pub vertices: Vec<ResourceHash>,
    pub start_index: u32,
    pub index_count: u32,
    pub instance_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextureSamplerData {
    pub texture: ResourceHash,
    pub filter: TextureFilter,
}

/// Ordered set of renderables, each with a render order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderGroupData {
    pub renderables: Vec<(ObjectHandle, i32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPassData {
    pub camera: Option<ObjectHandle>,
    pub clear_color: [f32; 4],
    pub enabled: bool,
    pub render_order: i32,
    pub groups: Vec<(ObjectHandle, i32)>,
}

impl Default for RenderPassData {
    fn default() -> Self {
        Self {
            camera: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            enabled: true,
            render_order: 0,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataBufferData {
    pub data: Vec<u8>,
}

/// An object owned by a scene
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum SceneObject {
    Node(NodeData),
    Camera(CameraData),
    Appearance(AppearanceData),
    Renderable(RenderableData),
    TextureSampler(TextureSamplerData),
    RenderGroup(RenderGroupData),
    RenderPass(RenderPassData),
    DataBuffer(DataBufferData),
}

impl SceneObject {
    /// Get the object kind
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Node(_) => ObjectKind::Node,
            Self::Camera(_) => ObjectKind::Camera,
            Self::Appearance(_) => ObjectKind::Appearance,
            Self::Renderable(_) => ObjectKind::Renderable,
            Self::TextureSampler(_) => ObjectKind::TextureSampler,
            Self::RenderGroup(_) => ObjectKind::RenderGroup,
            Self::RenderPass(_) => ObjectKind::RenderPass,
            Self::DataBuffer(_) => ObjectKind::DataBuffer,
        }
    }

    /// Drop every link to `handle`
    fn scrub(&mut self, handle: ObjectHandle) {
        match self {
            Self::Node(node) => {
                if node.parent == Some(handle) {
                    node.parent = None;
                }
                node.children.retain(|c| *c != handle);
            }
            Self::Camera(camera) => {
                if camera.node == Some(handle) {
                    camera.node = None;
                }
            }
            Self::Appearance(appearance) => {
                appearance
                    .uniforms
                    .retain(|_, value| *value != UniformValue::Sampler(handle));
            }
            Self::Renderable(renderable) => {
                if renderable.node == Some(handle) {
                    renderable.node = None;
                }
                if renderable.appearance == Some(handle) {
                    renderable.appearance = None;
                }
            }
            Self::RenderGroup(group) => group.renderables.retain(|(r, _)| *r != handle),
            Self::RenderPass(pass) => {
                if pass.camera == Some(handle) {
                    pass.camera = None;
                }
                pass.groups.retain(|(g, _)| *g != handle);
            }
            Self::TextureSampler(_) | Self::DataBuffer(_) => {}
        }
    }

    fn resource_hashes(&self, out: &mut BTreeSet<ResourceHash>) {
        match self {
            Self::Appearance(appearance) => {
                out.insert(appearance.effect);
            }
            Self::TextureSampler(sampler) => {
                out.insert(sampler.texture);
            }
            Self::Renderable(renderable) => {
                out.extend(renderable.indices);
                out.extend(renderable.vertices.iter().copied());
            }
            _ => {}
        }
    }
}

/// Number of live objects per kind, used to preallocate on the receiving side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSizeInfo {
    pub nodes: u32,
    pub cameras: u32,
    pub appearances: u32,
    pub renderables: u32,
    pub texture_samplers: u32,
    pub render_groups: u32,
    pub render_passes: u32,
    pub data_buffers: u32,
}

impl SceneSizeInfo {
    fn count(&mut self, kind: ObjectKind) {
        let slot = match kind {
            ObjectKind::Node => &mut self.nodes,
            ObjectKind::Camera => &mut self.cameras,
            ObjectKind::Appearance => &mut self.appearances,
            ObjectKind::Renderable => &mut self.renderables,
            ObjectKind::TextureSampler => &mut self.texture_samplers,
            ObjectKind::RenderGroup => &mut self.render_groups,
            ObjectKind::RenderPass => &mut self.render_passes,
            ObjectKind::DataBuffer => &mut self.data_buffers,
        };
        *slot += 1;
    }

    /// Total number of objects
    pub fn total(&self) -> u32 {
        self.nodes
            + self.cameras
            + self.appearances
            + self.renderables
            + self.texture_samplers
            + self.render_groups
            + self.render_passes
            + self.data_buffers
    }
}

/// The object table of one scene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    objects: BTreeMap<ObjectHandle, SceneObject>,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one action. On error the scene is left unchanged.
    pub fn apply(&mut self, action: &SceneAction) -> Result<(), ActionError> {
        self.check(action)?;
        self.mutate(action);
        Ok(())
    }

    /// Apply actions in order, stopping at the first error
    pub fn apply_all<'a>(
        &mut self,
        actions: impl IntoIterator<Item = &'a SceneAction>,
    ) -> Result<(), ActionError> {
        for action in actions {
            self.apply(action)?;
        }
        Ok(())
    }

    /// Validate an action against the current state without applying it
    pub fn check(&self, action: &SceneAction) -> Result<(), ActionError> {
        if let Some((handle, _)) = action.allocated() {
            if !handle.is_valid() {
                return Err(ActionError::InvalidHandle(handle));
            }
            if self.objects.contains_key(&handle) {
                return Err(ActionError::AlreadyAllocated(handle));
            }
        }

        for req in action.required_handles() {
            let object = self
                .objects
                .get(&req.handle)
                .ok_or(ActionError::UnknownHandle(req.handle))?;
            if let Some(expected) = req.kind {
                if object.kind() != expected {
                    return Err(ActionError::WrongKind {
                        handle: req.handle,
                        expected,
                        actual: object.kind(),
                    });
                }
            }
        }

        match action {
            SceneAction::AddChildToNode { parent, child } => {
                if let Some(current) = self.node(*child).and_then(|n| n.parent) {
                    return Err(ActionError::AlreadyParented {
                        child: *child,
                        parent: current,
                    });
                }
                if parent == child || self.is_ancestor(*child, *parent) {
                    return Err(ActionError::CycleDetected {
                        parent: *parent,
                        child: *child,
                    });
                }
            }
            SceneAction::RemoveChildFromNode { parent, child } => {
                if self.node(*child).and_then(|n| n.parent) != Some(*parent) {
                    return Err(ActionError::NotAChild {
                        parent: *parent,
                        child: *child,
                    });
                }
            }
            SceneAction::AddRenderableToRenderGroup {
                group, renderable, ..
            } => {
                if self.group_contains(*group, *renderable) {
                    return Err(ActionError::AlreadyMember {
                        container: *group,
                        member: *renderable,
                    });
                }
            }
            SceneAction::RemoveRenderableFromRenderGroup { group, renderable } => {
                if !self.group_contains(*group, *renderable) {
                    return Err(ActionError::NotAMember {
                        container: *group,
                        member: *renderable,
                    });
                }
            }
            SceneAction::AddRenderGroupToRenderPass { pass, group, .. } => {
                if self.pass_contains(*pass, *group) {
                    return Err(ActionError::AlreadyMember {
                        container: *pass,
                        member: *group,
                    });
                }
            }
            SceneAction::RemoveRenderGroupFromRenderPass { pass, group } => {
                if !self.pass_contains(*pass, *group) {
                    return Err(ActionError::NotAMember {
                        container: *pass,
                        member: *group,
                    });
                }
            }
            SceneAction::UpdateDataBuffer { buffer, offset, .. } => {
                let size = match self.objects.get(buffer) {
                    Some(SceneObject::DataBuffer(data)) => data.data.len(),
                    _ => 0,
                };
                if *offset as usize > size {
                    return Err(ActionError::OutOfBounds {
                        buffer: *buffer,
                        offset: *offset,
                        size,
                    });
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn mutate(&mut self, action: &SceneAction) {
        match action {
            SceneAction::AllocateNode { handle, name } => {
                self.objects
                    .insert(*handle, SceneObject::Node(NodeData::new(name.clone())));
            }
            SceneAction::AddChildToNode { parent, child } => {
                if let Some(SceneObject::Node(node)) = self.objects.get_mut(child) {
                    node.parent = Some(*parent);
                }
                if let Some(SceneObject::Node(node)) = self.objects.get_mut(parent) {
                    node.children.push(*child);
                }
            }
            SceneAction::RemoveChildFromNode { parent, child } => {
                if let Some(SceneObject::Node(node)) = self.objects.get_mut(child) {
                    node.parent = None;
                }
                if let Some(SceneObject::Node(node)) = self.objects.get_mut(parent) {
                    node.children.retain(|c| c != child);
                }
            }
            SceneAction::SetTranslation { node, value } => {
                if let Some(SceneObject::Node(data)) = self.objects.get_mut(node) {
                    data.translation = *value;
                }
            }
            SceneAction::SetRotation { node, value } => {
                if let Some(SceneObject::Node(data)) = self.objects.get_mut(node) {
                    data.rotation = *value;
                }
            }
            SceneAction::SetScaling { node, value } => {
                if let Some(SceneObject::Node(data)) = self.objects.get_mut(node) {
                    data.scaling = *value;
                }
            }
            SceneAction::SetVisibility { node, visibility } => {
                if let Some(SceneObject::Node(data)) = self.objects.get_mut(node) {
                    data.visibility = *visibility;
                }
            }
            SceneAction::AllocateCamera { handle, node } => {
                self.objects.insert(
                    *handle,
                    SceneObject::Camera(CameraData {
                        node: *node,
                        projection: Projection::default(),
                    }),
                );
            }
            SceneAction::SetCameraProjection { camera, projection } => {
                if let Some(SceneObject::Camera(data)) = self.objects.get_mut(camera) {
                    data.projection = *projection;
                }
            }
            SceneAction::AllocateAppearance { handle, effect } => {
                self.objects.insert(
                    *handle,
                    SceneObject::Appearance(AppearanceData {
                        effect: *effect,
                        uniforms: BTreeMap::new(),
                    }),
                );
            }
            SceneAction::SetAppearanceUniform {
                appearance,
                name,
                value,
            } => {
                if let Some(SceneObject::Appearance(data)) = self.objects.get_mut(appearance) {
                    data.uniforms.insert(name.clone(), *value);
                }
            }
            SceneAction::AllocateRenderable { handle, node } => {
                self.objects.insert(
                    *handle,
                    SceneObject::Renderable(RenderableData {
                        node: *node,
                        appearance: None,
                        indices: None,
                        vertices: Vec::new(),
                        start_index: 0,
                        index_count: 0,
                        instance_count: 1,
                    }),
                );
            }
            SceneAction::SetRenderableResources {
                renderable,
                indices,
                vertices,
            } => {
                if let Some(SceneObject::Renderable(data)) = self.objects.get_mut(renderable) {
                    data.indices = *indices;
                    data.vertices = vertices.clone();
                }
            }
            SceneAction::SetRenderableAppearance {
                renderable,
                appearance,
            } => {
                if let Some(SceneObject::Renderable(data)) = self.objects.get_mut(renderable) {
                    data.appearance = Some(*appearance);
                }
            }
            SceneAction::SetRenderableRange {
                renderable,
                start_index,
                index_count,
                instance_count,
            } => {
                if let Some(SceneObject::Renderable(data)) = self.objects.get_mut(renderable) {
                    data.start_index = *start_index;
                    data.index_count = *index_count;
                    data.instance_count = *instance_count;
                }
            }
            SceneAction::AllocateTextureSampler {
                handle,
                texture,
                filter,
            } => {
                self.objects.insert(
                    *handle,
                    SceneObject::TextureSampler(TextureSamplerData {
                        texture: *texture,
                        filter: *filter,
                    }),
                );
            }
            SceneAction::AllocateRenderGroup { handle } => {
                self.objects
                    .insert(*handle, SceneObject::RenderGroup(RenderGroupData::default()));
            }
            SceneAction::AddRenderableToRenderGroup {
                group,
                renderable,
                order,
            } => {
                if let Some(SceneObject::RenderGroup(data)) = self.objects.get_mut(group) {
                    data.renderables.push((*renderable, *order));
                }
            }
            SceneAction::RemoveRenderableFromRenderGroup { group, renderable } => {
                if let Some(SceneObject::RenderGroup(data)) = self.objects.get_mut(group) {
                    data.renderables.retain(|(r, _)| r != renderable);
                }
            }
            SceneAction::AllocateRenderPass { handle } => {
                self.objects
                    .insert(*handle, SceneObject::RenderPass(RenderPassData::default()));
            }
            SceneAction::SetRenderPassCamera { pass, camera } => {
                if let Some(SceneObject::RenderPass(data)) = self.objects.get_mut(pass) {
                    data.camera = Some(*camera);
                }
            }
            SceneAction::SetRenderPassClearColor { pass, color } => {
                if let Some(SceneObject::RenderPass(data)) = self.objects.get_mut(pass) {
                    data.clear_color = *color;
                }
            }
            SceneAction::SetRenderPassEnabled { pass, enabled } => {
                if let Some(SceneObject::RenderPass(data)) = self.objects.get_mut(pass) {
                    data.enabled = *enabled;
                }
            }
            SceneAction::SetRenderPassRenderOrder { pass, order } => {
                if let Some(SceneObject::RenderPass(data)) = self.objects.get_mut(pass) {
                    data.render_order = *order;
                }
            }
            SceneAction::AddRenderGroupToRenderPass { pass, group, order } => {
                if let Some(SceneObject::RenderPass(data)) = self.objects.get_mut(pass) {
                    data.groups.push((*group, *order));
                }
            }
            SceneAction::RemoveRenderGroupFromRenderPass { pass, group } => {
                if let Some(SceneObject::RenderPass(data)) = self.objects.get_mut(pass) {
                    data.groups.retain(|(g, _)| g != group);
                }
            }
            SceneAction::AllocateDataBuffer { handle, data } => {
                self.objects.insert(
                    *handle,
                    SceneObject::DataBuffer(DataBufferData { data: data.clone() }),
                );
            }
            SceneAction::UpdateDataBuffer {
                buffer,
                offset,
                data,
            } => {
                if let Some(SceneObject::DataBuffer(buf)) = self.objects.get_mut(buffer) {
                    let start = *offset as usize;
                    let end = start + data.len();
                    if buf.data.len() < end {
                        buf.data.resize(end, 0);
                    }
                    buf.data[start..end].copy_from_slice(data);
                }
            }
            SceneAction::ReleaseHandle { handle } => {
                self.objects.remove(handle);
                for object in self.objects.values_mut() {
                    object.scrub(*handle);
                }
            }
        }
    }

    fn is_ancestor(&self, ancestor: ObjectHandle, mut node: ObjectHandle) -> bool {
        while let Some(parent) = self.node(node).and_then(|n| n.parent) {
            if parent == ancestor {
                return true;
            }
            node = parent;
        }
        false
    }

    fn group_contains(&self, group: ObjectHandle, renderable: ObjectHandle) -> bool {
        match self.objects.get(&group) {
            Some(SceneObject::RenderGroup(data)) => {
                data.renderables.iter().any(|(r, _)| *r == renderable)
            }
            _ => false,
        }
    }

    fn pass_contains(&self, pass: ObjectHandle, group: ObjectHandle) -> bool {
        match self.objects.get(&pass) {
            Some(SceneObject::RenderPass(data)) => data.groups.iter().any(|(g, _)| *g == group),
            _ => false,
        }
    }

    /// Get an object
    pub fn get(&self, handle: ObjectHandle) -> Option<&SceneObject> {
        self.objects.get(&handle)
    }

    /// Get a node
    pub fn node(&self, handle: ObjectHandle) -> Option<&NodeData> {
        match self.objects.get(&handle) {
            Some(SceneObject::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// Get a renderable
    pub fn renderable(&self, handle: ObjectHandle) -> Option<&RenderableData> {
        match self.objects.get(&handle) {
            Some(SceneObject::Renderable(renderable)) => Some(renderable),
            _ => None,
        }
    }

    /// Check whether a handle is live
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Kind of a live handle
    pub fn kind_of(&self, handle: ObjectHandle) -> Option<ObjectKind> {
        self.objects.get(&handle).map(SceneObject::kind)
    }

    /// Iterate objects in handle order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &SceneObject)> {
        self.objects.iter().map(|(h, o)| (*h, o))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove every object
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// All resource hashes referenced by live objects
    pub fn referenced_resources(&self) -> BTreeSet<ResourceHash> {
        let mut hashes = BTreeSet::new();
        for object in self.objects.values() {
            object.resource_hashes(&mut hashes);
        }
        hashes
    }

    /// Object counts per kind
    pub fn size_info(&self) -> SceneSizeInfo {
        let mut info = SceneSizeInfo::default();
        for object in self.objects.values() {
            info.count(object.kind());
        }
        info
    }

    /// Human-readable JSON dump of the object table
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            handle: u64,
            object: &'a SceneObject,
        }

        let entries: Vec<Entry<'_>> = self
            .objects
            .iter()
            .map(|(handle, object)| Entry {
                handle: handle.raw(),
                object,
            })
            .collect();
        serde_json::to_string_pretty(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(raw: u64) -> ObjectHandle {
        ObjectHandle::from_raw(raw)
    }

    fn node(raw: u64) -> SceneAction {
        SceneAction::AllocateNode {
            handle: h(raw),
            name: format!("n{}", raw),
        }
    }

    #[test]
    fn test_allocate_and_set_translation() {
        let mut scene = Scene::new();
        scene.apply(&node(1)).unwrap();
        scene
            .apply(&SceneAction::SetTranslation {
                node: h(1),
                value: [1.0, 2.0, 3.0],
            })
            .unwrap();

        assert_eq!(scene.node(h(1)).unwrap().translation, [1.0, 2.0, 3.0]);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn test_rejects_double_allocation_and_unknown_handle() {
        let mut scene = Scene::new();
        scene.apply(&node(1)).unwrap();
        assert_eq!(scene.apply(&node(1)), Err(ActionError::AlreadyAllocated(h(1))));
        assert_eq!(
            scene.apply(&SceneAction::ReleaseHandle { handle: h(9) }),
            Err(ActionError::UnknownHandle(h(9)))
        );
        assert_eq!(scene.apply(&node(0)), Err(ActionError::InvalidHandle(h(0))));
    }

    #[test]
    fn test_wrong_kind_leaves_scene_unchanged() {
        let mut scene = Scene::new();
        scene.apply(&SceneAction::AllocateRenderGroup { handle: h(1) }).unwrap();
        let before = scene.clone();

        let err = scene
            .apply(&SceneAction::SetTranslation {
                node: h(1),
                value: [0.0; 3],
            })
            .unwrap_err();
        assert!(matches!(err, ActionError::WrongKind { expected: ObjectKind::Node, .. }));
        assert_eq!(scene, before);
    }

    #[test]
    fn test_hierarchy_rules() {
        let mut scene = Scene::new();
        for i in 1..=3 {
            scene.apply(&node(i)).unwrap();
        }
        scene.apply(&SceneAction::AddChildToNode { parent: h(1), child: h(2) }).unwrap();
        scene.apply(&SceneAction::AddChildToNode { parent: h(2), child: h(3) }).unwrap();

        // 1 -> 2 -> 3; linking 1 under 3 closes a cycle
        assert!(matches!(
            scene.apply(&SceneAction::AddChildToNode { parent: h(3), child: h(1) }),
            Err(ActionError::CycleDetected { .. })
        ));
        assert!(matches!(
            scene.apply(&SceneAction::AddChildToNode { parent: h(1), child: h(3) }),
            Err(ActionError::AlreadyParented { .. })
        ));
        assert!(matches!(
            scene.apply(&SceneAction::RemoveChildFromNode { parent: h(1), child: h(3) }),
            Err(ActionError::NotAChild { .. })
        ));

        scene.apply(&SceneAction::RemoveChildFromNode { parent: h(2), child: h(3) }).unwrap();
        assert_eq!(scene.node(h(3)).unwrap().parent, None);
        assert!(scene.node(h(2)).unwrap().children.is_empty());
    }

    #[test]
    fn test_release_scrubs_links() {
        let mut scene = Scene::new();
        scene.apply(&node(1)).unwrap();
        scene.apply(&node(2)).unwrap();
        scene.apply(&SceneAction::AddChildToNode { parent: h(1), child: h(2) }).unwrap();
        scene
            .apply(&SceneAction::AllocateRenderable { handle: h(3), node: Some(h(2)) })
            .unwrap();
        scene.apply(&SceneAction::AllocateRenderGroup { handle: h(4) }).unwrap();
        scene
            .apply(&SceneAction::AddRenderableToRenderGroup {
                group: h(4),
                renderable: h(3),
                order: 0,
            })
            .unwrap();

        scene.apply(&SceneAction::ReleaseHandle { handle: h(2) }).unwrap();
        assert!(scene.node(h(1)).unwrap().children.is_empty());
        assert_eq!(scene.renderable(h(3)).unwrap().node, None);

        scene.apply(&SceneAction::ReleaseHandle { handle: h(3) }).unwrap();
        match scene.get(h(4)) {
            Some(SceneObject::RenderGroup(group)) => assert!(group.renderables.is_empty()),
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[test]
    fn test_data_buffer_update_grows() {
        let mut scene = Scene::new();
        scene
            .apply(&SceneAction::AllocateDataBuffer { handle: h(1), data: vec![1, 2] })
            .unwrap();
        scene
            .apply(&SceneAction::UpdateDataBuffer { buffer: h(1), offset: 1, data: vec![9, 9, 9] })
            .unwrap();
        match scene.get(h(1)) {
            Some(SceneObject::DataBuffer(buf)) => assert_eq!(buf.data, vec![1, 9, 9, 9]),
            other => panic!("unexpected object {:?}", other),
        }
        assert!(matches!(
            scene.apply(&SceneAction::UpdateDataBuffer { buffer: h(1), offset: 10, data: vec![] }),
            Err(ActionError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_referenced_resources_and_size_info() {
        let effect = ResourceHash::new(10, 0);
        let vertices = ResourceHash::new(11, 0);
        let mut scene = Scene::new();
        scene
            .apply(&SceneAction::AllocateAppearance { handle: h(1), effect })
            .unwrap();
        scene
            .apply(&SceneAction::AllocateRenderable { handle: h(2), node: None })
            .unwrap();
        scene
            .apply(&SceneAction::SetRenderableResources {
                renderable: h(2),
                indices: None,
                vertices: vec![vertices],
            })
            .unwrap();

        let resources: Vec<_> = scene.referenced_resources().into_iter().collect();
        assert_eq!(resources, vec![effect, vertices]);

        let info = scene.size_info();
        assert_eq!(info.appearances, 1);
        assert_eq!(info.renderables, 1);
        assert_eq!(info.total(), 2);
    }

    #[test]
    fn test_json_dump() {
        let mut scene = Scene::new();
        scene.apply(&node(7)).unwrap();
        let json = scene.to_json().unwrap();
        assert!(json.contains("\"handle\": 7"));
        assert!(json.contains("\"kind\": \"Node\""));
    }
}
