//! Scene actions - typed, replayable mutation records
//!
//! Every change to a scene is captured as one [`SceneAction`]. Actions
//! reference other objects only by [`ObjectHandle`] and external data only
//! by [`ResourceHash`]. Each variant has a stable numeric [`ActionOpcode`]
//! used on the wire.

use scenecast_resource::ResourceHash;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::ObjectHandle;

/// Kind of object living in a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Node,
    Camera,
    Appearance,
    Renderable,
    TextureSampler,
    RenderGroup,
    RenderPass,
    DataBuffer,
}

impl ObjectKind {
    /// All kinds, in the order snapshots allocate them.
    ///
    /// Kinds only link to kinds earlier in this list (node hierarchy aside).
    pub const ALLOCATION_ORDER: [ObjectKind; 8] = [
        ObjectKind::Node,
        ObjectKind::DataBuffer,
        ObjectKind::TextureSampler,
        ObjectKind::Appearance,
        ObjectKind::Camera,
        ObjectKind::Renderable,
        ObjectKind::RenderGroup,
        ObjectKind::RenderPass,
    ];

    /// Get the kind name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Node => "Node",
            Self::Camera => "Camera",
            Self::Appearance => "Appearance",
            Self::Renderable => "Renderable",
            Self::TextureSampler => "TextureSampler",
            Self::RenderGroup => "RenderGroup",
            Self::RenderPass => "RenderPass",
            Self::DataBuffer => "DataBuffer",
        }
    }

    /// Whether objects of this kind can take part in the node hierarchy
    pub fn is_parentable(&self) -> bool {
        matches!(self, Self::Node)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Node visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Visible,
    /// Not drawn, but resources stay uploaded
    Invisible,
    /// Not drawn, resources may be unloaded
    Off,
}

/// Camera projection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Self::Perspective {
            fov_y: 45.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// Value bound to an appearance uniform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    /// Texture sampler object
    Sampler(ObjectHandle),
}

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
    Trilinear,
}

/// Stable wire opcodes.
///
/// Values are never reassigned. New actions get new numbers so older
/// consumers can skip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum ActionOpcode {
    AllocateNode = 1,
    AddChildToNode = 2,
    RemoveChildFromNode = 3,
    SetTranslation = 4,
    SetRotation = 5,
    SetScaling = 6,
    SetVisibility = 7,

    AllocateCamera = 20,
    SetCameraProjection = 21,

    AllocateAppearance = 30,
    SetAppearanceUniform = 31,

    AllocateRenderable = 40,
    SetRenderableResources = 41,
    SetRenderableAppearance = 42,
    SetRenderableRange = 43,

    AllocateTextureSampler = 50,

    AllocateRenderGroup = 60,
    AddRenderableToRenderGroup = 61,
    RemoveRenderableFromRenderGroup = 62,

    AllocateRenderPass = 70,
    SetRenderPassCamera = 71,
    SetRenderPassClearColor = 72,
    SetRenderPassEnabled = 73,
    SetRenderPassRenderOrder = 74,
    AddRenderGroupToRenderPass = 75,
    RemoveRenderGroupFromRenderPass = 76,

    AllocateDataBuffer = 80,
    UpdateDataBuffer = 81,

    ReleaseHandle = 100,
}

impl ActionOpcode {
    /// Every known opcode
    pub const ALL: [ActionOpcode; 29] = [
        Self::AllocateNode,
        Self::AddChildToNode,
        Self::RemoveChildFromNode,
        Self::SetTranslation,
        Self::SetRotation,
        Self::SetScaling,
        Self::SetVisibility,
        Self::AllocateCamera,
        Self::SetCameraProjection,
        Self::AllocateAppearance,
        Self::SetAppearanceUniform,
        Self::AllocateRenderable,
        Self::SetRenderableResources,
        Self::SetRenderableAppearance,
        Self::SetRenderableRange,
        Self::AllocateTextureSampler,
        Self::AllocateRenderGroup,
        Self::AddRenderableToRenderGroup,
        Self::RemoveRenderableFromRenderGroup,
        Self::AllocateRenderPass,
        Self::SetRenderPassCamera,
        Self::SetRenderPassClearColor,
        Self::SetRenderPassEnabled,
        Self::SetRenderPassRenderOrder,
        Self::AddRenderGroupToRenderPass,
        Self::RemoveRenderGroupFromRenderPass,
        Self::AllocateDataBuffer,
        Self::UpdateDataBuffer,
        Self::ReleaseHandle,
    ];

    /// Decode a raw opcode. Unknown values return `None`.
    pub fn from_u16(raw: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u16 == raw)
    }
}

/// A required live handle, optionally of a specific kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRequirement {
    pub handle: ObjectHandle,
    /// `None` accepts any kind
    pub kind: Option<ObjectKind>,
}

impl HandleRequirement {
    fn of(handle: ObjectHandle, kind: ObjectKind) -> Self {
        Self {
            handle,
            kind: Some(kind),
        }
    }
}

/// A single scene mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SceneAction {
    AllocateNode {
        handle: ObjectHandle,
        name: String,
    },
    AddChildToNode {
        parent: ObjectHandle,
        child: ObjectHandle,
    },
    RemoveChildFromNode {
        parent: ObjectHandle,
        child: ObjectHandle,
    },
    SetTranslation {
        node: ObjectHandle,
        value: [f32; 3],
    },
    /// Rotation as a quaternion (x, y, z, w)
    SetRotation {
        node: ObjectHandle,
        value: [f32; 4],
    },
    SetScaling {
        node: ObjectHandle,
        value: [f32; 3],
    },
    SetVisibility {
        node: ObjectHandle,
        visibility: Visibility,
    },

    AllocateCamera {
        handle: ObjectHandle,
        node: Option<ObjectHandle>,
    },
    SetCameraProjection {
        camera: ObjectHandle,
        projection: Projection,
    },

    AllocateAppearance {
        handle: ObjectHandle,
        effect: ResourceHash,
    },
    SetAppearanceUniform {
        appearance: ObjectHandle,
        name: String,
        value: UniformValue,
    },

    AllocateRenderable {
        handle: ObjectHandle,
        node: Option<ObjectHandle>,
    },
    SetRenderableResources {
        renderable: ObjectHandle,
        indices: Option<ResourceHash>,
        vertices: Vec<ResourceHash>,
    },
    SetRenderableAppearance {
        renderable: ObjectHandle,
        appearance: ObjectHandle,
    },
    SetRenderableRange {
        renderable: ObjectHandle,
        start_index: u32,
        index_count: u32,
        instance_count: u32,
    },

    AllocateTextureSampler {
        handle: ObjectHandle,
        texture: ResourceHash,
        filter: TextureFilter,
    },

    AllocateRenderGroup {
        handle: ObjectHandle,
    },
    AddRenderableToRenderGroup {
        group: ObjectHandle,
        renderable: ObjectHandle,
        order: i32,
    },
    RemoveRenderableFromRenderGroup {
        group: ObjectHandle,
        renderable: ObjectHandle,
    },

    AllocateRenderPass {
        handle: ObjectHandle,
    },
    SetRenderPassCamera {
        pass: ObjectHandle,
        camera: ObjectHandle,
    },
    SetRenderPassClearColor {
        pass: ObjectHandle,
        color: [f32; 4],
    },
    SetRenderPassEnabled {
        pass: ObjectHandle,
        enabled: bool,
    },
    SetRenderPassRenderOrder {
        pass: ObjectHandle,
        order: i32,
    },
    AddRenderGroupToRenderPass {
        pass: ObjectHandle,
        group: ObjectHandle,
        order: i32,
    },
    RemoveRenderGroupFromRenderPass {
        pass: ObjectHandle,
        group: ObjectHandle,
    },

    /// Small data embedded directly in the action stream
    AllocateDataBuffer {
        handle: ObjectHandle,
        data: Vec<u8>,
    },
    UpdateDataBuffer {
        buffer: ObjectHandle,
        offset: u32,
        data: Vec<u8>,
    },

    ReleaseHandle {
        handle: ObjectHandle,
    },
}

impl SceneAction {
    /// Get the wire opcode
    pub fn opcode(&self) -> ActionOpcode {
        match self {
            Self::AllocateNode { .. } => ActionOpcode::AllocateNode,
            Self::AddChildToNode { .. } => ActionOpcode::AddChildToNode,
            Self::RemoveChildFromNode { .. } => ActionOpcode::RemoveChildFromNode,
            Self::SetTranslation { .. } => ActionOpcode::SetTranslation,
            Self::SetRotation { .. } => ActionOpcode::SetRotation,
            Self::SetScaling { .. } => ActionOpcode::SetScaling,
            Self::SetVisibility { .. } => ActionOpcode::SetVisibility,
            Self::AllocateCamera { .. } => ActionOpcode::AllocateCamera,
            Self::SetCameraProjection { .. } => ActionOpcode::SetCameraProjection,
            Self::AllocateAppearance { .. } => ActionOpcode::AllocateAppearance,
            Self::SetAppearanceUniform { .. } => ActionOpcode::SetAppearanceUniform,
            Self::AllocateRenderable { .. } => ActionOpcode::AllocateRenderable,
            Self::SetRenderableResources { .. } => ActionOpcode::SetRenderableResources,
            Self::SetRenderableAppearance { .. } => ActionOpcode::SetRenderableAppearance,
            Self::SetRenderableRange { .. } => ActionOpcode::SetRenderableRange,
            Self::AllocateTextureSampler { .. } => ActionOpcode::AllocateTextureSampler,
            Self::AllocateRenderGroup { .. } => ActionOpcode::AllocateRenderGroup,
            Self::AddRenderableToRenderGroup { .. } => ActionOpcode::AddRenderableToRenderGroup,
            Self::RemoveRenderableFromRenderGroup { .. } => {
                ActionOpcode::RemoveRenderableFromRenderGroup
            }
            Self::AllocateRenderPass { .. } => ActionOpcode::AllocateRenderPass,
            Self::SetRenderPassCamera { .. } => ActionOpcode::SetRenderPassCamera,
            Self::SetRenderPassClearColor { .. } => ActionOpcode::SetRenderPassClearColor,
            Self::SetRenderPassEnabled { .. } => ActionOpcode::SetRenderPassEnabled,
            Self::SetRenderPassRenderOrder { .. } => ActionOpcode::SetRenderPassRenderOrder,
            Self::AddRenderGroupToRenderPass { .. } => ActionOpcode::AddRenderGroupToRenderPass,
            Self::RemoveRenderGroupFromRenderPass { .. } => {
                ActionOpcode::RemoveRenderGroupFromRenderPass
            }
            Self::AllocateDataBuffer { .. } => ActionOpcode::AllocateDataBuffer,
            Self::UpdateDataBuffer { .. } => ActionOpcode::UpdateDataBuffer,
            Self::ReleaseHandle { .. } => ActionOpcode::ReleaseHandle,
        }
    }

    /// The handle and kind this action brings to life, if any
    pub fn allocated(&self) -> Option<(ObjectHandle, ObjectKind)> {
        match self {
            Self::AllocateNode { handle, .. } => Some((*handle, ObjectKind::Node)),
            Self::AllocateCamera { handle, .. } => Some((*handle, ObjectKind::Camera)),
            Self::AllocateAppearance { handle, .. } => Some((*handle, ObjectKind::Appearance)),
            Self::AllocateRenderable { handle, .. } => Some((*handle, ObjectKind::Renderable)),
            Self::AllocateTextureSampler { handle, .. } => {
                Some((*handle, ObjectKind::TextureSampler))
            }
            Self::AllocateRenderGroup { handle } => Some((*handle, ObjectKind::RenderGroup)),
            Self::AllocateRenderPass { handle } => Some((*handle, ObjectKind::RenderPass)),
            Self::AllocateDataBuffer { handle, .. } => Some((*handle, ObjectKind::DataBuffer)),
            _ => None,
        }
    }

    /// The handle this action releases, if any
    pub fn released(&self) -> Option<ObjectHandle> {
        match self {
            Self::ReleaseHandle { handle } => Some(*handle),
            _ => None,
        }
    }

    /// Handles that must be live (with the given kind) for this action to apply
    pub fn required_handles(&self) -> Vec<HandleRequirement> {
        use HandleRequirement as R;
        use ObjectKind as K;

        match self {
            Self::AllocateNode { .. }
            | Self::AllocateAppearance { .. }
            | Self::AllocateTextureSampler { .. }
            | Self::AllocateRenderGroup { .. }
            | Self::AllocateRenderPass { .. }
            | Self::AllocateDataBuffer { .. } => Vec::new(),
            Self::AllocateCamera { node, .. } | Self::AllocateRenderable { node, .. } => {
                node.iter().map(|n| R::of(*n, K::Node)).collect()
            }
            Self::AddChildToNode { parent, child } | Self::RemoveChildFromNode { parent, child } => {
                vec![R::of(*parent, K::Node), R::of(*child, K::Node)]
            }
            Self::SetTranslation { node, .. }
            | Self::SetRotation { node, .. }
            | Self::SetScaling { node, .. }
            | Self::SetVisibility { node, .. } => vec![R::of(*node, K::Node)],
            Self::SetCameraProjection { camera, .. } => vec![R::of(*camera, K::Camera)],
            Self::SetAppearanceUniform {
                appearance, value, ..
            } => {
                let mut reqs = vec![R::of(*appearance, K::Appearance)];
                if let UniformValue::Sampler(sampler) = value {
                    reqs.push(R::of(*sampler, K::TextureSampler));
                }
                reqs
            }
            Self::SetRenderableResources { renderable, .. }
            | Self::SetRenderableRange { renderable, .. } => vec![R::of(*renderable, K::Renderable)],
            Self::SetRenderableAppearance {
                renderable,
                appearance,
            } => vec![R::of(*renderable, K::Renderable), R::of(*appearance, K::Appearance)],
            Self::AddRenderableToRenderGroup {
                group, renderable, ..
            }
            | Self::RemoveRenderableFromRenderGroup { group, renderable } => {
                vec![R::of(*group, K::RenderGroup), R::of(*renderable, K::Renderable)]
            }
            Self::SetRenderPassCamera { pass, camera } => {
                vec![R::of(*pass, K::RenderPass), R::of(*camera, K::Camera)]
            }
            Self::SetRenderPassClearColor { pass, .. }
            | Self::SetRenderPassEnabled { pass, .. }
            | Self::SetRenderPassRenderOrder { pass, .. } => vec![R::of(*pass, K::RenderPass)],
            Self::AddRenderGroupToRenderPass { pass, group, .. }
            | Self::RemoveRenderGroupFromRenderPass { pass, group } => {
                vec![R::of(*pass, K::RenderPass), R::of(*group, K::RenderGroup)]
            }
            Self::UpdateDataBuffer { buffer, .. } => vec![R::of(*buffer, K::DataBuffer)],
            Self::ReleaseHandle { handle } => vec![R {
                handle: *handle,
                kind: None,
            }],
        }
    }

    /// Every handle this action allocates, mutates or links to
    pub fn touched_handles(&self) -> Vec<ObjectHandle> {
        let mut handles: Vec<ObjectHandle> = self
            .required_handles()
            .into_iter()
            .map(|req| req.handle)
            .collect();
        if let Some((handle, _)) = self.allocated() {
            handles.push(handle);
        }
        handles
    }

    /// Resources this action references by hash
    pub fn resource_hashes(&self) -> Vec<ResourceHash> {
        match self {
            Self::AllocateAppearance { effect, .. } => vec![*effect],
            Self::AllocateTextureSampler { texture, .. } => vec![*texture],
            Self::SetRenderableResources {
                indices, vertices, ..
            } => indices.iter().chain(vertices.iter()).copied().collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for SceneAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles: Vec<String> = self.touched_handles().iter().map(|h| h.to_string()).collect();
        write!(f, "{:?}[{}]", self.opcode(), handles.join(","))
    }
}
