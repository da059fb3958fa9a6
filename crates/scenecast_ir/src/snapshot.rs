//! Full-scene snapshots
//!
//! A snapshot is the shortest action sequence that rebuilds a scene from
//! empty. It is emitted in two phases:
//!
//! 1. Allocate every object, kind by kind in [`ObjectKind::ALLOCATION_ORDER`]
//!    and by ascending handle within a kind. Allocation-time links only
//!    point to kinds allocated earlier.
//! 2. Emit properties and links per object in handle order. Only values
//!    that differ from the allocation defaults are emitted.

use std::sync::Arc;

use crate::action::{ObjectKind, Projection, SceneAction, Visibility};
use crate::error::ActionError;
use crate::flush::{Flush, FlushKind, FlushMode, FlushTimeInformation};
use crate::ids::{SceneId, SceneVersionTag};
use crate::scene::{NodeData, RenderPassData, Scene, SceneObject};

impl Scene {
    /// Build the action sequence that reconstructs this scene
    pub fn to_actions(&self) -> Vec<SceneAction> {
        let mut actions = Vec::with_capacity(self.len() * 2);

        for kind in ObjectKind::ALLOCATION_ORDER {
            for (handle, object) in self.iter().filter(|(_, o)| o.kind() == kind) {
                actions.push(allocation(handle, object));
            }
        }

        for (handle, object) in self.iter() {
            match object {
                SceneObject::Node(node) => {
                    if node.translation != [0.0; 3] {
                        actions.push(SceneAction::SetTranslation {
                            node: handle,
                            value: node.translation,
                        });
                    }
                    if node.rotation != NodeData::IDENTITY_ROTATION {
                        actions.push(SceneAction::SetRotation {
                            node: handle,
                            value: node.rotation,
                        });
                    }
                    if node.scaling != NodeData::UNIT_SCALING {
                        actions.push(SceneAction::SetScaling {
                            node: handle,
                            value: node.scaling,
                        });
                    }
                    if node.visibility != Visibility::Visible {
                        actions.push(SceneAction::SetVisibility {
                            node: handle,
                            visibility: node.visibility,
                        });
                    }
                    for child in &node.children {
                        actions.push(SceneAction::AddChildToNode {
                            parent: handle,
                            child: *child,
                        });
                    }
                }
                SceneObject::Camera(camera) => {
                    if camera.projection != Projection::default() {
                        actions.push(SceneAction::SetCameraProjection {
                            camera: handle,
                            projection: camera.projection,
                        });
                    }
                }
                SceneObject::Appearance(appearance) => {
                    for (name, value) in &appearance.uniforms {
                        actions.push(SceneAction::SetAppearanceUniform {
                            appearance: handle,
                            name: name.clone(),
                            value: *value,
                        });
                    }
                }
                SceneObject::Renderable(renderable) => {
                    if renderable.indices.is_some() || !renderable.vertices.is_empty() {
                        actions.push(SceneAction::SetRenderableResources {
                            renderable: handle,
                            indices: renderable.indices,
                            vertices: renderable.vertices.clone(),
                        });
                    }
                    if let Some(appearance) = renderable.appearance {
                        actions.push(SceneAction::SetRenderableAppearance {
                            renderable: handle,
                            appearance,
                        });
                    }
                    if (renderable.start_index, renderable.index_count, renderable.instance_count)
                        != (0, 0, 1)
                    {
                        actions.push(SceneAction::SetRenderableRange {
                            renderable: handle,
                            start_index: renderable.start_index,
                            index_count: renderable.index_count,
                            instance_count: renderable.instance_count,
                        });
                    }
                }
                SceneObject::RenderGroup(group) => {
                    for (renderable, order) in &group.renderables {
                        actions.push(SceneAction::AddRenderableToRenderGroup {
                            group: handle,
                            renderable: *renderable,
                            order: *order,
                        });
                    }
                }
                SceneObject::RenderPass(pass) => {
                    let defaults = RenderPassData::default();
                    if let Some(camera) = pass.camera {
                        actions.push(SceneAction::SetRenderPassCamera { pass: handle, camera });
                    }
                    if pass.clear_color != defaults.clear_color {
                        actions.push(SceneAction::SetRenderPassClearColor {
                            pass: handle,
                            color: pass.clear_color,
                        });
                    }
                    if pass.enabled != defaults.enabled {
                        actions.push(SceneAction::SetRenderPassEnabled {
                            pass: handle,
                            enabled: pass.enabled,
                        });
                    }
                    if pass.render_order != defaults.render_order {
                        actions.push(SceneAction::SetRenderPassRenderOrder {
                            pass: handle,
                            order: pass.render_order,
                        });
                    }
                    for (group, order) in &pass.groups {
                        actions.push(SceneAction::AddRenderGroupToRenderPass {
                            pass: handle,
                            group: *group,
                            order: *order,
                        });
                    }
                }
                SceneObject::TextureSampler(_) | SceneObject::DataBuffer(_) => {}
            }
        }

        actions
    }

    /// Package the current state as a synthetic snapshot flush.
    ///
    /// Snapshots referencing resources wait for them, so a consumer never
    /// shows a half-resolved rebuild.
    pub fn snapshot_flush(
        &self,
        scene_id: SceneId,
        sequence: u64,
        version_tag: Option<SceneVersionTag>,
        time_info: FlushTimeInformation,
    ) -> Flush {
        let actions: Arc<[SceneAction]> = self.to_actions().into();
        let resources: Vec<_> = self
            .referenced_resources()
            .into_iter()
            .filter(|hash| hash.is_valid())
            .collect();
        let mode = if resources.is_empty() {
            FlushMode::Immediate
        } else {
            FlushMode::WaitForResources
        };

        Flush {
            scene_id,
            sequence,
            kind: FlushKind::Snapshot,
            mode,
            version_tag,
            time_info,
            actions,
            resources,
            size_info: self.size_info(),
            counter_wrapped: false,
            epoch: 0,
        }
    }

    /// Rebuild a scene by replaying actions onto an empty table
    pub fn from_actions<'a>(
        actions: impl IntoIterator<Item = &'a SceneAction>,
    ) -> Result<Scene, ActionError> {
        let mut scene = Scene::new();
        scene.apply_all(actions)?;
        Ok(scene)
    }
}

fn allocation(handle: crate::ids::ObjectHandle, object: &SceneObject) -> SceneAction {
    match object {
        SceneObject::Node(node) => SceneAction::AllocateNode {
            handle,
            name: node.name.clone(),
        },
        SceneObject::Camera(camera) => SceneAction::AllocateCamera {
            handle,
            node: camera.node,
        },
        SceneObject::Appearance(appearance) => SceneAction::AllocateAppearance {
            handle,
            effect: appearance.effect,
        },
        SceneObject::Renderable(renderable) => SceneAction::AllocateRenderable {
            handle,
            node: renderable.node,
        },
        SceneObject::TextureSampler(sampler) => SceneAction::AllocateTextureSampler {
            handle,
            texture: sampler.texture,
            filter: sampler.filter,
        },
        SceneObject::RenderGroup(_) => SceneAction::AllocateRenderGroup { handle },
        SceneObject::RenderPass(_) => SceneAction::AllocateRenderPass { handle },
        SceneObject::DataBuffer(buffer) => SceneAction::AllocateDataBuffer {
            handle,
            data: buffer.data.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::UniformValue;
    use crate::ids::ObjectHandle;
    use scenecast_resource::ResourceHash;

    fn h(raw: u64) -> ObjectHandle {
        ObjectHandle::from_raw(raw)
    }

    #[test]
    fn test_empty_scene_snapshot() {
        assert!(Scene::new().to_actions().is_empty());
    }

    #[test]
    fn test_snapshot_rebuilds_equal_scene() {
        let effect = ResourceHash::new(1, 1);
        let texture = ResourceHash::new(2, 2);
        let actions = vec![
            // Higher handles allocated before the objects they link to
            SceneAction::AllocateRenderPass { handle: h(1) },
            SceneAction::AllocateRenderGroup { handle: h(2) },
            SceneAction::AllocateNode { handle: h(3), name: "root".into() },
            SceneAction::AllocateNode { handle: h(4), name: "mesh".into() },
            SceneAction::AddChildToNode { parent: h(3), child: h(4) },
            SceneAction::SetTranslation { node: h(4), value: [1.0, 2.0, 3.0] },
            SceneAction::AllocateCamera { handle: h(5), node: Some(h(3)) },
            SceneAction::SetRenderPassCamera { pass: h(1), camera: h(5) },
            SceneAction::AllocateTextureSampler {
                handle: h(6),
                texture,
                filter: Default::default(),
            },
            SceneAction::AllocateAppearance { handle: h(7), effect },
            SceneAction::SetAppearanceUniform {
                appearance: h(7),
                name: "u_tex".into(),
                value: UniformValue::Sampler(h(6)),
            },
            SceneAction::AllocateRenderable { handle: h(8), node: Some(h(4)) },
            SceneAction::SetRenderableAppearance { renderable: h(8), appearance: h(7) },
            SceneAction::SetRenderableRange {
                renderable: h(8),
                start_index: 0,
                index_count: 6,
                instance_count: 1,
            },
            SceneAction::AddRenderableToRenderGroup { group: h(2), renderable: h(8), order: 3 },
            SceneAction::AddRenderGroupToRenderPass { pass: h(1), group: h(2), order: 0 },
            SceneAction::SetRenderPassEnabled { pass: h(1), enabled: false },
        ];

        let scene = Scene::from_actions(&actions).unwrap();
        let snapshot = scene.to_actions();
        let rebuilt = Scene::from_actions(&snapshot).unwrap();

        assert_eq!(rebuilt, scene);
        assert_eq!(rebuilt.to_actions(), snapshot);
    }

    #[test]
    fn test_snapshot_after_release() {
        let actions = vec![
            SceneAction::AllocateNode { handle: h(1), name: "a".into() },
            SceneAction::AllocateNode { handle: h(2), name: "b".into() },
            SceneAction::AddChildToNode { parent: h(1), child: h(2) },
            SceneAction::AllocateCamera { handle: h(3), node: Some(h(1)) },
            SceneAction::ReleaseHandle { handle: h(1) },
        ];
        let scene = Scene::from_actions(&actions).unwrap();
        let rebuilt = Scene::from_actions(&scene.to_actions()).unwrap();
        assert_eq!(rebuilt, scene);
        assert!(!rebuilt.contains(h(1)));
    }

    #[test]
    fn test_snapshot_flush_metadata() {
        let effect = ResourceHash::new(4, 4);
        let scene = Scene::from_actions(&[
            SceneAction::AllocateNode { handle: h(1), name: "n".into() },
            SceneAction::AllocateAppearance { handle: h(2), effect },
        ])
        .unwrap();

        let flush = scene.snapshot_flush(SceneId::new(3), 7, None, FlushTimeInformation::default());
        assert!(flush.is_snapshot());
        assert_eq!(flush.sequence, 7);
        assert_eq!(flush.mode, FlushMode::WaitForResources);
        assert_eq!(flush.resources, vec![effect]);
        assert_eq!(flush.size_info.total(), 2);

        let empty = Scene::new().snapshot_flush(SceneId::new(3), 0, None, Default::default());
        assert!(empty.is_empty());
        assert_eq!(empty.mode, FlushMode::Immediate);
    }
}
