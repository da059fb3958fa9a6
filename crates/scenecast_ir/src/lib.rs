//! # Scenecast IR - Scene Actions, Action Log & Flush Protocol
//!
//! Scenes are never shipped as objects. Every mutation is captured as a
//! [`SceneAction`], recorded in a [`SceneActionLog`] and grouped into
//! sequence-numbered [`Flush`]es that consumers replay onto their own
//! [`Scene`] mirror.
//!
//! ## Architecture
//!
//! ```text
//! ClientScene::apply ──► SceneActionLog ──► flush() ──► Flush ──► encode_actions ──► wire
//!                                                                        │
//!                           Scene mirror ◄── Scene::apply ◄── decode_actions
//! ```
//!
//! ## Key Concepts
//!
//! - **SceneAction**: one typed mutation with a stable wire opcode
//! - **Flush**: an ordered, numbered batch of actions plus timing metadata
//! - **Snapshot**: a synthetic flush rebuilding a whole scene from empty
//! - **Scene**: the object arena actions are applied to, identical on both sides

pub mod action;
pub mod action_log;
pub mod client_scene;
pub mod codec;
pub mod error;
pub mod flush;
pub mod ids;
pub mod scene;
pub mod snapshot;

pub use action::{
    ActionOpcode, HandleRequirement, ObjectKind, Projection, SceneAction, TextureFilter,
    UniformValue, Visibility,
};
pub use client_scene::ClientScene;
pub use codec::{decode_actions, encode_actions, DecodedActions, ACTION_FORMAT_VERSION};
pub use error::{ActionError, CodecError, FlushError};
pub use flush::{
    collect_resources, wall_clock_ms, Flush, FlushKind, FlushMode, FlushOptions, FlushState,
    FlushTimeInformation, SequenceCounter, SequenceStep, SEQUENCE_WRAP_AROUND,
};
pub use ids::{ObjectHandle, ParticipantId, SceneId, SceneVersionTag};
pub use action_log::{ActionCounts, LogChunk, SceneActionLog};
pub use scene::{
    AppearanceData, CameraData, DataBufferData, NodeData, RenderGroupData, RenderPassData,
    RenderableData, Scene, SceneObject, SceneSizeInfo, TextureSamplerData,
};
