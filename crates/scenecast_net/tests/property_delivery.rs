//! PROPERTY-BASED TESTS: delivery order
//!
//! Resource payloads may arrive at any point relative to the updates that
//! need them, and updates may be delivered twice. Once everything has
//! arrived the consumer mirror must equal the producer scene. The generated
//! scenes link renderables to appearances, groups and passes, bind samplers
//! as uniforms and release linked objects, so deferred actions interact
//! with handle links and release scrubbing.

use proptest::prelude::*;
use scenecast_ir::{
    ClientScene, Flush, FlushMode, FlushOptions, ObjectHandle, ParticipantId, SceneAction, SceneId,
    TextureFilter, UniformValue, SEQUENCE_WRAP_AROUND,
};
use scenecast_net::*;
use scenecast_resource::{ResourceHash, ResourceKind, ResourceStore, ResourceStoreConfig};

const PROVIDER: ParticipantId = ParticipantId::new(1);
const CONSUMER: ParticipantId = ParticipantId::new(2);
const SCENE: SceneId = SceneId::new(9);
const KINDS: [ResourceKind; 4] = [
    ResourceKind::Effect,
    ResourceKind::Texture2D,
    ResourceKind::IndexArray,
    ResourceKind::VertexArray,
];
const RESOURCES: usize = KINDS.len();
const MAX_BATCHES: usize = 12;

#[derive(Debug, Clone)]
enum Step {
    Appearance { effect: usize },
    Renderable { indices: usize, vertices: usize, grouped: bool },
    Sampler { texture: usize, bind: bool },
    Pass,
    Release { pick: usize },
}

#[derive(Debug, Clone)]
struct Batch {
    steps: Vec<Step>,
    wait: bool,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..RESOURCES).prop_map(|effect| Step::Appearance { effect }),
        (0..RESOURCES, 0..RESOURCES, any::<bool>()).prop_map(|(indices, vertices, grouped)| {
            Step::Renderable {
                indices,
                vertices,
                grouped,
            }
        }),
        (0..RESOURCES, any::<bool>()).prop_map(|(texture, bind)| Step::Sampler { texture, bind }),
        Just(Step::Pass),
        any::<usize>().prop_map(|pick| Step::Release { pick }),
    ]
}

fn batch_strategy() -> impl Strategy<Value = Batch> {
    (prop::collection::vec(step_strategy(), 1..5), any::<bool>())
        .prop_map(|(steps, wait)| Batch { steps, wait })
}

/// Live objects of the producer scene, by role
#[derive(Default)]
struct Live {
    appearances: Vec<ObjectHandle>,
    renderables: Vec<ObjectHandle>,
    samplers: Vec<ObjectHandle>,
    groups: Vec<ObjectHandle>,
    passes: Vec<ObjectHandle>,
}

impl Live {
    /// Remove and return the `pick`-th live object across every role
    fn take(&mut self, pick: usize) -> Option<ObjectHandle> {
        let mut lists = [
            &mut self.appearances,
            &mut self.renderables,
            &mut self.samplers,
            &mut self.groups,
            &mut self.passes,
        ];
        let total: usize = lists.iter().map(|list| list.len()).sum();
        if total == 0 {
            return None;
        }
        let mut index = pick % total;
        for list in lists.iter_mut() {
            if index < list.len() {
                return Some(list.remove(index));
            }
            index -= list.len();
        }
        None
    }
}

fn apply_step(scene: &mut ClientScene, live: &mut Live, hashes: &[ResourceHash], step: &Step) {
    match *step {
        Step::Appearance { effect } => {
            let handle = scene.allocate_handle();
            scene
                .apply(SceneAction::AllocateAppearance {
                    handle,
                    effect: hashes[effect],
                })
                .unwrap();
            live.appearances.push(handle);
        }
        Step::Renderable {
            indices,
            vertices,
            grouped,
        } => {
            let node = scene.create_node("r").unwrap();
            let renderable = scene.allocate_handle();
            scene
                .apply(SceneAction::AllocateRenderable {
                    handle: renderable,
                    node: Some(node),
                })
                .unwrap();
            scene
                .apply(SceneAction::SetRenderableResources {
                    renderable,
                    indices: Some(hashes[indices]),
                    vertices: vec![hashes[vertices]],
                })
                .unwrap();
            if let Some(&appearance) = live.appearances.last() {
                scene
                    .apply(SceneAction::SetRenderableAppearance {
                        renderable,
                        appearance,
                    })
                    .unwrap();
            }
            if let (true, Some(&group)) = (grouped, live.groups.last()) {
                scene
                    .apply(SceneAction::AddRenderableToRenderGroup {
                        group,
                        renderable,
                        order: live.renderables.len() as i32,
                    })
                    .unwrap();
            }
            live.renderables.push(renderable);
        }
        Step::Sampler { texture, bind } => {
            let sampler = scene.allocate_handle();
            scene
                .apply(SceneAction::AllocateTextureSampler {
                    handle: sampler,
                    texture: hashes[texture],
                    filter: TextureFilter::Linear,
                })
                .unwrap();
            if let (true, Some(&appearance)) = (bind, live.appearances.last()) {
                scene
                    .apply(SceneAction::SetAppearanceUniform {
                        appearance,
                        name: "u_texture".into(),
                        value: UniformValue::Sampler(sampler),
                    })
                    .unwrap();
            }
            live.samplers.push(sampler);
        }
        Step::Pass => {
            let group = scene.allocate_handle();
            scene
                .apply(SceneAction::AllocateRenderGroup { handle: group })
                .unwrap();
            let pass = scene.allocate_handle();
            scene
                .apply(SceneAction::AllocateRenderPass { handle: pass })
                .unwrap();
            scene
                .apply(SceneAction::AddRenderGroupToRenderPass {
                    pass,
                    group,
                    order: 0,
                })
                .unwrap();
            live.groups.push(group);
            live.passes.push(pass);
        }
        Step::Release { pick } => {
            if let Some(handle) = live.take(pick) {
                scene.release(handle).unwrap();
            }
        }
    }
}

/// Produce a snapshot followed by one flush per batch
fn produce(batches: &[Batch]) -> (ClientScene, ResourceStore, Vec<ResourceHash>, Flush, Vec<Flush>) {
    let store = ResourceStore::new(ResourceStoreConfig::default());
    let hashes: Vec<ResourceHash> = KINDS
        .iter()
        .enumerate()
        .map(|(i, &kind)| {
            store
                .put(kind, format!("resource{}", i), vec![i as u8; 32])
                .unwrap()
        })
        .collect();

    let mut scene = ClientScene::new(SCENE, "prop", store.clone(), SEQUENCE_WRAP_AROUND);
    let snapshot = scene.snapshot();
    let mut live = Live::default();
    let mut flushes = Vec::new();

    for batch in batches {
        // Every flush carries at least one action
        let marker = scene.create_node("n").unwrap();
        scene
            .apply(SceneAction::SetScaling {
                node: marker,
                value: [2.0, 2.0, 2.0],
            })
            .unwrap();
        for step in &batch.steps {
            apply_step(&mut scene, &mut live, &hashes, step);
        }

        let mode = if batch.wait {
            FlushMode::WaitForResources
        } else {
            FlushMode::Immediate
        };
        let flush = scene.flush(FlushOptions::new().mode(mode)).unwrap();
        scene.mark_sent(flush.sequence).unwrap();
        flushes.push(flush);
    }
    (scene, store, hashes, snapshot, flushes)
}

fn update(flush: &Flush) -> SceneUpdate {
    SceneUpdate::from_flush(flush, PublicationMode::LocalAndRemote).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_mirror_independent_of_resource_timing(
        batches in prop::collection::vec(batch_strategy(), 1..MAX_BATCHES),
        arrivals in prop::collection::vec(0..=MAX_BATCHES, RESOURCES),
        duplicates in prop::collection::vec(any::<bool>(), MAX_BATCHES),
    ) {
        let (producer, provider_store, hashes, snapshot, flushes) = produce(&batches);

        let hub = LocalHub::default();
        let _provider = hub.endpoint(PROVIDER);
        let endpoint = hub.endpoint(CONSUMER);
        hub.connect(PROVIDER, CONSUMER);

        let mut consumer = SceneGraphConsumer::new(
            CONSUMER,
            ConsumerConfig::default(),
            ResourceStore::new(ResourceStoreConfig::default()),
        );
        consumer.on_scene_available(SCENE, "prop", PROVIDER);
        consumer.subscribe(SCENE, &endpoint).unwrap();
        consumer.on_scene_update_received(PROVIDER, update(&snapshot), &endpoint, 0);

        let deliver_resources = |consumer: &mut SceneGraphConsumer, position: usize| {
            for (i, &arrival) in arrivals.iter().enumerate() {
                if arrival.min(flushes.len()) == position {
                    let resource = provider_store.get(hashes[i]).unwrap();
                    consumer.on_resource_data(PROVIDER, ResourceData::from_resource(&resource), &endpoint, 0);
                }
            }
        };

        for (position, flush) in flushes.iter().enumerate() {
            deliver_resources(&mut consumer, position);
            consumer.on_scene_update_received(PROVIDER, update(flush), &endpoint, 0);
            if duplicates[position] {
                consumer.on_scene_update_received(PROVIDER, update(flush), &endpoint, 0);
            }
        }
        deliver_resources(&mut consumer, flushes.len());

        prop_assert_eq!(consumer.state(SCENE), Some(ConsumedSceneState::Streaming));
        prop_assert_eq!(consumer.pending_flushes(SCENE), 0);
        prop_assert_eq!(consumer.deferred_actions(SCENE), 0);
        prop_assert_eq!(consumer.last_applied(SCENE), Some(flushes.len() as u64));
        prop_assert_eq!(consumer.mirror(SCENE).unwrap(), producer.scene());
        prop_assert_eq!(consumer.stats().gaps_detected, 0);
        prop_assert_eq!(consumer.stats().malformed_updates, 0);
    }
}
