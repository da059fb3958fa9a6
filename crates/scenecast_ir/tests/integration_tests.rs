//! Integration tests for scenecast_ir
//!
//! Drives a producer scene through flushes and replays the encoded stream
//! onto independent mirrors.

use scenecast_ir::*;
use scenecast_resource::{ResourceKind, ResourceStore};

fn replay(flushes: &[Flush]) -> Scene {
    let mut mirror = Scene::new();
    for flush in flushes {
        let bytes = encode_actions(&flush.actions).expect("encode");
        let decoded = decode_actions(&bytes).expect("decode");
        assert_eq!(decoded.skipped, 0);
        mirror.apply_all(&decoded.actions).expect("apply");
    }
    mirror
}

#[test]
fn test_translation_then_release() {
    let mut client = ClientScene::new(SceneId::new(1), "s", ResourceStore::default(), SEQUENCE_WRAP_AROUND);

    let node = client.create_node("n").unwrap();
    client
        .apply(SceneAction::SetTranslation { node, value: [1.0, 2.0, 3.0] })
        .unwrap();
    let first = client.flush(FlushOptions::new()).unwrap();
    assert_eq!(first.sequence, 1);

    let mirror = replay(&[first.clone()]);
    assert_eq!(mirror.node(node).unwrap().translation, [1.0, 2.0, 3.0]);

    client.release(node).unwrap();
    let second = client.flush(FlushOptions::new()).unwrap();
    assert_eq!(second.sequence, 2);

    let mirror = replay(&[first, second]);
    assert!(!mirror.contains(node));
    assert_eq!(&mirror, client.scene());
}

#[test]
fn test_snapshot_equals_history() {
    let store = ResourceStore::default();
    let effect = store.put(ResourceKind::Effect, "flat", b"void main() {}".to_vec()).unwrap();
    let vertices = store.put(ResourceKind::VertexArray, "quad", vec![0u8; 48]).unwrap();
    let mut client = ClientScene::new(SceneId::new(2), "s", store, SEQUENCE_WRAP_AROUND);

    let mut flushes = Vec::new();
    let root = client.create_node("root").unwrap();
    let child = client.create_node("child").unwrap();
    client.apply(SceneAction::AddChildToNode { parent: root, child }).unwrap();
    flushes.push(client.flush(FlushOptions::new()).unwrap());

    let appearance = client.allocate_handle();
    client.apply(SceneAction::AllocateAppearance { handle: appearance, effect }).unwrap();
    let renderable = client.allocate_handle();
    client
        .apply(SceneAction::AllocateRenderable { handle: renderable, node: Some(child) })
        .unwrap();
    client
        .apply(SceneAction::SetRenderableResources {
            renderable,
            indices: None,
            vertices: vec![vertices],
        })
        .unwrap();
    client
        .apply(SceneAction::SetRenderableAppearance { renderable, appearance })
        .unwrap();
    flushes.push(client.flush(FlushOptions::new()).unwrap());

    client.apply(SceneAction::SetScaling { node: root, value: [2.0; 3] }).unwrap();
    client.release(child).unwrap();
    flushes.push(client.flush(FlushOptions::new().version_tag(SceneVersionTag::new(3))).unwrap());

    let from_history = replay(&flushes);
    let snapshot = client.snapshot();
    assert_eq!(snapshot.sequence, 3);
    let from_snapshot = Scene::from_actions(snapshot.actions.iter()).unwrap();

    assert_eq!(from_history, from_snapshot);
    assert_eq!(&from_snapshot, client.scene());
    assert_eq!(from_snapshot.renderable(renderable).unwrap().node, None);
}

#[test]
fn test_log_keeps_sealed_chunks() {
    let mut client = ClientScene::new(SceneId::new(3), "s", ResourceStore::default(), SEQUENCE_WRAP_AROUND);
    for i in 0..3 {
        client.create_node(format!("n{}", i)).unwrap();
        client.flush(FlushOptions::new()).unwrap();
    }

    let log = client.log();
    assert_eq!(log.len(), 3);
    let sequences: Vec<u64> = log.chunks().iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(log.snapshot_range(1, 3).len(), 2);
}
