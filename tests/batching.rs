use std::sync::Arc;

use deferred_batch::renderer::assembler::{assemble, total_draw_params};
use deferred_batch::renderer::geometry::Submesh;
use deferred_batch::renderer::layout::{DynamicLayout, GrowableCapacity};
use deferred_batch::renderer::mapping::ByteArena;
use deferred_batch::renderer::vertex::InstanceRaw;
use deferred_batch::renderer::{pass_slot_count, DrawParams, PointLight, SceneView, SkinnedMesh, SpotLight, TextureHandleSet};
use deferred_batch::scene::{Camera, Graph, MeshNode, Node, NodeKind};
use deferred_batch::time::FrameInfo;
use glam::{Mat4, Vec3, Vec4};

const TEXTURE_ALIGNMENT: u64 = 256;

fn mesh(vertex_count: u32, joint_base: u32) -> Arc<SkinnedMesh> {
    Arc::new(SkinnedMesh {
        name: format!("mesh{vertex_count}"),
        first_vertex: 0,
        vertex_count,
        first_index: 0,
        submeshes: vec![Submesh {
            first_index: 0,
            index_count: vertex_count * 3,
            textures: TextureHandleSet::default(),
        }],
        joint_base,
        joint_count: 3,
        frame_count: 24,
        frame_rate: 24.0,
    })
}

fn animated(name: &str, mesh: &Arc<SkinnedMesh>, frame: i32, x: f32) -> Node {
    let mut node = MeshNode::new(mesh.clone());
    node.set_frame(frame);
    Node::new(name, NodeKind::Mesh(node)).with_transform(Mat4::from_translation(Vec3::X * x))
}

fn arena_for(graphs: &[&mut Graph]) -> (ByteArena, DynamicLayout) {
    let draws = total_draw_params(graphs);
    let layout = DynamicLayout::compute(draws.max_indirect_cmds as u64, draws.instances as u64, TEXTURE_ALIGNMENT);
    (ByteArena::with_capacity(layout.total as usize), layout)
}

#[test]
fn static_node_skins_nothing() {
    let mut graph = Graph::new();
    graph.add_root(Node::new("static", NodeKind::Group).with_bounding_radius(5.0));
    let mut graphs = [&mut graph];

    assert_eq!(total_draw_params(&graphs), DrawParams::ZERO);
    let (mut arena, layout) = arena_for(&graphs);
    let cursor = assemble(&mut graphs, &mut arena, &layout);
    assert_eq!(cursor.written(), 0);
    assert!(cursor.dispatches().is_empty());

    let mut scratch = GrowableCapacity::new(0);
    assert_eq!(scratch.ensure(cursor.written() as u64), None);
    assert_eq!(scratch.get(), 0);
}

#[test]
fn five_instances_fill_five_ranges_in_order() {
    let goober = mesh(100, 0);
    let mut graph = Graph::new();
    for i in 0..5 {
        graph.add_root(animated(&format!("goober{i}"), &goober, i * 2, i as f32 * 10.0));
    }
    let mut graphs = [&mut graph];
    let (mut arena, layout) = arena_for(&graphs);
    let cursor = assemble(&mut graphs, &mut arena, &layout);

    assert_eq!(cursor.written(), 500);
    let dispatches = cursor.dispatches();
    assert_eq!(dispatches.len(), 5);
    for (i, dispatch) in dispatches.iter().enumerate() {
        assert_eq!(dispatch.dst_first_vertex, i as u32 * 100);
        assert_eq!(dispatch.joint_base, goober.frame_joint_base(i as u32 * 2));
    }

    let models: Vec<InstanceRaw> = (0..5)
        .map(|i| arena.read(layout.instance_offset + i * 64).expect("instance in range"))
        .collect();
    for (i, model) in models.iter().enumerate() {
        assert_eq!(*model, InstanceRaw::from_matrix(Mat4::from_translation(Vec3::X * i as f32 * 10.0)));
    }
    for (i, a) in models.iter().enumerate() {
        assert!(models[i + 1..].iter().all(|b| a != b));
    }
}

#[test]
fn skin_ranges_tile_the_scratch_buffer() {
    let small = mesh(24, 0);
    let large = mesh(240, 72);
    let mut left = Graph::new();
    let parent = left.add_root(animated("a", &small, 0, 0.0));
    left.add_child(parent, animated("b", &large, 5, 1.0));
    left.add_root(Node::new("empty", NodeKind::Group));
    let mut right = Graph::new();
    right.add_root(animated("c", &large, 23, 2.0));
    right.add_root(animated("d", &small, 1, 3.0));

    let mut graphs = [&mut left, &mut right];
    let (mut arena, layout) = arena_for(&graphs);
    let cursor = assemble(&mut graphs, &mut arena, &layout);

    let mut expected = 0;
    for dispatch in cursor.dispatches() {
        assert_eq!(dispatch.dst_range().start, expected);
        expected = dispatch.dst_range().end;
    }
    assert_eq!(expected, cursor.written());
    assert_eq!(cursor.written(), 24 + 240 + 240 + 24);
    assert!(cursor.written() <= total_draw_params(&graphs).max_vertices);
}

#[test]
fn reassembly_is_byte_identical() {
    let goober = mesh(60, 0);
    let mut left = Graph::new();
    let mut right = Graph::new();
    for i in 0..4 {
        left.add_root(animated(&format!("l{i}"), &goober, i, i as f32));
        right.add_root(animated(&format!("r{i}"), &goober, 20 - i, -(i as f32)));
    }
    let mut graphs = [&mut left, &mut right];
    let (mut first, layout) = arena_for(&graphs);
    let (mut second, _) = arena_for(&graphs);

    let a = assemble(&mut graphs, &mut first, &layout);
    let b = assemble(&mut graphs, &mut second, &layout);
    assert_eq!(a.dispatches(), b.dispatches());
    assert_eq!(first.bytes(), second.bytes());
}

#[test]
fn set_frame_rejects_out_of_range_requests() {
    let goober = mesh(10, 0);
    let mut graph = Graph::new();
    let id = graph.add_root(animated("goober", &goober, 7, 0.0));
    graph.update(&FrameInfo {
        frame_delta: 0.01,
        ..FrameInfo::default()
    });

    let node = graph.get_mut(id).and_then(|node| node.as_mesh_mut()).expect("mesh node");
    let (frame, timer) = (node.current_frame(), node.frame_time());
    assert!(timer > 0.0);

    node.set_frame(-1);
    node.set_frame(node.frame_count() as i32);
    assert_eq!((node.current_frame(), node.frame_time()), (frame, timer));

    node.set_frame(3);
    assert_eq!(node.current_frame(), 3);
    assert_eq!(node.frame_time(), 0.0);
}

#[test]
fn every_view_and_light_gets_its_own_slot() {
    let mut left = SceneView::new(Graph::new(), Camera::default());
    left.point_lights = vec![
        PointLight::new(Vec3::ZERO, Vec4::ONE, 10.0),
        PointLight::new(Vec3::X, Vec4::ONE, 10.0),
    ];
    let mut right = SceneView::new(Graph::new(), Camera::default());
    right.spot_lights = vec![SpotLight::new(Vec3::ZERO, Vec3::X, Vec4::ONE, 50.0)];

    assert_eq!(pass_slot_count(&[left, right]), 2 + 3);
}
