use deferred_batch::renderer::gbuffer::Viewport;
use deferred_batch::renderer::postprocess::plan_chain;
use deferred_batch::renderer::targets::{needs_reallocation, FrameTargets, TargetExtent, HDR_FORMAT, LIGHT_FORMAT};

const EPSILON: f32 = 1e-5;

#[test]
fn growing_the_window_reallocates_once() {
    let mut extent = TargetExtent::new(800, 600);
    let reallocations = [(1920, 1080), (1920, 1080), (1920, 1080)]
        .into_iter()
        .filter(|&(width, height)| extent.resize(width, height))
        .count();
    assert_eq!(reallocations, 1);
    assert_eq!(extent.generation, 1);
    assert_eq!((extent.width, extent.height), (1920, 1080));

    let screen_targets = FrameTargets::SCREEN_TARGETS.len() + 1;
    assert!(extent.fits_all(vec![(1920, 1080); screen_targets]));
    assert!(!extent.fits_all([(1920, 1080), (800, 600)]));
    assert!(!needs_reallocation((extent.width, extent.height), (1920, 1080)));
}

#[test]
fn minimised_window_keeps_its_targets() {
    assert!(!needs_reallocation((1920, 1080), (0, 0)));
    assert!(!needs_reallocation((1920, 1080), (1920, 0)));

    let mut extent = TargetExtent::new(1920, 1080);
    assert!(!extent.resize(0, 0));
    assert!(!extent.resize(1920, 0));
    assert_eq!(extent, TargetExtent::new(1920, 1080));
    assert!(extent.resize(1280, 720));
    assert_eq!(extent.generation, 1);
}

#[test]
fn every_screen_target_is_hdr() {
    let labels: Vec<_> = FrameTargets::SCREEN_TARGETS.iter().map(|(label, _)| *label).collect();
    for expected in ["DiffuseLight", "SpecularLight", "HdrOutput", "PingPongA", "PingPongB"] {
        assert!(labels.contains(&expected), "{expected}");
    }
    for (_, format) in FrameTargets::SCREEN_TARGETS {
        assert!(format == HDR_FORMAT || format == LIGHT_FORMAT);
    }
}

#[test]
fn split_views_cover_the_new_width() {
    for ratio in [0.0, 0.25, 0.5, 1.0] {
        let views = Viewport::split(1920, 1080, ratio);
        let width: f32 = views.iter().flatten().map(|view| view.width).sum();
        assert!((width - 1920.0).abs() < EPSILON, "ratio {ratio}");
        for view in views.iter().flatten() {
            assert!((view.height - 1080.0).abs() < EPSILON);
        }
    }
}

#[test]
fn chain_plan_is_independent_of_size() {
    assert_eq!(plan_chain(true, [true; 3]), plan_chain(true, [true; 3]));
    assert_eq!(plan_chain(false, [true, false, true]).bound, 1);
}
