// renderer/postprocess/chain.rs
//! Ping-pong planning for the post chain, independent of any GPU state.

/// A full-screen effect drawn into one ping-pong target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    Copy,
    BlurHorizontal,
    BlurVertical,
    BloomComposite,
    Skybox,
    Reflections,
    Fxaa,
}

impl Effect {
    /// Optional effects after the head, in the order they run.
    pub const ORDERED: [Effect; 3] = [Effect::Skybox, Effect::Reflections, Effect::Fxaa];

    pub const ALL: [Effect; 7] = [
        Effect::Copy,
        Effect::BlurHorizontal,
        Effect::BlurVertical,
        Effect::BloomComposite,
        Effect::Skybox,
        Effect::Reflections,
        Effect::Fxaa,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            Effect::Copy => "fs_copy",
            Effect::BlurHorizontal => "fs_blur_h",
            Effect::BlurVertical => "fs_blur_v",
            Effect::BloomComposite => "fs_bloom_composite",
            Effect::Skybox => "fs_skybox",
            Effect::Reflections => "fs_reflections",
            Effect::Fxaa => "fs_fxaa",
        }
    }
}

/// Texture an effect reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Hdr,
    Bright,
    Target(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStep {
    Draw {
        effect: Effect,
        source: Source,
        secondary: Option<Source>,
        target: usize,
    },
    /// The target just written becomes the source of the next draw.
    Flip,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainPlan {
    pub steps: Vec<ChainStep>,
    /// Ping-pong target holding the final image.
    pub bound: usize,
}

impl ChainPlan {
    pub fn draws(&self) -> impl Iterator<Item = (Effect, Source, Option<Source>, usize)> + '_ {
        self.steps.iter().filter_map(|step| match *step {
            ChainStep::Draw {
                effect,
                source,
                secondary,
                target,
            } => Some((effect, source, secondary, target)),
            ChainStep::Flip => None,
        })
    }
}

struct Planner {
    steps: Vec<ChainStep>,
    bound: usize,
}

impl Planner {
    fn draw(&mut self, effect: Effect, source: Source, secondary: Option<Source>) {
        let target = 1 - self.bound;
        self.steps.push(ChainStep::Draw {
            effect,
            source,
            secondary,
            target,
        });
        self.steps.push(ChainStep::Flip);
        self.bound = target;
    }

    fn current(&self) -> Source {
        Source::Target(self.bound)
    }
}

/// Plans the chain. `enabled` follows [`Effect::ORDERED`]; disabled effects
/// produce no steps at all.
pub fn plan_chain(bloom: bool, enabled: [bool; 3]) -> ChainPlan {
    let mut planner = Planner {
        steps: Vec::new(),
        bound: 0,
    };

    if bloom {
        planner.draw(Effect::BlurHorizontal, Source::Bright, None);
        planner.draw(Effect::BlurVertical, planner.current(), None);
        planner.draw(Effect::BloomComposite, Source::Hdr, Some(planner.current()));
    } else {
        planner.draw(Effect::Copy, Source::Hdr, None);
    }

    for (effect, on) in Effect::ORDERED.into_iter().zip(enabled) {
        if on {
            planner.draw(effect, planner.current(), None);
        }
    }

    ChainPlan {
        steps: planner.steps,
        bound: planner.bound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_head_without_bloom() {
        let plan = plan_chain(false, [false; 3]);
        assert_eq!(
            plan.steps,
            vec![
                ChainStep::Draw {
                    effect: Effect::Copy,
                    source: Source::Hdr,
                    secondary: None,
                    target: 1,
                },
                ChainStep::Flip,
            ]
        );
        assert_eq!(plan.bound, 1);
    }

    #[test]
    fn bloom_blurs_then_composites() {
        let plan = plan_chain(true, [false; 3]);
        let draws: Vec<_> = plan.draws().collect();
        assert_eq!(
            draws,
            vec![
                (Effect::BlurHorizontal, Source::Bright, None, 1),
                (Effect::BlurVertical, Source::Target(1), None, 0),
                (Effect::BloomComposite, Source::Hdr, Some(Source::Target(0)), 1),
            ]
        );
        assert_eq!(plan.bound, 1);
    }

    #[test]
    fn disabled_effects_leave_no_steps() {
        let all = plan_chain(true, [true; 3]);
        let some = plan_chain(true, [true, false, true]);
        assert_eq!(all.draws().count(), 6);
        assert_eq!(some.draws().count(), 5);
        assert!(some.draws().all(|(effect, ..)| effect != Effect::Reflections));
    }

    #[test]
    fn every_draw_reads_the_previous_target() {
        for bloom in [false, true] {
            for mask in 0..8u8 {
                let enabled = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0];
                let plan = plan_chain(bloom, enabled);
                let draws: Vec<_> = plan.draws().collect();
                for pair in draws.windows(2) {
                    let (_, _, _, written) = pair[0];
                    let (effect, source, secondary, target) = pair[1];
                    assert_ne!(target, written);
                    if effect != Effect::BloomComposite {
                        assert_eq!(source, Source::Target(written));
                    } else {
                        assert_eq!(secondary, Some(Source::Target(written)));
                    }
                }
                let last = draws.last().map(|draw| draw.3);
                assert_eq!(last, Some(plan.bound));
            }
        }
    }
}
