use rand::Rng;
use rand::rngs::ThreadRng;

use super::Strategy;
use crate::state::State;

/// Uniformly random exploration: remove and advance one active state chosen
/// uniformly at random.
#[derive(Default)]
pub struct Random {
    rng: ThreadRng,
}

impl Random {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'ctx> Strategy<'ctx> for Random {
    fn select_states(&mut self, active: &mut Vec<State<'ctx>>) -> Vec<State<'ctx>> {
        if active.is_empty() {
            return Vec::new();
        }
        let index = self.rng.gen_range(0..active.len());
        vec![active.remove(index)]
    }
}
