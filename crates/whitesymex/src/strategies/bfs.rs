use super::Strategy;
use crate::state::State;

/// Breadth-first exploration: every active state advances each round, so
/// forks progress fairly.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bfs;

impl<'ctx> Strategy<'ctx> for Bfs {
    fn select_states(&mut self, active: &mut Vec<State<'ctx>>) -> Vec<State<'ctx>> {
        std::mem::take(active)
    }
}
