use super::Strategy;
use crate::state::State;

/// Depth-first exploration: always advance the most recently appended
/// state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dfs;

impl<'ctx> Strategy<'ctx> for Dfs {
    fn select_states(&mut self, active: &mut Vec<State<'ctx>>) -> Vec<State<'ctx>> {
        active.pop().into_iter().collect()
    }
}
