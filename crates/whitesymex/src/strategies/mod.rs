//! Exploration strategies.
//!
//! A strategy decides which active states advance on each driver iteration.
//! Selection removes states from the active stash; the driver re-appends
//! whatever successors the selected states produce.

mod bfs;
mod dfs;
mod random;

pub use bfs::Bfs;
pub use dfs::Dfs;
pub use random::Random;

use crate::state::State;

/// Selects states for the next exploration iteration.
///
/// Implementations must remove their selection from `active`; returning
/// states that also stay in the stash would duplicate them.
pub trait Strategy<'ctx> {
    fn select_states(&mut self, active: &mut Vec<State<'ctx>>) -> Vec<State<'ctx>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Opcode};
    use z3::{Config, Context};

    fn states<'ctx>(ctx: &'ctx Context, count: usize) -> Vec<State<'ctx>> {
        (0..count)
            .map(|ip| {
                let mut state = State::create_entry_state(
                    ctx,
                    vec![Instruction::new(Opcode::Exit, None)],
                    None,
                    Some(24),
                );
                state.ip = ip;
                state
            })
            .collect()
    }

    #[test]
    fn bfs_drains_the_whole_stash() {
        let ctx = Context::new(&Config::new());
        let mut active = states(&ctx, 3);
        let selected = Bfs.select_states(&mut active);
        assert_eq!(selected.len(), 3);
        assert!(active.is_empty());
        // Snapshot order is preserved.
        assert_eq!(selected[0].ip, 0);
        assert_eq!(selected[2].ip, 2);
    }

    #[test]
    fn dfs_pops_the_most_recent_state() {
        let ctx = Context::new(&Config::new());
        let mut active = states(&ctx, 3);
        let selected = Dfs.select_states(&mut active);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].ip, 2);
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn random_removes_exactly_one_state() {
        let ctx = Context::new(&Config::new());
        let mut active = states(&ctx, 3);
        let selected = Random::new().select_states(&mut active);
        assert_eq!(selected.len(), 1);
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn empty_stashes_select_nothing() {
        let mut active: Vec<State<'static>> = Vec::new();
        assert!(Bfs.select_states(&mut active).is_empty());
        assert!(Dfs.select_states(&mut active).is_empty());
        assert!(Random::new().select_states(&mut active).is_empty());
    }
}
