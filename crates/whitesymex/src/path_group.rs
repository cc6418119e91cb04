//! Path group: stashes of execution states and the exploration driver.
//!
//! Exploration classifies every state into exactly one of five stashes:
//! `active` states still run, `deadended` states exited gracefully, `found`
//! and `avoided` states matched the corresponding filter, and `errored`
//! states raised a symbolic-execution error. The driver advances active
//! states in the order a pluggable [`Strategy`] dictates.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info};

use crate::instruction::Opcode;
use crate::state::{State, Step};
use crate::strategies::{Bfs, Strategy};
use crate::value::Value;

/// Classifier routing states to the `found` or `avoided` stash.
pub enum StateFilter<'ctx> {
    /// Never matches. The default for both filters.
    Never,
    /// Matches when the byte string occurs in the state's stdout.
    Substring(Vec<u8>),
    /// Arbitrary predicate over the state.
    Predicate(Rc<dyn Fn(&State<'ctx>) -> bool + 'ctx>),
}

impl<'ctx> StateFilter<'ctx> {
    fn matches(&self, state: &State<'ctx>) -> bool {
        match self {
            StateFilter::Never => false,
            StateFilter::Substring(needle) => {
                let stdout = state.stdout.concat();
                needle.is_empty()
                    || stdout.windows(needle.len()).any(|window| window == needle)
            }
            StateFilter::Predicate(predicate) => predicate(state),
        }
    }
}

impl From<&[u8]> for StateFilter<'_> {
    fn from(needle: &[u8]) -> Self {
        StateFilter::Substring(needle.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for StateFilter<'_> {
    fn from(needle: &[u8; N]) -> Self {
        StateFilter::Substring(needle.to_vec())
    }
}

impl From<Vec<u8>> for StateFilter<'_> {
    fn from(needle: Vec<u8>) -> Self {
        StateFilter::Substring(needle)
    }
}

impl From<&str> for StateFilter<'_> {
    fn from(needle: &str) -> Self {
        StateFilter::Substring(needle.as_bytes().to_vec())
    }
}

/// Parameters for one exploration run.
pub struct ExploreOpts<'ctx> {
    find: StateFilter<'ctx>,
    avoid: StateFilter<'ctx>,
    strategy: Box<dyn Strategy<'ctx> + 'ctx>,
    loop_limit: Option<u32>,
    num_find: usize,
}

impl Default for ExploreOpts<'_> {
    fn default() -> Self {
        ExploreOpts {
            find: StateFilter::Never,
            avoid: StateFilter::Never,
            strategy: Box::new(Bfs),
            loop_limit: None,
            num_find: 1,
        }
    }
}

impl<'ctx> ExploreOpts<'ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify states whose output matches as `found`.
    pub fn with_find(mut self, find: impl Into<StateFilter<'ctx>>) -> Self {
        self.find = find.into();
        self
    }

    /// Classify states whose output matches as `avoided`.
    pub fn with_avoid(mut self, avoid: impl Into<StateFilter<'ctx>>) -> Self {
        self.avoid = avoid.into();
        self
    }

    pub fn with_strategy(mut self, strategy: impl Strategy<'ctx> + 'ctx) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Cap on how many times one symbolic conditional (keyed by its ip) may
    /// be crossed during the exploration. States over budget are dropped
    /// silently.
    pub fn with_loop_limit(mut self, limit: u32) -> Self {
        self.loop_limit = Some(limit);
        self
    }

    /// Stop once this many states are found (default 1).
    pub fn with_num_find(mut self, num_find: usize) -> Self {
        self.num_find = num_find;
        self
    }
}

/// The five disjoint stashes of an exploration.
pub struct PathGroup<'ctx> {
    pub active: Vec<State<'ctx>>,
    pub deadended: Vec<State<'ctx>>,
    pub found: Vec<State<'ctx>>,
    pub avoided: Vec<State<'ctx>>,
    pub errored: Vec<State<'ctx>>,
}

impl<'ctx> PathGroup<'ctx> {
    pub fn new(state: State<'ctx>) -> Self {
        PathGroup {
            active: vec![state],
            deadended: Vec::new(),
            found: Vec::new(),
            avoided: Vec::new(),
            errored: Vec::new(),
        }
    }

    /// Drive exploration until `active` drains or `num_find` states are
    /// found.
    pub fn explore(&mut self, opts: ExploreOpts<'ctx>) {
        Exploration {
            find: opts.find,
            avoid: opts.avoid,
            strategy: opts.strategy,
            loop_limit: opts.loop_limit,
            num_find: opts.num_find,
            loop_counts: HashMap::new(),
        }
        .run(self);
    }
}

impl fmt::Display for PathGroup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stashes = [
            ("active", self.active.len()),
            ("deadended", self.deadended.len()),
            ("avoided", self.avoided.len()),
            ("found", self.found.len()),
            ("errored", self.errored.len()),
        ];
        let mut parts = Vec::new();
        for (name, count) in stashes {
            if count > 0 {
                parts.push(format!("{} {}", count, name));
            }
        }
        if parts.is_empty() {
            write!(f, "<PathGroup (empty)>")
        } else {
            write!(f, "<PathGroup with {}>", parts.join(", "))
        }
    }
}

/// Whether the state stands on a conditional jump whose condition would be
/// symbolic. Used only for loop accounting; an empty stack is left for the
/// step itself to report.
fn is_symbolic_conditional(state: &State<'_>) -> bool {
    let on_conditional = matches!(
        state.instruction().map(|i| i.opcode),
        Some(Opcode::JumpIfZero) | Some(Opcode::JumpIfNegative)
    );
    on_conditional && state.stack.last().is_some_and(Value::is_symbolic)
}

/// One exploration run: the filters, the strategy, and the loop budget
/// shared by every fork.
struct Exploration<'ctx> {
    find: StateFilter<'ctx>,
    avoid: StateFilter<'ctx>,
    strategy: Box<dyn Strategy<'ctx> + 'ctx>,
    loop_limit: Option<u32>,
    num_find: usize,
    /// Symbolic-conditional crossings keyed by ip. Lives with the
    /// exploration, not the state, so that a loop exploding into many forks
    /// collectively exhausts one budget.
    loop_counts: HashMap<usize, u32>,
}

impl<'ctx> Exploration<'ctx> {
    fn run(&mut self, group: &mut PathGroup<'ctx>) {
        while !group.active.is_empty() {
            let selected = self.strategy.select_states(&mut group.active);
            for state in selected {
                self.advance(group, state);
                if group.found.len() >= self.num_find {
                    info!("exploration finished: {}", group);
                    return;
                }
            }
        }
        info!("exploration drained: {}", group);
    }

    /// Advance one state until it forks, terminates, errors, matches a
    /// filter, or exhausts the loop budget.
    fn advance(&mut self, group: &mut PathGroup<'ctx>, mut state: State<'ctx>) {
        loop {
            let Some(opcode) = state.instruction().map(|i| i.opcode) else {
                group.deadended.push(state);
                return;
            };

            if let Some(limit) = self.loop_limit {
                if is_symbolic_conditional(&state) {
                    let count = self.loop_counts.entry(state.ip).or_insert(0);
                    if *count >= limit {
                        debug!("dropping state at ip {}: loop budget exhausted", state.ip);
                        return;
                    }
                    *count += 1;
                }
            }

            let step = match state.step() {
                Ok(step) => step,
                Err(error) => {
                    debug!("state errored at ip {}: {}", state.ip, error);
                    group.errored.push(state);
                    return;
                }
            };

            // Output instructions are the only classification points.
            if matches!(opcode, Opcode::PrintChar | Opcode::PrintNumber) {
                if self.find.matches(&state) {
                    debug!("state found at ip {}", state.ip);
                    group.found.push(state);
                    return;
                }
                if self.avoid.matches(&state) {
                    debug!("state avoided at ip {}", state.ip);
                    group.avoided.push(state);
                    return;
                }
            }

            match step {
                Step::Continue => {}
                Step::Fork(sibling) => {
                    group.active.push(state);
                    group.active.push(sibling);
                    return;
                }
                Step::Terminate => {
                    group.deadended.push(state);
                    return;
                }
            }
        }
    }
}
