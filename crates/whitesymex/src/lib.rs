//! Symbolic execution engine for Whitespace.
//!
//! Whitespace programs read bytes, branch on them, and print. This crate
//! explores every feasible control-flow path of such a program, tracking
//! symbolic input under SMT constraints, so that an input driving execution
//! to a chosen output can be recovered by constraint solving. This is the
//! usual way to crack "password check" style challenges automatically.
//!
//! ```rust,ignore
//! use whitesymex::parser;
//! use whitesymex::path_group::{ExploreOpts, PathGroup};
//! use whitesymex::state::{DEFAULT_BITLENGTH, State};
//! use z3::{Config, Context};
//!
//! let instructions = parser::parse_file("challenge.ws")?;
//! let ctx = Context::new(&Config::new());
//! let state = State::create_entry_state(&ctx, instructions, None, Some(DEFAULT_BITLENGTH));
//! let mut group = PathGroup::new(state);
//! group.explore(ExploreOpts::new().with_find(b"Correct!").with_avoid(b"Nope."));
//! let solution = group.found[0].concretize()?;
//! ```

pub mod errors;
pub mod instruction;
pub mod parser;
pub mod path_group;
pub mod solver;
pub mod state;
pub mod strategies;
pub mod value;

pub use errors::{ExecError, ParserError};
pub use instruction::{Imp, Instruction, Opcode};
pub use path_group::{ExploreOpts, PathGroup, StateFilter};
pub use solver::ConstraintStore;
pub use state::{DEFAULT_BITLENGTH, State, Step, VarType};
pub use strategies::{Bfs, Dfs, Random, Strategy};
pub use value::{Condition, Term, Value, ValueKey};
