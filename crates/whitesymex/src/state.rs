//! Execution state and Whitespace operational semantics.
//!
//! A [`State`] is one interpreter frame: instruction pointer, operand
//! stack, callstack, heap, input queue, output log, and its own constraint
//! store. [`State::step`] executes the instruction under the pointer over
//! mixed concrete/symbolic values; a symbolic conditional splits the state
//! into two feasible successors.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::debug;
use z3::Context;
use z3::ast::{BV, Bool, Int};

use crate::errors::ExecError;
use crate::instruction::{Instruction, Opcode};
use crate::solver::ConstraintStore;
use crate::value::{Condition, Term, Value, ValueKey};

/// Width of freshly allocated symbolic input bytes unless a caller chooses
/// otherwise.
pub const DEFAULT_BITLENGTH: u32 = 24;

/// How a consumed input value renders when concretized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// A single byte.
    Char,
    /// A decimal representation.
    Number,
}

/// Outcome of a single [`State::step`].
pub enum Step<'ctx> {
    /// The state mutated in place and is its only successor.
    Continue,
    /// A symbolic conditional split the state. The current state keeps the
    /// side its cached model already supports; the sibling takes the other
    /// side. Successor order is the current state first, then the sibling.
    Fork(State<'ctx>),
    /// EXIT, an infeasible read, or an instruction pointer past the program:
    /// no successors.
    Terminate,
}

/// Label-to-ip map built once per program from its MARK instructions.
fn collect_labels(instructions: &[Instruction]) -> HashMap<i64, usize> {
    let mut labels = HashMap::new();
    for (ip, instruction) in instructions.iter().enumerate() {
        if instruction.opcode == Opcode::Mark {
            if let Some(label) = instruction.parameter {
                labels.insert(label, ip);
            }
        }
    }
    labels
}

/// One symbolic execution frame.
///
/// The instruction list and the label map are shared read-only between all
/// forks of one program; every other field is owned and deep-copied on
/// clone.
#[derive(Clone)]
pub struct State<'ctx> {
    ctx: &'ctx Context,
    pub ip: usize,
    pub stack: Vec<Value<'ctx>>,
    pub callstack: Vec<usize>,
    pub heap: HashMap<ValueKey, Value<'ctx>>,
    labels: Rc<HashMap<i64, usize>>,
    instructions: Rc<[Instruction]>,
    /// Pre-supplied input, consumed before fresh symbols are allocated.
    input: VecDeque<Value<'ctx>>,
    /// Ordered log of every value consumed as input.
    pub stdin: Vec<Value<'ctx>>,
    /// Ordered log of emitted byte strings.
    pub stdout: Vec<Vec<u8>>,
    var_to_type: HashMap<ValueKey, VarType>,
    pub solver: ConstraintStore<'ctx>,
    /// Width for new symbolic bytes; `None` selects unbounded integers.
    bitlength: Option<u32>,
}

impl<'ctx> State<'ctx> {
    /// Build the entry state for a program.
    ///
    /// `stdin`, if supplied, is consumed in order by the read instructions
    /// before any fresh symbols are allocated; supplied symbolic terms must
    /// match the selected mode. `bitlength` is the width of fresh symbolic
    /// input bytes ([`DEFAULT_BITLENGTH`] is the conventional choice);
    /// `None` switches the execution to unbounded integers.
    pub fn create_entry_state(
        ctx: &'ctx Context,
        instructions: Vec<Instruction>,
        stdin: Option<Vec<Value<'ctx>>>,
        bitlength: Option<u32>,
    ) -> State<'ctx> {
        let labels = Rc::new(collect_labels(&instructions));
        State {
            ctx,
            ip: 0,
            stack: Vec::new(),
            callstack: Vec::new(),
            heap: HashMap::new(),
            labels,
            instructions: instructions.into(),
            input: stdin.map(VecDeque::from).unwrap_or_default(),
            stdin: Vec::new(),
            stdout: Vec::new(),
            var_to_type: HashMap::new(),
            solver: ConstraintStore::new(ctx),
            bitlength,
        }
    }

    /// Instruction under the pointer, or `None` once the pointer leaves the
    /// program. An out-of-range pointer is a terminal condition, never an
    /// error.
    pub fn instruction(&self) -> Option<&Instruction> {
        self.instructions.get(self.ip)
    }

    /// Whether this state's path constraints are satisfiable. Refreshes the
    /// solver's model cache on success.
    pub fn is_satisfiable(&mut self) -> bool {
        self.solver.is_satisfiable()
    }

    /// Execute the instruction under the pointer.
    pub fn step(&mut self) -> Result<Step<'ctx>, ExecError> {
        let Some(instruction) = self.instruction().copied() else {
            return Ok(Step::Terminate);
        };
        match instruction.opcode {
            // IO
            Opcode::ReadChar => self.read_input(VarType::Char),
            Opcode::ReadNumber => self.read_input(VarType::Number),
            Opcode::PrintChar => self.print_char(),
            Opcode::PrintNumber => self.print_number(),
            // Stack manipulation
            Opcode::Push => {
                let value = self.parameter(&instruction)?;
                self.stack.push(Value::Concrete(value));
                self.advance()
            }
            Opcode::DupTop => {
                let top = self.stack_peek()?.clone();
                self.stack.push(top);
                self.advance()
            }
            Opcode::SwapTop2 => {
                let first = self.stack_pop()?;
                let second = self.stack_pop()?;
                self.stack.push(first);
                self.stack.push(second);
                self.advance()
            }
            Opcode::DiscardTop => {
                self.stack_pop()?;
                self.advance()
            }
            Opcode::CopyToTop => {
                let depth = self.parameter(&instruction)?;
                self.copy_to_top(depth)
            }
            Opcode::SlideNOff => {
                let count = self.parameter(&instruction)?;
                self.slide_n_off(count)
            }
            // Arithmetic
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.arithmetic(instruction.opcode)
            }
            // Flow control
            Opcode::Mark => self.advance(),
            Opcode::Call => {
                let target = self.label_target(self.parameter(&instruction)?)?;
                self.callstack.push(self.ip + 1);
                self.ip = target;
                Ok(Step::Continue)
            }
            Opcode::Jump => {
                self.ip = self.label_target(self.parameter(&instruction)?)?;
                Ok(Step::Continue)
            }
            Opcode::JumpIfZero => {
                let top = self.stack_pop()?;
                self.conditional_jump(top.eq_zero(), self.parameter(&instruction)?)
            }
            Opcode::JumpIfNegative => {
                let top = self.stack_pop()?;
                self.conditional_jump(top.lt_zero(), self.parameter(&instruction)?)
            }
            Opcode::Return => {
                self.ip = self.callstack.pop().ok_or(ExecError::EmptyCallstack)?;
                Ok(Step::Continue)
            }
            Opcode::Exit => {
                self.ip += 1;
                Ok(Step::Terminate)
            }
            // Heap access
            Opcode::Store => {
                let value = self.stack_pop()?;
                let index = self.stack_pop()?;
                self.heap.insert(index.key(), value);
                self.advance()
            }
            Opcode::Retrieve => {
                let index = self.stack_pop()?;
                // Reads of absent slots materialize zero.
                let value = self
                    .heap
                    .get(&index.key())
                    .cloned()
                    .unwrap_or(Value::Concrete(0));
                self.stack.push(value);
                self.advance()
            }
        }
    }

    /// Concretize the consumed input log under the current model.
    pub fn concretize(&self) -> Result<Vec<u8>, ExecError> {
        self.concretize_buffer(&self.stdin)
    }

    /// Concretize an arbitrary buffer of input values under the current
    /// model: CHAR-tagged values render as their single byte, NUMBER-tagged
    /// values as their decimal representation.
    pub fn concretize_buffer(&self, buffer: &[Value<'ctx>]) -> Result<Vec<u8>, ExecError> {
        let mut bytes = Vec::new();
        for value in buffer {
            let concrete = self.solver.eval_value(value)?;
            match self.var_to_type.get(&value.key()) {
                Some(VarType::Char) => {
                    let byte = u8::try_from(concrete).map_err(|_| {
                        ExecError::Execution(format!("unable to convert {} to char", concrete))
                    })?;
                    bytes.push(byte);
                }
                Some(VarType::Number) => {
                    bytes.extend_from_slice(concrete.to_string().as_bytes());
                }
                None => {
                    return Err(ExecError::Execution("unknown variable type".to_string()));
                }
            }
        }
        Ok(bytes)
    }

    fn advance(&mut self) -> Result<Step<'ctx>, ExecError> {
        self.ip += 1;
        Ok(Step::Continue)
    }

    fn parameter(&self, instruction: &Instruction) -> Result<i64, ExecError> {
        instruction
            .parameter
            .ok_or_else(|| ExecError::Execution("instruction is missing its parameter".to_string()))
    }

    fn stack_pop(&mut self) -> Result<Value<'ctx>, ExecError> {
        self.stack.pop().ok_or(ExecError::EmptyStack)
    }

    fn stack_peek(&self) -> Result<&Value<'ctx>, ExecError> {
        self.stack.last().ok_or(ExecError::EmptyStack)
    }

    fn label_target(&self, label: i64) -> Result<usize, ExecError> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(ExecError::UnknownLabel(label))
    }

    /// Consume one input value: dequeue a pre-supplied value, or allocate a
    /// fresh symbolic byte constrained to `0..=0xFF`. The value lands in the
    /// heap at the popped address. An infeasible path after the read
    /// terminates the state.
    fn read_input(&mut self, var_type: VarType) -> Result<Step<'ctx>, ExecError> {
        let address = self.stack_pop()?;
        let value = match self.input.pop_front() {
            Some(value) => value,
            None => self.fresh_input_symbol(),
        };
        if let Value::Symbolic(term) = &value {
            self.solver.declare(term.clone());
        }
        self.stdin.push(value.clone());
        if !self.solver.is_satisfiable() {
            debug!("input at ip {} made the path infeasible", self.ip);
            return Ok(Step::Terminate);
        }
        self.var_to_type.insert(value.key(), var_type);
        self.heap.insert(address.key(), value);
        self.advance()
    }

    fn fresh_input_symbol(&mut self) -> Value<'ctx> {
        let name = format!("input_{}", self.stdin.len());
        match self.bitlength {
            Some(width) => {
                let symbol = BV::new_const(self.ctx, name, width);
                let low = symbol.bvsge(&BV::from_i64(self.ctx, 0, width));
                let high = symbol.bvsle(&BV::from_i64(self.ctx, 0xFF, width));
                self.solver.add(Bool::and(self.ctx, &[&low, &high]));
                Value::Symbolic(Term::Bv(symbol))
            }
            None => {
                let symbol = Int::new_const(self.ctx, name);
                let low = symbol.ge(&Int::from_i64(self.ctx, 0));
                let high = symbol.le(&Int::from_i64(self.ctx, 0xFF));
                self.solver.add(Bool::and(self.ctx, &[&low, &high]));
                Value::Symbolic(Term::Int(symbol))
            }
        }
    }

    fn print_char(&mut self) -> Result<Step<'ctx>, ExecError> {
        let top = self.stack_pop()?;
        let value = self.solver.eval_value(&top)?;
        let byte = u8::try_from(value)
            .map_err(|_| ExecError::Execution(format!("unable to convert {} to char", value)))?;
        self.stdout.push(vec![byte]);
        self.advance()
    }

    fn print_number(&mut self) -> Result<Step<'ctx>, ExecError> {
        let top = self.stack_pop()?;
        let value = self.solver.eval_value(&top)?;
        self.stdout.push(value.to_string().into_bytes());
        self.advance()
    }

    fn copy_to_top(&mut self, depth: i64) -> Result<Step<'ctx>, ExecError> {
        let depth = usize::try_from(depth).map_err(|_| ExecError::EmptyStack)?;
        let index = self
            .stack
            .len()
            .checked_sub(1 + depth)
            .ok_or(ExecError::EmptyStack)?;
        let value = self.stack[index].clone();
        self.stack.push(value);
        self.advance()
    }

    fn slide_n_off(&mut self, count: i64) -> Result<Step<'ctx>, ExecError> {
        let top = self.stack_pop()?;
        for _ in 0..count.max(0) {
            self.stack_pop()?;
        }
        self.stack.push(top);
        self.advance()
    }

    /// Pop `rhs` then `lhs` (the right operand sits on top) and push
    /// `lhs op rhs`. Division and modulo first check the divisor against the
    /// model.
    fn arithmetic(&mut self, opcode: Opcode) -> Result<Step<'ctx>, ExecError> {
        let rhs = self.stack_pop()?;
        let lhs = self.stack_pop()?;
        let result = match opcode {
            Opcode::Add => lhs.add(&rhs),
            Opcode::Sub => lhs.sub(&rhs),
            Opcode::Mul => lhs.mul(&rhs),
            Opcode::Div | Opcode::Mod => {
                if self.solver.eval_value(&rhs)? == 0 {
                    return Err(ExecError::DivideByZero);
                }
                if opcode == Opcode::Div {
                    lhs.div_floor(&rhs)
                } else {
                    lhs.mod_floor(&rhs)
                }
            }
            _ => unreachable!("non-arithmetic opcode dispatched to arithmetic"),
        };
        self.stack.push(result);
        self.advance()
    }

    /// Take or skip a conditional jump.
    ///
    /// A concrete condition resolves in place. A symbolic condition splits
    /// the state: the cached model decides which side this state keeps (no
    /// solver query needed), and the sibling survives only if its negated
    /// side is itself satisfiable.
    fn conditional_jump(
        &mut self,
        condition: Condition<'ctx>,
        label: i64,
    ) -> Result<Step<'ctx>, ExecError> {
        let target = self.label_target(label)?;
        let expr = match condition {
            Condition::Concrete(true) => {
                self.ip = target;
                return Ok(Step::Continue);
            }
            Condition::Concrete(false) => {
                return self.advance();
            }
            Condition::Symbolic(expr) => expr,
        };

        let fork_ip = self.ip;
        let mut sibling = self.clone();
        let negated = expr.not();
        if self
            .solver
            .eval_condition(&Condition::Symbolic(expr.clone()))?
        {
            self.solver.add(expr);
            self.ip = target;
            sibling.solver.add(negated);
            sibling.ip = fork_ip + 1;
        } else {
            self.solver.add(negated);
            self.ip = fork_ip + 1;
            sibling.solver.add(expr);
            sibling.ip = target;
        }

        if sibling.solver.is_satisfiable() {
            debug!("forked at ip {}", fork_ip);
            Ok(Step::Fork(sibling))
        } else {
            Ok(Step::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Opcode;
    use z3::Config;

    fn op(opcode: Opcode) -> Instruction {
        Instruction::new(opcode, None)
    }

    fn push(value: i64) -> Instruction {
        Instruction::new(Opcode::Push, Some(value))
    }

    fn entry<'ctx>(ctx: &'ctx Context, instructions: Vec<Instruction>) -> State<'ctx> {
        State::create_entry_state(ctx, instructions, None, Some(DEFAULT_BITLENGTH))
    }

    fn run_concrete(state: &mut State<'_>) {
        while let Ok(Step::Continue) = state.step() {}
    }

    #[test]
    fn push_dup_swap_discard() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(
            &ctx,
            vec![
                push(1),
                push(2),
                op(Opcode::DupTop),
                op(Opcode::SwapTop2),
                op(Opcode::DiscardTop),
            ],
        );
        for _ in 0..5 {
            assert!(matches!(state.step(), Ok(Step::Continue)));
        }
        // [1, 2, 2] after dup, [1, 2, 2] swapped leaves [1, 2, 2] with the
        // top two exchanged, then the discard drops the new top.
        let values: Vec<i64> = state
            .stack
            .iter()
            .map(|v| match v {
                Value::Concrete(n) => *n,
                Value::Symbolic(_) => panic!("expected concrete stack"),
            })
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn copy_to_top_reaches_below() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(
            &ctx,
            vec![
                push(10),
                push(20),
                push(30),
                Instruction::new(Opcode::CopyToTop, Some(2)),
            ],
        );
        run_concrete(&mut state);
        assert!(matches!(state.stack.last(), Some(Value::Concrete(10))));
        assert_eq!(state.stack.len(), 4);
    }

    #[test]
    fn copy_to_top_underflow_errors() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(1), Instruction::new(Opcode::CopyToTop, Some(5))]);
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert!(matches!(state.step(), Err(ExecError::EmptyStack)));
    }

    #[test]
    fn slide_keeps_the_top() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(
            &ctx,
            vec![
                push(1),
                push(2),
                push(3),
                Instruction::new(Opcode::SlideNOff, Some(1)),
            ],
        );
        run_concrete(&mut state);
        let values: Vec<i64> = state
            .stack
            .iter()
            .map(|v| match v {
                Value::Concrete(n) => *n,
                Value::Symbolic(_) => panic!("expected concrete stack"),
            })
            .collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn heap_reads_default_to_zero() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(42), op(Opcode::Retrieve)]);
        run_concrete(&mut state);
        assert!(matches!(state.stack.last(), Some(Value::Concrete(0))));
    }

    #[test]
    fn heap_store_and_retrieve() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(
            &ctx,
            vec![
                push(7),   // index
                push(99),  // value
                op(Opcode::Store),
                push(7),
                op(Opcode::Retrieve),
            ],
        );
        run_concrete(&mut state);
        assert!(matches!(state.stack.last(), Some(Value::Concrete(99))));
    }

    #[test]
    fn call_and_return_use_the_callstack() {
        let ctx = Context::new(&Config::new());
        // CALL 0 jumps to the MARK, the RETURN comes back past the call.
        let mut state = entry(
            &ctx,
            vec![
                Instruction::new(Opcode::Call, Some(0)),
                op(Opcode::Exit),
                Instruction::new(Opcode::Mark, Some(0)),
                op(Opcode::Return),
            ],
        );
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert_eq!(state.ip, 2);
        assert_eq!(state.callstack, vec![1]);
        assert!(matches!(state.step(), Ok(Step::Continue))); // MARK
        assert!(matches!(state.step(), Ok(Step::Continue))); // RETURN
        assert_eq!(state.ip, 1);
        assert!(state.callstack.is_empty());
    }

    #[test]
    fn return_on_empty_callstack_errors() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![op(Opcode::Return)]);
        assert!(matches!(state.step(), Err(ExecError::EmptyCallstack)));
    }

    #[test]
    fn unknown_label_errors() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![Instruction::new(Opcode::Jump, Some(3))]);
        assert!(matches!(state.step(), Err(ExecError::UnknownLabel(3))));
    }

    #[test]
    fn division_by_zero_errors() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(1), push(0), op(Opcode::Div)]);
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert!(matches!(state.step(), Err(ExecError::DivideByZero)));
    }

    #[test]
    fn arithmetic_follows_floor_semantics() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(-7), push(2), op(Opcode::Div)]);
        run_concrete(&mut state);
        assert!(matches!(state.stack.last(), Some(Value::Concrete(-4))));
    }

    #[test]
    fn print_char_rejects_out_of_range_values() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(300), op(Opcode::PrintChar)]);
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert!(matches!(state.step(), Err(ExecError::Execution(_))));
    }

    #[test]
    fn exit_terminates() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![op(Opcode::Exit)]);
        assert!(matches!(state.step(), Ok(Step::Terminate)));
    }

    #[test]
    fn out_of_range_ip_terminates() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(1)]);
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert!(state.instruction().is_none());
        assert!(matches!(state.step(), Ok(Step::Terminate)));
    }

    #[test]
    fn read_allocates_a_constrained_symbol() {
        let ctx = Context::new(&Config::new());
        let mut state = entry(&ctx, vec![push(0), op(Opcode::ReadChar)]);
        run_concrete(&mut state);
        assert_eq!(state.stdin.len(), 1);
        assert!(state.stdin[0].is_symbolic());
        // The fresh byte is range-constrained, so its model value fits u8.
        let value = state.solver.eval_value(&state.stdin[0]).unwrap();
        assert!((0..=0xFF).contains(&value));
        assert_eq!(state.concretize().unwrap().len(), 1);
    }

    #[test]
    fn supplied_stdin_is_consumed_before_fresh_symbols() {
        let ctx = Context::new(&Config::new());
        let instructions = vec![push(0), op(Opcode::ReadChar), push(1), op(Opcode::ReadChar)];
        let mut state = State::create_entry_state(
            &ctx,
            instructions,
            Some(vec![Value::Concrete(b'A' as i64)]),
            Some(DEFAULT_BITLENGTH),
        );
        run_concrete(&mut state);
        assert_eq!(state.stdin.len(), 2);
        assert!(!state.stdin[0].is_symbolic());
        assert!(state.stdin[1].is_symbolic());
        let concretized = state.concretize().unwrap();
        assert_eq!(concretized[0], b'A');
    }

    #[test]
    fn symbolic_conditional_forks_into_disjoint_paths() {
        let ctx = Context::new(&Config::new());
        // Read a byte, then branch on it being zero.
        let instructions = vec![
            push(0),
            op(Opcode::ReadChar),
            push(0),
            op(Opcode::Retrieve),
            Instruction::new(Opcode::JumpIfZero, Some(0)),
            op(Opcode::Exit),
            Instruction::new(Opcode::Mark, Some(0)),
            op(Opcode::Exit),
        ];
        let mut state = entry(&ctx, instructions);
        for _ in 0..4 {
            assert!(matches!(state.step(), Ok(Step::Continue)));
        }
        let Ok(Step::Fork(mut sibling)) = state.step() else {
            panic!("expected a fork at the symbolic conditional");
        };
        assert_ne!(state.ip, sibling.ip);
        // Jointly exhaustive and pairwise exclusive: one side evaluates the
        // byte to zero, the other cannot.
        assert!(state.is_satisfiable());
        assert!(sibling.is_satisfiable());
        let own = state.solver.eval_value(&state.stdin[0]).unwrap();
        let other = sibling.solver.eval_value(&sibling.stdin[0]).unwrap();
        assert!((own == 0) != (other == 0));
    }

    #[test]
    fn concrete_conditional_does_not_fork() {
        let ctx = Context::new(&Config::new());
        let instructions = vec![
            push(0),
            Instruction::new(Opcode::JumpIfZero, Some(0)),
            op(Opcode::Exit),
            Instruction::new(Opcode::Mark, Some(0)),
        ];
        let mut state = entry(&ctx, instructions);
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert!(matches!(state.step(), Ok(Step::Continue)));
        assert_eq!(state.ip, 3);
    }
}
