//! Path-constraint store.
//!
//! Wraps the SMT solver behind the small surface the interpreter needs:
//! accumulate Boolean constraints, answer satisfiability, and cache a model
//! so that terms can be evaluated without re-querying the solver. A fresh
//! solver session is created for every satisfiability check; the store
//! itself is plain data and cheap to clone when a state forks.

use tracing::{debug, warn};
use z3::ast::{Ast, BV, Bool, Int};
use z3::{Context, SatResult, Solver};

use crate::errors::ExecError;
use crate::value::{Condition, Term, Value};

/// Accumulated path constraints plus a cached satisfying model.
///
/// The model cache is advisory: it is overwritten by every successful
/// [`is_satisfiable`](ConstraintStore::is_satisfiable) call and deliberately
/// survives `add`, so evaluation is only meaningful once the current path
/// has been checked satisfiable.
#[derive(Clone)]
pub struct ConstraintStore<'ctx> {
    ctx: &'ctx Context,
    constraints: Vec<Bool<'ctx>>,
    /// Terms whose model valuations are cached; the interpreter declares
    /// every input symbol it allocates or consumes.
    terms: Vec<Term<'ctx>>,
    /// Term-to-numeral bindings from the last satisfying model.
    model_cache: Vec<(Term<'ctx>, Term<'ctx>)>,
}

impl<'ctx> ConstraintStore<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        ConstraintStore {
            ctx,
            constraints: Vec::new(),
            terms: Vec::new(),
            model_cache: Vec::new(),
        }
    }

    /// Append one constraint to the path condition.
    pub fn add(&mut self, constraint: Bool<'ctx>) {
        self.constraints.push(constraint);
    }

    /// Append several constraints at once.
    pub fn add_all<I>(&mut self, constraints: I)
    where
        I: IntoIterator<Item = Bool<'ctx>>,
    {
        self.constraints.extend(constraints);
    }

    /// Register a term whose model valuation should be cached by future
    /// satisfiability checks.
    pub fn declare(&mut self, term: Term<'ctx>) {
        self.terms.push(term);
    }

    /// Number of accumulated constraints.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Whether the accumulated path condition is satisfiable.
    ///
    /// On sat, the model cache is replaced with the new model's valuation of
    /// every declared term. An `unknown` solver verdict is treated as
    /// unsatisfiable.
    pub fn is_satisfiable(&mut self) -> bool {
        let solver = Solver::new(self.ctx);
        for constraint in &self.constraints {
            solver.assert(constraint);
        }
        match solver.check() {
            SatResult::Sat => {
                if let Some(model) = solver.get_model() {
                    self.model_cache.clear();
                    for term in &self.terms {
                        let valuation = match term {
                            Term::Bv(bv) => model.eval(bv, true).map(Term::Bv),
                            Term::Int(int) => model.eval(int, true).map(Term::Int),
                        };
                        if let Some(numeral) = valuation {
                            self.model_cache.push((term.clone(), numeral));
                        }
                    }
                }
                debug!("sat with {} constraints", self.constraints.len());
                true
            }
            SatResult::Unsat => {
                debug!("unsat with {} constraints", self.constraints.len());
                false
            }
            SatResult::Unknown => {
                warn!("solver returned unknown; treating path as infeasible");
                false
            }
        }
    }

    /// Substitute every cached model binding into `expr`, then structurally
    /// simplify.
    fn reduce<T: Ast<'ctx> + Clone>(&self, expr: &T) -> T {
        let mut bv_pairs: Vec<(&BV<'ctx>, &BV<'ctx>)> = Vec::new();
        let mut int_pairs: Vec<(&Int<'ctx>, &Int<'ctx>)> = Vec::new();
        for (term, numeral) in &self.model_cache {
            match (term, numeral) {
                (Term::Bv(t), Term::Bv(n)) => bv_pairs.push((t, n)),
                (Term::Int(t), Term::Int(n)) => int_pairs.push((t, n)),
                _ => {}
            }
        }
        let mut expr: T = (*expr).clone();
        if !bv_pairs.is_empty() {
            expr = expr.substitute(&bv_pairs);
        }
        if !int_pairs.is_empty() {
            expr = expr.substitute(&int_pairs);
        }
        expr.simplify()
    }

    /// Simplify a term under the cached model.
    pub fn simplify(&self, term: &Term<'ctx>) -> Term<'ctx> {
        match term {
            Term::Bv(bv) => Term::Bv(self.reduce(bv)),
            Term::Int(int) => Term::Int(self.reduce(int)),
        }
    }

    /// Evaluate a value to a concrete integer under the cached model.
    ///
    /// Bitvector numerals are read with their unsigned interpretation;
    /// integer numerals are signed. Symbolic residue after simplification is
    /// a solver error: callers are expected to have checked satisfiability
    /// on the current path first.
    pub fn eval_value(&self, value: &Value<'ctx>) -> Result<i64, ExecError> {
        match value {
            Value::Concrete(v) => Ok(*v),
            Value::Symbolic(term) => match self.simplify(term) {
                Term::Bv(bv) => bv
                    .as_u64()
                    .map(|v| v as i64)
                    .ok_or_else(|| ExecError::Solver(format!("failed to evaluate: {}", bv))),
                Term::Int(int) => int
                    .as_i64()
                    .ok_or_else(|| ExecError::Solver(format!("failed to evaluate: {}", int))),
            },
        }
    }

    /// Evaluate a branch condition to a concrete Boolean under the cached
    /// model.
    pub fn eval_condition(&self, condition: &Condition<'ctx>) -> Result<bool, ExecError> {
        match condition {
            Condition::Concrete(b) => Ok(*b),
            Condition::Symbolic(expr) => {
                let reduced = self.reduce(expr);
                reduced
                    .as_bool()
                    .ok_or_else(|| ExecError::Solver(format!("failed to evaluate: {}", reduced)))
            }
        }
    }
}
