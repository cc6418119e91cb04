//! Mixed concrete/symbolic machine values.
//!
//! Arithmetic is closed over [`Value`]: two concrete operands reduce eagerly
//! on the concrete fast path, while any symbolic operand lifts the other
//! side into the same sort and produces a symbolic result. Division and
//! modulo follow floor semantics (rounding toward negative infinity) in both
//! the concrete and the symbolic rendition.

use z3::ast::{Ast, BV, Bool, Int};

/// A symbolic term in the active constraint theory.
///
/// An execution runs either in bitvector mode or in unbounded-integer mode;
/// the mode is fixed when the entry state is created and the two sorts never
/// mix within one execution.
#[derive(Clone)]
pub enum Term<'ctx> {
    Bv(BV<'ctx>),
    Int(Int<'ctx>),
}

/// A machine value: a concrete integer or a symbolic term.
#[derive(Clone)]
pub enum Value<'ctx> {
    Concrete(i64),
    Symbolic(Term<'ctx>),
}

/// A branch condition produced by comparing a [`Value`] against zero.
#[derive(Clone)]
pub enum Condition<'ctx> {
    Concrete(bool),
    Symbolic(Bool<'ctx>),
}

/// Identity key for heap slots and input type tags.
///
/// Concrete values compare numerically; symbolic values compare by
/// structural term identity, using the canonical rendering of the term
/// (Z3 hash-conses terms, so identical renderings mean identical terms).
/// Two structurally distinct terms that happen to be semantically equal
/// index different slots: no alias analysis is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Concrete(i64),
    Term(String),
}

impl<'ctx> Value<'ctx> {
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Value::Symbolic(_))
    }

    /// Identity key of this value, for heap indexing and type tags.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Concrete(v) => ValueKey::Concrete(*v),
            Value::Symbolic(Term::Bv(bv)) => ValueKey::Term(bv.to_string()),
            Value::Symbolic(Term::Int(int)) => ValueKey::Term(int.to_string()),
        }
    }

    pub fn add(&self, rhs: &Value<'ctx>) -> Value<'ctx> {
        if let (Value::Concrete(l), Value::Concrete(r)) = (self, rhs) {
            return Value::Concrete(l.wrapping_add(*r));
        }
        match promote(self, rhs) {
            (Term::Bv(l), Term::Bv(r)) => Value::Symbolic(Term::Bv(l.bvadd(&r))),
            (Term::Int(l), Term::Int(r)) => {
                Value::Symbolic(Term::Int(Int::add(l.get_ctx(), &[&l, &r])))
            }
            _ => unreachable!("mixed bitvector and integer terms in one execution"),
        }
    }

    pub fn sub(&self, rhs: &Value<'ctx>) -> Value<'ctx> {
        if let (Value::Concrete(l), Value::Concrete(r)) = (self, rhs) {
            return Value::Concrete(l.wrapping_sub(*r));
        }
        match promote(self, rhs) {
            (Term::Bv(l), Term::Bv(r)) => Value::Symbolic(Term::Bv(l.bvsub(&r))),
            (Term::Int(l), Term::Int(r)) => {
                Value::Symbolic(Term::Int(Int::sub(l.get_ctx(), &[&l, &r])))
            }
            _ => unreachable!("mixed bitvector and integer terms in one execution"),
        }
    }

    pub fn mul(&self, rhs: &Value<'ctx>) -> Value<'ctx> {
        if let (Value::Concrete(l), Value::Concrete(r)) = (self, rhs) {
            return Value::Concrete(l.wrapping_mul(*r));
        }
        match promote(self, rhs) {
            (Term::Bv(l), Term::Bv(r)) => Value::Symbolic(Term::Bv(l.bvmul(&r))),
            (Term::Int(l), Term::Int(r)) => {
                Value::Symbolic(Term::Int(Int::mul(l.get_ctx(), &[&l, &r])))
            }
            _ => unreachable!("mixed bitvector and integer terms in one execution"),
        }
    }

    /// Floor division. The divisor is known nonzero: the interpreter checks
    /// it against the model before dividing.
    pub fn div_floor(&self, rhs: &Value<'ctx>) -> Value<'ctx> {
        if let (Value::Concrete(l), Value::Concrete(r)) = (self, rhs) {
            return Value::Concrete(div_floor_i64(*l, *r));
        }
        match promote(self, rhs) {
            (Term::Bv(l), Term::Bv(r)) => Value::Symbolic(Term::Bv(bv_div_floor(&l, &r))),
            (Term::Int(l), Term::Int(r)) => Value::Symbolic(Term::Int(int_div_floor(&l, &r))),
            _ => unreachable!("mixed bitvector and integer terms in one execution"),
        }
    }

    /// Floor modulo: the result takes the divisor's sign.
    pub fn mod_floor(&self, rhs: &Value<'ctx>) -> Value<'ctx> {
        if let (Value::Concrete(l), Value::Concrete(r)) = (self, rhs) {
            return Value::Concrete(mod_floor_i64(*l, *r));
        }
        match promote(self, rhs) {
            // bvsmod already gives the remainder the divisor's sign.
            (Term::Bv(l), Term::Bv(r)) => Value::Symbolic(Term::Bv(l.bvsmod(&r))),
            (Term::Int(l), Term::Int(r)) => Value::Symbolic(Term::Int(int_mod_floor(&l, &r))),
            _ => unreachable!("mixed bitvector and integer terms in one execution"),
        }
    }

    /// Condition `self == 0`.
    pub fn eq_zero(&self) -> Condition<'ctx> {
        match self {
            Value::Concrete(v) => Condition::Concrete(*v == 0),
            Value::Symbolic(Term::Bv(bv)) => {
                let zero = BV::from_i64(bv.get_ctx(), 0, bv.get_size());
                Condition::Symbolic(bv._eq(&zero))
            }
            Value::Symbolic(Term::Int(int)) => {
                let zero = Int::from_i64(int.get_ctx(), 0);
                Condition::Symbolic(int._eq(&zero))
            }
        }
    }

    /// Condition `self < 0` (signed in bitvector mode).
    pub fn lt_zero(&self) -> Condition<'ctx> {
        match self {
            Value::Concrete(v) => Condition::Concrete(*v < 0),
            Value::Symbolic(Term::Bv(bv)) => {
                let zero = BV::from_i64(bv.get_ctx(), 0, bv.get_size());
                Condition::Symbolic(bv.bvslt(&zero))
            }
            Value::Symbolic(Term::Int(int)) => {
                let zero = Int::from_i64(int.get_ctx(), 0);
                Condition::Symbolic(int.lt(&zero))
            }
        }
    }
}

impl From<i64> for Value<'_> {
    fn from(v: i64) -> Self {
        Value::Concrete(v)
    }
}

impl<'ctx> From<BV<'ctx>> for Value<'ctx> {
    fn from(bv: BV<'ctx>) -> Self {
        Value::Symbolic(Term::Bv(bv))
    }
}

impl<'ctx> From<Int<'ctx>> for Value<'ctx> {
    fn from(int: Int<'ctx>) -> Self {
        Value::Symbolic(Term::Int(int))
    }
}

/// Lift both operands into a common symbolic sort. At least one operand is
/// symbolic; a concrete operand takes the other side's sort.
fn promote<'ctx>(lhs: &Value<'ctx>, rhs: &Value<'ctx>) -> (Term<'ctx>, Term<'ctx>) {
    match (lhs, rhs) {
        (Value::Symbolic(l), Value::Symbolic(r)) => (l.clone(), r.clone()),
        (Value::Symbolic(l), Value::Concrete(r)) => {
            let lifted = lift(*r, l);
            (l.clone(), lifted)
        }
        (Value::Concrete(l), Value::Symbolic(r)) => (lift(*l, r), r.clone()),
        (Value::Concrete(_), Value::Concrete(_)) => {
            unreachable!("concrete pairs reduce on the fast path")
        }
    }
}

fn lift<'ctx>(value: i64, like: &Term<'ctx>) -> Term<'ctx> {
    match like {
        Term::Bv(bv) => Term::Bv(BV::from_i64(bv.get_ctx(), value, bv.get_size())),
        Term::Int(int) => Term::Int(Int::from_i64(int.get_ctx(), value)),
    }
}

fn div_floor_i64(lhs: i64, rhs: i64) -> i64 {
    let quot = lhs.wrapping_div(rhs);
    if lhs.wrapping_rem(rhs) != 0 && (lhs < 0) != (rhs < 0) {
        quot - 1
    } else {
        quot
    }
}

fn mod_floor_i64(lhs: i64, rhs: i64) -> i64 {
    let rem = lhs.wrapping_rem(rhs);
    if rem != 0 && (rem < 0) != (rhs < 0) {
        rem + rhs
    } else {
        rem
    }
}

/// Floor division over signed bitvectors: `bvsdiv` truncates toward zero, so
/// shift the quotient down by one when the remainder is nonzero and the
/// operand signs differ.
fn bv_div_floor<'ctx>(lhs: &BV<'ctx>, rhs: &BV<'ctx>) -> BV<'ctx> {
    let ctx = lhs.get_ctx();
    let width = lhs.get_size();
    let zero = BV::from_i64(ctx, 0, width);
    let one = BV::from_i64(ctx, 1, width);
    let quot = lhs.bvsdiv(rhs);
    let rem = lhs.bvsrem(rhs);
    let signs_differ = lhs.bvslt(&zero)._eq(&rhs.bvslt(&zero)).not();
    let needs_fixup = Bool::and(ctx, &[&rem._eq(&zero).not(), &signs_differ]);
    needs_fixup.ite(&quot.bvsub(&one), &quot)
}

/// Floor division over unbounded integers: SMT `div` is Euclidean
/// (remainder always non-negative), which differs from floor only for
/// negative divisors.
fn int_div_floor<'ctx>(lhs: &Int<'ctx>, rhs: &Int<'ctx>) -> Int<'ctx> {
    let ctx = lhs.get_ctx();
    let zero = Int::from_i64(ctx, 0);
    let one = Int::from_i64(ctx, 1);
    let quot = lhs.div(rhs);
    let rem = lhs.modulo(rhs);
    let needs_fixup = Bool::and(ctx, &[&rem._eq(&zero).not(), &rhs.lt(&zero)]);
    needs_fixup.ite(&Int::sub(ctx, &[&quot, &one]), &quot)
}

fn int_mod_floor<'ctx>(lhs: &Int<'ctx>, rhs: &Int<'ctx>) -> Int<'ctx> {
    let ctx = lhs.get_ctx();
    let zero = Int::from_i64(ctx, 0);
    let rem = lhs.modulo(rhs);
    let needs_fixup = Bool::and(ctx, &[&rem._eq(&zero).not(), &rhs.lt(&zero)]);
    needs_fixup.ite(&Int::add(ctx, &[&rem, rhs]), &rem)
}
