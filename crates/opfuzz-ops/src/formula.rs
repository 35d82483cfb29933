//! Conjunctive normal form formulas over [`Expr`] comparisons.

use crate::expr::{Assignment, Expr, Var};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cmp::Eq => lhs == rhs,
            Cmp::Ne => lhs != rhs,
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        }
    }
}

/// One comparison `lhs cmp rhs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    pub lhs: Expr,
    pub cmp: Cmp,
    pub rhs: Expr,
}

impl Atom {
    pub fn new(lhs: Expr, cmp: Cmp, rhs: Expr) -> Self {
        Self { lhs, cmp, rhs }
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::new(lhs, Cmp::Eq, rhs)
    }

    pub fn ge(lhs: Expr, rhs: Expr) -> Self {
        Self::new(lhs, Cmp::Ge, rhs)
    }

    pub fn le(lhs: Expr, rhs: Expr) -> Self {
        Self::new(lhs, Cmp::Le, rhs)
    }

    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Self::new(lhs, Cmp::Gt, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Self::new(lhs, Cmp::Lt, rhs)
    }

    pub fn ne(lhs: Expr, rhs: Expr) -> Self {
        Self::new(lhs, Cmp::Ne, rhs)
    }

    /// `Some(truth)` when both sides evaluate, `None` when a side is unbound
    /// or undefined.
    pub fn try_eval(&self, env: &Assignment) -> Option<bool> {
        Some(self.cmp.holds(self.lhs.eval(env)?, self.rhs.eval(env)?))
    }

    pub fn eval(&self, env: &Assignment) -> bool {
        self.try_eval(env).unwrap_or(false)
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<Var>) {
        self.lhs.collect_vars(out);
        self.rhs.collect_vars(out);
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.cmp.symbol(), self.rhs)
    }
}

/// Disjunction of atoms. The empty clause is false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Clause(pub Vec<Atom>);

/// Truth of a clause under a partial assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    True,
    False,
    Open,
}

impl Clause {
    pub fn unit(atom: Atom) -> Self {
        Clause(vec![atom])
    }

    pub fn any(atoms: impl IntoIterator<Item = Atom>) -> Self {
        Clause(atoms.into_iter().collect())
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.0
    }

    pub fn eval(&self, env: &Assignment) -> bool {
        self.0.iter().any(|a| a.eval(env))
    }

    /// Three-valued evaluation: an atom whose variables are not all bound
    /// keeps the clause open unless another atom already holds.
    pub fn status(&self, env: &Assignment) -> Status {
        let mut open = false;
        for atom in &self.0 {
            let mut vars = BTreeSet::new();
            atom.collect_vars(&mut vars);
            if vars.iter().all(|v| env.contains_key(v)) {
                if atom.eval(env) {
                    return Status::True;
                }
            } else {
                open = true;
            }
        }
        if open { Status::Open } else { Status::False }
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<Var>) {
        for atom in &self.0 {
            atom.collect_vars(out);
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("false"),
            [single] => write!(f, "{single}"),
            atoms => {
                f.write_str("(")?;
                for (i, atom) in atoms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{atom}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Conjunction of clauses. The empty formula is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Formula(pub Vec<Clause>);

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, clause: Clause) {
        if !self.0.contains(&clause) {
            self.0.push(clause);
        }
    }

    pub fn push_atom(&mut self, atom: Atom) {
        self.push(Clause::unit(atom));
    }

    pub fn and(mut self, other: &Formula) -> Self {
        self.extend(other);
        self
    }

    pub fn extend(&mut self, other: &Formula) {
        for clause in &other.0 {
            self.push(clause.clone());
        }
    }

    pub fn eval(&self, env: &Assignment) -> bool {
        self.0.iter().all(|c| c.eval(env))
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        for clause in &self.0 {
            clause.collect_vars(&mut out);
        }
        out
    }

    /// The clauses violated by `env`, for diagnostics.
    pub fn violated<'a>(&'a self, env: &'a Assignment) -> impl Iterator<Item = &'a Clause> + 'a {
        self.0.iter().filter(move |c| !c.eval(env))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("true");
        }
        for (i, clause) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" & ")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}
