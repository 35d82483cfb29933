//! Integer expressions over the symbolic variables of an operator instance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Values bound to variables while evaluating or solving.
pub type Assignment = BTreeMap<Var, i64>;

/// A symbolic integer variable.
///
/// Serialized in the compact textual form used by rule files:
/// `i0.d2` (input 0, axis 2), `a1` (attribute 1), `o0.d3` (output 0, axis 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Var {
    Dim { input: usize, axis: usize },
    Attr(usize),
    Out { output: usize, axis: usize },
}

impl Var {
    pub const fn dim(input: usize, axis: usize) -> Self {
        Var::Dim { input, axis }
    }

    pub const fn out(output: usize, axis: usize) -> Self {
        Var::Out { output, axis }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Dim { input, axis } => write!(f, "i{input}.d{axis}"),
            Var::Attr(index) => write!(f, "a{index}"),
            Var::Out { output, axis } => write!(f, "o{output}.d{axis}"),
        }
    }
}

impl FromStr for Var {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid variable `{s}`");
        if let Some(rest) = s.strip_prefix('a') {
            return rest.parse().map(Var::Attr).map_err(|_| bad());
        }
        let (head, axis) = s.split_once(".d").ok_or_else(bad)?;
        let axis: usize = axis.parse().map_err(|_| bad())?;
        if let Some(input) = head.strip_prefix('i') {
            let input = input.parse().map_err(|_| bad())?;
            Ok(Var::Dim { input, axis })
        } else if let Some(output) = head.strip_prefix('o') {
            let output = output.parse().map_err(|_| bad())?;
            Ok(Var::Out { output, axis })
        } else {
            Err(bad())
        }
    }
}

impl From<Var> for String {
    fn from(var: Var) -> Self {
        var.to_string()
    }
}

impl TryFrom<String> for Var {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Integer expression tree.
///
/// Evaluation is checked: overflow and division by zero make the whole
/// expression undefined, and an undefined expression never satisfies a
/// comparison. Division floors toward negative infinity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Const(i64),
    Var(Var),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
}

/// Binary operators available to expression trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl BinOp {
    pub const ALL: [BinOp; 6] = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::Max, BinOp::Min];

    pub fn apply(self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    None
                } else {
                    let q = a.checked_div(b)?;
                    if (a % b != 0) && ((a < 0) != (b < 0)) { Some(q - 1) } else { Some(q) }
                }
            }
            BinOp::Max => Some(a.max(b)),
            BinOp::Min => Some(a.min(b)),
        }
    }

    pub const fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::Max | BinOp::Min)
    }

    pub fn build(self, lhs: Expr, rhs: Expr) -> Expr {
        let (l, r) = (Box::new(lhs), Box::new(rhs));
        match self {
            BinOp::Add => Expr::Add(l, r),
            BinOp::Sub => Expr::Sub(l, r),
            BinOp::Mul => Expr::Mul(l, r),
            BinOp::Div => Expr::Div(l, r),
            BinOp::Max => Expr::Max(l, r),
            BinOp::Min => Expr::Min(l, r),
        }
    }
}

impl Expr {
    pub const fn c(value: i64) -> Self {
        Expr::Const(value)
    }

    pub const fn v(var: Var) -> Self {
        Expr::Var(var)
    }

    pub const fn dim(input: usize, axis: usize) -> Self {
        Expr::Var(Var::dim(input, axis))
    }

    pub const fn attr(index: usize) -> Self {
        Expr::Var(Var::Attr(index))
    }

    pub fn max(self, other: Expr) -> Self {
        BinOp::Max.build(self, other)
    }

    pub fn min(self, other: Expr) -> Self {
        BinOp::Min.build(self, other)
    }

    /// Product of `factors`; the empty product is 1.
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        factors.into_iter().reduce(|acc, f| acc * f).unwrap_or(Expr::Const(1))
    }

    fn split(&self) -> Option<(BinOp, &Expr, &Expr)> {
        match self {
            Expr::Const(_) | Expr::Var(_) => None,
            Expr::Add(a, b) => Some((BinOp::Add, a, b)),
            Expr::Sub(a, b) => Some((BinOp::Sub, a, b)),
            Expr::Mul(a, b) => Some((BinOp::Mul, a, b)),
            Expr::Div(a, b) => Some((BinOp::Div, a, b)),
            Expr::Max(a, b) => Some((BinOp::Max, a, b)),
            Expr::Min(a, b) => Some((BinOp::Min, a, b)),
        }
    }

    /// Evaluate under `env`; `None` when a variable is unbound or the
    /// arithmetic is undefined.
    pub fn eval(&self, env: &Assignment) -> Option<i64> {
        match self {
            Expr::Const(c) => Some(*c),
            Expr::Var(v) => env.get(v).copied(),
            other => {
                let (op, a, b) = other.split()?;
                op.apply(a.eval(env)?, b.eval(env)?)
            }
        }
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<Var>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(v) => {
                out.insert(*v);
            }
            other => {
                if let Some((_, a, b)) = other.split() {
                    a.collect_vars(out);
                    b.collect_vars(out);
                }
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// Node count of the tree.
    pub fn size(&self) -> usize {
        match self.split() {
            None => 1,
            Some((_, a, b)) => 1 + a.size() + b.size(),
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        BinOp::Add.build(self, rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        BinOp::Sub.build(self, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        BinOp::Mul.build(self, rhs)
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        BinOp::Div.build(self, rhs)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Max(a, b) => write!(f, "max({a}, {b})"),
            Expr::Min(a, b) => write!(f, "min({a}, {b})"),
            other => {
                let Some((op, a, b)) = other.split() else { return Ok(()) };
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    _ => "/",
                };
                write!(f, "({a} {sym} {b})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(Var, i64)]) -> Assignment {
        pairs.iter().copied().collect()
    }

    #[test]
    fn var_text_round_trips() {
        for var in [Var::dim(0, 3), Var::Attr(12), Var::out(1, 0)] {
            assert_eq!(var.to_string().parse::<Var>().unwrap(), var);
        }
        assert!("x3".parse::<Var>().is_err());
        assert!("i0.dx".parse::<Var>().is_err());
    }

    #[test]
    fn division_floors_and_rejects_zero() {
        let e = Expr::c(-7) / Expr::c(2);
        assert_eq!(e.eval(&Assignment::new()), Some(-4));
        assert_eq!((Expr::c(7) / Expr::c(2)).eval(&Assignment::new()), Some(3));
        assert_eq!((Expr::c(1) / Expr::c(0)).eval(&Assignment::new()), None);
    }

    #[test]
    fn unbound_and_overflow_are_undefined() {
        let x = Var::dim(0, 0);
        assert_eq!(Expr::v(x).eval(&Assignment::new()), None);
        let big = Expr::c(i64::MAX) + Expr::v(x);
        assert_eq!(big.eval(&env(&[(x, 1)])), None);
    }

    #[test]
    fn eval_and_display() {
        let (a, b) = (Var::dim(0, 1), Var::Attr(0));
        let e = Expr::v(a).max(Expr::v(b)) - Expr::c(1);
        assert_eq!(e.eval(&env(&[(a, 4), (b, 9)])), Some(8));
        assert_eq!(e.to_string(), "(max(i0.d1, a0) - 1)");
        assert_eq!(e.vars().len(), 2);
        assert_eq!(e.size(), 5);
    }

    #[test]
    fn product_of_nothing_is_one() {
        assert_eq!(Expr::product([]).eval(&Assignment::new()), Some(1));
    }

    #[test]
    fn expr_json_uses_var_text() {
        let e = Expr::dim(0, 2) + Expr::c(1);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"i0.d2\""), "{json}");
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
