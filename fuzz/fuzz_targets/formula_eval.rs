#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use opfuzz_ops::{Assignment, Atom, BinOp, Clause, Cmp, Expr, Formula, Var};

const VARS: [Var; 4] = [Var::dim(0, 0), Var::dim(0, 1), Var::dim(1, 0), Var::Attr(0)];

fn expr(u: &mut Unstructured<'_>, depth: u8) -> arbitrary::Result<Expr> {
    if depth == 0 || u.ratio(1, 3)? {
        return Ok(if u.arbitrary()? {
            Expr::c(u.int_in_range(-64..=64i64)?)
        } else {
            Expr::v(*u.choose(&VARS)?)
        });
    }
    let op = *u.choose(&BinOp::ALL)?;
    Ok(op.build(expr(u, depth - 1)?, expr(u, depth - 1)?))
}

fn formula(u: &mut Unstructured<'_>) -> arbitrary::Result<Formula> {
    let cmps = [Cmp::Eq, Cmp::Ne, Cmp::Lt, Cmp::Le, Cmp::Gt, Cmp::Ge];
    let mut formula = Formula::new();
    for _ in 0..u.int_in_range(0..=4u8)? {
        let mut atoms = Vec::new();
        for _ in 0..u.int_in_range(1..=3u8)? {
            atoms.push(Atom::new(expr(u, 3)?, *u.choose(&cmps)?, expr(u, 3)?));
        }
        formula.push(Clause::any(atoms));
    }
    Ok(formula)
}

#[derive(Debug)]
struct Input {
    formula: Formula,
    env: Assignment,
}

impl<'a> Arbitrary<'a> for Input {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let formula = formula(u)?;
        let mut env = Assignment::new();
        for var in VARS {
            if u.ratio(4, 5)? {
                env.insert(var, u.arbitrary()?);
            }
        }
        Ok(Input { formula, env })
    }
}

fuzz_target!(|input: Input| {
    let Input { formula, env } = input;
    // Overflow and division by zero make atoms false instead of panicking.
    let holds = formula.eval(&env);
    assert_eq!(holds, formula.clauses().iter().all(|c| c.eval(&env)));
    assert_eq!(holds, formula.violated(&env).next().is_none());

    let bound = formula.vars().iter().all(|v| env.contains_key(v));
    if bound {
        for clause in formula.clauses() {
            let closed = clause.status(&env) != opfuzz_ops::formula::Status::Open;
            assert!(closed, "fully bound clause left open: {clause:?}");
        }
    }

    let text = serde_json::to_string(&formula).expect("formula encodes");
    let decoded: Formula = serde_json::from_str(&text).expect("formula decodes");
    assert_eq!(decoded.eval(&env), holds);
    let _ = formula.to_string();
});
