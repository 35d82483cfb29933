use opfuzz_common::AssignmentStrategy;
use opfuzz_ops::{Assignment, Atom, Cmp, Domain, Expr, FiniteDomainSolver, Problem, SolveOutcome, Solver, Var};
use proptest::prelude::*;

const VARS: [Var; 3] = [Var::Dim { input: 0, axis: 0 }, Var::Dim { input: 1, axis: 0 }, Var::Attr(0)];

fn cmp_strategy() -> impl Strategy<Value = Cmp> {
    prop_oneof![Just(Cmp::Eq), Just(Cmp::Ne), Just(Cmp::Lt), Just(Cmp::Le), Just(Cmp::Gt), Just(Cmp::Ge)]
}

fn atom_strategy() -> impl Strategy<Value = Atom> {
    (0..3usize, 0..3usize, -2i64..8, cmp_strategy(), any::<bool>()).prop_map(|(a, b, c, cmp, sum)| {
        let lhs = if sum { Expr::v(VARS[a]) + Expr::v(VARS[b]) } else { Expr::v(VARS[a]) - Expr::v(VARS[b]) };
        Atom::new(lhs, cmp, Expr::c(c))
    })
}

fn brute_force(problem: &Problem) -> bool {
    let mut env = Assignment::new();
    for x in 0..=5 {
        for y in 0..=5 {
            for z in 0..=5 {
                env.insert(VARS[0], x);
                env.insert(VARS[1], y);
                env.insert(VARS[2], z);
                if problem.formula.eval(&env) {
                    return true;
                }
            }
        }
    }
    false
}

proptest! {
    #[test]
    fn solver_agrees_with_brute_force(
        atoms in prop::collection::vec(atom_strategy(), 1..5),
        seed in any::<u64>(),
        strategy in prop_oneof![
            Just(AssignmentStrategy::Random),
            Just(AssignmentStrategy::Smallest),
            Just(AssignmentStrategy::Largest),
        ],
    ) {
        let mut problem = Problem::new();
        for var in VARS {
            problem.bind(var, Domain::new(0, 5));
        }
        for atom in atoms {
            problem.require(atom);
        }
        let outcome = FiniteDomainSolver::new(strategy, seed).solve(&problem).unwrap();
        match outcome {
            SolveOutcome::Sat(model) => {
                prop_assert!(problem.formula.eval(&model));
                for var in VARS {
                    prop_assert!(Domain::new(0, 5).contains(model[&var]));
                }
            }
            SolveOutcome::Unsat => prop_assert!(!brute_force(&problem)),
            SolveOutcome::Unknown => prop_assert!(false, "small problems must be decided"),
        }
    }
}
