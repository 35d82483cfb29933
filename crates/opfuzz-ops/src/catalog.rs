//! Built-in operator catalog.

use crate::registry::OperatorKind;
use crate::signature::{AttrDomain, AttrSlot, InputSlot, Signature};
use crate::template::RuleTemplate;
use opfuzz_common::DType;

/// Largest value a numeric index attribute (slice bounds) may take.
pub const INDEX_ATTR_MAX: i64 = 16;

pub const UNARY_ANY: &[&str] = &["relu", "abs", "neg"];
pub const UNARY_FLOAT: &[&str] = &["sigmoid", "tanh", "exp", "log", "sqrt"];
pub const BINARY: &[&str] = &["add", "sub", "mul", "div", "maximum", "minimum"];
pub const REDUCE: &[&str] = &["reduce_sum", "reduce_mean", "reduce_max"];

/// Names of every built-in operator, in registration order.
pub fn builtin_names() -> Vec<&'static str> {
    let mut names = Vec::new();
    names.extend_from_slice(UNARY_ANY);
    names.extend_from_slice(UNARY_FLOAT);
    names.extend_from_slice(BINARY);
    names.extend_from_slice(REDUCE);
    names.extend_from_slice(&["softmax", "matmul", "concat", "transpose", "slice"]);
    names
}

fn kind(name: &str, signature: Signature, template: RuleTemplate) -> OperatorKind {
    OperatorKind { name: name.to_string(), signature, template }
}

fn axis(name: &str, max_rank: usize) -> AttrSlot {
    let max = max_rank.saturating_sub(1) as i64;
    AttrSlot::structural(name, AttrDomain::Int { min: 0, max })
}

/// Every built-in operator kind with ranks up to `max_rank`.
pub fn builtin_kinds(max_rank: usize) -> Vec<OperatorKind> {
    let any = DType::all();
    let floats = DType::floats();
    let mut kinds = Vec::new();

    for &name in UNARY_ANY {
        let sig = Signature { inputs: vec![InputSlot::new(0, max_rank, any)], attrs: vec![], outputs: 1 };
        kinds.push(kind(name, sig, RuleTemplate::Elementwise));
    }
    for &name in UNARY_FLOAT {
        let sig = Signature { inputs: vec![InputSlot::new(0, max_rank, floats)], attrs: vec![], outputs: 1 };
        kinds.push(kind(name, sig, RuleTemplate::Elementwise));
    }
    for &name in BINARY {
        let slot = InputSlot::new(0, max_rank, any);
        let sig = Signature { inputs: vec![slot.clone(), slot], attrs: vec![], outputs: 1 };
        kinds.push(kind(name, sig, RuleTemplate::Broadcast));
    }
    for &name in REDUCE {
        let sig = Signature {
            inputs: vec![InputSlot::new(1, max_rank, any)],
            attrs: vec![axis("axis", max_rank), AttrSlot::structural("keepdim", AttrDomain::Bool)],
            outputs: 1,
        };
        kinds.push(kind(name, sig, RuleTemplate::Reduce));
    }

    let softmax = Signature {
        inputs: vec![InputSlot::new(1, max_rank, floats)],
        attrs: vec![axis("axis", max_rank)],
        outputs: 1,
    };
    kinds.push(kind("softmax", softmax, RuleTemplate::Softmax));

    let mm_slot = InputSlot::new(2, max_rank.max(2), any);
    let matmul = Signature { inputs: vec![mm_slot.clone(), mm_slot], attrs: vec![], outputs: 1 };
    kinds.push(kind("matmul", matmul, RuleTemplate::Matmul));

    let cat_slot = InputSlot::new(1, max_rank, any);
    let concat =
        Signature { inputs: vec![cat_slot.clone(), cat_slot], attrs: vec![axis("axis", max_rank)], outputs: 1 };
    kinds.push(kind("concat", concat, RuleTemplate::Concat));

    let transpose = Signature {
        inputs: vec![InputSlot::new(2, max_rank.max(2), any)],
        attrs: vec![axis("dim0", max_rank), axis("dim1", max_rank)],
        outputs: 1,
    };
    kinds.push(kind("transpose", transpose, RuleTemplate::Transpose));

    let index = AttrDomain::Int { min: -1, max: INDEX_ATTR_MAX };
    let slice = Signature {
        inputs: vec![InputSlot::new(1, max_rank, any)],
        attrs: vec![axis("axis", max_rank), AttrSlot::numeric("start", index), AttrSlot::numeric("end", index)],
        outputs: 1,
    };
    kinds.push(kind("slice", slice, RuleTemplate::Slice));

    kinds
}
