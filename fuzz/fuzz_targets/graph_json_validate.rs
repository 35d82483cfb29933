#![no_main]

use libfuzzer_sys::fuzz_target;
use opfuzz_graph::{Fingerprint, Graph};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if text.len() > 16 * 1024 {
        return;
    }
    // Decoding runs the invariant checker; anything it accepts must be
    // usable by the rest of the pipeline without panicking.
    let Ok(graph) = Graph::from_json(text) else {
        return;
    };
    assert!(graph.validate().is_ok());
    for output in &graph.outputs {
        assert!(graph.spec(*output).is_some(), "validated graph has dangling output {output:?}");
    }
    let fingerprint = Fingerprint::of(&graph);

    let encoded = graph.to_json().expect("validated graph encodes");
    let decoded = Graph::from_json(&encoded).expect("encoded graph decodes");
    assert_eq!(Fingerprint::of(&decoded), fingerprint);
    let _ = opfuzz_graph::to_dot(&decoded);
});
