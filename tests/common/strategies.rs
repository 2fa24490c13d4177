use proptest::prelude::*;
use proptest::strategy::Just;
use recal_core::{ExpiryPolicy, MeasurementNode, NodeDefinitions};

/// Strategy for generating node counts
pub fn node_count_strategy() -> impl Strategy<Value = usize> {
    1usize..=24
}

/// Strategy for generating expiry policies
pub fn expiry_strategy() -> impl Strategy<Value = ExpiryPolicy> {
    prop_oneof![
        Just(ExpiryPolicy::Never),
        Just(ExpiryPolicy::Always),
        (1u64..=86_400).prop_map(ExpiryPolicy::after_secs),
    ]
}

/// Node name for index `i`
pub fn node_name(i: usize) -> String {
    format!("n{i:02}")
}

/// Strategy for generating acyclic definitions.
///
/// Edges only ever point from a higher index to a lower one, so the result is a
/// DAG by construction. Returns the definitions and the number of nodes.
pub fn dag_definitions_strategy() -> impl Strategy<Value = (NodeDefinitions, usize)> {
    node_count_strategy().prop_flat_map(|count| {
        let edges = prop::collection::vec(prop::collection::vec(any::<bool>(), count), count);
        let expiries = prop::collection::vec(expiry_strategy(), count);
        (Just(count), edges, expiries).prop_map(|(count, edges, expiries)| {
            let nodes = (0..count).map(|i| {
                let mut node = MeasurementNode::new(node_name(i), "measure")
                    .with_expiry(expiries[i]);
                for j in 0..i {
                    if edges[i][j] {
                        node = node.depends_on(node_name(j));
                    }
                }
                node
            });
            (NodeDefinitions::from_nodes(nodes), count)
        })
    })
}

/// Strategy for generating definitions containing a ring of at least two nodes
/// plus an acyclic tail hanging off it. Returns the definitions and a ring member.
pub fn cyclic_definitions_strategy() -> impl Strategy<Value = (NodeDefinitions, String)> {
    (2usize..=8, 0usize..=4).prop_map(|(ring, tail)| {
        let mut nodes = Vec::with_capacity(ring + tail);
        for i in 0..ring {
            let next = (i + 1) % ring;
            nodes.push(MeasurementNode::new(format!("ring{i}"), "measure").depends_on(format!("ring{next}")));
        }
        for i in 0..tail {
            let parent = if i == 0 {
                "ring0".to_string()
            } else {
                format!("tail{}", i - 1)
            };
            nodes.push(MeasurementNode::new(format!("tail{i}"), "measure").depends_on(parent));
        }
        let entry = if tail > 0 {
            format!("tail{}", tail - 1)
        } else {
            "ring0".to_string()
        };
        (NodeDefinitions::from_nodes(nodes), entry)
    })
}
