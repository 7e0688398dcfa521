use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

pub const MAX_GRAPH_NODES: usize = 256;
pub const MAX_GRAPH_EDGES: usize = 128;

fn number(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Trims a stored knowledge graph for display.
///
/// Keeps the `MAX_GRAPH_NODES` highest-pagerank nodes, then the
/// `MAX_GRAPH_EDGES` heaviest edges whose endpoints both survived,
/// dropping self-loops.
pub fn trim_graph(graph: &mut Value) {
    let Some(obj) = graph.as_object_mut() else {
        return;
    };
    let Some(Value::Array(nodes)) = obj.get_mut("nodes") else {
        return;
    };
    nodes.sort_by(|a, b| descending(number(a, "pagerank"), number(b, "pagerank")));
    nodes.truncate(MAX_GRAPH_NODES);

    let kept: HashSet<String> = nodes
        .iter()
        .filter_map(|n| n.get("id").and_then(Value::as_str).map(str::to_string))
        .collect();

    let Some(Value::Array(edges)) = obj.get_mut("edges") else {
        return;
    };
    edges.retain(|e| {
        let source = e.get("source").and_then(Value::as_str);
        let target = e.get("target").and_then(Value::as_str);
        match (source, target) {
            (Some(s), Some(t)) => s != t && kept.contains(s) && kept.contains(t),
            _ => false,
        }
    });
    edges.sort_by(|a, b| descending(number(a, "weight"), number(b, "weight")));
    edges.truncate(MAX_GRAPH_EDGES);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trim_graph_orders_and_filters() {
        let mut graph = json!({
            "nodes": [
                {"id": "a", "pagerank": 0.1},
                {"id": "b", "pagerank": 0.9},
                {"id": "c"}
            ],
            "edges": [
                {"source": "a", "target": "a", "weight": 9},
                {"source": "a", "target": "b", "weight": 1},
                {"source": "b", "target": "c", "weight": 5},
                {"source": "b", "target": "zz", "weight": 7}
            ]
        });

        trim_graph(&mut graph);

        let ids: Vec<_> = graph["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let edges = graph["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0]["weight"], 5);
        assert_eq!(edges[1]["weight"], 1);
    }

    #[test]
    fn test_trim_graph_caps_nodes() {
        let nodes: Vec<_> = (0..300).map(|i| json!({"id": i.to_string(), "pagerank": i})).collect();
        let mut graph = json!({ "nodes": nodes });

        trim_graph(&mut graph);

        let nodes = graph["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), MAX_GRAPH_NODES);
        assert_eq!(nodes[0]["id"], "299");
    }
}
