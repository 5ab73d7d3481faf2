//! Street network loading from the serialized graph file.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::RoadGraph;
use crate::types::NetworkFile;

/// Load the road network from its JSON serialization and build the graph
/// with both spatial indexes.
pub fn load_network(path: &Path) -> Result<RoadGraph> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read road network {}", path.display()))?;
    let file: NetworkFile = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse road network {}", path.display()))?;

    let node_count = file.nodes.len();
    let edge_count = file.edges.len();
    let graph = RoadGraph::from_records(file)
        .with_context(|| format!("invalid road network {}", path.display()))?;

    info!(
        nodes = node_count,
        edges = edge_count,
        "Road network loaded"
    );

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_network_from_file() {
        let json = r#"{
            "nodes": [
                {"id": 10, "lat": 14.6500, "lon": 121.1000},
                {"id": 20, "lat": 14.6510, "lon": 121.1010}
            ],
            "edges": [
                {"u": 10, "v": 20, "k": 0, "length_m": 180.0, "road_class": "secondary"}
            ]
        }"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(json.as_bytes()).unwrap();

        let graph = load_network(f.path()).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.edge_by_key(10, 20, 0).is_ok());
    }

    #[test]
    fn test_load_network_rejects_garbage() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"not json").unwrap();
        assert!(load_network(f.path()).is_err());
    }
}
