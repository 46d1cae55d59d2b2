//! Plain-text tables describing the engine and protocol state.
//!
//! Each function renders one snapshot as fixed-width columns, header first.
//! The node logs them at startup and on demand; nothing parses them.

use std::fmt::Write;

use avroute_core::protocol::messages::MAX_COST;
use avroute_core::RoutingGraph;

use super::cost_distribution::CostDistributionHandler;
use super::cost_table::TableKind;

/// Renders `rows` under `headers`, padding each column to its widest cell.
fn render(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }
    out
}

pub fn connections_table(graph: &RoutingGraph) -> String {
    let rows = graph
        .connections()
        .into_iter()
        .map(|c| {
            vec![
                c.id.to_string(),
                c.source.to_string(),
                c.destination.to_string(),
                c.connection_type.to_string(),
            ]
        })
        .collect();
    render(&["ID", "SOURCE", "DESTINATION", "TYPE"], rows)
}

/// One line per claimed `(connection, flag)`.
pub fn usages_table(graph: &RoutingGraph) -> String {
    let rows = graph
        .usages()
        .into_iter()
        .flat_map(|usage| {
            usage.claims.into_iter().map(move |(flag, claim)| {
                let rooms: Vec<String> = claim.rooms.iter().map(|r| r.to_string()).collect();
                vec![
                    usage.connection.to_string(),
                    flag.to_string(),
                    claim.source.to_string(),
                    rooms.join(","),
                ]
            })
        })
        .collect();
    render(&["CONNECTION", "TYPE", "SOURCE", "ROOMS"], rows)
}

pub fn sources_table(graph: &RoutingGraph) -> String {
    let rows = graph
        .sources()
        .into_iter()
        .map(|s| {
            vec![
                s.id.0.to_string(),
                s.name,
                s.endpoint.to_string(),
                s.connection_type.to_string(),
                locality(s.remote).to_string(),
            ]
        })
        .collect();
    render(&["ID", "NAME", "ENDPOINT", "TYPE", "WHERE"], rows)
}

pub fn destinations_table(graph: &RoutingGraph) -> String {
    let rows = graph
        .destinations()
        .into_iter()
        .map(|d| {
            vec![
                d.id.0.to_string(),
                d.name,
                d.endpoint.to_string(),
                d.connection_type.to_string(),
                locality(d.remote).to_string(),
            ]
        })
        .collect();
    render(&["ID", "NAME", "ENDPOINT", "TYPE", "WHERE"], rows)
}

fn locality(remote: bool) -> &'static str {
    if remote {
        "remote"
    } else {
        "local"
    }
}

pub fn cost_table(handler: &CostDistributionHandler, kind: TableKind) -> String {
    let rows = handler
        .cost_rows(kind)
        .into_iter()
        .map(|(id, row)| {
            let cost = if row.cost >= MAX_COST {
                "unreachable".to_string()
            } else {
                format!("{:.1}", row.cost)
            };
            let via = row
                .route_to
                .map_or_else(|| "-".to_string(), |peer| peer.to_string());
            vec![id.to_string(), row.name, cost, via]
        })
        .collect();
    render(&["ID", "NAME", "COST", "VIA"], rows)
}

pub fn peers_table(handler: &CostDistributionHandler) -> String {
    let rows = handler
        .peers()
        .into_iter()
        .map(|p| {
            vec![
                p.id.to_string(),
                p.name,
                p.placeholder.to_string(),
                if p.discovered { "connected" } else { "lost" }.to_string(),
                p.tie_lines.to_string(),
            ]
        })
        .collect();
    render(&["PEER", "NAME", "PLACEHOLDER", "STATE", "TIE LINES"], rows)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use avroute_core::{
        Connection, ConnectionId, ConnectionType, ControlRegistry, EndpointInfo, Source, SourceId,
    };

    fn graph() -> RoutingGraph {
        let graph = RoutingGraph::new(Arc::new(ControlRegistry::new()));
        graph
            .add_connection(Connection::new(
                ConnectionId(1),
                EndpointInfo::new(1, 0, 1),
                EndpointInfo::new(10, 0, 2),
                ConnectionType::VIDEO,
            ))
            .expect("valid connection");
        graph.add_source(Source {
            id: SourceId(4),
            name: "Document camera".to_string(),
            endpoint: EndpointInfo::new(1, 0, 1),
            connection_type: ConnectionType::VIDEO,
            remote: false,
        });
        graph
    }

    #[test]
    fn test_render_pads_columns_to_widest_cell() {
        let text = render(
            &["A", "B"],
            vec![vec!["long cell".to_string(), "x".to_string()]],
        );

        assert_eq!(text, "A          B\nlong cell  x\n");
    }

    #[test]
    fn test_connections_table_lists_each_link() {
        let text = connections_table(&graph());

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("1:0:1"));
        assert!(lines[1].contains("10:0:2"));
    }

    #[test]
    fn test_sources_table_marks_local_entries() {
        let text = sources_table(&graph());

        assert!(text.contains("Document camera"));
        assert!(text.lines().nth(1).unwrap().ends_with("local"));
    }

    #[test]
    fn test_usages_table_is_header_only_when_nothing_is_claimed() {
        assert_eq!(usages_table(&graph()).lines().count(), 1);
    }
}
