//! Turns a [`DiagramData`] description into a styled DOT document.

use std::collections::HashMap;

use dot_writer::{Attributes, DotWriter, Scope};
use tracing::warn;

use crate::domain::{
    diagram::{DiagramConnection, DiagramData, DiagramNode, Direction},
    error::ValidationError,
};

const DEFAULT_TITLE: &str = "Diagrama de Arquitectura";
const FOOTER_ID: &str = "footer_description";

struct NodeStyle {
    shape: &'static str,
    fill: &'static str,
    font: &'static str,
}

struct EdgeStyle<'a> {
    color: &'static str,
    style: &'static str,
    label: &'a str,
}

pub fn to_dot(data: &DiagramData) -> Result<String, ValidationError> {
    let mut ids: HashMap<&str, String> = HashMap::with_capacity(data.nodes.len());
    for node in &data.nodes {
        if node.id.trim().is_empty() {
            return Err(ValidationError::diagram(format!(
                "node `{}` has an empty id",
                node.name
            )));
        }
        ids.insert(node.id.as_str(), graph_id(&node.id));
    }

    let mut output = Vec::new();
    {
        let mut writer = DotWriter::from(&mut output);
        writer.set_pretty_print(true);
        let mut digraph = writer.digraph();

        digraph
            .set("charset", "UTF-8", true)
            .set("rankdir", "TB", false)
            .set("labeljust", "c", true)
            .set("labelloc", "t", true)
            .set(
                "label",
                &escape(data.company_name.as_deref().unwrap_or(DEFAULT_TITLE)),
                true,
            )
            .set("fontsize", "20", false);
        digraph
            .node_attributes()
            .set("style", "filled", false)
            .set("fontname", "Helvetica", true)
            .set("fontsize", "10", false);
        digraph
            .edge_attributes()
            .set("fontname", "Helvetica", true)
            .set("fontsize", "8", false);

        for node in &data.nodes {
            draw_node(&mut digraph, &ids[node.id.as_str()], node);
        }

        for connection in &data.connections {
            let (Some(source), Some(target)) = (
                ids.get(connection.source_id.as_str()),
                ids.get(connection.target_id.as_str()),
            ) else {
                warn!(
                    target = "application::diagram",
                    op = "diagram::to_dot",
                    source_id = %connection.source_id,
                    target_id = %connection.target_id,
                    "Skipping connection with an unknown endpoint"
                );
                continue;
            };
            draw_edge(&mut digraph, source, target, connection);
        }

        if !data.general_network_description.trim().is_empty() {
            draw_footer(&mut digraph, &data.general_network_description);
            if let Some(last) = data.nodes.last() {
                digraph
                    .edge(quote(&ids[last.id.as_str()]), FOOTER_ID)
                    .attributes()
                    .set("style", "invis", false);
            }
        }
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}

fn draw_node(digraph: &mut Scope, id: &str, node: &DiagramNode) {
    let style = node_style(&node.kind);
    let label = if node.kind == "database" {
        "BD"
    } else {
        node.name.as_str()
    };
    digraph
        .node_named(quote(id))
        .set("label", &escape(label), true)
        .set("shape", style.shape, true)
        .set("fillcolor", style.fill, true)
        .set("fontcolor", style.font, true);
}

fn draw_edge(digraph: &mut Scope, source: &str, target: &str, connection: &DiagramConnection) {
    let style = edge_style(connection);
    let dir = match connection.direction {
        Direction::Unidirectional => "forward",
        Direction::Bidirectional => "both",
    };
    digraph
        .edge(quote(source), quote(target))
        .attributes()
        .set("label", &escape(style.label), true)
        .set("arrowhead", "normal", true)
        .set("color", style.color, true)
        .set("style", style.style, true)
        .set("dir", dir, false);
}

fn draw_footer(digraph: &mut Scope, description: &str) {
    let table = format!(
        "<<TABLE BORDER=\"0\" CELLBORDER=\"0\" CELLSPACING=\"0\">\
         <TR><TD ALIGN=\"LEFT\" WIDTH=\"500\">{}</TD></TR></TABLE>>",
        escape_html(description)
    );
    let mut sink = digraph.subgraph();
    sink.set("rank", "sink", false);
    sink.node_named(FOOTER_ID)
        .set("shape", "box", false)
        .set("style", "filled", true)
        .set("fillcolor", "lavenderblush", true)
        .set("color", "purple", true)
        .set("fontcolor", "black", true)
        .set("fontsize", "10", false)
        .set("label", &table, false);
}

fn node_style(kind: &str) -> NodeStyle {
    let (shape, fill, font) = match kind {
        "server" => ("ellipse", "lightskyblue", "black"),
        "branch" => ("box", "coral", "black"),
        "headquarters" => ("box", "darkgray", "white"),
        "db_management" => ("oval", "lightsteelblue", "black"),
        "database" => ("ellipse", "plum", "black"),
        _ => ("box", "white", "black"),
    };
    NodeStyle { shape, fill, font }
}

fn edge_style(connection: &DiagramConnection) -> EdgeStyle<'_> {
    let (color, style, label) = match connection.kind.as_str() {
        "sales_report" => ("darkgreen", "solid", "Ventas"),
        "inventory_report" => ("darkred", "solid", "Inventario"),
        "master_data_replication" => ("blue", "dashed", "Datos Maestros"),
        "network" => ("darkgreen", "solid", "IP"),
        "local_db_access" | "management_link" => ("darkgreen", "solid", ""),
        _ => ("darkgreen", "solid", connection.label.as_str()),
    };
    EdgeStyle {
        color,
        style,
        label,
    }
}

fn graph_id(id: &str) -> String {
    id.replace([' ', '-'], "_")
}

fn quote(id: &str) -> String {
    format!("\"{}\"", escape(id))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, name: &str, kind: &str) -> DiagramNode {
        DiagramNode {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            has_local_db: false,
        }
    }

    fn link(source: &str, target: &str, kind: &str, label: &str) -> DiagramConnection {
        DiagramConnection {
            source_id: source.into(),
            target_id: target.into(),
            label: label.into(),
            kind: kind.into(),
            direction: Direction::Unidirectional,
        }
    }

    #[test]
    fn example_produces_styled_digraph() {
        let dot = to_dot(&DiagramData::example()).expect("dot");
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("Arquitectura de Sucursales Distribuidas"));
        assert!(dot.contains("\"Baja_California_Sur_Branch\""));
        assert!(dot.contains("lightskyblue"));
        assert!(dot.contains("coral"));
        assert!(dot.contains("darkgray"));
        assert!(dot.contains("plum"));
        assert!(dot.contains("\"IP\""));
        assert!(dot.contains("rank=sink"));
        assert!(dot.contains("style=invis"));
        assert!(dot.contains("<TABLE"));
    }

    #[test]
    fn ids_are_normalised_and_quoted() {
        let data = DiagramData {
            company_name: None,
            nodes: vec![node("main-office one", "Main \"HQ\"", "headquarters")],
            connections: vec![],
            general_network_description: String::new(),
        };
        let dot = to_dot(&data).expect("dot");
        assert!(dot.contains("\"main_office_one\""));
        assert!(dot.contains("Main \\\"HQ\\\""));
        assert!(dot.contains(DEFAULT_TITLE));
        assert!(!dot.contains(FOOTER_ID));
    }

    #[test]
    fn connection_types_pick_their_styles() {
        let mut bidirectional = link("a", "b", "master_data_replication", "ignored");
        bidirectional.direction = Direction::Bidirectional;
        let data = DiagramData {
            company_name: Some("Acme".into()),
            nodes: vec![node("a", "A", "branch"), node("b", "B", "custom")],
            connections: vec![
                bidirectional,
                link("a", "b", "inventory_report", ""),
                link("b", "a", "vpn", "Tunnel"),
            ],
            general_network_description: String::new(),
        };
        let dot = to_dot(&data).expect("dot");
        assert!(dot.contains("Datos Maestros"));
        assert!(dot.contains("dashed"));
        assert!(dot.contains("dir=both"));
        assert!(dot.contains("Inventario"));
        assert!(dot.contains("darkred"));
        assert!(dot.contains("Tunnel"));
        assert!(!dot.contains("ignored"));
    }

    #[test]
    fn connections_to_unknown_nodes_are_skipped() {
        let data = DiagramData {
            company_name: None,
            nodes: vec![node("a", "A", "server")],
            connections: vec![link("a", "ghost", "network", "")],
            general_network_description: String::new(),
        };
        let dot = to_dot(&data).expect("dot");
        assert!(!dot.contains("ghost"));
        assert!(!dot.contains("->"));
    }

    #[test]
    fn footer_text_is_html_escaped() {
        let data = DiagramData {
            company_name: None,
            nodes: vec![node("a", "A", "server")],
            connections: vec![],
            general_network_description: "<b>R&D</b>".into(),
        };
        let dot = to_dot(&data).expect("dot");
        assert!(dot.contains("&lt;b&gt;R&amp;D&lt;/b&gt;"));
        assert!(dot.contains("style=invis"));
    }

    #[test]
    fn empty_node_id_is_rejected() {
        let data = DiagramData {
            company_name: None,
            nodes: vec![node("  ", "Nameless", "server")],
            connections: vec![],
            general_network_description: String::new(),
        };
        assert!(matches!(to_dot(&data), Err(ValidationError::Diagram(_))));
    }
}
