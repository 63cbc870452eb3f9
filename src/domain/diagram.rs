//! Structured description of a network architecture diagram.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramNode {
    pub id: String,
    pub name: String,
    /// `server`, `branch`, `headquarters`, `db_management`, `database`, …
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub has_local_db: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramConnection {
    pub source_id: String,
    pub target_id: String,
    #[serde(default)]
    pub label: String,
    /// `network`, `local_db_access`, `management_link`, `sales_report`, …
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bidirectional,
    /// Also stands in for any direction value that is not recognised.
    #[default]
    #[serde(other)]
    Unidirectional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramData {
    #[serde(default)]
    pub company_name: Option<String>,
    pub nodes: Vec<DiagramNode>,
    #[serde(default)]
    pub connections: Vec<DiagramConnection>,
    #[serde(default)]
    pub general_network_description: String,
}

impl DiagramData {
    /// A distributed-branches architecture used as the reference payload.
    pub fn example() -> Self {
        let node = |id: &str, name: &str, kind: &str| DiagramNode {
            id: id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            has_local_db: false,
        };
        let link = |source: &str, target: &str, label: &str, kind: &str| DiagramConnection {
            source_id: source.to_string(),
            target_id: target.to_string(),
            label: label.to_string(),
            kind: kind.to_string(),
            direction: Direction::Unidirectional,
        };

        DiagramData {
            company_name: Some("Arquitectura de Sucursales Distribuidas".to_string()),
            nodes: vec![
                node("Servidor_Central", "Servidor", "server"),
                node("Sinaloa_Branch", "Sinaloa", "branch"),
                node("Baja_California_Sur_Branch", "Baja California Sur", "branch"),
                node("Veracruz_Branch", "Veracruz", "branch"),
                node("Yucatan_HQ", "Yucatán", "headquarters"),
                node("Gestion_BD_Yucatan", "Gestión de las BD", "db_management"),
                node("BD_Sinaloa", "BD", "database"),
                node("BD_BCS", "BD", "database"),
                node("BD_Veracruz", "BD", "database"),
                node("BD_Yucatan", "BD", "database"),
            ],
            connections: vec![
                link("Servidor_Central", "Sinaloa_Branch", "IP", "network"),
                link("Servidor_Central", "Baja_California_Sur_Branch", "IP", "network"),
                link("Servidor_Central", "Veracruz_Branch", "IP", "network"),
                link("Servidor_Central", "Yucatan_HQ", "IP", "network"),
                link("Sinaloa_Branch", "BD_Sinaloa", "", "local_db_access"),
                link("Baja_California_Sur_Branch", "BD_BCS", "", "local_db_access"),
                link("Veracruz_Branch", "BD_Veracruz", "", "local_db_access"),
                link("Yucatan_HQ", "BD_Yucatan", "", "local_db_access"),
                link("Yucatan_HQ", "Gestion_BD_Yucatan", "", "management_link"),
            ],
            general_network_description: "Las bases de datos son homogéneas y utilizan \
                fragmentación de datos. La sede principal (Yucatán) puede acceder a las BD de \
                las sucursales vía IP, y usuarios con permisos de vista pueden consultar la \
                información almacenada."
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_payload_with_defaults() {
        let data: DiagramData = serde_json::from_str(
            r#"{
                "company_name": "Acme",
                "nodes": [{ "id": "a", "name": "A", "type": "server" }],
                "connections": [
                    { "source_id": "a", "target_id": "a", "type": "network", "direction": "bidirectional" }
                ]
            }"#,
        )
        .expect("payload parses");

        assert_eq!(data.nodes[0].kind, "server");
        assert!(!data.nodes[0].has_local_db);
        assert_eq!(data.connections[0].label, "");
        assert_eq!(data.connections[0].direction, Direction::Bidirectional);
        assert!(data.general_network_description.is_empty());
    }

    #[test]
    fn unknown_direction_is_treated_as_unidirectional() {
        let connection: DiagramConnection = serde_json::from_str(
            r#"{ "source_id": "a", "target_id": "b", "type": "network", "direction": "one-way" }"#,
        )
        .expect("connection parses");

        assert_eq!(connection.direction, Direction::Unidirectional);
    }

    #[test]
    fn example_round_trips_through_json() {
        let example = DiagramData::example();
        let json = serde_json::to_string(&example).expect("serialize");
        let parsed: DiagramData = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, example);
        assert!(json.contains("\"type\":\"headquarters\""));
    }
}
