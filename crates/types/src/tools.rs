//! Tool metadata exposed through the aggregated catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool in the external catalog.
///
/// `name` is the externally visible name: equal to the service-local name
/// unless it collided with an earlier service, in which case it carries the
/// `service__tool` prefix. `owning_service` is internal bookkeeping and is
/// stripped when the descriptor is put on the MCP wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
    pub owning_service: String,
}

impl ToolDescriptor {
    /// Wire form for `tools/list` responses: name, description, inputSchema.
    pub fn to_wire(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("name".into(), Value::String(self.name.clone()));
        if let Some(description) = &self.description {
            obj.insert("description".into(), Value::String(description.clone()));
        }
        obj.insert("inputSchema".into(), self.input_schema.clone());
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_strips_owning_service() {
        let tool = ToolDescriptor {
            name: "calc__add".into(),
            description: Some("Add two numbers".into()),
            input_schema: json!({"type": "object"}),
            owning_service: "calc".into(),
        };
        let wire = tool.to_wire();
        assert_eq!(wire["name"], "calc__add");
        assert_eq!(wire["inputSchema"], json!({"type": "object"}));
        assert!(wire.get("owningService").is_none());
    }

    #[test]
    fn wire_form_omits_missing_description() {
        let tool = ToolDescriptor {
            name: "mul".into(),
            description: None,
            input_schema: json!({}),
            owning_service: "calc".into(),
        };
        assert!(tool.to_wire().get("description").is_none());
    }
}
