//! OpenAPI import.
//!
//! Turns an OpenAPI 3 (or Swagger 2) document into one [`ToolDefinition`]
//! per operation. Only the subset that matters for tool calling is read:
//! operation ids, summaries, path/query parameters and object request bodies.
//! Header and cookie parameters are ignored.

use crate::definition::{
    BodyEncoding, BodyShape, BodySpec, HttpMethod, ParameterLocation, ToolDefinition,
};
use crate::error::SchemaError;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Maximum length of a tool name accepted by the model APIs.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Maximum length of a tool description.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// `$ref` chains deeper than this are replaced by an empty schema.
const MAX_REF_DEPTH: usize = 16;

/// Argument name used when a non-object body is passed whole.
const WHOLE_BODY_ARGUMENT: &str = "body";

/// Extracts every supported operation from `document`.
///
/// Name uniqueness is not checked here; see [`crate::ToolRegistry`].
pub fn parse_operations(document: &JsonValue) -> Result<Vec<ToolDefinition>, SchemaError> {
    let root = document.as_object().ok_or_else(|| SchemaError::DocumentInvalid {
        reason: "document root is not an object".to_string(),
    })?;
    if !root.contains_key("openapi") && !root.contains_key("swagger") {
        return Err(SchemaError::DocumentInvalid {
            reason: "missing 'openapi' version field".to_string(),
        });
    }
    let paths = root
        .get("paths")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| SchemaError::DocumentInvalid {
            reason: "missing 'paths' object".to_string(),
        })?;

    let mut tools = Vec::new();
    for (path, item) in paths {
        let item = resolve_refs(item, document, 0)?;
        let Some(item) = item.as_object() else {
            return Err(SchemaError::InvalidPathTemplate {
                path: path.clone(),
                reason: "path item is not an object".to_string(),
            });
        };
        let placeholders = path_placeholders(path)?;
        let shared = item.get("parameters");

        for (key, operation) in item {
            let Some(method) = HttpMethod::from_openapi_key(key) else {
                continue;
            };
            let Some(operation) = operation.as_object() else {
                return Err(SchemaError::DocumentInvalid {
                    reason: format!("{method} {path} is not an object"),
                });
            };
            let builder = OperationBuilder::new(method, path, operation)?;
            tools.push(builder.build(shared, &placeholders, document)?);
        }
    }

    if tools.is_empty() {
        return Err(SchemaError::NoOperations);
    }
    Ok(tools)
}

/// Collects one operation's arguments before the definition is assembled.
struct OperationBuilder<'a> {
    name: String,
    method: HttpMethod,
    path: &'a str,
    operation: &'a Map<String, JsonValue>,
    properties: Map<String, JsonValue>,
    required: BTreeSet<String>,
    locations: BTreeMap<String, ParameterLocation>,
    body: Option<BodySpec>,
}

impl<'a> OperationBuilder<'a> {
    fn new(
        method: HttpMethod,
        path: &'a str,
        operation: &'a Map<String, JsonValue>,
    ) -> Result<Self, SchemaError> {
        let name = match operation.get("operationId").and_then(JsonValue::as_str) {
            Some(id) if is_valid_tool_name(id) => id.to_string(),
            Some(id) => {
                return Err(SchemaError::InvalidOperationName {
                    name: id.to_string(),
                });
            }
            None => generated_name(method, path),
        };
        Ok(Self {
            name,
            method,
            path,
            operation,
            properties: Map::new(),
            required: BTreeSet::new(),
            locations: BTreeMap::new(),
            body: None,
        })
    }

    fn build(
        mut self,
        shared: Option<&JsonValue>,
        placeholders: &[String],
        root: &JsonValue,
    ) -> Result<ToolDefinition, SchemaError> {
        for parameter in merged_parameters(shared, self.operation.get("parameters"), root)? {
            self.add_parameter(&parameter, root)?;
        }
        if let Some(request_body) = self.operation.get("requestBody") {
            let request_body = resolve_refs(request_body, root, 0)?;
            self.add_request_body(&request_body)?;
        }
        self.check_path_parameters(placeholders)?;

        let description = describe(self.method, self.path, self.operation);
        let parameter_schema = serde_json::json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required.into_iter().collect::<Vec<_>>(),
        });
        Ok(ToolDefinition {
            name: self.name,
            description,
            parameter_schema,
            method: self.method,
            path_template: self.path.to_string(),
            parameter_locations: self.locations,
            body: self.body,
        })
    }

    fn add_parameter(&mut self, parameter: &JsonValue, root: &JsonValue) -> Result<(), SchemaError> {
        let name = parameter
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| self.invalid("<unnamed>", "parameter has no name"))?;
        let location = parameter
            .get("in")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| self.invalid(name, "parameter has no 'in' location"))?;

        match location {
            "path" => {
                let schema = parameter_schema(parameter);
                self.insert(name, ParameterLocation::Path, schema, true)
            }
            "query" => {
                let schema = parameter_schema(parameter);
                let required = is_required(parameter);
                self.insert(name, ParameterLocation::Query, schema, required)
            }
            "header" | "cookie" => {
                debug!(tool = %self.name, parameter = name, location, "Skipping non-tool parameter");
                Ok(())
            }
            // Swagger 2 request bodies.
            "body" => {
                let schema = parameter
                    .get("schema")
                    .map(|schema| resolve_refs(schema, root, 0))
                    .transpose()?
                    .unwrap_or_else(|| serde_json::json!({}));
                self.add_body_schema(&schema, BodyEncoding::Json, is_required(parameter))
            }
            "formData" => {
                self.set_body(BodyEncoding::Form, BodyShape::Fields, name)?;
                let schema = parameter_schema(parameter);
                let required = is_required(parameter);
                self.insert(name, ParameterLocation::Body, schema, required)
            }
            other => Err(self.invalid(name, &format!("unsupported location '{other}'"))),
        }
    }

    fn add_request_body(&mut self, request_body: &JsonValue) -> Result<(), SchemaError> {
        let Some(content) = request_body.get("content").and_then(JsonValue::as_object) else {
            return Err(self.invalid(WHOLE_BODY_ARGUMENT, "requestBody has no content"));
        };
        let required = is_required(request_body);

        let json = content
            .iter()
            .find(|(media, _)| media.starts_with("application/json") || media.ends_with("+json"));
        if let Some((_, media)) = json {
            let schema = media.get("schema").cloned().unwrap_or_else(|| serde_json::json!({}));
            return self.add_body_schema(&schema, BodyEncoding::Json, required);
        }
        if let Some(media) = content.get("application/x-www-form-urlencoded") {
            let schema = media.get("schema").cloned().unwrap_or_else(|| serde_json::json!({}));
            return self.add_body_schema(&schema, BodyEncoding::Form, required);
        }

        debug!(
            tool = %self.name,
            media_types = ?content.keys().collect::<Vec<_>>(),
            "Skipping request body with unsupported media type"
        );
        Ok(())
    }

    fn add_body_schema(
        &mut self,
        schema: &JsonValue,
        encoding: BodyEncoding,
        body_required: bool,
    ) -> Result<(), SchemaError> {
        let fields = schema.get("properties").and_then(JsonValue::as_object);
        let is_object = fields.is_some()
            || schema.get("type").and_then(JsonValue::as_str) == Some("object");

        if !is_object {
            if encoding == BodyEncoding::Form {
                return Err(self.invalid(WHOLE_BODY_ARGUMENT, "form bodies must be objects"));
            }
            self.set_body(
                encoding,
                BodyShape::Whole {
                    argument: WHOLE_BODY_ARGUMENT.to_string(),
                },
                WHOLE_BODY_ARGUMENT,
            )?;
            return self.insert(
                WHOLE_BODY_ARGUMENT,
                ParameterLocation::Body,
                schema.clone(),
                body_required,
            );
        }

        self.set_body(encoding, BodyShape::Fields, WHOLE_BODY_ARGUMENT)?;
        let required_fields: BTreeSet<&str> = schema
            .get("required")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(JsonValue::as_str)
            .collect();
        for (field, field_schema) in fields.into_iter().flatten() {
            let required = required_fields.contains(field.as_str());
            self.insert(field, ParameterLocation::Body, field_schema.clone(), required)?;
        }
        Ok(())
    }

    fn set_body(
        &mut self,
        encoding: BodyEncoding,
        shape: BodyShape,
        parameter: &str,
    ) -> Result<(), SchemaError> {
        match &self.body {
            None => {
                self.body = Some(BodySpec { encoding, shape });
                Ok(())
            }
            Some(existing) if existing.encoding == encoding && existing.shape == shape => Ok(()),
            Some(_) => Err(self.invalid(parameter, "operation declares conflicting request bodies")),
        }
    }

    fn insert(
        &mut self,
        name: &str,
        location: ParameterLocation,
        schema: JsonValue,
        required: bool,
    ) -> Result<(), SchemaError> {
        if let Some(existing) = self.locations.get(name) {
            return Err(self.invalid(
                name,
                &format!("declared in both {existing} and {location}"),
            ));
        }
        self.locations.insert(name.to_string(), location);
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.insert(name.to_string());
        }
        Ok(())
    }

    fn check_path_parameters(&self, placeholders: &[String]) -> Result<(), SchemaError> {
        for placeholder in placeholders {
            if self.locations.get(placeholder) != Some(&ParameterLocation::Path) {
                return Err(SchemaError::InvalidPathTemplate {
                    path: self.path.to_string(),
                    reason: format!(
                        "placeholder '{placeholder}' is not declared as a path parameter of {}",
                        self.name
                    ),
                });
            }
        }
        let extra = self
            .locations
            .iter()
            .filter(|(_, location)| **location == ParameterLocation::Path)
            .find(|(name, _)| !placeholders.contains(*name));
        if let Some((name, _)) = extra {
            return Err(SchemaError::InvalidPathTemplate {
                path: self.path.to_string(),
                reason: format!("path parameter '{name}' does not appear in the template"),
            });
        }
        Ok(())
    }

    fn invalid(&self, parameter: &str, reason: &str) -> SchemaError {
        SchemaError::InvalidParameter {
            operation: self.name.clone(),
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Merges path-level and operation-level parameters. Operation-level entries
/// replace path-level entries with the same name and location.
fn merged_parameters(
    shared: Option<&JsonValue>,
    own: Option<&JsonValue>,
    root: &JsonValue,
) -> Result<Vec<JsonValue>, SchemaError> {
    let mut merged: Vec<JsonValue> = Vec::new();
    for list in [shared, own].into_iter().flatten() {
        let Some(list) = list.as_array() else {
            return Err(SchemaError::DocumentInvalid {
                reason: "'parameters' is not an array".to_string(),
            });
        };
        for parameter in list {
            let parameter = resolve_refs(parameter, root, 0)?;
            let key = (parameter.get("name").cloned(), parameter.get("in").cloned());
            merged.retain(|p| (p.get("name").cloned(), p.get("in").cloned()) != key);
            merged.push(parameter);
        }
    }
    Ok(merged)
}

/// Returns the schema of a path/query parameter, accepting both the OpenAPI 3
/// `schema` member and Swagger 2 inline `type`.
fn parameter_schema(parameter: &JsonValue) -> JsonValue {
    let mut schema = match parameter.get("schema") {
        Some(schema) => schema.clone(),
        None => {
            let mut inline = Map::new();
            for key in ["type", "format", "items", "enum", "default"] {
                if let Some(value) = parameter.get(key) {
                    inline.insert(key.to_string(), value.clone());
                }
            }
            if inline.is_empty() {
                inline.insert("type".to_string(), JsonValue::from("string"));
            }
            JsonValue::Object(inline)
        }
    };
    if let (Some(description), Some(object)) = (
        parameter.get("description").and_then(JsonValue::as_str),
        schema.as_object_mut(),
    ) {
        object
            .entry("description")
            .or_insert_with(|| JsonValue::from(description));
    }
    schema
}

fn is_required(value: &JsonValue) -> bool {
    value
        .get("required")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

/// Inlines local `$ref`s. Chains deeper than [`MAX_REF_DEPTH`] (usually
/// recursive schemas) collapse to `{}`.
fn resolve_refs(value: &JsonValue, root: &JsonValue, depth: usize) -> Result<JsonValue, SchemaError> {
    match value {
        JsonValue::Object(object) => {
            if let Some(reference) = object.get("$ref").and_then(JsonValue::as_str) {
                if depth >= MAX_REF_DEPTH {
                    return Ok(JsonValue::Object(Map::new()));
                }
                let target = reference
                    .strip_prefix('#')
                    .and_then(|pointer| root.pointer(pointer))
                    .ok_or_else(|| SchemaError::UnresolvableReference {
                        reference: reference.to_string(),
                    })?;
                return resolve_refs(target, root, depth + 1);
            }
            let mut resolved = Map::with_capacity(object.len());
            for (key, child) in object {
                resolved.insert(key.clone(), resolve_refs(child, root, depth)?);
            }
            Ok(JsonValue::Object(resolved))
        }
        JsonValue::Array(items) => items
            .iter()
            .map(|item| resolve_refs(item, root, depth))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        other => Ok(other.clone()),
    }
}

/// Validates a path template and returns its placeholder names in order.
fn path_placeholders(path: &str) -> Result<Vec<String>, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidPathTemplate {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    let mut placeholders: Vec<String> = Vec::new();
    let mut rest = path;
    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(invalid("unbalanced '}'"));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| invalid("unterminated '{'"))?;
        let name = &after[..close];
        if name.is_empty() || name.contains(['{', '/']) {
            return Err(invalid("malformed placeholder"));
        }
        if placeholders.iter().any(|p| p == name) {
            return Err(invalid("repeated placeholder"));
        }
        placeholders.push(name.to_string());
        rest = &after[close + 1..];
    }
    Ok(placeholders)
}

/// Returns true when `name` matches `^[A-Za-z0-9_-]{1,64}$`.
fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Builds a name like `get_vehicles_id` for operations without an id.
fn generated_name(method: HttpMethod, path: &str) -> String {
    let raw = format!("{}_{path}", method.as_str().to_ascii_lowercase());
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let mut name = name.trim_end_matches('_').to_string();
    name.truncate(MAX_TOOL_NAME_LEN);
    name
}

fn describe(method: HttpMethod, path: &str, operation: &Map<String, JsonValue>) -> String {
    let parts: Vec<&str> = ["summary", "description"]
        .iter()
        .filter_map(|key| operation.get(*key).and_then(JsonValue::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect();
    let description = if parts.is_empty() {
        format!("{method} {path}")
    } else {
        parts.join("\n\n")
    };
    description.chars().take(MAX_DESCRIPTION_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(paths: JsonValue) -> JsonValue {
        json!({ "openapi": "3.0.3", "info": { "title": "Mobility", "version": "1" }, "paths": paths })
    }

    fn only(tools: Vec<ToolDefinition>) -> ToolDefinition {
        assert_eq!(tools.len(), 1, "expected one tool, got {tools:?}");
        tools.into_iter().next().expect("one tool")
    }

    #[test]
    fn path_parameter_becomes_required_argument() {
        let doc = document(json!({
            "/bookings/{bookingId}/status": {
                "get": {
                    "operationId": "getBookingStatus",
                    "summary": "Get booking status",
                    "parameters": [
                        { "name": "bookingId", "in": "path", "schema": { "type": "string" } }
                    ]
                }
            }
        }));
        let tool = only(parse_operations(&doc).expect("parse"));

        assert_eq!(tool.name, "getBookingStatus");
        assert_eq!(tool.method, HttpMethod::Get);
        assert_eq!(tool.description, "Get booking status");
        assert_eq!(tool.location_of("bookingId"), Some(ParameterLocation::Path));
        assert_eq!(tool.parameter_schema["required"], json!(["bookingId"]));
        assert_eq!(
            tool.parameter_schema["properties"]["bookingId"]["type"],
            "string"
        );
    }

    #[test]
    fn missing_operation_id_generates_name() {
        let doc = document(json!({
            "/vehicles/{id}": {
                "parameters": [{ "name": "id", "in": "path", "required": true }],
                "delete": {}
            }
        }));
        let tool = only(parse_operations(&doc).expect("parse"));
        assert_eq!(tool.name, "delete_vehicles_id");
        assert_eq!(tool.description, "DELETE /vehicles/{id}");
    }

    #[test]
    fn invalid_operation_id_is_rejected() {
        let doc = document(json!({
            "/vehicles": { "get": { "operationId": "list vehicles" } }
        }));
        assert!(matches!(
            parse_operations(&doc),
            Err(SchemaError::InvalidOperationName { .. })
        ));
    }

    #[test]
    fn undeclared_placeholder_is_rejected() {
        let doc = document(json!({
            "/vehicles/{id}": { "get": { "operationId": "getVehicle" } }
        }));
        assert!(matches!(
            parse_operations(&doc),
            Err(SchemaError::InvalidPathTemplate { .. })
        ));
    }

    #[test]
    fn unbalanced_template_is_rejected() {
        assert!(path_placeholders("/vehicles/{id").is_err());
        assert!(path_placeholders("/vehicles/id}").is_err());
        assert!(path_placeholders("vehicles").is_err());
        assert_eq!(
            path_placeholders("/a/{x}/b/{y}").expect("valid"),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn operation_parameters_override_path_level_ones() {
        let doc = document(json!({
            "/trips": {
                "parameters": [
                    { "name": "limit", "in": "query", "schema": { "type": "string" } }
                ],
                "get": {
                    "operationId": "listTrips",
                    "parameters": [
                        { "name": "limit", "in": "query", "required": true, "schema": { "type": "integer" } }
                    ]
                }
            }
        }));
        let tool = only(parse_operations(&doc).expect("parse"));
        assert_eq!(tool.parameter_schema["properties"]["limit"]["type"], "integer");
        assert_eq!(tool.parameter_schema["required"], json!(["limit"]));
    }

    #[test]
    fn json_body_fields_and_refs_are_resolved() {
        let doc = json!({
            "openapi": "3.0.3",
            "paths": {
                "/bookings": {
                    "post": {
                        "operationId": "createBooking",
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/NewBooking" }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "NewBooking": {
                        "type": "object",
                        "required": ["vehicleId"],
                        "properties": {
                            "vehicleId": { "type": "string" },
                            "note": { "type": "string" }
                        }
                    }
                }
            }
        });
        let tool = only(parse_operations(&doc).expect("parse"));
        assert_eq!(
            tool.body,
            Some(BodySpec {
                encoding: BodyEncoding::Json,
                shape: BodyShape::Fields
            })
        );
        assert_eq!(tool.location_of("vehicleId"), Some(ParameterLocation::Body));
        assert_eq!(tool.location_of("note"), Some(ParameterLocation::Body));
        assert_eq!(tool.parameter_schema["required"], json!(["vehicleId"]));
    }

    #[test]
    fn array_body_is_passed_whole() {
        let doc = document(json!({
            "/bookings/batch": {
                "post": {
                    "operationId": "createBookings",
                    "requestBody": {
                        "content": {
                            "application/json": { "schema": { "type": "array", "items": { "type": "string" } } }
                        }
                    }
                }
            }
        }));
        let tool = only(parse_operations(&doc).expect("parse"));
        assert_eq!(
            tool.body.map(|b| b.shape),
            Some(BodyShape::Whole {
                argument: "body".to_string()
            })
        );
        assert_eq!(tool.location_of("body"), Some(ParameterLocation::Body));
    }

    #[test]
    fn name_in_two_locations_is_rejected() {
        let doc = document(json!({
            "/vehicles/{id}": {
                "put": {
                    "operationId": "updateVehicle",
                    "parameters": [{ "name": "id", "in": "path" }],
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": { "type": "object", "properties": { "id": { "type": "string" } } }
                            }
                        }
                    }
                }
            }
        }));
        assert!(matches!(
            parse_operations(&doc),
            Err(SchemaError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn remote_refs_are_rejected() {
        let doc = document(json!({
            "/vehicles": {
                "get": {
                    "operationId": "listVehicles",
                    "parameters": [{ "$ref": "https://example.com/params.json#/limit" }]
                }
            }
        }));
        assert!(matches!(
            parse_operations(&doc),
            Err(SchemaError::UnresolvableReference { .. })
        ));
    }

    #[test]
    fn recursive_schemas_terminate() {
        let doc = json!({
            "openapi": "3.0.3",
            "paths": {
                "/nodes": {
                    "post": {
                        "operationId": "createNode",
                        "requestBody": {
                            "content": {
                                "application/json": { "schema": { "$ref": "#/components/schemas/Node" } }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": { "child": { "$ref": "#/components/schemas/Node" } }
                    }
                }
            }
        });
        let tool = only(parse_operations(&doc).expect("parse"));
        assert_eq!(tool.location_of("child"), Some(ParameterLocation::Body));
    }

    #[test]
    fn header_parameters_are_skipped() {
        let doc = document(json!({
            "/vehicles": {
                "get": {
                    "operationId": "listVehicles",
                    "parameters": [{ "name": "X-Trace", "in": "header" }]
                }
            }
        }));
        let tool = only(parse_operations(&doc).expect("parse"));
        assert!(tool.parameter_locations.is_empty());
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let doc = document(json!({
            "/vehicles": { "get": { "operationId": "listVehicles", "description": "x".repeat(5000) } }
        }));
        let tool = only(parse_operations(&doc).expect("parse"));
        assert_eq!(tool.description.chars().count(), MAX_DESCRIPTION_LEN);
    }

    #[test]
    fn document_without_operations_is_rejected() {
        assert_eq!(
            parse_operations(&document(json!({}))),
            Err(SchemaError::NoOperations)
        );
        assert!(matches!(
            parse_operations(&json!({ "paths": {} })),
            Err(SchemaError::DocumentInvalid { .. })
        ));
    }
}
