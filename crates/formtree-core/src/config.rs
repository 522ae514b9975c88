#![forbid(unsafe_code)]

//! Node configurations.
//!
//! A [`NodeConfig`] describes a subtree before it exists: a field with its
//! initial value and rendering hints, a group of named children, or an array
//! with an item template plus initial items. Configs are built either with
//! the builders below or parsed from JSON with [`NodeConfig::from_json`],
//! which disambiguates shapes the way hand-written form schemas usually look:
//!
//! | JSON                                   | Node                         |
//! |----------------------------------------|------------------------------|
//! | `{"value": .., "component": ..}`       | field                        |
//! | `{"schema": {..}, "initialItems": []}` | array (template + items)     |
//! | `[template, item, item, ..]`           | array (first entry template) |
//! | any other object                       | group, one child per entry   |

use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{FormError, FormResult};
use crate::path::{Shape, join_index, join_key};

// ---------------------------------------------------------------------------
// UpdateOn
// ---------------------------------------------------------------------------

/// When a field runs its validators on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOn {
    /// After each value change.
    #[default]
    Change,
    /// When the field is marked touched.
    Blur,
    /// Only when the form is validated explicitly.
    Submit,
}

impl UpdateOn {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "change" => Some(Self::Change),
            "blur" => Some(Self::Blur),
            "submit" => Some(Self::Submit),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FieldConfig
// ---------------------------------------------------------------------------

/// Configuration of a leaf field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConfig {
    pub value: Value,
    /// Opaque rendering component reference, `Null` when absent.
    pub component: Value,
    /// Opaque props forwarded to the component, `Null` when absent.
    pub component_props: Value,
    pub disabled: bool,
    pub update_on: UpdateOn,
    /// Debounce applied to change-triggered async validation.
    pub debounce: Option<Duration>,
}

impl FieldConfig {
    #[must_use]
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            component: Value::Null,
            component_props: Value::Null,
            disabled: false,
            update_on: UpdateOn::default(),
            debounce: None,
        }
    }

    #[must_use]
    pub fn component(mut self, component: impl Into<Value>) -> Self {
        self.component = component.into();
        self
    }

    #[must_use]
    pub fn props(mut self, props: Value) -> Self {
        self.component_props = props;
        self
    }

    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[must_use]
    pub fn update_on(mut self, update_on: UpdateOn) -> Self {
        self.update_on = update_on;
        self
    }

    #[must_use]
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }
}

// ---------------------------------------------------------------------------
// GroupConfig / ArrayConfig
// ---------------------------------------------------------------------------

/// Configuration of a keyed container. Key order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupConfig {
    pub fields: IndexMap<String, NodeConfig>,
}

impl GroupConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, config: impl Into<NodeConfig>) -> Self {
        self.fields.insert(key.into(), config.into());
        self
    }
}

/// Configuration of an ordered list of homogeneous items.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayConfig {
    /// Template every item is created from.
    pub schema: Box<NodeConfig>,
    /// Values merged over the template to create the initial items.
    pub initial_items: Vec<Value>,
}

impl ArrayConfig {
    #[must_use]
    pub fn new(schema: impl Into<NodeConfig>) -> Self {
        Self {
            schema: Box::new(schema.into()),
            initial_items: Vec::new(),
        }
    }

    #[must_use]
    pub fn items(mut self, items: impl IntoIterator<Item = Value>) -> Self {
        self.initial_items = items.into_iter().collect();
        self
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Configuration of any node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Field(FieldConfig),
    Group(GroupConfig),
    Array(ArrayConfig),
}

impl From<FieldConfig> for NodeConfig {
    fn from(config: FieldConfig) -> Self {
        Self::Field(config)
    }
}

impl From<GroupConfig> for NodeConfig {
    fn from(config: GroupConfig) -> Self {
        Self::Group(config)
    }
}

impl From<ArrayConfig> for NodeConfig {
    fn from(config: ArrayConfig) -> Self {
        Self::Array(config)
    }
}

impl NodeConfig {
    /// Shorthand for a plain field.
    #[must_use]
    pub fn field(value: impl Into<Value>) -> Self {
        Self::Field(FieldConfig::new(value))
    }

    /// Parse a JSON description.
    pub fn from_json(value: &Value) -> FormResult<Self> {
        parse_node(value, "")
    }

    /// The plain value tree this config would produce.
    #[must_use]
    pub fn extract_values(&self) -> Value {
        match self {
            Self::Field(field) => field.value.clone(),
            Self::Group(group) => Value::Object(
                group
                    .fields
                    .iter()
                    .map(|(key, child)| (key.clone(), child.extract_values()))
                    .collect(),
            ),
            Self::Array(array) => Value::Array(
                array
                    .initial_items
                    .iter()
                    .map(|item| array.schema.with_values(item).extract_values())
                    .collect(),
            ),
        }
    }

    /// A copy of this config with `values` laid over the defaults.
    ///
    /// Keys absent from `values` keep their configured value.
    #[must_use]
    pub fn with_values(&self, values: &Value) -> NodeConfig {
        match (self, values) {
            (Self::Field(field), value) => Self::Field(FieldConfig {
                value: value.clone(),
                ..field.clone()
            }),
            (Self::Group(group), Value::Object(map)) => Self::Group(GroupConfig {
                fields: group
                    .fields
                    .iter()
                    .map(|(key, child)| {
                        let child = match map.get(key) {
                            Some(v) => child.with_values(v),
                            None => child.clone(),
                        };
                        (key.clone(), child)
                    })
                    .collect(),
            }),
            (Self::Array(array), Value::Array(items)) => Self::Array(ArrayConfig {
                schema: array.schema.clone(),
                initial_items: items.clone(),
            }),
            (other, _) => other.clone(),
        }
    }

    /// Structural outline without values.
    #[must_use]
    pub fn shape(&self) -> Rc<Shape> {
        Rc::new(match self {
            Self::Field(_) => Shape::Field,
            Self::Group(group) => Shape::Group(
                group
                    .fields
                    .iter()
                    .map(|(key, child)| (key.clone(), child.shape()))
                    .collect(),
            ),
            Self::Array(array) => Shape::Array(array.schema.shape()),
        })
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Field(_) => "field",
            Self::Group(_) => "group",
            Self::Array(_) => "array",
        }
    }
}

// ---------------------------------------------------------------------------
// JSON parsing
// ---------------------------------------------------------------------------

fn invalid(path: &str, reason: impl Into<String>) -> FormError {
    FormError::InvalidConfig {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    map.get(camel).or_else(|| map.get(snake))
}

fn parse_node(value: &Value, path: &str) -> FormResult<NodeConfig> {
    match value {
        Value::Object(map) => {
            let has_value = map.contains_key("value");
            let has_schema = map.contains_key("schema");
            match (has_value, has_schema) {
                (true, true) => Err(invalid(
                    path,
                    "an object cannot carry both `value` and `schema`",
                )),
                (true, false) => parse_field(map, path).map(NodeConfig::Field),
                (false, true) => parse_array_object(map, path).map(NodeConfig::Array),
                (false, false) => parse_group(map, path).map(NodeConfig::Group),
            }
        }
        Value::Array(entries) => {
            let Some((template, items)) = entries.split_first() else {
                return Err(invalid(
                    path,
                    "an array config needs its item template as the first entry",
                ));
            };
            let schema = parse_node(template, &join_index(path, 0))?;
            Ok(NodeConfig::Array(ArrayConfig {
                schema: Box::new(schema),
                initial_items: items.to_vec(),
            }))
        }
        Value::Null => Err(invalid(path, "null is not a node config")),
        other => Err(invalid(
            path,
            format!(
                "expected a field object, an array config or a group, found {}",
                json_type(other)
            ),
        )),
    }
}

fn parse_field(map: &Map<String, Value>, path: &str) -> FormResult<FieldConfig> {
    let mut field = FieldConfig::new(map.get("value").cloned().unwrap_or(Value::Null));
    if let Some(component) = map.get("component") {
        field.component = component.clone();
    }
    if let Some(props) = lookup(map, "componentProps", "component_props") {
        field.component_props = props.clone();
    }
    if let Some(disabled) = map.get("disabled") {
        field.disabled = disabled
            .as_bool()
            .ok_or_else(|| invalid(path, "`disabled` must be a boolean"))?;
    }
    if let Some(update_on) = lookup(map, "updateOn", "update_on") {
        field.update_on = update_on
            .as_str()
            .and_then(UpdateOn::parse)
            .ok_or_else(|| invalid(path, "`updateOn` must be \"change\", \"blur\" or \"submit\""))?;
    }
    if let Some(debounce) = map.get("debounce") {
        let ms = debounce
            .as_u64()
            .ok_or_else(|| invalid(path, "`debounce` must be a whole number of milliseconds"))?;
        field.debounce = Some(Duration::from_millis(ms));
    }
    Ok(field)
}

fn parse_array_object(map: &Map<String, Value>, path: &str) -> FormResult<ArrayConfig> {
    let schema = map
        .get("schema")
        .ok_or_else(|| invalid(path, "missing `schema`"))?;
    let schema = parse_node(schema, &join_index(path, 0))?;
    let initial_items = match lookup(map, "initialItems", "initial_items") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(invalid(path, "`initialItems` must be an array")),
    };
    Ok(ArrayConfig {
        schema: Box::new(schema),
        initial_items,
    })
}

fn parse_group(map: &Map<String, Value>, path: &str) -> FormResult<GroupConfig> {
    let mut fields = IndexMap::with_capacity(map.len());
    for (key, child) in map {
        let child_path = join_key(path, key);
        fields.insert(key.clone(), parse_node(child, &child_path)?);
    }
    Ok(GroupConfig { fields })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disambiguates_shapes() {
        let config = NodeConfig::from_json(&json!({
            "email": { "value": "", "component": "Input" },
            "address": {
                "city": { "value": "Paris" }
            },
            "tags": [{ "value": "" }, "a", "b"],
            "items": { "schema": { "title": { "value": "" } }, "initialItems": [{ "title": "x" }] }
        }))
        .unwrap();

        let NodeConfig::Group(root) = &config else {
            panic!("root should be a group");
        };
        assert!(matches!(root.fields["email"], NodeConfig::Field(_)));
        assert!(matches!(root.fields["address"], NodeConfig::Group(_)));
        assert!(matches!(root.fields["tags"], NodeConfig::Array(_)));
        assert!(matches!(root.fields["items"], NodeConfig::Array(_)));
        let keys: Vec<_> = root.fields.keys().cloned().collect();
        assert_eq!(keys, ["email", "address", "tags", "items"]);
    }

    #[test]
    fn field_options_are_read() {
        let config = NodeConfig::from_json(&json!({
            "value": 3,
            "componentProps": { "label": "Age" },
            "disabled": true,
            "updateOn": "blur",
            "debounce": 250
        }))
        .unwrap();
        let NodeConfig::Field(field) = config else {
            panic!("expected a field");
        };
        assert_eq!(field.value, json!(3));
        assert_eq!(field.component_props, json!({ "label": "Age" }));
        assert!(field.disabled);
        assert_eq!(field.update_on, UpdateOn::Blur);
        assert_eq!(field.debounce, Some(Duration::from_millis(250)));
    }

    #[test]
    fn malformed_configs_are_rejected_with_paths() {
        let err = NodeConfig::from_json(&json!({ "a": { "b": null } })).unwrap_err();
        assert_eq!(
            err,
            FormError::InvalidConfig {
                path: "a.b".into(),
                reason: "null is not a node config".into()
            }
        );

        let err = NodeConfig::from_json(&json!({ "list": [] })).unwrap_err();
        assert_eq!(err.path(), Some("list"));

        let err = NodeConfig::from_json(&json!({ "x": 5 })).unwrap_err();
        assert!(err.to_string().contains("found a number"));

        let err = NodeConfig::from_json(&json!({ "value": 1, "schema": {} })).unwrap_err();
        assert!(matches!(err, FormError::InvalidConfig { .. }));

        let err = NodeConfig::from_json(&json!({ "value": 1, "updateOn": "never" })).unwrap_err();
        assert!(err.to_string().contains("updateOn"));
    }

    #[test]
    fn extract_values_merges_items_over_template() {
        let config = NodeConfig::from_json(&json!({
            "name": { "value": "Ann" },
            "items": [
                { "title": { "value": "" }, "qty": { "value": 1 } },
                { "title": "first" },
                { "title": "second", "qty": 4 }
            ]
        }))
        .unwrap();

        assert_eq!(
            config.extract_values(),
            json!({
                "name": "Ann",
                "items": [
                    { "title": "first", "qty": 1 },
                    { "title": "second", "qty": 4 }
                ]
            })
        );
    }

    #[test]
    fn builders_match_json() {
        let built: NodeConfig = GroupConfig::new()
            .field("email", FieldConfig::new("").component("Input"))
            .field("tags", ArrayConfig::new(FieldConfig::new("")).items([json!("a")]))
            .into();
        let parsed = NodeConfig::from_json(&json!({
            "email": { "value": "", "component": "Input" },
            "tags": [{ "value": "" }, "a"]
        }))
        .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn shape_mirrors_structure() {
        let config = NodeConfig::from_json(&json!({
            "a": { "value": 1 },
            "list": [{ "x": { "value": 0 } }]
        }))
        .unwrap();
        let Shape::Group(fields) = config.shape().as_ref().clone() else {
            panic!("expected group shape");
        };
        assert_eq!(*fields["a"], Shape::Field);
        assert!(matches!(*fields["list"], Shape::Array(_)));
    }
}
