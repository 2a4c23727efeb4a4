//! Intrinsic function handling.
//!
//! Templates are first normalised to long form (`!Ref x` becomes
//! `{"Ref": "x"}`) and then resolved against the template's own Parameters,
//! Conditions and Mappings. Values that only exist once a stack is deployed
//! (attributes, exports, availability zones) resolve to null.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};
use serde_yaml::Value as YamlValue;
use serde_yaml::value::TaggedValue;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::TemplateError;

const MAX_DEPTH: usize = 64;

/// `Ref` and every `Fn::*` key.
pub(crate) fn is_intrinsic_key(key: &str) -> bool {
    key == "Ref" || key.starts_with("Fn::")
}

/// A single-key mapping whose key is an intrinsic function.
pub(crate) fn is_intrinsic_node(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.keys().all(|key| is_intrinsic_key(key)))
}

/// Convert a YAML document to JSON, expanding short-form tags.
pub(crate) fn to_long_form(value: YamlValue) -> Result<Value, TemplateError> {
    Ok(match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(b),
        YamlValue::Number(n) => number(&n),
        YamlValue::String(s) => Value::String(s),
        YamlValue::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(to_long_form)
                .collect::<Result<_, _>>()?,
        ),
        YamlValue::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, item) in mapping {
                out.insert(mapping_key(key)?, to_long_form(item)?);
            }
            Value::Object(out)
        }
        YamlValue::Tagged(tagged) => expand_tag(*tagged)?,
    })
}

fn number(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::from(i)
    } else if let Some(u) = n.as_u64() {
        Value::from(u)
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn mapping_key(key: YamlValue) -> Result<String, TemplateError> {
    match key {
        YamlValue::String(s) => Ok(s),
        YamlValue::Number(n) => Ok(n.to_string()),
        YamlValue::Bool(b) => Ok(b.to_string()),
        other => Err(TemplateError::Syntax(format!(
            "unsupported mapping key {other:?}"
        ))),
    }
}

fn expand_tag(tagged: TaggedValue) -> Result<Value, TemplateError> {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!');
    let inner = to_long_form(tagged.value)?;

    let (key, argument) = match name {
        "Ref" | "Condition" => (name.to_string(), inner),
        "GetAtt" => {
            let argument = match inner {
                Value::String(path) => match path.split_once('.') {
                    Some((resource, attribute)) => Value::Array(vec![
                        Value::String(resource.to_string()),
                        Value::String(attribute.to_string()),
                    ]),
                    None => Value::String(path),
                },
                other => other,
            };
            ("Fn::GetAtt".to_string(), argument)
        }
        other => (format!("Fn::{other}"), inner),
    };

    let mut node = Map::new();
    node.insert(key, argument);
    Ok(Value::Object(node))
}

fn intrinsic_error(function: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::Intrinsic {
        function: function.to_string(),
        message: message.into(),
    }
}

fn expect_str<'v>(function: &str, value: &'v Value) -> Result<&'v str, TemplateError> {
    value
        .as_str()
        .ok_or_else(|| intrinsic_error(function, format!("expected a string, got {value}")))
}

fn args<'v, const N: usize>(
    function: &str,
    value: &'v Value,
) -> Result<[&'v Value; N], TemplateError> {
    let items = value
        .as_array()
        .ok_or_else(|| intrinsic_error(function, format!("expected a list, got {value}")))?;
    let refs: Vec<&Value> = items.iter().collect();
    refs.try_into().map_err(|_| {
        intrinsic_error(
            function,
            format!("expected {N} arguments, got {}", items.len()),
        )
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) struct Resolver<'a> {
    parameters: BTreeMap<String, Value>,
    conditions: Option<&'a Map<String, Value>>,
    mappings: Option<&'a Map<String, Value>>,
    /// Conditions evaluated so far; each one is evaluated at most once.
    evaluated: RefCell<HashMap<String, bool>>,
    in_progress: RefCell<HashSet<String>>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(root: &'a Map<String, Value>) -> Self {
        let parameters = root
            .get("Parameters")
            .and_then(Value::as_object)
            .map(|declared| {
                declared
                    .iter()
                    .map(|(name, declaration)| (name.clone(), parameter_default(declaration)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            parameters,
            conditions: root.get("Conditions").and_then(Value::as_object),
            mappings: root.get("Mappings").and_then(Value::as_object),
            evaluated: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// Resolve a node. `None` means the node resolved to `AWS::NoValue`.
    pub(crate) fn resolve(&self, value: &Value) -> Result<Option<Value>, TemplateError> {
        self.resolve_at(value, 0)
    }

    /// Evaluate a named entry of the Conditions section.
    pub(crate) fn condition_holds(&self, name: &str) -> Result<bool, TemplateError> {
        self.condition(name, 0)
    }

    fn resolve_at(&self, value: &Value, depth: usize) -> Result<Option<Value>, TemplateError> {
        if depth > MAX_DEPTH {
            return Err(intrinsic_error(
                "template",
                format!("expressions nested deeper than {MAX_DEPTH} levels"),
            ));
        }

        match value {
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some((key, argument)) = map.iter().next() {
                        if is_intrinsic_key(key) || (key == "Condition" && argument.is_string()) {
                            return self.call(key, argument, depth + 1);
                        }
                    }
                }

                let mut out = Map::new();
                for (key, item) in map {
                    if let Some(item) = self.resolve_at(item, depth + 1)? {
                        out.insert(key.clone(), item);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(item) = self.resolve_at(item, depth + 1)? {
                        out.push(item);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            scalar => Ok(Some(scalar.clone())),
        }
    }

    fn value(&self, value: &Value, depth: usize) -> Result<Value, TemplateError> {
        Ok(self.resolve_at(value, depth + 1)?.unwrap_or(Value::Null))
    }

    fn call(
        &self,
        function: &str,
        argument: &Value,
        depth: usize,
    ) -> Result<Option<Value>, TemplateError> {
        let resolved = match function {
            "Ref" => return self.reference(argument, depth),
            "Fn::If" => return self.fn_if(argument, depth),
            "Condition" => Value::Bool(self.condition(expect_str(function, argument)?, depth)?),
            "Fn::Equals" => {
                let [left, right] = args::<2>(function, argument)?;
                Value::Bool(self.value(left, depth)? == self.value(right, depth)?)
            }
            "Fn::And" | "Fn::Or" => {
                let items = argument.as_array().ok_or_else(|| {
                    intrinsic_error(function, format!("expected a list, got {argument}"))
                })?;
                let mut outcomes = Vec::with_capacity(items.len());
                for item in items {
                    outcomes.push(self.boolean(function, item, depth)?);
                }
                if function == "Fn::And" {
                    Value::Bool(outcomes.iter().all(|b| *b))
                } else {
                    Value::Bool(outcomes.iter().any(|b| *b))
                }
            }
            "Fn::Not" => {
                let [inner] = args::<1>(function, argument)?;
                Value::Bool(!self.boolean(function, inner, depth)?)
            }
            "Fn::Join" => self.join(argument, depth)?,
            "Fn::Sub" => self.sub(argument, depth)?,
            "Fn::Select" => self.select(argument, depth)?,
            "Fn::Split" => self.split(argument, depth)?,
            "Fn::FindInMap" => self.find_in_map(argument, depth)?,
            "Fn::Base64" => match self.value(argument, depth)? {
                Value::String(s) => Value::String(STANDARD.encode(s)),
                Value::Null => Value::Null,
                other => {
                    return Err(intrinsic_error(
                        function,
                        format!("expected a string, got {other}"),
                    ));
                }
            },
            // only known once the stack is deployed
            "Fn::GetAtt" | "Fn::ImportValue" | "Fn::GetAZs" | "Fn::Cidr" => Value::Null,
            other => {
                return Err(TemplateError::UnsupportedIntrinsic {
                    name: other.to_string(),
                });
            }
        };

        Ok(Some(resolved))
    }

    fn reference(&self, argument: &Value, depth: usize) -> Result<Option<Value>, TemplateError> {
        let name = match self.value(argument, depth)? {
            Value::String(name) => name,
            other => {
                return Err(intrinsic_error(
                    "Ref",
                    format!("expected a name, got {other}"),
                ));
            }
        };

        if name == "AWS::NoValue" {
            return Ok(None);
        }

        // pseudo parameters and resource references resolve to null
        Ok(Some(
            self.parameters.get(&name).cloned().unwrap_or(Value::Null),
        ))
    }

    fn condition(&self, name: &str, depth: usize) -> Result<bool, TemplateError> {
        let known = self.evaluated.borrow().get(name).copied();
        if let Some(outcome) = known {
            return Ok(outcome);
        }

        let definition = self
            .conditions
            .and_then(|conditions| conditions.get(name))
            .ok_or_else(|| TemplateError::UnknownCondition(name.to_string()))?;

        if !self.in_progress.borrow_mut().insert(name.to_string()) {
            return Err(intrinsic_error(
                "Condition",
                format!("{name} depends on itself"),
            ));
        }
        let outcome = self.boolean("Condition", definition, depth + 1);
        self.in_progress.borrow_mut().remove(name);

        let outcome = outcome?;
        self.evaluated.borrow_mut().insert(name.to_string(), outcome);
        Ok(outcome)
    }

    fn boolean(&self, function: &str, value: &Value, depth: usize) -> Result<bool, TemplateError> {
        match self.value(value, depth)? {
            Value::Bool(b) => Ok(b),
            Value::String(s) if s == "true" => Ok(true),
            Value::String(s) if s == "false" => Ok(false),
            other => Err(intrinsic_error(
                function,
                format!("expected a boolean, got {other}"),
            )),
        }
    }

    fn fn_if(&self, argument: &Value, depth: usize) -> Result<Option<Value>, TemplateError> {
        let [condition, when_true, when_false] = args::<3>("Fn::If", argument)?;
        let name = expect_str("Fn::If", condition)?;

        let branch = if self.condition(name, depth)? {
            when_true
        } else {
            when_false
        };
        self.resolve_at(branch, depth + 1)
    }

    fn join(&self, argument: &Value, depth: usize) -> Result<Value, TemplateError> {
        let [delimiter, list] = args::<2>("Fn::Join", argument)?;
        let delimiter = expect_str("Fn::Join", delimiter)?;

        let items = match self.value(list, depth)? {
            Value::Array(items) => items,
            Value::Null => return Ok(Value::Null),
            other => {
                return Err(intrinsic_error(
                    "Fn::Join",
                    format!("expected a list, got {other}"),
                ));
            }
        };

        let mut parts = Vec::with_capacity(items.len());
        for item in &items {
            match scalar_string(item) {
                Some(part) => parts.push(part),
                None => return Ok(Value::Null),
            }
        }
        Ok(Value::String(parts.join(delimiter)))
    }

    fn sub(&self, argument: &Value, depth: usize) -> Result<Value, TemplateError> {
        let (template, variables) = match argument {
            Value::String(template) => (template.as_str(), Map::new()),
            Value::Array(items) if items.len() == 2 => {
                let template = expect_str("Fn::Sub", &items[0])?;
                let variables = match self.value(&items[1], depth)? {
                    Value::Object(variables) => variables,
                    other => {
                        return Err(intrinsic_error(
                            "Fn::Sub",
                            format!("expected a variable map, got {other}"),
                        ));
                    }
                };
                (template, variables)
            }
            other => {
                return Err(intrinsic_error(
                    "Fn::Sub",
                    format!("expected a string or a [string, map] pair, got {other}"),
                ));
            }
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                intrinsic_error("Fn::Sub", format!("unterminated variable in {template:?}"))
            })?;
            let name = &after[..end];

            if let Some(literal) = name.strip_prefix('!') {
                out.push_str("${");
                out.push_str(literal);
                out.push('}');
            } else {
                let value = variables
                    .get(name)
                    .or_else(|| self.parameters.get(name))
                    .and_then(scalar_string);
                match value {
                    Some(value) => out.push_str(&value),
                    None => return Ok(Value::Null),
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);

        Ok(Value::String(out))
    }

    fn select(&self, argument: &Value, depth: usize) -> Result<Value, TemplateError> {
        let [index, list] = args::<2>("Fn::Select", argument)?;

        let index = match self.value(index, depth)? {
            Value::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
            Value::String(s) => s.parse::<usize>().ok(),
            _ => None,
        }
        .ok_or_else(|| intrinsic_error("Fn::Select", "index must be a non-negative integer"))?;

        match self.value(list, depth)? {
            Value::Array(items) => {
                let len = items.len();
                items.into_iter().nth(index).ok_or_else(|| {
                    intrinsic_error(
                        "Fn::Select",
                        format!("index {index} out of range for {len} items"),
                    )
                })
            }
            Value::Null => Ok(Value::Null),
            other => Err(intrinsic_error(
                "Fn::Select",
                format!("expected a list, got {other}"),
            )),
        }
    }

    fn split(&self, argument: &Value, depth: usize) -> Result<Value, TemplateError> {
        let [delimiter, source] = args::<2>("Fn::Split", argument)?;
        let delimiter = expect_str("Fn::Split", delimiter)?;
        if delimiter.is_empty() {
            return Err(intrinsic_error("Fn::Split", "delimiter must not be empty"));
        }

        match self.value(source, depth)? {
            Value::String(source) => Ok(Value::Array(
                source
                    .split(delimiter)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            Value::Null => Ok(Value::Null),
            other => Err(intrinsic_error(
                "Fn::Split",
                format!("expected a string, got {other}"),
            )),
        }
    }

    fn find_in_map(&self, argument: &Value, depth: usize) -> Result<Value, TemplateError> {
        let [map, top, second] = args::<3>("Fn::FindInMap", argument)?;

        let mut keys = Vec::with_capacity(3);
        for key in [map, top, second] {
            match self.value(key, depth)? {
                Value::String(key) => keys.push(key),
                _ => return Ok(Value::Null),
            }
        }

        self.mappings
            .and_then(|mappings| mappings.get(&keys[0]))
            .and_then(|entries| entries.get(&keys[1]))
            .and_then(|entries| entries.get(&keys[2]))
            .cloned()
            .ok_or_else(|| {
                intrinsic_error(
                    "Fn::FindInMap",
                    format!("no entry {}/{}/{}", keys[0], keys[1], keys[2]),
                )
            })
    }
}

/// Default value of a parameter declaration; list types become arrays.
fn parameter_default(declaration: &Value) -> Value {
    let Some(default) = declaration.get("Default") else {
        return Value::Null;
    };

    let is_list = declaration
        .get("Type")
        .and_then(Value::as_str)
        .is_some_and(|ty| ty == "CommaDelimitedList" || ty.starts_with("List<"));

    match default {
        Value::String(s) if is_list => Value::Array(
            s.split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be a mapping"),
        }
    }

    fn resolve(root: &Map<String, Value>, node: Value) -> Result<Option<Value>, TemplateError> {
        Resolver::new(root).resolve(&node)
    }

    #[test]
    fn test_short_form_tags_expand_to_long_form() {
        let yaml: YamlValue = serde_yaml::from_str(
            r#"
a: !Ref Env
b: !GetAtt Vpc.CidrBlock
c: !Sub "${Env}-vpc"
d: !If [IsProd, 1, 2]
"#,
        )
        .unwrap();

        let value = to_long_form(yaml).unwrap();
        assert_eq!(
            value,
            json!({
                "a": {"Ref": "Env"},
                "b": {"Fn::GetAtt": ["Vpc", "CidrBlock"]},
                "c": {"Fn::Sub": "${Env}-vpc"},
                "d": {"Fn::If": ["IsProd", 1, 2]},
            })
        );
    }

    #[test]
    fn test_ref_uses_parameter_default() {
        let root = document(json!({
            "Parameters": {
                "Env": {"Type": "String", "Default": "prod"},
                "Zones": {"Type": "CommaDelimitedList", "Default": "a, b"},
                "NoDefault": {"Type": "String"},
            }
        }));

        assert_eq!(
            resolve(&root, json!({"Ref": "Env"})).unwrap(),
            Some(json!("prod"))
        );
        assert_eq!(
            resolve(&root, json!({"Ref": "Zones"})).unwrap(),
            Some(json!(["a", "b"]))
        );
        assert_eq!(
            resolve(&root, json!({"Ref": "NoDefault"})).unwrap(),
            Some(Value::Null)
        );
        assert_eq!(
            resolve(&root, json!({"Ref": "AWS::Region"})).unwrap(),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_no_value_is_removed() {
        let root = Map::new();
        assert_eq!(resolve(&root, json!({"Ref": "AWS::NoValue"})).unwrap(), None);
        assert_eq!(
            resolve(&root, json!({"a": 1, "b": {"Ref": "AWS::NoValue"}})).unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            resolve(&root, json!([1, {"Ref": "AWS::NoValue"}, 2])).unwrap(),
            Some(json!([1, 2]))
        );
    }

    #[test]
    fn test_conditions_drive_fn_if() {
        let root = document(json!({
            "Parameters": {"Env": {"Type": "String", "Default": "prod"}},
            "Conditions": {
                "IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]},
                "IsDev": {"Fn::Not": [{"Condition": "IsProd"}]},
                "Both": {"Fn::And": [{"Condition": "IsProd"}, {"Condition": "IsDev"}]},
                "Either": {"Fn::Or": [{"Condition": "IsProd"}, {"Condition": "IsDev"}]},
            }
        }));

        assert_eq!(
            resolve(&root, json!({"Fn::If": ["IsProd", "yes", "no"]})).unwrap(),
            Some(json!("yes"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::If": ["IsDev", "yes", "no"]})).unwrap(),
            Some(json!("no"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::If": ["Both", "yes", "no"]})).unwrap(),
            Some(json!("no"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::If": ["Either", "yes", "no"]})).unwrap(),
            Some(json!("yes"))
        );
    }

    #[test]
    fn test_unknown_condition_is_an_error() {
        let root = Map::new();
        assert_eq!(
            resolve(&root, json!({"Fn::If": ["Missing", 1, 2]})),
            Err(TemplateError::UnknownCondition("Missing".to_string()))
        );
    }

    #[test]
    fn test_self_referencing_condition_terminates() {
        let root = document(json!({
            "Conditions": {"Loop": {"Fn::Not": [{"Condition": "Loop"}]}}
        }));
        assert!(matches!(
            resolve(&root, json!({"Fn::If": ["Loop", 1, 2]})),
            Err(TemplateError::Intrinsic { .. })
        ));
    }

    #[test]
    fn test_shared_conditions_are_evaluated_once() {
        // every level refers to the previous one ten times, 10^10 evaluations
        // if nothing is remembered
        let mut conditions = Map::new();
        conditions.insert("C0".to_string(), json!({"Fn::Equals": ["a", "a"]}));
        for level in 1..=10 {
            let previous = json!({"Condition": format!("C{}", level - 1)});
            conditions.insert(
                format!("C{level}"),
                json!({"Fn::And": vec![previous; 10]}),
            );
        }
        let root = document(json!({"Conditions": conditions}));

        assert_eq!(
            resolve(&root, json!({"Fn::If": ["C10", "yes", "no"]})).unwrap(),
            Some(json!("yes"))
        );
    }

    #[test]
    fn test_condition_holds_rejects_undeclared_names() {
        let root = document(json!({"Conditions": {"IsProd": {"Fn::Equals": ["a", "b"]}}}));
        let resolver = Resolver::new(&root);

        assert_eq!(resolver.condition_holds("IsProd"), Ok(false));
        assert_eq!(
            resolver.condition_holds("Missing"),
            Err(TemplateError::UnknownCondition("Missing".to_string()))
        );
    }

    #[test]
    fn test_string_functions() {
        let root = document(json!({
            "Parameters": {"Env": {"Type": "String", "Default": "prod"}},
            "Mappings": {"Types": {"prod": {"route": "AWS::EC2::Route"}}},
        }));

        assert_eq!(
            resolve(&root, json!({"Fn::Join": ["-", ["a", {"Ref": "Env"}, 3]]})).unwrap(),
            Some(json!("a-prod-3"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::Sub": "${Env}-${!Literal}"})).unwrap(),
            Some(json!("prod-${Literal}"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::Sub": ["${Kind}::${Env}", {"Kind": "AWS::EC2"}]})).unwrap(),
            Some(json!("AWS::EC2::prod"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::Select": ["1", {"Fn::Split": [",", "a,b,c"]}]})).unwrap(),
            Some(json!("b"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::FindInMap": ["Types", {"Ref": "Env"}, "route"]})).unwrap(),
            Some(json!("AWS::EC2::Route"))
        );
        assert_eq!(
            resolve(&root, json!({"Fn::Base64": "hello"})).unwrap(),
            Some(json!("aGVsbG8="))
        );
    }

    #[test]
    fn test_runtime_values_resolve_to_null() {
        let root = Map::new();
        for node in [
            json!({"Fn::GetAtt": ["Vpc", "CidrBlock"]}),
            json!({"Fn::ImportValue": "shared-vpc"}),
            json!({"Fn::GetAZs": ""}),
            json!({"Fn::Sub": "${AWS::Region}-bucket"}),
            json!({"Fn::Join": ["", ["arn:", {"Fn::GetAtt": ["Role", "Arn"]}]]}),
        ] {
            assert_eq!(resolve(&root, node.clone()).unwrap(), Some(Value::Null), "{node}");
        }
    }

    #[test]
    fn test_select_out_of_range() {
        let root = Map::new();
        assert!(matches!(
            resolve(&root, json!({"Fn::Select": [5, ["a"]]})),
            Err(TemplateError::Intrinsic { .. })
        ));
    }

    #[test]
    fn test_unsupported_function() {
        let root = Map::new();
        assert_eq!(
            resolve(&root, json!({"Fn::Length": [1, 2]})),
            Err(TemplateError::UnsupportedIntrinsic {
                name: "Fn::Length".to_string()
            })
        );
    }
}
