//! # String Templates
//!
//! Renders Go-style `{{ ... }}` actions inside strings against a variable map.
//! Strings without `{{` are returned unchanged.
//!
//! ## Syntax
//!
//! - `{{ .clusterId }}` - field lookup, dotted paths allowed (`{{ .cluster.spec.region }}`)
//! - `{{ upper .name }}` - function call with arguments
//! - `{{ .name | default "unknown" | quote }}` - pipelines; the piped value becomes the last argument
//! - `{{ lower (default "X" .name) }}` - parenthesized sub-pipelines
//! - `{{- ... -}}` - trims surrounding whitespace
//!
//! A bare field reference that does not resolve is an error. Inside a
//! pipeline or function call a missing field evaluates to `null`, which lets
//! `default` supply a fallback.
//!
//! Functions live in a process-wide registry initialized once on first use.

use std::{collections::HashMap, fmt::Write as _};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use heck::{ToKebabCase, ToLowerCamelCase, ToSnakeCase};
use once_cell::sync::Lazy;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::field_paths;

/// Signature of a template function: arguments in call order, piped value last.
pub type TemplateFunction = fn(&[Value]) -> Result<Value, String>;

static TEMPLATE_FUNCTIONS: Lazy<HashMap<&'static str, TemplateFunction>> = Lazy::new(|| {
    let mut functions: HashMap<&'static str, TemplateFunction> = HashMap::new();
    functions.insert("now", fn_now);
    functions.insert("date", fn_date);
    functions.insert("upper", fn_upper);
    functions.insert("lower", fn_lower);
    functions.insert("title", fn_title);
    functions.insert("trim", fn_trim);
    functions.insert("snake", fn_snake);
    functions.insert("kebab", fn_kebab);
    functions.insert("camel", fn_camel);
    functions.insert("replace", fn_replace);
    functions.insert("default", fn_default);
    functions.insert("quote", fn_quote);
    functions.insert("squote", fn_squote);
    functions.insert("int", fn_int);
    functions.insert("float", fn_float);
    functions.insert("string", fn_string);
    functions.insert("len", fn_len);
    functions.insert("toJson", fn_to_json);
    functions
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated template action in '{template}'")]
    Unterminated { template: String },

    #[error("invalid template action '{action}': {reason}")]
    Syntax { action: String, reason: String },

    #[error("template references missing value '.{path}'")]
    MissingValue { path: String },

    #[error("unknown template function '{name}'")]
    UnknownFunction { name: String },

    #[error("template function '{name}' failed: {reason}")]
    Function { name: String, reason: String },
}

/// Returns true when `input` contains a template action.
pub fn has_template(input: &str) -> bool {
    input.contains("{{")
}

/// Renders every action in `template` against `vars`.
pub fn render(template: &str, vars: &Map<String, Value>) -> Result<String, TemplateError> {
    if !has_template(template) {
        return Ok(template.to_string());
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let mut literal = &rest[..start];
        let mut action_start = start + 2;
        if is_trim_marker(&rest[action_start..]) {
            literal = literal.trim_end();
            action_start += 1;
        }
        output.push_str(literal);

        let after_open = &rest[action_start..];
        let Some(close) = find_action_end(after_open) else {
            return Err(TemplateError::Unterminated {
                template: template.to_string(),
            });
        };
        let mut action = &after_open[..close];
        let mut remainder = &after_open[close + 2..];
        if action.ends_with('-') && action[..action.len() - 1].ends_with(char::is_whitespace) {
            action = &action[..action.len() - 1];
            remainder = remainder.trim_start();
        }

        let value = evaluate_action(action.trim(), vars)?;
        output.push_str(&display_value(&value));
        rest = remainder;
    }
    output.push_str(rest);
    Ok(output)
}

/// Recursively renders string leaves and object keys of a JSON value.
pub fn render_value(value: &Value, vars: &Map<String, Value>) -> Result<Value, TemplateError> {
    match value {
        Value::String(text) => render(text, vars).map(Value::String),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, nested) in map {
                rendered.insert(render(key, vars)?, render_value(nested, vars)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

/// Formats a value the way it appears when interpolated into text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_trim_marker(after_open: &str) -> bool {
    let mut chars = after_open.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn find_action_end(action: &str) -> Option<usize> {
    let bytes = action.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        match quote {
            Some(b'"') if byte == b'\\' => i += 1,
            Some(open) if byte == open => quote = None,
            Some(_) => {}
            None if byte == b'"' || byte == b'`' => quote = Some(byte),
            None if byte == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    LParen,
    RParen,
    Literal(Value),
    Field(String),
    Ident(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Field(String),
    Function(String),
    Pipeline(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
struct Command {
    operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
struct Pipeline {
    commands: Vec<Command>,
}

fn evaluate_action(action: &str, vars: &Map<String, Value>) -> Result<Value, TemplateError> {
    let syntax = |reason: &str| TemplateError::Syntax {
        action: action.to_string(),
        reason: reason.to_string(),
    };
    if action.is_empty() {
        return Err(syntax("empty action"));
    }
    let tokens = tokenize(action).map_err(|reason| syntax(&reason))?;
    let mut position = 0;
    let pipeline = parse_pipeline(&tokens, &mut position).map_err(|reason| syntax(&reason))?;
    if position != tokens.len() {
        return Err(syntax("unexpected ')'"));
    }

    if let [command] = pipeline.commands.as_slice()
        && let [Operand::Field(path)] = command.operands.as_slice()
    {
        return lookup_field(path, vars).ok_or_else(|| TemplateError::MissingValue { path: path.clone() });
    }
    evaluate_pipeline(&pipeline, vars, action)
}

fn tokenize(action: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = action.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    let Some(&next) = chars.get(i) else {
                        return Err("unterminated string literal".into());
                    };
                    i += 1;
                    match next {
                        '"' => break,
                        '\\' => {
                            let escaped = chars.get(i).copied().ok_or("unterminated escape")?;
                            i += 1;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        other => text.push(other),
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            '`' => {
                let start = i + 1;
                let Some(length) = chars[start..].iter().position(|&ch| ch == '`') else {
                    return Err("unterminated raw string literal".into());
                };
                tokens.push(Token::Literal(Value::String(chars[start..start + length].iter().collect())));
                i = start + length + 1;
            }
            '.' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '.') {
                    end += 1;
                }
                tokens.push(Token::Field(chars[start..end].iter().collect()));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(parse_number(&text).ok_or_else(|| format!("invalid number '{text}'"))?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Value::Number(integer.into()));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

fn parse_pipeline(tokens: &[Token], position: &mut usize) -> Result<Pipeline, String> {
    let mut commands = Vec::new();
    loop {
        let mut operands = Vec::new();
        while let Some(token) = tokens.get(*position) {
            match token {
                Token::Pipe | Token::RParen => break,
                Token::LParen => {
                    *position += 1;
                    let nested = parse_pipeline(tokens, position)?;
                    if tokens.get(*position) != Some(&Token::RParen) {
                        return Err("missing ')'".into());
                    }
                    *position += 1;
                    operands.push(Operand::Pipeline(nested));
                }
                Token::Literal(value) => {
                    operands.push(Operand::Literal(value.clone()));
                    *position += 1;
                }
                Token::Field(path) => {
                    operands.push(Operand::Field(path.clone()));
                    *position += 1;
                }
                Token::Ident(name) => {
                    operands.push(Operand::Function(name.clone()));
                    *position += 1;
                }
            }
        }
        if operands.is_empty() {
            return Err("empty command in pipeline".into());
        }
        commands.push(Command { operands });
        if tokens.get(*position) == Some(&Token::Pipe) {
            *position += 1;
            continue;
        }
        return Ok(Pipeline { commands });
    }
}

fn evaluate_pipeline(pipeline: &Pipeline, vars: &Map<String, Value>, action: &str) -> Result<Value, TemplateError> {
    let mut piped: Option<Value> = None;
    for command in &pipeline.commands {
        piped = Some(evaluate_command(command, piped.take(), vars, action)?);
    }
    Ok(piped.unwrap_or(Value::Null))
}

fn evaluate_command(command: &Command, piped: Option<Value>, vars: &Map<String, Value>, action: &str) -> Result<Value, TemplateError> {
    let (first, rest) = match command.operands.split_first() {
        Some(split) => split,
        None => return Ok(piped.unwrap_or(Value::Null)),
    };

    if let Operand::Function(name) = first {
        let mut args = rest
            .iter()
            .map(|operand| evaluate_operand(operand, vars, action))
            .collect::<Result<Vec<_>, _>>()?;
        args.extend(piped);
        return call_function(name, &args);
    }

    if !rest.is_empty() || piped.is_some() {
        return Err(TemplateError::Syntax {
            action: action.to_string(),
            reason: "arguments can only be passed to functions".into(),
        });
    }
    evaluate_operand(first, vars, action)
}

fn evaluate_operand(operand: &Operand, vars: &Map<String, Value>, action: &str) -> Result<Value, TemplateError> {
    match operand {
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Field(path) => Ok(lookup_field(path, vars).unwrap_or(Value::Null)),
        Operand::Function(name) => call_function(name, &[]),
        Operand::Pipeline(pipeline) => evaluate_pipeline(pipeline, vars, action),
    }
}

fn lookup_field(path: &str, vars: &Map<String, Value>) -> Option<Value> {
    if path.is_empty() {
        return Some(Value::Object(vars.clone()));
    }
    field_paths::lookup_in(vars, path).cloned()
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let function = TEMPLATE_FUNCTIONS
        .get(name)
        .ok_or_else(|| TemplateError::UnknownFunction { name: name.to_string() })?;
    function(args).map_err(|reason| TemplateError::Function {
        name: name.to_string(),
        reason,
    })
}

fn expect_args(args: &[Value], count: usize) -> Result<(), String> {
    if args.len() != count {
        return Err(format!("expected {count} argument(s), got {}", args.len()));
    }
    Ok(())
}

fn single_string(args: &[Value]) -> Result<String, String> {
    expect_args(args, 1)?;
    Ok(display_value(&args[0]))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn fn_now(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 0)?;
    Ok(Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)))
}

fn fn_date(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 2)?;
    let format = args[0].as_str().ok_or("format must be a string")?;
    let timestamp: DateTime<Utc> = match &args[1] {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map_err(|error| format!("invalid RFC3339 time '{text}': {error}"))?
            .with_timezone(&Utc),
        Value::Number(number) => {
            let seconds = number.as_i64().ok_or("unix time must be an integer")?;
            Utc.timestamp_opt(seconds, 0).single().ok_or("unix time out of range")?
        }
        other => return Err(format!("cannot format {other} as a date")),
    };
    let mut formatted = String::new();
    write!(formatted, "{}", timestamp.format(format)).map_err(|_| format!("invalid date format '{format}'"))?;
    Ok(Value::String(formatted))
}

fn fn_upper(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(text.to_uppercase()))
}

fn fn_lower(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(text.to_lowercase()))
}

fn fn_title(args: &[Value]) -> Result<Value, String> {
    let text = single_string(args)?;
    let mut titled = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start && c.is_alphabetic() {
            titled.extend(c.to_uppercase());
        } else {
            titled.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    Ok(Value::String(titled))
}

fn fn_trim(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(text.trim().to_string()))
}

fn fn_snake(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(text.to_snake_case()))
}

fn fn_kebab(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(text.to_kebab_case()))
}

fn fn_camel(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(text.to_lower_camel_case()))
}

fn fn_replace(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 3)?;
    let from = display_value(&args[0]);
    let to = display_value(&args[1]);
    Ok(Value::String(display_value(&args[2]).replace(&from, &to)))
}

fn fn_default(args: &[Value]) -> Result<Value, String> {
    match args {
        [fallback] => Ok(fallback.clone()),
        [fallback, value] if is_empty_value(value) => Ok(fallback.clone()),
        [_, value] => Ok(value.clone()),
        _ => Err(format!("expected 1 or 2 argument(s), got {}", args.len())),
    }
}

fn fn_quote(args: &[Value]) -> Result<Value, String> {
    let text = single_string(args)?;
    serde_json::to_string(&text).map(Value::String).map_err(|error| error.to_string())
}

fn fn_squote(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(|text| Value::String(format!("'{text}'")))
}

fn fn_int(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 1)?;
    let integer = match &args[0] {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
            .ok_or("number out of range")?,
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .or_else(|_| trimmed.parse::<f64>().map(|float| float.trunc() as i64))
                .map_err(|_| format!("cannot convert '{text}' to int"))?
        }
        Value::Bool(flag) => i64::from(*flag),
        Value::Null => 0,
        other => return Err(format!("cannot convert {other} to int")),
    };
    Ok(Value::Number(integer.into()))
}

fn fn_float(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 1)?;
    let float = match &args[0] {
        Value::Number(number) => number.as_f64().ok_or("number out of range")?,
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| format!("cannot convert '{text}' to float"))?,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Null => 0.0,
        other => return Err(format!("cannot convert {other} to float")),
    };
    Number::from_f64(float).map(Value::Number).ok_or_else(|| "result is not a finite number".to_string())
}

fn fn_string(args: &[Value]) -> Result<Value, String> {
    single_string(args).map(Value::String)
}

fn fn_len(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 1)?;
    let length = match &args[0] {
        Value::String(text) => text.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => return Err(format!("cannot take length of {other}")),
    };
    Ok(Value::Number(length.into()))
}

fn fn_to_json(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 1)?;
    serde_json::to_string(&args[0]).map(Value::String).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "clusterId": "c1",
            "region": "us-east-1",
            "replicas": 3,
            "empty": "",
            "cluster": {"spec": {"name": "Prod Cluster"}},
            "created": "2024-03-05T10:20:30Z"
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn leaves_plain_strings_untouched() {
        assert_eq!(render("no actions here", &vars()).unwrap(), "no actions here");
    }

    #[test]
    fn interpolates_fields_and_nested_paths() {
        assert_eq!(render("ns-{{ .clusterId }}", &vars()).unwrap(), "ns-c1");
        assert_eq!(render("{{.cluster.spec.name}}/{{ .replicas }}", &vars()).unwrap(), "Prod Cluster/3");
    }

    #[test]
    fn missing_bare_field_is_an_error() {
        let error = render("ns-{{ .unknown }}", &vars()).unwrap_err();
        assert_eq!(error, TemplateError::MissingValue { path: "unknown".into() });
    }

    #[test]
    fn pipelines_pass_the_value_last() {
        assert_eq!(render("{{ .unknown | default \"fallback\" }}", &vars()).unwrap(), "fallback");
        assert_eq!(render("{{ .empty | default \"x\" | upper }}", &vars()).unwrap(), "X");
        assert_eq!(render("{{ .clusterId | upper | quote }}", &vars()).unwrap(), "\"C1\"");
        assert_eq!(render("{{ replace \"-\" \"_\" .region }}", &vars()).unwrap(), "us_east_1");
    }

    #[test]
    fn parenthesized_sub_pipelines() {
        assert_eq!(render("{{ lower (default \"NONE\" .unknown) }}", &vars()).unwrap(), "none");
    }

    #[test]
    fn case_conversion_helpers() {
        assert_eq!(render("{{ .cluster.spec.name | kebab }}", &vars()).unwrap(), "prod-cluster");
        assert_eq!(render("{{ .cluster.spec.name | snake }}", &vars()).unwrap(), "prod_cluster");
        assert_eq!(render("{{ .cluster.spec.name | camel }}", &vars()).unwrap(), "prodCluster");
        assert_eq!(render("{{ title \"hello big world\" }}", &vars()).unwrap(), "Hello Big World");
    }

    #[test]
    fn conversions_and_json() {
        assert_eq!(render("{{ int \"42\" }}", &vars()).unwrap(), "42");
        assert_eq!(render("{{ float .replicas }}", &vars()).unwrap(), "3.0");
        assert_eq!(render("{{ toJson .cluster }}", &vars()).unwrap(), r#"{"spec":{"name":"Prod Cluster"}}"#);
        assert_eq!(render("{{ len .clusterId }}", &vars()).unwrap(), "2");
    }

    #[test]
    fn dates_format_rfc3339_and_unix_inputs() {
        assert_eq!(render("{{ .created | date \"%Y-%m-%d\" }}", &vars()).unwrap(), "2024-03-05");
        assert_eq!(render("{{ date \"%Y\" 0 }}", &vars()).unwrap(), "1970");
        let now = render("{{ now }}", &vars()).unwrap();
        assert!(DateTime::parse_from_rfc3339(&now).is_ok());
    }

    #[test]
    fn trim_markers_strip_whitespace() {
        assert_eq!(render("a  {{- .clusterId -}}  b", &vars()).unwrap(), "ac1b");
        assert_eq!(render("{{ -1 }}", &vars()).unwrap(), "-1");
    }

    #[test]
    fn syntax_and_function_errors() {
        assert!(matches!(render("{{ .clusterId", &vars()), Err(TemplateError::Unterminated { .. })));
        assert!(matches!(render("{{ nope .clusterId }}", &vars()), Err(TemplateError::UnknownFunction { .. })));
        assert!(matches!(render("{{ .clusterId .region }}", &vars()), Err(TemplateError::Syntax { .. })));
        assert!(matches!(render("{{ int \"abc\" }}", &vars()), Err(TemplateError::Function { .. })));
        assert!(matches!(render("{{ }}", &vars()), Err(TemplateError::Syntax { .. })));
    }

    #[test]
    fn braces_inside_string_literals_do_not_close_actions() {
        assert_eq!(render("{{ default \"}}\" .unknown }}", &vars()).unwrap(), "}}");
    }

    #[test]
    fn render_value_walks_keys_and_leaves() {
        let manifest = json!({
            "metadata": {"name": "ns-{{ .clusterId }}", "labels": {"{{ .clusterId }}-owner": "adapter"}},
            "spec": {"replicas": 2, "items": ["{{ .region }}", true]}
        });
        let rendered = render_value(&manifest, &vars()).unwrap();
        assert_eq!(rendered["metadata"]["name"], "ns-c1");
        assert_eq!(rendered["metadata"]["labels"]["c1-owner"], "adapter");
        assert_eq!(rendered["spec"]["items"], json!(["us-east-1", true]));
        assert_eq!(rendered["spec"]["replicas"], 2);
    }
}
