/// Template rendering for guest info and OVF property values.
///
/// Values are Tera templates evaluated against a JSON context. A single trailing
/// `{# finalize #}` directive feeds the rendered text through a second pass, so a
/// first stage can emit template syntax for the second to evaluate.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::{Error, Result};
use flate2::{write::GzEncoder, Compression};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use tera::{Context, Tera};

pub const FINALIZE_DIRECTIVE: &str = "{# finalize #}";

/// True when `text` contains Tera expression or statement delimiters.
pub fn has_template_syntax(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

pub fn render_template(template: &str, context: &Value) -> Result<String> {
    let occurrences = template.matches(FINALIZE_DIRECTIVE).count();
    if occurrences > 1 {
        return Err(Error::Template(format!(
            "{} may appear only once, found {}",
            FINALIZE_DIRECTIVE, occurrences
        )));
    }

    let context = build_context(context)?;

    if occurrences == 0 {
        return render_stage(template, &context);
    }

    let body = template
        .trim_end()
        .strip_suffix(FINALIZE_DIRECTIVE)
        .ok_or_else(|| {
            Error::Template(format!(
                "{} must be the last element of the template",
                FINALIZE_DIRECTIVE
            ))
        })?;

    let first = render_stage(body, &context)?;
    render_stage(&first, &context)
}

fn build_context(value: &Value) -> Result<Context> {
    match value {
        Value::Object(_) => Context::from_value(value.clone()).map_err(template_error),
        Value::Null => Ok(Context::new()),
        other => {
            let mut context = Context::new();
            context.insert("value", other);
            Ok(context)
        }
    }
}

fn render_stage(source: &str, context: &Context) -> Result<String> {
    let mut tera = engine();
    tera.add_raw_template("value", source).map_err(template_error)?;
    tera.render("value", context).map_err(template_error)
}

fn engine() -> Tera {
    let mut tera = Tera::default();
    tera.register_filter("substr", substr);
    tera.register_filter("add", add);
    tera.register_filter("date_format", date_format);
    tera.register_filter("base64_encode", base64_encode);
    tera.register_filter("base64_gzip", base64_gzip);
    tera.register_function("printf", printf);
    tera.register_function("now", now);
    tera
}

fn template_error(e: tera::Error) -> Error {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    Error::Template(message)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn usize_arg(args: &HashMap<String, Value>, name: &str) -> tera::Result<Option<usize>> {
    match args.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| tera::Error::msg(format!("`{}` must be a non-negative integer", name))),
    }
}

/// `{{ name | substr(start=1, length=3) }}`
fn substr(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = as_text(value);
    let start = usize_arg(args, "start")?.unwrap_or(0);
    let chars = text.chars().skip(start);
    let result: String = match usize_arg(args, "length")? {
        Some(length) => chars.take(length).collect(),
        None => chars.collect(),
    };
    Ok(Value::String(result))
}

/// `{{ memSize | add(value=512) }}`; strings are concatenated.
fn add(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let operand = args
        .get("value")
        .ok_or_else(|| tera::Error::msg("`add` requires a `value` argument"))?;

    match (value, operand) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Ok(Value::from(a + b)),
            _ => Ok(Value::from(
                a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default(),
            )),
        },
        (a, b) => Ok(Value::String(format!("{}{}", as_text(a), as_text(b)))),
    }
}

/// Formats an RFC 3339 string or a unix timestamp with a chrono format string.
fn date_format(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let format = args
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%d");

    let timestamp = match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| tera::Error::msg(format!("invalid timestamp {}", n)))?,
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| tera::Error::msg(format!("invalid date '{}': {}", s, e)))?,
        other => return Err(tera::Error::msg(format!("cannot format {} as a date", other))),
    };

    Ok(Value::String(timestamp.format(format).to_string()))
}

fn base64_encode(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(BASE64.encode(as_text(value))))
}

/// gzip then base64, the encoding cloud-init accepts for compressed user data.
fn base64_gzip(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(as_text(value).as_bytes())
        .map_err(|e| tera::Error::msg(format!("gzip failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| tera::Error::msg(format!("gzip failed: {}", e)))?;
    Ok(Value::String(BASE64.encode(compressed)))
}

/// `{{ printf(format="%s-%d", args=["web", 1]) }}`; supports `%s`, `%d`, `%v` and `%%`.
fn printf(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let format = args
        .get("format")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("`printf` requires a `format` argument"))?;
    let values = match args.get("args") {
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
        None => Vec::new(),
    };

    let mut values = values.iter();
    let mut output = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => output.push('%'),
            Some(verb @ ('s' | 'd' | 'v')) => {
                let value = values.next().ok_or_else(|| {
                    tera::Error::msg(format!("missing argument for %{} in '{}'", verb, format))
                })?;
                output.push_str(&as_text(value));
            }
            Some(other) => {
                return Err(tera::Error::msg(format!("unsupported verb %{}", other)));
            }
            None => output.push('%'),
        }
    }

    Ok(Value::String(output))
}

/// Current time, RFC 3339 unless a chrono `format` is given.
fn now(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let now = chrono::Utc::now();
    let text = match args.get("format").and_then(Value::as_str) {
        Some(format) => now.format(format).to_string(),
        None => now.to_rfc3339(),
    };
    Ok(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Read;

    fn context() -> Value {
        json!({ "name": "web-01", "memSize": 512, "diskStore": "datastore1", "created": 0 })
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render_template("hello", &context()).unwrap(), "hello");
    }

    #[test]
    fn test_builtin_and_custom_filters() {
        let out = render_template(
            "{{ name | upper }} {{ name | substr(start=4) }} {{ memSize | add(value=512) }} {{ diskStore | replace(from=\"datastore\", to=\"ds\") }}",
            &context(),
        )
        .unwrap();
        assert_eq!(out, "WEB-01 01 1024 ds1");
    }

    #[test]
    fn test_printf_function() {
        let out = render_template(
            "{{ printf(format=\"%s has %d MB (100%%)\", args=[name, memSize]) }}",
            &context(),
        )
        .unwrap();
        assert_eq!(out, "web-01 has 512 MB (100%)");
    }

    #[test]
    fn test_date_format() {
        let out = render_template("{{ created | date_format(format=\"%Y\") }}", &context()).unwrap();
        assert_eq!(out, "1970");
    }

    #[test]
    fn test_base64_filters() {
        let out = render_template("{{ name | base64_encode }}", &context()).unwrap();
        assert_eq!(out, "d2ViLTAx");

        let gz = render_template("{{ name | base64_gzip }}", &context()).unwrap();
        let bytes = BASE64.decode(gz).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "web-01");
    }

    #[test]
    fn test_finalize_runs_second_stage() {
        let template = "{{ \"{{\" }} name | upper {{ \"}}\" }}{# finalize #}\n";
        assert_eq!(render_template(template, &context()).unwrap(), "WEB-01");
    }

    #[test]
    fn test_finalize_must_be_last_and_unique() {
        let err = render_template("{# finalize #} {{ name }}", &context()).unwrap_err();
        assert!(matches!(err, Error::Template(_)));

        let err = render_template("a {# finalize #}{# finalize #}", &context()).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn test_syntax_detection() {
        assert!(has_template_syntax("{{ name }}"));
        assert!(has_template_syntax("{% if x %}y{% endif %}"));
        assert!(!has_template_syntax("plain"));
    }
}
