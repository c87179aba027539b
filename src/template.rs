//! `{{ expression }}` templates rendered through `evalexpr`.
//!
//! A template is literal text interleaved with expression blocks. Blocks are
//! compiled once when the template is parsed; rendering binds the current
//! source value, the row (`line.<column>`), the record built so far
//! (`out.<column>`), and a small library of string and date functions.

use std::borrow::Cow;

use chrono::{Duration, NaiveDate};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value as EvalValue,
};
use heck::{ToLowerCamelCase, ToSnakeCase, ToUpperCamelCase};
use regex::Regex;

use crate::{
    data::{OutputRecord, Row, field, normalize_column_name},
    error::{RemapError, Result},
};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Block(Node),
}

#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

/// Everything a template can see while rendering one output column.
pub struct TemplateContext<'a> {
    pub value: &'a str,
    pub in_key: &'a str,
    pub out_key: &'a str,
    pub row: &'a Row,
    pub output: &'a OutputRecord,
    pub output_columns: &'a [String],
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or_else(|| RemapError::Template {
                template: source.to_string(),
                cause: eval_error("unterminated '{{' block"),
            })?;
            let body = after_open[..end].trim();
            let body = body.strip_prefix('.').unwrap_or(body);
            let node = evalexpr::build_operator_tree(body).map_err(|err| {
                RemapError::Template {
                    template: source.to_string(),
                    cause: err,
                }
            })?;
            segments.push(Segment::Block(node));
            rest = &after_open[end + CLOSE.len()..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Template {
            source: source.to_string(),
            segments,
        })
    }

    pub fn render(&self, ctx: &TemplateContext<'_>) -> Result<String> {
        if self
            .segments
            .iter()
            .all(|segment| matches!(segment, Segment::Text(_)))
        {
            return Ok(self.literal_text());
        }
        let context = build_context(ctx).map_err(|err| self.error(err))?;
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Block(node) => {
                    let value = node
                        .eval_with_context(&context)
                        .map_err(|err| self.error(err))?;
                    rendered.push_str(&stringify(value));
                }
            }
        }
        Ok(rendered)
    }

    fn literal_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) => Some(text.as_str()),
                Segment::Block(_) => None,
            })
            .collect()
    }

    fn error(&self, cause: EvalexprError) -> RemapError {
        RemapError::Template {
            template: self.source.clone(),
            cause,
        }
    }
}

fn build_context(ctx: &TemplateContext<'_>) -> Result<HashMapContext, EvalexprError> {
    let mut context: HashMapContext = HashMapContext::new();
    register_functions(&mut context)?;
    context.set_value("value".into(), EvalValue::String(ctx.value.to_string()))?;
    context.set_value("in_key".into(), EvalValue::String(ctx.in_key.to_string()))?;
    context.set_value("out_key".into(), EvalValue::String(ctx.out_key.to_string()))?;
    for (column, value) in ctx.row {
        bind_column(&mut context, "line", column, value)?;
    }
    for column in ctx.output_columns {
        bind_column(&mut context, "out", column, field(ctx.output, column))?;
    }
    Ok(context)
}

/// Binds `<scope>.<normalized>` and, when it differs, the header as written.
fn bind_column(
    context: &mut HashMapContext,
    scope: &str,
    column: &str,
    value: &str,
) -> Result<(), EvalexprError> {
    let normalized = normalize_column_name(column);
    if normalized != column {
        context.set_value(
            format!("{scope}.{column}"),
            EvalValue::String(value.to_string()),
        )?;
    }
    context.set_value(
        format!("{scope}.{normalized}"),
        EvalValue::String(value.to_string()),
    )
}

fn stringify(value: EvalValue) -> String {
    match value {
        EvalValue::String(s) => s,
        EvalValue::Int(i) => i.to_string(),
        EvalValue::Float(f) => f.to_string(),
        EvalValue::Boolean(b) => b.to_string(),
        EvalValue::Tuple(values) => values
            .into_iter()
            .map(stringify)
            .collect::<Vec<_>>()
            .join("|"),
        EvalValue::Empty => String::new(),
    }
}

fn register_functions(context: &mut HashMapContext) -> Result<(), EvalexprError> {
    register_unary(context, "lowercase", |value| Cow::Owned(value.to_lowercase()))?;
    register_unary(context, "uppercase", |value| Cow::Owned(value.to_uppercase()))?;
    register_unary(context, "trim", |value| Cow::Borrowed(value.trim()))?;
    register_unary(context, "snake_case", |value| Cow::Owned(value.to_snake_case()))?;
    register_unary(context, "camel_case", |value| {
        Cow::Owned(value.to_lower_camel_case())
    })?;
    register_unary(context, "pascal_case", |value| {
        Cow::Owned(value.to_upper_camel_case())
    })?;

    context.set_function(
        "substring".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 3, "substring")?;
            let value = expect_string(&args[0], "value")?;
            let start = expect_int(&args[1], "start")?.max(0) as usize;
            let length = expect_int(&args[2], "length")?.max(0) as usize;
            Ok(EvalValue::String(
                value.chars().skip(start).take(length).collect(),
            ))
        }),
    )?;

    context.set_function(
        "replace".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 3, "replace")?;
            let value = expect_string(&args[0], "value")?;
            let from = expect_string(&args[1], "from")?;
            let to = expect_string(&args[2], "to")?;
            Ok(EvalValue::String(value.replace(from, to)))
        }),
    )?;

    context.set_function(
        "regex_replace".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 3, "regex_replace")?;
            let value = expect_string(&args[0], "value")?;
            let pattern = expect_string(&args[1], "pattern")?;
            let replacement = expect_string(&args[2], "replacement")?;
            let regex = Regex::new(pattern)
                .map_err(|err| eval_error(&format!("Invalid regex: {err}")))?;
            Ok(EvalValue::String(
                regex.replace_all(value, replacement).into_owned(),
            ))
        }),
    )?;

    // Zero-based; out of range yields an empty string.
    context.set_function(
        "split_part".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 3, "split_part")?;
            let value = expect_string(&args[0], "value")?;
            let separator = expect_string(&args[1], "separator")?;
            let index = expect_int(&args[2], "index")?;
            let part = usize::try_from(index)
                .ok()
                .and_then(|idx| value.split(separator).nth(idx))
                .unwrap_or("");
            Ok(EvalValue::String(part.to_string()))
        }),
    )?;

    context.set_function(
        "date_format".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 2, "date_format")?;
            let date = parse_date(expect_string(&args[0], "date")?)?;
            let format = expect_string(&args[1], "format")?;
            Ok(EvalValue::String(date.format(format).to_string()))
        }),
    )?;

    context.set_function(
        "date_add".into(),
        Function::new(|arguments| {
            let args = expect_args(arguments, 2, "date_add")?;
            let date = parse_date(expect_string(&args[0], "date")?)?;
            let days = expect_int(&args[1], "days")?;
            let result = date
                .checked_add_signed(Duration::days(days))
                .ok_or_else(|| eval_error("date_add overflow"))?;
            Ok(EvalValue::String(result.format("%Y-%m-%d").to_string()))
        }),
    )?;

    Ok(())
}

fn register_unary(
    context: &mut HashMapContext,
    name: &'static str,
    op: fn(&str) -> Cow<'_, str>,
) -> Result<(), EvalexprError> {
    context.set_function(
        name.into(),
        Function::new(move |arguments| {
            let args = expect_args(arguments, 1, name)?;
            let value = expect_string(&args[0], "value")?;
            Ok(EvalValue::String(op(value).into_owned()))
        }),
    )
}

fn expect_args(
    arguments: &EvalValue,
    expected: usize,
    name: &str,
) -> Result<Vec<EvalValue>, EvalexprError> {
    match arguments {
        EvalValue::Tuple(values) if values.len() == expected => Ok(values.clone()),
        value if expected == 1 && !matches!(value, EvalValue::Tuple(_)) => Ok(vec![value.clone()]),
        _ => Err(eval_error(&format!("{name} expects {expected} argument(s)"))),
    }
}

fn expect_string<'a>(value: &'a EvalValue, name: &str) -> Result<&'a str, EvalexprError> {
    match value {
        EvalValue::String(s) => Ok(s),
        _ => Err(eval_error(&format!("Expected string for {name}"))),
    }
}

fn expect_int(value: &EvalValue, name: &str) -> Result<i64, EvalexprError> {
    match value {
        EvalValue::Int(i) => Ok(*i),
        EvalValue::Float(f) => Ok(*f as i64),
        other => Err(eval_error(&format!(
            "Expected integer for {name}, got {other:?}"
        ))),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, EvalexprError> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| eval_error(&format!("Failed to parse '{raw}' as date")))
}

fn eval_error(message: &str) -> EvalexprError {
    EvalexprError::CustomMessage(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(template: &str, value: &str, row: &Row) -> Result<String> {
        let output = OutputRecord::new();
        Template::parse(template)?.render(&TemplateContext {
            value,
            in_key: "in",
            out_key: "out",
            row,
            output: &output,
            output_columns: &[],
        })
    }

    #[test]
    fn renders_value_and_line_fields() {
        let mut row = Row::new();
        row.insert("Brand Name".into(), "Acme".into());
        let rendered = render("{{ .value }} by {{ line.brand_name }}", "Widget", &row).unwrap();
        assert_eq!(rendered, "Widget by Acme");
    }

    #[test]
    fn header_is_reachable_as_written() {
        let mut row = Row::new();
        row.insert("SKU".into(), "A1".into());
        let output = OutputRecord::from([("Code".to_string(), "x-1".to_string())]);
        let columns = ["Code".to_string()];
        let rendered = Template::parse("{{ .line.SKU }}/{{ line.sku }}/{{ out.Code }}")
            .unwrap()
            .render(&TemplateContext {
                value: "",
                in_key: "",
                out_key: "name",
                row: &row,
                output: &output,
                output_columns: &columns,
            })
            .unwrap();
        assert_eq!(rendered, "A1/A1/x-1");
    }

    #[test]
    fn literal_template_skips_context() {
        let rendered = render("plain text", "", &Row::new()).unwrap();
        assert_eq!(rendered, "plain text");
    }

    #[test]
    fn functions_are_available() {
        let row = Row::new();
        assert_eq!(render("{{ uppercase(value) }}", "abc", &row).unwrap(), "ABC");
        assert_eq!(
            render("{{ split_part(value, \"/\", 1) }}", "a/b/c", &row).unwrap(),
            "b"
        );
        assert_eq!(
            render("{{ date_add(value, 5) }}", "2024-01-01", &row).unwrap(),
            "2024-01-06"
        );
        assert_eq!(render("{{ snake_case(value) }}", "Foo Bar", &row).unwrap(), "foo_bar");
    }

    #[test]
    fn output_so_far_defaults_to_empty() {
        let mut output = OutputRecord::new();
        output.insert("title".into(), "Hello".into());
        let columns = vec!["title".to_string(), "slug".to_string()];
        let template = Template::parse("{{ out.title }}[{{ out.slug }}]").unwrap();
        let rendered = template
            .render(&TemplateContext {
                value: "",
                in_key: "",
                out_key: "slug",
                row: &Row::new(),
                output: &output,
                output_columns: &columns,
            })
            .unwrap();
        assert_eq!(rendered, "Hello[]");
    }

    #[test]
    fn unterminated_block_is_rejected() {
        assert!(matches!(
            Template::parse("{{ value"),
            Err(RemapError::Template { .. })
        ));
    }

    #[test]
    fn unknown_variable_fails_at_render() {
        let err = render("{{ line.missing }}", "", &Row::new()).unwrap_err();
        assert!(matches!(err, RemapError::Template { .. }));
    }
}
