//! Inline expression support for data-node lists and sharding templates.
//!
//! Two flavours are supported:
//! - enumeration expressions such as `ds_${0..1}.t_order_${[0, 2]}`, expanded
//!   into the cartesian product of their placeholders, and
//! - value templates such as `t_order_${order_id % 4}`, rendered once per
//!   sharding key by the `INLINE` algorithm.
//!
//! `$->{...}` is accepted everywhere `${...}` is.

use anyhow::{anyhow, bail, Context};

use crate::error::{Result, ShardingError};
use crate::sharding_value::ShardingKey;

/// One parsed piece of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Splits `expression` on top-level commas and expands every item.
///
/// Results keep item order, and inside one item the left-most placeholder
/// varies slowest.
pub fn split_and_evaluate(expression: &str) -> Result<Vec<String>> {
    let mut result = Vec::new();
    for item in split_top_level(expression)? {
        let segments = parse_segments(&item)?;
        result.extend(expand(&segments)?);
    }
    Ok(result)
}

fn split_top_level(expression: &str) -> Result<Vec<String>> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in expression.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    ShardingError::config(format!("unbalanced `}}` in inline expression `{expression}`"))
                })?;
                current.push(ch);
            }
            ',' if depth == 0 => {
                push_item(&mut items, &current);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(ShardingError::config(format!(
            "unterminated placeholder in inline expression `{expression}`"
        )));
    }
    push_item(&mut items, &current);
    Ok(items)
}

fn push_item(items: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        items.push(trimmed.to_string());
    }
}

fn parse_segments(item: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = item;
    while let Some((start, open_len)) = find_placeholder_start(rest) {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let body_start = start + open_len;
        let body_len = closing_brace(&rest[body_start..]).ok_or_else(|| {
            ShardingError::config(format!("unterminated placeholder in inline expression `{item}`"))
        })?;
        segments.push(Segment::Placeholder(
            rest[body_start..body_start + body_len].trim().to_string(),
        ));
        rest = &rest[body_start + body_len + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Finds the next `${` or `$->{`, returning its offset and opener length.
fn find_placeholder_start(text: &str) -> Option<(usize, usize)> {
    let plain = text.find("${").map(|idx| (idx, 2));
    let arrow = text.find("$->{").map(|idx| (idx, 4));
    match (plain, arrow) {
        (Some(p), Some(a)) => Some(if p.0 <= a.0 { p } else { a }),
        (found, None) | (None, found) => found,
    }
}

/// Offset of the brace closing an already-opened placeholder.
fn closing_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn expand(segments: &[Segment]) -> Result<Vec<String>> {
    let mut combos = vec![String::new()];
    for segment in segments {
        let choices = match segment {
            Segment::Literal(text) => vec![text.clone()],
            Segment::Placeholder(body) => evaluate_choices(body)?,
        };
        let mut next = Vec::with_capacity(combos.len() * choices.len());
        for prefix in &combos {
            for choice in &choices {
                next.push(format!("{prefix}{choice}"));
            }
        }
        combos = next;
    }
    Ok(combos)
}

/// Evaluates the body of an enumeration placeholder.
fn evaluate_choices(body: &str) -> Result<Vec<String>> {
    if let Some((low, high)) = body.split_once("..") {
        if let (Ok(low), Ok(high)) = (low.trim().parse::<i64>(), high.trim().parse::<i64>()) {
            let values: Vec<String> = if low <= high {
                (low..=high).map(|v| v.to_string()).collect()
            } else {
                (high..=low).rev().map(|v| v.to_string()).collect()
            };
            return Ok(values);
        }
        return Err(ShardingError::config(format!(
            "invalid range placeholder `${{{body}}}`"
        )));
    }
    let list = body
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(body);
    let values: Vec<String> = list
        .split(',')
        .map(|each| each.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|each| !each.is_empty())
        .collect();
    if values.is_empty() {
        return Err(ShardingError::config(format!(
            "empty placeholder `${{{body}}}` in inline expression"
        )));
    }
    Ok(values)
}

/// Arithmetic operator allowed inside a value template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// `column [op literal]` placeholder of a value template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValueExpr {
    column: String,
    operation: Option<(Operator, i64)>,
}

/// Template rendering a sharding key into a target name, e.g. `ds_${user_id % 2}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineTemplate {
    source: String,
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Value(ValueExpr),
}

impl InlineTemplate {
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let segments = parse_segments(source.trim()).map_err(|err| anyhow!(err.to_string()))?;
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            parts.push(match segment {
                Segment::Literal(text) => TemplatePart::Literal(text),
                Segment::Placeholder(body) => TemplatePart::Value(
                    parse_value_expr(&body)
                        .with_context(|| format!("invalid inline template `{source}`"))?,
                ),
            });
        }
        if !parts.iter().any(|part| matches!(part, TemplatePart::Value(_))) {
            bail!("inline template `{source}` references no column");
        }
        Ok(Self {
            source: source.trim().to_string(),
            parts,
        })
    }

    /// Columns referenced by the template, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                TemplatePart::Value(expr) => Some(expr.column.as_str()),
                TemplatePart::Literal(_) => None,
            })
            .collect()
    }

    /// Renders the template for `key` bound to `column`.
    pub fn render(&self, column: &str, key: &ShardingKey) -> anyhow::Result<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Value(expr) => {
                    if !expr.column.eq_ignore_ascii_case(column) {
                        bail!(
                            "template `{}` expects column `{}`, got `{column}`",
                            self.source,
                            expr.column
                        );
                    }
                    out.push_str(&expr.apply(key)?);
                }
            }
        }
        Ok(out)
    }
}

impl ValueExpr {
    fn apply(&self, key: &ShardingKey) -> anyhow::Result<String> {
        let Some((op, operand)) = self.operation else {
            return Ok(key.to_string());
        };
        let value = key
            .as_i64()
            .ok_or_else(|| anyhow!("value `{key}` of `{}` is not numeric", self.column))?;
        let computed = match op {
            Operator::Add => value.checked_add(operand),
            Operator::Sub => value.checked_sub(operand),
            Operator::Mul => value.checked_mul(operand),
            Operator::Div => value.checked_div(operand),
            // Negative keys still land on a valid suffix.
            Operator::Rem => value.checked_rem_euclid(operand),
        };
        computed
            .map(|v| v.to_string())
            .ok_or_else(|| anyhow!("arithmetic overflow evaluating `{}` for `{key}`", self.column))
    }
}

fn parse_value_expr(body: &str) -> anyhow::Result<ValueExpr> {
    let body = body.trim();
    let op_at = body.char_indices().find(|(_, ch)| matches!(ch, '+' | '-' | '*' | '/' | '%'));
    let Some((idx, ch)) = op_at else {
        ensure_identifier(body)?;
        return Ok(ValueExpr {
            column: body.to_string(),
            operation: None,
        });
    };
    let column = body[..idx].trim();
    ensure_identifier(column)?;
    let operand: i64 = body[idx + 1..]
        .trim()
        .parse()
        .with_context(|| format!("operand in `{body}` must be an integer literal"))?;
    let op = match ch {
        '+' => Operator::Add,
        '-' => Operator::Sub,
        '*' => Operator::Mul,
        '/' => Operator::Div,
        _ => Operator::Rem,
    };
    if matches!(op, Operator::Div | Operator::Rem) && operand == 0 {
        bail!("division by zero in `{body}`");
    }
    Ok(ValueExpr {
        column: column.to_string(),
        operation: Some((op, operand)),
    })
}

fn ensure_identifier(raw: &str) -> anyhow::Result<()> {
    if !raw.is_empty() && raw.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        Ok(())
    } else {
        Err(anyhow!("`{raw}` is not a column name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_cartesian_product_left_to_right() {
        let nodes = split_and_evaluate("ds_${0..1}.table_${0..2}").expect("expand");
        assert_eq!(
            nodes,
            vec![
                "ds_0.table_0",
                "ds_0.table_1",
                "ds_0.table_2",
                "ds_1.table_0",
                "ds_1.table_1",
                "ds_1.table_2",
            ]
        );
    }

    #[test]
    fn expands_lists_and_top_level_items() {
        let nodes =
            split_and_evaluate("ds_0.t_${[a, 'b']}, ds_1.t_$->{0..1}").expect("expand");
        assert_eq!(nodes, vec!["ds_0.t_a", "ds_0.t_b", "ds_1.t_0", "ds_1.t_1"]);
    }

    #[test]
    fn plain_literals_pass_through() {
        assert_eq!(
            split_and_evaluate(" ds_0.t_user ,ds_1.t_user").expect("expand"),
            vec!["ds_0.t_user", "ds_1.t_user"]
        );
        assert!(split_and_evaluate("").expect("empty").is_empty());
    }

    #[test]
    fn descending_range_is_supported() {
        assert_eq!(split_and_evaluate("t_${2..0}").expect("expand"), vec!["t_2", "t_1", "t_0"]);
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let err = split_and_evaluate("ds_${0..1.t").expect_err("must fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn template_renders_modulo() {
        let template = InlineTemplate::parse("t_order_${order_id % 4}").expect("parse");
        assert_eq!(template.columns(), vec!["order_id"]);
        assert_eq!(template.render("ORDER_ID", &ShardingKey::Int(10)).expect("render"), "t_order_2");
        assert_eq!(template.render("order_id", &ShardingKey::Int(-1)).expect("render"), "t_order_3");
    }

    #[test]
    fn template_rejects_non_numeric_value_for_arithmetic() {
        let template = InlineTemplate::parse("ds_$->{user_id % 2}").expect("parse");
        assert!(template.render("user_id", &ShardingKey::from("abc")).is_err());
        let passthrough = InlineTemplate::parse("t_${region}").expect("parse");
        assert_eq!(passthrough.render("region", &ShardingKey::from("eu")).expect("render"), "t_eu");
    }

    #[test]
    fn template_requires_column_reference() {
        assert!(InlineTemplate::parse("t_order_0").is_err());
        assert!(InlineTemplate::parse("t_${id % 0}").is_err());
    }
}
