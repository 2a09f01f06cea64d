//! Push-down fragments carried by a physical scan.
//!
//! Fragments are stored as AST expression fragments, not backend strings;
//! `encode` renders the backend-agnostic JSON DSL handed to the
//! `DataSource` as the opaque blob. A concrete connector translates that
//! JSON into its wire format.

use crate::ast::{BinaryOp, Expr, LiteralValue, Position, UnaryOp};
use serde_json::{json, Value as JsonValue};

/// Sort key on a plain field.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSortKey {
    pub field: String,
    pub descending: bool,
}

/// Computed-field assignment shipped to the backend (script field).
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedField {
    pub field: String,
    pub expr: Expr,
}

/// Everything a scan executes remotely: optional filter, projection,
/// sort, a scalar row cap and computed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFragments {
    pub filter: Option<Expr>,
    pub projection: Option<Vec<String>>,
    pub sort: Option<Vec<FragmentSortKey>>,
    pub limit: Option<u64>,
    pub computed: Vec<ComputedField>,
}

impl ScanFragments {
    pub fn is_empty(&self) -> bool {
        self.filter.is_none()
            && self.projection.is_none()
            && self.sort.is_none()
            && self.limit.is_none()
            && self.computed.is_empty()
    }

    /// ANDs a condition into the filter fragment, newest first to mirror
    /// the original nesting order.
    pub fn and_filter(&mut self, condition: Expr) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => Expr::binary(
                BinaryOp::And,
                condition,
                existing,
                Position::none(),
            ),
            None => condition,
        });
    }

    /// Intersects with an earlier projection, keeping the new order.
    pub fn intersect_projection(&mut self, fields: Vec<String>) {
        self.projection = Some(match self.projection.take() {
            Some(existing) => fields
                .into_iter()
                .filter(|f| existing.contains(f))
                .collect(),
            None => fields,
        });
    }

    pub fn cap_limit(&mut self, count: u64) {
        self.limit = Some(match self.limit {
            Some(existing) => existing.min(count),
            None => count,
        });
    }

    /// Renders the backend-agnostic JSON DSL.
    pub fn encode(&self) -> JsonValue {
        let mut obj = serde_json::Map::new();
        if let Some(filter) = &self.filter {
            obj.insert("filter".to_string(), encode_expr(filter));
        }
        if let Some(projection) = &self.projection {
            obj.insert("projection".to_string(), json!(projection));
        }
        if let Some(sort) = &self.sort {
            let keys: Vec<JsonValue> = sort
                .iter()
                .map(|k| json!({"field": k.field, "desc": k.descending}))
                .collect();
            obj.insert("sort".to_string(), JsonValue::Array(keys));
        }
        if let Some(limit) = self.limit {
            obj.insert("limit".to_string(), json!(limit));
        }
        if !self.computed.is_empty() {
            let fields: Vec<JsonValue> = self
                .computed
                .iter()
                .map(|c| json!({"field": c.field, "expr": encode_expr(&c.expr)}))
                .collect();
            obj.insert("computed".to_string(), JsonValue::Array(fields));
        }
        JsonValue::Object(obj)
    }
}

fn encode_literal(value: &LiteralValue) -> JsonValue {
    match value {
        LiteralValue::Null => JsonValue::Null,
        LiteralValue::Bool(b) => json!(b),
        LiteralValue::Int(i) => json!(i),
        LiteralValue::Float(f) => json!(f),
        LiteralValue::Str(s) => json!(s),
    }
}

fn encode_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Like => "like",
        BinaryOp::In => "in",
        other => other.symbol(),
    }
}

/// Expression tree as nested JSON objects. Field references become
/// `{"field": name}`, literals `{"value": v}`, calls carry the backend
/// UDF identifier when the function is registered.
pub fn encode_expr(expr: &Expr) -> JsonValue {
    match expr {
        Expr::Field(f) => json!({"field": f.name}),
        Expr::Literal(l) => json!({"value": encode_literal(&l.value)}),
        Expr::Binary(b) => json!({
            "op": encode_op(b.op),
            "left": encode_expr(&b.left),
            "right": encode_expr(&b.right),
        }),
        Expr::Unary(u) => {
            let op = match u.op {
                UnaryOp::Not => "not",
                UnaryOp::Neg => "neg",
            };
            json!({"op": op, "operand": encode_expr(&u.operand)})
        }
        Expr::Call(c) => {
            let udf = crate::functions::get_function(&c.name)
                .map(|d| d.backend_udf.to_string())
                .unwrap_or_else(|| c.name.clone());
            let args: Vec<JsonValue> = c.args.iter().map(encode_expr).collect();
            json!({"call": udf, "args": args})
        }
        Expr::List(l) => {
            let items: Vec<JsonValue> = l.items.iter().map(encode_expr).collect();
            json!({"values": items})
        }
        Expr::Case(c) => {
            let whens: Vec<JsonValue> = c
                .whens
                .iter()
                .map(|w| {
                    json!({
                        "when": encode_expr(&w.condition),
                        "then": encode_expr(&w.result),
                    })
                })
                .collect();
            let mut obj = serde_json::Map::new();
            obj.insert("case".to_string(), JsonValue::Array(whens));
            if let Some(e) = &c.else_expr {
                obj.insert("else".to_string(), encode_expr(e));
            }
            JsonValue::Object(obj)
        }
    }
}

/// Inverse of `encode_expr`; used by in-process backends (and the test
/// double) that interpret the JSON DSL directly. Returns `None` for
/// shapes this encoder never produces.
pub fn decode_expr(value: &JsonValue) -> Option<Expr> {
    let obj = value.as_object()?;
    if let Some(field) = obj.get("field").and_then(|f| f.as_str()) {
        return Some(Expr::field(field, Position::none()));
    }
    if let Some(literal) = obj.get("value") {
        let lit = match literal {
            JsonValue::Null => LiteralValue::Null,
            JsonValue::Bool(b) => LiteralValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => LiteralValue::Int(i),
                None => LiteralValue::Float(n.as_f64()?),
            },
            JsonValue::String(s) => LiteralValue::Str(s.clone()),
            _ => return None,
        };
        return Some(Expr::literal(lit, Position::none()));
    }
    if let Some(items) = obj.get("values").and_then(|v| v.as_array()) {
        let items = items.iter().map(decode_expr).collect::<Option<Vec<_>>>()?;
        return Some(Expr::List(crate::ast::ListLiteral {
            items,
            position: Position::none(),
        }));
    }
    if let Some(udf) = obj.get("call").and_then(|c| c.as_str()) {
        let args = obj
            .get("args")
            .and_then(|a| a.as_array())?
            .iter()
            .map(decode_expr)
            .collect::<Option<Vec<_>>>()?;
        let name = crate::functions::list_functions()
            .into_iter()
            .find(|d| d.backend_udf == udf)
            .map(|d| d.name.to_string())
            .unwrap_or_else(|| udf.to_string());
        return Some(Expr::call(name, args, Position::none()));
    }
    if let Some(whens) = obj.get("case").and_then(|c| c.as_array()) {
        let whens = whens
            .iter()
            .map(|w| {
                Some(crate::ast::WhenClause {
                    condition: Box::new(decode_expr(w.get("when")?)?),
                    result: Box::new(decode_expr(w.get("then")?)?),
                    position: Position::none(),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        let else_expr = match obj.get("else") {
            Some(e) => Some(Box::new(decode_expr(e)?)),
            None => None,
        };
        return Some(Expr::Case(crate::ast::CaseExpr {
            whens,
            else_expr,
            position: Position::none(),
        }));
    }
    let op = obj.get("op").and_then(|o| o.as_str())?;
    if let Some(operand) = obj.get("operand") {
        let unary = match op {
            "not" => UnaryOp::Not,
            "neg" => UnaryOp::Neg,
            _ => return None,
        };
        return Some(Expr::unary(unary, decode_expr(operand)?, Position::none()));
    }
    let binary = match op {
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        "like" => BinaryOp::Like,
        "in" => BinaryOp::In,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "=" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        _ => return None,
    };
    Some(Expr::binary(
        binary,
        decode_expr(obj.get("left")?)?,
        decode_expr(obj.get("right")?)?,
        Position::none(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::none()
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let e = Expr::binary(
            BinaryOp::And,
            Expr::binary(
                BinaryOp::Ge,
                Expr::field("status", pos()),
                Expr::int(400),
                pos(),
            ),
            Expr::binary(
                BinaryOp::Like,
                Expr::field("host", pos()),
                Expr::string("web%"),
                pos(),
            ),
            pos(),
        );
        let decoded = decode_expr(&encode_expr(&e)).unwrap();
        assert_eq!(decoded.to_string(), e.to_string());
    }

    #[test]
    fn test_decode_call_restores_surface_name() {
        let e = Expr::call("abs", vec![Expr::field("latency", pos())], pos());
        let decoded = decode_expr(&encode_expr(&e)).unwrap();
        assert_eq!(decoded.to_string(), "abs(latency)");
    }

    #[test]
    fn test_empty_fragments() {
        let f = ScanFragments::default();
        assert!(f.is_empty());
        assert_eq!(f.encode(), json!({}));
    }

    #[test]
    fn test_and_filter_accumulates() {
        let mut f = ScanFragments::default();
        f.and_filter(Expr::binary(
            BinaryOp::Eq,
            Expr::field("status", pos()),
            Expr::int(200),
            pos(),
        ));
        f.and_filter(Expr::binary(
            BinaryOp::Gt,
            Expr::field("latency", pos()),
            Expr::int(5),
            pos(),
        ));
        let encoded = f.encode();
        assert_eq!(encoded["filter"]["op"], "and");
        // Newest condition sits on the AND-left.
        assert_eq!(encoded["filter"]["left"]["left"]["field"], "latency");
    }

    #[test]
    fn test_projection_intersection_keeps_new_order() {
        let mut f = ScanFragments::default();
        f.intersect_projection(vec!["a".into(), "b".into(), "c".into()]);
        f.intersect_projection(vec!["c".into(), "a".into(), "d".into()]);
        assert_eq!(f.projection, Some(vec!["c".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_limit_caps_at_minimum() {
        let mut f = ScanFragments::default();
        f.cap_limit(100);
        f.cap_limit(10);
        f.cap_limit(50);
        assert_eq!(f.limit, Some(10));
    }

    #[test]
    fn test_encode_call_uses_backend_udf() {
        let e = Expr::call("abs", vec![Expr::field("latency", pos())], pos());
        let encoded = encode_expr(&e);
        assert_eq!(encoded["call"], "math.abs");
    }

    #[test]
    fn test_encode_in_list() {
        let e = Expr::binary(
            BinaryOp::In,
            Expr::field("status", pos()),
            Expr::List(crate::ast::ListLiteral {
                items: vec![Expr::int(200), Expr::int(201)],
                position: pos(),
            }),
            pos(),
        );
        let encoded = encode_expr(&e);
        assert_eq!(encoded["op"], "in");
        assert_eq!(encoded["right"]["values"][0]["value"], 200);
    }
}
