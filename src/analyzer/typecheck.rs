//! Expression type inference against a schema.

use crate::ast::{
    Aggregation, BinaryOp, CaseExpr, Expr, FieldRef, FunctionCall, LiteralValue, Position, UnaryOp,
};
use crate::catalog::{FieldKind, Schema};
use crate::error::{QueryError, Result};
use crate::functions::{self, FunctionCategory, Purity};

pub struct TypeChecker<'a> {
    schema: &'a Schema,
}

impl<'a> TypeChecker<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Infers the expression's kind, resolving every field reference and
    /// validating operator compatibility along the way.
    pub fn infer(&self, expr: &Expr) -> Result<FieldKind> {
        match expr {
            Expr::Literal(lit) => Ok(literal_kind(&lit.value)),
            Expr::Field(field) => self.resolve_field(field),
            Expr::Binary(bin) => {
                let right_kind = match (&bin.op, bin.right.as_ref()) {
                    // IN takes a list on the right; handled below.
                    (BinaryOp::In, Expr::List(list)) => {
                        let left = self.infer(&bin.left)?;
                        for item in &list.items {
                            let item_kind = self.infer(item)?;
                            if !kinds_unify(left, item_kind) {
                                return Err(QueryError::semantic(
                                    format!(
                                        "IN list element of kind {} does not match left side of kind {}",
                                        item_kind, left
                                    ),
                                    item.position(),
                                ));
                            }
                        }
                        return Ok(FieldKind::Bool);
                    }
                    (BinaryOp::In, other) => {
                        return Err(QueryError::semantic(
                            "IN requires a value list on the right side",
                            other.position(),
                        ));
                    }
                    _ => self.infer(&bin.right)?,
                };
                let left_kind = self.infer(&bin.left)?;
                self.check_binary(bin.op, left_kind, right_kind, bin.position)
            }
            Expr::Unary(un) => {
                let operand = self.infer(&un.operand)?;
                match un.op {
                    UnaryOp::Not => {
                        if operand != FieldKind::Bool {
                            return Err(QueryError::semantic(
                                format!("NOT requires a boolean operand, got {}", operand),
                                un.position,
                            ));
                        }
                        Ok(FieldKind::Bool)
                    }
                    UnaryOp::Neg => {
                        if !operand.is_numeric() {
                            return Err(QueryError::semantic(
                                format!("negation requires a numeric operand, got {}", operand),
                                un.position,
                            ));
                        }
                        Ok(operand)
                    }
                }
            }
            Expr::Call(call) => self.check_call(call),
            Expr::List(list) => {
                for item in &list.items {
                    self.infer(item)?;
                }
                Ok(FieldKind::Array)
            }
            Expr::Case(case) => self.check_case(case),
        }
    }

    /// The expression must be usable as a row predicate.
    pub fn require_boolean(&self, expr: &Expr) -> Result<()> {
        let kind = self.infer(expr)?;
        if kind != FieldKind::Bool {
            return Err(QueryError::semantic(
                format!("condition must be boolean-valued, got {}", kind),
                expr.position(),
            ));
        }
        Ok(())
    }

    pub fn resolve_field(&self, field: &FieldRef) -> Result<FieldKind> {
        if let Some(kind) = self.schema.field_kind(&field.name) {
            return Ok(kind);
        }
        // Dotted paths and subscripts resolve through their root when the
        // exact spelling is not declared.
        let (segments, index) = field.path();
        if segments.len() > 1 || index.is_some() {
            if let Some(root_kind) = self.schema.field_kind(field.root()) {
                return match root_kind {
                    FieldKind::Object => Ok(FieldKind::String),
                    FieldKind::Array if index.is_some() => Ok(FieldKind::String),
                    _ => Err(QueryError::semantic(
                        format!(
                            "field {} of kind {} cannot be accessed by path",
                            field.root(),
                            root_kind
                        ),
                        field.position,
                    )),
                };
            }
        }
        Err(QueryError::semantic(
            format!("unknown field: {}", field.name),
            field.position,
        ))
    }

    fn check_binary(
        &self,
        op: BinaryOp,
        left: FieldKind,
        right: FieldKind,
        position: Position,
    ) -> Result<FieldKind> {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                if !left.is_numeric() || !right.is_numeric() {
                    return Err(QueryError::semantic(
                        format!("arithmetic requires numeric operands, got {} and {}", left, right),
                        position,
                    ));
                }
                if left == FieldKind::Int && right == FieldKind::Int && op != BinaryOp::Div {
                    Ok(FieldKind::Int)
                } else if matches!(left, FieldKind::Int | FieldKind::Long)
                    && matches!(right, FieldKind::Int | FieldKind::Long)
                    && op != BinaryOp::Div
                {
                    Ok(FieldKind::Long)
                } else {
                    Ok(FieldKind::Double)
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                // Ordering requires numerically-comparable operands.
                if !left.is_numeric() || !right.is_numeric() {
                    return Err(QueryError::semantic(
                        format!(
                            "ordering comparison requires numeric operands, got {} and {}",
                            left, right
                        ),
                        position,
                    ));
                }
                Ok(FieldKind::Bool)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if !kinds_unify(left, right) {
                    return Err(QueryError::semantic(
                        format!("cannot compare {} with {}", left, right),
                        position,
                    ));
                }
                Ok(FieldKind::Bool)
            }
            BinaryOp::Like => {
                if !left.is_textual() || !right.is_textual() {
                    return Err(QueryError::semantic(
                        format!("LIKE requires string operands, got {} and {}", left, right),
                        position,
                    ));
                }
                Ok(FieldKind::Bool)
            }
            BinaryOp::And | BinaryOp::Or => {
                if left != FieldKind::Bool || right != FieldKind::Bool {
                    return Err(QueryError::semantic(
                        format!(
                            "{} requires boolean operands, got {} and {}",
                            op, left, right
                        ),
                        position,
                    ));
                }
                Ok(FieldKind::Bool)
            }
            BinaryOp::In => unreachable!("IN handled by infer"),
        }
    }

    fn check_call(&self, call: &FunctionCall) -> Result<FieldKind> {
        let descriptor = functions::get_function(&call.name).ok_or_else(|| {
            QueryError::semantic(format!("unknown function: {}", call.name), call.position)
        })?;
        if descriptor.purity == Purity::Aggregation {
            return Err(QueryError::semantic(
                format!(
                    "aggregation function {} is not allowed in a scalar expression",
                    call.name
                ),
                call.position,
            ));
        }
        if !descriptor.arity.accepts(call.args.len()) {
            return Err(QueryError::semantic(
                format!(
                    "function {} does not accept {} argument(s)",
                    call.name,
                    call.args.len()
                ),
                call.position,
            ));
        }
        if call.distinct {
            return Err(QueryError::semantic(
                "distinct is only valid on aggregation calls",
                call.position,
            ));
        }
        let mut arg_kinds = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            arg_kinds.push(self.infer(arg)?);
        }
        Ok(call_return_kind(&descriptor.name, descriptor.category, &arg_kinds))
    }

    fn check_case(&self, case: &CaseExpr) -> Result<FieldKind> {
        if case.whens.is_empty() {
            return Err(QueryError::semantic(
                "case requires at least one when clause",
                case.position,
            ));
        }
        let mut result = None;
        for when in &case.whens {
            let cond = self.infer(&when.condition)?;
            if cond != FieldKind::Bool {
                return Err(QueryError::semantic(
                    format!("case condition must be boolean, got {}", cond),
                    when.position,
                ));
            }
            let branch = self.infer(&when.result)?;
            result = Some(match result {
                None => branch,
                Some(prev) => unify(prev, branch),
            });
        }
        if let Some(else_expr) = &case.else_expr {
            let branch = self.infer(else_expr)?;
            result = Some(unify(result.unwrap(), branch));
        }
        Ok(result.unwrap())
    }

    /// Validates an aggregation and returns the output column kind.
    pub fn check_aggregation(&self, agg: &Aggregation) -> Result<FieldKind> {
        let descriptor = functions::get_function(&agg.func).ok_or_else(|| {
            QueryError::semantic(format!("unknown function: {}", agg.func), agg.position)
        })?;
        if descriptor.purity != Purity::Aggregation {
            return Err(QueryError::semantic(
                format!("{} is not an aggregation function", agg.func),
                agg.position,
            ));
        }
        if !descriptor.arity.accepts(agg.args.len()) {
            return Err(QueryError::semantic(
                format!(
                    "aggregation {} does not accept {} argument(s)",
                    agg.func,
                    agg.args.len()
                ),
                agg.position,
            ));
        }
        let mut arg_kind = None;
        for arg in &agg.args {
            let kind = self.infer(arg)?;
            if arg_kind.is_none() {
                arg_kind = Some(kind);
            }
        }
        if descriptor.name == "percentile" {
            match agg.args.get(1).and_then(|a| a.as_literal()) {
                Some(LiteralValue::Int(p)) if (0..=100).contains(p) => {}
                Some(LiteralValue::Float(p)) if (0.0..=100.0).contains(p) => {}
                _ => {
                    return Err(QueryError::semantic(
                        "percentile requires a literal percentage between 0 and 100",
                        agg.position,
                    ));
                }
            }
        }
        Ok(aggregation_kind(descriptor.name, arg_kind))
    }
}

fn literal_kind(value: &LiteralValue) -> FieldKind {
    match value {
        LiteralValue::Null => FieldKind::String,
        LiteralValue::Bool(_) => FieldKind::Bool,
        LiteralValue::Int(_) => FieldKind::Int,
        LiteralValue::Float(_) => FieldKind::Double,
        LiteralValue::Str(_) => FieldKind::String,
    }
}

/// Loose unification for equality and list membership: numerics unify
/// with numerics, textual kinds with textual kinds.
fn kinds_unify(a: FieldKind, b: FieldKind) -> bool {
    a == b
        || (a.is_numeric() && b.is_numeric())
        || (a.is_textual() && b.is_textual())
        || a == FieldKind::String
        || b == FieldKind::String
}

fn unify(a: FieldKind, b: FieldKind) -> FieldKind {
    if a == b {
        a
    } else if a.is_numeric() && b.is_numeric() {
        FieldKind::Double
    } else {
        FieldKind::String
    }
}

fn call_return_kind(name: &str, category: FunctionCategory, args: &[FieldKind]) -> FieldKind {
    match category {
        FunctionCategory::Math => match name {
            "abs" | "mod" => args.first().copied().unwrap_or(FieldKind::Double),
            "ceil" | "floor" | "sign" => FieldKind::Long,
            _ => FieldKind::Double,
        },
        FunctionCategory::String => match name {
            "length" => FieldKind::Long,
            "contains_str" => FieldKind::Bool,
            "split" => FieldKind::Array,
            _ => FieldKind::String,
        },
        FunctionCategory::Date => match name {
            "strftime" => FieldKind::String,
            _ => FieldKind::Date,
        },
        FunctionCategory::Type => match name {
            "tostring" | "typeof" => FieldKind::String,
            "tonumber" => FieldKind::Double,
            "toint" => FieldKind::Long,
            "isnull" | "isnotnull" => FieldKind::Bool,
            _ => FieldKind::String,
        },
        FunctionCategory::Conditional => match name {
            "if" => args
                .get(1)
                .map(|&a| unify(a, args.get(2).copied().unwrap_or(a)))
                .unwrap_or(FieldKind::String),
            "coalesce" | "ifnull" | "nullif" | "validate" => {
                args.first().copied().unwrap_or(FieldKind::String)
            }
            _ => FieldKind::String,
        },
        FunctionCategory::Relevance => FieldKind::Bool,
        FunctionCategory::Aggregation => FieldKind::Double,
        FunctionCategory::Crypto => FieldKind::String,
        FunctionCategory::Ip => FieldKind::Bool,
        FunctionCategory::Json => match name {
            "json_valid" => FieldKind::Bool,
            "json_array_length" => FieldKind::Long,
            _ => FieldKind::String,
        },
        FunctionCategory::System => match name {
            "now" => FieldKind::Date,
            _ => FieldKind::Double,
        },
    }
}

fn aggregation_kind(name: &str, arg: Option<FieldKind>) -> FieldKind {
    match name {
        "count" | "dc" => FieldKind::Long,
        "min" | "max" | "earliest" | "latest" => arg.unwrap_or(FieldKind::Double),
        "values" => FieldKind::Array,
        _ => FieldKind::Double,
    }
}
