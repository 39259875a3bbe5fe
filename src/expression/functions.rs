//! Built-in expression functions

use serde_json::Value;

use crate::util::value::{is_truthy, to_display_string};

use super::evaluator::ExpressionEvaluator;

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

pub(super) fn register_builtins(evaluator: &ExpressionEvaluator) {
    evaluator.add_function("getDataVal", |ctx, args| {
        ctx.get(&to_display_string(&arg(args, 0)))
    });

    evaluator.add_function("setDataVal", |ctx, args| {
        ctx.set(&to_display_string(&arg(args, 0)), arg(args, 1))?;
        Ok(Value::Null)
    });

    evaluator.add_function("deleteDataVal", |ctx, args| {
        ctx.delete(&to_display_string(&arg(args, 0)))?;
        Ok(Value::Null)
    });

    evaluator.add_function("conditional", |_, args| {
        Ok(if is_truthy(&arg(args, 0)) {
            arg(args, 1)
        } else {
            arg(args, 2)
        })
    });

    evaluator.add_function("length", |_, args| {
        let len = match args.first() {
            Some(Value::String(s)) => s.chars().count(),
            Some(Value::Array(items)) => items.len(),
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        };
        Ok(Value::from(len))
    });
}
