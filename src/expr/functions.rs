/// Lambda runtime: closures, the tail-call trampoline, partial application,
/// and call dispatch shared by the evaluator and the higher-order built-ins.
use std::rc::Rc;

use crate::errors::{self, Error, Result};
use crate::value::Value;

use super::builtins::{BuiltinDef, CallCtx};
use super::eval::Machine;
use super::frame::Frame;
use super::signature::Signature;
use super::{Node, NodeKind};

/// A user-defined function value: parameter names, a body, and the scope it
/// closed over (by reference, so later bindings in that scope are visible).
pub struct LambdaDef {
    pub params: Vec<String>,
    pub signature: Option<Signature>,
    pub body: Rc<Node>,
    pub frame: Rc<Frame>,
    /// The focus at the point of definition; the body evaluates against it.
    pub input: Value,
    pub position: usize,
}

/// The captured frame can reach back to values holding this lambda, so
/// Debug stays shallow.
impl std::fmt::Debug for LambdaDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaDef")
            .field("params", &self.params)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// A pending tail call, consumed by the trampoline in `apply_lambda`.
#[derive(Debug)]
pub struct TailCall {
    pub lambda: Rc<LambdaDef>,
    pub args: Vec<Value>,
}

/// A `|pattern|update[, delete]|` transform, applied as a function.
pub struct TransformDef {
    pub pattern: Rc<Node>,
    pub update: Rc<Node>,
    pub delete: Option<Rc<Node>>,
    pub frame: Rc<Frame>,
    pub position: usize,
}

impl std::fmt::Debug for TransformDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformDef")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// Evaluate a function-call node. `context` carries the left side of a
/// `~>` chain, injected as the first argument.
#[allow(clippy::too_many_arguments)]
pub fn eval_call(
    machine: &Machine,
    proc: &Node,
    arg_nodes: &[Node],
    input: &Value,
    frame: &Rc<Frame>,
    tail: bool,
    position: usize,
    context: Option<Value>,
) -> Result<Value> {
    let (func, name) = resolve_callable(machine, proc, input, frame)?;
    let mut args = Vec::with_capacity(arg_nodes.len() + 1);
    if let Some(context) = context {
        args.push(context);
    }
    for node in arg_nodes {
        args.push(machine.eval(node, input, frame, false)?);
    }
    match func {
        Value::Lambda(lam) => {
            if tail {
                // Tail position: hand a thunk back to the trampoline
                // instead of growing the interpreter stack.
                if args.iter().any(Value::is_undefined) {
                    return Ok(Value::Undefined);
                }
                Ok(Value::Thunk(Rc::new(TailCall { lambda: lam, args })))
            } else {
                apply_lambda(machine, &lam, args)
            }
        }
        Value::Builtin(def) => builtin_call(machine, &def, args, input, frame, position),
        Value::Transform(t) => {
            apply_transform(machine, &t, args.into_iter().next().unwrap_or(Value::Undefined))
        }
        Value::Regex(re) => regex_apply(&re, &args, position),
        Value::Undefined => match name {
            Some(name) => Err(Error::new(
                errors::T1005_NOT_CALLABLE,
                position,
                format!("attempted to invoke a non-function (no function named '{name}')"),
            )),
            None => Err(Error::new(
                errors::T1006_CONTEXT_NOT_CALLABLE,
                position,
                "attempted to invoke a non-function",
            )),
        },
        other => Err(Error::new(
            errors::T1006_CONTEXT_NOT_CALLABLE,
            position,
            format!("attempted to invoke a non-function (got {})", other.type_name()),
        )),
    }
}

/// Resolve the call target. A variable target that has no binding falls
/// back to the custom-function registry and then the built-ins.
fn resolve_callable(
    machine: &Machine,
    proc: &Node,
    input: &Value,
    frame: &Rc<Frame>,
) -> Result<(Value, Option<String>)> {
    if let NodeKind::Variable(name) = &proc.kind {
        if !name.is_empty() && name != "$" {
            if let Some(v) = frame.lookup(name) {
                if !v.is_undefined() {
                    return Ok((v.deep_unbound(), Some(name.clone())));
                }
            }
            let fallback = machine
                .named_function(name)
                .map_or(Value::Undefined, |def| Value::Builtin(Rc::new(def)));
            return Ok((fallback, Some(name.clone())));
        }
    }
    Ok((machine.eval(proc, input, frame, false)?.deep_unbound(), None))
}

/// Evaluate a partial-application node: synthesize a lambda with `$1..$k`
/// parameters standing in for the placeholders.
pub fn eval_partial(
    machine: &Machine,
    proc: &Node,
    arg_nodes: &[Node],
    input: &Value,
    frame: &Rc<Frame>,
    position: usize,
) -> Result<Value> {
    // The target must exist and be callable at partial-application time.
    let (func, name) = resolve_callable(machine, proc, input, frame)?;
    match (&func, &name) {
        (Value::Undefined, Some(name)) => {
            return Err(Error::new(
                errors::T1008_PARTIAL_UNKNOWN_FUNCTION,
                position,
                format!("attempted to partially apply an unknown function '{name}'"),
            ));
        }
        _ if !func.is_callable() => {
            return Err(Error::new(
                errors::T1007_PARTIAL_NON_FUNCTION,
                position,
                "attempted to partially apply a non-function",
            ));
        }
        _ => {}
    }
    let mut params = Vec::new();
    let args = arg_nodes
        .iter()
        .map(|node| {
            if matches!(node.kind, NodeKind::Placeholder) {
                let name = format!("{}", params.len() + 1);
                params.push(name.clone());
                Node::new(NodeKind::Variable(name), node.position)
            } else {
                node.clone()
            }
        })
        .collect();
    let body = Node::new(
        NodeKind::Call {
            proc: Box::new(proc.clone()),
            args,
        },
        position,
    );
    Ok(Value::Lambda(Rc::new(LambdaDef {
        params,
        signature: None,
        body: Rc::new(body),
        frame: Rc::clone(frame),
        input: input.unbound().clone(),
        position,
    })))
}

/// Apply any callable value. Higher-order built-ins re-enter evaluation
/// through here.
pub fn apply(machine: &Machine, func: &Value, args: Vec<Value>, ctx: &CallCtx) -> Result<Value> {
    match func.unbound() {
        Value::Lambda(lam) => apply_lambda(machine, lam, args),
        Value::Builtin(def) => {
            builtin_call(machine, def, args, ctx.input, ctx.frame, ctx.position)
        }
        Value::Transform(t) => {
            apply_transform(machine, t, args.into_iter().next().unwrap_or(Value::Undefined))
        }
        Value::Regex(re) => regex_apply(re, &args, ctx.position),
        other => Err(Error::new(
            errors::T1006_CONTEXT_NOT_CALLABLE,
            ctx.position,
            format!("attempted to invoke a non-function (got {})", other.type_name()),
        )),
    }
}

/// The number of arguments a callable naturally accepts; higher-order
/// built-ins trim their `(item, index, array)` argument lists to it.
pub fn arity(func: &Value) -> usize {
    match func.unbound() {
        Value::Lambda(lam) => lam.params.len(),
        Value::Builtin(def) => def.min_args,
        Value::Transform(_) | Value::Regex(_) => 1,
        _ => 0,
    }
}

/// Apply `func` with the argument list trimmed to its arity.
pub fn apply_trimmed(
    machine: &Machine,
    func: &Value,
    full_args: Vec<Value>,
    ctx: &CallCtx,
) -> Result<Value> {
    let n = arity(func).min(full_args.len());
    let args = full_args.into_iter().take(n).collect();
    apply(machine, func, args, ctx)
}

/// Call a lambda, driving the tail-call trampoline: while the body keeps
/// returning thunks, loop in place instead of recursing. Trampoline
/// iterations do not deepen the interpreter stack.
pub fn apply_lambda(machine: &Machine, lambda: &Rc<LambdaDef>, args: Vec<Value>) -> Result<Value> {
    let mut lambda = Rc::clone(lambda);
    let mut args = args;
    loop {
        // An undefined argument makes the whole call undefined.
        if args.iter().any(Value::is_undefined) {
            return Ok(Value::Undefined);
        }
        let prepared = match &lambda.signature {
            Some(sig) => sig.validate(args, lambda.position)?,
            None => {
                if args.len() > lambda.params.len() {
                    return Err(Error::new(
                        errors::T0410_ARGUMENT_TYPE,
                        lambda.position,
                        format!(
                            "function expects at most {} arguments, got {}",
                            lambda.params.len(),
                            args.len()
                        ),
                    ));
                }
                args
            }
        };
        let call_frame = Frame::child(&lambda.frame);
        for (param, arg) in lambda.params.iter().zip(prepared.into_iter()) {
            call_frame.bind(param.clone(), arg);
        }
        match machine.eval(&lambda.body, &lambda.input, &call_frame, true)? {
            Value::Thunk(thunk) => {
                args = thunk.args.clone();
                lambda = Rc::clone(&thunk.lambda);
            }
            result => return Ok(result),
        }
    }
}

/// Invoke a built-in or host-registered function.
pub fn builtin_call(
    machine: &Machine,
    def: &BuiltinDef,
    mut args: Vec<Value>,
    input: &Value,
    frame: &Rc<Frame>,
    position: usize,
) -> Result<Value> {
    // Built-ins never see context-bound wrappers.
    for arg in &mut args {
        *arg = arg.deep_unbound();
    }
    // Context injection: a short argument list pulls the focus in front.
    if def.accepts_context && args.len() < def.min_args {
        args.insert(0, input.unbound().deep_unbound());
    }
    if args.len() < def.min_args {
        return Err(Error::new(
            errors::T0410_ARGUMENT_TYPE,
            position,
            format!(
                "${} requires at least {} arguments, got {}",
                def.name, def.min_args, args.len()
            ),
        ));
    }
    if let Some(max) = def.max_args {
        if args.len() > max {
            return Err(Error::new(
                errors::T0410_ARGUMENT_TYPE,
                position,
                format!(
                    "${} accepts at most {} arguments, got {}",
                    def.name, max, args.len()
                ),
            ));
        }
    }
    let ctx = CallCtx {
        input,
        frame,
        position,
    };
    let result = match &def.imp {
        super::builtins::BuiltinImpl::Native(f) => f(machine, &ctx, &args),
        super::builtins::BuiltinImpl::Host(f) => f(&args).and_then(|v| match v {
            Value::Thunk(_) | Value::Bound(_) => Err(Error::unpositioned(
                errors::T0212_BAD_CUSTOM_RESULT,
                format!("custom function '{}' returned an invalid value", def.name),
            )),
            v => Ok(v),
        }),
    };
    result.map_err(|mut e| {
        if e.position.is_none() {
            e.position = Some(position);
        }
        e
    })
}

/// Apply a transform to a value: deep-copy, find the objects selected by
/// the pattern, merge the update into each and drop the deleted keys.
pub fn apply_transform(machine: &Machine, def: &TransformDef, arg: Value) -> Result<Value> {
    let input = arg.deep_unbound();
    if input.is_undefined() {
        return Ok(Value::Undefined);
    }
    let matched = machine.eval(&def.pattern, &input, &def.frame, false)?;
    let mut matches = Vec::new();
    collect_objects(&matched, &mut matches);
    rewrite(machine, def, &input, &matches)
}

fn collect_objects(v: &Value, out: &mut Vec<Rc<Vec<(String, Value)>>>) {
    match v.unbound() {
        Value::Object(rc) => out.push(Rc::clone(rc)),
        Value::Array(items, _) => {
            for item in items.iter() {
                collect_objects(item, out);
            }
        }
        _ => {}
    }
}

fn rewrite(
    machine: &Machine,
    def: &TransformDef,
    v: &Value,
    matches: &[Rc<Vec<(String, Value)>>],
) -> Result<Value> {
    match v.unbound() {
        Value::Array(items, flags) => {
            let mut rebuilt = Vec::with_capacity(items.len());
            for item in items.iter() {
                rebuilt.push(rewrite(machine, def, item, matches)?);
            }
            Ok(Value::Array(Rc::new(rebuilt), *flags))
        }
        Value::Object(rc) => {
            // Identity check against the shared allocation: path evaluation
            // hands back the same Rc, so a pattern match is a pointer match.
            let hit = matches.iter().any(|m| Rc::ptr_eq(m, rc));
            let mut pairs = Vec::with_capacity(rc.len());
            for (k, val) in rc.iter() {
                pairs.push((k.clone(), rewrite(machine, def, val, matches)?));
            }
            if hit {
                let focus = Value::Object(Rc::clone(rc));
                let update = machine.eval(&def.update, &focus, &def.frame, false)?.deep_unbound();
                match update {
                    Value::Object(up) => {
                        for (k, v) in up.iter() {
                            upsert(&mut pairs, k, v.clone());
                        }
                    }
                    Value::Undefined => {}
                    other => {
                        return Err(Error::new(
                            errors::T2011_TRANSFORM_UPDATE_NOT_OBJECT,
                            def.position,
                            format!(
                                "the transform update must evaluate to an object (got {})",
                                other.type_name()
                            ),
                        ));
                    }
                }
                if let Some(delete) = &def.delete {
                    let d = machine.eval(delete, &focus, &def.frame, false)?.deep_unbound();
                    let keys = delete_keys(&d, def.position)?;
                    pairs.retain(|(k, _)| !keys.iter().any(|del| del == k));
                }
            }
            Ok(Value::object(pairs))
        }
        other => Ok(other.clone()),
    }
}

fn upsert(pairs: &mut Vec<(String, Value)>, key: &str, value: Value) {
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => pairs.push((key.to_string(), value)),
    }
}

fn delete_keys(v: &Value, position: usize) -> Result<Vec<String>> {
    match v {
        Value::Undefined => Ok(vec![]),
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items, _) => items
            .iter()
            .map(|item| match item.unbound() {
                Value::String(s) => Ok(s.clone()),
                other => Err(Error::new(
                    errors::T2012_TRANSFORM_DELETE_NOT_STRINGS,
                    position,
                    format!(
                        "the transform delete clause must evaluate to strings (got {})",
                        other.type_name()
                    ),
                )),
            })
            .collect(),
        other => Err(Error::new(
            errors::T2012_TRANSFORM_DELETE_NOT_STRINGS,
            position,
            format!(
                "the transform delete clause must evaluate to strings (got {})",
                other.type_name()
            ),
        )),
    }
}

/// A regex value applied as a function returns the first match object.
fn regex_apply(re: &regex::Regex, args: &[Value], position: usize) -> Result<Value> {
    match args.first().map(Value::unbound) {
        Some(Value::String(s)) => {
            Ok(super::builtins::strings::first_match(re, s))
        }
        Some(Value::Undefined) | None => Ok(Value::Undefined),
        Some(other) => Err(Error::new(
            errors::T0410_ARGUMENT_TYPE,
            position,
            format!("a regex applies to strings (got {})", other.type_name()),
        )),
    }
}
