/// The tree-walking evaluator.
///
/// `Evaluator` is the configured, shareable handle; `Machine` is the
/// per-evaluation state (depth meter, cancellation, root value, the
/// per-evaluation clock). Every node entry checks cancellation and the
/// live-depth cap before dispatching on the node kind.
use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{self, Error, Result};
use crate::value::{ArrayFlags, BoundValue, Value};

use super::builtins::{self, BuiltinDef, CallCtx};
use super::frame::Frame;
use super::functions;
use super::{BinaryOp, Node, NodeKind, SortTerm};

#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Cap on live interpreter stack depth (not total node visits).
    pub max_depth: usize,
    /// Emit a per-node trace line to stderr.
    pub debug: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_depth: 1000,
            debug: false,
        }
    }
}

/// Shared cancellation flag with an optional deadline, checked at every
/// node entry.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A configured evaluator. Safe to share across threads for independent
/// evaluations; a single evaluation runs on one thread.
#[derive(Debug, Default)]
pub struct Evaluator {
    options: EvalOptions,
    custom: HashMap<String, BuiltinDef>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EvalOptions) -> Self {
        Self {
            options,
            custom: HashMap::new(),
        }
    }

    /// Register a host function, consulted before the built-ins.
    pub fn register_function(&mut self, def: BuiltinDef) {
        self.custom.insert(def.name.clone(), def);
    }

    pub fn evaluate(&self, expr: &Node, input: &Value) -> Result<Value> {
        self.evaluate_with(expr, input, &[], None)
    }

    /// Evaluate with external `$`-bindings and an optional cancellation
    /// token. The outermost result is deeply stripped of internal
    /// context wrappers.
    pub fn evaluate_with(
        &self,
        expr: &Node,
        input: &Value,
        bindings: &[(String, Value)],
        cancel: Option<&CancelToken>,
    ) -> Result<Value> {
        let machine = Machine {
            options: &self.options,
            custom: &self.custom,
            cancel,
            root: input.clone(),
            depth: Cell::new(0),
            now: OnceCell::new(),
        };
        let frame = Frame::new();
        for (name, value) in bindings {
            frame.bind(name.clone(), value.clone());
        }
        let result = machine.eval(expr, input, &frame, false)?;
        Ok(result.deep_unbound())
    }
}

/// Per-evaluation interpreter state.
pub struct Machine<'a> {
    options: &'a EvalOptions,
    custom: &'a HashMap<String, BuiltinDef>,
    cancel: Option<&'a CancelToken>,
    root: Value,
    depth: Cell<usize>,
    now: OnceCell<jiff::Timestamp>,
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl Machine<'_> {
    /// Custom registry first, then the shared built-in table.
    pub(crate) fn named_function(&self, name: &str) -> Option<BuiltinDef> {
        self.custom
            .get(name)
            .or_else(|| builtins::lookup(name))
            .cloned()
    }

    /// The evaluation clock: captured at first use and fixed for the rest
    /// of this evaluation.
    pub(crate) fn now(&self) -> jiff::Timestamp {
        *self.now.get_or_init(jiff::Timestamp::now)
    }

    pub(crate) fn eval(
        &self,
        node: &Node,
        input: &Value,
        frame: &Rc<Frame>,
        tail: bool,
    ) -> Result<Value> {
        if let Some(cancel) = self.cancel {
            if cancel.is_cancelled() {
                return Err(errors::cancelled(node.position));
            }
        }
        self.depth.set(self.depth.get() + 1);
        let _guard = DepthGuard(&self.depth);
        if self.depth.get() > self.options.max_depth {
            return Err(errors::max_depth(node.position, self.options.max_depth));
        }
        if self.options.debug {
            self.trace(node, input);
        }
        let result = self.eval_kind(node, input, frame, tail)?;
        if node.keep_array {
            Ok(keep_array(result))
        } else {
            Ok(result)
        }
    }

    fn trace(&self, node: &Node, input: &Value) {
        let depth = self.depth.get();
        eprintln!(
            "[trace]{:indent$} {} @{} focus={} depth={}",
            "",
            kind_name(&node.kind),
            node.position,
            input.type_name(),
            depth,
            indent = depth.min(48)
        );
    }

    fn eval_kind(
        &self,
        node: &Node,
        input: &Value,
        frame: &Rc<Frame>,
        tail: bool,
    ) -> Result<Value> {
        match &node.kind {
            NodeKind::Number(n) => Ok(Value::Number(*n)),
            NodeKind::String(s) => Ok(Value::String(s.clone())),
            NodeKind::Bool(b) => Ok(Value::Bool(*b)),
            NodeKind::Null => Ok(Value::Null),
            NodeKind::Regex(re) => Ok(Value::Regex(Rc::clone(re))),

            NodeKind::Name(name) => Ok(lookup_name(input, name)),
            NodeKind::Variable(name) => {
                if name.is_empty() {
                    Ok(input.unbound().clone())
                } else if name == "$" {
                    Ok(self.root.clone())
                } else if let Some(v) = frame.lookup(name) {
                    Ok(v)
                } else {
                    // Unbound names fall back to the function registries,
                    // so built-ins can be passed around as values.
                    Ok(self
                        .named_function(name)
                        .map_or(Value::Undefined, |def| Value::Builtin(Rc::new(def))))
                }
            }
            NodeKind::Wildcard => {
                let mut out = Vec::new();
                wildcard(input, &mut out);
                Ok(collapse(out, false))
            }
            NodeKind::Descendant => {
                let mut out = Vec::new();
                descendants(input, &mut out);
                Ok(collapse(out, false))
            }
            NodeKind::Parent => match input {
                Value::Bound(b) if !b.parent_object.is_undefined() => {
                    Ok(b.parent_object.clone())
                }
                _ => Err(Error::new(
                    errors::S0217_NO_PARENT,
                    node.position,
                    "the parent of this value cannot be derived",
                )),
            },

            NodeKind::Path(steps) => self.eval_path(steps, input, frame),
            NodeKind::ContextBind { .. } | NodeKind::IndexBind { .. } => {
                self.eval_path(std::slice::from_ref(node), input, frame)
            }
            NodeKind::Filter { lhs, pred } => {
                let v = self.eval(lhs, input, frame, false)?;
                self.apply_filter(&v, pred, frame)
            }

            NodeKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.eval(lhs, input, frame, false)?;
                    if !l.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    let r = self.eval(rhs, input, frame, false)?;
                    Ok(Value::Bool(r.is_truthy()))
                }
                BinaryOp::Or => {
                    let l = self.eval(lhs, input, frame, false)?;
                    if l.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    let r = self.eval(rhs, input, frame, false)?;
                    Ok(Value::Bool(r.is_truthy()))
                }
                BinaryOp::Apply => self.eval_apply(lhs, rhs, input, frame, node.position),
                _ => {
                    let l = self.eval(lhs, input, frame, false)?.deep_unbound();
                    let r = self.eval(rhs, input, frame, false)?.deep_unbound();
                    binary_op(*op, l, r, node.position)
                }
            },
            NodeKind::UnaryMinus(expr) => {
                match self.eval(expr, input, frame, false)?.deep_unbound() {
                    Value::Undefined => Ok(Value::Undefined),
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(Error::new(
                        errors::D1002_NEGATE_NON_NUMBER,
                        node.position,
                        format!("cannot negate a value of type {}", other.type_name()),
                    )),
                }
            }

            NodeKind::ArrayCtor(elements) => {
                let mut out = Vec::new();
                for elem in elements {
                    let v = self.eval(elem, input, frame, false)?;
                    match v.unbound() {
                        Value::Undefined => {}
                        // Everything flattens one level into the
                        // constructor except an explicit sub-array literal.
                        Value::Array(items, _)
                            if !matches!(elem.kind, NodeKind::ArrayCtor(_)) =>
                        {
                            out.extend(items.iter().map(Value::deep_unbound));
                        }
                        _ => out.push(v.deep_unbound()),
                    }
                }
                Ok(Value::Array(Rc::new(out), ArrayFlags::CONS))
            }
            NodeKind::ObjectCtor(pairs) => match input.unbound() {
                Value::Array(..) => {
                    self.group_by(&to_items(input.clone()), pairs, frame, node.position)
                }
                _ => self.build_object(pairs, input, frame),
            },
            NodeKind::GroupBy { lhs, pairs } => {
                let v = self.eval(lhs, input, frame, false)?;
                if v.is_undefined() {
                    return Ok(Value::Undefined);
                }
                self.group_by(&to_items(v), pairs, frame, node.position)
            }

            NodeKind::Block(exprs) => {
                let child = Frame::child(frame);
                let mut result = Value::Undefined;
                for (i, expr) in exprs.iter().enumerate() {
                    let in_tail = tail && i + 1 == exprs.len();
                    result = self.eval(expr, input, &child, in_tail)?;
                }
                Ok(result)
            }
            NodeKind::Bind { name, value } => {
                let v = self.eval(value, input, frame, false)?.deep_unbound();
                frame.bind(name.clone(), v.clone());
                Ok(v)
            }
            NodeKind::Condition { cond, then, els } => {
                // The test is never in tail position; the branches inherit it.
                let c = self.eval(cond, input, frame, false)?;
                if c.is_truthy() {
                    self.eval(then, input, frame, tail)
                } else if let Some(els) = els {
                    self.eval(els, input, frame, tail)
                } else {
                    Ok(Value::Undefined)
                }
            }

            NodeKind::Lambda {
                params,
                signature,
                body,
            } => Ok(Value::Lambda(Rc::new(functions::LambdaDef {
                params: params.clone(),
                signature: signature.clone(),
                body: Rc::clone(body),
                frame: Rc::clone(frame),
                input: input.unbound().clone(),
                position: node.position,
            }))),
            NodeKind::Call { proc, args } => {
                functions::eval_call(self, proc, args, input, frame, tail, node.position, None)
            }
            NodeKind::Partial { proc, args } => {
                functions::eval_partial(self, proc, args, input, frame, node.position)
            }
            NodeKind::Placeholder => Err(Error::new(
                errors::S0500_UNSUPPORTED_NODE,
                node.position,
                "a placeholder is only valid as a function argument",
            )),

            NodeKind::Sort { lhs, terms } => {
                let v = self.eval(lhs, input, frame, false)?;
                if v.is_undefined() {
                    return Ok(Value::Undefined);
                }
                self.sort_sequence(to_items(v), terms, frame, node.position)
            }
            NodeKind::Transform {
                pattern,
                update,
                delete,
            } => Ok(Value::Transform(Rc::new(functions::TransformDef {
                pattern: Rc::clone(pattern),
                update: Rc::clone(update),
                delete: delete.clone(),
                frame: Rc::clone(frame),
                position: node.position,
            }))),
        }
    }

    /// Chain operator: `lhs ~> rhs`. A function-call right side receives
    /// the left value as its first argument; anything else must evaluate
    /// to a function and is applied to the left value.
    fn eval_apply(
        &self,
        lhs: &Node,
        rhs: &Node,
        input: &Value,
        frame: &Rc<Frame>,
        position: usize,
    ) -> Result<Value> {
        let l = self.eval(lhs, input, frame, false)?.deep_unbound();
        if let NodeKind::Call { proc, args } = &rhs.kind {
            return functions::eval_call(
                self,
                proc,
                args,
                input,
                frame,
                false,
                rhs.position,
                Some(l),
            );
        }
        let f = self.eval(rhs, input, frame, false)?.deep_unbound();
        if !f.is_callable() {
            return Err(Error::new(
                errors::T2006_APPLY_NOT_FUNCTION,
                position,
                "the right side of ~> must be a function",
            ));
        }
        let ctx = CallCtx {
            input,
            frame,
            position,
        };
        functions::apply(self, &f, vec![l], &ctx)
    }

    // ------------------------------------------------------------------
    // Path engine
    // ------------------------------------------------------------------

    fn eval_path(&self, steps: &[Node], input: &Value, frame: &Rc<Frame>) -> Result<Value> {
        // Only carry context wrappers when something downstream can see
        // them; plain paths stay on the fast path.
        let needs_ctx = steps.iter().any(needs_context);
        let mut seq: Vec<Value> = match input.unbound() {
            Value::Array(items, _) if !matches!(steps[0].kind, NodeKind::Variable(_)) => {
                items.as_ref().clone()
            }
            _ => vec![input.clone()],
        };
        let mut keep = false;
        for (i, step) in steps.iter().enumerate() {
            let last = i + 1 == steps.len();
            if step.keep_array {
                keep = true;
            }
            // An explicit array constructor as the first step evaluates
            // once against the whole input instead of mapping over it.
            if i == 0 && matches!(step.kind, NodeKind::ArrayCtor(_)) {
                seq = to_items(self.eval(step, input, frame, false)?);
            } else {
                seq = self.eval_step(step, &seq, frame, needs_ctx, last)?;
            }
            if seq.is_empty() {
                break;
            }
        }
        Ok(collapse(seq, keep))
    }

    fn eval_step(
        &self,
        step: &Node,
        items: &[Value],
        frame: &Rc<Frame>,
        needs_ctx: bool,
        last: bool,
    ) -> Result<Vec<Value>> {
        match &step.kind {
            NodeKind::ContextBind { lhs, var } => self.step_context_bind(lhs, var, items, frame),
            NodeKind::IndexBind { lhs, var } => self.step_index_bind(lhs, var, items, frame),
            _ => {
                let mut results: Vec<(Value, Value)> = Vec::new();
                for item in items {
                    let (focus, child) = self.item_scope(item, frame, &[]);
                    let res = self.eval(step, &focus, &child, false)?;
                    if !res.is_undefined() {
                        results.push((res, item.clone()));
                    }
                }
                // A lone plain-array result of the final step is the value
                // itself, not a sequence to be flattened and re-collapsed.
                if last && results.len() == 1 {
                    let plain = matches!(
                        results[0].0.unbound(),
                        Value::Array(_, flags) if !flags.has(ArrayFlags::SEQUENCE)
                    );
                    if plain {
                        let (res, item) = results.pop().unwrap();
                        let res = if needs_ctx { wrap_bound(&res, &item) } else { res };
                        return Ok(vec![res]);
                    }
                }
                let mut out = Vec::new();
                for (res, item) in results {
                    let flatten = matches!(
                        res.unbound(),
                        Value::Array(_, flags) if !flags.has(ArrayFlags::CONS)
                    );
                    if flatten {
                        if let Value::Array(sub, _) = res.unbound() {
                            for r in sub.iter() {
                                out.push(if needs_ctx {
                                    wrap_bound(r, &item)
                                } else {
                                    r.clone()
                                });
                            }
                        }
                    } else {
                        out.push(if needs_ctx { wrap_bound(&res, &item) } else { res });
                    }
                }
                Ok(out)
            }
        }
    }

    /// `lhs@$var`: bind each value of lhs while the focus stays on the
    /// current item, producing one carried tuple per bound value.
    fn step_context_bind(
        &self,
        lhs: &Node,
        var: &str,
        items: &[Value],
        frame: &Rc<Frame>,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for item in items {
            let (focus, child) = self.item_scope(item, frame, &[]);
            let res = self.eval(lhs, &focus, &child, false)?;
            let parent_object = match item {
                Value::Bound(b) => b.parent_object.clone(),
                _ => Value::Undefined,
            };
            for r in to_items(res) {
                let mut bindings = cv_bindings(item);
                bindings.push((var.to_string(), r.deep_unbound()));
                out.push(Value::Bound(Rc::new(BoundValue {
                    value: focus.unbound().clone(),
                    parent: focus.unbound().clone(),
                    parent_object: parent_object.clone(),
                    bindings,
                })));
            }
        }
        Ok(out)
    }

    /// `lhs#$var`: normal step mapping, with the running position of each
    /// produced item bound to the variable.
    fn step_index_bind(
        &self,
        lhs: &Node,
        var: &str,
        items: &[Value],
        frame: &Rc<Frame>,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut index = 0usize;
        for item in items {
            let (focus, child) = self.item_scope(item, frame, &[]);
            let res = self.eval(lhs, &focus, &child, false)?;
            for r in to_items(res) {
                let mut bindings = cv_bindings(item);
                bindings.extend(cv_bindings(&r));
                bindings.push((var.to_string(), Value::Number(index as f64)));
                out.push(Value::Bound(Rc::new(BoundValue {
                    value: r.unbound().clone(),
                    parent: focus.unbound().clone(),
                    parent_object: focus.unbound().clone(),
                    bindings,
                })));
                index += 1;
            }
        }
        Ok(out)
    }

    /// The scope for evaluating against one sequence item: the item keeps
    /// its context wrapper (so `%` can see it) and its carried bindings
    /// are layered into a child frame.
    fn item_scope(
        &self,
        item: &Value,
        frame: &Rc<Frame>,
        extra: &[(String, Value)],
    ) -> (Value, Rc<Frame>) {
        let own = match item {
            Value::Bound(b) => b.bindings.as_slice(),
            _ => &[],
        };
        if own.is_empty() && extra.is_empty() {
            return (item.clone(), Rc::clone(frame));
        }
        let child = Frame::child(frame);
        for (name, value) in extra.iter().chain(own.iter()) {
            child.bind(name.clone(), value.clone());
        }
        (item.clone(), child)
    }

    // ------------------------------------------------------------------
    // Filter/predicate engine
    // ------------------------------------------------------------------

    fn apply_filter(&self, value: &Value, pred: &Node, frame: &Rc<Frame>) -> Result<Value> {
        if value.is_undefined() {
            return Ok(Value::Undefined);
        }
        // Constant index: straight positional selection.
        if let NodeKind::Number(n) = pred.kind {
            let items = to_items(value.clone());
            return Ok(index_into(&items, n));
        }
        let keep = matches!(value.unbound(), Value::Array(_, flags) if flags.has(ArrayFlags::KEEP_SINGLETON));
        let outer = cv_bindings(value);
        let items = to_items(value.clone());
        let len = items.len();
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let (focus, child) = self.item_scope(item, frame, &outer);
            let res = self.eval(pred, &focus, &child, false)?.deep_unbound();
            if let Some(indices) = numeric_result(&res) {
                let hit = indices.iter().any(|n| {
                    let idx = if *n < 0.0 {
                        n.floor() + len as f64
                    } else {
                        n.floor()
                    };
                    idx == i as f64
                });
                if hit {
                    out.push(item.clone());
                }
            } else if res.is_truthy() {
                out.push(item.clone());
            }
        }
        Ok(collapse(out, keep))
    }

    // ------------------------------------------------------------------
    // Object construction and grouping
    // ------------------------------------------------------------------

    fn build_object(
        &self,
        pairs: &[(Node, Node)],
        input: &Value,
        frame: &Rc<Frame>,
    ) -> Result<Value> {
        let mut out: Vec<(String, Value)> = Vec::with_capacity(pairs.len());
        for (kexpr, vexpr) in pairs {
            let key = match self.eval(kexpr, input, frame, false)?.deep_unbound() {
                Value::Undefined => continue,
                Value::String(s) => s,
                other => {
                    return Err(Error::new(
                        errors::T1003_KEY_NOT_STRING,
                        kexpr.position,
                        format!(
                            "object key must evaluate to a string (got {})",
                            other.type_name()
                        ),
                    ));
                }
            };
            let value = self.eval(vexpr, input, frame, false)?.deep_unbound();
            if value.is_undefined() {
                continue;
            }
            // Reassigning a key updates the value but keeps its position.
            match out.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => out.push((key, value)),
            }
        }
        Ok(Value::object(out))
    }

    fn group_by(
        &self,
        items: &[Value],
        pairs: &[(Node, Node)],
        frame: &Rc<Frame>,
        position: usize,
    ) -> Result<Value> {
        struct Group {
            key: String,
            pair: usize,
            items: Vec<Value>,
        }
        let mut groups: Vec<Group> = Vec::new();
        for item in items {
            for (pi, (kexpr, _)) in pairs.iter().enumerate() {
                let (focus, child) = self.item_scope(item, frame, &[]);
                match self.eval(kexpr, &focus, &child, false)?.deep_unbound() {
                    Value::Undefined => {}
                    Value::String(key) => {
                        if let Some(group) = groups.iter_mut().find(|g| g.key == key) {
                            if group.pair != pi {
                                return Err(Error::new(
                                    errors::D1009_DUPLICATE_GROUP_KEY,
                                    position,
                                    format!(
                                        "multiple key definitions evaluate to the same key '{key}'"
                                    ),
                                ));
                            }
                            group.items.push(item.clone());
                        } else {
                            groups.push(Group {
                                key,
                                pair: pi,
                                items: vec![item.clone()],
                            });
                        }
                    }
                    other => {
                        return Err(Error::new(
                            errors::T1003_KEY_NOT_STRING,
                            kexpr.position,
                            format!(
                                "object key must evaluate to a string (got {})",
                                other.type_name()
                            ),
                        ));
                    }
                }
            }
        }
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            // The value expression sees the whole group as its focus.
            let context = collapse(group.items, false);
            let (focus, child) = self.item_scope(&context, frame, &[]);
            let value = self
                .eval(&pairs[group.pair].1, &focus, &child, false)?
                .deep_unbound();
            if !value.is_undefined() {
                out.push((group.key, value));
            }
        }
        Ok(Value::object(out))
    }

    // ------------------------------------------------------------------
    // Order-by
    // ------------------------------------------------------------------

    fn sort_sequence(
        &self,
        items: Vec<Value>,
        terms: &[SortTerm],
        frame: &Rc<Frame>,
        position: usize,
    ) -> Result<Value> {
        // Precompute the term keys so the comparison itself is infallible.
        let mut keyed: Vec<(Vec<Value>, Value)> = Vec::with_capacity(items.len());
        for item in items {
            let mut keys = Vec::with_capacity(terms.len());
            for term in terms {
                let (focus, child) = self.item_scope(&item, frame, &[]);
                let key = self.eval(&term.expr, &focus, &child, false)?.deep_unbound();
                match key {
                    Value::Undefined | Value::Number(_) | Value::String(_) => keys.push(key),
                    other => {
                        return Err(Error::new(
                            errors::T2008_SORT_TERM_NOT_COMPARABLE,
                            term.expr.position,
                            format!(
                                "sort terms must evaluate to numbers or strings (got {})",
                                other.type_name()
                            ),
                        ));
                    }
                }
            }
            keyed.push((keys, item));
        }
        // Each term must be homogeneous across the sequence.
        for t in 0..terms.len() {
            let mut saw_number = false;
            let mut saw_string = false;
            for (keys, _) in &keyed {
                match &keys[t] {
                    Value::Number(_) => saw_number = true,
                    Value::String(_) => saw_string = true,
                    _ => {}
                }
            }
            if saw_number && saw_string {
                return Err(Error::new(
                    errors::T2008_SORT_TERM_NOT_COMPARABLE,
                    position,
                    "sort term evaluates to a mixture of numbers and strings",
                ));
            }
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (t, term) in terms.iter().enumerate() {
                let ord = compare_keys(&a[t], &b[t]);
                let ord = if term.descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(collapse(keyed.into_iter().map(|(_, v)| v).collect(), false))
    }
}

// ----------------------------------------------------------------------
// Value helpers shared by the evaluators
// ----------------------------------------------------------------------

/// Name lookup with sequence semantics: arrays map, one level of produced
/// sequence flattens, absent results vanish.
fn lookup_name(v: &Value, name: &str) -> Value {
    match v.unbound() {
        Value::Object(_) => v.lookup(name).cloned().unwrap_or(Value::Undefined),
        Value::Array(items, _) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match lookup_name(item, name) {
                    Value::Undefined => {}
                    Value::Array(sub, flags) if !flags.has(ArrayFlags::CONS) => {
                        out.extend(sub.iter().cloned());
                    }
                    found => out.push(found),
                }
            }
            collapse(out, false)
        }
        _ => Value::Undefined,
    }
}

/// All values under an object, arrays flattened through.
fn wildcard(v: &Value, out: &mut Vec<Value>) {
    match v.unbound() {
        Value::Object(pairs) => {
            for (_, value) in pairs.iter() {
                flatten_deep(value, out);
            }
        }
        Value::Array(items, _) => {
            for item in items.iter() {
                wildcard(item, out);
            }
        }
        _ => {}
    }
}

fn flatten_deep(v: &Value, out: &mut Vec<Value>) {
    match v.unbound() {
        Value::Array(items, _) => {
            for item in items.iter() {
                flatten_deep(item, out);
            }
        }
        Value::Undefined => {}
        other => out.push(other.clone()),
    }
}

/// Pre-order descendant traversal: emits every object and leaf value at
/// every depth; arrays are traversed but never emitted themselves.
fn descendants(v: &Value, out: &mut Vec<Value>) {
    match v.unbound() {
        Value::Array(items, _) => {
            for item in items.iter() {
                descendants(item, out);
            }
        }
        Value::Object(pairs) => {
            out.push(v.unbound().clone());
            for (_, value) in pairs.iter() {
                descendants(value, out);
            }
        }
        Value::Undefined => {}
        other => out.push(other.clone()),
    }
}

/// Collapse a produced sequence: absent when empty, the element itself
/// when a singleton (unless the keep marker is set), an array otherwise.
pub(crate) fn collapse(mut items: Vec<Value>, keep: bool) -> Value {
    match items.len() {
        0 => Value::Undefined,
        1 if !keep => items.pop().unwrap(),
        _ => {
            let flags = if keep {
                ArrayFlags::SEQUENCE.with(ArrayFlags::KEEP_SINGLETON)
            } else {
                ArrayFlags::SEQUENCE
            };
            Value::Array(Rc::new(items), flags)
        }
    }
}

/// Coerce a value to the item list it stands for.
pub(crate) fn to_items(v: Value) -> Vec<Value> {
    match v.unbound() {
        Value::Undefined => Vec::new(),
        Value::Array(items, _) => items.as_ref().clone(),
        other => vec![other.clone()],
    }
}

fn keep_array(v: Value) -> Value {
    let marker = ArrayFlags::SEQUENCE.with(ArrayFlags::KEEP_SINGLETON);
    match v {
        Value::Undefined => Value::Undefined,
        Value::Array(items, flags) => Value::Array(items, flags.with(marker)),
        other => Value::Array(Rc::new(vec![other]), marker),
    }
}

fn cv_bindings(v: &Value) -> Vec<(String, Value)> {
    match v {
        Value::Bound(b) => b.bindings.clone(),
        _ => Vec::new(),
    }
}

/// Wrap a step result so downstream steps and predicates can reach the
/// bindings and parent references it was produced under.
fn wrap_bound(result: &Value, source: &Value) -> Value {
    let mut bindings = cv_bindings(source);
    if let Value::Bound(b) = result {
        bindings.extend(b.bindings.iter().cloned());
    }
    let focus = source.unbound().clone();
    Value::Bound(Rc::new(BoundValue {
        value: result.unbound().clone(),
        parent: focus.clone(),
        parent_object: focus,
        bindings,
    }))
}

/// Does any node in this subtree rely on carried context (`%`, `@`, `#`)?
fn needs_context(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Parent | NodeKind::ContextBind { .. } | NodeKind::IndexBind { .. } => true,
        NodeKind::Path(steps) => steps.iter().any(needs_context),
        NodeKind::Filter { lhs, pred } => needs_context(lhs) || needs_context(pred),
        NodeKind::Binary { lhs, rhs, .. } => needs_context(lhs) || needs_context(rhs),
        NodeKind::UnaryMinus(e) => needs_context(e),
        NodeKind::ArrayCtor(elements) => elements.iter().any(needs_context),
        NodeKind::ObjectCtor(pairs) => pairs
            .iter()
            .any(|(k, v)| needs_context(k) || needs_context(v)),
        NodeKind::GroupBy { lhs, pairs } => {
            needs_context(lhs)
                || pairs
                    .iter()
                    .any(|(k, v)| needs_context(k) || needs_context(v))
        }
        NodeKind::Block(exprs) => exprs.iter().any(needs_context),
        NodeKind::Bind { value, .. } => needs_context(value),
        NodeKind::Condition { cond, then, els } => {
            needs_context(cond)
                || needs_context(then)
                || els.as_deref().is_some_and(needs_context)
        }
        NodeKind::Lambda { body, .. } => needs_context(body),
        NodeKind::Call { proc, args } | NodeKind::Partial { proc, args } => {
            needs_context(proc) || args.iter().any(needs_context)
        }
        NodeKind::Sort { lhs, terms } => {
            needs_context(lhs) || terms.iter().any(|t| needs_context(&t.expr))
        }
        NodeKind::Transform {
            pattern,
            update,
            delete,
        } => {
            needs_context(pattern)
                || needs_context(update)
                || delete.as_deref().is_some_and(needs_context)
        }
        _ => false,
    }
}

fn index_into(items: &[Value], n: f64) -> Value {
    let mut idx = n.floor();
    if idx < 0.0 {
        idx += items.len() as f64;
    }
    if idx < 0.0 || idx >= items.len() as f64 {
        Value::Undefined
    } else {
        items[idx as usize].clone()
    }
}

/// A predicate result counts as positional when it is a number or an
/// array of numbers.
fn numeric_result(v: &Value) -> Option<Vec<f64>> {
    match v {
        Value::Number(n) => Some(vec![*n]),
        Value::Array(items, _) if !items.is_empty() => {
            let mut nums = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item.unbound() {
                    Value::Number(n) => nums.push(*n),
                    _ => return None,
                }
            }
            Some(nums)
        }
        _ => None,
    }
}

fn compare_keys(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        // Absent sort keys go last.
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn binary_op(op: BinaryOp, l: Value, r: Value, position: usize) -> Result<Value> {
    match op {
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo => {
            if l.is_undefined() || r.is_undefined() {
                return Ok(Value::Undefined);
            }
            let a = l.as_f64().ok_or_else(|| {
                Error::new(
                    errors::T2001_LHS_NOT_NUMBER,
                    position,
                    format!(
                        "the left side of the {} operator must evaluate to a number",
                        op_symbol(op)
                    ),
                )
            })?;
            let b = r.as_f64().ok_or_else(|| {
                Error::new(
                    errors::T2002_RHS_NOT_NUMBER,
                    position,
                    format!(
                        "the right side of the {} operator must evaluate to a number",
                        op_symbol(op)
                    ),
                )
            })?;
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                _ => a % b,
            };
            // Division by zero and overflow vanish rather than surfacing
            // IEEE specials.
            if result.is_finite() {
                Ok(Value::Number(result))
            } else {
                Ok(Value::Undefined)
            }
        }
        BinaryOp::Equal => {
            if l.is_undefined() || r.is_undefined() {
                return Ok(Value::Undefined);
            }
            Ok(Value::Bool(l == r))
        }
        BinaryOp::NotEqual => {
            if l.is_undefined() || r.is_undefined() {
                return Ok(Value::Undefined);
            }
            Ok(Value::Bool(l != r))
        }
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            if l.is_undefined() || r.is_undefined() {
                return Ok(Value::Undefined);
            }
            let ord = match (l.unbound(), r.unbound()) {
                (Value::Number(a), Value::Number(b)) => {
                    a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                }
                (Value::String(a), Value::String(b)) => a.cmp(b),
                (Value::Number(_) | Value::String(_), Value::Number(_) | Value::String(_)) => {
                    return Err(Error::new(
                        errors::T2009_COMPARE_TYPE_MISMATCH,
                        position,
                        "comparison operands must be of the same type",
                    ));
                }
                _ => {
                    return Err(Error::new(
                        errors::T2010_COMPARE_NOT_COMPARABLE,
                        position,
                        "comparison operands must be numbers or strings",
                    ));
                }
            };
            let pass = match op {
                BinaryOp::Less => ord == std::cmp::Ordering::Less,
                BinaryOp::LessEqual => ord != std::cmp::Ordering::Greater,
                BinaryOp::Greater => ord == std::cmp::Ordering::Greater,
                _ => ord != std::cmp::Ordering::Less,
            };
            Ok(Value::Bool(pass))
        }
        BinaryOp::Concat => {
            let a = cast_string(&l)?;
            let b = cast_string(&r)?;
            Ok(Value::String(a + &b))
        }
        BinaryOp::In => {
            if l.is_undefined() || r.is_undefined() {
                return Ok(Value::Undefined);
            }
            let found = to_items(r).iter().any(|item| *item == l);
            Ok(Value::Bool(found))
        }
        BinaryOp::Range => {
            if l.is_undefined() || r.is_undefined() {
                return Ok(Value::Undefined);
            }
            let lo = l.as_integer().ok_or_else(|| {
                Error::new(
                    errors::T2003_RANGE_LHS_NOT_INTEGER,
                    position,
                    "the left side of the range operator must evaluate to an integer",
                )
            })?;
            let hi = r.as_integer().ok_or_else(|| {
                Error::new(
                    errors::T2004_RANGE_RHS_NOT_INTEGER,
                    position,
                    "the right side of the range operator must evaluate to an integer",
                )
            })?;
            if lo > hi {
                return Ok(Value::Undefined);
            }
            let size = (hi - lo + 1) as u64;
            if size > 10_000_000 {
                return Err(Error::new(
                    errors::D2014_RANGE_TOO_LARGE,
                    position,
                    format!("range sequence would have {size} entries, above the 1e7 cap"),
                ));
            }
            let items = (lo..=hi).map(|n| Value::Number(n as f64)).collect();
            Ok(Value::Array(Rc::new(items), ArrayFlags::SEQUENCE))
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Apply => unreachable!("handled by the caller"),
    }
}

/// The `$string` coercion: strings pass through, functions disappear,
/// everything else serializes as JSON.
pub(crate) fn cast_string(v: &Value) -> Result<String> {
    match v.unbound() {
        Value::Undefined => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        f if f.is_callable() => Ok(String::new()),
        other => crate::output::stringify(other, false),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        _ => "?",
    }
}

fn kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Number(_) => "number",
        NodeKind::String(_) => "string",
        NodeKind::Bool(_) | NodeKind::Null => "value",
        NodeKind::Regex(_) => "regex",
        NodeKind::Name(_) => "name",
        NodeKind::Variable(_) => "variable",
        NodeKind::Wildcard => "wildcard",
        NodeKind::Descendant => "descendant",
        NodeKind::Parent => "parent",
        NodeKind::Path(_) => "path",
        NodeKind::Filter { .. } => "filter",
        NodeKind::ContextBind { .. } => "context",
        NodeKind::IndexBind { .. } => "index",
        NodeKind::Binary { .. } => "binary",
        NodeKind::UnaryMinus(_) => "unary",
        NodeKind::ArrayCtor(_) => "array",
        NodeKind::ObjectCtor(_) => "object",
        NodeKind::GroupBy { .. } => "group",
        NodeKind::Block(_) => "block",
        NodeKind::Bind { .. } => "bind",
        NodeKind::Condition { .. } => "condition",
        NodeKind::Lambda { .. } => "lambda",
        NodeKind::Call { .. } => "function",
        NodeKind::Partial { .. } => "partial",
        NodeKind::Placeholder => "placeholder",
        NodeKind::Sort { .. } => "sort",
        NodeKind::Transform { .. } => "transform",
    }
}
