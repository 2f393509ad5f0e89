/// Built-in function registry.
///
/// The registry is initialized once, lazily, and is read-only afterwards;
/// it is shared by every evaluation. Host-registered custom functions live
/// in a per-`Evaluator` map consulted before this table.
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

use crate::errors::Result;
use crate::value::Value;

use super::eval::Machine;
use super::frame::Frame;

pub mod arrays;
pub mod datetime;
pub mod encoding;
pub mod higher;
pub mod numbers;
pub mod objects;
pub mod strings;
pub mod types;

/// Call-site context handed to native implementations: the focus value,
/// the scope, and the source position for error reporting.
pub struct CallCtx<'a> {
    pub input: &'a Value,
    pub frame: &'a Rc<Frame>,
    pub position: usize,
}

pub type NativeFn = fn(&Machine, &CallCtx, &[Value]) -> Result<Value>;
pub type HostFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

#[derive(Clone)]
pub enum BuiltinImpl {
    Native(NativeFn),
    Host(Arc<HostFn>),
}

/// Descriptor for a callable built-in or host function.
#[derive(Clone)]
pub struct BuiltinDef {
    pub name: String,
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
    /// When set, a call with fewer than `min_args` arguments prepends the
    /// current focus as the first argument.
    pub accepts_context: bool,
    pub imp: BuiltinImpl,
}

impl fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("accepts_context", &self.accepts_context)
            .finish_non_exhaustive()
    }
}

impl BuiltinDef {
    /// Descriptor for a host-supplied custom function.
    pub fn host(
        name: impl Into<String>,
        min_args: usize,
        max_args: Option<usize>,
        accepts_context: bool,
        f: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            min_args,
            max_args,
            accepts_context,
            imp: BuiltinImpl::Host(Arc::new(f)),
        }
    }
}

fn native(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    accepts_context: bool,
    f: NativeFn,
) -> (&'static str, BuiltinDef) {
    (
        name,
        BuiltinDef {
            name: name.to_string(),
            min_args,
            max_args,
            accepts_context,
            imp: BuiltinImpl::Native(f),
        },
    )
}

static REGISTRY: LazyLock<HashMap<&'static str, BuiltinDef>> = LazyLock::new(|| {
    HashMap::from([
        // Strings
        native("string", 1, Some(2), true, strings::string),
        native("length", 1, Some(1), true, strings::length),
        native("substring", 2, Some(3), true, strings::substring),
        native("substringBefore", 2, Some(2), true, strings::substring_before),
        native("substringAfter", 2, Some(2), true, strings::substring_after),
        native("uppercase", 1, Some(1), true, strings::uppercase),
        native("lowercase", 1, Some(1), true, strings::lowercase),
        native("trim", 1, Some(1), true, strings::trim),
        native("pad", 2, Some(3), true, strings::pad),
        native("contains", 2, Some(2), true, strings::contains),
        native("split", 2, Some(3), true, strings::split),
        native("join", 1, Some(2), false, strings::join),
        native("match", 2, Some(3), true, strings::match_),
        native("replace", 3, Some(4), true, strings::replace),
        // Encoding
        native("base64encode", 1, Some(1), true, encoding::base64_encode),
        native("base64decode", 1, Some(1), true, encoding::base64_decode),
        native("encodeUrl", 1, Some(1), true, encoding::encode_url),
        native("encodeUrlComponent", 1, Some(1), true, encoding::encode_url_component),
        native("decodeUrl", 1, Some(1), true, encoding::decode_url),
        native("decodeUrlComponent", 1, Some(1), true, encoding::decode_url_component),
        // Numbers
        native("number", 1, Some(1), true, numbers::number),
        native("abs", 1, Some(1), true, numbers::abs),
        native("floor", 1, Some(1), true, numbers::floor),
        native("ceil", 1, Some(1), true, numbers::ceil),
        native("round", 1, Some(2), true, numbers::round),
        native("power", 2, Some(2), true, numbers::power),
        native("sqrt", 1, Some(1), true, numbers::sqrt),
        native("random", 0, Some(0), false, numbers::random),
        native("formatBase", 1, Some(2), true, numbers::format_base),
        native("sum", 1, Some(1), false, numbers::sum),
        native("max", 1, Some(1), false, numbers::max),
        native("min", 1, Some(1), false, numbers::min),
        native("average", 1, Some(1), false, numbers::average),
        native("count", 1, Some(1), false, numbers::count),
        // Booleans and diagnostics
        native("boolean", 1, Some(1), true, types::boolean),
        native("not", 1, Some(1), false, types::not),
        native("exists", 1, Some(1), false, types::exists),
        native("type", 1, Some(1), false, types::type_of),
        native("error", 0, Some(1), false, types::error),
        native("assert", 1, Some(2), false, types::assert),
        // Arrays
        native("append", 2, Some(2), false, arrays::append),
        native("reverse", 1, Some(1), true, arrays::reverse),
        native("shuffle", 1, Some(1), false, arrays::shuffle),
        native("zip", 1, None, false, arrays::zip),
        native("distinct", 1, Some(1), true, arrays::distinct),
        native("sort", 1, Some(2), true, arrays::sort),
        // Objects
        native("keys", 1, Some(1), true, objects::keys),
        native("lookup", 2, Some(2), true, objects::lookup),
        native("merge", 1, Some(1), false, objects::merge),
        native("spread", 1, Some(1), true, objects::spread),
        native("each", 2, Some(2), false, objects::each),
        native("sift", 2, Some(2), true, objects::sift),
        // Higher-order
        native("map", 2, Some(2), false, higher::map),
        native("filter", 2, Some(2), false, higher::filter),
        native("reduce", 2, Some(3), false, higher::reduce),
        native("single", 1, Some(2), false, higher::single),
        // Date/time
        native("now", 0, Some(0), false, datetime::now),
        native("millis", 0, Some(0), false, datetime::millis),
        native("fromMillis", 1, Some(1), true, datetime::from_millis),
        native("toMillis", 1, Some(1), true, datetime::to_millis),
    ])
});

pub fn lookup(name: &str) -> Option<&'static BuiltinDef> {
    REGISTRY.get(name)
}
