/// Parser and validator for the function signature mini-language.
///
/// A signature like `<s-n?:n>` declares parameter types, optional markers
/// and a return type. `-` characters are separators and carry no meaning
/// here. Nested `<…>` subtypes are only legal on `a` (array) and `f`
/// (function).
use crate::errors::{self, Error, Result};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<Param>,
    pub result: Option<Box<Param>>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub kind: ParamKind,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub enum ParamKind {
    Any,
    String,
    Number,
    Bool,
    Null,
    Object,
    Array(Option<Box<Param>>),
    Function {
        params: Option<Vec<Param>>,
        result: Option<Box<Param>>,
    },
    Union(Vec<ParamKind>),
}

struct SigParser<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Offset of the signature in the enclosing expression, for errors.
    base: usize,
}

impl Signature {
    /// Parse the text between the `<` and `>` delimiters.
    pub fn parse(text: &str, base: usize) -> Result<Signature> {
        let mut p = SigParser {
            bytes: text.as_bytes(),
            pos: 0,
            base,
        };
        let mut params = Vec::new();
        let mut result = None;
        while let Some(b) = p.peek() {
            match b {
                b'-' => {
                    p.pos += 1;
                }
                b':' => {
                    p.pos += 1;
                    result = Some(Box::new(p.param()?));
                    if p.peek().is_some() {
                        return Err(p.bad("trailing characters after return type"));
                    }
                }
                _ => params.push(p.param()?),
            }
        }
        Ok(Signature { params, result })
    }

    /// Validate an argument vector, auto-wrapping arguments whose declared
    /// type is array. Missing optional arguments stay missing.
    pub fn validate(&self, args: Vec<Value>, position: usize) -> Result<Vec<Value>> {
        let required = self.params.iter().filter(|p| !p.optional).count();
        if args.len() < required || args.len() > self.params.len() {
            return Err(Error::new(
                errors::T0410_ARGUMENT_TYPE,
                position,
                format!(
                    "function expects {} to {} arguments, got {}",
                    required,
                    self.params.len(),
                    args.len()
                ),
            ));
        }
        let mut out = Vec::with_capacity(args.len());
        for (i, (param, arg)) in self.params.iter().zip(args.into_iter()).enumerate() {
            let arg = auto_wrap(param, arg);
            check(param, &arg, i + 1, position)?;
            out.push(arg);
        }
        Ok(out)
    }
}

fn auto_wrap(param: &Param, arg: Value) -> Value {
    if matches!(param.kind, ParamKind::Array(_))
        && !matches!(arg.unbound(), Value::Array(..) | Value::Undefined)
    {
        Value::array(vec![arg])
    } else {
        arg
    }
}

fn check(param: &Param, arg: &Value, index: usize, position: usize) -> Result<()> {
    if arg.is_undefined() {
        return Ok(());
    }
    if kind_matches(&param.kind, arg) {
        check_elements(param, arg, index, position)
    } else {
        Err(Error::new(
            errors::T0410_ARGUMENT_TYPE,
            position,
            format!(
                "argument {} does not match the function signature (got {})",
                index,
                arg.type_name()
            ),
        ))
    }
}

fn kind_matches(kind: &ParamKind, arg: &Value) -> bool {
    let arg = arg.unbound();
    match kind {
        ParamKind::Any => true,
        ParamKind::String => matches!(arg, Value::String(_)),
        ParamKind::Number => matches!(arg, Value::Number(_)),
        ParamKind::Bool => matches!(arg, Value::Bool(_)),
        ParamKind::Null => matches!(arg, Value::Null),
        ParamKind::Object => matches!(arg, Value::Object(_)),
        ParamKind::Array(_) => matches!(arg, Value::Array(..)),
        ParamKind::Function { .. } => arg.is_callable(),
        ParamKind::Union(kinds) => kinds.iter().any(|k| kind_matches(k, arg)),
    }
}

fn check_elements(param: &Param, arg: &Value, index: usize, position: usize) -> Result<()> {
    if let (ParamKind::Array(Some(subtype)), Value::Array(items, _)) = (&param.kind, arg.unbound())
    {
        for item in items.iter() {
            if !item.is_undefined() && !kind_matches(&subtype.kind, item) {
                return Err(Error::new(
                    errors::T0412_ARGUMENT_ELEMENT_TYPE,
                    position,
                    format!(
                        "argument {} must be an array with elements of a single type (got {})",
                        index,
                        item.type_name()
                    ),
                ));
            }
        }
    }
    Ok(())
}

impl<'a> SigParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bad(&self, what: &str) -> Error {
        Error::new(
            errors::S0401_BAD_SIGNATURE,
            self.base + self.pos,
            format!("invalid function signature: {what}"),
        )
    }

    fn param(&mut self) -> Result<Param> {
        let kind = match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let mut kinds = Vec::new();
                while let Some(b) = self.peek() {
                    if b == b')' {
                        break;
                    }
                    kinds.push(self.simple_kind(b)?);
                }
                if self.peek() != Some(b')') {
                    return Err(self.bad("unterminated type union"));
                }
                self.pos += 1;
                if kinds.is_empty() {
                    return Err(self.bad("empty type union"));
                }
                ParamKind::Union(kinds)
            }
            Some(b) => {
                let base = self.simple_kind(b)?;
                self.subtype(base)?
            }
            None => return Err(self.bad("expected a parameter type")),
        };
        let optional = self.peek() == Some(b'?');
        if optional {
            self.pos += 1;
        }
        Ok(Param { kind, optional })
    }

    fn simple_kind(&mut self, b: u8) -> Result<ParamKind> {
        let kind = match b {
            b'x' => ParamKind::Any,
            b's' => ParamKind::String,
            b'n' => ParamKind::Number,
            b'b' => ParamKind::Bool,
            b'l' => ParamKind::Null,
            b'a' => ParamKind::Array(None),
            b'o' => ParamKind::Object,
            b'f' => ParamKind::Function {
                params: None,
                result: None,
            },
            other => return Err(self.bad(&format!("unknown type symbol '{}'", other as char))),
        };
        self.pos += 1;
        Ok(kind)
    }

    /// Parse an optional `<…>` subtype after an `a` or `f` symbol.
    fn subtype(&mut self, base: ParamKind) -> Result<ParamKind> {
        if self.peek() != Some(b'<') {
            return Ok(base);
        }
        self.pos += 1;
        match base {
            ParamKind::Array(_) => {
                let inner = self.param()?;
                if self.peek() != Some(b'>') {
                    return Err(self.bad("unterminated array subtype"));
                }
                self.pos += 1;
                Ok(ParamKind::Array(Some(Box::new(inner))))
            }
            ParamKind::Function { .. } => {
                let mut params = Vec::new();
                let mut result = None;
                loop {
                    match self.peek() {
                        Some(b'>') => {
                            self.pos += 1;
                            break;
                        }
                        Some(b':') => {
                            self.pos += 1;
                            result = Some(Box::new(self.param()?));
                            if self.peek() != Some(b'>') {
                                return Err(self.bad("unterminated function subtype"));
                            }
                            self.pos += 1;
                            break;
                        }
                        Some(b'-') => self.pos += 1,
                        Some(_) => params.push(self.param()?),
                        None => return Err(self.bad("unterminated function subtype")),
                    }
                }
                Ok(ParamKind::Function {
                    params: Some(params),
                    result,
                })
            }
            _ => Err(self.bad("subtype is only legal on array and function parameters")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_parameters() {
        let sig = Signature::parse("sn", 0).unwrap();
        assert_eq!(sig.params.len(), 2);
        assert!(matches!(sig.params[0].kind, ParamKind::String));
        assert!(matches!(sig.params[1].kind, ParamKind::Number));
        assert!(sig.result.is_none());
    }

    #[test]
    fn parses_optional_and_return_type() {
        let sig = Signature::parse("s-n?:n", 0).unwrap();
        assert_eq!(sig.params.len(), 2);
        assert!(!sig.params[0].optional);
        assert!(sig.params[1].optional);
        assert!(matches!(sig.result.as_deref().unwrap().kind, ParamKind::Number));
    }

    #[test]
    fn parses_union_and_subtypes() {
        let sig = Signature::parse("(sao)a<n>f<n:n>", 0).unwrap();
        assert!(matches!(sig.params[0].kind, ParamKind::Union(_)));
        assert!(matches!(sig.params[1].kind, ParamKind::Array(Some(_))));
        assert!(matches!(sig.params[2].kind, ParamKind::Function { .. }));
    }

    #[test]
    fn rejects_unknown_symbols() {
        let err = Signature::parse("sz", 0).unwrap_err();
        assert_eq!(err.code, "S0401");
    }

    #[test]
    fn rejects_subtype_on_scalar() {
        let err = Signature::parse("s<n>", 0).unwrap_err();
        assert_eq!(err.code, "S0401");
    }

    #[test]
    fn validate_auto_wraps_array_parameters() {
        let sig = Signature::parse("a<n>", 0).unwrap();
        let out = sig.validate(vec![Value::Number(1.0)], 0).unwrap();
        assert!(matches!(out[0], Value::Array(..)));
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let sig = Signature::parse("n", 0).unwrap();
        let err = sig.validate(vec![Value::String("x".into())], 3).unwrap_err();
        assert_eq!(err.code, "T0410");
        assert_eq!(err.position, Some(3));
    }

    #[test]
    fn validate_rejects_bad_element_type() {
        let sig = Signature::parse("a<n>", 0).unwrap();
        let arr = Value::array(vec![Value::Number(1.0), Value::String("x".into())]);
        let err = sig.validate(vec![arr], 0).unwrap_err();
        assert_eq!(err.code, "T0412");
    }

    #[test]
    fn validate_enforces_argument_count() {
        let sig = Signature::parse("sn?", 0).unwrap();
        assert!(sig.validate(vec![], 0).is_err());
        assert!(sig
            .validate(vec![Value::String("x".into())], 0)
            .is_ok());
    }
}
