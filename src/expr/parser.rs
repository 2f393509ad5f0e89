/// Top-down operator-precedence parser for JSONata expressions.
///
/// Binding powers follow the reference JSONata grammar. `.`-chains are
/// flattened into path nodes as they are built; predicates, sort terms and
/// the `@`/`#` binders attach to the step they follow.
use std::rc::Rc;

use crate::errors::{self, Error, Result};

use super::lexer::{self, Mode, Token, TokenKind};
use super::signature::Signature;
use super::{BinaryOp, Node, NodeKind, SortTerm};

pub struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

fn lbp(kind: &TokenKind) -> u8 {
    match kind {
        TokenKind::LBracket | TokenKind::LParen | TokenKind::At | TokenKind::Hash => 80,
        TokenKind::Dot => 75,
        TokenKind::LBrace => 70,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 60,
        TokenKind::Plus | TokenKind::Minus | TokenKind::Amp => 50,
        TokenKind::Eq
        | TokenKind::Ne
        | TokenKind::Lt
        | TokenKind::Le
        | TokenKind::Gt
        | TokenKind::Ge
        | TokenKind::In
        | TokenKind::Apply
        | TokenKind::Caret => 40,
        TokenKind::And => 30,
        TokenKind::Or => 25,
        TokenKind::Question | TokenKind::DotDot => 20,
        TokenKind::Bind => 10,
        _ => 0,
    }
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Node> {
        let node = self.expr(0)?;
        let tok = self.peek()?;
        if tok.kind != TokenKind::End {
            return Err(Error::new(
                errors::S0201_SYNTAX_ERROR,
                tok.position,
                format!("unexpected {}", describe(&tok.kind)),
            ));
        }
        Ok(node)
    }

    fn next(&mut self, mode: Mode) -> Result<Token> {
        let tok = lexer::token_at(self.src, self.pos, mode)?;
        self.pos = tok.end;
        Ok(tok)
    }

    /// Look at the next token in operator position without consuming it.
    fn peek(&self) -> Result<Token> {
        lexer::token_at(self.src, self.pos, Mode::Operator)
    }

    fn eat(&mut self, expected: &TokenKind) -> Result<Token> {
        let tok = self.peek()?;
        if tok.kind == *expected {
            self.pos = tok.end;
            Ok(tok)
        } else if tok.kind == TokenKind::End {
            Err(Error::new(
                errors::S0203_UNEXPECTED_END,
                tok.position,
                format!("expected {} before end of expression", describe(expected)),
            ))
        } else {
            Err(Error::new(
                errors::S0202_EXPECTED_TOKEN,
                tok.position,
                format!(
                    "expected {}, got {}",
                    describe(expected),
                    describe(&tok.kind)
                ),
            ))
        }
    }

    fn at(&self, expected: &TokenKind) -> Result<bool> {
        Ok(self.peek()?.kind == *expected)
    }

    fn expr(&mut self, rbp: u8) -> Result<Node> {
        let tok = self.next(Mode::Operand)?;
        let mut left = self.nud(tok)?;
        loop {
            let tok = self.peek()?;
            if lbp(&tok.kind) <= rbp {
                return Ok(left);
            }
            self.pos = tok.end;
            left = self.led(tok, left)?;
        }
    }

    // ------------------------------------------------------------------
    // Prefix position
    // ------------------------------------------------------------------

    fn nud(&mut self, tok: Token) -> Result<Node> {
        let pos = tok.position;
        match tok.kind {
            TokenKind::Str(s) => Ok(Node::new(NodeKind::String(s), pos)),
            TokenKind::Number(n) => Ok(Node::new(NodeKind::Number(n), pos)),
            TokenKind::Bool(b) => Ok(Node::new(NodeKind::Bool(b), pos)),
            TokenKind::Null => Ok(Node::new(NodeKind::Null, pos)),
            TokenKind::Name(name) => Ok(Node::new(NodeKind::Name(name), pos)),
            TokenKind::Variable(name) => Ok(Node::new(NodeKind::Variable(name), pos)),
            TokenKind::Star => Ok(Node::new(NodeKind::Wildcard, pos)),
            TokenKind::StarStar => Ok(Node::new(NodeKind::Descendant, pos)),
            TokenKind::Percent => Ok(Node::new(NodeKind::Parent, pos)),
            TokenKind::Regex { pattern, flags } => {
                let full = if flags.is_empty() {
                    pattern
                } else {
                    format!("(?{flags}){pattern}")
                };
                let compiled = regex::Regex::new(&full).map_err(|e| {
                    Error::new(errors::S0302_BAD_REGEX, pos, format!("invalid regex: {e}"))
                })?;
                Ok(Node::new(NodeKind::Regex(Rc::new(compiled)), pos))
            }
            TokenKind::Minus => {
                let operand = self.expr(70)?;
                // Fold a literal operand so `[-1]` is a plain number.
                if let NodeKind::Number(n) = operand.kind {
                    Ok(Node::new(NodeKind::Number(-n), pos))
                } else {
                    Ok(Node::new(NodeKind::UnaryMinus(Box::new(operand)), pos))
                }
            }
            TokenKind::LBracket => {
                let mut elements = Vec::new();
                if !self.at(&TokenKind::RBracket)? {
                    loop {
                        elements.push(self.expr(0)?);
                        if self.at(&TokenKind::Comma)? {
                            self.eat(&TokenKind::Comma)?;
                        } else {
                            break;
                        }
                    }
                }
                self.eat(&TokenKind::RBracket)?;
                Ok(Node::new(NodeKind::ArrayCtor(elements), pos))
            }
            TokenKind::LBrace => {
                let pairs = self.object_pairs()?;
                Ok(Node::new(NodeKind::ObjectCtor(pairs), pos))
            }
            TokenKind::LParen => {
                let mut exprs = Vec::new();
                if !self.at(&TokenKind::RParen)? {
                    loop {
                        exprs.push(self.expr(0)?);
                        if self.at(&TokenKind::Semicolon)? {
                            self.eat(&TokenKind::Semicolon)?;
                        } else {
                            break;
                        }
                    }
                }
                self.eat(&TokenKind::RParen)?;
                Ok(Node::new(NodeKind::Block(exprs), pos))
            }
            TokenKind::Function => self.lambda(pos),
            TokenKind::Pipe => {
                let pattern = Rc::new(self.expr(0)?);
                self.eat(&TokenKind::Pipe)?;
                let update = Rc::new(self.expr(0)?);
                let delete = if self.at(&TokenKind::Comma)? {
                    self.eat(&TokenKind::Comma)?;
                    Some(Rc::new(self.expr(0)?))
                } else {
                    None
                };
                self.eat(&TokenKind::Pipe)?;
                Ok(Node::new(
                    NodeKind::Transform {
                        pattern,
                        update,
                        delete,
                    },
                    pos,
                ))
            }
            TokenKind::End => Err(Error::new(
                errors::S0203_UNEXPECTED_END,
                pos,
                "expected an expression before end of input",
            )),
            other => Err(Error::new(
                errors::S0211_INVALID_PREFIX,
                pos,
                format!("{} cannot start an expression", describe(&other)),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Infix position
    // ------------------------------------------------------------------

    fn led(&mut self, tok: Token, left: Node) -> Result<Node> {
        let pos = tok.position;
        match tok.kind {
            TokenKind::Dot => {
                let rhs = self.expr(75)?;
                let mut steps = match left.kind {
                    NodeKind::Path(steps) => steps,
                    _ => vec![left],
                };
                steps.push(rhs);
                Ok(Node::new(NodeKind::Path(steps), pos))
            }
            TokenKind::LBracket => {
                // `[` binds tighter than `.`, so a predicate always attaches
                // to the step it follows, never to a whole path.
                if self.at(&TokenKind::RBracket)? {
                    // `[]` keeps singleton sequences as arrays.
                    self.eat(&TokenKind::RBracket)?;
                    let mut node = left;
                    node.keep_array = true;
                    Ok(node)
                } else {
                    let pred = self.expr(0)?;
                    self.eat(&TokenKind::RBracket)?;
                    Ok(Node::new(
                        NodeKind::Filter {
                            lhs: Box::new(left),
                            pred: Box::new(pred),
                        },
                        pos,
                    ))
                }
            }
            TokenKind::LParen => {
                let mut args = Vec::new();
                let mut partial = false;
                if !self.at(&TokenKind::RParen)? {
                    loop {
                        if self.at(&TokenKind::Question)? {
                            let q = self.eat(&TokenKind::Question)?;
                            partial = true;
                            args.push(Node::new(NodeKind::Placeholder, q.position));
                        } else {
                            args.push(self.expr(0)?);
                        }
                        if self.at(&TokenKind::Comma)? {
                            self.eat(&TokenKind::Comma)?;
                        } else {
                            break;
                        }
                    }
                }
                self.eat(&TokenKind::RParen)?;
                let kind = if partial {
                    NodeKind::Partial {
                        proc: Box::new(left),
                        args,
                    }
                } else {
                    NodeKind::Call {
                        proc: Box::new(left),
                        args,
                    }
                };
                Ok(Node::new(kind, pos))
            }
            TokenKind::LBrace => {
                let pairs = self.object_pairs()?;
                Ok(Node::new(
                    NodeKind::GroupBy {
                        lhs: Box::new(left),
                        pairs,
                    },
                    pos,
                ))
            }
            TokenKind::Question => {
                let then = self.expr(0)?;
                let els = if self.at(&TokenKind::Colon)? {
                    self.eat(&TokenKind::Colon)?;
                    Some(Box::new(self.expr(0)?))
                } else {
                    None
                };
                Ok(Node::new(
                    NodeKind::Condition {
                        cond: Box::new(left),
                        then: Box::new(then),
                        els,
                    },
                    pos,
                ))
            }
            TokenKind::Bind => {
                let name = match left.kind {
                    NodeKind::Variable(name) if !name.is_empty() && name != "$" => name,
                    _ => {
                        return Err(Error::new(
                            errors::S0212_EXPECTED_VARIABLE,
                            left.position,
                            "the left side of := must be a variable name",
                        ));
                    }
                };
                let value = self.expr(9)?; // right-associative
                Ok(Node::new(
                    NodeKind::Bind {
                        name,
                        value: Box::new(value),
                    },
                    pos,
                ))
            }
            TokenKind::Caret => {
                self.eat(&TokenKind::LParen)?;
                let mut terms = Vec::new();
                loop {
                    let mut descending = false;
                    if self.at(&TokenKind::Lt)? {
                        self.eat(&TokenKind::Lt)?;
                    } else if self.at(&TokenKind::Gt)? {
                        self.eat(&TokenKind::Gt)?;
                        descending = true;
                    }
                    terms.push(SortTerm {
                        expr: self.expr(0)?,
                        descending,
                    });
                    if self.at(&TokenKind::Comma)? {
                        self.eat(&TokenKind::Comma)?;
                    } else {
                        break;
                    }
                }
                self.eat(&TokenKind::RParen)?;
                Ok(Node::new(
                    NodeKind::Sort {
                        lhs: Box::new(left),
                        terms,
                    },
                    pos,
                ))
            }
            TokenKind::At => {
                let var = self.binder_variable()?;
                Ok(Node::new(
                    NodeKind::ContextBind {
                        lhs: Box::new(left),
                        var,
                    },
                    pos,
                ))
            }
            TokenKind::Hash => {
                let var = self.binder_variable()?;
                Ok(Node::new(
                    NodeKind::IndexBind {
                        lhs: Box::new(left),
                        var,
                    },
                    pos,
                ))
            }
            other => {
                let bp = lbp(&other);
                let op = match other {
                    TokenKind::Plus => BinaryOp::Add,
                    TokenKind::Minus => BinaryOp::Subtract,
                    TokenKind::Star => BinaryOp::Multiply,
                    TokenKind::Slash => BinaryOp::Divide,
                    TokenKind::Percent => BinaryOp::Modulo,
                    TokenKind::Eq => BinaryOp::Equal,
                    TokenKind::Ne => BinaryOp::NotEqual,
                    TokenKind::Lt => BinaryOp::Less,
                    TokenKind::Le => BinaryOp::LessEqual,
                    TokenKind::Gt => BinaryOp::Greater,
                    TokenKind::Ge => BinaryOp::GreaterEqual,
                    TokenKind::Amp => BinaryOp::Concat,
                    TokenKind::And => BinaryOp::And,
                    TokenKind::Or => BinaryOp::Or,
                    TokenKind::In => BinaryOp::In,
                    TokenKind::DotDot => BinaryOp::Range,
                    TokenKind::Apply => BinaryOp::Apply,
                    unexpected => {
                        return Err(Error::new(
                            errors::S0201_SYNTAX_ERROR,
                            pos,
                            format!("unexpected {}", describe(&unexpected)),
                        ));
                    }
                };
                let rhs = self.expr(bp)?;
                Ok(Node::new(
                    NodeKind::Binary {
                        op,
                        lhs: Box::new(left),
                        rhs: Box::new(rhs),
                    },
                    pos,
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn object_pairs(&mut self) -> Result<Vec<(Node, Node)>> {
        let mut pairs = Vec::new();
        if !self.at(&TokenKind::RBrace)? {
            loop {
                let key = self.expr(0)?;
                self.eat(&TokenKind::Colon)?;
                let value = self.expr(0)?;
                pairs.push((key, value));
                if self.at(&TokenKind::Comma)? {
                    self.eat(&TokenKind::Comma)?;
                } else {
                    break;
                }
            }
        }
        self.eat(&TokenKind::RBrace)?;
        Ok(pairs)
    }

    /// The variable on the right side of `@` or `#`.
    fn binder_variable(&mut self) -> Result<String> {
        let tok = self.next(Mode::Operand)?;
        match tok.kind {
            TokenKind::Variable(name) if !name.is_empty() => Ok(name),
            _ => Err(Error::new(
                errors::S0212_EXPECTED_VARIABLE,
                tok.position,
                "expected a variable name after the binder",
            )),
        }
    }

    fn lambda(&mut self, pos: usize) -> Result<Node> {
        self.eat(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen)? {
            loop {
                let tok = self.next(Mode::Operand)?;
                match tok.kind {
                    TokenKind::Variable(name) if !name.is_empty() && name != "$" => {
                        params.push(name);
                    }
                    _ => {
                        return Err(Error::new(
                            errors::S0208_BAD_PARAMETER,
                            tok.position,
                            "function parameters must be variable names",
                        ));
                    }
                }
                if self.at(&TokenKind::Comma)? {
                    self.eat(&TokenKind::Comma)?;
                } else {
                    break;
                }
            }
        }
        self.eat(&TokenKind::RParen)?;
        let signature = self.signature()?;
        self.eat(&TokenKind::LBrace)?;
        let body = self.expr(0)?;
        self.eat(&TokenKind::RBrace)?;
        Ok(Node::new(
            NodeKind::Lambda {
                params,
                signature,
                body: Rc::new(body),
            },
            pos,
        ))
    }

    /// Scan a `<…>` signature directly from the source — its contents are
    /// not expression tokens.
    fn signature(&mut self) -> Result<Option<Signature>> {
        let start = lexer::skip_trivia(self.src, self.pos)?;
        let bytes = self.src.as_bytes();
        if bytes.get(start) != Some(&b'<') {
            return Ok(None);
        }
        let mut depth = 0usize;
        let mut i = start;
        loop {
            match bytes.get(i) {
                Some(b'<') => depth += 1,
                Some(b'>') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Some(_) => {}
                None => {
                    return Err(Error::new(
                        errors::S0401_BAD_SIGNATURE,
                        start,
                        "invalid function signature: unterminated",
                    ));
                }
            }
            i += 1;
        }
        let sig = Signature::parse(&self.src[start + 1..i], start + 1)?;
        self.pos = i + 1;
        Ok(Some(sig))
    }
}

fn describe(kind: &TokenKind) -> String {
    let text = match kind {
        TokenKind::End => "end of expression",
        TokenKind::Dot => "'.'",
        TokenKind::DotDot => "'..'",
        TokenKind::LBracket => "'['",
        TokenKind::RBracket => "']'",
        TokenKind::LBrace => "'{'",
        TokenKind::RBrace => "'}'",
        TokenKind::LParen => "'('",
        TokenKind::RParen => "')'",
        TokenKind::Comma => "','",
        TokenKind::Semicolon => "';'",
        TokenKind::Colon => "':'",
        TokenKind::Question => "'?'",
        TokenKind::Plus => "'+'",
        TokenKind::Minus => "'-'",
        TokenKind::Star => "'*'",
        TokenKind::StarStar => "'**'",
        TokenKind::Slash => "'/'",
        TokenKind::Percent => "'%'",
        TokenKind::Pipe => "'|'",
        TokenKind::Eq => "'='",
        TokenKind::Ne => "'!='",
        TokenKind::Lt => "'<'",
        TokenKind::Le => "'<='",
        TokenKind::Gt => "'>'",
        TokenKind::Ge => "'>='",
        TokenKind::Amp => "'&'",
        TokenKind::And => "'and'",
        TokenKind::Or => "'or'",
        TokenKind::In => "'in'",
        TokenKind::Bind => "':='",
        TokenKind::Apply => "'~>'",
        TokenKind::Caret => "'^'",
        TokenKind::At => "'@'",
        TokenKind::Hash => "'#'",
        TokenKind::Str(_) => "string literal",
        TokenKind::Number(_) => "number literal",
        TokenKind::Bool(_) => "boolean literal",
        TokenKind::Null => "'null'",
        TokenKind::Name(_) => "name",
        TokenKind::Variable(_) => "variable",
        TokenKind::Regex { .. } => "regex literal",
        TokenKind::Function => "'function'",
    };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::super::{parse, BinaryOp, NodeKind};

    #[test]
    fn dot_chains_flatten_into_paths() {
        let node = parse("a.b.c").unwrap();
        match node.kind {
            NodeKind::Path(steps) => {
                assert_eq!(steps.len(), 3);
                assert!(matches!(&steps[0].kind, NodeKind::Name(n) if n == "a"));
                assert!(matches!(&steps[2].kind, NodeKind::Name(n) if n == "c"));
            }
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn predicates_attach_to_the_preceding_step() {
        let node = parse("a.b[0]").unwrap();
        match node.kind {
            NodeKind::Path(steps) => {
                assert_eq!(steps.len(), 2);
                assert!(matches!(&steps[1].kind, NodeKind::Filter { .. }));
            }
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn filter_on_whole_path_needs_parens() {
        let node = parse("(a.b)[0]").unwrap();
        assert!(matches!(node.kind, NodeKind::Filter { .. }));
    }

    #[test]
    fn empty_brackets_set_keep_array() {
        let node = parse("a.b[]").unwrap();
        match node.kind {
            NodeKind::Path(steps) => assert!(steps[1].keep_array),
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn negative_literal_folds() {
        let node = parse("-1").unwrap();
        assert!(matches!(node.kind, NodeKind::Number(n) if n == -1.0));
    }

    #[test]
    fn precedence_of_arithmetic() {
        let node = parse("1 + 2 * 3").unwrap();
        match node.kind {
            NodeKind::Binary { op, rhs, .. } => {
                assert_eq!(op, BinaryOp::Add);
                assert!(matches!(
                    rhs.kind,
                    NodeKind::Binary {
                        op: BinaryOp::Multiply,
                        ..
                    }
                ));
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn lambda_with_signature() {
        let node = parse("function($x)<n:n>{ $x + 1 }").unwrap();
        match node.kind {
            NodeKind::Lambda {
                params, signature, ..
            } => {
                assert_eq!(params, ["x"]);
                assert!(signature.is_some());
            }
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn ternary_and_bind() {
        let node = parse("$x := a > 2 ? 'big' : 'small'").unwrap();
        match node.kind {
            NodeKind::Bind { name, value } => {
                assert_eq!(name, "x");
                assert!(matches!(value.kind, NodeKind::Condition { .. }));
            }
            other => panic!("expected bind, got {other:?}"),
        }
    }

    #[test]
    fn group_by_binds_looser_than_path() {
        let node = parse("a.b{c: d}").unwrap();
        match node.kind {
            NodeKind::GroupBy { lhs, pairs } => {
                assert!(matches!(lhs.kind, NodeKind::Path(_)));
                assert_eq!(pairs.len(), 1);
            }
            other => panic!("expected group-by, got {other:?}"),
        }
    }

    #[test]
    fn sort_terms() {
        let node = parse("a^(>price, name)").unwrap();
        match node.kind {
            NodeKind::Sort { terms, .. } => {
                assert_eq!(terms.len(), 2);
                assert!(terms[0].descending);
                assert!(!terms[1].descending);
            }
            other => panic!("expected sort, got {other:?}"),
        }
    }

    #[test]
    fn partial_application_placeholder() {
        let node = parse("$f(?, 2)").unwrap();
        assert!(matches!(node.kind, NodeKind::Partial { .. }));
    }

    #[test]
    fn transform_expression() {
        let node = parse("|a|{'c': 99}|").unwrap();
        assert!(matches!(node.kind, NodeKind::Transform { .. }));
    }

    #[test]
    fn context_and_index_binders() {
        let node = parse("a.b@$x.c#$i").unwrap();
        match node.kind {
            NodeKind::Path(steps) => {
                assert!(matches!(&steps[1].kind, NodeKind::ContextBind { .. }));
                assert!(matches!(&steps[2].kind, NodeKind::IndexBind { .. }));
            }
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn unexpected_token_is_a_syntax_error() {
        let err = parse("a +").unwrap_err();
        assert_eq!(err.code, "S0203");
        let err = parse("a ]").unwrap_err();
        assert_eq!(err.code, "S0201");
    }

    #[test]
    fn bind_requires_variable_lhs() {
        let err = parse("a := 1").unwrap_err();
        assert_eq!(err.code, "S0212");
    }
}
