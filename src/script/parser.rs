//! Recursive-descent parser producing [`Stmt`] trees.

use super::ast::*;
use super::error::{ScriptError, ScriptResult};
use super::lexer::{tokenize, Tok, Token};
use std::rc::Rc;

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "break", "continue", "def", "del", "elif", "else", "except",
    "finally", "for", "from", "if", "import", "in", "is", "lambda", "not", "or", "pass",
    "raise", "return", "try", "while", "with", "yield", "class", "global", "nonlocal",
];

/// Parse a complete module.
pub fn parse(src: &str) -> ScriptResult<Vec<Stmt>> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.statement()?);
    }
    Ok(body)
}

/// Parse a single expression (used for f-string fields).
pub fn parse_expression(src: &str, line: usize) -> ScriptResult<Expr> {
    let mut tokens = tokenize(src.trim())?;
    for token in &mut tokens {
        token.line = line;
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr_list()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(ScriptError::syntax("invalid f-string expression", line));
    }
    Ok(expr)
}

/// Expression nesting beyond this is a syntax error.
const MAX_NESTING: usize = 200;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ScriptResult<T> {
        Err(ScriptError::syntax(message, self.line()))
    }

    fn expect_op(&mut self, op: &str) -> ScriptResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", op, describe(self.peek())))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> ScriptResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", kw, describe(self.peek())))
        }
    }

    fn identifier(&mut self) -> ScriptResult<String> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            other => self.error(format!("expected identifier, found {}", describe(&other))),
        }
    }

    fn dotted_name(&mut self) -> ScriptResult<String> {
        let mut name = self.identifier()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    // ---- statements ----------------------------------------------------

    fn statement(&mut self) -> ScriptResult<Vec<Stmt>> {
        let line = self.line();
        let compound = match self.peek().clone() {
            Tok::Name(kw) => match kw.as_str() {
                "if" => Some(self.if_statement()?),
                "while" => Some(self.while_statement()?),
                "for" => Some(self.for_statement()?),
                "def" => Some(self.def_statement()?),
                "try" => Some(self.try_statement()?),
                "class" | "with" | "global" | "nonlocal" | "yield" => {
                    return self.error(format!("'{}' is not supported in the sandbox", kw))
                }
                _ => None,
            },
            Tok::Indent => return self.error("unexpected indent"),
            _ => None,
        };

        match compound {
            Some(kind) => Ok(vec![Stmt { line, kind }]),
            None => self.simple_statements(),
        }
    }

    fn simple_statements(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.simple_statement()?;
            stmts.push(Stmt { line, kind });
            if self.eat_op(";") {
                if self.at(&Tok::Newline) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return self.error(format!("expected end of line, found {}", describe(self.peek())));
        }
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> ScriptResult<StmtKind> {
        if self.eat_keyword("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.eat_keyword("break") {
            return Ok(StmtKind::Break);
        }
        if self.eat_keyword("continue") {
            return Ok(StmtKind::Continue);
        }
        if self.eat_keyword("return") {
            if self.at_line_end() {
                return Ok(StmtKind::Return(None));
            }
            return Ok(StmtKind::Return(Some(self.expr_list()?)));
        }
        if self.eat_keyword("raise") {
            if self.at_line_end() {
                return Ok(StmtKind::Raise(None));
            }
            return Ok(StmtKind::Raise(Some(self.expr()?)));
        }
        if self.eat_keyword("assert") {
            let cond = self.expr()?;
            let msg = if self.eat_op(",") {
                Some(self.expr()?)
            } else {
                None
            };
            return Ok(StmtKind::Assert(cond, msg));
        }
        if self.eat_keyword("del") {
            let mut targets = vec![to_target(self.expr()?, self.line())?];
            while self.eat_op(",") {
                targets.push(to_target(self.expr()?, self.line())?);
            }
            return Ok(StmtKind::Del(targets));
        }
        if self.eat_keyword("import") {
            let mut names = Vec::new();
            loop {
                let module = self.dotted_name()?;
                let alias = if self.eat_keyword("as") {
                    Some(self.identifier()?)
                } else {
                    None
                };
                names.push((module, alias));
                if !self.eat_op(",") {
                    break;
                }
            }
            return Ok(StmtKind::Import(names));
        }
        if self.eat_keyword("from") {
            let module = self.dotted_name()?;
            self.expect_keyword("import")?;
            if self.at_op("*") {
                return self.error("wildcard imports are not supported");
            }
            let parenthesized = self.eat_op("(");
            let mut names = Vec::new();
            loop {
                let name = self.identifier()?;
                let alias = if self.eat_keyword("as") {
                    Some(self.identifier()?)
                } else {
                    None
                };
                names.push((name, alias));
                if !self.eat_op(",") || (parenthesized && self.at_op(")")) {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
            return Ok(StmtKind::ImportFrom(module, names));
        }

        let line = self.line();
        let first = self.expr_list()?;

        if let Tok::Op(op) = self.peek().clone() {
            let aug = match op {
                "+=" => Some(BinOp::Add),
                "-=" => Some(BinOp::Sub),
                "*=" => Some(BinOp::Mul),
                "/=" => Some(BinOp::Div),
                "//=" => Some(BinOp::FloorDiv),
                "%=" => Some(BinOp::Mod),
                "**=" => Some(BinOp::Pow),
                _ => None,
            };
            if let Some(op) = aug {
                self.advance();
                let target = to_target(first, line)?;
                if matches!(target, Target::Tuple(_)) {
                    return self.error("illegal target for augmented assignment");
                }
                let value = self.expr_list()?;
                return Ok(StmtKind::AugAssign(target, op, value));
            }
        }

        if self.at_op("=") {
            let mut targets = vec![to_target(first, line)?];
            self.advance();
            let mut value = self.expr_list()?;
            while self.eat_op("=") {
                targets.push(to_target(value, line)?);
                value = self.expr_list()?;
            }
            return Ok(StmtKind::Assign(targets, value));
        }

        // Annotated assignment `name: type = value`.
        if self.at_op(":") {
            if let Expr::Name(_) = first {
                self.advance();
                self.expr()?;
                if self.eat_op("=") {
                    let value = self.expr_list()?;
                    return Ok(StmtKind::Assign(vec![to_target(first, line)?], value));
                }
                return Ok(StmtKind::Pass);
            }
        }

        Ok(StmtKind::Expr(first))
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.at_op(";")
    }

    fn block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return self.error("expected an indented block");
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> ScriptResult<StmtKind> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut orelse = None;
        loop {
            if self.eat_keyword("elif") {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn while_statement(&mut self) -> ScriptResult<StmtKind> {
        self.expect_keyword("while")?;
        let cond = self.expr()?;
        let body = self.block()?;
        if self.at_keyword("else") {
            return self.error("'while ... else' is not supported");
        }
        Ok(StmtKind::While(cond, body))
    }

    fn for_statement(&mut self) -> ScriptResult<StmtKind> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        if self.at_keyword("else") {
            return self.error("'for ... else' is not supported");
        }
        Ok(StmtKind::For(target, iter, body))
    }

    fn def_statement(&mut self) -> ScriptResult<StmtKind> {
        self.expect_keyword("def")?;
        let name = self.identifier()?;
        self.expect_op("(")?;
        let params = self.parameters(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expr()?;
        }
        let body = self.block()?;
        Ok(StmtKind::Def(Rc::new(FunctionDef { name, params, body })))
    }

    fn parameters(&mut self, closer: &str) -> ScriptResult<Vec<(String, Option<Expr>)>> {
        let mut params: Vec<(String, Option<Expr>)> = Vec::new();
        while !self.at_op(closer) {
            if self.at_op("*") || self.at_op("**") {
                return self.error("variadic parameters are not supported");
            }
            let name = self.identifier()?;
            if closer == ")" && self.eat_op(":") {
                self.expr()?;
            }
            let default = if self.eat_op("=") {
                Some(self.expr()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|(_, d)| d.is_some()) {
                return self.error("non-default parameter follows default parameter");
            }
            if params.iter().any(|(p, _)| *p == name) {
                return self.error(format!("duplicate parameter '{}'", name));
            }
            params.push((name, default));
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_statement(&mut self) -> ScriptResult<StmtKind> {
        self.expect_keyword("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let mut kinds = Vec::new();
            let mut binding = None;
            if !self.at_op(":") {
                if self.eat_op("(") {
                    loop {
                        kinds.push(self.dotted_name()?);
                        if !self.eat_op(",") || self.at_op(")") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    kinds.push(self.dotted_name()?);
                }
                if self.eat_keyword("as") {
                    binding = Some(self.identifier()?);
                }
            }
            let body = self.block()?;
            handlers.push(Handler {
                kinds,
                binding,
                body,
            });
        }
        let orelse = if self.eat_keyword("else") {
            Some(self.block()?)
        } else {
            None
        };
        let finalbody = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handlers.is_empty() && finalbody.is_none() {
            return self.error("'try' needs an 'except' or 'finally' clause");
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn target_list(&mut self) -> ScriptResult<Target> {
        let first = self.target_atom()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_keyword("in") || self.at_op("=") {
                break;
            }
            items.push(self.target_atom()?);
        }
        Ok(Target::Tuple(items))
    }

    fn target_atom(&mut self) -> ScriptResult<Target> {
        if self.eat_op("(") {
            let inner = self.target_list()?;
            self.expect_op(")")?;
            return Ok(inner);
        }
        if self.eat_op("[") {
            let inner = self.target_list()?;
            self.expect_op("]")?;
            return Ok(match inner {
                Target::Tuple(items) => Target::Tuple(items),
                single => Target::Tuple(vec![single]),
            });
        }
        Ok(Target::Name(self.identifier()?))
    }

    // ---- expressions ---------------------------------------------------

    /// Comma-separated expressions; more than one (or a trailing comma) forms a tuple.
    fn expr_list(&mut self) -> ScriptResult<Expr> {
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expr_end() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_expr_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof)
            || self.at_op("=")
            || self.at_op(")")
            || self.at_op("]")
            || self.at_op("}")
            || self.at_op(":")
            || self.at_op(";")
    }

    fn expr(&mut self) -> ScriptResult<Expr> {
        if self.eat_keyword("lambda") {
            let params = self.parameters(":")?;
            self.expect_op(":")?;
            let line = self.line();
            let body = self.expr()?;
            return Ok(Expr::Lambda(Rc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body: vec![Stmt {
                    line,
                    kind: StmtKind::Return(Some(body)),
                }],
            })));
        }

        let value = self.or_expr()?;
        if self.at_keyword("if") {
            // Comprehension filters are handled by the caller.
            let save = self.pos;
            self.advance();
            let cond = self.or_expr()?;
            if !self.eat_keyword("else") {
                self.pos = save;
                return Ok(value);
            }
            let otherwise = self.expr()?;
            return Ok(Expr::IfExp {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> ScriptResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ScriptResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ScriptResult<Expr> {
        self.nested(|p| {
            if p.eat_keyword("not") {
                let operand = p.not_expr()?;
                return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
            }
            p.comparison()
        })
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ScriptResult<T>) -> ScriptResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error("expression nested too deeply");
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn comparison(&mut self) -> ScriptResult<Expr> {
        let left = self.additive()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek().clone() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::Ne,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::Le,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::Ge,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.additive()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn additive(&mut self) -> ScriptResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> ScriptResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> ScriptResult<Expr> {
        self.nested(|p| {
            if p.eat_op("-") {
                let operand = p.unary()?;
                return Ok(match operand {
                    Expr::Int(n) => Expr::Int(-n),
                    Expr::Float(f) => Expr::Float(-f),
                    other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
                });
            }
            if p.eat_op("+") {
                let operand = p.unary()?;
                return Ok(Expr::Unary(UnaryOp::Pos, Box::new(operand)));
            }
            p.power()
        })
    }

    fn power(&mut self) -> ScriptResult<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = self.identifier()?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call(&mut self, func: Expr) -> ScriptResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return self.error("argument unpacking is not supported");
            }
            if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("=")) {
                let name = self.identifier()?;
                self.advance();
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return self.error("positional argument follows keyword argument");
                }
                let arg = self.expr()?;
                if self.at_keyword("for") {
                    let clause = self.comprehension()?;
                    args.push(Expr::ListComp {
                        element: Box::new(arg),
                        clause: Box::new(clause),
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self, target: Expr) -> ScriptResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            Some(Box::new(self.expr_list()?))
        };
        if self.eat_op(":") {
            let upper = if self.at_op("]") {
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            if self.at_op(":") {
                return self.error("slice steps are not supported");
            }
            self.expect_op("]")?;
            return Ok(Expr::Slice {
                target: Box::new(target),
                lower,
                upper,
            });
        }
        self.expect_op("]")?;
        match lower {
            Some(index) => Ok(Expr::Subscript(Box::new(target), index)),
            None => self.error("empty subscript"),
        }
    }

    fn comprehension(&mut self) -> ScriptResult<Comprehension> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.or_expr()?;
        let mut conds = Vec::new();
        while self.eat_keyword("if") {
            conds.push(self.or_expr()?);
        }
        if self.at_keyword("for") {
            return self.error("nested comprehension clauses are not supported");
        }
        Ok(Comprehension {
            target,
            iter,
            conds,
        })
    }

    fn atom(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Str(s) => self.string_continuation(vec![FStringPart::Literal(s)], false, line),
            Tok::FStr(s) => {
                let parts = parse_fstring(&s, line)?;
                self.string_continuation(parts, true, line)
            }
            Tok::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                kw if KEYWORDS.contains(&kw) => {
                    Err(ScriptError::syntax(format!("unexpected keyword '{}'", kw), line))
                }
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                if self.at_keyword("for") {
                    let clause = self.comprehension()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clause: Box::new(clause),
                    });
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.at_keyword("for") {
                    let clause = self.comprehension()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clause: Box::new(clause),
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.expr()?;
                if !self.eat_op(":") {
                    return Err(ScriptError::syntax("set literals are not supported", line));
                }
                let value = self.expr()?;
                if self.at_keyword("for") {
                    let clause = self.comprehension()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        clause: Box::new(clause),
                    });
                }
                let mut items = vec![(key, value)];
                while self.eat_op(",") {
                    if self.at_op("}") {
                        break;
                    }
                    let key = self.expr()?;
                    self.expect_op(":")?;
                    items.push((key, self.expr()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(items))
            }
            other => Err(ScriptError::syntax(
                format!("unexpected {}", describe(&other)),
                line,
            )),
        }
    }

    /// Adjacent string literals concatenate.
    fn string_continuation(
        &mut self,
        mut parts: Vec<FStringPart>,
        mut formatted: bool,
        line: usize,
    ) -> ScriptResult<Expr> {
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    parts.push(FStringPart::Literal(s));
                }
                Tok::FStr(s) => {
                    self.advance();
                    parts.extend(parse_fstring(&s, line)?);
                    formatted = true;
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::FString(parts));
        }
        let mut text = String::new();
        for part in parts {
            if let FStringPart::Literal(s) = part {
                text.push_str(&s);
            }
        }
        Ok(Expr::Str(text))
    }
}

fn parse_fstring(body: &str, line: usize) -> ScriptResult<Vec<FStringPart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(ScriptError::syntax("single '}' is not allowed in f-string", line));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        // Field: scan to the matching brace, respecting nesting and quotes.
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut spec_at: Option<usize> = None;
        let mut j = start;
        loop {
            let ch = *chars
                .get(j)
                .ok_or_else(|| ScriptError::syntax("unterminated f-string field", line))?;
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None => match ch {
                    '\'' | '"' => quote = Some(ch),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    ':' if depth == 0 && spec_at.is_none() => spec_at = Some(j),
                    '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => {
                        return Err(ScriptError::syntax(
                            "f-string conversions are not supported",
                            line,
                        ))
                    }
                    _ => {}
                },
            }
            j += 1;
        }

        let expr_end = spec_at.unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        if source.trim().is_empty() {
            return Err(ScriptError::syntax("empty expression in f-string", line));
        }
        let spec = spec_at.map(|s| chars[s + 1..j].iter().collect::<String>());

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(FStringPart::Field(parse_expression(&source, line)?, spec));
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

fn to_target(expr: Expr, line: usize) -> ScriptResult<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|item| to_target(item, line))
                .collect::<ScriptResult<_>>()?,
        )),
        Expr::Subscript(target, index) => Ok(Target::Subscript(*target, *index)),
        Expr::Attribute(_, name) => Err(ScriptError::syntax(
            format!("cannot assign to attribute '{}'", name),
            line,
        )),
        _ => Err(ScriptError::syntax("cannot assign to expression", line)),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{}'", n),
        Tok::Int(n) => format!("number {}", n),
        Tok::Float(f) => format!("number {}", f),
        Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
        Tok::Op(op) => format!("'{}'", op),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let src = format!("x = {}1{}", "(".repeat(5000), ")".repeat(5000));
        let err = parse(&src).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
        assert!(parse("x = ((((1))))").is_ok());
    }

    #[test]
    fn parses_assignment() {
        let body = parse("result = 2 + 2").unwrap();
        assert_eq!(body.len(), 1);
        assert!(matches!(
            &body[0].kind,
            StmtKind::Assign(targets, Expr::Binary(BinOp::Add, _, _)) if targets.len() == 1
        ));
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let body = parse("x = -2 ** 2").unwrap();
        match &body[0].kind {
            StmtKind::Assign(_, Expr::Unary(UnaryOp::Neg, inner)) => {
                assert!(matches!(**inner, Expr::Binary(BinOp::Pow, _, _)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compound_statements() {
        let src = "\
def f(a, b=2):
    if a > b:
        return a
    elif a == b:
        return 0
    else:
        return b

for k, v in items:
    try:
        total += f(v)
    except (KeyError, ValueError) as e:
        pass
    finally:
        count += 1
";
        let body = parse(src).unwrap();
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, StmtKind::Def(_)));
        assert!(matches!(body[1].kind, StmtKind::For(Target::Tuple(_), _, _)));
    }

    #[test]
    fn comprehension_with_filter_and_ternary() {
        let body = parse("xs = [a if a > 0 else 0 for a in nums if a != 3]").unwrap();
        match &body[0].kind {
            StmtKind::Assign(_, Expr::ListComp { element, clause }) => {
                assert!(matches!(**element, Expr::IfExp { .. }));
                assert_eq!(clause.conds.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generator_argument_becomes_comprehension() {
        let body = parse("total = sum(x * 2 for x in xs)").unwrap();
        match &body[0].kind {
            StmtKind::Assign(_, Expr::Call { args, .. }) => {
                assert!(matches!(args[0], Expr::ListComp { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fstring_fields_and_specs() {
        let body = parse("s = f'{name}: {value:.2f} {{literal}}'").unwrap();
        match &body[0].kind {
            StmtKind::Assign(_, Expr::FString(parts)) => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[2], FStringPart::Field(_, Some(spec)) if spec == ".2f"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lambda_keyword_argument() {
        assert!(parse("ys = sorted(xs, key=lambda x: x['size'])").is_ok());
    }

    #[test]
    fn unsupported_constructs_are_syntax_errors() {
        assert!(parse("class A:\n    pass\n").is_err());
        assert!(parse("with f as g:\n    pass\n").is_err());
        assert!(parse("from os import *").is_err());
        assert!(parse("x.y = 1").is_err());
    }
}
