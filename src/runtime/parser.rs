//! Recursive-descent parser producing [`ast`](crate::runtime::ast) nodes.
//!
//! Nesting depth is bounded so hostile inputs such as ten thousand opening
//! parentheses fail with a syntax error instead of exhausting the stack.

use crate::runtime::ast::*;
use crate::runtime::lexer::{tokenize, SyntaxError, Tok, Token};
use std::rc::Rc;

const MAX_NESTING: usize = 100;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

type PResult<T> = Result<T, SyntaxError>;

pub fn parse_program(source: &str) -> PResult<Block> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    loop {
        match parser.peek() {
            Tok::Eof => break,
            Tok::Newline => parser.advance(),
            Tok::Indent => return Err(parser.error("unexpected indent")),
            _ => body.extend(parser.statement()?),
        }
    }
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    fn unexpected(&self) -> SyntaxError {
        self.error(format!("invalid syntax near {}", self.peek()))
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}' but found {}", op, self.peek())))
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}' but found {}", kw, self.peek())))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.error(format!("expected a name but found {}", self.peek()))),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.check_op(";")
    }

    // ---- statements -------------------------------------------------------

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "if" => Ok(vec![self.if_stmt()?]),
            "while" => Ok(vec![self.while_stmt()?]),
            "for" => Ok(vec![self.for_stmt()?]),
            "def" => Ok(vec![self.function_def()?]),
            "class" => Ok(vec![self.class_def()?]),
            "try" => Ok(vec![self.try_stmt()?]),
            "with" | "async" | "yield" | "await" | "nonlocal" => {
                Err(SyntaxError::new(line, format!("'{}' is not supported", keyword)))
            }
            _ => self.simple_line(),
        }
    }

    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            if let Some(stmt) = self.small_statement()? {
                stmts.push(stmt);
            }
            if self.eat_op(";") {
                if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(stmts)
            }
            Tok::Eof => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn small_statement(&mut self) -> PResult<Option<Stmt>> {
        let line = self.line();
        let stmt = |kind| Ok(Some(Stmt { line, kind }));

        if let Tok::Name(word) = self.peek().clone() {
            match word.as_str() {
                "pass" => {
                    self.advance();
                    return stmt(StmtKind::Pass);
                }
                "break" => {
                    self.advance();
                    return stmt(StmtKind::Break);
                }
                "continue" => {
                    self.advance();
                    return stmt(StmtKind::Continue);
                }
                "return" => {
                    self.advance();
                    let value = if self.at_line_end() {
                        None
                    } else {
                        Some(self.expr_list()?)
                    };
                    return stmt(StmtKind::Return(value));
                }
                "global" => {
                    self.advance();
                    let mut names = vec![self.expect_name()?];
                    while self.eat_op(",") {
                        names.push(self.expect_name()?);
                    }
                    return stmt(StmtKind::Global(names));
                }
                "import" => {
                    self.advance();
                    let module = self.dotted_name()?;
                    while !self.at_line_end() {
                        self.advance();
                    }
                    return stmt(StmtKind::Import(module));
                }
                "from" => {
                    self.advance();
                    let module = self.dotted_name()?;
                    self.expect_kw("import")?;
                    while !self.at_line_end() {
                        self.advance();
                    }
                    return stmt(StmtKind::Import(module));
                }
                "raise" => {
                    self.advance();
                    let exc = if self.at_line_end() {
                        None
                    } else {
                        Some(self.test()?)
                    };
                    if self.eat_kw("from") {
                        self.test()?;
                    }
                    return stmt(StmtKind::Raise(exc));
                }
                "assert" => {
                    self.advance();
                    let test = self.test()?;
                    let msg = if self.eat_op(",") {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    return stmt(StmtKind::Assert { test, msg });
                }
                "del" => {
                    self.advance();
                    let mut targets = vec![to_target(self.or_expr()?, line)?];
                    while self.eat_op(",") {
                        targets.push(to_target(self.or_expr()?, line)?);
                    }
                    return stmt(StmtKind::Delete(targets));
                }
                _ => {}
            }
        }

        let first = self.expr_list()?;

        // Annotated assignment: `x: int = 3` or a bare annotation.
        if self.check_op(":") {
            if !matches!(first, Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }) {
                return Err(self.unexpected());
            }
            self.advance();
            self.test()?;
            if self.eat_op("=") {
                let value = self.expr_list()?;
                return stmt(StmtKind::Assign {
                    targets: vec![to_target(first, line)?],
                    value,
                });
            }
            return Ok(None);
        }

        if let Some(op) = self.aug_assign_op() {
            self.advance();
            let target = to_target(first, line)?;
            if matches!(target, Target::Unpack(_)) {
                return Err(SyntaxError::new(line, "illegal expression for augmented assignment"));
            }
            let value = self.expr_list()?;
            return stmt(StmtKind::AugAssign { target, op, value });
        }

        if self.check_op("=") {
            let mut targets = vec![to_target(first, line)?];
            self.advance();
            let mut value = self.expr_list()?;
            while self.eat_op("=") {
                targets.push(to_target(value, line)?);
                value = self.expr_list()?;
            }
            return stmt(StmtKind::Assign { targets, value });
        }

        stmt(StmtKind::Expr(first))
    }

    fn aug_assign_op(&self) -> Option<BinOp> {
        let Tok::Op(op) = self.peek() else { return None };
        Some(match *op {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::Div,
            "//=" => BinOp::FloorDiv,
            "%=" => BinOp::Mod,
            "**=" => BinOp::Pow,
            "&=" => BinOp::BitAnd,
            "|=" => BinOp::BitOr,
            "^=" => BinOp::BitXor,
            "<<=" => BinOp::LShift,
            ">>=" => BinOp::RShift,
            _ => return None,
        })
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn block(&mut self) -> PResult<Block> {
        self.expect_op(":")?;
        self.nested(|p| {
            if !matches!(p.peek(), Tok::Newline) {
                return p.simple_line();
            }
            p.advance();
            if !matches!(p.peek(), Tok::Indent) {
                return Err(p.error("expected an indented block"));
            }
            p.advance();
            let mut body = Vec::new();
            loop {
                match p.peek() {
                    Tok::Dedent => {
                        p.advance();
                        break;
                    }
                    Tok::Eof => break,
                    Tok::Newline => p.advance(),
                    _ => body.extend(p.statement()?),
                }
            }
            Ok(body)
        })
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("if")?;
        let test = self.test()?;
        let body = self.block()?;
        let mut branches = vec![IfBranch { line, test, body }];
        let mut orelse = None;
        loop {
            let branch_line = self.line();
            if self.eat_kw("elif") {
                let test = self.test()?;
                let body = self.block()?;
                branches.push(IfBranch {
                    line: branch_line,
                    test,
                    body,
                });
            } else if self.eat_kw("else") {
                orelse = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            line,
            kind: StmtKind::If { branches, orelse },
        })
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("while")?;
        let test = self.test()?;
        let body = self.block()?;
        if self.check_kw("else") {
            return Err(self.error("'else' after a loop is not supported"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body },
        })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        if self.check_kw("else") {
            return Err(self.error("'else' after a loop is not supported"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::For { target, iter, body },
        })
    }

    /// Loop and comprehension targets: stops before `in`.
    fn target_list(&mut self) -> PResult<Target> {
        let line = self.line();
        let first = self.or_expr()?;
        if !self.check_op(",") {
            return to_target(first, line);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_kw("in") {
                break;
            }
            items.push(self.or_expr()?);
        }
        to_target(Expr::Tuple(items), line)
    }

    fn params(&mut self, closing: &str) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check_op(closing) {
            if self.check_op("*") || self.check_op("**") || self.check_op("/") {
                return Err(self.error("variadic and positional-only parameters are not supported"));
            }
            let name = self.expect_name()?;
            if closing == ")" && self.eat_op(":") {
                self.test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!("duplicate argument '{}'", name)));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn function_def(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef::new(name, params, body, line))),
        })
    }

    fn class_def(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("class")?;
        let name = self.expect_name()?;
        let mut base = None;
        if self.eat_op("(") {
            if !self.check_op(")") {
                base = Some(self.test()?);
                if self.eat_op(",") && !self.check_op(")") {
                    return Err(self.error("multiple inheritance is not supported"));
                }
            }
            self.expect_op(")")?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef { name, base, body },
        })
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.check_kw("except") {
            let handler_line = self.line();
            self.advance();
            let mut kind = None;
            let mut name = None;
            if !self.check_op(":") {
                kind = Some(self.test()?);
                if self.eat_kw("as") {
                    name = Some(self.expect_name()?);
                }
            }
            let body = self.block()?;
            handlers.push(ExceptHandler {
                line: handler_line,
                kind,
                name,
                body,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            Some(self.block()?)
        } else {
            None
        };
        let finalbody = if self.eat_kw("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handlers.is_empty() && finalbody.is_none() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    // ---- expressions ------------------------------------------------------

    /// Comma-separated expressions; more than one (or a trailing comma) makes a tuple.
    fn expr_list(&mut self) -> PResult<Expr> {
        let first = self.test()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expr_list_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_expr_list_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof)
            || matches!(self.peek(), Tok::Op(op) if matches!(*op, "=" | ")" | "]" | "}" | ";" | ":"))
            || self.aug_assign_op().is_some()
    }

    fn test(&mut self) -> PResult<Expr> {
        self.nested(|p| {
            if p.check_kw("lambda") {
                return p.lambda();
            }
            let expr = p.or_test()?;
            if p.eat_kw("if") {
                let test = p.or_test()?;
                p.expect_kw("else")?;
                let orelse = p.test()?;
                return Ok(Expr::IfExp {
                    test: Box::new(test),
                    body: Box::new(expr),
                    orelse: Box::new(orelse),
                });
            }
            Ok(expr)
        })
    }

    fn lambda(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let params = self.params(":")?;
        self.expect_op(":")?;
        let body = self.test()?;
        let body = vec![Stmt {
            line,
            kind: StmtKind::Return(Some(body)),
        }];
        Ok(Expr::Lambda(Rc::new(FunctionDef::new(
            "<lambda>".to_string(),
            params,
            body,
            line,
        ))))
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            let operand = self.nested(|p| p.not_test())?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.or_expr()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_next(), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_next(), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.or_expr()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn binary_level(
        &mut self,
        table: &[(&str, BinOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in table {
                if self.eat_op(symbol) {
                    let right = next(self)?;
                    left = Expr::BinOp {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::xor_expr)
    }

    fn xor_expr(&mut self) -> PResult<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::and_expr)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift_expr)
    }

    fn shift_expr(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::arith_expr,
        )
    }

    fn arith_expr(&mut self) -> PResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> PResult<Expr> {
        if self.check_op("@") {
            return Err(self.error("matrix multiplication is not supported"));
        }
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            Tok::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.nested(|p| p.factor())?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.power(),
        }
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.primary()?;
        if self.eat_op("**") {
            let exponent = self.nested(|p| p.factor())?;
            return Ok(Expr::BinOp {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.nested(|p| p.call_args())?;
                self.expect_op(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let index = self.nested(|p| p.subscript())?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check_op(")") {
            if self.check_op("*") || self.check_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword = matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_next(), Tok::Op("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.test()?;
                if self.check_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::ListComp {
                        elt: Box::new(arg),
                        generators,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let first = self.slice_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> PResult<Expr> {
        let lower = if self.check_op(":") {
            None
        } else {
            Some(self.test()?)
        };
        if !self.eat_op(":") {
            return lower.ok_or_else(|| self.unexpected());
        }
        let bound = |p: &mut Self| -> PResult<Option<Box<Expr>>> {
            if p.check_op(":") || p.check_op("]") || p.check_op(",") {
                Ok(None)
            } else {
                Ok(Some(Box::new(p.test()?)))
            }
        };
        let upper = bound(self)?;
        let step = if self.eat_op(":") { bound(self)? } else { None };
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    fn comprehension_clauses(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut conds = Vec::new();
            while self.eat_kw("if") {
                conds.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, conds });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Constant(Constant::Int(i)))
            }
            Tok::Float(x) => {
                self.advance();
                Ok(Expr::Constant(Constant::Float(x)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(line),
            Tok::Name(name) => match name.as_str() {
                "None" => {
                    self.advance();
                    Ok(Expr::Constant(Constant::None))
                }
                "True" => {
                    self.advance();
                    Ok(Expr::Constant(Constant::Bool(true)))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Constant(Constant::Bool(false)))
                }
                "yield" | "await" => Err(self.error(format!("'{}' is not supported", name))),
                _ if KEYWORDS.contains(&name.as_str()) => Err(self.unexpected()),
                _ => {
                    self.advance();
                    Ok(Expr::Name(name))
                }
            },
            Tok::Op("(") => {
                self.advance();
                self.nested(|p| p.paren_body())
            }
            Tok::Op("[") => {
                self.advance();
                self.nested(|p| p.list_body())
            }
            Tok::Op("{") => {
                self.advance();
                self.nested(|p| p.brace_body())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn paren_body(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_body(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn brace_body(&mut self) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.test()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.check_kw("for") {
                let generators = self.comprehension_clauses()?;
                self.expect_op("}")?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                });
            }
            let mut pairs = vec![(first, value)];
            while self.eat_op(",") {
                if self.check_op("}") {
                    break;
                }
                let key = self.test()?;
                self.expect_op(":")?;
                pairs.push((key, self.test()?));
            }
            self.expect_op("}")?;
            return Ok(Expr::Dict(pairs));
        }
        if self.check_kw("for") {
            return Err(self.error("set comprehensions are not supported"));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(items))
    }

    /// Adjacent literals concatenate; any f-string part makes the whole an f-string.
    fn strings(&mut self, line: u32) -> PResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    push_literal(&mut parts, &s);
                }
                Tok::FStr(s) => {
                    self.advance();
                    formatted = true;
                    for part in parse_fstring(&s, line)? {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            other => parts.push(other),
                        }
                    }
                }
                _ => break,
            }
        }
        if !formatted {
            let text = match parts.pop() {
                Some(FStringPart::Literal(text)) => text,
                _ => String::new(),
            };
            return Ok(Expr::str(&text));
        }
        Ok(Expr::FString(parts))
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn parse_fstring(body: &str, line: u32) -> PResult<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(SyntaxError::new(line, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        // Find the matching close brace, honouring nested brackets and quotes.
        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut conversion_at = None;
        let mut spec_at = None;
        let mut j = start;
        loop {
            let Some(&d) = chars.get(j) else {
                return Err(SyntaxError::new(line, "f-string: expecting '}'"));
            };
            if let Some(q) = quote {
                if d == q {
                    quote = None;
                }
            } else {
                match d {
                    '\'' | '"' => quote = Some(d),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    '!' if depth == 0 && spec_at.is_none() && chars.get(j + 1) != Some(&'=') => {
                        conversion_at = Some(j)
                    }
                    ':' if depth == 0 && spec_at.is_none() => spec_at = Some(j),
                    _ => {}
                }
            }
            j += 1;
        }

        let expr_end = conversion_at.or(spec_at).unwrap_or(j);
        let expr_src: String = chars[start..expr_end].iter().collect();
        if expr_src.trim().is_empty() {
            return Err(SyntaxError::new(line, "f-string: empty expression not allowed"));
        }
        let repr = match conversion_at {
            Some(at) => {
                let conv: String = chars[at + 1..spec_at.unwrap_or(j)].iter().collect();
                match conv.as_str() {
                    "r" => true,
                    "s" => false,
                    _ => return Err(SyntaxError::new(line, "f-string: invalid conversion character")),
                }
            }
            None => false,
        };
        let spec = spec_at.map(|at| chars[at + 1..j].iter().collect::<String>());

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(FStringPart::Expr {
            expr: parse_embedded(&expr_src, line)?,
            repr,
            spec,
        });
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

fn parse_embedded(source: &str, line: u32) -> PResult<Expr> {
    let relocate = |e: SyntaxError| SyntaxError::new(line, format!("f-string: {}", e.message));
    let tokens = tokenize(&format!("({})", source.trim())).map_err(relocate)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.test().map_err(relocate)?;
    match parser.peek() {
        Tok::Newline | Tok::Eof => Ok(expr),
        _ => Err(SyntaxError::new(line, "f-string: invalid expression")),
    }
}

fn to_target(expr: Expr, line: u32) -> PResult<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Attribute { value, attr } => Ok(Target::Attribute { value, attr }),
        Expr::Subscript { value, index } => Ok(Target::Subscript { value, index }),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Unpack(
            items
                .into_iter()
                .map(|e| to_target(e, line))
                .collect::<PResult<Vec<_>>>()?,
        )),
        _ => Err(SyntaxError::new(line, "cannot assign to expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Block {
        parse_program(source).unwrap()
    }

    #[test]
    fn semicolons_split_statements_on_one_line() {
        let body = parse("x = 1; y = x; print(y)");
        assert_eq!(body.len(), 3);
        assert!(body.iter().all(|s| s.line == 1));
    }

    #[test]
    fn precedence_and_power_associativity() {
        let body = parse("x = -2 ** 2 + 3 * 4");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::BinOp { op: BinOp::Add, left, .. } = value else {
            panic!("expected addition at the top");
        };
        assert!(matches!(**left, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn function_locals_cover_every_binding_form() {
        let source = "\
def f(a):
    b = 1
    c += 1
    for d, e in []:
        pass
    try:
        pass
    except ValueError as g:
        pass
    global h
    h = 2
    def inner():
        z = 0
    print(outer)
";
        let body = parse(source);
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!("expected a function");
        };
        let locals: Vec<&str> = def.locals.iter().map(String::as_str).collect();
        assert_eq!(locals, ["a", "b", "c", "d", "e", "g", "inner"]);
    }

    #[test]
    fn tuple_unpacking_and_chained_assignment() {
        let body = parse("a, b = b, a\nx = y = 0\n");
        let StmtKind::Assign { targets, .. } = &body[0].kind else {
            panic!()
        };
        assert!(matches!(&targets[0], Target::Unpack(items) if items.len() == 2));
        let StmtKind::Assign { targets, .. } = &body[1].kind else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn compound_statements_keep_header_lines() {
        let source = "def f(n, k=2):\n    if n > k:\n        return n\n    elif n == k:\n        return 0\n    else:\n        return -n\n";
        let body = parse(source);
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!()
        };
        assert_eq!(def.params.len(), 2);
        let StmtKind::If { branches, orelse } = &def.body[0].kind else {
            panic!()
        };
        assert_eq!(branches.iter().map(|b| b.line).collect::<Vec<_>>(), vec![2, 4]);
        assert!(orelse.is_some());
    }

    #[test]
    fn comprehensions_slices_and_lambdas() {
        parse("xs = [x * x for x in range(10) if x % 2 == 0]");
        parse("d = {k: v for k, v in pairs}");
        parse("total = sum(x for x in xs)");
        parse("ys = xs[1:-1:2]; zs = xs[:]; f = lambda a, b=1: a + b");
    }

    #[test]
    fn fstrings_parse_embedded_expressions() {
        let body = parse("s = f'{name!r} has {n:.2f} items {{literal}}'");
        let StmtKind::Assign { value: Expr::FString(parts), .. } = &body[0].kind else {
            panic!("expected f-string")
        };
        assert!(matches!(&parts[0], FStringPart::Expr { repr: true, spec: None, .. }));
        assert!(matches!(&parts[2], FStringPart::Expr { spec: Some(s), .. } if s == ".2f"));
        assert!(matches!(parts.last(), Some(FStringPart::Literal(t)) if t == " items {literal}"));
    }

    #[test]
    fn classes_and_try_blocks() {
        let source = "class Node(Base):\n    def __init__(self, v):\n        self.v = v\ntry:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    x = 0\nfinally:\n    pass\n";
        let body = parse(source);
        assert!(matches!(body[0].kind, StmtKind::ClassDef { .. }));
        let StmtKind::Try { handlers, finalbody, .. } = &body[1].kind else {
            panic!()
        };
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(finalbody.is_some());
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = parse_program("x = 1\ny = = 2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse_program("def f(*args):\n    pass").is_err());
        assert!(parse_program("with open('x') as f:\n    pass").is_err());
        assert!(parse_program("1 = x").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let source = format!("x = {}1{}", "(".repeat(5_000), ")".repeat(5_000));
        let err = parse_program(&source).unwrap_err();
        assert!(err.message.contains("nested"));
    }
}
