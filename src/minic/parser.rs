//! Recursive descent parser for minic fragments.
//!
//! Names are resolved while parsing: locals by scope, everything else
//! through the session's declaration store, so a fragment sees exactly the
//! declarations committed before it plus its own.

use crate::ast::{
    AssignTarget, BinaryOp, Decl, DeclId, DeclKind, Expr, FunctionDecl, Stmt, UnaryOp, VarDecl,
};
use crate::frontend::{FrontendContext, ParseRequest};
use crate::transaction::DeclGroup;

use super::lexer::{Directive, Keyword, Lexer, Punct, Spanned, Token};

/// Expansions allowed at one position before a macro counts as recursive.
const MAX_EXPANSIONS: usize = 64;

#[derive(Debug)]
struct SyntaxError {
    offset: usize,
    message: String,
}

type PResult<T> = Result<T, SyntaxError>;

fn syntax_error(offset: usize, message: impl Into<String>) -> SyntaxError {
    SyntaxError {
        offset,
        message: message.into(),
    }
}

/// Parse one fragment, reporting the first problem as an error diagnostic.
pub(crate) fn parse_fragment(request: &ParseRequest<'_>, cx: &mut FrontendContext<'_>) {
    let tokens = match Lexer::new(request.source).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            cx.error(request.location(e.offset), e.message);
            return;
        }
    };
    let mut parser = Parser {
        tokens,
        pos: 0,
        expansions: 0,
        request,
        cx,
        scopes: Vec::new(),
        tentative: Vec::new(),
    };
    let result = match request.wrapper {
        Some(wrapper) => parser.wrapped(wrapper),
        None => parser.declarations(),
    };
    if let Err(e) = result {
        let location = request.location(e.offset);
        parser.cx.error(location, e.message);
    }
}

/// Statement-like input is wrapped; function declarations and anything
/// starting with `extern` or `inline` is not.
pub(crate) fn should_wrap(input: &str) -> bool {
    let Ok(tokens) = Lexer::new(input).tokenize() else {
        return false;
    };
    let mut rest = tokens
        .iter()
        .map(|s| &s.token)
        .skip_while(|t| matches!(t, Token::Directive(_)))
        .peekable();
    let first = rest.peek().map(|t| (*t).clone());
    match first {
        None | Some(Token::Eof) => false,
        Some(Token::Keyword(Keyword::Extern | Keyword::Inline)) => false,
        Some(Token::Keyword(k)) if k.is_type() => {
            while matches!(rest.peek(), Some(Token::Keyword(k)) if k.is_type()) {
                rest.next();
            }
            !matches!(
                (rest.next(), rest.next()),
                (Some(Token::Ident(_)), Some(Token::Punct(Punct::LParen)))
            )
        }
        _ => true,
    }
}

struct Parser<'p, 'cx> {
    tokens: Vec<Spanned>,
    pos: usize,
    expansions: usize,
    request: &'p ParseRequest<'p>,
    cx: &'p mut FrontendContext<'cx>,
    /// Local names, innermost scope last.
    scopes: Vec<Vec<String>>,
    /// Tentative definitions of this fragment, completed at its end.
    tentative: Vec<DeclId>,
}

fn binary_op(p: Punct) -> Option<(BinaryOp, u8)> {
    Some(match p {
        Punct::EqEq => (BinaryOp::Eq, 1),
        Punct::Ne => (BinaryOp::Ne, 1),
        Punct::Lt => (BinaryOp::Lt, 2),
        Punct::Le => (BinaryOp::Le, 2),
        Punct::Gt => (BinaryOp::Gt, 2),
        Punct::Ge => (BinaryOp::Ge, 2),
        Punct::Plus => (BinaryOp::Add, 3),
        Punct::Minus => (BinaryOp::Sub, 3),
        Punct::Star => (BinaryOp::Mul, 4),
        Punct::Slash => (BinaryOp::Div, 4),
        Punct::Percent => (BinaryOp::Rem, 4),
        _ => return None,
    })
}

impl Parser<'_, '_> {
    // === Tokens ===

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    /// Replace a macro name at the cursor by its expansion.
    fn expand(&mut self) -> PResult<()> {
        loop {
            let Spanned {
                token: Token::Ident(name),
                offset,
            } = &self.tokens[self.pos]
            else {
                return Ok(());
            };
            let (name, offset) = (name.clone(), *offset);
            let Some(body) = self.cx.decls().macro_definition(&name).map(|m| m.body.clone()) else {
                return Ok(());
            };
            self.expansions += 1;
            if self.expansions > MAX_EXPANSIONS {
                return Err(syntax_error(offset, format!("macro '{}' expands recursively", name)));
            }
            let mut expansion = Lexer::new(&body).tokenize().map_err(|e| {
                syntax_error(
                    offset,
                    format!("in expansion of macro '{}': {}", name, e.message),
                )
            })?;
            expansion.pop();
            if expansion.iter().any(|s| matches!(s.token, Token::Directive(_))) {
                return Err(syntax_error(offset, format!("macro '{}' expands to a directive", name)));
            }
            for t in &mut expansion {
                t.offset = offset;
            }
            self.tokens.splice(self.pos..self.pos + 1, expansion);
        }
    }

    fn peek(&mut self) -> PResult<Token> {
        self.expand()?;
        Ok(self.tokens[self.pos].token.clone())
    }

    fn bump(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
            self.expansions = 0;
        }
    }

    fn eat(&mut self, p: Punct) -> PResult<bool> {
        if self.peek()? == Token::Punct(p) {
            self.bump();
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, p: Punct) -> PResult<()> {
        let found = self.peek()?;
        if found == Token::Punct(p) {
            self.bump();
            return Ok(());
        }
        Err(syntax_error(self.offset(), format!("expected '{}', found {}", p, found)))
    }

    fn expect_ident(&mut self) -> PResult<(String, usize)> {
        let at = self.offset();
        match self.peek()? {
            Token::Ident(name) => {
                self.bump();
                Ok((name, at))
            }
            other => Err(syntax_error(at, format!("expected identifier, found {}", other))),
        }
    }

    fn end_statement(&mut self, optional: bool) -> PResult<()> {
        if optional && self.peek()? == Token::Eof {
            return Ok(());
        }
        self.expect(Punct::Semi)
    }

    fn process_directives(&mut self) -> PResult<()> {
        while let Token::Directive(directive) = self.peek()? {
            self.bump();
            match directive {
                Directive::Define { name, body } => {
                    if self.cx.decls().macro_definition(&name).is_some() {
                        self.cx.macro_undefined(&name);
                    }
                    self.cx.macro_defined(&name, &body);
                }
                Directive::Undef { name } => {
                    if self.cx.decls().macro_definition(&name).is_some() {
                        self.cx.macro_undefined(&name);
                    }
                }
            }
        }
        Ok(())
    }

    // === Names ===

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
    }

    fn declare_local(&mut self, name: &str, at: usize) -> PResult<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(syntax_error(at, "local declaration outside a function"));
        };
        if scope.iter().any(|n| n == name) {
            return Err(syntax_error(at, format!("redefinition of '{}'", name)));
        }
        scope.push(name.to_string());
        Ok(())
    }

    /// The visible definition of `name`, if any. Tentative definitions of
    /// the current fragment do not count yet.
    fn defined_before(&self, name: &str) -> Option<DeclId> {
        let decls = self.cx.decls();
        let mut cur = decls.lookup(name);
        while let Some(id) = cur {
            let defines = decls.get(id).is_some_and(|d| d.is_definition());
            if defines && !self.tentative.contains(&id) {
                return Some(id);
            }
            cur = decls.previous_declaration(id);
        }
        None
    }

    fn shadowing(&self) -> bool {
        self.cx.options().enable_shadowing
    }

    /// Register a finished declaration and hand it to the collector.
    fn publish(&mut self, decl: Decl) -> DeclId {
        let id = self.cx.decls_mut().insert(decl);
        self.cx.decls_mut().make_visible(id);
        id
    }

    fn hand_over(&mut self, id: DeclId) {
        if !self.cx.handle_top_level_decl(DeclGroup::from_elem(id, 1)) {
            self.cx.decls_mut().forget(id);
        }
    }

    // === Declarations ===

    fn declarations(&mut self) -> PResult<()> {
        loop {
            self.process_directives()?;
            match self.peek()? {
                Token::Eof => break,
                Token::Punct(Punct::Semi) => self.bump(),
                _ => self.external_declaration()?,
            }
        }
        for id in std::mem::take(&mut self.tentative) {
            let still_tentative = self
                .cx
                .decls()
                .get(id)
                .and_then(|d| d.as_var())
                .is_some_and(|v| v.is_tentative);
            if still_tentative {
                self.cx.complete_tentative_definition(id);
            }
        }
        Ok(())
    }

    fn type_specifier(&mut self) -> PResult<Keyword> {
        let at = self.offset();
        match self.peek()? {
            Token::Keyword(Keyword::Long) => {
                self.bump();
                // `long int` and `long long` are the same 64-bit type.
                if matches!(self.peek()?, Token::Keyword(Keyword::Int | Keyword::Long)) {
                    self.bump();
                }
                Ok(Keyword::Long)
            }
            Token::Keyword(k) if k.is_type() => {
                self.bump();
                Ok(k)
            }
            other => Err(syntax_error(at, format!("expected a declaration, found {}", other))),
        }
    }

    fn external_declaration(&mut self) -> PResult<()> {
        let mut is_extern = false;
        let mut is_inline = false;
        loop {
            match self.peek()? {
                Token::Keyword(Keyword::Extern) => is_extern = true,
                Token::Keyword(Keyword::Inline) => is_inline = true,
                _ => break,
            }
            self.bump();
        }
        let ty = self.type_specifier()?;
        let (name, at) = self.expect_ident()?;
        if self.eat(Punct::LParen)? {
            return self.function(name, at, ty, is_inline);
        }
        if is_inline {
            return Err(syntax_error(at, "'inline' can only appear on functions"));
        }
        if ty == Keyword::Void {
            return Err(syntax_error(at, format!("variable '{}' has incomplete type 'void'", name)));
        }
        self.global_var(name, at, is_extern)?;
        while self.eat(Punct::Comma)? {
            let (name, at) = self.expect_ident()?;
            self.global_var(name, at, is_extern)?;
        }
        self.expect(Punct::Semi)
    }

    fn check_kind(&self, name: &str, at: usize, function: bool) -> PResult<Option<DeclId>> {
        let prev = self.cx.decls().lookup(name);
        let clash = prev
            .and_then(|id| self.cx.decls().get(id))
            .is_some_and(|d| matches!(d.kind, DeclKind::Function(_)) != function);
        if clash && !self.shadowing() {
            return Err(syntax_error(
                at,
                format!("redefinition of '{}' as different kind of symbol", name),
            ));
        }
        Ok(if clash { None } else { prev })
    }

    fn global_var(&mut self, name: String, at: usize, is_extern: bool) -> PResult<()> {
        let prev = self.check_kind(&name, at, false)?;
        let init = if self.eat(Punct::Assign)? {
            Some(self.expression()?)
        } else {
            None
        };
        let defined = self.defined_before(&name);
        let tentative = init.is_none() && !is_extern;
        if init.is_some() && defined.is_some() && !self.shadowing() {
            return Err(syntax_error(at, format!("redefinition of '{}'", name)));
        }
        if init.is_some() || tentative {
            // An earlier tentative definition in this fragment becomes a
            // plain declaration of this one.
            for id in self.tentative.clone() {
                let Some(d) = self.cx.decls_mut().get_mut(id) else {
                    continue;
                };
                if d.name != name {
                    continue;
                }
                if let DeclKind::Var(v) = &mut d.kind {
                    v.is_tentative = false;
                    v.is_extern = true;
                }
            }
        }
        let decls = self.cx.decls();
        self.tentative.retain(|id| {
            decls
                .get(*id)
                .and_then(|d| d.as_var())
                .is_some_and(|v| v.is_tentative)
        });

        // A tentative definition after a real one merely redeclares it.
        let redeclaration = tentative && defined.is_some();
        let var = VarDecl {
            is_extern: (is_extern && init.is_none()) || redeclaration,
            init,
            is_tentative: tentative && !redeclaration,
        };
        let is_tentative = var.is_tentative;
        let mut decl = Decl::var(name.as_str(), var, self.request.location(at));
        if let Some(p) = prev.and_then(|id| self.cx.decls().get(id)) {
            decl.linkage_name = p.linkage_name.clone();
        }
        let id = self.publish(decl);
        if is_tentative {
            self.tentative.push(id);
        }
        self.hand_over(id);
        Ok(())
    }

    fn parameters(&mut self) -> PResult<Vec<String>> {
        let mut params: Vec<String> = Vec::new();
        if self.eat(Punct::RParen)? {
            return Ok(params);
        }
        if self.peek()? == Token::Keyword(Keyword::Void) {
            let save = self.pos;
            self.bump();
            if self.eat(Punct::RParen)? {
                return Ok(params);
            }
            self.pos = save;
        }
        loop {
            let at = self.offset();
            if self.type_specifier()? == Keyword::Void {
                return Err(syntax_error(at, "parameter has incomplete type 'void'"));
            }
            let (name, at) = self.expect_ident()?;
            if params.contains(&name) {
                return Err(syntax_error(at, format!("redefinition of parameter '{}'", name)));
            }
            params.push(name);
            if !self.eat(Punct::Comma)? {
                break;
            }
        }
        self.expect(Punct::RParen)?;
        Ok(params)
    }

    fn function(&mut self, name: String, at: usize, ret: Keyword, is_inline: bool) -> PResult<()> {
        let params = self.parameters()?;
        let prev = self.check_kind(&name, at, true)?;
        let has_body = self.peek()? == Token::Punct(Punct::LBrace);
        if !self.shadowing() {
            let arity = prev
                .and_then(|id| self.cx.decls().get(id))
                .and_then(|d| d.as_function())
                .map(|f| f.params.len());
            if arity.is_some_and(|n| n != params.len()) {
                return Err(syntax_error(at, format!("conflicting types for '{}'", name)));
            }
            if has_body && self.defined_before(&name).is_some() {
                return Err(syntax_error(at, format!("redefinition of '{}'", name)));
            }
        }

        let function = FunctionDecl {
            params: params.clone(),
            returns_void: ret == Keyword::Void,
            body: None,
            is_inline,
            result: None,
        };
        let mut decl = Decl::function(name.as_str(), function, self.request.location(at));
        if let Some(p) = prev.and_then(|id| self.cx.decls().get(id)) {
            decl.linkage_name = p.linkage_name.clone();
        }
        // Visible before the body is parsed so that it can call itself.
        let id = self.publish(decl);

        let body = if has_body {
            self.bump();
            self.scopes.push(params);
            let body = self.block_items();
            self.scopes.pop();
            body.map(Some)
        } else {
            self.expect(Punct::Semi).map(|_| None)
        };
        match body {
            Ok(body) => {
                if let Some(f) = self.cx.decls_mut().get_mut(id).and_then(|d| d.as_function_mut()) {
                    f.body = body;
                }
                self.hand_over(id);
                Ok(())
            }
            Err(e) => {
                self.cx.decls_mut().forget(id);
                Err(e)
            }
        }
    }

    fn wrapped(&mut self, wrapper: &str) -> PResult<()> {
        self.scopes.push(Vec::new());
        let mut body = Vec::new();
        loop {
            self.process_directives()?;
            if self.peek()? == Token::Eof {
                break;
            }
            self.statement_into(&mut body, true)?;
        }
        self.scopes.pop();
        let function = FunctionDecl {
            returns_void: true,
            body: Some(body),
            ..FunctionDecl::default()
        };
        let id = self.publish(Decl::function(wrapper, function, self.request.start));
        self.hand_over(id);
        Ok(())
    }

    // === Statements ===

    /// Statements up to and including the closing brace.
    fn block_items(&mut self) -> PResult<Vec<Stmt>> {
        let mut out = Vec::new();
        loop {
            self.process_directives()?;
            if self.eat(Punct::RBrace)? {
                return Ok(out);
            }
            if self.peek()? == Token::Eof {
                return Err(syntax_error(self.offset(), "expected '}'"));
            }
            self.statement_into(&mut out, false)?;
        }
    }

    fn statement_into(&mut self, out: &mut Vec<Stmt>, last_semi_optional: bool) -> PResult<()> {
        match self.peek()? {
            Token::Keyword(k) if k.is_type() => {
                self.local_declaration(out, last_semi_optional)
            }
            _ => {
                out.push(self.statement(last_semi_optional)?);
                Ok(())
            }
        }
    }

    fn local_declaration(&mut self, out: &mut Vec<Stmt>, last_semi_optional: bool) -> PResult<()> {
        let at = self.offset();
        if self.type_specifier()? == Keyword::Void {
            return Err(syntax_error(at, "variable has incomplete type 'void'"));
        }
        loop {
            let (name, at) = self.expect_ident()?;
            let init = if self.eat(Punct::Assign)? {
                Some(self.expression()?)
            } else {
                None
            };
            self.declare_local(&name, at)?;
            out.push(Stmt::Local { name, init });
            if !self.eat(Punct::Comma)? {
                break;
            }
        }
        self.end_statement(last_semi_optional)
    }

    fn statement(&mut self, last_semi_optional: bool) -> PResult<Stmt> {
        let at = self.offset();
        match self.peek()? {
            Token::Punct(Punct::Semi) => {
                self.bump();
                Ok(Stmt::Null)
            }
            Token::Punct(Punct::LBrace) => {
                self.bump();
                self.scopes.push(Vec::new());
                let items = self.block_items();
                self.scopes.pop();
                Ok(Stmt::Block(items?))
            }
            Token::Keyword(Keyword::If) => {
                self.bump();
                self.expect(Punct::LParen)?;
                let cond = self.expression()?;
                self.expect(Punct::RParen)?;
                let then_branch = Box::new(self.sub_statement()?);
                let else_branch = if self.peek()? == Token::Keyword(Keyword::Else) {
                    self.bump();
                    Some(Box::new(self.sub_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            Token::Keyword(Keyword::While) => {
                self.bump();
                self.expect(Punct::LParen)?;
                let cond = self.expression()?;
                self.expect(Punct::RParen)?;
                let body = Box::new(self.sub_statement()?);
                Ok(Stmt::While { cond, body })
            }
            Token::Keyword(Keyword::Return) => {
                self.bump();
                let value = match self.peek()? {
                    Token::Punct(Punct::Semi) | Token::Eof => None,
                    _ => Some(self.expression()?),
                };
                self.end_statement(last_semi_optional)?;
                Ok(Stmt::Return(value))
            }
            Token::Keyword(k @ (Keyword::Extern | Keyword::Inline)) => Err(syntax_error(
                at,
                format!("'{:?}' is not allowed here", k).to_lowercase(),
            )),
            _ => {
                let e = self.expression()?;
                self.end_statement(last_semi_optional)?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    fn sub_statement(&mut self) -> PResult<Stmt> {
        if let Token::Keyword(k) = self.peek()? {
            if k.is_type() {
                return Err(syntax_error(self.offset(), "declaration is not allowed here"));
            }
        }
        self.statement(false)
    }

    // === Expressions ===

    fn expression(&mut self) -> PResult<Expr> {
        let at = self.offset();
        let lhs = self.binary(1)?;
        if !self.eat(Punct::Assign)? {
            return Ok(lhs);
        }
        let value = Box::new(self.expression()?);
        let target = match lhs {
            Expr::Local(name) => AssignTarget::Local(name),
            Expr::DeclRef(id) => AssignTarget::Global(id),
            _ => return Err(syntax_error(at, "expression is not assignable")),
        };
        Ok(Expr::Assign { target, value })
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let Token::Punct(p) = self.peek()? else {
                break;
            };
            let Some((op, prec)) = binary_op(p) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek()? {
            Token::Punct(Punct::Minus) => UnaryOp::Neg,
            Token::Punct(Punct::Bang) => UnaryOp::Not,
            Token::Punct(Punct::Plus) => {
                self.bump();
                return self.unary();
            }
            _ => return self.primary(),
        };
        self.bump();
        let operand = Box::new(self.unary()?);
        Ok(Expr::Unary { op, operand })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let at = self.offset();
        match self.peek()? {
            Token::Int(n) => {
                self.bump();
                Ok(Expr::Int(n))
            }
            Token::Punct(Punct::LParen) => {
                self.bump();
                let e = self.expression()?;
                self.expect(Punct::RParen)?;
                Ok(e)
            }
            Token::Ident(name) => {
                self.bump();
                self.name_expression(name, at)
            }
            other => Err(syntax_error(at, format!("expected expression, found {}", other))),
        }
    }

    fn name_expression(&mut self, name: String, at: usize) -> PResult<Expr> {
        let is_call = self.peek()? == Token::Punct(Punct::LParen);
        if self.is_local(&name) {
            if is_call {
                return Err(syntax_error(at, format!("called object '{}' is not a function", name)));
            }
            return Ok(Expr::Local(name));
        }
        let Some(id) = self.cx.decls().lookup(&name) else {
            return Err(syntax_error(at, format!("use of undeclared identifier '{}'", name)));
        };
        let arity = self
            .cx
            .decls()
            .get(id)
            .and_then(|d| d.as_function())
            .map(|f| f.params.len());
        match (arity, is_call) {
            (None, false) => Ok(Expr::DeclRef(id)),
            (None, true) => Err(syntax_error(at, format!("called object '{}' is not a function", name))),
            (Some(_), false) => Err(syntax_error(at, format!("function '{}' used as a value", name))),
            (Some(expected), true) => {
                self.bump();
                let mut args = Vec::new();
                if !self.eat(Punct::RParen)? {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(Punct::Comma)? {
                            break;
                        }
                    }
                    self.expect(Punct::RParen)?;
                }
                if args.len() != expected {
                    let which = if args.len() < expected { "few" } else { "many" };
                    return Err(syntax_error(
                        at,
                        format!(
                            "too {} arguments to function call, expected {}, have {}",
                            which,
                            expected,
                            args.len()
                        ),
                    ));
                }
                Ok(Expr::Call { callee: id, args })
            }
        }
    }
}
