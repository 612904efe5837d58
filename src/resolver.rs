//! Static resolution pass for the Lox interpreter.
//!
//! This module performs a single AST walk to:
//! 1. **Build lexical scopes**: maintains a stack of hash maps tracking
//!    declared (not yet defined) and fully defined names in each nested
//!    block, function, or class body, together with the slot index each
//!    name will occupy in its runtime environment.
//! 2. **Enforce static rules**: reports errors such as redeclaration in the
//!    same scope, reading a variable in its own initializer, invalid
//!    `return` outside functions, and illegal use of `this`/`super`.
//! 3. **Record bindings**: for every variable occurrence (`Variable`,
//!    `Assign`, `This`, `Super`, and the `Class` statement's own name),
//!    calls back into the interpreter to note the (depth, slot) pair under
//!    the node's identity. Occurrences found in no scope are globals and
//!    get no entry.
//!
//! The global scope is *not* on the stack. Unlike a syntax error, a
//! resolution error does not stop the walk: every error is reported and the
//! driver refuses to interpret afterwards.

use std::collections::HashMap;

use log::{debug, info};

use crate::ast::{Expr, FunctionDecl, NodeId, Stmt};
use crate::error::LoxError;
use crate::gc::MAX_LOCAL_VARIABLES;
use crate::interpreter::Interpreter;
use crate::token::Token;

/// Are we inside a user function? Used to validate `return`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    /// Not inside any class
    None,

    /// Inside a class declaration _without_ a superclass
    Class,

    /// Inside a class declaration _with_ a superclass
    Subclass,
}

#[derive(Debug)]
struct ScopeEntry {
    slot: u16,
    defined: bool,
}

type Scope = HashMap<String, ScopeEntry>;

/// Resolver: tracks scopes, enforces static rules, and *records* binding
/// (depth, slot) pairs by calling back into the interpreter.
pub struct Resolver<'interp> {
    interpreter: &'interp mut Interpreter,
    scopes: Vec<Scope>,
    current_function: FunctionType,
    current_class: ClassType,
    error_count: usize,
}

impl<'interp> Resolver<'interp> {
    /// Create a new resolver bound to the given interpreter.
    pub fn new(interpreter: &'interp mut Interpreter) -> Self {
        info!("Resolver instantiated");
        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            error_count: 0,
        }
    }

    /// Walk all top-level statements. Returns true when no error was
    /// reported.
    pub fn resolve(&mut self, statements: &[Stmt]) -> bool {
        info!(
            "Beginning resolve pass over {} statement(s)",
            statements.len()
        );
        for stmt in statements {
            self.resolve_stmt(stmt);
        }
        self.error_count == 0
    }

    pub fn had_error(&self) -> bool {
        self.error_count > 0
    }

    fn error(&mut self, token: &Token, message: &str) {
        eprintln!("{}", LoxError::resolve(token, message));
        self.error_count += 1;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Class {
                id,
                name,
                superclass,
                methods,
            } => self.resolve_class(*id, name, superclass.as_ref(), methods),

            Stmt::Block(statements) => {
                self.begin_scope();
                for s in statements {
                    self.resolve_stmt(s);
                }
                self.end_scope();
            }

            Stmt::Var { name, initializer } => {
                // Declared first, defined only after the initializer has
                // resolved: reads in between are the self-reference error.
                self.declare(name);
                if let Some(expr) = initializer {
                    self.resolve_expr(expr);
                }
                self.define(name);
            }

            Stmt::Function(declaration) => {
                // Declared and defined up front so the body can recurse.
                self.declare(&declaration.name);
                self.define(&declaration.name);
                self.resolve_function(FunctionType::Function, declaration);
            }

            Stmt::Expression(expr) | Stmt::Print(expr) => {
                self.resolve_expr(expr);
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Cannot return from top-level code.");
                }

                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Cannot return a value from an initializer.");
                    }
                    self.resolve_expr(expr);
                }
            }
        }
    }

    fn resolve_class(
        &mut self,
        id: NodeId,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[std::rc::Rc<FunctionDecl>],
    ) {
        // 1. Self-inheritance guard.
        if let Some(Expr::Variable {
            name: super_name, ..
        }) = superclass
        {
            if super_name.lexeme == name.lexeme {
                self.error(super_name, "A class cannot inherit from itself.");
            }
        }

        // 2. Declare & define the class name so methods can refer to it.
        self.declare(name);
        self.define(name);

        // 3. Save and enter the class context.
        let enclosing_class = self.current_class;
        self.current_class = if superclass.is_some() {
            ClassType::Subclass
        } else {
            ClassType::Class
        };

        // 4. Resolve the superclass and open the `super` scope above the
        //    method scopes.
        if let Some(superclass) = superclass {
            self.resolve_expr(superclass);
            self.begin_scope();
            self.insert_entry("super");
        }

        // 5. The implicit `this` scope sits directly around the methods.
        self.begin_scope();
        self.insert_entry("this");

        // 6. Each method resolves in its own function context; `init` gets
        //    the initializer rules.
        for method in methods {
            let kind = if method.name.lexeme == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(kind, method);
        }

        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        // 7. Bind the class statement itself so the evaluator can assign
        //    the finished class over the placeholder.
        self.resolve_local(id, name.identifier_name());
        self.current_class = enclosing_class;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => {
                self.resolve_expr(inner);
            }

            Expr::Unary { right, .. } => {
                self.resolve_expr(right);
            }

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }

            Expr::Variable { id, name } => {
                // Prevent reading a variable in its own initializer.
                let declared_not_defined = self
                    .scopes
                    .last()
                    .and_then(|scope| scope.get(name.identifier_name()))
                    .is_some_and(|entry| !entry.defined);
                if declared_not_defined {
                    self.error(name, "Cannot read local variable in its own initializer.");
                }

                self.resolve_local(*id, name.identifier_name());
            }

            Expr::Assign { id, name, value } => {
                // The right-hand side first, then the binding itself.
                self.resolve_expr(value);
                self.resolve_local(*id, name.identifier_name());
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }

            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Cannot use 'this' outside of a class.");
                    return;
                }

                self.resolve_local(*id, "this");
            }

            Expr::Get { object, .. } => {
                self.resolve_expr(object);
            }

            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }

            Expr::Super { id, keyword, .. } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Cannot use 'super' outside of a class.");
                    return;
                }
                if self.current_class != ClassType::Subclass {
                    self.error(keyword, "Cannot use 'super' in a class with no superclass.");
                    return;
                }

                self.resolve_local(*id, "super");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Function helper
    // ─────────────────────────────────────────────────────────────────────

    /// Enter a fresh scope for a function's parameters + body.
    fn resolve_function(&mut self, kind: FunctionType, declaration: &FunctionDecl) {
        let enclosing = self.current_function;
        self.current_function = kind;

        self.begin_scope();

        for param in &declaration.params {
            self.declare(param);
            self.define(param);
        }

        for stmt in &declaration.body {
            self.resolve_stmt(stmt);
        }

        self.end_scope();

        self.current_function = enclosing;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scope management
    // ─────────────────────────────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    #[inline]
    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Installs an implicit binding (`this`/`super`) as defined in the
    /// innermost scope. These occupy slot 0 of their scope by construction.
    fn insert_entry(&mut self, name: &str) {
        let scope = self.scopes.last_mut().expect("scope just pushed");
        let slot = scope.len() as u16;
        scope.insert(
            name.to_string(),
            ScopeEntry {
                slot,
                defined: true,
            },
        );
    }

    fn declare(&mut self, name: &Token) {
        // Global scope: declarations are unchecked.
        let Some(scope) = self.scopes.last() else {
            return;
        };

        if scope.contains_key(name.identifier_name()) {
            self.error(
                name,
                "Variable with this name already declared in this scope.",
            );
            return;
        }

        if scope.len() == MAX_LOCAL_VARIABLES {
            self.error(name, "Too many local variables in function.");
            return;
        }

        let slot = scope.len() as u16;
        self.scopes
            .last_mut()
            .expect("scope checked above")
            .insert(
                name.identifier_name().to_string(),
                ScopeEntry {
                    slot,
                    defined: false,
                },
            );
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(entry) = scope.get_mut(name.identifier_name()) {
                entry.defined = true;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Binding helper
    // ─────────────────────────────────────────────────────────────────────

    /// Record this occurrence as a local at the depth and slot where the
    /// name is found, or leave it unrecorded (a global) when no scope has
    /// it.
    fn resolve_local(&mut self, id: NodeId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(entry) = scope.get(name) {
                debug!("Resolved '{}' at depth {} slot {}", name, depth, entry.slot);
                self.interpreter.note_local(id, depth, entry.slot as usize);
                return;
            }
        }

        debug!("Resolved '{}' as global", name);
    }
}
