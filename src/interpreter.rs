//! The evaluator: a visitor-driven tree walker over the statement AST.
//!
//! The execution context carries the collector (which owns the value and
//! environment heaps), the current environment, and the resolver's
//! (depth, slot) side-table. Two non-local channels thread through the
//! walk: `return` travels as [`Control::Return`] back to the nearest
//! function frame, while runtime errors and the REPL's `quit()` travel as
//! [`Unwind`] all the way to [`Interpreter::interpret`], which resets the
//! current environment to globals and clears the pin stack.
//!
//! Pin discipline: any temporary that must survive a further evaluation
//! step (an operand while the other side evaluates, the callee and each
//! argument during a call, the receiver of a property set) is pushed on the
//! collector's pin stack first and popped when the step is over. Error
//! unwinds leave pins behind on purpose; the outermost handler clears them.

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Instant;

use log::{debug, info};

use crate::ast::{Expr, FunctionDecl, NodeId, Stmt};
use crate::error::RuntimeError;
use crate::gc::{ClassRef, EnvRef, FunRef, GarbageCollector, InstRef, ValueRef};
use crate::token::{Token, TokenType};
use crate::value::{Native, ValueKind, INSTANCE_MAX_FIELDS};

/// Non-local exits that unwind past statement boundaries.
#[derive(Debug)]
pub enum Unwind {
    /// Runtime error: unwinds to the outermost interpreter entry.
    Error(RuntimeError),

    /// `quit()` in the REPL: unwinds like an error, but is not one.
    Exit,
}

pub type EvalResult<T> = Result<T, Unwind>;

/// Result of executing a statement.
#[derive(Debug)]
pub enum Control {
    Normal,
    /// A `return` travelling to the nearest enclosing function frame.
    Return(ValueRef),
}

/// What a top-level interpretation run ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    RuntimeError,
    Exit,
}

/// A (depth, slot) pair recorded by the resolver.
#[derive(Debug, Clone, Copy)]
struct Local {
    depth: u16,
    slot: u16,
}

/// Callable kinds a call expression can dispatch to.
enum Dispatch {
    Native(Native),
    Function(FunRef),
    Class(ClassRef),
}

pub struct Interpreter {
    pub gc: GarbageCollector,
    globals: EnvRef,
    environment: EnvRef,
    /// Resolver side-table, keyed by AST node identity. Absent means global.
    locals: HashMap<NodeId, Local>,
    start: Instant,
    is_repl: bool,
    out: Box<dyn Write>,
}

impl Interpreter {
    pub fn new(is_repl: bool, strict_uninitialized: bool) -> Self {
        Self::with_output(is_repl, strict_uninitialized, Box::new(io::stdout()))
    }

    /// Interpreter writing `print` and native output to `out`; the tests
    /// capture it.
    pub fn with_output(is_repl: bool, strict_uninitialized: bool, out: Box<dyn Write>) -> Self {
        info!("Interpreter instantiated (repl={})", is_repl);

        let mut gc = GarbageCollector::new();
        gc.strict_uninitialized = strict_uninitialized;
        let globals = gc.env_init_global();

        let mut interpreter = Interpreter {
            gc,
            globals,
            environment: globals,
            locals: HashMap::new(),
            start: Instant::now(),
            is_repl,
            out,
        };

        interpreter.define_native("clock", 0, native_clock);
        if is_repl {
            interpreter.define_native("help", 0, native_help);
            interpreter.define_native("quit", 0, native_quit);
            interpreter.define_native("env", 0, native_env);
        }

        interpreter
    }

    fn define_native(&mut self, name: &'static str, arity: usize, call: crate::value::NativeFn) {
        let value = self
            .gc
            .alloc_value(ValueKind::Native(Native { name, arity, call }));
        self.gc.env_define_native(name, value);
    }

    /// Resolver callback: remember that node `id` binds at `depth`
    /// enclosing links, slot `slot`.
    pub fn note_local(&mut self, id: NodeId, depth: usize, slot: usize) {
        self.locals.insert(
            id,
            Local {
                depth: depth as u16,
                slot: slot as u16,
            },
        );
    }

    pub fn globals(&self) -> EnvRef {
        self.globals
    }

    pub fn environment(&self) -> EnvRef {
        self.environment
    }

    // ─────────────────────────────────────────────────────────────────────
    // Top-level entry
    // ─────────────────────────────────────────────────────────────────────

    /// Executes a statement list. On unwind the environment resets to
    /// globals, the pin stack is cleared, and runtime errors print their
    /// two-line diagnostic.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Outcome {
        for stmt in statements {
            match self.execute(stmt) {
                Ok(_) => {}

                Err(Unwind::Error(error)) => {
                    self.environment = self.globals;
                    self.gc.clear_locks();
                    eprintln!("{}", error.report());
                    return Outcome::RuntimeError;
                }

                Err(Unwind::Exit) => {
                    self.environment = self.globals;
                    self.gc.clear_locks();
                    return Outcome::Exit;
                }
            }
        }

        Outcome::Ok
    }

    fn throw<T>(&self, line: usize, message: impl Into<String>) -> EvalResult<T> {
        Err(Unwind::Error(RuntimeError::new(line, message)))
    }

    /// Pins a value, surfacing pin-stack exhaustion as a stack overflow.
    fn lock(&mut self, value: ValueRef, line: usize) -> EvalResult<()> {
        if !self.gc.lock(value) {
            return self.throw(line, "Stack overflow.");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────

    pub fn execute(&mut self, stmt: &Stmt) -> EvalResult<Control> {
        match stmt {
            Stmt::Expression(expr) => {
                // The result of the evaluation is discarded.
                self.evaluate(expr)?;
                Ok(Control::Normal)
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                let text = self.gc.stringify(value);
                let _ = writeln!(self.out, "{}", text);
                let _ = self.out.flush();
                Ok(Control::Normal)
            }

            Stmt::Var { name, initializer } => {
                let value: Option<ValueRef> = match initializer {
                    Some(expr) => Some(self.evaluate(expr)?),
                    None => None,
                };

                self.gc
                    .env_define(name, value, self.environment)
                    .map_err(Unwind::Error)?;
                Ok(Control::Normal)
            }

            Stmt::Block(statements) => {
                let Some(environment) = self.gc.env_init(self.environment) else {
                    return self.throw(0, "Stack overflow.");
                };

                let result = self.execute_block(statements, environment);
                self.gc.env_release(environment);
                result
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.evaluate(condition)?;
                if self.gc.is_truthy(condition) {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Control::Normal)
                }
            }

            Stmt::While { condition, body } => {
                loop {
                    let value = self.evaluate(condition)?;
                    if !self.gc.is_truthy(value) {
                        break;
                    }
                    if let ret @ Control::Return(_) = self.execute(body)? {
                        return Ok(ret);
                    }
                }
                Ok(Control::Normal)
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => self.gc.new_nil(),
                };
                Ok(Control::Return(value))
            }

            Stmt::Function(declaration) => {
                let function =
                    self.gc
                        .function_init(Rc::clone(declaration), self.environment, false);
                let value = self.gc.alloc_value(ValueKind::Function(function));
                self.gc
                    .env_define(&declaration.name, Some(value), self.environment)
                    .map_err(Unwind::Error)?;
                Ok(Control::Normal)
            }

            Stmt::Class {
                id,
                name,
                superclass,
                methods,
            } => {
                self.execute_class(*id, name, superclass.as_ref(), methods)?;
                Ok(Control::Normal)
            }
        }
    }

    /// Runs `statements` inside `environment`, restoring the previous
    /// environment afterwards. A `Return` stops the walk and bubbles.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: EnvRef,
    ) -> EvalResult<Control> {
        let previous = self.environment;
        self.environment = environment;

        let mut result = Control::Normal;
        for stmt in statements {
            match self.execute(stmt) {
                Ok(Control::Normal) => {}

                Ok(ret @ Control::Return(_)) => {
                    result = ret;
                    break;
                }

                Err(e) => {
                    self.environment = previous;
                    return Err(e);
                }
            }
        }

        self.environment = previous;
        Ok(result)
    }

    fn execute_class(
        &mut self,
        id: NodeId,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> EvalResult<()> {
        // The name is defined (unassigned) first so methods can close over
        // the class being declared.
        self.gc
            .env_define(name, None, self.environment)
            .map_err(Unwind::Error)?;

        let mut superclass_ref: Option<ClassRef> = None;
        let mut closure = self.environment;
        if let Some(superclass_expr) = superclass {
            let superclass_value = self.evaluate(superclass_expr)?;
            let ValueKind::Class(class) = *self.gc.value(superclass_value) else {
                return self.throw(name.line, "Superclass must be a class.");
            };
            superclass_ref = Some(class);

            // The methods of a subclass close over an intermediate
            // environment holding `super`.
            self.lock(superclass_value, name.line)?;
            let Some(environment) = self.gc.env_init(self.environment) else {
                return self.throw(name.line, "Stack overflow.");
            };
            self.gc.pop_lock();
            self.gc.env_define_super(superclass_value, environment);
            closure = environment;
        }

        let mut method_table: Vec<(String, FunRef)> = Vec::with_capacity(methods.len());
        for method in methods {
            let is_initializer = method.name.lexeme == "init";
            let function = self.gc.function_init(Rc::clone(method), closure, is_initializer);
            method_table.push((method.name.lexeme.clone(), function));
        }

        let class = self
            .gc
            .class_init(name.lexeme.clone(), superclass_ref, method_table);
        let class_value = self.gc.alloc_value(ValueKind::Class(class));

        self.assign_variable(name, id, class_value)?;

        // The `super` environment stays reachable through the method
        // closures from here on.
        if closure != self.environment {
            self.gc.env_release(closure);
        }

        debug!("Declared class '{}'", name.lexeme);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────

    pub fn evaluate(&mut self, expr: &Expr) -> EvalResult<ValueRef> {
        match expr {
            Expr::Literal(token) => self.evaluate_literal(token),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { op, right } => self.evaluate_unary(op, right),

            Expr::Binary { left, op, right } => self.evaluate_binary(left, op, right),

            Expr::Logical { left, op, right } => self.evaluate_logical(left, op, right),

            Expr::Variable { id, name } => self.look_up_variable(name, *id),

            Expr::This { id, keyword } => self.look_up_variable(keyword, *id),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                self.lock(value, name.line)?;
                let duplicate = self.gc.dup(value);
                self.lock(duplicate, name.line)?;
                self.assign_variable(name, *id, duplicate)?;
                self.gc.pop_locks(2);
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => self.evaluate_call(callee, paren, arguments),

            Expr::Get { object, name } => self.evaluate_get(object, name),

            Expr::Set {
                object,
                name,
                value,
            } => self.evaluate_set(object, name, value),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),
        }
    }

    fn evaluate_literal(&mut self, token: &Token) -> EvalResult<ValueRef> {
        match &token.token_type {
            TokenType::NUMBER(n) => Ok(self.gc.new_number(*n)),

            TokenType::STRING(s) => Ok(self.gc.new_string(s.clone())),

            TokenType::TRUE => Ok(self.gc.new_boolean(true)),

            TokenType::FALSE => Ok(self.gc.new_boolean(false)),

            TokenType::NIL => Ok(self.gc.new_nil()),

            _ => unreachable!("parser emits only literal tokens here"),
        }
    }

    fn evaluate_unary(&mut self, op: &Token, right: &Expr) -> EvalResult<ValueRef> {
        let right = self.evaluate(right)?;
        self.lock(right, op.line)?;

        let result = match op.token_type {
            TokenType::MINUS => {
                let ValueKind::Number(n) = *self.gc.value(right) else {
                    return self.throw(op.line, "Operand must be a number.");
                };
                self.gc.new_number(-n)
            }

            TokenType::BANG => {
                let truthy = self.gc.is_truthy(right);
                self.gc.new_boolean(!truthy)
            }

            _ => unreachable!("parser emits only unary operators here"),
        };

        self.gc.pop_lock();
        Ok(result)
    }

    // Operands evaluate left to right, and both evaluate before any type
    // checking.
    fn evaluate_binary(&mut self, left: &Expr, op: &Token, right: &Expr) -> EvalResult<ValueRef> {
        let left = self.evaluate(left)?;
        self.lock(left, op.line)?;

        let right = self.evaluate(right)?;
        self.lock(right, op.line)?;

        let result = match op.token_type {
            TokenType::GREATER => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                self.gc.new_boolean(a > b)
            }

            TokenType::GREATER_EQUAL => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                self.gc.new_boolean(a >= b)
            }

            TokenType::LESS => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                self.gc.new_boolean(a < b)
            }

            TokenType::LESS_EQUAL => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                self.gc.new_boolean(a <= b)
            }

            TokenType::MINUS => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                self.gc.new_number(a - b)
            }

            TokenType::PLUS => self.evaluate_plus(op, left, right)?,

            TokenType::SLASH => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                if b == 0.0 {
                    return self.throw(op.line, "Division by zero.");
                }
                self.gc.new_number(a / b)
            }

            TokenType::STAR => {
                let (a, b) = self.check_number_operands(op, left, right)?;
                self.gc.new_number(a * b)
            }

            TokenType::BANG_EQUAL => {
                let equal = self.gc.is_equal(left, right);
                self.gc.new_boolean(!equal)
            }

            TokenType::EQUAL_EQUAL => {
                let equal = self.gc.is_equal(left, right);
                self.gc.new_boolean(equal)
            }

            _ => unreachable!("parser emits only binary operators here"),
        };

        self.gc.pop_locks(2);
        Ok(result)
    }

    fn evaluate_plus(&mut self, op: &Token, left: ValueRef, right: ValueRef) -> EvalResult<ValueRef> {
        let kind = match (self.gc.value(left), self.gc.value(right)) {
            (ValueKind::Number(a), ValueKind::Number(b)) => ValueKind::Number(a + b),

            (ValueKind::Str(a), ValueKind::Str(b)) => ValueKind::Str(format!("{}{}", a, b)),

            // A number concatenated with a string stringifies the number.
            (ValueKind::Str(a), ValueKind::Number(b)) => {
                ValueKind::Str(format!("{}{}", a, crate::value::number_to_string(*b)))
            }

            (ValueKind::Number(a), ValueKind::Str(b)) => {
                ValueKind::Str(format!("{}{}", crate::value::number_to_string(*a), b))
            }

            _ => return self.throw(op.line, "Operands must be two numbers or two strings."),
        };

        Ok(self.gc.alloc_value(kind))
    }

    fn check_number_operands(
        &self,
        op: &Token,
        left: ValueRef,
        right: ValueRef,
    ) -> EvalResult<(f64, f64)> {
        match (self.gc.value(left), self.gc.value(right)) {
            (ValueKind::Number(a), ValueKind::Number(b)) => Ok((*a, *b)),
            _ => self.throw(op.line, "Operands must be numbers."),
        }
    }

    fn evaluate_logical(&mut self, left: &Expr, op: &Token, right: &Expr) -> EvalResult<ValueRef> {
        let left = self.evaluate(left)?;

        let short_circuits = match op.token_type {
            TokenType::OR => self.gc.is_truthy(left),
            TokenType::AND => !self.gc.is_truthy(left),
            _ => unreachable!("parser emits only logical operators here"),
        };
        if short_circuits {
            return Ok(left);
        }

        self.lock(left, op.line)?;
        let right = self.evaluate(right)?;
        self.gc.pop_lock();
        Ok(right)
    }

    fn look_up_variable(&mut self, name: &Token, id: NodeId) -> EvalResult<ValueRef> {
        match self.locals.get(&id) {
            Some(&Local { depth, slot }) => self
                .gc
                .env_get_at(name, depth as usize, slot as usize, self.environment)
                .map_err(Unwind::Error),

            None => self.gc.env_get_global(name).map_err(Unwind::Error),
        }
    }

    fn assign_variable(&mut self, name: &Token, id: NodeId, value: ValueRef) -> EvalResult<()> {
        match self.locals.get(&id) {
            Some(&Local { depth, slot }) => {
                self.gc
                    .env_assign_at(value, depth as usize, slot as usize, self.environment);
                Ok(())
            }

            None => self.gc.env_assign_global(name, value).map_err(Unwind::Error),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────

    // The callee expression is evaluated first, then all arguments from
    // left to right; each stays pinned until the call completes.
    fn evaluate_call(
        &mut self,
        callee: &Expr,
        paren: &Token,
        arguments: &[Expr],
    ) -> EvalResult<ValueRef> {
        let callee = self.evaluate(callee)?;
        self.lock(callee, paren.line)?;

        let mut args: Vec<ValueRef> = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let value = self.evaluate(argument)?;
            self.lock(value, paren.line)?;
            args.push(value);
        }

        let dispatch = match self.gc.value(callee) {
            ValueKind::Native(native) => Some(Dispatch::Native(*native)),
            ValueKind::Function(function) => Some(Dispatch::Function(*function)),
            ValueKind::Class(class) => Some(Dispatch::Class(*class)),
            _ => None,
        };

        let Some(dispatch) = dispatch else {
            return self.throw(paren.line, "Can only call functions and classes.");
        };

        let result = match dispatch {
            Dispatch::Native(native) => {
                self.check_arity(paren, native.arity, args.len())?;
                (native.call)(self, &args)?
            }

            Dispatch::Function(function) => {
                let arity = self.gc.function(function).declaration.params.len();
                self.check_arity(paren, arity, args.len())?;
                self.call_function(function, &args, paren)?
            }

            Dispatch::Class(class) => {
                let arity = self.gc.class(class).init_arity;
                self.check_arity(paren, arity, args.len())?;
                self.call_class(class, &args, paren)?
            }
        };

        self.gc.pop_locks(args.len() + 1);
        Ok(result)
    }

    fn check_arity(&self, paren: &Token, arity: usize, got: usize) -> EvalResult<()> {
        if arity != got {
            return self.throw(
                paren.line,
                format!("Expected {} arguments but got {}.", arity, got),
            );
        }
        Ok(())
    }

    /// Function invocation: a fresh environment enclosing the callee's
    /// closure, parameters defined in order, body executed inside it.
    /// Initializers ignore the travelling return value and yield `this`.
    fn call_function(
        &mut self,
        function: FunRef,
        args: &[ValueRef],
        paren: &Token,
    ) -> EvalResult<ValueRef> {
        let (declaration, closure, is_initializer) = {
            let payload = self.gc.function(function);
            (
                Rc::clone(&payload.declaration),
                payload.closure,
                payload.is_initializer,
            )
        };

        let Some(environment) = self.gc.env_init(closure) else {
            return self.throw(paren.line, "Stack overflow.");
        };

        for &arg in args {
            let defined = self.gc.env_define_local(Some(arg), environment);
            debug_assert!(defined, "arity is capped far below slot capacity");
        }

        let result = self.execute_block(&declaration.body, environment);
        self.gc.env_release(environment);
        let ret = result?;

        if is_initializer {
            return Ok(self.gc.env_this(closure));
        }

        match ret {
            Control::Return(value) => Ok(value),
            Control::Normal => Ok(self.gc.new_nil()),
        }
    }

    /// Class invocation: instantiate, then run a bound `init` if any
    /// ancestor provides one. The result is always the instance.
    fn call_class(&mut self, class: ClassRef, args: &[ValueRef], paren: &Token) -> EvalResult<ValueRef> {
        let instance = self.gc.instance_init(class);
        let instance_value = self.gc.alloc_value(ValueKind::Instance(instance));

        match self.find_method(class, "init") {
            Some(initializer) => {
                let (bound, bind_env) = self.bind_method(initializer, instance_value, paren.line)?;
                let result = self.call_function(bound, args, paren);
                self.gc.env_release(bind_env);
                self.gc.free_bound_method(bound);
                result
            }

            None => Ok(instance_value),
        }
    }

    /// Walks `class` and its ancestors for a method.
    fn find_method(&self, class: ClassRef, name: &str) -> Option<FunRef> {
        let mut current = Some(class);
        while let Some(class) = current {
            let payload = self.gc.class(class);
            if let Some(method) = payload.method(name) {
                return Some(method);
            }
            current = payload.superclass;
        }
        None
    }

    /// Produces a fresh function whose closure introduces `this` for the
    /// given instance at slot 0.
    fn bind_method(
        &mut self,
        method: FunRef,
        instance_value: ValueRef,
        line: usize,
    ) -> EvalResult<(FunRef, EnvRef)> {
        self.lock(instance_value, line)?;

        let (declaration, closure, is_initializer) = {
            let payload = self.gc.function(method);
            (
                Rc::clone(&payload.declaration),
                payload.closure,
                payload.is_initializer,
            )
        };

        let Some(environment) = self.gc.env_init(closure) else {
            return self.throw(line, "Stack overflow.");
        };
        self.gc.env_define_this(instance_value, environment);
        self.gc.pop_lock();

        let bound = self.gc.function_init(declaration, environment, is_initializer);
        Ok((bound, environment))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Properties
    // ─────────────────────────────────────────────────────────────────────

    fn evaluate_get(&mut self, object: &Expr, name: &Token) -> EvalResult<ValueRef> {
        let object = self.evaluate(object)?;

        let ValueKind::Instance(instance) = *self.gc.value(object) else {
            return self.throw(name.line, "Only instances have properties.");
        };

        self.lock(object, name.line)?;

        // Fields shadow methods.
        let field = self.gc.instance(instance).field(name.identifier_name());
        let result = if let Some(field) = field {
            self.gc.dup(field)
        } else {
            let klass = self.gc.instance(instance).klass;
            match self.find_method(klass, name.identifier_name()) {
                Some(method) => {
                    let (bound, bind_env) = self.bind_method(method, object, name.line)?;
                    let wrapper = self.gc.alloc_value(ValueKind::Function(bound));
                    self.gc.env_release(bind_env);
                    wrapper
                }

                None => {
                    self.gc.pop_lock();
                    return self.throw(
                        name.line,
                        format!("Undefined property '{}'.", name.identifier_name()),
                    );
                }
            }
        };

        self.gc.pop_lock();
        Ok(result)
    }

    fn evaluate_set(&mut self, object: &Expr, name: &Token, value: &Expr) -> EvalResult<ValueRef> {
        let object = self.evaluate(object)?;

        let ValueKind::Instance(instance) = *self.gc.value(object) else {
            return self.throw(name.line, "Only instances have fields.");
        };

        self.lock(object, name.line)?;
        let value = self.evaluate(value)?;
        self.lock(value, name.line)?;

        // The stored cell and the expression result are distinct values.
        let duplicate = self.gc.dup(value);
        self.set_field(instance, name, duplicate)?;

        self.gc.pop_locks(2);
        Ok(value)
    }

    fn set_field(&mut self, instance: InstRef, name: &Token, value: ValueRef) -> EvalResult<()> {
        let existing = self
            .gc
            .instance(instance)
            .fields
            .iter()
            .position(|(field, _)| field == name.identifier_name());

        match existing {
            Some(index) => {
                self.gc.instance_mut(instance).fields[index].1 = value;
                Ok(())
            }

            None => {
                if self.gc.instance(instance).fields.len() == INSTANCE_MAX_FIELDS {
                    return self.throw(name.line, "Too many fields on instance.");
                }
                self.gc
                    .instance_mut(instance)
                    .fields
                    .push((name.identifier_name().to_string(), value));
                Ok(())
            }
        }
    }

    fn evaluate_super(&mut self, id: NodeId, keyword: &Token, method: &Token) -> EvalResult<ValueRef> {
        let &Local { depth, slot } = self
            .locals
            .get(&id)
            .expect("resolver binds every legal 'super'");

        let superclass_value = self
            .gc
            .env_get_at(keyword, depth as usize, slot as usize, self.environment)
            .map_err(Unwind::Error)?;
        self.lock(superclass_value, keyword.line)?;

        // "this" is always one level nearer than "super"'s environment.
        let this_value = self
            .gc
            .env_get_at(keyword, depth as usize - 1, 0, self.environment)
            .map_err(Unwind::Error)?;
        self.lock(this_value, keyword.line)?;

        let ValueKind::Class(superclass) = *self.gc.value(superclass_value) else {
            unreachable!("'super' slots only ever hold classes");
        };

        match self.find_method(superclass, method.identifier_name()) {
            Some(found) => {
                let (bound, bind_env) = self.bind_method(found, this_value, keyword.line)?;
                let wrapper = self.gc.alloc_value(ValueKind::Function(bound));
                self.gc.env_release(bind_env);
                self.gc.pop_locks(2);
                Ok(wrapper)
            }

            None => self.throw(
                method.line,
                format!("Undefined property '{}'.", method.identifier_name()),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Native callables
// ─────────────────────────────────────────────────────────────────────────

// clock() returns the time elapsed in milliseconds since interpreter start.
fn native_clock(interpreter: &mut Interpreter, _args: &[ValueRef]) -> EvalResult<ValueRef> {
    let elapsed = interpreter.start.elapsed().as_secs_f64();
    Ok(interpreter.gc.new_number(elapsed * 1000.0))
}

// help() prints some help in the interpreter.
fn native_help(interpreter: &mut Interpreter, _args: &[ValueRef]) -> EvalResult<ValueRef> {
    let _ = writeln!(
        interpreter.out,
        "\nLoxi is an interpreter for the Lox language, as described on\n\
         http://www.craftinginterpreters.com/the-lox-language.html\n\n\
         Native functions:\n \
         clock() - returns the time (in msec) elapsed since the start\n \
         env()   - prints objects defined in current environment\n \
         help()  - prints this help\n \
         quit()  - exits the interpreter\n"
    );
    let _ = interpreter.out.flush();
    Ok(interpreter.gc.new_nil())
}

// env() prints all objects defined in the current environment chain.
fn native_env(interpreter: &mut Interpreter, _args: &[ValueRef]) -> EvalResult<ValueRef> {
    let report = interpreter.gc.env_report_all(interpreter.environment);
    let _ = writeln!(interpreter.out, "{}", report);
    let _ = interpreter.out.flush();
    Ok(interpreter.gc.new_nil())
}

// quit() exits the interpreter.
fn native_quit(interpreter: &mut Interpreter, _args: &[ValueRef]) -> EvalResult<ValueRef> {
    if interpreter.is_repl {
        Err(Unwind::Exit)
    } else {
        std::process::exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Stmt};

    fn token(token_type: TokenType, lexeme: &str) -> Token {
        Token::new(token_type, lexeme.to_string(), 1)
    }

    fn number(n: f64, lexeme: &str) -> Expr {
        Expr::Literal(token(TokenType::NUMBER(n), lexeme))
    }

    fn sink_interpreter() -> Interpreter {
        Interpreter::with_output(false, false, Box::new(io::sink()))
    }

    #[test]
    fn successful_statements_return_ok() {
        let mut interpreter = sink_interpreter();
        let statements = vec![Stmt::Print(Expr::Binary {
            left: Box::new(number(1.0, "1")),
            op: token(TokenType::PLUS, "+"),
            right: Box::new(number(2.0, "2")),
        })];

        assert_eq!(interpreter.interpret(&statements), Outcome::Ok);
        assert_eq!(interpreter.environment(), interpreter.globals());
        assert_eq!(interpreter.gc.locked_depth(), 0);
    }

    #[test]
    fn runtime_unwind_resets_environment_and_clears_pins() {
        let mut interpreter = sink_interpreter();
        let statements = vec![Stmt::Print(Expr::Binary {
            left: Box::new(number(1.0, "1")),
            op: token(TokenType::SLASH, "/"),
            right: Box::new(number(0.0, "0")),
        })];

        assert_eq!(interpreter.interpret(&statements), Outcome::RuntimeError);
        assert_eq!(interpreter.environment(), interpreter.globals());
        assert_eq!(interpreter.gc.locked_depth(), 0);
    }
}
