//! Environment-chain operations over the collector's environment heap.
//!
//! A *local* environment is a slot array reached by (depth, index) pairs the
//! resolver computed; the *global* environment at the root of every chain is
//! additionally keyed by name through the globals table. Reads hand out
//! duplicates so the stored value and the expression result are distinct
//! cells, as assignment semantics require.

use std::fmt::Write as _;

use log::debug;

use crate::error::RuntimeError;
use crate::gc::{EnvRef, GarbageCollector, ValueRef, ENV_MAX_CAPACITY};
use crate::token::Token;

impl GarbageCollector {
    /// Creates the global environment. Called once per interpreter.
    pub fn env_init_global(&mut self) -> EnvRef {
        let globals = self
            .get_environment(None)
            .expect("environment pool empty at startup");
        self.set_globals(globals);
        globals
    }

    /// Creates a child environment, or fails when the environment cap is
    /// exhausted (reported as a stack overflow at the call site).
    pub fn env_init(&mut self, enclosing: EnvRef) -> Option<EnvRef> {
        self.get_environment(Some(enclosing))
    }

    /// Tells the collector this environment no longer forces its slots
    /// live; closures referencing it keep it reachable.
    pub fn env_release(&mut self, env: EnvRef) {
        self.env_mut(env).is_active = false;
    }

    pub fn env_is_global(&self, env: EnvRef) -> bool {
        self.env(env).enclosing.is_none()
    }

    pub fn env_slots_used(&self, env: EnvRef) -> usize {
        self.env(env).slots.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Definition
    // ─────────────────────────────────────────────────────────────────────

    /// Defines a variable named by `name` in `env`; `None` stands for a
    /// declared-but-unassigned variable.
    pub fn env_define(
        &mut self,
        name: &Token,
        value: Option<ValueRef>,
        env: EnvRef,
    ) -> Result<(), RuntimeError> {
        if self.env_is_global(env) {
            self.env_define_global(name, value)
        } else if self.env_define_local(value, env) {
            Ok(())
        } else {
            Err(RuntimeError::new(
                name.line,
                "Too many constants in one chunk.",
            ))
        }
    }

    /// Appends `value` to the next free slot. Returns false on capacity
    /// overflow.
    #[must_use]
    pub fn env_define_local(&mut self, value: Option<ValueRef>, env: EnvRef) -> bool {
        debug_assert!(!self.env_is_global(env));
        let cell = self.env_mut(env);
        if cell.slots.len() < ENV_MAX_CAPACITY {
            cell.slots.push(value);
            true
        } else {
            false
        }
    }

    /// Defines a global variable. Redefinition is allowed and reuses the
    /// existing slot.
    pub fn env_define_global(
        &mut self,
        name: &Token,
        value: Option<ValueRef>,
    ) -> Result<(), RuntimeError> {
        let globals = self.globals();
        let known = self.global_names.get(name.identifier_name()).copied();
        let slot = match known {
            Some(slot) => slot,
            None => {
                let slot = self.env(globals).slots.len();
                if slot == ENV_MAX_CAPACITY {
                    return Err(RuntimeError::new(
                        name.line,
                        "Too many constants in one chunk.",
                    ));
                }
                self.env_mut(globals).slots.push(None);
                self.global_names
                    .insert(name.identifier_name().to_string(), slot as u32);
                slot as u32
            }
        };

        debug!("Defining global '{}' in slot {}", name.identifier_name(), slot);
        self.env_mut(globals).slots[slot as usize] = value;
        Ok(())
    }

    /// Installs a native binding. Only used during interpreter startup,
    /// before user code can fill the globals table.
    pub fn env_define_native(&mut self, name: &str, value: ValueRef) {
        let globals = self.globals();
        let slot = self.env(globals).slots.len();
        debug_assert!(slot < ENV_MAX_CAPACITY);
        debug_assert!(!self.global_names.contains_key(name));
        self.env_mut(globals).slots.push(Some(value));
        self.global_names.insert(name.to_string(), slot as u32);
    }

    /// Binds `this` in the slot-0 position of a method-binding environment.
    pub fn env_define_this(&mut self, value: ValueRef, env: EnvRef) {
        debug_assert!(!self.env_is_global(env));
        debug_assert!(self.env(env).slots.is_empty());
        self.env_mut(env).slots.push(Some(value));
    }

    /// Binds `super` in the slot-0 position of a subclass-body environment.
    pub fn env_define_super(&mut self, value: ValueRef, env: EnvRef) {
        debug_assert!(!self.env_is_global(env));
        debug_assert!(self.env(env).slots.is_empty());
        self.env_mut(env).slots.push(Some(value));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access by (depth, index)
    // ─────────────────────────────────────────────────────────────────────

    fn env_ancestor(&self, distance: usize, env: EnvRef) -> EnvRef {
        let mut env = env;
        for _ in 0..distance {
            env = self
                .env(env)
                .enclosing
                .expect("resolver guarantees well-formed depths");
        }
        env
    }

    /// Reads the variable at (`distance`, `index`) relative to `env`,
    /// returning a duplicate of its value. A declared-but-unassigned slot
    /// yields nil, or an error under strict-uninitialized configuration.
    pub fn env_get_at(
        &mut self,
        identifier: &Token,
        distance: usize,
        index: usize,
        env: EnvRef,
    ) -> Result<ValueRef, RuntimeError> {
        let target = self.env_ancestor(distance, env);
        debug_assert!(index < self.env(target).slots.len());
        let stored = self.env(target).slots[index];
        match stored {
            Some(value) => Ok(self.dup(value)),
            None => self.uninitialized(identifier),
        }
    }

    /// Assigns the slot at (`distance`, `index`) relative to `env`.
    pub fn env_assign_at(&mut self, value: ValueRef, distance: usize, index: usize, env: EnvRef) {
        let target = self.env_ancestor(distance, env);
        debug_assert!(index < self.env(target).slots.len());
        self.env_mut(target).slots[index] = Some(value);
    }

    /// Reads slot 0 of `closure`: the `this` binding of a bound method.
    pub fn env_this(&mut self, closure: EnvRef) -> ValueRef {
        let value = self.env(closure).slots[0].expect("'this' is always bound");
        self.dup(value)
    }

    pub(crate) fn env_assign_slot(&mut self, env: EnvRef, index: usize, value: Option<ValueRef>) {
        self.env_mut(env).slots[index] = value;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access by name (globals)
    // ─────────────────────────────────────────────────────────────────────

    pub fn env_get_global(&mut self, identifier: &Token) -> Result<ValueRef, RuntimeError> {
        let globals = self.globals();
        let slot = self.global_names.get(identifier.identifier_name()).copied();
        match slot {
            Some(slot) => {
                let stored = self.env(globals).slots[slot as usize];
                match stored {
                    Some(value) => Ok(self.dup(value)),
                    None => self.uninitialized(identifier),
                }
            }
            None => Err(undefined_variable(identifier)),
        }
    }

    pub fn env_assign_global(
        &mut self,
        identifier: &Token,
        value: ValueRef,
    ) -> Result<(), RuntimeError> {
        let globals = self.globals();
        let slot = self.global_names.get(identifier.identifier_name()).copied();
        match slot {
            Some(slot) => {
                self.env_mut(globals).slots[slot as usize] = Some(value);
                Ok(())
            }
            None => Err(undefined_variable(identifier)),
        }
    }

    fn uninitialized(&mut self, identifier: &Token) -> Result<ValueRef, RuntimeError> {
        if self.strict_uninitialized {
            Err(RuntimeError::new(
                identifier.line,
                format!(
                    "Accessing uninitialized variable '{}'.",
                    identifier.identifier_name()
                ),
            ))
        } else {
            Ok(self.new_nil())
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reports
    // ─────────────────────────────────────────────────────────────────────

    /// Renders the environment chain starting at `env`, the way the `env()`
    /// native presents it.
    pub fn env_report_all(&self, env: EnvRef) -> String {
        let mut report = String::from("\n--- Environment Report -------\n");
        let mut current = Some(env);
        while let Some(env) = current {
            self.env_report(env, &mut report);
            current = self.env(env).enclosing;
        }
        report.push_str("--- Environment Report end ---");
        report
    }

    fn env_report(&self, env: EnvRef, report: &mut String) {
        if self.env_is_global(env) {
            let _ = writeln!(
                report,
                "Global environment - {} symbols defined",
                self.env(env).slots.len()
            );
            let mut names: Vec<(&str, u32)> = self
                .global_names
                .iter()
                .map(|(name, &slot)| (name.as_str(), slot))
                .collect();
            names.sort_by_key(|&(_, slot)| slot);
            for (name, slot) in names {
                let value = self.env(env).slots[slot as usize];
                let _ = writeln!(report, " {}. {}: {}", slot, name, self.describe_slot(value));
            }
        } else {
            let _ = writeln!(
                report,
                "Environment id: {:?}, {} symbols defined",
                env,
                self.env(env).slots.len()
            );
            for (slot, value) in self.env(env).slots.iter().enumerate() {
                let _ = writeln!(report, " {}. {}", slot, self.describe_slot(*value));
            }
        }
    }

    fn describe_slot(&self, value: Option<ValueRef>) -> String {
        match value {
            Some(value) => self.describe(value),
            None => "nil".to_string(),
        }
    }
}

fn undefined_variable(identifier: &Token) -> RuntimeError {
    RuntimeError::new(
        identifier.line,
        format!("Undefined variable '{}'.", identifier.identifier_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;
    use crate::value::ValueKind;

    fn identifier(name: &str) -> Token {
        Token::new(TokenType::IDENTIFIER, name.to_string(), 1)
    }

    #[test]
    fn globals_define_get_assign() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let name = identifier("answer");
        let value = gc.new_number(42.0);
        gc.env_define_global(&name, Some(value)).unwrap();

        let read = gc.env_get_global(&name).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Number(n) if *n == 42.0));
        // Reads hand out duplicates, not the stored cell.
        assert_ne!(read, value);

        let replacement = gc.new_number(7.0);
        gc.env_assign_global(&name, replacement).unwrap();
        let read = gc.env_get_global(&name).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Number(n) if *n == 7.0));
    }

    #[test]
    fn global_redefinition_reuses_the_slot() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let name = identifier("x");
        let first = gc.new_number(1.0);
        let second = gc.new_number(2.0);
        gc.env_define_global(&name, Some(first)).unwrap();
        gc.env_define_global(&name, Some(second)).unwrap();

        assert_eq!(gc.env_slots_used(gc.globals()), 1);
        let read = gc.env_get_global(&name).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Number(n) if *n == 2.0));
    }

    #[test]
    fn undefined_global_reads_and_writes_error() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let name = identifier("missing");
        let err = gc.env_get_global(&name).unwrap_err();
        assert_eq!(err.message, "Undefined variable 'missing'.");

        let value = gc.new_nil();
        let err = gc.env_assign_global(&name, value).unwrap_err();
        assert_eq!(err.message, "Undefined variable 'missing'.");
    }

    #[test]
    fn local_slots_index_in_declaration_order() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();
        let env = gc.env_init(globals).unwrap();

        let a = gc.new_number(1.0);
        let b = gc.new_number(2.0);
        assert!(gc.env_define_local(Some(a), env));
        assert!(gc.env_define_local(Some(b), env));

        let name = identifier("b");
        let read = gc.env_get_at(&name, 0, 1, env).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Number(n) if *n == 2.0));

        let c = gc.new_number(3.0);
        gc.env_assign_at(c, 0, 0, env);
        let name = identifier("a");
        let read = gc.env_get_at(&name, 0, 0, env).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Number(n) if *n == 3.0));
    }

    #[test]
    fn depth_walks_the_enclosing_chain() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();
        let outer = gc.env_init(globals).unwrap();
        let inner = gc.env_init(outer).unwrap();

        let value = gc.new_string("outer".to_string());
        assert!(gc.env_define_local(Some(value), outer));

        let name = identifier("v");
        let read = gc.env_get_at(&name, 1, 0, inner).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Str(s) if s == "outer"));
    }

    #[test]
    fn uninitialized_reads_default_to_nil() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();
        let env = gc.env_init(globals).unwrap();
        assert!(gc.env_define_local(None, env));

        let name = identifier("unset");
        let read = gc.env_get_at(&name, 0, 0, env).unwrap();
        assert!(matches!(gc.value(read), ValueKind::Nil));
    }

    #[test]
    fn uninitialized_reads_error_when_strict() {
        let mut gc = GarbageCollector::new();
        gc.strict_uninitialized = true;
        let globals = gc.env_init_global();
        let env = gc.env_init(globals).unwrap();
        assert!(gc.env_define_local(None, env));

        let name = identifier("unset");
        let err = gc.env_get_at(&name, 0, 0, env).unwrap_err();
        assert_eq!(err.message, "Accessing uninitialized variable 'unset'.");
    }

    #[test]
    fn local_capacity_overflow_is_reported() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();
        let env = gc.env_init(globals).unwrap();

        let filler = gc.new_nil();
        for _ in 0..ENV_MAX_CAPACITY {
            assert!(gc.env_define_local(Some(filler), env));
        }

        let name = identifier("overflow");
        let err = gc.env_define(&name, Some(filler), env).unwrap_err();
        assert_eq!(err.message, "Too many constants in one chunk.");
    }
}
