//! Mark-and-sweep garbage collector over the value and environment heaps.
//!
//! Storage is index-addressed: value cells, environment cells, and the
//! function/class/instance payload arenas all hand out `Copy` reference
//! newtypes. Cells carry intrusive `next` links forming the live list, the
//! free list, and (during sweep) the laundry list, so a collection never has
//! to touch recycled storage.
//!
//! # Collection
//!
//! Roots are (a) every value on the pin stack, (b) every environment flagged
//! *active* plus everything transitively reachable through its slots and its
//! enclosing chain. Reference payloads propagate marks: a function marks its
//! closure, a class marks its method closures and superclass, an instance
//! marks its fields and class.
//!
//! Sweeping releases unmarked value cells. A function/class/instance payload
//! can be shared by several cells; the first swept wrapper whose payload is
//! neither visited nor already recycled queues the cell on the *laundry
//! list* and stamps the payload with the recycled mark, so later wrappers of
//! the same payload short-circuit. The laundry list is drained after the
//! main sweep, freeing the payloads. Unmarked environments go back on the
//! environment free list with their slots cleared.
//!
//! Marks are two integers (visited, recycled) bumped in lockstep after every
//! collection, so stale marks never need a clearing pass.
//!
//! # Pacing
//!
//! An allocation that finds its free list empty collects once the live count
//! reaches the current threshold; after a collection each threshold resets
//! to `max(2 × live, total)`. Pages backing the value pool are never
//! returned before the collector is dropped.

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info};

use crate::ast::FunctionDecl;
use crate::value::{ClassPayload, FunctionPayload, InstancePayload, ValueKind};

/// Slots per environment (255 locals plus one for `this`/`super`).
pub const ENV_MAX_CAPACITY: usize = 256;

/// Most local variables a single scope may declare.
pub const MAX_LOCAL_VARIABLES: usize = 255;

/// Hard cap on simultaneously allocated environments.
pub const MAX_ENVIRONMENTS: usize = 31 * 1024;

/// Depth of the pin stack.
pub const LOCKS_STACK_SIZE: usize = 4096;

/// Value cells added per page allocation.
const VALUES_PER_PAGE: usize = 256;

const INITIAL_ENVIRONMENTS_THRESHOLD: usize = 32;

/// Cells with this mark are considered unmarked.
const GC_CLEAR: i32 = -1;

/// Marks wrap here so they never collide with `GC_CLEAR`.
const MARK_WRAP: i32 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvRef(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunRef(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassRef(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstRef(u32);

#[derive(Debug)]
struct ValueCell {
    kind: ValueKind,
    marked: i32,
    next: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct EnvCell {
    pub(crate) enclosing: Option<EnvRef>,
    pub(crate) slots: Vec<Option<ValueRef>>,
    pub(crate) is_active: bool,
    marked: i32,
    next: Option<u32>,
}

/// Counters reported after each cycle.
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub cycles: u64,
    pub recycled_values: u64,
    pub recycled_environments: u64,
}

pub struct GarbageCollector {
    values: Vec<ValueCell>,
    first_value: Option<u32>,
    first_unused_value: Option<u32>,
    laundry_list: Option<u32>,
    values_count: usize,
    max_values: usize,
    active_values: usize,

    environments: Vec<EnvCell>,
    first_environment: Option<u32>,
    first_unused_environment: Option<u32>,
    environments_count: usize,
    max_environments: usize,
    active_environments: usize,

    functions: Vec<Option<FunctionPayload>>,
    free_functions: Vec<u32>,
    classes: Vec<Option<ClassPayload>>,
    free_classes: Vec<u32>,
    instances: Vec<Option<InstancePayload>>,
    free_instances: Vec<u32>,

    locked: Vec<ValueRef>,

    visited_mark: i32,
    recycled_mark: i32,

    globals_env: Option<EnvRef>,
    /// Name → slot index into the globals environment.
    pub(crate) global_names: HashMap<String, u32>,

    /// When set, reading a defined-but-unassigned variable is a runtime
    /// error instead of `nil`.
    pub strict_uninitialized: bool,

    stats: GcStats,
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl GarbageCollector {
    pub fn new() -> Self {
        info!("Initializing garbage collector");

        let mut collector = GarbageCollector {
            values: Vec::new(),
            first_value: None,
            first_unused_value: None,
            laundry_list: None,
            values_count: 0,
            max_values: 0,
            active_values: 0,

            environments: Vec::new(),
            first_environment: None,
            first_unused_environment: None,
            environments_count: 0,
            max_environments: INITIAL_ENVIRONMENTS_THRESHOLD,
            active_environments: 0,

            functions: Vec::new(),
            free_functions: Vec::new(),
            classes: Vec::new(),
            free_classes: Vec::new(),
            instances: Vec::new(),
            free_instances: Vec::new(),

            locked: Vec::with_capacity(LOCKS_STACK_SIZE),

            visited_mark: 0,
            recycled_mark: 1,

            globals_env: None,
            global_names: HashMap::new(),

            strict_uninitialized: false,

            stats: GcStats::default(),
        };

        collector.alloc_value_page();
        collector.alloc_value_page();

        collector
    }

    // ─────────────────────────────────────────────────────────────────────
    // Value allocation
    // ─────────────────────────────────────────────────────────────────────

    fn alloc_value_page(&mut self) {
        let base = self.values.len() as u32;
        for offset in 0..VALUES_PER_PAGE as u32 {
            self.values.push(ValueCell {
                kind: ValueKind::Nil,
                marked: GC_CLEAR,
                // Thread each fresh cell onto the free list.
                next: if offset + 1 < VALUES_PER_PAGE as u32 {
                    Some(base + offset + 1)
                } else {
                    self.first_unused_value
                },
            });
        }
        self.first_unused_value = Some(base);
        self.values_count += VALUES_PER_PAGE;

        if self.max_values < self.values_count {
            self.max_values = self.values_count;
        }
    }

    /// Allocates a fresh value cell. May trigger a collection, so every
    /// temporary the caller still needs must already be pinned or reachable.
    pub fn alloc_value(&mut self, kind: ValueKind) -> ValueRef {
        if self.first_unused_value.is_none() {
            if self.values_count >= self.max_values {
                self.collect();
            }
            if self.first_unused_value.is_none() {
                self.alloc_value_page();
            }
        }

        let index = self
            .first_unused_value
            .expect("value free list replenished");
        self.first_unused_value = self.values[index as usize].next;

        let cell = &mut self.values[index as usize];
        cell.kind = kind;
        cell.marked = GC_CLEAR;
        cell.next = self.first_value;
        self.first_value = Some(index);
        self.active_values += 1;

        ValueRef(index)
    }

    pub fn new_nil(&mut self) -> ValueRef {
        self.alloc_value(ValueKind::Nil)
    }

    pub fn new_boolean(&mut self, value: bool) -> ValueRef {
        self.alloc_value(ValueKind::Boolean(value))
    }

    pub fn new_number(&mut self, value: f64) -> ValueRef {
        self.alloc_value(ValueKind::Number(value))
    }

    pub fn new_string(&mut self, value: String) -> ValueRef {
        self.alloc_value(ValueKind::Str(value))
    }

    /// Duplicates a value: a fresh cell sharing the payload for reference
    /// kinds, deep-copying strings, copying primitives.
    pub fn dup(&mut self, value: ValueRef) -> ValueRef {
        let kind = self.value(value).clone();
        self.alloc_value(kind)
    }

    pub fn value(&self, value: ValueRef) -> &ValueKind {
        &self.values[value.0 as usize].kind
    }

    // ─────────────────────────────────────────────────────────────────────
    // Payload arenas
    // ─────────────────────────────────────────────────────────────────────

    /// Assembles a function payload: declaration, captured closure, and the
    /// initializer flag.
    pub fn function_init(
        &mut self,
        declaration: Rc<FunctionDecl>,
        closure: EnvRef,
        is_initializer: bool,
    ) -> FunRef {
        self.alloc_function(FunctionPayload {
            declaration,
            closure,
            is_initializer,
            marked: GC_CLEAR,
        })
    }

    /// Assembles a class payload. The arity of `init` is cached here,
    /// consulting the superclass when the class does not define its own.
    pub fn class_init(
        &mut self,
        name: String,
        superclass: Option<ClassRef>,
        methods: Vec<(String, FunRef)>,
    ) -> ClassRef {
        let init_arity = methods
            .iter()
            .find(|(method_name, _)| method_name == "init")
            .map(|&(_, function)| self.function(function).declaration.params.len())
            .or_else(|| superclass.map(|superclass| self.class(superclass).init_arity))
            .unwrap_or(0);

        self.alloc_class(ClassPayload {
            name,
            superclass,
            methods,
            init_arity,
            marked: GC_CLEAR,
        })
    }

    pub fn instance_init(&mut self, klass: ClassRef) -> InstRef {
        self.alloc_instance(InstancePayload {
            klass,
            fields: Vec::new(),
            marked: GC_CLEAR,
        })
    }

    /// Frees a method payload that was bound only for the duration of a
    /// class initializer call and never wrapped in a value cell.
    pub fn free_bound_method(&mut self, function: FunRef) {
        self.free_function(function);
    }

    fn alloc_function(&mut self, payload: FunctionPayload) -> FunRef {
        match self.free_functions.pop() {
            Some(index) => {
                self.functions[index as usize] = Some(payload);
                FunRef(index)
            }
            None => {
                self.functions.push(Some(payload));
                FunRef(self.functions.len() as u32 - 1)
            }
        }
    }

    fn alloc_class(&mut self, payload: ClassPayload) -> ClassRef {
        match self.free_classes.pop() {
            Some(index) => {
                self.classes[index as usize] = Some(payload);
                ClassRef(index)
            }
            None => {
                self.classes.push(Some(payload));
                ClassRef(self.classes.len() as u32 - 1)
            }
        }
    }

    fn alloc_instance(&mut self, payload: InstancePayload) -> InstRef {
        match self.free_instances.pop() {
            Some(index) => {
                self.instances[index as usize] = Some(payload);
                InstRef(index)
            }
            None => {
                self.instances.push(Some(payload));
                InstRef(self.instances.len() as u32 - 1)
            }
        }
    }

    pub fn function(&self, function: FunRef) -> &FunctionPayload {
        self.functions[function.0 as usize]
            .as_ref()
            .expect("function payload alive")
    }

    pub fn class(&self, class: ClassRef) -> &ClassPayload {
        self.classes[class.0 as usize]
            .as_ref()
            .expect("class payload alive")
    }

    pub fn instance(&self, instance: InstRef) -> &InstancePayload {
        self.instances[instance.0 as usize]
            .as_ref()
            .expect("instance payload alive")
    }

    pub fn instance_mut(&mut self, instance: InstRef) -> &mut InstancePayload {
        self.instances[instance.0 as usize]
            .as_mut()
            .expect("instance payload alive")
    }

    fn free_function(&mut self, function: FunRef) {
        self.functions[function.0 as usize] = None;
        self.free_functions.push(function.0);
    }

    fn free_class(&mut self, class: ClassRef) {
        let payload = self.classes[class.0 as usize]
            .take()
            .expect("class payload alive");
        // Method payloads are owned by their class.
        for (_, method) in payload.methods {
            self.free_function(method);
        }
        self.free_classes.push(class.0);
    }

    fn free_instance(&mut self, instance: InstRef) {
        self.instances[instance.0 as usize] = None;
        self.free_instances.push(instance.0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Environment allocation
    // ─────────────────────────────────────────────────────────────────────

    /// Returns a new environment, or `None` once the environment cap is
    /// reached (surfaced by the caller as a stack overflow).
    pub(crate) fn get_environment(&mut self, enclosing: Option<EnvRef>) -> Option<EnvRef> {
        if self.first_unused_environment.is_none()
            && self.environments_count >= self.max_environments
        {
            self.collect();
        }

        let index = match self.first_unused_environment {
            Some(index) => {
                self.first_unused_environment = self.environments[index as usize].next;
                index
            }
            None => {
                if self.environments_count >= MAX_ENVIRONMENTS {
                    return None;
                }
                self.environments.push(EnvCell {
                    enclosing: None,
                    slots: Vec::new(),
                    is_active: false,
                    marked: GC_CLEAR,
                    next: None,
                });
                self.environments_count += 1;
                self.environments.len() as u32 - 1
            }
        };

        let cell = &mut self.environments[index as usize];
        cell.enclosing = enclosing;
        cell.is_active = true;
        cell.marked = GC_CLEAR;
        cell.next = self.first_environment;
        self.first_environment = Some(index);
        self.active_environments += 1;

        Some(EnvRef(index))
    }

    pub(crate) fn env(&self, env: EnvRef) -> &EnvCell {
        &self.environments[env.0 as usize]
    }

    pub(crate) fn env_mut(&mut self, env: EnvRef) -> &mut EnvCell {
        &mut self.environments[env.0 as usize]
    }

    pub(crate) fn set_globals(&mut self, globals: EnvRef) {
        self.globals_env = Some(globals);
    }

    pub fn globals(&self) -> EnvRef {
        self.globals_env.expect("global environment initialized")
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pin stack
    // ─────────────────────────────────────────────────────────────────────

    /// Pins a value as a GC root. Returns false when the pin stack is full.
    #[must_use]
    pub fn lock(&mut self, value: ValueRef) -> bool {
        if self.locked.len() == LOCKS_STACK_SIZE {
            return false;
        }
        self.locked.push(value);
        true
    }

    pub fn pop_lock(&mut self) {
        debug_assert!(!self.locked.is_empty());
        self.locked.pop();
    }

    pub fn pop_locks(&mut self, count: usize) {
        debug_assert!(self.locked.len() >= count);
        let remaining = self.locked.len() - count;
        self.locked.truncate(remaining);
    }

    pub fn clear_locks(&mut self) {
        self.locked.clear();
    }

    pub fn locked_depth(&self) -> usize {
        self.locked.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mark
    // ─────────────────────────────────────────────────────────────────────

    fn mark_value(&mut self, value: ValueRef) {
        let cell = &mut self.values[value.0 as usize];
        if cell.marked == self.visited_mark {
            return;
        }
        cell.marked = self.visited_mark;

        match cell.kind {
            ValueKind::Function(function) => self.mark_function(function),
            ValueKind::Class(class) => self.mark_class(class),
            ValueKind::Instance(instance) => self.mark_instance(instance),
            _ => {}
        }
    }

    fn mark_function(&mut self, function: FunRef) {
        let payload = self.functions[function.0 as usize]
            .as_mut()
            .expect("function payload alive");
        payload.marked = self.visited_mark;
        let closure = payload.closure;
        self.mark_environment(closure);
    }

    fn mark_class(&mut self, class: ClassRef) {
        let (methods, superclass) = {
            let payload = self.classes[class.0 as usize]
                .as_mut()
                .expect("class payload alive");
            payload.marked = self.visited_mark;
            (
                payload
                    .methods
                    .iter()
                    .map(|&(_, method)| method)
                    .collect::<Vec<_>>(),
                payload.superclass,
            )
        };

        for method in methods {
            let closure = self.function(method).closure;
            self.mark_environment(closure);
        }

        if let Some(superclass) = superclass {
            if self.class(superclass).marked != self.visited_mark {
                self.mark_class(superclass);
            }
        }
    }

    fn mark_instance(&mut self, instance: InstRef) {
        let (fields, klass) = {
            let payload = self.instances[instance.0 as usize]
                .as_mut()
                .expect("instance payload alive");
            payload.marked = self.visited_mark;
            (
                payload
                    .fields
                    .iter()
                    .map(|&(_, value)| value)
                    .collect::<Vec<_>>(),
                payload.klass,
            )
        };

        for value in fields {
            self.mark_value(value);
        }
        if self.class(klass).marked != self.visited_mark {
            self.mark_class(klass);
        }
    }

    fn mark_environment(&mut self, env: EnvRef) {
        let index = env.0 as usize;
        if self.environments[index].marked == self.visited_mark {
            return;
        }
        self.environments[index].marked = self.visited_mark;

        for slot in 0..self.environments[index].slots.len() {
            if let Some(value) = self.environments[index].slots[slot] {
                self.mark_value(value);
            }
        }

        if let Some(enclosing) = self.environments[index].enclosing {
            self.mark_environment(enclosing);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sweep
    // ─────────────────────────────────────────────────────────────────────

    fn free_value_cell(&mut self, index: u32) {
        let cell = &mut self.values[index as usize];
        cell.kind = ValueKind::Nil;
        cell.marked = GC_CLEAR;
        cell.next = self.first_unused_value;
        self.first_unused_value = Some(index);
        self.stats.recycled_values += 1;
    }

    /// Recycles one swept cell. Cells wrapping a shared payload that has not
    /// been visited or recycled yet are parked on the laundry list instead,
    /// and the payload is stamped so later wrappers short-circuit.
    fn release_value(&mut self, index: u32) {
        match self.values[index as usize].kind {
            ValueKind::Function(function) => {
                let marked = self.function(function).marked;
                if marked != self.visited_mark && marked != self.recycled_mark {
                    self.functions[function.0 as usize]
                        .as_mut()
                        .expect("function payload alive")
                        .marked = self.recycled_mark;
                    self.values[index as usize].next = self.laundry_list;
                    self.laundry_list = Some(index);
                    return;
                }
            }

            ValueKind::Class(class) => {
                let marked = self.class(class).marked;
                if marked != self.visited_mark && marked != self.recycled_mark {
                    self.classes[class.0 as usize]
                        .as_mut()
                        .expect("class payload alive")
                        .marked = self.recycled_mark;
                    self.values[index as usize].next = self.laundry_list;
                    self.laundry_list = Some(index);
                    return;
                }
            }

            ValueKind::Instance(instance) => {
                let marked = self.instance(instance).marked;
                if marked != self.visited_mark && marked != self.recycled_mark {
                    self.instances[instance.0 as usize]
                        .as_mut()
                        .expect("instance payload alive")
                        .marked = self.recycled_mark;
                    self.values[index as usize].next = self.laundry_list;
                    self.laundry_list = Some(index);
                    return;
                }
            }

            _ => {}
        }

        self.free_value_cell(index);
    }

    fn sweep(&mut self) {
        // Release unmarked values off the live list.
        let mut previous: Option<u32> = None;
        let mut current = self.first_value;
        while let Some(index) = current {
            let next = self.values[index as usize].next;
            if self.values[index as usize].marked == self.visited_mark {
                previous = Some(index);
            } else {
                match previous {
                    Some(p) => self.values[p as usize].next = next,
                    None => self.first_value = next,
                }
                self.release_value(index);
                self.active_values -= 1;
            }
            current = next;
        }

        // Drain the laundry list, freeing the shared payloads.
        while let Some(index) = self.laundry_list {
            self.laundry_list = self.values[index as usize].next;
            match self.values[index as usize].kind {
                ValueKind::Function(function) => self.free_function(function),
                ValueKind::Class(class) => self.free_class(class),
                ValueKind::Instance(instance) => self.free_instance(instance),
                _ => unreachable!("only shared payloads reach the laundry list"),
            }
            self.free_value_cell(index);
        }

        // Recycle unmarked environments.
        let mut previous: Option<u32> = None;
        let mut current = self.first_environment;
        while let Some(index) = current {
            let next = self.environments[index as usize].next;
            if self.environments[index as usize].marked == self.visited_mark {
                previous = Some(index);
            } else {
                match previous {
                    Some(p) => self.environments[p as usize].next = next,
                    None => self.first_environment = next,
                }
                let cell = &mut self.environments[index as usize];
                cell.slots.clear();
                cell.enclosing = None;
                cell.is_active = false;
                cell.marked = GC_CLEAR;
                cell.next = self.first_unused_environment;
                self.first_unused_environment = Some(index);
                self.active_environments -= 1;
                self.stats.recycled_environments += 1;
            }
            current = next;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Collection
    // ─────────────────────────────────────────────────────────────────────

    pub fn collect(&mut self) {
        // Pinned values first.
        for pin in 0..self.locked.len() {
            let value = self.locked[pin];
            self.mark_value(value);
        }

        // Then everything reachable from active environments.
        let mut current = self.first_environment;
        while let Some(index) = current {
            let next = self.environments[index as usize].next;
            if self.environments[index as usize].is_active {
                self.mark_environment(EnvRef(index));
            }
            current = next;
        }

        self.sweep();

        self.max_values = usize::max(2 * self.active_values, self.values_count);
        self.max_environments =
            usize::max(2 * self.active_environments, self.environments_count);

        // Fresh marks for the next cycle; stale marks never match again.
        self.visited_mark += 2;
        self.recycled_mark += 2;
        if self.visited_mark == MARK_WRAP {
            self.visited_mark = 0;
            self.recycled_mark = 1;
        }

        self.stats.cycles += 1;
        debug!(
            "gc cycle {}: {} values live (threshold {}), {} environments live (threshold {})",
            self.stats.cycles,
            self.active_values,
            self.max_values,
            self.active_environments,
            self.max_environments
        );
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn active_values(&self) -> usize {
        self.active_values
    }

    pub fn active_environments(&self) -> usize {
        self.active_environments
    }

    #[cfg(test)]
    fn live_function_payloads(&self) -> usize {
        self.functions.iter().filter(|slot| slot.is_some()).count()
    }

    #[cfg(test)]
    fn live_class_payloads(&self) -> usize {
        self.classes.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionDecl;
    use crate::token::{Token, TokenType};
    use std::rc::Rc;

    fn dummy_declaration(name: &str) -> Rc<FunctionDecl> {
        Rc::new(FunctionDecl {
            name: Token::new(TokenType::IDENTIFIER, name.to_string(), 1),
            params: Vec::new(),
            body: Vec::new(),
        })
    }

    #[test]
    fn collection_reclaims_unreachable_values() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let keep = gc.new_number(1.0);
        let _drop1 = gc.new_number(2.0);
        let _drop2 = gc.new_string("garbage".to_string());

        assert!(gc.lock(keep));
        gc.collect();

        assert_eq!(gc.active_values(), 1);
        assert!(matches!(gc.value(keep), ValueKind::Number(n) if *n == 1.0));
        gc.pop_lock();
    }

    #[test]
    fn freed_cells_are_recycled() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let dropped = gc.new_number(3.0);
        gc.collect();

        // The free list hands the same cell back out.
        let reused = gc.new_number(4.0);
        assert_eq!(dropped, reused);
    }

    #[test]
    fn globals_slots_are_roots() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let value = gc.new_number(7.0);
        gc.env_define_native("seven", value);
        gc.collect();

        assert_eq!(gc.active_values(), 1);
        assert!(matches!(gc.value(value), ValueKind::Number(n) if *n == 7.0));
    }

    #[test]
    fn shared_payload_is_freed_once_through_the_laundry_list() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();

        let function = gc.function_init(dummy_declaration("f"), globals, false);
        let wrapper = gc.alloc_value(ValueKind::Function(function));
        let _duplicate = gc.dup(wrapper);
        assert_eq!(gc.live_function_payloads(), 1);

        // Both wrappers unreachable: the payload must be reclaimed exactly once.
        gc.collect();
        assert_eq!(gc.active_values(), 0);
        assert_eq!(gc.live_function_payloads(), 0);
    }

    #[test]
    fn reachable_wrapper_keeps_shared_payload() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();

        let function = gc.function_init(dummy_declaration("g"), globals, false);
        let wrapper = gc.alloc_value(ValueKind::Function(function));
        let duplicate = gc.dup(wrapper);
        gc.env_define_native("g", duplicate);

        // `wrapper` dies, but the payload is shared with the rooted duplicate.
        gc.collect();
        assert_eq!(gc.active_values(), 1);
        assert_eq!(gc.live_function_payloads(), 1);
    }

    #[test]
    fn class_free_releases_method_payloads() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();

        let method = gc.function_init(dummy_declaration("m"), globals, false);
        let class = gc.class_init(
            "Widget".to_string(),
            None,
            vec![("m".to_string(), method)],
        );
        let _wrapper = gc.alloc_value(ValueKind::Class(class));
        assert_eq!(gc.live_class_payloads(), 1);
        assert_eq!(gc.live_function_payloads(), 1);

        gc.collect();
        assert_eq!(gc.live_class_payloads(), 0);
        assert_eq!(gc.live_function_payloads(), 0);
    }

    #[test]
    fn pin_stack_bounds_and_clearing() {
        let mut gc = GarbageCollector::new();
        gc.env_init_global();

        let value = gc.new_nil();
        for _ in 0..LOCKS_STACK_SIZE {
            assert!(gc.lock(value));
        }
        assert!(!gc.lock(value));

        gc.clear_locks();
        assert_eq!(gc.locked_depth(), 0);
    }

    #[test]
    fn released_environment_survives_through_closure() {
        let mut gc = GarbageCollector::new();
        let globals = gc.env_init_global();

        let captured = gc.env_init(globals).expect("environment available");
        let value = gc.new_number(9.0);
        assert!(gc.env_define_local(Some(value), captured));

        let function = gc.function_init(dummy_declaration("closure"), captured, false);
        let wrapper = gc.alloc_value(ValueKind::Function(function));
        gc.env_define_native("closure", wrapper);

        // The block exits, but the function above still closes over it.
        gc.env_release(captured);
        gc.collect();

        assert!(matches!(gc.value(value), ValueKind::Number(n) if *n == 9.0));

        // Dropping the global binding makes the chain collectable.
        gc.env_assign_slot(globals, 0, None);
        gc.collect();
        assert_eq!(gc.active_environments(), 1);
    }
}
