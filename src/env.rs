//! Lexically scoped environments.
//!
//! An environment is a chain of frames linked by parent handles. Each frame
//! holds two disjoint namespaces mapping names to mutable cells: `"v"` for
//! ordinary variables and `"m"` for macro transformers.
//!
//! ## Aliasing
//!
//! A binding whose value is an aggregate (list, pair, string, vector, hash
//! table) can be aliased: evaluating its name yields an internal
//! [`Value::Pointer`] at the binding, and defining another name to that
//! pointer makes the new name a view onto the same object. Each aliased
//! binding keeps a reverse-pointer set of its aliases so that rebinding the
//! canonical holder relocates the object instead of orphaning the aliases:
//! the oldest alias becomes the new canonical holder, the remaining aliases
//! are re-pointed at it, and the reverse-pointer set migrates with the value.
//!
//! In-place mutation (`vector-set!` and friends) does not rebind anything: it
//! writes through the pointer chain into the canonical cell with
//! [`update_object`], so every alias observes the new contents.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::Error;
use crate::ast::Value;

/// The two binding namespaces of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Ordinary variables, tag `"v"`
    Var,
    /// Macro transformers, tag `"m"`
    Macro,
}

impl Namespace {
    /// The fixed string tag of the namespace
    pub fn tag(self) -> &'static str {
        match self {
            Namespace::Var => "v",
            Namespace::Macro => "m",
        }
    }
}

/// A mutable binding cell.
type Cell = Rc<RefCell<Value>>;

/// One entry of a reverse-pointer set: the aliasing binding's name and a weak
/// handle to the frame that holds it. Weak so that a dead alias frame never
/// keeps itself alive through the binding it aliased; dead entries are pruned
/// during relocation.
#[derive(Clone)]
pub(crate) struct Alias {
    name: String,
    frame: Weak<RefCell<Frame>>,
}

impl Alias {
    fn upgrade(&self) -> Option<Env> {
        self.frame.upgrade().map(Env)
    }
}

/// One namespace of a frame: binding cells plus the reverse-pointer sets.
/// The alias lists are shared by handle so that a copied frame keeps
/// participating in the aliasing relationships of the original.
#[derive(Default)]
struct Space {
    bindings: HashMap<String, Cell>,
    pointers: HashMap<String, Rc<RefCell<Vec<Alias>>>>,
}

pub(crate) struct Frame {
    parent: Option<Env>,
    vars: Space,
    macros: Space,
}

impl Frame {
    fn space(&self, ns: Namespace) -> &Space {
        match ns {
            Namespace::Var => &self.vars,
            Namespace::Macro => &self.macros,
        }
    }

    fn space_mut(&mut self, ns: Namespace) -> &mut Space {
        match ns {
            Namespace::Var => &mut self.vars,
            Namespace::Macro => &mut self.macros,
        }
    }
}

/// A shared handle to an environment frame. Cloning the handle aliases the
/// frame; [`Env::copy`] makes a fresh frame. Equality is frame identity.
#[derive(Clone)]
pub struct Env(Rc<RefCell<Frame>>);

impl PartialEq for Env {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0.borrow();
        let mut names: Vec<&String> = frame.vars.bindings.keys().collect();
        names.sort();
        write!(f, "Env{names:?}")?;
        if frame.parent.is_some() {
            write!(f, "+parent")?;
        }
        Ok(())
    }
}

impl Env {
    /// Root frame: no parent, empty bindings and reverse-pointer sets.
    pub fn empty() -> Env {
        Env(Rc::new(RefCell::new(Frame {
            parent: None,
            vars: Space::default(),
            macros: Space::default(),
        })))
    }

    /// New child frame with the given bindings in fresh cells and empty
    /// reverse-pointer sets. Entries are inserted as-is, without the
    /// define/set aliasing protocol.
    pub fn extend<I>(&self, entries: I) -> Env
    where
        I: IntoIterator<Item = (Namespace, String, Value)>,
    {
        let child = Env(Rc::new(RefCell::new(Frame {
            parent: Some(self.clone()),
            vars: Space::default(),
            macros: Space::default(),
        })));
        {
            let mut frame = child.0.borrow_mut();
            for (ns, name, value) in entries {
                frame
                    .space_mut(ns)
                    .bindings
                    .insert(name, Rc::new(RefCell::new(value)));
            }
        }
        child
    }

    /// New child frame binding variables only.
    pub fn extend_vars<I>(&self, entries: I) -> Env
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.extend(
            entries
                .into_iter()
                .map(|(name, value)| (Namespace::Var, name, value)),
        )
    }

    /// Deep copy of this frame: fresh cells holding the same values, the
    /// same parent, and the reverse-pointer lists shared by handle (the
    /// aliasing relationships follow the original).
    pub fn copy(&self) -> Env {
        let frame = self.0.borrow();
        let copy_space = |space: &Space| Space {
            bindings: space
                .bindings
                .iter()
                .map(|(name, cell)| (name.clone(), Rc::new(RefCell::new(cell.borrow().clone()))))
                .collect(),
            pointers: space
                .pointers
                .iter()
                .map(|(name, list)| (name.clone(), Rc::clone(list)))
                .collect(),
        };
        Env(Rc::new(RefCell::new(Frame {
            parent: frame.parent.clone(),
            vars: copy_space(&frame.vars),
            macros: copy_space(&frame.macros),
        })))
    }

    fn downgrade(&self) -> Weak<RefCell<Frame>> {
        Rc::downgrade(&self.0)
    }

    /// The lexically enclosing environment, if any.
    pub fn parent(&self) -> Option<Env> {
        self.0.borrow().parent.clone()
    }

    /// Is the name bound in this frame (frame-local only)?
    pub fn is_bound(&self, ns: Namespace, name: &str) -> bool {
        self.0.borrow().space(ns).bindings.contains_key(name)
    }

    /// Is the name bound in this frame or any ancestor?
    pub fn is_rec_bound(&self, ns: Namespace, name: &str) -> bool {
        self.find_env(ns, name).is_some()
    }

    /// The nearest frame (this one or an ancestor) containing the binding.
    pub fn find_env(&self, ns: Namespace, name: &str) -> Option<Env> {
        let mut current = self.clone();
        loop {
            let parent = {
                let frame = current.0.borrow();
                if frame.space(ns).bindings.contains_key(name) {
                    return Some(current.clone());
                }
                frame.parent.clone()
            };
            current = parent?;
        }
    }

    fn local_cell(&self, ns: Namespace, name: &str) -> Option<Cell> {
        self.0.borrow().space(ns).bindings.get(name).map(Rc::clone)
    }

    /// Read a binding, searching the frame chain. The cell contents are
    /// returned verbatim (an alias cell yields its pointer).
    pub fn get(&self, ns: Namespace, name: &str) -> Result<Value, Error> {
        let frame = self
            .find_env(ns, name)
            .ok_or_else(|| Error::unbound(name))?;
        let cell = frame
            .local_cell(ns, name)
            .ok_or_else(|| Error::unbound(name))?;
        let value = cell.borrow().clone();
        Ok(value)
    }

    /// Read a variable the way the evaluator delivers it: a binding holding
    /// an object evaluates to a pointer at that binding (so that storing the
    /// result under another name aliases the object), an existing pointer
    /// passes through unchanged, and any other value is delivered plainly.
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        let frame = self
            .find_env(Namespace::Var, name)
            .ok_or_else(|| Error::unbound(name))?;
        let cell = frame
            .local_cell(Namespace::Var, name)
            .ok_or_else(|| Error::unbound(name))?;
        let value = cell.borrow().clone();
        match value {
            Value::Pointer { .. } => Ok(value),
            v if v.is_object() => Ok(Value::Pointer {
                name: name.to_owned(),
                env: frame,
            }),
            v => Ok(v),
        }
    }

    /// Bind a name in this frame. A name already bound frame-locally is
    /// rebound through the same relocation protocol as [`Env::set`];
    /// otherwise a fresh cell is inserted, shadowing any ancestor binding.
    /// Delivers the stored value.
    pub fn define(&self, ns: Namespace, name: &str, value: Value) -> Value {
        let store = self.resolve_store_value(ns, name, value);
        if self.is_bound(ns, name) {
            self.relocate_before_overwrite(ns, name);
            if let Some(cell) = self.local_cell(ns, name) {
                *cell.borrow_mut() = store.clone();
            }
        } else {
            self.0
                .borrow_mut()
                .space_mut(ns)
                .bindings
                .insert(name.to_owned(), Rc::new(RefCell::new(store.clone())));
        }
        store
    }

    /// Rebind the nearest existing binding of the name, relocating the old
    /// value to its aliases first. Delivers the stored value.
    pub fn set(&self, ns: Namespace, name: &str, value: Value) -> Result<Value, Error> {
        let frame = self.find_env(ns, name).ok_or_else(|| {
            Error::UnboundVar("Setting an unbound variable".into(), name.to_owned())
        })?;
        let store = frame.resolve_store_value(ns, name, value);
        frame.relocate_before_overwrite(ns, name);
        if let Some(cell) = frame.local_cell(ns, name) {
            *cell.borrow_mut() = store.clone();
        }
        Ok(store)
    }

    /// Step 1 of the binding protocol: decide what actually lands in the
    /// cell. A pointer to an object-holding binding is stored as a pointer,
    /// and the target's reverse-pointer set learns about the new alias; a
    /// pointer to anything else is dereferenced immediately. A pointer at
    /// the very binding being written would alias itself, so it collapses to
    /// its current value.
    fn resolve_store_value(&self, ns: Namespace, name: &str, value: Value) -> Value {
        let Value::Pointer {
            name: target_name,
            env: target_env,
        } = &value
        else {
            return value;
        };

        if target_name == name && target_env == self {
            return deref(&value).unwrap_or(value);
        }

        let holds_object = target_env
            .find_env(ns, target_name)
            .and_then(|frame| frame.local_cell(ns, target_name))
            .is_some_and(|cell| cell.borrow().is_object());

        if holds_object {
            if let Some(frame) = target_env.find_env(ns, target_name) {
                frame.add_alias(
                    ns,
                    target_name,
                    Alias {
                        name: name.to_owned(),
                        frame: self.downgrade(),
                    },
                );
            }
            value
        } else {
            deref(&value).unwrap_or(value)
        }
    }

    /// Step 2 of the binding protocol: if the binding about to be
    /// overwritten has live aliases, relocate its current value into the
    /// oldest alias, re-point the remaining aliases at that new canonical
    /// holder, and migrate the reverse-pointer set along with the value.
    fn relocate_before_overwrite(&self, ns: Namespace, name: &str) {
        let Some(list) = self
            .0
            .borrow()
            .space(ns)
            .pointers
            .get(name)
            .map(Rc::clone)
        else {
            return;
        };

        let live: Vec<(String, Env)> = list
            .borrow()
            .iter()
            .filter_map(|alias| alias.upgrade().map(|env| (alias.name.clone(), env)))
            .filter(|(alias_name, alias_env)| !(alias_name.as_str() == name && alias_env == self))
            .collect();
        list.borrow_mut().clear();

        let Some(cell) = self.local_cell(ns, name) else {
            return;
        };
        let Some((first_name, first_env)) = live.first().cloned() else {
            return;
        };

        let old_value = cell.borrow().clone();
        first_env.write_local(ns, &first_name, old_value);

        let mut migrated = Vec::new();
        for (alias_name, alias_env) in &live[1..] {
            alias_env.write_local(
                ns,
                alias_name,
                Value::Pointer {
                    name: first_name.clone(),
                    env: first_env.clone(),
                },
            );
            migrated.push(Alias {
                name: alias_name.clone(),
                frame: alias_env.downgrade(),
            });
        }
        for alias in migrated {
            first_env.add_alias(ns, &first_name, alias);
        }
    }

    /// Overwrite a frame-local cell directly, without the binding protocol.
    fn write_local(&self, ns: Namespace, name: &str, value: Value) {
        match self.local_cell(ns, name) {
            Some(cell) => *cell.borrow_mut() = value,
            None => {
                self.0
                    .borrow_mut()
                    .space_mut(ns)
                    .bindings
                    .insert(name.to_owned(), Rc::new(RefCell::new(value)));
            }
        }
    }

    fn add_alias(&self, ns: Namespace, name: &str, alias: Alias) {
        let list = {
            let mut frame = self.0.borrow_mut();
            Rc::clone(
                frame
                    .space_mut(ns)
                    .pointers
                    .entry(name.to_owned())
                    .or_default(),
            )
        };
        list.borrow_mut().push(alias);
    }

    /// All variable bindings visible from this frame, innermost shadowing
    /// outermost, sorted by name.
    pub fn all_bindings(&self, ns: Namespace) -> Vec<(String, Value)> {
        let mut seen: HashMap<String, Value> = HashMap::new();
        let mut chain = vec![self.clone()];
        while let Some(parent) = chain[chain.len() - 1].parent() {
            chain.push(parent);
        }
        // Outermost first so inner bindings overwrite
        for env in chain.iter().rev() {
            let frame = env.0.borrow();
            for (name, cell) in &frame.space(ns).bindings {
                seen.insert(name.clone(), cell.borrow().clone());
            }
        }
        let mut result: Vec<_> = seen.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

/// Follow a pointer chain to the concrete value. Non-pointers are returned
/// as-is (cloned).
pub fn deref(value: &Value) -> Result<Value, Error> {
    let mut current = value.clone();
    loop {
        match current {
            Value::Pointer { name, env } => {
                current = env.get(Namespace::Var, &name)?;
            }
            other => return Ok(other),
        }
    }
}

/// Follow pointer chains through every leaf of an aggregate, producing a
/// fully concrete value. Called when handing values to primitives that
/// require plain data, not on every read.
pub fn deref_deep(value: &Value) -> Result<Value, Error> {
    let concrete = deref(value)?;
    match concrete {
        Value::List(items) => Ok(Value::List(
            items.iter().map(deref_deep).collect::<Result<_, _>>()?,
        )),
        Value::Pair(head, tail) => Ok(Value::Pair(
            head.iter().map(deref_deep).collect::<Result<_, _>>()?,
            Box::new(deref_deep(&tail)?),
        )),
        Value::Vector(items) => Ok(Value::Vector(
            items.iter().map(deref_deep).collect::<Result<_, _>>()?,
        )),
        Value::HashTable(table) => Ok(Value::HashTable(
            table
                .into_iter()
                .map(|(key, value)| Ok((key, deref_deep(&value)?)))
                .collect::<Result<_, Error>>()?,
        )),
        other => Ok(other),
    }
}

/// Write a new value through a pointer chain into the canonical cell,
/// without rebinding anything, so every alias keeps seeing the binding and
/// therefore observes the new contents. Used by the mutating primitives
/// (`vector-set!`, `string-set!`, `hash-table-set!`, ...). Writing through a
/// non-pointer is a no-op on the environment: the value was an unnamed
/// temporary and the update is unobservable.
pub fn update_object(target: &Value, new_value: Value) -> Result<Value, Error> {
    let Value::Pointer { name, env } = target else {
        return Ok(new_value);
    };
    let (mut name, mut env) = (name.clone(), env.clone());
    loop {
        let frame = env
            .find_env(Namespace::Var, &name)
            .ok_or_else(|| Error::unbound(&name))?;
        let Some(cell) = frame.local_cell(Namespace::Var, &name) else {
            return Err(Error::unbound(&name));
        };
        let current = cell.borrow().clone();
        match current {
            Value::Pointer {
                name: next_name,
                env: next_env,
            } => {
                name = next_name;
                env = next_env;
            }
            _ => {
                *cell.borrow_mut() = new_value.clone();
                return Ok(new_value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{val, Value};

    fn define_var(env: &Env, name: &str, value: Value) {
        env.define(Namespace::Var, name, value);
    }

    #[test]
    fn test_define_then_get() {
        let env = Env::empty();
        define_var(&env, "x", val(42));
        assert_eq!(env.get(Namespace::Var, "x").unwrap(), val(42));
        assert!(env.get(Namespace::Var, "y").is_err());
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let env = Env::empty();
        env.define(Namespace::Var, "m", val(1));
        env.define(Namespace::Macro, "m", val(2));
        assert_eq!(env.get(Namespace::Var, "m").unwrap(), val(1));
        assert_eq!(env.get(Namespace::Macro, "m").unwrap(), val(2));
        assert_eq!(Namespace::Var.tag(), "v");
        assert_eq!(Namespace::Macro.tag(), "m");
    }

    #[test]
    fn test_shadowing() {
        let outer = Env::empty();
        define_var(&outer, "x", val(1));

        let inner = outer.extend_vars([("x".to_owned(), val(2))]);
        assert_eq!(inner.get(Namespace::Var, "x").unwrap(), val(2));
        assert_eq!(outer.get(Namespace::Var, "x").unwrap(), val(1));

        // define in the child shadows; the parent binding is untouched
        let child = outer.extend_vars([]);
        define_var(&child, "x", val(3));
        assert_eq!(child.get(Namespace::Var, "x").unwrap(), val(3));
        assert_eq!(outer.get(Namespace::Var, "x").unwrap(), val(1));
    }

    #[test]
    fn test_set_mutates_the_defining_frame() {
        let outer = Env::empty();
        define_var(&outer, "x", val(1));

        let inner = outer.extend_vars([]);
        inner.set(Namespace::Var, "x", val(10)).unwrap();
        assert_eq!(outer.get(Namespace::Var, "x").unwrap(), val(10));
        assert_eq!(inner.get(Namespace::Var, "x").unwrap(), val(10));

        assert!(inner.set(Namespace::Var, "missing", val(0)).is_err());
    }

    #[test]
    fn test_find_env_returns_nearest_frame() {
        let outer = Env::empty();
        define_var(&outer, "x", val(1));
        let inner = outer.extend_vars([("x".to_owned(), val(2))]);

        assert_eq!(inner.find_env(Namespace::Var, "x").unwrap(), inner);
        assert_eq!(outer.find_env(Namespace::Var, "x").unwrap(), outer);
        assert!(inner.find_env(Namespace::Var, "y").is_none());
        assert!(inner.is_rec_bound(Namespace::Var, "x"));
        assert!(!inner.is_bound(Namespace::Var, "y"));
    }

    #[test]
    fn test_lookup_delivers_pointers_for_objects() {
        let env = Env::empty();
        define_var(&env, "v", Value::Vector(vec![val(1)]));
        define_var(&env, "n", val(7));

        // object binding: delivered as a pointer at the binding
        match env.lookup("v").unwrap() {
            Value::Pointer { name, env: frame } => {
                assert_eq!(name, "v");
                assert_eq!(frame, env);
            }
            other => panic!("expected pointer, got {other:?}"),
        }
        // non-object binding: delivered plainly
        assert_eq!(env.lookup("n").unwrap(), val(7));
    }

    #[test]
    fn test_alias_sees_in_place_mutation() {
        let env = Env::empty();
        define_var(&env, "v", Value::Vector(vec![val(0), val(0)]));

        // (define w v)
        let pointer = env.lookup("v").unwrap();
        define_var(&env, "w", pointer);

        // mutate through the alias
        let via_w = env.lookup("w").unwrap();
        update_object(&via_w, Value::Vector(vec![val(0), val(42)])).unwrap();

        // both names observe the update
        assert_eq!(
            deref_deep(&env.lookup("v").unwrap()).unwrap(),
            Value::Vector(vec![val(0), val(42)])
        );
        assert_eq!(
            deref_deep(&env.lookup("w").unwrap()).unwrap(),
            Value::Vector(vec![val(0), val(42)])
        );
    }

    #[test]
    fn test_rebinding_relocates_to_oldest_alias() {
        let env = Env::empty();
        define_var(&env, "x", val([1, 2]));

        define_var(&env, "y", env.lookup("x").unwrap());
        define_var(&env, "z", env.lookup("x").unwrap());

        // rebind the canonical holder
        env.set(Namespace::Var, "x", val(99)).unwrap();

        assert_eq!(env.get(Namespace::Var, "x").unwrap(), val(99));
        // the old value survived, relocated to the oldest alias
        assert_eq!(env.get(Namespace::Var, "y").unwrap(), val([1, 2]));
        // the remaining alias now points at the new canonical holder
        assert_eq!(deref(&env.get(Namespace::Var, "z").unwrap()).unwrap(), val([1, 2]));

        // and the migrated reverse set keeps working: rebinding y relocates to z
        env.set(Namespace::Var, "y", val(0)).unwrap();
        assert_eq!(env.get(Namespace::Var, "y").unwrap(), val(0));
        assert_eq!(env.get(Namespace::Var, "z").unwrap(), val([1, 2]));
    }

    #[test]
    fn test_pointer_to_non_object_dereferences_immediately() {
        let env = Env::empty();
        define_var(&env, "v", val([1]));
        let pointer = env.lookup("v").unwrap();

        // retarget v to a non-object before using the pointer
        env.set(Namespace::Var, "v", val(5)).unwrap();
        define_var(&env, "w", pointer);
        assert_eq!(env.get(Namespace::Var, "w").unwrap(), val(5));
    }

    #[test]
    fn test_self_reference_collapses() {
        let env = Env::empty();
        define_var(&env, "v", val([1]));
        let pointer = env.lookup("v").unwrap();
        // (define v v) must not create a self-alias cycle
        define_var(&env, "v", pointer);
        assert_eq!(env.get(Namespace::Var, "v").unwrap(), val([1]));
    }

    #[test]
    fn test_copy_shares_alias_lists_but_not_cells() {
        let env = Env::empty();
        define_var(&env, "x", val(1));
        let copied = env.copy();

        // cells are fresh: writing the copy leaves the original alone
        copied.set(Namespace::Var, "x", val(2)).unwrap();
        assert_eq!(env.get(Namespace::Var, "x").unwrap(), val(1));
        assert_eq!(copied.get(Namespace::Var, "x").unwrap(), val(2));
    }

    #[test]
    fn test_deref_deep_resolves_nested_pointers() {
        let env = Env::empty();
        define_var(&env, "inner", val([1, 2]));
        let pointer = env.lookup("inner").unwrap();
        define_var(&env, "outer", Value::List(vec![val(0), pointer]));

        let concrete = deref_deep(&env.lookup("outer").unwrap()).unwrap();
        assert_eq!(concrete, Value::List(vec![val(0), val([1, 2])]));
    }

    #[test]
    fn test_all_bindings_sorted_with_shadowing() {
        let outer = Env::empty();
        define_var(&outer, "b", val(1));
        define_var(&outer, "a", val(2));
        let inner = outer.extend_vars([("b".to_owned(), val(3))]);

        let bindings = inner.all_bindings(Namespace::Var);
        assert_eq!(
            bindings,
            vec![("a".to_owned(), val(2)), ("b".to_owned(), val(3))]
        );
    }
}
