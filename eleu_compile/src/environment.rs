use std::{cell::RefCell, collections::HashMap, rc::Rc};

use log::debug;

use crate::{
    error::{runtime_error, ErrorMsg, RuntimeError},
    types::Value,
};

#[derive(Debug, Default)]
pub struct Env {
    values: HashMap<String, Value>,
    pub parent: Option<Rc<RefCell<Env>>>,
}

impl Env {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: Rc<RefCell<Env>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            ..Default::default()
        }))
    }

    /// Defines or overwrites `name` in this environment.
    pub fn define(&mut self, name: &str, value: Value) {
        debug!("Define {name} -> {value:?}");
        self.values.insert(name.to_string(), value);
    }

    /// Defines a `var`, rejecting a second declaration of the same name
    /// in this environment.
    pub fn declare(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if self.contains(name) {
            return Err(runtime_error(ErrorMsg::AlreadyDefined, format!("'{name}'")));
        }
        self.define(name, value);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Looks `name` up in this environment and then its ancestors.
    pub fn get(&self, name: &str) -> Result<Value, RuntimeError> {
        debug!("Get {name}");
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }
        if let Some(parent) = &self.parent {
            debug!("Get {name} from parent");
            return parent.borrow().get(name);
        }
        Err(runtime_error(ErrorMsg::UndefinedVar, format!("'{name}'")))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        debug!("Assign {name} -> {value:?}");
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        if let Some(parent) = &self.parent {
            debug!("Assign {name} in parent");
            return parent.borrow_mut().assign(name, value);
        }
        Err(runtime_error(ErrorMsg::UndefinedVar, format!("'{name}'")))
    }

    pub fn get_at_depth(&self, name: &str, depth: usize) -> Result<Value, RuntimeError> {
        debug!("Get {name} at depth {depth}");
        if depth == 0 {
            return self
                .values
                .get(name)
                .cloned()
                .ok_or_else(|| runtime_error(ErrorMsg::UndefinedVar, format!("'{name}'")));
        }
        match &self.parent {
            Some(parent) => parent.borrow().get_at_depth(name, depth - 1),
            None => Err(runtime_error(ErrorMsg::MisresolvedVar, format!("'{name}'"))),
        }
    }

    pub fn assign_at_depth(
        &mut self,
        name: &str,
        value: Value,
        depth: usize,
    ) -> Result<(), RuntimeError> {
        debug!("Assign {name} -> {value:?} at depth {depth}");
        if depth == 0 {
            return match self.values.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(runtime_error(ErrorMsg::UndefinedVar, format!("'{name}'"))),
            };
        }
        match &self.parent {
            Some(parent) => parent.borrow_mut().assign_at_depth(name, value, depth - 1),
            None => Err(runtime_error(ErrorMsg::MisresolvedVar, format!("'{name}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Number;

    fn num(n: f64) -> Value {
        Value::Number(Number::new(n).unwrap())
    }

    #[test]
    fn define_and_get() {
        let env = Env::new();
        env.borrow_mut().define("x", num(1.0));
        assert_eq!(env.borrow().get("x").unwrap(), num(1.0));
        assert!(env.borrow().get("y").is_err());
    }

    #[test]
    fn declare_twice_fails() {
        let env = Env::new();
        assert!(env.borrow_mut().declare("x", Value::Nil).is_ok());
        assert!(env.borrow_mut().declare("x", Value::Nil).is_err());
    }

    #[test]
    fn depth_lookup() {
        let globals = Env::new();
        globals.borrow_mut().define("x", num(1.0));
        let inner = Env::with_parent(Env::with_parent(globals.clone()));
        inner.borrow_mut().define("x", num(3.0));

        assert_eq!(inner.borrow().get_at_depth("x", 0).unwrap(), num(3.0));
        assert_eq!(inner.borrow().get_at_depth("x", 2).unwrap(), num(1.0));
        assert!(inner.borrow().get_at_depth("x", 1).is_err());
        assert!(inner.borrow().get_at_depth("x", 3).is_err());

        inner.borrow_mut().assign_at_depth("x", num(5.0), 2).unwrap();
        assert_eq!(globals.borrow().get("x").unwrap(), num(5.0));
    }

    #[test]
    fn shared_parent() {
        let parent = Env::new();
        parent.borrow_mut().define("n", num(0.0));
        let a = Env::with_parent(parent.clone());
        let b = Env::with_parent(parent.clone());
        a.borrow_mut().assign("n", num(7.0)).unwrap();
        assert_eq!(b.borrow().get("n").unwrap(), num(7.0));
    }
}
