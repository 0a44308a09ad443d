use std::{cell::RefCell, fmt::Debug, rc::Rc};

use rustc_hash::FxHashMap;

use super::Value;

/// One scope of variables plus a link to the scope enclosing it.
///
/// Environments are shared: every block that is still running and every
/// closure created inside them holds an `Rc` to the same scope.
#[derive(Default)]
pub struct Environment {
    values: FxHashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn boxed(enclosing: Option<Rc<RefCell<Environment>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new(enclosing)))
    }

    pub fn new(enclosing: Option<Rc<RefCell<Environment>>>) -> Self {
        Self {
            values: FxHashMap::default(),
            enclosing,
        }
    }

    /// Binds `name` in this scope, replacing any earlier binding.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            Some(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            None
        }
    }

    /// Updates the innermost scope that binds `name`.
    pub fn assign(&mut self, name: &str, value: Value) -> Option<Value> {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value.clone();
            Some(value)
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            None
        }
    }

    /// Follows exactly `distance` enclosing links.
    pub fn ancestor(
        environment: &Rc<RefCell<Environment>>,
        distance: usize,
    ) -> Option<Rc<RefCell<Environment>>> {
        let mut environment = environment.clone();
        for _ in 0..distance {
            let enclosing = environment.borrow().enclosing.clone()?;
            environment = enclosing;
        }
        Some(environment)
    }

    /// Reads `name` from the scope `distance` links out, without searching
    /// any further.
    pub fn get_at(
        environment: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
    ) -> Option<Value> {
        let scope = Self::ancestor(environment, distance)?;
        let value = scope.borrow().values.get(name).cloned();
        value
    }

    pub fn assign_at(
        environment: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
        value: Value,
    ) -> Option<Value> {
        let scope = Self::ancestor(environment, distance)?;
        let mut scope = scope.borrow_mut();
        let slot = scope.values.get_mut(name)?;
        *slot = value.clone();
        Some(value)
    }
}

impl Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.values.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct(format!("Environment<{:?}>", std::ptr::from_ref(self)).as_str())
            .field("names", &names)
            .field("enclosing", &self.enclosing.as_ref().map(|e| e.as_ptr()))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    /// Number of links a searching lookup walks before finding `name`.
    fn distance_to(environment: &Rc<RefCell<Environment>>, name: &str) -> Option<usize> {
        let mut environment = environment.clone();
        let mut distance = 0;
        loop {
            if environment.borrow().values.contains_key(name) {
                return Some(distance);
            }
            let enclosing = environment.borrow().enclosing.clone()?;
            environment = enclosing;
            distance += 1;
        }
    }

    fn number(value: &Option<Value>) -> Option<f64> {
        match value {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    #[test]
    fn test_get_searches_outward() {
        let globals = Environment::boxed(None);
        globals.borrow_mut().define("a", Value::Number(1.0));
        let inner = Environment::boxed(Some(globals.clone()));

        assert_eq!(number(&inner.borrow().get("a")), Some(1.0));
        assert!(inner.borrow().get("missing").is_none());
    }

    #[test]
    fn test_assign_updates_declaring_scope() {
        let globals = Environment::boxed(None);
        globals.borrow_mut().define("a", Value::Number(1.0));
        let inner = Environment::boxed(Some(globals.clone()));

        assert!(inner.borrow_mut().assign("a", Value::Number(2.0)).is_some());
        assert_eq!(number(&globals.borrow().get("a")), Some(2.0));
        assert!(inner.borrow_mut().assign("b", Value::Nil).is_none());
    }

    #[test]
    fn test_define_overwrites() {
        let mut environment = Environment::new(None);
        environment.define("a", Value::Number(1.0));
        environment.define("a", Value::Number(3.0));
        assert_eq!(number(&environment.get("a")), Some(3.0));
    }

    #[test]
    fn test_get_at_does_not_search() {
        let globals = Environment::boxed(None);
        globals.borrow_mut().define("a", Value::Number(1.0));
        let middle = Environment::boxed(Some(globals.clone()));
        middle.borrow_mut().define("a", Value::Number(2.0));
        let inner = Environment::boxed(Some(middle.clone()));

        assert_eq!(number(&Environment::get_at(&inner, 1, "a")), Some(2.0));
        assert_eq!(number(&Environment::get_at(&inner, 2, "a")), Some(1.0));
        assert!(Environment::get_at(&inner, 0, "a").is_none());
        assert!(Environment::get_at(&inner, 3, "a").is_none());
    }

    #[test]
    fn test_assign_at_targets_exact_scope() {
        let globals = Environment::boxed(None);
        globals.borrow_mut().define("a", Value::Number(1.0));
        let inner = Environment::boxed(Some(globals.clone()));
        inner.borrow_mut().define("a", Value::Number(2.0));

        assert!(Environment::assign_at(&inner, 1, "a", Value::Number(5.0)).is_some());
        assert_eq!(number(&globals.borrow().get("a")), Some(5.0));
        assert_eq!(number(&inner.borrow().get("a")), Some(2.0));
        assert!(Environment::assign_at(&inner, 0, "b", Value::Nil).is_none());
    }

    proptest! {
        // Each scope in the chain binds a random subset of a small name pool.
        #[test]
        fn bounded_lookup_matches_search(
            scopes in prop::collection::vec(prop::collection::vec(0..6usize, 0..4), 1..8)
        ) {
            let mut environment = Environment::boxed(None);
            for (depth, names) in scopes.iter().enumerate() {
                if depth > 0 {
                    environment = Environment::boxed(Some(environment));
                }
                for name in names {
                    environment
                        .borrow_mut()
                        .define(format!("v{name}"), Value::Number((depth * 10 + name) as f64));
                }
            }

            for name in (0..6).map(|n| format!("v{n}")) {
                let searched = environment.borrow().get(&name);
                match distance_to(&environment, &name) {
                    Some(distance) => {
                        let bounded = Environment::get_at(&environment, distance, &name);
                        prop_assert_eq!(number(&bounded), number(&searched));
                        prop_assert!(searched.is_some());
                    }
                    None => prop_assert!(searched.is_none()),
                }
            }
        }
    }
}
