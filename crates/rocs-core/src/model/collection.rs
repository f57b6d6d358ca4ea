//! Named, insertion-ordered term collections

use std::any::Any;
use std::collections::HashMap;

use crate::error::SolverError;

/// Object-safe downcast support for collection terms.
///
/// Blanket-implemented for every `'static` type, so concrete terms get it
/// for free; collections use it for typed access to a named term.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owning collection of polymorphic terms with unique names.
///
/// Terms are stored in insertion order; a name map gives O(1) lookup into
/// the dense term vector. Adding a term under an existing name is a
/// [`SolverError::Construction`].
pub struct TermCollection<T: ?Sized> {
    terms: Vec<Box<T>>,
    names: Vec<String>,
    name_map: HashMap<String, usize>,
}

impl<T: ?Sized> Default for TermCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> TermCollection<T> {
    pub fn new() -> Self {
        Self {
            terms: Vec::new(),
            names: Vec::new(),
            name_map: HashMap::new(),
        }
    }

    /// Adds a term, transferring ownership to the collection.
    pub fn add(&mut self, name: impl Into<String>, term: Box<T>) -> Result<(), SolverError> {
        let name = name.into();
        if self.name_map.contains_key(&name) {
            return Err(SolverError::Construction(format!(
                "term with name \"{name}\" already exists"
            )));
        }
        self.name_map.insert(name.clone(), self.terms.len());
        self.names.push(name);
        self.terms.push(term);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Borrow a term by name.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.name_map.get(name).map(|&i| self.terms[i].as_ref())
    }

    /// Mutably borrow a term by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        let i = *self.name_map.get(name)?;
        Some(self.terms[i].as_mut())
    }

    /// Iterates terms in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.terms.iter().map(|t| t.as_ref())
    }

    /// Iterates `(name, term)` pairs in insertion order.
    pub fn iter_named(&self) -> impl Iterator<Item = (&str, &T)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.terms.iter().map(|t| t.as_ref()))
    }
}

impl<T: AsAny + ?Sized> TermCollection<T> {
    /// Borrow a term by name, downcast to its concrete type. Fails clearly
    /// on an unknown name or a type mismatch.
    pub fn get_as<D: 'static>(&self, name: &str) -> Result<&D, SolverError> {
        let term = self
            .get(name)
            .ok_or_else(|| SolverError::Construction(format!("no term named \"{name}\"")))?;
        term.as_any().downcast_ref::<D>().ok_or_else(|| {
            SolverError::Construction(format!(
                "term \"{name}\" is not a {}",
                std::any::type_name::<D>()
            ))
        })
    }
}

impl<T: ?Sized> Clone for TermCollection<T>
where
    Box<T>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            terms: self.terms.clone(),
            names: self.names.clone(),
            name_map: self.name_map.clone(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for TermCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermCollection")
            .field("names", &self.names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Marker: Send {
        fn id(&self) -> usize;
    }

    struct A(usize);
    impl Marker for A {
        fn id(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut c: TermCollection<dyn Marker> = TermCollection::new();
        c.add("first", Box::new(A(1))).unwrap();
        let err = c.add("first", Box::new(A(2))).unwrap_err();
        assert!(matches!(err, SolverError::Construction(_)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut c: TermCollection<dyn Marker> = TermCollection::new();
        c.add("b", Box::new(A(2))).unwrap();
        c.add("a", Box::new(A(1))).unwrap();
        c.add("c", Box::new(A(3))).unwrap();
        let ids: Vec<usize> = c.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        let names: Vec<&str> = c.iter_named().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
