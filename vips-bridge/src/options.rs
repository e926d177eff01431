//! Named, directioned operation arguments.
//!
//! An [`OptionSet`] describes the parameters of one invocation. Inputs carry a
//! value the caller supplies; outputs carry only the kind they expect and are
//! unreadable until an invocation writes them back.
//!
//! # Example
//!
//! ```
//! use vips_bridge::{OptionSet, ValueKind};
//!
//! let mut options = OptionSet::new();
//! options.input("width", 64)?.input("height", 32)?;
//! options.output("out", ValueKind::Image)?;
//!
//! assert_eq!(options.inputs().count(), 2);
//! assert!(options.value("out").is_none());
//! # Ok::<(), vips_bridge::VipsError>(())
//! ```

use crate::error::{Result, VipsError};
use crate::value::{PropertyValue, ValueBox, ValueKind};
use std::ops::{Deref, DerefMut};

/// Whether an argument flows into or out of the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// One named argument of an invocation.
#[derive(Debug)]
pub struct OptionDescriptor {
    name: String,
    direction: Direction,
    kind: ValueKind,
    value: Option<ValueBox>,
    /// Engine-side copy made while binding; freed by `OptionSet::release`.
    transient: Option<PropertyValue>,
}

impl OptionDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    /// Kind of value this argument carries.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The value; `None` for an output that has not been written yet.
    pub fn value(&self) -> Option<&ValueBox> {
        self.value.as_ref()
    }

    /// Whether a transient engine-side copy is still held.
    pub fn holds_transient(&self) -> bool {
        self.transient.is_some()
    }

    pub(crate) fn set_transient(&mut self, value: PropertyValue) -> &PropertyValue {
        self.transient.insert(value)
    }

    pub(crate) fn set_value(&mut self, value: ValueBox) {
        self.value = Some(value);
    }
}

/// Ordered collection of uniquely named arguments.
#[derive(Debug, Default)]
pub struct OptionSet {
    options: Vec<OptionDescriptor>,
}

impl OptionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument.
    ///
    /// For outputs only the kind of `value` is kept; the value itself becomes
    /// readable once an invocation writes it back.
    ///
    /// # Errors
    ///
    /// `DuplicateOption` if `name` is already present (the set is unchanged),
    /// `InvalidInput` if `name` is empty.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        direction: Direction,
        value: impl Into<ValueBox>,
    ) -> Result<&mut Self> {
        let value = value.into();
        let kind = value.kind();
        let value = match direction {
            Direction::Input => Some(value),
            Direction::Output => None,
        };
        self.push(name.into(), direction, kind, value)
    }

    /// Add an input argument.
    pub fn input(&mut self, name: impl Into<String>, value: impl Into<ValueBox>) -> Result<&mut Self> {
        self.add(name, Direction::Input, value)
    }

    /// Add an output argument of the given kind.
    pub fn output(&mut self, name: impl Into<String>, kind: ValueKind) -> Result<&mut Self> {
        self.push(name.into(), Direction::Output, kind, None)
    }

    /// Builder form of [`input`](Self::input).
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<ValueBox>) -> Result<Self> {
        self.input(name, value)?;
        Ok(self)
    }

    /// Builder form of [`output`](Self::output).
    pub fn with_output(mut self, name: impl Into<String>, kind: ValueKind) -> Result<Self> {
        self.output(name, kind)?;
        Ok(self)
    }

    fn push(
        &mut self,
        name: String,
        direction: Direction,
        kind: ValueKind,
        value: Option<ValueBox>,
    ) -> Result<&mut Self> {
        if name.is_empty() {
            return Err(VipsError::InvalidInput {
                message: "option name must not be empty".to_string(),
            });
        }
        if self.get(&name).is_some() {
            return Err(VipsError::DuplicateOption { name });
        }
        self.options.push(OptionDescriptor {
            name,
            direction,
            kind,
            value,
            transient: None,
        });
        Ok(self)
    }

    /// Input arguments in insertion order.
    pub fn inputs(&self) -> impl Iterator<Item = &OptionDescriptor> + Clone + '_ {
        self.options.iter().filter(|o| !o.is_output())
    }

    /// Output arguments in insertion order.
    pub fn outputs(&self) -> impl Iterator<Item = &OptionDescriptor> + Clone + '_ {
        self.options.iter().filter(|o| o.is_output())
    }

    /// All arguments in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, OptionDescriptor> {
        self.options.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, OptionDescriptor> {
        self.options.iter_mut()
    }

    /// Look up an argument by name.
    pub fn get(&self, name: &str) -> Option<&OptionDescriptor> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Value of an argument; `None` if absent or an unwritten output.
    pub fn value(&self, name: &str) -> Option<&ValueBox> {
        self.get(name).and_then(|o| o.value())
    }

    /// Move the value out of an argument, leaving it unreadable.
    pub fn take(&mut self, name: &str) -> Option<ValueBox> {
        self.options
            .iter_mut()
            .find(|o| o.name == name)
            .and_then(|o| o.value.take())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Free every transient engine-side copy made while binding.
    ///
    /// Safe to call any number of times. Returns how many copies were freed.
    pub fn release(&mut self) -> usize {
        self.options
            .iter_mut()
            .filter_map(|o| o.transient.take())
            .count()
    }

    /// Borrow the set for one invocation; it is released when the guard drops.
    pub(crate) fn scoped(&mut self) -> ReleaseGuard<'_> {
        ReleaseGuard { options: self }
    }
}

impl<'a> IntoIterator for &'a OptionSet {
    type Item = &'a OptionDescriptor;
    type IntoIter = std::slice::Iter<'a, OptionDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Releases an [`OptionSet`] on drop, including during unwinding.
pub(crate) struct ReleaseGuard<'a> {
    options: &'a mut OptionSet,
}

impl Deref for ReleaseGuard<'_> {
    type Target = OptionSet;

    fn deref(&self) -> &OptionSet {
        self.options
    }
}

impl DerefMut for ReleaseGuard<'_> {
    fn deref_mut(&mut self) -> &mut OptionSet {
        self.options
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let freed = self.options.release();
        if freed > 0 {
            tracing::trace!(freed, "released transient option values");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_leaves_set_unchanged() {
        let mut options = OptionSet::new();
        options.input("width", 10).unwrap();
        options.output("out", ValueKind::Image).unwrap();

        let before = options.len();
        let result = options.input("width", 20);
        match result {
            Err(VipsError::DuplicateOption { name }) => assert_eq!(name, "width"),
            other => panic!("Expected DuplicateOption, got {:?}", other.map(|s| s.len())),
        }
        assert_eq!(options.len(), before);
        assert_eq!(options.value("width"), Some(&ValueBox::Int(10)));

        // Direction does not matter for uniqueness
        assert!(options.output("width", ValueKind::Int).is_err());
        assert_eq!(options.len(), before);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut options = OptionSet::new();
        assert!(matches!(
            options.input("", 1),
            Err(VipsError::InvalidInput { .. })
        ));
        assert!(options.is_empty());
    }

    #[test]
    fn test_filters_preserve_insertion_order() {
        let options = OptionSet::new()
            .with_input("in", 1)
            .unwrap()
            .with_output("out", ValueKind::Double)
            .unwrap()
            .with_input("a", vec![1.0])
            .unwrap()
            .with_output("extra", ValueKind::Blob)
            .unwrap()
            .with_input("b", vec![0.0])
            .unwrap();

        let inputs = options.inputs();
        let names: Vec<_> = inputs.clone().map(|o| o.name()).collect();
        assert_eq!(names, ["in", "a", "b"]);
        // Restartable: the clone above did not consume it
        assert_eq!(inputs.count(), 3);

        let outputs: Vec<_> = options.outputs().map(|o| (o.name(), o.kind())).collect();
        assert_eq!(outputs, [("out", ValueKind::Double), ("extra", ValueKind::Blob)]);
    }

    #[test]
    fn test_output_unreadable_until_written() {
        let mut options = OptionSet::new();
        options.add("out", Direction::Output, 0.0).unwrap();
        assert!(options.value("out").is_none());
        assert_eq!(options.get("out").unwrap().kind(), ValueKind::Double);

        options.iter_mut().next().unwrap().set_value(ValueBox::Double(4.5));
        assert_eq!(options.value("out"), Some(&ValueBox::Double(4.5)));
        assert_eq!(options.take("out"), Some(ValueBox::Double(4.5)));
        assert!(options.value("out").is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut options = OptionSet::new();
        options.input("filename", "a.raw").unwrap();
        options.input("width", 3).unwrap();
        for option in options.iter_mut() {
            let transient = option.value().unwrap().serialize(&option.kind().property_type());
            option.set_transient(transient.unwrap());
        }
        assert!(options.iter().all(|o| o.holds_transient()));

        assert_eq!(options.release(), 2);
        assert_eq!(options.release(), 0);
        assert!(options.iter().all(|o| !o.holds_transient()));
        // Inputs keep their caller values
        assert_eq!(options.value("width"), Some(&ValueBox::Int(3)));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut options = OptionSet::new();
        options.input("x", true).unwrap();
        {
            let mut scoped = options.scoped();
            let option = scoped.iter_mut().next().unwrap();
            option.set_transient(PropertyValue::Bool(true));
        }
        assert!(!options.get("x").unwrap().holds_transient());
    }
}
