//! Invoking one engine operation by name.
//!
//! An invocation runs in a fixed order: create the operation, bind every input,
//! build it through the operation cache, then read every output back. The
//! operation reference and the option set's transient copies are owned by drop
//! guards, so they are released on every exit path, including panics.

use crate::engine::{Engine, RawHandle};
use crate::error::{Result, VipsError};
use crate::options::{OptionDescriptor, OptionSet};
use crate::value::ValueBox;
use tracing::{debug, trace, warn};

/// An owned reference to an engine operation.
///
/// Dropping it releases the reference. After a cache hit the handle points at
/// the substituted operation, so that is the one released.
pub(crate) struct OperationHandle<'e> {
    engine: &'e dyn Engine,
    raw: RawHandle,
    name: &'e str,
}

impl<'e> OperationHandle<'e> {
    /// Create a new operation with one reference owned by the handle.
    pub(crate) fn new(engine: &'e dyn Engine, name: &'e str) -> Result<Self> {
        let raw = engine
            .operation_new(name)
            .ok_or_else(|| VipsError::UnknownOperation {
                name: name.to_string(),
            })?;
        Ok(Self { engine, raw, name })
    }

    fn bind_error(&self, property: &str, reason: impl Into<String>) -> VipsError {
        VipsError::PropertyBind {
            operation: self.name.to_string(),
            property: property.to_string(),
            reason: reason.into(),
        }
    }

    /// Serialize one input into the property's declared type and set it.
    fn bind(&self, option: &mut OptionDescriptor) -> Result<()> {
        let property = option.name().to_string();

        // SAFETY: `self.raw` is live while the handle holds its reference.
        let declared = unsafe { self.engine.argument_type(self.raw, &property) }
            .ok_or_else(|| self.bind_error(&property, "no such argument"))?;

        let value = option
            .value()
            .ok_or_else(|| self.bind_error(&property, "input has no value"))?;
        let serialized = value.serialize(&declared).map_err(|e| match e {
            VipsError::Marshal { reason } => self.bind_error(&property, reason),
            other => self.bind_error(&property, other.to_string()),
        })?;

        trace!(operation = self.name, property = %property, ty = %declared, "binding input");
        let transient = option.set_transient(serialized);

        // SAFETY: as above.
        unsafe { self.engine.set_property(self.raw, &property, transient) }
            .map_err(|reason| self.bind_error(&property, reason))
    }

    /// Build through the operation cache.
    fn build(&mut self) -> Result<()> {
        let submitted = self.raw;

        // SAFETY: the handle owns a reference to `self.raw`. On success the
        // engine hands over a reference to the (possibly new) operation in its
        // place, which this handle then owns.
        match unsafe { self.engine.build(&mut self.raw) } {
            Ok(()) => {
                if self.raw != submitted {
                    trace!(operation = self.name, "reused cached operation");
                }
                Ok(())
            }
            Err(message) => {
                warn!(operation = self.name, error = %message, "operation build failed");
                // SAFETY: build failure leaves `self.raw` untouched and live.
                unsafe { self.engine.unref_outputs(self.raw) };
                Err(VipsError::EngineBuild {
                    operation: self.name.to_string(),
                    message,
                })
            }
        }
    }

    /// Read one output and store it on its descriptor.
    fn read(&self, option: &mut OptionDescriptor) -> Result<()> {
        // SAFETY: `self.raw` is live while the handle holds its reference.
        let value = unsafe { self.engine.get_property(self.raw, option.name()) }
            .map_err(|reason| self.bind_error(option.name(), reason))?;
        let value = ValueBox::deserialize(value, option.kind())?;
        option.set_value(value);
        Ok(())
    }
}

impl Drop for OperationHandle<'_> {
    fn drop(&mut self) {
        // SAFETY: each handle owns exactly one reference.
        unsafe { self.engine.unref(self.raw) };
    }
}

/// Run the named operation with `options`.
///
/// On success every output descriptor holds its value. On any error the
/// outputs that were not read stay unset; the operation and the transient
/// copies are released either way.
pub(crate) fn invoke(engine: &dyn Engine, name: &str, options: &mut OptionSet) -> Result<()> {
    let mut options = options.scoped();
    let mut operation = OperationHandle::new(engine, name)?;

    debug!(
        operation = name,
        inputs = options.inputs().count(),
        outputs = options.outputs().count(),
        "invoking operation"
    );

    for option in options.iter_mut().filter(|o| !o.is_output()) {
        operation.bind(option)?;
    }

    operation.build()?;

    for option in options.iter_mut().filter(|o| o.is_output()) {
        operation.read(option)?;
    }

    debug!(operation = name, "operation complete");
    Ok(())
}
