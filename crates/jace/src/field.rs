//! Field access.
//!
//! [`JField`] memoizes a field id per declaration site. Reads copy the
//! current value out; [`FieldProxy`] keeps that copy together with the
//! owning object (or class) and the field id, so that
//! [`FieldProxy::set`] writes through to the foreign field rather than to
//! the copy.

use crate::context::ThreadContext;
use crate::descriptor::ClassDescriptor;
use crate::error::{Error, Result};
use crate::method::finish;
use crate::object::ObjectProxy;
use crate::refs::LocalRef;
use crate::sys::{FieldId, RawRef};
use crate::value::JavaType;
use jace_log::trace;
use once_cell::sync::OnceCell;
use std::fmt;
use std::marker::PhantomData;

/// Looks up a field id, translating failure into [`Error::FieldNotFound`].
///
/// # Errors
///
/// Fails if the class cannot be resolved or the runtime reports no such
/// field; the runtime's diagnostic is chained as the cause.
pub fn resolve_field(
    ctx: &ThreadContext,
    class: &ClassDescriptor,
    name: &str,
    signature: &str,
    is_static: bool,
) -> Result<FieldId> {
    let class_ref = class.resolve(ctx)?;
    match ctx.vm().get_field_id(class_ref, name, signature, is_static) {
        Some(id) if !ctx.vm().exception_check() => {
            trace!("resolved field {}.{name} as {id:?}", class.dotted_name());
            Ok(id)
        }
        _ => {
            let cause = ctx.check_exception().err().map(|e| e.to_string());
            Err(Error::FieldNotFound {
                class: class.dotted_name(),
                name: name.to_owned(),
                signature: signature.to_owned(),
                cause,
            })
        }
    }
}

/// A named field of type `T`, memoized per declaration site.
pub struct JField<T> {
    name: &'static str,
    id: OnceCell<FieldId>,
    _value: PhantomData<fn() -> T>,
}

impl<T> JField<T> {
    /// A field site for `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        JField {
            name,
            id: OnceCell::new(),
            _value: PhantomData,
        }
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: JavaType> JField<T> {
    fn field_id(&self, ctx: &ThreadContext, class: &ClassDescriptor, is_static: bool) -> Result<FieldId> {
        self.id
            .get_or_try_init(|| {
                resolve_field(
                    ctx,
                    class,
                    self.name,
                    T::class_descriptor().type_signature(),
                    is_static,
                )
            })
            .copied()
    }

    /// Reads the field of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldNotFound`] on first use if the field does not
    /// exist, and the translated exception if the read throws.
    pub fn get<P: ObjectProxy>(&self, ctx: &ThreadContext, owner: &P) -> Result<T> {
        check_owner(owner.raw(), "JField::get")?;
        let id = self.field_id(ctx, P::class_descriptor(), false)?;
        finish(ctx, ctx.vm().get_field(owner.raw(), id, T::kind()))
    }

    /// Writes the field of `owner`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn set<P: ObjectProxy>(&self, ctx: &ThreadContext, owner: &P, value: &T) -> Result<()> {
        check_owner(owner.raw(), "JField::set")?;
        let id = self.field_id(ctx, P::class_descriptor(), false)?;
        ctx.vm().set_field(owner.raw(), id, value.to_raw());
        ctx.check_exception()
    }

    /// Reads the static field of `class`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_static(&self, ctx: &ThreadContext, class: &ClassDescriptor) -> Result<T> {
        let class_ref = class.resolve(ctx)?;
        let id = self.field_id(ctx, class, true)?;
        finish(ctx, ctx.vm().get_static_field(class_ref, id, T::kind()))
    }

    /// Writes the static field of `class`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn set_static(&self, ctx: &ThreadContext, class: &ClassDescriptor, value: &T) -> Result<()> {
        let class_ref = class.resolve(ctx)?;
        let id = self.field_id(ctx, class, true)?;
        ctx.vm().set_static_field(class_ref, id, value.to_raw());
        ctx.check_exception()
    }

    /// Reads the field of `owner` into a write-through proxy.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn proxy<'ctx, P: ObjectProxy>(
        &self,
        ctx: &'ctx ThreadContext,
        owner: &P,
    ) -> Result<FieldProxy<'ctx, T>> {
        check_owner(owner.raw(), "JField::proxy")?;
        let field = self.field_id(ctx, P::class_descriptor(), false)?;
        let owner = FieldOwner::Instance(ctx.new_local_ref(owner.raw())?);
        let value = owner.read(ctx, field)?;
        Ok(FieldProxy {
            ctx,
            owner,
            field,
            value,
        })
    }

    /// Reads the static field of `class` into a write-through proxy.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn static_proxy<'ctx>(
        &self,
        ctx: &'ctx ThreadContext,
        class: &ClassDescriptor,
    ) -> Result<FieldProxy<'ctx, T>> {
        let class_ref = class.resolve(ctx)?;
        let field = self.field_id(ctx, class, true)?;
        let owner = FieldOwner::Static(class_ref);
        let value = owner.read(ctx, field)?;
        Ok(FieldProxy {
            ctx,
            owner,
            field,
            value,
        })
    }
}

impl<T> fmt::Debug for JField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JField")
            .field("name", &self.name)
            .field("resolved", &self.id.get().is_some())
            .finish()
    }
}

#[cfg(feature = "checked")]
fn check_owner(owner: RawRef, operation: &'static str) -> Result<()> {
    if owner.is_null() {
        return Err(Error::NullPointer { operation });
    }
    Ok(())
}

#[cfg(not(feature = "checked"))]
#[inline]
fn check_owner(_: RawRef, _: &'static str) -> Result<()> {
    Ok(())
}

// ============================================================================
// FieldProxy
// ============================================================================

enum FieldOwner<'ctx> {
    Instance(LocalRef<'ctx>),
    // pinned by its descriptor
    Static(RawRef),
}

impl FieldOwner<'_> {
    fn read<T: JavaType>(&self, ctx: &ThreadContext, field: FieldId) -> Result<T> {
        let vm = ctx.vm();
        let raw = match self {
            FieldOwner::Instance(obj) => vm.get_field(obj.raw(), field, T::kind()),
            FieldOwner::Static(class) => vm.get_static_field(*class, field, T::kind()),
        };
        finish(ctx, raw)
    }
}

/// A field value read at one point in time, bound to its field.
pub struct FieldProxy<'ctx, T> {
    ctx: &'ctx ThreadContext,
    owner: FieldOwner<'ctx>,
    field: FieldId,
    value: T,
}

impl<T: JavaType> FieldProxy<'_, T> {
    /// The value read when the proxy was created (or last refreshed).
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Consumes the proxy, returning the read value.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Writes `value` to the foreign field. The copy held by this proxy is
    /// left unchanged; call [`refresh`](Self::refresh) to observe the write.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the write throws.
    pub fn set(&self, value: &T) -> Result<()> {
        let vm = self.ctx.vm();
        match &self.owner {
            FieldOwner::Instance(obj) => vm.set_field(obj.raw(), self.field, value.to_raw()),
            FieldOwner::Static(class) => vm.set_static_field(*class, self.field, value.to_raw()),
        }
        self.ctx.check_exception()
    }

    /// Re-reads the foreign field.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if the read throws.
    pub fn refresh(&mut self) -> Result<&T> {
        self.value = self.owner.read(self.ctx, self.field)?;
        Ok(&self.value)
    }
}

impl<T: fmt::Debug> fmt::Debug for FieldProxy<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldProxy")
            .field("field", &self.field)
            .field("value", &self.value)
            .finish()
    }
}
