//! Array proxies.
//!
//! A [`JArray`] wraps one foreign array. Its length is queried at most once
//! and cached; foreign arrays never change length. Indexing with
//! [`JArray::at`] copies the element out into an [`ElementProxy`] that
//! remembers the array and index, so assignment through the proxy writes
//! the foreign element instead of the copy:
//!
//! ```no_run
//! use jace::array::JArray;
//!
//! # fn demo(ctx: &jace::context::ThreadContext) -> jace::error::Result<()> {
//! let numbers = JArray::<i32>::from_slice(ctx, &[1, 2, 3, 4])?;
//! let third = numbers.at(ctx, 2)?;
//! third.set(&30)?;
//! assert_eq!(*third.get(), 3);
//! assert_eq!(numbers.get(ctx, 2)?, 30);
//! # Ok(())
//! # }
//! ```
//!
//! Bounds and null checks run only in builds with the `checked` feature.
//! Without it an out-of-range index reaches the runtime, which raises its
//! own `ArrayIndexOutOfBoundsException`.

use crate::context::ThreadContext;
use crate::descriptor::ClassDescriptor;
use crate::error::{Error, Result};
use crate::method::finish;
use crate::object::{ObjectHandle, ObjectProxy};
use crate::sys::{RawRef, RawValue, TypeKind};
use crate::value::JavaType;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};

const UNKNOWN_LENGTH: i32 = -1;

/// A foreign array with elements of type `T`.
pub struct JArray<T> {
    handle: ObjectHandle,
    length: AtomicI32,
    _element: PhantomData<fn() -> T>,
}

impl<T: JavaType> JArray<T> {
    /// Allocates an array of `length` zero (or null) elements.
    ///
    /// # Errors
    ///
    /// Returns the translated exception if allocation throws, for example
    /// `NegativeArraySizeException`.
    pub fn new(ctx: &ThreadContext, length: i32) -> Result<Self> {
        let vm = ctx.vm();
        let raw = match T::kind() {
            TypeKind::Object => {
                let element = T::class_descriptor().resolve(ctx)?;
                vm.new_object_array(length, element, RawRef::NULL)
            }
            kind => vm.new_primitive_array(kind, length),
        };
        let local = ctx.adopt_local(raw);
        ctx.check_exception()?;
        if local.is_null() {
            return Err(Error::interop(format!(
                "Unable to allocate an array of {} with length {length}.",
                T::class_descriptor()
            )));
        }
        let array = JArray::from_handle(ObjectHandle::new(ctx, local.raw())?);
        array.length.store(length, Ordering::Relaxed);
        Ok(array)
    }

    /// Allocates an array holding `values`.
    ///
    /// # Errors
    ///
    /// As for [`new`](Self::new) and [`set`](Self::set).
    pub fn from_slice(ctx: &ThreadContext, values: &[T]) -> Result<Self> {
        let length = i32::try_from(values.len()).map_err(|_| {
            Error::interop(format!("{} elements do not fit in a foreign array.", values.len()))
        })?;
        let array = JArray::new(ctx, length)?;
        for (index, value) in (0..length).zip(values) {
            array.set(ctx, index, value)?;
        }
        Ok(array)
    }

    /// The array length, queried once and cached.
    ///
    /// # Errors
    ///
    /// Checked builds return [`Error::NullPointer`] for a null array;
    /// otherwise the runtime's exception is translated.
    pub fn length(&self, ctx: &ThreadContext) -> Result<i32> {
        let cached = self.length.load(Ordering::Relaxed);
        if cached != UNKNOWN_LENGTH {
            return Ok(cached);
        }
        self.check_null("JArray::length")?;
        let length = ctx.vm().get_array_length(self.raw());
        ctx.check_exception()?;
        self.length.store(length, Ordering::Relaxed);
        Ok(length)
    }

    /// The cached length, if it has been queried.
    #[must_use]
    pub fn cached_length(&self) -> Option<i32> {
        let length = self.length.load(Ordering::Relaxed);
        (length != UNKNOWN_LENGTH).then_some(length)
    }

    /// True if the array has no elements.
    ///
    /// # Errors
    ///
    /// As for [`length`](Self::length).
    pub fn is_empty(&self, ctx: &ThreadContext) -> Result<bool> {
        Ok(self.length(ctx)? == 0)
    }

    /// Copies out the element at `index`.
    ///
    /// # Errors
    ///
    /// Checked builds return [`Error::ArrayIndexOutOfBounds`] or
    /// [`Error::NullPointer`]; otherwise the runtime's exception is
    /// translated.
    pub fn get(&self, ctx: &ThreadContext, index: i32) -> Result<T> {
        self.check_index(ctx, index)?;
        finish(ctx, ctx.vm().get_array_element(self.raw(), index, T::kind()))
    }

    /// Writes the element at `index`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get); storing an object of the wrong class
    /// raises `ArrayStoreException`.
    pub fn set(&self, ctx: &ThreadContext, index: i32, value: &T) -> Result<()> {
        self.check_index(ctx, index)?;
        ctx.vm().set_array_element(self.raw(), index, value.to_raw());
        ctx.check_exception()
    }

    /// The element at `index`, as a write-through proxy.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn at<'a>(&'a self, ctx: &'a ThreadContext, index: i32) -> Result<ElementProxy<'a, T>> {
        let value = self.get(ctx, index)?;
        Ok(ElementProxy {
            array: self,
            ctx,
            index,
            value,
        })
    }

    /// Iterates over copies of the elements.
    ///
    /// # Errors
    ///
    /// As for [`length`](Self::length).
    pub fn iter<'a>(&'a self, ctx: &'a ThreadContext) -> Result<Iter<'a, T>> {
        let back = self.length(ctx)?;
        Ok(Iter {
            array: self,
            ctx,
            front: 0,
            back,
        })
    }

    /// Copies every element out.
    ///
    /// # Errors
    ///
    /// Fails on the first element that cannot be read.
    pub fn to_vec(&self, ctx: &ThreadContext) -> Result<Vec<T>> {
        self.iter(ctx)?.collect()
    }

    #[cfg(feature = "checked")]
    fn check_null(&self, operation: &'static str) -> Result<()> {
        if self.is_null() {
            return Err(Error::NullPointer { operation });
        }
        Ok(())
    }

    #[cfg(not(feature = "checked"))]
    #[inline]
    fn check_null(&self, _: &'static str) -> Result<()> {
        Ok(())
    }

    #[cfg(feature = "checked")]
    fn check_index(&self, ctx: &ThreadContext, index: i32) -> Result<()> {
        self.check_null("JArray index")?;
        let length = self.length(ctx)?;
        if !(0..length).contains(&index) {
            return Err(Error::ArrayIndexOutOfBounds { index, length });
        }
        Ok(())
    }

    #[cfg(not(feature = "checked"))]
    #[inline]
    fn check_index(&self, _: &ThreadContext, _: i32) -> Result<()> {
        Ok(())
    }
}

impl<T: JavaType> JavaType for JArray<T> {
    fn class_descriptor() -> &'static ClassDescriptor {
        ClassDescriptor::array_of(T::class_descriptor())
    }

    fn to_raw(&self) -> RawValue {
        RawValue::Object(self.handle.raw())
    }

    fn from_raw(ctx: &ThreadContext, raw: RawValue) -> Result<Self> {
        ObjectHandle::from_value(ctx, raw).map(JArray::from_handle)
    }
}

impl<T: JavaType> ObjectProxy for JArray<T> {
    fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut ObjectHandle {
        self.length.store(UNKNOWN_LENGTH, Ordering::Relaxed);
        &mut self.handle
    }

    fn from_handle(handle: ObjectHandle) -> Self {
        JArray {
            handle,
            length: AtomicI32::new(UNKNOWN_LENGTH),
            _element: PhantomData,
        }
    }

    fn into_handle(self) -> ObjectHandle {
        self.handle
    }
}

impl<T> fmt::Debug for JArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JArray")
            .field("raw", &self.handle.raw())
            .field("length", &self.length.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Elements
// ============================================================================

/// One array element, copied out, bound to its array and index.
pub struct ElementProxy<'a, T> {
    array: &'a JArray<T>,
    ctx: &'a ThreadContext,
    index: i32,
    value: T,
}

impl<T: JavaType> ElementProxy<'_, T> {
    /// The copied value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// The element index.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Consumes the proxy, returning the copied value.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Writes `value` to the foreign element. The copy held by this proxy
    /// is not changed.
    ///
    /// # Errors
    ///
    /// As for [`JArray::set`].
    pub fn set(&self, value: &T) -> Result<()> {
        self.array.set(self.ctx, self.index, value)
    }
}

impl<T: fmt::Debug> fmt::Debug for ElementProxy<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementProxy")
            .field("index", &self.index)
            .field("value", &self.value)
            .finish()
    }
}

/// Iterator over copies of an array's elements.
pub struct Iter<'a, T> {
    array: &'a JArray<T>,
    ctx: &'a ThreadContext,
    front: i32,
    back: i32,
}

impl<T: JavaType> Iterator for Iter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let item = self.array.get(self.ctx, self.front);
        self.front += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = usize::try_from(self.back - self.front).unwrap_or(0);
        (len, Some(len))
    }
}

impl<T: JavaType> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        Some(self.array.get(self.ctx, self.back))
    }
}

impl<T: JavaType> ExactSizeIterator for Iter<'_, T> {}
