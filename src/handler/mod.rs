//! Handler registry and argument decoding plans.
//!
//! A handler pairs a function path with a call plan built once at
//! registration: the plan knows how to decode the task payload into the
//! function's argument tuple and invoke it. Registration is monomorphized
//! per signature, so dispatch at run time is one map lookup, one decode,
//! and one call.
//!
//! Payloads are MessagePack arrays of the arguments in declaration order.
//! Single-argument handlers also accept the older form where the bare
//! value was encoded without the array wrapper; the two are told apart by
//! the payload's leading type byte. An empty payload yields default
//! values, the equivalent of calling with no argument.

use std::collections::HashMap;
use std::io::Cursor;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::codec::{self, CodecError};

/// Errors raised while dispatching a task to a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not decode into the handler's argument plan.
    #[error(transparent)]
    Decode(#[from] CodecError),

    /// The handler ran and reported failure.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked. The worker contains the panic and keeps
    /// running; the task is released, not retried.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Return types accepted from handler functions: `()` for handlers that
/// cannot fail, or `Result<(), E>` for ones that can.
pub trait IntoHandlerResult {
    /// Converts the handler's return value into the dispatch outcome.
    fn into_handler_result(self) -> Result<(), HandlerError>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E: std::fmt::Display> IntoHandlerResult for Result<(), E> {
    fn into_handler_result(self) -> Result<(), HandlerError> {
        self.map_err(|err| HandlerError::Failed(err.to_string()))
    }
}

/// Argument tuples decodable from a task payload.
pub trait FromPayload: Sized {
    /// Decodes the payload into the argument tuple.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the payload does not match the tuple.
    fn from_payload(payload: &[u8]) -> Result<Self, CodecError>;
}

impl FromPayload for () {
    fn from_payload(_payload: &[u8]) -> Result<Self, CodecError> {
        Ok(())
    }
}

impl<T: DeserializeOwned + Default> FromPayload for (T,) {
    fn from_payload(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.is_empty() {
            return Ok((T::default(),));
        }
        if codec::is_array_payload(payload) {
            Ok(rmp_serde::from_slice::<(T,)>(payload)?)
        } else {
            // Older producers encoded a lone argument without the array
            // wrapper; the leading scalar or map marker gives it away.
            Ok((rmp_serde::from_slice::<T>(payload)?,))
        }
    }
}

macro_rules! impl_from_payload {
    ($($ty:ident),+) => {
        impl<$($ty,)+> FromPayload for ($($ty,)+)
        where
            $($ty: DeserializeOwned + Default,)+
        {
            fn from_payload(payload: &[u8]) -> Result<Self, CodecError> {
                if payload.is_empty() {
                    return Ok(($($ty::default(),)+));
                }
                Ok(rmp_serde::from_slice::<Self>(payload)?)
            }
        }
    };
}

impl_from_payload!(T1, T2);
impl_from_payload!(T1, T2, T3);
impl_from_payload!(T1, T2, T3, T4);
impl_from_payload!(T1, T2, T3, T4, T5);
impl_from_payload!(T1, T2, T3, T4, T5, T6);
impl_from_payload!(T1, T2, T3, T4, T5, T6, T7);
impl_from_payload!(T1, T2, T3, T4, T5, T6, T7, T8);

/// Argument tuples whose final `Vec` collects the tail of the payload
/// array, for handlers whose last parameter is variadic.
pub trait FromPayloadVariadic: Sized {
    /// Decodes fixed arguments by position and sweeps the rest into the
    /// trailing `Vec`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the payload does not match the tuple.
    fn from_payload_variadic(payload: &[u8]) -> Result<Self, CodecError>;
}

macro_rules! impl_from_payload_variadic {
    ($count:expr $(, $ty:ident)*) => {
        impl<$($ty,)* V> FromPayloadVariadic for ($($ty,)* Vec<V>,)
        where
            $($ty: DeserializeOwned + Default,)*
            V: DeserializeOwned,
        {
            #[allow(non_snake_case)]
            fn from_payload_variadic(payload: &[u8]) -> Result<Self, CodecError> {
                if payload.is_empty() {
                    return Ok(($($ty::default(),)* Vec::new(),));
                }
                let mut cur = Cursor::new(payload);
                let len = rmp::decode::read_array_len(&mut cur)
                    .map_err(|e| CodecError::Decode(e.to_string()))? as usize;
                let fixed: usize = $count;
                if len < fixed {
                    return Err(CodecError::Decode(format!(
                        "expected at least {fixed} arguments, payload has {len}"
                    )));
                }
                let mut de = rmp_serde::Deserializer::new(cur);
                $(let $ty: $ty = Deserialize::deserialize(&mut de)?;)*
                let mut tail = Vec::with_capacity(len - fixed);
                for _ in fixed..len {
                    tail.push(V::deserialize(&mut de)?);
                }
                Ok(($($ty,)* tail,))
            }
        }
    };
}

impl_from_payload_variadic!(0);
impl_from_payload_variadic!(1, T1);
impl_from_payload_variadic!(2, T1, T2);
impl_from_payload_variadic!(3, T1, T2, T3);

/// Async callables invokable with a decoded argument tuple.
///
/// Implemented for plain `async fn` items and closures of up to eight
/// arguments returning `()` or `Result<(), E>`.
pub trait HandlerFn<Args>: Send + Sync + 'static {
    /// Invokes the callable with already-decoded arguments.
    fn invoke(&self, args: Args) -> BoxFuture<'static, Result<(), HandlerError>>;
}

macro_rules! impl_handler_fn {
    ($($ty:ident),*) => {
        impl<F, Fut, R: 'static, $($ty,)*> HandlerFn<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = R> + Send + 'static,
            R: IntoHandlerResult,
            $($ty: Send + 'static,)*
        {
            #[allow(non_snake_case)]
            fn invoke(&self, ($($ty,)*): ($($ty,)*)) -> BoxFuture<'static, Result<(), HandlerError>> {
                (self)($($ty),*)
                    .map(IntoHandlerResult::into_handler_result)
                    .boxed()
            }
        }
    };
}

impl_handler_fn!();
impl_handler_fn!(T1);
impl_handler_fn!(T1, T2);
impl_handler_fn!(T1, T2, T3);
impl_handler_fn!(T1, T2, T3, T4);
impl_handler_fn!(T1, T2, T3, T4, T5);
impl_handler_fn!(T1, T2, T3, T4, T5, T6);
impl_handler_fn!(T1, T2, T3, T4, T5, T6, T7);
impl_handler_fn!(T1, T2, T3, T4, T5, T6, T7, T8);

type CallFn = Box<dyn Fn(&[u8]) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// A registered handler: a function path plus the prebuilt
/// decode-and-call plan.
pub struct Handler {
    path: String,
    call: CallFn,
}

impl Handler {
    /// Builds a handler whose arguments decode as a positional tuple.
    pub fn new<F, Args>(path: impl Into<String>, f: F) -> Self
    where
        F: HandlerFn<Args>,
        Args: FromPayload + Send + 'static,
    {
        Self {
            path: path.into(),
            call: Box::new(move |payload: &[u8]| match Args::from_payload(payload) {
                Ok(args) => f.invoke(args),
                Err(err) => future::err(HandlerError::Decode(err)).boxed(),
            }),
        }
    }

    /// Builds a handler whose final parameter receives the tail of the
    /// argument array.
    pub fn new_variadic<F, Args>(path: impl Into<String>, f: F) -> Self
    where
        F: HandlerFn<Args>,
        Args: FromPayloadVariadic + Send + 'static,
    {
        Self {
            path: path.into(),
            call: Box::new(move |payload: &[u8]| match Args::from_payload_variadic(payload) {
                Ok(args) => f.invoke(args),
                Err(err) => future::err(HandlerError::Decode(err)).boxed(),
            }),
        }
    }

    /// The function path this handler answers to.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decodes the payload and invokes the callable.
    ///
    /// Panics inside the callable are not caught here; the worker installs
    /// containment around the call.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Decode`] when the payload does not match
    /// the argument plan, or [`HandlerError::Failed`] from the callable.
    pub async fn call(&self, payload: &[u8]) -> Result<(), HandlerError> {
        (self.call)(payload).await
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Maps function paths to handlers.
///
/// Populated during startup; the worker treats it as read-only once it is
/// running, so no locking is involved on the dispatch path.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under the function's own symbol path.
    ///
    /// Closures have no stable path; they are skipped with a warning and
    /// must be registered through [`register_as`](Self::register_as).
    pub fn register<F, Args>(&mut self, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayload + Send + 'static,
    {
        let path = func_path::<F>();
        if !is_symbol_path(&path) {
            tracing::warn!(path = %path, "cannot derive a stable function path; use register_as");
            return;
        }
        self.insert(Handler::new(path, f));
    }

    /// Registers a handler under an explicit function path.
    pub fn register_as<F, Args>(&mut self, path: impl Into<String>, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayload + Send + 'static,
    {
        self.insert(Handler::new(path, f));
    }

    /// Registers a variadic handler under the function's own symbol path.
    ///
    /// The function's last parameter must be a `Vec`, which receives every
    /// argument past the fixed ones.
    pub fn register_variadic<F, Args>(&mut self, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayloadVariadic + Send + 'static,
    {
        let path = func_path::<F>();
        if !is_symbol_path(&path) {
            tracing::warn!(path = %path, "cannot derive a stable function path; use register_variadic_as");
            return;
        }
        self.insert(Handler::new_variadic(path, f));
    }

    /// Registers a variadic handler under an explicit function path.
    pub fn register_variadic_as<F, Args>(&mut self, path: impl Into<String>, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayloadVariadic + Send + 'static,
    {
        self.insert(Handler::new_variadic(path, f));
    }

    /// Adds a prebuilt handler, replacing any previous one on the same
    /// path.
    pub fn insert(&mut self, handler: Handler) {
        self.handlers.insert(handler.path().to_string(), handler);
    }

    /// Looks up the handler for a function path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Handler> {
        self.handlers.get(path)
    }

    /// The number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Derives the function path for `F` from its type name. For plain `fn`
/// items this is the full module path of the function.
pub(crate) fn func_path<F>() -> String {
    std::any::type_name::<F>().to_string()
}

/// Whether a derived path names a plain function item rather than a
/// closure or other anonymous callable.
pub(crate) fn is_symbol_path(path: &str) -> bool {
    !path.is_empty() && !path.contains("{{closure}}")
}
