//! The in-memory task record.

use std::sync::OnceLock;

use serde::Serialize;

use crate::codec::{self, CodecError};

/// Arguments attachable to a task.
///
/// `()` means no argument and produces an empty payload. Tuples of up to
/// eight serializable values encode as a positional array in declaration
/// order, which is how the consuming handler decodes them back. A single
/// argument is the one-element tuple: `Task::new("pkg.f", (5i64,))`.
pub trait TaskArgs {
    /// Encodes the arguments into payload bytes.
    fn encode(&self) -> Result<Vec<u8>, CodecError>;
}

impl TaskArgs for () {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_task_args {
    ($($ty:ident),+) => {
        impl<$($ty: Serialize,)+> TaskArgs for ($($ty,)+) {
            fn encode(&self) -> Result<Vec<u8>, CodecError> {
                codec::encode_args(self)
            }
        }
    };
}

impl_task_args!(T1);
impl_task_args!(T1, T2);
impl_task_args!(T1, T2, T3);
impl_task_args!(T1, T2, T3, T4);
impl_task_args!(T1, T2, T3, T4, T5);
impl_task_args!(T1, T2, T3, T4, T5, T6);
impl_task_args!(T1, T2, T3, T4, T5, T6, T7);
impl_task_args!(T1, T2, T3, T4, T5, T6, T7, T8);

/// A unit of work: the path of a registered handler function plus the
/// encoded argument payload.
///
/// The payload is encoded when the task is built; the full wire record is
/// encoded at most once, on first [`serialize`](Task::serialize), and a
/// deserialized task re-serializes to its original bytes unchanged.
///
/// Two tasks are equal when they name the same function and carry the same
/// payload bytes. Argument encoding is deterministic, so this matches
/// equality of the argument values themselves.
#[derive(Debug, Clone)]
pub struct Task {
    func_path: String,
    payload: Vec<u8>,
    data: OnceLock<Vec<u8>>,
}

impl Task {
    /// Builds a task for the handler registered under `func_path`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the arguments cannot be encoded.
    pub fn new<A: TaskArgs>(func_path: impl Into<String>, args: A) -> Result<Self, CodecError> {
        Ok(Self {
            func_path: func_path.into(),
            payload: args.encode()?,
            data: OnceLock::new(),
        })
    }

    /// Builds a task whose function path is derived from the function value
    /// itself, so producer and worker can share a plain `fn` item instead
    /// of a string constant.
    ///
    /// # Errors
    ///
    /// Fails for closures and other callables without a stable symbol path,
    /// and for arguments that cannot be encoded.
    pub fn for_fn<F, A: TaskArgs>(_f: F, args: A) -> Result<Self, CodecError> {
        let path = crate::handler::func_path::<F>();
        if !crate::handler::is_symbol_path(&path) {
            return Err(CodecError::InvalidRecord(
                "cannot derive a function path from a closure",
            ));
        }
        Self::new(path, args)
    }

    /// The function path naming the handler for this task.
    #[must_use]
    pub fn func_path(&self) -> &str {
        &self.func_path
    }

    /// The encoded argument payload. Empty when the task carries no
    /// argument.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the wire encoding of this task, computing it on first use.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the record cannot be encoded.
    pub fn serialize(&self) -> Result<&[u8], CodecError> {
        if let Some(data) = self.data.get() {
            return Ok(data);
        }
        let encoded = codec::encode_record(&self.func_path, &self.payload)?;
        Ok(self.data.get_or_init(|| encoded))
    }

    /// Reconstructs a task from its wire encoding, keeping the original
    /// bytes so re-serialization is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the bytes are not a task record.
    pub fn deserialize(data: Vec<u8>) -> Result<Self, CodecError> {
        let (func_path, payload) = codec::decode_record(&data)?;
        let memo = OnceLock::new();
        let _ = memo.set(data);
        Ok(Self {
            func_path,
            payload,
            data: memo,
        })
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.func_path == other.func_path && self.payload == other.payload
    }
}

impl Eq for Task {}
