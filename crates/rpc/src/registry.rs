use crate::codec::ParamType;
use crate::error::{DispatchError, Error, HandlerError, Result};
use crate::topic;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Arguments already converted to a function's declared parameter types.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    /// Wraps converted values.
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Deserializes the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or the value does not
    /// deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> std::result::Result<T, HandlerError> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| HandlerError::new(format!("missing argument {index}")))?;

        T::deserialize(value).map_err(HandlerError::from)
    }

    /// Returns the values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// The single shape every registered function has, whatever its arity.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Invokes the function body.
    async fn call(&self, args: Args) -> std::result::Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> RpcHandler for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, args: Args) -> std::result::Result<Value, HandlerError> {
        self(args).await
    }
}

struct SyncHandler<F>(F);

#[async_trait]
impl<F> RpcHandler for SyncHandler<F>
where
    F: Fn(Args) -> std::result::Result<Value, HandlerError> + Send + Sync + 'static,
{
    async fn call(&self, args: Args) -> std::result::Result<Value, HandlerError> {
        (self.0)(args)
    }
}

/// A named function, its signature and its sharing mode.
#[derive(Clone)]
pub struct FunctionRegistration {
    name: String,
    params: Vec<ParamType>,
    handler: Arc<dyn RpcHandler>,
    shared: bool,
}

impl FunctionRegistration {
    /// Registers an asynchronous handler in exclusive mode.
    pub fn new<H>(
        name: impl Into<String>,
        params: impl IntoIterator<Item = ParamType>,
        handler: H,
    ) -> Self
    where
        H: RpcHandler,
    {
        Self {
            name: name.into(),
            params: params.into_iter().collect(),
            handler: Arc::new(handler),
            shared: false,
        }
    }

    /// Registers a synchronous handler in exclusive mode.
    pub fn blocking<F>(
        name: impl Into<String>,
        params: impl IntoIterator<Item = ParamType>,
        handler: F,
    ) -> Self
    where
        F: Fn(Args) -> std::result::Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Self::new(name, params, SyncHandler(handler))
    }

    /// Sets grouped (`true`) or exclusive (`false`) subscription mode.
    ///
    /// Grouped functions are load-balanced: each call reaches exactly one
    /// server instance of the group.
    #[must_use]
    pub const fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter types.
    #[must_use]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Whether the function uses a grouped subscription.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    /// Invokes the handler.
    ///
    /// # Errors
    ///
    /// Returns whatever error the handler body produced.
    pub async fn invoke(&self, args: Args) -> std::result::Result<Value, HandlerError> {
        self.handler.call(args).await
    }
}

impl Debug for FunctionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistration")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

/// Immutable name → function table built once at startup.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionRegistration>,
}

impl FunctionRegistry {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is registered twice or is not usable as a
    /// topic level.
    pub fn new(registrations: impl IntoIterator<Item = FunctionRegistration>) -> Result<Self> {
        let mut functions = HashMap::new();

        for registration in registrations {
            topic::validate_name(&registration.name, &[])?;

            let name = registration.name.clone();
            if functions.insert(name.clone(), registration).is_some() {
                return Err(Error::DuplicateFunction(name));
            }
        }

        Ok(Self { functions })
    }

    /// Looks up a function by name.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::FunctionNotFound`] for unknown names.
    pub fn lookup(&self, name: &str) -> std::result::Result<&FunctionRegistration, DispatchError> {
        self.functions
            .get(name)
            .ok_or_else(|| DispatchError::FunctionNotFound(name.to_string()))
    }

    /// Iterates over all registrations.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionRegistration> {
        self.functions.values()
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no functions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
