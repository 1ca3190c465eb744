//! Runtime type descriptors and the name/shape registry.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use apache_avro::types::Value as AvroValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{SchemaError, SchemaResult};

/// A payload value that can travel through any schema codec.
///
/// Every `Serialize + Debug + Send + Sync + 'static` type implements this trait
/// automatically.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Returns `self` as [`Any`] for downcasting and shape lookups.
    fn as_any(&self) -> &dyn Any;

    /// Returns the Rust type name of the value.
    fn type_name(&self) -> &'static str;

    /// Serializes the value as a JSON document.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures from `serde_json`.
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;

    /// Converts the value into the Avro value model.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures from `apache-avro`.
    fn to_avro(&self) -> Result<AvroValue, apache_avro::Error>;
}

impl<T> Message for T
where
    T: Serialize + Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn to_avro(&self) -> Result<AvroValue, apache_avro::Error> {
        apache_avro::to_value(self)
    }
}

type JsonFactory = fn(&[u8]) -> serde_json::Result<Box<dyn Message>>;
type AvroFactory = fn(AvroValue) -> Result<Box<dyn Message>, apache_avro::Error>;

/// Descriptor binding a logical type name to a concrete Rust type.
///
/// The descriptor captures factory functions for each codec family so values
/// can be materialized from bytes without naming the type at the call site.
#[derive(Clone, Copy)]
pub struct MessageType {
    type_id: TypeId,
    type_name: &'static str,
    from_json: JsonFactory,
    from_avro: AvroFactory,
}

impl MessageType {
    /// Builds the descriptor of `T`.
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: Message + DeserializeOwned,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            from_json: json_factory::<T>,
            from_avro: avro_factory::<T>,
        }
    }

    /// Returns the runtime shape of the described type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the Rust type name of the described type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Materializes a value from a JSON document.
    ///
    /// # Errors
    ///
    /// Propagates deserialization failures from `serde_json`.
    pub fn from_json(&self, bytes: &[u8]) -> serde_json::Result<Box<dyn Message>> {
        (self.from_json)(bytes)
    }

    /// Materializes a value from a decoded Avro value.
    ///
    /// # Errors
    ///
    /// Propagates deserialization failures from `apache-avro`.
    pub fn from_avro(&self, value: AvroValue) -> Result<Box<dyn Message>, apache_avro::Error> {
        (self.from_avro)(value)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageType {}

fn json_factory<T>(bytes: &[u8]) -> serde_json::Result<Box<dyn Message>>
where
    T: Message + DeserializeOwned,
{
    Ok(Box::new(serde_json::from_slice::<T>(bytes)?))
}

fn avro_factory<T>(value: AvroValue) -> Result<Box<dyn Message>, apache_avro::Error>
where
    T: Message + DeserializeOwned,
{
    Ok(Box::new(apache_avro::from_value::<T>(&value)?))
}

#[derive(Default)]
struct Indexes {
    by_name: HashMap<String, MessageType>,
    by_shape: HashMap<TypeId, String>,
}

/// Bidirectional registry between logical type names and Rust types.
///
/// Registering a name that already exists replaces its shape, and registering
/// a shape already held by another name moves it to the new name. Lookups by
/// name and by shape therefore always agree.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<Indexes>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("registered", &self.list_names())
            .finish()
    }
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDefinition`] if the name is empty.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register<T>(&self, name: impl Into<String>) -> SchemaResult<()>
    where
        T: Message + DeserializeOwned,
    {
        self.register_type(name, MessageType::of::<T>())
    }

    /// Registers a prepared descriptor under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDefinition`] if the name is empty.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register_type(&self, name: impl Into<String>, ty: MessageType) -> SchemaResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchemaError::invalid("type name cannot be empty"));
        }

        let mut guard = self.inner.write().expect("type registry poisoned");
        if let Some(previous) = guard.by_name.remove(&name) {
            guard.by_shape.remove(&previous.type_id());
        }
        if let Some(other) = guard.by_shape.remove(&ty.type_id()) {
            guard.by_name.remove(&other);
        }
        guard.by_shape.insert(ty.type_id(), name.clone());
        debug!(type_name = %name, rust_type = ty.type_name(), "registered message type");
        guard.by_name.insert(name, ty);
        Ok(())
    }

    /// Looks up a descriptor by logical name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::TypeNotFound`] when the name is unknown.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn get_by_name(&self, name: &str) -> SchemaResult<MessageType> {
        let guard = self.inner.read().expect("type registry poisoned");
        guard
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::TypeNotFound { name: name.into() })
    }

    /// Looks up the logical name registered for a runtime shape.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnregisteredShape`] when the shape is unknown.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn get_by_shape(&self, shape: TypeId) -> SchemaResult<String> {
        let guard = self.inner.read().expect("type registry poisoned");
        guard
            .by_shape
            .get(&shape)
            .cloned()
            .ok_or_else(|| SchemaError::UnregisteredShape {
                type_name: format!("{shape:?}"),
            })
    }

    /// Looks up the logical name registered for the runtime type of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnregisteredShape`] when the type is unknown.
    pub fn name_of(&self, value: &dyn Message) -> SchemaResult<String> {
        self.get_by_shape(value.as_any().type_id())
            .map_err(|_| SchemaError::UnregisteredShape {
                type_name: value.type_name().into(),
            })
    }

    /// Looks up the logical name registered for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnregisteredShape`] when `T` is unknown.
    pub fn get_for<T: Any>(&self) -> SchemaResult<String> {
        self.get_by_shape(TypeId::of::<T>())
            .map_err(|_| SchemaError::UnregisteredShape {
                type_name: type_name::<T>().into(),
            })
    }

    /// Returns every registered name in lexicographic order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let guard = self.inner.read().expect("type registry poisoned");
        let mut names: Vec<_> = guard.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes the type registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::TypeNotFound`] when the name is unknown.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn unregister(&self, name: &str) -> SchemaResult<()> {
        let mut guard = self.inner.write().expect("type registry poisoned");
        let ty = guard
            .by_name
            .remove(name)
            .ok_or_else(|| SchemaError::TypeNotFound { name: name.into() })?;
        guard.by_shape.remove(&ty.type_id());
        Ok(())
    }

    /// Returns `true` when a type is registered under `name`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        let guard = self.inner.read().expect("type registry poisoned");
        guard.by_name.contains_key(name)
    }
}
