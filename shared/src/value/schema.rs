use std::collections::BTreeMap;

use crate::{
    registry::ValueError,
    value::{PropertyKey, Value, ValueType},
};

/// One declared field of a `TypeSchema`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    pub value_type: ValueType,
    /// Visible to remote readers.
    pub readable: bool,
    /// May be written after creation.
    pub updatable: bool,
}

/// Declares the shape of a named object type.
///
/// ```
/// use refsync_shared::{TypeSchema, ValueType};
///
/// let point = TypeSchema::define("Point")
///     .field("x", ValueType::Int)
///     .field("y", ValueType::Int)
///     .sealed_field("id", ValueType::Text);
/// assert!(point.can_update("x"));
/// assert!(!point.can_update("id"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeSchema {
    name: String,
    fields: BTreeMap<String, FieldSchema>,
}

impl TypeSchema {
    pub fn define(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(self, name: &str, value_type: ValueType) -> Self {
        self.with_field(name, value_type, true, true)
    }

    /// A field that is set on creation and never updated.
    pub fn sealed_field(self, name: &str, value_type: ValueType) -> Self {
        self.with_field(name, value_type, true, false)
    }

    /// A field that is not visible to remote readers.
    pub fn hidden_field(self, name: &str, value_type: ValueType) -> Self {
        self.with_field(name, value_type, false, true)
    }

    pub fn with_field(
        mut self,
        name: &str,
        value_type: ValueType,
        readable: bool,
        updatable: bool,
    ) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSchema {
                value_type,
                readable,
                updatable,
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSchema)> {
        self.fields.iter()
    }

    pub fn can_read(&self, name: &str) -> bool {
        self.fields.get(name).map(|f| f.readable).unwrap_or(false)
    }

    pub fn can_update(&self, name: &str) -> bool {
        self.fields.get(name).map(|f| f.updatable).unwrap_or(false)
    }

    /// `value` without the fields remote readers cannot see.
    pub fn visible(&self, value: Value) -> Value {
        match value {
            Value::Map(mut map) => {
                map.retain(|name, _| self.can_read(name));
                Value::Map(map)
            }
            other => other,
        }
    }

    /// A whole value written by a remote reader, with every hidden field
    /// taken from `current` instead.
    pub fn keep_hidden(&self, current: &Value, incoming: Value) -> Value {
        let Value::Map(mut map) = incoming else {
            return incoming;
        };
        for (name, _) in self.fields.iter().filter(|(_, field)| !field.readable) {
            match current.get(&PropertyKey::Name(name.clone())) {
                Some(kept) => map.insert(name.clone(), kept.clone()),
                None => map.remove(name),
            };
        }
        Value::Map(map)
    }

    /// Checks a single field write.
    pub fn check_field(&self, target: &str, name: &str, value: &Value) -> Result<(), ValueError> {
        let Some(field) = self.fields.get(name) else {
            return Err(ValueError::UnknownProperty {
                type_name: self.name.clone(),
                key: name.to_string(),
            });
        };
        if !field.value_type.accepts(value) {
            return Err(ValueError::TypeMismatch {
                target: format!("{}.{}", target, name),
                expected: field.value_type.to_string(),
                actual: value.kind_name().to_string(),
            });
        }
        Ok(())
    }

    /// Checks a whole initial value. Missing fields are allowed and read as
    /// null.
    pub fn check_value(&self, target: &str, value: &Value) -> Result<(), ValueError> {
        let Value::Map(map) = value else {
            return Err(ValueError::TypeMismatch {
                target: target.to_string(),
                expected: format!("<{}>", self.name),
                actual: value.kind_name().to_string(),
            });
        };
        for (name, field_value) in map {
            self.check_field(target, name, field_value)?;
        }
        Ok(())
    }

    /// Applies integer widening to every declared float field.
    pub fn coerce(&self, value: Value) -> Value {
        match value {
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(name, field_value)| {
                        let coerced = match self.fields.get(&name) {
                            Some(field) => field.value_type.coerce(field_value),
                            None => field_value,
                        };
                        (name, coerced)
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}
