use crate::{
    protocol::UpdateAction,
    registry::{observer::ChangeKind, ValueError},
    value::{PropertyKey, TypeSchema, Value, ValueType},
};

/// The constraints a mutation is checked against.
pub(crate) struct MutationRules<'a> {
    pub target: String,
    pub declared_type: &'a ValueType,
    pub schema: Option<&'a TypeSchema>,
    pub sealed: bool,
}

/// The outcome of an action, before it is committed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppliedChange {
    pub kind: ChangeKind,
    pub key: Option<PropertyKey>,
    pub value: Option<Value>,
    pub previous: Option<Value>,
    pub added_key: bool,
}

impl AppliedChange {
    fn new(kind: ChangeKind, key: Option<PropertyKey>, value: Option<Value>, previous: Option<Value>) -> Self {
        Self {
            kind,
            key,
            value,
            previous,
            added_key: false,
        }
    }
}

impl MutationRules<'_> {
    fn sealed_err(&self, operation: &'static str) -> ValueError {
        ValueError::Sealed {
            reference: self.target.clone(),
            operation,
        }
    }

    fn kind_err(&self, operation: &'static str, current: &Value) -> ValueError {
        ValueError::WrongValueKind {
            reference: self.target.clone(),
            operation,
            actual: current.kind_name().to_string(),
        }
    }

    fn index_err(&self, index: usize, length: usize) -> ValueError {
        ValueError::IndexOutOfRange {
            reference: self.target.clone(),
            index,
            length,
        }
    }
}

/// Computes the value `action` produces from `current` without touching
/// any state. `Ok(None)` means the action changes nothing.
pub(crate) fn apply_action(
    current: &Value,
    action: &UpdateAction,
    rules: &MutationRules,
) -> Result<Option<(Value, AppliedChange)>, ValueError> {
    match action {
        UpdateAction::SetValue(value) => set_value(current, value, rules),
        UpdateAction::SetProperty { key, value } => set_property(current, key, value, rules),
        UpdateAction::DeleteProperty { key } => delete_property(current, key, rules),
        UpdateAction::AddElements { values } => {
            let Value::List(list) = current else {
                return Err(rules.kind_err("add_element", current));
            };
            if values.is_empty() {
                return Ok(None);
            }
            if rules.sealed {
                return Err(rules.sealed_err("add elements"));
            }
            let mut next = list.clone();
            next.extend(values.iter().cloned());
            let change = AppliedChange::new(
                ChangeKind::Add,
                Some(PropertyKey::Index(list.len())),
                Some(Value::List(values.clone())),
                None,
            );
            Ok(Some((Value::List(next), change)))
        }
        UpdateAction::RemoveElement { index } => {
            let Value::List(list) = current else {
                return Err(rules.kind_err("remove_element", current));
            };
            if rules.sealed {
                return Err(rules.sealed_err("remove elements"));
            }
            if *index >= list.len() {
                return Err(rules.index_err(*index, list.len()));
            }
            let mut next = list.clone();
            let removed = next.remove(*index);
            let change = AppliedChange::new(
                ChangeKind::Remove,
                Some(PropertyKey::Index(*index)),
                None,
                Some(removed),
            );
            Ok(Some((Value::List(next), change)))
        }
        UpdateAction::Clear => {
            let is_empty = match current {
                Value::Map(map) => map.is_empty(),
                Value::List(list) => list.is_empty(),
                _ => return Err(rules.kind_err("clear", current)),
            };
            if is_empty {
                return Ok(None);
            }
            if rules.sealed {
                return Err(rules.sealed_err("clear"));
            }
            let next = match current {
                Value::Map(_) => Value::Map(Default::default()),
                _ => Value::List(Vec::new()),
            };
            let change = AppliedChange::new(ChangeKind::Clear, None, None, Some(current.clone()));
            Ok(Some((next, change)))
        }
        UpdateAction::Splice {
            start,
            delete_count,
            insert,
        } => splice(current, *start, *delete_count, insert, rules),
    }
}

fn set_value(
    current: &Value,
    value: &Value,
    rules: &MutationRules,
) -> Result<Option<(Value, AppliedChange)>, ValueError> {
    if !rules.declared_type.accepts(value) {
        return Err(ValueError::TypeMismatch {
            target: rules.target.clone(),
            expected: rules.declared_type.to_string(),
            actual: value.kind_name().to_string(),
        });
    }
    if let (Some(schema), Value::Map(_)) = (rules.schema, value) {
        schema.check_value(&rules.target, value)?;
    }
    if rules.sealed {
        let same_shape = match (current, value) {
            (Value::Map(old), Value::Map(new)) => old.keys().eq(new.keys()),
            (Value::List(old), Value::List(new)) => old.len() == new.len(),
            _ => true,
        };
        if !same_shape {
            return Err(rules.sealed_err("replace keys"));
        }
    }

    let mut next = rules.declared_type.coerce(value.clone());
    if let Some(schema) = rules.schema {
        next = schema.coerce(next);
    }
    if next == *current {
        return Ok(None);
    }
    let change = AppliedChange::new(ChangeKind::Set, None, Some(next.clone()), Some(current.clone()));
    Ok(Some((next, change)))
}

fn set_property(
    current: &Value,
    key: &PropertyKey,
    value: &Value,
    rules: &MutationRules,
) -> Result<Option<(Value, AppliedChange)>, ValueError> {
    match (current, key) {
        (Value::Map(map), PropertyKey::Name(name)) => {
            let existing = map.get(name);
            if existing.is_none() && rules.sealed {
                return Err(rules.sealed_err("add property"));
            }
            let mut coerced = value.clone();
            if let Some(schema) = rules.schema {
                schema.check_field(&rules.target, name, value)?;
                if !schema.can_update(name) {
                    return Err(ValueError::NotUpdatable {
                        reference: rules.target.clone(),
                        key: name.clone(),
                    });
                }
                if let Some(field) = schema.get_field(name) {
                    coerced = field.value_type.coerce(coerced);
                }
            }
            if existing == Some(&coerced) {
                return Ok(None);
            }
            let mut next = map.clone();
            next.insert(name.clone(), coerced.clone());
            let mut change = AppliedChange::new(
                ChangeKind::Set,
                Some(key.clone()),
                Some(coerced),
                existing.cloned(),
            );
            change.added_key = existing.is_none();
            Ok(Some((Value::Map(next), change)))
        }
        (Value::List(list), PropertyKey::Index(index)) => {
            let index = *index;
            if index > list.len() {
                return Err(rules.index_err(index, list.len()));
            }
            if index == list.len() && rules.sealed {
                return Err(rules.sealed_err("add elements"));
            }
            let existing = list.get(index);
            if existing == Some(value) {
                return Ok(None);
            }
            let mut next = list.clone();
            if index == list.len() {
                next.push(value.clone());
            } else {
                next[index] = value.clone();
            }
            let mut change = AppliedChange::new(
                ChangeKind::Set,
                Some(key.clone()),
                Some(value.clone()),
                existing.cloned(),
            );
            change.added_key = existing.is_none();
            Ok(Some((Value::List(next), change)))
        }
        _ => Err(rules.kind_err("set_property", current)),
    }
}

fn delete_property(
    current: &Value,
    key: &PropertyKey,
    rules: &MutationRules,
) -> Result<Option<(Value, AppliedChange)>, ValueError> {
    match (current, key) {
        (Value::Map(map), PropertyKey::Name(name)) => {
            let Some(existing) = map.get(name) else {
                return Ok(None);
            };
            if rules.sealed {
                return Err(rules.sealed_err("delete property"));
            }
            if let Some(schema) = rules.schema {
                if !schema.can_update(name) {
                    return Err(ValueError::NotUpdatable {
                        reference: rules.target.clone(),
                        key: name.clone(),
                    });
                }
            }
            let mut next = map.clone();
            next.remove(name);
            let change =
                AppliedChange::new(ChangeKind::Delete, Some(key.clone()), None, Some(existing.clone()));
            Ok(Some((Value::Map(next), change)))
        }
        // deleting a list element leaves a hole, it does not shift
        (Value::List(list), PropertyKey::Index(index)) => {
            let Some(existing) = list.get(*index) else {
                return Err(rules.index_err(*index, list.len()));
            };
            if *existing == Value::Null {
                return Ok(None);
            }
            let mut next = list.clone();
            next[*index] = Value::Null;
            let change =
                AppliedChange::new(ChangeKind::Delete, Some(key.clone()), None, Some(existing.clone()));
            Ok(Some((Value::List(next), change)))
        }
        _ => Err(rules.kind_err("delete_property", current)),
    }
}

fn splice(
    current: &Value,
    start: usize,
    delete_count: usize,
    insert: &[Value],
    rules: &MutationRules,
) -> Result<Option<(Value, AppliedChange)>, ValueError> {
    let Value::List(list) = current else {
        return Err(rules.kind_err("splice_range", current));
    };
    if start > list.len() {
        return Err(rules.index_err(start, list.len()));
    }
    let end = start.saturating_add(delete_count).min(list.len());
    if end == start && insert.is_empty() {
        return Ok(None);
    }
    if rules.sealed {
        return Err(rules.sealed_err("splice"));
    }

    let mut next = list.clone();
    let removed: Vec<Value> = next.splice(start..end, insert.iter().cloned()).collect();
    let kind = if insert.is_empty() {
        ChangeKind::Remove
    } else if removed.is_empty() {
        ChangeKind::Add
    } else {
        ChangeKind::Set
    };
    let change = AppliedChange::new(
        kind,
        Some(PropertyKey::Index(start)),
        Some(Value::List(insert.to_vec())),
        Some(Value::List(removed)),
    );
    Ok(Some((Value::List(next), change)))
}
