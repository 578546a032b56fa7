use indexmap::IndexMap;

use crate::errors::ZexusError;
use crate::object::Object;

/// Pure method dispatch keyed on the receiver's kind and the method name.
///
/// Returns `None` when the method needs to apply user callables (the
/// evaluator and VM resolve `list.map` and friends themselves), and
/// `Some(Err(AttributeError))` for genuinely unknown methods.
pub fn dispatch(
    receiver: &Object,
    method: &str,
    args: &[Object],
) -> Option<Result<Object, ZexusError>> {
    match receiver {
        Object::List(items) => match method {
            "map" | "filter" | "reduce" => None,
            "len" => Some(check_arity(method, args, 0).map(|_| {
                Object::integer(items.borrow().len() as i64)
            })),
            "first" => Some(check_arity(method, args, 0).map(|_| {
                items.borrow().first().cloned().unwrap_or(Object::Null)
            })),
            "rest" => Some(check_arity(method, args, 0).map(|_| {
                let items = items.borrow();
                if items.is_empty() {
                    Object::Null
                } else {
                    Object::list(items[1..].to_vec())
                }
            })),
            "push" => Some(check_arity(method, args, 1).map(|_| {
                let mut copy = items.borrow().clone();
                copy.push(args[0].clone());
                Object::list(copy)
            })),
            "contains" => Some(check_arity(method, args, 1).map(|_| {
                Object::Boolean(items.borrow().iter().any(|item| item == &args[0]))
            })),
            _ => Some(Err(unknown(receiver, method))),
        },
        Object::Map(pairs) => match method {
            "len" => Some(check_arity(method, args, 0).map(|_| {
                Object::integer(pairs.borrow().len() as i64)
            })),
            "keys" => Some(check_arity(method, args, 0).map(|_| {
                Object::list(
                    pairs
                        .borrow()
                        .keys()
                        .map(|key| Object::Str(key.clone()))
                        .collect(),
                )
            })),
            "values" => Some(check_arity(method, args, 0).map(|_| {
                Object::list(pairs.borrow().values().cloned().collect())
            })),
            "has_key" => Some(string_arg(method, args).map(|key| {
                Object::Boolean(pairs.borrow().contains_key(&key))
            })),
            "get" => Some(string_arg(method, args).map(|key| {
                pairs.borrow().get(&key).cloned().unwrap_or(Object::Null)
            })),
            _ => Some(Err(unknown(receiver, method))),
        },
        Object::Str(text) => match method {
            "len" => Some(check_arity(method, args, 0).map(|_| {
                Object::integer(text.chars().count() as i64)
            })),
            "upper" => Some(check_arity(method, args, 0).map(|_| {
                Object::Str(text.to_uppercase())
            })),
            "lower" => Some(check_arity(method, args, 0).map(|_| {
                Object::Str(text.to_lowercase())
            })),
            "trim" => Some(check_arity(method, args, 0).map(|_| {
                Object::Str(text.trim().to_string())
            })),
            "contains" => Some(string_arg(method, args).map(|needle| {
                Object::Boolean(text.contains(&needle))
            })),
            "split" => Some(string_arg(method, args).map(|separator| {
                Object::list(
                    text.split(separator.as_str())
                        .map(|part| Object::Str(part.to_string()))
                        .collect(),
                )
            })),
            _ => Some(Err(unknown(receiver, method))),
        },
        Object::Error { kind, message } => match method {
            "kind" => Some(check_arity(method, args, 0).map(|_| {
                Object::Str(kind.as_str().to_string())
            })),
            "message" => Some(check_arity(method, args, 0).map(|_| {
                Object::Str(message.clone())
            })),
            _ => Some(Err(unknown(receiver, method))),
        },
        _ => Some(Err(unknown(receiver, method))),
    }
}

/// Property reads resolved without call syntax: map fields, error fields,
/// enum variants.
pub fn property(receiver: &Object, name: &str) -> Result<Object, ZexusError> {
    match receiver {
        Object::Map(pairs) => Ok(pairs.borrow().get(name).cloned().unwrap_or(Object::Null)),
        Object::Error { kind, message } => match name {
            "kind" => Ok(Object::Str(kind.as_str().to_string())),
            "message" => Ok(Object::Str(message.clone())),
            _ => Err(unknown(receiver, name)),
        },
        Object::EventDescriptor(desc) => match name {
            "name" => Ok(Object::Str(desc.name.clone())),
            "fields" => Ok(Object::list(
                desc.fields
                    .iter()
                    .map(|field| Object::Str(field.clone()))
                    .collect(),
            )),
            _ => Err(unknown(receiver, name)),
        },
        _ => Err(unknown(receiver, name)),
    }
}

/// Build the variant map an `enum` declaration binds.
pub fn enum_map(enum_name: &str, variants: &[String]) -> Object {
    let mut pairs = IndexMap::new();
    for variant in variants {
        pairs.insert(
            variant.clone(),
            Object::EnumValue {
                enum_name: enum_name.to_string(),
                variant: variant.clone(),
            },
        );
    }
    Object::map(pairs)
}

/// Shared `obj[index]` read semantics: misses resolve to `null`, kind
/// mismatches are TypeErrors.
pub fn index_get(object: &Object, index: &Object) -> Result<Object, ZexusError> {
    use num_traits::ToPrimitive;
    match (object, index) {
        (Object::List(items), Object::Integer(i)) => {
            let items = items.borrow();
            Ok(i
                .to_usize()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Object::Null))
        }
        (Object::Map(pairs), Object::Str(key)) => {
            Ok(pairs.borrow().get(key).cloned().unwrap_or(Object::Null))
        }
        (Object::Str(text), Object::Integer(i)) => Ok(i
            .to_usize()
            .and_then(|i| text.chars().nth(i))
            .map(|ch| Object::Str(ch.to_string()))
            .unwrap_or(Object::Null)),
        _ => Err(ZexusError::type_error(format!(
            "cannot index {} with {}",
            object.type_name(),
            index.type_name()
        ))),
    }
}

/// Shared `obj[index] = value` semantics.
pub fn index_set(object: &Object, index: &Object, value: Object) -> Result<Object, ZexusError> {
    use num_traits::ToPrimitive;
    match (object, index) {
        (Object::List(items), Object::Integer(i)) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let slot = i.to_usize().filter(|i| *i < len).ok_or_else(|| {
                ZexusError::type_error(format!("list index {} out of range", i))
            })?;
            items[slot] = value.clone();
            Ok(value)
        }
        (Object::Map(pairs), Object::Str(key)) => {
            pairs.borrow_mut().insert(key.clone(), value.clone());
            Ok(value)
        }
        _ => Err(ZexusError::type_error(format!(
            "cannot assign into {} with {}",
            object.type_name(),
            index.type_name()
        ))),
    }
}

fn check_arity(method: &str, args: &[Object], expected: usize) -> Result<(), ZexusError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ZexusError::arity(format!(
            ".{}() expects {} argument(s), got {}",
            method,
            expected,
            args.len()
        )))
    }
}

fn string_arg(method: &str, args: &[Object]) -> Result<String, ZexusError> {
    check_arity(method, args, 1)?;
    match &args[0] {
        Object::Str(s) => Ok(s.clone()),
        other => Err(ZexusError::type_error(format!(
            ".{}() expects STRING, got {}",
            method,
            other.type_name()
        ))),
    }
}

fn unknown(receiver: &Object, method: &str) -> ZexusError {
    ZexusError::attribute(format!(
        "{} has no attribute '{}'",
        receiver.type_name(),
        method
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_methods() {
        let list = Object::list(vec![Object::integer(1), Object::integer(2)]);
        let len = dispatch(&list, "len", &[]).unwrap().unwrap();
        assert_eq!(len, Object::integer(2));
        let contains = dispatch(&list, "contains", &[Object::integer(2)])
            .unwrap()
            .unwrap();
        assert_eq!(contains, Object::Boolean(true));
    }

    #[test]
    fn higher_order_list_methods_defer_to_engine() {
        let list = Object::list(vec![]);
        assert!(dispatch(&list, "map", &[]).is_none());
        assert!(dispatch(&list, "reduce", &[]).is_none());
    }

    #[test]
    fn unknown_method_is_attribute_error() {
        let err = dispatch(&Object::integer(1), "frobnicate", &[])
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::AttributeError);
    }

    #[test]
    fn map_property_read_misses_to_null() {
        let mut pairs = IndexMap::new();
        pairs.insert("x".to_string(), Object::integer(7));
        let map = Object::map(pairs);
        assert_eq!(property(&map, "x").unwrap(), Object::integer(7));
        assert_eq!(property(&map, "missing").unwrap(), Object::Null);
    }

    #[test]
    fn enum_map_binds_variants() {
        let map = enum_map("Color", &["Red".to_string(), "Green".to_string()]);
        let red = property(&map, "Red").unwrap();
        assert_eq!(
            red,
            Object::EnumValue {
                enum_name: "Color".to_string(),
                variant: "Red".to_string()
            }
        );
    }
}
