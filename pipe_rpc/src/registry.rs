// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Function registry and dispatch (component C5): named collections of
//! overload-aware functions, looked up by a mangled signature derived from
//! the function name and its argument kinds.

use std::collections::HashMap;

use crate::value::{Kind, Value};

/// A server-side procedure implementation. Takes the id of the connection
/// that issued the call (useful for per-client bookkeeping) and the decoded
/// arguments, and returns either the encoded reply values or an error string
/// that becomes `FunctionReply.error`.
///
/// Grounded on `rpc_protocol::server::RpcProcedure<T>`'s `fn(&Call, &mut T)
/// -> RpcResult` shape, generalized from a fixed numeric procedure table to
/// name+kind-mangled overload lookup, and from a single shared `T` to an
/// explicit `client_id` since a pipe server fans out to many connections.
pub type Handler<T> = fn(client_id: u64, args: &[Value], state: &T) -> Result<Vec<Value>, String>;

/// One overload of a named function: its parameter kinds and the handler
/// that implements it.
pub struct FunctionDescriptor<T> {
    name: String,
    parameter_kinds: Vec<Kind>,
    unique_id: String,
    handler: Handler<T>,
}

impl<T> FunctionDescriptor<T> {
    pub fn new(name: impl Into<String>, parameter_kinds: Vec<Kind>, handler: Handler<T>) -> Self {
        let name = name.into();
        let unique_id = mangle(&name, &parameter_kinds);
        FunctionDescriptor {
            name,
            parameter_kinds,
            unique_id,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn parameter_kinds(&self) -> &[Kind] {
        &self.parameter_kinds
    }
}

/// Mangles a function name and its parameter kinds into the `unique_id` used
/// as the collection's lookup key: `name + "_" + concat(kind codes)`.
///
/// Example: `mangle("f", &[Kind::Int32, Kind::String]) == "f_I4PS"`.
pub fn mangle(name: &str, kinds: &[Kind]) -> String {
    let mut id = String::with_capacity(name.len() + 1 + kinds.len() * 2);
    id.push_str(name);
    id.push('_');
    for k in kinds {
        id.push_str(k.code());
    }
    id
}

fn kinds_of(values: &[Value]) -> Vec<Kind> {
    values.iter().map(Value::kind).collect()
}

/// A named set of functions: an overload group namespace.
pub struct Collection<T> {
    name: String,
    functions: HashMap<String, FunctionDescriptor<T>>,
}

impl<T> Collection<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Collection {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an overload. Panics on a duplicate `unique_id` within this
    /// collection -- `unique_id` is unique per collection by construction,
    /// so a clash is a build-time programming error to violate, not a
    /// runtime condition a caller should have to handle.
    pub fn add_function(&mut self, descriptor: FunctionDescriptor<T>) -> &mut Self {
        let id = descriptor.unique_id().to_owned();
        if self.functions.insert(id.clone(), descriptor).is_some() {
            panic!("duplicate function unique_id '{id}' in collection '{}'", self.name);
        }
        self
    }

    pub fn get_by_kinds(&self, name: &str, kinds: &[Kind]) -> Option<&FunctionDescriptor<T>> {
        self.functions.get(&mangle(name, kinds))
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor<T>> {
        self.get_by_kinds(name, &[])
    }
}

/// The server-wide mapping of collection name to [`Collection`]. Read-only
/// after construction; safe to share across connection pumps without a lock.
pub struct Registry<T> {
    collections: HashMap<String, Collection<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            collections: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collection. Panics on a duplicate collection name: like
    /// duplicate overloads, this is a startup-time configuration error.
    pub fn register_collection(&mut self, collection: Collection<T>) -> &mut Self {
        let name = collection.name().to_owned();
        if self.collections.insert(name.clone(), collection).is_some() {
            panic!("duplicate collection '{name}'");
        }
        self
    }

    /// Looks up and invokes the function named by `(class_name, function_name)`
    /// whose parameter kinds match `args`: find the collection, mangle the
    /// requested signature, look up the overload, invoke its handler. On
    /// success returns the encoded reply values; on failure returns the
    /// exact diagnostic string the wire protocol expects.
    pub fn dispatch(
        &self,
        client_id: u64,
        class_name: &str,
        function_name: &str,
        args: &[Value],
        state: &T,
    ) -> Result<Vec<Value>, String> {
        let collection = self
            .collections
            .get(class_name)
            .ok_or_else(|| format!("Class '{class_name}' is not registered."))?;

        let kinds = kinds_of(args);
        let descriptor = collection.get_by_kinds(function_name, &kinds).ok_or_else(|| {
            format!("Function '{function_name}' not found in class '{class_name}'.")
        })?;

        Ok((descriptor.handler)(client_id, args, state)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(_client: u64, args: &[Value], _state: &()) -> Result<Vec<Value>, String> {
        Ok(args.to_vec())
    }

    fn ping_no_arg(_client: u64, _args: &[Value], _state: &()) -> Result<Vec<Value>, String> {
        Ok(vec![Value::string("no-arg")])
    }

    fn ping_with_arg(_client: u64, args: &[Value], _state: &()) -> Result<Vec<Value>, String> {
        Ok(vec![Value::string(format!("arg={args:?}"))])
    }

    #[test]
    fn mangling_concatenates_name_and_kind_codes() {
        assert_eq!(mangle("f", &[Kind::Int32, Kind::String]), "f_I4PS");
    }

    #[test]
    fn unknown_collection_error_text() {
        let registry: Registry<()> = Registry::new();
        let err = registry
            .dispatch(0, "Missing", "nothing", &[], &())
            .unwrap_err();
        assert_eq!(err, "Class 'Missing' is not registered.");
    }

    #[test]
    fn unknown_function_error_text() {
        let mut registry: Registry<()> = Registry::new();
        let mut default_collection = Collection::new("Default");
        default_collection.add_function(FunctionDescriptor::new("echo", vec![Kind::UInt64], echo));
        registry.register_collection(default_collection);

        let err = registry
            .dispatch(0, "Default", "nope", &[], &())
            .unwrap_err();
        assert_eq!(err, "Function 'nope' not found in class 'Default'.");
    }

    #[test]
    fn overload_dispatch_picks_matching_arity() {
        let mut registry: Registry<()> = Registry::new();
        let mut collection = Collection::new("Default");
        collection.add_function(FunctionDescriptor::new("ping", vec![], ping_no_arg));
        collection.add_function(FunctionDescriptor::new("ping", vec![Kind::UInt64], ping_with_arg));
        registry.register_collection(collection);

        let no_arg = registry.dispatch(0, "Default", "ping", &[], &()).unwrap();
        assert_eq!(no_arg, vec![Value::string("no-arg")]);

        let with_arg = registry
            .dispatch(0, "Default", "ping", &[Value::UInt64(42)], &())
            .unwrap();
        assert_eq!(with_arg, vec![Value::string("arg=[UInt64(42)]")]);
    }

    #[test]
    #[should_panic(expected = "duplicate function unique_id")]
    fn duplicate_overload_panics() {
        let mut collection: Collection<()> = Collection::new("Default");
        collection.add_function(FunctionDescriptor::new("echo", vec![Kind::UInt64], echo));
        collection.add_function(FunctionDescriptor::new("echo", vec![Kind::UInt64], echo));
    }
}
