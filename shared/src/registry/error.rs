use thiserror::Error;

/// Invalid argument, type or permission. Returned before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// A reference id of the wrong length or with an unknown address type
    #[error("Invalid reference id: {reason}")]
    InvalidReferenceId { reason: String },

    /// Endpoint text that is not `@@<24 hex digits>/<hex instance>`
    #[error("Invalid endpoint: {reason}")]
    InvalidEndpoint { reason: String },

    /// Another live, non-anonymous reference already owns this id or value
    #[error("Duplicate reference: {value} is already bound to {existing}")]
    DuplicateReference { value: String, existing: String },

    /// The value does not match the declared type
    #[error("Type mismatch on {target}: expected {expected}, got {actual}")]
    TypeMismatch {
        target: String,
        expected: String,
        actual: String,
    },

    /// A key that the schema does not declare
    #[error("Property '{key}' is not declared by type {type_name}")]
    UnknownProperty { type_name: String, key: String },

    /// A declared property that is not updatable
    #[error("Property '{key}' of {reference} is not updatable")]
    NotUpdatable { reference: String, key: String },

    /// Keys cannot be added to or removed from a sealed reference
    #[error("Cannot {operation} on sealed reference {reference}")]
    Sealed {
        reference: String,
        operation: &'static str,
    },

    /// Direct mutation of a derived (transform) reference
    #[error("Reference {reference} is read-only")]
    ReadOnly { reference: String },

    /// The operation needs a different kind of value (e.g. a list)
    #[error("Cannot {operation} on {reference}: value is {actual}")]
    WrongValueKind {
        reference: String,
        operation: &'static str,
        actual: String,
    },

    /// A list index past the end
    #[error("Index {index} out of range for {reference} (length {length})")]
    IndexOutOfRange {
        reference: String,
        index: usize,
        length: usize,
    },

    /// A handle that no reference has claimed
    #[error("Value handle {handle} is not bound to any reference")]
    UnknownHandle { handle: u64 },

    /// A label already in use by another reference
    #[error("Label '{label}' is already used by {existing}")]
    LabelTaken { label: String, existing: String },

    /// A named type that was never registered
    #[error("Type {type_name} is not registered")]
    UnknownType { type_name: String },

    /// Anonymous references never leave the process
    #[error("Anonymous reference {reference} cannot be persisted")]
    AnonymousNotPersistable { reference: String },
}

/// A reference that is not (or no longer) available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    /// No resident reference and no source holds it
    #[error("Reference {reference} not found")]
    NotFound { reference: String },

    /// The local endpoint is the origin but no value was ever assigned
    #[error("Reference {reference} has no assigned value")]
    NoAssignedValue { reference: String },

    /// The reference was reclaimed or deleted
    #[error("Reference {reference} was deleted")]
    Deleted { reference: String },

    /// The reference exists but is still waiting for its value
    #[error("Reference {reference} is not initialized")]
    Uninitialized { reference: String },
}

/// Violations of the subscription protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `load` re-entered for an id already loading in the same scope
    #[error("Recursive load of {reference}")]
    Recursion { reference: String },

    /// More than one origin redirect for a single load
    #[error("Too many redirects while loading {reference}")]
    TooManyRedirects { reference: String },

    /// Subscribing to a reference the local endpoint is the origin of
    #[error("Cannot subscribe to own reference {reference}")]
    SubscribeToSelf { reference: String },

    /// Anonymous references are never advertised
    #[error("Reference {reference} is anonymous and cannot be subscribed to")]
    AnonymousSubscribe { reference: String },

    /// The origin refused the subscription
    #[error("Origin {origin} refused subscription to {reference}: {reason}")]
    Refused {
        reference: String,
        origin: String,
        reason: String,
    },

    /// An update from an endpoint that is neither origin nor subscriber
    #[error("Update for {reference} from unexpected endpoint {sender}")]
    UnexpectedSender { reference: String, sender: String },

    /// A response that matches no pending request
    #[error("Unexpected response with request id {request}")]
    UnexpectedResponse { request: u32 },

    /// Value handles are local to one registry and never cross the wire
    #[error("Value from {sender} for {reference} carries a local value handle")]
    ForeignHandle { reference: String, sender: String },
}
