use thiserror::Error;

/// Fatal generation-time errors.
///
/// Generation either produces both output modules or fails with one of
/// these; there is no partial output. Each variant names the offending
/// declaration so the diagnostic can be traced back to the interface
/// description.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("unknown annotation `{0}`")]
    UnknownAnnotation(String),

    #[error("unknown field `{field}` in the configuration record for `{target}`")]
    UnknownConfigField { target: String, field: String },

    #[error("annotation `{annotation}` cannot be applied to `{target}`")]
    InvalidAnnotationTarget { annotation: String, target: String },

    #[error("no declaration found for `{0}`")]
    UnknownDeclaration(String),

    #[error("cannot convert incompatible type `{ty}`: member `{member}` differs between guest and host")]
    IncompatibleType { ty: String, member: String },

    #[error("pointer to incomplete type `{ty}` requires ptr_passthrough or assume_compatible_data_layout")]
    IncompleteType { ty: String },

    #[error("unsupported parameter type `{ty}` in function `{function}`")]
    UnsupportedParameterType { function: String, ty: String },

    #[error("variadic function `{0}` requires a uniform_va_type annotation")]
    VariadicWithoutAnnotation(String),

    #[error("function `{0}` returns a function pointer; annotate it with returns_guest_pointer")]
    ReturnsFunctionPointer(String),

    #[error("cannot convert the return type `{ty}` of function `{function}`")]
    UnsupportedReturnType { function: String, ty: String },

    #[error("function `{function}` takes {count} arguments; the packed-argument format supports {allowed:?}")]
    UnsupportedArity { function: String, count: usize, allowed: &'static [usize] },

    #[error("cannot parse type spelling `{0}`")]
    BadTypeSpelling(String),

    #[error("failed to write output file `{path}`: {source}")]
    Output { path: String, #[source] source: std::io::Error },
}
