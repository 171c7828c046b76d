//! The type classifier and per-function conversion planning.
//!
//! Every type a thunked function mentions resolves to exactly one
//! classification:
//!
//! * **Identical**: the guest memory image is bit-exact with the host's.
//! * **Repackable**: same member names, convertible member-by-member.
//! * **Incompatible**: no automatic conversion; reaching one without an
//!   override aborts generation, naming the offending member.
//! * **Opaque**: declared but never defined; usable only behind annotated
//!   pointers.
//!
//! Classification runs once, memoized, with an in-progress set so that a
//! struct pointing at itself (directly or through another struct) does not
//! recurse forever; pointer members never need their pointee's definition,
//! which is what breaks such cycles.

use std::collections::{BTreeMap, BTreeSet};

use crate::abi::{self, GuestAbi, LayoutSide, HOST_ABI};
use crate::config::ParamConfig;
use crate::error::GenerateError;
use crate::interface::{Library, Signature, Type};
use crate::names;
use thunkgen_runtime::packed::{arity_allowed, ALLOWED_ARITIES};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncompatCause {
    /// Member layouts or names diverge between the two views.
    LayoutMismatch,
    /// A pointer member refers to a type with no definition.
    OpaquePointee(String),
    /// A bare `void*` member on a guest whose pointer width differs.
    VoidPointer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeCompat {
    Identical,
    Repackable,
    Incompatible { member: String, cause: IncompatCause },
    Opaque,
}

impl TypeCompat {
    pub fn convertible(&self) -> bool {
        matches!(self, TypeCompat::Identical | TypeCompat::Repackable)
    }
}

/// How the host unpacker materializes one argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamStrategy {
    /// Scalar or enum whose width matches; copied out of the slot.
    Direct,
    /// Scalar or enum with a narrower guest width; widened on extraction.
    WidthCast,
    /// Aggregate by value with bit-identical layout.
    AggregateIdentical,
    /// Aggregate by value converted member-wise.
    AggregateRepack,
    /// Pointer whose pointee needs no conversion; address reinterpreted.
    PointerDirect,
    /// Pointer to repackable data: converted into a stack temporary, the
    /// call sees the temporary, and the result is written back.
    PointerRepack,
    /// Raw guest pointer forwarded untouched.
    Passthrough,
    /// Guest function pointer routed through the trampoline protocol.
    Callback(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetStrategy {
    Void,
    Direct,
    WidthCast,
    AggregateIdentical,
    AggregateRepack,
    PointerDirect,
    /// A returned function pointer, allowed only with
    /// `returns_guest_pointer`; the raw address travels back unconverted.
    GuestFunctionPointer,
}

#[derive(Clone, Debug)]
pub struct ParamPlan {
    pub ty: Type,
    pub strategy: ParamStrategy,
}

#[derive(Clone, Debug)]
pub struct FunctionPlan {
    pub name: String,
    pub ret: Type,
    pub ret_strategy: RetStrategy,
    /// Parameter list after variadic rewriting (count slot, then the
    /// materialized argument array).
    pub params: Vec<ParamPlan>,
    /// True for `custom_host_impl` functions and for variadics, whose host
    /// body cannot be generated.
    pub custom_host_impl: bool,
    pub variadic: bool,
    pub digest: [u8; 32],
}

#[derive(Clone, Debug)]
pub struct CallbackPlan {
    pub index: usize,
    pub signature: Signature,
    pub spelling: String,
    pub digest: [u8; 32],
    pub params: BTreeMap<usize, ParamConfig>,
    /// Whether the runtime's generic wrapper can unpack this signature, or
    /// a dedicated unpacker with per-parameter projection must be emitted.
    pub use_generic_wrapper: bool,
}

/// The annotated type map plus per-function plans, consumed immutably by
/// both emitters and discarded after generation.
pub struct Analysis<'a> {
    pub lib: &'a Library,
    pub abi: GuestAbi,
    pub aggregates: BTreeMap<String, TypeCompat>,
    /// Structs that get layout wrappers, dependency-first.
    pub wrapper_order: Vec<String>,
    pub callbacks: Vec<CallbackPlan>,
    pub functions: Vec<FunctionPlan>,
}

impl Analysis<'_> {
    pub fn struct_compat(&self, name: &str) -> Option<&TypeCompat> {
        self.aggregates.get(name)
    }

    /// Whether the guest image of this struct is a distinct emitted type
    /// rather than the host struct itself.
    pub fn has_guest_view(&self, name: &str) -> bool {
        !matches!(self.struct_compat(name), Some(TypeCompat::Identical))
            && self.wrapper_order.iter().any(|n| n == name)
    }
}

pub fn analyze(lib: &Library, abi: GuestAbi) -> Result<Analysis<'_>, GenerateError> {
    let mut cx = Classifier {
        lib,
        abi,
        cache: BTreeMap::new(),
        in_progress: BTreeSet::new(),
        callbacks: Vec::new(),
    };

    // Standalone signature registrations first, so their callback indices
    // are stable regardless of which functions mention them.
    for registration in lib.callback_registrations() {
        let arity = registration.signature.params.len();
        if !arity_allowed(arity) {
            return Err(GenerateError::UnsupportedArity {
                function: names::signature_spelling(&registration.signature),
                count: arity,
                allowed: ALLOWED_ARITIES,
            });
        }
        cx.register_callback(&registration.signature, registration.params.clone());
    }

    let mut functions = Vec::new();
    for (name, config) in lib.exports() {
        let decl = lib
            .function(name)
            .ok_or_else(|| GenerateError::UnknownDeclaration(name.clone()))?;

        let mut param_types = decl.params.clone();
        let variadic = decl.variadic;
        if variadic {
            let va = config
                .uniform_va_type
                .clone()
                .ok_or_else(|| GenerateError::VariadicWithoutAnnotation(name.clone()))?;
            param_types.push(Type::Scalar(crate::interface::Scalar::ULong));
            param_types.push(Type::Pointer(Box::new(va)));
        }

        if !arity_allowed(param_types.len()) {
            return Err(GenerateError::UnsupportedArity {
                function: name.clone(),
                count: param_types.len(),
                allowed: ALLOWED_ARITIES,
            });
        }

        let mut params = Vec::new();
        for (idx, ty) in param_types.iter().enumerate() {
            let strategy = cx.plan_param(name, ty, config.param(idx))?;
            params.push(ParamPlan { ty: ty.clone(), strategy });
        }

        let ret_strategy = cx.plan_ret(name, &decl.ret, config.returns_guest_pointer)?;

        functions.push(FunctionPlan {
            name: name.clone(),
            ret: decl.ret.clone(),
            ret_strategy,
            params,
            custom_host_impl: config.custom_host_impl || variadic,
            variadic,
            digest: names::function_digest(&lib.sanitized_name(), name),
        });
    }

    // Named types registered for wrapper emission without being reached by
    // any function.
    let registered: Vec<String> = lib
        .structs()
        .filter(|def| lib.type_config(&def.name).is_some())
        .map(|def| def.name.clone())
        .collect();
    for name in registered {
        cx.classify_struct(&name)?;
    }

    // `emit_layout_wrappers` overrides the compatibility verdict, but the
    // emitted conversion is still a field-wise copy keyed by name: a type
    // whose two views disagree on the member set has no wrapper to force.
    for (name, compat) in &cx.cache {
        if !matches!(compat, TypeCompat::Incompatible { .. }) {
            continue;
        }
        let forced = lib.type_config(name).map(|c| c.emit_layout_wrappers).unwrap_or(false);
        if !forced {
            continue;
        }
        if let Some(member) = inconsistent_member_name(lib, name) {
            return Err(GenerateError::IncompatibleType { ty: name.clone(), member });
        }
    }

    let wrapper_order = wrapper_emission_order(lib, &cx.cache);

    Ok(Analysis {
        lib,
        abi,
        aggregates: cx.cache,
        wrapper_order,
        callbacks: cx.callbacks,
        functions,
    })
}

struct Classifier<'a> {
    lib: &'a Library,
    abi: GuestAbi,
    cache: BTreeMap<String, TypeCompat>,
    in_progress: BTreeSet<String>,
    callbacks: Vec<CallbackPlan>,
}

impl<'a> Classifier<'a> {
    fn pointer_width_compat(&self) -> TypeCompat {
        match self.abi {
            GuestAbi::X86_64 => TypeCompat::Identical,
            GuestAbi::X86_32 => TypeCompat::Repackable,
        }
    }

    fn scalar_compat(&self, s: crate::interface::Scalar) -> TypeCompat {
        if self.abi.scalar(s) == HOST_ABI.scalar(s) {
            TypeCompat::Identical
        } else {
            // Narrower width (long on i386) or weaker alignment (double on
            // i386); either way a member-wise copy fixes it up.
            TypeCompat::Repackable
        }
    }

    fn enum_compat(&self, name: &str) -> Result<TypeCompat, GenerateError> {
        let def = self
            .lib
            .enum_def(name)
            .ok_or_else(|| GenerateError::UnknownDeclaration(name.to_string()))?;
        let guest = def.guest_underlying.unwrap_or(def.underlying);
        let guest_layout = self.abi.scalar(guest);
        let host_layout = HOST_ABI.scalar(def.underlying);
        if guest_layout == host_layout {
            Ok(TypeCompat::Identical)
        } else {
            Ok(TypeCompat::Repackable)
        }
    }

    fn classify(&mut self, ty: &Type) -> Result<TypeCompat, GenerateError> {
        match ty {
            Type::Void => Ok(TypeCompat::Identical),
            Type::Scalar(s) => Ok(self.scalar_compat(*s)),
            Type::Enum(name) => self.enum_compat(name),
            Type::Struct(name) => self.classify_struct(name),
            Type::Pointer(pointee) => self.classify_pointer(pointee),
            // Guest function pointers are never bit-copied; repacking zeroes
            // them so a host crash points at the right place.
            Type::FunctionPointer(_) => Ok(TypeCompat::Repackable),
            Type::Array(elem, _) => self.classify(elem),
        }
    }

    fn classify_pointer(&mut self, pointee: &Type) -> Result<TypeCompat, GenerateError> {
        match pointee {
            Type::Void => match self.abi {
                GuestAbi::X86_64 => Ok(TypeCompat::Identical),
                GuestAbi::X86_32 => Ok(TypeCompat::Incompatible {
                    member: String::new(),
                    cause: IncompatCause::VoidPointer,
                }),
            },
            Type::Struct(name) => {
                if self.assume_compatible(name) {
                    return Ok(self.pointer_width_compat());
                }
                if self.is_opaque(name) {
                    return Ok(TypeCompat::Incompatible {
                        member: String::new(),
                        cause: IncompatCause::OpaquePointee(name.clone()),
                    });
                }
                match self.classify_struct(name)? {
                    TypeCompat::Identical => Ok(self.pointer_width_compat()),
                    TypeCompat::Incompatible { member, cause } => {
                        Ok(TypeCompat::Incompatible { member, cause })
                    }
                    // A pointed-to repackable image cannot be fixed up in
                    // place, so a containing aggregate is not convertible.
                    TypeCompat::Repackable => Ok(TypeCompat::Incompatible {
                        member: String::new(),
                        cause: IncompatCause::LayoutMismatch,
                    }),
                    TypeCompat::Opaque => Ok(TypeCompat::Incompatible {
                        member: String::new(),
                        cause: IncompatCause::OpaquePointee(name.clone()),
                    }),
                }
            }
            Type::Scalar(s) => {
                if names::scalar_width_matches(*s, self.abi) {
                    Ok(self.pointer_width_compat())
                } else {
                    Ok(TypeCompat::Incompatible {
                        member: String::new(),
                        cause: IncompatCause::LayoutMismatch,
                    })
                }
            }
            Type::Enum(name) => match self.enum_compat(name)? {
                TypeCompat::Identical => Ok(self.pointer_width_compat()),
                _ => Ok(TypeCompat::Incompatible {
                    member: String::new(),
                    cause: IncompatCause::LayoutMismatch,
                }),
            },
            Type::Pointer(inner) => match self.classify_pointer(inner)? {
                TypeCompat::Identical => Ok(self.pointer_width_compat()),
                TypeCompat::Repackable => Ok(TypeCompat::Incompatible {
                    member: String::new(),
                    cause: IncompatCause::LayoutMismatch,
                }),
                other => Ok(other),
            },
            Type::FunctionPointer(_) => Ok(self.pointer_width_compat()),
            Type::Array(elem, _) => self.classify_pointer(elem),
        }
    }

    fn is_opaque(&self, name: &str) -> bool {
        self.lib.struct_def(name).map(|d| d.opaque).unwrap_or(false)
    }

    fn assume_compatible(&self, name: &str) -> bool {
        self.lib.type_config(name).map(|c| c.assume_compatible).unwrap_or(false)
    }

    fn classify_struct(&mut self, name: &str) -> Result<TypeCompat, GenerateError> {
        if let Some(compat) = self.cache.get(name) {
            return Ok(compat.clone());
        }
        // Cycles only form through pointer members; answer optimistically
        // and let the completed entry win.
        if self.in_progress.contains(name) {
            return Ok(TypeCompat::Identical);
        }

        let def = self
            .lib
            .struct_def(name)
            .ok_or_else(|| GenerateError::UnknownDeclaration(name.to_string()))?;

        let compat = if def.opaque {
            TypeCompat::Opaque
        } else if self.assume_compatible(name) {
            TypeCompat::Identical
        } else {
            self.in_progress.insert(name.to_string());
            let result = self.classify_members(name);
            self.in_progress.remove(name);
            result?
        };

        self.cache.insert(name.to_string(), compat.clone());
        Ok(compat)
    }

    fn classify_members(&mut self, name: &str) -> Result<TypeCompat, GenerateError> {
        let def = self.lib.struct_def(name).unwrap().clone();
        let host = &def.members;
        let guest = def.guest_view();

        // Repacking copies field-wise by name, so both views must agree on
        // the member set.
        for member in guest {
            if !host.iter().any(|h| h.name == member.name) {
                return Ok(TypeCompat::Incompatible {
                    member: member.name.clone(),
                    cause: IncompatCause::LayoutMismatch,
                });
            }
        }
        for member in host {
            if !guest.iter().any(|g| g.name == member.name) {
                return Ok(TypeCompat::Incompatible {
                    member: member.name.clone(),
                    cause: IncompatCause::LayoutMismatch,
                });
            }
        }

        let mut all_identical = true;
        for (idx, member) in guest.iter().enumerate() {
            let counterpart = host.iter().find(|h| h.name == member.name).unwrap();
            if counterpart.ty != member.ty {
                return Ok(TypeCompat::Incompatible {
                    member: member.name.clone(),
                    cause: IncompatCause::LayoutMismatch,
                });
            }
            match self.classify(&member.ty)? {
                TypeCompat::Identical => {}
                TypeCompat::Repackable => all_identical = false,
                TypeCompat::Incompatible { cause, .. } => {
                    return Ok(TypeCompat::Incompatible { member: member.name.clone(), cause })
                }
                TypeCompat::Opaque => {
                    return Ok(TypeCompat::Incompatible {
                        member: member.name.clone(),
                        cause: IncompatCause::OpaquePointee(names::c_spelling(&member.ty)),
                    })
                }
            }
            if host.get(idx).map(|h| h.name.as_str()) != Some(member.name.as_str()) {
                all_identical = false;
            }
        }

        if all_identical {
            let host_layout = abi::struct_layout(self.lib, HOST_ABI, LayoutSide::Host, name)?;
            let guest_layout = abi::struct_layout(self.lib, self.abi, LayoutSide::Guest, name)?;
            let bit_exact = host_layout.size == guest_layout.size
                && host_layout
                    .members
                    .iter()
                    .zip(&guest_layout.members)
                    .all(|(h, g)| h.offset == g.offset && h.layout.size == g.layout.size);
            if bit_exact {
                return Ok(TypeCompat::Identical);
            }
        }
        Ok(TypeCompat::Repackable)
    }

    fn register_callback(
        &mut self,
        sig: &Signature,
        params: BTreeMap<usize, ParamConfig>,
    ) -> usize {
        let spelling = names::signature_spelling(sig);
        if let Some(existing) = self.callbacks.iter().find(|c| c.spelling == spelling) {
            return existing.index;
        }
        let index = self.callbacks.len();
        let use_generic_wrapper =
            params.values().all(|p| !p.ptr_passthrough && !p.assume_compatible)
                && self.signature_is_plain(sig);
        self.callbacks.push(CallbackPlan {
            index,
            signature: sig.clone(),
            digest: names::callback_digest(&spelling),
            spelling,
            params,
            use_generic_wrapper,
        });
        index
    }

    /// Whether every type in the signature transfers as-is, making the
    /// runtime's generic wrapper applicable.
    fn signature_is_plain(&self, sig: &Signature) -> bool {
        let plain = |ty: &Type| match ty {
            Type::Void => true,
            Type::Scalar(s) => names::scalar_width_matches(*s, self.abi),
            Type::Enum(name) => self
                .lib
                .enum_def(name)
                .map(|d| {
                    d.guest_underlying.unwrap_or(d.underlying) == d.underlying
                        && names::scalar_width_matches(d.underlying, self.abi)
                })
                .unwrap_or(false),
            Type::Pointer(_) => true,
            _ => false,
        };
        plain(&sig.ret) && sig.params.iter().all(plain)
    }

    fn plan_param(
        &mut self,
        function: &str,
        ty: &Type,
        config: ParamConfig,
    ) -> Result<ParamStrategy, GenerateError> {
        if let Type::FunctionPointer(sig) = ty {
            let arity = sig.params.len();
            if !arity_allowed(arity) {
                return Err(GenerateError::UnsupportedArity {
                    function: names::signature_spelling(sig),
                    count: arity,
                    allowed: ALLOWED_ARITIES,
                });
            }
            let index = self.register_callback(sig, BTreeMap::new());
            return Ok(ParamStrategy::Callback(index));
        }

        if config.ptr_passthrough {
            if !matches!(ty, Type::Pointer(_)) {
                return Err(GenerateError::InvalidAnnotationTarget {
                    annotation: "ptr_passthrough".to_string(),
                    target: format!("{} (not a pointer)", names::c_spelling(ty)),
                });
            }
            return Ok(ParamStrategy::Passthrough);
        }

        match ty {
            Type::Scalar(s) => Ok(if names::scalar_width_matches(*s, self.abi) {
                ParamStrategy::Direct
            } else {
                ParamStrategy::WidthCast
            }),
            Type::Enum(name) => Ok(match self.enum_compat(name)? {
                TypeCompat::Identical => ParamStrategy::Direct,
                _ => ParamStrategy::WidthCast,
            }),
            Type::Struct(name) => match self.classify_struct(name)? {
                TypeCompat::Identical => Ok(ParamStrategy::AggregateIdentical),
                TypeCompat::Repackable => Ok(ParamStrategy::AggregateRepack),
                TypeCompat::Incompatible { member, cause } => {
                    Err(self.conversion_error(function, ty, name, member, cause))
                }
                TypeCompat::Opaque => {
                    Err(GenerateError::IncompleteType { ty: name.clone() })
                }
            },
            Type::Pointer(pointee) => {
                if config.assume_compatible {
                    return Ok(ParamStrategy::PointerDirect);
                }
                self.plan_pointer_param(function, ty, pointee)
            }
            Type::Void | Type::Array(..) | Type::FunctionPointer(_) => {
                Err(GenerateError::UnsupportedParameterType {
                    function: function.to_string(),
                    ty: names::c_spelling(ty),
                })
            }
        }
    }

    fn plan_pointer_param(
        &mut self,
        function: &str,
        full: &Type,
        pointee: &Type,
    ) -> Result<ParamStrategy, GenerateError> {
        match pointee {
            Type::Void => match self.abi {
                // Pointee data is assumed compatible on matching widths.
                GuestAbi::X86_64 => Ok(ParamStrategy::PointerDirect),
                GuestAbi::X86_32 => Err(GenerateError::UnsupportedParameterType {
                    function: function.to_string(),
                    ty: names::c_spelling(full),
                }),
            },
            Type::Scalar(s) => Ok(if names::scalar_width_matches(*s, self.abi) {
                ParamStrategy::PointerDirect
            } else {
                ParamStrategy::PointerRepack
            }),
            Type::Enum(name) => Ok(match self.enum_compat(name)? {
                TypeCompat::Identical => ParamStrategy::PointerDirect,
                _ => ParamStrategy::PointerRepack,
            }),
            Type::Struct(name) => {
                if self.assume_compatible(name) {
                    return Ok(ParamStrategy::PointerDirect);
                }
                if self.is_opaque(name) {
                    return Err(GenerateError::IncompleteType { ty: name.clone() });
                }
                match self.classify_struct(name)? {
                    TypeCompat::Identical => Ok(ParamStrategy::PointerDirect),
                    TypeCompat::Repackable => Ok(ParamStrategy::PointerRepack),
                    TypeCompat::Incompatible { member, cause } => {
                        Err(self.conversion_error(function, full, name, member, cause))
                    }
                    TypeCompat::Opaque => Err(GenerateError::IncompleteType { ty: name.clone() }),
                }
            }
            other => match self.classify_pointer(other)? {
                TypeCompat::Identical if self.abi == GuestAbi::X86_64 => {
                    Ok(ParamStrategy::PointerDirect)
                }
                _ => Err(GenerateError::UnsupportedParameterType {
                    function: function.to_string(),
                    ty: names::c_spelling(full),
                }),
            },
        }
    }

    fn plan_ret(
        &mut self,
        function: &str,
        ty: &Type,
        returns_guest_pointer: bool,
    ) -> Result<RetStrategy, GenerateError> {
        match ty {
            Type::Void => Ok(RetStrategy::Void),
            Type::FunctionPointer(sig) => {
                if !returns_guest_pointer {
                    return Err(GenerateError::ReturnsFunctionPointer(function.to_string()));
                }
                self.register_callback(sig, BTreeMap::new());
                Ok(RetStrategy::GuestFunctionPointer)
            }
            Type::Scalar(s) => Ok(if names::scalar_width_matches(*s, self.abi) {
                RetStrategy::Direct
            } else {
                RetStrategy::WidthCast
            }),
            Type::Enum(name) => Ok(match self.enum_compat(name)? {
                TypeCompat::Identical => RetStrategy::Direct,
                _ => RetStrategy::WidthCast,
            }),
            Type::Struct(name) => match self.classify_struct(name)? {
                TypeCompat::Identical => Ok(RetStrategy::AggregateIdentical),
                TypeCompat::Repackable => Ok(RetStrategy::AggregateRepack),
                TypeCompat::Incompatible { member, cause } => {
                    Err(self.conversion_error(function, ty, name, member, cause))
                }
                TypeCompat::Opaque => Err(GenerateError::IncompleteType { ty: name.clone() }),
            },
            Type::Pointer(pointee) => {
                let ok = match &**pointee {
                    Type::Void => true,
                    Type::Scalar(s) => names::scalar_width_matches(*s, self.abi),
                    Type::Struct(name) => {
                        self.assume_compatible(name)
                            || matches!(self.classify_struct(name)?, TypeCompat::Identical)
                    }
                    Type::Enum(name) => {
                        matches!(self.enum_compat(name)?, TypeCompat::Identical)
                    }
                    _ => false,
                };
                if ok {
                    Ok(RetStrategy::PointerDirect)
                } else {
                    // There is no storage to repack a returned pointee into.
                    Err(GenerateError::UnsupportedReturnType {
                        function: function.to_string(),
                        ty: names::c_spelling(ty),
                    })
                }
            }
            Type::Array(..) => Err(GenerateError::UnsupportedReturnType {
                function: function.to_string(),
                ty: names::c_spelling(ty),
            }),
        }
    }

    fn conversion_error(
        &self,
        function: &str,
        full: &Type,
        struct_name: &str,
        member: String,
        cause: IncompatCause,
    ) -> GenerateError {
        match cause {
            IncompatCause::OpaquePointee(name) => GenerateError::IncompleteType { ty: name },
            IncompatCause::VoidPointer => GenerateError::UnsupportedParameterType {
                function: function.to_string(),
                ty: names::c_spelling(full),
            },
            IncompatCause::LayoutMismatch => GenerateError::IncompatibleType {
                ty: struct_name.to_string(),
                member,
            },
        }
    }
}

/// Which structs get emitted layout wrappers, ordered so that a struct is
/// emitted after everything it contains as a complete member.
fn wrapper_emission_order(lib: &Library, cache: &BTreeMap<String, TypeCompat>) -> Vec<String> {
    let mut order: Vec<String> = cache
        .iter()
        .filter(|(name, compat)| match compat {
            TypeCompat::Identical | TypeCompat::Repackable => true,
            // Forcing is only meaningful when both views agree on the member
            // set; `analyze` has already rejected annotated types that don't.
            TypeCompat::Incompatible { .. } => {
                lib.type_config(name)
                    .map(|c| c.emit_layout_wrappers)
                    .unwrap_or(false)
                    && inconsistent_member_name(lib, name).is_none()
            }
            TypeCompat::Opaque => false,
        })
        .map(|(name, _)| name.clone())
        .collect();

    // Bubble sort over the partial containment order: plain comparison
    // sorts cannot order a dependency relation, this can.
    let mut fixpoint = false;
    while !fixpoint {
        fixpoint = true;
        for i in 0..order.len() {
            for j in (i + 1)..order.len() {
                if contains_complete(lib, &order[i], &order[j]) {
                    order.swap(i, j);
                    fixpoint = false;
                }
            }
        }
    }
    order
}

/// The first member name present in only one of a struct's two views, if
/// any. Repacking copies field-wise by name, so forced wrappers are limited
/// to types whose views agree on the member set.
fn inconsistent_member_name(lib: &Library, name: &str) -> Option<String> {
    let def = lib.struct_def(name)?;
    let guest = def.guest_view();
    for member in guest {
        if !def.members.iter().any(|h| h.name == member.name) {
            return Some(member.name.clone());
        }
    }
    for member in &def.members {
        if !guest.iter().any(|g| g.name == member.name) {
            return Some(member.name.clone());
        }
    }
    None
}

/// Whether `container` holds `target` as a complete member, recursively.
/// Pointer members never require the pointee's definition and are skipped,
/// which is what breaks reference cycles.
fn contains_complete(lib: &Library, container: &str, target: &str) -> bool {
    let Some(def) = lib.struct_def(container) else {
        return false;
    };
    def.members.iter().chain(def.guest_view()).any(|member| {
        let mut ty = &member.ty;
        while let Type::Array(elem, _) = ty {
            ty = elem;
        }
        match ty {
            Type::Struct(name) => name == target || contains_complete(lib, name, target),
            _ => false,
        }
    })
}
