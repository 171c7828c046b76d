//! The annotation model.
//!
//! The set of recognized markers is closed: anything else aborts generation,
//! as does an unrecognized field inside a configuration record. Annotations
//! are applied through the typed methods here so that a marker attached to
//! the wrong kind of target is rejected at registration time rather than
//! surfacing as misgenerated code.

use std::collections::BTreeMap;

use crate::error::GenerateError;
use crate::interface::Type;

/// Every declarative marker the generator recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Annotation {
    /// Suppress the auto-generated host body; the user provides
    /// `fexfn_impl_<lib>_<name>` instead.
    CustomHostImpl,
    /// Allow returning a function pointer.
    ReturnsGuestPointer,
    /// Forward the raw guest pointer without converting the pointee.
    PtrPassthrough,
    /// Treat the (pointee) layout as identical without verification.
    AssumeCompatibleDataLayout,
    /// Emit layout wrappers even for an incompatible type.
    EmitLayoutWrappers,
}

impl Annotation {
    pub fn from_name(name: &str) -> Result<Annotation, GenerateError> {
        match name {
            "custom_host_impl" => Ok(Annotation::CustomHostImpl),
            "returns_guest_pointer" => Ok(Annotation::ReturnsGuestPointer),
            "ptr_passthrough" => Ok(Annotation::PtrPassthrough),
            "assume_compatible_data_layout" => Ok(Annotation::AssumeCompatibleDataLayout),
            "emit_layout_wrappers" => Ok(Annotation::EmitLayoutWrappers),
            other => Err(GenerateError::UnknownAnnotation(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Annotation::CustomHostImpl => "custom_host_impl",
            Annotation::ReturnsGuestPointer => "returns_guest_pointer",
            Annotation::PtrPassthrough => "ptr_passthrough",
            Annotation::AssumeCompatibleDataLayout => "assume_compatible_data_layout",
            Annotation::EmitLayoutWrappers => "emit_layout_wrappers",
        }
    }
}

/// A value assigned to a configuration-record field.
#[derive(Clone, Debug)]
pub enum ConfigValue {
    Int(u64),
    Type(Type),
}

/// Per-function configuration; its presence is what marks a function for
/// thunking.
#[derive(Clone, Debug, Default)]
pub struct FunctionConfig {
    pub custom_host_impl: bool,
    pub returns_guest_pointer: bool,
    pub uniform_va_type: Option<Type>,
    pub version: Option<u32>,
    pub params: BTreeMap<usize, ParamConfig>,
}

impl FunctionConfig {
    pub fn new() -> FunctionConfig {
        FunctionConfig::default()
    }

    /// Applies a marker inherited by the function's configuration record.
    pub fn annotate(&mut self, annotation: Annotation) -> Result<(), GenerateError> {
        match annotation {
            Annotation::CustomHostImpl => self.custom_host_impl = true,
            Annotation::ReturnsGuestPointer => self.returns_guest_pointer = true,
            other => {
                return Err(GenerateError::InvalidAnnotationTarget {
                    annotation: other.name().to_string(),
                    target: "function".to_string(),
                })
            }
        }
        Ok(())
    }

    /// Applies a marker to one parameter of the function.
    pub fn annotate_param(
        &mut self,
        index: usize,
        annotation: Annotation,
    ) -> Result<(), GenerateError> {
        let param = self.params.entry(index).or_default();
        match annotation {
            Annotation::PtrPassthrough => param.ptr_passthrough = true,
            Annotation::AssumeCompatibleDataLayout => param.assume_compatible = true,
            other => {
                return Err(GenerateError::InvalidAnnotationTarget {
                    annotation: other.name().to_string(),
                    target: "parameter".to_string(),
                })
            }
        }
        Ok(())
    }

    /// Sets a named field of the configuration record. Unrecognized field
    /// names are a hard error.
    pub fn set_field(
        &mut self,
        target: &str,
        field: &str,
        value: ConfigValue,
    ) -> Result<(), GenerateError> {
        match (field, value) {
            ("version", ConfigValue::Int(v)) => {
                self.version = Some(v as u32);
                Ok(())
            }
            ("uniform_va_type", ConfigValue::Type(ty)) => {
                self.uniform_va_type = Some(ty);
                Ok(())
            }
            (field, _) => Err(GenerateError::UnknownConfigField {
                target: target.to_string(),
                field: field.to_string(),
            }),
        }
    }

    pub fn param(&self, index: usize) -> ParamConfig {
        self.params.get(&index).copied().unwrap_or_default()
    }
}

/// Per-parameter configuration, keyed by `(function, index)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParamConfig {
    pub ptr_passthrough: bool,
    pub assume_compatible: bool,
}

/// Per-type configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeConfig {
    pub emit_layout_wrappers: bool,
    pub assume_compatible: bool,
}

impl TypeConfig {
    pub fn new() -> TypeConfig {
        TypeConfig::default()
    }

    pub fn annotate(&mut self, annotation: Annotation) -> Result<(), GenerateError> {
        match annotation {
            Annotation::EmitLayoutWrappers => self.emit_layout_wrappers = true,
            Annotation::AssumeCompatibleDataLayout => self.assume_compatible = true,
            other => {
                return Err(GenerateError::InvalidAnnotationTarget {
                    annotation: other.name().to_string(),
                    target: "type".to_string(),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_annotations_are_rejected() {
        assert!(matches!(
            Annotation::from_name("invalid_annotation"),
            Err(GenerateError::UnknownAnnotation(_))
        ));
        for name in [
            "custom_host_impl",
            "returns_guest_pointer",
            "ptr_passthrough",
            "assume_compatible_data_layout",
            "emit_layout_wrappers",
        ] {
            assert!(Annotation::from_name(name).is_ok());
        }
    }

    #[test]
    fn unknown_config_fields_are_rejected() {
        let mut config = FunctionConfig::new();
        assert!(matches!(
            config.set_field("func", "invalid_field_annotation", ConfigValue::Int(0)),
            Err(GenerateError::UnknownConfigField { .. })
        ));
        config.set_field("func", "version", ConfigValue::Int(123)).unwrap();
        assert_eq!(config.version, Some(123));
    }

    #[test]
    fn annotation_targets_are_checked() {
        let mut config = FunctionConfig::new();
        assert!(config.annotate(Annotation::PtrPassthrough).is_err());
        assert!(config.annotate_param(0, Annotation::CustomHostImpl).is_err());
        assert!(config.annotate_param(0, Annotation::PtrPassthrough).is_ok());
        assert!(config.param(0).ptr_passthrough);

        let mut ty = TypeConfig::new();
        assert!(ty.annotate(Annotation::ReturnsGuestPointer).is_err());
        assert!(ty.annotate(Annotation::EmitLayoutWrappers).is_ok());
    }
}
