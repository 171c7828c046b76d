//! The TOML interface-description format.
//!
//! A description declares the native library's types and prototypes and
//! attaches the annotation tables, using C type spellings throughout:
//!
//! ```toml
//! library = "libtest"
//!
//! [[struct]]
//! name = "TestStruct"
//! members = [{ name = "member", type = "int" }]
//!
//! [[function]]
//! name = "func"
//! return = "void"
//! params = ["int", "char", "TestStruct *"]
//!
//! [[function]]
//! name = "install_callback"
//! params = [{ type = "void *", annotations = ["ptr_passthrough"] }]
//! annotations = ["custom_host_impl"]
//! ```
//!
//! Unknown annotation names and unknown fields are hard errors, matching
//! the generator's closed annotation model.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use thunkgen_generate::{
    Annotation, CallbackRegistration, ConfigValue, EnumDef, FunctionConfig, FunctionDecl, Library,
    Member, ParamConfig, Scalar, Signature, StructDef, Type, TypeConfig,
};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Description {
    library: String,
    version: Option<u32>,
    #[serde(default, rename = "struct")]
    structs: Vec<StructDesc>,
    #[serde(default, rename = "enum")]
    enums: Vec<EnumDesc>,
    #[serde(default, rename = "function")]
    functions: Vec<FunctionDesc>,
    #[serde(default, rename = "callback")]
    callbacks: Vec<CallbackDesc>,
    #[serde(default, rename = "type")]
    types: Vec<TypeDesc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StructDesc {
    name: String,
    #[serde(default)]
    members: Vec<MemberDesc>,
    guest_members: Option<Vec<MemberDesc>>,
    #[serde(default)]
    opaque: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MemberDesc {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EnumDesc {
    name: String,
    underlying: String,
    guest_underlying: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionDesc {
    name: String,
    #[serde(default, rename = "return")]
    ret: Option<String>,
    #[serde(default)]
    params: Vec<ParamDesc>,
    #[serde(default)]
    variadic: bool,
    #[serde(default)]
    annotations: Vec<String>,
    uniform_va_type: Option<String>,
    version: Option<u32>,
    /// Declare the prototype without thunking it.
    #[serde(default)]
    declare_only: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParamDesc {
    Plain(String),
    Annotated {
        #[serde(rename = "type")]
        ty: String,
        #[serde(default)]
        annotations: Vec<String>,
    },
}

impl ParamDesc {
    fn spelling(&self) -> &str {
        match self {
            ParamDesc::Plain(s) => s,
            ParamDesc::Annotated { ty, .. } => ty,
        }
    }

    fn annotations(&self) -> &[String] {
        match self {
            ParamDesc::Plain(_) => &[],
            ParamDesc::Annotated { annotations, .. } => annotations,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CallbackDesc {
    signature: String,
    #[serde(default)]
    param_annotations: Vec<IndexedAnnotations>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexedAnnotations {
    index: usize,
    annotations: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeDesc {
    name: String,
    annotations: Vec<String>,
}

/// Parses a TOML interface description into the generator's model.
pub fn parse(text: &str) -> Result<Library> {
    let desc: Description = toml::from_str(text).context("malformed TOML")?;
    build(desc)
}

fn build(desc: Description) -> Result<Library> {
    let mut lib = Library::new(&desc.library);
    if let Some(version) = desc.version {
        lib.set_version(version);
    }

    // Enums first: struct members and prototypes may spell them by name.
    for e in &desc.enums {
        let underlying = scalar(&e.underlying)?;
        let mut def = EnumDef::new(&e.name, underlying);
        if let Some(guest) = &e.guest_underlying {
            def.guest_underlying = Some(scalar(guest)?);
        }
        lib.declare_enum(def);
    }

    for s in &desc.structs {
        if s.opaque {
            if !s.members.is_empty() || s.guest_members.is_some() {
                bail!("opaque struct `{}` must not declare members", s.name);
            }
            lib.declare_struct(StructDef::opaque(&s.name));
            continue;
        }
        let members = member_list(&lib, &s.members)
            .with_context(|| format!("in struct `{}`", s.name))?;
        let mut def = StructDef::new(&s.name, members);
        if let Some(guest) = &s.guest_members {
            let guest = member_list(&lib, guest)
                .with_context(|| format!("in guest view of struct `{}`", s.name))?;
            def = def.with_guest_members(guest);
        }
        lib.declare_struct(def);
    }

    for f in &desc.functions {
        let ret = match &f.ret {
            Some(spelling) => lib.parse_type(spelling)?,
            None => Type::Void,
        };
        let params = f
            .params
            .iter()
            .map(|p| lib.parse_type(p.spelling()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("in function `{}`", f.name))?;
        let mut decl = FunctionDecl::new(&f.name, ret, params);
        if f.variadic {
            decl = decl.variadic();
        }
        lib.declare_function(decl);
    }

    // Second pass over functions: annotations may reference declared types.
    for f in &desc.functions {
        if f.declare_only {
            continue;
        }
        let mut config = FunctionConfig::new();
        for name in &f.annotations {
            config.annotate(Annotation::from_name(name)?)?;
        }
        for (index, param) in f.params.iter().enumerate() {
            for name in param.annotations() {
                config.annotate_param(index, Annotation::from_name(name)?)?;
            }
        }
        if let Some(spelling) = &f.uniform_va_type {
            let ty = lib.parse_type(spelling)?;
            config.set_field(&f.name, "uniform_va_type", ConfigValue::Type(ty))?;
        }
        if let Some(version) = f.version {
            config.set_field(&f.name, "version", ConfigValue::Int(version as u64))?;
        }
        lib.export_function(&f.name, config)?;
    }

    for c in &desc.callbacks {
        let signature = Signature::parse(&c.signature)?;
        let mut params: BTreeMap<usize, ParamConfig> = BTreeMap::new();
        for entry in &c.param_annotations {
            let mut config = FunctionConfig::new();
            for name in &entry.annotations {
                config.annotate_param(entry.index, Annotation::from_name(name)?)?;
            }
            params.insert(entry.index, config.param(entry.index));
        }
        lib.register_callback(CallbackRegistration { signature, params });
    }

    for t in &desc.types {
        let mut config = TypeConfig::new();
        for name in &t.annotations {
            config.annotate(Annotation::from_name(name)?)?;
        }
        lib.register_type(&t.name, config)?;
    }

    Ok(lib)
}

fn member_list(lib: &Library, members: &[MemberDesc]) -> Result<Vec<Member>> {
    members
        .iter()
        .map(|m| Ok(Member::new(&m.name, lib.parse_type(&m.ty)?)))
        .collect()
}

fn scalar(spelling: &str) -> Result<Scalar> {
    match Type::parse(spelling)? {
        Type::Scalar(s) => Ok(s),
        other => bail!("`{spelling}` is not a scalar type (parsed as {other:?})"),
    }
}
