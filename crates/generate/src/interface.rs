//! The generator's input model.
//!
//! Parsing C headers is the front-end's job, not ours; what the generator
//! consumes is this declaration model plus the annotation tables from
//! [`crate::config`]. The [`Library`] builder API is the seam a front-end
//! (or the CLI's TOML reader, or a test) populates.
//!
//! Structs may carry a divergent guest member list, which is how a
//! translation unit that declares different layouts per side is represented
//! here. Type spellings in the C syntax (`"unsigned long"`,
//! `"int (*)(char, char)"`) are accepted anywhere a [`Type`] is expected.

use std::collections::BTreeMap;

use crate::config::{FunctionConfig, ParamConfig, TypeConfig};
use crate::error::GenerateError;

/// The C scalar types that may cross the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scalar {
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    SizeT,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(Scalar),
    /// A named enum; layout comes from its underlying type.
    Enum(String),
    /// A named aggregate.
    Struct(String),
    Pointer(Box<Type>),
    FunctionPointer(Box<Signature>),
    /// Fixed-size array; only valid as a struct member.
    Array(Box<Type>, u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub ret: Type,
    pub params: Vec<Type>,
}

#[derive(Clone, Debug)]
pub struct Member {
    pub name: String,
    pub ty: Type,
}

impl Member {
    pub fn new(name: &str, ty: Type) -> Member {
        Member { name: name.to_string(), ty }
    }
}

#[derive(Clone, Debug)]
pub struct StructDef {
    pub name: String,
    /// Members as the host translation unit declares them.
    pub members: Vec<Member>,
    /// Divergent guest-side declaration, when the two sides differ.
    pub guest_members: Option<Vec<Member>>,
    /// Declared but never defined; usable only behind annotated pointers.
    pub opaque: bool,
}

impl StructDef {
    pub fn new(name: &str, members: Vec<Member>) -> StructDef {
        StructDef { name: name.to_string(), members, guest_members: None, opaque: false }
    }

    pub fn opaque(name: &str) -> StructDef {
        StructDef { name: name.to_string(), members: Vec::new(), guest_members: None, opaque: true }
    }

    pub fn with_guest_members(mut self, members: Vec<Member>) -> StructDef {
        self.guest_members = Some(members);
        self
    }

    pub fn guest_view(&self) -> &[Member] {
        self.guest_members.as_deref().unwrap_or(&self.members)
    }
}

#[derive(Clone, Debug)]
pub struct EnumDef {
    pub name: String,
    pub underlying: Scalar,
    /// Guest-side underlying type, when the two sides disagree.
    pub guest_underlying: Option<Scalar>,
}

impl EnumDef {
    pub fn new(name: &str, underlying: Scalar) -> EnumDef {
        EnumDef { name: name.to_string(), underlying, guest_underlying: None }
    }
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
    pub variadic: bool,
}

impl FunctionDecl {
    pub fn new(name: &str, ret: Type, params: Vec<Type>) -> FunctionDecl {
        FunctionDecl { name: name.to_string(), ret, params, variadic: false }
    }

    pub fn variadic(mut self) -> FunctionDecl {
        self.variadic = true;
        self
    }
}

/// A function-pointer signature registered for callback thunking without
/// appearing in any declared prototype.
#[derive(Clone, Debug)]
pub struct CallbackRegistration {
    pub signature: Signature,
    pub params: BTreeMap<usize, ParamConfig>,
}

/// One native library's interface: declarations plus annotation tables.
#[derive(Clone, Debug, Default)]
pub struct Library {
    name: String,
    version: Option<u32>,
    functions: Vec<FunctionDecl>,
    structs: BTreeMap<String, StructDef>,
    enums: BTreeMap<String, EnumDef>,
    exports: Vec<(String, FunctionConfig)>,
    type_configs: BTreeMap<String, TypeConfig>,
    callbacks: Vec<CallbackRegistration>,
}

impl Library {
    pub fn new(name: &str) -> Library {
        Library { name: name.to_string(), ..Default::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The library name with `-` flattened to `_`, usable inside emitted
    /// symbol names.
    pub fn sanitized_name(&self) -> String {
        self.name.replace('-', "_")
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = Some(version);
    }

    /// Filename passed to the loader: `<name>.so`, or `<name>.so.<N>` when a
    /// version annotation is present.
    pub fn so_filename(&self) -> String {
        match self.version {
            Some(v) => format!("{}.so.{}", self.name, v),
            None => format!("{}.so", self.name),
        }
    }

    pub fn declare_function(&mut self, decl: FunctionDecl) {
        self.functions.push(decl);
    }

    pub fn declare_struct(&mut self, def: StructDef) {
        self.structs.insert(def.name.clone(), def);
    }

    pub fn declare_enum(&mut self, def: EnumDef) {
        self.enums.insert(def.name.clone(), def);
    }

    /// Marks a declared function for thunking. The config is the required
    /// base annotation; a `version` field on it applies to the library.
    pub fn export_function(
        &mut self,
        name: &str,
        config: FunctionConfig,
    ) -> Result<(), GenerateError> {
        if self.function(name).is_none() {
            return Err(GenerateError::UnknownDeclaration(name.to_string()));
        }
        if let Some(v) = config.version {
            self.version = Some(v);
        }
        self.exports.push((name.to_string(), config));
        Ok(())
    }

    /// Registers a named type for layout-wrapper emission.
    pub fn register_type(&mut self, name: &str, config: TypeConfig) -> Result<(), GenerateError> {
        if !self.structs.contains_key(name) && !self.enums.contains_key(name) {
            return Err(GenerateError::UnknownDeclaration(name.to_string()));
        }
        self.type_configs.insert(name.to_string(), config);
        Ok(())
    }

    /// Registers a bare function signature for callback thunking.
    pub fn register_callback(&mut self, registration: CallbackRegistration) {
        self.callbacks.push(registration);
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDef> {
        self.structs.values()
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDef> {
        self.enums.values()
    }

    pub fn exports(&self) -> &[(String, FunctionConfig)] {
        &self.exports
    }

    pub fn type_config(&self, name: &str) -> Option<&TypeConfig> {
        self.type_configs.get(name)
    }

    pub fn callback_registrations(&self) -> &[CallbackRegistration] {
        &self.callbacks
    }

    /// Parses a C type spelling, resolving named types against the declared
    /// enums so that `Color` comes back as `Type::Enum` rather than a struct.
    pub fn parse_type(&self, spelling: &str) -> Result<Type, GenerateError> {
        let ty = Type::parse(spelling)?;
        Ok(self.resolve_named(ty))
    }

    fn resolve_named(&self, ty: Type) -> Type {
        match ty {
            Type::Struct(name) if self.enums.contains_key(&name) => Type::Enum(name),
            Type::Pointer(inner) => Type::Pointer(Box::new(self.resolve_named(*inner))),
            Type::Array(inner, n) => Type::Array(Box::new(self.resolve_named(*inner)), n),
            Type::FunctionPointer(sig) => {
                let ret = self.resolve_named(sig.ret);
                let params = sig.params.into_iter().map(|p| self.resolve_named(p)).collect();
                Type::FunctionPointer(Box::new(Signature { ret, params }))
            }
            other => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Num(u64),
    Star,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(spelling: &str) -> Result<Vec<Tok>, GenerateError> {
    let mut toks = Vec::new();
    let mut chars = spelling.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '*' => {
                chars.next();
                toks.push(Tok::Star);
            }
            '(' => {
                chars.next();
                toks.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                toks.push(Tok::RParen);
            }
            '[' => {
                chars.next();
                toks.push(Tok::LBracket);
            }
            ']' => {
                chars.next();
                toks.push(Tok::RBracket);
            }
            ',' => {
                chars.next();
                toks.push(Tok::Comma);
            }
            c if c.is_ascii_digit() => {
                let mut n = 0u64;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    n = n * 10 + d as u64;
                    chars.next();
                }
                toks.push(Tok::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(Tok::Ident(ident));
            }
            _ => return Err(GenerateError::BadTypeSpelling(spelling.to_string())),
        }
    }
    Ok(toks)
}

struct TypeParser<'a> {
    spelling: &'a str,
    toks: Vec<Tok>,
    pos: usize,
}

const KEYWORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "signed", "unsigned", "float", "double", "size_t",
];

impl<'a> TypeParser<'a> {
    fn new(spelling: &'a str) -> Result<Self, GenerateError> {
        Ok(TypeParser { spelling, toks: tokenize(spelling)?, pos: 0 })
    }

    fn error(&self) -> GenerateError {
        GenerateError::BadTypeSpelling(self.spelling.to_string())
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), GenerateError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn parse_base(&mut self) -> Result<Type, GenerateError> {
        let first = match self.peek() {
            Some(Tok::Ident(name)) => name.clone(),
            _ => return Err(self.error()),
        };
        if !KEYWORDS.contains(&first.as_str()) {
            self.bump();
            return Ok(Type::Struct(first));
        }

        let mut words = Vec::new();
        while let Some(Tok::Ident(name)) = self.peek() {
            if KEYWORDS.contains(&name.as_str()) {
                words.push(name.clone());
                self.bump();
            } else {
                break;
            }
        }
        self.scalar_from_words(&words)
    }

    fn scalar_from_words(&self, words: &[String]) -> Result<Type, GenerateError> {
        let has = |w: &str| words.iter().any(|x| x == w);
        let longs = words.iter().filter(|x| x.as_str() == "long").count();
        let unsigned = has("unsigned");
        let signed = has("signed");
        if unsigned && signed {
            return Err(self.error());
        }

        let scalar = if has("void") {
            if words.len() != 1 {
                return Err(self.error());
            }
            return Ok(Type::Void);
        } else if has("size_t") {
            Scalar::SizeT
        } else if has("char") {
            if unsigned {
                Scalar::UChar
            } else if signed {
                Scalar::SChar
            } else {
                Scalar::Char
            }
        } else if has("short") {
            if unsigned {
                Scalar::UShort
            } else {
                Scalar::Short
            }
        } else if longs == 2 {
            if unsigned {
                Scalar::ULongLong
            } else {
                Scalar::LongLong
            }
        } else if has("double") {
            if longs > 0 || unsigned || signed {
                return Err(self.error());
            }
            Scalar::Double
        } else if longs == 1 {
            if unsigned {
                Scalar::ULong
            } else {
                Scalar::Long
            }
        } else if has("float") {
            Scalar::Float
        } else if has("int") || unsigned || signed {
            if unsigned {
                Scalar::UInt
            } else {
                Scalar::Int
            }
        } else {
            return Err(self.error());
        };
        Ok(Type::Scalar(scalar))
    }

    fn parse_params(&mut self) -> Result<Vec<Type>, GenerateError> {
        let mut params = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(params);
        }
        loop {
            params.push(self.parse_type()?);
            if self.eat(&Tok::RParen) {
                break;
            }
            self.expect(&Tok::Comma)?;
        }
        // `(void)` spells an empty parameter list
        if params.len() == 1 && params[0] == Type::Void {
            params.clear();
        }
        Ok(params)
    }

    fn parse_type(&mut self) -> Result<Type, GenerateError> {
        let mut ty = self.parse_base()?;
        while self.eat(&Tok::Star) {
            ty = Type::Pointer(Box::new(ty));
        }
        if self.eat(&Tok::LParen) {
            // function pointer: `ret (*)(params)`
            self.expect(&Tok::Star)?;
            self.expect(&Tok::RParen)?;
            self.expect(&Tok::LParen)?;
            let params = self.parse_params()?;
            ty = Type::FunctionPointer(Box::new(Signature { ret: ty, params }));
        }
        if self.eat(&Tok::LBracket) {
            let n = match self.bump() {
                Some(Tok::Num(n)) => n,
                _ => return Err(self.error()),
            };
            self.expect(&Tok::RBracket)?;
            ty = Type::Array(Box::new(ty), n);
        }
        Ok(ty)
    }

    fn parse_signature(&mut self) -> Result<Signature, GenerateError> {
        let mut ret = self.parse_base()?;
        while self.eat(&Tok::Star) {
            ret = Type::Pointer(Box::new(ret));
        }
        self.expect(&Tok::LParen)?;
        let params = self.parse_params()?;
        Ok(Signature { ret, params })
    }

    fn finish(&self) -> Result<(), GenerateError> {
        if self.pos == self.toks.len() {
            Ok(())
        } else {
            Err(self.error())
        }
    }
}

impl Type {
    /// Parses a C type spelling such as `"unsigned long"`, `"TestStruct *"`
    /// or `"int (*)(char, char)"`. Named types come back as [`Type::Struct`];
    /// use [`Library::parse_type`] to resolve enums.
    pub fn parse(spelling: &str) -> Result<Type, GenerateError> {
        let mut parser = TypeParser::new(spelling)?;
        let ty = parser.parse_type()?;
        parser.finish()?;
        Ok(ty)
    }
}

impl Signature {
    /// Parses a bare function signature such as `"int (char, char)"`.
    pub fn parse(spelling: &str) -> Result<Signature, GenerateError> {
        let mut parser = TypeParser::new(spelling)?;
        let sig = parser.parse_signature()?;
        parser.finish()?;
        Ok(sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_spellings() {
        assert_eq!(Type::parse("int").unwrap(), Type::Scalar(Scalar::Int));
        assert_eq!(Type::parse("unsigned long").unwrap(), Type::Scalar(Scalar::ULong));
        assert_eq!(Type::parse("long long").unwrap(), Type::Scalar(Scalar::LongLong));
        assert_eq!(Type::parse("unsigned").unwrap(), Type::Scalar(Scalar::UInt));
        assert_eq!(Type::parse("signed char").unwrap(), Type::Scalar(Scalar::SChar));
        assert_eq!(Type::parse("size_t").unwrap(), Type::Scalar(Scalar::SizeT));
        assert_eq!(Type::parse("void").unwrap(), Type::Void);
    }

    #[test]
    fn pointers_and_named_types() {
        assert_eq!(
            Type::parse("void *").unwrap(),
            Type::Pointer(Box::new(Type::Void))
        );
        assert_eq!(
            Type::parse("TestStruct *").unwrap(),
            Type::Pointer(Box::new(Type::Struct("TestStruct".to_string())))
        );
        assert_eq!(
            Type::parse("char **").unwrap(),
            Type::Pointer(Box::new(Type::Pointer(Box::new(Type::Scalar(Scalar::Char)))))
        );
    }

    #[test]
    fn function_pointers() {
        let ty = Type::parse("int (*)(char, char)").unwrap();
        match ty {
            Type::FunctionPointer(sig) => {
                assert_eq!(sig.ret, Type::Scalar(Scalar::Int));
                assert_eq!(sig.params.len(), 2);
            }
            other => panic!("parsed as {other:?}"),
        }

        let sig = Signature::parse("void (void)").unwrap();
        assert_eq!(sig.ret, Type::Void);
        assert!(sig.params.is_empty());
    }

    #[test]
    fn arrays_and_garbage() {
        assert_eq!(
            Type::parse("int [4]").unwrap(),
            Type::Array(Box::new(Type::Scalar(Scalar::Int)), 4)
        );
        assert!(Type::parse("long double").is_err());
        assert!(Type::parse("int &").is_err());
        assert!(Type::parse("").is_err());
    }

    #[test]
    fn enum_resolution() {
        let mut lib = Library::new("libtest");
        lib.declare_enum(EnumDef::new("Color", Scalar::UInt));
        assert_eq!(lib.parse_type("Color").unwrap(), Type::Enum("Color".to_string()));
        assert_eq!(
            lib.parse_type("Color *").unwrap(),
            Type::Pointer(Box::new(Type::Enum("Color".to_string())))
        );
    }
}
