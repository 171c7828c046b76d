//! Guest ABI rules and data-layout computation.
//!
//! Everything downstream (the classifier, both emitters, and the packed
//! record offset tables) derives sizes and offsets from this module, so the
//! guest stub and the host unpacker cannot disagree about where a slot
//! lives.

use crate::error::GenerateError;
use crate::interface::{Library, Member, Scalar, Type};

/// The guest instruction-set ABIs the generator understands. The host is
/// always 64-bit x86, which shares [`GuestAbi::X86_64`]'s rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestAbi {
    X86_32,
    X86_64,
}

impl std::fmt::Display for GuestAbi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GuestAbi::X86_32 => "x86_32",
            GuestAbi::X86_64 => "x86_64",
        })
    }
}

pub const HOST_ABI: GuestAbi = GuestAbi::X86_64;

/// Which member view of a dual-view struct declaration to lay out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutSide {
    Host,
    Guest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeAlign {
    pub size: u64,
    pub align: u64,
}

impl SizeAlign {
    fn new(size: u64, align: u64) -> SizeAlign {
        SizeAlign { size, align }
    }
}

impl GuestAbi {
    pub fn pointer(self) -> SizeAlign {
        match self {
            GuestAbi::X86_32 => SizeAlign::new(4, 4),
            GuestAbi::X86_64 => SizeAlign::new(8, 8),
        }
    }

    /// Scalar layout under this ABI. The i386 psABI caps aggregate member
    /// alignment at 4, so 8-byte scalars report `align == 4` there.
    pub fn scalar(self, scalar: Scalar) -> SizeAlign {
        use Scalar::*;
        match scalar {
            Char | SChar | UChar => SizeAlign::new(1, 1),
            Short | UShort => SizeAlign::new(2, 2),
            Int | UInt | Float => SizeAlign::new(4, 4),
            Long | ULong | SizeT => match self {
                GuestAbi::X86_32 => SizeAlign::new(4, 4),
                GuestAbi::X86_64 => SizeAlign::new(8, 8),
            },
            LongLong | ULongLong | Double => match self {
                GuestAbi::X86_32 => SizeAlign::new(8, 4),
                GuestAbi::X86_64 => SizeAlign::new(8, 8),
            },
        }
    }
}

pub fn align_to(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Size and alignment of `ty` under `abi`, using the `side` member view for
/// named aggregates.
pub fn layout_of(
    lib: &Library,
    abi: GuestAbi,
    side: LayoutSide,
    ty: &Type,
) -> Result<SizeAlign, GenerateError> {
    match ty {
        Type::Void => Ok(SizeAlign::new(0, 1)),
        Type::Scalar(s) => Ok(abi.scalar(*s)),
        Type::Enum(name) => {
            let def = lib
                .enum_def(name)
                .ok_or_else(|| GenerateError::UnknownDeclaration(name.clone()))?;
            let underlying = match side {
                LayoutSide::Guest => def.guest_underlying.unwrap_or(def.underlying),
                LayoutSide::Host => def.underlying,
            };
            Ok(abi.scalar(underlying))
        }
        Type::Struct(name) => {
            let layout = struct_layout(lib, abi, side, name)?;
            Ok(SizeAlign::new(layout.size, layout.align))
        }
        Type::Pointer(_) | Type::FunctionPointer(_) => Ok(abi.pointer()),
        Type::Array(elem, n) => {
            let elem = layout_of(lib, abi, side, elem)?;
            Ok(SizeAlign::new(elem.size * n, elem.align))
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemberLayout {
    pub name: String,
    pub ty: Type,
    pub offset: u64,
    pub layout: SizeAlign,
}

#[derive(Clone, Debug)]
pub struct StructLayout {
    pub members: Vec<MemberLayout>,
    pub size: u64,
    pub align: u64,
}

impl StructLayout {
    pub fn member(&self, name: &str) -> Option<&MemberLayout> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// Computes member offsets and the total size of a named struct.
pub fn struct_layout(
    lib: &Library,
    abi: GuestAbi,
    side: LayoutSide,
    name: &str,
) -> Result<StructLayout, GenerateError> {
    let def = lib
        .struct_def(name)
        .ok_or_else(|| GenerateError::UnknownDeclaration(name.to_string()))?;
    if def.opaque {
        return Err(GenerateError::IncompleteType { ty: name.to_string() });
    }
    let members: &[Member] = match side {
        LayoutSide::Guest => def.guest_view(),
        LayoutSide::Host => &def.members,
    };
    layout_members(lib, abi, side, members)
}

fn layout_members(
    lib: &Library,
    abi: GuestAbi,
    side: LayoutSide,
    members: &[Member],
) -> Result<StructLayout, GenerateError> {
    let mut out = Vec::with_capacity(members.len());
    let mut offset = 0;
    let mut align = 1;
    for member in members {
        let layout = layout_of(lib, abi, side, &member.ty)?;
        offset = align_to(offset, layout.align);
        out.push(MemberLayout {
            name: member.name.clone(),
            ty: member.ty.clone(),
            offset,
            layout,
        });
        offset += layout.size;
        align = align.max(layout.align);
    }
    Ok(StructLayout { members: out, size: align_to(offset, align), align })
}

/// Offsets for a packed-argument record: the slots are laid out in order,
/// each naturally aligned to its guest alignment. The caller puts the
/// return slot first and any trailing hidden slot last.
pub fn record_offsets(slots: &[SizeAlign]) -> (Vec<u64>, u64) {
    let mut offsets = Vec::with_capacity(slots.len());
    let mut offset = 0;
    let mut align = 1;
    for slot in slots {
        offset = align_to(offset, slot.align);
        offsets.push(offset);
        offset += slot.size;
        align = align.max(slot.align);
    }
    (offsets, align_to(offset, align))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{EnumDef, StructDef};

    fn lib_with(defs: Vec<StructDef>) -> Library {
        let mut lib = Library::new("libtest");
        for def in defs {
            lib.declare_struct(def);
        }
        lib
    }

    #[test]
    fn i386_scalar_rules() {
        let abi = GuestAbi::X86_32;
        assert_eq!(abi.scalar(Scalar::Long), SizeAlign::new(4, 4));
        assert_eq!(abi.scalar(Scalar::SizeT), SizeAlign::new(4, 4));
        assert_eq!(abi.scalar(Scalar::LongLong), SizeAlign::new(8, 4));
        assert_eq!(abi.scalar(Scalar::Double), SizeAlign::new(8, 4));
        assert_eq!(abi.pointer(), SizeAlign::new(4, 4));
    }

    #[test]
    fn struct_offsets_differ_between_abis() {
        let lib = lib_with(vec![StructDef::new(
            "S",
            vec![
                Member::new("a", Type::Scalar(Scalar::Int)),
                Member::new("b", Type::Scalar(Scalar::LongLong)),
                Member::new("c", Type::Scalar(Scalar::Char)),
            ],
        )]);

        let host = struct_layout(&lib, HOST_ABI, LayoutSide::Host, "S").unwrap();
        assert_eq!(host.member("b").unwrap().offset, 8);
        assert_eq!(host.size, 24);

        let guest = struct_layout(&lib, GuestAbi::X86_32, LayoutSide::Guest, "S").unwrap();
        assert_eq!(guest.member("b").unwrap().offset, 4);
        assert_eq!(guest.size, 16);
    }

    #[test]
    fn guest_view_overrides_member_order() {
        let def = StructDef::new(
            "S",
            vec![
                Member::new("a", Type::Scalar(Scalar::Int)),
                Member::new("b", Type::Scalar(Scalar::Int)),
            ],
        )
        .with_guest_members(vec![
            Member::new("b", Type::Scalar(Scalar::Int)),
            Member::new("a", Type::Scalar(Scalar::Int)),
        ]);
        let lib = lib_with(vec![def]);

        let host = struct_layout(&lib, HOST_ABI, LayoutSide::Host, "S").unwrap();
        let guest = struct_layout(&lib, HOST_ABI, LayoutSide::Guest, "S").unwrap();
        assert_eq!(host.member("a").unwrap().offset, 0);
        assert_eq!(guest.member("a").unwrap().offset, 4);
    }

    #[test]
    fn arrays_and_enums() {
        let mut lib = lib_with(vec![]);
        lib.declare_enum(EnumDef::new("Color", Scalar::UInt));
        let ty = Type::Array(Box::new(Type::Scalar(Scalar::Short)), 5);
        assert_eq!(
            layout_of(&lib, HOST_ABI, LayoutSide::Host, &ty).unwrap(),
            SizeAlign::new(10, 2)
        );
        assert_eq!(
            layout_of(&lib, HOST_ABI, LayoutSide::Host, &Type::Enum("Color".into())).unwrap(),
            SizeAlign::new(4, 4)
        );
    }

    #[test]
    fn opaque_structs_have_no_layout() {
        let lib = lib_with(vec![StructDef::opaque("B")]);
        assert!(matches!(
            struct_layout(&lib, HOST_ABI, LayoutSide::Host, "B"),
            Err(GenerateError::IncompleteType { .. })
        ));
    }

    #[test]
    fn record_offsets_respect_guest_alignment() {
        // i386-flavored slots: int return, then (u64, char, ptr).
        let slots = [
            SizeAlign::new(4, 4),
            SizeAlign::new(8, 4),
            SizeAlign::new(1, 1),
            SizeAlign::new(4, 4),
        ];
        let (offsets, size) = record_offsets(&slots);
        assert_eq!(offsets, vec![0, 4, 12, 16]);
        assert_eq!(size, 20);
    }
}
