//! The value types the registry deduplicates (spec.md §3.1).

use crate::string_id::StringId;

/// The platform's scalar-type enumeration for I/O elements and constants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Float32,
    Uint32,
    Sint32,
    Unknown,
}

/// A shader pipeline stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

impl Stage {
    pub fn from_compiler_stage(stage: shader_effects_compiler::Stage) -> Self {
        match stage {
            shader_effects_compiler::Stage::Vertex => Self::Vertex,
            shader_effects_compiler::Stage::Hull => Self::Hull,
            shader_effects_compiler::Stage::Domain => Self::Domain,
            shader_effects_compiler::Stage::Geometry => Self::Geometry,
            shader_effects_compiler::Stage::Pixel => Self::Pixel,
            shader_effects_compiler::Stage::Compute => Self::Compute,
        }
    }

    pub fn to_compiler_stage(self) -> shader_effects_compiler::Stage {
        match self {
            Self::Vertex => shader_effects_compiler::Stage::Vertex,
            Self::Hull => shader_effects_compiler::Stage::Hull,
            Self::Domain => shader_effects_compiler::Stage::Domain,
            Self::Geometry => shader_effects_compiler::Stage::Geometry,
            Self::Pixel => shader_effects_compiler::Stage::Pixel,
            Self::Compute => shader_effects_compiler::Stage::Compute,
        }
    }
}

bitflags::bitflags! {
    /// Bit-set over the kinds of binding a [`ResourceDef`] can be.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceTypeFlags: u16 {
        const SAMPLER            = 1 << 0;
        const BUFFER             = 1 << 1;
        const TEXTURE_1D         = 1 << 2;
        const TEXTURE_1D_ARRAY   = 1 << 3;
        const TEXTURE_2D         = 1 << 4;
        const TEXTURE_2D_ARRAY   = 1 << 5;
        const TEXTURE_3D         = 1 << 6;
        const TEXTURE_CUBE       = 1 << 7;
        const TEXTURE_CUBE_ARRAY = 1 << 8;
        const STRUCTURED         = 1 << 9;
        const RANDOM_WRITE       = 1 << 10;
    }
}

/// A value meaning "unassigned" for [`ResourceDef::slot`].
pub const UNASSIGNED_SLOT: u32 = 0xFFFF_FFFF;

/// One field inside a constant buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstDef {
    pub name: StringId,
    pub offset: u32,
    pub size: u32,
}

/// A named struct of uniform values bound to a stage. `layout` references a
/// [`super::ResourceTag::ConstLayout`] group listing the `ConstDef` IDs
/// making up the buffer, in field order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstBufDef {
    pub name: StringId,
    pub size_bytes: u32,
    pub layout: super::ids::Id,
}

/// One parameter in a stage's input or output signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct IoElementDef {
    pub semantic: StringId,
    pub semantic_index: u32,
    pub data_type: DataType,
    pub component_count: u8,
    pub size_bytes: u32,
}

impl IoElementDef {
    pub fn new(semantic: StringId, semantic_index: u32, data_type: DataType, component_count: u8) -> Self {
        assert!((1..=4).contains(&component_count), "component_count must be in 1..=4");
        Self {
            semantic,
            semantic_index,
            data_type,
            component_count,
            size_bytes: u32::from(component_count) * 4,
        }
    }
}

/// A texture, sampler, or buffer binding. `slot == UNASSIGNED_SLOT` means no
/// slot has been assigned yet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceDef {
    pub name: StringId,
    pub type_flags: ResourceTypeFlags,
    pub slot: u32,
}

/// A fully reflected, deduplicated shader.
///
/// Optional fields that a stage's reflection didn't populate (e.g. a pixel
/// shader has no `out_layout` unless something reads its output) are
/// `Id::INVALID`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderDef {
    pub file: StringId,
    pub byte_code: super::ids::Id,
    pub name: StringId,
    pub stage: Stage,
    pub thread_group: (u32, u32, u32),
    pub in_layout: super::ids::Id,
    pub out_layout: super::ids::Id,
    pub res_layout: super::ids::Id,
    pub cbuf_group: super::ids::Id,
}

/// A named sequence of passes. `passes` lists the effect's `EffectPass` IDs
/// in source order.
///
/// Unlike `ConstBufDef::layout` or `ShaderDef::cbuf_group`, this list is not
/// itself pushed into the shared ID arena as a deduplicated group: an
/// effect's pass list belongs 1:1 to that effect, so there's no sharing to
/// exploit, and keeping it as an owned `Vec` lets `EffectDef`'s derived
/// `Eq`/`Hash` compare by actual pass content rather than by an
/// offset/length pair that would differ across otherwise-identical effects
/// added from different repos.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EffectDef {
    pub name: StringId,
    pub passes: Vec<super::ids::Id>,
}
