//! Library definition, its byte-exact serialization (spec.md §6.3), and
//! the read-side map (spec.md §4.H).

use std::fmt::{self, Display, Formatter};

use bytes::{Buf, BufMut};
use hashbrown::HashMap;

use crate::registry::defs::{ConstBufDef, ConstDef, EffectDef, IoElementDef, ResourceDef, ShaderDef};
use crate::registry::ids::{Id, ResourceTag, Span};
use crate::registry::Registry;
use crate::string_id::{StringId, StringIdMap, StringIdMapDef};
use shader_effects_compiler::Target;

/// `platform` section of a [`ShaderLibDef`] (spec.md §3.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    pub compiler_version: String,
    pub feature_level: String,
    pub target: Target,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoSrc {
    pub name: String,
    pub path: String,
}

/// `(effectID, vID)` or `(shaderID, vID)` rows visible in one variant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariantDef {
    pub effects: Vec<(Id, u32)>,
    pub shaders: Vec<(Id, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantRepoDef {
    pub src: RepoSrc,
    pub flag_ids: Vec<StringId>,
    pub mode_ids: Vec<StringId>,
    pub variants: Vec<VariantDef>,
}

/// Plain-data mirror of [`Registry`]'s internal vectors and arenas,
/// suitable for serialization (spec.md §6.3 item 4).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryDef {
    pub constants: Vec<ConstDef>,
    pub const_layouts: Vec<Span>,
    pub const_buffers: Vec<ConstBufDef>,
    pub io_elements: Vec<IoElementDef>,
    pub resources: Vec<ResourceDef>,
    pub cbuf_groups: Vec<Span>,
    pub io_layouts: Vec<Span>,
    pub res_groups: Vec<Span>,
    pub bytecode_spans: Vec<Span>,
    pub shaders: Vec<ShaderDef>,
    pub effect_passes: Vec<Span>,
    pub effects: Vec<EffectDef>,
    pub id_arena: Vec<u32>,
    pub byte_arena: Vec<u8>,
}

/// The serializable form of the whole build (spec.md §3.2, §6.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderLibDef {
    pub name: String,
    pub platform: Platform,
    pub repos: Vec<VariantRepoDef>,
    pub registry: RegistryDef,
    pub string_ids: StringIdMapDef,
}

// --- byte-exact encode/decode (spec.md §6.3) --------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Section {
    Header,
    Repos,
    Registry,
    Strings,
}

impl Display for Section {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Repos => write!(f, "repos"),
            Self::Registry => write!(f, "registry"),
            Self::Strings => write!(f, "strings"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EofError {
    expected_len: usize,
    got_len: usize,
    section: Section,
}

impl Display for EofError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected eof: expected {} bytes, got {} bytes decoding section {}",
            self.expected_len, self.got_len, self.section
        )
    }
}

impl std::error::Error for EofError {}

#[derive(Clone, Debug)]
pub enum DecodeError {
    Eof(EofError),
    InvalidUtf8,
    InvalidTarget(u8),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof(err) => Display::fmt(err, f),
            Self::InvalidUtf8 => write!(f, "string section contains invalid utf-8"),
            Self::InvalidTarget(tag) => write!(f, "unknown platform target tag {tag}"),
        }
    }
}

impl std::error::Error for DecodeError {}

fn need(buf: &[u8], len: usize, section: Section) -> Result<(), DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::Eof(EofError {
            expected_len: len,
            got_len: buf.len(),
            section,
        }));
    }
    Ok(())
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u64_le(s.len() as u64);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut &[u8], section: Section) -> Result<String, DecodeError> {
    need(buf, 8, section)?;
    let len = buf.get_u64_le() as usize;
    need(buf, len, section)?;
    let bytes = &buf[..len];
    let s = std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn put_span(buf: &mut Vec<u8>, span: Span) {
    buf.put_u32_le(span.offset);
    buf.put_u32_le(span.len);
}

fn get_span(buf: &mut &[u8], section: Section) -> Result<Span, DecodeError> {
    need(buf, 8, section)?;
    Ok(Span {
        offset: buf.get_u32_le(),
        len: buf.get_u32_le(),
    })
}

fn put_u32_vec(buf: &mut Vec<u8>, values: &[u32]) {
    buf.put_u64_le(values.len() as u64);
    for v in values {
        buf.put_u32_le(*v);
    }
}

fn get_u32_vec(buf: &mut &[u8], section: Section) -> Result<Vec<u32>, DecodeError> {
    need(buf, 8, section)?;
    let len = buf.get_u64_le() as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        need(buf, 4, section)?;
        out.push(buf.get_u32_le());
    }
    Ok(out)
}

impl ShaderLibDef {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, &self.name);

        put_string(&mut buf, &self.platform.compiler_version);
        put_string(&mut buf, &self.platform.feature_level);
        buf.put_u8(match self.platform.target {
            Target::Dx11 => 0,
            Target::Dx12 => 1,
            Target::Vulkan => 2,
        });

        buf.put_u64_le(self.repos.len() as u64);
        for repo in &self.repos {
            put_string(&mut buf, &repo.src.name);
            put_string(&mut buf, &repo.src.path);
            put_u32_vec(
                &mut buf,
                &repo.flag_ids.iter().map(|id| id_to_raw(*id)).collect::<Vec<_>>(),
            );
            put_u32_vec(
                &mut buf,
                &repo.mode_ids.iter().map(|id| id_to_raw(*id)).collect::<Vec<_>>(),
            );
            buf.put_u64_le(repo.variants.len() as u64);
            for variant in &repo.variants {
                buf.put_u64_le(variant.effects.len() as u64);
                for (id, vid) in &variant.effects {
                    buf.put_u32_le(id.raw());
                    buf.put_u32_le(*vid);
                }
                buf.put_u64_le(variant.shaders.len() as u64);
                for (id, vid) in &variant.shaders {
                    buf.put_u32_le(id.raw());
                    buf.put_u32_le(*vid);
                }
            }
        }

        encode_registry(&mut buf, &self.registry);

        buf.put_u64_le(self.string_ids.offsets.len() as u64);
        for v in &self.string_ids.offsets {
            buf.put_u32_le(*v);
        }
        buf.put_u64_le(self.string_ids.data.len() as u64);
        buf.put_slice(&self.string_ids.data);

        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, DecodeError> {
        let name = get_string(&mut buf, Section::Header)?;

        let compiler_version = get_string(&mut buf, Section::Header)?;
        let feature_level = get_string(&mut buf, Section::Header)?;
        need(buf, 1, Section::Header)?;
        let target = match buf.get_u8() {
            0 => Target::Dx11,
            1 => Target::Dx12,
            2 => Target::Vulkan,
            other => return Err(DecodeError::InvalidTarget(other)),
        };

        need(buf, 8, Section::Repos)?;
        let num_repos = buf.get_u64_le();
        let mut repos = Vec::with_capacity(num_repos as usize);
        for _ in 0..num_repos {
            let repo_name = get_string(&mut buf, Section::Repos)?;
            let repo_path = get_string(&mut buf, Section::Repos)?;
            let flag_ids = get_u32_vec(&mut buf, Section::Repos)?
                .into_iter()
                .map(StringId::from_raw)
                .collect();
            let mode_ids = get_u32_vec(&mut buf, Section::Repos)?
                .into_iter()
                .map(StringId::from_raw)
                .collect();

            need(buf, 8, Section::Repos)?;
            let num_variants = buf.get_u64_le();
            let mut variants = Vec::with_capacity(num_variants as usize);
            for _ in 0..num_variants {
                need(buf, 8, Section::Repos)?;
                let num_effects = buf.get_u64_le();
                let mut effects = Vec::with_capacity(num_effects as usize);
                for _ in 0..num_effects {
                    need(buf, 8, Section::Repos)?;
                    effects.push((Id::from_raw(buf.get_u32_le()), buf.get_u32_le()));
                }
                need(buf, 8, Section::Repos)?;
                let num_shaders = buf.get_u64_le();
                let mut shaders = Vec::with_capacity(num_shaders as usize);
                for _ in 0..num_shaders {
                    need(buf, 8, Section::Repos)?;
                    shaders.push((Id::from_raw(buf.get_u32_le()), buf.get_u32_le()));
                }
                variants.push(VariantDef { effects, shaders });
            }

            repos.push(VariantRepoDef {
                src: RepoSrc {
                    name: repo_name,
                    path: repo_path,
                },
                flag_ids,
                mode_ids,
                variants,
            });
        }

        let registry = decode_registry(&mut buf)?;

        need(buf, 8, Section::Strings)?;
        let offsets_len = buf.get_u64_le() as usize;
        let mut offsets = Vec::with_capacity(offsets_len);
        for _ in 0..offsets_len {
            need(buf, 4, Section::Strings)?;
            offsets.push(buf.get_u32_le());
        }
        need(buf, 8, Section::Strings)?;
        let data_len = buf.get_u64_le() as usize;
        need(buf, data_len, Section::Strings)?;
        let data = buf[..data_len].to_vec();
        buf.advance(data_len);

        Ok(Self {
            name,
            platform: Platform {
                compiler_version,
                feature_level,
                target,
            },
            repos,
            registry,
            string_ids: StringIdMapDef { offsets, data },
        })
    }
}

fn id_to_raw(id: StringId) -> u32 {
    id.raw()
}

fn encode_registry(buf: &mut Vec<u8>, reg: &RegistryDef) {
    buf.put_u64_le(reg.constants.len() as u64);
    for c in &reg.constants {
        buf.put_u32_le(id_to_raw(c.name));
        buf.put_u32_le(c.offset);
        buf.put_u32_le(c.size);
    }

    buf.put_u64_le(reg.const_layouts.len() as u64);
    for s in &reg.const_layouts {
        put_span(buf, *s);
    }

    buf.put_u64_le(reg.const_buffers.len() as u64);
    for c in &reg.const_buffers {
        buf.put_u32_le(id_to_raw(c.name));
        buf.put_u32_le(c.size_bytes);
        buf.put_u32_le(c.layout.raw());
    }

    buf.put_u64_le(reg.io_elements.len() as u64);
    for e in &reg.io_elements {
        buf.put_u32_le(id_to_raw(e.semantic));
        buf.put_u32_le(e.semantic_index);
        buf.put_u8(e.data_type as u8);
        buf.put_u8(e.component_count);
        buf.put_u32_le(e.size_bytes);
    }

    buf.put_u64_le(reg.resources.len() as u64);
    for r in &reg.resources {
        buf.put_u32_le(id_to_raw(r.name));
        buf.put_u16_le(r.type_flags.bits());
        buf.put_u32_le(r.slot);
    }

    buf.put_u64_le(reg.cbuf_groups.len() as u64);
    for s in &reg.cbuf_groups {
        put_span(buf, *s);
    }
    buf.put_u64_le(reg.io_layouts.len() as u64);
    for s in &reg.io_layouts {
        put_span(buf, *s);
    }
    buf.put_u64_le(reg.res_groups.len() as u64);
    for s in &reg.res_groups {
        put_span(buf, *s);
    }
    buf.put_u64_le(reg.bytecode_spans.len() as u64);
    for s in &reg.bytecode_spans {
        put_span(buf, *s);
    }

    buf.put_u64_le(reg.shaders.len() as u64);
    for s in &reg.shaders {
        buf.put_u32_le(id_to_raw(s.file));
        buf.put_u32_le(s.byte_code.raw());
        buf.put_u32_le(id_to_raw(s.name));
        buf.put_u8(s.stage as u8);
        buf.put_u32_le(s.thread_group.0);
        buf.put_u32_le(s.thread_group.1);
        buf.put_u32_le(s.thread_group.2);
        buf.put_u32_le(s.in_layout.raw());
        buf.put_u32_le(s.out_layout.raw());
        buf.put_u32_le(s.res_layout.raw());
        buf.put_u32_le(s.cbuf_group.raw());
    }

    buf.put_u64_le(reg.effect_passes.len() as u64);
    for s in &reg.effect_passes {
        put_span(buf, *s);
    }

    buf.put_u64_le(reg.effects.len() as u64);
    for e in &reg.effects {
        buf.put_u32_le(id_to_raw(e.name));
        put_u32_vec(buf, &e.passes.iter().map(|id| id.raw()).collect::<Vec<_>>());
    }

    put_u32_vec(buf, &reg.id_arena);
    buf.put_u64_le(reg.byte_arena.len() as u64);
    buf.put_slice(&reg.byte_arena);
}

fn decode_registry(buf: &mut &[u8]) -> Result<RegistryDef, DecodeError> {
    let mut reg = RegistryDef::default();

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        need(buf, 12, Section::Registry)?;
        reg.constants.push(ConstDef {
            name: StringId::from_raw(buf.get_u32_le()),
            offset: buf.get_u32_le(),
            size: buf.get_u32_le(),
        });
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        reg.const_layouts.push(get_span(buf, Section::Registry)?);
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        need(buf, 12, Section::Registry)?;
        reg.const_buffers.push(ConstBufDef {
            name: StringId::from_raw(buf.get_u32_le()),
            size_bytes: buf.get_u32_le(),
            layout: Id::from_raw(buf.get_u32_le()),
        });
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        need(buf, 14, Section::Registry)?;
        let semantic = StringId::from_raw(buf.get_u32_le());
        let semantic_index = buf.get_u32_le();
        let data_type = decode_data_type(buf.get_u8());
        let component_count = buf.get_u8();
        let size_bytes = buf.get_u32_le();
        reg.io_elements.push(IoElementDef {
            semantic,
            semantic_index,
            data_type,
            component_count,
            size_bytes,
        });
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        need(buf, 10, Section::Registry)?;
        let name = StringId::from_raw(buf.get_u32_le());
        let type_flags =
            crate::registry::defs::ResourceTypeFlags::from_bits_truncate(buf.get_u16_le());
        let slot = buf.get_u32_le();
        reg.resources.push(ResourceDef { name, type_flags, slot });
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        reg.cbuf_groups.push(get_span(buf, Section::Registry)?);
    }
    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        reg.io_layouts.push(get_span(buf, Section::Registry)?);
    }
    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        reg.res_groups.push(get_span(buf, Section::Registry)?);
    }
    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        reg.bytecode_spans.push(get_span(buf, Section::Registry)?);
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        need(buf, 41, Section::Registry)?;
        reg.shaders.push(ShaderDef {
            file: StringId::from_raw(buf.get_u32_le()),
            byte_code: Id::from_raw(buf.get_u32_le()),
            name: StringId::from_raw(buf.get_u32_le()),
            stage: decode_stage(buf.get_u8()),
            thread_group: (buf.get_u32_le(), buf.get_u32_le(), buf.get_u32_le()),
            in_layout: Id::from_raw(buf.get_u32_le()),
            out_layout: Id::from_raw(buf.get_u32_le()),
            res_layout: Id::from_raw(buf.get_u32_le()),
            cbuf_group: Id::from_raw(buf.get_u32_le()),
        });
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        reg.effect_passes.push(get_span(buf, Section::Registry)?);
    }

    need(buf, 8, Section::Registry)?;
    for _ in 0..buf.get_u64_le() {
        need(buf, 4, Section::Registry)?;
        let name = StringId::from_raw(buf.get_u32_le());
        let passes = get_u32_vec(buf, Section::Registry)?
            .into_iter()
            .map(Id::from_raw)
            .collect();
        reg.effects.push(EffectDef { name, passes });
    }

    reg.id_arena = get_u32_vec(buf, Section::Registry)?;
    need(buf, 8, Section::Registry)?;
    let byte_len = buf.get_u64_le() as usize;
    need(buf, byte_len, Section::Registry)?;
    reg.byte_arena = buf[..byte_len].to_vec();
    buf.advance(byte_len);

    Ok(reg)
}

fn decode_data_type(tag: u8) -> crate::registry::defs::DataType {
    use crate::registry::defs::DataType;
    match tag {
        0 => DataType::Float32,
        1 => DataType::Uint32,
        2 => DataType::Sint32,
        _ => DataType::Unknown,
    }
}

fn decode_stage(tag: u8) -> crate::registry::defs::Stage {
    use crate::registry::defs::Stage;
    match tag {
        0 => Stage::Vertex,
        1 => Stage::Hull,
        2 => Stage::Domain,
        3 => Stage::Geometry,
        4 => Stage::Pixel,
        _ => Stage::Compute,
    }
}

impl Registry {
    /// Flattens the registry into its serializable mirror (spec.md §6.3).
    pub fn export(&self) -> RegistryDef {
        let mut def = RegistryDef::default();

        for i in 0..self.len(ResourceTag::Constant) as u32 {
            def.constants.push(*self.constant(Id::new(ResourceTag::Constant, i)));
        }
        for i in 0..self.len(ResourceTag::ConstLayout) as u32 {
            let ids = self.const_layout(Id::new(ResourceTag::ConstLayout, i));
            def.const_layouts.push(push_group(&mut def.id_arena, ids));
        }
        for i in 0..self.len(ResourceTag::ConstantBuffer) as u32 {
            def.const_buffers
                .push(*self.const_buffer(Id::new(ResourceTag::ConstantBuffer, i)));
        }
        for i in 0..self.len(ResourceTag::IoElement) as u32 {
            def.io_elements
                .push(*self.io_element(Id::new(ResourceTag::IoElement, i)));
        }
        for i in 0..self.len(ResourceTag::Resource) as u32 {
            def.resources.push(*self.resource(Id::new(ResourceTag::Resource, i)));
        }
        for i in 0..self.len(ResourceTag::CBufGroup) as u32 {
            let ids = self.cbuf_group(Id::new(ResourceTag::CBufGroup, i));
            def.cbuf_groups.push(push_group(&mut def.id_arena, ids));
        }
        for i in 0..self.len(ResourceTag::IoLayout) as u32 {
            let ids = self.io_layout(Id::new(ResourceTag::IoLayout, i));
            def.io_layouts.push(push_group(&mut def.id_arena, ids));
        }
        for i in 0..self.len(ResourceTag::ResGroup) as u32 {
            let ids = self.res_group(Id::new(ResourceTag::ResGroup, i));
            def.res_groups.push(push_group(&mut def.id_arena, ids));
        }
        for i in 0..self.len(ResourceTag::ByteCode) as u32 {
            let bytes = self.shader_bin(Id::new(ResourceTag::ByteCode, i));
            let offset = def.byte_arena.len() as u32;
            def.byte_arena.extend_from_slice(bytes);
            def.bytecode_spans.push(Span {
                offset,
                len: bytes.len() as u32,
            });
        }
        for i in 0..self.len(ResourceTag::Shader) as u32 {
            def.shaders.push(*self.shader(Id::new(ResourceTag::Shader, i)));
        }
        for i in 0..self.len(ResourceTag::EffectPass) as u32 {
            let ids = self.effect_pass(Id::new(ResourceTag::EffectPass, i));
            def.effect_passes.push(push_group(&mut def.id_arena, ids));
        }
        for i in 0..self.len(ResourceTag::Effect) as u32 {
            def.effects.push(self.effect(Id::new(ResourceTag::Effect, i)).clone());
        }

        def
    }
}

fn push_group(arena: &mut Vec<u32>, ids: &[Id]) -> Span {
    let offset = arena.len() as u32;
    arena.extend(ids.iter().map(|id| id.raw()));
    Span {
        offset,
        len: ids.len() as u32,
    }
}

/// `(flag/mode name → bit or mode index)` and per-variant name→ID maps
/// built from an already-assembled [`ShaderLibDef`] (spec.md §4.H).
pub struct LibraryMap<'a> {
    lib: &'a ShaderLibDef,
    repo: usize,
    strings: StringIdMap,
    flag_index: HashMap<StringId, u32>,
    mode_index: HashMap<StringId, u32>,
}

impl<'a> LibraryMap<'a> {
    pub fn new(lib: &'a ShaderLibDef, repo: usize) -> Self {
        let strings = lib.string_ids.clone().into_map();
        let repo_def = &lib.repos[repo];

        let flag_index = repo_def
            .flag_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32))
            .collect();
        let mode_index = repo_def
            .mode_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32))
            .collect();

        Self {
            lib,
            repo,
            strings,
            flag_index,
            mode_index,
        }
    }

    fn repo_def(&self) -> &VariantRepoDef {
        &self.lib.repos[self.repo]
    }

    pub fn flag_variant_count(&self) -> u32 {
        1 << self.repo_def().flag_ids.len()
    }

    pub fn mode_count(&self) -> u32 {
        self.repo_def().mode_ids.len().max(1) as u32
    }

    pub fn variant_count(&self) -> u32 {
        self.flag_variant_count() * self.mode_count()
    }

    pub fn variant_id(&self, flag_id: u32, mode_id: u32) -> u32 {
        flag_id + mode_id * self.flag_variant_count()
    }

    pub fn flag_id(&self, vid: u32) -> u32 {
        vid % self.flag_variant_count()
    }

    pub fn mode_id(&self, vid: u32) -> u32 {
        vid / self.flag_variant_count()
    }

    pub fn try_get_shader_id(&self, name: &str, vid: u32) -> Option<Id> {
        let name_id = self.strings.try_get(name)?;
        self.repo_def().variants[vid as usize]
            .shaders
            .iter()
            .find(|(id, _)| self.shader_name_matches(*id, name_id))
            .map(|(id, _)| *id)
    }

    fn shader_name_matches(&self, id: Id, name_id: StringId) -> bool {
        self.lib.registry.shaders[id.index() as usize].name == name_id
    }

    pub fn try_get_effect_id(&self, name: &str, vid: u32) -> Option<Id> {
        let name_id = self.strings.try_get(name)?;
        self.repo_def().variants[vid as usize]
            .effects
            .iter()
            .find(|(id, _)| self.lib.registry.effects[id.index() as usize].name == name_id)
            .map(|(id, _)| *id)
    }

    /// `true` iff `name` is the repo's active mode at `vid` or one of its
    /// set flags.
    pub fn is_defined(&self, name: &str, vid: u32) -> bool {
        let Some(name_id) = self.strings.try_get(name) else {
            return false;
        };
        if let Some(&bit) = self.flag_index.get(&name_id) {
            return self.flag_id(vid) & (1 << bit) != 0;
        }
        if let Some(&mode) = self.mode_index.get(&name_id) {
            return self.mode_id(vid) == mode;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::defs::Stage;
    use crate::string_id::StringIdMap;

    fn sample_def() -> ShaderLibDef {
        let mut strings = StringIdMap::new();
        let mut reg = Registry::new();

        let name = strings.get_or_add("Main");
        let file = strings.get_or_add("a.hlsl");
        let byte_code = reg.get_or_add_shader_bin(&[1, 2, 3]);
        let shader = reg.get_or_add_shader(ShaderDef {
            file,
            byte_code,
            name,
            stage: Stage::Vertex,
            thread_group: (0, 0, 0),
            in_layout: Id::INVALID,
            out_layout: Id::INVALID,
            res_layout: Id::INVALID,
            cbuf_group: Id::INVALID,
        });

        ShaderLibDef {
            name: String::new(),
            platform: Platform {
                compiler_version: "1.0".into(),
                feature_level: "5_0".into(),
                target: Target::Dx11,
            },
            repos: vec![VariantRepoDef {
                src: RepoSrc {
                    name: "demo".into(),
                    path: "demo.hlsl".into(),
                },
                flag_ids: vec![],
                mode_ids: vec![strings.get_or_add("__DEFAULT_SHADER_MODE__")],
                variants: vec![VariantDef {
                    effects: vec![],
                    shaders: vec![(shader, 0)],
                }],
            }],
            registry: reg.export(),
            string_ids: strings.export(),
        }
    }

    #[test]
    fn serialize_then_deserialize_round_trips() {
        let lib = sample_def();
        let bytes = lib.encode();
        let restored = ShaderLibDef::decode(&bytes).unwrap();
        assert_eq!(lib, restored);
    }

    #[test]
    fn reserializing_is_byte_equal() {
        let lib = sample_def();
        let a = lib.encode();
        let restored = ShaderLibDef::decode(&a).unwrap();
        let b = restored.encode();
        assert_eq!(a, b);
    }

    #[test]
    fn map_resolves_default_variant_shader() {
        let lib = sample_def();
        let map = LibraryMap::new(&lib, 0);
        assert_eq!(map.variant_count(), 1);
        assert!(map.try_get_shader_id("Main", 0).is_some());
        assert!(map.try_get_shader_id("Ghost", 0).is_none());
    }
}
