//! Content-addressed registry (spec.md §4.B).
//!
//! The registry holds one vector per resource type plus two shared packed
//! arenas (`u32` IDs for groups, `u8` bytes for bytecode). Every
//! `get_or_add_*` call is a probe-or-insert: a value that already exists
//! returns its existing [`Id`]; a new value is appended and assigned the
//! next dense index for its tag.
//!
//! Rather than the heterogeneous hash-set of type-erased handles the
//! original implementation uses (one container, runtime hash/eq function
//! pointers per entry), each tag gets its own `HashMap<hash, candidate
//! indices>` bucket map. This keeps every dedup path monomorphic and
//! avoids v-table dispatch on the hot insert path, at the cost of one
//! small map per tag instead of one big one — the design notes call this
//! out as the preferred systems-language translation.

pub mod defs;
pub mod ids;

use std::hash::{BuildHasher, Hash, Hasher};

use hashbrown::HashMap;

use self::defs::{ConstBufDef, ConstDef, EffectDef, IoElementDef, ResourceDef, ShaderDef};
pub use self::ids::{Id, ResourceTag, Span};

type Bucket = HashMap<u64, Vec<u32>>;

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = hashbrown::hash_map::DefaultHashBuilder::default().build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Probes `bucket`/`vec` for `value`; on a miss, appends it and returns the
/// new tagged [`Id`]. Equivalent to spec.md §4.B's
/// speculative-append-then-rollback protocol, but the probe happens before
/// any write, so there is nothing to roll back.
fn get_or_add<T>(vec: &mut Vec<T>, bucket: &mut Bucket, tag: ResourceTag, value: T) -> Id
where
    T: Eq + Hash,
{
    let h = hash_of(&value);
    if let Some(candidates) = bucket.get(&h) {
        for &index in candidates {
            if vec[index as usize] == value {
                return Id::new(tag, index);
            }
        }
    }

    let index = vec.len() as u32;
    vec.push(value);
    bucket.entry(h).or_default().push(index);
    Id::new(tag, index)
}

/// Probes a slice of a shared packed arena for `ids` by content; on a miss,
/// appends `ids` to `arena` and records a new [`Span`].
fn get_or_add_span(
    arena: &mut Vec<u32>,
    spans: &mut Vec<Span>,
    bucket: &mut Bucket,
    tag: ResourceTag,
    ids: &[u32],
) -> Id {
    let h = hash_of(&ids);
    if let Some(candidates) = bucket.get(&h) {
        for &index in candidates {
            let span = spans[index as usize];
            if &arena[span.range()] == ids {
                return Id::new(tag, index);
            }
        }
    }

    let offset = arena.len() as u32;
    arena.extend_from_slice(ids);
    let span = Span {
        offset,
        len: ids.len() as u32,
    };
    let index = spans.len() as u32;
    spans.push(span);
    bucket.entry(h).or_default().push(index);
    Id::new(tag, index)
}

/// Default value for an optional [`ShaderDef`] field.
pub const INVALID_ID: Id = Id::INVALID;

#[derive(Debug, Default)]
struct Buckets {
    constants: Bucket,
    const_layouts: Bucket,
    const_buffers: Bucket,
    io_elements: Bucket,
    resources: Bucket,
    cbuf_groups: Bucket,
    io_layouts: Bucket,
    res_groups: Bucket,
    bytecode: Bucket,
    shaders: Bucket,
    effect_passes: Bucket,
    effects: Bucket,
}

/// The content-addressed store backing one [`crate::library::ShaderLibDef`].
#[derive(Debug, Default)]
pub struct Registry {
    constants: Vec<ConstDef>,
    const_layouts: Vec<Span>,
    const_buffers: Vec<ConstBufDef>,
    io_elements: Vec<IoElementDef>,
    resources: Vec<ResourceDef>,
    cbuf_groups: Vec<Span>,
    io_layouts: Vec<Span>,
    res_groups: Vec<Span>,
    bytecode: Vec<Span>,
    shaders: Vec<ShaderDef>,
    effect_passes: Vec<Span>,
    effects: Vec<EffectDef>,

    id_arena: Vec<u32>,
    byte_arena: Vec<u8>,

    buckets: Buckets,

    scratch_u32: Vec<Vec<u32>>,
    scratch_u8: Vec<Vec<u8>>,
    borrowed_u32: usize,
    borrowed_u8: usize,

    remap_cache: HashMap<(usize, usize), Id>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_add_constant(&mut self, value: ConstDef) -> Id {
        get_or_add(
            &mut self.constants,
            &mut self.buckets.constants,
            ResourceTag::Constant,
            value,
        )
    }

    pub fn get_or_add_const_layout(&mut self, const_ids: &[Id]) -> Id {
        get_or_add_span(
            &mut self.id_arena,
            &mut self.const_layouts,
            &mut self.buckets.const_layouts,
            ResourceTag::ConstLayout,
            &raw(const_ids),
        )
    }

    pub fn get_or_add_const_buffer(&mut self, value: ConstBufDef) -> Id {
        get_or_add(
            &mut self.const_buffers,
            &mut self.buckets.const_buffers,
            ResourceTag::ConstantBuffer,
            value,
        )
    }

    pub fn get_or_add_io_element(&mut self, value: IoElementDef) -> Id {
        get_or_add(
            &mut self.io_elements,
            &mut self.buckets.io_elements,
            ResourceTag::IoElement,
            value,
        )
    }

    pub fn get_or_add_io_layout(&mut self, io_element_ids: &[Id]) -> Id {
        get_or_add_span(
            &mut self.id_arena,
            &mut self.io_layouts,
            &mut self.buckets.io_layouts,
            ResourceTag::IoLayout,
            &raw(io_element_ids),
        )
    }

    pub fn get_or_add_resource(&mut self, value: ResourceDef) -> Id {
        get_or_add(
            &mut self.resources,
            &mut self.buckets.resources,
            ResourceTag::Resource,
            value,
        )
    }

    pub fn get_or_add_res_group(&mut self, resource_ids: &[Id]) -> Id {
        get_or_add_span(
            &mut self.id_arena,
            &mut self.res_groups,
            &mut self.buckets.res_groups,
            ResourceTag::ResGroup,
            &raw(resource_ids),
        )
    }

    pub fn get_or_add_cbuf_group(&mut self, cbuf_ids: &[Id]) -> Id {
        get_or_add_span(
            &mut self.id_arena,
            &mut self.cbuf_groups,
            &mut self.buckets.cbuf_groups,
            ResourceTag::CBufGroup,
            &raw(cbuf_ids),
        )
    }

    pub fn get_or_add_shader_bin(&mut self, bytes: &[u8]) -> Id {
        let h = hash_of(&bytes);
        if let Some(candidates) = self.buckets.bytecode.get(&h) {
            for &index in candidates {
                let span = self.bytecode[index as usize];
                if &self.byte_arena[span.range()] == bytes {
                    return Id::new(ResourceTag::ByteCode, index);
                }
            }
        }

        let offset = self.byte_arena.len() as u32;
        self.byte_arena.extend_from_slice(bytes);
        let span = Span {
            offset,
            len: bytes.len() as u32,
        };
        let index = self.bytecode.len() as u32;
        self.bytecode.push(span);
        self.buckets.bytecode.entry(h).or_default().push(index);
        Id::new(ResourceTag::ByteCode, index)
    }

    pub fn get_or_add_shader(&mut self, value: ShaderDef) -> Id {
        get_or_add(
            &mut self.shaders,
            &mut self.buckets.shaders,
            ResourceTag::Shader,
            value,
        )
    }

    pub fn get_or_add_effect_pass(&mut self, shader_ids: &[Id]) -> Id {
        get_or_add_span(
            &mut self.id_arena,
            &mut self.effect_passes,
            &mut self.buckets.effect_passes,
            ResourceTag::EffectPass,
            &raw(shader_ids),
        )
    }

    pub fn get_or_add_effect(&mut self, value: EffectDef) -> Id {
        get_or_add(
            &mut self.effects,
            &mut self.buckets.effects,
            ResourceTag::Effect,
            value,
        )
    }

    pub fn constant(&self, id: Id) -> &ConstDef {
        &self.constants[id.checked_index(ResourceTag::Constant) as usize]
    }

    pub fn const_layout(&self, id: Id) -> &[Id] {
        let span = self.const_layouts[id.checked_index(ResourceTag::ConstLayout) as usize];
        ids_view(&self.id_arena[span.range()])
    }

    pub fn const_buffer(&self, id: Id) -> &ConstBufDef {
        &self.const_buffers[id.checked_index(ResourceTag::ConstantBuffer) as usize]
    }

    pub fn io_element(&self, id: Id) -> &IoElementDef {
        &self.io_elements[id.checked_index(ResourceTag::IoElement) as usize]
    }

    pub fn io_layout(&self, id: Id) -> &[Id] {
        let span = self.io_layouts[id.checked_index(ResourceTag::IoLayout) as usize];
        ids_view(&self.id_arena[span.range()])
    }

    pub fn resource(&self, id: Id) -> &ResourceDef {
        &self.resources[id.checked_index(ResourceTag::Resource) as usize]
    }

    pub fn res_group(&self, id: Id) -> &[Id] {
        let span = self.res_groups[id.checked_index(ResourceTag::ResGroup) as usize];
        ids_view(&self.id_arena[span.range()])
    }

    pub fn cbuf_group(&self, id: Id) -> &[Id] {
        let span = self.cbuf_groups[id.checked_index(ResourceTag::CBufGroup) as usize];
        ids_view(&self.id_arena[span.range()])
    }

    pub fn shader_bin(&self, id: Id) -> &[u8] {
        let span = self.bytecode[id.checked_index(ResourceTag::ByteCode) as usize];
        &self.byte_arena[span.range()]
    }

    pub fn shader(&self, id: Id) -> &ShaderDef {
        &self.shaders[id.checked_index(ResourceTag::Shader) as usize]
    }

    pub fn effect_pass(&self, id: Id) -> &[Id] {
        let span = self.effect_passes[id.checked_index(ResourceTag::EffectPass) as usize];
        ids_view(&self.id_arena[span.range()])
    }

    pub fn effect(&self, id: Id) -> &EffectDef {
        &self.effects[id.checked_index(ResourceTag::Effect) as usize]
    }

    pub fn len(&self, tag: ResourceTag) -> usize {
        match tag {
            ResourceTag::Constant => self.constants.len(),
            ResourceTag::ConstLayout => self.const_layouts.len(),
            ResourceTag::ConstantBuffer => self.const_buffers.len(),
            ResourceTag::IoElement => self.io_elements.len(),
            ResourceTag::Resource => self.resources.len(),
            ResourceTag::CBufGroup => self.cbuf_groups.len(),
            ResourceTag::IoLayout => self.io_layouts.len(),
            ResourceTag::ResGroup => self.res_groups.len(),
            ResourceTag::ByteCode => self.bytecode.len(),
            ResourceTag::Shader => self.shaders.len(),
            ResourceTag::EffectPass => self.effect_passes.len(),
            ResourceTag::Effect => self.effects.len(),
        }
    }

    /// Borrows a scratch `Vec<u32>` from the pool, allocating one if the
    /// pool is empty. Must be returned via [`Self::return_u32_scratch`]
    /// before [`Self::clear`] (spec.md §5, §8.1.10).
    pub fn borrow_u32_scratch(&mut self) -> Vec<u32> {
        self.borrowed_u32 += 1;
        self.scratch_u32.pop().unwrap_or_default()
    }

    pub fn return_u32_scratch(&mut self, mut buf: Vec<u32>) {
        buf.clear();
        self.scratch_u32.push(buf);
        self.borrowed_u32 -= 1;
    }

    pub fn borrow_u8_scratch(&mut self) -> Vec<u8> {
        self.borrowed_u8 += 1;
        self.scratch_u8.pop().unwrap_or_default()
    }

    pub fn return_u8_scratch(&mut self, mut buf: Vec<u8>) {
        buf.clear();
        self.scratch_u8.push(buf);
        self.borrowed_u8 -= 1;
    }

    /// Deep-remaps a shader from a foreign registry into this one: every
    /// referenced string is re-interned locally (by the caller, via
    /// `name_map`), every layout/group is re-added through this registry's
    /// own `get_or_add_*_group`, and the bytecode is re-added through
    /// `get_or_add_shader_bin`. Results are cached per
    /// `(foreign_registry_ptr, foreign_shader_index)` so re-adding the same
    /// foreign shader twice is O(1) (spec.md §8.1.6).
    pub fn get_or_add_shader_from(
        &mut self,
        foreign: &Registry,
        foreign_id: Id,
        mut remap_string: impl FnMut(crate::string_id::StringId) -> crate::string_id::StringId,
    ) -> Id {
        let cache_key = (foreign as *const Registry as usize, foreign_id.raw() as usize);
        if let Some(&cached) = self.remap_cache.get(&cache_key) {
            return cached;
        }

        let foreign_shader = *foreign.shader(foreign_id);

        let byte_code = if foreign_shader.byte_code.is_valid() {
            self.get_or_add_shader_bin(foreign.shader_bin(foreign_shader.byte_code))
        } else {
            Id::INVALID
        };

        let in_layout = self.remap_io_layout(foreign, foreign_shader.in_layout, &mut remap_string);
        let out_layout = self.remap_io_layout(foreign, foreign_shader.out_layout, &mut remap_string);
        let res_layout = self.remap_res_group(foreign, foreign_shader.res_layout, &mut remap_string);
        let cbuf_group = self.remap_cbuf_group(foreign, foreign_shader.cbuf_group, &mut remap_string);

        let local = ShaderDef {
            file: remap_string(foreign_shader.file),
            byte_code,
            name: remap_string(foreign_shader.name),
            stage: foreign_shader.stage,
            thread_group: foreign_shader.thread_group,
            in_layout,
            out_layout,
            res_layout,
            cbuf_group,
        };

        let id = self.get_or_add_shader(local);
        self.remap_cache.insert(cache_key, id);
        id
    }

    fn remap_io_layout(
        &mut self,
        foreign: &Registry,
        foreign_id: Id,
        remap_string: &mut impl FnMut(crate::string_id::StringId) -> crate::string_id::StringId,
    ) -> Id {
        if !foreign_id.is_valid() {
            return Id::INVALID;
        }
        let elements: Vec<Id> = foreign
            .io_layout(foreign_id)
            .iter()
            .map(|&el_id| {
                let el = *foreign.io_element(el_id);
                self.get_or_add_io_element(IoElementDef {
                    semantic: remap_string(el.semantic),
                    ..el
                })
            })
            .collect();
        self.get_or_add_io_layout(&elements)
    }

    fn remap_res_group(
        &mut self,
        foreign: &Registry,
        foreign_id: Id,
        remap_string: &mut impl FnMut(crate::string_id::StringId) -> crate::string_id::StringId,
    ) -> Id {
        if !foreign_id.is_valid() {
            return Id::INVALID;
        }
        let resources: Vec<Id> = foreign
            .res_group(foreign_id)
            .iter()
            .map(|&res_id| {
                let res = *foreign.resource(res_id);
                self.get_or_add_resource(ResourceDef {
                    name: remap_string(res.name),
                    ..res
                })
            })
            .collect();
        self.get_or_add_res_group(&resources)
    }

    fn remap_cbuf_group(
        &mut self,
        foreign: &Registry,
        foreign_id: Id,
        remap_string: &mut impl FnMut(crate::string_id::StringId) -> crate::string_id::StringId,
    ) -> Id {
        if !foreign_id.is_valid() {
            return Id::INVALID;
        }
        let cbufs: Vec<Id> = foreign
            .cbuf_group(foreign_id)
            .iter()
            .map(|&cbuf_id| {
                let cbuf = *foreign.const_buffer(cbuf_id);
                let fields: Vec<Id> = foreign
                    .const_layout(cbuf.layout)
                    .iter()
                    .map(|&const_id| {
                        let c = *foreign.constant(const_id);
                        self.get_or_add_constant(ConstDef {
                            name: remap_string(c.name),
                            ..c
                        })
                    })
                    .collect();
                let layout = self.get_or_add_const_layout(&fields);
                self.get_or_add_const_buffer(ConstBufDef {
                    name: remap_string(cbuf.name),
                    size_bytes: cbuf.size_bytes,
                    layout,
                })
            })
            .collect();
        self.get_or_add_cbuf_group(&cbufs)
    }

    /// Clears every vector and arena, invalidating all previously issued
    /// IDs.
    ///
    /// # Panics
    ///
    /// Panics (debug-checked) if any scratch buffer has not been returned —
    /// see spec.md §5 "Shared-resource policy".
    pub fn clear(&mut self) {
        debug_assert_eq!(self.borrowed_u32, 0, "u32 scratch buffer leaked across clear()");
        debug_assert_eq!(self.borrowed_u8, 0, "u8 scratch buffer leaked across clear()");
        *self = Registry {
            scratch_u32: std::mem::take(&mut self.scratch_u32),
            scratch_u8: std::mem::take(&mut self.scratch_u8),
            ..Registry::default()
        };
    }

    /// `true` once every borrowed scratch buffer has been returned —
    /// checked before [`crate::builder::LibraryBuilder::get_definition`]
    /// (spec.md §8.1.10).
    pub fn scratch_fully_returned(&self) -> bool {
        self.borrowed_u32 == 0 && self.borrowed_u8 == 0
    }
}

fn raw(ids: &[Id]) -> Vec<u32> {
    ids.iter().map(|id| id.raw()).collect()
}

fn ids_view(raw: &[u32]) -> &[Id] {
    // SAFETY: `Id` is `#[repr(transparent)]` over `u32`, so it has `u32`'s
    // layout exactly, and every `u32` bit pattern is a valid `Id`.
    unsafe { std::slice::from_raw_parts(raw.as_ptr().cast::<Id>(), raw.len()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_id::StringIdMap;

    fn const_def(strings: &mut StringIdMap, name: &str, offset: u32, size: u32) -> ConstDef {
        ConstDef {
            name: strings.get_or_add(name),
            offset,
            size,
        }
    }

    #[test]
    fn dedup_is_injective() {
        let mut strings = StringIdMap::new();
        let mut reg = Registry::new();

        let a = reg.get_or_add_constant(const_def(&mut strings, "Color", 0, 16));
        let b = reg.get_or_add_constant(const_def(&mut strings, "Color", 0, 16));
        let c = reg.get_or_add_constant(const_def(&mut strings, "Color", 16, 16));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.len(ResourceTag::Constant), 2);
    }

    #[test]
    fn tag_and_index_are_consistent_with_vector_length() {
        let mut strings = StringIdMap::new();
        let mut reg = Registry::new();
        let id = reg.get_or_add_constant(const_def(&mut strings, "X", 0, 4));
        assert_eq!(id.tag(), Some(ResourceTag::Constant));
        assert!((id.index() as usize) < reg.len(ResourceTag::Constant));
    }

    #[test]
    fn group_dedup_shares_identical_sequences() {
        let mut strings = StringIdMap::new();
        let mut reg = Registry::new();
        let c0 = reg.get_or_add_constant(const_def(&mut strings, "A", 0, 4));
        let c1 = reg.get_or_add_constant(const_def(&mut strings, "B", 4, 4));

        let layout_a = reg.get_or_add_const_layout(&[c0, c1]);
        let layout_b = reg.get_or_add_const_layout(&[c0, c1]);
        let layout_c = reg.get_or_add_const_layout(&[c1, c0]);

        assert_eq!(layout_a, layout_b);
        assert_ne!(layout_a, layout_c);
        assert_eq!(reg.len(ResourceTag::ConstLayout), 2);
    }

    #[test]
    fn bytecode_dedup_shares_identical_blobs() {
        let mut reg = Registry::new();
        let a = reg.get_or_add_shader_bin(&[1, 2, 3]);
        let b = reg.get_or_add_shader_bin(&[1, 2, 3]);
        let c = reg.get_or_add_shader_bin(&[1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.shader_bin(a), &[1, 2, 3]);
    }

    #[test]
    fn remap_cache_avoids_rewalking_dependencies() {
        let mut foreign_strings = StringIdMap::new();
        let mut foreign = Registry::new();
        let name = foreign_strings.get_or_add("Main");
        let file = foreign_strings.get_or_add("a.hlsl");
        let byte_code = foreign.get_or_add_shader_bin(&[9, 9, 9]);
        let foreign_shader = foreign.get_or_add_shader(ShaderDef {
            file,
            byte_code,
            name,
            stage: defs::Stage::Vertex,
            thread_group: (0, 0, 0),
            in_layout: Id::INVALID,
            out_layout: Id::INVALID,
            res_layout: Id::INVALID,
            cbuf_group: Id::INVALID,
        });

        let mut local_strings = StringIdMap::new();
        let mut local = Registry::new();
        let mut remap = |foreign_id: crate::string_id::StringId| {
            local_strings.get_or_add(foreign_strings.get(foreign_id))
        };

        let first = local.get_or_add_shader_from(&foreign, foreign_shader, &mut remap);
        let second = local.get_or_add_shader_from(&foreign, foreign_shader, &mut remap);
        assert_eq!(first, second);
        assert_eq!(local.len(ResourceTag::Shader), 1);
    }

    #[test]
    fn scratch_discipline_is_tracked() {
        let mut reg = Registry::new();
        assert!(reg.scratch_fully_returned());
        let buf = reg.borrow_u32_scratch();
        assert!(!reg.scratch_fully_returned());
        reg.return_u32_scratch(buf);
        assert!(reg.scratch_fully_returned());
    }

    #[test]
    #[should_panic]
    fn clear_panics_if_scratch_not_returned() {
        let mut reg = Registry::new();
        let _leaked = reg.borrow_u32_scratch();
        reg.clear();
    }
}
