//! Library builder (spec.md §4.G): drives preprocessor → block analyzer →
//! symbol table → generator per repo per variant, invokes the external
//! compiler, and folds every result into one shared [`Registry`].

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::block::{self, BlockTree};
use crate::error::{Error, Result};
use crate::generator;
use crate::library::{RepoSrc, ShaderLibDef, VariantDef, VariantRepoDef};
use crate::preprocessor::{Entrypoint, Preprocessor};
use crate::registry::defs::{
    ConstBufDef, ConstDef, EffectDef, IoElementDef, ResourceDef, ResourceTypeFlags, ShaderDef,
    Stage as RegStage,
};
use crate::registry::ids::Id;
use crate::registry::Registry;
use crate::string_id::StringIdMap;
use crate::symbol::{self, SymbolKind, SymbolTable};
use shader_effects_compiler::{
    CompileRequest, ResourceKind, ScalarType, ShaderCompiler, ShaderReflection, Target,
};

/// One `add_repo` call's raw input, held until [`LibraryBuilder::get_definition`]
/// drives the pipeline.
#[derive(Debug)]
struct PendingRepo {
    name: String,
    path: String,
    source: String,
}

/// Drives spec.md §4.G's per-repo pipeline and owns the shared [`Registry`].
#[derive(Debug)]
pub struct LibraryBuilder {
    repos: Vec<PendingRepo>,
    target: Target,
    feature_level: String,
    debug: bool,
    registry: Mutex<Registry>,
    strings: Mutex<StringIdMap>,
}

impl Default for LibraryBuilder {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            target: Target::Dx11,
            feature_level: "5_0".to_string(),
            debug: false,
            registry: Mutex::new(Registry::new()),
            strings: Mutex::new(StringIdMap::new()),
        }
    }
}

impl LibraryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&mut self, name: impl Into<String>, path: impl Into<String>, source_text: impl Into<String>) {
        self.repos.push(PendingRepo {
            name: name.into(),
            path: path.into(),
            source: source_text.into(),
        });
    }

    pub fn set_target(&mut self, target: Target) {
        self.target = target;
    }

    pub fn set_feature_level(&mut self, feature_level: impl Into<String>) {
        self.feature_level = feature_level.into();
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn clear(&mut self) {
        self.repos.clear();
        *self.registry.lock() = Registry::new();
        *self.strings.lock() = StringIdMap::new();
    }

    /// Runs the full pipeline (spec.md §4.G) and exports the library
    /// definition. One [`rayon`] task per repo builds shaders/effects into a
    /// repo-local [`Registry`]; each repo's results are then folded into the
    /// shared registry one at a time under `self.registry`'s lock, via
    /// `Registry::get_or_add_shader_from` (spec.md §5).
    pub fn get_definition(&mut self, compiler: &dyn ShaderCompiler) -> Result<ShaderLibDef> {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

        let repo_results: Vec<Result<RepoBuild>> = self
            .repos
            .par_iter()
            .map(|repo| build_repo(repo, self.target, &self.feature_level, self.debug, compiler))
            .collect();

        let mut repo_defs = Vec::with_capacity(repo_results.len());
        for result in repo_results {
            let built = result?;
            let repo_def = fold_repo(&self.registry, &self.strings, built);
            repo_defs.push(repo_def);
        }

        let registry = self.registry.lock();
        if !registry.scratch_fully_returned() {
            return Err(Error::scratch_not_returned("get_definition"));
        }

        Ok(ShaderLibDef {
            name: String::new(),
            platform: crate::library::Platform {
                compiler_version: env!("CARGO_PKG_VERSION").to_string(),
                feature_level: self.feature_level.clone(),
                target: self.target,
            },
            repos: repo_defs,
            registry: registry.export(),
            string_ids: self.strings.lock().export(),
        })
    }
}

/// One repo's entrypoint- and effect-local build output, expressed in a
/// repo-private [`Registry`] and [`StringIdMap`] so repos can be built in
/// parallel without touching shared state (spec.md §5).
struct RepoBuild {
    name: String,
    path: String,
    flags: Vec<String>,
    modes: Vec<String>,
    registry: Registry,
    strings: StringIdMap,
    variants: Vec<LocalVariant>,
}

#[derive(Default)]
struct LocalVariant {
    shaders: Vec<Id>,
    effects: Vec<Id>,
}

fn build_repo(
    repo: &PendingRepo,
    target: Target,
    feature_level: &str,
    debug: bool,
    compiler: &dyn ShaderCompiler,
) -> Result<RepoBuild> {
    info!(repo = repo.name.as_str(), "preprocessing repo");

    let mut pp = Preprocessor::new(repo.path.clone(), repo.source.clone());
    pp.set_debug(debug);
    pp.discover()?;

    let flags = pp.flags().to_vec();
    let modes = pp.modes().to_vec();
    let variant_count = pp.variant_count();
    debug!(repo = repo.name.as_str(), variant_count, "discovered variants");

    let mut registry = Registry::new();
    let mut strings = StringIdMap::new();
    for name in flags.iter().chain(modes.iter()) {
        strings.get_or_add(name);
    }
    let mut variants = Vec::with_capacity(variant_count as usize);

    for vid in 0..variant_count {
        let variant = pp.variant(vid)?;
        let local = build_variant(
            repo,
            vid,
            &variant.text,
            &variant.entrypoints,
            target,
            feature_level,
            debug,
            compiler,
            &mut registry,
            &mut strings,
        )?;
        variants.push(local);
    }

    Ok(RepoBuild {
        name: repo.name.clone(),
        path: repo.path.clone(),
        flags,
        modes,
        registry,
        strings,
        variants,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_variant(
    repo: &PendingRepo,
    vid: u32,
    text: &str,
    entrypoints: &[Entrypoint],
    target: Target,
    feature_level: &str,
    debug: bool,
    compiler: &dyn ShaderCompiler,
    registry: &mut Registry,
    strings: &mut StringIdMap,
) -> Result<LocalVariant> {
    let tree = block::analyze(text)?;
    let table = symbol::build(&tree, text)?;

    let mut shader_ids: HashMap<String, Id> = HashMap::new();
    let mut local = LocalVariant::default();

    for entry in entrypoints {
        let id = resolve_shader(
            repo, vid, text, &tree, &table, entry, target, feature_level, debug, compiler, registry, strings,
        )?;
        shader_ids.insert(entry.name.clone(), id);
        local.shaders.push(id);
    }

    for pass in &table.passes {
        for name in &pass.shader_names {
            if !shader_ids.contains_key(name) {
                let stage = stage_of(&table, name);
                let entry = Entrypoint {
                    name: name.clone(),
                    stage,
                };
                let id = resolve_shader(
                    repo, vid, text, &tree, &table, &entry, target, feature_level, debug, compiler, registry,
                    strings,
                )?;
                shader_ids.insert(name.clone(), id);
                local.shaders.push(id);
            }
        }
    }

    for scope in &tree.blocks {
        if scope.kind != block::ScopeKind::ReplicaBlock {
            continue;
        }
        let is_top_level_effect = scope
            .parent
            .map(|p| tree.blocks[p].kind != block::ScopeKind::ReplicaBlock)
            .unwrap_or(false);
        if !is_top_level_effect {
            continue;
        }
        let Some((effect_name, _)) = &scope.ident else {
            continue;
        };

        let mut pass_ids = Vec::new();
        for &child_id in &scope.children {
            let Some(pass) = table.passes.iter().find(|p| p.block_id == child_id) else {
                continue;
            };
            let shaders: Vec<Id> = pass
                .shader_names
                .iter()
                .map(|name| shader_ids[name])
                .collect();
            pass_ids.push(registry.get_or_add_effect_pass(&shaders));
        }

        let name_id = strings.get_or_add(effect_name);
        let effect_id = registry.get_or_add_effect(EffectDef {
            name: name_id,
            passes: pass_ids,
        });
        local.effects.push(effect_id);
    }

    Ok(local)
}

fn stage_of(table: &SymbolTable, name: &str) -> RegStage {
    match table.find_function(name).map(|s| s.kind) {
        Some(SymbolKind::ShaderDef(stage)) => stage,
        _ => RegStage::Vertex,
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_shader(
    repo: &PendingRepo,
    vid: u32,
    text: &str,
    tree: &BlockTree,
    table: &SymbolTable,
    entry: &Entrypoint,
    target: Target,
    feature_level: &str,
    debug: bool,
    compiler: &dyn ShaderCompiler,
    registry: &mut Registry,
    strings: &mut StringIdMap,
) -> Result<Id> {
    let src = generator::generate(text, tree, table, &entry.name)?;

    let request = CompileRequest {
        src_path: &repo.path,
        src_text: &src,
        feature_level,
        stage: entry.stage.to_compiler_stage(),
        entry_name: &entry.name,
        debug,
    };

    debug!(repo = repo.name.as_str(), vid, entry = entry.name.as_str(), "compiling entrypoint");
    let output = compiler.compile(&request).map_err(|source| {
        warn!(repo = repo.name.as_str(), entry = entry.name.as_str(), "compile failed");
        Error::from(source)
    })?;

    let byte_code = registry.get_or_add_shader_bin(&output.bytecode);
    let file_id = strings.get_or_add(&repo.path);
    let name_id = strings.get_or_add(&entry.name);
    let shader_def = reflect_to_shader_def(
        registry,
        strings,
        &output.reflection,
        entry,
        file_id,
        name_id,
        byte_code,
        target,
    );
    let id = registry.get_or_add_shader(shader_def);
    info!(repo = repo.name.as_str(), vid, entry = entry.name.as_str(), "registered shader");
    Ok(id)
}

/// Maps a [`ShaderReflection`] to a [`ShaderDef`] (spec.md §4.G).
#[allow(clippy::too_many_arguments)]
fn reflect_to_shader_def(
    registry: &mut Registry,
    strings: &mut StringIdMap,
    reflection: &ShaderReflection,
    entry: &Entrypoint,
    file: crate::string_id::StringId,
    name: crate::string_id::StringId,
    byte_code: Id,
    target: Target,
) -> ShaderDef {
    let _ = target;

    let in_layout = build_io_layout(registry, strings, &reflection.inputs);
    let out_layout = build_io_layout(registry, strings, &reflection.outputs);
    let cbuf_group = build_cbuf_group(registry, strings, &reflection.cbuffers);
    let res_layout = build_res_group(registry, strings, &reflection.resources);

    ShaderDef {
        file,
        byte_code,
        name,
        stage: entry.stage,
        thread_group: reflection.thread_group_size.unwrap_or((0, 0, 0)),
        in_layout,
        out_layout,
        res_layout,
        cbuf_group,
    }
}

fn build_io_layout(
    registry: &mut Registry,
    strings: &mut StringIdMap,
    params: &[shader_effects_compiler::IoParameter],
) -> Id {
    if params.is_empty() {
        return Id::INVALID;
    }
    let ids: Vec<Id> = params
        .iter()
        .map(|p| {
            registry.get_or_add_io_element(IoElementDef::new(
                strings.get_or_add(&p.semantic),
                p.semantic_index,
                to_data_type(p.data_type),
                p.component_count,
            ))
        })
        .collect();
    registry.get_or_add_io_layout(&ids)
}

fn build_cbuf_group(
    registry: &mut Registry,
    strings: &mut StringIdMap,
    cbuffers: &[shader_effects_compiler::ConstantBuffer],
) -> Id {
    if cbuffers.is_empty() {
        return Id::INVALID;
    }
    let ids: Vec<Id> = cbuffers
        .iter()
        .map(|cbuf| {
            let fields: Vec<Id> = cbuf
                .variables
                .iter()
                .map(|v| {
                    registry.get_or_add_constant(ConstDef {
                        name: strings.get_or_add(&v.name),
                        offset: v.offset,
                        size: v.size,
                    })
                })
                .collect();
            let layout = registry.get_or_add_const_layout(&fields);
            registry.get_or_add_const_buffer(ConstBufDef {
                name: strings.get_or_add(&cbuf.name),
                size_bytes: cbuf.size_bytes,
                layout,
            })
        })
        .collect();
    registry.get_or_add_cbuf_group(&ids)
}

fn build_res_group(
    registry: &mut Registry,
    strings: &mut StringIdMap,
    resources: &[shader_effects_compiler::BoundResource],
) -> Id {
    if resources.is_empty() {
        return Id::INVALID;
    }
    let ids: Vec<Id> = resources
        .iter()
        .map(|r| {
            registry.get_or_add_resource(ResourceDef {
                name: strings.get_or_add(&r.name),
                type_flags: to_type_flags(r.kind),
                slot: r.slot,
            })
        })
        .collect();
    registry.get_or_add_res_group(&ids)
}

fn to_data_type(scalar: ScalarType) -> crate::registry::defs::DataType {
    use crate::registry::defs::DataType;
    match scalar {
        ScalarType::Float32 => DataType::Float32,
        ScalarType::Uint32 => DataType::Uint32,
        ScalarType::Sint32 => DataType::Sint32,
        ScalarType::Unknown => DataType::Unknown,
    }
}

fn to_type_flags(kind: ResourceKind) -> ResourceTypeFlags {
    ResourceTypeFlags::from_bits_truncate(kind.bits())
}

/// Folds one repo's locally built registry into the shared registry under
/// `shared`'s lock (spec.md §5 "folding results into B"), producing the
/// repo's [`VariantRepoDef`].
fn fold_repo(shared: &Mutex<Registry>, shared_strings: &Mutex<StringIdMap>, built: RepoBuild) -> VariantRepoDef {
    let mut shared_reg = shared.lock();
    let mut shared_strings = shared_strings.lock();

    let mut remap_string = |local_id: crate::string_id::StringId| {
        shared_strings.get_or_add(built.strings.get(local_id))
    };

    let flag_ids = built.flags.iter().map(|f| remap_string(built.strings.try_get(f).unwrap())).collect();
    let mode_ids = built.modes.iter().map(|m| remap_string(built.strings.try_get(m).unwrap())).collect();

    let variants = built
        .variants
        .iter()
        .map(|local| {
            let shaders: Vec<(Id, u32)> = local
                .shaders
                .iter()
                .map(|&foreign_id| {
                    let id = shared_reg.get_or_add_shader_from(&built.registry, foreign_id, &mut remap_string);
                    (id, 0)
                })
                .collect();
            let effects: Vec<(Id, u32)> = local
                .effects
                .iter()
                .map(|&foreign_effect_id| {
                    let id = remap_effect(&mut shared_reg, &built.registry, foreign_effect_id, &mut remap_string);
                    (id, 0)
                })
                .collect();
            VariantDef { effects, shaders }
        })
        .collect();

    VariantRepoDef {
        src: RepoSrc {
            name: built.name,
            path: built.path,
        },
        flag_ids,
        mode_ids,
        variants,
    }
}

/// Deep-remaps an `EffectDef` and its pass groups from `foreign` into
/// `shared`, reusing `shared.get_or_add_shader_from` for every shader ID it
/// contains (spec.md §4.G "remap pass IDs to EffectPass groups").
fn remap_effect(
    shared: &mut Registry,
    foreign: &Registry,
    foreign_effect_id: Id,
    remap_string: &mut impl FnMut(crate::string_id::StringId) -> crate::string_id::StringId,
) -> Id {
    let foreign_effect = foreign.effect(foreign_effect_id).clone();

    let pass_ids: Vec<Id> = foreign_effect
        .passes
        .iter()
        .map(|&pass_id| {
            let shader_ids: Vec<Id> = foreign
                .effect_pass(pass_id)
                .iter()
                .map(|&shader_id| shared.get_or_add_shader_from(foreign, shader_id, &mut *remap_string))
                .collect();
            shared.get_or_add_effect_pass(&shader_ids)
        })
        .collect();

    shared.get_or_add_effect(EffectDef {
        name: remap_string(foreign_effect.name),
        passes: pass_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_effects_compiler::TestCompiler;

    #[test]
    fn empty_pragma_source_registers_one_shader_no_effects() {
        let mut builder = LibraryBuilder::new();
        builder.add_repo(
            "demo",
            "demo.hlsl",
            "#pragma vertex(Main)\nfloat4 Main():SV_Position { return 0; }",
        );
        let compiler = TestCompiler::new();
        let lib = builder.get_definition(&compiler).unwrap();

        assert_eq!(lib.repos.len(), 1);
        assert!(lib.repos[0].flag_ids.is_empty());
        assert_eq!(lib.repos[0].variants.len(), 1);
        assert_eq!(lib.repos[0].variants[0].shaders.len(), 1);
        assert!(lib.repos[0].variants[0].effects.is_empty());
    }

    #[test]
    fn two_flags_produce_four_distinct_shaders() {
        let src = "#pragma flags(A, B)\n#pragma vertex(Main)\nfloat4 Main():SV_Position {\n#ifdef A\nfloat x = 1;\n#endif\n#ifdef B\nfloat y = 2;\n#endif\nreturn 0;\n}";
        let mut builder = LibraryBuilder::new();
        builder.add_repo("demo", "demo.hlsl", src);
        let compiler = TestCompiler::new();
        let lib = builder.get_definition(&compiler).unwrap();

        assert_eq!(lib.repos[0].variants.len(), 4);
        let shader_ids: std::collections::HashSet<_> = lib.repos[0]
            .variants
            .iter()
            .map(|v| v.shaders[0].0)
            .collect();
        assert_eq!(shader_ids.len(), 4);
    }

    #[test]
    fn effect_with_two_passes_dedups_shared_shader() {
        let src = "#pragma vertex(V0)\n#pragma pixel(P0)\n#pragma pixel(P1)\nfloat4 V0():SV_Position { return 0; }\nfloat4 P0():SV_Target { return 0; }\nfloat4 P1():SV_Target { return 1; }\neffect E { pass Pass0 { V0, P0 } pass Pass1 { V0, P1 } }";
        let mut builder = LibraryBuilder::new();
        builder.add_repo("demo", "demo.hlsl", src);
        let compiler = TestCompiler::new();
        let lib = builder.get_definition(&compiler).unwrap();

        assert_eq!(lib.repos[0].variants[0].effects.len(), 1);
        let effect_id = lib.repos[0].variants[0].effects[0].0;
        let effect = lib.registry.effects[effect_id.index() as usize].clone();
        assert_eq!(effect.passes.len(), 2);

        let pass0 = &lib.registry.effect_passes[effect.passes[0].index() as usize];
        let pass1 = &lib.registry.effect_passes[effect.passes[1].index() as usize];
        let v0_in_pass0 = lib.registry.id_arena[pass0.offset as usize];
        let v0_in_pass1 = lib.registry.id_arena[pass1.offset as usize];
        assert_eq!(v0_in_pass0, v0_in_pass1);
    }

    #[test]
    fn cross_repo_dedup_shares_shader_ids() {
        let src = "#pragma vertex(Main)\nfloat4 Main():SV_Position { return 0; }";
        let mut builder = LibraryBuilder::new();
        builder.add_repo("a", "a.hlsl", src);
        builder.add_repo("b", "a.hlsl", src);
        let compiler = TestCompiler::new();
        let lib = builder.get_definition(&compiler).unwrap();

        assert_eq!(lib.repos.len(), 2);
        let a = lib.repos[0].variants[0].shaders[0].0;
        let b = lib.repos[1].variants[0].shaders[0].0;
        assert_eq!(a, b);
        assert_eq!(lib.registry.shaders.len(), 1);
    }
}
