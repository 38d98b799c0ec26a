//! End-to-end scenarios against the full builder → registry → library-map
//! pipeline (spec.md §8.2), driven through [`TestCompiler`] rather than a
//! real platform backend.

use shader_effects::builder::LibraryBuilder;
use shader_effects::library::LibraryMap;
use shader_effects_compiler::{
    BoundResource, ConstVariable, ConstantBuffer, ResourceKind, ShaderReflection, Stage, Target,
    TestCompiler,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

#[test]
fn empty_pragma_source_registers_one_shader_no_effects() {
    init_tracing();
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
    assert_eq!(lib.repos[0].mode_ids.len(), 1);

    let map = LibraryMap::new(&lib, 0);
    assert_eq!(map.variant_count(), 1);
    assert!(map.try_get_shader_id("Main", 0).is_some());
    assert!(lib.repos[0].variants[0].effects.is_empty());
}

#[test]
fn two_flags_one_shader_produce_four_distinct_variants() {
    let src = "#pragma flags(A, B)\n#pragma vertex(Main)\nfloat4 Main():SV_Position {\n#ifdef A\nfloat x = 1;\n#endif\n#ifdef B\nfloat y = 2;\n#endif\nreturn 0;\n}";
    let mut builder = LibraryBuilder::new();
    builder.add_repo("demo", "demo.hlsl", src);
    let compiler = TestCompiler::new();
    let lib = builder.get_definition(&compiler).unwrap();

    assert_eq!(lib.repos[0].variants.len(), 4);
    assert_eq!(lib.registry.bytecode_spans.len(), 4);

    let shader_ids: std::collections::HashSet<_> = lib.repos[0]
        .variants
        .iter()
        .map(|v| v.shaders[0].0)
        .collect();
    assert_eq!(shader_ids.len(), 4);

    for &(id, _) in lib.repos[0].variants.iter().map(|v| &v.shaders[0]) {
        let def = &lib.registry.shaders[id.index() as usize];
        assert_eq!(def.stage, shader_effects::registry::defs::Stage::Vertex);
    }
}

#[test]
fn shared_cbuffer_across_two_stages_dedups() {
    let src = "#pragma vertex(V)\n#pragma pixel(P)\ncbuffer Globals { float4 Color; }\nfloat4 V():SV_Position { return Color; }\nfloat4 P():SV_Target { return Color; }";

    let compiler = TestCompiler::new();
    let cbuffer = ConstantBuffer {
        name: "Globals".to_string(),
        size_bytes: 16,
        variables: vec![ConstVariable {
            name: "Color".to_string(),
            offset: 0,
            size: 16,
        }],
    };
    compiler.set_reflection(
        Stage::Vertex,
        "V",
        ShaderReflection {
            cbuffers: vec![cbuffer.clone()],
            ..Default::default()
        },
    );
    compiler.set_reflection(
        Stage::Pixel,
        "P",
        ShaderReflection {
            cbuffers: vec![cbuffer],
            ..Default::default()
        },
    );

    let mut builder = LibraryBuilder::new();
    builder.add_repo("demo", "demo.hlsl", src);
    let lib = builder.get_definition(&compiler).unwrap();

    assert_eq!(lib.registry.const_buffers.len(), 1);
    assert_eq!(lib.registry.constants.len(), 1);

    let shaders = &lib.repos[0].variants[0].shaders;
    assert_eq!(shaders.len(), 2);
    let cbuf_group_a = lib.registry.shaders[shaders[0].0.index() as usize].cbuf_group;
    let cbuf_group_b = lib.registry.shaders[shaders[1].0.index() as usize].cbuf_group;
    assert_eq!(cbuf_group_a, cbuf_group_b);
}

#[test]
fn generated_source_includes_cbuffer_referenced_by_unqualified_field() {
    let src = "#pragma vertex(V)\n#pragma pixel(P)\ncbuffer Globals { float4 Color; }\nfloat4 V():SV_Position { return Color; }\nfloat4 P():SV_Target { return Color; }";

    let compiler = TestCompiler::new();
    let mut builder = LibraryBuilder::new();
    builder.add_repo("demo", "demo.hlsl", src);
    builder.get_definition(&compiler).unwrap();

    let vertex_source = compiler.compiled_source(Stage::Vertex, "V").unwrap();
    assert!(vertex_source.contains("cbuffer Globals"));
    assert!(vertex_source.contains("Color"));

    let pixel_source = compiler.compiled_source(Stage::Pixel, "P").unwrap();
    assert!(pixel_source.contains("cbuffer Globals"));
}

#[test]
fn effect_with_two_passes_dedups_shared_vertex_shader() {
    let src = "#pragma vertex(V0)\n#pragma pixel(P0)\n#pragma pixel(P1)\nfloat4 V0():SV_Position { return 0; }\nfloat4 P0():SV_Target { return 0; }\nfloat4 P1():SV_Target { return 1; }\neffect E { pass Pass0 { V0, P0 } pass Pass1 { V0, P1 } }";

    let mut builder = LibraryBuilder::new();
    builder.add_repo("demo", "demo.hlsl", src);
    let compiler = TestCompiler::new();
    let lib = builder.get_definition(&compiler).unwrap();

    assert_eq!(lib.repos[0].variants[0].effects.len(), 1);
    let effect_id = lib.repos[0].variants[0].effects[0].0;
    let effect = &lib.registry.effects[effect_id.index() as usize];
    assert_eq!(effect.passes.len(), 2);

    let pass0 = lib.registry.effect_passes[effect.passes[0].index() as usize];
    let pass1 = lib.registry.effect_passes[effect.passes[1].index() as usize];
    let v0_in_pass0 = lib.registry.id_arena[pass0.offset as usize];
    let v0_in_pass1 = lib.registry.id_arena[pass1.offset as usize];
    assert_eq!(v0_in_pass0, v0_in_pass1);
}

#[test]
fn modes_enumerate_and_is_defined_resolves_the_active_mode() {
    let src = "#pragma modes(Low, High)\n#pragma vertex(Main)\nfloat4 Main():SV_Position { return 0; }";
    let mut builder = LibraryBuilder::new();
    builder.add_repo("demo", "demo.hlsl", src);
    let compiler = TestCompiler::new();
    let lib = builder.get_definition(&compiler).unwrap();

    let map = LibraryMap::new(&lib, 0);
    assert_eq!(map.mode_count(), 3);
    assert_eq!(map.variant_count(), 3);

    let vid_low = map.variant_id(0, 1);
    assert!(map.is_defined("Low", vid_low));
    assert!(!map.is_defined("High", vid_low));
}

#[test]
fn cross_repo_dedup_shares_every_id() {
    let src = "#pragma vertex(Main)\nfloat4 Main():SV_Position { return 0; }";
    let mut builder = LibraryBuilder::new();
    builder.add_repo("a", "shared.hlsl", src);
    builder.add_repo("b", "shared.hlsl", src);
    let compiler = TestCompiler::new();
    let lib = builder.get_definition(&compiler).unwrap();

    assert_eq!(lib.repos.len(), 2);
    assert_eq!(lib.registry.shaders.len(), 1);
    assert_eq!(lib.registry.bytecode_spans.len(), 1);

    let a = lib.repos[0].variants[0].shaders[0].0;
    let b = lib.repos[1].variants[0].shaders[0].0;
    assert_eq!(a, b);
}

#[test]
fn resource_bindings_are_reflected_into_a_res_group() {
    let src = "#pragma pixel(P)\nTexture2D Albedo;\nfloat4 P():SV_Target { return 0; }";
    let compiler = TestCompiler::new();
    compiler.set_reflection(
        Stage::Pixel,
        "P",
        ShaderReflection {
            resources: vec![BoundResource {
                name: "Albedo".to_string(),
                kind: ResourceKind::TEXTURE_2D,
                slot: 0,
            }],
            ..Default::default()
        },
    );

    let mut builder = LibraryBuilder::new();
    builder.set_target(Target::Dx11);
    builder.add_repo("demo", "demo.hlsl", src);
    let lib = builder.get_definition(&compiler).unwrap();

    assert_eq!(lib.registry.resources.len(), 1);
    assert_eq!(
        lib.registry.resources[0].type_flags,
        shader_effects::registry::defs::ResourceTypeFlags::TEXTURE_2D
    );
    let shader_id = lib.repos[0].variants[0].shaders[0].0;
    let res_layout = lib.registry.shaders[shader_id.index() as usize].res_layout;
    assert!(res_layout.is_valid());
}
