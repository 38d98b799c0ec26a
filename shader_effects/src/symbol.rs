//! Symbol table (spec.md §4.E).
//!
//! Built by a top-down walk of the block tree: every named block becomes a
//! symbol in its enclosing scope's symbol map, and every field inside a
//! `cbuffer`/`struct` body is additionally registered at file scope so an
//! unqualified field reference (`Color`, not `Globals.Color`) resolves back
//! to the buffer/struct that declares it. A second pass then resolves two
//! things once all top-level declarations are known: `pass { ... }` bodies
//! — plain comma-separated shader-name lists, not nested blocks — against
//! the shader entrypoints visible in the file (spec.md §9 "effect-pass
//! referencing shaders not yet declared"), and any declaration the first
//! pass could only classify as `Ambiguous`. This language's grammar gives
//! every legal block a recognizable keyword or parameter list, so a
//! surviving `Ambiguous` symbol names a construct the grammar doesn't
//! define; the second pass reports it rather than leaving it unresolved.

use hashbrown::HashMap;
use thiserror::Error;

use crate::block::{BlockTree, ScopeKind};
use crate::registry::defs::Stage;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error("duplicate declaration of `{name}` in the same scope")]
    DuplicateDeclaration { name: String },
    #[error("pass references unknown shader `{name}`")]
    UnknownShaderInPass { name: String },
    #[error("`{name}` is not a recognized declaration")]
    UnresolvedAmbiguous { name: String },
}

impl Error {
    fn duplicate(name: &str) -> Self {
        Self(ErrorImpl::DuplicateDeclaration { name: name.to_string() })
    }

    fn unknown_shader(name: &str) -> Self {
        Self(ErrorImpl::UnknownShaderInPass { name: name.to_string() })
    }

    fn unresolved_ambiguous(name: &str) -> Self {
        Self(ErrorImpl::UnresolvedAmbiguous { name: name.to_string() })
    }
}

/// The kind of declaration a [`Symbol`] names (spec.md §4.E).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    UserStruct,
    UserCBuf,
    FunctionDef,
    ShaderDef(Stage),
    TechniqueDef,
    Pass,
    /// The declaring prefix could not be classified without more context
    /// (e.g. a bare identifier block with no recognized keyword).
    Ambiguous,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub block_id: usize,
}

/// One shader entrypoint a `pass` block names, in source order.
#[derive(Clone, Debug)]
pub struct PassEntry {
    pub block_id: usize,
    pub shader_names: Vec<String>,
}

/// The full symbol table for one variant's block tree.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    /// Per-block symbol maps, indexed by block ID.
    scopes: Vec<HashMap<String, Symbol>>,
    pub passes: Vec<PassEntry>,
}

impl SymbolTable {
    /// Resolves `name` by walking from `block_id` up through parent scopes.
    pub fn lookup(&self, tree: &BlockTree, mut block_id: usize, name: &str) -> Option<&Symbol> {
        loop {
            if let Some(symbol) = self.scopes[block_id].get(name) {
                return Some(symbol);
            }
            block_id = tree.blocks[block_id].parent?;
        }
    }

    /// Finds a function-like symbol named `name` anywhere in the file,
    /// regardless of scope — shader entrypoints are conventionally file
    /// scope.
    pub fn find_function(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().flatten().map(|(_, s)| s).find(|s| {
            s.name == name && matches!(s.kind, SymbolKind::FunctionDef | SymbolKind::ShaderDef(_))
        })
    }

    pub fn scope(&self, block_id: usize) -> &HashMap<String, Symbol> {
        &self.scopes[block_id]
    }
}

/// Builds the symbol table for `tree`, whose blocks were produced from
/// `text`.
pub fn build(tree: &BlockTree, text: &str) -> Result<SymbolTable, Error> {
    let mut table = SymbolTable {
        scopes: vec![HashMap::new(); tree.blocks.len()],
        passes: Vec::new(),
    };

    for (id, block) in tree.blocks.iter().enumerate() {
        if id == BlockTree::ROOT {
            continue;
        }
        let Some((name, _)) = &block.ident else {
            continue;
        };

        let kind = match block.kind {
            ScopeKind::Struct => SymbolKind::UserStruct,
            ScopeKind::ConstantBuffer => SymbolKind::UserCBuf,
            ScopeKind::Shader(stage) => SymbolKind::ShaderDef(stage),
            ScopeKind::ReplicaBlock => {
                if tree.blocks[block.parent.unwrap()].kind == ScopeKind::ReplicaBlock {
                    SymbolKind::Pass
                } else {
                    SymbolKind::TechniqueDef
                }
            }
            ScopeKind::Function => SymbolKind::FunctionDef,
            ScopeKind::Anonymous => SymbolKind::Ambiguous,
            ScopeKind::File => unreachable!(),
        };

        let parent = block.parent.unwrap();
        if table.scopes[parent].contains_key(name.as_str()) {
            return Err(Error::duplicate(name));
        }
        table.scopes[parent].insert(
            name.clone(),
            Symbol {
                name: name.clone(),
                kind,
                block_id: id,
            },
        );

        if kind == SymbolKind::Pass {
            let open_brace = block.range.start
                + text[block.range.clone()]
                    .find('{')
                    .expect("pass block must contain its opening brace");
            let body = &text[open_brace + 1..block.range.end - 1];
            let shader_names = body
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            table.passes.push(PassEntry {
                block_id: id,
                shader_names,
            });
        }

        // Register each field at file scope so an unqualified reference
        // (`Color`) resolves back to the cbuffer/struct that declares it,
        // not only the qualified form (`Globals.Color`).
        if matches!(kind, SymbolKind::UserCBuf | SymbolKind::UserStruct) {
            let open_brace = block.range.start
                + text[block.range.clone()]
                    .find('{')
                    .expect("cbuffer/struct block must contain its opening brace");
            let body = &text[open_brace + 1..block.range.end - 1];
            for field_name in field_names(body) {
                table.scopes[BlockTree::ROOT]
                    .entry(field_name.clone())
                    .or_insert(Symbol {
                        name: field_name,
                        kind,
                        block_id: id,
                    });
            }
        }
    }

    for pass in &table.passes {
        for name in &pass.shader_names {
            if table.find_function(name).is_none() {
                return Err(Error::unknown_shader(name));
            }
        }
    }

    // Second pass: every legal declaration in this grammar is classified by
    // a keyword or a parameter list in the first pass above, so an
    // `Ambiguous` symbol surviving to here names a construct the grammar
    // does not define.
    for scope in &table.scopes {
        for symbol in scope.values() {
            if symbol.kind == SymbolKind::Ambiguous {
                return Err(Error::unresolved_ambiguous(&symbol.name));
            }
        }
    }

    Ok(table)
}

/// Extracts the declared field name from each `;`-terminated statement in a
/// `cbuffer`/`struct` body — the last identifier before `;` or `[` (for
/// array fields), matching this grammar's `type name[;|[]` field shape.
fn field_names(body: &str) -> Vec<String> {
    body.split(';')
        .filter_map(|stmt| {
            let stmt = stmt.split('[').next().unwrap_or(stmt);
            last_identifier(stmt)
        })
        .collect()
}

fn last_identifier(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0usize;
    let mut last = None;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            i += 1;
            while i < bytes.len() {
                let c2 = bytes[i] as char;
                if c2.is_ascii_alphanumeric() || c2 == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            last = Some(text[start..i].to_string());
        } else {
            i += 1;
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;

    #[test]
    fn function_and_struct_are_registered_at_file_scope() {
        let text = "struct S { float4 x; }; float4 Main() { return 0; }";
        let tree = block::analyze(text).unwrap();
        let table = build(&tree, text).unwrap();
        assert!(table.scope(BlockTree::ROOT).contains_key("S"));
        assert!(table.scope(BlockTree::ROOT).contains_key("Main"));
    }

    #[test]
    fn duplicate_struct_name_is_an_error() {
        let text = "struct S { float4 x; }; struct S { float4 y; };";
        let tree = block::analyze(text).unwrap();
        assert!(build(&tree, text).is_err());
    }

    #[test]
    fn pass_resolves_its_listed_shaders() {
        let text = "float4 V0() { return 0; } float4 P0() { return 0; } effect E { pass P { V0, P0 } }";
        let tree = block::analyze(text).unwrap();
        let table = build(&tree, text).unwrap();
        assert_eq!(table.passes.len(), 1);
        assert_eq!(table.passes[0].shader_names, vec!["V0", "P0"]);
    }

    #[test]
    fn pass_referencing_unknown_shader_errors() {
        let text = "effect E { pass P { Ghost } }";
        let tree = block::analyze(text).unwrap();
        assert!(build(&tree, text).is_err());
    }

    #[test]
    fn forward_referenced_shader_in_pass_is_accepted() {
        // The pass appears before the shader it names; all entrypoints are
        // collected before passes are resolved (spec.md §9).
        let text = "effect E { pass P { Later } } float4 Later() { return 0; }";
        let tree = block::analyze(text).unwrap();
        assert!(build(&tree, text).is_ok());
    }

    #[test]
    fn unqualified_cbuffer_field_resolves_to_its_buffer() {
        let text = "cbuffer Globals { float4 Color; }";
        let tree = block::analyze(text).unwrap();
        let table = build(&tree, text).unwrap();
        let globals = table.scope(BlockTree::ROOT).get("Globals").unwrap().block_id;
        let field = table.scope(BlockTree::ROOT).get("Color").unwrap();
        assert_eq!(field.kind, SymbolKind::UserCBuf);
        assert_eq!(field.block_id, globals);
    }

    #[test]
    fn struct_field_resolves_to_its_struct() {
        let text = "struct S { float4 Position; };";
        let tree = block::analyze(text).unwrap();
        let table = build(&tree, text).unwrap();
        let s = table.scope(BlockTree::ROOT).get("S").unwrap().block_id;
        let field = table.scope(BlockTree::ROOT).get("Position").unwrap();
        assert_eq!(field.kind, SymbolKind::UserStruct);
        assert_eq!(field.block_id, s);
    }

    #[test]
    fn ambiguous_declaration_is_reported_in_the_second_pass() {
        let text = "Foo { struct S { float4 x; }; }";
        let tree = block::analyze(text).unwrap();
        assert!(build(&tree, text).is_err());
    }
}
