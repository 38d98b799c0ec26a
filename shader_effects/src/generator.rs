//! Shader generator (spec.md §4.F).
//!
//! For one `(variant, entrypoint)` pair, walks the reachable symbol graph
//! from the entrypoint function and emits a minimal, self-contained HLSL
//! fragment by copying the original source ranges of every reachable
//! declaration — never re-synthesizing text from the symbol table, so the
//! platform compiler sees a byte-faithful subset of the variant's
//! expanded source.

use hashbrown::HashSet;
use thiserror::Error;

use crate::block::BlockTree;
use crate::symbol::{SymbolKind, SymbolTable};

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error("entrypoint `{0}` has no function declaration")]
    MissingEntrypoint(String),
}

impl Error {
    fn missing_entrypoint(name: &str) -> Self {
        Self(ErrorImpl::MissingEntrypoint(name.to_string()))
    }
}

/// Emits the minimal HLSL fragment for `entry_name`, which must resolve to
/// a `FunctionDef`/`ShaderDef` symbol at file scope.
pub fn generate(
    text: &str,
    tree: &BlockTree,
    table: &SymbolTable,
    entry_name: &str,
) -> Result<String, Error> {
    let entry = table
        .find_function(entry_name)
        .ok_or_else(|| Error::missing_entrypoint(entry_name))?;

    let mut reachable_functions = vec![entry.block_id];
    let mut seen_functions: HashSet<usize> = HashSet::from_iter([entry.block_id]);
    let mut seen_types: HashSet<usize> = HashSet::new();
    let mut reachable_types = Vec::new();

    let mut frontier = vec![entry.block_id];
    while let Some(block_id) = frontier.pop() {
        let body = &text[tree.blocks[block_id].range.clone()];
        for ident in identifiers(body) {
            if let Some(symbol) = table.find_function(ident) {
                if symbol.block_id != block_id && seen_functions.insert(symbol.block_id) {
                    reachable_functions.push(symbol.block_id);
                    frontier.push(symbol.block_id);
                }
            }
            if let Some(symbol) = find_type(table, tree, ident) {
                if seen_types.insert(symbol.block_id) {
                    reachable_types.push(symbol.block_id);
                }
            }
        }
    }

    reachable_types.sort_by_key(|&id| tree.blocks[id].range.start);
    reachable_functions.sort_by_key(|&id| tree.blocks[id].range.start);
    reachable_functions.retain(|&id| id != entry.block_id);

    let mut out = String::new();
    for id in reachable_types {
        out.push_str(&text[tree.blocks[id].range.clone()]);
        out.push_str(";\n\n");
    }
    for id in reachable_functions {
        out.push_str(&text[tree.blocks[id].range.clone()]);
        out.push_str("\n\n");
    }
    out.push_str(&text[tree.blocks[entry.block_id].range.clone()]);

    Ok(out)
}

fn find_type<'a>(
    table: &'a SymbolTable,
    tree: &BlockTree,
    name: &str,
) -> Option<&'a crate::symbol::Symbol> {
    table.lookup(tree, BlockTree::ROOT, name).filter(|s| {
        matches!(s.kind, SymbolKind::UserStruct | SymbolKind::UserCBuf)
    })
}

fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut i = 0usize;
    std::iter::from_fn(move || {
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
                return Some(&text[start..i]);
            }
            i += 1;
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block;
    use crate::symbol;

    #[test]
    fn entry_with_no_dependencies_emits_only_itself() {
        let text = "float4 Main() { return 0; }";
        let tree = block::analyze(text).unwrap();
        let table = symbol::build(&tree, text).unwrap();
        let out = generate(text, &tree, &table, "Main").unwrap();
        assert_eq!(out.trim(), text);
    }

    #[test]
    fn called_function_and_used_struct_are_included() {
        let text = "struct S { float4 v; }; float4 Helper(S s) { return s.v; } float4 Main() { S s; return Helper(s); }";
        let tree = block::analyze(text).unwrap();
        let table = symbol::build(&tree, text).unwrap();
        let out = generate(text, &tree, &table, "Main").unwrap();
        assert!(out.contains("struct S"));
        assert!(out.contains("Helper"));
        assert!(out.trim_end().ends_with("}"));
        // Entry point must come last.
        let helper_pos = out.find("float4 Helper").unwrap();
        let main_pos = out.rfind("float4 Main").unwrap();
        assert!(helper_pos < main_pos);
    }

    #[test]
    fn unqualified_cbuffer_field_reference_pulls_in_the_buffer() {
        let text = "cbuffer Globals { float4 Color; } float4 Main():SV_Target { return Color; }";
        let tree = block::analyze(text).unwrap();
        let table = symbol::build(&tree, text).unwrap();
        let out = generate(text, &tree, &table, "Main").unwrap();
        assert!(out.contains("cbuffer Globals"));
        assert!(out.contains("float4 Color"));
    }

    #[test]
    fn missing_entrypoint_errors() {
        let text = "float4 Other() { return 0; }";
        let tree = block::analyze(text).unwrap();
        let table = symbol::build(&tree, text).unwrap();
        assert!(generate(text, &tree, &table, "Main").is_err());
    }
}
