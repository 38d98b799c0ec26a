//! Block / scope analyzer (spec.md §4.D).
//!
//! Tokenizes one preprocessed variant's text and builds a tree of `{...}`
//! scopes, each tagged with the declaration kind inferred from the prefix
//! tokens seen since the last statement boundary.

use thiserror::Error;

use crate::keywords::{self, Keyword};
use crate::registry::defs::Stage;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error("unmatched `{{` at byte {open}")]
    UnmatchedOpenBrace { open: usize },
    #[error("unmatched `}}` at byte {close} (no open block)")]
    UnmatchedCloseBrace { close: usize },
}

impl Error {
    fn unmatched_open(open: usize) -> Self {
        Self(ErrorImpl::UnmatchedOpenBrace { open })
    }

    fn unmatched_close(close: usize) -> Self {
        Self(ErrorImpl::UnmatchedCloseBrace { close })
    }
}

bitflags::bitflags! {
    /// Type-modifier keywords preceding a declaration.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u16 {
        const STATIC      = 1 << 0;
        const CONST       = 1 << 1;
        const IN          = 1 << 2;
        const INOUT       = 1 << 3;
        const OUT         = 1 << 4;
        const UNIFORM     = 1 << 5;
        const GROUPSHARED = 1 << 6;
    }
}

/// The kind of scope a block represents, inferred from the keyword
/// immediately preceding its opening `{`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    File,
    /// An `effect`/`technique` body, or a `pass` body nested within one.
    ReplicaBlock,
    Shader(Stage),
    ConstantBuffer,
    Struct,
    Function,
    Anonymous,
}

/// One lexical block: a half-open byte range plus everything the symbol
/// table (spec.md §4.E) needs to classify it.
#[derive(Clone, Debug)]
pub struct Block {
    pub range: std::ops::Range<usize>,
    pub kind: ScopeKind,
    pub ident: Option<(String, std::ops::Range<usize>)>,
    pub modifiers: Modifiers,
    pub param_list: Option<std::ops::Range<usize>>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// The full block tree for one variant, rooted at block `0` (the
/// synthetic `File` block spanning the whole input).
#[derive(Clone, Debug)]
pub struct BlockTree {
    pub blocks: Vec<Block>,
}

impl BlockTree {
    pub const ROOT: usize = 0;

    pub fn root(&self) -> &Block {
        &self.blocks[Self::ROOT]
    }
}

struct PendingPrefix {
    ident: Option<(String, std::ops::Range<usize>)>,
    first_keyword: Option<Keyword>,
    modifiers: Modifiers,
    paren_range: Option<std::ops::Range<usize>>,
}

impl PendingPrefix {
    fn new() -> Self {
        Self {
            ident: None,
            first_keyword: None,
            modifiers: Modifiers::empty(),
            paren_range: None,
        }
    }
}

/// Builds the block tree for `text`, the expanded source of one variant.
pub fn analyze(text: &str) -> Result<BlockTree, Error> {
    let mut blocks = vec![Block {
        range: 0..text.len(),
        kind: ScopeKind::File,
        ident: None,
        modifiers: Modifiers::empty(),
        param_list: None,
        parent: None,
        children: Vec::new(),
    }];

    let mut stack = vec![0usize];
    let mut pending = PendingPrefix::new();
    let mut paren_depth = 0i32;
    let mut paren_start = None;
    let mut stmt_start = 0usize;
    // True after a bare `:` outside parens — an HLSL semantic annotation
    // (`Main() : SV_Target`). Identifiers in a semantic suffix name a
    // binding slot, not a declaration, so they must not reach
    // `apply_prefix_word` and clobber the function's own name.
    let mut in_semantic_suffix = false;

    let bytes = text.as_bytes();
    let mut i = 0usize;
    let mut open_stack_positions = Vec::new();

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            i += 1;
            while i < bytes.len() && is_ident_continue(bytes[i] as char) {
                i += 1;
            }
            let word = &text[start..i];
            if !in_semantic_suffix {
                apply_prefix_word(&mut pending, word, start..i);
            }
            continue;
        }

        match c {
            ':' if paren_depth == 0 => {
                in_semantic_suffix = true;
                i += 1;
            }
            '(' => {
                if paren_depth == 0 {
                    paren_start = Some(i);
                }
                paren_depth += 1;
                i += 1;
            }
            ')' => {
                paren_depth = (paren_depth - 1).max(0);
                if paren_depth == 0 {
                    if let Some(start) = paren_start.take() {
                        pending.paren_range = Some(start..i + 1);
                    }
                }
                i += 1;
            }
            '{' if paren_depth == 0 => {
                let kind = match pending.first_keyword {
                    Some(keyword) => kind_from_keyword(keyword),
                    // No recognized block keyword, but a parameter list was
                    // seen before the brace: a plain HLSL function.
                    None if pending.paren_range.is_some() => ScopeKind::Function,
                    None => ScopeKind::Anonymous,
                };
                let decl_start = text[stmt_start..i]
                    .find(|c: char| !c.is_whitespace())
                    .map(|offset| stmt_start + offset)
                    .unwrap_or(i);
                let block_id = blocks.len();
                blocks.push(Block {
                    range: decl_start..decl_start, // closed below
                    kind,
                    ident: pending.ident.take(),
                    modifiers: pending.modifiers,
                    param_list: pending.paren_range.take(),
                    parent: Some(*stack.last().unwrap()),
                    children: Vec::new(),
                });
                let parent_id = *stack.last().unwrap();
                blocks[parent_id].children.push(block_id);
                stack.push(block_id);
                open_stack_positions.push(decl_start);
                pending = PendingPrefix::new();
                in_semantic_suffix = false;
                i += 1;
                stmt_start = i;
            }
            '}' => {
                let Some(decl_start) = open_stack_positions.pop() else {
                    return Err(Error::unmatched_close(i));
                };
                let Some(block_id) = stack.pop() else {
                    return Err(Error::unmatched_close(i));
                };
                blocks[block_id].range = decl_start..i + 1;
                pending = PendingPrefix::new();
                in_semantic_suffix = false;
                stmt_start = i + 1;
                i += 1;
            }
            ';' => {
                pending = PendingPrefix::new();
                in_semantic_suffix = false;
                stmt_start = i + 1;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    if let Some(&open) = open_stack_positions.first() {
        return Err(Error::unmatched_open(open));
    }

    blocks[0].range = 0..text.len();
    Ok(BlockTree { blocks })
}

fn apply_prefix_word(pending: &mut PendingPrefix, word: &str, range: std::ops::Range<usize>) {
    if let Some(keyword) = keywords::try_get_keyword(word) {
        match keyword {
            Keyword::Static => pending.modifiers |= Modifiers::STATIC,
            Keyword::Const => pending.modifiers |= Modifiers::CONST,
            Keyword::GroupShared => pending.modifiers |= Modifiers::GROUPSHARED,
            Keyword::TypeModifier => match word.to_ascii_lowercase().as_str() {
                "in" => pending.modifiers |= Modifiers::IN,
                "inout" => pending.modifiers |= Modifiers::INOUT,
                "out" => pending.modifiers |= Modifiers::OUT,
                "uniform" => pending.modifiers |= Modifiers::UNIFORM,
                _ => {}
            },
            _ => {
                if pending.first_keyword.is_none() {
                    pending.first_keyword = Some(keyword);
                }
            }
        }
    } else {
        // The last bare identifier before `{` is the block's name (function
        // name, struct/cbuffer tag, shader entrypoint name, pass label).
        pending.ident = Some((word.to_string(), range));
    }
}

fn kind_from_keyword(keyword: Keyword) -> ScopeKind {
    match keyword {
        Keyword::Technique => ScopeKind::ReplicaBlock,
        Keyword::Pass => ScopeKind::ReplicaBlock,
        Keyword::ConstBuffer => ScopeKind::ConstantBuffer,
        Keyword::Shader(stage) => ScopeKind::Shader(stage),
        Keyword::Struct | Keyword::Typedef => ScopeKind::Struct,
        _ => ScopeKind::Anonymous,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_function_is_a_single_child_block() {
        let tree = analyze("float4 Main() { return 0; }").unwrap();
        assert_eq!(tree.blocks.len(), 2);
        assert_eq!(tree.root().children, vec![1]);
        assert_eq!(tree.blocks[1].kind, ScopeKind::Function);
        assert_eq!(tree.blocks[1].ident.as_ref().map(|(s, _)| s.as_str()), Some("Main"));
    }

    #[test]
    fn cbuffer_block_is_classified() {
        let tree = analyze("cbuffer Globals { float4 Color; }").unwrap();
        assert_eq!(tree.blocks[1].kind, ScopeKind::ConstantBuffer);
        assert_eq!(tree.blocks[1].ident.as_ref().map(|(s, _)| s.as_str()), Some("Globals"));
    }

    #[test]
    fn nested_pass_inside_effect() {
        let tree = analyze("effect E { pass P0 { } }").unwrap();
        assert_eq!(tree.blocks[1].kind, ScopeKind::ReplicaBlock);
        assert_eq!(tree.blocks[1].children.len(), 1);
        let pass_id = tree.blocks[1].children[0];
        assert_eq!(tree.blocks[pass_id].kind, ScopeKind::ReplicaBlock);
        assert_eq!(tree.blocks[pass_id].ident.as_ref().map(|(s, _)| s.as_str()), Some("P0"));
    }

    #[test]
    fn unmatched_open_brace_errors() {
        assert!(analyze("void Main() {").is_err());
    }

    #[test]
    fn unmatched_close_brace_errors() {
        assert!(analyze("void Main() { } }").is_err());
    }

    #[test]
    fn ident_prefixed_block_without_keyword_or_params_is_anonymous() {
        let tree = analyze("Foo { }").unwrap();
        assert_eq!(tree.blocks[1].kind, ScopeKind::Anonymous);
        assert_eq!(tree.blocks[1].ident.as_ref().map(|(s, _)| s.as_str()), Some("Foo"));
    }

    #[test]
    fn semantic_annotation_after_param_list_does_not_replace_the_function_name() {
        let tree = analyze("float4 Main():SV_Target { return 0; }").unwrap();
        assert_eq!(tree.blocks[1].kind, ScopeKind::Function);
        assert_eq!(tree.blocks[1].ident.as_ref().map(|(s, _)| s.as_str()), Some("Main"));
    }

    #[test]
    fn statements_before_a_struct_do_not_leak_into_its_prefix() {
        let tree = analyze("static const float4 Zero = float4(0,0,0,0); struct S { float x; };").unwrap();
        assert_eq!(tree.blocks.len(), 2);
        assert_eq!(tree.blocks[1].kind, ScopeKind::Struct);
        assert_eq!(tree.blocks[1].ident.as_ref().map(|(s, _)| s.as_str()), Some("S"));
    }
}
