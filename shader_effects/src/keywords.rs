//! Effect-language keyword and stage-name tables (spec.md §4.D, §6.1).
//!
//! Matching is case-insensitive; names longer than 20 bytes never match,
//! mirroring the fixed-size lowercase scratch buffer the original keyword
//! lookup uses.

use crate::registry::defs::Stage;

const MAX_KEYWORD_LEN: usize = 20;

/// The block-introducing and modifier keywords the block analyzer
/// classifies a prefix against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Keyword {
    Technique,
    Pass,
    ConstBuffer,
    Shader(Stage),
    Typedef,
    Struct,
    Static,
    Const,
    TypeModifier,
    GroupShared,
}

const KEYWORD_TABLE: &[(&str, Keyword)] = &[
    ("technique", Keyword::Technique),
    ("effect", Keyword::Technique),
    ("pass", Keyword::Pass),
    ("cbuffer", Keyword::ConstBuffer),
    ("vertex", Keyword::Shader(Stage::Vertex)),
    ("hull", Keyword::Shader(Stage::Hull)),
    ("domain", Keyword::Shader(Stage::Domain)),
    ("geometry", Keyword::Shader(Stage::Geometry)),
    ("pixel", Keyword::Shader(Stage::Pixel)),
    ("fragment", Keyword::Shader(Stage::Pixel)),
    ("frag", Keyword::Shader(Stage::Pixel)),
    ("compute", Keyword::Shader(Stage::Compute)),
    ("kernel", Keyword::Shader(Stage::Compute)),
    ("typedef", Keyword::Typedef),
    ("struct", Keyword::Struct),
    ("static", Keyword::Static),
    ("const", Keyword::Const),
    ("in", Keyword::TypeModifier),
    ("inout", Keyword::TypeModifier),
    ("out", Keyword::TypeModifier),
    ("uniform", Keyword::TypeModifier),
    ("groupshared", Keyword::GroupShared),
];

const STAGE_TABLE: &[(&str, Stage)] = &[
    ("vertex", Stage::Vertex),
    ("hull", Stage::Hull),
    ("domain", Stage::Domain),
    ("geometry", Stage::Geometry),
    ("pixel", Stage::Pixel),
    ("fragment", Stage::Pixel),
    ("frag", Stage::Pixel),
    ("compute", Stage::Compute),
    ("kernel", Stage::Compute),
];

fn lowercase_fits(name: &str) -> Option<[u8; MAX_KEYWORD_LEN]> {
    if name.len() > MAX_KEYWORD_LEN || !name.is_ascii() {
        return None;
    }
    let mut buf = [0u8; MAX_KEYWORD_LEN];
    for (i, b) in name.bytes().enumerate() {
        buf[i] = b.to_ascii_lowercase();
    }
    Some(buf)
}

/// Looks up `name` (case-insensitive) in the block-keyword table.
pub fn try_get_keyword(name: &str) -> Option<Keyword> {
    let buf = lowercase_fits(name)?;
    let lower = &buf[..name.len()];
    KEYWORD_TABLE
        .iter()
        .find(|(kw, _)| kw.as_bytes() == lower)
        .map(|(_, kind)| *kind)
}

/// Looks up `name` (case-insensitive) in the `#pragma <stage>(...)` table.
pub fn try_get_stage(name: &str) -> Option<Stage> {
    let buf = lowercase_fits(name)?;
    let lower = &buf[..name.len()];
    STAGE_TABLE
        .iter()
        .find(|(kw, _)| kw.as_bytes() == lower)
        .map(|(_, stage)| *stage)
}

/// Canonical display name for a stage, used in generated diagnostics.
pub fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Vertex => "Vertex",
        Stage::Hull => "Hull",
        Stage::Domain => "Domain",
        Stage::Geometry => "Geometry",
        Stage::Pixel => "Pixel",
        Stage::Compute => "Compute",
    }
}

pub const FLAGS_PRAGMA: &str = "flags";
pub const MODES_PRAGMA: &str = "modes";
pub const DEFAULT_MODE_NAME: &str = "__DEFAULT_SHADER_MODE__";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_aliases_resolve_to_the_same_stage() {
        assert_eq!(try_get_stage("pixel"), Some(Stage::Pixel));
        assert_eq!(try_get_stage("fragment"), Some(Stage::Pixel));
        assert_eq!(try_get_stage("frag"), Some(Stage::Pixel));
        assert_eq!(try_get_stage("FRAG"), Some(Stage::Pixel));
    }

    #[test]
    fn compute_kernel_alias_resolves() {
        assert_eq!(try_get_stage("Kernel"), Some(Stage::Compute));
    }

    #[test]
    fn overlong_name_never_matches() {
        let long = "a".repeat(21);
        assert_eq!(try_get_stage(&long), None);
        assert_eq!(try_get_keyword(&long), None);
    }

    #[test]
    fn unknown_keyword_is_none() {
        assert_eq!(try_get_keyword("banana"), None);
    }

    #[test]
    fn keyword_lookup_is_case_insensitive() {
        assert_eq!(try_get_keyword("CBuffer"), Some(Keyword::ConstBuffer));
        assert_eq!(try_get_keyword("Effect"), Some(Keyword::Technique));
    }
}
