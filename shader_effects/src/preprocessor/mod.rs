//! Variant preprocessor (spec.md §4.C).
//!
//! Drives a line-oriented C-style preprocessor (`#define`/`#undef`,
//! `#ifdef`/`#ifndef`/`#if defined(...)`/`#else`/`#elif`/`#endif`,
//! `#pragma`) over one source, first in a *discovery pass* (spec.md §4.C)
//! that learns the `flags`/`modes`/stage pragmas with an empty define set,
//! then once per variant with that variant's flag bits and mode macro
//! active.
//!
//! `#include` paths are recorded (spec.md §1: file I/O is out of scope)
//! but never read from disk — a source that relies on textual content
//! from an include for its own pragma declarations is not supported here.

mod lexer;

use hashbrown::HashSet;
use thiserror::Error;

use crate::keywords::{self, DEFAULT_MODE_NAME, FLAGS_PRAGMA, MODES_PRAGMA};
use crate::registry::defs::Stage;
use lexer::Token;

const MAX_FLAGS: usize = 8;
const MAX_MODES: usize = 256;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error("{file}:{line}: {message}")]
    Syntax {
        file: String,
        line: u32,
        message: String,
    },
    #[error("{file}:{line}: flag pragma limit exceeded (max {MAX_FLAGS})")]
    TooManyFlags { file: String, line: u32 },
    #[error("{file}:{line}: mode pragma limit exceeded (max {MAX_MODES})")]
    TooManyModes { file: String, line: u32 },
    #[error("{file}:{line}: `{name}` redefines an existing flag or mode")]
    RedefinedFlagOrMode {
        file: String,
        line: u32,
        name: String,
    },
}

impl Error {
    fn syntax(file: &str, line: u32, message: impl Into<String>) -> Self {
        Self(ErrorImpl::Syntax {
            file: file.to_string(),
            line,
            message: message.into(),
        })
    }

    fn too_many_flags(file: &str, line: u32) -> Self {
        Self(ErrorImpl::TooManyFlags {
            file: file.to_string(),
            line,
        })
    }

    fn too_many_modes(file: &str, line: u32) -> Self {
        Self(ErrorImpl::TooManyModes {
            file: file.to_string(),
            line,
        })
    }

    fn redefined(file: &str, line: u32, name: &str) -> Self {
        Self(ErrorImpl::RedefinedFlagOrMode {
            file: file.to_string(),
            line,
            name: name.to_string(),
        })
    }
}

/// A `(name, stage)` pair declared via `#pragma <stage>(name)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entrypoint {
    pub name: String,
    pub stage: Stage,
}

/// One preprocessed variant: its fully expanded text and the entrypoints
/// declared by pragmas that survived conditional compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    pub text: String,
    pub entrypoints: Vec<Entrypoint>,
}

#[derive(Copy, Clone)]
enum CondState {
    /// No branch in this `#if`/`#ifdef` chain has been true yet.
    AwaitingTrue,
    /// The currently open branch is active.
    Active,
    /// A branch already fired; later `#elif`/`#else` stay inactive.
    Done,
}

/// Drives one source file's worth of variant preprocessing.
///
/// Configuration (`add_macro`, `add_include_path`, `add_system_include_path`,
/// `set_debug`) is frozen after the first call to
/// [`Preprocessor::discover`] or [`Preprocessor::variant`] (spec.md §4.C).
pub struct Preprocessor {
    file_path: String,
    source: String,
    macros: Vec<(String, Option<String>)>,
    system_include_paths: Vec<String>,
    include_paths: Vec<String>,
    debug: bool,
    frozen: bool,

    flags: Vec<String>,
    modes: Vec<String>,
    declared_names: HashSet<String>,
}

impl Preprocessor {
    pub fn new(file_path: impl Into<String>, source: impl Into<String>) -> Self {
        let mut declared_names = HashSet::new();
        declared_names.insert(DEFAULT_MODE_NAME.to_string());

        Self {
            file_path: file_path.into(),
            source: source.into(),
            macros: Vec::new(),
            system_include_paths: Vec::new(),
            include_paths: Vec::new(),
            debug: false,
            frozen: false,
            flags: Vec::new(),
            modes: vec![DEFAULT_MODE_NAME.to_string()],
            declared_names,
        }
    }

    fn check_not_frozen(&self) {
        debug_assert!(
            !self.frozen,
            "preprocessor configuration changed after the first variant was generated"
        );
    }

    pub fn add_macro(&mut self, name: impl Into<String>, value: Option<&str>) {
        self.check_not_frozen();
        self.macros.push((name.into(), value.map(str::to_owned)));
    }

    pub fn add_system_include_path(&mut self, path: impl Into<String>) {
        self.check_not_frozen();
        self.system_include_paths.push(path.into());
    }

    pub fn add_include_path(&mut self, path: impl Into<String>) {
        self.check_not_frozen();
        self.include_paths.push(path.into());
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.check_not_frozen();
        self.debug = debug;
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn modes(&self) -> &[String] {
        &self.modes
    }

    pub fn flag_variant_count(&self) -> u32 {
        1 << self.flags.len()
    }

    pub fn mode_count(&self) -> u32 {
        self.modes.len() as u32
    }

    pub fn variant_count(&self) -> u32 {
        self.flag_variant_count() * self.mode_count().max(1)
    }

    /// Runs the discovery pass: scans `#pragma flags/modes/<stage>` with an
    /// empty flag/mode define set, populating [`Self::flags`] and
    /// [`Self::modes`].
    pub fn discover(&mut self) -> Result<(), Error> {
        let base = self.base_macros();
        let mut run = Run::new(&self.file_path, self.debug, base, true);
        run.execute(&self.source)?;

        for name in run.discovered_flags {
            self.declare_flag(&name, run.last_line)?;
        }
        for name in run.discovered_modes {
            self.declare_mode(&name, run.last_line)?;
        }

        self.frozen = true;
        Ok(())
    }

    fn declare_flag(&mut self, name: &str, line: u32) -> Result<(), Error> {
        if self.declared_names.contains(name) {
            return Err(Error::redefined(&self.file_path, line, name));
        }
        if self.flags.len() >= MAX_FLAGS {
            return Err(Error::too_many_flags(&self.file_path, line));
        }
        self.declared_names.insert(name.to_string());
        self.flags.push(name.to_string());
        Ok(())
    }

    fn declare_mode(&mut self, name: &str, line: u32) -> Result<(), Error> {
        if self.declared_names.contains(name) {
            return Err(Error::redefined(&self.file_path, line, name));
        }
        if self.modes.len() >= MAX_MODES {
            return Err(Error::too_many_modes(&self.file_path, line));
        }
        self.declared_names.insert(name.to_string());
        self.modes.push(name.to_string());
        Ok(())
    }

    fn base_macros(&self) -> Vec<(String, Option<String>)> {
        self.macros.clone()
    }

    /// Preprocesses variant `vid` (must be `< variant_count()`), defining
    /// the flag bits and mode macro that variant selects.
    pub fn variant(&mut self, vid: u32) -> Result<Variant, Error> {
        assert!(vid < self.variant_count(), "variant id out of range");
        self.frozen = true;

        let flag_count = self.flags.len() as u32;
        let flag_mask = vid % self.flag_variant_count().max(1);
        let mode_id = vid / self.flag_variant_count().max(1);

        let mut defines = self.base_macros();
        for (i, name) in self.flags.iter().enumerate() {
            if flag_mask & (1 << i) != 0 {
                defines.push((name.clone(), None));
            }
        }
        if mode_id > 0 {
            if let Some(name) = self.modes.get(mode_id as usize) {
                defines.push((name.clone(), None));
            }
        }
        let _ = flag_count;

        let mut run = Run::new(&self.file_path, self.debug, defines, false);
        run.execute(&self.source)?;

        Ok(Variant {
            text: run.output,
            entrypoints: run.entrypoints,
        })
    }
}

/// One execution of the directive driver over the whole source, either in
/// discovery mode (records flag/mode *names* instead of committing them)
/// or variant mode (defines are already resolved, only entrypoints and
/// expanded text are collected).
struct Run {
    file_path: String,
    #[allow(dead_code)]
    debug: bool,
    macros: Vec<(String, Option<String>)>,
    discovery: bool,
    output: String,
    entrypoints: Vec<Entrypoint>,
    discovered_flags: Vec<String>,
    discovered_modes: Vec<String>,
    last_line: u32,
}

impl Run {
    fn new(file_path: &str, debug: bool, macros: Vec<(String, Option<String>)>, discovery: bool) -> Self {
        Self {
            file_path: file_path.to_string(),
            debug,
            macros,
            discovery,
            output: String::new(),
            entrypoints: Vec::new(),
            discovered_flags: Vec::new(),
            discovered_modes: Vec::new(),
            last_line: 0,
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        self.macros.iter().any(|(n, _)| n == name)
    }

    fn macro_value(&self, name: &str) -> Option<&str> {
        self.macros
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    fn execute(&mut self, source: &str) -> Result<(), Error> {
        let cleaned = lexer::strip_comments(source);
        let mut cond_stack: Vec<(CondState, bool)> = Vec::new();

        let mut line_no = 0u32;
        for raw_line in join_continuations(&cleaned) {
            line_no += 1;
            self.last_line = line_no;
            let trimmed = raw_line.trim_start();

            if let Some(rest) = trimmed.strip_prefix('#') {
                self.directive(rest.trim(), line_no, &mut cond_stack)?;
                continue;
            }

            if self.is_active(&cond_stack) {
                self.output.push_str(&self.expand_macros(&raw_line));
                self.output.push('\n');
            }
        }

        if !cond_stack.is_empty() {
            return Err(Error::syntax(&self.file_path, line_no, "unterminated #if/#ifdef block"));
        }

        Ok(())
    }

    fn is_active(&self, stack: &[(CondState, bool)]) -> bool {
        stack
            .iter()
            .all(|(state, parent_active)| matches!(state, CondState::Active) && *parent_active)
    }

    fn directive(
        &mut self,
        rest: &str,
        line: u32,
        stack: &mut Vec<(CondState, bool)>,
    ) -> Result<(), Error> {
        let (keyword, arg) = split_first_word(rest);
        let parent_active = self.is_active(stack);

        match keyword {
            "define" if parent_active => {
                let (name, value) = split_first_word(arg);
                let name = name.to_string();
                let value = if value.trim().is_empty() {
                    None
                } else {
                    Some(value.trim().to_string())
                };
                self.macros.retain(|(n, _)| n != &name);
                self.macros.push((name, value));
            }
            "undef" if parent_active => {
                let name = arg.trim();
                self.macros.retain(|(n, _)| n != name);
            }
            "ifdef" => {
                let active = parent_active && self.is_defined(arg.trim());
                stack.push((if active { CondState::Active } else { CondState::AwaitingTrue }, parent_active));
            }
            "ifndef" => {
                let active = parent_active && !self.is_defined(arg.trim());
                stack.push((if active { CondState::Active } else { CondState::AwaitingTrue }, parent_active));
            }
            "if" => {
                let active = parent_active && self.eval_if(arg);
                stack.push((if active { CondState::Active } else { CondState::AwaitingTrue }, parent_active));
            }
            "elif" => {
                let Some((state, grandparent_active)) = stack.pop() else {
                    return Err(Error::syntax(&self.file_path, line, "#elif without #if"));
                };
                let next = match state {
                    CondState::AwaitingTrue if grandparent_active && self.eval_if(arg) => CondState::Active,
                    CondState::Active => CondState::Done,
                    other => other,
                };
                stack.push((next, grandparent_active));
            }
            "else" => {
                let Some((state, grandparent_active)) = stack.pop() else {
                    return Err(Error::syntax(&self.file_path, line, "#else without #if"));
                };
                let next = match state {
                    CondState::AwaitingTrue if grandparent_active => CondState::Active,
                    CondState::Active => CondState::Done,
                    other => other,
                };
                stack.push((next, grandparent_active));
            }
            "endif" => {
                if stack.pop().is_none() {
                    return Err(Error::syntax(&self.file_path, line, "#endif without #if"));
                }
            }
            "include" if parent_active => {
                // File I/O is out of scope; the path is accepted but not read.
            }
            "pragma" if parent_active => {
                self.pragma(arg, line)?;
            }
            _ => {}
        }

        Ok(())
    }

    fn eval_if(&self, arg: &str) -> bool {
        let arg = arg.trim();
        if arg == "0" {
            return false;
        }
        if arg == "1" {
            return true;
        }
        if let Some(inner) = arg.strip_prefix("defined(").and_then(|s| s.strip_suffix(')')) {
            return self.is_defined(inner.trim());
        }
        if let Some(inner) = arg.strip_prefix("defined ") {
            return self.is_defined(inner.trim());
        }
        self.is_defined(arg)
    }

    fn pragma(&mut self, arg: &str, line: u32) -> Result<(), Error> {
        let arg = arg.trim();
        let Some(open) = arg.find('(') else {
            return Ok(());
        };
        let name = arg[..open].trim();
        let Some(close) = arg.rfind(')') else {
            return Err(Error::syntax(&self.file_path, line, "unterminated pragma argument list"));
        };
        let args = split_pragma_args(&arg[open + 1..close]);

        if name == FLAGS_PRAGMA {
            if self.discovery {
                self.discovered_flags.extend(args);
            }
            return Ok(());
        }
        if name == MODES_PRAGMA {
            if self.discovery {
                self.discovered_modes.extend(args);
            }
            return Ok(());
        }
        if let Some(stage) = keywords::try_get_stage(name) {
            for entry_name in args {
                self.entrypoints.push(Entrypoint {
                    name: entry_name,
                    stage,
                });
            }
            return Ok(());
        }

        Ok(())
    }

    fn expand_macros(&self, line: &str) -> String {
        let tokens = lexer::split_tokens(line);
        let mut out = String::with_capacity(line.len());
        let mut prev_end = 0usize;
        let mut cursor = 0usize;

        for token in tokens {
            let text = token.text();
            if let Some(start) = find_at(line, text, cursor) {
                out.push_str(&line[prev_end..start]);
                match token {
                    Token::Ident(name) if self.is_defined(name) => {
                        out.push_str(self.macro_value(name).unwrap_or("1"));
                    }
                    _ => out.push_str(text),
                }
                prev_end = start + text.len();
                cursor = prev_end;
            }
        }
        out.push_str(&line[prev_end..]);
        out
    }
}

fn find_at(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|i| i + from)
}

fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn split_pragma_args(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Joins lines ending in `\` with the line that follows, as a C
/// preprocessor would.
fn join_continuations(src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();

    for line in src.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
        } else {
            pending.push_str(line);
            out.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        out.push(pending);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pragma_source_has_no_flags_and_default_mode() {
        let mut pp = Preprocessor::new(
            "a.hlsl",
            "#pragma vertex(Main)\nfloat4 Main():SV_Position { return 0; }",
        );
        pp.discover().unwrap();
        assert!(pp.flags().is_empty());
        assert_eq!(pp.modes(), [DEFAULT_MODE_NAME]);
        assert_eq!(pp.variant_count(), 1);

        let variant = pp.variant(0).unwrap();
        assert_eq!(variant.entrypoints.len(), 1);
        assert_eq!(variant.entrypoints[0].name, "Main");
        assert_eq!(variant.entrypoints[0].stage, Stage::Vertex);
    }

    #[test]
    fn two_flags_enumerate_four_variants() {
        let src = "#pragma flags(A, B)\n#pragma vertex(Main)\nfloat4 Main() {\n#ifdef A\nfloat x = 1;\n#endif\n#ifdef B\nfloat y = 2;\n#endif\nreturn 0;\n}";
        let mut pp = Preprocessor::new("a.hlsl", src);
        pp.discover().unwrap();
        assert_eq!(pp.flags(), ["A", "B"]);
        assert_eq!(pp.variant_count(), 4);

        let v0 = pp.variant(0).unwrap();
        let v3 = pp.variant(3).unwrap();
        assert!(!v0.text.contains("float x"));
        assert!(!v0.text.contains("float y"));
        assert!(v3.text.contains("float x"));
        assert!(v3.text.contains("float y"));
    }

    #[test]
    fn modes_enumerate_with_default_first() {
        let src = "#pragma modes(Low, High)\n#pragma vertex(Main)\nfloat4 Main() { return 0; }";
        let mut pp = Preprocessor::new("a.hlsl", src);
        pp.discover().unwrap();
        assert_eq!(pp.modes(), [DEFAULT_MODE_NAME, "Low", "High"]);
        assert_eq!(pp.variant_count(), 3);
    }

    #[test]
    fn duplicate_flag_and_mode_name_is_rejected() {
        let src = "#pragma flags(A)\n#pragma modes(A)\n";
        let mut pp = Preprocessor::new("a.hlsl", src);
        assert!(pp.discover().is_err());
    }

    #[test]
    fn pragma_across_two_lines_accumulates() {
        let src = "#pragma flags(A)\n#pragma flags(B)\n";
        let mut pp = Preprocessor::new("a.hlsl", src);
        pp.discover().unwrap();
        assert_eq!(pp.flags(), ["A", "B"]);
    }

    #[test]
    fn trailing_comma_and_whitespace_are_tolerated() {
        let src = "#pragma flags( A ,  B , )\n";
        let mut pp = Preprocessor::new("a.hlsl", src);
        pp.discover().unwrap();
        assert_eq!(pp.flags(), ["A", "B"]);
    }
}
