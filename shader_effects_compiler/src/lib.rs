//! The boundary between the library builder and a platform bytecode
//! compiler (DX11/DX12/Vulkan). The real compiler lives outside this
//! workspace; this crate only fixes the shape of the call across that
//! boundary and ships an in-memory reference implementation for tests.

use std::fmt;
use std::sync::Mutex;

use hashbrown::HashMap;
use thiserror::Error;

/// A shader stage, matching the set of stages a `ShaderDef` can be tagged
/// with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

/// The platform a library is being built for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Dx11,
    Dx12,
    Vulkan,
}

/// A single request to compile one entrypoint of one generated translation
/// unit.
#[derive(Clone, Debug)]
pub struct CompileRequest<'a> {
    pub src_path: &'a str,
    pub src_text: &'a str,
    pub feature_level: &'a str,
    pub stage: Stage,
    pub entry_name: &'a str,
    pub debug: bool,
}

/// The scalar type of an `IOElement` or constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Float32,
    Uint32,
    Sint32,
    Unknown,
}

/// One parameter in a stage's input or output signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoParameter {
    pub semantic: String,
    pub semantic_index: u32,
    pub data_type: ScalarType,
    pub component_count: u8,
}

/// One scalar/vector field inside a reflected constant buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstVariable {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// A constant buffer bound to the compiled stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstantBuffer {
    pub name: String,
    pub size_bytes: u32,
    pub variables: Vec<ConstVariable>,
}

bitflags::bitflags! {
    /// The dimensionality/kind bits a bound resource can carry, mirroring
    /// `ResourceDef::typeFlags`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceKind: u16 {
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

/// A non-cbuffer resource binding (texture, sampler, structured/UAV buffer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundResource {
    pub name: String,
    pub kind: ResourceKind,
    pub slot: u32,
}

/// Reflection data the compiler hands back alongside the bytecode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    pub inputs: Vec<IoParameter>,
    pub outputs: Vec<IoParameter>,
    pub cbuffers: Vec<ConstantBuffer>,
    pub resources: Vec<BoundResource>,
    /// Only populated for `Stage::Compute`.
    pub thread_group_size: Option<(u32, u32, u32)>,
}

/// The result of compiling one entrypoint.
#[derive(Clone, Debug)]
pub struct CompileOutput {
    pub bytecode: Vec<u8>,
    pub reflection: ShaderReflection,
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorImpl);

#[derive(Debug, Error)]
enum ErrorImpl {
    #[error("{path}:{line}: {message}")]
    Diagnostic {
        path: String,
        line: u32,
        message: String,
    },
    #[error("entrypoint `{0}` not found in compiled source")]
    MissingEntrypoint(String),
}

impl Error {
    pub fn diagnostic(path: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self(ErrorImpl::Diagnostic {
            path: path.into(),
            line,
            message: message.into(),
        })
    }

    pub fn missing_entrypoint(name: impl Into<String>) -> Self {
        Self(ErrorImpl::MissingEntrypoint(name.into()))
    }
}

/// The contract the library builder drives for every emitted entrypoint.
///
/// A real implementation shells out to (or links against) the platform
/// compiler for `target`; see `shader_effects::builder::LibraryBuilder` for
/// the call site.
pub trait ShaderCompiler: fmt::Debug + Send + Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutput, Error>;
}

/// A reference [`ShaderCompiler`] used by `shader_effects`'s own
/// integration tests. It does not invoke a real backend: it "compiles" by
/// hashing the source text into a deterministic byte sequence and reflects
/// whatever the caller pre-registered for that entrypoint, so tests can
/// assert on the builder's behavior without a platform toolchain.
#[derive(Debug, Default)]
pub struct TestCompiler {
    reflections: Mutex<HashMap<(Stage, String), ShaderReflection>>,
    /// The exact source text the builder generated for each compiled
    /// entrypoint, kept so tests can assert on what the generator actually
    /// produced rather than only on a pre-registered reflection.
    compiled_sources: Mutex<HashMap<(Stage, String), String>>,
}

impl TestCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the reflection data to hand back the next time `entry_name`
    /// at `stage` is compiled.
    pub fn set_reflection(
        &self,
        stage: Stage,
        entry_name: impl Into<String>,
        reflection: ShaderReflection,
    ) {
        self.reflections
            .lock()
            .unwrap()
            .insert((stage, entry_name.into()), reflection);
    }

    /// Returns the source text most recently handed to this compiler for
    /// `entry_name` at `stage`, if it has been compiled.
    pub fn compiled_source(&self, stage: Stage, entry_name: &str) -> Option<String> {
        self.compiled_sources
            .lock()
            .unwrap()
            .get(&(stage, entry_name.to_string()))
            .cloned()
    }
}

impl ShaderCompiler for TestCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompileOutput, Error> {
        if !request.src_text.contains(request.entry_name) {
            return Err(Error::missing_entrypoint(request.entry_name));
        }

        self.compiled_sources.lock().unwrap().insert(
            (request.stage, request.entry_name.to_string()),
            request.src_text.to_string(),
        );

        let reflection = self
            .reflections
            .lock()
            .unwrap()
            .get(&(request.stage, request.entry_name.to_string()))
            .cloned()
            .unwrap_or_default();

        Ok(CompileOutput {
            bytecode: fnv1a_bytes(request.src_text),
            reflection,
        })
    }
}

/// A small deterministic byte sequence derived from `text`, standing in for
/// the platform compiler's bytecode output. Two identical sources always
/// produce identical bytes, which is exactly the property the registry's
/// bytecode deduplication (spec.md §4.B) relies on.
fn fnv1a_bytes(text: &str) -> Vec<u8> {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash.to_le_bytes().to_vec()
}
