//! Explicit compiler context.
//!
//! All process-wide configuration lives here and is passed by reference:
//! the selected architecture and its hardware description. There is no
//! global mutable state anywhere in the core; the logger is the standard
//! `log` facade initialized by the driver binary.

use super::arch::{ArchDesc, ArchKind};
use super::error::{CompileError, CompileResult};

/// Configuration shared by every pass of one compilation.
#[derive(Debug, Clone)]
pub struct CompilerContext {
    arch: ArchDesc,
}

impl CompilerContext {
    pub fn new(kind: ArchKind) -> Self {
        Self {
            arch: ArchDesc::new(kind),
        }
    }

    /// Build a context over an explicit hardware description (tests tweak
    /// the limits this way).
    pub fn from_desc(arch: ArchDesc) -> Self {
        Self { arch }
    }

    /// Parse the architecture from its CLI name.
    pub fn from_arch_name(name: &str) -> CompileResult<Self> {
        let kind = ArchKind::parse(name).ok_or_else(|| CompileError::UnknownArch {
            name: name.to_string(),
        })?;
        Ok(Self::new(kind))
    }

    pub fn arch(&self) -> &ArchDesc {
        &self.arch
    }

    pub fn arch_kind(&self) -> ArchKind {
        self.arch.kind
    }
}
