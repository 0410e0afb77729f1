//! Compiled-in QP backends and the name registry.
//!
//! `riccati` is always available. The interior-point backends built on
//! Clarabel are behind the `clarabel` feature (on by default).

mod riccati;

pub use riccati::{RiccatiBackend, RiccatiSettings};

#[cfg(feature = "clarabel")]
mod conic;
#[cfg(feature = "clarabel")]
mod condensing;
#[cfg(feature = "clarabel")]
mod sparse;

#[cfg(feature = "clarabel")]
pub use conic::ClarabelSettings;
#[cfg(feature = "clarabel")]
pub use condensing::CondensingClarabelBackend;
#[cfg(feature = "clarabel")]
pub use sparse::SparseClarabelBackend;

use crate::backend::{BackendOptions, BackendSettings, QpBackend};
use crate::dims::OcpQpDims;
use crate::error::{OcpError, OcpResult};

/// Identifies one compiled-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Backward Riccati recursion for unconstrained problems.
    Riccati,
    /// Full-space interior point on the sparse stage structure.
    #[cfg(feature = "clarabel")]
    SparseClarabel,
    /// Interior point on the state-eliminated (condensed) problem.
    #[cfg(feature = "clarabel")]
    CondensingClarabel,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Riccati => "riccati",
            #[cfg(feature = "clarabel")]
            BackendKind::SparseClarabel => "sparse_clarabel",
            #[cfg(feature = "clarabel")]
            BackendKind::CondensingClarabel => "condensing_clarabel",
        }
    }

    /// Look a backend up by registry name.
    pub fn from_name(name: &str) -> OcpResult<Self> {
        registry()
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| OcpError::UnsupportedBackend(name.to_string()))
    }

    /// Whether [`QpBackend::warm_start`] changes anything for this backend.
    ///
    /// Riccati is a direct method. Clarabel exposes no initial-point input.
    pub fn supports_warm_start(self) -> bool {
        match self {
            BackendKind::Riccati => false,
            #[cfg(feature = "clarabel")]
            BackendKind::SparseClarabel | BackendKind::CondensingClarabel => false,
        }
    }

    /// Default settings for this backend.
    pub fn default_config(self) -> BackendConfig {
        match self {
            BackendKind::Riccati => BackendConfig::Riccati(RiccatiSettings::default()),
            #[cfg(feature = "clarabel")]
            BackendKind::SparseClarabel | BackendKind::CondensingClarabel => {
                BackendConfig::Clarabel { kind: self, settings: ClarabelSettings::default() }
            }
        }
    }
}

fn registry() -> Vec<BackendKind> {
    #[allow(unused_mut)]
    let mut kinds = vec![BackendKind::Riccati];
    #[cfg(feature = "clarabel")]
    {
        kinds.push(BackendKind::SparseClarabel);
        kinds.push(BackendKind::CondensingClarabel);
    }
    kinds
}

/// Names of all backends compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    registry().into_iter().map(BackendKind::name).collect()
}

/// Backend settings before the backend memory is created.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Riccati(RiccatiSettings),
    #[cfg(feature = "clarabel")]
    Clarabel { kind: BackendKind, settings: ClarabelSettings },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Riccati(_) => BackendKind::Riccati,
            #[cfg(feature = "clarabel")]
            BackendConfig::Clarabel { kind, .. } => *kind,
        }
    }

    /// Apply caller options; unknown keys and ill-typed values are errors.
    pub fn apply_options(&mut self, options: &BackendOptions) -> OcpResult<()> {
        let name = self.kind().name();
        let res = match self {
            BackendConfig::Riccati(s) => s.apply_options(options),
            #[cfg(feature = "clarabel")]
            BackendConfig::Clarabel { settings, .. } => settings.apply_options(options),
        };
        res.map_err(|e| match e {
            OcpError::UnknownOption { key, .. } => OcpError::UnknownOption { backend: name.to_string(), key },
            other => other,
        })
    }

    /// Check capabilities against `dims` and create the backend memory.
    pub fn build(self, dims: &OcpQpDims) -> OcpResult<Box<dyn QpBackend>> {
        if dims.has_slacks() {
            return Err(OcpError::Usage(format!(
                "QP solver '{}' does not support soft constraints (ns > 0)",
                self.kind().name()
            )));
        }
        let backend: Box<dyn QpBackend> = match self {
            BackendConfig::Riccati(s) => Box::new(RiccatiBackend::new(dims, s)?),
            #[cfg(feature = "clarabel")]
            BackendConfig::Clarabel { kind: BackendKind::CondensingClarabel, settings } => {
                Box::new(CondensingClarabelBackend::new(dims, settings))
            }
            #[cfg(feature = "clarabel")]
            BackendConfig::Clarabel { settings, .. } => Box::new(SparseClarabelBackend::new(dims, settings)),
        };
        Ok(backend)
    }
}
