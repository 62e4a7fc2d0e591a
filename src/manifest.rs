//! Expected output artifacts of a calculation and time-limited URLs for each
//!
//! The artifact set is a pure function of the calculation type. URLs are signed on every call and
//! never stored, so rebuilding a manifest for the same job yields fresh, equivalent URLs.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::calculation::CalculationType;

/// Presigned S3 URLs
pub mod signer;

pub use signer::{ObjectSigner, S3Signer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Result,
    Error,
    Zip,
    Mol,
    Trajectory,
    Opt,
    Vib,
    Jdx,
    Esp,
    Molden,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Result => "result",
            ArtifactKind::Error => "error",
            ArtifactKind::Zip => "zip",
            ArtifactKind::Mol => "mol",
            ArtifactKind::Trajectory => "trajectory",
            ArtifactKind::Opt => "opt",
            ArtifactKind::Vib => "vib",
            ArtifactKind::Jdx => "jdx",
            ArtifactKind::Esp => "esp",
            ArtifactKind::Molden => "molden",
        }
    }

    /// Object key of this artifact for a job
    ///
    /// The bundled archive sits in `<root>/archive/`, everything else in `<root>/jobs/<job_id>/`.
    pub fn object_key(&self, root: &str, job_id: &str) -> String {
        let file = match self {
            ArtifactKind::Zip => return format!("{root}/archive/{job_id}.zip"),
            ArtifactKind::Result => "result.json",
            ArtifactKind::Error => "result.err",
            ArtifactKind::Mol => "input.xyz",
            ArtifactKind::Trajectory => "trajectory.xyz",
            ArtifactKind::Opt => "opt.xyz",
            ArtifactKind::Vib => "vib.xyz",
            ArtifactKind::Jdx => "ir.jdx",
            ArtifactKind::Esp => "esp.cube",
            ArtifactKind::Molden => "orbitals.molden",
        };
        format!("{root}/jobs/{job_id}/{file}")
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every artifact a calculation type produces, including `result`, `error` and `zip`
pub fn artifact_kinds(calculation_type: &CalculationType) -> Vec<ArtifactKind> {
    use ArtifactKind::*;

    let mut kinds = vec![Result, Error, Zip];
    let specific: &[ArtifactKind] = match calculation_type {
        CalculationType::Energy => &[Mol],
        CalculationType::Frequency => &[Vib, Jdx],
        CalculationType::Orbitals => &[Esp, Molden],
        CalculationType::Optimization | CalculationType::Transition | CalculationType::Irc => &[Trajectory, Opt],
        CalculationType::Standard => &[Trajectory, Opt, Esp, Molden, Vib, Jdx],
        CalculationType::Unrecognized(_) => &[],
    };
    kinds.extend_from_slice(specific);
    kinds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Upload URLs are handed to the cluster, download URLs to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    /// Only the error artifact exists for failed jobs
    Download(Outcome),
}

impl Direction {
    fn http_method(&self) -> HttpMethod {
        match self {
            Direction::Upload => HttpMethod::Put,
            Direction::Download(_) => HttpMethod::Get,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

/// Artifact kind to signed URL
///
/// Serialises to the flat JSON object the remote upload program reads, e.g.
/// `{"result": "https://...", "error": "https://...", "zip": "https://..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactManifest {
    #[serde(skip)]
    pub job_id: String,
    #[serde(skip)]
    pub direction: Direction,
    #[serde(flatten)]
    pub urls: BTreeMap<ArtifactKind, Url>,
    /// Unrecognized calculation types are echoed back on upload for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation_type: Option<String>,
}

impl ArtifactManifest {
    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.urls.keys().copied().collect()
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Url> {
        self.urls.get(&kind)
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("signer produced an invalid URL for {key}: {source}")]
    InvalidUrl {
        key: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid storage configuration: {0}")]
    Config(String),
}

/// Builds manifests under a fixed key root
pub struct ManifestBuilder {
    signer: Box<dyn ObjectSigner>,
    root: String,
}

impl ManifestBuilder {
    pub fn new(signer: Box<dyn ObjectSigner>, root: impl Into<String>) -> Self {
        ManifestBuilder { signer, root: root.into() }
    }

    pub fn build(
        &self,
        job_id: &str,
        calculation_type: &CalculationType,
        direction: Direction,
    ) -> Result<ArtifactManifest, ManifestError> {
        let kinds: Vec<ArtifactKind> = match direction {
            Direction::Upload => artifact_kinds(calculation_type),
            Direction::Download(Outcome::Failure) => vec![ArtifactKind::Error],
            Direction::Download(Outcome::Success) => artifact_kinds(calculation_type)
                .into_iter()
                .filter(|kind| *kind != ArtifactKind::Error)
                .collect(),
        };

        let mut urls = BTreeMap::new();
        for kind in kinds {
            let url = self.sign(&kind.object_key(&self.root, job_id), direction.http_method())?;
            urls.insert(kind, url);
        }

        let calculation_type = match direction {
            Direction::Upload if !calculation_type.is_recognized() => Some(calculation_type.as_str().to_string()),
            _ => None,
        };

        Ok(ArtifactManifest { job_id: job_id.to_string(), direction, urls, calculation_type })
    }

    /// Download URL of the bundled zip archive
    pub fn archive_url(&self, job_id: &str) -> Result<Url, ManifestError> {
        self.sign(&ArtifactKind::Zip.object_key(&self.root, job_id), HttpMethod::Get)
    }

    fn sign(&self, key: &str, method: HttpMethod) -> Result<Url, ManifestError> {
        let signed = self.signer.presign(key, method);
        Url::parse(&signed).map_err(|source| ManifestError::InvalidUrl { key: key.to_string(), source })
    }
}
