use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::calculation::{Calculation, CalculationType};
use crate::request::MessageError;
use crate::slurm::job::{validate_memory, validate_wall_time};

/// Optional per-request overrides of the batch script defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Resources {
    /// SLURM `HH:MM:SS`
    pub wall_time: Option<String>,
    pub memory: Option<String>,
}

/// A calculation someone wants run on the cluster
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobRequest {
    /// XYZ structure file
    pub input: PathBuf,
    #[serde(default)]
    pub job_name: Option<String>,
    pub calculation_type: CalculationType,
    pub method: String,
    pub basis_set: String,
    pub charge: i32,
    pub multiplicity: u8,
    /// Optimisation flavour passed through to the calculation program
    #[serde(default)]
    pub opt_type: Option<String>,
    /// JSON file of extra program keywords
    #[serde(default)]
    pub keywords: Option<PathBuf>,
    #[serde(default)]
    pub resources: Resources,
}

impl JobRequest {
    pub fn calculation(&self) -> Calculation {
        Calculation {
            calculation_type: self.calculation_type.clone(),
            method: self.method.clone(),
            basis_set: self.basis_set.clone(),
            charge: self.charge,
            multiplicity: self.multiplicity,
        }
    }

    /// File name of the structure, as recorded on the job
    pub fn input_file_name(&self) -> String {
        self.input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Make relative file paths relative to `base` instead of the process directory
    pub fn resolve(mut self, base: &Path) -> Self {
        if self.input.is_relative() {
            self.input = base.join(&self.input);
        }
        if let Some(keywords) = self.keywords.as_mut() {
            if keywords.is_relative() {
                *keywords = base.join(&*keywords);
            }
        }
        self
    }

    /// Checks that need the filesystem or go beyond what the schema says
    pub fn validate(&self) -> Result<(), MessageError> {
        let is_xyz = self
            .input
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("xyz"));
        if !is_xyz {
            return Err(MessageError::Rejected(format!("input {} is not an .xyz file", self.input.display())));
        }
        if !self.input.is_file() {
            return Err(MessageError::Rejected(format!("input {} doesn't exist", self.input.display())));
        }
        if let Some(keywords) = &self.keywords {
            if !keywords.is_file() {
                return Err(MessageError::Rejected(format!("keywords file {} doesn't exist", keywords.display())));
            }
        }
        if self.multiplicity < 1 {
            return Err(MessageError::Rejected("multiplicity must be at least 1".to_string()));
        }
        if self.method.trim().is_empty() || self.basis_set.trim().is_empty() {
            return Err(MessageError::Rejected("method and basis set are required".to_string()));
        }
        if let Some(wall_time) = &self.resources.wall_time {
            validate_wall_time(wall_time)
                .map_err(|_| MessageError::Rejected(format!("wall time {wall_time:?} isn't a SLURM time limit")))?;
        }
        if let Some(memory) = &self.resources.memory {
            validate_memory(memory)
                .map_err(|_| MessageError::Rejected(format!("memory {memory:?} isn't a SLURM memory size")))?;
        }
        Ok(())
    }
}
