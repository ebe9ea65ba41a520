//! Profile metadata and the per-command applicability gates
use crate::error::AnalysisError;
use crate::memory::Arch;
use std::collections::HashMap;

/// Key/value description of the snapshot's kernel (`os`, `arch`, `version`, ...)
#[derive(Debug, Clone, Default)]
pub struct Profile {
    metadata: HashMap<String, String>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn os(&self) -> Option<&str> {
        self.get("os")
    }

    pub fn arch(&self) -> Option<&str> {
        self.get("arch")
    }

    /// The architecture as a typed value, if the metadata names a supported one
    pub fn arch_kind(&self) -> Option<Arch> {
        self.arch()?.parse().ok()
    }
}

/// Which operating-system/architecture combinations a command accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileGate {
    Linux,
    LinuxIntel,
    LinuxArm,
}

impl ProfileGate {
    pub fn is_valid_profile(&self, profile: &Profile) -> bool {
        let is_linux = profile
            .os()
            .map(|os| os.eq_ignore_ascii_case("linux"))
            .unwrap_or(false);
        if !is_linux {
            return false;
        }

        let arch = profile.arch().map(str::to_ascii_lowercase);
        match self {
            ProfileGate::Linux => true,
            ProfileGate::LinuxIntel => matches!(arch.as_deref(), Some("x86") | Some("x64")),
            ProfileGate::LinuxArm => arch.as_deref() == Some("arm"),
        }
    }

    /// Fail fast before a command touches the snapshot
    pub fn check(&self, profile: &Profile) -> Result<(), AnalysisError> {
        if self.is_valid_profile(profile) {
            Ok(())
        } else {
            Err(AnalysisError::ProfileMismatch {
                os: profile.os().unwrap_or("Unknown").to_string(),
                arch: profile.arch().unwrap_or("Unknown").to_string(),
            })
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ProfileGate::Linux => "Linux",
            ProfileGate::LinuxIntel => "Linux x86/x64",
            ProfileGate::LinuxArm => "Linux ARM",
        }
    }
}
