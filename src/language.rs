use std::collections::HashMap;

use anyhow::{Result, bail};
use serde::Deserialize;

/// Name of the file holding a test case's input inside the workspace
pub const INPUT_FILE_NAME: &str = "input.txt";

/// How one language is built and run inside a sandbox
///
/// `command` is a shell template: `%SOURCE%` expands to `file_name` and
/// `%INPUT%` to the input file. Compiled languages must route compiler
/// diagnostics into the captured output so the classifier can see them.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub name: String,
    pub image: String,
    pub file_name: String,
    pub command: String,
    #[serde(default = "default_compile_error_markers")]
    pub compile_error_markers: Vec<String>,
}

impl LanguageProfile {
    /// Renders the command template into the argv run inside the sandbox
    pub fn render_command(&self) -> Vec<String> {
        let mut mapping = HashMap::<&str, &str>::new();
        mapping.insert("%SOURCE%", &self.file_name);
        mapping.insert("%INPUT%", INPUT_FILE_NAME);

        let mut script = self.command.clone();
        for (k, v) in mapping.iter() {
            script = script.replace(k, v);
        }

        vec!["sh".to_string(), "-c".to_string(), script]
    }
}

pub fn default_compile_error_markers() -> Vec<String> {
    ["error:", "Error", "Exception"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Languages shipped when the configuration names none
pub fn default_languages() -> Vec<LanguageProfile> {
    vec![
        LanguageProfile {
            name: "JAVA".to_string(),
            image: "java-executor:latest".to_string(),
            file_name: "Solution.java".to_string(),
            command: "javac %SOURCE% 2> compile_error.txt && java Solution < %INPUT% \
                      || (cat compile_error.txt && exit 1)"
                .to_string(),
            compile_error_markers: default_compile_error_markers(),
        },
        LanguageProfile {
            name: "PYTHON".to_string(),
            image: "python-executor:latest".to_string(),
            file_name: "solution.py".to_string(),
            command: "python %SOURCE% < %INPUT%".to_string(),
            compile_error_markers: default_compile_error_markers(),
        },
    ]
}

/// Immutable set of supported languages, looked up case-insensitively
#[derive(Debug)]
pub struct LanguageRegistry {
    profiles: Vec<LanguageProfile>,
}

impl LanguageRegistry {
    pub fn new(profiles: Vec<LanguageProfile>) -> Result<Self> {
        for (idx, profile) in profiles.iter().enumerate() {
            if profile.command.trim().is_empty() {
                bail!("Language {} has an empty command", profile.name);
            }
            if profile.file_name.contains('/') {
                bail!(
                    "Language {} has a source file name with a path separator: {}",
                    profile.name,
                    profile.file_name
                );
            }
            if profiles[..idx]
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&profile.name))
            {
                bail!("Language {} is configured more than once", profile.name);
            }
        }

        Ok(Self { profiles })
    }

    pub fn find(&self, name: &str) -> Option<&LanguageProfile> {
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.name.as_str())
    }
}
