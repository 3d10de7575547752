use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FullName, ParseError};
use crate::bucket::normalize_path;

/// Contents of `protomodule.toml`: the local modules of a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceDescriptor {
    #[serde(default)]
    pub modules: Vec<WorkspaceModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceModule {
    /// Directory of the module, relative to the workspace root.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<FullName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
}

impl WorkspaceDescriptor {
    pub fn from_file(path: &Path) -> Result<WorkspaceDescriptor, ParseError> {
        WorkspaceDescriptor::from_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_str(s: &str) -> Result<WorkspaceDescriptor, ParseError> {
        let descriptor: WorkspaceDescriptor = toml::from_str(s)?;
        for module in &descriptor.modules {
            if module.commit.is_some() && module.name.is_none() {
                return Err(ParseError::MissingKey(format!(
                    "modules.name for {}",
                    module.path.display()
                )));
            }
            module.commit_id()?;
            module.bucket_id()?;
        }
        Ok(descriptor)
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl WorkspaceModule {
    /// The module's bucket id: its normalized path with `/` separators, or
    /// `.` for the workspace root.
    pub fn bucket_id(&self) -> Result<String, ParseError> {
        let path = self
            .path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let normalized = normalize_path(&path).map_err(ParseError::InvalidPath)?;
        if normalized.is_empty() {
            Ok(".".to_string())
        } else {
            Ok(normalized)
        }
    }

    pub fn commit_id(&self) -> Result<Option<Uuid>, ParseError> {
        self.commit
            .as_deref()
            .map(|commit| {
                Uuid::parse_str(commit).map_err(|_| ParseError::InvalidCommitId(commit.to_string()))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_valid_descriptor() {
        let text = r#"
[[modules]]
path = "proto/petapis"
name = "buf.build/acme/petapis"
description = "Pet store APIs"
includes = ["acme/pet"]
excludes = ["acme/pet/internal"]

[[modules]]
path = "proto/money"
name = "buf.build/acme/money"
commit = "6f1c9b1e2d1f4a478d435f0e1c0b9d2a"

[[modules]]
path = "./vendor/local"
"#;
        let descriptor = WorkspaceDescriptor::from_str(text).unwrap();
        assert_eq!(
            descriptor,
            WorkspaceDescriptor {
                modules: vec![
                    WorkspaceModule {
                        path: "proto/petapis".into(),
                        name: Some(FullName::parse("buf.build/acme/petapis").unwrap()),
                        commit: None,
                        description: Some("Pet store APIs".to_string()),
                        includes: vec!["acme/pet".to_string()],
                        excludes: vec!["acme/pet/internal".to_string()],
                    },
                    WorkspaceModule {
                        path: "proto/money".into(),
                        name: Some(FullName::parse("buf.build/acme/money").unwrap()),
                        commit: Some("6f1c9b1e2d1f4a478d435f0e1c0b9d2a".to_string()),
                        description: None,
                        includes: vec![],
                        excludes: vec![],
                    },
                    WorkspaceModule {
                        path: "./vendor/local".into(),
                        name: None,
                        commit: None,
                        description: None,
                        includes: vec![],
                        excludes: vec![],
                    },
                ]
            }
        );
        let commit_id = descriptor.modules[1].commit_id().unwrap().unwrap();
        assert_eq!(
            commit_id.simple().to_string(),
            "6f1c9b1e2d1f4a478d435f0e1c0b9d2a"
        );
        assert_eq!(descriptor.modules[0].bucket_id().unwrap(), "proto/petapis");
        assert_eq!(descriptor.modules[2].bucket_id().unwrap(), "vendor/local");
    }

    #[test]
    fn descriptor_round_trip() {
        let descriptor = WorkspaceDescriptor {
            modules: vec![WorkspaceModule {
                path: "proto".into(),
                name: Some(FullName::parse("buf.build/acme/weather").unwrap()),
                commit: None,
                description: None,
                includes: vec![],
                excludes: vec![],
            }],
        };
        let text = descriptor.to_string().unwrap();
        assert_eq!(WorkspaceDescriptor::from_str(&text).unwrap(), descriptor);
    }

    #[test]
    fn equivalent_paths_share_a_bucket_id() {
        let module = |path: &str| WorkspaceModule {
            path: path.into(),
            name: None,
            commit: None,
            description: None,
            includes: vec![],
            excludes: vec![],
        };
        assert_eq!(module("proto").bucket_id().unwrap(), "proto");
        assert_eq!(module("./proto").bucket_id().unwrap(), "proto");
        assert_eq!(module("proto/../proto/").bucket_id().unwrap(), "proto");
        assert_eq!(module(".").bucket_id().unwrap(), ".");
        assert!(matches!(
            module("../outside").bucket_id(),
            Err(ParseError::InvalidPath(_))
        ));
    }

    #[test]
    fn reject_invalid_modules() {
        let invalid_name = r#"
[[modules]]
path = "proto"
name = "acme/weather"
"#;
        assert!(WorkspaceDescriptor::from_str(invalid_name).is_err());

        let commit_without_name = r#"
[[modules]]
path = "proto"
commit = "6f1c9b1e2d1f4a478d435f0e1c0b9d2a"
"#;
        assert!(matches!(
            WorkspaceDescriptor::from_str(commit_without_name),
            Err(ParseError::MissingKey(_))
        ));

        let invalid_commit = r#"
[[modules]]
path = "proto"
name = "buf.build/acme/weather"
commit = "main"
"#;
        assert!(matches!(
            WorkspaceDescriptor::from_str(invalid_commit),
            Err(ParseError::InvalidCommitId(_))
        ));

        let outside_root = r#"
[[modules]]
path = "../proto"
"#;
        assert!(matches!(
            WorkspaceDescriptor::from_str(outside_root),
            Err(ParseError::InvalidPath(_))
        ));
    }
}
