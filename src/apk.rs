//! Static attribute extraction from an APK's manifest.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use zip::ZipArchive;

use crate::axml::{self, XmlEvent};
use crate::error::ApkParseError;

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// Everything read from one APK manifest. Lives only for one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApkDescriptor {
    pub package: Option<String>,
    pub permissions: BTreeSet<String>,
    pub activities: BTreeSet<String>,
    pub receivers: BTreeSet<String>,
    pub services: BTreeSet<String>,
    pub providers: BTreeSet<String>,
    pub intent_actions: BTreeSet<String>,
}

impl ApkDescriptor {
    /// Open `path` as a zip archive and decode its manifest.
    pub fn from_path(path: &Path) -> Result<Self, ApkParseError> {
        let file = File::open(path).map_err(|source| ApkParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut zip = ZipArchive::new(file)?;
        let mut entry = match zip.by_name(MANIFEST_ENTRY) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ApkParseError::MissingManifest)
            }
            Err(e) => return Err(e.into()),
        };
        let mut manifest = Vec::new();
        entry.read_to_end(&mut manifest)?;
        log::debug!("Read {} bytes of manifest from {}", manifest.len(), path.display());

        Self::from_manifest(&manifest)
    }

    /// Decode a binary `AndroidManifest.xml`.
    pub fn from_manifest(data: &[u8]) -> Result<Self, ApkParseError> {
        let events = axml::parse(data)?;
        Ok(Self::from_events(&events))
    }

    fn from_events(events: &[XmlEvent]) -> Self {
        let mut descriptor = Self::default();
        let mut stack: Vec<&str> = Vec::new();
        // Component names are collected raw and resolved once the package is known.
        let mut raw_components: Vec<(&str, &str)> = Vec::new();

        for event in events {
            match event {
                XmlEvent::StartElement { name, .. } => {
                    let value = event.attribute("name");
                    match (name.as_str(), value) {
                        ("manifest", _) => {
                            descriptor.package = event.attribute("package").map(str::to_string);
                        }
                        ("uses-permission" | "uses-permission-sdk-23", Some(permission)) => {
                            descriptor.permissions.insert(permission.to_string());
                        }
                        (
                            kind @ ("activity" | "receiver" | "service" | "provider"),
                            Some(component),
                        ) if stack.last() == Some(&"application") => {
                            raw_components.push((kind, component));
                        }
                        ("action", Some(action)) if in_activity_filter(&stack) => {
                            descriptor.intent_actions.insert(action.to_string());
                        }
                        _ => {}
                    }
                    stack.push(name.as_str());
                }
                XmlEvent::EndElement { .. } => {
                    stack.pop();
                }
                XmlEvent::Text(_) => {}
            }
        }

        let package = descriptor.package.clone();
        for (kind, component) in raw_components {
            let resolved = resolve_component_name(package.as_deref(), component);
            let set = match kind {
                "activity" => &mut descriptor.activities,
                "receiver" => &mut descriptor.receivers,
                "service" => &mut descriptor.services,
                _ => &mut descriptor.providers,
            };
            set.insert(resolved);
        }

        descriptor
    }

    /// Union of all six attribute categories.
    pub fn attributes(&self) -> HashSet<String> {
        self.permissions
            .iter()
            .chain(&self.activities)
            .chain(&self.receivers)
            .chain(&self.services)
            .chain(&self.providers)
            .chain(&self.intent_actions)
            .cloned()
            .collect()
    }
}

fn in_activity_filter(stack: &[&str]) -> bool {
    matches!(stack, [.., "activity", "intent-filter"])
}

/// `.Foo` and bare `Foo` are relative to the manifest package.
pub fn resolve_component_name(package: Option<&str>, name: &str) -> String {
    match package {
        Some(pkg) if name.starts_with('.') => format!("{pkg}{name}"),
        Some(pkg) if !name.contains('.') => format!("{pkg}.{name}"),
        _ => name.to_string(),
    }
}

/// Extract the static attribute set of the APK at `path`.
pub fn extract_static_features(path: &Path) -> Result<HashSet<String>, ApkParseError> {
    let descriptor = ApkDescriptor::from_path(path)?;
    log::info!(
        "Extracted {} permissions, {} activities, {} receivers, {} services, {} providers, {} intent actions from {}",
        descriptor.permissions.len(),
        descriptor.activities.len(),
        descriptor.receivers.len(),
        descriptor.services.len(),
        descriptor.providers.len(),
        descriptor.intent_actions.len(),
        path.display()
    );
    Ok(descriptor.attributes())
}
