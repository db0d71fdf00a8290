use anyhow::{Context, Result, anyhow, bail};
use include_dir::{Dir, include_dir};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::{info, warn};

use super::ToolManifest;
use crate::tools::descriptor::{DEFAULT_TENANT, ToolDescriptor, ToolSource, normalize_tool_name};

pub const MANIFEST_FILE: &str = "tool.toml";

static EMBEDDED: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/tools/builtin/manifests");

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Tenant ids and tool names double as directory names.
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if !SEGMENT.is_match(value) {
        bail!("Invalid {} '{}': only letters, digits, '_' and '-' are allowed", kind, value);
    }
    Ok(())
}

/// Manifests compiled into the binary, registered for the `default` tenant.
pub fn embedded_tools(client: &reqwest::Client) -> Result<Vec<ToolDescriptor>> {
    let mut tools = Vec::new();
    for dir in EMBEDDED.dirs() {
        let path = dir.path().join(MANIFEST_FILE);
        let Some(file) = EMBEDDED.get_file(&path) else {
            continue;
        };
        let text = file
            .contents_utf8()
            .ok_or_else(|| anyhow!("embedded manifest {:?} is not UTF-8", path))?;
        let manifest = ToolManifest::parse(text).with_context(|| format!("embedded manifest {:?}", path))?;
        let source = ToolSource::Embedded(path.display().to_string());
        tools.push(manifest.into_descriptor(DEFAULT_TENANT, source, client)?);
    }
    Ok(tools)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installed {
    New(semver::Version),
    Upgraded {
        from: semver::Version,
        to: semver::Version,
    },
}

/// Tenant manifests on disk: `<root>/<tenant>/<tool>/tool.toml`.
#[derive(Clone)]
pub struct CustomToolStore {
    root: PathBuf,
    client: reqwest::Client,
}

impl CustomToolStore {
    pub fn new(root: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &str) -> Result<PathBuf> {
        validate_segment("tenant id", tenant)?;
        if tenant == DEFAULT_TENANT {
            bail!("The '{}' tenant is reserved for built-in tools", DEFAULT_TENANT);
        }
        Ok(self.root.join(tenant))
    }

    fn tool_dir(&self, tenant: &str, tool: &str) -> Result<PathBuf> {
        validate_segment("tool name", tool)?;
        Ok(self.tenant_dir(tenant)?.join(normalize_tool_name(tool)))
    }

    async fn read_manifest(path: &Path) -> Result<ToolManifest> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read manifest at {:?}", path))?;
        ToolManifest::parse(&text).with_context(|| format!("Failed to parse manifest at {:?}", path))
    }

    fn describe(&self, tenant: &str, manifest: ToolManifest, path: PathBuf) -> Result<ToolDescriptor> {
        manifest.into_descriptor(tenant, ToolSource::Custom(path), &self.client)
    }

    /// Installs a new manifest or upgrades an existing one. An upgrade must
    /// carry a strictly greater version.
    pub async fn install(&self, tenant: &str, content: &str) -> Result<(ToolDescriptor, Installed)> {
        let manifest = ToolManifest::parse(content)?;
        let new_version = manifest.semver()?;
        let tool_dir = self.tool_dir(tenant, &manifest.name)?;
        let manifest_path = tool_dir.join(MANIFEST_FILE);

        let outcome = if manifest_path.exists() {
            let current = Self::read_manifest(&manifest_path)
                .await
                .ok()
                .and_then(|m| m.semver().ok())
                .unwrap_or_else(|| semver::Version::new(0, 0, 0));
            if new_version <= current {
                return Err(anyhow!(
                    "Upgrade rejected: New version {} is not strictly greater than current version {} for tool {}",
                    new_version,
                    current,
                    manifest.name
                ));
            }
            Installed::Upgraded {
                from: current,
                to: new_version,
            }
        } else {
            Installed::New(new_version)
        };

        // Build before writing so a manifest that cannot be registered never lands on disk.
        let descriptor = self.describe(tenant, manifest, manifest_path.clone())?;
        descriptor.schema_document()?;

        fs::create_dir_all(&tool_dir).await?;
        fs::write(&manifest_path, content).await?;
        match &outcome {
            Installed::New(version) => {
                info!("Installed custom tool {} {} for tenant {}", descriptor.name(), version, tenant)
            }
            Installed::Upgraded { from, to } => info!(
                "Upgraded custom tool {} from {} to {} for tenant {}",
                descriptor.name(),
                from,
                to,
                tenant
            ),
        }
        Ok((descriptor, outcome))
    }

    pub async fn remove(&self, tenant: &str, tool: &str) -> Result<()> {
        let tool_dir = self.tool_dir(tenant, tool)?;
        if !tool_dir.exists() {
            bail!("Custom tool {} not found for tenant {}", tool, tenant);
        }
        fs::remove_dir_all(&tool_dir).await?;
        info!("Removed custom tool {} for tenant {}", tool, tenant);
        Ok(())
    }

    /// Every readable manifest of one tenant. Broken manifests are skipped.
    pub async fn load_tenant(&self, tenant: &str) -> Result<Vec<ToolDescriptor>> {
        let tenant_dir = self.tenant_dir(tenant)?;
        let mut tools = Vec::new();
        if !tenant_dir.is_dir() {
            return Ok(tools);
        }

        let mut entries = fs::read_dir(&tenant_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let tool_dir = entry.path();
            let manifest_path = tool_dir.join(MANIFEST_FILE);
            if !tool_dir.is_dir() || !manifest_path.exists() {
                continue;
            }
            let loaded = match Self::read_manifest(&manifest_path).await {
                Ok(manifest) => self.describe(tenant, manifest, manifest_path.clone()),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(tool) => tools.push(tool),
                Err(e) => warn!("Skipping custom tool at {:?}: {:#}", manifest_path, e),
            }
        }
        Ok(tools)
    }

    pub async fn tenants(&self) -> Result<Vec<String>> {
        let mut tenants = Vec::new();
        if !self.root.is_dir() {
            return Ok(tenants);
        }
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_segment("tenant id", &name).is_ok() && name != DEFAULT_TENANT {
                tenants.push(name);
            } else {
                warn!("Ignoring directory {:?} in custom tool store", entry.path());
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    pub async fn load_all(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        for tenant in self.tenants().await? {
            tools.extend(self.load_tenant(&tenant).await?);
        }
        Ok(tools)
    }
}
