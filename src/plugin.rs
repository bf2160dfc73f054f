//! Plugin discovery: locate the backend plugin of the companion package.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;
use crate::graphql::{GraphqlClient, GraphqlRequest, PLUGIN_PACKAGES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginKind {
    PluginBackend,
    PluginFrontend,
    PluginWorkflow,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    #[serde(rename = "__typename")]
    pub kind: PluginKind,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub manifest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginPackage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub installed_at: Option<String>,
    #[serde(default)]
    pub manifest_id: Option<String>,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

impl PluginPackage {
    fn matches(&self, name: &str, keyword: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n == name || n.contains(keyword))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackagesData {
    #[serde(default)]
    plugin_packages: Option<Vec<PluginPackage>>,
}

#[derive(Debug, Clone)]
pub struct PluginDiscovery {
    graphql: GraphqlClient,
    package_name: String,
    package_keyword: String,
}

impl PluginDiscovery {
    pub fn new(
        graphql: GraphqlClient,
        package_name: impl Into<String>,
        package_keyword: impl Into<String>,
    ) -> Self {
        Self {
            graphql,
            package_name: package_name.into(),
            package_keyword: package_keyword.into(),
        }
    }

    /// Every installed plugin package, as reported by the instance.
    pub async fn list_packages(&self, bearer: Option<&str>) -> Result<Vec<PluginPackage>, BridgeError> {
        let request = GraphqlRequest::new(PLUGIN_PACKAGES).operation("pluginPackages");
        let data: PackagesData = self.graphql.execute(&request, bearer).await.map_err(|e| {
            tracing::error!("Failed to get plugin info: {e}");
            BridgeError::RemoteCallFailed(format!("Failed to get plugin info: {e}"))
        })?;
        let packages = data.plugin_packages.unwrap_or_default();
        tracing::info!("Retrieved {} plugin packages", packages.len());
        Ok(packages)
    }

    /// Resolve the id of the backend plugin to forward calls to. Not cached: the
    /// plugin may be reinstalled between calls.
    pub async fn resolve_backend_plugin_id(&self, bearer: Option<&str>) -> Result<String, BridgeError> {
        let packages = self.list_packages(bearer).await?;
        let plugin_id = select_backend_plugin(&packages, &self.package_name, &self.package_keyword)?;
        tracing::info!(plugin_id = %plugin_id, "Found backend plugin");
        Ok(plugin_id)
    }
}

/// First package named `name` or containing `keyword`, then its first backend plugin.
pub fn select_backend_plugin(
    packages: &[PluginPackage],
    name: &str,
    keyword: &str,
) -> Result<String, BridgeError> {
    if packages.is_empty() {
        return Err(BridgeError::PluginNotFound);
    }
    let package = packages
        .iter()
        .find(|p| p.matches(name, keyword))
        .ok_or_else(|| BridgeError::PackageNotFound(name.to_string()))?;
    package
        .plugins
        .iter()
        .find(|p| p.kind == PluginKind::PluginBackend)
        .map(|p| p.id.clone())
        .ok_or_else(|| BridgeError::BackendNotFound(name.to_string()))
}
