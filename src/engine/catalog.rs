//! Per-turn snapshot of every tool offered by the live providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::error::ProviderError;
use crate::engine::provider::{ToolDescriptor, ToolProvider};

/// Tool advertisement handed to the model endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Clone)]
pub struct CatalogEntry {
    pub descriptor: ToolDescriptor,
    pub provider: Arc<dyn ToolProvider>,
}

/// Two providers offered the same tool name; `winner` answers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub tool: String,
    pub shadowed: String,
    pub winner: String,
}

/// Name to provider lookup.
///
/// Immutable once built: a turn dispatches against the snapshot taken at its
/// start even if providers change their offerings mid-turn.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
    collisions: Vec<Collision>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` under its name. A later registration replaces an
    /// earlier one with the same name (last registered wins); the displaced
    /// provider is recorded in [`ToolCatalog::collisions`].
    pub fn insert(&mut self, descriptor: ToolDescriptor, provider: Arc<dyn ToolProvider>) {
        let name = descriptor.name.clone();
        let entry = CatalogEntry {
            descriptor,
            provider,
        };
        match self.index.get(&name) {
            Some(&position) => {
                let previous = std::mem::replace(&mut self.entries[position], entry);
                let collision = Collision {
                    tool: name,
                    shadowed: previous.provider.id().to_string(),
                    winner: self.entries[position].provider.id().to_string(),
                };
                warn!(
                    tool = %collision.tool,
                    shadowed = %collision.shadowed,
                    winner = %collision.winner,
                    "Duplicate tool name; later provider wins"
                );
                self.collisions.push(collision);
            }
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&position| &self.entries[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries
            .iter()
            .map(|entry| ToolSchema {
                name: entry.descriptor.name.clone(),
                description: entry.descriptor.description.clone(),
                parameters: entry.descriptor.parameters.clone(),
            })
            .collect()
    }
}

async fn list_with_timeout(
    provider: &dyn ToolProvider,
    timeout: Option<Duration>,
) -> Result<Vec<ToolDescriptor>, ProviderError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, provider.list_tools())
            .await
            .map_err(|_| ProviderError::Rpc("tool listing timed out".to_string()))?,
        None => provider.list_tools().await,
    }
}

/// Queries every provider for its tools and merges the answers.
///
/// Listings run concurrently, but registration follows the order of
/// `providers`, so the collision tie-break does not depend on which provider
/// answered first. A provider whose listing fails is left out for this turn
/// without affecting the others.
pub async fn build_catalog(
    providers: &[Arc<dyn ToolProvider>],
    listing_timeout: Option<Duration>,
) -> ToolCatalog {
    let listings = join_all(
        providers
            .iter()
            .map(|provider| list_with_timeout(provider.as_ref(), listing_timeout)),
    )
    .await;

    let mut catalog = ToolCatalog::new();
    for (provider, listing) in providers.iter().zip(listings) {
        match listing {
            Ok(tools) => {
                debug!(provider = %provider.id(), tools = tools.len(), "Registered provider tools");
                for descriptor in tools {
                    catalog.insert(descriptor, provider.clone());
                }
            }
            Err(err) => {
                warn!(provider = %provider.id(), error = %err, "Tool listing failed; provider skipped for this turn");
            }
        }
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeProvider;

    fn providers(list: Vec<FakeProvider>) -> Vec<Arc<dyn ToolProvider>> {
        list.into_iter()
            .map(|provider| Arc::new(provider) as Arc<dyn ToolProvider>)
            .collect()
    }

    #[tokio::test]
    async fn empty_provider_list_builds_empty_catalog() {
        let catalog = build_catalog(&[], None).await;
        assert!(catalog.is_empty());
        assert!(catalog.schemas().is_empty());
    }

    #[tokio::test]
    async fn failing_listing_does_not_hide_other_providers() {
        let list = providers(vec![
            FakeProvider::new("fs").with_tool("read_file", "contents"),
            FakeProvider::new("broken")
                .with_tool("explode", "never")
                .failing_listing(),
            FakeProvider::new("image").with_tool("generate_image", "done"),
        ]);

        let catalog = build_catalog(&list, None).await;

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("read_file"));
        assert!(catalog.contains("generate_image"));
        assert!(!catalog.contains("explode"));
    }

    #[tokio::test]
    async fn all_listings_failing_yields_empty_catalog() {
        let list = providers(vec![
            FakeProvider::new("a").with_tool("x", "").failing_listing(),
            FakeProvider::new("b").with_tool("y", "").failing_listing(),
        ]);
        assert!(build_catalog(&list, None).await.is_empty());
    }

    #[tokio::test]
    async fn last_registered_provider_wins_on_name_collision() {
        let list = providers(vec![
            FakeProvider::new("first").with_tool("search", "from first"),
            FakeProvider::new("second").with_tool("search", "from second"),
        ]);

        let catalog = build_catalog(&list, None).await;

        assert_eq!(catalog.len(), 1);
        let entry = catalog.get("search").expect("search registered");
        assert_eq!(entry.provider.id(), "second");
        assert_eq!(
            catalog.collisions(),
            &[Collision {
                tool: "search".to_string(),
                shadowed: "first".to_string(),
                winner: "second".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn slow_listing_is_dropped_after_timeout() {
        let list = providers(vec![
            FakeProvider::new("slow")
                .with_tool("wait", "")
                .with_listing_delay(Duration::from_secs(5)),
            FakeProvider::new("fast").with_tool("now", ""),
        ]);

        let catalog = build_catalog(&list, Some(Duration::from_millis(20))).await;

        assert!(catalog.contains("now"));
        assert!(!catalog.contains("wait"));
    }

    #[test]
    fn schemas_follow_registration_order() {
        let provider: Arc<dyn ToolProvider> = Arc::new(FakeProvider::new("p"));
        let mut catalog = ToolCatalog::new();
        catalog.insert(
            ToolDescriptor::new("b", None, serde_json::json!({})),
            provider.clone(),
        );
        catalog.insert(
            ToolDescriptor::new("a", Some("desc".to_string()), serde_json::json!({})),
            provider,
        );
        let names: Vec<String> = catalog.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
