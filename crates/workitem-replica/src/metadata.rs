//! Item type metadata and icon cache.
//!
//! The [`MetadataManager`] keeps three things in step:
//!
//! - the persisted per-type entries in the [`MetadataStore`],
//! - an in-memory icon cache keyed by **URL** (several types may share an
//!   icon), seeded from the persisted entries so restarts do not re-download,
//! - the derived [`MetadataMap`] consumers read, replaced wholesale after
//!   every successful update and announced on `metadata-changed`.
//!
//! A failed icon download fails the whole update; icons cached by earlier
//! runs stay valid.

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use workitem_replica_core::models::{
    ItemTypeDefinition, MetadataEntry, MetadataMap, TypeMetadata,
};
use workitem_replica_core::remote::{IconFetcher, RemoteSource};
use workitem_replica_core::store::MetadataStore;

use crate::events::{topic, Emitter};
use crate::progress::SyncUpdate;

/// Outcome of [`MetadataManager::update_metadata_dictionary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdateSummary {
    pub type_count: usize,
    pub new_fetch_count: usize,
}

pub struct MetadataManager {
    store: Arc<dyn MetadataStore>,
    icons: Arc<dyn IconFetcher>,
    emitter: Arc<dyn Emitter>,
    cache: Mutex<HashMap<String, Arc<[u8]>>>,
    map: RwLock<Arc<MetadataMap>>,
}

/// MIME type sniffed from icon bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let head = head.trim_start();
    if bytes.starts_with(PNG) {
        "image/png"
    } else if head.starts_with("<svg") || head.starts_with("<?xml") {
        "image/svg+xml"
    } else {
        "application/octet-stream"
    }
}

/// Self-contained `data:` URL for icon bytes.
pub fn icon_data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), STANDARD.encode(bytes))
}

fn build_map(entries: &[MetadataEntry]) -> MetadataMap {
    entries
        .iter()
        .map(|entry| {
            (
                entry.type_name.clone(),
                TypeMetadata {
                    icon_url: entry.icon_url.clone(),
                    icon_data_url: icon_data_url(&entry.icon_bytes),
                    states: entry.states.clone(),
                },
            )
        })
        .collect()
}

impl MetadataManager {
    /// Load persisted metadata and seed the icon cache from it.
    pub async fn load(
        store: Arc<dyn MetadataStore>,
        icons: Arc<dyn IconFetcher>,
        emitter: Arc<dyn Emitter>,
    ) -> Result<Self> {
        let entries = store.load_metadata().await?;

        let cache: HashMap<String, Arc<[u8]>> = entries
            .iter()
            .map(|e| (e.icon_url.clone(), Arc::from(e.icon_bytes.as_slice())))
            .collect();
        tracing::info!(urls = cache.len(), "Icon cache restored");

        let manager = Self {
            store,
            icons,
            emitter,
            cache: Mutex::new(cache),
            map: RwLock::new(Arc::new(build_map(&entries))),
        };
        manager.announce();
        Ok(manager)
    }

    /// The current map. Replaced, never patched; hold the `Arc` freely.
    pub fn map(&self) -> Arc<MetadataMap> {
        self.map.read().unwrap().clone()
    }

    /// Download missing icons, persist one entry per enabled type, and
    /// replace the map.
    ///
    /// `on_progress(done, total)` fires after every type.
    pub async fn update_metadata_dictionary(
        &self,
        types: &[ItemTypeDefinition],
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<MetadataUpdateSummary> {
        let enabled: Vec<&ItemTypeDefinition> = types.iter().filter(|t| !t.is_disabled).collect();
        let total = enabled.len();
        let mut new_fetch_count = 0;
        let mut entries = Vec::with_capacity(total);

        for (i, def) in enabled.iter().enumerate() {
            let url = &def.icon.url;
            let cached = self.cache.lock().await.get(url).cloned();
            let bytes = match cached {
                Some(bytes) => bytes,
                None => {
                    let fetched: Arc<[u8]> = Arc::from(self.icons.fetch_icon(url).await?);
                    self.cache.lock().await.insert(url.clone(), fetched.clone());
                    new_fetch_count += 1;
                    fetched
                }
            };

            let entry = MetadataEntry::from_definition(def, bytes.to_vec());
            self.store.put_metadata(&entry).await?;
            entries.push(entry);

            on_progress(i + 1, total);
        }

        *self.map.write().unwrap() = Arc::new(build_map(&entries));
        tracing::info!(types = total, new_fetch_count, "Metadata updated");
        self.announce();

        Ok(MetadataUpdateSummary {
            type_count: total,
            new_fetch_count,
        })
    }

    /// Fetch type definitions from `remote` and update, reporting on
    /// `sync-metadata-progress`. Failures become an `error` event.
    pub async fn sync_metadata(&self, remote: &dyn RemoteSource) -> Option<MetadataUpdateSummary> {
        let emitter = self.emitter.as_ref();
        let result: Result<MetadataUpdateSummary> = async {
            SyncUpdate::progress("Fetching metadata...").emit(emitter, topic::SYNC_METADATA_PROGRESS);
            let types = remote.list_types().await?;

            SyncUpdate::progress("Fetching icons...").emit(emitter, topic::SYNC_METADATA_PROGRESS);
            self.update_metadata_dictionary(&types, &|done: usize, total: usize| {
                SyncUpdate::progress(format!("Fetching icons... {}/{}", done, total))
                    .emit(emitter, topic::SYNC_METADATA_PROGRESS);
            })
            .await
        }
        .await;

        match result {
            Ok(summary) => {
                SyncUpdate::success("Sync metadata... Success!")
                    .emit(emitter, topic::SYNC_METADATA_PROGRESS);
                Some(summary)
            }
            Err(e) => {
                tracing::error!("Metadata sync failed: {:#}", e);
                SyncUpdate::error(e.to_string()).emit(emitter, topic::SYNC_METADATA_PROGRESS);
                None
            }
        }
    }

    /// Drop the persisted entries and the icon cache.
    pub async fn reset(&self) -> Result<()> {
        self.store.clear_metadata().await?;
        self.cache.lock().await.clear();
        Ok(())
    }

    pub async fn cached_icon_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    fn announce(&self) {
        self.emitter.emit(
            topic::METADATA_CHANGED,
            serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_common_icon_formats() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_mime(b"  <svg xmlns=\"\"/>"), "image/svg+xml");
        assert_eq!(sniff_mime(b"<?xml version=\"1.0\"?><svg/>"), "image/svg+xml");
        assert_eq!(sniff_mime(b"\x00\x01"), "application/octet-stream");
    }

    #[test]
    fn data_url_embeds_bytes() {
        assert_eq!(icon_data_url(b"<svg/>"), "data:image/svg+xml;base64,PHN2Zy8+");
    }
}
