//! Synthetic owner identities
//!
//! Fetched courses only carry a maker name. Each distinct name gets a
//! placeholder avatar record cloned from a loaded template, renamed, and given
//! ids from reserved ranges. Identities live in memory for the process
//! lifetime and are never written to disk.

pub mod avatar;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SynthConfig;
use crate::error::{PoolError, Result};
use crate::store::{ContentStore, OwnerResolver};

use avatar::AvatarMeta;

struct SynthState {
    next_id: u64,
    next_owner: u64,
    by_name: HashMap<String, u64>,
}

pub struct Synthesizer {
    store: Arc<ContentStore>,
    state: Mutex<SynthState>,
}

impl Synthesizer {
    pub fn new(store: Arc<ContentStore>, config: &SynthConfig) -> Self {
        Self {
            store,
            state: Mutex::new(SynthState {
                next_id: config.id_base,
                next_owner: config.owner_base,
                by_name: HashMap::new(),
            }),
        }
    }

    /// Owner id standing in for `name`, created on first use
    pub async fn synthesize_owner(&self, name: &str) -> Result<u64> {
        // Held across the store calls so one name never allocates twice
        let mut state = self.state.lock().await;
        if let Some(&owner) = state.by_name.get(name) {
            return Ok(owner);
        }

        let templates = self.store.avatar_templates().await;
        if templates.is_empty() {
            return Err(PoolError::NoTemplates);
        }
        let pick = template_slot(name, templates.len());

        let mut record = templates[pick].clone();
        let id = state.next_id;
        let owner = state.next_owner;
        record.id = id;
        record.owner_id = owner;
        record.display_name = name.to_string();
        AvatarMeta::parse(&mut record.raw_payload)?.rename(name);

        self.store.insert(record).await;
        state.next_id += 1;
        state.next_owner += 1;
        state.by_name.insert(name.to_string(), owner);

        debug!(name, id, owner, template = templates[pick].id, "Synthesized owner");
        Ok(owner)
    }
}

#[async_trait]
impl OwnerResolver for Synthesizer {
    /// Falls back to the default avatar owner when no identity can be made,
    /// so a course is still served without its own owner avatar
    async fn resolve_owner(&self, name: &str) -> Result<u64> {
        match self.synthesize_owner(name).await {
            Ok(owner) => Ok(owner),
            Err(e) => match self.store.default_avatar_owner() {
                Some(fallback) => {
                    warn!(name, fallback, error = %e, "Cannot synthesize owner, using default avatar owner");
                    Ok(fallback)
                }
                None => Err(e),
            },
        }
    }
}

/// Deterministic template choice for a name
fn template_slot(name: &str, templates: usize) -> usize {
    crc32fast::hash(name.as_bytes()) as usize % templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PoolLayout;
    use crate::models::{ContentRecord, RecordKind};
    use crate::preload::BulkData;
    use tempfile::TempDir;

    fn template(id: u64, owner: u64) -> ContentRecord {
        let meta = avatar::sample_meta("tmpl");
        ContentRecord {
            id,
            owner_id: owner,
            kind: RecordKind::Avatar,
            display_name: format!("tmpl{}", id),
            payload_size: meta.len() as u64,
            header: None,
            raw_payload: meta,
            created_at: 0,
            updated_at: 0,
            stars: 0,
            tags: vec![],
            ratings: vec![],
        }
    }

    async fn setup(temp_dir: &TempDir, templates: Vec<ContentRecord>) -> Synthesizer {
        setup_with_default(temp_dir, templates, None).await
    }

    async fn setup_with_default(
        temp_dir: &TempDir,
        templates: Vec<ContentRecord>,
        default_owner: Option<u64>,
    ) -> Synthesizer {
        let store = ContentStore::open(PoolLayout::new(temp_dir.path()), "http://h", default_owner)
            .await
            .unwrap();
        store
            .hydrate(BulkData {
                avatars: templates,
                ..Default::default()
            })
            .await;
        Synthesizer::new(Arc::new(store), &SynthConfig::default())
    }

    #[tokio::test]
    async fn test_same_name_same_owner() {
        let temp_dir = TempDir::new().unwrap();
        let synth = setup(&temp_dir, vec![template(1, 11), template(2, 12)]).await;

        let a = synth.synthesize_owner("luigi").await.unwrap();
        let b = synth.synthesize_owner("luigi").await.unwrap();
        let c = synth.synthesize_owner("peach").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, 2_000_000_000);
        assert_eq!(c, 2_000_000_001);
    }

    #[tokio::test]
    async fn test_synthesized_avatar_is_renamed_and_served() {
        let temp_dir = TempDir::new().unwrap();
        let synth = setup(&temp_dir, vec![template(1, 11)]).await;

        let owner = synth.synthesize_owner("50%\\off").await.unwrap();
        let mut record = synth.store.lookup_owner_avatar(owner).await.unwrap();
        assert_eq!(record.id, 20_000_000_000);
        assert_eq!(record.display_name, "50%\\off");

        let meta = AvatarMeta::parse(&mut record.raw_payload).unwrap();
        assert_eq!(meta.block().name(), "50off");
        assert!(meta.block().checksum_valid());

        // templates are untouched and synthetic records never become templates
        let templates = synth.store.avatar_templates().await;
        assert_eq!(templates.len(), 1);
        let mut original = templates[0].raw_payload.clone();
        assert_eq!(AvatarMeta::parse(&mut original).unwrap().block().name(), "tmpl");
    }

    #[tokio::test]
    async fn test_no_templates() {
        let temp_dir = TempDir::new().unwrap();
        let synth = setup(&temp_dir, vec![]).await;
        assert!(matches!(
            synth.synthesize_owner("x").await,
            Err(PoolError::NoTemplates)
        ));
    }

    #[tokio::test]
    async fn test_resolve_owner_falls_back_without_templates() {
        let temp_dir = TempDir::new().unwrap();
        let synth = setup_with_default(&temp_dir, vec![], Some(77)).await;
        assert_eq!(synth.resolve_owner("toad").await.unwrap(), 77);

        // no identity was allocated for the name
        assert!(synth.state.lock().await.by_name.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_owner_falls_back_on_malformed_template() {
        let temp_dir = TempDir::new().unwrap();
        let mut broken = template(1, 11);
        broken.raw_payload = vec![0u8; 8];
        let synth = setup_with_default(&temp_dir, vec![broken], Some(77)).await;

        assert!(matches!(
            synth.synthesize_owner("toad").await,
            Err(PoolError::MalformedRecord(_))
        ));
        assert_eq!(synth.resolve_owner("toad").await.unwrap(), 77);
    }

    #[tokio::test]
    async fn test_resolve_owner_without_default_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let synth = setup(&temp_dir, vec![]).await;
        assert!(matches!(
            synth.resolve_owner("toad").await,
            Err(PoolError::NoTemplates)
        ));
    }

    #[test]
    fn test_template_slot_is_stable() {
        assert_eq!(template_slot("mario", 7), template_slot("mario", 7));
        assert!(template_slot("mario", 7) < 7);
    }
}
