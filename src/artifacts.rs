use crate::models::Product;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not serialize product: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable per-item scrape output, written before submission so a crashed
/// batch leaves something to inspect.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, session: &str, index: usize) -> PathBuf {
        self.root
            .join(session_slug(session))
            .join(format!("product_{index}.json"))
    }

    /// Where the single-product desk keeps its last scraped product.
    pub fn single_path(&self, session: &str) -> PathBuf {
        self.root.join(session_slug(session)).join("product.json")
    }

    pub async fn persist(
        &self,
        session: &str,
        index: usize,
        product: &Product,
    ) -> Result<PathBuf, ArtifactError> {
        write_pretty(self.path_for(session, index), product).await
    }

    pub async fn persist_single(
        &self,
        session: &str,
        product: &Product,
    ) -> Result<PathBuf, ArtifactError> {
        write_pretty(self.single_path(session), product).await
    }
}

async fn write_pretty(path: PathBuf, product: &Product) -> Result<PathBuf, ArtifactError> {
    let body = serde_json::to_vec_pretty(product)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ArtifactError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Filesystem-safe directory name for a session key.
pub fn session_slug(session: &str) -> String {
    let slug: String = session
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if slug.trim_matches('_').is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product() -> Product {
        Product {
            source_url: "https://www.amazon.co.uk/dp/B01".into(),
            title: "Stainless Garden Hose Reel".into(),
            price: Some(24.99),
            currency: "GBP".into(),
            quantity: 2,
            seller_note: "Box 107".into(),
            images: vec![],
            specifics: Default::default(),
            custom_specifics: [("Colour", "Green")].into_iter().collect(),
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn persists_pretty_json_per_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.persist("org/Demo", 3, &product()).await.unwrap();
        assert_eq!(path, dir.path().join("org_demo").join("product_3.json"));
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains('\n'));
        let back: Product = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, product_with_time(back.scraped_at));
    }

    fn product_with_time(at: chrono::DateTime<Utc>) -> Product {
        Product {
            scraped_at: at,
            ..product()
        }
    }

    #[tokio::test]
    async fn unwritable_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        tokio::fs::write(&blocker, b"x").await.unwrap();
        let store = ArtifactStore::new(&blocker);
        let err = store.persist("s", 1, &product()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[test]
    fn slug_never_empty() {
        assert_eq!(session_slug("///"), "default");
        assert_eq!(session_slug("Acme-1"), "acme-1");
    }
}
