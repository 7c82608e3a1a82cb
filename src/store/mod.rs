//! Persistence layer: a volatile keyed store with in-memory and Redis backends.

pub mod keys;
pub mod memory;
pub mod redis_backend;
pub mod tasks;
pub mod traits;

use std::sync::Arc;

pub use keys::StoreKeys;
pub use memory::InMemoryStore;
pub use redis_backend::RedisStore;
pub use tasks::TaskStore;
pub use traits::VolatileStore;

use crate::error::StoreError;

/// Open the backend named by `url`: `redis://…`/`rediss://…` or `memory://`.
pub async fn connect(url: &str) -> Result<Arc<dyn VolatileStore>, StoreError> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(Arc::new(RedisStore::connect(url).await?))
    } else if url.starts_with("memory://") {
        Ok(Arc::new(InMemoryStore::new()))
    } else {
        Err(StoreError::Backend(format!(
            "unsupported store url: {}",
            redact_url(url)
        )))
    }
}

/// `url` with any credentials in its authority replaced by `***`, for logs.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority = &rest[..rest.find(['/', '?']).unwrap_or(rest.len())];
    match authority.rfind('@') {
        Some(at) => format!("{scheme}://***{}", &rest[at..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_password_and_user() {
        assert_eq!(
            redact_url("redis://:hunter2@cache.internal:6379/0"),
            "redis://***@cache.internal:6379/0"
        );
        assert_eq!(
            redact_url("rediss://svc:p@ss@cache:6380"),
            "rediss://***@cache:6380"
        );
    }

    #[test]
    fn redact_leaves_plain_urls_alone() {
        assert_eq!(redact_url("redis://127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(redact_url("memory://"), "memory://");
        assert_eq!(redact_url("redis://host/0?note=a@b"), "redis://host/0?note=a@b");
    }

    #[tokio::test]
    async fn unsupported_url_error_is_redacted() {
        let Err(err) = connect("mongodb://admin:secret@db:27017").await else {
            panic!("mongodb urls are not a store backend");
        };
        let text = err.to_string();
        assert!(!text.contains("secret"));
        assert!(text.contains("mongodb://***@db:27017"));
    }
}
