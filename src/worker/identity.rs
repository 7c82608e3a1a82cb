//! Worker identities loaded from the identity CSV.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;

/// One configured identity.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: String,
    pub pool: String,
    /// Start in fast mode.
    pub high_priority: bool,
    pub channel_id: String,
    pub server_id: String,
    pub user_access_token: SecretString,
    pub human_name: String,
    /// `user:pass@host:port` or `host:port`.
    pub proxy: Option<String>,
}

impl BotIdentity {
    /// Name used in logs and operator notifications.
    pub fn display_name(&self) -> &str {
        if self.human_name.is_empty() {
            &self.id
        } else {
            &self.human_name
        }
    }

    /// Content hash; a changed row gets a restarted worker.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.pool.hash(&mut hasher);
        self.high_priority.hash(&mut hasher);
        self.channel_id.hash(&mut hasher);
        self.server_id.hash(&mut hasher);
        self.user_access_token.expose_secret().hash(&mut hasher);
        self.human_name.hash(&mut hasher);
        self.proxy.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Deserialize)]
struct IdentityRow {
    id: String,
    #[serde(default)]
    pool: Option<String>,
    #[serde(default)]
    high_priority: Option<String>,
    channel_id: String,
    server_id: String,
    user_access_token: String,
    #[serde(default)]
    human_name: Option<String>,
    #[serde(default)]
    proxy: Option<String>,
}

impl From<IdentityRow> for BotIdentity {
    fn from(row: IdentityRow) -> Self {
        let pool = row
            .pool
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "common".to_string());
        Self {
            id: row.id.trim().to_string(),
            pool,
            high_priority: row.high_priority.as_deref().is_some_and(parse_flag),
            channel_id: row.channel_id.trim().to_string(),
            server_id: row.server_id.trim().to_string(),
            user_access_token: SecretString::from(row.user_access_token.trim().to_string()),
            human_name: row.human_name.unwrap_or_default().trim().to_string(),
            proxy: row.proxy.as_deref().and_then(normalize_proxy),
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// `host:port:user:pass` becomes `user:pass@host:port`; other forms pass through.
pub fn normalize_proxy(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parts: Vec<&str> = raw.split(':').collect();
    if let [host, port, user, pass] = parts.as_slice() {
        Some(format!("{user}:{pass}@{host}:{port}"))
    } else {
        Some(raw.to_string())
    }
}

/// Parse identity rows from CSV text with a header line.
pub fn parse_identities(reader: impl std::io::Read, source: &str) -> Result<Vec<BotIdentity>, ConfigError> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut identities = Vec::new();
    for (line, row) in csv.deserialize::<IdentityRow>().enumerate() {
        let row = row.map_err(|e| ConfigError::IdentityFile {
            path: source.to_string(),
            reason: format!("row {}: {e}", line + 1),
        })?;
        identities.push(BotIdentity::from(row));
    }
    Ok(identities)
}

/// Load identity rows from `path`.
pub fn load_identities(path: &Path) -> Result<Vec<BotIdentity>, ConfigError> {
    let file = std::fs::File::open(path)?;
    parse_identities(file, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CSV: &str = "\
id,pool,high_priority,channel_id,server_id,user_access_token,human_name,proxy
101,,True,c1,s1,tok-a,alice,10.0.0.1:8080:u:p
102,art,false,c2,s2,tok-b,,
";

    #[test]
    fn parses_rows_with_defaults() {
        let ids = parse_identities(CSV.as_bytes(), "inline").unwrap();
        assert_eq!(ids.len(), 2);

        assert_eq!(ids[0].pool, "common");
        assert!(ids[0].high_priority);
        assert_eq!(ids[0].proxy.as_deref(), Some("u:p@10.0.0.1:8080"));
        assert_eq!(ids[0].display_name(), "alice");

        assert_eq!(ids[1].pool, "art");
        assert!(!ids[1].high_priority);
        assert!(ids[1].proxy.is_none());
        assert_eq!(ids[1].display_name(), "102");
    }

    #[test]
    fn fingerprint_tracks_content() {
        let ids = parse_identities(CSV.as_bytes(), "inline").unwrap();
        let mut changed = ids[0].clone();
        assert_eq!(changed.fingerprint(), ids[0].fingerprint());
        changed.user_access_token = SecretString::from("tok-z".to_string());
        assert_ne!(changed.fingerprint(), ids[0].fingerprint());
    }

    #[test]
    fn proxy_forms() {
        assert_eq!(normalize_proxy("h:1:u:p").as_deref(), Some("u:p@h:1"));
        assert_eq!(normalize_proxy("h:1").as_deref(), Some("h:1"));
        assert_eq!(normalize_proxy("  "), None);
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = parse_identities("id,pool\n1,p\n".as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, ConfigError::IdentityFile { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        let ids = load_identities(file.path()).unwrap();
        assert_eq!(ids.len(), 2);
    }
}
