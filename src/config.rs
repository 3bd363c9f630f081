use anyhow::{Context, anyhow};

/// Page size used when a caller omits `batch_size`.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Node property an entity is matched on when nothing else is configured.
pub const DEFAULT_IDENTIFIER_PROPERTY: &str = "_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConfig {
    pub default_batch_size: i64,
    /// Node properties compared against a requested id. A node matches when any of them equals it.
    pub identifier_properties: Vec<String>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            identifier_properties: vec![DEFAULT_IDENTIFIER_PROPERTY.to_string()],
        }
    }
}

impl MembershipConfig {
    /// Reads `DEFAULT_BATCH_SIZE` and `ENTITY_IDENTIFIERS` (comma separated).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("DEFAULT_BATCH_SIZE") {
            config.default_batch_size = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid DEFAULT_BATCH_SIZE '{}'", raw))?;
        }

        if let Some(raw) = lookup("ENTITY_IDENTIFIERS") {
            let identifiers = parse_identifier_list(&raw)?;
            config.identifier_properties = identifiers;
        }

        Ok(config)
    }
}

fn parse_identifier_list(raw: &str) -> anyhow::Result<Vec<String>> {
    let mut identifiers = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        // Names are spliced into Cypher as property accessors.
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(anyhow!("invalid identifier property '{}'", name));
        }
        if !identifiers.iter().any(|known| known == name) {
            identifiers.push(name.to_string());
        }
    }

    if identifiers.is_empty() {
        return Err(anyhow!("ENTITY_IDENTIFIERS must name at least one property"));
    }
    Ok(identifiers)
}
