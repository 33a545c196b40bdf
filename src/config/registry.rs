//! The validated runtime universe of entities and sources.
//!
//! Configuration is stringly-typed on disk; the registry interns it into
//! validated names once, at startup, and every request is checked against it
//! at entry.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::{EntityName, ForeignKey, SourceName};
use crate::merge::MergePolicy;
use crate::source::CommandTemplates;

use super::{Config, ConfigError};

/// Resolved per-entity runtime configuration.
#[derive(Clone, Debug)]
pub struct EntityRuntime {
    pub name: EntityName,
    pub policy: MergePolicy,
    /// Enabled sources in ascending name order, each with its adaptor
    /// command templates.
    pub sources: BTreeMap<SourceName, CommandTemplates>,
    /// Per-source adaptor deadline.
    pub timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    entities: BTreeMap<EntityName, EntityRuntime>,
}

impl Registry {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut entities = BTreeMap::new();
        for (entity_raw, entity_config) in &config.entities {
            let name = EntityName::new(entity_raw.clone())?;
            if entity_config.enabled.is_empty() {
                return Err(ConfigError::NoSources {
                    entity: entity_raw.clone(),
                });
            }
            let policy: MergePolicy = entity_config.merge_policy.parse()?;

            let mut sources = BTreeMap::new();
            for source_raw in &entity_config.enabled {
                let source = SourceName::new(source_raw.clone())?;
                let templates = entity_config.sources.get(source_raw).cloned().ok_or_else(|| {
                    ConfigError::MissingSource {
                        entity: entity_raw.clone(),
                        source_name: source_raw.clone(),
                    }
                })?;
                sources.insert(source, templates);
            }

            if let MergePolicy::TrustOnly(trusted) = &policy
                && !sources.contains_key(trusted)
            {
                return Err(ConfigError::TrustedSourceNotEnabled {
                    entity: entity_raw.clone(),
                    source_name: trusted.to_string(),
                });
            }

            entities.insert(
                name.clone(),
                EntityRuntime {
                    name,
                    policy,
                    sources,
                    timeout: Duration::from_millis(entity_config.timeout_ms),
                },
            );
        }
        Ok(Self { entities })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRuntime> {
        self.entities.values()
    }

    pub fn entity(&self, name: &EntityName) -> Option<&EntityRuntime> {
        self.entities.get(name)
    }

    /// Validate a request's `(entity, source)` pair against the universe.
    pub fn resolve(&self, fk: &ForeignKey) -> Result<&EntityRuntime, ConfigError> {
        let entity = self
            .entities
            .get(&fk.entity)
            .ok_or_else(|| ConfigError::UnknownEntity {
                entity: fk.entity.to_string(),
            })?;
        if !entity.sources.contains_key(&fk.source) {
            return Err(ConfigError::UnknownSource {
                entity: fk.entity.to_string(),
                source_name: fk.source.to_string(),
            });
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;

    fn sample_registry() -> Registry {
        let config = parse(
            r#"
[entities.customer]
merge-policy = "trust-only:data"
enabled = ["data"]

[entities.customer.sources.data]
create = "c"
read = "r %fk"
update = "u %fk"
delete = "d %fk"
"#,
        )
        .unwrap();
        Registry::from_config(&config).unwrap()
    }

    fn fk(entity: &str, source: &str) -> ForeignKey {
        ForeignKey::new(
            EntityName::new(entity).unwrap(),
            SourceName::new(source).unwrap(),
            "K1",
        )
        .unwrap()
    }

    #[test]
    fn resolves_configured_pairs() {
        let registry = sample_registry();
        let entity = registry.resolve(&fk("customer", "data")).unwrap();
        assert_eq!(entity.policy, MergePolicy::TrustOnly(SourceName::new("data").unwrap()));
    }

    #[test]
    fn rejects_unknown_entity_and_source() {
        let registry = sample_registry();
        assert!(matches!(
            registry.resolve(&fk("order", "data")),
            Err(ConfigError::UnknownEntity { .. })
        ));
        assert!(matches!(
            registry.resolve(&fk("customer", "crm")),
            Err(ConfigError::UnknownSource { .. })
        ));
    }

    #[test]
    fn enabled_source_without_commands_is_an_error() {
        let config = parse(
            r#"
[entities.customer]
merge-policy = "merge-all"
enabled = ["data"]
"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::from_config(&config),
            Err(ConfigError::MissingSource { .. })
        ));
    }

    #[test]
    fn trust_only_must_name_an_enabled_source() {
        let config = parse(
            r#"
[entities.customer]
merge-policy = "trust-only:crm"
enabled = ["data"]

[entities.customer.sources.data]
create = "c"
read = "r"
update = "u"
delete = "d"
"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::from_config(&config),
            Err(ConfigError::TrustedSourceNotEnabled { .. })
        ));
    }

    #[test]
    fn entity_without_sources_is_an_error() {
        let config = parse(
            r#"
[entities.customer]
merge-policy = "merge-all"
enabled = []
"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::from_config(&config),
            Err(ConfigError::NoSources { .. })
        ));
    }
}
