//! Pluggable sharding and key-generation algorithms.
//!
//! Algorithms are instantiated by type name (e.g. `MOD`, `SNOWFLAKE`) from an
//! [`AlgorithmConfiguration`]. [`AlgorithmRegistry::default`] carries every
//! built-in; callers add their own with `register_*` before building a rule.

pub mod keygen;
pub mod sharding;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{AlgorithmConfiguration, Props};
use crate::error::{Result, ShardingError};

pub use keygen::{
    IncrementKeyGenerateAlgorithm, KeyGenerateAlgorithm, KeyValue, SnowflakeKeyGenerateAlgorithm,
    UuidKeyGenerateAlgorithm,
};
pub use sharding::{
    HashModShardingAlgorithm, InlineShardingAlgorithm, ModShardingAlgorithm,
    StandardShardingAlgorithm,
};

type ShardingFactory =
    Arc<dyn Fn(&Props) -> anyhow::Result<Arc<dyn StandardShardingAlgorithm>> + Send + Sync>;
type KeyGeneratorFactory =
    Arc<dyn Fn(&Props) -> anyhow::Result<Arc<dyn KeyGenerateAlgorithm>> + Send + Sync>;

/// Type-name keyed factories for sharding algorithms and key generators.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    sharding: BTreeMap<String, ShardingFactory>,
    key_generators: BTreeMap<String, KeyGeneratorFactory>,
}

impl AlgorithmRegistry {
    /// Registry without any algorithm.
    pub fn empty() -> Self {
        Self {
            sharding: BTreeMap::new(),
            key_generators: BTreeMap::new(),
        }
    }

    pub fn register_sharding<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&Props) -> anyhow::Result<Arc<dyn StandardShardingAlgorithm>> + Send + Sync + 'static,
    {
        self.sharding
            .insert(type_name.to_ascii_uppercase(), Arc::new(factory));
    }

    pub fn register_key_generator<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&Props) -> anyhow::Result<Arc<dyn KeyGenerateAlgorithm>> + Send + Sync + 'static,
    {
        self.key_generators
            .insert(type_name.to_ascii_uppercase(), Arc::new(factory));
    }

    /// Instantiates the sharding algorithm configured under `name`.
    pub fn create_sharding(
        &self,
        name: &str,
        config: &AlgorithmConfiguration,
    ) -> Result<Arc<dyn StandardShardingAlgorithm>> {
        let factory = self
            .sharding
            .get(&config.algorithm_type.to_ascii_uppercase())
            .ok_or_else(|| {
                ShardingError::config(format!(
                    "sharding algorithm `{name}` has unknown type `{}`",
                    config.algorithm_type
                ))
            })?;
        factory(&config.props).map_err(|source| ShardingError::Algorithm {
            name: name.to_string(),
            source,
        })
    }

    /// Instantiates the key generator configured under `name`.
    pub fn create_key_generator(
        &self,
        name: &str,
        config: &AlgorithmConfiguration,
    ) -> Result<Arc<dyn KeyGenerateAlgorithm>> {
        let factory = self
            .key_generators
            .get(&config.algorithm_type.to_ascii_uppercase())
            .ok_or_else(|| {
                ShardingError::config(format!(
                    "key generator `{name}` has unknown type `{}`",
                    config.algorithm_type
                ))
            })?;
        factory(&config.props).map_err(|source| ShardingError::Algorithm {
            name: name.to_string(),
            source,
        })
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_sharding("INLINE", |props| {
            Ok(Arc::new(InlineShardingAlgorithm::from_props(props)?))
        });
        registry.register_sharding("MOD", |props| {
            Ok(Arc::new(ModShardingAlgorithm::from_props(props)?))
        });
        registry.register_sharding("HASH_MOD", |props| {
            Ok(Arc::new(HashModShardingAlgorithm::from_props(props)?))
        });
        registry.register_key_generator("SNOWFLAKE", |props| {
            Ok(Arc::new(SnowflakeKeyGenerateAlgorithm::from_props(props)?))
        });
        registry.register_key_generator("INCREMENT", |_| {
            Ok(Arc::new(IncrementKeyGenerateAlgorithm::default()))
        });
        registry.register_key_generator("UUID", |_| Ok(Arc::new(UuidKeyGenerateAlgorithm)));
        registry
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("sharding", &self.sharding.keys().collect::<Vec<_>>())
            .field("key_generators", &self.key_generators.keys().collect::<Vec<_>>())
            .finish()
    }
}
