use crate::config::settings::EngineConfig;
use crate::config::types::Target;
use crate::judge::backend::Backend;
use crate::judge::languages::{compiled::CompiledBackend, hosted::HostedBackend, traced::TracedBackend};
use std::collections::BTreeMap;

pub fn backend_for(target: Target, config: &EngineConfig) -> Box<dyn Backend> {
    match target {
        Target::Traced => Box::new(TracedBackend::new(config)),
        Target::Compiled => Box::new(CompiledBackend::new(config)),
        Target::Hosted => Box::new(HostedBackend::new(config)),
    }
}

/// One backend per target, built once from configuration.
pub struct BackendRegistry {
    backends: BTreeMap<Target, Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn from_config(config: &EngineConfig) -> Self {
        let backends = Target::ALL
            .into_iter()
            .map(|target| (target, backend_for(target, config)))
            .collect();
        Self { backends }
    }

    pub fn get(&self, target: Target) -> Option<&dyn Backend> {
        self.backends.get(&target).map(|b| b.as_ref())
    }

    pub fn targets(&self) -> Vec<Target> {
        self.backends.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Backend> + '_ {
        self.backends.values().map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_target_has_a_backend() {
        let registry = BackendRegistry::from_config(&EngineConfig::default());
        assert_eq!(registry.targets(), Target::ALL.to_vec());
        for target in Target::ALL {
            assert_eq!(registry.get(target).unwrap().target(), target);
        }
    }

    #[test]
    fn descriptions_name_the_toolchain() {
        let config = EngineConfig::default();
        assert!(backend_for(Target::Compiled, &config).describe().contains("gcc"));
        assert!(backend_for(Target::Hosted, &config).describe().contains("node"));
    }
}
