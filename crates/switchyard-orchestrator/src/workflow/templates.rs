use super::graph::validate_definition;
use super::model::WorkflowDefinition;
use std::collections::HashMap;
use std::path::Path;
use switchyard_core::{SwitchyardError, SwitchyardResult};
use tracing::{info, warn};

/// Named workflow templates.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, WorkflowDefinition>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a template under its definition name.
    pub fn register(&mut self, definition: WorkflowDefinition) -> SwitchyardResult<()> {
        validate_definition(&definition)?;
        if self
            .templates
            .insert(definition.name.clone(), definition.clone())
            .is_some()
        {
            warn!(template = %definition.name, "Template replaced");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.templates.get(name)
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every `*.json` file in `dir` as a template.
    ///
    /// A file that fails to parse or validate is skipped with a warning;
    /// an unreadable directory is an error. Returns the number loaded.
    pub fn load_dir(&mut self, dir: &Path) -> SwitchyardResult<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(SwitchyardError::from)
                .and_then(|raw| {
                    serde_json::from_str::<WorkflowDefinition>(&raw).map_err(SwitchyardError::from)
                })
                .and_then(|def| self.register(def));
            match parsed {
                Ok(()) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping workflow template"),
            }
        }
        info!(dir = %dir.display(), loaded, "Workflow templates loaded");
        Ok(loaded)
    }
}
