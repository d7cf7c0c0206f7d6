use std::collections::HashMap;
use std::sync::Mutex;

/// Round-robin provider selection per model: one integer index per model
/// under a single mutex, `next_provider` is O(1).
#[derive(Debug, Default)]
pub struct ModelRouter {
    routes: HashMap<String, Vec<String>>,
    indices: Mutex<HashMap<String, usize>>,
}

impl ModelRouter {
    pub fn new(routes: HashMap<String, Vec<String>>) -> Self {
        Self {
            routes,
            indices: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_provider(&self, model: &str) -> Option<String> {
        let providers = self.routes.get(model).filter(|p| !p.is_empty())?;
        let mut indices = self.indices.lock().unwrap_or_else(|e| e.into_inner());
        let index = indices.entry(model.to_string()).or_insert(0);
        let provider = providers[*index % providers.len()].clone();
        *index = (*index + 1) % providers.len();
        Some(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_providers() {
        let router = ModelRouter::new(HashMap::from([(
            "m".to_string(),
            vec!["a".to_string(), "b".to_string()],
        )]));
        assert_eq!(router.next_provider("m").as_deref(), Some("a"));
        assert_eq!(router.next_provider("m").as_deref(), Some("b"));
        assert_eq!(router.next_provider("m").as_deref(), Some("a"));
        assert!(router.next_provider("unknown").is_none());
    }
}
