use crate::internal::common::Map;
use crate::internal::common::resources::ResourceId;

pub const SLOTS_RESOURCE_ID: ResourceId = ResourceId::new(0);
pub const SLOTS_RESOURCE_NAME: &str = "slots";

/// Name <-> id mapping of all resources known in one epoch.
///
/// `slots` always has id 0, remaining resources get ids in the order of
/// registration, so the mapping is deterministic for a given snapshot.
#[derive(Debug)]
pub struct ResourceMap {
    resource_names: Vec<String>,
    resource_ids: Map<String, ResourceId>,
}

impl Default for ResourceMap {
    fn default() -> Self {
        let mut resource_ids = Map::new();
        resource_ids.insert(SLOTS_RESOURCE_NAME.to_string(), SLOTS_RESOURCE_ID);
        ResourceMap {
            resource_names: vec![SLOTS_RESOURCE_NAME.to_string()],
            resource_ids,
        }
    }
}

impl ResourceMap {
    pub fn get_or_allocate_resource_id(&mut self, name: &str) -> ResourceId {
        match self.resource_ids.get(name) {
            Some(&id) => id,
            None => {
                let id = ResourceId::new(self.resource_names.len() as u32);
                log::debug!("Resource '{name}' registered as {id}");
                self.resource_ids.insert(name.to_string(), id);
                self.resource_names.push(name.to_string());
                id
            }
        }
    }

    #[inline]
    pub fn get_index(&self, name: &str) -> Option<ResourceId> {
        self.resource_ids.get(name).copied()
    }

    #[inline]
    pub fn get_name(&self, index: ResourceId) -> Option<&str> {
        self.resource_names
            .get(index.as_usize())
            .map(|s| s.as_str())
    }

    /// Name for messages; falls back to the numeric id.
    pub fn display_name(&self, index: ResourceId) -> String {
        self.get_name(index)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("#{index}"))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resource_names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resource_names.is_empty()
    }
}
