//! Registry and store configuration.

use reactdb_schema::SchemaNode;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a store registry.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Projections slower than this are logged while triggering watches.
    pub slow_projection_warning: Option<Duration>,

    /// Whether unmasked reads of large objects are reported.
    pub check_unmasked_reads: bool,

    /// Field count above which an unmasked read is reported.
    pub max_unmasked_fields: usize,

    /// Whether masked reads on schema'd stores are checked against the schema.
    pub validate_masks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slow_projection_warning: Some(Duration::from_millis(50)),
            check_unmasked_reads: false,
            max_unmasked_fields: 20,
            validate_masks: true,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the slow projection threshold (`None` disables the warning).
    #[must_use]
    pub const fn slow_projection_warning(mut self, value: Option<Duration>) -> Self {
        self.slow_projection_warning = value;
        self
    }

    /// Sets whether unmasked reads of large objects are reported.
    #[must_use]
    pub const fn check_unmasked_reads(mut self, value: bool) -> Self {
        self.check_unmasked_reads = value;
        self
    }

    /// Sets the field count above which unmasked reads are reported.
    #[must_use]
    pub const fn max_unmasked_fields(mut self, value: usize) -> Self {
        self.max_unmasked_fields = value;
        self
    }

    /// Sets whether masks are checked against store schemas.
    #[must_use]
    pub const fn validate_masks(mut self, value: bool) -> Self {
        self.validate_masks = value;
        self
    }
}

/// Options a store is registered with.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Schema the store's document must follow. `None` accepts any shape.
    pub schema: Option<Arc<SchemaNode>>,

    /// Accept fields and enum values the schema does not know about.
    pub forward_feed: bool,

    /// Let every change create missing schema'd intermediate objects.
    pub allow_sub_object_create: bool,

    /// Keep server truth separately from optimistic client data.
    pub server_synced: bool,
}

impl StoreOptions {
    /// Creates options for a schemaless store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema.
    #[must_use]
    pub fn schema(mut self, schema: SchemaNode) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Sets a schema that is shared with other stores.
    #[must_use]
    pub fn shared_schema(mut self, schema: Arc<SchemaNode>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets forward feed tolerance.
    #[must_use]
    pub const fn forward_feed(mut self, value: bool) -> Self {
        self.forward_feed = value;
        self
    }

    /// Sets whether changes may create missing intermediate objects.
    #[must_use]
    pub const fn allow_sub_object_create(mut self, value: bool) -> Self {
        self.allow_sub_object_create = value;
        self
    }

    /// Sets server-synced mode.
    #[must_use]
    pub const fn server_synced(mut self, value: bool) -> Self {
        self.server_synced = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactdb_schema::FieldType;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.slow_projection_warning, Some(Duration::from_millis(50)));
        assert!(!config.check_unmasked_reads);
        assert_eq!(config.max_unmasked_fields, 20);
        assert!(config.validate_masks);
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .slow_projection_warning(None)
            .check_unmasked_reads(true)
            .max_unmasked_fields(5);
        assert_eq!(config.slow_projection_warning, None);
        assert!(config.check_unmasked_reads);
        assert_eq!(config.max_unmasked_fields, 5);

        let options = StoreOptions::new()
            .schema(SchemaNode::fixed([("count", SchemaNode::leaf(FieldType::Int))]))
            .forward_feed(true)
            .server_synced(true);
        assert!(options.schema.is_some());
        assert!(options.forward_feed);
        assert!(!options.allow_sub_object_create);
        assert!(options.server_synced);
    }
}
