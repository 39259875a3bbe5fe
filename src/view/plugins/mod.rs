//! Built-in view plugins
//!
//! Each plugin taps a [`ViewInstance`]'s parser and resolver hooks. Order
//! matters for the bail and waterfall hooks they share, so
//! [`default_plugins`] returns them in the order the view controller applies
//! them.

mod applicability;
mod asset_transform;
mod local_state;
mod multi_node;
mod registry;
mod string_resolver;
mod switch;
mod template;

use std::sync::Arc;

use super::instance::ViewInstance;

pub use applicability::ApplicabilityPlugin;
pub use asset_transform::{
    AssetTransform, AssetTransformPlugin, BeforeResolveTransform, ResolveTransform,
    TransformContext, TransformRegistry,
};
pub use local_state::{LocalStateStore, StateSetter};
pub use multi_node::MultiNodePlugin;
pub use registry::Registry;
pub use string_resolver::StringResolverPlugin;
pub use switch::SwitchPlugin;
pub use template::TemplatePlugin;

/// Applied to every view before its first update
pub trait ViewPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, view: &Arc<ViewInstance>);
}

/// The plugins every view gets
pub fn default_plugins(
    transforms: Arc<TransformRegistry>,
    max_template_depth: usize,
) -> Vec<Arc<dyn ViewPlugin>> {
    vec![
        Arc::new(ApplicabilityPlugin),
        Arc::new(SwitchPlugin),
        Arc::new(TemplatePlugin::new(max_template_depth)),
        Arc::new(MultiNodePlugin),
        Arc::new(StringResolverPlugin),
        Arc::new(AssetTransformPlugin::new(transforms)),
    ]
}
