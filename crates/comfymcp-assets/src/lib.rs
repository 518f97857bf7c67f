//! comfymcp assets - generated-asset registry, inline previews and publishing
//! into web projects

pub mod preview;
pub mod publish;
pub mod registry;

pub use preview::{encode_preview, image_dimensions, EncodedPreview, PreviewError};
pub use publish::{PublishError, PublishInfo, PublishManager, PublishResult, RootSource};
pub use registry::{AssetRecord, AssetRegistry, NewAsset};
