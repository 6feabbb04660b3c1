pub mod settings;

pub use settings::{
    generate_default_config, BackendSettings, ClusterSettings, ProvisioningSettings, PublishSettings,
    Settings,
};
