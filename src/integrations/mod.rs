//! Integration layer: plugin contract, concrete plugins, factory, lifecycle
//! service and the cleanup reconciler.

mod aws_lambda;
mod discord;
mod factory;
mod plugin;
mod reconciler;
mod service;
mod slack;
mod types;
mod vercel;

pub use aws_lambda::{AwsLambdaPlugin, LambdaClientFactory, LambdaMetadata, SdkLambdaClientFactory};
pub use discord::DiscordPlugin;
pub use factory::{IntegrationFactory, PluginDeps, SLACK_API_BASE, VERCEL_API_BASE};
pub use plugin::{ChangeEvent, EventDispatcher, EventEntry, IntegrationPlugin};
pub use reconciler::Reconciler;
pub use service::{
    CreateIntegrationRequest, IntegrationDispatcher, IntegrationService, UpdateIntegrationRequest,
};
pub use slack::SlackPlugin;
pub use types::{EnvironmentSupport, IntegrationDescriptor, IntegrationType};
pub use vercel::{VercelPlugin, PRIVATE_KEY_VARIABLE};
