use async_trait::async_trait;
use tracing::debug;
use zeroize::Zeroizing;

use ontapexec_traits::batch::{ConnectionContext, TargetDescriptor, Transport};
use ontapexec_traits::prompt::Prompter;

/// A prompter with no one to ask; every field falls back to its default.
pub struct NoPrompt;

#[async_trait]
impl Prompter for NoPrompt {
    async fn username(&self, _default: &str) -> Option<String> {
        None
    }

    async fn password(&self) -> Option<Zeroizing<String>> {
        None
    }

    async fn transport(&self) -> Option<Transport> {
        None
    }

    async fn endpoint_id(&self) -> Option<String> {
        None
    }
}

/// Turns a target and an optional cached context into the context a batch
/// runs with.
pub struct ContextResolver<'a> {
    prompter: &'a dyn Prompter,
    default_username: &'a str,
}

impl<'a> ContextResolver<'a> {
    pub fn new(prompter: &'a dyn Prompter, default_username: &'a str) -> Self {
        Self {
            prompter,
            default_username,
        }
    }

    /// With a cached context only a missing password is asked for. Without
    /// one, username, password, transport and (for tunnels) the endpoint id
    /// are prompted. The private IP is the target's management IP unless the
    /// cached context names another.
    pub async fn resolve(
        &self,
        target: &TargetDescriptor,
        cached: Option<ConnectionContext>,
    ) -> ConnectionContext {
        match cached {
            Some(cached) => self.reuse(target, cached).await,
            None => self.ask(target).await,
        }
    }

    async fn reuse(&self, target: &TargetDescriptor, cached: ConnectionContext) -> ConnectionContext {
        debug!(ip = %cached.private_ip_address, "Reusing cached connection context");

        let username = if cached.username.trim().is_empty() {
            self.default_username.to_string()
        } else {
            cached.username
        };

        let password = if cached.password.is_empty() {
            self.prompter.password().await.unwrap_or_default()
        } else {
            cached.password
        };

        let private_ip_address = if cached.private_ip_address.trim().is_empty() {
            target.management_ip.clone()
        } else {
            cached.private_ip_address
        };

        ConnectionContext {
            username,
            password,
            instance_connect_endpoint_id: cached
                .instance_connect_endpoint_id
                .filter(|id| !id.trim().is_empty()),
            private_ip_address,
        }
    }

    async fn ask(&self, target: &TargetDescriptor) -> ConnectionContext {
        let username = self
            .prompter
            .username(self.default_username)
            .await
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.default_username.to_string());

        let password = self.prompter.password().await.unwrap_or_default();

        let endpoint_id = match self.prompter.transport().await {
            Some(Transport::Tunneled) => self.prompter.endpoint_id().await,
            Some(Transport::Direct) | None => None,
        };

        let mut context = ConnectionContext::new(
            username,
            String::new(),
            endpoint_id,
            target.management_ip.clone(),
        );
        context.password = password;
        context
    }
}
