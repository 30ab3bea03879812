use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::batch::Transport;

/// Asks the user for connection details. Every method returns `None` when the
/// user dismissed the prompt or no answer is available.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn username(&self, default: &str) -> Option<String>;
    async fn password(&self) -> Option<Zeroizing<String>>;
    async fn transport(&self) -> Option<Transport>;
    async fn endpoint_id(&self) -> Option<String>;
}
